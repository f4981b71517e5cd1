//! The migration handler variants and their repairs.

use std::sync::Arc;

use regex::Regex;
use tracing::{debug, warn};

use super::{HandledResult, HealContext, LegacySignatures, Repair, RepairAction};
use crate::diagnostic::{DiagnosticClass, DiagnosticToken};
use crate::schema::{EntityKey, RepositoryError, SchemaEntity};
use crate::source::{EntityKind, EntityRef};

/// Recognizes one failure class, by structured class or by message text.
///
/// A token carrying a class is matched on the class alone; the regex then
/// only serves to extract the `name` capture. Unclassified tokens must match
/// the regex.
#[derive(Debug, Clone)]
pub struct MessagePattern {
	class: DiagnosticClass,
	regex: Regex,
}

/// What a pattern learned from a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recognition {
	/// Symbol named by the message, if the pattern captured one.
	pub symbol: Option<Arc<str>>,
}

impl MessagePattern {
	pub fn new(class: DiagnosticClass, pattern: &str) -> Result<Self, regex::Error> {
		Ok(Self {
			class,
			regex: Regex::new(pattern)?,
		})
	}

	pub fn class(&self) -> DiagnosticClass {
		self.class
	}

	pub fn recognize(&self, token: &DiagnosticToken) -> Option<Recognition> {
		let captures = self.regex.captures(&token.message);
		match token.class {
			Some(class) if class != self.class => return None,
			Some(_) => {}
			None if captures.is_none() => return None,
			None => {}
		}
		let symbol = captures.and_then(|caps| caps.name("name")).map(|m| Arc::from(m.as_str()));
		Some(Recognition { symbol })
	}
}

/// One recognized failure shape with its repair.
///
/// Handlers are stateless apart from their configuration. Every repair is a
/// single repository transaction, and a missing entity is a benign no-op.
#[derive(Debug, Clone)]
pub enum MigrationHandler {
	/// Deletes allow-listed obsolete methods.
	LegacySignature(LegacySignatures),
	/// Deletes the unresolvable import, or blacklists the type it belongs to.
	UnresolvedImport(MessagePattern),
	/// Deletes the redundant property or method definition.
	DuplicateDefinition(MessagePattern),
	/// Deletes the method overriding a base signature.
	BaseSignatureClash(MessagePattern),
	/// Deletes the method referencing an unknown symbol.
	UnknownSymbol(MessagePattern),
}

/// Entity a handler intends to repair.
#[derive(Debug, Clone)]
enum Plan {
	Delete { kinds: &'static [EntityKind], key: EntityKey },
	Blacklist(Arc<str>),
}

const MEMBERS: &[EntityKind] = &[EntityKind::Property, EntityKind::Method];
const METHOD: &[EntityKind] = &[EntityKind::Method];
const IMPORT: &[EntityKind] = &[EntityKind::Import];

fn delete_by_id(entity: &EntityRef, kinds: &'static [EntityKind]) -> Plan {
	Plan::Delete {
		kinds,
		key: EntityKey::Id(entity.id.clone()),
	}
}

fn delete_by_name(token: &DiagnosticToken, name: Arc<str>, kinds: &'static [EntityKind]) -> Plan {
	Plan::Delete {
		kinds,
		key: EntityKey::Name {
			owner: Some(token.unit.clone()),
			name,
		},
	}
}

impl MigrationHandler {
	pub fn label(&self) -> &'static str {
		match self {
			Self::LegacySignature(_) => "legacy-signature",
			Self::UnresolvedImport(_) => "unresolved-import",
			Self::DuplicateDefinition(_) => "duplicate-definition",
			Self::BaseSignatureClash(_) => "base-signature-clash",
			Self::UnknownSymbol(_) => "unknown-symbol",
		}
	}

	pub fn recognizes(&self, token: &DiagnosticToken) -> bool {
		self.plan(token).is_some()
	}

	fn plan(&self, token: &DiagnosticToken) -> Option<Plan> {
		let entity = token.entity.as_ref();
		match self {
			Self::LegacySignature(legacy) => {
				if let Some(entity) = entity.filter(|e| e.kind == EntityKind::Method) {
					return legacy.matches(&entity.owner, &entity.name).then(|| delete_by_id(entity, METHOD));
				}
				let name = legacy.find_in(&token.unit, &token.message)?;
				Some(delete_by_name(token, Arc::from(name), METHOD))
			}
			Self::UnresolvedImport(pattern) => {
				let recognition = pattern.recognize(token)?;
				match entity {
					Some(entity) if entity.kind == EntityKind::Import => Some(delete_by_id(entity, IMPORT)),
					Some(entity) if entity.kind == EntityKind::Type => Some(Plan::Blacklist(entity.owner.clone())),
					_ => Some(delete_by_name(token, recognition.symbol?, IMPORT)),
				}
			}
			Self::DuplicateDefinition(pattern) => {
				let recognition = pattern.recognize(token)?;
				match entity {
					Some(entity) if MEMBERS.contains(&entity.kind) => Some(delete_by_id(entity, MEMBERS)),
					_ => Some(delete_by_name(token, recognition.symbol?, MEMBERS)),
				}
			}
			Self::BaseSignatureClash(pattern) => {
				let recognition = pattern.recognize(token)?;
				match entity {
					Some(entity) if entity.kind == EntityKind::Method => Some(delete_by_id(entity, METHOD)),
					_ => Some(delete_by_name(token, recognition.symbol?, METHOD)),
				}
			}
			Self::UnknownSymbol(pattern) => {
				pattern.recognize(token)?;
				entity
					.filter(|entity| entity.kind == EntityKind::Method)
					.map(|entity| delete_by_id(entity, METHOD))
			}
		}
	}

	/// Repairs the schema for `token`.
	///
	/// Returns [`HandledResult::Unhandled`] when the token is not recognized,
	/// the entity is already gone, or the transaction fails.
	pub fn apply(&self, token: &DiagnosticToken, ctx: &HealContext<'_>) -> HandledResult {
		let Some(plan) = self.plan(token) else {
			return HandledResult::Unhandled;
		};
		let handler = self.label();

		match plan {
			Plan::Blacklist(name) => {
				if !ctx.schema.blacklist(&name) {
					debug!(handler, r#type = %name, "heal.already_blacklisted");
					return HandledResult::Unhandled;
				}
				HandledResult::Handled(Repair {
					handler,
					action: RepairAction::Blacklisted,
					kind: EntityKind::Type,
					target: name.clone(),
					name,
					unit: token.unit.clone(),
					line: token.line,
				})
			}
			Plan::Delete { kinds, key } => match delete_in_transaction(ctx, kinds, &key) {
				Ok(Some(entity)) => HandledResult::Handled(Repair {
					handler,
					action: RepairAction::Deleted,
					kind: entity.kind,
					target: entity.id,
					name: entity.name,
					unit: token.unit.clone(),
					line: token.line,
				}),
				Ok(None) => {
					debug!(handler, unit = %token.unit, line = token.line, ?key, "heal.entity_gone");
					HandledResult::Unhandled
				}
				Err(error) => {
					warn!(handler, unit = %token.unit, line = token.line, %error, "heal.transaction_failed");
					HandledResult::Unhandled
				}
			},
		}
	}
}

/// Finds the first entity of `kinds` under `key` and deletes it in one transaction.
///
/// Nothing is committed when no entity matches.
fn delete_in_transaction(ctx: &HealContext<'_>, kinds: &[EntityKind], key: &EntityKey) -> Result<Option<SchemaEntity>, RepositoryError> {
	let mut tx = ctx.repository.begin()?;
	for &kind in kinds {
		if let Some(entity) = tx.find(kind, key)? {
			tx.delete(&entity)?;
			tx.commit()?;
			return Ok(Some(entity));
		}
	}
	Ok(None)
}
