//! Self-healing schema repairs driven by compiler diagnostics.
//!
//! # Ordering
//!
//! One healing pass is deterministic:
//!
//! 1. Diagnostics are visited in `(unit, line)` order.
//! 2. For each diagnostic, handlers are tried in pipeline order until one
//!    reports [`HandledResult::Handled`]. The standard order is legacy
//!    signature, unresolved import, duplicate definition, base signature
//!    clash, unknown symbol.
//!
//! A repair earlier in the pass may delete the entity a later diagnostic
//! points at. The later handler then finds nothing and reports
//! [`HandledResult::Unhandled`], which is how a second pass over the same
//! diagnostics reaches a fixed point.

mod handler;
mod legacy;

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

pub use handler::{MessagePattern, MigrationHandler, Recognition};
pub use legacy::LegacySignatures;

use crate::diagnostic::{DiagnosticClass, DiagnosticToken};
use crate::schema::{SchemaRepository, SchemaService};
use crate::source::EntityKind;

/// Collaborators a handler may touch while repairing.
#[derive(Clone, Copy)]
pub struct HealContext<'a> {
	pub repository: &'a dyn SchemaRepository,
	pub schema: &'a dyn SchemaService,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RepairAction {
	Deleted,
	Blacklisted,
}

/// One applied schema repair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Repair {
	pub handler: &'static str,
	pub action: RepairAction,
	pub kind: EntityKind,
	/// Entity id, or the qualified type name for a blacklist.
	pub target: Arc<str>,
	pub name: Arc<str>,
	/// Position of the diagnostic that triggered the repair.
	pub unit: Arc<str>,
	pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandledResult {
	Handled(Repair),
	Unhandled,
}

const UNRESOLVED_IMPORT: &str = r"(?i)(?:package|import|module)\s+`?(?P<name>[\w.]+)`?\s+(?:does not exist|not found|cannot be resolved)";
const DUPLICATE_DEFINITION: &str = r"(?i)(?:duplicate (?:definition|declaration) of|already defined:?)\s+`?(?P<name>\w+)`?";
const BASE_SIGNATURE_CLASH: &str = r"(?i)`?(?P<name>\w+)(?:\([^)]*\))?`?\s+clashes with (?:a |the )?base (?:definition|method|signature)";
const UNKNOWN_SYMBOL: &str = r"(?i)(?:cannot find symbol|unknown symbol|undefined symbol):?\s+`?(?P<name>[\w.]+)`?";

/// Ordered list of migration handlers.
#[derive(Debug, Clone)]
pub struct MigrationPipeline {
	handlers: Vec<MigrationHandler>,
}

impl MigrationPipeline {
	pub fn new(handlers: Vec<MigrationHandler>) -> Self {
		Self { handlers }
	}

	/// The built-in handler set in its documented order.
	pub fn standard(legacy: LegacySignatures) -> Result<Self, regex::Error> {
		Ok(Self::new(vec![
			MigrationHandler::LegacySignature(legacy),
			MigrationHandler::UnresolvedImport(MessagePattern::new(DiagnosticClass::UnresolvedImport, UNRESOLVED_IMPORT)?),
			MigrationHandler::DuplicateDefinition(MessagePattern::new(DiagnosticClass::DuplicateDefinition, DUPLICATE_DEFINITION)?),
			MigrationHandler::BaseSignatureClash(MessagePattern::new(DiagnosticClass::SignatureClash, BASE_SIGNATURE_CLASH)?),
			MigrationHandler::UnknownSymbol(MessagePattern::new(DiagnosticClass::UnknownSymbol, UNKNOWN_SYMBOL)?),
		]))
	}

	pub fn handlers(&self) -> &[MigrationHandler] {
		&self.handlers
	}

	/// Runs one healing pass, returning the repairs in application order.
	pub fn heal(&self, tokens: &[DiagnosticToken], ctx: &HealContext<'_>) -> Vec<Repair> {
		let mut ordered: Vec<&DiagnosticToken> = tokens.iter().collect();
		ordered.sort_by(|a, b| a.position().cmp(&b.position()));

		let mut repairs = Vec::new();
		for token in ordered {
			match self.heal_one(token, ctx) {
				Some(repair) => {
					warn!(
						handler = repair.handler,
						action = ?repair.action,
						kind = %repair.kind,
						target = %repair.target,
						unit = %token.unit,
						line = token.line,
						"heal.repaired"
					);
					repairs.push(repair);
				}
				None => debug!(unit = %token.unit, line = token.line, message = %token.message, "heal.unhandled"),
			}
		}
		repairs
	}

	fn heal_one(&self, token: &DiagnosticToken, ctx: &HealContext<'_>) -> Option<Repair> {
		self.handlers
			.iter()
			.filter(|handler| handler.recognizes(token))
			.find_map(|handler| match handler.apply(token, ctx) {
				HandledResult::Handled(repair) => Some(repair),
				HandledResult::Unhandled => None,
			})
	}
}
