//! In-memory schema model acting as both schema service and repository.
//!
//! Each type is a header block followed by ordered member blocks. Source
//! generation concatenates the blocks and emits one span per block, so every
//! generated line points back at the entity that produced it.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::{Mutex, MutexGuard};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{EntityKey, RepositoryError, SchemaEntity, SchemaRepository, SchemaService, SchemaTransaction, SourceBatch};
use crate::config::ConfigError;
use crate::error::Result;
use crate::source::{EntityKind, EntityRef, SourceError, SourceSpan, SourceUnit};

/// One member definition of a type.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MemberModel {
	pub kind: EntityKind,
	pub id: Arc<str>,
	pub name: Arc<str>,
	/// Source block generated for this member.
	pub source: String,
}

/// One user-defined type.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TypeModel {
	/// Qualified name.
	pub name: Arc<str>,
	/// Source block opening the type.
	pub header: String,
	#[serde(default)]
	pub members: Vec<MemberModel>,
}

impl TypeModel {
	/// Generates the source unit for this type.
	pub fn generate(&self) -> std::result::Result<SourceUnit, SourceError> {
		let mut text = String::new();
		let mut spans = Vec::with_capacity(self.members.len() + 1);

		let header = EntityRef::new(EntityKind::Type, self.name.clone(), short_name(&self.name), self.name.clone());
		push_block(&mut text, &mut spans, &self.header, header);
		for member in &self.members {
			let entity = EntityRef::new(member.kind, member.id.clone(), member.name.clone(), self.name.clone());
			push_block(&mut text, &mut spans, &member.source, entity);
		}

		SourceUnit::new(self.name.clone(), text, spans)
	}

	fn entity(&self) -> SchemaEntity {
		SchemaEntity {
			kind: EntityKind::Type,
			id: self.name.clone(),
			name: Arc::from(short_name(&self.name)),
			owner: None,
			fields: BTreeMap::from([("header".to_string(), self.header.clone())]),
		}
	}
}

impl MemberModel {
	fn entity(&self, owner: &Arc<str>) -> SchemaEntity {
		SchemaEntity {
			kind: self.kind,
			id: self.id.clone(),
			name: self.name.clone(),
			owner: Some(owner.clone()),
			fields: BTreeMap::from([("source".to_string(), self.source.clone())]),
		}
	}
}

/// On-disk form of a schema: a list of types.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaManifest {
	#[serde(default)]
	pub types: Vec<TypeModel>,
}

impl SchemaManifest {
	pub fn parse(input: &str) -> std::result::Result<Self, ConfigError> {
		Ok(toml::from_str(input)?)
	}
}

fn short_name(qualified: &str) -> &str {
	qualified.rsplit('.').next().unwrap_or(qualified)
}

fn push_block(text: &mut String, spans: &mut Vec<SourceSpan>, block: &str, entity: EntityRef) {
	let mut lines = 0u32;
	for line in block.lines() {
		text.push_str(line);
		text.push('\n');
		lines += 1;
	}
	if lines > 0 {
		spans.push(SourceSpan::new(lines, entity));
	}
}

#[derive(Debug, Default)]
struct SchemaState {
	types: IndexMap<Arc<str>, TypeModel>,
	blacklist: FxHashSet<Arc<str>>,
	removed: Vec<Arc<str>>,
	notifications: u64,
	revision: u64,
	failing_transactions: usize,
	failing_commits: usize,
}

/// Schema model kept in process memory.
#[derive(Debug, Default)]
pub struct MemorySchema {
	state: Mutex<SchemaState>,
}

impl MemorySchema {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn from_manifest(manifest: SchemaManifest) -> Self {
		let schema = Self::new();
		for model in manifest.types {
			schema.upsert_type(model);
		}
		schema
	}

	/// Adds or replaces a type definition.
	pub fn upsert_type(&self, model: TypeModel) {
		let mut state = self.state.lock();
		state.revision += 1;
		state.types.insert(model.name.clone(), model);
	}

	/// Deletes a type; it is reported as removed on the next request.
	pub fn remove_type(&self, name: &str) -> bool {
		let mut state = self.state.lock();
		match state.types.shift_remove(name) {
			Some(model) => {
				state.removed.push(model.name);
				state.revision += 1;
				true
			}
			None => false,
		}
	}

	pub fn type_model(&self, name: &str) -> Option<TypeModel> {
		self.state.lock().types.get(name).cloned()
	}

	pub fn is_blacklisted(&self, name: &str) -> bool {
		self.state.lock().blacklist.contains(name)
	}

	/// Lifts a blacklist entry after the type was corrected by hand.
	pub fn clear_blacklist(&self, name: &str) -> bool {
		let mut state = self.state.lock();
		let cleared = state.blacklist.remove(name);
		if cleared {
			state.revision += 1;
		}
		cleared
	}

	/// Number of `notify_schema_changed` calls received.
	pub fn change_notifications(&self) -> u64 {
		self.state.lock().notifications
	}

	/// Monotonic counter bumped by every committed edit.
	pub fn revision(&self) -> u64 {
		self.state.lock().revision
	}

	/// Makes the next `count` transactions fail to begin.
	pub fn fail_next_transactions(&self, count: usize) {
		self.state.lock().failing_transactions = count;
	}

	/// Makes the next `count` commits abort, discarding their edits.
	pub fn fail_next_commits(&self, count: usize) {
		self.state.lock().failing_commits = count;
	}
}

#[async_trait]
impl SchemaService for MemorySchema {
	async fn request_dirty_source_units(&self) -> Result<SourceBatch> {
		let mut state = self.state.lock();
		let mut units = Vec::with_capacity(state.types.len());
		for model in state.types.values() {
			if state.blacklist.contains(&model.name) {
				continue;
			}
			units.push(model.generate()?);
		}
		let removed = std::mem::take(&mut state.removed);
		Ok(SourceBatch { units, removed })
	}

	fn notify_schema_changed(&self) {
		let mut state = self.state.lock();
		state.notifications += 1;
		debug!(notifications = state.notifications, "schema.changed");
	}

	fn blacklist(&self, qualified_name: &str) -> bool {
		let mut state = self.state.lock();
		let name: Arc<str> = Arc::from(qualified_name);
		if !state.blacklist.insert(name.clone()) {
			return false;
		}
		warn!(r#type = qualified_name, "schema.blacklist");
		if state.types.contains_key(qualified_name) {
			state.removed.push(name);
		}
		state.revision += 1;
		true
	}
}

impl SchemaRepository for MemorySchema {
	fn begin(&self) -> std::result::Result<Box<dyn SchemaTransaction + '_>, RepositoryError> {
		let mut guard = self.state.lock();
		if guard.failing_transactions > 0 {
			guard.failing_transactions -= 1;
			return Err(RepositoryError::Unavailable("injected failure".to_string()));
		}
		let working = guard.types.clone();
		Ok(Box::new(MemoryTransaction {
			guard,
			working,
			removed: Vec::new(),
		}))
	}
}

/// Holds the schema lock for its whole lifetime; edits land on a working copy.
struct MemoryTransaction<'a> {
	guard: MutexGuard<'a, SchemaState>,
	working: IndexMap<Arc<str>, TypeModel>,
	removed: Vec<Arc<str>>,
}

impl MemoryTransaction<'_> {
	fn owner_scope<'k>(&self, key: &'k EntityKey) -> Option<&'k str> {
		match key {
			EntityKey::Name { owner: Some(owner), .. } => Some(owner),
			_ => None,
		}
	}

	fn vanished(entity: &SchemaEntity) -> RepositoryError {
		RepositoryError::Vanished {
			kind: entity.kind,
			id: entity.id.to_string(),
		}
	}

	fn member_mut(&mut self, entity: &SchemaEntity) -> std::result::Result<&mut MemberModel, RepositoryError> {
		let owner = entity.owner.as_deref().ok_or_else(|| Self::vanished(entity))?;
		self.working
			.get_mut(owner)
			.and_then(|model| model.members.iter_mut().find(|m| m.kind == entity.kind && m.id == entity.id))
			.ok_or_else(|| Self::vanished(entity))
	}
}

impl SchemaTransaction for MemoryTransaction<'_> {
	fn find(&mut self, kind: EntityKind, key: &EntityKey) -> std::result::Result<Option<SchemaEntity>, RepositoryError> {
		if kind == EntityKind::Type {
			let found = match key {
				EntityKey::Id(id) => self.working.get(id),
				EntityKey::Name { name, .. } => self
					.working
					.values()
					.find(|model| model.name == *name || short_name(&model.name) == &**name),
			};
			return Ok(found.map(TypeModel::entity));
		}

		let scope = self.owner_scope(key);
		let found = self
			.working
			.values()
			.filter(|model| scope.is_none_or(|owner| *model.name == *owner))
			.find_map(|model| {
				model
					.members
					.iter()
					.find(|member| {
						member.kind == kind
							&& match key {
								EntityKey::Id(id) => member.id == *id,
								EntityKey::Name { name, .. } => member.name == *name,
							}
					})
					.map(|member| member.entity(&model.name))
			});
		Ok(found)
	}

	fn delete(&mut self, entity: &SchemaEntity) -> std::result::Result<(), RepositoryError> {
		if entity.kind == EntityKind::Type {
			let model = self.working.shift_remove(&entity.id).ok_or_else(|| Self::vanished(entity))?;
			self.removed.push(model.name);
			return Ok(());
		}

		let owner = entity.owner.as_deref().ok_or_else(|| Self::vanished(entity))?;
		let model = self.working.get_mut(owner).ok_or_else(|| Self::vanished(entity))?;
		let before = model.members.len();
		model.members.retain(|member| !(member.kind == entity.kind && member.id == entity.id));
		if model.members.len() == before {
			return Err(Self::vanished(entity));
		}
		Ok(())
	}

	fn update(&mut self, entity: &SchemaEntity, fields: &[(&str, &str)]) -> std::result::Result<(), RepositoryError> {
		let unknown = |field: &str| RepositoryError::UnknownField {
			kind: entity.kind,
			id: entity.id.to_string(),
			field: field.to_string(),
		};

		if entity.kind == EntityKind::Type {
			let model = self.working.get_mut(&entity.id).ok_or_else(|| Self::vanished(entity))?;
			for (field, value) in fields {
				match *field {
					"header" => model.header = value.to_string(),
					other => return Err(unknown(other)),
				}
			}
			return Ok(());
		}

		let member = self.member_mut(entity)?;
		for (field, value) in fields {
			match *field {
				"name" => member.name = Arc::from(*value),
				"source" => member.source = value.to_string(),
				other => return Err(unknown(other)),
			}
		}
		Ok(())
	}

	fn commit(self: Box<Self>) -> std::result::Result<(), RepositoryError> {
		let MemoryTransaction {
			mut guard,
			working,
			removed,
		} = *self;
		if guard.failing_commits > 0 {
			guard.failing_commits -= 1;
			return Err(RepositoryError::Aborted("injected commit failure".to_string()));
		}
		guard.types = working;
		guard.removed.extend(removed);
		guard.revision += 1;
		Ok(())
	}
}
