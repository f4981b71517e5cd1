//! Interfaces to the schema service and schema repository.
//!
//! The engine never generates source itself. It asks the [`SchemaService`]
//! for source units and, when healing, edits schema entities through a
//! [`SchemaRepository`] transaction.

mod memory;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::{MemberModel, MemorySchema, SchemaManifest, TypeModel};

use crate::error::Result;
use crate::source::{EntityKind, SourceUnit};

/// Units the schema service regenerated, plus types deleted since the last request.
#[derive(Debug, Clone, Default)]
pub struct SourceBatch {
	pub units: Vec<SourceUnit>,
	pub removed: Vec<Arc<str>>,
}

/// Producer of generated source for user-defined types.
#[async_trait]
pub trait SchemaService: Send + Sync {
	/// Returns source for every type that may have changed.
	async fn request_dirty_source_units(&self) -> Result<SourceBatch>;

	/// Signals that the schema was patched and affected source must be regenerated.
	fn notify_schema_changed(&self);

	/// Excludes a type from generation until it is manually corrected.
	///
	/// Returns false if the type was already excluded.
	fn blacklist(&self, qualified_name: &str) -> bool;
}

/// How a handler locates an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityKey {
	Id(Arc<str>),
	Name { owner: Option<Arc<str>>, name: Arc<str> },
}

/// A schema entity as stored in the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaEntity {
	pub kind: EntityKind,
	pub id: Arc<str>,
	pub name: Arc<str>,
	/// Owning type for members; `None` for types.
	pub owner: Option<Arc<str>>,
	#[serde(default)]
	pub fields: BTreeMap<String, String>,
}

/// Failures inside a repository transaction.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepositoryError {
	#[error("schema repository unavailable: {0}")]
	Unavailable(String),

	#[error("{kind} `{id}` vanished during the transaction")]
	Vanished { kind: EntityKind, id: String },

	#[error("{kind} `{id}` has no field `{field}`")]
	UnknownField { kind: EntityKind, id: String, field: String },

	#[error("transaction aborted: {0}")]
	Aborted(String),
}

/// One unit of work against the schema repository.
///
/// Dropping a transaction without calling [`SchemaTransaction::commit`] rolls it back.
pub trait SchemaTransaction {
	fn find(&mut self, kind: EntityKind, key: &EntityKey) -> std::result::Result<Option<SchemaEntity>, RepositoryError>;

	fn delete(&mut self, entity: &SchemaEntity) -> std::result::Result<(), RepositoryError>;

	fn update(&mut self, entity: &SchemaEntity, fields: &[(&str, &str)]) -> std::result::Result<(), RepositoryError>;

	fn commit(self: Box<Self>) -> std::result::Result<(), RepositoryError>;
}

/// Transactional access to schema entities.
pub trait SchemaRepository: Send + Sync {
	fn begin(&self) -> std::result::Result<Box<dyn SchemaTransaction + '_>, RepositoryError>;
}
