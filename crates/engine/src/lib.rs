//! Dynamic schema compilation with self-healing migrations and hot type reload.
//!
//! User-defined types arrive as generated [`SourceUnit`]s from a
//! [`SchemaService`]. The [`Engine`] stages the units whose content changed,
//! compiles them as one batch through a [`Toolchain`], and publishes the
//! resulting types into a [`TypeRegistry`] generation in a single swap.
//!
//! When a compile fails, each error is correlated back to the schema entity
//! that generated the offending lines. The [`MigrationPipeline`] repairs the
//! schema through a [`SchemaRepository`] transaction, and the loop compiles
//! again until it succeeds, runs out of repairs, or hits the cycle bound.
//!
//! ```text
//! SchemaService -> SourceUnitStore -> Orchestrator -> Toolchain
//!                                          |
//!                          CompiledUnitStore + UnitLoader -> TypeRegistry
//!                                          |
//!                        correlate -> MigrationPipeline -> SchemaRepository
//! ```

mod broadcast;
mod compiled;
mod config;
mod diagnostic;
mod error;
mod heal;
mod migrate;
mod orchestrator;
mod schema;
mod source;
mod toolchain;

pub use broadcast::{Broadcaster, EngineEvent, ListenerHub, NullBroadcaster, SessionId};
pub use compiled::{
	CompiledUnit, CompiledUnitStore, HostResolver, LoadedType, TypeOrigin, UnitLoader, install_process_loader, resolve_type,
	uninstall_process_loader,
};
pub use config::{ConfigError, EngineConfig, ToolchainConfig};
pub use diagnostic::{DiagnosticClass, DiagnosticToken, RawDiagnostic, Severity, correlate};
pub use error::{EngineError, Result};
pub use heal::{Engine, EngineParts, HealReport, HealState, RunOutcome};
pub use kiln_registry::{InstallReport, RegistryEntry, RegistryRef, TypeRegistry};
pub use migrate::{
	HandledResult, HealContext, LegacySignatures, MessagePattern, MigrationHandler, MigrationPipeline, Recognition, Repair, RepairAction,
};
pub use orchestrator::{CompileContext, CompileOutcome, CompileRequest, Orchestrator};
pub use schema::{
	EntityKey, MemberModel, MemorySchema, RepositoryError, SchemaEntity, SchemaManifest, SchemaRepository, SchemaService, SchemaTransaction,
	SourceBatch, TypeModel,
};
pub use source::{EntityKind, EntityRef, SourceError, SourceSpan, SourceUnit, SourceUnitStore, StageOutcome, content_hash, locate_span};
pub use toolchain::{ProcessToolchain, Toolchain, ToolchainOutput, parse_diagnostic_line};
pub use tokio_util::sync::CancellationToken;
