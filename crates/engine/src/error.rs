//! Error types for the compilation engine.
//!
//! Ordinary compile failures are not errors: they come back as a
//! [`crate::CompileOutcome`] carrying diagnostics. The variants here cover
//! conditions the engine cannot recover from on its own.

use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;
use crate::schema::RepositoryError;
use crate::source::SourceError;

/// Errors that propagate out of the engine.
#[derive(Debug, Error)]
pub enum EngineError {
	/// The external toolchain could not be started.
	#[error("toolchain `{program}` unavailable: {reason}")]
	ToolchainUnavailable {
		/// Program or toolchain label.
		program: String,
		/// Underlying reason.
		reason: String,
	},

	/// The toolchain did not return within its wall-clock budget.
	#[error("toolchain exceeded its {0:?} budget")]
	ToolchainTimeout(Duration),

	/// The schema service failed to produce source units.
	#[error("schema service error: {0}")]
	SchemaService(String),

	/// The schema repository could not be reached.
	#[error(transparent)]
	Repository(#[from] RepositoryError),

	/// A registered type has no backing compiled unit.
	///
	/// This means an install step was not atomic and is a programmer error.
	#[error("type `{name}` is registered but missing from the compiled-unit store")]
	LoaderInconsistency {
		/// Qualified type name.
		name: String,
	},

	/// No dynamic or host type resolves under this name.
	#[error("type `{0}` not found")]
	TypeNotFound(String),

	/// The registry rejected an install batch.
	#[error(transparent)]
	Registry(#[from] kiln_registry::RegistryError),

	/// A generated source unit violates the span partition rules.
	#[error(transparent)]
	Source(#[from] SourceError),

	/// A migration handler pattern failed to compile.
	#[error("invalid handler pattern: {0}")]
	Pattern(#[from] regex::Error),

	/// Invalid engine configuration.
	#[error(transparent)]
	Config(#[from] ConfigError),

	/// I/O failure while preparing a toolchain workspace.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// The run was cancelled before the registry install.
	#[error("compile cycle cancelled")]
	Cancelled,
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
