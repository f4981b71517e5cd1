//! Boundary to the external compiler.

mod process;

use std::sync::Arc;

use async_trait::async_trait;

pub use process::{ProcessToolchain, parse_diagnostic_line};

use crate::compiled::CompiledUnit;
use crate::diagnostic::{RawDiagnostic, Severity};
use crate::error::Result;
use crate::source::SourceUnit;

/// Everything one toolchain invocation reported.
#[derive(Debug, Clone, Default)]
pub struct ToolchainOutput {
	/// All diagnostics, in emission order.
	pub diagnostics: Vec<RawDiagnostic>,
	/// Compiled units; empty whenever an error diagnostic is present.
	pub units: Vec<CompiledUnit>,
}

impl ToolchainOutput {
	pub fn has_errors(&self) -> bool {
		self.diagnostics.iter().any(|diag| diag.severity == Severity::Error)
	}
}

/// Compiles a batch of source units against previously compiled siblings.
///
/// Implementations report compile failures as error diagnostics. An `Err`
/// means the toolchain itself could not run.
#[async_trait]
pub trait Toolchain: Send + Sync {
	/// Label used in logs.
	fn name(&self) -> &str;

	async fn compile(&self, batch: &[SourceUnit], siblings: &[Arc<CompiledUnit>]) -> Result<ToolchainOutput>;
}
