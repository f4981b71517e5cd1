//! One compile pass: toolchain invocation, correlation and atomic install.
//!
//! # Install sequence
//!
//! On a clean compile the orchestrator:
//!
//! 1. defines every produced unit in the [`CompiledUnitStore`],
//! 2. resolves each requested name through the [`UnitLoader`],
//! 3. publishes one registry generation replacing exactly those names and
//!    retiring removed ones,
//! 4. drops retired units from the store and records compiled hashes,
//! 5. broadcasts `schema_compiled` to every session but the originator.
//!
//! A failed compile touches none of the above. It forgets the stored hashes
//! of the batch so the same units are retried in full next time, and stages
//! the batch's removals again so a later pass still retires them.

use std::sync::Arc;
use std::time::Duration;

use kiln_registry::TypeRegistry;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broadcast::{Broadcaster, EngineEvent, SessionId};
use crate::compiled::{CompiledUnitStore, LoadedType, TypeOrigin, UnitLoader};
use crate::diagnostic::{DiagnosticToken, Severity, correlate};
use crate::error::{EngineError, Result};
use crate::source::{SourceUnit, SourceUnitStore};
use crate::toolchain::{Toolchain, ToolchainOutput};

/// Dirty units to compile plus type names deleted from the schema.
#[derive(Debug, Clone, Default)]
pub struct CompileRequest {
	pub units: Vec<SourceUnit>,
	pub removed: Vec<Arc<str>>,
}

impl CompileRequest {
	pub fn is_empty(&self) -> bool {
		self.units.is_empty() && self.removed.is_empty()
	}
}

/// Caller identity and cancellation for one compile.
#[derive(Debug, Clone, Default)]
pub struct CompileContext {
	/// Session that triggered the change; excluded from the broadcast.
	pub origin: Option<SessionId>,
	pub cancel: CancellationToken,
}

impl CompileContext {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn from_session(origin: SessionId) -> Self {
		Self {
			origin: Some(origin),
			cancel: CancellationToken::new(),
		}
	}

	pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
		self.cancel = cancel;
		self
	}
}

/// Result of one compile pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileOutcome {
	pub success: bool,
	/// Error-severity diagnostics, correlated to their entities.
	pub diagnostics: Vec<DiagnosticToken>,
	/// Names installed into the registry by this pass.
	pub loaded_types: Vec<Arc<str>>,
	/// Names retired from the registry by this pass.
	pub retired_types: Vec<Arc<str>>,
	/// Registry generation after the pass.
	pub generation: u64,
}

impl CompileOutcome {
	/// Successful pass that changed nothing.
	pub fn noop(generation: u64) -> Self {
		Self {
			success: true,
			generation,
			..Self::default()
		}
	}
}

/// Shared handles the orchestrator operates on.
pub struct Orchestrator {
	toolchain: Arc<dyn Toolchain>,
	sources: Arc<Mutex<SourceUnitStore>>,
	loader: UnitLoader,
	registry: Arc<TypeRegistry<LoadedType>>,
	broadcaster: Arc<dyn Broadcaster>,
	namespace: String,
	timeout: Duration,
}

impl Orchestrator {
	pub fn new(
		toolchain: Arc<dyn Toolchain>,
		sources: Arc<Mutex<SourceUnitStore>>,
		loader: UnitLoader,
		registry: Arc<TypeRegistry<LoadedType>>,
		broadcaster: Arc<dyn Broadcaster>,
		namespace: impl Into<String>,
		timeout: Duration,
	) -> Self {
		Self {
			toolchain,
			sources,
			loader,
			registry,
			broadcaster,
			namespace: namespace.into(),
			timeout,
		}
	}

	fn compiled(&self) -> &Arc<CompiledUnitStore> {
		self.loader.store()
	}

	/// Compiles `request` and installs the result.
	///
	/// Compile errors come back as an unsuccessful outcome. `Err` is reserved
	/// for toolchain failures, timeouts, cancellation and loader inconsistency.
	pub async fn compile(&self, request: CompileRequest, ctx: &CompileContext) -> Result<CompileOutcome> {
		if request.is_empty() {
			return Ok(CompileOutcome::noop(self.registry.generation()));
		}
		let CompileRequest { units, removed } = request;

		let output = if units.is_empty() {
			ToolchainOutput::default()
		} else {
			self.invoke(&units, ctx).await?
		};

		let mut errors = Vec::new();
		for raw in output.diagnostics.iter().cloned() {
			if raw.severity < Severity::Error {
				warn!(unit = %raw.unit, line = raw.line, severity = %raw.severity, message = %raw.message, "compile.diagnostic");
				continue;
			}
			let unit = units.iter().find(|unit| **unit.name() == *raw.unit);
			errors.push(correlate(raw, unit));
		}

		if !errors.is_empty() {
			{
				// The schema service hands out removals only once.
				let mut sources = self.sources.lock();
				sources.invalidate(units.iter().map(|unit| &**unit.name()));
				for name in removed {
					sources.stage_removal(name);
				}
			}
			info!(units = units.len(), errors = errors.len(), toolchain = self.toolchain.name(), "compile.failed");
			return Ok(CompileOutcome {
				success: false,
				diagnostics: errors,
				generation: self.registry.generation(),
				..CompileOutcome::default()
			});
		}

		if ctx.cancel.is_cancelled() {
			debug!(units = units.len(), "compile.cancelled_before_install");
			return Err(EngineError::Cancelled);
		}

		self.install(units, removed, output, ctx)
	}

	async fn invoke(&self, units: &[SourceUnit], ctx: &CompileContext) -> Result<ToolchainOutput> {
		let siblings = self.compiled().list_under(&self.namespace);
		debug!(units = units.len(), siblings = siblings.len(), toolchain = self.toolchain.name(), "compile.invoke");

		tokio::select! {
			biased;
			_ = ctx.cancel.cancelled() => Err(EngineError::Cancelled),
			result = tokio::time::timeout(self.timeout, self.toolchain.compile(units, &siblings)) => {
				result.map_err(|_| EngineError::ToolchainTimeout(self.timeout))?
			}
		}
	}

	fn install(&self, units: Vec<SourceUnit>, removed: Vec<Arc<str>>, output: ToolchainOutput, ctx: &CompileContext) -> Result<CompileOutcome> {
		let produced: FxHashSet<&str> = output.units.iter().map(|unit| &**unit.name()).collect();
		if let Some(missing) = units.iter().find(|unit| !produced.contains(&**unit.name())) {
			error!(unit = %missing.name(), "compile.unit_not_produced");
			return Err(EngineError::LoaderInconsistency {
				name: missing.name().to_string(),
			});
		}

		let compiled = self.compiled();
		for unit in output.units {
			compiled.put(unit);
		}

		let mut loaded = Vec::with_capacity(units.len());
		for unit in &units {
			match self.loader.load(unit.name()) {
				Some(ty) if ty.origin() == TypeOrigin::Dynamic => loaded.push(ty),
				_ => {
					error!(unit = %unit.name(), "compile.load_failed");
					return Err(EngineError::LoaderInconsistency {
						name: unit.name().to_string(),
					});
				}
			}
		}

		let incoming: FxHashSet<&str> = units.iter().map(|unit| &**unit.name()).collect();
		let retire: Vec<Arc<str>> = removed.iter().filter(|name| !incoming.contains(&***name)).cloned().collect();

		let report = self.registry.install(loaded, &retire)?;
		for name in &retire {
			compiled.remove(name);
		}

		{
			let mut sources = self.sources.lock();
			sources.mark_compiled(&units);
			for name in &retire {
				sources.remove(name);
			}
		}

		let loaded_types: Vec<Arc<str>> = units.iter().map(|unit| unit.name().clone()).collect();
		info!(
			generation = report.generation,
			loaded = loaded_types.len(),
			retired = report.retired.len(),
			"compile.installed"
		);

		let mut types = loaded_types.clone();
		types.extend(report.retired.iter().cloned());
		self.broadcaster.publish(
			&EngineEvent::SchemaCompiled {
				success: true,
				generation: report.generation,
				types,
			},
			ctx.origin.as_ref(),
		);

		Ok(CompileOutcome {
			success: true,
			diagnostics: Vec::new(),
			loaded_types,
			retired_types: report.retired,
			generation: report.generation,
		})
	}
}
