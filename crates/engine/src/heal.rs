//! The compile-and-heal loop and the engine facade around it.
//!
//! One run moves through these states:
//!
//! ```text
//! Idle -> Compiling -> Succeeded
//!                   -> Healing -> Regenerating -> Compiling
//!                              -> Unrecoverable
//! ```
//!
//! Runs are serialized. A run reaching `max_heal_cycles` compiles without
//! success ends `Unrecoverable` with `exhausted` set.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use kiln_registry::TypeRegistry;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::broadcast::{Broadcaster, NullBroadcaster};
use crate::compiled::{CompiledUnitStore, HostResolver, LoadedType, TypeOrigin, UnitLoader, install_process_loader};
use crate::config::EngineConfig;
use crate::diagnostic::DiagnosticToken;
use crate::error::{EngineError, Result};
use crate::migrate::{HealContext, LegacySignatures, MigrationPipeline, Repair};
use crate::orchestrator::{CompileContext, CompileRequest, Orchestrator};
use crate::schema::{SchemaRepository, SchemaService, SourceBatch};
use crate::source::SourceUnitStore;
use crate::toolchain::Toolchain;

/// Where the current or last run stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum HealState {
	Idle,
	Compiling,
	Healing,
	Regenerating,
	Succeeded,
	Unrecoverable,
}

impl HealState {
	fn from_u8(value: u8) -> Self {
		match value {
			1 => Self::Compiling,
			2 => Self::Healing,
			3 => Self::Regenerating,
			4 => Self::Succeeded,
			5 => Self::Unrecoverable,
			_ => Self::Idle,
		}
	}
}

/// Final result of one compile-and-heal run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealReport {
	pub success: bool,
	/// Compile passes performed.
	pub cycles: usize,
	/// Registry generation at the end of the run.
	pub generation: u64,
	pub loaded_types: Vec<Arc<str>>,
	pub retired_types: Vec<Arc<str>>,
	/// Diagnostics of the last failed pass; empty on success.
	pub diagnostics: Vec<DiagnosticToken>,
	/// Every repair applied during the run, in order.
	pub repairs: Vec<Repair>,
	/// The cycle bound was hit before the schema compiled.
	pub exhausted: bool,
}

/// What [`Engine::request_compile`] did with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
	/// This caller ran the loop.
	Completed(HealReport),
	/// A run was already active and will pick the change up.
	Coalesced,
}

/// External collaborators of an [`Engine`].
pub struct EngineParts {
	pub toolchain: Arc<dyn Toolchain>,
	pub schema: Arc<dyn SchemaService>,
	pub repository: Arc<dyn SchemaRepository>,
	pub broadcaster: Arc<dyn Broadcaster>,
	pub host: Option<Arc<dyn HostResolver>>,
}

impl EngineParts {
	pub fn new(toolchain: Arc<dyn Toolchain>, schema: Arc<dyn SchemaService>, repository: Arc<dyn SchemaRepository>) -> Self {
		Self {
			toolchain,
			schema,
			repository,
			broadcaster: Arc::new(NullBroadcaster),
			host: None,
		}
	}

	pub fn with_broadcaster(mut self, broadcaster: Arc<dyn Broadcaster>) -> Self {
		self.broadcaster = broadcaster;
		self
	}

	pub fn with_host(mut self, host: Arc<dyn HostResolver>) -> Self {
		self.host = Some(host);
		self
	}
}

/// Process-wide compile-and-heal service.
pub struct Engine {
	config: EngineConfig,
	schema: Arc<dyn SchemaService>,
	repository: Arc<dyn SchemaRepository>,
	pipeline: MigrationPipeline,
	orchestrator: Orchestrator,
	sources: Arc<Mutex<SourceUnitStore>>,
	loader: UnitLoader,
	registry: Arc<TypeRegistry<LoadedType>>,
	run_lock: tokio::sync::Mutex<()>,
	pending: AtomicBool,
	state: AtomicU8,
}

impl Engine {
	pub fn new(config: EngineConfig, parts: EngineParts) -> Result<Self> {
		config.validate()?;
		let pipeline = MigrationPipeline::standard(LegacySignatures::new(&config.legacy_methods))?;

		let sources = Arc::new(Mutex::new(SourceUnitStore::new()));
		let loader = UnitLoader::new(Arc::new(CompiledUnitStore::new()), parts.host);
		let registry = Arc::new(TypeRegistry::new("types"));
		let orchestrator = Orchestrator::new(
			parts.toolchain,
			sources.clone(),
			loader.clone(),
			registry.clone(),
			parts.broadcaster,
			config.namespace.clone(),
			config.toolchain_timeout(),
		);

		Ok(Self {
			config,
			schema: parts.schema,
			repository: parts.repository,
			pipeline,
			orchestrator,
			sources,
			loader,
			registry,
			run_lock: tokio::sync::Mutex::new(()),
			pending: AtomicBool::new(false),
			state: AtomicU8::new(HealState::Idle as u8),
		})
	}

	pub fn config(&self) -> &EngineConfig {
		&self.config
	}

	pub fn registry(&self) -> &Arc<TypeRegistry<LoadedType>> {
		&self.registry
	}

	pub fn compiled(&self) -> &Arc<CompiledUnitStore> {
		self.loader.store()
	}

	pub fn sources(&self) -> &Arc<Mutex<SourceUnitStore>> {
		&self.sources
	}

	pub fn loader(&self) -> &UnitLoader {
		&self.loader
	}

	pub fn pipeline(&self) -> &MigrationPipeline {
		&self.pipeline
	}

	pub fn state(&self) -> HealState {
		HealState::from_u8(self.state.load(Ordering::Acquire))
	}

	fn set_state(&self, state: HealState) {
		let previous = HealState::from_u8(self.state.swap(state as u8, Ordering::AcqRel));
		if previous != state {
			debug!(from = ?previous, to = ?state, "heal.state");
		}
	}

	/// Makes this engine's loader the process-wide type resolver.
	pub fn install_process_loader(&self) {
		install_process_loader(self.loader.clone());
	}

	/// Runs the loop, waiting for any active run to finish first.
	pub async fn run(&self, ctx: &CompileContext) -> Result<HealReport> {
		let guard = self.run_lock.lock().await;
		self.pending.store(false, Ordering::SeqCst);
		let report = self.run_exclusive(ctx).await?;
		self.drain_pending(guard, ctx, report).await
	}

	/// Runs the loop unless one is already active.
	///
	/// While a run is active, requests only mark the schema as changed; the
	/// active caller performs one more run before returning.
	pub async fn request_compile(&self, ctx: &CompileContext) -> Result<RunOutcome> {
		self.pending.store(true, Ordering::SeqCst);
		let Ok(guard) = self.run_lock.try_lock() else {
			debug!("heal.coalesced");
			return Ok(RunOutcome::Coalesced);
		};
		if !self.pending.swap(false, Ordering::SeqCst) {
			// A run that finished between our store and try_lock served the request.
			return Ok(RunOutcome::Coalesced);
		}
		let report = self.run_exclusive(ctx).await?;
		Ok(RunOutcome::Completed(self.drain_pending(guard, ctx, report).await?))
	}

	/// Reruns for requests coalesced into the run that just finished.
	async fn drain_pending(&self, guard: tokio::sync::MutexGuard<'_, ()>, ctx: &CompileContext, mut report: HealReport) -> Result<HealReport> {
		let mut guard = guard;
		loop {
			while self.pending.swap(false, Ordering::SeqCst) {
				report = self.run_exclusive(ctx).await?;
			}
			drop(guard);
			if !self.pending.load(Ordering::SeqCst) {
				return Ok(report);
			}
			match self.run_lock.try_lock() {
				Ok(next) => guard = next,
				Err(_) => return Ok(report),
			}
		}
	}

	async fn run_exclusive(&self, ctx: &CompileContext) -> Result<HealReport> {
		let result = self.heal_cycles(ctx).await;
		if let Err(error) = &result {
			debug!(%error, "heal.aborted");
			self.set_state(HealState::Idle);
		}
		result
	}

	async fn heal_cycles(&self, ctx: &CompileContext) -> Result<HealReport> {
		let max_cycles = self.config.max_heal_cycles;
		let mut report = HealReport::default();

		loop {
			if report.cycles == max_cycles {
				report.exhausted = true;
				error!(cycles = report.cycles, diagnostics = report.diagnostics.len(), "heal.exhausted");
				self.report_unrecoverable(&report.diagnostics);
				break;
			}
			report.cycles += 1;
			self.set_state(HealState::Compiling);

			let batch = self.schema.request_dirty_source_units().await?;
			let request = self.stage(batch);
			let outcome = match self.orchestrator.compile(request.clone(), ctx).await {
				Ok(outcome) => outcome,
				Err(error) => {
					self.restage(request);
					return Err(error);
				}
			};
			report.generation = outcome.generation;

			if outcome.success {
				report.success = true;
				report.diagnostics.clear();
				report.loaded_types.extend(outcome.loaded_types);
				report.retired_types.extend(outcome.retired_types);
				self.set_state(HealState::Succeeded);
				break;
			}

			self.set_state(HealState::Healing);
			let heal_ctx = HealContext {
				repository: self.repository.as_ref(),
				schema: self.schema.as_ref(),
			};
			let repairs = self.pipeline.heal(&outcome.diagnostics, &heal_ctx);
			report.diagnostics = outcome.diagnostics;

			if repairs.is_empty() {
				self.report_unrecoverable(&report.diagnostics);
				break;
			}
			report.repairs.extend(repairs);

			self.set_state(HealState::Regenerating);
			self.schema.notify_schema_changed();
			self.sources.lock().request_full_rebuild();
		}

		if !report.success {
			self.set_state(HealState::Unrecoverable);
		}
		info!(
			success = report.success,
			cycles = report.cycles,
			generation = report.generation,
			loaded = report.loaded_types.len(),
			repairs = report.repairs.len(),
			"heal.finished"
		);
		Ok(report)
	}

	fn report_unrecoverable(&self, diagnostics: &[DiagnosticToken]) {
		for diagnostic in diagnostics {
			error!(unit = %diagnostic.unit, line = diagnostic.line, message = %diagnostic.message, "heal.unrecoverable");
		}
	}

	fn stage(&self, batch: SourceBatch) -> CompileRequest {
		let mut sources = self.sources.lock();
		for name in batch.removed {
			sources.stage_removal(name);
		}
		for unit in batch.units {
			sources.add_or_update(unit);
		}
		CompileRequest {
			units: sources.take_dirty(),
			removed: sources.take_removed(),
		}
	}

	/// Puts an aborted batch back so the next run retries it.
	fn restage(&self, request: CompileRequest) {
		let mut sources = self.sources.lock();
		for name in request.removed {
			sources.stage_removal(name);
		}
		for unit in request.units {
			sources.add_or_update(unit);
		}
	}

	/// Resolves a type for instantiation.
	///
	/// Registered types must be backed by the compiled-unit store while their
	/// generation is current; a current entry missing from the store is
	/// reported as [`EngineError::LoaderInconsistency`]. An entry whose
	/// generation was superseded mid-lookup is returned as pinned, since it
	/// carries its own compiled unit. Unregistered names fall back to the
	/// loader chain.
	pub fn instantiate(&self, name: &str) -> Result<Arc<LoadedType>> {
		if let Some(entry) = self.registry.get(name) {
			let ty = entry.entry();
			// Writers publish the registry before dropping units from the store.
			if ty.origin() == TypeOrigin::Dynamic && !self.compiled().contains(name) && self.registry.generation() == entry.generation() {
				error!(r#type = name, generation = entry.generation(), "engine.loader_inconsistency");
				return Err(EngineError::LoaderInconsistency { name: name.to_string() });
			}
			return Ok(ty.clone());
		}
		self.loader
			.load(name)
			.map(Arc::new)
			.ok_or_else(|| EngineError::TypeNotFound(name.to_string()))
	}

	/// Drops all compiled state: source hashes, compiled units and registry entries.
	pub async fn reset(&self) {
		let _guard = self.run_lock.lock().await;
		self.sources.lock().reset();
		self.registry.reset();
		self.compiled().clear();
		self.set_state(HealState::Idle);
		info!("engine.reset");
	}
}
