//! Kiln command line driver.
//!
//! Runs the compile and heal loop once over a schema manifest using an
//! external toolchain, then reports what was loaded and repaired.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use kiln_engine::{CompileContext, Engine, EngineConfig, EngineParts, HealReport, MemorySchema, ProcessToolchain, RepairAction, SchemaManifest};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "kiln")]
#[command(about = "Dynamic schema compiler with self-healing migrations")]
struct Args {
	#[command(subcommand)]
	command: Command,

	/// Verbose logging
	#[arg(short, long, global = true)]
	verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Compile a schema manifest, healing it until it builds or no repair applies.
	Check {
		/// Schema manifest (TOML)
		#[arg(short, long, value_name = "PATH")]
		schema: PathBuf,

		/// Engine configuration (TOML)
		#[arg(short, long, value_name = "PATH", default_value = "kiln.toml")]
		config: PathBuf,

		/// Print the heal report as JSON
		#[arg(long)]
		json: bool,
	},
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
	let args = Args::parse();

	setup_tracing(args.verbose);

	match args.command {
		Command::Check { schema, config, json } => check(&schema, &config, json).await,
	}
}

async fn check(schema_path: &Path, config_path: &Path, json: bool) -> anyhow::Result<ExitCode> {
	let config = EngineConfig::load(config_path).with_context(|| format!("loading {}", config_path.display()))?;
	let Some(toolchain_config) = config.toolchain.as_ref() else {
		bail!("{} has no [toolchain] section", config_path.display());
	};
	let toolchain = Arc::new(ProcessToolchain::from_config(toolchain_config));

	let manifest = std::fs::read_to_string(schema_path).with_context(|| format!("reading {}", schema_path.display()))?;
	let manifest = SchemaManifest::parse(&manifest).with_context(|| format!("parsing {}", schema_path.display()))?;
	info!(types = manifest.types.len(), schema = %schema_path.display(), "check.start");

	let schema = Arc::new(MemorySchema::from_manifest(manifest));
	let engine = Engine::new(config, EngineParts::new(toolchain, schema.clone(), schema))?;
	let report = engine.run(&CompileContext::new()).await?;

	if json {
		println!("{}", serde_json::to_string_pretty(&report)?);
	} else {
		print_report(&report);
	}

	Ok(if report.success { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn print_report(report: &HealReport) {
	for repair in &report.repairs {
		let action = match repair.action {
			RepairAction::Deleted => "deleted",
			RepairAction::Blacklisted => "blacklisted",
		};
		println!(
			"repair  {}:{}: {} {action} {} `{}` ({})",
			repair.unit, repair.line, repair.handler, repair.kind, repair.name, repair.target
		);
	}
	for diagnostic in &report.diagnostics {
		println!("diag    {diagnostic}");
	}
	for name in &report.retired_types {
		println!("retired {name}");
	}
	for name in &report.loaded_types {
		println!("loaded  {name}");
	}

	if report.success {
		println!(
			"ok: generation {} after {} cycle(s), {} repair(s)",
			report.generation,
			report.cycles,
			report.repairs.len()
		);
	} else if report.exhausted {
		println!("failed: heal cycle bound reached after {} cycle(s)", report.cycles);
	} else {
		println!("failed: {} unrecoverable diagnostic(s)", report.diagnostics.len());
	}
}

fn setup_tracing(verbose: bool) {
	use std::fs::OpenOptions;

	use tracing_subscriber::EnvFilter;
	use tracing_subscriber::fmt::format::FmtSpan;
	use tracing_subscriber::prelude::*;

	let filter = || {
		EnvFilter::try_from_env("KILN_LOG")
			.or_else(|_| EnvFilter::try_from_default_env())
			.unwrap_or_else(|_| {
				if verbose {
					EnvFilter::new("kiln_engine=debug,kiln_registry=debug,info")
				} else {
					EnvFilter::new("warn")
				}
			})
	};

	// KILN_LOG_DIR keeps a per-process log file alongside stderr.
	if let Some(log_dir) = std::env::var("KILN_LOG_DIR").ok().map(PathBuf::from)
		&& std::fs::create_dir_all(&log_dir).is_ok()
	{
		let log_path = log_dir.join(format!("kiln.{}.log", std::process::id()));

		if let Ok(file) = OpenOptions::new().create(true).append(true).open(&log_path) {
			let file_layer = tracing_subscriber::fmt::layer()
				.with_writer(file)
				.with_ansi(false)
				.with_span_events(FmtSpan::CLOSE)
				.with_target(true);
			let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

			tracing_subscriber::registry()
				.with(filter())
				.with(file_layer)
				.with(stderr_layer)
				.init();

			tracing::info!(path = ?log_path, "tracing initialized");
			return;
		}
	}

	tracing_subscriber::fmt().with_env_filter(filter()).with_writer(std::io::stderr).init();
}
