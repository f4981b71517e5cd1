//! Toolchain backed by an external compiler process.
//!
//! Each invocation gets a scratch workspace:
//!
//! - `src/<unit>.src`: source units of the batch
//! - `lib/<unit>.unit`: previously compiled siblings
//! - `out/`: where the compiler writes `<unit>.unit` payloads
//!
//! Diagnostics are read from stdout and stderr, one per line, in the form
//! `<unit-or-path>:<line>: <severity>[<class>]: <message>`. The `[<class>]`
//! part is optional.
//!
//! Unit names become file names, so only ASCII letters, digits, `_`, `-`,
//! `$` and non-empty `.`-separated segments are accepted. A batch holding any
//! other name fails with one error diagnostic per offending unit and the
//! compiler is not started.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, trace, warn};

use super::{Toolchain, ToolchainOutput};
use crate::compiled::CompiledUnit;
use crate::config::ToolchainConfig;
use crate::diagnostic::{DiagnosticClass, RawDiagnostic, Severity};
use crate::error::{EngineError, Result};
use crate::source::SourceUnit;

const SOURCE_EXT: &str = ".src";
const UNIT_EXT: &str = ".unit";

/// Runs a configured compiler command once per batch.
#[derive(Debug, Clone)]
pub struct ProcessToolchain {
	program: PathBuf,
	args: Vec<String>,
}

impl ProcessToolchain {
	pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
		Self {
			program: program.into(),
			args,
		}
	}

	pub fn from_config(config: &ToolchainConfig) -> Self {
		Self::new(config.program.clone(), config.args.clone())
	}

	fn expand_args(&self, src: &Path, lib: &Path, out: &Path) -> Vec<String> {
		let src = src.to_string_lossy();
		let lib = lib.to_string_lossy();
		let out = out.to_string_lossy();
		self.args
			.iter()
			.map(|arg| arg.replace("{src}", &src).replace("{lib}", &lib).replace("{out}", &out))
			.collect()
	}
}

#[async_trait]
impl Toolchain for ProcessToolchain {
	fn name(&self) -> &str {
		self.program.to_str().unwrap_or("toolchain")
	}

	async fn compile(&self, batch: &[SourceUnit], siblings: &[Arc<CompiledUnit>]) -> Result<ToolchainOutput> {
		let rejected: Vec<RawDiagnostic> = batch
			.iter()
			.filter(|unit| !is_file_safe(unit.name()))
			.map(|unit| RawDiagnostic::error(unit.name().clone(), 0, format!("unit name `{}` cannot be used as a file name", unit.name())))
			.collect();
		if !rejected.is_empty() {
			return Ok(ToolchainOutput {
				diagnostics: rejected,
				units: Vec::new(),
			});
		}

		let workspace = tempfile::tempdir()?;
		let src = workspace.path().join("src");
		let lib = workspace.path().join("lib");
		let out = workspace.path().join("out");
		for dir in [&src, &lib, &out] {
			tokio::fs::create_dir_all(dir).await?;
		}

		for unit in batch {
			tokio::fs::write(src.join(format!("{}{SOURCE_EXT}", unit.name())), unit.text()).await?;
		}
		for sibling in siblings {
			if !is_file_safe(sibling.name()) {
				warn!(unit = %sibling.name(), "toolchain.sibling_skipped");
				continue;
			}
			tokio::fs::write(lib.join(format!("{}{UNIT_EXT}", sibling.name())), sibling.payload()).await?;
		}

		let args = self.expand_args(&src, &lib, &out);
		debug!(program = %self.program.display(), units = batch.len(), siblings = siblings.len(), "toolchain.spawn");

		let output = Command::new(&self.program)
			.args(&args)
			.current_dir(workspace.path())
			.stdin(Stdio::null())
			.kill_on_drop(true)
			.output()
			.await
			.map_err(|error| EngineError::ToolchainUnavailable {
				program: self.program.display().to_string(),
				reason: error.to_string(),
			})?;

		let mut diagnostics = Vec::new();
		for stream in [&output.stdout, &output.stderr] {
			for line in String::from_utf8_lossy(stream).lines() {
				match parse_diagnostic_line(line) {
					Some(diagnostic) => diagnostics.push(diagnostic),
					None => trace!(line, "toolchain.output"),
				}
			}
		}

		let mut result = ToolchainOutput {
			diagnostics,
			units: Vec::new(),
		};
		if !output.status.success() && !result.has_errors() {
			result.diagnostics.push(RawDiagnostic::error(
				"toolchain",
				0,
				format!("{} exited with {}", self.program.display(), output.status),
			));
		}
		if !result.has_errors() {
			result.units = read_units(&out).await?;
		}
		Ok(result)
	}
}

async fn read_units(dir: &Path) -> Result<Vec<CompiledUnit>> {
	let mut entries = tokio::fs::read_dir(dir).await?;
	let mut units = Vec::new();
	while let Some(entry) = entries.next_entry().await? {
		let path = entry.path();
		let Some(name) = path
			.file_name()
			.and_then(|name| name.to_str())
			.and_then(|name| name.strip_suffix(UNIT_EXT))
			.filter(|name| is_file_safe(name))
		else {
			continue;
		};
		let payload = tokio::fs::read(&path).await?;
		units.push(CompiledUnit::new(name.to_string(), payload));
	}
	units.sort_by(|a, b| a.name().cmp(b.name()));
	Ok(units)
}

fn is_file_safe(name: &str) -> bool {
	!name.is_empty()
		&& name
			.split('.')
			.all(|segment| !segment.is_empty() && segment.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '$')))
}

/// Parses one compiler output line into a diagnostic.
///
/// Returns `None` for lines that are not diagnostics. A path location is
/// reduced to the unit name by dropping directories and the source extension.
pub fn parse_diagnostic_line(line: &str) -> Option<RawDiagnostic> {
	let (location, rest) = line.trim_end().split_once(": ")?;
	let (path, line_no) = location.rsplit_once(':')?;
	let line_no: u32 = line_no.trim().parse().ok()?;

	let (head, message) = rest.split_once(": ")?;
	let (severity, class) = match head.split_once('[') {
		Some((severity, code)) => (severity, code.strip_suffix(']')?.parse::<DiagnosticClass>().ok()),
		None => (head, None),
	};
	let severity: Severity = severity.trim().parse().ok()?;

	let file = path.rsplit(['/', '\\']).next().unwrap_or(path);
	let unit = file.strip_suffix(SOURCE_EXT).unwrap_or(file);
	if unit.is_empty() {
		return None;
	}

	let mut diagnostic = RawDiagnostic::new(severity, unit, line_no, message.trim());
	diagnostic.class = class;
	Some(diagnostic)
}
