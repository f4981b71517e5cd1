//! Engine configuration.
//!
//! Configuration is TOML. Every key has a default, so an empty document is a
//! valid configuration:
//!
//! ```toml
//! namespace = "dynamic"
//! max_heal_cycles = 8
//! toolchain_timeout_secs = 120
//! legacy_methods = ["onSave", "Invoice.recalculate"]
//!
//! [toolchain]
//! program = "kilnc"
//! args = ["--src", "{src}", "--lib", "{lib}", "--out", "{out}"]
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error parsing TOML syntax or shape.
	#[error("TOML parse error: {0}")]
	Toml(#[from] toml::de::Error),

	/// Error reading a configuration file.
	#[error("I/O error reading {path}: {error}")]
	Io {
		/// Path to the file that failed to read.
		path: PathBuf,
		/// The underlying I/O error.
		error: std::io::Error,
	},

	/// A value is out of its accepted range.
	#[error("invalid value for `{field}`: {reason}")]
	Invalid {
		/// Offending key.
		field: &'static str,
		/// What is wrong with it.
		reason: String,
	},
}

/// External compiler command used by [`crate::ProcessToolchain`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ToolchainConfig {
	/// Program to execute.
	pub program: PathBuf,
	/// Arguments; `{src}`, `{lib}` and `{out}` are replaced with workspace directories.
	#[serde(default)]
	pub args: Vec<String>,
}

/// Tunables for the compile-and-heal engine.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
	/// Namespace holding generated units.
	pub namespace: String,
	/// Upper bound on compile-and-heal cycles per run.
	pub max_heal_cycles: usize,
	/// Wall-clock budget for one toolchain invocation.
	pub toolchain_timeout_secs: u64,
	/// Obsolete method definitions removed on sight: `method` or `Type.method`.
	pub legacy_methods: Vec<String>,
	/// External compiler, if the process toolchain is used.
	pub toolchain: Option<ToolchainConfig>,
}

impl Default for EngineConfig {
	fn default() -> Self {
		Self {
			namespace: "dynamic".to_string(),
			max_heal_cycles: 8,
			toolchain_timeout_secs: 120,
			legacy_methods: Vec::new(),
			toolchain: None,
		}
	}
}

impl EngineConfig {
	/// Parses and validates a TOML document.
	pub fn parse(input: &str) -> Result<Self, ConfigError> {
		let config: Self = toml::from_str(input)?;
		config.validate()?;
		Ok(config)
	}

	/// Reads, parses and validates a TOML file.
	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		let input = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
			path: path.to_path_buf(),
			error,
		})?;
		Self::parse(&input)
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.max_heal_cycles == 0 {
			return Err(ConfigError::Invalid {
				field: "max_heal_cycles",
				reason: "must be at least 1".to_string(),
			});
		}
		if self.toolchain_timeout_secs == 0 {
			return Err(ConfigError::Invalid {
				field: "toolchain_timeout_secs",
				reason: "must be at least 1".to_string(),
			});
		}
		if let Some(entry) = self.legacy_methods.iter().find(|entry| entry.is_empty() || entry.split('.').any(str::is_empty)) {
			return Err(ConfigError::Invalid {
				field: "legacy_methods",
				reason: format!("malformed entry {entry:?}"),
			});
		}
		Ok(())
	}

	pub fn toolchain_timeout(&self) -> Duration {
		Duration::from_secs(self.toolchain_timeout_secs)
	}
}
