use thiserror::Error;

/// Errors raised when a generation cannot be installed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
	/// The same qualified name appeared twice in one install batch.
	#[error("registry '{label}': `{name}` appears more than once in one install batch")]
	DuplicateInBatch {
		/// Registry label.
		label: &'static str,
		/// Offending qualified name.
		name: String,
	},

	/// A name was both installed and retired by the same batch.
	#[error("registry '{label}': `{name}` is installed and retired by the same batch")]
	InstallRetireConflict {
		/// Registry label.
		label: &'static str,
		/// Offending qualified name.
		name: String,
	},
}
