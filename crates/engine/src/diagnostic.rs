//! Compiler diagnostics and their correlation back to schema entities.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;

use crate::source::{EntityRef, SourceSpan, SourceUnit};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
	Note,
	Warning,
	Error,
}

impl fmt::Display for Severity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::Note => "note",
			Self::Warning => "warning",
			Self::Error => "error",
		})
	}
}

impl FromStr for Severity {
	type Err = ();

	fn from_str(s: &str) -> Result<Self, ()> {
		match s {
			"note" | "info" => Ok(Self::Note),
			"warning" | "warn" => Ok(Self::Warning),
			"error" | "fatal" => Ok(Self::Error),
			_ => Err(()),
		}
	}
}

/// Structured failure class, when the toolchain reports one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagnosticClass {
	UnresolvedImport,
	DuplicateDefinition,
	UnknownSymbol,
	SignatureClash,
}

impl FromStr for DiagnosticClass {
	type Err = ();

	fn from_str(s: &str) -> Result<Self, ()> {
		match s {
			"unresolved-import" => Ok(Self::UnresolvedImport),
			"duplicate-definition" => Ok(Self::DuplicateDefinition),
			"unknown-symbol" => Ok(Self::UnknownSymbol),
			"signature-clash" => Ok(Self::SignatureClash),
			_ => Err(()),
		}
	}
}

/// One diagnostic as the toolchain reported it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDiagnostic {
	pub severity: Severity,
	pub unit: Arc<str>,
	/// 1-based; 0 when the toolchain gave no line.
	pub line: u32,
	pub message: String,
	pub class: Option<DiagnosticClass>,
}

impl RawDiagnostic {
	pub fn new(severity: Severity, unit: impl Into<Arc<str>>, line: u32, message: impl Into<String>) -> Self {
		Self {
			severity,
			unit: unit.into(),
			line,
			message: message.into(),
			class: None,
		}
	}

	pub fn error(unit: impl Into<Arc<str>>, line: u32, message: impl Into<String>) -> Self {
		Self::new(Severity::Error, unit, line, message)
	}

	pub fn with_class(mut self, class: DiagnosticClass) -> Self {
		self.class = Some(class);
		self
	}
}

/// A compiler error resolved to its source span and originating entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosticToken {
	pub severity: Severity,
	pub unit: Arc<str>,
	pub line: u32,
	pub message: String,
	pub class: Option<DiagnosticClass>,
	/// Index of the containing span within the unit.
	pub span_index: Option<usize>,
	pub span: Option<SourceSpan>,
	pub entity: Option<EntityRef>,
}

impl DiagnosticToken {
	/// Unit name and line, used as the healing order key.
	pub fn position(&self) -> (&str, u32) {
		(&self.unit, self.line)
	}
}

impl fmt::Display for DiagnosticToken {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}: {}: {}", self.unit, self.line, self.severity, self.message)?;
		if let Some(entity) = &self.entity {
			write!(f, " [{} `{}` ({})]", entity.kind, entity.name, entity.id)?;
		}
		Ok(())
	}
}

/// Resolves a raw diagnostic against the unit it was reported for.
///
/// Entity fields stay empty when the unit is unknown, the line falls outside
/// the unit, or the containing span has no originating entity.
pub fn correlate(raw: RawDiagnostic, unit: Option<&SourceUnit>) -> DiagnosticToken {
	let located = unit.and_then(|unit| unit.locate(raw.line));
	let (span_index, span) = match located {
		Some((index, span)) => (Some(index), Some(span.clone())),
		None => (None, None),
	};
	let entity = span.as_ref().and_then(|span| span.entity.clone());

	DiagnosticToken {
		severity: raw.severity,
		unit: raw.unit,
		line: raw.line,
		message: raw.message,
		class: raw.class,
		span_index,
		span,
		entity,
	}
}
