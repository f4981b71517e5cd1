//! Generated source units and their entity spans.
//!
//! # Role
//!
//! A [`SourceUnit`] is the generated text for one user-defined type. Its
//! [`SourceSpan`]s partition the unit's lines and point back at the schema
//! entity each block of lines was generated from.
//!
//! # Invariants
//!
//! - Spans are contiguous, non-empty and cover exactly the unit's lines.
//! - The content hash depends on the text only.

mod store;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use store::{SourceUnitStore, StageOutcome};

/// Kind of schema entity a span was generated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
	Type,
	Import,
	Property,
	Method,
}

impl EntityKind {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Type => "type",
			Self::Import => "import",
			Self::Property => "property",
			Self::Method => "method",
		}
	}
}

impl fmt::Display for EntityKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Back-reference from generated lines to the schema entity that produced them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct EntityRef {
	pub kind: EntityKind,
	/// Stable identifier in the schema repository.
	pub id: Arc<str>,
	/// Declared human-readable name.
	pub name: Arc<str>,
	/// Qualified name of the owning type.
	pub owner: Arc<str>,
}

impl EntityRef {
	pub fn new(kind: EntityKind, id: impl Into<Arc<str>>, name: impl Into<Arc<str>>, owner: impl Into<Arc<str>>) -> Self {
		Self {
			kind,
			id: id.into(),
			name: name.into(),
			owner: owner.into(),
		}
	}
}

/// A run of physical lines emitted for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceSpan {
	pub lines: u32,
	pub entity: Option<EntityRef>,
}

impl SourceSpan {
	pub fn new(lines: u32, entity: EntityRef) -> Self {
		Self { lines, entity: Some(entity) }
	}

	pub fn anonymous(lines: u32) -> Self {
		Self { lines, entity: None }
	}
}

/// Rejections for malformed span lists.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SourceError {
	#[error("unit `{unit}`: span {index} covers no lines")]
	EmptySpan { unit: String, index: usize },

	#[error("unit `{unit}`: spans cover {declared} lines but the text has {actual}")]
	SpanOverflow { unit: String, declared: u64, actual: u32 },
}

/// Generated source text for one user-defined type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUnit {
	name: Arc<str>,
	text: Arc<str>,
	hash: u64,
	line_count: u32,
	spans: Arc<[SourceSpan]>,
}

impl SourceUnit {
	/// Builds a unit, normalizing the span list into a full partition.
	///
	/// An empty list becomes one anonymous span; a list that stops short of the
	/// last line gets an anonymous trailing span.
	pub fn new(name: impl Into<Arc<str>>, text: impl Into<Arc<str>>, mut spans: Vec<SourceSpan>) -> Result<Self, SourceError> {
		let name = name.into();
		let text = text.into();
		let line_count = text.lines().count() as u32;

		if let Some(index) = spans.iter().position(|span| span.lines == 0) {
			return Err(SourceError::EmptySpan { unit: name.to_string(), index });
		}
		let declared: u64 = spans.iter().map(|span| u64::from(span.lines)).sum();
		if declared > u64::from(line_count) {
			return Err(SourceError::SpanOverflow {
				unit: name.to_string(),
				declared,
				actual: line_count,
			});
		}
		if declared < u64::from(line_count) {
			spans.push(SourceSpan::anonymous(line_count - declared as u32));
		}

		Ok(Self {
			hash: content_hash(&text),
			name,
			text,
			line_count,
			spans: Arc::from(spans),
		})
	}

	pub fn name(&self) -> &Arc<str> {
		&self.name
	}

	pub fn text(&self) -> &str {
		&self.text
	}

	pub fn hash(&self) -> u64 {
		self.hash
	}

	pub fn line_count(&self) -> u32 {
		self.line_count
	}

	pub fn spans(&self) -> &[SourceSpan] {
		&self.spans
	}

	/// Finds the span containing a 1-based line.
	///
	/// Spans may cover several lines each, so this walks cumulative line counts
	/// rather than indexing by line.
	pub fn locate(&self, line: u32) -> Option<(usize, &SourceSpan)> {
		locate_span(&self.spans, line)
	}
}

/// Finds the span containing a 1-based line by accumulating span lengths.
pub fn locate_span(spans: &[SourceSpan], line: u32) -> Option<(usize, &SourceSpan)> {
	if line == 0 {
		return None;
	}
	let mut covered: u64 = 0;
	for (index, span) in spans.iter().enumerate() {
		covered += u64::from(span.lines);
		if covered >= u64::from(line) {
			return Some((index, span));
		}
	}
	None
}

/// Content-only hash of generated source text.
pub fn content_hash(text: &str) -> u64 {
	xxhash_rust::xxh3::xxh3_64(text.as_bytes())
}
