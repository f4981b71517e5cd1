//! Staging area for source units awaiting compilation.

use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use rustc_hash::FxHashMap;
use tracing::trace;

use super::SourceUnit;

/// Result of staging one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
	/// The unit is dirty and will be part of the next batch.
	Added,
	/// Content matches what is already compiled or staged.
	Unchanged,
}

/// Tracks staged (dirty) units, staged removals and the hash of each unit's
/// last successful compile.
#[derive(Debug, Default)]
pub struct SourceUnitStore {
	staged: IndexMap<Arc<str>, SourceUnit>,
	removed: IndexSet<Arc<str>>,
	compiled: FxHashMap<Arc<str>, u64>,
	full_rebuild: bool,
}

impl SourceUnitStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Stages a unit unless its content is already compiled or already staged.
	///
	/// A pending full rebuild bypasses the compiled-hash comparison.
	pub fn add_or_update(&mut self, unit: SourceUnit) -> StageOutcome {
		let name = unit.name().clone();
		let hash = unit.hash();
		self.removed.shift_remove(&name);

		if self.staged.get(&name).is_some_and(|staged| staged.hash() == hash) {
			trace!(unit = %name, "source.stage.already_staged");
			return StageOutcome::Unchanged;
		}
		if !self.full_rebuild && self.compiled.get(&name) == Some(&hash) {
			// A stale staged revision must not survive a revert to compiled content.
			self.staged.shift_remove(&name);
			trace!(unit = %name, "source.stage.unchanged");
			return StageOutcome::Unchanged;
		}

		trace!(unit = %name, hash, "source.stage.dirty");
		self.staged.insert(name, unit);
		StageOutcome::Added
	}

	/// Forgets a deleted unit. Returns true if anything was known about it.
	pub fn remove(&mut self, name: &str) -> bool {
		let staged = self.staged.shift_remove(name).is_some();
		let compiled = self.compiled.remove(name).is_some();
		self.removed.shift_remove(name);
		staged || compiled
	}

	/// Queues a deleted type for retirement in the next batch.
	pub fn stage_removal(&mut self, name: Arc<str>) {
		self.staged.shift_remove(&name);
		self.removed.insert(name);
	}

	/// Drops staged units and removals without touching compiled hashes.
	pub fn clear(&mut self) {
		self.staged.clear();
		self.removed.clear();
	}

	/// Removes and returns the staged batch in staging order.
	pub fn take_dirty(&mut self) -> Vec<SourceUnit> {
		self.staged.drain(..).map(|(_, unit)| unit).collect()
	}

	/// Removes and returns the staged removals.
	pub fn take_removed(&mut self) -> Vec<Arc<str>> {
		self.removed.drain(..).collect()
	}

	pub fn dirty_len(&self) -> usize {
		self.staged.len()
	}

	pub fn is_dirty(&self, name: &str) -> bool {
		self.staged.contains_key(name)
	}

	/// Makes the next staging pass treat every unit as dirty.
	pub fn request_full_rebuild(&mut self) {
		self.full_rebuild = true;
	}

	pub fn full_rebuild_requested(&self) -> bool {
		self.full_rebuild
	}

	/// Records the hashes of a successfully compiled batch.
	pub fn mark_compiled(&mut self, units: &[SourceUnit]) {
		for unit in units {
			self.compiled.insert(unit.name().clone(), unit.hash());
		}
		self.full_rebuild = false;
	}

	/// Forgets compiled hashes so these units are retried in full next time.
	pub fn invalidate<'a>(&mut self, names: impl IntoIterator<Item = &'a str>) {
		for name in names {
			self.compiled.remove(name);
		}
	}

	pub fn compiled_hash(&self, name: &str) -> Option<u64> {
		self.compiled.get(name).copied()
	}

	/// Returns the store to its initial state.
	pub fn reset(&mut self) {
		self.staged.clear();
		self.removed.clear();
		self.compiled.clear();
		self.full_rebuild = false;
	}
}
