//! Read-only views over one registry generation.
//!
//! A [`Snapshot`] is never mutated after construction. Installs build a new
//! one; handles here only pin and read.

use std::ops::Deref;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::RegistryEntry;

/// One complete, immutable generation of the registry.
pub struct Snapshot<T: RegistryEntry> {
	pub(crate) table: Arc<[Arc<T>]>,
	pub(crate) by_name: Arc<FxHashMap<Arc<str>, u32>>,
	pub(crate) generation: u64,
}

impl<T: RegistryEntry> Clone for Snapshot<T> {
	fn clone(&self) -> Self {
		Self {
			table: self.table.clone(),
			by_name: self.by_name.clone(),
			generation: self.generation,
		}
	}
}

impl<T: RegistryEntry> Snapshot<T> {
	pub(crate) fn empty(generation: u64) -> Self {
		Self {
			table: Arc::from(Vec::new()),
			by_name: Arc::new(FxHashMap::default()),
			generation,
		}
	}

	/// Builds a snapshot from an already deduplicated table.
	pub(crate) fn from_table(table: Vec<Arc<T>>, generation: u64) -> Self {
		let mut by_name = FxHashMap::default();
		by_name.reserve(table.len());
		for (idx, entry) in table.iter().enumerate() {
			by_name.insert(Arc::<str>::from(entry.name()), idx as u32);
		}
		Self {
			table: Arc::from(table),
			by_name: Arc::new(by_name),
			generation,
		}
	}

	/// Generation number; increases by one per install.
	pub fn generation(&self) -> u64 {
		self.generation
	}

	/// Looks up an entry by qualified name.
	pub fn get(&self, name: &str) -> Option<&Arc<T>> {
		let idx = *self.by_name.get(name)?;
		self.table.get(idx as usize)
	}

	pub fn contains(&self, name: &str) -> bool {
		self.by_name.contains_key(name)
	}

	pub fn len(&self) -> usize {
		self.table.len()
	}

	pub fn is_empty(&self) -> bool {
		self.table.is_empty()
	}

	/// Entries in install order.
	pub fn iter(&self) -> impl Iterator<Item = &Arc<T>> {
		self.table.iter()
	}

	/// Qualified names sorted lexicographically.
	pub fn names(&self) -> Vec<Arc<str>> {
		let mut names: Vec<_> = self.by_name.keys().cloned().collect();
		names.sort_unstable();
		names
	}
}

/// Handle to one loaded entry that keeps its generation alive.
pub struct RegistryRef<T: RegistryEntry> {
	pub(crate) snap: Arc<Snapshot<T>>,
	pub(crate) idx: u32,
}

impl<T: RegistryEntry> Clone for RegistryRef<T> {
	fn clone(&self) -> Self {
		Self {
			snap: self.snap.clone(),
			idx: self.idx,
		}
	}
}

impl<T: RegistryEntry> std::fmt::Debug for RegistryRef<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RegistryRef")
			.field("name", &self.name())
			.field("generation", &self.snap.generation)
			.finish()
	}
}

impl<T: RegistryEntry> RegistryRef<T> {
	/// Returns the pinned entry.
	pub fn entry(&self) -> &Arc<T> {
		&self.snap.table[self.idx as usize]
	}

	pub fn name(&self) -> &str {
		self.entry().name()
	}

	/// Generation the entry was read from.
	pub fn generation(&self) -> u64 {
		self.snap.generation
	}
}

impl<T: RegistryEntry> Deref for RegistryRef<T> {
	type Target = T;

	fn deref(&self) -> &T {
		self.entry()
	}
}

/// Snapshot guard for iterating one generation without repeated loads.
pub struct SnapshotGuard<T: RegistryEntry> {
	pub(crate) snap: Arc<Snapshot<T>>,
}

impl<T: RegistryEntry> SnapshotGuard<T> {
	pub fn iter(&self) -> impl Iterator<Item = &Arc<T>> {
		self.snap.iter()
	}

	pub fn generation(&self) -> u64 {
		self.snap.generation
	}
}

impl<T: RegistryEntry> Deref for SnapshotGuard<T> {
	type Target = Snapshot<T>;

	fn deref(&self) -> &Snapshot<T> {
		&self.snap
	}
}
