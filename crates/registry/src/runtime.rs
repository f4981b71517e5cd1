//! Runtime registry container with atomic publication.
//!
//! # Role
//!
//! This module provides the thread-safe entrypoint for reading and replacing
//! registry data. Writers are serialized by an install lock and publish one
//! complete snapshot per install; readers never take the lock.

use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use tracing::{debug, info};

use crate::snapshot::{RegistryRef, Snapshot, SnapshotGuard};
use crate::{RegistryEntry, RegistryError};

/// Summary of one published generation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
	/// Generation number of the published snapshot.
	pub generation: u64,
	/// Names that had a previous entry and were superseded.
	pub replaced: Vec<Arc<str>>,
	/// Names that were not present before.
	pub added: Vec<Arc<str>>,
	/// Names removed by the retire list.
	pub retired: Vec<Arc<str>>,
}

/// Registry of loaded types, swapped one generation at a time.
pub struct TypeRegistry<T: RegistryEntry> {
	label: &'static str,
	snap: ArcSwap<Snapshot<T>>,
	install_lock: Mutex<()>,
}

impl<T: RegistryEntry> std::fmt::Debug for TypeRegistry<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let snap = self.snap.load();
		f.debug_struct("TypeRegistry")
			.field("label", &self.label)
			.field("generation", &snap.generation)
			.field("len", &snap.len())
			.finish()
	}
}

impl<T: RegistryEntry> TypeRegistry<T> {
	/// Creates an empty registry at generation 0.
	pub fn new(label: &'static str) -> Self {
		Self {
			label,
			snap: ArcSwap::from_pointee(Snapshot::empty(0)),
			install_lock: Mutex::new(()),
		}
	}

	pub fn label(&self) -> &'static str {
		self.label
	}

	/// Looks up an entry by qualified name.
	#[inline]
	pub fn get(&self, name: &str) -> Option<RegistryRef<T>> {
		let snap = self.snap.load_full();
		let idx = *snap.by_name.get(name)?;
		Some(RegistryRef { snap, idx })
	}

	#[inline]
	pub fn contains(&self, name: &str) -> bool {
		self.snap.load().contains(name)
	}

	/// Returns the current snapshot.
	pub fn snapshot(&self) -> Arc<Snapshot<T>> {
		self.snap.load_full()
	}

	/// Returns a snapshot guard for efficient iteration.
	pub fn snapshot_guard(&self) -> SnapshotGuard<T> {
		SnapshotGuard {
			snap: self.snap.load_full(),
		}
	}

	/// Qualified names of the current generation, sorted.
	pub fn names(&self) -> Vec<Arc<str>> {
		self.snap.load().names()
	}

	pub fn generation(&self) -> u64 {
		self.snap.load().generation
	}

	pub fn len(&self) -> usize {
		self.snap.load().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Publishes a new generation.
	///
	/// Every name in `batch` replaces its previous entry (if any); every name in
	/// `retire` is dropped. Entries not mentioned carry over unchanged. The
	/// unregister and register steps happen on a private table and become
	/// visible through a single store, so no reader sees the batch half-applied.
	pub fn install<I>(&self, batch: I, retire: &[Arc<str>]) -> Result<InstallReport, RegistryError>
	where
		I: IntoIterator<Item = T>,
	{
		let batch: Vec<Arc<T>> = batch.into_iter().map(Arc::new).collect();

		let mut incoming: FxHashSet<&str> = FxHashSet::default();
		for entry in &batch {
			if !incoming.insert(entry.name()) {
				return Err(RegistryError::DuplicateInBatch {
					label: self.label,
					name: entry.name().to_string(),
				});
			}
		}
		let retiring: FxHashSet<&str> = retire.iter().map(|name| &**name).collect();
		if let Some(name) = retiring.iter().find(|name| incoming.contains(*name)) {
			return Err(RegistryError::InstallRetireConflict {
				label: self.label,
				name: name.to_string(),
			});
		}

		Ok(self.publish(batch, &retiring))
	}

	/// Drops the named entries in one new generation.
	pub fn retire(&self, names: &[Arc<str>]) -> InstallReport {
		let retiring: FxHashSet<&str> = names.iter().map(|name| &**name).collect();
		self.publish(Vec::new(), &retiring)
	}

	fn publish(&self, batch: Vec<Arc<T>>, retiring: &FxHashSet<&str>) -> InstallReport {
		let incoming: FxHashSet<&str> = batch.iter().map(|entry| entry.name()).collect();

		let _guard = self.install_lock.lock();
		let old = self.snap.load_full();

		let mut report = InstallReport {
			generation: old.generation + 1,
			..InstallReport::default()
		};

		let mut table: Vec<Arc<T>> = Vec::with_capacity(old.len() + batch.len());
		for entry in old.iter() {
			let name = entry.name();
			if retiring.contains(name) {
				report.retired.push(Arc::from(name));
			} else if incoming.contains(name) {
				report.replaced.push(Arc::from(name));
			} else {
				table.push(entry.clone());
			}
		}
		for entry in &batch {
			if !old.contains(entry.name()) {
				report.added.push(Arc::from(entry.name()));
			}
		}
		table.extend(batch.iter().cloned());

		self.snap.store(Arc::new(Snapshot::from_table(table, report.generation)));

		info!(
			registry = self.label,
			generation = report.generation,
			added = report.added.len(),
			replaced = report.replaced.len(),
			retired = report.retired.len(),
			"registry.install"
		);
		report
	}

	/// Empties the registry, keeping the generation counter monotonic.
	pub fn reset(&self) {
		let _guard = self.install_lock.lock();
		let next = self.snap.load().generation + 1;
		self.snap.store(Arc::new(Snapshot::empty(next)));
		debug!(registry = self.label, generation = next, "registry.reset");
	}
}
