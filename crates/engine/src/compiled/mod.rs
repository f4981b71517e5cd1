//! In-memory table of compiled unit payloads.
//!
//! Units are superseded, never mutated: `put` swaps in a new `Arc` and
//! readers holding the old one keep a consistent payload.

mod loader;

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

pub use loader::{HostResolver, LoadedType, TypeOrigin, UnitLoader, install_process_loader, resolve_type, uninstall_process_loader};

/// Executable payload produced for one source unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledUnit {
	name: Arc<str>,
	payload: Bytes,
}

impl CompiledUnit {
	pub fn new(name: impl Into<Arc<str>>, payload: impl Into<Bytes>) -> Self {
		Self {
			name: name.into(),
			payload: payload.into(),
		}
	}

	pub fn name(&self) -> &Arc<str> {
		&self.name
	}

	pub fn payload(&self) -> &Bytes {
		&self.payload
	}
}

/// Qualified-name keyed store of compiled units.
#[derive(Debug, Default)]
pub struct CompiledUnitStore {
	units: RwLock<FxHashMap<Arc<str>, Arc<CompiledUnit>>>,
}

impl CompiledUnitStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Defines or redefines a unit, returning the superseded one.
	pub fn put(&self, unit: CompiledUnit) -> Option<Arc<CompiledUnit>> {
		let name = unit.name.clone();
		self.units.write().insert(name, Arc::new(unit))
	}

	pub fn get(&self, name: &str) -> Option<Arc<CompiledUnit>> {
		self.units.read().get(name).cloned()
	}

	pub fn contains(&self, name: &str) -> bool {
		self.units.read().contains_key(name)
	}

	/// Removes a unit. Callers must retire any registry entry built on it.
	pub fn remove(&self, name: &str) -> Option<Arc<CompiledUnit>> {
		self.units.write().remove(name)
	}

	/// Units whose qualified name lies under `namespace`, sorted by name.
	///
	/// An empty namespace lists everything.
	pub fn list_under(&self, namespace: &str) -> Vec<Arc<CompiledUnit>> {
		let units = self.units.read();
		let mut listed: Vec<_> = units
			.values()
			.filter(|unit| in_namespace(&unit.name, namespace))
			.cloned()
			.collect();
		listed.sort_unstable_by(|a, b| a.name.cmp(&b.name));
		listed
	}

	pub fn len(&self) -> usize {
		self.units.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn clear(&self) {
		self.units.write().clear();
	}
}

fn in_namespace(name: &str, namespace: &str) -> bool {
	if namespace.is_empty() {
		return true;
	}
	name.strip_prefix(namespace).is_some_and(|rest| rest.starts_with('.'))
}
