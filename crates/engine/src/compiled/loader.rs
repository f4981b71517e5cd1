//! Name resolution over compiled units with host fallback.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use kiln_registry::RegistryEntry;

use super::{CompiledUnit, CompiledUnitStore};

/// Resolves names the host process itself defines.
pub trait HostResolver: Send + Sync {
	fn resolve(&self, name: &str) -> Option<Arc<CompiledUnit>>;
}

/// Where a loaded type came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeOrigin {
	/// Compiled at runtime from a generated source unit.
	Dynamic,
	/// Provided by the host process.
	Host,
}

/// A resolved, instantiable type definition.
#[derive(Debug, Clone)]
pub struct LoadedType {
	name: Arc<str>,
	unit: Arc<CompiledUnit>,
	origin: TypeOrigin,
}

impl LoadedType {
	pub fn unit(&self) -> &Arc<CompiledUnit> {
		&self.unit
	}

	pub fn origin(&self) -> TypeOrigin {
		self.origin
	}
}

impl RegistryEntry for LoadedType {
	fn name(&self) -> &str {
		&self.name
	}
}

/// Resolves names against the compiled-unit store first, then the host.
#[derive(Clone)]
pub struct UnitLoader {
	store: Arc<CompiledUnitStore>,
	host: Option<Arc<dyn HostResolver>>,
}

impl std::fmt::Debug for UnitLoader {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("UnitLoader")
			.field("units", &self.store.len())
			.field("host", &self.host.is_some())
			.finish()
	}
}

impl UnitLoader {
	pub fn new(store: Arc<CompiledUnitStore>, host: Option<Arc<dyn HostResolver>>) -> Self {
		Self { store, host }
	}

	pub fn store(&self) -> &Arc<CompiledUnitStore> {
		&self.store
	}

	pub fn load(&self, name: &str) -> Option<LoadedType> {
		if let Some(unit) = self.store.get(name) {
			return Some(LoadedType {
				name: unit.name().clone(),
				unit,
				origin: TypeOrigin::Dynamic,
			});
		}
		let unit = self.host.as_ref()?.resolve(name)?;
		Some(LoadedType {
			name: Arc::from(name),
			unit,
			origin: TypeOrigin::Host,
		})
	}
}

static PROCESS_LOADER: ArcSwapOption<UnitLoader> = ArcSwapOption::const_empty();

/// Makes `loader` the process-wide resolver used by [`resolve_type`].
pub fn install_process_loader(loader: UnitLoader) {
	PROCESS_LOADER.store(Some(Arc::new(loader)));
}

pub fn uninstall_process_loader() {
	PROCESS_LOADER.store(None);
}

/// Resolves a type name through the installed process loader.
pub fn resolve_type(name: &str) -> Option<LoadedType> {
	PROCESS_LOADER.load().as_ref()?.load(name)
}
