//! Generation-swapped registry of loaded dynamic types.
//!
//! # Role
//!
//! The registry is the process-wide table readers consult when they need a
//! loaded type by qualified name. Writers publish whole generations: every
//! install builds a fresh [`Snapshot`] and swaps it in with one atomic store.
//!
//! # Invariants
//!
//! - Readers observe either the previous generation or the next one, never a
//!   mix (see `invariants::test_no_torn_generation`).
//! - A [`RegistryRef`] keeps its snapshot alive across later installs (see
//!   `invariants::test_snapshot_liveness_across_swap`).
//! - Each qualified name appears at most once per snapshot.

mod error;
mod runtime;
mod snapshot;

#[cfg(test)]
mod invariants;

pub use error::RegistryError;
pub use runtime::{InstallReport, TypeRegistry};
pub use snapshot::{RegistryRef, Snapshot, SnapshotGuard};

/// Types that can be stored in a [`TypeRegistry`].
pub trait RegistryEntry: Send + Sync + 'static {
	/// Qualified name used as the lookup key.
	fn name(&self) -> &str;
}
