//! Registry publication invariants.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use crate::{RegistryEntry, TypeRegistry};

struct TestType {
	name: &'static str,
	build: u64,
	drop_counter: Option<Arc<AtomicUsize>>,
}

impl TestType {
	fn new(name: &'static str, build: u64) -> Self {
		Self {
			name,
			build,
			drop_counter: None,
		}
	}
}

impl RegistryEntry for TestType {
	fn name(&self) -> &str {
		self.name
	}
}

impl Drop for TestType {
	fn drop(&mut self) {
		if let Some(counter) = &self.drop_counter {
			counter.fetch_add(1, Ordering::SeqCst);
		}
	}
}

/// Invariant: Entries stay alive while a reader pins the snapshot that holds them.
#[test]
fn test_snapshot_liveness_across_swap() {
	let drop_counter = Arc::new(AtomicUsize::new(0));
	let registry = TypeRegistry::new("test");

	registry
		.install(
			[TestType {
				name: "dynamic.Foo",
				build: 1,
				drop_counter: Some(Arc::clone(&drop_counter)),
			}],
			&[],
		)
		.unwrap();

	let pinned = registry.get("dynamic.Foo").unwrap();
	registry.install([TestType::new("dynamic.Foo", 2)], &[]).unwrap();

	assert_eq!(registry.get("dynamic.Foo").unwrap().build, 2);
	assert_eq!(pinned.build, 1);
	assert_eq!(pinned.generation(), 1);
	assert_eq!(drop_counter.load(Ordering::SeqCst), 0, "pinned entry must outlive the swap");

	drop(pinned);
	assert_eq!(drop_counter.load(Ordering::SeqCst), 1, "superseded entry is released with its last pin");
}

/// Invariant: A batch replacing a name never leaves a window where the name is absent,
/// and every snapshot holds entries from a single batch.
#[test]
fn test_no_torn_generation() {
	const NAMES: [&str; 3] = ["dynamic.Foo", "dynamic.Bar", "dynamic.Baz"];
	const INSTALLS: u64 = 500;

	let registry = Arc::new(TypeRegistry::new("test"));
	registry.install(NAMES.map(|name| TestType::new(name, 0)), &[]).unwrap();

	let done = Arc::new(AtomicBool::new(false));
	let readers: Vec<_> = (0..4)
		.map(|_| {
			let registry = Arc::clone(&registry);
			let done = Arc::clone(&done);
			thread::spawn(move || {
				let mut observed = 0usize;
				while !done.load(Ordering::Acquire) {
					assert!(registry.get("dynamic.Foo").is_some(), "Foo vanished between installs");

					let snap = registry.snapshot();
					let builds: Vec<u64> = NAMES.iter().map(|name| snap.get(name).unwrap().build).collect();
					assert!(builds.windows(2).all(|w| w[0] == w[1]), "torn generation observed: {builds:?}");
					observed += 1;
				}
				observed
			})
		})
		.collect();

	for build in 1..=INSTALLS {
		registry.install(NAMES.map(|name| TestType::new(name, build)), &[]).unwrap();
	}
	done.store(true, Ordering::Release);

	for reader in readers {
		reader.join().unwrap();
	}
	assert_eq!(registry.generation(), INSTALLS + 1);
	assert_eq!(registry.get("dynamic.Bar").unwrap().build, INSTALLS);
}

/// Invariant: Concurrent installers never lose each other's entries.
#[test]
fn test_no_lost_updates() {
	let registry = Arc::new(TypeRegistry::new("test"));
	let names: Vec<&'static str> = (0..16).map(|i| &*Box::leak(format!("dynamic.T{i}").into_boxed_str())).collect();

	let writers: Vec<_> = names
		.chunks(4)
		.map(|chunk| {
			let registry = Arc::clone(&registry);
			let chunk = chunk.to_vec();
			thread::spawn(move || {
				for name in chunk {
					registry.install([TestType::new(name, 1)], &[]).unwrap();
				}
			})
		})
		.collect();
	for writer in writers {
		writer.join().unwrap();
	}

	assert_eq!(registry.len(), names.len());
	assert_eq!(registry.generation(), names.len() as u64);
}
