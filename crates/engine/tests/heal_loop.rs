mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use common::{FixedSchema, LineToolchain, fixed_engine, member, memory_engine, type_model};
use kiln_engine::{
	CancellationToken, CompileContext, CompiledUnit, EngineConfig, EngineError, EngineEvent, EngineParts, EntityKind, HealState, HostResolver,
	ListenerHub, MemorySchema, RegistryEntry, RunOutcome, SessionId, TypeOrigin,
};
use pretty_assertions::assert_eq;

fn names(engine: &kiln_engine::Engine) -> Vec<String> {
	engine.registry().names().iter().map(|name| name.to_string()).collect()
}

#[tokio::test]
async fn valid_unit_installs_exactly_one_type() {
	let toolchain = Arc::new(LineToolchain::new());
	let schema = Arc::new(MemorySchema::new());
	schema.upsert_type(type_model("dynamic.Invoice", vec![member(EntityKind::Property, "p1", "total", "property total")]));
	let engine = memory_engine(EngineConfig::default(), toolchain.clone(), schema);

	let report = engine.run(&CompileContext::new()).await.unwrap();

	assert!(report.success);
	assert_eq!(report.cycles, 1);
	assert_eq!(report.loaded_types, vec![Arc::<str>::from("dynamic.Invoice")]);
	assert_eq!(names(&engine), ["dynamic.Invoice"]);
	assert!(engine.sources().lock().compiled_hash("dynamic.Invoice").is_some());
	assert_eq!(engine.state(), HealState::Succeeded);
	assert_eq!(toolchain.invocations(), 1);
}

#[tokio::test]
async fn duplicate_definition_heals_in_one_cycle() {
	let toolchain = Arc::new(LineToolchain::new());
	let schema = Arc::new(MemorySchema::new());
	schema.upsert_type(type_model(
		"dynamic.Invoice",
		vec![
			member(EntityKind::Property, "p1", "total", "property total"),
			member(EntityKind::Property, "p2", "total", "property total"),
		],
	));
	let engine = memory_engine(EngineConfig::default(), toolchain.clone(), schema.clone());

	let report = engine.run(&CompileContext::new()).await.unwrap();

	assert!(report.success);
	assert_eq!(report.cycles, 2);
	assert!(report.diagnostics.is_empty());
	assert_eq!(report.repairs.len(), 1);
	assert_eq!(report.repairs[0].handler, "duplicate-definition");
	assert_eq!(&*report.repairs[0].target, "p2");

	let members = schema.type_model("dynamic.Invoice").unwrap().members;
	assert_eq!(members.len(), 1);
	assert_eq!(&*members[0].id, "p1");
	assert!(engine.registry().contains("dynamic.Invoice"));
	assert_eq!(schema.change_notifications(), 1);
	assert_eq!(toolchain.invocations(), 2);
}

#[tokio::test]
async fn unrecognized_error_is_reported_with_raw_message() {
	let toolchain = Arc::new(LineToolchain::new());
	let schema = Arc::new(FixedSchema::new(&[("dynamic.Broken", "type Broken\n!completely unrelated syntax error\n")]));
	let engine = fixed_engine(toolchain.clone(), schema);

	let report = engine.run(&CompileContext::new()).await.unwrap();

	assert!(!report.success);
	assert!(!report.exhausted);
	assert_eq!(report.cycles, 1);
	assert_eq!(report.diagnostics.len(), 1);
	assert_eq!(report.diagnostics[0].message, "completely unrelated syntax error");
	assert_eq!(report.diagnostics[0].entity, None);
	assert!(engine.registry().is_empty());
	assert_eq!(engine.state(), HealState::Unrecoverable);
	assert_eq!(toolchain.invocations(), 1);
}

#[tokio::test]
async fn identical_content_stages_no_work() {
	let toolchain = Arc::new(LineToolchain::new());
	let schema = Arc::new(FixedSchema::new(&[("dynamic.Foo", "type Foo\n")]));
	let engine = fixed_engine(toolchain.clone(), schema);
	let ctx = CompileContext::new();

	let first = engine.run(&ctx).await.unwrap();
	let second = engine.run(&ctx).await.unwrap();

	assert_eq!(first.loaded_types.len(), 1);
	assert!(second.success);
	assert!(second.loaded_types.is_empty());
	assert_eq!(second.generation, first.generation);
	assert_eq!(toolchain.invocations(), 1);
}

#[tokio::test]
async fn unhandled_failure_preserves_registry_generation() {
	let toolchain = Arc::new(LineToolchain::new());
	let schema = Arc::new(MemorySchema::new());
	schema.upsert_type(type_model("dynamic.Foo", Vec::new()));
	schema.upsert_type(type_model("dynamic.Bar", Vec::new()));
	let engine = memory_engine(EngineConfig::default(), toolchain, schema.clone());
	let ctx = CompileContext::new();
	engine.run(&ctx).await.unwrap();

	let before = engine.registry().snapshot();
	schema.upsert_type(type_model(
		"dynamic.Foo",
		vec![member(EntityKind::Method, "m1", "run", "method run\n  !completely unrelated syntax error")],
	));
	let report = engine.run(&ctx).await.unwrap();
	let after = engine.registry().snapshot();

	assert!(!report.success);
	assert_eq!(after.generation(), before.generation());
	assert_eq!(after.names(), before.names());
	for entry in before.iter() {
		assert!(Arc::ptr_eq(entry, after.get(entry.name()).unwrap()));
	}
	assert_eq!(engine.compiled().get("dynamic.Foo").unwrap().payload().as_ref(), b"type Foo\n");
}

#[tokio::test]
async fn repeated_healing_reaches_a_fixed_point() {
	let toolchain = Arc::new(LineToolchain::new());
	let schema = Arc::new(MemorySchema::new());
	schema.upsert_type(type_model(
		"dynamic.Order",
		vec![
			member(EntityKind::Import, "i1", "ledger", "import ledger"),
			member(EntityKind::Import, "i2", "core", "import core"),
			member(EntityKind::Property, "p1", "total", "property total"),
			member(EntityKind::Property, "p2", "total", "property total"),
			member(EntityKind::Method, "m1", "submit", "method submit calls audit"),
			member(EntityKind::Method, "m2", "toString", "method toString"),
			member(EntityKind::Method, "m3", "close", "method close\n  call submit"),
		],
	));
	let engine = memory_engine(EngineConfig::default(), toolchain.clone(), schema.clone());
	let ctx = CompileContext::new();

	let report = engine.run(&ctx).await.unwrap();
	assert!(report.success);
	let mut repaired: Vec<&str> = report.repairs.iter().map(|repair| &*repair.target).collect();
	repaired.sort_unstable();
	assert_eq!(repaired, ["i1", "m1", "m2", "m3", "p2"]);

	// Removing `submit` breaks `close`, which the next cycle repairs too.
	assert_eq!(report.cycles, 3);
	let ids: Vec<String> = schema.type_model("dynamic.Order").unwrap().members.iter().map(|m| m.id.to_string()).collect();
	assert_eq!(ids, ["i2", "p1"]);

	let again = engine.run(&ctx).await.unwrap();
	assert!(again.success);
	assert!(again.repairs.is_empty());
	assert_eq!(again.cycles, 1);
}

#[tokio::test]
async fn structured_classes_drive_the_same_repairs() {
	let toolchain = Arc::new(LineToolchain::new().classified());
	let schema = Arc::new(MemorySchema::new());
	schema.upsert_type(type_model(
		"dynamic.Order",
		vec![
			member(EntityKind::Property, "p1", "total", "property total"),
			member(EntityKind::Method, "m1", "total", "method total"),
		],
	));
	let engine = memory_engine(EngineConfig::default(), toolchain, schema.clone());

	let report = engine.run(&CompileContext::new()).await.unwrap();

	assert!(report.success);
	assert_eq!(report.repairs.len(), 1);
	assert_eq!(report.repairs[0].kind, EntityKind::Method);
}

#[tokio::test]
async fn broken_type_header_is_blacklisted_and_retired() {
	let toolchain = Arc::new(LineToolchain::new());
	let schema = Arc::new(MemorySchema::new());
	schema.upsert_type(type_model("dynamic.Foo", Vec::new()));
	schema.upsert_type(type_model("dynamic.Ghost", Vec::new()));
	let engine = memory_engine(EngineConfig::default(), toolchain, schema.clone());
	let ctx = CompileContext::new();
	engine.run(&ctx).await.unwrap();

	let mut ghost = type_model("dynamic.Ghost", Vec::new());
	ghost.header = "type Ghost uses phantom".to_string();
	schema.upsert_type(ghost);
	let report = engine.run(&ctx).await.unwrap();

	assert!(report.success);
	assert_eq!(report.repairs[0].handler, "unresolved-import");
	assert_eq!(report.retired_types, vec![Arc::<str>::from("dynamic.Ghost")]);
	assert!(schema.is_blacklisted("dynamic.Ghost"));
	assert_eq!(names(&engine), ["dynamic.Foo"]);
	assert!(!engine.compiled().contains("dynamic.Ghost"));
}

#[tokio::test]
async fn removed_types_are_retired() {
	let toolchain = Arc::new(LineToolchain::new());
	let schema = Arc::new(MemorySchema::new());
	schema.upsert_type(type_model("dynamic.Foo", Vec::new()));
	schema.upsert_type(type_model("dynamic.Bar", Vec::new()));
	let engine = memory_engine(EngineConfig::default(), toolchain.clone(), schema.clone());
	let ctx = CompileContext::new();
	engine.run(&ctx).await.unwrap();

	assert!(schema.remove_type("dynamic.Bar"));
	let report = engine.run(&ctx).await.unwrap();

	assert!(report.success);
	assert_eq!(report.retired_types, vec![Arc::<str>::from("dynamic.Bar")]);
	assert_eq!(names(&engine), ["dynamic.Foo"]);
	assert_eq!(toolchain.invocations(), 1);
}

#[tokio::test]
async fn removal_survives_a_healing_cycle() {
	let toolchain = Arc::new(LineToolchain::new());
	let schema = Arc::new(MemorySchema::new());
	schema.upsert_type(type_model("dynamic.Foo", Vec::new()));
	schema.upsert_type(type_model("dynamic.Bar", Vec::new()));
	let engine = memory_engine(EngineConfig::default(), toolchain, schema.clone());
	let ctx = CompileContext::new();
	engine.run(&ctx).await.unwrap();

	assert!(schema.remove_type("dynamic.Bar"));
	schema.upsert_type(type_model(
		"dynamic.Foo",
		vec![
			member(EntityKind::Property, "p1", "a", "property a"),
			member(EntityKind::Property, "p2", "a", "property a"),
		],
	));
	let report = engine.run(&ctx).await.unwrap();

	assert!(report.success);
	assert_eq!(report.cycles, 2);
	assert_eq!(report.retired_types, vec![Arc::<str>::from("dynamic.Bar")]);
	assert_eq!(names(&engine), ["dynamic.Foo"]);
	assert!(!engine.compiled().contains("dynamic.Bar"));
}

#[tokio::test]
async fn removal_survives_an_unrecoverable_run() {
	let toolchain = Arc::new(LineToolchain::new());
	let schema = Arc::new(MemorySchema::new());
	schema.upsert_type(type_model("dynamic.Foo", Vec::new()));
	schema.upsert_type(type_model("dynamic.Bar", Vec::new()));
	let engine = memory_engine(EngineConfig::default(), toolchain, schema.clone());
	let ctx = CompileContext::new();
	engine.run(&ctx).await.unwrap();

	assert!(schema.remove_type("dynamic.Bar"));
	schema.upsert_type(type_model("dynamic.Foo", vec![member(EntityKind::Property, "p1", "a", "!broken")]));
	let failed = engine.run(&ctx).await.unwrap();
	assert!(!failed.success);
	assert_eq!(names(&engine), ["dynamic.Bar", "dynamic.Foo"]);

	schema.upsert_type(type_model("dynamic.Foo", Vec::new()));
	let fixed = engine.run(&ctx).await.unwrap();

	assert!(fixed.success);
	assert_eq!(fixed.retired_types, vec![Arc::<str>::from("dynamic.Bar")]);
	assert_eq!(names(&engine), ["dynamic.Foo"]);
}

#[tokio::test]
async fn blacklist_retirement_survives_a_failed_cycle() {
	let toolchain = Arc::new(LineToolchain::new());
	let schema = Arc::new(MemorySchema::new());
	schema.upsert_type(type_model("dynamic.Foo", Vec::new()));
	schema.upsert_type(type_model("dynamic.Ghost", Vec::new()));
	let engine = memory_engine(EngineConfig::default(), toolchain, schema.clone());
	let ctx = CompileContext::new();
	engine.run(&ctx).await.unwrap();

	let mut ghost = type_model("dynamic.Ghost", Vec::new());
	ghost.header = "type Ghost uses phantom".to_string();
	schema.upsert_type(ghost);
	schema.upsert_type(type_model("dynamic.Foo", vec![member(EntityKind::Property, "p1", "a", "!broken")]));
	let failed = engine.run(&ctx).await.unwrap();

	assert!(!failed.success);
	assert_eq!(failed.cycles, 2);
	assert!(schema.is_blacklisted("dynamic.Ghost"));

	schema.upsert_type(type_model("dynamic.Foo", Vec::new()));
	let fixed = engine.run(&ctx).await.unwrap();

	assert!(fixed.success);
	assert_eq!(fixed.retired_types, vec![Arc::<str>::from("dynamic.Ghost")]);
	assert_eq!(names(&engine), ["dynamic.Foo"]);
	assert!(!engine.compiled().contains("dynamic.Ghost"));
}

#[tokio::test]
async fn cycle_bound_reports_exhaustion() {
	let toolchain = Arc::new(LineToolchain::new());
	let schema = Arc::new(MemorySchema::new());
	schema.upsert_type(type_model(
		"dynamic.Foo",
		vec![
			member(EntityKind::Property, "p1", "a", "property a"),
			member(EntityKind::Property, "p2", "a", "property a"),
		],
	));
	let config = EngineConfig {
		max_heal_cycles: 1,
		..EngineConfig::default()
	};
	let engine = memory_engine(config, toolchain.clone(), schema);

	let report = engine.run(&CompileContext::new()).await.unwrap();

	assert!(!report.success);
	assert!(report.exhausted);
	assert_eq!(report.cycles, 1);
	assert_eq!(report.repairs.len(), 1);
	assert_eq!(engine.state(), HealState::Unrecoverable);
	assert_eq!(toolchain.invocations(), 1);
}

#[tokio::test]
async fn broadcast_skips_originating_session() {
	let hub = Arc::new(ListenerHub::new());
	let editor = SessionId::new("editor");
	let mut own = hub.subscribe(editor.clone());
	let mut other = hub.subscribe(SessionId::new("viewer"));

	let schema = Arc::new(MemorySchema::new());
	schema.upsert_type(type_model("dynamic.Foo", Vec::new()));
	let parts = EngineParts::new(Arc::new(LineToolchain::new()), schema.clone(), schema).with_broadcaster(hub);
	let engine = kiln_engine::Engine::new(EngineConfig::default(), parts).unwrap();

	engine.run(&CompileContext::from_session(editor)).await.unwrap();

	assert!(own.try_recv().is_err());
	let event = other.try_recv().unwrap();
	assert!(event.to_json().starts_with(r#"{"event":"schema_compiled","success":true"#));
	assert!(matches!(event, EngineEvent::SchemaCompiled { generation: 1, .. }));
}

#[tokio::test]
async fn request_during_active_run_is_coalesced() {
	let toolchain = Arc::new(LineToolchain::new().with_delay(Duration::from_millis(200)));
	let schema = Arc::new(MemorySchema::new());
	schema.upsert_type(type_model("dynamic.Foo", Vec::new()));
	let engine = Arc::new(memory_engine(EngineConfig::default(), toolchain.clone(), schema.clone()));

	let first = tokio::spawn({
		let engine = engine.clone();
		async move { engine.request_compile(&CompileContext::new()).await }
	});
	tokio::time::sleep(Duration::from_millis(50)).await;

	schema.upsert_type(type_model("dynamic.Bar", Vec::new()));
	let second = engine.request_compile(&CompileContext::new()).await.unwrap();
	assert_eq!(second, RunOutcome::Coalesced);

	let RunOutcome::Completed(report) = first.await.unwrap().unwrap() else {
		panic!("active caller must complete");
	};
	assert!(report.success);
	assert_eq!(report.loaded_types, vec![Arc::<str>::from("dynamic.Bar")]);
	assert_eq!(names(&engine), ["dynamic.Bar", "dynamic.Foo"]);
	assert_eq!(toolchain.invocations(), 2);
}

#[tokio::test]
async fn toolchain_timeout_restages_the_batch() {
	let toolchain = Arc::new(LineToolchain::new().with_delay(Duration::from_secs(3)));
	let schema = Arc::new(MemorySchema::new());
	schema.upsert_type(type_model("dynamic.Foo", Vec::new()));
	let config = EngineConfig {
		toolchain_timeout_secs: 1,
		..EngineConfig::default()
	};
	let engine = memory_engine(config, toolchain, schema);

	let err = engine.run(&CompileContext::new()).await.unwrap_err();

	assert!(matches!(err, EngineError::ToolchainTimeout(_)));
	assert_eq!(engine.state(), HealState::Idle);
	assert!(engine.registry().is_empty());
	assert!(engine.sources().lock().is_dirty("dynamic.Foo"));
}

#[tokio::test]
async fn cancellation_stops_before_install() {
	let toolchain = Arc::new(LineToolchain::new().with_delay(Duration::from_millis(300)));
	let schema = Arc::new(MemorySchema::new());
	schema.upsert_type(type_model("dynamic.Foo", Vec::new()));
	let engine = memory_engine(EngineConfig::default(), toolchain, schema);

	let cancel = CancellationToken::new();
	let ctx = CompileContext::new().with_cancel(cancel.clone());
	tokio::spawn(async move {
		tokio::time::sleep(Duration::from_millis(50)).await;
		cancel.cancel();
	});

	let err = engine.run(&ctx).await.unwrap_err();

	assert!(matches!(err, EngineError::Cancelled));
	assert!(engine.registry().is_empty());
	assert!(engine.compiled().is_empty());
}

struct Host;

impl HostResolver for Host {
	fn resolve(&self, name: &str) -> Option<Arc<CompiledUnit>> {
		(name == "host.Text").then(|| Arc::new(CompiledUnit::new(name, "native")))
	}
}

#[tokio::test]
async fn instantiate_checks_store_and_falls_back_to_host() {
	let schema = Arc::new(MemorySchema::new());
	schema.upsert_type(type_model("dynamic.Foo", Vec::new()));
	let parts = EngineParts::new(Arc::new(LineToolchain::new()), schema.clone(), schema).with_host(Arc::new(Host));
	let engine = kiln_engine::Engine::new(EngineConfig::default(), parts).unwrap();
	engine.run(&CompileContext::new()).await.unwrap();

	assert_eq!(engine.instantiate("dynamic.Foo").unwrap().origin(), TypeOrigin::Dynamic);
	assert_eq!(engine.instantiate("host.Text").unwrap().origin(), TypeOrigin::Host);
	assert!(matches!(engine.instantiate("dynamic.Nope"), Err(EngineError::TypeNotFound(_))));

	engine.compiled().remove("dynamic.Foo");
	assert!(matches!(engine.instantiate("dynamic.Foo"), Err(EngineError::LoaderInconsistency { .. })));
}

#[tokio::test]
async fn reset_forces_full_recompile() {
	let toolchain = Arc::new(LineToolchain::new());
	let schema = Arc::new(FixedSchema::new(&[("dynamic.Foo", "type Foo\n")]));
	let engine = fixed_engine(toolchain.clone(), schema);
	let ctx = CompileContext::new();
	let first = engine.run(&ctx).await.unwrap();

	engine.reset().await;
	assert!(engine.registry().is_empty());
	assert!(engine.compiled().is_empty());
	assert_eq!(engine.state(), HealState::Idle);

	let second = engine.run(&ctx).await.unwrap();
	assert_eq!(second.loaded_types.len(), 1);
	assert!(second.generation > first.generation);
	assert_eq!(toolchain.invocations(), 2);
}

#[tokio::test]
async fn process_loader_resolves_compiled_types() {
	let schema = Arc::new(MemorySchema::new());
	schema.upsert_type(type_model("dynamic.Slot", Vec::new()));
	let engine = memory_engine(EngineConfig::default(), Arc::new(LineToolchain::new()), schema);
	engine.install_process_loader();

	assert!(kiln_engine::resolve_type("dynamic.Slot").is_none());
	engine.run(&CompileContext::new()).await.unwrap();
	assert_eq!(kiln_engine::resolve_type("dynamic.Slot").unwrap().name(), "dynamic.Slot");

	kiln_engine::uninstall_process_loader();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn readers_never_observe_a_missing_type_during_recompiles() {
	let schema = Arc::new(MemorySchema::new());
	schema.upsert_type(type_model("dynamic.Foo", Vec::new()));
	let engine = Arc::new(memory_engine(EngineConfig::default(), Arc::new(LineToolchain::new()), schema.clone()));
	let ctx = CompileContext::new();
	engine.run(&ctx).await.unwrap();

	let stop = Arc::new(AtomicBool::new(false));
	let reader = std::thread::spawn({
		let engine = engine.clone();
		let stop = stop.clone();
		move || {
			while !stop.load(Ordering::Relaxed) {
				assert!(engine.registry().contains("dynamic.Foo"));
				assert!(engine.instantiate("dynamic.Foo").is_ok());
			}
		}
	});

	for revision in 0..25 {
		let mut model = type_model("dynamic.Foo", Vec::new());
		model.members.push(member(EntityKind::Property, "p1", "rev", &format!("property rev{revision}")));
		schema.upsert_type(model);
		let report = engine.run(&ctx).await.unwrap();
		assert_eq!(report.loaded_types.len(), 1);
	}

	stop.store(true, Ordering::Relaxed);
	reader.join().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn retire_and_reset_never_surface_as_loader_inconsistency() {
	let schema = Arc::new(MemorySchema::new());
	for i in 0..50 {
		schema.upsert_type(type_model(&format!("dynamic.T{i}"), Vec::new()));
	}
	let engine = Arc::new(memory_engine(EngineConfig::default(), Arc::new(LineToolchain::new()), schema.clone()));
	let ctx = CompileContext::new();
	engine.run(&ctx).await.unwrap();

	let stop = Arc::new(AtomicBool::new(false));
	let inconsistencies = Arc::new(AtomicUsize::new(0));
	let reader = std::thread::spawn({
		let engine = engine.clone();
		let stop = stop.clone();
		let inconsistencies = inconsistencies.clone();
		move || {
			while !stop.load(Ordering::Relaxed) {
				if let Err(EngineError::LoaderInconsistency { .. }) = engine.instantiate("dynamic.T7") {
					inconsistencies.fetch_add(1, Ordering::Relaxed);
				}
			}
		}
	});

	for _ in 0..40 {
		assert!(schema.remove_type("dynamic.T7"));
		engine.run(&ctx).await.unwrap();
		schema.upsert_type(type_model("dynamic.T7", Vec::new()));
		engine.run(&ctx).await.unwrap();
		engine.reset().await;
		engine.run(&ctx).await.unwrap();
	}

	stop.store(true, Ordering::Relaxed);
	reader.join().unwrap();
	assert_eq!(inconsistencies.load(Ordering::Relaxed), 0);
	assert!(engine.registry().contains("dynamic.T7"));
}
