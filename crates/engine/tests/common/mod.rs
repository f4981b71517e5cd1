#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use kiln_engine::{
	CompiledUnit, DiagnosticClass, Engine, EngineConfig, EngineParts, EntityKind, MemberModel, MemorySchema, RawDiagnostic, RepositoryError,
	SchemaEntity, SchemaRepository, SchemaService, SchemaTransaction, Severity, SourceBatch, SourceUnit, Toolchain, ToolchainOutput, TypeModel,
};
use parking_lot::Mutex;

const BASE_METHODS: &[&str] = &["toString", "hashCode"];

/// Fake compiler that checks one statement per line.
///
/// - `import <pkg>` and `type <T> uses <pkg>` need a known package
/// - `property <name>` and `method <name>` must be unique per unit
/// - `method <name>` must not redefine a base method
/// - `method <a> calls <b>` and `call <b>` need a method `<b>` in the unit
/// - `!<message>` is an error, `~<message>` a warning
pub struct LineToolchain {
	invocations: AtomicUsize,
	delay: Option<Duration>,
	classify: bool,
	packages: Vec<String>,
}

impl LineToolchain {
	pub fn new() -> Self {
		Self {
			invocations: AtomicUsize::new(0),
			delay: None,
			classify: false,
			packages: vec!["core".to_string()],
		}
	}

	pub fn with_delay(mut self, delay: Duration) -> Self {
		self.delay = Some(delay);
		self
	}

	/// Attach structured classes to diagnostics.
	pub fn classified(mut self) -> Self {
		self.classify = true;
		self
	}

	pub fn invocations(&self) -> usize {
		self.invocations.load(Ordering::SeqCst)
	}

	fn check(&self, unit: &SourceUnit, out: &mut Vec<RawDiagnostic>) {
		let methods: HashSet<&str> = unit
			.text()
			.lines()
			.filter_map(|line| match line.split_whitespace().collect::<Vec<_>>().as_slice() {
				["method", name, ..] => Some(*name),
				_ => None,
			})
			.collect();
		let mut defined = HashSet::new();

		for (index, line) in unit.text().lines().enumerate() {
			let line_no = index as u32 + 1;
			let trimmed = line.trim();

			if let Some(message) = trimmed.strip_prefix('~') {
				out.push(RawDiagnostic::new(Severity::Warning, unit.name().clone(), line_no, message));
				continue;
			}

			let mut findings: Vec<(Option<DiagnosticClass>, String)> = Vec::new();
			let words: Vec<&str> = trimmed.split_whitespace().collect();
			if let Some(message) = trimmed.strip_prefix('!') {
				findings.push((None, message.to_string()));
			} else {
				match words.as_slice() {
					["import", pkg] | ["type", _, "uses", pkg] => {
						if !self.packages.iter().any(|known| known.as_str() == *pkg) {
							findings.push((Some(DiagnosticClass::UnresolvedImport), format!("package {pkg} does not exist")));
						}
					}
					["property", name] | ["method", name, ..] => {
						if !defined.insert(*name) {
							findings.push((Some(DiagnosticClass::DuplicateDefinition), format!("duplicate definition of `{name}`")));
						} else if words[0] == "method" && BASE_METHODS.contains(name) {
							findings.push((Some(DiagnosticClass::SignatureClash), format!("{name}() clashes with base definition")));
						}
						if let ["method", _, "calls", target] = words.as_slice()
							&& !methods.contains(target)
						{
							findings.push((Some(DiagnosticClass::UnknownSymbol), format!("cannot find symbol {target}")));
						}
					}
					["call", target] => {
						if !methods.contains(target) {
							findings.push((Some(DiagnosticClass::UnknownSymbol), format!("cannot find symbol {target}")));
						}
					}
					_ => {}
				}
			}

			for (class, message) in findings {
				let mut diagnostic = RawDiagnostic::error(unit.name().clone(), line_no, message);
				if self.classify {
					diagnostic.class = class;
				}
				out.push(diagnostic);
			}
		}
	}
}

#[async_trait]
impl Toolchain for LineToolchain {
	fn name(&self) -> &str {
		"line"
	}

	async fn compile(&self, batch: &[SourceUnit], _siblings: &[Arc<CompiledUnit>]) -> kiln_engine::Result<ToolchainOutput> {
		self.invocations.fetch_add(1, Ordering::SeqCst);
		if let Some(delay) = self.delay {
			tokio::time::sleep(delay).await;
		}

		let mut output = ToolchainOutput::default();
		for unit in batch {
			self.check(unit, &mut output.diagnostics);
		}
		if !output.has_errors() {
			output.units = batch
				.iter()
				.map(|unit| CompiledUnit::new(unit.name().clone(), unit.text().to_string()))
				.collect();
		}
		Ok(output)
	}
}

/// Schema service handing out units without entity spans.
pub struct FixedSchema {
	units: Mutex<Vec<(String, String)>>,
}

impl FixedSchema {
	pub fn new(units: &[(&str, &str)]) -> Self {
		Self {
			units: Mutex::new(units.iter().map(|(name, text)| (name.to_string(), text.to_string())).collect()),
		}
	}
}

#[async_trait]
impl SchemaService for FixedSchema {
	async fn request_dirty_source_units(&self) -> kiln_engine::Result<SourceBatch> {
		let units = self
			.units
			.lock()
			.iter()
			.map(|(name, text)| SourceUnit::new(name.as_str(), text.as_str(), Vec::new()))
			.collect::<Result<Vec<_>, _>>()?;
		Ok(SourceBatch {
			units,
			removed: Vec::new(),
		})
	}

	fn notify_schema_changed(&self) {}

	fn blacklist(&self, _qualified_name: &str) -> bool {
		false
	}
}

/// Repository without entities.
struct EmptyTransaction;

impl SchemaTransaction for EmptyTransaction {
	fn find(&mut self, _kind: EntityKind, _key: &kiln_engine::EntityKey) -> Result<Option<SchemaEntity>, RepositoryError> {
		Ok(None)
	}

	fn delete(&mut self, entity: &SchemaEntity) -> Result<(), RepositoryError> {
		Err(RepositoryError::Vanished {
			kind: entity.kind,
			id: entity.id.to_string(),
		})
	}

	fn update(&mut self, entity: &SchemaEntity, _fields: &[(&str, &str)]) -> Result<(), RepositoryError> {
		Err(RepositoryError::Vanished {
			kind: entity.kind,
			id: entity.id.to_string(),
		})
	}

	fn commit(self: Box<Self>) -> Result<(), RepositoryError> {
		Ok(())
	}
}

impl SchemaRepository for FixedSchema {
	fn begin(&self) -> Result<Box<dyn SchemaTransaction + '_>, RepositoryError> {
		Ok(Box::new(EmptyTransaction))
	}
}

pub fn member(kind: EntityKind, id: &str, name: &str, source: &str) -> MemberModel {
	MemberModel {
		kind,
		id: Arc::from(id),
		name: Arc::from(name),
		source: source.to_string(),
	}
}

pub fn type_model(name: &str, members: Vec<MemberModel>) -> TypeModel {
	let short = name.rsplit('.').next().unwrap_or(name);
	TypeModel {
		name: Arc::from(name),
		header: format!("type {short}"),
		members,
	}
}

pub fn memory_engine(config: EngineConfig, toolchain: Arc<LineToolchain>, schema: Arc<MemorySchema>) -> Engine {
	Engine::new(config, EngineParts::new(toolchain, schema.clone(), schema)).unwrap()
}

pub fn fixed_engine(toolchain: Arc<LineToolchain>, schema: Arc<FixedSchema>) -> Engine {
	Engine::new(EngineConfig::default(), EngineParts::new(toolchain, schema.clone(), schema)).unwrap()
}
