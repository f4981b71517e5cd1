//! Notifications to connected sessions after a schema compile.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::trace;

/// Identifies a connected client session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionId(Arc<str>);

impl SessionId {
	pub fn new(id: impl Into<Arc<str>>) -> Self {
		Self(id.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for SessionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Event pushed to sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
	/// A compile reached the install step, or failed.
	SchemaCompiled {
		success: bool,
		generation: u64,
		/// Names whose definitions changed or were retired.
		types: Vec<Arc<str>>,
	},
}

impl EngineEvent {
	/// Wire form, e.g. `{"event":"schema_compiled","success":true,...}`.
	pub fn to_json(&self) -> String {
		serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
	}
}

/// Fan-out of engine events to sessions.
pub trait Broadcaster: Send + Sync {
	/// Delivers `event` to every session except `exclude`.
	fn publish(&self, event: &EngineEvent, exclude: Option<&SessionId>);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBroadcaster;

impl Broadcaster for NullBroadcaster {
	fn publish(&self, _event: &EngineEvent, _exclude: Option<&SessionId>) {}
}

/// In-process broadcaster delivering events over unbounded channels.
///
/// Listeners whose receiver was dropped are pruned on the next publish.
#[derive(Debug, Default)]
pub struct ListenerHub {
	listeners: Mutex<Vec<(SessionId, mpsc::UnboundedSender<EngineEvent>)>>,
}

impl ListenerHub {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn subscribe(&self, session: SessionId) -> mpsc::UnboundedReceiver<EngineEvent> {
		let (tx, rx) = mpsc::unbounded_channel();
		self.listeners.lock().push((session, tx));
		rx
	}

	pub fn listener_count(&self) -> usize {
		self.listeners.lock().len()
	}
}

impl Broadcaster for ListenerHub {
	fn publish(&self, event: &EngineEvent, exclude: Option<&SessionId>) {
		let mut listeners = self.listeners.lock();
		listeners.retain(|(session, tx)| {
			if exclude == Some(session) {
				return !tx.is_closed();
			}
			let delivered = tx.send(event.clone()).is_ok();
			if !delivered {
				trace!(session = %session, "broadcast.listener_closed");
			}
			delivered
		});
	}
}
