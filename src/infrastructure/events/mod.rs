use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum KeeperEvent {
    SessionAlive,
    SessionDead,
    SessionFailed,
    SessionCreated,
    SessionDestroyed,
    SessionsRestored,
    OrphansCleaned,
}

impl KeeperEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeeperEvent::SessionAlive => "pane-keeper:session-alive",
            KeeperEvent::SessionDead => "pane-keeper:session-dead",
            KeeperEvent::SessionFailed => "pane-keeper:session-failed",
            KeeperEvent::SessionCreated => "pane-keeper:session-created",
            KeeperEvent::SessionDestroyed => "pane-keeper:session-destroyed",
            KeeperEvent::SessionsRestored => "pane-keeper:sessions-restored",
            KeeperEvent::OrphansCleaned => "pane-keeper:orphans-cleaned",
        }
    }
}

/// Receiver for lifecycle notifications. Implementations must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: KeeperEvent, payload: serde_json::Value);
}

/// Default sink: writes every event to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn emit(&self, event: KeeperEvent, payload: serde_json::Value) {
        match event {
            KeeperEvent::SessionDead | KeeperEvent::SessionFailed => {
                warn!("{} {payload}", event.as_str())
            }
            _ => info!("{} {payload}", event.as_str()),
        }
    }
}

/// Collects events in memory; used by embedders that poll and by tests.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<(KeeperEvent, serde_json::Value)>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(KeeperEvent, serde_json::Value)> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events()
            .into_iter()
            .map(|(event, _)| event.as_str())
            .collect()
    }

    pub fn count(&self, event: KeeperEvent) -> usize {
        self.events()
            .iter()
            .filter(|(recorded, _)| *recorded == event)
            .count()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: KeeperEvent, payload: serde_json::Value) {
        if let Ok(mut events) = self.events.lock() {
            events.push((event, payload));
        }
    }
}

pub fn emit_event<T: Serialize>(
    sink: &dyn EventSink,
    event: KeeperEvent,
    payload: &T,
) -> Result<(), serde_json::Error> {
    let value = serde_json::to_value(payload)?;
    sink.emit(event, value);
    Ok(())
}

/// Like [`emit_event`], logging instead of returning a serialization failure.
pub fn emit_or_log<T: Serialize>(sink: &dyn EventSink, event: KeeperEvent, payload: &T) {
    if let Err(err) = emit_event(sink, event, payload) {
        debug!("Failed to serialize payload for {}: {err}", event.as_str());
    }
}
