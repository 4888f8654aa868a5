//! Progress events emitted by backup jobs

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Info,
    Success,
    Warning,
    Error,
}

/// One human-readable step of a job, `{status, message}` on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub status: EventStatus,
    pub message: String,
}

impl ProgressEvent {
    pub fn new(status: EventStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(EventStatus::Info, message)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(EventStatus::Success, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(EventStatus::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(EventStatus::Error, message)
    }
}

type Listener = dyn Fn(&ProgressEvent) + Send + Sync;

/// Ordered destination of a job's progress events.
///
/// Each event is logged under the device id before it reaches the listener.
#[derive(Clone)]
pub struct ProgressSink {
    device_id: Arc<str>,
    listener: Arc<Listener>,
}

impl ProgressSink {
    pub fn new<F>(device_id: &str, listener: F) -> Self
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        Self {
            device_id: Arc::from(device_id),
            listener: Arc::new(listener),
        }
    }

    /// A sink that only logs
    pub fn logging(device_id: &str) -> Self {
        Self::new(device_id, |_| {})
    }

    /// A sink recording every event, handy for callers that inspect them afterwards
    pub fn recording(device_id: &str) -> (Self, Arc<Mutex<Vec<ProgressEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let store = Arc::clone(&events);
        let sink = Self::new(device_id, move |event| {
            if let Ok(mut guard) = store.lock() {
                guard.push(event.clone());
            }
        });
        (sink, events)
    }

    pub fn emit(&self, event: ProgressEvent) {
        let device_id = &*self.device_id;
        match event.status {
            EventStatus::Info | EventStatus::Success => {
                tracing::info!(device_id, status = ?event.status, "{}", event.message)
            },
            EventStatus::Warning => tracing::warn!(device_id, "{}", event.message),
            EventStatus::Error => tracing::error!(device_id, "{}", event.message),
        }
        (self.listener)(&event);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(ProgressEvent::info(message));
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.emit(ProgressEvent::warning(message));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(ProgressEvent::error(message));
    }

    pub fn success(&self, message: impl Into<String>) {
        self.emit(ProgressEvent::success(message));
    }
}

impl std::fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressSink")
            .field("device_id", &self.device_id)
            .finish_non_exhaustive()
    }
}
