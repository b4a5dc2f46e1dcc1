use crate::error::{ServiceResult, StepServiceError};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Event name the host listens for on its device-event emitter
pub const STEP_COUNTER_UPDATE: &str = "stepCounterUpdate";

/// Point-in-time session state sent to the host.
///
/// Key casing matches what the JS side reads off the event payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub steps: f64,
    pub distance: f64,
    pub start_date: i64,
    pub end_date: i64,
    pub counter_type: String,
    pub calories: f64,
    pub daily_goal: i32,
}

impl Snapshot {
    pub fn to_json(&self) -> ServiceResult<String> {
        serde_json::to_string(self)
            .map_err(|e| StepServiceError::Internal(format!("snapshot serialization: {e}")))
    }
}

/// Primary emission path into the host's event channel
pub trait EventSink: Send {
    fn emit(&mut self, event: &str, snapshot: &Snapshot) -> ServiceResult<()>;
}

/// Secondary direct-call path used when the primary sink faults
pub trait FallbackListener: Send {
    fn on_listener_updated(&mut self, snapshot: &Snapshot) -> ServiceResult<()>;
}

/// Outcome of one publish attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Primary sink accepted the event
    Emitted,
    /// Primary faulted, fallback accepted the identical snapshot
    Fallback,
    /// Both paths faulted; the update is logged and dropped
    Dropped,
}

/// Two-tier delivery policy: emit, fall back once, then drop.
///
/// No retry and no queueing; one publish per sensor sample, and a dropped
/// update is simply superseded by the next one.
pub struct Republisher {
    sink: Box<dyn EventSink>,
    fallback: Option<Box<dyn FallbackListener>>,
}

impl Republisher {
    pub fn new(sink: Box<dyn EventSink>) -> Self {
        Self {
            sink,
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, fallback: Box<dyn FallbackListener>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn publish(&mut self, snapshot: &Snapshot) -> Delivery {
        match self.sink.emit(STEP_COUNTER_UPDATE, snapshot) {
            Ok(()) => Delivery::Emitted,
            Err(emit_err) => {
                debug!("primary emission failed: {emit_err}");
                match self.fallback.as_mut() {
                    Some(listener) => match listener.on_listener_updated(snapshot) {
                        Ok(()) => Delivery::Fallback,
                        Err(fallback_err) => {
                            warn!(
                                "dropping update after fallback failure: {emit_err}; {fallback_err}"
                            );
                            Delivery::Dropped
                        }
                    },
                    None => {
                        warn!("dropping update, no fallback listener: {emit_err}");
                        Delivery::Dropped
                    }
                }
            }
        }
    }
}

/// Undrained payloads beyond this fail the emit instead of coalescing
pub const PENDING_EVENT_CAPACITY: usize = 32;

/// JNI-side sink: serializes snapshots and queues them for the host to drain.
///
/// The host owns the real JS event emitter; it pulls pending payloads after
/// each push and forwards them in order. Clones share one queue so the
/// bridge can keep a drain handle while the republisher owns the sink. A
/// full queue fails the emit, which the republisher reports as a fallback
/// or drop rather than overwriting an undelivered update.
#[derive(Debug, Clone)]
pub struct HostEventSink {
    pending: std::sync::Arc<crossbeam::queue::ArrayQueue<String>>,
}

impl HostEventSink {
    pub fn new() -> Self {
        Self {
            pending: std::sync::Arc::new(crossbeam::queue::ArrayQueue::new(
                PENDING_EVENT_CAPACITY,
            )),
        }
    }

    /// Take the oldest undelivered payload, if any
    pub fn take_pending(&self) -> Option<String> {
        self.pending.pop()
    }

    /// Discard every undelivered payload
    pub fn clear(&self) {
        while self.pending.pop().is_some() {}
    }
}

impl Default for HostEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for HostEventSink {
    fn emit(&mut self, _event: &str, snapshot: &Snapshot) -> ServiceResult<()> {
        let payload = snapshot.to_json()?;
        self.pending
            .push(payload)
            .map_err(|_| StepServiceError::EmitFailed("pending event queue full".to_string()))
    }
}
