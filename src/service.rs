use crate::counter::StepCounter;
use crate::emitter::{Delivery, Republisher, Snapshot};
use crate::error::{ServiceResult, StepServiceError};
use crate::sensor_receiver::{SensorEvent, SensorSource};
use crate::session::{SessionPatch, StepSession};
use chrono::Utc;
use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, info, warn};

/// Pending patches beyond this are rejected, not queued further
const PATCH_QUEUE_CAPACITY: usize = 16;

/// Service lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Constructed, listener not yet registered
    Created,
    /// Listener registered, receiving events
    Registered,
    /// Listener unregistered; terminal
    Stopped,
}

/// The background listen service.
///
/// Owns the session state and everything around it: the injected sensor
/// source, the conversion hook, the bounded patch channel that replaces the
/// original's broadcast receiver, and the two-tier republisher. All entry
/// points run on the host's callback thread; the host serializes them.
pub struct SensorListenService {
    source: Box<dyn SensorSource>,
    counter: Box<dyn StepCounter>,
    session: StepSession,
    republisher: Republisher,
    patch_tx: Sender<SessionPatch>,
    patch_rx: Receiver<SessionPatch>,
    state: ServiceState,
}

impl SensorListenService {
    pub fn new(
        source: Box<dyn SensorSource>,
        counter: Box<dyn StepCounter>,
        republisher: Republisher,
    ) -> Self {
        let (patch_tx, patch_rx) = bounded(PATCH_QUEUE_CAPACITY);
        Self {
            source,
            counter,
            session: StepSession::new(),
            republisher,
            patch_tx,
            patch_rx,
            state: ServiceState::Created,
        }
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    pub fn session(&self) -> &StepSession {
        &self.session
    }

    /// Current session snapshot carrying the active counter label
    pub fn snapshot(&self) -> Snapshot {
        self.session.snapshot(self.counter.label())
    }

    /// Resolve the default sensor and register the listener.
    ///
    /// A device without the required sensor fails fast here; the caller is
    /// expected to terminate the service, there is no retry.
    pub fn start(&mut self) -> ServiceResult<()> {
        match self.state {
            ServiceState::Registered => return Err(StepServiceError::AlreadyRunning),
            ServiceState::Stopped => {
                return Err(StepServiceError::InvalidState(
                    "service already stopped".to_string(),
                ))
            }
            ServiceState::Created => {}
        }

        let sensor_type = self.counter.sensor_type();
        let handle = self
            .source
            .resolve_default(sensor_type)
            .ok_or_else(|| StepServiceError::SensorNotFound(sensor_type.name().to_string()))?;

        self.source.register_listener(&handle, self.counter.delay())?;
        self.session.open_window();
        self.state = ServiceState::Registered;
        info!(
            "registered {} listener at delay {:?}",
            self.counter.label(),
            self.counter.delay()
        );
        Ok(())
    }

    /// Unregister the listener and stop accepting events or patches
    pub fn stop(&mut self) -> ServiceResult<()> {
        if self.state != ServiceState::Registered {
            return Err(StepServiceError::NotRunning);
        }
        self.source.unregister_listener()?;
        self.state = ServiceState::Stopped;
        info!("unregistered {} listener", self.counter.label());
        Ok(())
    }

    /// One raw sample from the host's sensor dispatcher.
    ///
    /// Events for anything other than the accelerometer or the hardware step
    /// counter are ignored without touching the session. Every processed
    /// sample produces exactly one publish; there is no batching.
    pub fn on_sensor_changed(&mut self, event: &SensorEvent) -> Option<Delivery> {
        if self.state != ServiceState::Registered {
            debug!("dropping event, service not registered");
            return None;
        }
        if !event.sensor_type.is_recognized() {
            debug!("ignoring event from sensor {}", event.sensor_type.raw());
            return None;
        }

        self.drain_patches();

        let steps = self
            .counter
            .update_current_steps(event.timestamp_ns, &event.values);
        // Event timestamps are boot-relative; the window is epoch millis
        self.session.record_steps(steps, Utc::now().timestamp_millis());
        Some(self.publish())
    }

    /// Accuracy change callback from the host; nothing to do with it
    pub fn on_accuracy_changed(&mut self, accuracy: i32) {
        debug!("sensor accuracy changed to {accuracy}");
    }

    /// Sender half of the external refresh channel.
    ///
    /// Patches queued here are folded in before the next sensor event, last
    /// writer wins.
    pub fn patch_sender(&self) -> Sender<SessionPatch> {
        self.patch_tx.clone()
    }

    /// Queue a patch without holding a sender
    pub fn queue_patch(&self, patch: SessionPatch) -> ServiceResult<()> {
        self.patch_tx.try_send(patch).map_err(|err| match err {
            TrySendError::Full(_) => {
                StepServiceError::InvalidState("patch queue full".to_string())
            }
            TrySendError::Disconnected(_) => StepServiceError::ChannelClosed,
        })
    }

    /// Apply a patch immediately and republish the result
    pub fn apply_patch(&mut self, patch: &SessionPatch) -> ServiceResult<Delivery> {
        if self.state == ServiceState::Stopped {
            return Err(StepServiceError::NotRunning);
        }
        self.session.apply_patch(patch);
        Ok(self.publish())
    }

    fn drain_patches(&mut self) {
        while let Ok(patch) = self.patch_rx.try_recv() {
            self.session.apply_patch(&patch);
        }
    }

    fn publish(&mut self) -> Delivery {
        let snapshot = self.session.snapshot(self.counter.label());
        let delivery = self.republisher.publish(&snapshot);
        if delivery == Delivery::Dropped {
            warn!("step update dropped at {} steps", snapshot.steps);
        }
        delivery
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::{EventSink, FallbackListener};
    use crate::sensor_receiver::{SensorDelay, SensorHandle, SensorType};
    use approx::assert_relative_eq;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct MockSourceState {
        has_sensor: bool,
        registered: bool,
        delay: Option<SensorDelay>,
    }

    #[derive(Clone)]
    struct MockSource(Arc<Mutex<MockSourceState>>);

    impl MockSource {
        fn new(has_sensor: bool) -> Self {
            Self(Arc::new(Mutex::new(MockSourceState {
                has_sensor,
                ..MockSourceState::default()
            })))
        }
    }

    impl SensorSource for MockSource {
        fn resolve_default(&mut self, sensor_type: SensorType) -> Option<SensorHandle> {
            if self.0.lock().unwrap().has_sensor {
                Some(SensorHandle { sensor_type })
            } else {
                None
            }
        }

        fn register_listener(
            &mut self,
            _handle: &SensorHandle,
            delay: SensorDelay,
        ) -> ServiceResult<()> {
            let mut state = self.0.lock().unwrap();
            state.registered = true;
            state.delay = Some(delay);
            Ok(())
        }

        fn unregister_listener(&mut self) -> ServiceResult<()> {
            self.0.lock().unwrap().registered = false;
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct MockSink {
        emitted: Arc<Mutex<Vec<Snapshot>>>,
        fail: bool,
    }

    impl EventSink for MockSink {
        fn emit(&mut self, _event: &str, snapshot: &Snapshot) -> ServiceResult<()> {
            if self.fail {
                return Err(StepServiceError::EmitFailed("bridge not ready".to_string()));
            }
            self.emitted.lock().unwrap().push(snapshot.clone());
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct MockFallback {
        seen: Arc<Mutex<Vec<Snapshot>>>,
    }

    impl FallbackListener for MockFallback {
        fn on_listener_updated(&mut self, snapshot: &Snapshot) -> ServiceResult<()> {
            self.seen.lock().unwrap().push(snapshot.clone());
            Ok(())
        }
    }

    /// Hook that reports `values[0]` as the running count
    struct PassthroughCounter;

    impl StepCounter for PassthroughCounter {
        fn sensor_type(&self) -> SensorType {
            SensorType::StepCounter
        }

        fn delay(&self) -> SensorDelay {
            SensorDelay::Normal
        }

        fn label(&self) -> &'static str {
            "STEP_COUNTER"
        }

        fn update_current_steps(&mut self, _timestamp_ns: i64, values: &[f32]) -> f64 {
            values.first().copied().unwrap_or(0.0) as f64
        }
    }

    fn service_with(
        source: MockSource,
        sink: MockSink,
    ) -> SensorListenService {
        let _ = env_logger::builder().is_test(true).try_init();
        SensorListenService::new(
            Box::new(source),
            Box::new(PassthroughCounter),
            Republisher::new(Box::new(sink)),
        )
    }

    fn step_event(steps: f32, timestamp_ms: i64) -> SensorEvent {
        SensorEvent::new(
            SensorType::StepCounter,
            timestamp_ms * 1_000_000,
            vec![steps],
        )
    }

    #[test]
    fn test_start_registers_at_counter_delay() {
        let source = MockSource::new(true);
        let mut service = service_with(source.clone(), MockSink::default());

        service.start().unwrap();
        assert_eq!(service.state(), ServiceState::Registered);
        let state = source.0.lock().unwrap();
        assert!(state.registered);
        assert_eq!(state.delay, Some(SensorDelay::Normal));
    }

    #[test]
    fn test_start_without_sensor_fails_fast() {
        let mut service = service_with(MockSource::new(false), MockSink::default());

        match service.start() {
            Err(StepServiceError::SensorNotFound(name)) => assert_eq!(name, "STEP_COUNTER"),
            other => panic!("expected SensorNotFound, got {other:?}"),
        }
        assert_eq!(service.state(), ServiceState::Created);
    }

    #[test]
    fn test_double_start_rejected() {
        let mut service = service_with(MockSource::new(true), MockSink::default());
        service.start().unwrap();
        assert!(matches!(
            service.start(),
            Err(StepServiceError::AlreadyRunning)
        ));
    }

    #[test]
    fn test_unrecognized_sensor_leaves_session_untouched() {
        let sink = MockSink::default();
        let mut service = service_with(MockSource::new(true), sink.clone());
        service.start().unwrap();

        let before = service.session().clone();
        let gyro = SensorEvent::new(SensorType::Unknown(4), 1_000_000, vec![1.0, 2.0, 3.0]);
        assert_eq!(service.on_sensor_changed(&gyro), None);

        assert_eq!(*service.session(), before);
        assert!(sink.emitted.lock().unwrap().is_empty());
    }

    #[test]
    fn test_emitted_snapshot_matches_hook_return() {
        let sink = MockSink::default();
        let mut service = service_with(MockSource::new(true), sink.clone());
        service.start().unwrap();

        let delivery = service.on_sensor_changed(&step_event(37.0, 5_000));
        assert_eq!(delivery, Some(Delivery::Emitted));

        let emitted = sink.emitted.lock().unwrap();
        assert_eq!(emitted.len(), 1);
        assert_relative_eq!(emitted[0].steps, 37.0);
        assert_relative_eq!(emitted[0].distance, 37.0 * 0.762);
        assert_relative_eq!(emitted[0].calories, 37.0 * 0.04);
        assert_eq!(emitted[0].counter_type, "STEP_COUNTER");
    }

    #[test]
    fn test_window_stays_ordered_despite_boot_relative_timestamps() {
        let sink = MockSink::default();
        let mut service = service_with(MockSource::new(true), sink.clone());
        service.start().unwrap();

        // Two hours after boot, decades before the epoch-millis start stamp
        let boot_relative_ms = 2 * 60 * 60 * 1_000;
        service.on_sensor_changed(&step_event(10.0, boot_relative_ms));

        let emitted = sink.emitted.lock().unwrap();
        assert!(
            emitted[0].end_date >= emitted[0].start_date,
            "window inverted: endDate {} < startDate {}",
            emitted[0].end_date,
            emitted[0].start_date
        );
    }

    #[test]
    fn test_queued_patch_folds_in_before_next_event() {
        let sink = MockSink::default();
        let mut service = service_with(MockSource::new(true), sink.clone());
        service.start().unwrap();

        let mut patch = SessionPatch::with_steps(900.0);
        patch.daily_goal = Some(15_000);
        service.patch_sender().send(patch).unwrap();

        service.on_sensor_changed(&step_event(905.0, 9_000));

        let emitted = sink.emitted.lock().unwrap();
        assert_relative_eq!(emitted[0].steps, 905.0);
        assert_eq!(emitted[0].daily_goal, 15_000);
    }

    #[test]
    fn test_apply_patch_republishes_with_defaults() {
        let sink = MockSink::default();
        let mut service = service_with(MockSource::new(true), sink.clone());
        service.start().unwrap();

        let delivery = service.apply_patch(&SessionPatch::with_steps(250.0)).unwrap();
        assert_eq!(delivery, Delivery::Emitted);

        let emitted = sink.emitted.lock().unwrap();
        assert_relative_eq!(emitted[0].distance, 250.0 * 0.762);
        assert_relative_eq!(emitted[0].calories, 250.0 * 0.04);
        assert_eq!(emitted[0].daily_goal, 10_000);
    }

    #[test]
    fn test_fallback_carries_identical_snapshot() {
        let fallback = MockFallback::default();
        let source = MockSource::new(true);
        let _ = env_logger::builder().is_test(true).try_init();
        let mut service = SensorListenService::new(
            Box::new(source),
            Box::new(PassthroughCounter),
            Republisher::new(Box::new(MockSink {
                emitted: Arc::default(),
                fail: true,
            }))
            .with_fallback(Box::new(fallback.clone())),
        );
        service.start().unwrap();

        let delivery = service.on_sensor_changed(&step_event(12.0, 1_000));
        assert_eq!(delivery, Some(Delivery::Fallback));

        let seen = fallback.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], service.snapshot());
    }

    #[test]
    fn test_stop_unregisters_and_blocks_events() {
        let sink = MockSink::default();
        let source = MockSource::new(true);
        let mut service = service_with(source.clone(), sink.clone());
        service.start().unwrap();
        service.on_sensor_changed(&step_event(5.0, 1_000));

        service.stop().unwrap();
        assert!(!source.0.lock().unwrap().registered);
        assert_eq!(service.state(), ServiceState::Stopped);

        assert_eq!(service.on_sensor_changed(&step_event(6.0, 2_000)), None);
        assert_eq!(sink.emitted.lock().unwrap().len(), 1);
        assert!(service.apply_patch(&SessionPatch::with_steps(1.0)).is_err());
    }

    #[test]
    fn test_stop_before_start_rejected() {
        let mut service = service_with(MockSource::new(true), MockSink::default());
        assert!(matches!(service.stop(), Err(StepServiceError::NotRunning)));
    }

    #[test]
    fn test_queue_patch_rejects_when_full() {
        let service = service_with(MockSource::new(true), MockSink::default());
        for _ in 0..PATCH_QUEUE_CAPACITY {
            service.queue_patch(SessionPatch::with_steps(1.0)).unwrap();
        }
        assert!(service.queue_patch(SessionPatch::with_steps(2.0)).is_err());
    }
}
