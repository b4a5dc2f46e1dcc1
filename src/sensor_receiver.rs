use crate::error::{ServiceResult, StepServiceError};
use serde::{Deserialize, Serialize};

/// Android sensor types the service recognizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SensorType {
    /// TYPE_ACCELEROMETER
    Accelerometer,
    /// TYPE_STEP_COUNTER
    StepCounter,
    /// Anything else delivered by the host; never registered, always ignored
    Unknown(i32),
}

impl SensorType {
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            1 => SensorType::Accelerometer,
            19 => SensorType::StepCounter,
            other => SensorType::Unknown(other),
        }
    }

    pub fn raw(&self) -> i32 {
        match self {
            SensorType::Accelerometer => 1,
            SensorType::StepCounter => 19,
            SensorType::Unknown(raw) => *raw,
        }
    }

    /// True for the two types the service will process events from
    pub fn is_recognized(&self) -> bool {
        matches!(self, SensorType::Accelerometer | SensorType::StepCounter)
    }

    pub fn name(&self) -> &'static str {
        match self {
            SensorType::Accelerometer => "ACCELEROMETER",
            SensorType::StepCounter => "STEP_COUNTER",
            SensorType::Unknown(_) => "UNKNOWN",
        }
    }
}

/// Coarse sampling-rate hint, mirroring SensorManager.SENSOR_DELAY_*
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SensorDelay {
    Fastest,
    Game,
    Ui,
    Normal,
}

impl SensorDelay {
    pub fn from_raw(raw: i32) -> ServiceResult<Self> {
        match raw {
            0 => Ok(SensorDelay::Fastest),
            1 => Ok(SensorDelay::Game),
            2 => Ok(SensorDelay::Ui),
            3 => Ok(SensorDelay::Normal),
            other => Err(StepServiceError::InvalidParameters(format!(
                "unknown sensor delay {other}"
            ))),
        }
    }

    pub fn raw(&self) -> i32 {
        match self {
            SensorDelay::Fastest => 0,
            SensorDelay::Game => 1,
            SensorDelay::Ui => 2,
            SensorDelay::Normal => 3,
        }
    }
}

/// One raw sample from the host's sensor dispatcher.
///
/// `values` carries the cumulative since-boot count for the hardware step
/// counter (one element) or the 3-axis acceleration in m/s² for the
/// accelerometer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorEvent {
    pub sensor_type: SensorType,
    /// Event timestamp in nanoseconds (host monotonic clock)
    pub timestamp_ns: i64,
    pub values: Vec<f32>,
}

impl SensorEvent {
    pub fn new(sensor_type: SensorType, timestamp_ns: i64, values: Vec<f32>) -> Self {
        Self {
            sensor_type,
            timestamp_ns,
            values,
        }
    }
}

/// Opaque handle to a resolved sensor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorHandle {
    pub sensor_type: SensorType,
}

/// Injected sensor capability.
///
/// The service never talks to the OS sensor manager directly; the production
/// source mirrors the registration the host performs, and tests substitute a
/// synthetic source.
pub trait SensorSource: Send {
    /// Resolve the default sensor for a type, `None` when the device has none
    fn resolve_default(&mut self, sensor_type: SensorType) -> Option<SensorHandle>;

    fn register_listener(
        &mut self,
        handle: &SensorHandle,
        delay: SensorDelay,
    ) -> ServiceResult<()>;

    fn unregister_listener(&mut self) -> ServiceResult<()>;
}

/// Production source used under JNI.
///
/// The host resolves the default sensor against the real sensor manager and
/// reports availability when it starts the service; this type mirrors that
/// registration state on the Rust side.
#[derive(Debug)]
pub struct HostSensorSource {
    available: bool,
    registered: bool,
}

impl HostSensorSource {
    pub fn new(available: bool) -> Self {
        Self {
            available,
            registered: false,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }
}

impl SensorSource for HostSensorSource {
    fn resolve_default(&mut self, sensor_type: SensorType) -> Option<SensorHandle> {
        if self.available && sensor_type.is_recognized() {
            Some(SensorHandle { sensor_type })
        } else {
            None
        }
    }

    fn register_listener(
        &mut self,
        _handle: &SensorHandle,
        _delay: SensorDelay,
    ) -> ServiceResult<()> {
        self.registered = true;
        Ok(())
    }

    fn unregister_listener(&mut self) -> ServiceResult<()> {
        if !self.registered {
            return Err(StepServiceError::NotRunning);
        }
        self.registered = false;
        Ok(())
    }
}
