use crate::sensor_receiver::{SensorDelay, SensorType};
use nalgebra::Vector3;

/// Conversion hook turning raw sensor samples into a running step count.
///
/// Implementations carry their own filtering state; the session itself stays
/// in the service. The label is the `counterType` string the host sees in
/// every snapshot.
pub trait StepCounter: Send {
    fn sensor_type(&self) -> SensorType;
    fn delay(&self) -> SensorDelay;
    fn label(&self) -> &'static str;

    /// Consume one raw sample and return the cumulative step count
    fn update_current_steps(&mut self, timestamp_ns: i64, values: &[f32]) -> f64;
}

/// Counter backed by the dedicated hardware step sensor (type 19).
///
/// The OS reports a cumulative since-boot count in `values[0]`; the first
/// event sets the baseline and subsequent events report the delta. A count
/// that goes backwards means the hardware counter was reset, so the baseline
/// shifts to keep the accumulated steps.
#[derive(Debug, Default)]
pub struct HardwareStepCounter {
    baseline: Option<f64>,
    steps: f64,
}

impl HardwareStepCounter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StepCounter for HardwareStepCounter {
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
        let Some(&raw) = values.first() else {
            return self.steps;
        };
        let total = raw as f64;

        match self.baseline {
            None => self.baseline = Some(total),
            Some(baseline) if total < baseline => {
                // Hardware counter reset (reboot); keep the accumulated count
                self.baseline = Some(total - self.steps);
            }
            Some(_) => {}
        }

        if let Some(baseline) = self.baseline {
            self.steps = total - baseline;
        }
        self.steps
    }
}

/// Tuning for the accelerometer-based counter
#[derive(Debug, Clone)]
pub struct AccelerometerConfig {
    /// Vertical acceleration a rising edge must cross to count (m/s²)
    pub step_threshold: f64,
    /// Accelerations above this are impacts, not steps (m/s²)
    pub max_peak_accel: f64,
    /// Minimum time between counted steps, rejects double-counting (ms)
    pub min_step_interval_ms: i64,
    /// EMA factor for the vertical acceleration, lower = more smoothing
    pub smoothing_alpha: f64,
    /// Low-pass factor for the gravity estimate
    pub gravity_alpha: f64,
}

impl Default for AccelerometerConfig {
    fn default() -> Self {
        Self {
            step_threshold: 1.2,
            max_peak_accel: 25.0,
            min_step_interval_ms: 250, // max ~4 steps/sec
            smoothing_alpha: 0.3,
            gravity_alpha: 0.02,
        }
    }
}

/// Counter for devices without a hardware step sensor (type 1).
///
/// Estimates gravity with a low-pass filter, projects each sample onto the
/// gravity direction to get vertical linear acceleration, smooths it, and
/// counts debounced rising-edge threshold crossings as steps.
#[derive(Debug)]
pub struct AccelerometerCounter {
    config: AccelerometerConfig,
    gravity: Vector3<f64>,
    smoothed: f64,
    prev_smoothed: f64,
    last_step_ms: Option<i64>,
    steps: f64,
}

impl AccelerometerCounter {
    pub fn new(config: AccelerometerConfig) -> Self {
        Self {
            config,
            gravity: Vector3::new(0.0, 0.0, 9.81),
            smoothed: 0.0,
            prev_smoothed: 0.0,
            last_step_ms: None,
            steps: 0.0,
        }
    }

    fn vertical_accel(&mut self, accel: Vector3<f64>) -> f64 {
        let alpha = self.config.gravity_alpha;
        self.gravity = self.gravity * (1.0 - alpha) + accel * alpha;

        let gravity_mag = self.gravity.norm();
        if gravity_mag < 0.1 {
            return 0.0;
        }
        accel.dot(&self.gravity) / gravity_mag - gravity_mag
    }
}

impl Default for AccelerometerCounter {
    fn default() -> Self {
        Self::new(AccelerometerConfig::default())
    }
}

impl StepCounter for AccelerometerCounter {
    fn sensor_type(&self) -> SensorType {
        SensorType::Accelerometer
    }

    fn delay(&self) -> SensorDelay {
        SensorDelay::Game
    }

    fn label(&self) -> &'static str {
        "ACCELEROMETER"
    }

    fn update_current_steps(&mut self, timestamp_ns: i64, values: &[f32]) -> f64 {
        if values.len() < 3 {
            return self.steps;
        }
        let accel = Vector3::new(values[0] as f64, values[1] as f64, values[2] as f64);
        let vertical = self.vertical_accel(accel);

        if vertical.abs() > self.config.max_peak_accel {
            // Impact or drop, not gait
            return self.steps;
        }

        self.prev_smoothed = self.smoothed;
        self.smoothed = self.config.smoothing_alpha * vertical
            + (1.0 - self.config.smoothing_alpha) * self.smoothed;

        let timestamp_ms = timestamp_ns / 1_000_000;
        let rising_edge = self.prev_smoothed < self.config.step_threshold
            && self.smoothed >= self.config.step_threshold;

        let debounced = self
            .last_step_ms
            .is_some_and(|last| timestamp_ms - last < self.config.min_step_interval_ms);
        if rising_edge && !debounced {
            self.steps += 1.0;
            self.last_step_ms = Some(timestamp_ms);
        }
        self.steps
    }
}
