// Step Counter Android JNI Library
// Exposes the Rust step counting service to Kotlin via JNI

pub mod android_jni;
pub mod counter;
pub mod emitter;
pub mod error;
pub mod sensor_receiver;
pub mod service;
pub mod session;

// Re-export public types for potential future usage
pub use counter::{AccelerometerConfig, AccelerometerCounter, HardwareStepCounter, StepCounter};
pub use emitter::{
    Delivery, EventSink, FallbackListener, HostEventSink, Republisher, Snapshot,
    PENDING_EVENT_CAPACITY, STEP_COUNTER_UPDATE,
};
pub use error::{ServiceResult, StepServiceError};
pub use sensor_receiver::{
    HostSensorSource, SensorDelay, SensorEvent, SensorHandle, SensorSource, SensorType,
};
pub use service::{SensorListenService, ServiceState};
pub use session::{SessionPatch, StepSession};
