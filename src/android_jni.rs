use crate::counter::{AccelerometerCounter, HardwareStepCounter, StepCounter};
use crate::emitter::{Delivery, HostEventSink, Republisher};
use crate::error::{throw_java_exception, ServiceResult, StepServiceError};
use crate::sensor_receiver::{HostSensorSource, SensorEvent, SensorType};
use crate::service::{SensorListenService, ServiceState};
use crate::session::SessionPatch;
use jni::objects::{JClass, JFloatArray, JString};
use jni::sys::{jboolean, jint, jlong, jstring};
use jni::JNIEnv;
use log::info;
use std::sync::{Mutex, Once};

// Global service state - stored as static to persist across JNI calls
lazy_static::lazy_static! {
    static ref GLOBAL_SERVICE: Mutex<Option<SensorListenService>> = Mutex::new(None);
    static ref HOST_SINK: HostEventSink = HostEventSink::new();
}

/// Delivery outcomes as integer codes for the host
const DELIVERY_EMITTED: i32 = 0;
const DELIVERY_FALLBACK: i32 = 1;
const DELIVERY_DROPPED: i32 = 2;
const DELIVERY_IGNORED: i32 = 3;

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        #[cfg(target_os = "android")]
        let _ = android_log::init("StepCounterService");
    });
}

fn with_service<T>(
    f: impl FnOnce(&mut SensorListenService) -> ServiceResult<T>,
) -> ServiceResult<T> {
    let mut guard = GLOBAL_SERVICE
        .lock()
        .map_err(|_| StepServiceError::Internal("Failed to acquire service lock".to_string()))?;
    match guard.as_mut() {
        Some(service) => f(service),
        None => Err(StepServiceError::NotRunning),
    }
}

/// JNI: Start the listen service for a sensor type.
///
/// `available` is the host's answer to resolving the default sensor against
/// the real sensor manager; a device without the sensor fails fast here.
/// Returns: 0 on success, -1 on error (throws Java exception)
#[no_mangle]
pub extern "C" fn Java_com_stepcounter_JniBinding_startService(
    mut env: JNIEnv,
    _class: JClass,
    sensor_type: jint,
    available: jboolean,
) -> jint {
    match start_service_impl(sensor_type, available != 0) {
        Ok(_) => 0,
        Err(e) => {
            let _ = throw_java_exception(&mut env, &e);
            -1
        }
    }
}

fn start_service_impl(sensor_type: i32, available: bool) -> ServiceResult<()> {
    init_logging();

    let counter: Box<dyn StepCounter> = match SensorType::from_raw(sensor_type) {
        SensorType::StepCounter => Box::new(HardwareStepCounter::new()),
        SensorType::Accelerometer => Box::new(AccelerometerCounter::default()),
        SensorType::Unknown(raw) => {
            return Err(StepServiceError::InvalidParameters(format!(
                "unsupported sensor type {raw}"
            )))
        }
    };

    let mut guard = GLOBAL_SERVICE
        .lock()
        .map_err(|_| StepServiceError::Internal("Failed to acquire service lock".to_string()))?;
    if let Some(existing) = guard.as_ref() {
        if existing.state() == ServiceState::Registered {
            return Err(StepServiceError::AlreadyRunning);
        }
    }

    // Payloads left over from a previous session must not leak into this one
    HOST_SINK.clear();

    let source = HostSensorSource::new(available);
    let republisher = Republisher::new(Box::new(HOST_SINK.clone()));
    let mut service = SensorListenService::new(Box::new(source), counter, republisher);
    service.start()?;
    *guard = Some(service);

    info!("[StepCounterService] started");
    Ok(())
}

/// JNI: Stop the listen service and unregister the listener
/// Returns: 0 on success, -1 on error (throws Java exception)
#[no_mangle]
pub extern "C" fn Java_com_stepcounter_JniBinding_stopService(
    mut env: JNIEnv,
    _class: JClass,
) -> jint {
    match stop_service_impl() {
        Ok(_) => 0,
        Err(e) => {
            let _ = throw_java_exception(&mut env, &e);
            -1
        }
    }
}

fn stop_service_impl() -> ServiceResult<()> {
    let mut guard = GLOBAL_SERVICE
        .lock()
        .map_err(|_| StepServiceError::Internal("Failed to acquire service lock".to_string()))?;
    let mut service = guard.take().ok_or(StepServiceError::NotRunning)?;
    service.stop()?;

    info!("[StepCounterService] stopped");
    Ok(())
}

/// JNI: Push one raw sensor sample from the host's dispatcher.
///
/// Returns the delivery code (0 emitted, 1 fallback, 2 dropped, 3 ignored),
/// -1 on error (throws Java exception)
#[no_mangle]
pub extern "C" fn Java_com_stepcounter_JniBinding_pushSensorEvent(
    mut env: JNIEnv,
    _class: JClass,
    sensor_type: jint,
    timestamp_ns: jlong,
    values: JFloatArray,
) -> jint {
    match push_sensor_event_impl(&mut env, sensor_type, timestamp_ns, &values) {
        Ok(code) => code,
        Err(e) => {
            let _ = throw_java_exception(&mut env, &e);
            -1
        }
    }
}

fn push_sensor_event_impl(
    env: &mut JNIEnv,
    sensor_type: i32,
    timestamp_ns: i64,
    values: &JFloatArray,
) -> ServiceResult<i32> {
    let len = env
        .get_array_length(values)
        .map_err(|_| StepServiceError::JniError("Failed to read sample length".to_string()))?;
    let mut buf = vec![0.0f32; len as usize];
    env.get_float_array_region(values, 0, &mut buf)
        .map_err(|_| StepServiceError::JniError("Failed to read sample values".to_string()))?;

    let event = SensorEvent::new(SensorType::from_raw(sensor_type), timestamp_ns, buf);
    with_service(|service| {
        Ok(match service.on_sensor_changed(&event) {
            Some(Delivery::Emitted) => DELIVERY_EMITTED,
            Some(Delivery::Fallback) => DELIVERY_FALLBACK,
            Some(Delivery::Dropped) => DELIVERY_DROPPED,
            None => DELIVERY_IGNORED,
        })
    })
}

/// JNI: Sensor accuracy callback from the host
#[no_mangle]
pub extern "C" fn Java_com_stepcounter_JniBinding_onAccuracyChanged(
    mut env: JNIEnv,
    _class: JClass,
    accuracy: jint,
) -> jint {
    match with_service(|service| {
        service.on_accuracy_changed(accuracy);
        Ok(())
    }) {
        Ok(_) => 0,
        Err(e) => {
            let _ = throw_java_exception(&mut env, &e);
            -1
        }
    }
}

/// JNI: Apply a state patch carried as JSON (the external refresh channel).
///
/// Absent fields take the derived defaults, matching the session policy.
/// Returns the delivery code of the republish, -1 on error
#[no_mangle]
pub extern "C" fn Java_com_stepcounter_JniBinding_applyPatchJson(
    mut env: JNIEnv,
    _class: JClass,
    json: JString,
) -> jint {
    match apply_patch_json_impl(&mut env, &json) {
        Ok(code) => code,
        Err(e) => {
            let _ = throw_java_exception(&mut env, &e);
            -1
        }
    }
}

fn apply_patch_json_impl(env: &mut JNIEnv, json: &JString) -> ServiceResult<i32> {
    let payload: String = env
        .get_string(json)
        .map_err(|_| StepServiceError::JniError("Failed to read patch string".to_string()))?
        .into();
    let patch: SessionPatch = serde_json::from_str(&payload)
        .map_err(|e| StepServiceError::InvalidParameters(format!("patch json: {e}")))?;

    with_service(|service| {
        Ok(match service.apply_patch(&patch)? {
            Delivery::Emitted => DELIVERY_EMITTED,
            Delivery::Fallback => DELIVERY_FALLBACK,
            Delivery::Dropped => DELIVERY_DROPPED,
        })
    })
}

/// JNI: Current session snapshot as JSON
/// Returns: JSON string or null on error (throws Java exception)
#[no_mangle]
pub extern "C" fn Java_com_stepcounter_JniBinding_getSnapshotJson(
    mut env: JNIEnv,
    _class: JClass,
) -> jstring {
    match with_service(|service| service.snapshot().to_json()) {
        Ok(json_str) => match env.new_string(&json_str) {
            Ok(jstr) => jstr.into_raw(),
            Err(_) => {
                let _ = throw_java_exception(
                    &mut env,
                    &StepServiceError::JniError("Failed to create Java string".to_string()),
                );
                std::ptr::null_mut()
            }
        },
        Err(e) => {
            let _ = throw_java_exception(&mut env, &e);
            std::ptr::null_mut()
        }
    }
}

/// JNI: Drain the pending `stepCounterUpdate` payload, null when none.
///
/// The host forwards the payload to its device-event emitter under the
/// `stepCounterUpdate` name.
#[no_mangle]
pub extern "C" fn Java_com_stepcounter_JniBinding_takePendingEvent(
    mut env: JNIEnv,
    _class: JClass,
) -> jstring {
    match HOST_SINK.take_pending() {
        Some(payload) => match env.new_string(&payload) {
            Ok(jstr) => jstr.into_raw(),
            Err(_) => {
                let _ = throw_java_exception(
                    &mut env,
                    &StepServiceError::JniError("Failed to create Java string".to_string()),
                );
                std::ptr::null_mut()
            }
        },
        None => std::ptr::null_mut(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::{EventSink, Snapshot, STEP_COUNTER_UPDATE};

    // The one test touching the process globals; keep it that way
    #[test]
    fn test_start_discards_stale_session_payloads() {
        let stale = Snapshot {
            steps: 99.0,
            distance: 75.4,
            start_date: 1_000,
            end_date: 2_000,
            counter_type: "STEP_COUNTER".to_string(),
            calories: 3.96,
            daily_goal: 10_000,
        };
        let mut sink = HOST_SINK.clone();
        sink.emit(STEP_COUNTER_UPDATE, &stale).unwrap();

        start_service_impl(SensorType::StepCounter.raw(), true).unwrap();
        assert!(HOST_SINK.take_pending().is_none());

        stop_service_impl().unwrap();
    }
}
