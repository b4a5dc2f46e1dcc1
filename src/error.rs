use jni::JNIEnv;
use thiserror::Error;

/// Step service error types
#[derive(Error, Debug, Clone)]
pub enum StepServiceError {
    #[error("No default sensor for {0}")]
    SensorNotFound(String),

    #[error("Service already registered")]
    AlreadyRunning,

    #[error("Service not registered")]
    NotRunning,

    #[error("Invalid service state: {0}")]
    InvalidState(String),

    #[error("Emission failed: {0}")]
    EmitFailed(String),

    #[error("Patch channel closed")]
    ChannelClosed,

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("JNI error: {0}")]
    JniError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for service operations
pub type ServiceResult<T> = Result<T, StepServiceError>;

/// Throw Java exception from Rust error
pub fn throw_java_exception(env: &mut JNIEnv, error: &StepServiceError) -> ServiceResult<()> {
    let exception_class = match error {
        StepServiceError::AlreadyRunning | StepServiceError::NotRunning => {
            "java/lang/IllegalStateException"
        }
        StepServiceError::InvalidState(_) | StepServiceError::InvalidParameters(_) => {
            "java/lang/IllegalArgumentException"
        }
        StepServiceError::SensorNotFound(_) | StepServiceError::EmitFailed(_) => {
            "java/io/IOException"
        }
        StepServiceError::ChannelClosed
        | StepServiceError::JniError(_)
        | StepServiceError::Internal(_) => "java/lang/RuntimeException",
    };

    let message = error.to_string();
    env.throw_new(exception_class, message)
        .map_err(|_| StepServiceError::JniError("Failed to throw exception".to_string()))?;

    Ok(())
}
