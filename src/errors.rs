//! Error taxonomy: fatal configuration errors, recoverable transient I/O
//! errors, and rejected-command errors surfaced at the HTTP boundary.
//! Per §7 the tick loop itself is infallible from the caller's perspective —
//! only construction-time configuration errors and boundary-layer command
//! errors are represented here as `Result`s; I/O errors are logged and
//! absorbed inside the actuator implementations.

use thiserror::Error;

/// Fatal at axis construction time. The process refuses to start rather than
/// run with a partially-valid axis.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    #[error("steps_per_revolution must be positive, got {0}")]
    NonPositiveSteps(u32),

    #[error("gear_ratio_den must be non-zero")]
    ZeroGearDenominator,

    #[error("interval_ms must be positive, got {0}")]
    NonPositiveInterval(u32),

    #[error("duplicate axis label '{0}'")]
    DuplicateAxisLabel(char),

    #[error("duplicate axis name '{0}'")]
    DuplicateAxisName(String),

    #[error("could not read config file: {0}")]
    Io(String),

    #[error("could not parse config file: {0}")]
    Parse(String),
}

/// Rejected at the HTTP boundary; never reaches the controller.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("no axis named '{0}'")]
    UnknownAxis(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl CommandError {
    /// HTTP status code this error should be reported as.
    pub fn status_code(&self) -> u16 {
        match self {
            CommandError::UnknownAxis(_) => 404,
            CommandError::InvalidInput(_) => 400,
        }
    }
}

/// Kind of a transient, non-fatal I/O failure, used to latch "log once per
/// state change" behavior rather than once per tick.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum IoErrorKind {
    EncoderTimeout,
    EncoderDisconnected,
    StepperWriteTimeout,
    StepperDisconnected,
}

impl std::fmt::Display for IoErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IoErrorKind::EncoderTimeout => "encoder sample timeout",
            IoErrorKind::EncoderDisconnected => "encoder disconnected",
            IoErrorKind::StepperWriteTimeout => "stepper write timeout",
            IoErrorKind::StepperDisconnected => "stepper serial port disconnected",
        };
        f.write_str(s)
    }
}
