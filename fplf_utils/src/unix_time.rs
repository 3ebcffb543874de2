use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::error;

/// Retrieves the current time, in seconds since the UNIX epoch.
///
/// It can fail if the clock isn't ready.
pub fn unix_now() -> Result<u64, TimeError> {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(t) => Ok(t.as_secs()),
        Err(e) => {
            error!("Error determining the time in UNIX land: {:?}", e);
            Err(TimeError::ClockNotReady)
        }
    }
}

/// Current time as fractional seconds since the UNIX epoch. Used for
/// capture timestamps, which need sub-second resolution.
pub fn unix_now_f64() -> Result<f64, TimeError> {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(t) => Ok(t.as_secs_f64()),
        Err(e) => {
            error!("Error determining the time in UNIX land: {:?}", e);
            Err(TimeError::ClockNotReady)
        }
    }
}

/// Error type for time functions.
#[derive(Error, Debug)]
pub enum TimeError {
    /// The clock isn't ready yet.
    #[error("Clock not ready")]
    ClockNotReady,
}
