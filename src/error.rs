//! Error types for the PS4000 acquisition core

use thiserror::Error;

use crate::ffi::*;
use crate::types::Channel;

/// Error type for PS4000 operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScopeError {
    /// Device absent or disconnected
    #[error("Device not found: {0}")]
    NotFound(String),

    /// Handle is closed or was never opened
    #[error("Invalid device handle: {0}")]
    InvalidHandle(i16),

    /// Illegal range, trigger or buffer combination
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Requested configuration exceeds what the unit reports it can do
    #[error("Capability exceeded: {0}")]
    Capability(String),

    /// A run is in progress or another operation holds the handle
    #[error("Device busy: {0}")]
    Busy(String),

    /// Auto-trigger, open or completion wait elapsed
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Input exceeded the selected range. Advisory, the data is still valid.
    #[error("Input overflow on channels {channels:?}")]
    Overflow { channels: Vec<Channel> },

    /// Device-reported error, recovery requires stop and re-arm
    #[error("Hardware fault: {status:#x} ({description})")]
    HardwareFault {
        status: PICO_STATUS,
        description: String,
    },

    /// Transport-level failure
    #[error("Communication lost: {0}")]
    CommunicationLost(String),
}

impl ScopeError {
    /// Whether this error aborts the run that produced it
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ScopeError::Overflow { .. })
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        ScopeError::InvalidConfiguration(msg.into())
    }

    pub(crate) fn capability(msg: impl Into<String>) -> Self {
        ScopeError::Capability(msg.into())
    }

    pub(crate) fn busy(msg: impl Into<String>) -> Self {
        ScopeError::Busy(msg.into())
    }
}

impl From<PICO_STATUS> for ScopeError {
    fn from(status: PICO_STATUS) -> Self {
        debug_assert_ne!(status, PICO_OK, "PICO_OK is not an error");
        let description = status_to_string(status).to_string();
        match status {
            PICO_NOT_FOUND => ScopeError::NotFound(description),
            PICO_INVALID_HANDLE => ScopeError::InvalidHandle(0),
            PICO_NOT_RESPONDING | PICO_INTERFACE_NOT_CONNECTED | PICO_KERNEL_DRIVER_TOO_OLD => {
                ScopeError::CommunicationLost(description)
            }
            PICO_BUSY | PICO_OPEN_OPERATION_IN_PROGRESS | PICO_GET_DATA_ACTIVE => {
                ScopeError::Busy(description)
            }
            PICO_INVALID_TIMEBASE
            | PICO_INVALID_VOLTAGE_RANGE
            | PICO_TOO_MANY_SAMPLES
            | PICO_TOO_MANY_SEGMENTS
            | PICO_NO_SIGNAL_GENERATOR
            | PICO_ETS_NOT_SUPPORTED
            | PICO_AWG_NOT_SUPPORTED
            | PICO_BANDWIDTH_NOT_SUPPORTED
            | PICO_RESISTANCE_AND_PROBE_NOT_ALLOWED
            | PICO_RATIO_MODE_NOT_SUPPORTED
            | PICO_RAPID_NOT_SUPPORT_AGGREGATION
            | PICO_NOT_USED => ScopeError::Capability(description),
            PICO_INVALID_PARAMETER
            | PICO_INVALID_CHANNEL
            | PICO_INVALID_TRIGGER_CHANNEL
            | PICO_INVALID_CONDITION_CHANNEL
            | PICO_CONDITIONS
            | PICO_INVALID_TRIGGER_PROPERTY
            | PICO_PULSE_WIDTH_QUALIFIER
            | PICO_SEGMENT_OUT_OF_RANGE
            | PICO_INVALID_SAMPLERATIO
            | PICO_INVALID_BUFFER
            | PICO_BUFFERS_NOT_SET
            | PICO_NULL_PARAMETER
            | PICO_SIG_GEN_PARAM
            | PICO_SHOTS_SWEEPS_WARNING
            | PICO_SIGGEN_TRIGGER_SOURCE
            | PICO_AUX_OUTPUT_CONFLICT
            | PICO_WARNING_AUX_OUTPUT_CONFLICT
            | PICO_STRING_BUFFER_TOO_SMALL
            | PICO_TRIGGER_ERROR
            | PICO_AUTO_TRIGGER_TIME_TOO_SHORT
            | PICO_INVALID_INFO
            | PICO_DELAY
            | PICO_INVALID_SAMPLE_INTERVAL
            | PICO_INVALID_COUPLING
            | PICO_STARTINDEX_INVALID
            | PICO_SEGMENT_NOT_USED
            | PICO_NOT_ENOUGH_SEGMENTS
            | PICO_INVALID_CALL
            | PICO_NO_SAMPLES_AVAILABLE
            | PICO_DATA_NOT_AVAILABLE
            | PICO_NO_CAPTURES_AVAILABLE => ScopeError::InvalidConfiguration(description),
            _ => ScopeError::HardwareFault {
                status,
                description,
            },
        }
    }
}

/// Result type for PS4000 operations
pub type Result<T> = std::result::Result<T, ScopeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(ScopeError::from(PICO_NOT_FOUND), ScopeError::NotFound(_)));
        assert!(matches!(ScopeError::from(PICO_BUSY), ScopeError::Busy(_)));
        assert!(matches!(
            ScopeError::from(PICO_NOT_RESPONDING),
            ScopeError::CommunicationLost(_)
        ));
        assert!(matches!(
            ScopeError::from(PICO_INVALID_TIMEBASE),
            ScopeError::Capability(_)
        ));
        assert!(matches!(
            ScopeError::from(PICO_INVALID_TRIGGER_PROPERTY),
            ScopeError::InvalidConfiguration(_)
        ));
        assert!(matches!(
            ScopeError::from(PICO_FW_FAIL),
            ScopeError::HardwareFault { status: PICO_FW_FAIL, .. }
        ));
    }

    #[test]
    fn test_overflow_is_advisory() {
        let err = ScopeError::Overflow {
            channels: vec![Channel::A],
        };
        assert!(!err.is_fatal());
        assert!(ScopeError::busy("running").is_fatal());
    }
}
