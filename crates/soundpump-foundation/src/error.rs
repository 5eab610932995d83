use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AudioError {
    #[error("Format not supported: {format}")]
    FormatNotSupported { format: String },

    #[error("Device unavailable: {reason}")]
    DeviceUnavailable { reason: String },

    #[error("Not initialized: {what}")]
    NotInitialized { what: String },

    #[error("Audio pump did not signal readiness within {waited:?}")]
    PumpStartTimeout { waited: Duration },

    #[error("Endpoint backend error: {reason}")]
    Backend { reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Fatal error, cannot recover: {0}")]
    Fatal(String),
}

#[derive(Debug, Clone)]
pub enum RecoveryStrategy {
    Retry { max_attempts: u32, delay: Duration },
    Renegotiate,
    Restart,
    Ignore,
    Fatal,
}

impl AudioError {
    pub fn recovery_strategy(&self) -> RecoveryStrategy {
        match self {
            AudioError::DeviceUnavailable { .. } => RecoveryStrategy::Retry {
                max_attempts: 5,
                delay: Duration::from_secs(2),
            },
            AudioError::FormatNotSupported { .. } => RecoveryStrategy::Renegotiate,
            AudioError::PumpStartTimeout { .. } => RecoveryStrategy::Retry {
                max_attempts: 2,
                delay: Duration::from_millis(250),
            },
            AudioError::NotInitialized { .. } | AudioError::Backend { .. } => {
                RecoveryStrategy::Restart
            }
            AudioError::Config(_) | AudioError::Fatal(_) => RecoveryStrategy::Fatal,
        }
    }
}
