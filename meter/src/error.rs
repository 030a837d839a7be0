use crate::identity::ClientIdentity;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MeterError {
    #[error("user {client} exceeded the user limit of {limit} bytes")]
    UserLimitExceeded { client: ClientIdentity, limit: u64 },

    #[error("total traffic exceeded the global limit of {limit} bytes")]
    GlobalLimitExceeded { limit: u64 },

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl MeterError {
    /// Recovers the meter error carried inside an `io::Error` returned by a
    /// [`TrackingStream`](crate::TrackingStream).
    pub fn from_io(err: &io::Error) -> Option<&MeterError> {
        err.get_ref()?.downcast_ref::<MeterError>()
    }

    pub fn is_limit_exceeded(&self) -> bool {
        matches!(
            self,
            MeterError::UserLimitExceeded { .. } | MeterError::GlobalLimitExceeded { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, MeterError>;
