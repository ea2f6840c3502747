use std::{error, fmt};

// -------------------------------------------------------------------------------------------------

/// Provides an enumeration of all possible errors reported by grainflux.
#[derive(Debug)]
pub enum Error {
    /// An invalid or out-of-range parameter value was passed to a control function.
    ParameterError(String),
    /// A named sample buffer could not be resolved in the buffer store.
    BufferNotFound(String),
    /// Memory for the grain pool could not be reserved during a reinit.
    AllocationError(String),
    /// A control message could not be delivered to the voice.
    SendError(String),
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParameterError(str) => write!(f, "Invalid parameter: {str}"),
            Self::BufferNotFound(name) => write!(f, "Sample buffer '{name}' not found"),
            Self::AllocationError(str) => write!(f, "Grain pool allocation failed: {str}"),
            Self::SendError(str) => write!(f, "Failed to send voice message: {str}"),
        }
    }
}

impl From<std::collections::TryReserveError> for Error {
    fn from(err: std::collections::TryReserveError) -> Self {
        Error::AllocationError(err.to_string())
    }
}
