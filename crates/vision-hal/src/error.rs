//! Error type shared by every hardware collaborator.
//!
//! Drivers report failures as a [`HalError`] tagged with the device that
//! raised it and a coarse [`HalErrorKind`]. The pipeline never retries these:
//! during setup they are returned to the caller, in steady state they are
//! routed to the fatal handler.

use thiserror::Error;

// =============================================================================
// Hardware Errors
// =============================================================================

/// Coarse classification of a hardware failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalErrorKind {
    /// A peripheral refused to start or bind a resource.
    Initialization,
    /// A request carried an argument the device cannot honor.
    InvalidParameter,
    /// The device reported a failure while a transfer was in progress.
    Transfer,
    /// Memory for a DMA region could not be obtained.
    Allocation,
    /// The device is not in a state that accepts the request.
    NotReady,
}

impl std::fmt::Display for HalErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            HalErrorKind::Initialization => "initialization",
            HalErrorKind::InvalidParameter => "invalid_parameter",
            HalErrorKind::Transfer => "transfer",
            HalErrorKind::Allocation => "allocation",
            HalErrorKind::NotReady => "not_ready",
        };
        write!(f, "{}", label)
    }
}

/// Failure reported by a hardware collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{device} {kind} error: {message}")]
pub struct HalError {
    /// Short device label, e.g. `"camera"` or `"npu"`.
    pub device: &'static str,
    /// Failure class.
    pub kind: HalErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl HalError {
    /// Builds an error for `device`.
    pub fn new(device: &'static str, kind: HalErrorKind, message: impl Into<String>) -> Self {
        Self {
            device,
            kind,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_device_and_kind() {
        let err = HalError::new("camera", HalErrorKind::NotReady, "pipe not started");
        assert_eq!(err.to_string(), "camera not_ready error: pipe not started");
    }
}
