//! Error types for the pipeline application.
//!
//! `PipelineError` gathers every failure the orchestrator can hit:
//!
//! - **`Config`**: the configuration failed to load or validate.
//! - **`Hal`**: a peripheral driver refused a command. During setup this is
//!   returned to the caller; once the tasks run it goes to the fatal handler.
//! - **`Queue`** and **`Nn`**: the buffer queues or the model registry
//!   rejected an operation.
//! - **`Spawn`**: a pipeline thread could not be created.
//! - **`Compositor`**: the 2D engine reported a transfer error.
//!
//! Steady-state failures are not recoverable: the pipeline has a single
//! fixed topology and no restart path. Tasks hand such errors to a
//! [`FatalHandler`] and stop. [`abort_on_fatal`] is what the binary installs.

use crate::config::ConfigError;
use std::sync::Arc;
use thiserror::Error;
use vision_hal::HalError;
use vision_nn::NnServiceError;
use vision_pool::QueueError;

/// Convenience alias for results using the pipeline error type.
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Pipeline setup and runtime failures.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A peripheral driver failed.
    #[error("Hardware error: {0}")]
    Hal(#[from] HalError),

    /// A buffer queue was misused.
    #[error("Buffer queue error: {0}")]
    Queue(#[from] QueueError),

    /// The model registry rejected an operation.
    #[error("NN service error: {0}")]
    Nn(#[from] NnServiceError),

    /// A pipeline thread could not be started.
    #[error("Failed to spawn task '{name}': {source}")]
    Spawn {
        /// Thread name.
        name: &'static str,
        /// OS error.
        #[source]
        source: std::io::Error,
    },

    /// The pipeline was assembled from inconsistent parts.
    #[error("Invalid pipeline setup: {0}")]
    Invalid(String),

    /// The 2D compositor signalled an error completion.
    #[error("Compositor transfer error")]
    Compositor,
}

/// Receives unrecoverable errors raised inside tasks and interrupt handlers.
pub type FatalHandler = Arc<dyn Fn(&PipelineError) + Send + Sync>;

/// Fatal handler that logs the error and aborts the process.
#[must_use]
pub fn abort_on_fatal() -> FatalHandler {
    Arc::new(|err: &PipelineError| {
        tracing::error!(error = %err, "fatal pipeline error, aborting");
        std::process::abort();
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use vision_hal::HalErrorKind;

    #[test]
    fn wraps_driver_errors_with_context() {
        let err: PipelineError =
            HalError::new("camera", HalErrorKind::Transfer, "fifo overrun").into();
        assert_eq!(
            err.to_string(),
            "Hardware error: camera transfer error: fifo overrun"
        );

        let err: PipelineError = NnServiceError::RegistryFull.into();
        assert!(err.to_string().starts_with("NN service error: model registry full"));
    }

    #[test]
    fn spawn_error_names_the_task() {
        let err = PipelineError::Spawn {
            name: "nn",
            source: std::io::Error::new(std::io::ErrorKind::OutOfMemory, "no stack"),
        };
        assert_eq!(err.to_string(), "Failed to spawn task 'nn': no stack");
    }
}
