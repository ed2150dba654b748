//! Error types shared across Renderweld crates.

use std::path::PathBuf;

/// Top-level error type for Renderweld operations.
#[derive(Debug, thiserror::Error)]
pub enum WeldError {
    /// The compositor worker violated the framing protocol. Fatal for the
    /// connection: pending commands are rejected and the worker is torn down.
    #[error("Protocol violation: {message}")]
    Protocol { message: String },

    /// The compositor worker exited before or instead of answering.
    #[error("Compositor exited with {status}: {stderr}")]
    WorkerExit { status: String, stderr: String },

    /// The external encoder exited with a nonzero status.
    #[error("Encode error: {message}")]
    Encode { message: String },

    /// A concat manifest could not be produced.
    #[error("Manifest error: {message}")]
    Manifest { message: String },

    /// The caller used a handle in a state that cannot serve the request,
    /// e.g. issuing a command to a worker that was already finished.
    #[error("Misuse: {message}")]
    Misuse { message: String },

    /// Internal failure establishing or driving the worker process.
    #[error("Bridge error: {message}")]
    Bridge { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using WeldError.
pub type WeldResult<T> = Result<T, WeldError>;

impl WeldError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol {
            message: msg.into(),
        }
    }

    pub fn worker_exit(status: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::WorkerExit {
            status: status.into(),
            stderr: stderr.into(),
        }
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode {
            message: msg.into(),
        }
    }

    pub fn manifest(msg: impl Into<String>) -> Self {
        Self::Manifest {
            message: msg.into(),
        }
    }

    pub fn misuse(msg: impl Into<String>) -> Self {
        Self::Misuse {
            message: msg.into(),
        }
    }

    pub fn bridge(msg: impl Into<String>) -> Self {
        Self::Bridge {
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into(),
        }
    }
}
