//! Error types for the recreation toolkit

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::capture::CaptureErrorKind;

/// Result type alias for recreation operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while recreating a page
#[derive(Error, Debug)]
pub enum Error {
    /// Taking a screenshot of the target or a candidate failed
    #[error("Capture failed ({kind}): {message}")]
    CaptureFailure {
        kind: CaptureErrorKind,
        message: String,
    },

    /// The markup generator failed to produce a candidate
    #[error("Generation failed: {0}")]
    GenerationFailure(String),

    /// Target and candidate images do not share dimensions
    #[error(
        "Dimension mismatch: target {}x{}, candidate {}x{}",
        .target.0, .target.1, .candidate.0, .candidate.1
    )]
    DimensionMismatch {
        target: (u32, u32),
        candidate: (u32, u32),
    },

    /// The subjective judge failed to score a candidate
    #[error("Judge failed: {0}")]
    JudgeFailure(String),

    /// The critique collaborator failed (never fatal to a session)
    #[error("Critique failed: {0}")]
    CritiqueFailure(String),

    /// Writing an artifact to disk failed
    #[error("Failed to persist {}: {message}", .path.display())]
    PersistenceFailure { path: PathBuf, message: String },

    /// A screenshot could not be decoded
    #[error("Image decode failed: {0}")]
    ImageDecode(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn capture(kind: CaptureErrorKind, message: impl Into<String>) -> Self {
        Error::CaptureFailure {
            kind,
            message: message.into(),
        }
    }

    pub fn persistence(path: &Path, err: impl std::fmt::Display) -> Self {
        Error::PersistenceFailure {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }

    /// Whether this error aborts a recreation session.
    ///
    /// Only critique failures degrade gracefully; everything else invalidates
    /// the scores of the iteration it happened in.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::CritiqueFailure(_))
    }
}
