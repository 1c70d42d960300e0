//! RFox Recreate
//!
//! Turns website screenshots into generated markup and iteratively refines
//! that markup until it visually matches the original.
//!
//! # Features
//!
//! - **Convergence loop**: [`RecreationController`] drives capture, generate,
//!   capture, compare and revise until the candidate passes or the iteration
//!   budget is spent
//! - **Deterministic gate**: [`compare::ComparisonEngine`] scores candidates
//!   with a pixel-level diff and writes a diff image per comparison
//! - **Swappable collaborators**: screenshots, generation, judging and
//!   critique are traits; `cdp` and `llm` provide real backends
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rfrecreate::{Collaborators, RecreationController, SessionConfig};
//! use rfrecreate::capture::{cdp::CdpScreenshotter, CaptureSource};
//! use rfrecreate::llm::{ChatBackend, LlmConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = Arc::new(ChatBackend::new(LlmConfig::from_env()?)?);
//! let collaborators = Collaborators {
//!     screenshotter: Arc::new(CdpScreenshotter::new()),
//!     generator: backend.clone(),
//!     judge: Some(backend.clone()),
//!     critiquer: backend,
//! };
//! let controller = RecreationController::new(SessionConfig::default(), collaborators)?;
//! let report = controller
//!     .run(CaptureSource::Url("https://example.com".into()))
//!     .await;
//! println!("{} after {} iterations", report.stop_reason, report.iterations.len());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub mod error;
pub use error::{Error, Result};

pub mod artifacts;
pub mod capture;
pub mod collaborators;
pub mod compare;
pub mod controller;
pub mod critique;
pub mod revision;
pub mod session;

// Chat-completions backend for the generator, judge and critiquer seams
#[cfg(feature = "llm")]
pub mod llm;

pub use controller::{Collaborators, RecreationController};
pub use session::{Iteration, PartialIteration, SessionReport, StopReason};

/// Goal handed to the judge and critiquer unless configured otherwise
pub const DEFAULT_GOAL: &str =
    "Recreate the page so that it is visually indistinguishable from the reference screenshot.";

/// Viewport dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// Configuration for one recreation session
///
/// Missing fields fall back to the defaults when deserialized, so a JSON
/// config file only needs the values it overrides.
///
/// # Examples
///
/// ```
/// let cfg = rfrecreate::SessionConfig::default();
/// assert_eq!(cfg.max_iterations, 6);
/// assert!(cfg.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Upper bound on iterations, including the one that may exhaust it
    pub max_iterations: u32,
    /// Minimum pixel-diff score (0-100) for a pass
    pub pixel_threshold: f64,
    /// Minimum judge score (0-100) for a pass when a judge is configured
    pub judge_threshold: f64,
    /// Viewport used for both target and candidate captures
    pub viewport: Viewport,
    /// Settle time after page load before capturing, in milliseconds
    pub settle_ms: u64,
    /// Goal statement for the judge and critiquer
    pub goal: String,
    /// Parent directory of per-run artifact directories
    pub output_dir: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_iterations: 6,
            pixel_threshold: 92.0,
            judge_threshold: 85.0,
            viewport: Viewport::default(),
            settle_ms: 1000,
            goal: DEFAULT_GOAL.to_string(),
            output_dir: PathBuf::from("runs"),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(Error::ConfigError("max_iterations must be at least 1".into()));
        }
        for (name, v) in [
            ("pixel_threshold", self.pixel_threshold),
            ("judge_threshold", self.judge_threshold),
        ] {
            if !(0.0..=100.0).contains(&v) {
                return Err(Error::ConfigError(format!(
                    "{} must be within 0-100, got {}",
                    name, v
                )));
            }
        }
        if self.viewport.width == 0 || self.viewport.height == 0 {
            return Err(Error::ConfigError(format!(
                "viewport must be non-empty, got {}x{}",
                self.viewport.width, self.viewport.height
            )));
        }
        Ok(())
    }

    /// Load a JSON config file; absent keys keep their defaults.
    pub fn from_json_file(path: &std::path::Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("Failed to read {}: {}", path.display(), e)))?;
        serde_json::from_str(&text)
            .map_err(|e| Error::ConfigError(format!("Failed to parse {}: {}", path.display(), e)))
    }
}

/// Fresh run identifier: UTC timestamp plus a random suffix.
pub fn new_run_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", chrono::Utc::now().format("%Y%m%d-%H%M%S"), &suffix[..8])
}
