//! Session and iteration records produced by the controller

use std::fmt;
use std::path::PathBuf;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::collaborators::JudgeOutcome;
use crate::compare::ComparisonResult;
use crate::critique::Critique;
use crate::SessionConfig;

/// States of the recreation state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Init,
    CaptureTarget,
    Generate,
    CaptureCandidate,
    Compare,
    Decide,
    Revise,
    Finalize,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Init => "INIT",
            Phase::CaptureTarget => "CAPTURE_TARGET",
            Phase::Generate => "GENERATE",
            Phase::CaptureCandidate => "CAPTURE_CANDIDATE",
            Phase::Compare => "COMPARE",
            Phase::Decide => "DECIDE",
            Phase::Revise => "REVISE",
            Phase::Finalize => "FINALIZE",
        };
        f.write_str(s)
    }
}

/// Why a session stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopReason {
    Success,
    Exhausted,
    Error,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StopReason::Success => "success",
            StopReason::Exhausted => "exhausted",
            StopReason::Error => "error",
        };
        f.write_str(s)
    }
}

/// One completed generate-capture-compare cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Iteration {
    /// 1-based, no gaps
    pub number: u32,
    pub markup: String,
    /// Hex SHA-256 of `markup`
    pub markup_sha256: String,
    pub markup_path: PathBuf,
    pub candidate_screenshot: PathBuf,
    /// Context the generator was given for this attempt
    pub revision_context: Option<String>,
    pub comparison: ComparisonResult,
    pub judge: Option<JudgeOutcome>,
    pub passed: bool,
    pub critique: Option<Critique>,
    /// Set when the critique collaborator failed for this iteration
    pub critique_error: Option<String>,
    pub completed_at: DateTime<Utc>,
}

/// Files an aborted iteration left on disk. It never became an [`Iteration`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialIteration {
    pub number: u32,
    /// State the session was in when the iteration failed
    pub aborted_in: Option<Phase>,
    pub markup_path: Option<PathBuf>,
    pub candidate_screenshot: Option<PathBuf>,
    pub diff_image: Option<PathBuf>,
}

impl PartialIteration {
    pub fn new(number: u32) -> Self {
        Self {
            number,
            ..Default::default()
        }
    }
}

/// A recreation attempt while it is running. Only the controller mutates it.
#[derive(Debug)]
pub struct Session {
    run_id: String,
    config: SessionConfig,
    started_at: DateTime<Utc>,
    started: Instant,
    iterations: Vec<Iteration>,
    target_screenshot: Option<PathBuf>,
}

impl Session {
    pub fn new(run_id: String, config: SessionConfig) -> Self {
        Self {
            run_id,
            config,
            started_at: Utc::now(),
            started: Instant::now(),
            iterations: Vec::new(),
            target_screenshot: None,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn iterations(&self) -> &[Iteration] {
        &self.iterations
    }

    /// Number the next iteration will carry
    pub fn next_number(&self) -> u32 {
        self.iterations.len() as u32 + 1
    }

    /// Iterations still allowed after the ones already recorded
    pub fn remaining(&self) -> u32 {
        self.config
            .max_iterations
            .saturating_sub(self.iterations.len() as u32)
    }

    pub(crate) fn set_target_screenshot(&mut self, path: PathBuf) {
        self.target_screenshot = Some(path);
    }

    pub(crate) fn push(&mut self, iteration: Iteration) {
        debug_assert_eq!(iteration.number, self.next_number());
        self.iterations.push(iteration);
    }

    pub(crate) fn finalize(
        self,
        stop_reason: StopReason,
        error: Option<String>,
        final_output: Option<PathBuf>,
        partial: Option<PartialIteration>,
    ) -> SessionReport {
        SessionReport {
            run_id: self.run_id,
            stop_reason,
            error,
            started_at: self.started_at,
            finished_at: Utc::now(),
            elapsed_ms: self.started.elapsed().as_millis() as u64,
            config: self.config,
            target_screenshot: self.target_screenshot,
            final_output,
            iterations: self.iterations,
            partial,
            summary_path: None,
        }
    }
}

/// Immutable outcome of a finished session, also written as `summary.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub run_id: String,
    pub stop_reason: StopReason,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub config: SessionConfig,
    pub target_screenshot: Option<PathBuf>,
    /// Markup of the last iteration, passing or not
    pub final_output: Option<PathBuf>,
    pub iterations: Vec<Iteration>,
    /// Artifacts of the iteration that was in flight when the session errored
    #[serde(default)]
    pub partial: Option<PartialIteration>,
    /// Where the summary landed; `None` if it could not be written
    #[serde(skip)]
    pub summary_path: Option<PathBuf>,
}

impl SessionReport {
    pub fn succeeded(&self) -> bool {
        self.stop_reason == StopReason::Success
    }

    pub fn last_iteration(&self) -> Option<&Iteration> {
        self.iterations.last()
    }

    pub fn best_score(&self) -> Option<f64> {
        self.iterations
            .iter()
            .map(|it| it.comparison.score)
            .fold(None, |best, s| Some(best.map_or(s, |b: f64| b.max(s))))
    }
}
