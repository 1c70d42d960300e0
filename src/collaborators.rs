//! The model-backed capabilities a recreation session depends on.
//!
//! Each trait is a plain request/response seam so the controller can be driven
//! by real backends (see the `llm` module) or by deterministic fakes in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::capture::Screenshot;
use crate::critique::Critique;
use crate::Result;

/// Turns a reference screenshot into markup.
#[async_trait]
pub trait Generator: Send + Sync {
    /// `revision_context` is `None` for the first attempt and the flattened
    /// critique of the previous attempt afterwards.
    async fn generate(
        &self,
        reference: &Screenshot,
        revision_context: Option<&str>,
    ) -> Result<String>;
}

/// Subjective verdict on how close a candidate looks to the target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeOutcome {
    pub pass: bool,
    /// 0-100
    pub score: f64,
    pub notes: String,
}

/// Secondary visual-quality gate. Never the sole pass signal.
#[async_trait]
pub trait Judge: Send + Sync {
    async fn compare(
        &self,
        goal: &str,
        target: &Screenshot,
        candidate: &Screenshot,
    ) -> Result<JudgeOutcome>;
}

/// What the critiquer knows about the attempt it is reviewing
#[derive(Debug, Clone)]
pub struct CritiqueContext {
    pub goal: String,
    pub iteration: u32,
    pub pixel_score: f64,
    pub pixel_notes: String,
    pub judge_notes: Option<String>,
}

/// Produces a prioritized list of fixes for a failing candidate.
#[async_trait]
pub trait Critiquer: Send + Sync {
    async fn critique(
        &self,
        target: &Screenshot,
        candidate: &Screenshot,
        context: &CritiqueContext,
    ) -> Result<Critique>;
}
