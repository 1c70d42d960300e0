//! The recreation state machine.
//!
//! ```text
//! INIT -> CAPTURE_TARGET -> { GENERATE -> CAPTURE_CANDIDATE -> COMPARE -> DECIDE }* -> FINALIZE
//!                                  ^                                          |
//!                                  +------------------ REVISE <---------------+
//! ```
//!
//! DECIDE stops with `success` when the pixel score (and the judge score, if a
//! judge is configured) meet their thresholds, with `exhausted` when the
//! iteration budget is spent, and otherwise revises. Any fatal error stops the
//! session with `error`; the files of the iteration in flight are reported as
//! [`PartialIteration`]. The summary is written on every path.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, warn};
use sha2::{Digest, Sha256};

use crate::artifacts::{iteration_slug, ArtifactStore};
use crate::capture::{CaptureSource, Screenshot, Screenshotter};
use crate::collaborators::{CritiqueContext, Critiquer, Generator, Judge, JudgeOutcome};
use crate::compare::{ComparisonEngine, ComparisonResult};
use crate::revision::build_revision_context;
use crate::session::{Iteration, PartialIteration, Phase, Session, SessionReport, StopReason};
use crate::critique::Critique;
use crate::{new_run_id, Error, Result, SessionConfig};

/// The external capabilities a controller drives
#[derive(Clone)]
pub struct Collaborators {
    pub screenshotter: Arc<dyn Screenshotter>,
    pub generator: Arc<dyn Generator>,
    /// `None` disables the subjective gate
    pub judge: Option<Arc<dyn Judge>>,
    pub critiquer: Arc<dyn Critiquer>,
}

/// Drives recreation sessions. One controller can run many sessions, each in
/// its own artifact namespace.
pub struct RecreationController {
    config: SessionConfig,
    collaborators: Collaborators,
}

/// Markup generated for the iteration currently being built
struct Draft {
    number: u32,
    markup: String,
    markup_sha256: String,
    markup_path: PathBuf,
    revision_context: Option<String>,
}

/// A draft after capture and comparison
struct Scored {
    draft: Draft,
    candidate: Screenshot,
    candidate_path: PathBuf,
    comparison: ComparisonResult,
    judge: Option<JudgeOutcome>,
}

enum Step {
    Generate { context: Option<String> },
    CaptureCandidate(Draft),
    Compare(Draft, Screenshot, PathBuf),
    Decide(Scored),
    Revise(Scored),
    Stop(StopReason),
}

impl Step {
    fn phase(&self) -> Phase {
        match self {
            Step::Generate { .. } => Phase::Generate,
            Step::CaptureCandidate(_) => Phase::CaptureCandidate,
            Step::Compare(..) => Phase::Compare,
            Step::Decide(_) => Phase::Decide,
            Step::Revise(_) => Phase::Revise,
            Step::Stop(_) => Phase::Finalize,
        }
    }
}

/// Mutable state of one running session
struct RunState {
    session: Session,
    store: ArtifactStore,
    engine: ComparisonEngine,
    last_sha256: Option<String>,
    /// Iteration started but not yet recorded
    in_flight: Option<PartialIteration>,
}

impl RecreationController {
    pub fn new(config: SessionConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            collaborators,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Run a session against `target` under a fresh run id.
    pub async fn run(&self, target: CaptureSource) -> SessionReport {
        self.run_with_id(target, new_run_id()).await
    }

    /// Run a session whose artifacts live under `<output_dir>/<run_id>`.
    ///
    /// Never fails: errors end the session with [`StopReason::Error`] and are
    /// reported on the returned [`SessionReport`].
    pub async fn run_with_id(&self, target: CaptureSource, run_id: String) -> SessionReport {
        let store = ArtifactStore::new(&self.config.output_dir, &run_id);
        let engine = ComparisonEngine::new(store.diff_dir(), self.config.pixel_threshold);
        let mut run = RunState {
            session: Session::new(run_id, self.config.clone()),
            store,
            engine,
            last_sha256: None,
            in_flight: None,
        };
        info!(
            "[{}] recreating {} (max {} iterations, pixel >= {}, judge {})",
            run.session.run_id(),
            target.describe(),
            self.config.max_iterations,
            self.config.pixel_threshold,
            if self.collaborators.judge.is_some() {
                format!(">= {}", self.config.judge_threshold)
            } else {
                "disabled".to_string()
            }
        );
        self.transition(&run, Phase::Init, Phase::CaptureTarget);

        let (stop, error) = match self.capture_target(&target, &mut run).await {
            Ok(target) => {
                self.transition(&run, Phase::CaptureTarget, Phase::Generate);
                self.iterate(&target, &mut run).await
            }
            Err(e) => {
                warn!("[{}] target capture failed: {}", run.session.run_id(), e);
                (StopReason::Error, Some(e))
            }
        };
        self.finalize(run, stop, error)
    }

    fn transition(&self, run: &RunState, from: Phase, to: Phase) {
        debug!("[{}] {} -> {}", run.session.run_id(), from, to);
    }

    async fn capture_target(&self, source: &CaptureSource, run: &mut RunState) -> Result<Screenshot> {
        let shot = self
            .collaborators
            .screenshotter
            .capture(source, self.config.viewport, self.config.settle_ms)
            .await?;
        let path = run.store.write_target(&shot.png_data)?;
        run.session.set_target_screenshot(path);
        Ok(shot)
    }

    async fn iterate(&self, target: &Screenshot, run: &mut RunState) -> (StopReason, Option<Error>) {
        let mut step = Step::Generate { context: None };
        loop {
            let from = step.phase();
            let next = match step {
                Step::Generate { context } => self.generate(target, context, run).await,
                Step::CaptureCandidate(draft) => self.capture_candidate(draft, run).await,
                Step::Compare(draft, candidate, path) => {
                    self.compare(target, draft, candidate, path, run).await
                }
                Step::Decide(scored) => Ok(self.decide(scored, run)),
                Step::Revise(scored) => Ok(self.revise(target, scored, run).await),
                Step::Stop(reason) => return (reason, None),
            };
            step = match next {
                Ok(next) => {
                    self.transition(run, from, next.phase());
                    next
                }
                Err(e) => {
                    if let Some(partial) = run.in_flight.as_mut() {
                        partial.aborted_in = Some(from);
                    }
                    warn!(
                        "[{}] iteration {} aborted in {}: {}",
                        run.session.run_id(),
                        run.session.next_number(),
                        from,
                        e
                    );
                    return (StopReason::Error, Some(e));
                }
            };
        }
    }

    async fn generate(
        &self,
        target: &Screenshot,
        context: Option<String>,
        run: &mut RunState,
    ) -> Result<Step> {
        let number = run.session.next_number();
        run.in_flight = Some(PartialIteration::new(number));
        let markup = self
            .collaborators
            .generator
            .generate(target, context.as_deref())
            .await?;

        let sha = hex::encode(Sha256::digest(markup.as_bytes()));
        if run.last_sha256.as_deref() == Some(sha.as_str()) {
            warn!(
                "[{}] iteration {} produced markup identical to the previous attempt",
                run.session.run_id(),
                number
            );
        }
        run.last_sha256 = Some(sha.clone());

        let markup_path = run.store.write_markup(number, &markup)?;
        if let Some(partial) = run.in_flight.as_mut() {
            partial.markup_path = Some(markup_path.clone());
        }
        Ok(Step::CaptureCandidate(Draft {
            number,
            markup,
            markup_sha256: sha,
            markup_path,
            revision_context: context,
        }))
    }

    async fn capture_candidate(&self, draft: Draft, run: &mut RunState) -> Result<Step> {
        let source = CaptureSource::Markup(draft.markup.clone());
        let shot = self
            .collaborators
            .screenshotter
            .capture(&source, self.config.viewport, self.config.settle_ms)
            .await?;
        let path = run.store.write_candidate(draft.number, &shot.png_data)?;
        if let Some(partial) = run.in_flight.as_mut() {
            partial.candidate_screenshot = Some(path.clone());
        }
        Ok(Step::Compare(draft, shot, path))
    }

    /// Pixel diff on a blocking thread, judge (if any) concurrently.
    async fn compare(
        &self,
        target: &Screenshot,
        draft: Draft,
        candidate: Screenshot,
        candidate_path: PathBuf,
        run: &mut RunState,
    ) -> Result<Step> {
        let engine = run.engine.clone();
        let slug = iteration_slug(draft.number);
        let (t, c) = (target.clone(), candidate.clone());
        let pixel = tokio::task::spawn_blocking(move || engine.compare(&t, &c, &slug));

        let judge = async {
            match &self.collaborators.judge {
                Some(judge) => judge
                    .compare(&self.config.goal, target, &candidate)
                    .await
                    .map(Some),
                None => Ok(None),
            }
        };

        let (pixel, judge) = futures::future::join(pixel, judge).await;
        let comparison =
            pixel.map_err(|e| Error::Other(format!("Comparison task failed: {}", e)))??;
        if let Some(partial) = run.in_flight.as_mut() {
            partial.diff_image = Some(comparison.diff_image.clone());
        }
        let judge = judge?;

        Ok(Step::Decide(Scored {
            draft,
            candidate,
            candidate_path,
            comparison,
            judge,
        }))
    }

    fn decide(&self, scored: Scored, run: &mut RunState) -> Step {
        let judge_ok = scored
            .judge
            .as_ref()
            .map_or(true, |j| j.score >= self.config.judge_threshold);
        let passed = scored.comparison.pass && judge_ok;

        info!(
            "[{}] iteration {}/{}: pixel {:.2}{} -> {}",
            run.session.run_id(),
            scored.draft.number,
            self.config.max_iterations,
            scored.comparison.score,
            scored
                .judge
                .as_ref()
                .map(|j| format!(", judge {:.1}", j.score))
                .unwrap_or_default(),
            if passed { "pass" } else { "fail" }
        );

        if passed {
            self.record(scored, true, None, None, run);
            Step::Stop(StopReason::Success)
        } else if run.session.remaining() > 1 {
            Step::Revise(scored)
        } else {
            self.record(scored, false, None, None, run);
            Step::Stop(StopReason::Exhausted)
        }
    }

    /// Best-effort critique, then loop back with context built from it alone.
    async fn revise(&self, target: &Screenshot, scored: Scored, run: &mut RunState) -> Step {
        let context = CritiqueContext {
            goal: self.config.goal.clone(),
            iteration: scored.draft.number,
            pixel_score: scored.comparison.score,
            pixel_notes: scored.comparison.notes.clone(),
            judge_notes: scored.judge.as_ref().map(|j| j.notes.clone()),
        };

        let (critique, critique_error) = match self
            .collaborators
            .critiquer
            .critique(target, &scored.candidate, &context)
            .await
        {
            Ok(mut critique) => {
                critique.total_issues = critique.items.len();
                (Some(critique), None)
            }
            Err(e) => {
                warn!(
                    "[{}] critique for iteration {} failed, continuing without it: {}",
                    run.session.run_id(),
                    scored.draft.number,
                    e
                );
                (None, Some(e.to_string()))
            }
        };

        let next_context = build_revision_context(critique.as_ref());
        self.record(scored, false, critique, critique_error, run);
        Step::Generate {
            context: Some(next_context),
        }
    }

    fn record(
        &self,
        scored: Scored,
        passed: bool,
        critique: Option<Critique>,
        critique_error: Option<String>,
        run: &mut RunState,
    ) {
        let Scored {
            draft,
            candidate_path,
            comparison,
            judge,
            ..
        } = scored;
        run.in_flight = None;
        run.session.push(Iteration {
            number: draft.number,
            markup: draft.markup,
            markup_sha256: draft.markup_sha256,
            markup_path: draft.markup_path,
            candidate_screenshot: candidate_path,
            revision_context: draft.revision_context,
            comparison,
            judge,
            passed,
            critique,
            critique_error,
            completed_at: Utc::now(),
        });
    }

    fn finalize(&self, run: RunState, stop: StopReason, error: Option<Error>) -> SessionReport {
        let RunState {
            session,
            store,
            in_flight,
            ..
        } = run;
        let partial = match stop {
            StopReason::Error => in_flight,
            _ => None,
        };

        let final_output = match (stop, session.iterations().last()) {
            (StopReason::Success | StopReason::Exhausted, Some(last)) => {
                match store.write_final(&last.markup) {
                    Ok(path) => Some(path),
                    Err(e) => {
                        warn!("[{}] failed to write final markup: {}", session.run_id(), e);
                        None
                    }
                }
            }
            _ => None,
        };

        let mut report =
            session.finalize(stop, error.map(|e| e.to_string()), final_output, partial);
        match store.write_summary(&report) {
            Ok(path) => report.summary_path = Some(path),
            Err(e) => warn!("[{}] failed to write session summary: {}", report.run_id, e),
        }

        info!(
            "[{}] finished: {} after {} iteration(s) in {}ms{}",
            report.run_id,
            report.stop_reason,
            report.iterations.len(),
            report.elapsed_ms,
            report
                .best_score()
                .map(|s| format!(", best pixel score {:.2}", s))
                .unwrap_or_default()
        );
        report
    }
}
