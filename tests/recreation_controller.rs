//! Controller behaviour against deterministic fake collaborators.
//!
//! The fake screenshotter renders a 10x10 white target; candidate markup is a
//! number N and renders as the target with its first N pixels blackened, so a
//! candidate `"20"` scores exactly 80. Markup `"tall"` renders one row too
//! many and `"timeout"` fails to capture.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use image::{Rgba, RgbaImage};

use rfrecreate::capture::{CaptureErrorKind, CaptureSource, Screenshot, Screenshotter};
use rfrecreate::collaborators::{CritiqueContext, Critiquer, Generator, Judge, JudgeOutcome};
use rfrecreate::critique::{Critique, CritiqueItem, Priority};
use rfrecreate::revision::NO_ISSUES_CONTEXT;
use rfrecreate::session::Phase;
use rfrecreate::{
    Collaborators, Error, RecreationController, Result, SessionConfig, SessionReport, StopReason,
    Viewport,
};

const SIDE: u32 = 10;

fn render(black_pixels: u32, height: u32) -> Screenshot {
    let mut img = RgbaImage::from_pixel(SIDE, height, Rgba([255, 255, 255, 255]));
    for i in 0..black_pixels.min(SIDE * height) {
        img.put_pixel(i % SIDE, i / SIDE, Rgba([0, 0, 0, 255]));
    }
    Screenshot::from_rgba(&img).unwrap()
}

struct FakeScreenshotter {
    fail_target: bool,
}

#[async_trait]
impl Screenshotter for FakeScreenshotter {
    async fn capture(&self, source: &CaptureSource, _: Viewport, _: u64) -> Result<Screenshot> {
        match source {
            CaptureSource::Url(_) if self.fail_target => {
                Err(Error::capture(CaptureErrorKind::Unreachable, "connection refused"))
            }
            CaptureSource::Url(_) => Ok(render(0, SIDE)),
            CaptureSource::Markup(m) if m == "tall" => Ok(render(0, SIDE + 1)),
            CaptureSource::Markup(m) if m == "timeout" => Err(Error::capture(
                CaptureErrorKind::Timeout,
                "page never settled",
            )),
            CaptureSource::Markup(m) => {
                let n = m.trim().parse().map_err(|_| Error::Other(format!("bad fake markup {}", m)))?;
                Ok(render(n, SIDE))
            }
        }
    }
}

/// Replays `outputs` in order, repeating the last one, and records the
/// revision context of every call. Call number `fail_on` (1-based) fails.
struct FakeGenerator {
    outputs: Vec<&'static str>,
    fail_on: Option<usize>,
    contexts: Mutex<Vec<Option<String>>>,
}

impl FakeGenerator {
    fn new(outputs: Vec<&'static str>) -> Arc<Self> {
        Self::failing_on(outputs, None)
    }

    fn failing_on(outputs: Vec<&'static str>, fail_on: Option<usize>) -> Arc<Self> {
        Arc::new(Self {
            outputs,
            fail_on,
            contexts: Mutex::new(Vec::new()),
        })
    }

    fn contexts(&self) -> Vec<Option<String>> {
        self.contexts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Generator for FakeGenerator {
    async fn generate(&self, _: &Screenshot, revision_context: Option<&str>) -> Result<String> {
        let mut contexts = self.contexts.lock().unwrap();
        let idx = contexts.len().min(self.outputs.len() - 1);
        contexts.push(revision_context.map(str::to_string));
        if self.fail_on == Some(contexts.len()) {
            return Err(Error::GenerationFailure("rate limited".into()));
        }
        Ok(self.outputs[idx].to_string())
    }
}

enum CritiqueMode {
    Succeed,
    AlwaysFail,
    FailOn(u32),
}

struct FakeCritiquer {
    mode: CritiqueMode,
    calls: Mutex<Vec<u32>>,
}

impl FakeCritiquer {
    fn new(mode: CritiqueMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<u32> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Critiquer for FakeCritiquer {
    async fn critique(&self, _: &Screenshot, _: &Screenshot, ctx: &CritiqueContext) -> Result<Critique> {
        self.calls.lock().unwrap().push(ctx.iteration);
        let fail = match self.mode {
            CritiqueMode::Succeed => false,
            CritiqueMode::AlwaysFail => true,
            CritiqueMode::FailOn(n) => n == ctx.iteration,
        };
        if fail {
            return Err(Error::CritiqueFailure("model unavailable".into()));
        }
        Ok(Critique::new(
            format!("score was {:.0}", ctx.pixel_score),
            vec![CritiqueItem {
                priority: Priority::High,
                category: "layout".into(),
                element: format!("element-from-{}", ctx.iteration),
                issue: "wrong position".into(),
                expected: "top".into(),
                actual: "bottom".into(),
            }],
        ))
    }
}

/// Returns `scores` in order; an exhausted list means failure.
struct FakeJudge {
    scores: Vec<f64>,
    calls: AtomicUsize,
}

#[async_trait]
impl Judge for FakeJudge {
    async fn compare(&self, _: &str, _: &Screenshot, _: &Screenshot) -> Result<JudgeOutcome> {
        let i = self.calls.fetch_add(1, Ordering::SeqCst);
        match self.scores.get(i) {
            Some(&score) => Ok(JudgeOutcome {
                pass: score >= 85.0,
                score,
                notes: format!("judge call {}", i + 1),
            }),
            None => Err(Error::JudgeFailure("judge timed out".into())),
        }
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    config: SessionConfig,
    generator: Arc<FakeGenerator>,
    critiquer: Arc<FakeCritiquer>,
    judge: Option<Arc<FakeJudge>>,
    fail_target: bool,
}

impl Harness {
    fn new(max_iterations: u32, outputs: Vec<&'static str>, mode: CritiqueMode) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = SessionConfig {
            max_iterations,
            pixel_threshold: 92.0,
            judge_threshold: 85.0,
            viewport: Viewport { width: SIDE, height: SIDE },
            settle_ms: 0,
            output_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        Self {
            _dir: dir,
            config,
            generator: FakeGenerator::new(outputs),
            critiquer: FakeCritiquer::new(mode),
            judge: None,
            fail_target: false,
        }
    }

    fn with_judge(mut self, scores: Vec<f64>) -> Self {
        self.judge = Some(Arc::new(FakeJudge {
            scores,
            calls: AtomicUsize::new(0),
        }));
        self
    }

    fn with_generator_failing_on(mut self, call: usize) -> Self {
        self.generator = FakeGenerator::failing_on(self.generator.outputs.clone(), Some(call));
        self
    }

    fn controller(&self) -> RecreationController {
        let collaborators = Collaborators {
            screenshotter: Arc::new(FakeScreenshotter {
                fail_target: self.fail_target,
            }),
            generator: self.generator.clone(),
            judge: self.judge.clone().map(|j| j as Arc<dyn Judge>),
            critiquer: self.critiquer.clone(),
        };
        RecreationController::new(self.config.clone(), collaborators).expect("valid config")
    }

    async fn run(&self) -> SessionReport {
        self.controller()
            .run(CaptureSource::Url("http://target.test/".into()))
            .await
    }
}

#[tokio::test]
async fn stops_at_first_passing_iteration() {
    let h = Harness::new(3, vec!["20", "5", "0"], CritiqueMode::Succeed);
    let report = h.run().await;

    assert_eq!(report.stop_reason, StopReason::Success);
    assert!(report.error.is_none());
    assert_eq!(report.iterations.len(), 2);

    let first = &report.iterations[0];
    assert_eq!(first.number, 1);
    assert_eq!(first.comparison.score, 80.0);
    assert!(!first.passed);
    assert!(first.critique.is_some());
    assert!(first.revision_context.is_none());

    let second = &report.iterations[1];
    assert_eq!(second.number, 2);
    assert_eq!(second.comparison.score, 95.0);
    assert!(second.passed);
    assert!(second.critique.is_none());
    assert!(second.revision_context.as_deref().unwrap().contains("element-from-1"));

    assert_eq!(h.critiquer.calls(), vec![1]);
    assert_eq!(h.generator.contexts().len(), 2);

    let final_path = report.final_output.as_ref().expect("final output");
    assert_eq!(std::fs::read_to_string(final_path).unwrap(), "5");

    let run_dir = h.config.output_dir.join(&report.run_id);
    assert!(run_dir.join("target.png").exists());
    assert!(run_dir.join("iteration-01/candidate.png").exists());
    assert!(run_dir.join("iteration-02/markup.html").exists());
    assert!(!run_dir.join("iteration-03").exists());
    assert!(report.iterations.iter().all(|it| it.comparison.diff_image.exists()));

    let summary: serde_json::Value =
        serde_json::from_slice(&std::fs::read(report.summary_path.as_ref().unwrap()).unwrap()).unwrap();
    assert_eq!(summary["stop_reason"], "success");
    assert_eq!(summary["iterations"].as_array().unwrap().len(), 2);
    assert_eq!(summary["iterations"][0]["critique"]["total_issues"], 1);
}

#[tokio::test]
async fn single_iteration_budget_exhausts_without_critique() {
    let h = Harness::new(1, vec!["50"], CritiqueMode::Succeed);
    let report = h.run().await;

    assert_eq!(report.stop_reason, StopReason::Exhausted);
    assert_eq!(report.iterations.len(), 1);
    assert!(h.critiquer.calls().is_empty());
    assert!(report.iterations[0].critique.is_none());
    let final_path = report.final_output.as_ref().expect("non-passing final output");
    assert_eq!(std::fs::read_to_string(final_path).unwrap(), "50");
}

#[tokio::test]
async fn single_iteration_budget_can_succeed() {
    let h = Harness::new(1, vec!["0"], CritiqueMode::Succeed);
    let report = h.run().await;

    assert_eq!(report.stop_reason, StopReason::Success);
    assert_eq!(report.iterations.len(), 1);
    assert_eq!(report.iterations[0].comparison.score, 100.0);
}

#[tokio::test]
async fn default_budget_runs_six_iterations() {
    let mut h = Harness::new(1, vec!["50"], CritiqueMode::Succeed);
    h.config.max_iterations = SessionConfig::default().max_iterations;
    let report = h.run().await;

    assert_eq!(report.stop_reason, StopReason::Exhausted);
    let numbers: Vec<u32> = report.iterations.iter().map(|it| it.number).collect();
    assert_eq!(numbers, vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(h.critiquer.calls(), vec![1, 2, 3, 4, 5]);
    assert!(report.iterations[5].critique.is_none());
}

#[tokio::test]
async fn revision_context_comes_only_from_previous_critique() {
    let h = Harness::new(3, vec!["50"], CritiqueMode::FailOn(2));
    let report = h.run().await;

    assert_eq!(report.stop_reason, StopReason::Exhausted);
    let contexts = h.generator.contexts();
    assert_eq!(contexts.len(), 3);
    assert!(contexts[0].is_none());
    assert!(contexts[1].as_deref().unwrap().contains("element-from-1"));
    // iteration 2's critique failed: no fallback to iteration 1's critique
    assert_eq!(contexts[2].as_deref(), Some(NO_ISSUES_CONTEXT));
    assert!(report.iterations[1].critique.is_none());
    assert!(report.iterations[1].critique_error.is_some());
}

#[tokio::test]
async fn failing_critiquer_never_aborts_the_session() {
    let h = Harness::new(4, vec!["50"], CritiqueMode::AlwaysFail);
    let report = h.run().await;

    assert_eq!(report.stop_reason, StopReason::Exhausted);
    assert!(report.error.is_none());
    assert_eq!(report.iterations.len(), 4);
    assert!(report.iterations.iter().all(|it| it.critique.is_none()));
    for it in &report.iterations[..3] {
        assert!(it.critique_error.as_deref().unwrap().contains("model unavailable"));
    }
}

#[tokio::test]
async fn critique_failure_still_allows_success() {
    let h = Harness::new(3, vec!["30", "2"], CritiqueMode::AlwaysFail);
    let report = h.run().await;

    assert_eq!(report.stop_reason, StopReason::Success);
    assert_eq!(report.iterations.len(), 2);
    assert!(report.iterations[0].critique_error.is_some());
}

#[tokio::test]
async fn unreachable_target_errors_before_any_iteration() {
    let mut h = Harness::new(3, vec!["0"], CritiqueMode::Succeed);
    h.fail_target = true;
    let report = h.run().await;

    assert_eq!(report.stop_reason, StopReason::Error);
    assert!(report.iterations.is_empty());
    assert!(h.generator.contexts().is_empty());
    assert!(report.final_output.is_none());
    assert!(report.error.as_deref().unwrap().contains("unreachable"));

    let summary = report.summary_path.as_ref().expect("summary written on error");
    let summary: serde_json::Value = serde_json::from_slice(&std::fs::read(summary).unwrap()).unwrap();
    assert_eq!(summary["stop_reason"], "error");
}

#[tokio::test]
async fn judge_must_also_pass() {
    let h = Harness::new(2, vec!["0"], CritiqueMode::Succeed).with_judge(vec![70.0, 90.0]);
    let report = h.run().await;

    assert_eq!(report.stop_reason, StopReason::Success);
    assert_eq!(report.iterations.len(), 2);
    let first = &report.iterations[0];
    assert!(first.comparison.pass);
    assert_eq!(first.judge.as_ref().unwrap().score, 70.0);
    assert!(!first.passed);
    assert!(report.iterations[1].passed);
}

#[tokio::test]
async fn judge_failure_aborts_but_keeps_completed_iterations() {
    let h = Harness::new(3, vec!["50"], CritiqueMode::Succeed).with_judge(vec![60.0]);
    let report = h.run().await;

    assert_eq!(report.stop_reason, StopReason::Error);
    assert_eq!(report.iterations.len(), 1);
    assert!(report.error.as_deref().unwrap().contains("Judge failed"));
    // partial artifacts of the aborted iteration remain on disk
    let run_dir = h.config.output_dir.join(&report.run_id);
    assert!(run_dir.join("iteration-02/candidate.png").exists());

    let partial = report.partial.as_ref().expect("aborted iteration reported");
    assert_eq!(partial.number, 2);
    assert_eq!(partial.aborted_in, Some(Phase::Compare));
    assert!(partial.markup_path.as_ref().unwrap().exists());
    assert_eq!(
        partial.candidate_screenshot.as_deref(),
        Some(run_dir.join("iteration-02/candidate.png").as_path())
    );
    assert!(partial.diff_image.as_ref().unwrap().exists());
}

#[tokio::test]
async fn generation_failure_keeps_completed_iterations() {
    let h = Harness::new(5, vec!["50"], CritiqueMode::Succeed).with_generator_failing_on(3);
    let report = h.run().await;

    assert_eq!(report.stop_reason, StopReason::Error);
    assert_eq!(report.iterations.len(), 2);
    assert!(report.error.as_deref().unwrap().contains("Generation failed"));
    assert!(report.final_output.is_none());

    let partial = report.partial.as_ref().unwrap();
    assert_eq!(partial.number, 3);
    assert_eq!(partial.aborted_in, Some(Phase::Generate));
    assert!(partial.markup_path.is_none());

    let summary: serde_json::Value =
        serde_json::from_slice(&std::fs::read(report.summary_path.as_ref().unwrap()).unwrap()).unwrap();
    assert_eq!(summary["stop_reason"], "error");
    assert_eq!(summary["iterations"].as_array().unwrap().len(), 2);
    assert_eq!(summary["partial"]["number"], 3);
}

#[tokio::test]
async fn candidate_capture_failure_aborts_the_session() {
    let h = Harness::new(4, vec!["50", "timeout"], CritiqueMode::Succeed);
    let report = h.run().await;

    assert_eq!(report.stop_reason, StopReason::Error);
    assert_eq!(report.iterations.len(), 1);
    assert!(report.error.as_deref().unwrap().contains("timeout"));
    assert_eq!(h.critiquer.calls(), vec![1]);

    let partial = report.partial.as_ref().unwrap();
    assert_eq!(partial.number, 2);
    assert_eq!(partial.aborted_in, Some(Phase::CaptureCandidate));
    assert!(partial.markup_path.as_ref().unwrap().exists());
    assert!(partial.candidate_screenshot.is_none());

    let summary: serde_json::Value =
        serde_json::from_slice(&std::fs::read(report.summary_path.as_ref().unwrap()).unwrap()).unwrap();
    assert_eq!(summary["stop_reason"], "error");
}

#[tokio::test]
async fn unwritable_final_and_summary_keep_the_stop_reason() {
    let h = Harness::new(2, vec!["0"], CritiqueMode::Succeed);
    let run_dir = h.config.output_dir.join("fixed-run");
    // directories where the files should go make both writes fail
    std::fs::create_dir_all(run_dir.join("final.html")).unwrap();
    std::fs::create_dir_all(run_dir.join("summary.json")).unwrap();

    let report = h
        .controller()
        .run_with_id(CaptureSource::Url("http://target.test/".into()), "fixed-run".into())
        .await;

    assert_eq!(report.stop_reason, StopReason::Success);
    assert!(report.error.is_none());
    assert!(report.final_output.is_none());
    assert!(report.summary_path.is_none());
    assert!(report.partial.is_none());
    assert_eq!(report.iterations.len(), 1);
}

#[tokio::test]
async fn candidate_size_mismatch_is_fatal() {
    let h = Harness::new(3, vec!["tall"], CritiqueMode::Succeed);
    let report = h.run().await;

    assert_eq!(report.stop_reason, StopReason::Error);
    assert!(report.iterations.is_empty());
    assert!(report.error.as_deref().unwrap().contains("Dimension mismatch"));
    assert!(!h.config.output_dir.join(&report.run_id).join("diffs").exists());
}

#[tokio::test]
async fn concurrent_sessions_use_separate_namespaces() {
    let h = Harness::new(2, vec!["0"], CritiqueMode::Succeed);
    let controller = h.controller();
    let (a, b) = tokio::join!(
        controller.run(CaptureSource::Url("http://a.test/".into())),
        controller.run(CaptureSource::Url("http://b.test/".into()))
    );

    assert_ne!(a.run_id, b.run_id);
    assert_ne!(a.final_output, b.final_output);
    assert!(a.succeeded() && b.succeeded());
}

#[test]
fn zero_iteration_budget_is_rejected() {
    let h = Harness::new(0, vec!["0"], CritiqueMode::Succeed);
    let collaborators = Collaborators {
        screenshotter: Arc::new(FakeScreenshotter { fail_target: false }),
        generator: h.generator.clone(),
        judge: None,
        critiquer: h.critiquer.clone(),
    };
    assert!(matches!(
        RecreationController::new(h.config.clone(), collaborators),
        Err(Error::ConfigError(_))
    ));
}
