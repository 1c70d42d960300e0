//! Chrome DevTools Protocol screenshotter (uses the `headless_chrome` crate)
//!
//! Every capture launches its own headless Chrome, loads the page, waits for
//! it to settle and screenshots the viewport. The browser is dropped before
//! `capture` returns, whether it succeeded or not, so nothing is held open
//! between iterations.
//!
//! One deadline covers the whole job: each tab call gets only the time left
//! on it. If the async side still overruns, it waits for the blocking job to
//! unwind (and close Chrome) before reporting the timeout.

use std::fmt::Display;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine as Base64Engine;
use headless_chrome::protocol::cdp::Page;
use headless_chrome::{Browser, LaunchOptions};
use log::{debug, warn};

use super::{CaptureErrorKind, CaptureSource, Screenshot, Screenshotter};
use crate::{Error, Result, Viewport};

/// Headless-Chrome backed [`Screenshotter`]
#[derive(Debug, Clone)]
pub struct CdpScreenshotter {
    /// Budget for one capture, on top of the settle time
    timeout_ms: u64,
    /// Screenshot only the first element matching this CSS selector
    selector: Option<String>,
    chrome_path: Option<PathBuf>,
}

impl Default for CdpScreenshotter {
    fn default() -> Self {
        Self::new()
    }
}

impl CdpScreenshotter {
    pub fn new() -> Self {
        Self {
            timeout_ms: 30_000,
            selector: None,
            chrome_path: None,
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    pub fn with_chrome_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.chrome_path = Some(path.into());
        self
    }
}

#[async_trait]
impl Screenshotter for CdpScreenshotter {
    async fn capture(
        &self,
        source: &CaptureSource,
        viewport: Viewport,
        wait_ms: u64,
    ) -> Result<Screenshot> {
        let url = match source {
            CaptureSource::Url(url) => url.clone(),
            CaptureSource::Markup(html) => markup_data_url(html),
        };
        let budget = Duration::from_millis(self.timeout_ms + wait_ms);
        let job = CaptureJob {
            url,
            viewport,
            wait_ms,
            selector: self.selector.clone(),
            chrome_path: self.chrome_path.clone(),
            deadline: Deadline::after(budget),
        };
        debug!("capturing {} at {}x{}", source.describe(), viewport.width, viewport.height);

        run_bounded(move || job.run(), budget, &source.describe()).await
    }
}

/// Run a blocking capture under `budget`. On overrun the job is still awaited,
/// so whatever it owns is dropped before the timeout is reported.
async fn run_bounded<F>(job: F, budget: Duration, what: &str) -> Result<Screenshot>
where
    F: FnOnce() -> Result<Screenshot> + Send + 'static,
{
    let mut handle = tokio::task::spawn_blocking(job);
    match tokio::time::timeout(budget, &mut handle).await {
        Ok(Ok(res)) => res,
        Ok(Err(join)) => Err(Error::capture(
            CaptureErrorKind::Other,
            format!("capture task failed: {}", join),
        )),
        Err(_) => {
            warn!(
                "capture of {} overran {}ms, waiting for the browser to close",
                what,
                budget.as_millis()
            );
            let _ = handle.await;
            Err(Error::capture(
                CaptureErrorKind::Timeout,
                format!("capture of {} exceeded {}ms", what, budget.as_millis()),
            ))
        }
    }
}

/// Wall-clock limit shared by every step of one capture job
#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
        }
    }

    /// Time left before `step` must finish
    fn remaining(&self, step: &str) -> Result<Duration> {
        let left = self.at.saturating_duration_since(Instant::now());
        if left.is_zero() {
            return Err(Error::capture(
                CaptureErrorKind::Timeout,
                format!("{}: capture budget of {}ms spent", step, self.budget.as_millis()),
            ));
        }
        Ok(left)
    }
}

struct CaptureJob {
    url: String,
    viewport: Viewport,
    wait_ms: u64,
    selector: Option<String>,
    chrome_path: Option<PathBuf>,
    deadline: Deadline,
}

impl CaptureJob {
    fn run(self) -> Result<Screenshot> {
        let launch_options = LaunchOptions::default_builder()
            .headless(true)
            .window_size(Some((self.viewport.width, self.viewport.height)))
            .path(self.chrome_path.clone())
            .build()
            .map_err(|e| {
                Error::capture(
                    CaptureErrorKind::Other,
                    format!("Failed to build launch options: {}", e),
                )
            })?;

        let browser = Browser::new(launch_options)
            .map_err(|e| classify(e, CaptureErrorKind::Other, "Failed to launch browser"))?;
        let tab = browser
            .new_tab()
            .map_err(|e| classify(e, CaptureErrorKind::Other, "Failed to create tab"))?;

        tab.set_default_timeout(self.deadline.remaining("Navigation")?);
        tab.navigate_to(&self.url)
            .map_err(|e| classify(e, CaptureErrorKind::Unreachable, "Navigation failed"))?;
        tab.set_default_timeout(self.deadline.remaining("Wait for navigation")?);
        tab.wait_until_navigated().map_err(|e| {
            classify(e, CaptureErrorKind::Unreachable, "Wait for navigation failed")
        })?;

        // Let fonts, images and late layout settle
        let settle = self.deadline.remaining("Settle")?;
        std::thread::sleep(Duration::from_millis(self.wait_ms).min(settle));

        tab.set_default_timeout(self.deadline.remaining("Screenshot")?);
        let png = match &self.selector {
            Some(selector) => {
                let element = tab.wait_for_element(selector).map_err(|e| {
                    Error::capture(
                        CaptureErrorKind::ElementNotFound,
                        format!("{}: {}", selector, e),
                    )
                })?;
                element
                    .capture_screenshot(Page::CaptureScreenshotFormatOption::Png)
                    .map_err(|e| classify(e, CaptureErrorKind::Other, "Element screenshot failed"))?
            }
            None => {
                let clip = Page::Viewport {
                    x: 0.0,
                    y: 0.0,
                    width: self.viewport.width as f64,
                    height: self.viewport.height as f64,
                    scale: 1.0,
                };
                tab.capture_screenshot(Page::CaptureScreenshotFormatOption::Png, None, Some(clip), true)
                    .map_err(|e| classify(e, CaptureErrorKind::Other, "Screenshot failed"))?
            }
        };

        Screenshot::from_png(png)
    }
}

/// Load inline markup without touching the filesystem
fn markup_data_url(html: &str) -> String {
    format!(
        "data:text/html;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(html)
    )
}

/// Timeouts reported by Chrome keep their category; everything else falls back.
fn classify(err: impl Display, fallback: CaptureErrorKind, context: &str) -> Error {
    let message = err.to_string();
    let lower = message.to_lowercase();
    let kind = if lower.contains("timeout") || lower.contains("timed out") {
        CaptureErrorKind::Timeout
    } else {
        fallback
    };
    Error::capture(kind, format!("{}: {}", context, message))
}
