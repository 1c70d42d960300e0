//! Deterministic pixel-level comparison of a target screenshot and a
//! candidate screenshot.
//!
//! The engine is the objective gate of a recreation session: it decodes both
//! images, classifies every pixel, writes a diff image and reports a score in
//! `[0, 100]` derived from the mismatched-pixel ratio.
//!
//! # Example
//!
//! ```no_run
//! use rfrecreate::compare::ComparisonEngine;
//! use rfrecreate::capture::Screenshot;
//!
//! # fn main() -> rfrecreate::Result<()> {
//! let engine = ComparisonEngine::new("runs/diffs", 92.0);
//! let target = Screenshot::open("target.png".as_ref())?;
//! let candidate = Screenshot::open("candidate.png".as_ref())?;
//! let result = engine.compare(&target, &candidate, "homepage")?;
//! println!("{:.2} -> {}", result.score, result.notes);
//! # Ok(())
//! # }
//! ```

mod pixelmatch;

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::debug;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::capture::Screenshot;
use crate::{Error, Result};
use pixelmatch::{diff_pixels, DiffOptions};

/// Perceptual matching sensitivity (0 = exact, 1 = lenient)
pub const PIXEL_SENSITIVITY: f64 = 0.1;
/// Opacity of the faded target drawn under matching pixels in the diff image
pub const DIFF_ALPHA: f64 = 0.1;
/// Diff-image colour of hard mismatches
pub const DIFF_COLOR: [u8; 3] = [255, 0, 0];
/// Diff-image colour of anti-aliasing-only differences
pub const ANTI_ALIAS_COLOR: [u8; 3] = [255, 255, 0];

const DIFF_OPTIONS: DiffOptions = DiffOptions {
    threshold: PIXEL_SENSITIVITY,
    alpha: DIFF_ALPHA,
    diff_color: DIFF_COLOR,
    aa_color: ANTI_ALIAS_COLOR,
};

/// Qualitative band of a mismatch percentage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    Perfect,
    Excellent,
    Good,
    Moderate,
    Significant,
    VeryHigh,
}

impl MatchTier {
    /// `0` perfect, `(0,1)` excellent, `[1,5)` good, `[5,15)` moderate,
    /// `[15,40)` significant, `>= 40` very high.
    pub fn from_mismatch(mismatch_percent: f64) -> Self {
        let m = mismatch_percent;
        if m <= 0.0 {
            MatchTier::Perfect
        } else if m < 1.0 {
            MatchTier::Excellent
        } else if m < 5.0 {
            MatchTier::Good
        } else if m < 15.0 {
            MatchTier::Moderate
        } else if m < 40.0 {
            MatchTier::Significant
        } else {
            MatchTier::VeryHigh
        }
    }
}

/// Human-readable verdict for a mismatch percentage.
pub fn notes_for(mismatch_percent: f64) -> String {
    let m = mismatch_percent;
    match MatchTier::from_mismatch(m) {
        MatchTier::Perfect => "Perfect match: no pixel differences detected.".to_string(),
        MatchTier::Excellent => format!(
            "Excellent match: {:.2}% of pixels differ, most likely sub-pixel rendering or anti-aliasing noise.",
            m
        ),
        MatchTier::Good => format!(
            "Good match: {:.2}% of pixels differ, likely minor font rendering, spacing or colour differences.",
            m
        ),
        MatchTier::Moderate => format!(
            "Moderate differences: {:.2}% of pixels differ, likely misaligned elements, padding/margin drift or image differences.",
            m
        ),
        MatchTier::Significant => format!(
            "Significant differences: {:.2}% of pixels differ, likely layout structure changes, missing sections or wrong colours.",
            m
        ),
        MatchTier::VeryHigh => format!(
            "Very high mismatch: {:.2}% of pixels differ, likely a structural layout change, the wrong page or a failed render.",
            m
        ),
    }
}

/// Outcome of one pixel comparison
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonResult {
    /// Unrounded `100 - mismatch_percent >= threshold`
    pub pass: bool,
    /// `100 - mismatch_percent`, clamped to `[0, 100]` and rounded to 2 places
    pub score: f64,
    pub mismatch_percent: f64,
    pub mismatch_pixel_count: u64,
    /// Mismatches classified as anti-aliasing (included in `mismatch_pixel_count`)
    pub anti_aliased_pixel_count: u64,
    pub total_pixel_count: u64,
    pub tier: MatchTier,
    pub notes: String,
    pub diff_image: PathBuf,
}

/// Pixel comparator writing its diff images into one directory
#[derive(Debug, Clone)]
pub struct ComparisonEngine {
    output_dir: PathBuf,
    threshold: f64,
}

impl ComparisonEngine {
    pub fn new(output_dir: impl Into<PathBuf>, threshold: f64) -> Self {
        Self {
            output_dir: output_dir.into(),
            threshold,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Compare `candidate` against `target` and write one diff image named
    /// after the current time and `slug`.
    ///
    /// Fails with [`Error::DimensionMismatch`] before anything is written when
    /// the images differ in size.
    pub fn compare(
        &self,
        target: &Screenshot,
        candidate: &Screenshot,
        slug: &str,
    ) -> Result<ComparisonResult> {
        if target.dimensions() != candidate.dimensions() {
            return Err(Error::DimensionMismatch {
                target: target.dimensions(),
                candidate: candidate.dimensions(),
            });
        }

        let img1 = target.to_rgba()?;
        let img2 = candidate.to_rgba()?;
        // Header and decoded sizes can disagree for malformed files
        if img1.dimensions() != img2.dimensions() {
            return Err(Error::DimensionMismatch {
                target: img1.dimensions(),
                candidate: img2.dimensions(),
            });
        }

        let outcome = diff_pixels(&img1, &img2, &DIFF_OPTIONS);
        let total = img1.width() as u64 * img1.height() as u64;
        let mismatch_percent = if total == 0 {
            0.0
        } else {
            outcome.mismatched as f64 * 100.0 / total as f64
        };
        // Gate on the exact score; rounding is for display only
        let exact_score = (100.0 - mismatch_percent).clamp(0.0, 100.0);
        let score = round2(exact_score);

        let diff_image = self.diff_path(slug);
        std::fs::create_dir_all(&self.output_dir)
            .map_err(|e| Error::persistence(&self.output_dir, e))?;
        // create_new: an existing file is an error, never overwritten
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&diff_image)
            .map_err(|e| Error::persistence(&diff_image, e))?;
        let mut writer = BufWriter::new(file);
        outcome
            .diff
            .write_to(&mut writer, image::ImageFormat::Png)
            .map_err(|e| Error::persistence(&diff_image, e))?;
        writer
            .flush()
            .map_err(|e| Error::persistence(&diff_image, e))?;

        debug!(
            "compare {}: {} of {} pixels differ ({} anti-aliased), score {:.2}",
            slug, outcome.mismatched, total, outcome.anti_aliased, score
        );

        Ok(ComparisonResult {
            pass: exact_score >= self.threshold,
            score,
            mismatch_percent,
            mismatch_pixel_count: outcome.mismatched,
            anti_aliased_pixel_count: outcome.anti_aliased,
            total_pixel_count: total,
            tier: MatchTier::from_mismatch(mismatch_percent),
            notes: notes_for(mismatch_percent),
            diff_image,
        })
    }

    /// `<timestamp>-<8 hex>-<slug>-diff.png`; the random part keeps calls
    /// within the same millisecond apart.
    fn diff_path(&self, slug: &str) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%d-%H%M%S-%3f");
        let nonce = Uuid::new_v4().simple().to_string();
        self.output_dir.join(format!(
            "{}-{}-{}-diff.png",
            stamp,
            &nonce[..8],
            sanitize_slug(slug)
        ))
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Keep slugs filesystem-safe
fn sanitize_slug(slug: &str) -> String {
    let s: String = slug
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    if s.is_empty() {
        "compare".to_string()
    } else {
        s
    }
}
