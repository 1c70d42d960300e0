//! Per-pixel comparison in YIQ space with anti-aliasing detection.
//!
//! Pixels whose perceptual delta exceeds the threshold are mismatches. A
//! mismatch whose neighbourhood looks like an anti-aliased edge in either
//! image is still counted, but drawn in the anti-alias colour so the diff
//! image separates rendering noise from real layout changes.

use image::{Rgba, RgbaImage};

/// Largest possible YIQ delta between two pixels
const MAX_YIQ_DELTA: f64 = 35215.0;

#[derive(Debug, Clone, Copy)]
pub(crate) struct DiffOptions {
    /// Matching sensitivity in [0, 1]; smaller is stricter
    pub threshold: f64,
    /// Opacity of the faded target drawn under matching pixels
    pub alpha: f64,
    pub diff_color: [u8; 3],
    pub aa_color: [u8; 3],
}

#[derive(Debug)]
pub(crate) struct DiffOutcome {
    /// Every pixel over the threshold, anti-aliased ones included
    pub mismatched: u64,
    /// Subset of `mismatched` classified as anti-aliasing
    pub anti_aliased: u64,
    pub diff: RgbaImage,
}

/// Compare two equally sized buffers. Callers check dimensions first.
pub(crate) fn diff_pixels(img1: &RgbaImage, img2: &RgbaImage, opts: &DiffOptions) -> DiffOutcome {
    debug_assert_eq!(img1.dimensions(), img2.dimensions());
    let (width, height) = img1.dimensions();
    let a = img1.as_raw();
    let b = img2.as_raw();
    let max_delta = MAX_YIQ_DELTA * opts.threshold * opts.threshold;

    let mut diff = RgbaImage::new(width, height);
    let mut mismatched = 0u64;
    let mut anti_aliased = 0u64;

    for y in 0..height {
        for x in 0..width {
            let pos = pixel_offset(x, y, width);
            let delta = color_delta(a, b, pos, pos, false);

            if delta.abs() > max_delta {
                mismatched += 1;
                let aa = is_anti_aliased(a, x, y, width, height, b)
                    || is_anti_aliased(b, x, y, width, height, a);
                if aa {
                    anti_aliased += 1;
                    diff.put_pixel(x, y, opaque(opts.aa_color));
                } else {
                    diff.put_pixel(x, y, opaque(opts.diff_color));
                }
            } else {
                diff.put_pixel(x, y, faded_gray(a, pos, opts.alpha));
            }
        }
    }

    DiffOutcome {
        mismatched,
        anti_aliased,
        diff,
    }
}

fn pixel_offset(x: u32, y: u32, width: u32) -> usize {
    (y as usize * width as usize + x as usize) * 4
}

fn opaque(rgb: [u8; 3]) -> Rgba<u8> {
    Rgba([rgb[0], rgb[1], rgb[2], 255])
}

fn faded_gray(img: &[u8], pos: usize, alpha: f64) -> Rgba<u8> {
    let y = rgb2y(img[pos] as f64, img[pos + 1] as f64, img[pos + 2] as f64);
    let v = blend(y, alpha * img[pos + 3] as f64 / 255.0).clamp(0.0, 255.0) as u8;
    Rgba([v, v, v, 255])
}

/// Blend a channel value against white
fn blend(c: f64, a: f64) -> f64 {
    255.0 + (c - 255.0) * a
}

fn rgb2y(r: f64, g: f64, b: f64) -> f64 {
    r * 0.29889531 + g * 0.58662247 + b * 0.11448223
}

fn rgb2i(r: f64, g: f64, b: f64) -> f64 {
    r * 0.59597799 - g * 0.27417610 - b * 0.32180189
}

fn rgb2q(r: f64, g: f64, b: f64) -> f64 {
    r * 0.21147017 - g * 0.52261711 + b * 0.31114694
}

/// Squared YIQ distance between two pixels, signed by which one is brighter.
/// With `y_only` the raw brightness difference is returned instead.
fn color_delta(img1: &[u8], img2: &[u8], k: usize, m: usize, y_only: bool) -> f64 {
    if img1[k..k + 4] == img2[m..m + 4] {
        return 0.0;
    }

    let (mut r1, mut g1, mut b1) = (img1[k] as f64, img1[k + 1] as f64, img1[k + 2] as f64);
    let a1 = img1[k + 3] as f64;
    let (mut r2, mut g2, mut b2) = (img2[m] as f64, img2[m + 1] as f64, img2[m + 2] as f64);
    let a2 = img2[m + 3] as f64;

    if a1 < 255.0 {
        let a = a1 / 255.0;
        r1 = blend(r1, a);
        g1 = blend(g1, a);
        b1 = blend(b1, a);
    }
    if a2 < 255.0 {
        let a = a2 / 255.0;
        r2 = blend(r2, a);
        g2 = blend(g2, a);
        b2 = blend(b2, a);
    }

    let y1 = rgb2y(r1, g1, b1);
    let y2 = rgb2y(r2, g2, b2);
    let y = y1 - y2;
    if y_only {
        return y;
    }

    let i = rgb2i(r1, g1, b1) - rgb2i(r2, g2, b2);
    let q = rgb2q(r1, g1, b1) - rgb2q(r2, g2, b2);
    let delta = 0.5053 * y * y + 0.299 * i * i + 0.1957 * q * q;

    if y1 > y2 {
        -delta
    } else {
        delta
    }
}

/// Clamped 3x3 neighbourhood bounds around a pixel
fn neighbourhood(x: u32, y: u32, width: u32, height: u32) -> (u32, u32, u32, u32) {
    (
        x.saturating_sub(1),
        y.saturating_sub(1),
        (x + 1).min(width - 1),
        (y + 1).min(height - 1),
    )
}

/// A pixel is anti-aliased when it sits between a darkest and a brightest
/// neighbour, at most two neighbours share its colour, and at least one of
/// those extremes lies inside a flat region in both images.
fn is_anti_aliased(img: &[u8], x1: u32, y1: u32, width: u32, height: u32, other: &[u8]) -> bool {
    let (x0, y0, x2, y2) = neighbourhood(x1, y1, width, height);
    let pos = pixel_offset(x1, y1, width);
    let mut zeroes = u32::from(x1 == x0 || x1 == x2 || y1 == y0 || y1 == y2);

    let mut min = 0.0f64;
    let mut max = 0.0f64;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (0, 0, 0, 0);

    for x in x0..=x2 {
        for y in y0..=y2 {
            if x == x1 && y == y1 {
                continue;
            }
            let delta = color_delta(img, img, pos, pixel_offset(x, y, width), true);
            if delta == 0.0 {
                zeroes += 1;
                if zeroes > 2 {
                    return false;
                }
            } else if delta < min {
                min = delta;
                min_x = x;
                min_y = y;
            } else if delta > max {
                max = delta;
                max_x = x;
                max_y = y;
            }
        }
    }

    if min == 0.0 || max == 0.0 {
        return false;
    }

    (has_many_siblings(img, min_x, min_y, width, height)
        && has_many_siblings(other, min_x, min_y, width, height))
        || (has_many_siblings(img, max_x, max_y, width, height)
            && has_many_siblings(other, max_x, max_y, width, height))
}

/// More than two neighbours with exactly the same RGBA value
fn has_many_siblings(img: &[u8], x1: u32, y1: u32, width: u32, height: u32) -> bool {
    let (x0, y0, x2, y2) = neighbourhood(x1, y1, width, height);
    let pos = pixel_offset(x1, y1, width);
    let mut zeroes = u32::from(x1 == x0 || x1 == x2 || y1 == y0 || y1 == y2);

    for x in x0..=x2 {
        for y in y0..=y2 {
            if x == x1 && y == y1 {
                continue;
            }
            let pos2 = pixel_offset(x, y, width);
            if img[pos..pos + 4] == img[pos2..pos2 + 4] {
                zeroes += 1;
            }
            if zeroes > 2 {
                return true;
            }
        }
    }
    false
}
