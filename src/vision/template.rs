/// Multi-scale template matching
///
/// Slides the (rescaled) reference over the capture and scores every
/// position with zero-mean normalized cross-correlation, so a flat or merely
/// bright area never passes for the target. Scales are tried in ascending
/// order and the search stops as soon as a practically perfect score shows up.

use crate::vision::geometry::Rect;
use image::{imageops, imageops::FilterType, GrayImage, ImageBuffer, Luma};
use imageproc::integral_image::{integral_image, integral_squared_image, sum_image_pixels};
use imageproc::template_matching::{match_template, MatchTemplateMethod};

/// Resized references smaller than this on either side are skipped
pub const MIN_TEMPLATE_SIDE: u32 = 5;

/// Scores above this end the scale search early
pub const PERFECT_SCORE: f32 = 0.99;

/// Windows (and references) whose per-pixel variance is below this are
/// treated as flat and score zero
const MIN_VARIANCE: f64 = 1.0;

/// Number of extra scales spread around the device ratio in multiscale mode
const SPREAD_STEPS: usize = 10;

/// Candidate scale set: `{1.0, ratio}`, plus ten values evenly spanning
/// ±20% around `ratio` when `multiscale` is on. Sorted and deduplicated.
pub fn candidate_scales(ratio: f64, multiscale: bool) -> Vec<f64> {
    let mut scales = vec![1.0, ratio];
    if multiscale {
        let (lo, hi) = (ratio * 0.8, ratio * 1.2);
        let step = (hi - lo) / (SPREAD_STEPS - 1) as f64;
        scales.extend((0..SPREAD_STEPS).map(|i| lo + step * i as f64));
    }
    scales.retain(|s| s.is_finite() && *s > 0.0);
    scales.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    scales.dedup_by(|a, b| (*a - *b).abs() < 1e-9);
    scales
}

/// Best placement of `reference` inside `capture` across `scales`
///
/// Both images are given as planes of equal count (one plane for intensity
/// matching, three for colour). Colour scores are the mean of the per-plane
/// scores. Returns the best rectangle and its score, whatever the score is;
/// thresholding is the caller's job.
pub fn best_match(
    reference: &[GrayImage],
    capture: &[GrayImage],
    scales: &[f64],
    cancelled: &dyn Fn() -> bool,
) -> Option<(Rect, f32)> {
    let (ref_w, ref_h) = reference.first()?.dimensions();
    let (cap_w, cap_h) = capture.first()?.dimensions();
    if reference.len() != capture.len() {
        return None;
    }

    let mut best: Option<(Rect, f32)> = None;
    for &scale in scales {
        if cancelled() {
            return None;
        }
        let tw = (ref_w as f64 * scale) as u32;
        let th = (ref_h as f64 * scale) as u32;
        if tw < MIN_TEMPLATE_SIDE || th < MIN_TEMPLATE_SIDE || tw > cap_w || th > cap_h {
            continue;
        }

        let planes: Vec<GrayImage> = if tw == ref_w && th == ref_h {
            reference.to_vec()
        } else {
            reference
                .iter()
                .map(|plane| imageops::resize(plane, tw, th, FilterType::Triangle))
                .collect()
        };

        if let Some((x, y, score)) = score_map_peak(capture, &planes) {
            if best.map(|(_, s)| score > s).unwrap_or(true) {
                best = Some((Rect::new(x as i32, y as i32, tw, th), score));
            }
        }

        if best.map(|(_, s)| s > PERFECT_SCORE).unwrap_or(false) {
            tracing::trace!("🎯 Perfect template score at scale {:.3}, skipping remaining scales", scale);
            break;
        }
    }
    best
}

/// Location and value of the highest finite score
fn score_map_peak(capture: &[GrayImage], template: &[GrayImage]) -> Option<(u32, u32, f32)> {
    let maps: Vec<_> = capture
        .iter()
        .zip(template)
        .map(|(c, t)| zero_mean_ncc(c, t))
        .collect();
    let first = maps.first()?;
    let planes = maps.len() as f32;

    let mut peak: Option<(u32, u32, f32)> = None;
    for (x, y, _) in first.enumerate_pixels() {
        let score = maps.iter().map(|m| m.get_pixel(x, y)[0]).sum::<f32>() / planes;
        if !score.is_finite() {
            continue;
        }
        if peak.map(|(_, _, s)| score > s).unwrap_or(true) {
            peak = Some((x, y, score));
        }
    }
    peak
}

/// Zero-mean normalized cross-correlation of `template` at every position
///
/// The raw correlation comes from `match_template`; the template mean is
/// removed afterwards using the window sum, and each window is normalized
/// by its own spread taken from integral images. Scores lie in `[-1, 1]`.
fn zero_mean_ncc(capture: &GrayImage, template: &GrayImage) -> ImageBuffer<Luma<f32>, Vec<f32>> {
    let (tw, th) = template.dimensions();
    let n = tw as f64 * th as f64;
    let t_mean = template.pixels().map(|p| p[0] as f64).sum::<f64>() / n;
    let t_spread = template
        .pixels()
        .map(|p| (p[0] as f64 - t_mean).powi(2))
        .sum::<f64>();

    let raw = match_template(capture, template, MatchTemplateMethod::CrossCorrelation);
    if t_spread < n * MIN_VARIANCE {
        return ImageBuffer::new(raw.width(), raw.height());
    }

    let sums = integral_image::<_, u64>(capture);
    let squares = integral_squared_image::<_, u64>(capture);
    ImageBuffer::from_fn(raw.width(), raw.height(), |x, y| {
        let (right, bottom) = (x + tw - 1, y + th - 1);
        let [sum] = sum_image_pixels(&sums, x, y, right, bottom);
        let [square_sum] = sum_image_pixels(&squares, x, y, right, bottom);
        let sum = sum as f64;
        let spread = square_sum as f64 - sum * sum / n;
        if spread < n * MIN_VARIANCE {
            return Luma([0.0]);
        }
        let numerator = raw.get_pixel(x, y)[0] as f64 - t_mean * sum;
        Luma([(numerator / (t_spread * spread).sqrt()).clamp(-1.0, 1.0) as f32])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn textured(w: u32, h: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| {
            let v = (x.wrapping_mul(73) ^ y.wrapping_mul(151)).wrapping_add(x * y) % 251;
            Luma([v as u8])
        })
    }

    #[test]
    fn scales_without_multiscale() {
        assert_eq!(candidate_scales(1.0, false), vec![1.0]);
        assert_eq!(candidate_scales(1.5, false), vec![1.0, 1.5]);
    }

    #[test]
    fn multiscale_spans_twenty_percent() {
        let scales = candidate_scales(2.0, true);
        assert!((scales.first().copied().unwrap() - 1.0).abs() < 1e-9);
        assert!((scales.last().copied().unwrap() - 2.4).abs() < 1e-9);
        assert!(scales.iter().any(|s| (s - 1.6).abs() < 1e-9));
        assert!(scales.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn finds_exact_crop() {
        let capture = textured(60, 40);
        let crop = imageops::crop_imm(&capture, 21, 9, 16, 12).to_image();
        let (rect, score) = best_match(&[crop], &[capture], &[1.0], &|| false).unwrap();
        assert_eq!(rect, Rect::new(21, 9, 16, 12));
        assert!(score > 0.99);
    }

    /// Mostly light reference with a dark glyph, as a button would look
    fn light_glyph() -> GrayImage {
        GrayImage::from_fn(40, 20, |x, y| {
            if (16..24).contains(&x) && (5..15).contains(&y) {
                Luma([0])
            } else {
                Luma([240])
            }
        })
    }

    #[test]
    fn bright_flat_screen_does_not_match() {
        let flat = GrayImage::from_pixel(120, 80, Luma([203]));
        let (_, score) = best_match(&[light_glyph()], &[flat], &[1.0], &|| false).unwrap();
        assert!(score.abs() < 1e-6, "score = {}", score);

        let near_flat = GrayImage::from_fn(120, 80, |x, y| Luma([200 + ((x + y) % 5) as u8]));
        let (_, score) = best_match(&[light_glyph()], &[near_flat], &[1.0], &|| false).unwrap();
        assert!(score < 0.5, "score = {}", score);
    }

    #[test]
    fn glyph_is_found_on_a_light_background() {
        let mut screen = GrayImage::from_pixel(120, 80, Luma([235]));
        imageops::replace(&mut screen, &light_glyph(), 50, 30);
        let (rect, score) = best_match(&[light_glyph()], &[screen], &[1.0], &|| false).unwrap();
        assert_eq!(rect, Rect::new(50, 30, 40, 20));
        assert!(score > 0.99, "score = {}", score);
    }

    #[test]
    fn too_small_or_too_large_is_skipped() {
        let capture = textured(20, 20);
        let tiny = textured(4, 4);
        assert!(best_match(&[tiny], &[capture.clone()], &[1.0], &|| false).is_none());
        let huge = textured(30, 30);
        assert!(best_match(&[huge], &[capture], &[1.0], &|| false).is_none());
    }
}
