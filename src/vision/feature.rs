/// Keypoint-based matching
///
/// FAST corners described with 256-bit binary intensity tests, matched by
/// Hamming distance with a second-nearest-neighbour ratio test, then fitted
/// with a RANSAC homography. Tolerates rotation-free rescaling and partial
/// occlusion that template matching cannot.

use crate::vision::geometry::Rect;
use image::GrayImage;
use imageproc::corners::corners_fast9;
use imageproc::filter::gaussian_blur_f32;
use imageproc::geometric_transformations::Projection;
use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const FAST_THRESHOLD: u8 = 20;
const MAX_KEYPOINTS: usize = 500;
const PATCH_RADIUS: i32 = 15;
const DESCRIPTOR_BITS: usize = 256;
/// Matches whose best/second-best distance ratio reaches this are rejected
pub const RATIO_TEST: f32 = 0.75;
pub const MIN_MATCHES: usize = 4;
const RANSAC_ITERATIONS: usize = 500;
const RANSAC_TOLERANCE: f32 = 5.0;
const CONFIDENCE_GAIN: f32 = 2.5;
const SEED: u64 = 0x5eed_f10e;

/// Fixed intensity-test pairs shared by every descriptor
static SAMPLING_PATTERN: Lazy<Vec<[(i32, i32); 2]>> = Lazy::new(|| {
    let mut rng = StdRng::seed_from_u64(SEED);
    (0..DESCRIPTOR_BITS)
        .map(|_| {
            let mut point = || {
                (
                    rng.gen_range(-PATCH_RADIUS..=PATCH_RADIUS),
                    rng.gen_range(-PATCH_RADIUS..=PATCH_RADIUS),
                )
            };
            [point(), point()]
        })
        .collect()
});

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
}

/// 256-bit binary descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor(pub [u64; 4]);

impl Descriptor {
    pub fn distance(&self, other: &Descriptor) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }
}

/// Detect keypoints away from the border and describe them
pub fn detect(image: &GrayImage) -> (Vec<Keypoint>, Vec<Descriptor>) {
    let (w, h) = image.dimensions();
    let margin = PATCH_RADIUS as u32;
    if w <= margin * 2 || h <= margin * 2 {
        return (Vec::new(), Vec::new());
    }

    let mut corners = corners_fast9(image, FAST_THRESHOLD);
    corners.retain(|c| c.x >= margin && c.y >= margin && c.x < w - margin && c.y < h - margin);
    corners.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    corners.truncate(MAX_KEYPOINTS);

    let smoothed = gaussian_blur_f32(image, 2.0);
    let mut keypoints = Vec::with_capacity(corners.len());
    let mut descriptors = Vec::with_capacity(corners.len());
    for corner in corners {
        let (cx, cy) = (corner.x as i32, corner.y as i32);
        let mut bits = [0u64; 4];
        for (i, [p, q]) in SAMPLING_PATTERN.iter().enumerate() {
            let a = smoothed.get_pixel((cx + p.0) as u32, (cy + p.1) as u32)[0];
            let b = smoothed.get_pixel((cx + q.0) as u32, (cy + q.1) as u32)[0];
            if a < b {
                bits[i / 64] |= 1 << (i % 64);
            }
        }
        keypoints.push(Keypoint {
            x: corner.x as f32,
            y: corner.y as f32,
        });
        descriptors.push(Descriptor(bits));
    }
    (keypoints, descriptors)
}

/// Brute-force 2-NN matching with the ratio test
///
/// Returns `(query_index, train_index)` pairs. Needs at least two train
/// descriptors, otherwise no match can pass the ratio test.
pub fn match_descriptors(query: &[Descriptor], train: &[Descriptor]) -> Vec<(usize, usize)> {
    if train.len() < 2 {
        return Vec::new();
    }
    query
        .iter()
        .enumerate()
        .filter_map(|(qi, q)| {
            let mut best = (u32::MAX, 0usize);
            let mut second = u32::MAX;
            for (ti, t) in train.iter().enumerate() {
                let d = q.distance(t);
                if d < best.0 {
                    second = best.0;
                    best = (d, ti);
                } else if d < second {
                    second = d;
                }
            }
            ((best.0 as f32) < RATIO_TEST * second as f32).then_some((qi, best.1))
        })
        .collect()
}

/// Robust homography from point correspondences
///
/// Samples four correspondences at a time with a fixed seed, keeps the model
/// with the most inliers within `RANSAC_TOLERANCE` pixels.
pub fn estimate_homography(src: &[(f32, f32)], dst: &[(f32, f32)]) -> Option<Projection> {
    let n = src.len().min(dst.len());
    if n < MIN_MATCHES {
        return None;
    }

    let mut rng = StdRng::seed_from_u64(SEED);
    let mut best: Option<(Projection, usize)> = None;
    for _ in 0..RANSAC_ITERATIONS {
        let picks = rand::seq::index::sample(&mut rng, n, 4).into_vec();
        let from = [src[picks[0]], src[picks[1]], src[picks[2]], src[picks[3]]];
        let to = [dst[picks[0]], dst[picks[1]], dst[picks[2]], dst[picks[3]]];
        let Some(model) = Projection::from_control_points(from, to) else {
            continue;
        };

        let inliers = src
            .iter()
            .zip(dst)
            .filter(|(s, d)| {
                let (px, py) = model * **s;
                let err = ((px - d.0).powi(2) + (py - d.1).powi(2)).sqrt();
                err.is_finite() && err < RANSAC_TOLERANCE
            })
            .count();

        if best.as_ref().map(|(_, c)| inliers > *c).unwrap_or(true) {
            best = Some((model, inliers));
            if inliers == n {
                break;
            }
        }
    }

    best.filter(|(_, inliers)| *inliers >= MIN_MATCHES).map(|(model, _)| model)
}

/// Locate `reference` in `capture` by keypoints
///
/// Confidence is `min(1, matches / reference_keypoints * 2.5)`, a tuned
/// heuristic rather than a probability.
pub fn locate(reference: &GrayImage, capture: &GrayImage) -> Option<(Rect, f32)> {
    let (ref_points, ref_desc) = detect(reference);
    if ref_points.is_empty() {
        return None;
    }
    let (cap_points, cap_desc) = detect(capture);
    let matches = match_descriptors(&ref_desc, &cap_desc);
    tracing::trace!(
        "🔑 Feature match: {} reference keypoints, {} capture keypoints, {} good matches",
        ref_points.len(),
        cap_points.len(),
        matches.len()
    );
    if matches.len() < MIN_MATCHES {
        return None;
    }

    let src: Vec<(f32, f32)> = matches.iter().map(|(q, _)| (ref_points[*q].x, ref_points[*q].y)).collect();
    let dst: Vec<(f32, f32)> = matches.iter().map(|(_, t)| (cap_points[*t].x, cap_points[*t].y)).collect();
    let model = estimate_homography(&src, &dst)?;

    let (w, h) = reference.dimensions();
    let (w, h) = ((w - 1) as f32, (h - 1) as f32);
    let corners = [(0.0, 0.0), (0.0, h), (w, h), (w, 0.0)].map(|c| model * c);
    let (mut x_min, mut y_min) = (f32::MAX, f32::MAX);
    let (mut x_max, mut y_max) = (f32::MIN, f32::MIN);
    for (x, y) in corners {
        if !x.is_finite() || !y.is_finite() {
            return None;
        }
        x_min = x_min.min(x);
        y_min = y_min.min(y);
        x_max = x_max.max(x);
        y_max = y_max.max(y);
    }

    let rect = Rect::new(
        x_min as i32,
        y_min as i32,
        (x_max - x_min).max(0.0) as u32,
        (y_max - y_min).max(0.0) as u32,
    );
    let confidence = (matches.len() as f32 / ref_points.len() as f32 * CONFIDENCE_GAIN).min(1.0);
    Some((rect, confidence))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn hamming_distance_counts_bits() {
        let a = Descriptor([0b1011, 0, 0, u64::MAX]);
        let b = Descriptor([0b0001, 0, 0, 0]);
        assert_eq!(a.distance(&b), 2 + 64);
        assert_eq!(a.distance(&a), 0);
    }

    #[test]
    fn ratio_test_rejects_ambiguous_matches() {
        let query = [Descriptor([0, 0, 0, 0]), Descriptor([0xFF, 0, 0, 0])];
        let train = [
            Descriptor([0, 0, 0, 0]),           // exact for query 0
            Descriptor([0xF0, 0, 0, 0]),        // 4 bits from query 1
            Descriptor([0x0F, 0, 0, 0]),        // also 4 bits from query 1
        ];
        let matches = match_descriptors(&query, &train);
        assert_eq!(matches, vec![(0, 0)]);
    }

    #[test]
    fn single_train_descriptor_never_matches() {
        let d = [Descriptor([1, 2, 3, 4])];
        assert!(match_descriptors(&d, &d).is_empty());
    }

    #[test]
    fn homography_recovers_translation_despite_outlier() {
        let src = vec![(0.0, 0.0), (40.0, 0.0), (40.0, 30.0), (0.0, 30.0), (20.0, 15.0), (5.0, 25.0)];
        let mut dst: Vec<(f32, f32)> = src.iter().map(|(x, y)| (x + 100.0, y + 50.0)).collect();
        dst[5] = (400.0, -80.0);

        let model = estimate_homography(&src, &dst).unwrap();
        let (x, y) = model * (10.0f32, 10.0f32);
        assert!((x - 110.0).abs() < 0.5, "x = {}", x);
        assert!((y - 60.0).abs() < 0.5, "y = {}", y);
    }

    #[test]
    fn flat_images_have_no_features() {
        let flat = GrayImage::from_pixel(64, 64, Luma([128]));
        assert!(locate(&flat, &flat).is_none());
    }
}
