/// Visual target locator
///
/// Finds a reference image inside a screen capture with the strategy the
/// node asks for, polls the screen until a match, timeout or stop, and
/// answers "has this region stopped changing" for stillness conditions.

use crate::config::LocatorConfig;
use crate::desktop::ScreenCapture;
use crate::vision::{feature, geometry::Rect, template};
use image::{imageops, imageops::FilterType, DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Pixels whose intensity differs by at least this much count as changed
pub const NOISE_FLOOR: u8 = 10;

/// Matching strategy selected per node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    Template,
    Feature,
    /// Template matching; feature matching is offered to the operator as the
    /// alternate, the two are never scored together
    Hybrid,
}

impl MatchStrategy {
    pub fn parse(value: &str) -> Self {
        match value {
            "template" => MatchStrategy::Template,
            "feature" => MatchStrategy::Feature,
            _ => MatchStrategy::Hybrid,
        }
    }
}

/// Per-call matching options
#[derive(Debug, Clone, PartialEq)]
pub struct LocateOptions {
    /// Minimum template score to accept
    pub confidence: f32,
    pub strategy: MatchStrategy,
    /// Sub-rectangle of the capture (or screen, when polling) to search
    pub region: Option<Rect>,
    pub multiscale: bool,
    /// Runtime scale over authoring scale
    pub scale_ratio: f64,
    pub grayscale: bool,
}

impl LocateOptions {
    pub fn new(confidence: f32) -> Self {
        Self {
            confidence,
            strategy: MatchStrategy::Hybrid,
            region: None,
            multiscale: false,
            scale_ratio: 1.0,
            grayscale: true,
        }
    }

    pub fn with_strategy(mut self, strategy: MatchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_region(mut self, region: Option<Rect>) -> Self {
        self.region = region;
        self
    }

    pub fn with_scaling(mut self, scale_ratio: f64, multiscale: bool) -> Self {
        self.scale_ratio = scale_ratio;
        self.multiscale = multiscale;
        self
    }
}

/// A located target in full-capture (or screen) coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Match {
    pub rect: Rect,
    pub score: f32,
}

/// Multi-strategy image locator
#[derive(Debug, Clone)]
pub struct VisualLocator {
    config: LocatorConfig,
}

impl VisualLocator {
    pub fn new(config: LocatorConfig) -> Self {
        Self { config }
    }

    /// Options seeded from this locator's configuration
    pub fn options(&self, confidence: f32, scale_ratio: f64) -> LocateOptions {
        let mut opts = LocateOptions::new(confidence).with_scaling(scale_ratio, self.config.multiscale);
        opts.grayscale = self.config.grayscale;
        opts
    }

    /// Find `reference` inside `capture`
    ///
    /// When `opts.region` is set only that part of the capture is searched,
    /// and the result is translated back by the region origin.
    pub fn locate(&self, reference: &DynamicImage, capture: &DynamicImage, opts: &LocateOptions) -> Option<Match> {
        self.locate_cancellable(reference, capture, opts, &|| false)
    }

    fn locate_cancellable(
        &self,
        reference: &DynamicImage,
        capture: &DynamicImage,
        opts: &LocateOptions,
        cancelled: &dyn Fn() -> bool,
    ) -> Option<Match> {
        match opts.region {
            Some(region) => {
                let area = region.clamp_to(capture.width(), capture.height())?;
                let sub = capture.crop_imm(area.x as u32, area.y as u32, area.width, area.height);
                self.match_image(reference, &sub, opts, cancelled)
                    .map(|m| Match { rect: m.rect.offset(area.x, area.y), score: m.score })
            }
            None => self.match_image(reference, capture, opts, cancelled),
        }
    }

    /// Match against a whole image; coordinates are relative to `capture`
    fn match_image(
        &self,
        reference: &DynamicImage,
        capture: &DynamicImage,
        opts: &LocateOptions,
        cancelled: &dyn Fn() -> bool,
    ) -> Option<Match> {
        if reference.width() == 0 || reference.height() == 0 {
            return None;
        }
        if reference.width() > capture.width() || reference.height() > capture.height() {
            return None;
        }

        match opts.strategy {
            MatchStrategy::Feature => {
                let (rect, score) = feature::locate(&reference.to_luma8(), &capture.to_luma8())?;
                Some(Match { rect, score })
            }
            MatchStrategy::Template | MatchStrategy::Hybrid => {
                let scales = template::candidate_scales(opts.scale_ratio, opts.multiscale);
                let (rect, score) = template::best_match(
                    &planes(reference, opts.grayscale),
                    &planes(capture, opts.grayscale),
                    &scales,
                    cancelled,
                )?;
                tracing::trace!("🎯 Best template score {:.4} at {:?}", score, rect);
                (score >= opts.confidence).then_some(Match { rect, score })
            }
        }
    }

    /// Capture and match repeatedly until found, `timeout` elapses or `cancel` fires
    ///
    /// A zero timeout makes exactly one attempt. Matching runs on the blocking
    /// pool; results are in screen coordinates even when a region is given.
    /// The part of a region left or above the screen origin is not searched.
    pub async fn poll(
        &self,
        screen: &dyn ScreenCapture,
        reference: Arc<DynamicImage>,
        opts: &LocateOptions,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Option<Match> {
        let region = match opts.region {
            Some(region) => match region.clip_negative() {
                Some(visible) => Some(visible),
                None => {
                    tracing::warn!("⚠️ Search region {:?} lies entirely off screen", region);
                    return None;
                }
            },
            None => None,
        };

        let started = Instant::now();
        loop {
            if cancel.is_cancelled() {
                return None;
            }

            match screen.capture(region).await {
                Ok(capture) => {
                    let locator = self.clone();
                    let reference = Arc::clone(&reference);
                    let token = cancel.clone();
                    let mut whole = opts.clone();
                    whole.region = None;
                    let found = tokio::task::spawn_blocking(move || {
                        locator.match_image(&reference, &capture, &whole, &|| token.is_cancelled())
                    })
                    .await
                    .unwrap_or_else(|e| {
                        tracing::warn!("⚠️ Matching task failed: {}", e);
                        None
                    });

                    if let Some(m) = found {
                        let (dx, dy) = region.map(|r| (r.x, r.y)).unwrap_or((0, 0));
                        return Some(Match { rect: m.rect.offset(dx, dy), score: m.score });
                    }
                }
                Err(e) => {
                    tracing::warn!("⚠️ Screen capture failed: {}", e);
                    if !sleep_or_cancel(self.config.capture_retry, cancel).await {
                        return None;
                    }
                    if timeout.is_zero() || started.elapsed() >= timeout {
                        return None;
                    }
                    continue;
                }
            }

            if timeout.is_zero() || started.elapsed() >= timeout {
                return None;
            }
            if !sleep_or_cancel(self.config.poll_interval, cancel).await {
                return None;
            }
        }
    }

    /// Whether two frames of the same region show no meaningful change
    ///
    /// Frames are brought to the same size and reduced to intensity; the pair
    /// is static when the share of pixels differing by at least
    /// `NOISE_FLOOR` does not exceed `1 - threshold`.
    pub fn is_static(first: &DynamicImage, second: &DynamicImage, threshold: f64) -> bool {
        let a = first.to_luma8();
        let (w, h) = a.dimensions();
        let total = (w as u64) * (h as u64);
        if total == 0 {
            return false;
        }
        let b = if second.width() == w && second.height() == h {
            second.to_luma8()
        } else {
            imageops::resize(&second.to_luma8(), w, h, FilterType::Lanczos3)
        };

        let changed = a
            .pixels()
            .zip(b.pixels())
            .filter(|(p, q)| p[0].abs_diff(q[0]) >= NOISE_FLOOR)
            .count() as f64;
        1.0 - changed / total as f64 >= threshold
    }
}

/// Split an image into the planes template matching works on
fn planes(image: &DynamicImage, grayscale: bool) -> Vec<GrayImage> {
    if grayscale {
        return vec![image.to_luma8()];
    }
    let rgb = image.to_rgb8();
    let (w, h) = rgb.dimensions();
    (0..3)
        .map(|c| GrayImage::from_fn(w, h, |x, y| image::Luma([rgb.get_pixel(x, y)[c]])))
        .collect()
}

/// Sleep unless cancelled first; false means cancelled
pub async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
