/// Visual target location
///
/// This module finds reference images on screen:
/// - `geometry`: screen-space rectangles
/// - `template`: multi-scale normalized cross-correlation
/// - `feature`: keypoint matching with a robust homography
/// - `locator`: strategy selection, polling and stillness checks

pub mod feature;
pub mod geometry;
pub mod locator;
pub mod template;

pub use geometry::Rect;
pub use locator::{sleep_or_cancel, LocateOptions, Match, MatchStrategy, VisualLocator};
