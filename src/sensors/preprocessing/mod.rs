//! Depth preprocessing: bilateral denoise, far clip, pyramid.
//!
//! # Pipeline
//!
//! ```text
//! raw u16 depth → BilateralFilter → (optional far clip) → 2x PyrDown × (L-1)
//! ```
//!
//! The output is one denoised depth image per pyramid level, ready for
//! vertex/normal map construction.

mod bilateral;
mod pyramid;

pub use bilateral::{bilateral_filter, BilateralConfig};
pub use pyramid::{pyr_down, truncate_depth};

use crate::core::types::DepthImage;

/// Per-frame depth preprocessor.
///
/// Owns the filter configuration; the level buffers are owned by the
/// caller and overwritten in place each frame.
#[derive(Debug, Clone)]
pub struct DepthPreprocessor {
    bilateral: BilateralConfig,
    /// Far clip for tracking, meters. Zero disables clipping.
    max_icp_distance: f32,
}

impl DepthPreprocessor {
    /// Create a preprocessor with the given bilateral configuration.
    pub fn new(bilateral: BilateralConfig) -> Self {
        Self {
            bilateral,
            max_icp_distance: 0.0,
        }
    }

    /// Set the far clip distance in meters; zero disables clipping.
    pub fn set_max_icp_distance(&mut self, distance: f32) {
        self.max_icp_distance = distance;
    }

    /// Fill the depth pyramid from a raw frame.
    ///
    /// `levels[0]` receives the denoised (and optionally clipped) full
    /// resolution depth; each subsequent level is a 2x downsample of the
    /// previous one.
    pub fn process(&self, raw: &DepthImage, levels: &mut [DepthImage]) {
        assert!(!levels.is_empty(), "at least one pyramid level");
        bilateral_filter(raw, &mut levels[0], &self.bilateral);
        if self.max_icp_distance > 0.0 {
            truncate_depth(&mut levels[0], self.max_icp_distance);
        }

        for i in 1..levels.len() {
            let (head, tail) = levels.split_at_mut(i);
            pyr_down(&head[i - 1], &mut tail[0]);
        }
    }
}

impl Default for DepthPreprocessor {
    fn default() -> Self {
        Self::new(BilateralConfig::default())
    }
}
