//! GhanaFusion - dense volumetric RGB-D tracking and fusion
//!
//! Consumes a stream of depth frames (optionally paired with color)
//! from a calibrated RGB-D sensor, estimates the 6-DoF camera pose of
//! every frame, and incrementally fuses the measurements into a
//! truncated signed distance volume covering one fixed cube of space.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    engine/                          │  ← Orchestration
//! │               (tracker, lifecycle)                  │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                  algorithms/                        │  ← Core algorithms
//! │   (mapping, matching, fusion, raycasting,           │
//! │    extraction)                                      │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                   sensors/                          │  ← Depth processing
//! │            (bilateral, clip, pyramid)               │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                     core/                           │  ← Foundation
//! │                (types, math)                        │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! # Per-frame dataflow
//!
//! 1. Bilateral denoise, optional far clip, 2x depth pyramid
//! 2. Vertex and normal maps per pyramid level
//! 3. Coarse-to-fine point-to-plane ICP against the predicted maps
//!    raycast at the end of the previous frame
//! 4. Pose append, TSDF (and optional color) integration
//! 5. Raycast of the updated volume into the next predicted maps
//!
//! All heavy kernels run data-parallel over rows or volume slices.

// ============================================================================
// Layer 1: Core foundation (no internal deps)
// ============================================================================
pub mod core;

// ============================================================================
// Layer 2: Sensor processing (depends on core)
// ============================================================================
pub mod sensors;

// ============================================================================
// Layer 3: Algorithms (depends on core, sensors)
// ============================================================================
pub mod algorithms;

// ============================================================================
// Layer 4: Engine (depends on all layers)
// ============================================================================
pub mod engine;

// ============================================================================
// Convenience re-exports (flat namespace for common use)
// ============================================================================

// Core types
pub use crate::core::types::{
    CameraPose, ColorImage, DepthImage, Image, Intrinsics, MapImage, Trajectory,
};
pub use crate::core::PYRAMID_LEVELS;

// Sensors
pub use crate::sensors::preprocessing::{BilateralConfig, DepthPreprocessor};

// Algorithms
pub use crate::algorithms::extraction::{
    extract_cloud, extract_cloud_host, extract_colors, extract_normals,
};
pub use crate::algorithms::fusion::{ColorVolume, TsdfVolume, VolumeConfig, DIVISOR, MAX_WEIGHT};
pub use crate::algorithms::matching::{IcpConfig, PointToPlaneIcp};
pub use crate::algorithms::raycasting::{merge_point_normal, paint_view, PointNormal};

// Engine
pub use crate::engine::{ConfigError, Tracker, TrackerConfig};
