//! The tracking-and-fusion engine.
//!
//! One [`Tracker`] owns the TSDF volume, the optional color volume, the
//! pose trajectory, and all per-frame pyramid buffers. Each call to
//! [`Tracker::process`] runs the full pipeline:
//!
//! ```text
//! depth preprocess → vertex/normal pyramids → ICP against the
//! predicted maps → pose append → TSDF integration → raycast of the
//! updated volume into the predicted maps for the next frame
//! ```
//!
//! Frame 0 skips ICP: the frame is fused at the initial pose and the
//! predicted maps are seeded from the measured maps. Tracking loss
//! (a singular ICP system) resets the engine to the initial pose with
//! an empty volume.

use log::{debug, info};
use nalgebra::{Isometry3, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::algorithms::extraction::{
    extract_cloud, extract_cloud_host, extract_colors, extract_normals,
};
use crate::algorithms::fusion::{
    integrate, scale_depth, update_color, ColorVolume, TsdfVolume, VolumeConfig,
};
use crate::algorithms::mapping::{
    compute_normals, create_vertex_map, resize_normal_map, resize_vertex_map, transform_maps,
};
use crate::algorithms::matching::{IcpConfig, PointToPlaneIcp};
use crate::algorithms::raycasting::{raycast, render_shaded};
use crate::core::types::{
    invalid_map_pixel, CameraPose, ColorImage, DepthImage, Intrinsics, MapImage, ScaledDepthImage,
    Trajectory,
};
use crate::core::PYRAMID_LEVELS;
use crate::sensors::preprocessing::{BilateralConfig, DepthPreprocessor};

/// Default focal length, pixels (Kinect-class sensor).
const DEFAULT_FOCAL_LENGTH: f32 = 525.0;

/// Default color-average weight cap.
const DEFAULT_COLOR_WEIGHT: u8 = 1;

/// Image dimensions must divide evenly through every pyramid halving.
const DIMENSION_ALIGN: usize = 1 << (PYRAMID_LEVELS - 1);

/// Construction-time configuration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Volume resolutions must be powers of two.
    #[error("volume resolution {0} is not a power of two")]
    ResolutionNotPowerOfTwo(usize),

    /// Image dimensions must be non-zero multiples of the pyramid factor.
    #[error("image dimensions {rows}x{cols} must be non-zero multiples of {align}")]
    BadImageDimensions {
        /// Requested rows.
        rows: usize,
        /// Requested columns.
        cols: usize,
        /// Required alignment.
        align: usize,
    },

    /// Volume edge lengths must be positive.
    #[error("volume size must be positive")]
    NonPositiveVolumeSize,
}

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// TSDF grid layout.
    pub volume: VolumeConfig,

    /// TSDF truncation distance μ, meters.
    ///
    /// Clamped up to 2.1x the largest voxel edge.
    pub truncation_distance: f32,

    /// ICP solver configuration.
    pub icp: IcpConfig,

    /// Bilateral depth filter configuration.
    pub bilateral: BilateralConfig,

    /// Depth far clip for tracking, meters. Zero disables.
    pub max_icp_distance: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            volume: VolumeConfig::default(),
            truncation_distance: 0.03,
            icp: IcpConfig::default(),
            bilateral: BilateralConfig::default(),
            max_icp_distance: 0.0,
        }
    }
}

/// Dense RGB-D tracking-and-fusion engine.
pub struct Tracker {
    rows: usize,
    cols: usize,
    intrinsics: Intrinsics,
    init_pose: CameraPose,
    truncation_distance: f32,
    preprocessor: DepthPreprocessor,
    icp: PointToPlaneIcp,
    tsdf: TsdfVolume,
    colors: Option<ColorVolume>,
    trajectory: Trajectory,
    global_time: usize,

    depths_curr: Vec<DepthImage>,
    vmaps_curr: Vec<MapImage>,
    nmaps_curr: Vec<MapImage>,
    vmaps_g_prev: Vec<MapImage>,
    nmaps_g_prev: Vec<MapImage>,
    depth_scaled: ScaledDepthImage,
}

impl Tracker {
    /// Create a tracker for a fixed image size with default settings:
    /// fx = fy = 525, principal point at the image center, a 3 m cube
    /// at 256³ voxels, and the camera placed in front of the volume
    /// looking along +Z into its center.
    pub fn new(rows: usize, cols: usize) -> Self {
        Self::with_config(rows, cols, TrackerConfig::default())
            .expect("default tracker configuration is valid")
    }

    /// Create a tracker with explicit configuration.
    pub fn with_config(rows: usize, cols: usize, config: TrackerConfig) -> Result<Self, ConfigError> {
        if rows == 0 || cols == 0 || rows % DIMENSION_ALIGN != 0 || cols % DIMENSION_ALIGN != 0 {
            return Err(ConfigError::BadImageDimensions {
                rows,
                cols,
                align: DIMENSION_ALIGN,
            });
        }
        for &r in &config.volume.resolution {
            if r < 2 || !r.is_power_of_two() {
                return Err(ConfigError::ResolutionNotPowerOfTwo(r));
            }
        }
        if config.volume.size.iter().any(|&s| s <= 0.0) {
            return Err(ConfigError::NonPositiveVolumeSize);
        }

        let tsdf = TsdfVolume::new(&config.volume);
        let volume_size = tsdf.size();
        let init_pose = CameraPose::new(
            nalgebra::Rotation3::identity(),
            volume_size * 0.5 - Vector3::new(0.0, 0.0, 0.6 * volume_size.z),
        );
        let truncation_distance = config.truncation_distance.max(tsdf.min_truncation());

        let level_dims = |i: usize| (rows >> i, cols >> i);
        let depths_curr = (0..PYRAMID_LEVELS)
            .map(|i| {
                let (r, c) = level_dims(i);
                DepthImage::new(r, c, 0)
            })
            .collect();
        let map_pyramid = || -> Vec<MapImage> {
            (0..PYRAMID_LEVELS)
                .map(|i| {
                    let (r, c) = level_dims(i);
                    MapImage::new(r, c, invalid_map_pixel())
                })
                .collect()
        };

        let mut preprocessor = DepthPreprocessor::new(config.bilateral);
        preprocessor.set_max_icp_distance(config.max_icp_distance);

        Ok(Self {
            rows,
            cols,
            intrinsics: Intrinsics::new(
                DEFAULT_FOCAL_LENGTH,
                DEFAULT_FOCAL_LENGTH,
                cols as f32 / 2.0,
                rows as f32 / 2.0,
            ),
            init_pose,
            truncation_distance,
            preprocessor,
            icp: PointToPlaneIcp::new(config.icp),
            tsdf,
            colors: None,
            trajectory: Trajectory::new(init_pose),
            global_time: 0,
            depths_curr,
            vmaps_curr: map_pyramid(),
            nmaps_curr: map_pyramid(),
            vmaps_g_prev: map_pyramid(),
            nmaps_g_prev: map_pyramid(),
            depth_scaled: ScaledDepthImage::new(rows, cols, 0.0),
        })
    }

    /// Image rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Image columns.
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Physical volume edge lengths, meters.
    pub fn volume_size(&self) -> Vector3<f32> {
        self.tsdf.size()
    }

    /// Current truncation distance μ, meters.
    pub fn truncation_distance(&self) -> f32 {
        self.truncation_distance
    }

    /// Number of fused frames since construction or the last reset.
    pub fn frames_fused(&self) -> usize {
        self.global_time
    }

    /// Number of stored poses. The seed frame is fused at the initial
    /// entry, so this equals the fused-frame count once tracking runs.
    pub fn pose_count(&self) -> usize {
        self.trajectory.len()
    }

    // === Reconfiguration ===

    /// Set the depth intrinsics. `None` for a principal point component
    /// defaults it to the image center.
    pub fn set_depth_intrinsics(&mut self, fx: f32, fy: f32, cx: Option<f32>, cy: Option<f32>) {
        self.intrinsics = Intrinsics::new(
            fx,
            fy,
            cx.unwrap_or(self.cols as f32 / 2.0),
            cy.unwrap_or(self.rows as f32 / 2.0),
        );
    }

    /// Change the physical extent of the volume cube, meters.
    pub fn set_volume_size(&mut self, size: Vector3<f32>) {
        self.tsdf.set_size(size);
        if let Some(colors) = &mut self.colors {
            colors.set_size(size);
        }
        self.truncation_distance = self.truncation_distance.max(self.tsdf.min_truncation());
    }

    /// Replace the initial camera pose.
    ///
    /// Takes effect immediately when no frame has been fused yet, and
    /// on the next reset otherwise.
    pub fn set_initial_camera_pose(&mut self, pose: &Isometry3<f32>) {
        self.init_pose = CameraPose::from_isometry(pose);
        if self.global_time == 0 {
            self.trajectory.reset(self.init_pose);
        }
    }

    /// Set the TSDF truncation distance, meters. Values below 2.1x the
    /// largest voxel edge are silently clamped up.
    pub fn set_tsdf_truncation_distance(&mut self, distance: f32) {
        self.truncation_distance = distance.max(self.tsdf.min_truncation());
    }

    /// Far-clip depth beyond `distance` meters during tracking. Zero
    /// disables clipping.
    pub fn set_depth_truncation_for_icp(&mut self, distance: f32) {
        self.preprocessor.set_max_icp_distance(distance);
    }

    /// Set the ICP correspondence rejection thresholds: Euclidean
    /// distance in meters and normal angle as the sine of the angle.
    pub fn set_icp_correspondence_filtering_params(
        &mut self,
        distance_threshold: f32,
        sine_of_angle: f32,
    ) {
        self.icp.set_filtering_params(distance_threshold, sine_of_angle);
    }

    /// Enable color fusion with the given weight cap.
    ///
    /// A negative `max_weight` keeps the current cap (default 1).
    pub fn init_color_integration(&mut self, max_weight: i32) {
        let cap = if max_weight < 0 {
            self.colors
                .as_ref()
                .map_or(DEFAULT_COLOR_WEIGHT, ColorVolume::max_weight)
        } else {
            max_weight.min(u8::MAX as i32) as u8
        };
        self.colors = Some(ColorVolume::new(
            self.tsdf.resolution(),
            self.tsdf.size(),
            cap,
        ));
    }

    // === Tracking ===

    /// Track and fuse one depth frame. Returns whether the camera was
    /// tracked; frame 0 always reports `false`.
    pub fn process(&mut self, depth: &DepthImage) -> bool {
        assert_eq!(depth.rows(), self.rows, "depth frame height mismatch");
        assert_eq!(depth.cols(), self.cols, "depth frame width mismatch");

        // A volume-size change may have raised the lower bound.
        self.truncation_distance = self.truncation_distance.max(self.tsdf.min_truncation());
        let intr = self.intrinsics;

        self.preprocessor.process(depth, &mut self.depths_curr);
        for i in 0..PYRAMID_LEVELS {
            create_vertex_map(&intr.at_level(i), &self.depths_curr[i], &mut self.vmaps_curr[i]);
            compute_normals(&self.vmaps_curr[i], &mut self.nmaps_curr[i]);
        }

        if self.global_time == 0 {
            let pose = *self.trajectory.last();
            scale_depth(depth, &intr, &mut self.depth_scaled);
            integrate(
                &mut self.tsdf,
                &self.depth_scaled,
                &intr,
                &pose,
                self.truncation_distance,
            );
            // Seed the prediction from the measured maps.
            for i in 0..PYRAMID_LEVELS {
                transform_maps(
                    &self.vmaps_curr[i],
                    &self.nmaps_curr[i],
                    &pose,
                    &mut self.vmaps_g_prev[i],
                    &mut self.nmaps_g_prev[i],
                );
            }
            self.global_time = 1;
            return false;
        }

        let prev_pose = *self.trajectory.last();
        let pose = match self.icp.align(
            &self.vmaps_curr,
            &self.nmaps_curr,
            &self.vmaps_g_prev,
            &self.nmaps_g_prev,
            &intr,
            &prev_pose,
        ) {
            Some(pose) => pose,
            None => {
                debug!("singular ICP normal matrix, tracking lost");
                self.reset();
                return false;
            }
        };
        self.trajectory.push(pose);

        scale_depth(depth, &intr, &mut self.depth_scaled);
        integrate(
            &mut self.tsdf,
            &self.depth_scaled,
            &intr,
            &pose,
            self.truncation_distance,
        );

        raycast(
            &self.tsdf,
            &intr,
            &pose,
            self.truncation_distance,
            &mut self.vmaps_g_prev[0],
            &mut self.nmaps_g_prev[0],
        );
        for i in 1..PYRAMID_LEVELS {
            let (head, tail) = self.vmaps_g_prev.split_at_mut(i);
            resize_vertex_map(&head[i - 1], &mut tail[0]);
            let (head, tail) = self.nmaps_g_prev.split_at_mut(i);
            resize_normal_map(&head[i - 1], &mut tail[0]);
        }

        self.global_time += 1;
        true
    }

    /// Track and fuse one depth frame, fusing color when tracking
    /// succeeded and color integration is enabled.
    pub fn process_with_color(&mut self, depth: &DepthImage, color: &ColorImage) -> bool {
        let tracked = self.process(depth);
        if tracked {
            if let Some(colors) = &mut self.colors {
                let pose = *self.trajectory.last();
                update_color(
                    colors,
                    &self.tsdf,
                    &self.intrinsics,
                    &pose,
                    &self.vmaps_g_prev[0],
                    color,
                    self.truncation_distance,
                );
            }
        }
        tracked
    }

    /// Reset to the initial pose with empty volumes.
    pub fn reset(&mut self) {
        if self.global_time > 0 {
            info!("tracker reset after {} fused frames", self.global_time);
        }
        self.global_time = 0;
        self.trajectory.reset(self.init_pose);
        self.tsdf.clear();
        if let Some(colors) = &mut self.colors {
            colors.clear();
        }
    }

    // === Readers ===

    /// Camera pose of fused frame `time`. Negative or out-of-range
    /// values return the latest pose.
    pub fn camera_pose(&self, time: i32) -> Isometry3<f32> {
        self.trajectory.at(time).to_isometry()
    }

    /// Render the current predicted surface with Lambertian shading.
    ///
    /// `light_pos` defaults to -3x the volume size, matching the
    /// camera-side placement of the default view.
    pub fn render_view(&self, light_pos: Option<Vector3<f32>>) -> ColorImage {
        let light = light_pos.unwrap_or_else(|| self.tsdf.size() * -3.0);
        render_shaded(&self.vmaps_g_prev[0], &self.nmaps_g_prev[0], light)
    }

    /// Raycast the volume from an arbitrary pose into scratch maps and
    /// render them shaded. The predicted pyramid is left untouched.
    pub fn render_view_from_pose(&self, pose: &Isometry3<f32>) -> ColorImage {
        let mut vmap = MapImage::new(self.rows, self.cols, invalid_map_pixel());
        let mut nmap = MapImage::new(self.rows, self.cols, invalid_map_pixel());
        raycast(
            &self.tsdf,
            &self.intrinsics,
            &CameraPose::from_isometry(pose),
            self.truncation_distance,
            &mut vmap,
            &mut nmap,
        );
        render_shaded(&vmap, &nmap, self.tsdf.size() * -3.0)
    }

    /// Level-0 predicted vertex map, world frame. The view is valid
    /// until the next frame is processed.
    pub fn last_frame_vertices(&self) -> &MapImage {
        &self.vmaps_g_prev[0]
    }

    /// Level-0 predicted normal map, world frame. The view is valid
    /// until the next frame is processed.
    pub fn last_frame_normals(&self) -> &MapImage {
        &self.nmaps_g_prev[0]
    }

    /// Extract the surface cloud with the parallel extractor.
    pub fn cloud_from_volume(&self) -> Vec<Vector3<f32>> {
        extract_cloud(&self.tsdf)
    }

    /// Extract the surface cloud with the sequential scan;
    /// `connected26` widens the neighborhood from 3 to 13 neighbors.
    pub fn cloud_from_volume_host(&self, connected26: bool) -> Vec<Vector3<f32>> {
        extract_cloud_host(&self.tsdf, connected26)
    }

    /// TSDF-gradient normals for an extracted cloud.
    pub fn normals_from_volume(&self, cloud: &[Vector3<f32>]) -> Vec<Vector3<f32>> {
        extract_normals(&self.tsdf, cloud)
    }

    /// Colors for an extracted cloud. Empty when color integration has
    /// not been enabled.
    pub fn colors_from_volume(&self, cloud: &[Vector3<f32>]) -> Vec<[u8; 3]> {
        match &self.colors {
            Some(colors) => extract_colors(colors, cloud),
            None => Vec::new(),
        }
    }

    /// Download the TSDF as normalized values in [-1, 1].
    pub fn tsdf_volume_data(&self) -> Vec<f32> {
        self.tsdf.download_tsdf()
    }

    /// Download the TSDF and the per-voxel weights in one pass.
    pub fn tsdf_volume_and_weights(&self) -> (Vec<f32>, Vec<i16>) {
        self.tsdf.download_tsdf_and_weights()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn small_config() -> TrackerConfig {
        TrackerConfig {
            volume: VolumeConfig {
                resolution: [64, 64, 64],
                size: [1.6, 1.6, 1.6],
            },
            ..TrackerConfig::default()
        }
    }

    #[test]
    fn test_default_construction() {
        let tracker = Tracker::new(48, 64);
        assert_eq!(tracker.rows(), 48);
        assert_eq!(tracker.cols(), 64);
        assert_eq!(tracker.pose_count(), 1);
        assert_eq!(tracker.frames_fused(), 0);

        let pose = tracker.camera_pose(-1);
        assert_relative_eq!(pose.translation.vector.x, 1.5, epsilon = 1e-5);
        assert_relative_eq!(pose.translation.vector.y, 1.5, epsilon = 1e-5);
        assert_relative_eq!(pose.translation.vector.z, -0.3, epsilon = 1e-4);
    }

    #[test]
    fn test_truncation_clamped_to_grid() {
        let tracker = Tracker::new(48, 64);
        // Default cell edge: 3.0 / 256; the requested 0.03 exceeds the
        // 2.1-cell lower bound, so it is kept.
        assert_relative_eq!(tracker.truncation_distance(), 0.03, epsilon = 1e-6);

        let mut tracker = Tracker::with_config(
            48,
            64,
            TrackerConfig {
                volume: VolumeConfig {
                    resolution: [32, 32, 32],
                    size: [3.2, 3.2, 3.2],
                },
                ..TrackerConfig::default()
            },
        )
        .unwrap();
        // Cell edge 0.1 -> lower bound 0.21.
        assert_relative_eq!(tracker.truncation_distance(), 0.21, epsilon = 1e-5);
        tracker.set_tsdf_truncation_distance(0.01);
        assert_relative_eq!(tracker.truncation_distance(), 0.21, epsilon = 1e-5);
        tracker.set_tsdf_truncation_distance(0.5);
        assert_relative_eq!(tracker.truncation_distance(), 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_invalid_configurations_rejected() {
        assert!(matches!(
            Tracker::with_config(50, 64, TrackerConfig::default()),
            Err(ConfigError::BadImageDimensions { .. })
        ));
        let mut config = TrackerConfig::default();
        config.volume.resolution = [100, 128, 128];
        assert!(matches!(
            Tracker::with_config(48, 64, config),
            Err(ConfigError::ResolutionNotPowerOfTwo(100))
        ));
        let mut config = TrackerConfig::default();
        config.volume.size = [0.0, 3.0, 3.0];
        assert!(matches!(
            Tracker::with_config(48, 64, config),
            Err(ConfigError::NonPositiveVolumeSize)
        ));
    }

    #[test]
    fn test_first_frame_not_tracked() {
        let mut tracker = Tracker::with_config(48, 64, small_config()).unwrap();
        let depth = DepthImage::new(48, 64, 1000);
        assert!(!tracker.process(&depth));
        assert_eq!(tracker.frames_fused(), 1);
        assert_eq!(tracker.pose_count(), 1);
    }

    #[test]
    fn test_all_zero_first_frame_keeps_volume_empty() {
        let mut tracker = Tracker::with_config(48, 64, small_config()).unwrap();
        let depth = DepthImage::new(48, 64, 0);
        assert!(!tracker.process(&depth));
        let (_, weights) = tracker.tsdf_volume_and_weights();
        assert!(weights.iter().all(|&w| w == 0));
    }

    #[test]
    fn test_set_initial_pose_before_first_frame() {
        let mut tracker = Tracker::with_config(48, 64, small_config()).unwrap();
        let pose = Isometry3::translation(0.8, 0.8, -0.4);
        tracker.set_initial_camera_pose(&pose);
        let stored = tracker.camera_pose(0);
        assert_relative_eq!(stored.translation.vector.z, -0.4, epsilon = 1e-6);
    }

    #[test]
    fn test_colors_empty_without_init() {
        let tracker = Tracker::with_config(48, 64, small_config()).unwrap();
        let cloud = vec![Vector3::repeat(0.8); 4];
        assert!(tracker.colors_from_volume(&cloud).is_empty());
    }

    #[test]
    fn test_volume_downloads_agree() {
        let mut tracker = Tracker::with_config(48, 64, small_config()).unwrap();
        tracker.set_depth_intrinsics(50.0, 50.0, None, None);
        tracker.set_initial_camera_pose(&Isometry3::translation(0.8, 0.8, -0.5));
        let depth = DepthImage::new(48, 64, 1000);
        tracker.process(&depth);

        let single = tracker.tsdf_volume_data();
        let (pair, weights) = tracker.tsdf_volume_and_weights();
        assert_eq!(single, pair);
        assert!(weights.iter().any(|&w| w > 0));
    }
}
