//! Frame-to-model pose estimation.

mod point_to_plane_icp;

pub use point_to_plane_icp::{IcpConfig, PointToPlaneIcp};
