//! Surface cloud extraction from the fused volumes.

mod cloud;

pub use cloud::{extract_cloud, extract_cloud_host, extract_colors, extract_normals};
