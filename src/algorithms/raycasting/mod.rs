//! Model surface prediction and rendering.

mod raycaster;
mod rendering;

pub use raycaster::raycast;
pub use rendering::{merge_point_normal, paint_view, render_shaded, PointNormal};
