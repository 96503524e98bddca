//! Core data types shared across the pipeline.

mod image;
mod intrinsics;
mod pose;
mod trajectory;

pub use image::{
    invalid_map_pixel, map_pixel_valid, ColorImage, DepthImage, Image, MapImage, ScaledDepthImage,
};
pub use intrinsics::Intrinsics;
pub use pose::CameraPose;
pub use trajectory::Trajectory;
