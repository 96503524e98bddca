//! Volumetric fusion: TSDF and color volumes plus their integrators.

mod color_volume;
mod integrator;
mod tsdf_volume;

pub use color_volume::{pack_color, unpack_color, ColorVolume};
pub use integrator::{integrate, scale_depth, update_color};
pub use tsdf_volume::{
    pack_tsdf, unpack_tsdf, TsdfVolume, VolumeConfig, DIVISOR, EMPTY_TSDF, MAX_WEIGHT,
};
