//! Per-frame map construction (vertex and normal maps).

mod maps;

pub use maps::{
    compute_normals, create_vertex_map, resize_normal_map, resize_vertex_map, transform_maps,
};
