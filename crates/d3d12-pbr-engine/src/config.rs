use std::path::PathBuf;
use std::time::Duration;

/// Sizing and presentation settings, fixed for the engine's lifetime.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Swap-chain buffers, and therefore frame resources.
    pub frame_count: u32,
    pub cbv_srv_uav_descriptors: u32,
    /// Non-visible pool that texture SRVs are created in before being copied into material tables.
    pub staging_srv_descriptors: u32,
    pub rtv_descriptors: u32,
    pub dsv_descriptors: u32,
    pub clear_color: [f32; 4],
    pub sync_interval: u32,
    pub vertex_shader: PathBuf,
    pub pixel_shader: PathBuf,
    /// Transform buffers per frame resource.
    pub max_objects_per_frame: usize,
    /// How long `begin_frame` waits on a slot before giving up. `None` waits forever.
    pub fence_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            frame_count: 2,
            cbv_srv_uav_descriptors: 2048,
            staging_srv_descriptors: 512,
            rtv_descriptors: 512,
            dsv_descriptors: 512,
            clear_color: [0.25, 0.25, 0.25, 1.0],
            sync_interval: 1,
            vertex_shader: PathBuf::from("shaders/pbr_vs.cso"),
            pixel_shader: PathBuf::from("shaders/pbr_ps.cso"),
            max_objects_per_frame: 1,
            fence_timeout: None,
        }
    }
}

impl EngineConfig {
    pub fn with_frame_count(mut self, frame_count: u32) -> Self {
        self.frame_count = frame_count;
        self
    }

    pub fn with_shaders(mut self, vertex: impl Into<PathBuf>, pixel: impl Into<PathBuf>) -> Self {
        self.vertex_shader = vertex.into();
        self.pixel_shader = pixel.into();
        self
    }
}
