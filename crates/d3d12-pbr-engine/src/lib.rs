//! Frame-resource and GPU-resource lifecycle for a Direct3D 12 PBR renderer.
//!
//! The CPU records at most `frame_count - 1` frames ahead of the GPU. Each frame slot owns its
//! command allocator and constant buffers, and a slot is only recycled once the fence value it
//! was submitted with has been reached.

pub mod asset_path;
pub mod backend;
pub mod camera;
pub mod command_queue;
pub mod config;
pub mod constant_buffer;
pub mod descriptor_pool;
pub mod display;
pub mod engine;
pub mod error;
pub mod frame_resource;
pub mod gpu_buffer;
pub mod material;
pub mod mesh;
pub mod model_asset;
pub mod pipeline;
pub mod render_target;
pub mod shader_constants;
pub mod texture;
pub mod texture_manager;
pub mod upload_batch;

pub use config::EngineConfig;
pub use engine::Engine;
pub use engine::FramePhase;
pub use error::EngineReport;
pub use error::EngineResult;
pub use error::GpuError;
