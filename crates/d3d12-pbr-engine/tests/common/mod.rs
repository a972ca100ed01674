#![allow(dead_code)]

use d3d12_pbr_engine::Engine;
use d3d12_pbr_engine::EngineConfig;
use d3d12_pbr_engine::EngineResult;
use d3d12_pbr_engine::backend::headless::GpuEvent;
use d3d12_pbr_engine::backend::headless::Headless;
use d3d12_pbr_engine::backend::headless::SimulatedGpu;
use d3d12_pbr_engine::model_asset::ImageAsset;
use d3d12_pbr_engine::pipeline::ShaderBytecode;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Once;
use tracing_subscriber::EnvFilter;

pub const WIDTH: u32 = 320;
pub const HEIGHT: u32 = 180;

static INIT: Once = Once::new();

pub fn init() {
    INIT.call_once(|| {
        let _ = color_eyre::install();
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_target(false)
            .try_init();
    });
}

pub fn engine(gpu: &SimulatedGpu, config: EngineConfig) -> EngineResult<Engine<Headless>> {
    init();
    Engine::initialize_with_shaders(
        gpu.device(),
        &(),
        WIDTH,
        HEIGHT,
        config,
        ShaderBytecode::from_bytes("pbr_vs.cso", b"DXBC vertex".to_vec()),
        ShaderBytecode::from_bytes("pbr_ps.cso", b"DXBC pixel".to_vec()),
    )
}

/// An allocator reset that happened before the GPU finished the allocator's last submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EarlyReset {
    pub allocator: u64,
    pub needed: u64,
    pub completed: u64,
}

/// Replays the event log and pairs every allocator reset with the fence that guarded the
/// allocator's previous submission.
pub fn early_resets(events: &[GpuEvent]) -> Vec<EarlyReset> {
    let mut guarding_fence: HashMap<u64, u64> = HashMap::new();
    let mut unsignaled: Vec<u64> = Vec::new();
    let mut early = Vec::new();
    for event in events {
        match *event {
            GpuEvent::Executed { allocator } => unsignaled.push(allocator),
            GpuEvent::Signaled { value } => {
                for allocator in unsignaled.drain(..) {
                    guarding_fence.insert(allocator, value);
                }
            }
            GpuEvent::AllocatorReset {
                allocator,
                completed,
            } => {
                let needed = guarding_fence.get(&allocator).copied().unwrap_or(0);
                if completed < needed {
                    early.push(EarlyReset {
                        allocator,
                        needed,
                        completed,
                    });
                }
            }
            _ => {}
        }
    }
    early
}

pub fn count_waits(events: &[GpuEvent]) -> usize {
    events
        .iter()
        .filter(|event| matches!(event, GpuEvent::Waited { .. }))
        .count()
}

pub fn png(width: u32, height: u32, rgba: [u8; 4]) -> ImageAsset {
    let image = image::RgbaImage::from_pixel(width, height, image::Rgba(rgba));
    let mut bytes = Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, image::ImageFormat::Png)
        .expect("encoding a png in memory");
    ImageAsset {
        bytes: bytes.into_inner(),
        format: "png".into(),
        srgb: false,
    }
}
