mod common;

use d3d12_pbr_engine::Engine;
use d3d12_pbr_engine::EngineConfig;
use d3d12_pbr_engine::FramePhase;
use d3d12_pbr_engine::GpuError;
use d3d12_pbr_engine::backend::headless::Headless;
use d3d12_pbr_engine::backend::headless::SimulatedGpu;
use d3d12_pbr_engine::display::DisplayInfo;
use d3d12_pbr_engine::display::MonitorId;
use d3d12_pbr_engine::display::WindowEventListener;
use d3d12_pbr_engine::model_asset::ImageAsset;
use d3d12_pbr_engine::model_asset::ModelAsset;
use d3d12_pbr_engine::texture_manager::DEFAULT_TEXTURE_COUNT;
use std::path::PathBuf;

fn textured_sphere() -> ModelAsset {
    let mut model = ModelAsset::uv_sphere(1.0, 8, 4);
    model.images = vec![common::png(8, 8, [90, 160, 30, 255])];
    model.materials[0].base_color_texture = Some(0);
    model.materials[0].emissive_texture = Some(0);
    model
}

#[test]
fn shutdown_returns_every_slot_and_resource() -> color_eyre::Result<()> {
    let gpu = SimulatedGpu::new();
    gpu.set_lag(3);
    let mut engine = common::engine(&gpu, EngineConfig::default().with_frame_count(3))?;
    engine.load_model(&textured_sphere())?;
    for _ in 0..7 {
        engine.frame(1.0 / 60.0)?;
    }
    // Reloading releases the first model's resources.
    engine.load_model(&textured_sphere())?;
    engine.frame(1.0 / 60.0)?;

    let pools = [
        engine.cbv_srv_pool().clone(),
        engine.staging_srv_pool().clone(),
        engine.rtv_pool().clone(),
        engine.dsv_pool().clone(),
    ];
    assert!(pools.iter().all(|pool| pool.free_count() < pool.capacity()));
    engine.shutdown()?;

    for pool in &pools {
        assert_eq!(pool.free_count(), pool.capacity(), "{:?} pool leaked", pool.kind());
    }
    assert_eq!(gpu.live_resource_count(), 0);
    assert_eq!(gpu.allocated_bytes(), 0);
    assert_eq!(gpu.completed_value(), gpu.last_signaled());
    assert_eq!(gpu.violations(), vec![]);
    Ok(())
}

#[test]
fn reloading_a_model_replaces_its_textures() -> color_eyre::Result<()> {
    let gpu = SimulatedGpu::new();
    gpu.set_lag(2);
    let mut engine = common::engine(&gpu, EngineConfig::default())?;
    engine.load_model(&textured_sphere())?;
    engine.frame(1.0 / 60.0)?;
    let textures = engine.textures().len();
    let staging_free = engine.staging_srv_pool().free_count();
    let visible_free = engine.cbv_srv_pool().free_count();
    let live = gpu.live_resource_count();
    assert_eq!(textures, DEFAULT_TEXTURE_COUNT + 1);

    for _ in 0..20 {
        engine.load_model(&textured_sphere())?;
        engine.frame(1.0 / 60.0)?;
        assert_eq!(engine.textures().len(), textures);
        assert_eq!(engine.staging_srv_pool().free_count(), staging_free);
        assert_eq!(engine.cbv_srv_pool().free_count(), visible_free);
        assert_eq!(gpu.live_resource_count(), live);
    }
    assert_eq!(gpu.violations(), vec![]);
    Ok(())
}

#[test]
fn failed_load_keeps_only_the_defaults() -> color_eyre::Result<()> {
    let gpu = SimulatedGpu::new();
    let mut engine = common::engine(&gpu, EngineConfig::default())?;
    let staging_free = engine.staging_srv_pool().free_count();
    let live = gpu.live_resource_count();

    // The first image uploads, the second fails to decode and aborts the batch.
    let mut model = textured_sphere();
    model.images.push(ImageAsset {
        bytes: b"DDS |not really".to_vec(),
        format: "dds".into(),
        srgb: false,
    });
    model.materials[0].normal_texture = Some(1);
    assert!(engine.load_model(&model).is_err());

    assert_eq!(engine.textures().len(), DEFAULT_TEXTURE_COUNT);
    assert!(!engine.textures().has_pending_uploads());
    assert_eq!(engine.staging_srv_pool().free_count(), staging_free);
    assert_eq!(gpu.live_resource_count(), live);

    engine.load_model(&textured_sphere())?;
    engine.frame(1.0 / 60.0)?;
    assert_eq!(engine.textures().len(), DEFAULT_TEXTURE_COUNT + 1);
    assert_eq!(gpu.violations(), vec![]);
    Ok(())
}

#[test]
fn dropping_mid_frame_drains_the_gpu() -> color_eyre::Result<()> {
    let gpu = SimulatedGpu::new();
    gpu.set_lag(4);
    let mut engine = common::engine(&gpu, EngineConfig::default())?;
    engine.load_model(&textured_sphere())?;
    engine.frame(0.0)?;
    engine.begin_frame()?;
    engine.update(0.0)?;
    assert_eq!(engine.phase(), FramePhase::Updated);
    drop(engine);

    assert_eq!(gpu.live_resource_count(), 0);
    assert_eq!(gpu.completed_value(), gpu.last_signaled());
    assert_eq!(gpu.violations(), vec![]);
    Ok(())
}

#[test]
fn failed_initialization_leaves_nothing_behind() {
    let mut failures = 0;
    let mut successes = 0;
    let coarse = (0..=1_300_000u64).step_by(50_000);
    let fine = (1_150_000..1_160_000u64).step_by(128);
    for budget in coarse.chain(fine) {
        let gpu = SimulatedGpu::new();
        gpu.set_memory_budget(Some(budget));
        match common::engine(&gpu, EngineConfig::default()) {
            Ok(engine) => {
                successes += 1;
                drop(engine);
            }
            Err(error) => {
                failures += 1;
                assert_eq!(
                    error.gpu_error(),
                    Some(&GpuError::OutOfDeviceMemory),
                    "budget {}",
                    budget
                );
            }
        }
        assert_eq!(gpu.live_resource_count(), 0, "budget {}", budget);
        assert_eq!(gpu.allocated_bytes(), 0, "budget {}", budget);
        assert_eq!(gpu.violations(), vec![], "budget {}", budget);
    }
    assert!(failures > 0);
    assert!(successes > 0);
}

#[test]
fn invalid_configurations_are_rejected() {
    let gpu = SimulatedGpu::new();
    let single = common::engine(&gpu, EngineConfig::default().with_frame_count(1));
    assert!(matches!(
        single.err().and_then(|e| e.gpu_error().cloned()),
        Some(GpuError::InvalidArgument(_))
    ));

    let mut config = EngineConfig::default();
    config.max_objects_per_frame = 0;
    assert!(common::engine(&gpu, config).is_err());

    let missing = PathBuf::from("does-not-exist").join("pbr_vs.cso");
    let config = EngineConfig::default().with_shaders(&missing, "does-not-exist/pbr_ps.cso");
    let error = Engine::<Headless>::initialize(gpu.device(), &(), 64, 64, config).err();
    assert_eq!(
        error.as_ref().and_then(|e| e.gpu_error()),
        Some(&GpuError::ShaderMissing(missing))
    );
    assert_eq!(gpu.live_resource_count(), 0);
}

#[test]
fn display_changes_reach_each_slot_at_its_next_frame() -> color_eyre::Result<()> {
    let gpu = SimulatedGpu::new();
    gpu.set_lag(1);
    let mut engine = common::engine(&gpu, EngineConfig::default().with_frame_count(2))?;
    engine.frame(0.0)?;
    engine.frame(0.0)?;

    let paper_white = |engine: &Engine<Headless>, slot: usize| {
        engine
            .frames()
            .get(slot)
            .map(|frame| frame.display().value().paper_white_nits)
    };
    let hdr = DisplayInfo {
        hdr_enabled: true,
        max_luminance: 1000.0,
        min_luminance: 0.01,
        max_full_frame_luminance: 600.0,
        bits_per_color: 10,
    };
    gpu.set_display(hdr);

    // Same monitor, no re-query.
    engine.on_window_moved();
    assert_eq!(engine.display_info(), DisplayInfo::sdr());

    gpu.set_monitor(Some(MonitorId(2)));
    engine.on_window_moved();
    assert_eq!(engine.display_info(), hdr);
    assert_eq!(paper_white(&engine, 0), Some(80.0));
    assert_eq!(paper_white(&engine, 1), Some(80.0));

    engine.begin_frame()?;
    let current = engine.frame_index() as usize;
    assert_eq!(paper_white(&engine, current), Some(200.0));
    assert_eq!(paper_white(&engine, 1 - current), Some(80.0));
    engine.end_frame()?;
    engine.present()?;

    engine.frame(0.0)?;
    assert_eq!(paper_white(&engine, 0), Some(200.0));
    assert_eq!(paper_white(&engine, 1), Some(200.0));
    assert_eq!(
        engine.frames().get(0).map(|frame| frame.display().value().max_luminance),
        Some(1000.0)
    );

    gpu.set_display(DisplayInfo::sdr());
    engine.on_display_changed();
    engine.frame(0.0)?;
    engine.frame(0.0)?;
    assert_eq!(paper_white(&engine, 0), Some(80.0));
    assert_eq!(paper_white(&engine, 1), Some(80.0));
    assert_eq!(gpu.violations(), vec![]);
    Ok(())
}
