mod common;

use d3d12_pbr_engine::EngineConfig;
use d3d12_pbr_engine::GpuError;
use d3d12_pbr_engine::backend::Format;
use d3d12_pbr_engine::backend::ViewDesc;
use d3d12_pbr_engine::backend::headless::SimulatedGpu;
use d3d12_pbr_engine::material::MaterialSrvTable;
use d3d12_pbr_engine::material::TextureUsage;
use d3d12_pbr_engine::model_asset::ImageAsset;
use d3d12_pbr_engine::model_asset::MaterialAsset;
use d3d12_pbr_engine::model_asset::ModelAsset;
use d3d12_pbr_engine::pipeline::ROOT_MATERIAL_TEXTURES;
use d3d12_pbr_engine::texture_manager::TextureHandle;

#[test]
fn missing_normal_map_binds_the_flat_normal() -> color_eyre::Result<()> {
    let gpu = SimulatedGpu::new();
    let mut engine = common::engine(&gpu, EngineConfig::default())?;
    engine.load_model(&ModelAsset::uv_sphere(1.0, 8, 4))?;

    let material = engine.material(0).expect("sphere has a material");
    assert_eq!(material.texture(TextureUsage::Normal), None);
    assert_eq!(material.resolve(TextureUsage::Normal), TextureHandle::FLAT_NORMAL);
    for usage in TextureUsage::ALL {
        assert_ne!(material.resolve(usage), TextureHandle::INVALID);
    }

    let flat_normal = engine
        .textures()
        .get(TextureHandle::FLAT_NORMAL)
        .and_then(|texture| texture.resource())
        .map(|resource| resource.id());
    let table = engine.material_table(0).expect("sphere has a material table");
    let base = table.base_index().expect("table is live");
    let record = gpu
        .descriptor(engine.cbv_srv_pool().cpu_handle(base + TextureUsage::Normal.slot()))
        .expect("normal slot was written");
    assert_eq!(record.resource, flat_normal);
    let table_base = table.gpu_base().expect("visible pool");

    // The table the draw binds is the one that holds the flat normal.
    engine.frame(1.0 / 60.0)?;
    gpu.drain();
    let frame = gpu.submissions().into_iter().last().expect("frame was submitted");
    assert!(frame.root_tables.contains(&(ROOT_MATERIAL_TEXTURES, table_base)));
    Ok(())
}

#[test]
fn freed_material_range_is_reused_by_smaller_runs() -> color_eyre::Result<()> {
    let gpu = SimulatedGpu::new();
    let mut engine = common::engine(&gpu, EngineConfig::default())?;
    engine.load_model(&ModelAsset::uv_sphere(1.0, 8, 4))?;
    let pool = engine.cbv_srv_pool().clone();
    let free_before = pool.free_count();

    let table = MaterialSrvTable::init(
        engine.device(),
        &pool,
        engine.material(0).expect("sphere has a material"),
        engine.textures(),
    )?;
    let base = table.base_index().expect("table is live");
    assert_eq!(pool.free_count(), free_before - 5);
    drop(table);
    assert_eq!(pool.free_count(), free_before);

    let three = pool.linear_allocate_range(3)?;
    let two = pool.linear_allocate_range(2)?;
    assert_eq!(three, base);
    assert_eq!(two, base + 3);
    assert!((three..three + 3).all(|index| pool.is_allocated(index)));
    assert!((two..two + 2).all(|index| pool.is_allocated(index)));
    pool.free_range(three, 3)?;
    pool.free_range(two, 2)?;
    assert_eq!(pool.free_count(), free_before);
    Ok(())
}

#[test]
fn model_images_become_material_textures() -> color_eyre::Result<()> {
    let gpu = SimulatedGpu::new();
    let mut engine = common::engine(&gpu, EngineConfig::default())?;
    let mut model = ModelAsset::uv_sphere(1.0, 8, 4);
    let mut albedo = common::png(4, 4, [200, 10, 10, 255]);
    albedo.srgb = true;
    model.images = vec![albedo, common::png(2, 2, [128, 128, 255, 255])];
    model.materials[0] = MaterialAsset {
        name: "painted".into(),
        base_color_texture: Some(0),
        normal_texture: Some(1),
        ..Default::default()
    };
    engine.load_model(&model)?;

    let material = engine.material(0).expect("model has a material");
    let albedo = material
        .texture(TextureUsage::BaseColor)
        .expect("albedo was loaded");
    let normal = material.texture(TextureUsage::Normal).expect("normal was loaded");
    assert!(albedo.0 >= 3 && normal.0 >= 3);
    assert_eq!(material.resolve(TextureUsage::Emissive), TextureHandle::WHITE);

    let albedo_texture = engine.textures().get(albedo).expect("albedo handle is live");
    assert_eq!(albedo_texture.format(), Format::Rgba8UnormSrgb);
    assert_eq!(albedo_texture.dimensions(), (4, 4));
    assert!(!engine.textures().has_pending_uploads());

    let base = engine
        .material_table(0)
        .and_then(|table| table.base_index())
        .expect("table is live");
    let record = gpu
        .descriptor(engine.cbv_srv_pool().cpu_handle(base + TextureUsage::BaseColor.slot()))
        .expect("albedo slot was written");
    assert_eq!(
        record.view,
        ViewDesc::ShaderResource {
            format: Format::Rgba8UnormSrgb
        }
    );
    assert_eq!(gpu.violations(), vec![]);
    Ok(())
}

#[test]
fn empty_images_fall_back_and_unknown_formats_fail() -> color_eyre::Result<()> {
    let gpu = SimulatedGpu::new();
    let mut engine = common::engine(&gpu, EngineConfig::default())?;

    let mut model = ModelAsset::uv_sphere(1.0, 8, 4);
    model.images = vec![ImageAsset {
        bytes: Vec::new(),
        format: "png".into(),
        srgb: true,
    }];
    model.materials[0].base_color_texture = Some(0);
    engine.load_model(&model)?;
    assert_eq!(
        engine.material(0).map(|m| m.resolve(TextureUsage::BaseColor)),
        Some(TextureHandle::WHITE)
    );

    model.images = vec![ImageAsset {
        bytes: b"DDS |not really".to_vec(),
        format: "dds".into(),
        srgb: false,
    }];
    let error = engine.load_model(&model).unwrap_err();
    assert_eq!(
        error.gpu_error(),
        Some(&GpuError::UnsupportedImageFormat("dds".into()))
    );

    // A failed load leaves the engine usable.
    engine.load_model(&ModelAsset::uv_sphere(1.0, 8, 4))?;
    engine.frame(1.0 / 60.0)?;
    assert_eq!(gpu.violations(), vec![]);
    Ok(())
}

#[test]
fn meshes_with_unknown_materials_draw_with_the_default() -> color_eyre::Result<()> {
    let gpu = SimulatedGpu::new();
    let mut engine = common::engine(&gpu, EngineConfig::default())?;
    let mut model = ModelAsset::uv_sphere(1.0, 8, 4);
    model.meshes[0].material_id = 7;
    engine.load_model(&model)?;
    engine.frame(1.0 / 60.0)?;
    gpu.drain();
    let frame = gpu.submissions().into_iter().last().expect("frame was submitted");
    assert_eq!(frame.draws, 1);
    assert!(frame.root_tables.iter().any(|(slot, _)| *slot == ROOT_MATERIAL_TEXTURES));
    Ok(())
}
