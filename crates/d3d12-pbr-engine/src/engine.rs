use crate::backend::Backend;
use crate::backend::CommandList;
use crate::backend::DescriptorKind;
use crate::backend::RenderDevice;
use crate::backend::ResourceState;
use crate::backend::SwapChain;
use crate::backend::Viewport;
use crate::camera::Camera;
use crate::command_queue::CommandQueue;
use crate::config::EngineConfig;
use crate::descriptor_pool::DescriptorPool;
use crate::display::DisplayInfo;
use crate::display::MonitorId;
use crate::display::WindowEventListener;
use crate::error::EngineResult;
use crate::error::GpuError;
use crate::frame_resource::FrameRing;
use crate::material::MaterialGpu;
use crate::material::MaterialSrvTable;
use crate::mesh::MeshGpu;
use crate::model_asset::MaterialAsset;
use crate::model_asset::ModelAsset;
use crate::model_asset::StandardVertex;
use crate::pipeline::PipelineDesc;
use crate::pipeline::ROOT_DISPLAY;
use crate::pipeline::ROOT_LIGHTING;
use crate::pipeline::ROOT_MATERIAL;
use crate::pipeline::ROOT_MATERIAL_TEXTURES;
use crate::pipeline::ROOT_SCENE;
use crate::pipeline::ROOT_TRANSFORM;
use crate::pipeline::RootLayout;
use crate::pipeline::ShaderBytecode;
use crate::render_target::ColorTarget;
use crate::render_target::DEPTH_CLEAR;
use crate::render_target::DepthTarget;
use crate::shader_constants::LightingConstants;
use crate::shader_constants::SceneConstants;
use crate::shader_constants::TransformConstants;
use crate::texture_manager::DEFAULT_TEXTURE_COUNT;
use crate::texture_manager::TextureManager;
use crate::upload_batch::UploadBatch;
use glam::Mat4;
use std::sync::Arc;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    Uninitialized,
    /// Between frames.
    Ready,
    Recording,
    Updated,
    Rendered,
    Submitted,
    ShuttingDown,
}

impl FramePhase {
    pub fn name(self) -> &'static str {
        match self {
            FramePhase::Uninitialized => "uninitialized",
            FramePhase::Ready => "ready",
            FramePhase::Recording => "recording",
            FramePhase::Updated => "updated",
            FramePhase::Rendered => "rendered",
            FramePhase::Submitted => "submitted",
            FramePhase::ShuttingDown => "shutting down",
        }
    }
}

/// Owns the device objects and the loaded model, and drives one frame at a time.
///
/// Fields drop top to bottom, so model resources go before the frame resources, targets,
/// pools and finally the device.
pub struct Engine<B: Backend> {
    meshes: Vec<MeshGpu<B>>,
    material_tables: Vec<MaterialSrvTable<B>>,
    materials: Vec<MaterialGpu<B>>,
    default_material_table: MaterialSrvTable<B>,
    default_material: MaterialGpu<B>,
    textures: TextureManager<B>,
    frames: FrameRing<B>,
    command_list: B::CommandList,
    upload: UploadBatch<B>,
    pipeline: B::PipelineState,
    root_signature: B::RootSignature,
    depth_target: DepthTarget<B>,
    color_targets: Vec<ColorTarget<B>>,
    swap_chain: B::SwapChain,
    queue: CommandQueue<B>,
    cbv_srv_pool: Arc<DescriptorPool<B>>,
    staging_srv_pool: Arc<DescriptorPool<B>>,
    rtv_pool: Arc<DescriptorPool<B>>,
    dsv_pool: Arc<DescriptorPool<B>>,
    device: B::Device,

    config: EngineConfig,
    camera: Camera,
    world: Mat4,
    lighting: LightingConstants,
    viewport: Viewport,
    frame_index: u32,
    phase: FramePhase,
    elapsed: f32,
    display: DisplayInfo,
    /// Slots whose display constants must be rewritten at their next `begin_frame`.
    display_dirty: Vec<bool>,
    monitor: Option<MonitorId>,
}

impl<B: Backend> Engine<B> {
    /// Loads the shaders named in `config` and builds every device object.
    pub fn initialize(
        device: B::Device,
        surface: &B::Surface,
        width: u32,
        height: u32,
        config: EngineConfig,
    ) -> EngineResult<Self> {
        let vertex_shader = ShaderBytecode::load(&config.vertex_shader)?;
        let pixel_shader = ShaderBytecode::load(&config.pixel_shader)?;
        Self::initialize_with_shaders(device, surface, width, height, config, vertex_shader, pixel_shader)
    }

    pub fn initialize_with_shaders(
        device: B::Device,
        surface: &B::Surface,
        width: u32,
        height: u32,
        config: EngineConfig,
        vertex_shader: ShaderBytecode,
        pixel_shader: ShaderBytecode,
    ) -> EngineResult<Self> {
        if config.frame_count < 2 {
            return Err(GpuError::InvalidArgument("at least two frames are required").into());
        }
        if config.max_objects_per_frame == 0 {
            return Err(GpuError::InvalidArgument("each frame needs at least one transform").into());
        }
        if width == 0 || height == 0 {
            return Err(GpuError::InvalidArgument("window has no area").into());
        }

        let mut queue = CommandQueue::init(&device)?;
        let swap_chain =
            device.create_swap_chain(queue.raw(), surface, width, height, config.frame_count)?;

        let cbv_srv_pool =
            DescriptorPool::create(&device, DescriptorKind::CbvSrvUav, config.cbv_srv_uav_descriptors, true)?;
        let staging_srv_pool =
            DescriptorPool::create(&device, DescriptorKind::CbvSrvUav, config.staging_srv_descriptors, false)?;
        let rtv_pool = DescriptorPool::create(&device, DescriptorKind::RenderTarget, config.rtv_descriptors, false)?;
        let dsv_pool = DescriptorPool::create(&device, DescriptorKind::DepthStencil, config.dsv_descriptors, false)?;

        let color_targets = (0..swap_chain.buffer_count())
            .map(|buffer| ColorTarget::from_swap_chain(&device, &rtv_pool, &swap_chain, buffer))
            .collect::<EngineResult<Vec<_>>>()?;
        let depth_target = DepthTarget::create(&device, &dsv_pool, width, height)?;

        let display_info = swap_chain.display_info().unwrap_or_else(|e| {
            warn!("Falling back to SDR display values: {:?}", e);
            DisplayInfo::sdr()
        });
        let monitor = swap_chain.current_monitor();
        info!(
            hdr = display_info.hdr_enabled,
            max_luminance = display_info.max_luminance,
            paper_white = display_info.paper_white_nits(),
            "Display detected"
        );

        let frames = FrameRing::init(
            &device,
            &cbv_srv_pool,
            config.frame_count,
            config.max_objects_per_frame,
            display_info.constants(),
        )?;
        let frame_index = swap_chain.current_back_buffer_index();
        let first_allocator = frames
            .get(frame_index as usize)
            .ok_or(GpuError::InvalidArgument("back buffer index exceeds the frame count"))?
            .allocator();
        let mut command_list = device.create_command_list(first_allocator)?;

        let root_signature = device.create_root_signature(&RootLayout::pbr())?;
        let pipeline = device.create_pipeline_state(
            &root_signature,
            &PipelineDesc {
                vertex_shader,
                pixel_shader,
                input_layout: StandardVertex::LAYOUT,
                render_target_format: swap_chain.format(),
                depth_format: DepthTarget::<B>::FORMAT,
                cull_back_faces: true,
            },
        )?;

        let mut upload = UploadBatch::create(&device)?;
        upload.begin(&queue, &mut command_list)?;
        let mut textures = match TextureManager::init(&device, &mut command_list, &staging_srv_pool) {
            Ok(textures) => textures,
            Err(e) => {
                upload.abort(&mut command_list)?;
                return Err(e);
            }
        };
        upload.end(&mut queue, &mut command_list)?.wait(&queue)?;
        textures.discard_uploads();

        let default_material = MaterialGpu::init(&device, &cbv_srv_pool, &MaterialAsset::default(), &[])?;
        let default_material_table = MaterialSrvTable::init(&device, &cbv_srv_pool, &default_material, &textures)?;

        let mut camera = Camera::default();
        camera.set_viewport(width, height);
        info!(
            "Engine initialized: {}x{}, {} frames in flight, back buffer {}",
            width, height, config.frame_count, frame_index
        );
        Ok(Self {
            meshes: Vec::new(),
            material_tables: Vec::new(),
            materials: Vec::new(),
            default_material_table,
            default_material,
            textures,
            display_dirty: vec![false; frames.len()],
            frames,
            command_list,
            upload,
            pipeline,
            root_signature,
            depth_target,
            color_targets,
            swap_chain,
            queue,
            cbv_srv_pool,
            staging_srv_pool,
            rtv_pool,
            dsv_pool,
            device,
            config,
            camera,
            world: Mat4::IDENTITY,
            lighting: LightingConstants::default(),
            viewport: Viewport { width, height },
            frame_index,
            phase: FramePhase::Ready,
            elapsed: 0.0,
            display: display_info,
            monitor,
        })
    }

    fn expect_phase(&self, call: &'static str, allowed: &[FramePhase]) -> EngineResult<()> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(GpuError::FrameOutOfOrder {
                call,
                phase: self.phase.name(),
            }
            .into())
        }
    }

    /// Uploads the model's textures and geometry in one batch and builds its materials.
    /// A previously loaded model is released first.
    pub fn load_model(&mut self, model: &ModelAsset) -> EngineResult<()> {
        self.expect_phase("load_model", &[FramePhase::Ready])?;
        if !model.is_valid() {
            return Err(GpuError::InvalidArgument("model has no meshes").into());
        }
        let has_model = !self.meshes.is_empty()
            || !self.materials.is_empty()
            || self.textures.len() > DEFAULT_TEXTURE_COUNT;
        if has_model {
            self.queue.flush()?;
            self.meshes.clear();
            self.material_tables.clear();
            self.materials.clear();
            self.textures.release_model_textures();
        }

        let loaded = self.upload_model(model);
        if loaded.is_err() {
            // Textures of an aborted batch were never submitted.
            if self.queue.is_idle() || self.queue.flush().is_ok() {
                self.textures.release_model_textures();
            } else {
                warn!("Keeping {} textures of the failed load until shutdown", self.textures.len());
            }
        }
        loaded
    }

    fn upload_model(&mut self, model: &ModelAsset) -> EngineResult<()> {
        self.upload.begin(&self.queue, &mut self.command_list)?;
        let recorded = (|| {
            let handles = self
                .textures
                .build_from_model(&self.device, &mut self.command_list, model)?;
            let meshes = model
                .meshes
                .iter()
                .map(|mesh| MeshGpu::create(&self.device, &mut self.command_list, mesh))
                .collect::<EngineResult<Vec<_>>>()?;
            Ok::<_, crate::error::EngineReport>((handles, meshes))
        })();
        let (handles, mut meshes) = match recorded {
            Ok(recorded) => recorded,
            Err(e) => {
                self.upload.abort(&mut self.command_list)?;
                return Err(e);
            }
        };
        let token = self.upload.end(&mut self.queue, &mut self.command_list)?;
        token.wait(&self.queue)?;
        for mesh in &mut meshes {
            mesh.discard_uploads();
        }
        self.textures.discard_uploads();

        let mut materials = Vec::with_capacity(model.materials.len());
        let mut tables = Vec::with_capacity(model.materials.len());
        for asset in &model.materials {
            let material = MaterialGpu::init(&self.device, &self.cbv_srv_pool, asset, &handles)?;
            tables.push(MaterialSrvTable::init(
                &self.device,
                &self.cbv_srv_pool,
                &material,
                &self.textures,
            )?);
            materials.push(material);
        }
        let orphans = meshes
            .iter()
            .filter(|mesh| mesh.material_id() as usize >= materials.len())
            .count();
        if orphans > 0 {
            warn!("{} meshes reference missing materials and use the default", orphans);
        }

        info!(
            "Loaded {:?}: {} meshes, {} materials, {} images",
            model.name,
            meshes.len(),
            materials.len(),
            model.images.len()
        );
        self.meshes = meshes;
        self.materials = materials;
        self.material_tables = tables;
        Ok(())
    }

    /// Waits for the current slot, resets it and opens the back buffer for rendering.
    pub fn begin_frame(&mut self) -> EngineResult<()> {
        self.expect_phase("begin_frame", &[FramePhase::Ready])?;
        let slot = self.frame_index as usize;
        let frame = self.frames.begin(
            slot,
            &self.queue,
            &mut self.command_list,
            Some(&self.pipeline),
            self.config.fence_timeout,
        )?;
        if std::mem::take(&mut self.display_dirty[slot]) {
            frame.display_mut().update(self.display.constants());
            debug!("Frame slot {} picked up new display constants", slot);
        }

        let target = &self.color_targets[slot];
        let (Some(back_buffer), Some(rtv), Some(dsv)) = (target.resource(), target.rtv(), self.depth_target.dsv())
        else {
            return Err(GpuError::InvalidArgument("render targets were released").into());
        };
        let list = &mut self.command_list;
        list.transition(back_buffer, ResourceState::Present, ResourceState::RenderTarget);
        list.set_render_targets(rtv, Some(dsv));
        list.clear_render_target(rtv, self.config.clear_color);
        list.clear_depth(dsv, DEPTH_CLEAR);
        list.set_viewport(&self.viewport);
        self.phase = FramePhase::Recording;
        Ok(())
    }

    /// Writes camera, time, transform and lighting constants into the current slot.
    pub fn update(&mut self, delta_seconds: f32) -> EngineResult<()> {
        self.expect_phase("update", &[FramePhase::Recording])?;
        self.elapsed += delta_seconds;
        let frame = self
            .frames
            .get_mut(self.frame_index as usize)
            .ok_or(GpuError::InvalidArgument("frame index exceeds the frame count"))?;
        frame.scene_mut().update(SceneConstants {
            view: self.camera.view(),
            projection: self.camera.projection(),
            camera_position: self.camera.position,
            time: self.elapsed,
        });
        if let Some(transform) = frame.transforms_mut().first_mut() {
            transform.update(TransformConstants::from_world(self.world));
        }
        frame.lighting_mut().update(self.lighting);
        self.phase = FramePhase::Updated;
        Ok(())
    }

    /// Records one indexed draw per mesh.
    pub fn render(&mut self) -> EngineResult<()> {
        self.expect_phase("render", &[FramePhase::Recording, FramePhase::Updated])?;
        let frame = self
            .frames
            .get(self.frame_index as usize)
            .ok_or(GpuError::InvalidArgument("frame index exceeds the frame count"))?;
        let transform = frame
            .transforms()
            .first()
            .ok_or(GpuError::InvalidArgument("frame has no transform buffer"))?;

        let list = &mut self.command_list;
        list.set_root_signature(&self.root_signature);
        list.set_pipeline_state(&self.pipeline);
        list.set_root_constant_buffer(ROOT_SCENE, frame.scene().gpu_address());
        list.set_root_constant_buffer(ROOT_TRANSFORM, transform.gpu_address());
        list.set_root_constant_buffer(ROOT_LIGHTING, frame.lighting().gpu_address());
        list.set_root_constant_buffer(ROOT_DISPLAY, frame.display().gpu_address());
        list.set_descriptor_heaps(&[self.cbv_srv_pool.heap()]);

        for mesh in &self.meshes {
            let id = mesh.material_id() as usize;
            let (material, table) = match (self.materials.get(id), self.material_tables.get(id)) {
                (Some(material), Some(table)) => (material, table),
                _ => (&self.default_material, &self.default_material_table),
            };
            list.set_root_constant_buffer(ROOT_MATERIAL, material.constants_address());
            if let Some(base) = table.gpu_base() {
                list.set_root_descriptor_table(ROOT_MATERIAL_TEXTURES, base);
            }
            list.set_vertex_buffer(&mesh.vertex_buffer_view());
            list.set_index_buffer(&mesh.index_buffer_view());
            list.draw_indexed(mesh.index_count());
        }
        self.phase = FramePhase::Rendered;
        Ok(())
    }

    /// Returns the back buffer to the presentable state, submits and stamps the slot's fence.
    pub fn end_frame(&mut self) -> EngineResult<()> {
        self.expect_phase(
            "end_frame",
            &[FramePhase::Recording, FramePhase::Updated, FramePhase::Rendered],
        )?;
        let slot = self.frame_index as usize;
        let Some(back_buffer) = self.color_targets[slot].resource() else {
            return Err(GpuError::InvalidArgument("render targets were released").into());
        };
        self.command_list
            .transition(back_buffer, ResourceState::RenderTarget, ResourceState::Present);
        self.command_list.close()?;
        self.queue.execute(&[&self.command_list])?;
        let fence_value = self.queue.signal()?;
        if let Some(frame) = self.frames.get_mut(slot) {
            frame.end_frame(fence_value);
        }
        trace!("Frame slot {} submitted behind fence {}", slot, fence_value);
        self.phase = FramePhase::Submitted;
        Ok(())
    }

    /// Presents and reads the next back-buffer index back from the swap chain.
    pub fn present(&mut self) -> EngineResult<()> {
        self.expect_phase("present", &[FramePhase::Submitted])?;
        self.swap_chain.present(self.config.sync_interval)?;
        self.frame_index = self.swap_chain.current_back_buffer_index();
        self.phase = FramePhase::Ready;
        Ok(())
    }

    /// One full begin, update, render, end, present cycle.
    pub fn frame(&mut self, delta_seconds: f32) -> EngineResult<()> {
        self.begin_frame()?;
        self.update(delta_seconds)?;
        self.render()?;
        self.end_frame()?;
        self.present()
    }

    /// Drains the GPU and releases the model. Everything else is released when the engine drops.
    pub fn shutdown(mut self) -> EngineResult<()> {
        self.release()
    }

    fn release(&mut self) -> EngineResult<()> {
        if self.phase == FramePhase::Uninitialized {
            return Ok(());
        }
        self.phase = FramePhase::ShuttingDown;
        self.upload.abort(&mut self.command_list)?;
        if !self.queue.is_idle() {
            self.queue.flush()?;
        }
        self.meshes.clear();
        self.material_tables.clear();
        self.materials.clear();
        self.phase = FramePhase::Uninitialized;
        info!("Engine shut down after fence {}", self.queue.last_signaled());
        Ok(())
    }

    fn refresh_display(&mut self) {
        match self.swap_chain.display_info() {
            Ok(display_info) => {
                if display_info != self.display {
                    info!(
                        hdr = display_info.hdr_enabled,
                        max_luminance = display_info.max_luminance,
                        "Display changed"
                    );
                }
                self.display = display_info;
            }
            Err(e) => warn!("Keeping previous display values: {:?}", e),
        }
        self.display_dirty.iter_mut().for_each(|dirty| *dirty = true);
    }

    pub fn set_world(&mut self, world: Mat4) {
        self.world = world;
    }

    pub fn set_lighting(&mut self, lighting: LightingConstants) {
        self.lighting = lighting;
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    pub fn frame_index(&self) -> u32 {
        self.frame_index
    }

    pub fn frame_fence_values(&self) -> Vec<u64> {
        self.frames.fence_values()
    }

    pub fn frames(&self) -> &FrameRing<B> {
        &self.frames
    }

    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    pub fn display_info(&self) -> DisplayInfo {
        self.display
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    pub fn material_count(&self) -> usize {
        self.materials.len()
    }

    pub fn material(&self, id: usize) -> Option<&MaterialGpu<B>> {
        self.materials.get(id)
    }

    pub fn material_table(&self, id: usize) -> Option<&MaterialSrvTable<B>> {
        self.material_tables.get(id)
    }

    pub fn textures(&self) -> &TextureManager<B> {
        &self.textures
    }

    pub fn queue(&self) -> &CommandQueue<B> {
        &self.queue
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    pub fn cbv_srv_pool(&self) -> &Arc<DescriptorPool<B>> {
        &self.cbv_srv_pool
    }

    pub fn staging_srv_pool(&self) -> &Arc<DescriptorPool<B>> {
        &self.staging_srv_pool
    }

    pub fn rtv_pool(&self) -> &Arc<DescriptorPool<B>> {
        &self.rtv_pool
    }

    pub fn dsv_pool(&self) -> &Arc<DescriptorPool<B>> {
        &self.dsv_pool
    }
}

impl<B: Backend> WindowEventListener for Engine<B> {
    fn on_window_moved(&mut self) {
        let monitor = self.swap_chain.current_monitor();
        if monitor != self.monitor {
            debug!("Window moved from {:?} to {:?}", self.monitor, monitor);
            self.monitor = monitor;
            self.refresh_display();
        }
    }

    fn on_display_changed(&mut self) {
        self.monitor = self.swap_chain.current_monitor();
        self.refresh_display();
    }
}

impl<B: Backend> Drop for Engine<B> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            error!("Engine shutdown failed: {:?}", e);
        }
    }
}
