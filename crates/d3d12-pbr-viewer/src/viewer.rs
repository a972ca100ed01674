use crate::command_line::ViewerCommandLine;
use crate::window;
use d3d12_pbr_engine::Engine;
use d3d12_pbr_engine::EngineConfig;
use d3d12_pbr_engine::asset_path::AssetPath;
use d3d12_pbr_engine::backend::d3d12::D3d12;
use d3d12_pbr_engine::backend::d3d12::D3d12Device;
use d3d12_pbr_engine::backend::d3d12::DeviceOptions;
use d3d12_pbr_engine::backend::d3d12::compile_shader;
use d3d12_pbr_engine::display::WindowEventListener;
use d3d12_pbr_engine::model_asset::ImageAsset;
use d3d12_pbr_engine::model_asset::ModelAsset;
use d3d12_pbr_engine::pipeline::ShaderBytecode;
use eyre::WrapErr;
use glam::Mat4;
use std::path::Path;
use std::time::Instant;
use tracing::error;
use tracing::info;
use tracing::warn;
use windows::Win32::Foundation::HWND;

const ORBIT_RADIANS_PER_SECOND: f32 = 0.4;

pub struct Viewer {
    command_line: ViewerCommandLine,
    assets: AssetPath,
    engine: Option<Engine<D3d12>>,
    last_frame: Instant,
    frames_rendered: u64,
}

impl Viewer {
    pub fn new(command_line: ViewerCommandLine) -> eyre::Result<Self> {
        let mut assets = AssetPath::from_current_exe()?;
        assets.add_search_path(env!("CARGO_MANIFEST_DIR"));
        Ok(Self {
            command_line,
            assets,
            engine: None,
            last_frame: Instant::now(),
            frames_rendered: 0,
        })
    }

    pub fn title(&self) -> String {
        let mut title = String::from("D3D12 PBR Viewer");
        if self.command_line.use_warp_device {
            title.push_str(" (WARP)");
        }
        title
    }

    pub fn bind_to_window(&mut self, hwnd: HWND) -> eyre::Result<()> {
        let device = D3d12Device::create(DeviceOptions {
            use_warp_device: self.command_line.use_warp_device,
            ..DeviceOptions::from_build()
        })?;
        let vertex_shader = self.shader(&self.command_line.vertex_shader, "VSMain", "vs_5_0")?;
        let pixel_shader = self.shader(&self.command_line.pixel_shader, "PSMain", "ps_5_0")?;
        let config = EngineConfig::default().with_shaders(&vertex_shader.path, &pixel_shader.path);

        let mut engine = Engine::<D3d12>::initialize_with_shaders(
            device,
            &hwnd,
            self.command_line.width,
            self.command_line.height,
            config,
            vertex_shader,
            pixel_shader,
        )?;
        let model = self.model()?;
        if let Err(e) = engine.load_model(&model) {
            engine.device().drain_debug_messages();
            return Err(e.into());
        }
        engine.camera_mut().position = glam::Vec3::new(0.0, 1.0, -4.0);
        self.engine = Some(engine);
        self.last_frame = Instant::now();
        Ok(())
    }

    /// Precompiled bytecode when it can be found, otherwise `shaders/pbr.hlsl` compiled now.
    fn shader(&self, compiled: &Path, entry_point: &str, target: &str) -> eyre::Result<ShaderBytecode> {
        if let Some(path) = self.assets.resolve(compiled) {
            return Ok(ShaderBytecode::load(path)?);
        }
        let source = self
            .assets
            .resolve("shaders/pbr.hlsl")
            .ok_or_else(|| eyre::eyre!("neither {} nor shaders/pbr.hlsl was found", compiled.display()))?;
        info!("Compiling {} from {}", entry_point, source.display());
        Ok(compile_shader(&source, entry_point, target)?)
    }

    fn model(&self) -> eyre::Result<ModelAsset> {
        let mut model = ModelAsset::uv_sphere(1.0, 48, 24);
        model.name = "sphere".into();
        if let Some(image) = &self.command_line.model {
            let path = self
                .assets
                .resolve(image)
                .ok_or_else(|| eyre::eyre!("{} was not found", image.display()))?;
            let bytes = std::fs::read(&path).wrap_err_with(|| format!("reading {}", path.display()))?;
            let format = path
                .extension()
                .and_then(|extension| extension.to_str())
                .unwrap_or_default()
                .to_ascii_lowercase();
            model.images.push(ImageAsset {
                bytes,
                format,
                srgb: true,
            });
            if let Some(material) = model.materials.first_mut() {
                material.base_color_texture = Some(0);
            }
        }
        Ok(model)
    }

    pub fn finished(&self) -> bool {
        self.command_line
            .frame_limit
            .is_some_and(|limit| self.frames_rendered >= limit)
    }

    pub fn render(&mut self) -> eyre::Result<()> {
        let Some(engine) = self.engine.as_mut() else {
            return Ok(());
        };
        let now = Instant::now();
        let delta = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;

        engine.camera_mut().orbit(delta * ORBIT_RADIANS_PER_SECOND);
        engine.set_world(Mat4::IDENTITY);
        if let Err(e) = engine.frame(delta) {
            engine.device().drain_debug_messages();
            return Err(e.into());
        }
        self.frames_rendered += 1;
        Ok(())
    }

    pub fn on_destroy(&mut self) {
        if let Some(engine) = self.engine.take() {
            info!("Rendered {} frames", self.frames_rendered);
            if let Err(e) = engine.shutdown() {
                error!("Shutdown failed: {:?}", e);
            }
        }
    }
}

impl WindowEventListener for Viewer {
    fn on_window_moved(&mut self) {
        if let Some(engine) = self.engine.as_mut() {
            engine.on_window_moved();
        }
    }

    fn on_display_changed(&mut self) {
        if let Some(engine) = self.engine.as_mut() {
            engine.on_display_changed();
        }
    }
}

pub fn run(command_line: ViewerCommandLine) -> eyre::Result<()> {
    let mut viewer = Box::new(Viewer::new(command_line)?);
    let (width, height) = (viewer.command_line.width, viewer.command_line.height);
    let hwnd = window::create_window(&viewer.title(), width, height, &mut *viewer as *mut Viewer)?;
    if let Err(e) = viewer.bind_to_window(hwnd) {
        window::close(hwnd);
        return Err(e);
    }
    window::show(hwnd);

    let mut consecutive_failures = 0;
    while window::pump_messages() {
        if viewer.finished() {
            window::close(hwnd);
            continue;
        }
        match viewer.render() {
            Ok(()) => consecutive_failures = 0,
            Err(e) => {
                warn!("Render error: {:?}", e);
                consecutive_failures += 1;
                if consecutive_failures >= 3 {
                    viewer.on_destroy();
                    window::close(hwnd);
                    return Err(e.wrap_err("rendering failed repeatedly"));
                }
            }
        }
    }

    viewer.on_destroy();
    Ok(())
}
