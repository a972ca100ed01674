use crate::backend::Format;
use crate::error::EngineResult;
use crate::error::GpuError;
use crate::material::TEXTURES_PER_MATERIAL;
use std::path::Path;
use std::path::PathBuf;
use tracing::debug;

pub const ROOT_SCENE: u32 = 0;
pub const ROOT_TRANSFORM: u32 = 1;
pub const ROOT_MATERIAL: u32 = 2;
pub const ROOT_LIGHTING: u32 = 3;
pub const ROOT_DISPLAY: u32 = 4;
pub const ROOT_MATERIAL_TEXTURES: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootParameter {
    /// Root CBV at `b{register}`.
    ConstantBuffer { register: u32 },
    /// Descriptor table of SRVs `t{base_register}..t{base_register + count}`.
    ShaderResourceTable { base_register: u32, count: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootLayout {
    pub parameters: Vec<RootParameter>,
    /// Linear-wrap static samplers at `s0..`.
    pub static_samplers: u32,
}

impl RootLayout {
    /// Scene, transform, material, lighting, display CBVs then the material texture table.
    pub fn pbr() -> Self {
        Self {
            parameters: vec![
                RootParameter::ConstantBuffer { register: 0 },
                RootParameter::ConstantBuffer { register: 1 },
                RootParameter::ConstantBuffer { register: 2 },
                RootParameter::ConstantBuffer { register: 3 },
                RootParameter::ConstantBuffer { register: 4 },
                RootParameter::ShaderResourceTable {
                    base_register: 0,
                    count: TEXTURES_PER_MATERIAL,
                },
            ],
            static_samplers: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttribute {
    pub semantic: &'static str,
    pub format: Format,
    pub offset: u32,
}

#[derive(Debug, Clone)]
pub struct ShaderBytecode {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
}

impl ShaderBytecode {
    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(GpuError::ShaderMissing(path.to_path_buf()).into());
        }
        let bytes = std::fs::read(path)?;
        if bytes.is_empty() {
            return Err(GpuError::PipelineRejected(format!("{} is empty", path.display())).into());
        }
        debug!("Loaded {} bytes of shader bytecode from {}", bytes.len(), path.display());
        Ok(Self {
            path: path.to_path_buf(),
            bytes,
        })
    }

    pub fn from_bytes(path: impl Into<PathBuf>, bytes: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            bytes,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineDesc {
    pub vertex_shader: ShaderBytecode,
    pub pixel_shader: ShaderBytecode,
    pub input_layout: &'static [VertexAttribute],
    pub render_target_format: Format,
    pub depth_format: Format,
    pub cull_back_faces: bool,
}
