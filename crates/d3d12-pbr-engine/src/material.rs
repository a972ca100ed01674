use crate::backend::Backend;
use crate::backend::DescriptorKind;
use crate::backend::GpuDescriptorHandle;
use crate::backend::RenderDevice;
use crate::constant_buffer::ConstantBlock;
use crate::descriptor_pool::DescriptorPool;
use crate::error::EngineResult;
use crate::error::GpuError;
use crate::model_asset::ImageIndex;
use crate::model_asset::MaterialAsset;
use crate::shader_constants::MaterialConstants;
use crate::texture_manager::TextureHandle;
use crate::texture_manager::TextureManager;
use std::sync::Arc;
use tracing::warn;

pub const TEXTURES_PER_MATERIAL: u32 = 5;

/// Slot order inside a material's SRV table, `t0..t4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureUsage {
    BaseColor,
    MetallicRoughness,
    Normal,
    Emissive,
    Occlusion,
}

impl TextureUsage {
    pub const ALL: [TextureUsage; TEXTURES_PER_MATERIAL as usize] = [
        TextureUsage::BaseColor,
        TextureUsage::MetallicRoughness,
        TextureUsage::Normal,
        TextureUsage::Emissive,
        TextureUsage::Occlusion,
    ];

    pub fn slot(self) -> u32 {
        self as u32
    }

    /// The default bound when a material has no texture for this usage.
    ///
    /// Metallic-roughness falls back to white rather than the RMA default so that the scalar
    /// factors pass through unchanged.
    pub fn fallback(self) -> TextureHandle {
        match self {
            TextureUsage::Normal => TextureHandle::FLAT_NORMAL,
            _ => TextureHandle::WHITE,
        }
    }
}

/// Material factors in a constant buffer plus weak texture references.
pub struct MaterialGpu<B: Backend> {
    constants: ConstantBlock<B, MaterialConstants>,
    textures: [TextureHandle; TEXTURES_PER_MATERIAL as usize],
}

impl<B: Backend> MaterialGpu<B> {
    /// `image_handles` maps the asset's image indices to uploaded textures.
    pub fn init(
        device: &B::Device,
        pool: &Arc<DescriptorPool<B>>,
        asset: &MaterialAsset,
        image_handles: &[TextureHandle],
    ) -> EngineResult<Self> {
        let constants = MaterialConstants {
            base_color: asset.base_color,
            emissive: asset.emissive,
            metallic: asset.metallic,
            roughness: asset.roughness,
            occlusion: asset.occlusion,
            ..Default::default()
        };
        let lookup = |image: Option<ImageIndex>| match image {
            Some(index) => image_handles.get(index).copied().unwrap_or_else(|| {
                warn!("Material {:?} references missing image {}", asset.name, index);
                TextureHandle::INVALID
            }),
            None => TextureHandle::INVALID,
        };
        Ok(Self {
            constants: ConstantBlock::init(device, pool, constants)?,
            textures: [
                lookup(asset.base_color_texture),
                lookup(asset.metallic_roughness_texture),
                lookup(asset.normal_texture),
                lookup(asset.emissive_texture),
                lookup(asset.occlusion_texture),
            ],
        })
    }

    /// The material's own handle for `usage` if it has one, otherwise that usage's default.
    pub fn resolve(&self, usage: TextureUsage) -> TextureHandle {
        let handle = self.textures[usage.slot() as usize];
        if handle.is_valid() {
            handle
        } else {
            usage.fallback()
        }
    }

    pub fn texture(&self, usage: TextureUsage) -> Option<TextureHandle> {
        Some(self.textures[usage.slot() as usize]).filter(|handle| handle.is_valid())
    }

    pub fn constants(&self) -> &MaterialConstants {
        self.constants.value()
    }

    pub fn constants_address(&self) -> u64 {
        self.constants.gpu_address()
    }
}

/// Five consecutive shader-visible SRVs, one per [`TextureUsage`], bound as a single table.
pub struct MaterialSrvTable<B: Backend> {
    pool: Option<Arc<DescriptorPool<B>>>,
    base: Option<u32>,
}

impl<B: Backend> MaterialSrvTable<B> {
    pub fn init(
        device: &B::Device,
        pool: &Arc<DescriptorPool<B>>,
        material: &MaterialGpu<B>,
        textures: &TextureManager<B>,
    ) -> EngineResult<Self> {
        if !pool.is_shader_visible() {
            return Err(GpuError::InvalidArgument("material tables need a shader-visible pool").into());
        }
        let base = pool.linear_allocate_range(TEXTURES_PER_MATERIAL)?;
        let table = Self {
            pool: Some(pool.clone()),
            base: Some(base),
        };
        for usage in TextureUsage::ALL {
            let handle = material.resolve(usage);
            let Some(source) = textures.srv_cpu(handle) else {
                return Err(GpuError::InvalidArgument("material resolved to a texture that does not exist").into());
            };
            device.copy_descriptor(
                pool.cpu_handle(base + usage.slot()),
                source,
                DescriptorKind::CbvSrvUav,
            );
        }
        Ok(table)
    }

    pub fn base_index(&self) -> Option<u32> {
        self.base
    }

    pub fn gpu_base(&self) -> Option<GpuDescriptorHandle> {
        self.pool.as_ref()?.gpu_handle(self.base?)
    }

    pub fn term(&mut self) {
        if let (Some(pool), Some(base)) = (self.pool.take(), self.base.take()) {
            if let Err(error) = pool.free_range(base, TEXTURES_PER_MATERIAL) {
                warn!("Material SRV range at {} was already released: {}", base, error);
            }
        }
    }
}

impl<B: Backend> Drop for MaterialSrvTable<B> {
    fn drop(&mut self) {
        self.term();
    }
}
