use crate::backend::Backend;
use crate::backend::CpuDescriptorHandle;
use crate::descriptor_pool::DescriptorPool;
use crate::error::EngineResult;
use crate::model_asset::ImageAsset;
use crate::model_asset::ModelAsset;
use crate::texture::ShaderResourceTexture;
use crate::texture::TexturePixels;
use std::sync::Arc;
use tracing::debug;
use tracing::info;
use tracing::warn;

/// Index into the [`TextureManager`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub u32);

impl TextureHandle {
    pub const INVALID: TextureHandle = TextureHandle(u32::MAX);
    pub const WHITE: TextureHandle = TextureHandle(0);
    pub const FLAT_NORMAL: TextureHandle = TextureHandle(1);
    pub const RMA_DEFAULT: TextureHandle = TextureHandle(2);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

/// White, flat normal and RMA occupy the first arena slots.
pub const DEFAULT_TEXTURE_COUNT: usize = 3;

const DEFAULT_PIXELS: [[u8; 4]; DEFAULT_TEXTURE_COUNT] = [
    [255, 255, 255, 255],
    // Tangent-space +Z.
    [128, 128, 255, 255],
    // Occlusion 1, roughness 0, metallic 1.
    [255, 0, 255, 255],
];

/// Owns every texture, including one copy of each default. Materials refer to entries by handle.
pub struct TextureManager<B: Backend> {
    pool: Arc<DescriptorPool<B>>,
    textures: Vec<ShaderResourceTexture<B>>,
}

impl<B: Backend> TextureManager<B> {
    /// Records the uploads of the three default textures into `list`.
    pub fn init(
        device: &B::Device,
        list: &mut B::CommandList,
        pool: &Arc<DescriptorPool<B>>,
    ) -> EngineResult<Self> {
        let defaults: [ShaderResourceTexture<B>; DEFAULT_TEXTURE_COUNT] = array_init::try_array_init(|i| {
            ShaderResourceTexture::create(device, list, pool, &TexturePixels::solid(DEFAULT_PIXELS[i]), false)
        })?;
        Ok(Self {
            pool: pool.clone(),
            textures: Vec::from(defaults),
        })
    }

    pub fn create_solid(
        &mut self,
        device: &B::Device,
        list: &mut B::CommandList,
        rgba: [u8; 4],
    ) -> EngineResult<TextureHandle> {
        let texture = ShaderResourceTexture::create(device, list, &self.pool, &TexturePixels::solid(rgba), false)?;
        Ok(self.push(texture))
    }

    pub fn create_from_image(
        &mut self,
        device: &B::Device,
        list: &mut B::CommandList,
        image: &ImageAsset,
    ) -> EngineResult<TextureHandle> {
        let pixels = TexturePixels::decode(image)?;
        let texture = ShaderResourceTexture::create(device, list, &self.pool, &pixels, image.srgb)?;
        Ok(self.push(texture))
    }

    /// Uploads each model image once. The result maps image index to handle; images without
    /// bytes map to [`TextureHandle::INVALID`] so that materials fall back to a default.
    pub fn build_from_model(
        &mut self,
        device: &B::Device,
        list: &mut B::CommandList,
        model: &ModelAsset,
    ) -> EngineResult<Vec<TextureHandle>> {
        let mut handles = Vec::with_capacity(model.images.len());
        for (index, image) in model.images.iter().enumerate() {
            if !image.is_valid() {
                warn!("Image {} of {:?} is empty, materials will use defaults", index, model.name);
                handles.push(TextureHandle::INVALID);
                continue;
            }
            handles.push(self.create_from_image(device, list, image)?);
        }
        info!("Built {} textures for {:?}", handles.len(), model.name);
        Ok(handles)
    }

    fn push(&mut self, texture: ShaderResourceTexture<B>) -> TextureHandle {
        self.textures.push(texture);
        TextureHandle(self.textures.len() as u32 - 1)
    }

    pub fn get(&self, handle: TextureHandle) -> Option<&ShaderResourceTexture<B>> {
        self.textures.get(handle.0 as usize)
    }

    pub fn srv_cpu(&self, handle: TextureHandle) -> Option<CpuDescriptorHandle> {
        self.get(handle)?.srv_cpu()
    }

    pub fn white_default(&self) -> TextureHandle {
        TextureHandle::WHITE
    }

    pub fn normal_flat(&self) -> TextureHandle {
        TextureHandle::FLAT_NORMAL
    }

    pub fn rma_default(&self) -> TextureHandle {
        TextureHandle::RMA_DEFAULT
    }

    /// Drops every texture except the defaults. The GPU must be done with them.
    pub fn release_model_textures(&mut self) {
        if self.textures.len() > DEFAULT_TEXTURE_COUNT {
            debug!("Releasing {} model textures", self.textures.len() - DEFAULT_TEXTURE_COUNT);
            self.textures.truncate(DEFAULT_TEXTURE_COUNT);
        }
    }

    /// Drops every staging buffer. Only valid once the uploads have executed.
    pub fn discard_uploads(&mut self) {
        for texture in &mut self.textures {
            texture.discard_upload();
        }
    }

    pub fn has_pending_uploads(&self) -> bool {
        self.textures.iter().any(ShaderResourceTexture::has_pending_upload)
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CommandAllocator as _;
    use crate::backend::CommandList as _;
    use crate::backend::DescriptorKind;
    use crate::backend::RenderDevice as _;
    use crate::backend::SubmissionQueue as _;
    use crate::backend::ViewDesc;
    use crate::backend::headless::Headless;
    use crate::backend::headless::SimulatedGpu;

    #[test]
    fn defaults_are_uploaded_once() -> EngineResult<()> {
        let gpu = SimulatedGpu::new();
        let device = gpu.device();
        let pool = DescriptorPool::<Headless>::create(&device, DescriptorKind::CbvSrvUav, 8, false)?;
        let queue = device.create_command_queue()?;
        let allocator = device.create_command_allocator()?;
        let mut list = device.create_command_list(&allocator)?;
        allocator.reset()?;
        list.reset(&allocator, None)?;
        let mut manager = TextureManager::init(&device, &mut list, &pool)?;
        list.close()?;
        queue.execute(&[&list])?;
        queue.signal(1)?;
        queue.wait_for(1, None)?;
        manager.discard_uploads();

        assert_eq!(manager.len(), 3);
        assert_eq!(pool.free_count(), 5);
        let flat = manager.get(manager.normal_flat()).unwrap().resource().unwrap();
        assert_eq!(&flat.contents()[..4], &[128, 128, 255, 255]);
        let rma = manager.get(manager.rma_default()).unwrap().resource().unwrap();
        assert_eq!(&rma.contents()[..4], &[255, 0, 255, 255]);
        assert!(matches!(
            gpu.descriptor(manager.srv_cpu(TextureHandle::WHITE).unwrap()).unwrap().view,
            ViewDesc::ShaderResource { .. }
        ));
        assert!(manager.get(TextureHandle::INVALID).is_none());
        assert!(!manager.has_pending_uploads());
        Ok(())
    }

    #[test]
    fn empty_images_map_to_invalid() -> EngineResult<()> {
        let gpu = SimulatedGpu::new();
        let device = gpu.device();
        let pool = DescriptorPool::<Headless>::create(&device, DescriptorKind::CbvSrvUav, 8, false)?;
        let allocator = device.create_command_allocator()?;
        let mut list = device.create_command_list(&allocator)?;
        list.reset(&allocator, None)?;
        let mut manager = TextureManager::init(&device, &mut list, &pool)?;
        let model = ModelAsset {
            images: vec![ImageAsset {
                bytes: Vec::new(),
                format: "png".into(),
                srgb: true,
            }],
            ..ModelAsset::uv_sphere(1.0, 4, 4)
        };
        let handles = manager.build_from_model(&device, &mut list, &model)?;
        assert_eq!(handles, vec![TextureHandle::INVALID]);
        assert_eq!(manager.len(), 3);
        list.close()?;
        Ok(())
    }

    #[test]
    fn releasing_model_textures_keeps_the_defaults() -> EngineResult<()> {
        let gpu = SimulatedGpu::new();
        let device = gpu.device();
        let pool = DescriptorPool::<Headless>::create(&device, DescriptorKind::CbvSrvUav, 8, false)?;
        let allocator = device.create_command_allocator()?;
        let mut list = device.create_command_list(&allocator)?;
        list.reset(&allocator, None)?;
        let mut manager = TextureManager::init(&device, &mut list, &pool)?;
        let red = manager.create_solid(&device, &mut list, [255, 0, 0, 255])?;
        let blue = manager.create_solid(&device, &mut list, [0, 0, 255, 255])?;
        assert_eq!((red, blue), (TextureHandle(3), TextureHandle(4)));
        assert_eq!(pool.free_count(), 3);

        // Never executed, so dropping the staging copies is fine.
        list.close()?;
        manager.release_model_textures();
        assert_eq!(manager.len(), 3);
        assert_eq!(pool.free_count(), 5);
        assert!(manager.get(red).is_none());
        assert!(manager.get(TextureHandle::RMA_DEFAULT).is_some());

        manager.release_model_textures();
        assert_eq!(manager.len(), 3);
        Ok(())
    }

    #[test]
    fn running_out_of_srv_slots_fails_init() {
        let gpu = SimulatedGpu::new();
        let device = gpu.device();
        let pool = DescriptorPool::<Headless>::create(&device, DescriptorKind::CbvSrvUav, 2, false).unwrap();
        let allocator = device.create_command_allocator().unwrap();
        let mut list = device.create_command_list(&allocator).unwrap();
        list.reset(&allocator, None).unwrap();
        assert!(TextureManager::init(&device, &mut list, &pool).is_err());
        assert_eq!(pool.free_count(), 2);
    }
}
