use crate::backend::Backend;
use crate::backend::CommandList;
use crate::backend::CpuDescriptorHandle;
use crate::backend::Format;
use crate::backend::GpuResource;
use crate::backend::MemoryKind;
use crate::backend::RenderDevice;
use crate::backend::ResourceState;
use crate::backend::TextureDesc;
use crate::backend::TextureFootprint;
use crate::backend::TextureKind;
use crate::backend::ViewDesc;
use crate::descriptor_pool::DescriptorPool;
use crate::error::EngineResult;
use crate::error::GpuError;
use crate::model_asset::ImageAsset;
use image::ImageFormat;
use std::sync::Arc;
use tracing::debug;
use tracing::warn;

pub const TEXTURE_ROW_PITCH_ALIGNMENT: u32 = 256;
/// Largest 2D texture side a feature level 11 device accepts.
pub const MAX_TEXTURE_DIMENSION: u32 = 16384;

/// Tightly packed RGBA8 pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TexturePixels {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl TexturePixels {
    pub fn solid(rgba: [u8; 4]) -> Self {
        Self {
            width: 1,
            height: 1,
            rgba: rgba.to_vec(),
        }
    }

    /// Decodes PNG or JPEG bytes. The format tag wins; an empty tag is sniffed from the bytes.
    pub fn decode(image: &ImageAsset) -> EngineResult<Self> {
        if !image.is_valid() {
            return Err(GpuError::InvalidArgument("image has no bytes").into());
        }
        let format = match image.format.to_ascii_lowercase().as_str() {
            "png" => ImageFormat::Png,
            "jpg" | "jpeg" => ImageFormat::Jpeg,
            "" => match image::guess_format(&image.bytes) {
                Ok(format @ (ImageFormat::Png | ImageFormat::Jpeg)) => format,
                Ok(other) => {
                    return Err(GpuError::UnsupportedImageFormat(format!("{other:?}")).into());
                }
                Err(_) => return Err(GpuError::UnsupportedImageFormat("unknown".into()).into()),
            },
            other => return Err(GpuError::UnsupportedImageFormat(other.to_string()).into()),
        };
        let decoded = image::load_from_memory_with_format(&image.bytes, format)?.into_rgba8();
        Ok(Self {
            width: decoded.width(),
            height: decoded.height(),
            rgba: decoded.into_raw(),
        })
    }

    pub fn row_bytes(&self) -> u32 {
        self.width * 4
    }

    pub fn row_pitch(&self) -> u32 {
        self.row_bytes().next_multiple_of(TEXTURE_ROW_PITCH_ALIGNMENT)
    }
}

/// A sampled 2D texture and its SRV in a non-shader-visible pool.
pub struct ShaderResourceTexture<B: Backend> {
    resource: Option<B::Resource>,
    upload: Option<B::Resource>,
    pool: Option<Arc<DescriptorPool<B>>>,
    index: Option<u32>,
    format: Format,
    width: u32,
    height: u32,
}

impl<B: Backend> ShaderResourceTexture<B> {
    /// Records the upload of `pixels` into `list`. Call [`Self::discard_upload`] once the list
    /// has executed.
    pub fn create(
        device: &B::Device,
        list: &mut B::CommandList,
        pool: &Arc<DescriptorPool<B>>,
        pixels: &TexturePixels,
        srgb: bool,
    ) -> EngineResult<Self> {
        if pixels.width == 0 || pixels.height == 0 {
            return Err(GpuError::InvalidArgument("texture has no pixels").into());
        }
        if pixels.width > MAX_TEXTURE_DIMENSION || pixels.height > MAX_TEXTURE_DIMENSION {
            return Err(GpuError::InvalidArgument("texture is larger than 16384 texels per side").into());
        }
        let expected = (pixels.row_bytes() as usize)
            .checked_mul(pixels.height as usize)
            .ok_or(GpuError::InvalidArgument("texture is too large"))?;
        if pixels.rgba.len() != expected {
            return Err(GpuError::InvalidArgument("pixel data does not match the dimensions").into());
        }
        let format = if srgb {
            Format::Rgba8UnormSrgb
        } else {
            Format::Rgba8Unorm
        };
        let resource = device.create_texture_2d(
            &TextureDesc {
                width: pixels.width,
                height: pixels.height,
                format,
                kind: TextureKind::Sampled,
            },
            ResourceState::CopyDest,
            None,
        )?;

        let row_bytes = pixels.row_bytes() as usize;
        let row_pitch = pixels.row_pitch();
        let upload = device.create_buffer(
            MemoryKind::Upload,
            row_pitch as u64 * pixels.height as u64,
            ResourceState::GenericRead,
        )?;
        let staging = upload.map()?;
        for (row, source) in pixels.rgba.chunks_exact(row_bytes).enumerate() {
            unsafe {
                std::ptr::copy_nonoverlapping(
                    source.as_ptr(),
                    staging.as_ptr().add(row * row_pitch as usize),
                    row_bytes,
                );
            }
        }
        upload.unmap();

        list.copy_buffer_to_texture(
            &resource,
            &upload,
            &TextureFootprint {
                offset: 0,
                width: pixels.width,
                height: pixels.height,
                format,
                row_pitch,
            },
        );
        list.transition(&resource, ResourceState::CopyDest, ResourceState::PixelShaderResource);

        let index = pool.allocate()?;
        device.create_view(
            Some(&resource),
            &ViewDesc::ShaderResource { format },
            pool.cpu_handle(index),
        );
        debug!(
            "Recorded {}x{} {:?} texture upload into SRV slot {}",
            pixels.width, pixels.height, format, index
        );
        Ok(Self {
            resource: Some(resource),
            upload: Some(upload),
            pool: Some(pool.clone()),
            index: Some(index),
            format,
            width: pixels.width,
            height: pixels.height,
        })
    }

    pub fn discard_upload(&mut self) {
        self.upload = None;
    }

    pub fn has_pending_upload(&self) -> bool {
        self.upload.is_some()
    }

    pub fn srv_cpu(&self) -> Option<CpuDescriptorHandle> {
        Some(self.pool.as_ref()?.cpu_handle(self.index?))
    }

    pub fn srv_index(&self) -> Option<u32> {
        self.index
    }

    pub fn resource(&self) -> Option<&B::Resource> {
        self.resource.as_ref()
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn term(&mut self) {
        if let (Some(pool), Some(index)) = (self.pool.take(), self.index.take()) {
            if let Err(error) = pool.free(index) {
                warn!("Texture SRV slot {} was already released: {}", index, error);
            }
        }
        self.upload = None;
        self.resource = None;
    }
}

impl<B: Backend> Drop for ShaderResourceTexture<B> {
    fn drop(&mut self) {
        self.term();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CommandAllocator as _;
    use crate::backend::DescriptorKind;
    use crate::backend::SubmissionQueue as _;
    use crate::backend::headless::Headless;
    use crate::backend::headless::SimulatedGpu;
    use std::io::Cursor;

    fn encode(format: ImageFormat, pixels: &[[u8; 4]], width: u32) -> Vec<u8> {
        let height = pixels.len() as u32 / width;
        let image = image::RgbaImage::from_fn(width, height, |x, y| {
            image::Rgba(pixels[(y * width + x) as usize])
        });
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgba8(image)
            .write_to(&mut Cursor::new(&mut bytes), format)
            .unwrap();
        bytes
    }

    #[test]
    fn png_decodes_to_rgba() -> EngineResult<()> {
        let bytes = encode(ImageFormat::Png, &[[1, 2, 3, 255], [4, 5, 6, 128]], 2);
        for tag in ["png", "PNG", ""] {
            let pixels = TexturePixels::decode(&ImageAsset {
                bytes: bytes.clone(),
                format: tag.into(),
                srgb: true,
            })?;
            assert_eq!((pixels.width, pixels.height), (2, 1));
            assert_eq!(pixels.rgba, vec![1, 2, 3, 255, 4, 5, 6, 128]);
        }
        Ok(())
    }

    #[test]
    fn other_formats_are_rejected() {
        let bytes = encode(ImageFormat::Png, &[[0; 4]], 1);
        let error = TexturePixels::decode(&ImageAsset {
            bytes,
            format: "dds".into(),
            srgb: false,
        })
        .unwrap_err();
        assert_eq!(
            error.gpu_error(),
            Some(&GpuError::UnsupportedImageFormat("dds".into()))
        );

        let error = TexturePixels::decode(&ImageAsset {
            bytes: b"BM not really a bitmap".to_vec(),
            format: String::new(),
            srgb: false,
        })
        .unwrap_err();
        assert!(matches!(
            error.gpu_error(),
            Some(GpuError::UnsupportedImageFormat(_))
        ));
    }

    #[test]
    fn oversized_textures_are_rejected_before_allocating() -> EngineResult<()> {
        let gpu = SimulatedGpu::new();
        let device = gpu.device();
        let pool = DescriptorPool::<Headless>::create(&device, DescriptorKind::CbvSrvUav, 4, false)?;
        let allocator = device.create_command_allocator()?;
        let mut list = device.create_command_list(&allocator)?;
        list.reset(&allocator, None)?;
        for (width, height) in [(65536, 16384), (u32::MAX, 1), (1, MAX_TEXTURE_DIMENSION + 1)] {
            let pixels = TexturePixels {
                width,
                height,
                rgba: Vec::new(),
            };
            let error = ShaderResourceTexture::create(&device, &mut list, &pool, &pixels, false).err();
            assert!(matches!(
                error.as_ref().and_then(|e| e.gpu_error()),
                Some(GpuError::InvalidArgument(_))
            ));
        }
        assert_eq!(gpu.live_resource_count(), 0);
        assert_eq!(pool.free_count(), 4);
        list.close()?;
        Ok(())
    }

    #[test]
    fn corrupt_png_is_an_error() {
        let result = TexturePixels::decode(&ImageAsset {
            bytes: vec![0x89, b'P', b'N', b'G', 0, 0],
            format: "png".into(),
            srgb: false,
        });
        assert!(result.is_err());
    }

    #[test]
    fn rows_are_repacked_through_an_aligned_staging_buffer() -> EngineResult<()> {
        let gpu = SimulatedGpu::new();
        gpu.set_lag(1);
        let device = gpu.device();
        let pool = DescriptorPool::<Headless>::create(&device, DescriptorKind::CbvSrvUav, 4, false)?;
        let queue = device.create_command_queue()?;
        let allocator = device.create_command_allocator()?;
        let mut list = device.create_command_list(&allocator)?;
        let pixels = TexturePixels {
            width: 3,
            height: 2,
            rgba: (0..24).collect(),
        };
        assert_eq!(pixels.row_pitch(), 256);

        allocator.reset()?;
        list.reset(&allocator, None)?;
        let mut texture = ShaderResourceTexture::create(&device, &mut list, &pool, &pixels, true)?;
        list.close()?;
        queue.execute(&[&list])?;
        queue.signal(1)?;
        queue.wait_for(1, None)?;
        texture.discard_upload();

        let resource = texture.resource().unwrap();
        assert_eq!(&resource.contents()[..24], pixels.rgba.as_slice());
        assert!(resource.canary_intact());
        assert_eq!(
            gpu.resource_state(resource.id()),
            Some(ResourceState::PixelShaderResource)
        );
        let record = gpu.descriptor(texture.srv_cpu().unwrap()).unwrap();
        assert_eq!(
            record.view,
            ViewDesc::ShaderResource {
                format: Format::Rgba8UnormSrgb
            }
        );
        assert!(gpu.violations().is_empty());
        drop(texture);
        assert_eq!(pool.free_count(), 4);
        Ok(())
    }
}
