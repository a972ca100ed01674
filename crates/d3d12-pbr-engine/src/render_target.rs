use crate::backend::Backend;
use crate::backend::ClearValue;
use crate::backend::CpuDescriptorHandle;
use crate::backend::Format;
use crate::backend::RenderDevice;
use crate::backend::ResourceState;
use crate::backend::SwapChain;
use crate::backend::TextureDesc;
use crate::backend::TextureKind;
use crate::backend::ViewDesc;
use crate::descriptor_pool::DescriptorPool;
use crate::error::EngineResult;
use std::sync::Arc;
use tracing::warn;

pub const DEPTH_CLEAR: f32 = 1.0;

/// A 2D image plus the slot of its view in a pool. Shared by colour and depth targets.
struct TargetView<B: Backend> {
    resource: Option<B::Resource>,
    pool: Option<Arc<DescriptorPool<B>>>,
    index: Option<u32>,
}

impl<B: Backend> TargetView<B> {
    fn create(
        device: &B::Device,
        pool: &Arc<DescriptorPool<B>>,
        resource: B::Resource,
        view: ViewDesc,
    ) -> EngineResult<Self> {
        let index = pool.allocate()?;
        device.create_view(Some(&resource), &view, pool.cpu_handle(index));
        Ok(Self {
            resource: Some(resource),
            pool: Some(pool.clone()),
            index: Some(index),
        })
    }

    fn handle(&self) -> Option<CpuDescriptorHandle> {
        Some(self.pool.as_ref()?.cpu_handle(self.index?))
    }

    fn term(&mut self) {
        if let (Some(pool), Some(index)) = (self.pool.take(), self.index.take()) {
            if let Err(error) = pool.free(index) {
                warn!("Target view slot {} was already released: {}", index, error);
            }
        }
        self.resource = None;
    }
}

impl<B: Backend> Drop for TargetView<B> {
    fn drop(&mut self) {
        self.term();
    }
}

/// A swap-chain back buffer and its render-target view.
pub struct ColorTarget<B: Backend> {
    view: TargetView<B>,
    format: Format,
}

impl<B: Backend> ColorTarget<B> {
    pub fn from_swap_chain(
        device: &B::Device,
        pool: &Arc<DescriptorPool<B>>,
        swap_chain: &B::SwapChain,
        buffer: u32,
    ) -> EngineResult<Self> {
        let format = swap_chain.format();
        let resource = swap_chain.buffer(buffer)?;
        Ok(Self {
            view: TargetView::create(device, pool, resource, ViewDesc::RenderTarget { format })?,
            format,
        })
    }

    /// Allocates a standalone render-target texture.
    pub fn create(
        device: &B::Device,
        pool: &Arc<DescriptorPool<B>>,
        width: u32,
        height: u32,
        format: Format,
        clear_color: [f32; 4],
    ) -> EngineResult<Self> {
        let resource = device.create_texture_2d(
            &TextureDesc {
                width,
                height,
                format,
                kind: TextureKind::RenderTarget,
            },
            ResourceState::RenderTarget,
            Some(ClearValue::Color(clear_color)),
        )?;
        Ok(Self {
            view: TargetView::create(device, pool, resource, ViewDesc::RenderTarget { format })?,
            format,
        })
    }

    pub fn resource(&self) -> Option<&B::Resource> {
        self.view.resource.as_ref()
    }

    pub fn rtv(&self) -> Option<CpuDescriptorHandle> {
        self.view.handle()
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn term(&mut self) {
        self.view.term();
    }
}

/// A `D32Float` depth buffer, cleared to 1.0.
pub struct DepthTarget<B: Backend> {
    view: TargetView<B>,
}

impl<B: Backend> DepthTarget<B> {
    pub const FORMAT: Format = Format::D32Float;

    pub fn create(
        device: &B::Device,
        pool: &Arc<DescriptorPool<B>>,
        width: u32,
        height: u32,
    ) -> EngineResult<Self> {
        let resource = device.create_texture_2d(
            &TextureDesc {
                width,
                height,
                format: Self::FORMAT,
                kind: TextureKind::DepthStencil,
            },
            ResourceState::DepthWrite,
            Some(ClearValue::Depth(DEPTH_CLEAR)),
        )?;
        Ok(Self {
            view: TargetView::create(
                device,
                pool,
                resource,
                ViewDesc::DepthStencil {
                    format: Self::FORMAT,
                },
            )?,
        })
    }

    pub fn resource(&self) -> Option<&B::Resource> {
        self.view.resource.as_ref()
    }

    pub fn dsv(&self) -> Option<CpuDescriptorHandle> {
        self.view.handle()
    }

    pub fn term(&mut self) {
        self.view.term();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DescriptorKind;
    use crate::backend::SubmissionQueue as _;
    use crate::backend::headless::Headless;
    use crate::backend::headless::SimulatedGpu;

    #[test]
    fn back_buffers_get_their_own_views() -> EngineResult<()> {
        let gpu = SimulatedGpu::new();
        let device = gpu.device();
        let pool = DescriptorPool::<Headless>::create(&device, DescriptorKind::RenderTarget, 4, false)?;
        let queue = device.create_command_queue()?;
        let swap_chain = device.create_swap_chain(&queue, &(), 64, 32, 2)?;
        let targets = (0..2)
            .map(|buffer| ColorTarget::from_swap_chain(&device, &pool, &swap_chain, buffer))
            .collect::<EngineResult<Vec<_>>>()?;
        assert_ne!(targets[0].rtv(), targets[1].rtv());
        let record = gpu.descriptor(targets[1].rtv().unwrap()).unwrap();
        assert_eq!(
            record.view,
            ViewDesc::RenderTarget {
                format: Format::Rgba16Float
            }
        );
        assert_eq!(record.resource, Some(targets[1].resource().unwrap().id()));
        assert_eq!(queue.completed_value(), 0);
        drop(targets);
        assert_eq!(pool.free_count(), 4);
        Ok(())
    }

    #[test]
    fn depth_target_starts_writable() -> EngineResult<()> {
        let gpu = SimulatedGpu::new();
        let device = gpu.device();
        let pool = DescriptorPool::<Headless>::create(&device, DescriptorKind::DepthStencil, 1, false)?;
        let mut depth = DepthTarget::create(&device, &pool, 64, 32)?;
        let id = depth.resource().unwrap().id();
        assert_eq!(gpu.resource_state(id), Some(ResourceState::DepthWrite));
        assert_eq!(pool.free_count(), 0);
        depth.term();
        depth.term();
        assert_eq!(pool.free_count(), 1);
        assert_eq!(gpu.live_resource_count(), 0);
        Ok(())
    }
}
