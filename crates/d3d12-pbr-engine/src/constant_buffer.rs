use crate::backend::Backend;
use crate::backend::CpuDescriptorHandle;
use crate::backend::GpuDescriptorHandle;
use crate::backend::RenderDevice;
use crate::backend::ViewDesc;
use crate::descriptor_pool::DescriptorPool;
use crate::error::EngineResult;
use crate::error::GpuError;
use crate::gpu_buffer::GpuBuffer;
use crate::gpu_buffer::align_constant_buffer_size;
use bytemuck::Pod;
use std::sync::Arc;
use tracing::warn;

/// A dynamic buffer paired with one CBV slot.
///
/// Writes land immediately; one instance must not be shared by frames the GPU may still
/// be reading.
pub struct ConstantBuffer<B: Backend> {
    buffer: GpuBuffer<B>,
    pool: Option<Arc<DescriptorPool<B>>>,
    index: Option<u32>,
}

impl<B: Backend> Default for ConstantBuffer<B> {
    fn default() -> Self {
        Self {
            buffer: GpuBuffer::default(),
            pool: None,
            index: None,
        }
    }
}

impl<B: Backend> ConstantBuffer<B> {
    pub fn init(device: &B::Device, pool: &Arc<DescriptorPool<B>>, size: usize) -> EngineResult<Self> {
        if size == 0 {
            return Err(GpuError::InvalidArgument("constant buffer size must be non-zero").into());
        }
        let index = pool.allocate()?;
        let aligned = align_constant_buffer_size(size as u64);
        let buffer = match GpuBuffer::create_dynamic(device, aligned) {
            Ok(buffer) => buffer,
            Err(error) => {
                pool.free(index)?;
                return Err(error);
            }
        };
        device.create_view(
            None,
            &ViewDesc::ConstantBuffer {
                location: buffer.gpu_address(),
                size: aligned as u32,
            },
            pool.cpu_handle(index),
        );
        Ok(Self {
            buffer,
            pool: Some(pool.clone()),
            index: Some(index),
        })
    }

    /// Copies `data` to the start of the mapping. Oversized writes are refused untouched.
    pub fn update(&mut self, data: &[u8]) -> Result<(), GpuError> {
        if data.len() as u64 > self.buffer.size() {
            return Err(GpuError::ConstantBufferOverflow {
                requested: data.len(),
                capacity: self.buffer.size() as usize,
            });
        }
        self.buffer.write(0, data)
    }

    pub fn update_value<T: Pod>(&mut self, value: &T) -> Result<(), GpuError> {
        self.update(bytemuck::bytes_of(value))
    }

    /// Returns the slot, then releases the buffer.
    pub fn term(&mut self) {
        if let (Some(pool), Some(index)) = (self.pool.take(), self.index.take()) {
            if let Err(error) = pool.free(index) {
                warn!("Constant buffer slot {} was already released: {}", index, error);
            }
        }
        self.buffer.term();
    }

    pub fn size(&self) -> u64 {
        self.buffer.size()
    }

    pub fn gpu_address(&self) -> u64 {
        self.buffer.gpu_address()
    }

    pub fn descriptor_index(&self) -> Option<u32> {
        self.index
    }

    pub fn cpu_handle(&self) -> Option<CpuDescriptorHandle> {
        Some(self.pool.as_ref()?.cpu_handle(self.index?))
    }

    pub fn gpu_handle(&self) -> Option<GpuDescriptorHandle> {
        self.pool.as_ref()?.gpu_handle(self.index?)
    }

    pub fn buffer(&self) -> &GpuBuffer<B> {
        &self.buffer
    }
}

impl<B: Backend> Drop for ConstantBuffer<B> {
    fn drop(&mut self) {
        self.term();
    }
}

/// A constant buffer holding one `T`, with the last written value kept CPU-side.
pub struct ConstantBlock<B: Backend, T: Pod> {
    buffer: ConstantBuffer<B>,
    value: T,
}

impl<B: Backend, T: Pod> ConstantBlock<B, T> {
    pub fn init(device: &B::Device, pool: &Arc<DescriptorPool<B>>, value: T) -> EngineResult<Self> {
        let mut buffer = ConstantBuffer::init(device, pool, std::mem::size_of::<T>())?;
        buffer.update_value(&value)?;
        Ok(Self { buffer, value })
    }

    pub fn update(&mut self, value: T) {
        self.value = value;
        // Capacity is at least size_of::<T>(), so this cannot overflow.
        let written = self.buffer.update_value(&self.value);
        debug_assert!(written.is_ok());
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn gpu_address(&self) -> u64 {
        self.buffer.gpu_address()
    }

    pub fn constant_buffer(&self) -> &ConstantBuffer<B> {
        &self.buffer
    }
}
