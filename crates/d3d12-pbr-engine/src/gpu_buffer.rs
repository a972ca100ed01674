use crate::backend::Backend;
use crate::backend::CommandList;
use crate::backend::GpuResource;
use crate::backend::MemoryKind;
use crate::backend::RenderDevice;
use crate::backend::ResourceState;
use crate::error::EngineResult;
use crate::error::GpuError;
use std::ptr::NonNull;
use tracing::trace;

pub const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;

/// Rounds `size` up to the next multiple of [`CONSTANT_BUFFER_ALIGNMENT`].
pub fn align_constant_buffer_size(size: u64) -> u64 {
    (size + CONSTANT_BUFFER_ALIGNMENT - 1) & !(CONSTANT_BUFFER_ALIGNMENT - 1)
}

/// One device allocation plus, depending on how it was created, either a staging buffer
/// awaiting [`GpuBuffer::discard_upload`] or a persistent CPU mapping.
pub struct GpuBuffer<B: Backend> {
    resource: Option<B::Resource>,
    upload: Option<B::Resource>,
    mapped: Option<NonNull<u8>>,
    size: u64,
    state: ResourceState,
}

impl<B: Backend> Default for GpuBuffer<B> {
    fn default() -> Self {
        Self {
            resource: None,
            upload: None,
            mapped: None,
            size: 0,
            state: ResourceState::Common,
        }
    }
}

impl<B: Backend> GpuBuffer<B> {
    /// Records an upload of `data` into a new device-local buffer.
    ///
    /// The staging buffer stays alive until [`GpuBuffer::discard_upload`], which the caller
    /// invokes once the fence covering `list` has been reached.
    pub fn create_static(
        device: &B::Device,
        list: &mut B::CommandList,
        data: &[u8],
        final_state: ResourceState,
    ) -> EngineResult<Self> {
        if data.is_empty() {
            return Err(GpuError::InvalidArgument("static buffer needs initial data").into());
        }
        let size = data.len() as u64;
        let resource = device.create_buffer(MemoryKind::DeviceLocal, size, ResourceState::CopyDest)?;
        let upload = device.create_buffer(MemoryKind::Upload, size, ResourceState::GenericRead)?;

        let staging = upload.map()?;
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), staging.as_ptr(), data.len()) };
        upload.unmap();

        list.copy_buffer(&resource, &upload, size);
        list.transition(&resource, ResourceState::CopyDest, final_state);
        trace!("Recorded static upload of {} bytes", size);

        Ok(Self {
            resource: Some(resource),
            upload: Some(upload),
            mapped: None,
            size,
            state: final_state,
        })
    }

    /// A persistently mapped upload-heap buffer of exactly `size` bytes.
    pub fn create_dynamic(device: &B::Device, size: u64) -> EngineResult<Self> {
        if size == 0 {
            return Err(GpuError::InvalidArgument("dynamic buffer size must be non-zero").into());
        }
        let resource = device.create_buffer(MemoryKind::Upload, size, ResourceState::GenericRead)?;
        let mapped = resource.map()?;
        Ok(Self {
            resource: Some(resource),
            upload: None,
            mapped: Some(mapped),
            size,
            state: ResourceState::GenericRead,
        })
    }

    pub fn discard_upload(&mut self) {
        self.upload = None;
    }

    pub fn has_pending_upload(&self) -> bool {
        self.upload.is_some()
    }

    /// Bounds-checked copy into the persistent mapping.
    pub fn write(&mut self, offset: u64, bytes: &[u8]) -> Result<(), GpuError> {
        let mapped = self.mapped.ok_or(GpuError::NotMapped)?;
        let end = offset.checked_add(bytes.len() as u64);
        if end.is_none_or(|end| end > self.size) {
            return Err(GpuError::ConstantBufferOverflow {
                requested: (offset as usize).saturating_add(bytes.len()),
                capacity: self.size as usize,
            });
        }
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                mapped.as_ptr().add(offset as usize),
                bytes.len(),
            );
        }
        Ok(())
    }

    /// Unmaps and releases everything. Safe to call repeatedly.
    pub fn term(&mut self) {
        if self.mapped.take().is_some() {
            if let Some(resource) = &self.resource {
                resource.unmap();
            }
        }
        self.upload = None;
        self.resource = None;
        self.size = 0;
        self.state = ResourceState::Common;
    }

    pub fn is_initialized(&self) -> bool {
        self.resource.is_some()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn state(&self) -> ResourceState {
        self.state
    }

    pub fn resource(&self) -> Option<&B::Resource> {
        self.resource.as_ref()
    }

    pub fn upload_resource(&self) -> Option<&B::Resource> {
        self.upload.as_ref()
    }

    pub fn gpu_address(&self) -> u64 {
        self.resource.as_ref().map_or(0, GpuResource::gpu_address)
    }

    pub fn mapped_ptr(&self) -> Option<NonNull<u8>> {
        self.mapped
    }
}

impl<B: Backend> Drop for GpuBuffer<B> {
    fn drop(&mut self) {
        self.term();
    }
}
