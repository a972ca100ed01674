use crate::backend::Backend;
use crate::backend::Format;
use crate::backend::IndexBufferView;
use crate::backend::ResourceState;
use crate::backend::VertexBufferView;
use crate::error::EngineResult;
use crate::error::GpuError;
use crate::gpu_buffer::GpuBuffer;
use crate::model_asset::MeshAsset;
use crate::model_asset::StandardVertex;

/// Static vertex and index buffers for one mesh.
pub struct MeshGpu<B: Backend> {
    vertices: GpuBuffer<B>,
    indices: GpuBuffer<B>,
    index_count: u32,
    material_id: u32,
}

impl<B: Backend> MeshGpu<B> {
    /// Records both uploads into `list`; see [`GpuBuffer::create_static`].
    pub fn create(device: &B::Device, list: &mut B::CommandList, asset: &MeshAsset) -> EngineResult<Self> {
        if asset.vertices.is_empty() || asset.indices.is_empty() {
            return Err(GpuError::InvalidArgument("mesh has no geometry").into());
        }
        let vertices = GpuBuffer::create_static(
            device,
            list,
            bytemuck::cast_slice(&asset.vertices),
            ResourceState::VertexAndConstantBuffer,
        )?;
        let indices = GpuBuffer::create_static(
            device,
            list,
            bytemuck::cast_slice(&asset.indices),
            ResourceState::IndexBuffer,
        )?;
        Ok(Self {
            vertices,
            indices,
            index_count: asset.indices.len() as u32,
            material_id: asset.material_id,
        })
    }

    pub fn discard_uploads(&mut self) {
        self.vertices.discard_upload();
        self.indices.discard_upload();
    }

    pub fn has_pending_uploads(&self) -> bool {
        self.vertices.has_pending_upload() || self.indices.has_pending_upload()
    }

    pub fn vertex_buffer_view(&self) -> VertexBufferView {
        VertexBufferView {
            location: self.vertices.gpu_address(),
            size: self.vertices.size() as u32,
            stride: StandardVertex::STRIDE,
        }
    }

    pub fn index_buffer_view(&self) -> IndexBufferView {
        IndexBufferView {
            location: self.indices.gpu_address(),
            size: self.indices.size() as u32,
            format: Format::R32Uint,
        }
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn material_id(&self) -> u32 {
        self.material_id
    }
}
