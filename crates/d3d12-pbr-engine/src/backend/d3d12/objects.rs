use super::D3d12;
use super::convert::dxgi_format;
use super::convert::resource_state;
use super::convert::transition_barrier;
use super::pipeline::D3d12Pipeline;
use super::pipeline::D3d12RootSignature;
use crate::backend::CommandAllocator;
use crate::backend::CommandList;
use crate::backend::CpuDescriptorHandle;
use crate::backend::DescriptorHeap;
use crate::backend::DescriptorKind;
use crate::backend::GpuDescriptorHandle;
use crate::backend::GpuResource;
use crate::backend::IndexBufferView;
use crate::backend::ResourceState;
use crate::backend::SubmissionQueue;
use crate::backend::TextureFootprint;
use crate::backend::VertexBufferView;
use crate::backend::Viewport;
use crate::backend::WaitOutcome;
use crate::error::EngineResult;
use crate::error::GpuError;
use std::ptr::NonNull;
use std::time::Duration;
use std::time::Instant;
use tracing::error;
use windows::Win32::Foundation::*;
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::System::Threading::*;
use windows::core::*;

pub struct D3d12Resource {
    pub(super) resource: ID3D12Resource,
    pub(super) size: u64,
}

impl D3d12Resource {
    pub fn raw(&self) -> &ID3D12Resource {
        &self.resource
    }
}

impl GpuResource for D3d12Resource {
    fn size(&self) -> u64 {
        self.size
    }

    fn gpu_address(&self) -> u64 {
        unsafe { self.resource.GetGPUVirtualAddress() }
    }

    fn map(&self) -> EngineResult<NonNull<u8>> {
        let mut data = std::ptr::null_mut();
        // The CPU never reads these.
        let read_range = D3D12_RANGE { Begin: 0, End: 0 };
        unsafe { self.resource.Map(0, Some(&read_range), Some(&mut data))? };
        Ok(NonNull::new(data as *mut u8).ok_or(GpuError::NotMapped)?)
    }

    fn unmap(&self) {
        unsafe { self.resource.Unmap(0, None) };
    }
}

pub struct D3d12Heap {
    pub(super) heap: ID3D12DescriptorHeap,
    pub(super) kind: DescriptorKind,
    pub(super) increment: u32,
    pub(super) shader_visible: bool,
}

impl DescriptorHeap for D3d12Heap {
    fn kind(&self) -> DescriptorKind {
        self.kind
    }

    fn cpu_start(&self) -> CpuDescriptorHandle {
        CpuDescriptorHandle(unsafe { self.heap.GetCPUDescriptorHandleForHeapStart() }.ptr)
    }

    fn gpu_start(&self) -> Option<GpuDescriptorHandle> {
        self.shader_visible
            .then(|| GpuDescriptorHandle(unsafe { self.heap.GetGPUDescriptorHandleForHeapStart() }.ptr))
    }

    fn increment_size(&self) -> u32 {
        self.increment
    }
}

pub struct D3d12Allocator {
    pub(super) allocator: ID3D12CommandAllocator,
}

impl CommandAllocator for D3d12Allocator {
    fn reset(&self) -> EngineResult<()> {
        unsafe { self.allocator.Reset()? };
        Ok(())
    }
}

pub struct D3d12CommandList {
    pub(super) list: ID3D12GraphicsCommandList,
}

impl CommandList<D3d12> for D3d12CommandList {
    fn reset(&mut self, allocator: &D3d12Allocator, pipeline: Option<&D3d12Pipeline>) -> EngineResult<()> {
        unsafe {
            self.list
                .Reset(&allocator.allocator, pipeline.map(|p| &p.pipeline))?
        };
        Ok(())
    }

    fn close(&mut self) -> EngineResult<()> {
        unsafe { self.list.Close()? };
        Ok(())
    }

    fn transition(&mut self, resource: &D3d12Resource, before: ResourceState, after: ResourceState) {
        let barrier = transition_barrier(&resource.resource, resource_state(before), resource_state(after));
        unsafe { self.list.ResourceBarrier(&[barrier]) };
    }

    fn copy_buffer(&mut self, dest: &D3d12Resource, src: &D3d12Resource, size: u64) {
        unsafe {
            self.list
                .CopyBufferRegion(&dest.resource, 0, &src.resource, 0, size)
        };
    }

    fn copy_buffer_to_texture(&mut self, dest: &D3d12Resource, src: &D3d12Resource, footprint: &TextureFootprint) {
        let dst_location = D3D12_TEXTURE_COPY_LOCATION {
            pResource: unsafe { std::mem::transmute_copy(&dest.resource) },
            Type: D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX,
            Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
                SubresourceIndex: 0,
            },
        };
        let src_location = D3D12_TEXTURE_COPY_LOCATION {
            pResource: unsafe { std::mem::transmute_copy(&src.resource) },
            Type: D3D12_TEXTURE_COPY_TYPE_PLACED_FOOTPRINT,
            Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
                PlacedFootprint: D3D12_PLACED_SUBRESOURCE_FOOTPRINT {
                    Offset: footprint.offset,
                    Footprint: D3D12_SUBRESOURCE_FOOTPRINT {
                        Format: dxgi_format(footprint.format),
                        Width: footprint.width,
                        Height: footprint.height,
                        Depth: 1,
                        RowPitch: footprint.row_pitch,
                    },
                },
            },
        };
        unsafe {
            self.list
                .CopyTextureRegion(&dst_location, 0, 0, 0, &src_location, None)
        };
    }

    fn set_render_targets(&mut self, rtv: CpuDescriptorHandle, dsv: Option<CpuDescriptorHandle>) {
        let rtv = D3D12_CPU_DESCRIPTOR_HANDLE { ptr: rtv.0 };
        let dsv = dsv.map(|dsv| D3D12_CPU_DESCRIPTOR_HANDLE { ptr: dsv.0 });
        unsafe {
            self.list
                .OMSetRenderTargets(1, Some(&rtv), false, dsv.as_ref().map(|d| d as *const _))
        };
    }

    fn clear_render_target(&mut self, rtv: CpuDescriptorHandle, color: [f32; 4]) {
        unsafe {
            self.list
                .ClearRenderTargetView(D3D12_CPU_DESCRIPTOR_HANDLE { ptr: rtv.0 }, &color, None)
        };
    }

    fn clear_depth(&mut self, dsv: CpuDescriptorHandle, depth: f32) {
        unsafe {
            self.list.ClearDepthStencilView(
                D3D12_CPU_DESCRIPTOR_HANDLE { ptr: dsv.0 },
                D3D12_CLEAR_FLAG_DEPTH,
                depth,
                0,
                &[],
            )
        };
    }

    fn set_viewport(&mut self, viewport: &Viewport) {
        let vp = D3D12_VIEWPORT {
            TopLeftX: 0.0,
            TopLeftY: 0.0,
            Width: viewport.width as f32,
            Height: viewport.height as f32,
            MinDepth: D3D12_MIN_DEPTH,
            MaxDepth: D3D12_MAX_DEPTH,
        };
        let scissor = RECT {
            left: 0,
            top: 0,
            right: viewport.width as i32,
            bottom: viewport.height as i32,
        };
        unsafe {
            self.list.RSSetViewports(&[vp]);
            self.list.RSSetScissorRects(&[scissor]);
        }
    }

    fn set_root_signature(&mut self, root_signature: &D3d12RootSignature) {
        unsafe {
            self.list
                .SetGraphicsRootSignature(&root_signature.root_signature)
        };
    }

    fn set_pipeline_state(&mut self, pipeline: &D3d12Pipeline) {
        unsafe {
            self.list.SetPipelineState(&pipeline.pipeline);
            self.list
                .IASetPrimitiveTopology(D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST);
        }
    }

    fn set_descriptor_heaps(&mut self, heaps: &[&D3d12Heap]) {
        let heaps: Vec<Option<ID3D12DescriptorHeap>> = heaps
            .iter()
            .filter(|heap| heap.shader_visible)
            .map(|heap| Some(heap.heap.clone()))
            .collect();
        unsafe { self.list.SetDescriptorHeaps(&heaps) };
    }

    fn set_root_constant_buffer(&mut self, parameter: u32, location: u64) {
        unsafe {
            self.list
                .SetGraphicsRootConstantBufferView(parameter, location)
        };
    }

    fn set_root_descriptor_table(&mut self, parameter: u32, base: GpuDescriptorHandle) {
        unsafe {
            self.list
                .SetGraphicsRootDescriptorTable(parameter, D3D12_GPU_DESCRIPTOR_HANDLE { ptr: base.0 })
        };
    }

    fn set_vertex_buffer(&mut self, view: &VertexBufferView) {
        let vbv = D3D12_VERTEX_BUFFER_VIEW {
            BufferLocation: view.location,
            SizeInBytes: view.size,
            StrideInBytes: view.stride,
        };
        unsafe { self.list.IASetVertexBuffers(0, Some(&[vbv])) };
    }

    fn set_index_buffer(&mut self, view: &IndexBufferView) {
        let ibv = D3D12_INDEX_BUFFER_VIEW {
            BufferLocation: view.location,
            SizeInBytes: view.size,
            Format: dxgi_format(view.format),
        };
        unsafe { self.list.IASetIndexBuffer(Some(&ibv)) };
    }

    fn draw_indexed(&mut self, index_count: u32) {
        unsafe { self.list.DrawIndexedInstanced(index_count, 1, 0, 0, 0) };
    }
}

/// The direct queue, its fence and the event used to wait on it.
pub struct D3d12Queue {
    pub(super) queue: ID3D12CommandQueue,
    fence: ID3D12Fence,
    fence_event: HANDLE,
}

impl D3d12Queue {
    pub(super) fn create(device: &ID3D12Device) -> EngineResult<Self> {
        let queue: ID3D12CommandQueue = unsafe {
            device.CreateCommandQueue(&D3D12_COMMAND_QUEUE_DESC {
                Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
                ..Default::default()
            })?
        };
        let fence: ID3D12Fence = unsafe { device.CreateFence(0, D3D12_FENCE_FLAG_NONE)? };
        let fence_event = unsafe { CreateEventA(None, false, false, PCSTR::null())? };
        if fence_event.is_invalid() {
            return Err(Error::from_win32().into());
        }
        Ok(Self {
            queue,
            fence,
            fence_event,
        })
    }
}

impl SubmissionQueue<D3d12> for D3d12Queue {
    fn execute(&self, lists: &[&D3d12CommandList]) -> EngineResult<()> {
        let lists = lists
            .iter()
            .map(|list| list.list.cast::<ID3D12CommandList>().map(Some))
            .collect::<Result<Vec<_>>>()?;
        unsafe { self.queue.ExecuteCommandLists(&lists) };
        Ok(())
    }

    fn signal(&self, value: u64) -> EngineResult<()> {
        unsafe { self.queue.Signal(&self.fence, value)? };
        Ok(())
    }

    fn completed_value(&self) -> u64 {
        unsafe { self.fence.GetCompletedValue() }
    }

    fn wait_for(&self, value: u64, timeout: Option<Duration>) -> EngineResult<WaitOutcome> {
        let deadline = timeout.map(|t| Instant::now() + t);
        // A timed-out wait leaves its SetEventOnCompletion registered, so the auto-reset event
        // can fire later for an older value. Only the fence value decides completion.
        while self.completed_value() < value {
            let millis = deadline.map_or(INFINITE, |deadline| {
                let remaining = deadline.saturating_duration_since(Instant::now());
                remaining.as_millis().min(INFINITE as u128 - 1) as u32
            });
            unsafe { self.fence.SetEventOnCompletion(value, self.fence_event)? };
            let result = unsafe { WaitForSingleObjectEx(self.fence_event, millis, false) };
            if result == WAIT_TIMEOUT {
                if self.completed_value() >= value {
                    break;
                }
                return Ok(WaitOutcome::TimedOut);
            }
            if result != WAIT_OBJECT_0 {
                return Err(Error::from_win32().into());
            }
        }
        Ok(WaitOutcome::Reached)
    }
}

impl Drop for D3d12Queue {
    fn drop(&mut self) {
        if let Err(e) = unsafe { CloseHandle(self.fence_event) } {
            error!("Failed to close the fence event: {}", e.message());
        }
    }
}
