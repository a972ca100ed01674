use super::DescriptorRecord;
use super::Headless;
use super::PendingCopy;
use super::ResourceMemory;
use super::SimulatedGpu;
use super::Submission;
use super::SubmissionRecord;
use super::Violation;
use super::CANARY_BYTE;
use super::CANARY_LEN;
use crate::backend::ClearValue;
use crate::backend::CommandAllocator;
use crate::backend::CommandList;
use crate::backend::CpuDescriptorHandle;
use crate::backend::DescriptorHeap;
use crate::backend::DescriptorKind;
use crate::backend::Format;
use crate::backend::GpuDescriptorHandle;
use crate::backend::GpuResource;
use crate::backend::IndexBufferView;
use crate::backend::MemoryKind;
use crate::backend::RenderDevice;
use crate::backend::ResourceState;
use crate::backend::SubmissionQueue;
use crate::backend::SwapChain;
use crate::backend::TextureDesc;
use crate::backend::TextureFootprint;
use crate::backend::VertexBufferView;
use crate::backend::ViewDesc;
use crate::backend::Viewport;
use crate::backend::WaitOutcome;
use crate::display::DisplayInfo;
use crate::display::MonitorId;
use crate::error::EngineResult;
use crate::error::GpuError;
use crate::pipeline::PipelineDesc;
use crate::pipeline::RootLayout;
use std::collections::HashSet;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::time::Duration;

pub struct HeadlessDevice {
    gpu: SimulatedGpu,
}

impl HeadlessDevice {
    pub(super) fn new(gpu: SimulatedGpu) -> Self {
        Self { gpu }
    }

    pub fn gpu(&self) -> &SimulatedGpu {
        &self.gpu
    }

    fn resource(&self, memory: MemoryKind, size: u64, state: ResourceState) -> EngineResult<HeadlessResource> {
        let (id, address) = self.gpu.lock().allocate(size, state)?;
        Ok(HeadlessResource {
            inner: Arc::new(ResourceInner {
                id,
                size,
                address,
                memory_kind: memory,
                memory: Arc::new(ResourceMemory::new(size as usize)),
                mapped: AtomicBool::new(false),
                gpu: self.gpu.clone(),
            }),
        })
    }
}

fn descriptor_stride(kind: DescriptorKind) -> u32 {
    match kind {
        DescriptorKind::RenderTarget => 32,
        DescriptorKind::DepthStencil => 8,
        DescriptorKind::CbvSrvUav => 32,
        DescriptorKind::Sampler => 32,
    }
}

impl RenderDevice<Headless> for HeadlessDevice {
    fn create_descriptor_heap(
        &self,
        kind: DescriptorKind,
        capacity: u32,
        shader_visible: bool,
    ) -> EngineResult<HeadlessHeap> {
        if capacity == 0 {
            return Err(GpuError::InvalidArgument("descriptor heap capacity must be non-zero").into());
        }
        let id = self.gpu.lock().next_id();
        let base = id << 24;
        Ok(HeadlessHeap {
            kind,
            cpu_start: CpuDescriptorHandle(base as usize),
            gpu_start: shader_visible.then_some(GpuDescriptorHandle(base)),
            stride: descriptor_stride(kind),
        })
    }

    fn create_buffer(
        &self,
        memory: MemoryKind,
        size: u64,
        initial_state: ResourceState,
    ) -> EngineResult<HeadlessResource> {
        if size == 0 {
            return Err(GpuError::InvalidArgument("buffer size must be non-zero").into());
        }
        self.resource(memory, size, initial_state)
    }

    fn create_texture_2d(
        &self,
        desc: &TextureDesc,
        initial_state: ResourceState,
        _clear: Option<ClearValue>,
    ) -> EngineResult<HeadlessResource> {
        let size = desc.width as u64 * desc.height as u64 * desc.format.bytes_per_pixel() as u64;
        if size == 0 {
            return Err(GpuError::InvalidArgument("texture has no pixels").into());
        }
        self.resource(MemoryKind::DeviceLocal, size, initial_state)
    }

    fn create_view(&self, resource: Option<&HeadlessResource>, view: &ViewDesc, dest: CpuDescriptorHandle) {
        self.gpu.lock().write_descriptor(
            dest,
            DescriptorRecord {
                view: *view,
                resource: resource.map(HeadlessResource::id),
            },
        );
    }

    fn copy_descriptor(&self, dest: CpuDescriptorHandle, src: CpuDescriptorHandle, _kind: DescriptorKind) {
        self.gpu.lock().copy_descriptor(dest, src);
    }

    fn create_command_allocator(&self) -> EngineResult<HeadlessAllocator> {
        let id = self.gpu.lock().next_id();
        Ok(HeadlessAllocator {
            id,
            gpu: self.gpu.clone(),
        })
    }

    fn create_command_list(&self, allocator: &HeadlessAllocator) -> EngineResult<HeadlessCommandList> {
        let id = self.gpu.lock().next_id();
        Ok(HeadlessCommandList {
            id,
            gpu: self.gpu.clone(),
            recording: false,
            pipeline_bound: false,
            pending: Submission {
                record: SubmissionRecord {
                    allocator: allocator.id,
                    ..Default::default()
                },
                resources: HashSet::new(),
                copies: Vec::new(),
            },
            transitions: Vec::new(),
        })
    }

    fn create_command_queue(&self) -> EngineResult<HeadlessQueue> {
        Ok(HeadlessQueue {
            gpu: self.gpu.clone(),
        })
    }

    fn create_swap_chain(
        &self,
        _queue: &HeadlessQueue,
        _surface: &(),
        width: u32,
        height: u32,
        buffer_count: u32,
    ) -> EngineResult<HeadlessSwapChain> {
        if buffer_count < 2 {
            return Err(GpuError::InvalidArgument("a flip swap chain needs at least two buffers").into());
        }
        let desc = TextureDesc {
            width,
            height,
            format: Format::Rgba16Float,
            kind: crate::backend::TextureKind::RenderTarget,
        };
        let buffers = (0..buffer_count)
            .map(|_| self.create_texture_2d(&desc, ResourceState::Present, None))
            .collect::<EngineResult<Vec<_>>>()?;
        Ok(HeadlessSwapChain {
            gpu: self.gpu.clone(),
            buffers,
            index: AtomicU32::new(0),
        })
    }

    fn create_root_signature(&self, layout: &RootLayout) -> EngineResult<HeadlessRootSignature> {
        if layout.parameters.is_empty() {
            return Err(GpuError::PipelineRejected("root signature has no parameters".into()).into());
        }
        Ok(HeadlessRootSignature {
            layout: layout.clone(),
        })
    }

    fn create_pipeline_state(
        &self,
        _root_signature: &HeadlessRootSignature,
        desc: &PipelineDesc,
    ) -> EngineResult<HeadlessPipeline> {
        if desc.vertex_shader.bytes.is_empty() || desc.pixel_shader.bytes.is_empty() {
            return Err(GpuError::PipelineRejected("empty shader stage".into()).into());
        }
        if desc.render_target_format == Format::Unknown {
            return Err(GpuError::PipelineRejected("render target format is unknown".into()).into());
        }
        Ok(HeadlessPipeline {
            vertex_stride: desc
                .input_layout
                .iter()
                .map(|attribute| attribute.offset + attribute.format.bytes_per_pixel())
                .max()
                .unwrap_or(0),
        })
    }
}

struct ResourceInner {
    id: u64,
    size: u64,
    address: u64,
    memory_kind: MemoryKind,
    memory: Arc<ResourceMemory>,
    mapped: AtomicBool,
    gpu: SimulatedGpu,
}

impl Drop for ResourceInner {
    fn drop(&mut self) {
        self.gpu.lock().release(self.id);
    }
}

/// Clones refer to the same allocation, like extra COM references.
#[derive(Clone)]
pub struct HeadlessResource {
    inner: Arc<ResourceInner>,
}

impl HeadlessResource {
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn is_mapped(&self) -> bool {
        self.inner.mapped.load(Ordering::Acquire)
    }

    /// Current bytes including the trailing canary.
    pub fn contents(&self) -> Vec<u8> {
        self.inner.memory.snapshot()
    }

    pub fn canary_intact(&self) -> bool {
        let bytes = self.contents();
        bytes[bytes.len() - CANARY_LEN..]
            .iter()
            .all(|byte| *byte == CANARY_BYTE)
    }
}

impl GpuResource for HeadlessResource {
    fn size(&self) -> u64 {
        self.inner.size
    }

    fn gpu_address(&self) -> u64 {
        self.inner.address
    }

    fn map(&self) -> EngineResult<NonNull<u8>> {
        if self.inner.memory_kind != MemoryKind::Upload {
            return Err(GpuError::InvalidArgument("device-local memory cannot be mapped").into());
        }
        self.inner.mapped.store(true, Ordering::Release);
        Ok(self.inner.memory.ptr())
    }

    fn unmap(&self) {
        self.inner.mapped.store(false, Ordering::Release);
    }
}

pub struct HeadlessHeap {
    kind: DescriptorKind,
    cpu_start: CpuDescriptorHandle,
    gpu_start: Option<GpuDescriptorHandle>,
    stride: u32,
}

impl DescriptorHeap for HeadlessHeap {
    fn kind(&self) -> DescriptorKind {
        self.kind
    }

    fn cpu_start(&self) -> CpuDescriptorHandle {
        self.cpu_start
    }

    fn gpu_start(&self) -> Option<GpuDescriptorHandle> {
        self.gpu_start
    }

    fn increment_size(&self) -> u32 {
        self.stride
    }
}

pub struct HeadlessAllocator {
    id: u64,
    gpu: SimulatedGpu,
}

impl HeadlessAllocator {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl CommandAllocator for HeadlessAllocator {
    fn reset(&self) -> EngineResult<()> {
        let mut state = self.gpu.lock();
        if state.allocator_in_flight(self.id) {
            state.violate(Violation::AllocatorResetInFlight { allocator: self.id });
        }
        let completed = state.completed_value();
        state.record_event(super::GpuEvent::AllocatorReset {
            allocator: self.id,
            completed,
        });
        Ok(())
    }
}

pub struct HeadlessCommandList {
    id: u64,
    gpu: SimulatedGpu,
    recording: bool,
    pipeline_bound: bool,
    pending: Submission,
    transitions: Vec<(u64, ResourceState, ResourceState)>,
}

impl HeadlessCommandList {
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    fn touch(&mut self, resource: &HeadlessResource) {
        self.pending.resources.insert(resource.id());
    }
}

impl CommandList<Headless> for HeadlessCommandList {
    fn reset(&mut self, allocator: &HeadlessAllocator, pipeline: Option<&HeadlessPipeline>) -> EngineResult<()> {
        if self.recording {
            self.gpu
                .lock()
                .violate(Violation::ListResetWhileRecording { list: self.id });
        }
        self.recording = true;
        self.pipeline_bound = pipeline.is_some();
        self.pending = Submission {
            record: SubmissionRecord {
                allocator: allocator.id,
                ..Default::default()
            },
            resources: HashSet::new(),
            copies: Vec::new(),
        };
        self.transitions.clear();
        Ok(())
    }

    fn close(&mut self) -> EngineResult<()> {
        if !self.recording {
            return Err(GpuError::InvalidArgument("command list is already closed").into());
        }
        self.recording = false;
        Ok(())
    }

    fn transition(&mut self, resource: &HeadlessResource, before: ResourceState, after: ResourceState) {
        self.touch(resource);
        self.transitions.push((resource.id(), before, after));
    }

    fn copy_buffer(&mut self, dest: &HeadlessResource, src: &HeadlessResource, size: u64) {
        self.touch(dest);
        self.touch(src);
        self.pending.copies.push(PendingCopy::Linear {
            dest: dest.inner.memory.clone(),
            src: src.inner.memory.clone(),
            size,
        });
    }

    fn copy_buffer_to_texture(&mut self, dest: &HeadlessResource, src: &HeadlessResource, footprint: &TextureFootprint) {
        self.touch(dest);
        self.touch(src);
        self.pending.copies.push(PendingCopy::Texture {
            dest: dest.inner.memory.clone(),
            src: src.inner.memory.clone(),
            offset: footprint.offset,
            row_bytes: footprint.width * footprint.format.bytes_per_pixel(),
            row_pitch: footprint.row_pitch,
            rows: footprint.height,
        });
    }

    fn set_render_targets(&mut self, rtv: CpuDescriptorHandle, _dsv: Option<CpuDescriptorHandle>) {
        self.pending.record.render_targets.push(rtv);
    }

    fn clear_render_target(&mut self, _rtv: CpuDescriptorHandle, _color: [f32; 4]) {}

    fn clear_depth(&mut self, _dsv: CpuDescriptorHandle, _depth: f32) {}

    fn set_viewport(&mut self, _viewport: &Viewport) {}

    fn set_root_signature(&mut self, _root_signature: &HeadlessRootSignature) {}

    fn set_pipeline_state(&mut self, _pipeline: &HeadlessPipeline) {
        self.pipeline_bound = true;
    }

    fn set_descriptor_heaps(&mut self, _heaps: &[&HeadlessHeap]) {}

    fn set_root_constant_buffer(&mut self, parameter: u32, location: u64) {
        self.pending.record.root_constant_buffers.push((parameter, location));
    }

    fn set_root_descriptor_table(&mut self, parameter: u32, base: GpuDescriptorHandle) {
        self.pending.record.root_tables.push((parameter, base));
    }

    fn set_vertex_buffer(&mut self, _view: &VertexBufferView) {}

    fn set_index_buffer(&mut self, _view: &IndexBufferView) {}

    fn draw_indexed(&mut self, _index_count: u32) {
        if !self.pipeline_bound {
            self.gpu
                .lock()
                .violate(Violation::DrawWithoutPipeline { list: self.id });
        }
        self.pending.record.draws += 1;
    }
}

pub struct HeadlessQueue {
    gpu: SimulatedGpu,
}

impl SubmissionQueue<Headless> for HeadlessQueue {
    fn execute(&self, lists: &[&HeadlessCommandList]) -> EngineResult<()> {
        let mut state = self.gpu.lock();
        for list in lists {
            if list.recording {
                state.violate(Violation::ExecutedWhileRecording { list: list.id });
            }
            state.apply_transitions(&list.transitions);
            let submission = Submission {
                record: list.pending.record.clone(),
                resources: list.pending.resources.clone(),
                copies: list
                    .pending
                    .copies
                    .iter()
                    .map(PendingCopy::duplicate)
                    .collect(),
            };
            state.enqueue(submission);
        }
        Ok(())
    }

    fn signal(&self, value: u64) -> EngineResult<()> {
        self.gpu.lock().signal(value);
        Ok(())
    }

    fn completed_value(&self) -> u64 {
        self.gpu.lock().completed_value()
    }

    fn wait_for(&self, value: u64, timeout: Option<Duration>) -> EngineResult<WaitOutcome> {
        match self.gpu.lock().wait_for(value, timeout)? {
            true => Ok(WaitOutcome::Reached),
            false => Ok(WaitOutcome::TimedOut),
        }
    }
}

pub struct HeadlessSwapChain {
    gpu: SimulatedGpu,
    buffers: Vec<HeadlessResource>,
    index: AtomicU32,
}

impl SwapChain<Headless> for HeadlessSwapChain {
    fn buffer_count(&self) -> u32 {
        self.buffers.len() as u32
    }

    fn buffer(&self, index: u32) -> EngineResult<HeadlessResource> {
        self.buffers
            .get(index as usize)
            .cloned()
            .ok_or_else(|| GpuError::InvalidArgument("swap chain buffer index out of range").into())
    }

    fn format(&self) -> Format {
        Format::Rgba16Float
    }

    fn current_back_buffer_index(&self) -> u32 {
        self.index.load(Ordering::Acquire)
    }

    fn present(&self, _sync_interval: u32) -> EngineResult<()> {
        let current = self.index.load(Ordering::Acquire);
        let step = self.gpu.lock().present(current);
        self.index
            .store((current + step) % self.buffer_count(), Ordering::Release);
        Ok(())
    }

    fn display_info(&self) -> EngineResult<DisplayInfo> {
        Ok(self.gpu.lock().display())
    }

    fn current_monitor(&self) -> Option<MonitorId> {
        self.gpu.lock().monitor()
    }
}

pub struct HeadlessRootSignature {
    layout: RootLayout,
}

impl HeadlessRootSignature {
    pub fn layout(&self) -> &RootLayout {
        &self.layout
    }
}

pub struct HeadlessPipeline {
    vertex_stride: u32,
}

impl HeadlessPipeline {
    pub fn vertex_stride(&self) -> u32 {
        self.vertex_stride
    }
}
