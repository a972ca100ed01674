//! The device-facing seam of the engine.
//!
//! Everything above this module speaks in terms of these traits. `d3d12` drives a real
//! Direct3D 12 device; `headless` is a deterministic simulated GPU timeline used by the tests.

#[cfg(windows)]
pub mod d3d12;
pub mod headless;

use crate::display::DisplayInfo;
use crate::display::MonitorId;
use crate::error::EngineResult;
use crate::pipeline::PipelineDesc;
use crate::pipeline::RootLayout;
use std::ptr::NonNull;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CpuDescriptorHandle(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GpuDescriptorHandle(pub u64);

impl CpuDescriptorHandle {
    pub fn offset(self, index: u32, stride: u32) -> Self {
        Self(self.0 + index as usize * stride as usize)
    }
}

impl GpuDescriptorHandle {
    pub fn offset(self, index: u32, stride: u32) -> Self {
        Self(self.0 + index as u64 * stride as u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    RenderTarget,
    DepthStencil,
    CbvSrvUav,
    Sampler,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Unknown,
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Rgba16Float,
    D32Float,
    R32Uint,
    Rg32Float,
    Rgb32Float,
    Rgba32Float,
}

impl Format {
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            Format::Unknown => 0,
            Format::Rgba8Unorm | Format::Rgba8UnormSrgb | Format::D32Float | Format::R32Uint => 4,
            Format::Rgba16Float | Format::Rg32Float => 8,
            Format::Rgb32Float => 12,
            Format::Rgba32Float => 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    Common,
    Present,
    RenderTarget,
    DepthWrite,
    CopyDest,
    CopySource,
    GenericRead,
    VertexAndConstantBuffer,
    IndexBuffer,
    PixelShaderResource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryKind {
    /// GPU-only memory. Written through a copy.
    DeviceLocal,
    /// CPU-visible, write-combined memory.
    Upload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureKind {
    Sampled,
    RenderTarget,
    DepthStencil,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    Color([f32; 4]),
    Depth(f32),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: Format,
    pub kind: TextureKind,
}

/// Placement of one texture's pixels inside a linear staging buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureFootprint {
    pub offset: u64,
    pub width: u32,
    pub height: u32,
    pub format: Format,
    pub row_pitch: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ViewDesc {
    ConstantBuffer { location: u64, size: u32 },
    ShaderResource { format: Format },
    RenderTarget { format: Format },
    DepthStencil { format: Format },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn aspect_ratio(&self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexBufferView {
    pub location: u64,
    pub size: u32,
    pub stride: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexBufferView {
    pub location: u64,
    pub size: u32,
    pub format: Format,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Reached,
    TimedOut,
}

pub trait Backend: Sized + 'static {
    type Device: RenderDevice<Self>;
    type Surface;
    type Resource: GpuResource;
    type DescriptorHeap: DescriptorHeap;
    type CommandAllocator: CommandAllocator;
    type CommandList: CommandList<Self>;
    type Queue: SubmissionQueue<Self>;
    type SwapChain: SwapChain<Self>;
    type RootSignature;
    type PipelineState;
}

pub trait RenderDevice<B: Backend> {
    fn create_descriptor_heap(
        &self,
        kind: DescriptorKind,
        capacity: u32,
        shader_visible: bool,
    ) -> EngineResult<B::DescriptorHeap>;

    fn create_buffer(
        &self,
        memory: MemoryKind,
        size: u64,
        initial_state: ResourceState,
    ) -> EngineResult<B::Resource>;

    fn create_texture_2d(
        &self,
        desc: &TextureDesc,
        initial_state: ResourceState,
        clear: Option<ClearValue>,
    ) -> EngineResult<B::Resource>;

    /// Writes a view record into `dest`. Constant buffer views take no resource.
    fn create_view(&self, resource: Option<&B::Resource>, view: &ViewDesc, dest: CpuDescriptorHandle);

    fn copy_descriptor(
        &self,
        dest: CpuDescriptorHandle,
        src: CpuDescriptorHandle,
        kind: DescriptorKind,
    );

    fn create_command_allocator(&self) -> EngineResult<B::CommandAllocator>;

    /// The returned list is closed.
    fn create_command_list(&self, allocator: &B::CommandAllocator) -> EngineResult<B::CommandList>;

    fn create_command_queue(&self) -> EngineResult<B::Queue>;

    fn create_swap_chain(
        &self,
        queue: &B::Queue,
        surface: &B::Surface,
        width: u32,
        height: u32,
        buffer_count: u32,
    ) -> EngineResult<B::SwapChain>;

    fn create_root_signature(&self, layout: &RootLayout) -> EngineResult<B::RootSignature>;

    fn create_pipeline_state(
        &self,
        root_signature: &B::RootSignature,
        desc: &PipelineDesc,
    ) -> EngineResult<B::PipelineState>;
}

pub trait GpuResource {
    fn size(&self) -> u64;
    fn gpu_address(&self) -> u64;
    /// Maps subresource 0. The pointer stays valid until `unmap`.
    fn map(&self) -> EngineResult<NonNull<u8>>;
    fn unmap(&self);
}

pub trait DescriptorHeap {
    fn kind(&self) -> DescriptorKind;
    fn cpu_start(&self) -> CpuDescriptorHandle;
    /// `None` for heaps that are not shader visible.
    fn gpu_start(&self) -> Option<GpuDescriptorHandle>;
    fn increment_size(&self) -> u32;
}

pub trait CommandAllocator {
    fn reset(&self) -> EngineResult<()>;
}

pub trait CommandList<B: Backend> {
    fn reset(
        &mut self,
        allocator: &B::CommandAllocator,
        pipeline: Option<&B::PipelineState>,
    ) -> EngineResult<()>;
    fn close(&mut self) -> EngineResult<()>;

    fn transition(&mut self, resource: &B::Resource, before: ResourceState, after: ResourceState);
    fn copy_buffer(&mut self, dest: &B::Resource, src: &B::Resource, size: u64);
    fn copy_buffer_to_texture(
        &mut self,
        dest: &B::Resource,
        src: &B::Resource,
        footprint: &TextureFootprint,
    );

    fn set_render_targets(&mut self, rtv: CpuDescriptorHandle, dsv: Option<CpuDescriptorHandle>);
    fn clear_render_target(&mut self, rtv: CpuDescriptorHandle, color: [f32; 4]);
    fn clear_depth(&mut self, dsv: CpuDescriptorHandle, depth: f32);
    /// Sets the viewport and a scissor rect covering it.
    fn set_viewport(&mut self, viewport: &Viewport);

    fn set_root_signature(&mut self, root_signature: &B::RootSignature);
    /// Also selects triangle-list topology.
    fn set_pipeline_state(&mut self, pipeline: &B::PipelineState);
    fn set_descriptor_heaps(&mut self, heaps: &[&B::DescriptorHeap]);
    fn set_root_constant_buffer(&mut self, parameter: u32, location: u64);
    fn set_root_descriptor_table(&mut self, parameter: u32, base: GpuDescriptorHandle);
    fn set_vertex_buffer(&mut self, view: &VertexBufferView);
    fn set_index_buffer(&mut self, view: &IndexBufferView);
    fn draw_indexed(&mut self, index_count: u32);
}

pub trait SubmissionQueue<B: Backend> {
    fn execute(&self, lists: &[&B::CommandList]) -> EngineResult<()>;
    fn signal(&self, value: u64) -> EngineResult<()>;
    fn completed_value(&self) -> u64;
    /// Blocks until the fence reaches `value`. `None` waits forever.
    ///
    /// `Reached` means the completed value is at least `value`, even after an earlier wait
    /// on this queue timed out.
    fn wait_for(&self, value: u64, timeout: Option<Duration>) -> EngineResult<WaitOutcome>;
}

pub trait SwapChain<B: Backend> {
    fn buffer_count(&self) -> u32;
    fn buffer(&self, index: u32) -> EngineResult<B::Resource>;
    fn format(&self) -> Format;
    fn current_back_buffer_index(&self) -> u32;
    fn present(&self, sync_interval: u32) -> EngineResult<()>;
    fn display_info(&self) -> EngineResult<DisplayInfo>;
    fn current_monitor(&self) -> Option<MonitorId>;
}
