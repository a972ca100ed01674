//! Direct3D 12 and DXGI.

mod convert;
mod device;
mod objects;
mod pipeline;
mod shader;
mod swap_chain;

pub use device::D3d12Device;
pub use device::DeviceOptions;
pub use objects::D3d12Allocator;
pub use objects::D3d12CommandList;
pub use objects::D3d12Heap;
pub use objects::D3d12Queue;
pub use objects::D3d12Resource;
pub use pipeline::D3d12Pipeline;
pub use pipeline::D3d12RootSignature;
pub use shader::compile_shader;
pub use swap_chain::D3d12SwapChain;

use crate::backend::Backend;
use windows::Win32::Foundation::HWND;

pub struct D3d12;

impl Backend for D3d12 {
    type Device = D3d12Device;
    type Surface = HWND;
    type Resource = D3d12Resource;
    type DescriptorHeap = D3d12Heap;
    type CommandAllocator = D3d12Allocator;
    type CommandList = D3d12CommandList;
    type Queue = D3d12Queue;
    type SwapChain = D3d12SwapChain;
    type RootSignature = D3d12RootSignature;
    type PipelineState = D3d12Pipeline;
}
