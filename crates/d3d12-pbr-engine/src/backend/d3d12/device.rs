use super::D3d12;
use super::convert::buffer_desc;
use super::convert::dxgi_format;
use super::convert::heap_properties;
use super::convert::heap_type;
use super::convert::resource_state;
use super::objects::D3d12Allocator;
use super::objects::D3d12CommandList;
use super::objects::D3d12Heap;
use super::objects::D3d12Queue;
use super::objects::D3d12Resource;
use super::pipeline::D3d12Pipeline;
use super::pipeline::D3d12RootSignature;
use super::swap_chain::D3d12SwapChain;
use crate::backend::ClearValue;
use crate::backend::CpuDescriptorHandle;
use crate::backend::DescriptorKind;
use crate::backend::MemoryKind;
use crate::backend::RenderDevice;
use crate::backend::ResourceState;
use crate::backend::TextureDesc;
use crate::backend::TextureKind;
use crate::backend::ViewDesc;
use crate::error::EngineResult;
use crate::error::GpuError;
use crate::pipeline::PipelineDesc;
use crate::pipeline::RootLayout;
use tracing::debug;
use tracing::info;
use tracing::warn;
use windows::Win32::Foundation::*;
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;
use windows::core::*;

#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceOptions {
    pub use_warp_device: bool,
    /// Enables the D3D12 debug layer with GPU based validation and the DXGI info queue.
    pub debug_layer: bool,
}

impl DeviceOptions {
    pub fn from_build() -> Self {
        Self {
            use_warp_device: false,
            debug_layer: cfg!(debug_assertions),
        }
    }
}

pub struct D3d12Device {
    pub(super) factory: IDXGIFactory4,
    pub(super) device: ID3D12Device,
    info_queue: Option<IDXGIInfoQueue>,
}

fn get_hardware_adapter(factory: &IDXGIFactory4) -> Result<IDXGIAdapter1> {
    for i in 0.. {
        let adapter = match unsafe { factory.EnumAdapters1(i) } {
            Ok(adapter) => adapter,
            Err(e) if e.code() == DXGI_ERROR_NOT_FOUND => break,
            Err(e) => return Err(e),
        };
        let desc = unsafe { adapter.GetDesc1()? };

        if (DXGI_ADAPTER_FLAG(desc.Flags as i32) & DXGI_ADAPTER_FLAG_SOFTWARE) != DXGI_ADAPTER_FLAG_NONE
        {
            continue;
        }

        // Probe without keeping the device.
        if unsafe {
            D3D12CreateDevice(
                &adapter,
                D3D_FEATURE_LEVEL_11_0,
                std::ptr::null_mut::<Option<ID3D12Device>>(),
            )
        }
        .is_ok()
        {
            let name = String::from_utf16_lossy(&desc.Description);
            info!("Using adapter {}", name.trim_end_matches('\0'));
            return Ok(adapter);
        }
    }

    Err(Error::new(
        DXGI_ERROR_NOT_FOUND,
        "No hardware adapter supports Direct3D 12",
    ))
}

fn enable_debug_layer() {
    unsafe {
        let mut debug1: Option<ID3D12Debug1> = None;
        if D3D12GetDebugInterface(&mut debug1).is_ok() {
            if let Some(debug1) = debug1 {
                debug1.EnableDebugLayer();
                debug1.SetEnableGPUBasedValidation(true);
                info!("D3D12 debug layer enabled with GPU based validation");
                return;
            }
        }
        let mut debug: Option<ID3D12Debug> = None;
        if D3D12GetDebugInterface(&mut debug).is_ok() {
            if let Some(debug) = debug {
                debug.EnableDebugLayer();
                info!("D3D12 debug layer enabled");
                return;
            }
        }
        warn!("D3D12 debug layer is not available");
    }
}

impl D3d12Device {
    pub fn create(options: DeviceOptions) -> EngineResult<Self> {
        let mut factory_flags = DXGI_CREATE_FACTORY_FLAGS(0);
        let mut info_queue = None;
        if options.debug_layer {
            enable_debug_layer();
            factory_flags = DXGI_CREATE_FACTORY_DEBUG;
            match unsafe { DXGIGetDebugInterface1::<IDXGIInfoQueue>(0) } {
                Ok(queue) => info_queue = Some(queue),
                Err(e) => warn!("DXGI info queue unavailable: {}", e.message()),
            }
        }

        let factory: IDXGIFactory4 = unsafe { CreateDXGIFactory2(factory_flags)? };

        let adapter: IDXGIAdapter = if options.use_warp_device {
            info!("Using the WARP adapter");
            unsafe { factory.EnumWarpAdapter()? }
        } else {
            get_hardware_adapter(&factory)?.cast()?
        };

        let mut device: Option<ID3D12Device> = None;
        unsafe { D3D12CreateDevice(&adapter, D3D_FEATURE_LEVEL_11_0, &mut device)? };
        let device = device.ok_or(GpuError::InvalidArgument("D3D12CreateDevice returned no device"))?;

        Ok(Self {
            factory,
            device,
            info_queue,
        })
    }

    pub fn raw(&self) -> &ID3D12Device {
        &self.device
    }

    /// Logs and clears everything the DXGI info queue has collected.
    pub fn drain_debug_messages(&self) {
        let Some(queue) = &self.info_queue else {
            return;
        };
        let count = unsafe { queue.GetNumStoredMessages(DXGI_DEBUG_ALL) };
        for i in 0..count {
            let mut size: usize = 0;
            if unsafe { queue.GetMessage(DXGI_DEBUG_ALL, i, None, &mut size) }.is_err() {
                warn!("Could not size debug message {}", i);
                continue;
            }

            // u64 backing keeps the message header aligned.
            let mut buffer = vec![0u64; size.div_ceil(8)];
            let message = buffer.as_mut_ptr() as *mut DXGI_INFO_QUEUE_MESSAGE;
            if unsafe { queue.GetMessage(DXGI_DEBUG_ALL, i, Some(message), &mut size) }.is_err() {
                warn!("Could not read debug message {}", i);
                continue;
            }
            let (severity, id, description) = unsafe {
                let message = &*message;
                let description = std::slice::from_raw_parts(
                    message.pDescription as *const u8,
                    message.DescriptionByteLength,
                );
                (
                    message.Severity,
                    message.ID,
                    String::from_utf8_lossy(description)
                        .trim_end_matches('\0')
                        .trim()
                        .to_string(),
                )
            };
            let severity = match severity {
                DXGI_INFO_QUEUE_MESSAGE_SEVERITY_CORRUPTION => "CORRUPTION",
                DXGI_INFO_QUEUE_MESSAGE_SEVERITY_ERROR => "ERROR",
                DXGI_INFO_QUEUE_MESSAGE_SEVERITY_WARNING => "WARNING",
                DXGI_INFO_QUEUE_MESSAGE_SEVERITY_INFO => "INFO",
                DXGI_INFO_QUEUE_MESSAGE_SEVERITY_MESSAGE => "MESSAGE",
                _ => "UNKNOWN",
            };
            warn!("DXGI [{} {}] {}", severity, id, description);
        }
        unsafe { queue.ClearStoredMessages(DXGI_DEBUG_ALL) };
    }

    fn committed_resource(
        &self,
        heap: D3D12_HEAP_TYPE,
        desc: &D3D12_RESOURCE_DESC,
        state: ResourceState,
        clear: Option<&D3D12_CLEAR_VALUE>,
    ) -> EngineResult<ID3D12Resource> {
        let mut resource: Option<ID3D12Resource> = None;
        let result = unsafe {
            self.device.CreateCommittedResource(
                &heap_properties(heap),
                D3D12_HEAP_FLAG_NONE,
                desc,
                resource_state(state),
                clear.map(|c| c as *const _),
                &mut resource,
            )
        };
        match result {
            Err(e) if e.code() == E_OUTOFMEMORY => Err(GpuError::OutOfDeviceMemory.into()),
            Err(e) => Err(e.into()),
            Ok(()) => Ok(resource.ok_or(GpuError::OutOfDeviceMemory)?),
        }
    }
}

impl RenderDevice<D3d12> for D3d12Device {
    fn create_descriptor_heap(
        &self,
        kind: DescriptorKind,
        capacity: u32,
        shader_visible: bool,
    ) -> EngineResult<D3d12Heap> {
        let flags = if shader_visible {
            D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE
        } else {
            D3D12_DESCRIPTOR_HEAP_FLAG_NONE
        };
        let heap: ID3D12DescriptorHeap = unsafe {
            self.device.CreateDescriptorHeap(&D3D12_DESCRIPTOR_HEAP_DESC {
                Type: heap_type(kind),
                NumDescriptors: capacity,
                Flags: flags,
                NodeMask: 0,
            })?
        };
        let increment = unsafe { self.device.GetDescriptorHandleIncrementSize(heap_type(kind)) };
        debug!("Created {:?} heap of {} descriptors", kind, capacity);
        Ok(D3d12Heap {
            heap,
            kind,
            increment,
            shader_visible,
        })
    }

    fn create_buffer(
        &self,
        memory: MemoryKind,
        size: u64,
        initial_state: ResourceState,
    ) -> EngineResult<D3d12Resource> {
        if size == 0 {
            return Err(GpuError::InvalidArgument("buffer size is zero").into());
        }
        let heap = match memory {
            MemoryKind::DeviceLocal => D3D12_HEAP_TYPE_DEFAULT,
            MemoryKind::Upload => D3D12_HEAP_TYPE_UPLOAD,
        };
        let resource = self.committed_resource(heap, &buffer_desc(size), initial_state, None)?;
        Ok(D3d12Resource { resource, size })
    }

    fn create_texture_2d(
        &self,
        desc: &TextureDesc,
        initial_state: ResourceState,
        clear: Option<ClearValue>,
    ) -> EngineResult<D3d12Resource> {
        let flags = match desc.kind {
            TextureKind::Sampled => D3D12_RESOURCE_FLAG_NONE,
            TextureKind::RenderTarget => D3D12_RESOURCE_FLAG_ALLOW_RENDER_TARGET,
            TextureKind::DepthStencil => D3D12_RESOURCE_FLAG_ALLOW_DEPTH_STENCIL,
        };
        let format = dxgi_format(desc.format);
        let resource_desc = D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION_TEXTURE2D,
            Alignment: 0,
            Width: desc.width as u64,
            Height: desc.height,
            DepthOrArraySize: 1,
            MipLevels: 1,
            Format: format,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Layout: D3D12_TEXTURE_LAYOUT_UNKNOWN,
            Flags: flags,
        };
        let clear = clear.map(|clear| match clear {
            ClearValue::Color(color) => D3D12_CLEAR_VALUE {
                Format: format,
                Anonymous: D3D12_CLEAR_VALUE_0 { Color: color },
            },
            ClearValue::Depth(depth) => D3D12_CLEAR_VALUE {
                Format: format,
                Anonymous: D3D12_CLEAR_VALUE_0 {
                    DepthStencil: D3D12_DEPTH_STENCIL_VALUE {
                        Depth: depth,
                        Stencil: 0,
                    },
                },
            },
        });
        let resource = self.committed_resource(
            D3D12_HEAP_TYPE_DEFAULT,
            &resource_desc,
            initial_state,
            clear.as_ref(),
        )?;
        let size = desc.width as u64 * desc.height as u64 * desc.format.bytes_per_pixel() as u64;
        Ok(D3d12Resource { resource, size })
    }

    fn create_view(&self, resource: Option<&D3d12Resource>, view: &ViewDesc, dest: CpuDescriptorHandle) {
        let dest = D3D12_CPU_DESCRIPTOR_HANDLE { ptr: dest.0 };
        let resource = resource.map(|r| &r.resource);
        unsafe {
            match *view {
                ViewDesc::ConstantBuffer { location, size } => {
                    let desc = D3D12_CONSTANT_BUFFER_VIEW_DESC {
                        BufferLocation: location,
                        SizeInBytes: size,
                    };
                    self.device.CreateConstantBufferView(Some(&desc), dest);
                }
                ViewDesc::ShaderResource { format } => {
                    let desc = D3D12_SHADER_RESOURCE_VIEW_DESC {
                        Format: dxgi_format(format),
                        ViewDimension: D3D12_SRV_DIMENSION_TEXTURE2D,
                        Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
                        Anonymous: D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                            Texture2D: D3D12_TEX2D_SRV {
                                MostDetailedMip: 0,
                                MipLevels: 1,
                                PlaneSlice: 0,
                                ResourceMinLODClamp: 0.0,
                            },
                        },
                    };
                    self.device.CreateShaderResourceView(resource, Some(&desc), dest);
                }
                ViewDesc::RenderTarget { format } => {
                    let desc = D3D12_RENDER_TARGET_VIEW_DESC {
                        Format: dxgi_format(format),
                        ViewDimension: D3D12_RTV_DIMENSION_TEXTURE2D,
                        Anonymous: D3D12_RENDER_TARGET_VIEW_DESC_0 {
                            Texture2D: D3D12_TEX2D_RTV {
                                MipSlice: 0,
                                PlaneSlice: 0,
                            },
                        },
                    };
                    self.device.CreateRenderTargetView(resource, Some(&desc), dest);
                }
                ViewDesc::DepthStencil { format } => {
                    let desc = D3D12_DEPTH_STENCIL_VIEW_DESC {
                        Format: dxgi_format(format),
                        ViewDimension: D3D12_DSV_DIMENSION_TEXTURE2D,
                        Flags: D3D12_DSV_FLAG_NONE,
                        Anonymous: D3D12_DEPTH_STENCIL_VIEW_DESC_0 {
                            Texture2D: D3D12_TEX2D_DSV { MipSlice: 0 },
                        },
                    };
                    self.device.CreateDepthStencilView(resource, Some(&desc), dest);
                }
            }
        }
    }

    fn copy_descriptor(&self, dest: CpuDescriptorHandle, src: CpuDescriptorHandle, kind: DescriptorKind) {
        unsafe {
            self.device.CopyDescriptorsSimple(
                1,
                D3D12_CPU_DESCRIPTOR_HANDLE { ptr: dest.0 },
                D3D12_CPU_DESCRIPTOR_HANDLE { ptr: src.0 },
                heap_type(kind),
            );
        }
    }

    fn create_command_allocator(&self) -> EngineResult<D3d12Allocator> {
        let allocator = unsafe {
            self.device
                .CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT)?
        };
        Ok(D3d12Allocator { allocator })
    }

    fn create_command_list(&self, allocator: &D3d12Allocator) -> EngineResult<D3d12CommandList> {
        let list: ID3D12GraphicsCommandList = unsafe {
            self.device.CreateCommandList(
                0,
                D3D12_COMMAND_LIST_TYPE_DIRECT,
                &allocator.allocator,
                None::<&ID3D12PipelineState>,
            )?
        };
        unsafe { list.Close()? };
        Ok(D3d12CommandList { list })
    }

    fn create_command_queue(&self) -> EngineResult<D3d12Queue> {
        D3d12Queue::create(&self.device)
    }

    fn create_swap_chain(
        &self,
        queue: &D3d12Queue,
        surface: &HWND,
        width: u32,
        height: u32,
        buffer_count: u32,
    ) -> EngineResult<D3d12SwapChain> {
        D3d12SwapChain::create(&self.factory, queue, *surface, width, height, buffer_count)
    }

    fn create_root_signature(&self, layout: &RootLayout) -> EngineResult<D3d12RootSignature> {
        D3d12RootSignature::create(&self.device, layout)
    }

    fn create_pipeline_state(
        &self,
        root_signature: &D3d12RootSignature,
        desc: &PipelineDesc,
    ) -> EngineResult<D3d12Pipeline> {
        D3d12Pipeline::create(&self.device, root_signature, desc)
    }
}
