use super::D3d12;
use super::objects::D3d12Queue;
use super::objects::D3d12Resource;
use crate::backend::Format;
use crate::backend::SwapChain;
use crate::display::DisplayInfo;
use crate::display::MonitorId;
use crate::error::EngineResult;
use tracing::info;
use tracing::warn;
use windows::Win32::Foundation::*;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;
use windows::Win32::Graphics::Gdi::*;
use windows::core::*;

/// Flip-model scRGB swap chain bound to a window.
pub struct D3d12SwapChain {
    swap_chain: IDXGISwapChain3,
    hwnd: HWND,
    buffer_count: u32,
}

impl D3d12SwapChain {
    pub(super) fn create(
        factory: &IDXGIFactory4,
        queue: &D3d12Queue,
        hwnd: HWND,
        width: u32,
        height: u32,
        buffer_count: u32,
    ) -> EngineResult<Self> {
        let desc = DXGI_SWAP_CHAIN_DESC1 {
            BufferCount: buffer_count,
            Width: width,
            Height: height,
            Format: DXGI_FORMAT_R16G16B16A16_FLOAT,
            BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
            SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            ..Default::default()
        };

        let swap_chain: IDXGISwapChain3 = unsafe {
            factory.CreateSwapChainForHwnd(&queue.queue, hwnd, &desc, None, None::<&IDXGIOutput>)?
        }
        .cast()?;

        // No Alt+Enter fullscreen transitions.
        unsafe { factory.MakeWindowAssociation(hwnd, DXGI_MWA_NO_ALT_ENTER)? };

        let support = unsafe { swap_chain.CheckColorSpaceSupport(DXGI_COLOR_SPACE_RGB_FULL_G10_NONE_P709)? };
        if support & DXGI_SWAP_CHAIN_COLOR_SPACE_SUPPORT_FLAG_PRESENT.0 as u32 != 0 {
            unsafe { swap_chain.SetColorSpace1(DXGI_COLOR_SPACE_RGB_FULL_G10_NONE_P709)? };
        } else {
            warn!("Output cannot present linear scRGB, colors will be clamped");
        }

        info!("Created {}x{} swap chain with {} buffers", width, height, buffer_count);
        Ok(Self {
            swap_chain,
            hwnd,
            buffer_count,
        })
    }
}

impl SwapChain<D3d12> for D3d12SwapChain {
    fn buffer_count(&self) -> u32 {
        self.buffer_count
    }

    fn buffer(&self, index: u32) -> EngineResult<D3d12Resource> {
        let resource: ID3D12Resource = unsafe { self.swap_chain.GetBuffer(index)? };
        let desc = unsafe { resource.GetDesc() };
        let size = desc.Width * desc.Height as u64 * Format::Rgba16Float.bytes_per_pixel() as u64;
        Ok(D3d12Resource { resource, size })
    }

    fn format(&self) -> Format {
        Format::Rgba16Float
    }

    fn current_back_buffer_index(&self) -> u32 {
        unsafe { self.swap_chain.GetCurrentBackBufferIndex() }
    }

    fn present(&self, sync_interval: u32) -> EngineResult<()> {
        unsafe { self.swap_chain.Present(sync_interval, DXGI_PRESENT(0)) }.ok()?;
        Ok(())
    }

    fn display_info(&self) -> EngineResult<DisplayInfo> {
        let output: IDXGIOutput6 = unsafe { self.swap_chain.GetContainingOutput()? }.cast()?;
        let desc = unsafe { output.GetDesc1()? };
        Ok(DisplayInfo {
            hdr_enabled: desc.ColorSpace == DXGI_COLOR_SPACE_RGB_FULL_G2084_NONE_P2020,
            max_luminance: desc.MaxLuminance,
            min_luminance: desc.MinLuminance,
            max_full_frame_luminance: desc.MaxFullFrameLuminance,
            bits_per_color: desc.BitsPerColor,
        })
    }

    fn current_monitor(&self) -> Option<MonitorId> {
        let monitor = unsafe { MonitorFromWindow(self.hwnd, MONITOR_DEFAULTTONULL) };
        (!monitor.is_invalid()).then(|| MonitorId(monitor.0 as isize))
    }
}
