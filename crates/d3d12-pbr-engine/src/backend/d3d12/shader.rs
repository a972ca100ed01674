use super::pipeline::blob_bytes;
use crate::error::EngineResult;
use crate::error::GpuError;
use crate::pipeline::ShaderBytecode;
use std::ffi::CString;
use std::path::Path;
use tracing::error;
use tracing::info;
use windows::Win32::Graphics::Direct3D::Fxc::*;
use windows::core::*;

/// Compiles one entry point of an HLSL file with Fxc.
pub fn compile_shader(hlsl_path: &Path, entry_point: &str, target: &str) -> EngineResult<ShaderBytecode> {
    if !hlsl_path.is_file() {
        return Err(GpuError::ShaderMissing(hlsl_path.to_path_buf()).into());
    }
    let flags = if cfg!(debug_assertions) {
        D3DCOMPILE_DEBUG | D3DCOMPILE_SKIP_OPTIMIZATION
    } else {
        D3DCOMPILE_OPTIMIZATION_LEVEL3
    };
    let entry = CString::new(entry_point).map_err(|_| GpuError::InvalidArgument("entry point contains a NUL byte"))?;
    let profile = CString::new(target).map_err(|_| GpuError::InvalidArgument("shader target contains a NUL byte"))?;
    let path = HSTRING::from(hlsl_path.as_os_str());

    let mut shader_blob = None;
    let mut error_blob = None;
    let result = unsafe {
        D3DCompileFromFile(
            &path,
            None,
            None,
            PCSTR(entry.as_ptr() as *const u8),
            PCSTR(profile.as_ptr() as *const u8),
            flags,
            0,
            &mut shader_blob,
            Some(&mut error_blob),
        )
    };

    if let Err(e) = result {
        let message = error_blob
            .as_ref()
            .map(|blob| String::from_utf8_lossy(blob_bytes(blob)).trim_end_matches('\0').to_string())
            .unwrap_or_else(|| e.message());
        error!("Shader compile error ({} {}): {}", entry_point, target, message);
        return Err(GpuError::PipelineRejected(message).into());
    }
    let blob = shader_blob.ok_or_else(|| GpuError::PipelineRejected(format!("{} produced no bytecode", entry_point)))?;
    info!("Compiled {} ({}) from {}", entry_point, target, hlsl_path.display());
    Ok(ShaderBytecode::from_bytes(hlsl_path, blob_bytes(&blob).to_vec()))
}
