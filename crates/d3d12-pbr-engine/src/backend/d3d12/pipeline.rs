use super::convert::dxgi_format;
use crate::backend::Format;
use crate::error::EngineResult;
use crate::error::GpuError;
use crate::pipeline::PipelineDesc;
use crate::pipeline::RootLayout;
use crate::pipeline::RootParameter;
use std::ffi::CString;
use tracing::debug;
use tracing::error;
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::core::*;

pub struct D3d12RootSignature {
    pub(super) root_signature: ID3D12RootSignature,
}

pub struct D3d12Pipeline {
    pub(super) pipeline: ID3D12PipelineState,
}

pub(super) fn blob_bytes(blob: &ID3DBlob) -> &[u8] {
    unsafe { std::slice::from_raw_parts(blob.GetBufferPointer() as *const u8, blob.GetBufferSize()) }
}

impl D3d12RootSignature {
    pub(super) fn create(device: &ID3D12Device, layout: &RootLayout) -> EngineResult<Self> {
        // Ranges must outlive serialization; parameters point into this.
        let ranges: Vec<D3D12_DESCRIPTOR_RANGE> = layout
            .parameters
            .iter()
            .filter_map(|parameter| match *parameter {
                RootParameter::ShaderResourceTable {
                    base_register,
                    count,
                } => Some(D3D12_DESCRIPTOR_RANGE {
                    RangeType: D3D12_DESCRIPTOR_RANGE_TYPE_SRV,
                    NumDescriptors: count,
                    BaseShaderRegister: base_register,
                    RegisterSpace: 0,
                    OffsetInDescriptorsFromTableStart: D3D12_DESCRIPTOR_RANGE_OFFSET_APPEND,
                }),
                RootParameter::ConstantBuffer { .. } => None,
            })
            .collect();

        let mut next_range = ranges.iter();
        let parameters: Vec<D3D12_ROOT_PARAMETER> = layout
            .parameters
            .iter()
            .map(|parameter| match *parameter {
                RootParameter::ConstantBuffer { register } => D3D12_ROOT_PARAMETER {
                    ParameterType: D3D12_ROOT_PARAMETER_TYPE_CBV,
                    Anonymous: D3D12_ROOT_PARAMETER_0 {
                        Descriptor: D3D12_ROOT_DESCRIPTOR {
                            ShaderRegister: register,
                            RegisterSpace: 0,
                        },
                    },
                    ShaderVisibility: D3D12_SHADER_VISIBILITY_ALL,
                },
                RootParameter::ShaderResourceTable { .. } => D3D12_ROOT_PARAMETER {
                    ParameterType: D3D12_ROOT_PARAMETER_TYPE_DESCRIPTOR_TABLE,
                    Anonymous: D3D12_ROOT_PARAMETER_0 {
                        DescriptorTable: D3D12_ROOT_DESCRIPTOR_TABLE {
                            NumDescriptorRanges: 1,
                            pDescriptorRanges: next_range
                                .next()
                                .map_or(std::ptr::null(), |range| range as *const _),
                        },
                    },
                    ShaderVisibility: D3D12_SHADER_VISIBILITY_PIXEL,
                },
            })
            .collect();

        let samplers: Vec<D3D12_STATIC_SAMPLER_DESC> = (0..layout.static_samplers)
            .map(|register| D3D12_STATIC_SAMPLER_DESC {
                Filter: D3D12_FILTER_MIN_MAG_MIP_LINEAR,
                AddressU: D3D12_TEXTURE_ADDRESS_MODE_WRAP,
                AddressV: D3D12_TEXTURE_ADDRESS_MODE_WRAP,
                AddressW: D3D12_TEXTURE_ADDRESS_MODE_WRAP,
                MipLODBias: 0.0,
                MaxAnisotropy: 0,
                ComparisonFunc: D3D12_COMPARISON_FUNC_NEVER,
                BorderColor: D3D12_STATIC_BORDER_COLOR_TRANSPARENT_BLACK,
                MinLOD: 0.0,
                MaxLOD: D3D12_FLOAT32_MAX,
                ShaderRegister: register,
                RegisterSpace: 0,
                ShaderVisibility: D3D12_SHADER_VISIBILITY_PIXEL,
            })
            .collect();

        let desc = D3D12_ROOT_SIGNATURE_DESC {
            NumParameters: parameters.len() as u32,
            pParameters: parameters.as_ptr(),
            NumStaticSamplers: samplers.len() as u32,
            pStaticSamplers: samplers.as_ptr(),
            Flags: D3D12_ROOT_SIGNATURE_FLAG_ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT,
        };

        let mut signature_blob = None;
        let mut error_blob = None;
        let serialized = unsafe {
            D3D12SerializeRootSignature(
                &desc,
                D3D_ROOT_SIGNATURE_VERSION_1,
                &mut signature_blob,
                Some(&mut error_blob),
            )
        };
        if let Err(e) = serialized {
            let message = error_blob
                .as_ref()
                .map(|blob| String::from_utf8_lossy(blob_bytes(blob)).trim_end_matches('\0').to_string())
                .unwrap_or_else(|| e.message());
            error!("Root signature serialization failed: {}", message);
            return Err(GpuError::PipelineRejected(message).into());
        }
        let signature_blob = signature_blob
            .ok_or_else(|| GpuError::PipelineRejected("root signature serialized to nothing".into()))?;

        let root_signature = unsafe { device.CreateRootSignature(0, blob_bytes(&signature_blob))? };
        debug!(
            "Created root signature with {} parameters",
            layout.parameters.len()
        );
        Ok(Self { root_signature })
    }
}

impl D3d12Pipeline {
    pub(super) fn create(
        device: &ID3D12Device,
        root_signature: &D3d12RootSignature,
        desc: &PipelineDesc,
    ) -> EngineResult<Self> {
        let semantics = desc
            .input_layout
            .iter()
            .map(|attribute| CString::new(attribute.semantic))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| GpuError::InvalidArgument("vertex semantic contains a NUL byte"))?;
        let input_element_descs: Vec<D3D12_INPUT_ELEMENT_DESC> = desc
            .input_layout
            .iter()
            .zip(&semantics)
            .map(|(attribute, semantic)| D3D12_INPUT_ELEMENT_DESC {
                SemanticName: PCSTR(semantic.as_ptr() as *const u8),
                SemanticIndex: 0,
                Format: dxgi_format(attribute.format),
                InputSlot: 0,
                AlignedByteOffset: attribute.offset,
                InputSlotClass: D3D12_INPUT_CLASSIFICATION_PER_VERTEX_DATA,
                InstanceDataStepRate: 0,
            })
            .collect();

        let mut rtv_formats = [DXGI_FORMAT_UNKNOWN; 8];
        rtv_formats[0] = dxgi_format(desc.render_target_format);
        let depth_enabled = desc.depth_format != Format::Unknown;

        let pso_desc = D3D12_GRAPHICS_PIPELINE_STATE_DESC {
            pRootSignature: unsafe { std::mem::transmute_copy(&root_signature.root_signature) },
            VS: D3D12_SHADER_BYTECODE {
                pShaderBytecode: desc.vertex_shader.bytes.as_ptr() as *const _,
                BytecodeLength: desc.vertex_shader.bytes.len(),
            },
            PS: D3D12_SHADER_BYTECODE {
                pShaderBytecode: desc.pixel_shader.bytes.as_ptr() as *const _,
                BytecodeLength: desc.pixel_shader.bytes.len(),
            },
            InputLayout: D3D12_INPUT_LAYOUT_DESC {
                pInputElementDescs: input_element_descs.as_ptr(),
                NumElements: input_element_descs.len() as u32,
            },
            RasterizerState: D3D12_RASTERIZER_DESC {
                FillMode: D3D12_FILL_MODE_SOLID,
                CullMode: if desc.cull_back_faces {
                    D3D12_CULL_MODE_BACK
                } else {
                    D3D12_CULL_MODE_NONE
                },
                DepthClipEnable: true.into(),
                ..Default::default()
            },
            BlendState: D3D12_BLEND_DESC {
                AlphaToCoverageEnable: false.into(),
                IndependentBlendEnable: false.into(),
                RenderTarget: [D3D12_RENDER_TARGET_BLEND_DESC {
                    BlendEnable: false.into(),
                    LogicOpEnable: false.into(),
                    SrcBlend: D3D12_BLEND_ONE,
                    DestBlend: D3D12_BLEND_ZERO,
                    BlendOp: D3D12_BLEND_OP_ADD,
                    SrcBlendAlpha: D3D12_BLEND_ONE,
                    DestBlendAlpha: D3D12_BLEND_ZERO,
                    BlendOpAlpha: D3D12_BLEND_OP_ADD,
                    LogicOp: D3D12_LOGIC_OP_NOOP,
                    RenderTargetWriteMask: D3D12_COLOR_WRITE_ENABLE_ALL.0 as u8,
                }; 8],
            },
            DepthStencilState: D3D12_DEPTH_STENCIL_DESC {
                DepthEnable: depth_enabled.into(),
                DepthWriteMask: D3D12_DEPTH_WRITE_MASK_ALL,
                DepthFunc: D3D12_COMPARISON_FUNC_LESS,
                StencilEnable: false.into(),
                ..Default::default()
            },
            DSVFormat: dxgi_format(desc.depth_format),
            SampleMask: u32::MAX,
            PrimitiveTopologyType: D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE,
            NumRenderTargets: 1,
            RTVFormats: rtv_formats,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            ..Default::default()
        };

        let pipeline = unsafe { device.CreateGraphicsPipelineState(&pso_desc) }.map_err(|e| {
            GpuError::PipelineRejected(format!(
                "{} with {} and {}",
                e.message(),
                desc.vertex_shader.path.display(),
                desc.pixel_shader.path.display()
            ))
        })?;
        Ok(Self { pipeline })
    }
}
