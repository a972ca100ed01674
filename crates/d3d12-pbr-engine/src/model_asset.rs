//! CPU-side model data handed over by an importer.

use crate::backend::Format;
use crate::pipeline::VertexAttribute;
use bytemuck::Pod;
use bytemuck::Zeroable;
use glam::Vec3;
use glam::Vec4;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct StandardVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub tangent: [f32; 3],
    pub texcoord: [f32; 2],
    pub color: [f32; 4],
}

impl StandardVertex {
    pub const STRIDE: u32 = std::mem::size_of::<StandardVertex>() as u32;

    pub const LAYOUT: &'static [VertexAttribute] = &[
        VertexAttribute {
            semantic: "POSITION",
            format: Format::Rgb32Float,
            offset: 0,
        },
        VertexAttribute {
            semantic: "NORMAL",
            format: Format::Rgb32Float,
            offset: 12,
        },
        VertexAttribute {
            semantic: "TANGENT",
            format: Format::Rgb32Float,
            offset: 24,
        },
        VertexAttribute {
            semantic: "TEXCOORD",
            format: Format::Rg32Float,
            offset: 36,
        },
        VertexAttribute {
            semantic: "COLOR",
            format: Format::Rgba32Float,
            offset: 44,
        },
    ];
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshAsset {
    pub vertices: Vec<StandardVertex>,
    pub indices: Vec<u32>,
    pub material_id: u32,
}

/// Index into [`ModelAsset::images`].
pub type ImageIndex = usize;

#[derive(Debug, Clone, PartialEq)]
pub struct MaterialAsset {
    pub name: String,
    pub base_color: Vec4,
    pub metallic: f32,
    pub roughness: f32,
    pub emissive: Vec3,
    pub occlusion: f32,
    pub base_color_texture: Option<ImageIndex>,
    pub metallic_roughness_texture: Option<ImageIndex>,
    pub normal_texture: Option<ImageIndex>,
    pub emissive_texture: Option<ImageIndex>,
    pub occlusion_texture: Option<ImageIndex>,
}

impl Default for MaterialAsset {
    fn default() -> Self {
        Self {
            name: String::new(),
            base_color: Vec4::ONE,
            metallic: 0.0,
            roughness: 0.5,
            emissive: Vec3::ZERO,
            occlusion: 1.0,
            base_color_texture: None,
            metallic_roughness_texture: None,
            normal_texture: None,
            emissive_texture: None,
            occlusion_texture: None,
        }
    }
}

/// Encoded image bytes as embedded in the source file.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageAsset {
    pub bytes: Vec<u8>,
    /// Extension-style tag such as `"png"` or `"jpg"`.
    pub format: String,
    pub srgb: bool,
}

impl ImageAsset {
    pub fn is_valid(&self) -> bool {
        !self.bytes.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelAsset {
    pub name: String,
    pub meshes: Vec<MeshAsset>,
    pub materials: Vec<MaterialAsset>,
    pub images: Vec<ImageAsset>,
}

impl ModelAsset {
    pub fn is_valid(&self) -> bool {
        !self.meshes.is_empty()
    }

    /// A UV sphere with one default material, tangents along +U.
    pub fn uv_sphere(radius: f32, slices: u32, stacks: u32) -> Self {
        let slices = slices.max(3);
        let stacks = stacks.max(2);
        let mut vertices = Vec::with_capacity(((slices + 1) * (stacks + 1)) as usize);
        for stack in 0..=stacks {
            let v = stack as f32 / stacks as f32;
            let phi = v * std::f32::consts::PI;
            for slice in 0..=slices {
                let u = slice as f32 / slices as f32;
                let theta = u * std::f32::consts::TAU;
                let normal = Vec3::new(phi.sin() * theta.cos(), phi.cos(), phi.sin() * theta.sin());
                let tangent = Vec3::new(-theta.sin(), 0.0, theta.cos());
                vertices.push(StandardVertex {
                    position: (normal * radius).to_array(),
                    normal: normal.to_array(),
                    tangent: tangent.to_array(),
                    texcoord: [u, v],
                    color: [1.0; 4],
                });
            }
        }
        let row = slices + 1;
        let mut indices = Vec::with_capacity((slices * stacks * 6) as usize);
        for stack in 0..stacks {
            for slice in 0..slices {
                let a = stack * row + slice;
                let b = a + row;
                indices.extend_from_slice(&[a, a + 1, b, b, a + 1, b + 1]);
            }
        }
        Self {
            name: "uv_sphere".into(),
            meshes: vec![MeshAsset {
                vertices,
                indices,
                material_id: 0,
            }],
            materials: vec![MaterialAsset {
                name: "default".into(),
                ..Default::default()
            }],
            images: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_the_struct() {
        assert_eq!(StandardVertex::STRIDE, 60);
        let last = StandardVertex::LAYOUT.last().unwrap();
        assert_eq!(last.offset + last.format.bytes_per_pixel(), StandardVertex::STRIDE);
    }

    #[test]
    fn sphere_indices_stay_in_bounds() {
        let model = ModelAsset::uv_sphere(1.0, 16, 8);
        let mesh = &model.meshes[0];
        assert_eq!(mesh.indices.len(), 16 * 8 * 6);
        assert!(mesh.indices.iter().all(|i| (*i as usize) < mesh.vertices.len()));
        assert!(model.is_valid());
    }
}
