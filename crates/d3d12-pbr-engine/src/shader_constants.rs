//! CPU mirrors of the HLSL constant buffers.
//!
//! glam stores matrices column-major, which is what HLSL's default `cbuffer` packing expects,
//! so matrices are uploaded without a transpose.

use bytemuck::Pod;
use bytemuck::Zeroable;
use glam::Mat4;
use glam::Vec3;
use glam::Vec4;

/// `b0`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SceneConstants {
    pub view: Mat4,
    pub projection: Mat4,
    pub camera_position: Vec3,
    pub time: f32,
}

impl Default for SceneConstants {
    fn default() -> Self {
        let eye = Vec3::new(0.0, 0.0, -5.0);
        Self {
            view: Mat4::look_at_lh(eye, Vec3::ZERO, Vec3::Y),
            projection: Mat4::perspective_lh(45f32.to_radians(), 16.0 / 9.0, 1.0, 1000.0),
            camera_position: eye,
            time: 0.0,
        }
    }
}

/// `b1`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct TransformConstants {
    pub world: Mat4,
    pub world_inverse: Mat4,
}

impl TransformConstants {
    pub fn from_world(world: Mat4) -> Self {
        // A near-singular world matrix has no usable inverse.
        let world_inverse = if world.determinant().abs() <= f32::EPSILON {
            Mat4::IDENTITY
        } else {
            world.inverse()
        };
        Self {
            world,
            world_inverse,
        }
    }
}

impl Default for TransformConstants {
    fn default() -> Self {
        Self::from_world(Mat4::IDENTITY)
    }
}

/// `b2`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MaterialConstants {
    pub base_color: Vec4,
    pub emissive: Vec3,
    pub metallic: f32,
    pub roughness: f32,
    pub occlusion: f32,
    pub _padding: [f32; 2],
}

impl Default for MaterialConstants {
    fn default() -> Self {
        Self {
            base_color: Vec4::ONE,
            emissive: Vec3::ZERO,
            metallic: 0.0,
            roughness: 0.5,
            occlusion: 1.0,
            _padding: [0.0; 2],
        }
    }
}

/// `b3`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LightingConstants {
    pub light_direction: Vec3,
    pub light_intensity: f32,
    pub light_color: Vec4,
    pub ambient_color: Vec3,
    pub ambient_intensity: f32,
}

impl Default for LightingConstants {
    fn default() -> Self {
        Self {
            light_direction: Vec3::new(0.0, -1.0, 0.0),
            light_intensity: 2.0,
            light_color: Vec4::ONE,
            ambient_color: Vec3::splat(0.2),
            ambient_intensity: 0.5,
        }
    }
}

/// `b4`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct DisplayConstants {
    pub max_luminance: f32,
    pub min_luminance: f32,
    pub paper_white_nits: f32,
    pub max_full_frame_luminance: f32,
}

impl Default for DisplayConstants {
    fn default() -> Self {
        crate::display::DisplayInfo::sdr().constants()
    }
}
