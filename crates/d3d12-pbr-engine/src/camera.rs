use glam::Mat4;
use glam::Vec3;

/// Left-handed perspective camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    /// Vertical field of view in radians.
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, -5.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov_y: 45f32.to_radians(),
            aspect: 16.0 / 9.0,
            near: 1.0,
            far: 1000.0,
        }
    }
}

impl Camera {
    pub fn view(&self) -> Mat4 {
        Mat4::look_at_lh(self.position, self.target, self.up)
    }

    pub fn projection(&self) -> Mat4 {
        Mat4::perspective_lh(self.fov_y, self.aspect, self.near, self.far)
    }

    /// Ignores degenerate sizes such as a minimized window.
    pub fn set_viewport(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.aspect = width as f32 / height as f32;
        }
    }

    /// Rotates the eye about the target's vertical axis.
    pub fn orbit(&mut self, radians: f32) {
        let offset = self.position - self.target;
        self.position = self.target + glam::Quat::from_rotation_y(radians) * offset;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_lands_in_front_of_the_eye() {
        let camera = Camera::default();
        let clip = camera.projection() * camera.view() * camera.target.extend(1.0);
        let ndc = clip / clip.w;
        assert!(ndc.x.abs() < 1e-5 && ndc.y.abs() < 1e-5);
        assert!(ndc.z > 0.0 && ndc.z < 1.0);
    }

    #[test]
    fn zero_height_keeps_the_old_aspect() {
        let mut camera = Camera::default();
        camera.set_viewport(800, 0);
        assert_eq!(camera.aspect, 16.0 / 9.0);
        camera.set_viewport(800, 800);
        assert_eq!(camera.aspect, 1.0);
    }

    #[test]
    fn orbit_keeps_distance() {
        let mut camera = Camera::default();
        camera.orbit(1.3);
        assert!((camera.position.distance(camera.target) - 5.0).abs() < 1e-4);
    }
}
