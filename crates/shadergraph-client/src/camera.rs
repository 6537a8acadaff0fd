use glam::Vec3;

/// Camera values injected as `uCameraPos`, `uCameraTarget`, `uCameraUp`
/// and `uCameraFov`. Input handling that moves the camera lives elsewhere.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraUniforms {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    /// Vertical field of view, radians.
    pub fov: f32,
}

impl Default for CameraUniforms {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 3.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov: std::f32::consts::FRAC_PI_3,
        }
    }
}

impl CameraUniforms {
    /// Position on a sphere around `target`. `yaw` rotates about +Y from
    /// +Z, `pitch` lifts toward +Y; both in radians.
    pub fn orbit(target: Vec3, distance: f32, yaw: f32, pitch: f32) -> Self {
        let pitch = pitch.clamp(-1.55, 1.55);
        let offset = Vec3::new(
            distance * pitch.cos() * yaw.sin(),
            distance * pitch.sin(),
            distance * pitch.cos() * yaw.cos(),
        );
        Self {
            position: target + offset,
            target,
            ..Self::default()
        }
    }

    pub fn distance(&self) -> f32 {
        self.position.distance(self.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_looks_down_negative_z() {
        let cam = CameraUniforms::default();
        assert_eq!(cam.position, Vec3::new(0.0, 0.0, 3.0));
        assert!((cam.fov - std::f32::consts::PI / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_orbit_keeps_distance() {
        let cam = CameraUniforms::orbit(Vec3::new(1.0, 0.0, 0.0), 5.0, 0.7, 0.3);
        assert!((cam.distance() - 5.0).abs() < 1e-4);
        let front = CameraUniforms::orbit(Vec3::ZERO, 3.0, 0.0, 0.0);
        assert!((front.position - Vec3::new(0.0, 0.0, 3.0)).length() < 1e-5);
    }
}
