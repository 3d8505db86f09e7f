//! Light/camera rigs and a procedural demo scene.

use glam::{Mat4, Vec3};

/// Orthographic directional light aimed at a target point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightRig {
    pub position: Vec3,
    pub target: Vec3,
    /// Half-size of the square orthographic frustum
    pub extent: f32,
    pub z_near: f32,
    pub z_far: f32,
}

impl LightRig {
    pub fn view(&self) -> Mat4 {
        let dir = (self.target - self.position).normalize_or_zero();
        // Fall back to Z up when looking straight along Y.
        let up = if dir.cross(Vec3::Y).length_squared() < 1e-6 {
            Vec3::Z
        } else {
            Vec3::Y
        };
        Mat4::look_at_rh(self.position, self.target, up)
    }

    pub fn projection(&self) -> Mat4 {
        let e = self.extent;
        Mat4::orthographic_rh(-e, e, -e, e, self.z_near, self.z_far)
    }

    pub fn view_proj(&self) -> Mat4 {
        self.projection() * self.view()
    }

    /// Orbit the light around its target (radians), keeping the distance.
    pub fn orbit(&mut self, yaw: f32, pitch: f32) {
        let offset = self.position - self.target;
        let radius = offset.length();
        if radius == 0.0 {
            return;
        }
        let cur_pitch = (offset.y / radius).clamp(-1.0, 1.0).asin();
        let cur_yaw = offset.z.atan2(offset.x);
        let limit = std::f32::consts::FRAC_PI_2 - 0.01;
        let new_pitch = (cur_pitch + pitch).clamp(-limit, limit);
        let new_yaw = cur_yaw + yaw;
        self.position = self.target
            + radius
                * Vec3::new(
                    new_pitch.cos() * new_yaw.cos(),
                    new_pitch.sin(),
                    new_pitch.cos() * new_yaw.sin(),
                );
    }
}

/// Perspective viewer camera used by the shadow mask pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraRig {
    pub position: Vec3,
    pub target: Vec3,
    /// Vertical field of view in radians
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl CameraRig {
    pub fn view_proj(&self) -> Mat4 {
        // glam's perspective_rh already targets the 0..1 depth range wgpu uses
        let proj = Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far);
        proj * Mat4::look_at_rh(self.position, self.target, Vec3::Y)
    }
}

/// Indexed triangle mesh with an object-to-world transform.
#[derive(Debug, Clone)]
pub struct MeshData {
    pub positions: Vec<[f32; 3]>,
    pub indices: Vec<u32>,
    pub model: Mat4,
}

impl MeshData {
    /// Horizontal quad of half-size `half` centred at the origin, facing +Y.
    pub fn plane(half: f32) -> Self {
        Self {
            positions: vec![
                [-half, 0.0, -half],
                [half, 0.0, -half],
                [half, 0.0, half],
                [-half, 0.0, half],
            ],
            indices: vec![0, 2, 1, 0, 3, 2],
            model: Mat4::IDENTITY,
        }
    }

    /// Axis-aligned unit cube (side 1) centred at the origin.
    pub fn cube() -> Self {
        let positions = vec![
            [-0.5, -0.5, -0.5],
            [0.5, -0.5, -0.5],
            [0.5, 0.5, -0.5],
            [-0.5, 0.5, -0.5],
            [-0.5, -0.5, 0.5],
            [0.5, -0.5, 0.5],
            [0.5, 0.5, 0.5],
            [-0.5, 0.5, 0.5],
        ];
        #[rustfmt::skip]
        let indices = vec![
            4, 5, 6, 4, 6, 7, // +z
            1, 0, 3, 1, 3, 2, // -z
            5, 1, 2, 5, 2, 6, // +x
            0, 4, 7, 0, 7, 3, // -x
            3, 7, 6, 3, 6, 2, // +y
            0, 1, 5, 0, 5, 4, // -y
        ];
        Self {
            positions,
            indices,
            model: Mat4::IDENTITY,
        }
    }

    pub fn with_model(mut self, model: Mat4) -> Self {
        self.model = model;
        self
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

/// Floor plus three boxes of different heights, for contact-hardening checks.
pub fn demo_casters() -> Vec<MeshData> {
    vec![
        MeshData::plane(8.0),
        MeshData::cube().with_model(
            Mat4::from_translation(Vec3::new(0.0, 0.5, 0.0)) * Mat4::from_scale(Vec3::splat(1.0)),
        ),
        MeshData::cube().with_model(
            Mat4::from_translation(Vec3::new(2.0, 1.5, 1.0))
                * Mat4::from_scale(Vec3::new(0.6, 3.0, 0.6)),
        ),
        MeshData::cube().with_model(
            Mat4::from_translation(Vec3::new(-2.0, 0.25, 1.5))
                * Mat4::from_scale(Vec3::new(1.5, 0.5, 1.5)),
        ),
    ]
}
