//! Core types shared by the loaders: math re-exports, colors, bounds, errors.

pub use glam::{Mat3, Mat4, Quat, Vec2, Vec3, Vec4, vec3};

pub mod bounds;
pub mod color;
pub mod error;
pub mod transform;

pub use bounds::Aabb;
pub use color::Rgba;
pub use error::{CoreError, CoreResult};
pub use transform::Transform;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_transform_is_identity_matrix() {
        let t = Transform::identity();
        assert_eq!(t.matrix(), Mat4::IDENTITY);
    }

    #[test]
    fn translate_then_rotate_matrix() {
        let t = Transform::new(vec3(1.0, 2.0, 3.0), Quat::IDENTITY);
        // Last column holds the translation, diagonal stays 1 with no rotation.
        let m = t.matrix().to_cols_array();
        assert!((m[12] - 1.0).abs() < 1e-6);
        assert!((m[13] - 2.0).abs() < 1e-6);
        assert!((m[14] - 3.0).abs() < 1e-6);
        assert!((m[0] - 1.0).abs() < 1e-6);
        assert!((m[5] - 1.0).abs() < 1e-6);
        assert!((m[10] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn inverse_matrix_undoes_transform() {
        let t = Transform::new(
            vec3(0.5, -1.0, 2.0),
            Quat::from_rotation_z(std::f32::consts::FRAC_PI_2),
        );
        let p = vec3(1.0, 1.0, 1.0);
        let back = t.inverse_matrix().transform_point3(t.matrix().transform_point3(p));
        assert!((back - p).length() < 1e-5);
    }
}
