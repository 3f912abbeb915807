use crate::{Mat4, Quat, Vec3};

/// Rigid bone transform: translation plus quaternion rotation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
}

impl Transform {
    #[inline]
    pub const fn identity() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }

    #[inline]
    pub fn new(translation: Vec3, rotation: Quat) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    /// Build matrix = T * R (column-major Mat4 per glam).
    #[inline]
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.rotation, self.translation)
    }

    /// Bind-pose inverse, as needed for skinning.
    #[inline]
    pub fn inverse_matrix(&self) -> Mat4 {
        self.matrix().inverse()
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}
