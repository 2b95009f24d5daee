//! Rigid (and similarity) transform type.

use nalgebra::{Matrix4, Point3, UnitQuaternion, Vector3};

/// A similarity transform: uniform scale, then rotation, then translation.
///
/// With `scale == 1.0` this is a rigid motion. Registration drivers compose
/// one of these per iteration and report the product.
///
/// # Example
///
/// ```
/// use surface_register::RigidTransform;
/// use nalgebra::{Point3, UnitQuaternion, Vector3};
/// use std::f64::consts::FRAC_PI_2;
///
/// let transform = RigidTransform::new(
///     UnitQuaternion::from_axis_angle(&Vector3::z_axis(), FRAC_PI_2),
///     Vector3::new(1.0, 0.0, 0.0),
/// );
/// let moved = transform.transform_point(&Point3::new(1.0, 0.0, 0.0));
/// assert!((moved - Point3::new(1.0, 1.0, 0.0)).norm() < 1e-12);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidTransform {
    /// Rotation component.
    pub rotation: UnitQuaternion<f64>,
    /// Translation component.
    pub translation: Vector3<f64>,
    /// Uniform scale factor (1.0 for rigid motions).
    pub scale: f64,
}

impl Default for RigidTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl RigidTransform {
    /// A rigid transform from rotation and translation (scale 1).
    #[must_use]
    pub const fn new(rotation: UnitQuaternion<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
            scale: 1.0,
        }
    }

    /// A similarity transform from rotation, translation, and scale.
    #[must_use]
    pub const fn with_scale(
        rotation: UnitQuaternion<f64>,
        translation: Vector3<f64>,
        scale: f64,
    ) -> Self {
        Self {
            rotation,
            translation,
            scale,
        }
    }

    /// The identity transform.
    #[must_use]
    pub fn identity() -> Self {
        Self::new(UnitQuaternion::identity(), Vector3::zeros())
    }

    /// A pure translation.
    #[must_use]
    pub fn from_translation(translation: Vector3<f64>) -> Self {
        Self::new(UnitQuaternion::identity(), translation)
    }

    /// A pure rotation.
    #[must_use]
    pub fn from_rotation(rotation: UnitQuaternion<f64>) -> Self {
        Self::new(rotation, Vector3::zeros())
    }

    /// A pure uniform scale.
    #[must_use]
    pub fn from_scale(scale: f64) -> Self {
        Self::with_scale(UnitQuaternion::identity(), Vector3::zeros(), scale)
    }

    /// Applies the transform to a point: `s·R·p + t`.
    #[must_use]
    pub fn transform_point(&self, point: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.rotation * (point.coords * self.scale) + self.translation)
    }

    /// Applies rotation only, for unit normals.
    ///
    /// Normals are directions: they are never scaled or translated.
    #[must_use]
    pub fn rotate_normal(&self, normal: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * normal
    }

    /// Composes two transforms: the result applies `other` first,
    /// then `self`.
    #[must_use]
    pub fn compose(&self, other: &Self) -> Self {
        Self {
            rotation: self.rotation * other.rotation,
            translation: self.translation + self.rotation * (other.translation * self.scale),
            scale: self.scale * other.scale,
        }
    }

    /// The inverse transform.
    #[must_use]
    pub fn inverse(&self) -> Self {
        let inv_scale = 1.0 / self.scale;
        let inv_rotation = self.rotation.inverse();
        Self {
            rotation: inv_rotation,
            translation: inv_rotation * (-self.translation * inv_scale),
            scale: inv_scale,
        }
    }

    /// The 4x4 homogeneous matrix of this transform.
    #[must_use]
    pub fn to_matrix4(&self) -> Matrix4<f64> {
        let mut mat = Matrix4::identity();
        let rot = self.rotation.to_rotation_matrix();
        for i in 0..3 {
            for j in 0..3 {
                mat[(i, j)] = rot[(i, j)] * self.scale;
            }
            mat[(i, 3)] = self.translation[i];
        }
        mat
    }

    /// Whether this transform is the identity to within `epsilon` on
    /// rotation angle, translation norm, and scale offset.
    #[must_use]
    pub fn is_identity(&self, epsilon: f64) -> bool {
        self.rotation.angle().abs() < epsilon
            && self.translation.norm() < epsilon
            && (self.scale - 1.0).abs() < epsilon
    }
}
