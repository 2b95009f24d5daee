//! Surface vertex: a position paired with a unit normal.

use nalgebra::{Point3, Vector3};

/// Number of components in a vertex feature vector (position + normal).
pub const FEATURE_DIM: usize = 6;

/// A vertex on a registration surface.
///
/// Unlike a general-purpose mesh vertex, the normal is not optional: the
/// registration pipeline searches a 6-D feature space that concatenates
/// position and unit normal, so every vertex must carry one. Use
/// [`crate::SurfaceMesh::compute_vertex_normals`] to derive normals from face
/// connectivity.
///
/// # Example
///
/// ```
/// use surface_types::Vertex;
/// use nalgebra::{Point3, Vector3};
///
/// let v = Vertex::new(Point3::new(1.0, 2.0, 3.0), Vector3::z());
/// assert_eq!(v.feature(), [1.0, 2.0, 3.0, 0.0, 0.0, 1.0]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    /// 3D position.
    pub position: Point3<f64>,

    /// Unit-length surface normal.
    pub normal: Vector3<f64>,
}

impl Vertex {
    /// Creates a vertex from a position and a normal.
    #[inline]
    #[must_use]
    pub const fn new(position: Point3<f64>, normal: Vector3<f64>) -> Self {
        Self { position, normal }
    }

    /// Creates a vertex from raw coordinates with a `+Z` placeholder normal.
    ///
    /// The placeholder keeps the unit-length invariant for meshes under
    /// construction; call [`crate::SurfaceMesh::compute_vertex_normals`] once
    /// faces are in place.
    #[inline]
    #[must_use]
    pub fn from_coords(x: f64, y: f64, z: f64) -> Self {
        Self::new(Point3::new(x, y, z), Vector3::z())
    }

    /// The 6-D feature vector `[x, y, z, nx, ny, nz]` used for
    /// correspondence search.
    #[inline]
    #[must_use]
    pub fn feature(&self) -> [f64; FEATURE_DIM] {
        [
            self.position.x,
            self.position.y,
            self.position.z,
            self.normal.x,
            self.normal.y,
            self.normal.z,
        ]
    }

    /// Rebuilds a vertex from a 6-D feature vector, renormalizing the
    /// normal component.
    ///
    /// A degenerate normal (norm below `1e-12`) is left untouched.
    #[must_use]
    pub fn from_feature(feature: [f64; FEATURE_DIM]) -> Self {
        let mut normal = Vector3::new(feature[3], feature[4], feature[5]);
        let norm = normal.norm();
        if norm > 1e-12 {
            normal /= norm;
        }
        Self {
            position: Point3::new(feature[0], feature[1], feature[2]),
            normal,
        }
    }

    /// Whether the normal is unit length to within `tolerance`.
    #[inline]
    #[must_use]
    pub fn has_unit_normal(&self, tolerance: f64) -> bool {
        (self.normal.norm() - 1.0).abs() < tolerance
    }
}

impl From<Point3<f64>> for Vertex {
    fn from(position: Point3<f64>) -> Self {
        Self::new(position, Vector3::z())
    }
}
