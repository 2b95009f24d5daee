//! Indexed triangle mesh with per-vertex flags.

use std::collections::HashMap;

use nalgebra::{Point3, Vector3};

use crate::Vertex;

/// An indexed triangle mesh prepared for surface registration.
///
/// Vertices carry mandatory unit normals; faces reference vertices by index
/// with counter-clockwise winding; `flags` holds one value in {0.0, 1.0} per
/// vertex. A flag of 0 excludes the vertex from contributing to transform
/// estimation (boundary vertices are the usual case, see
/// [`SurfaceMesh::flag_boundary_vertices`]). The registration pipeline never
/// mutates `flags`.
///
/// # Example
///
/// ```
/// use surface_types::{SurfaceMesh, Vertex};
///
/// let mut mesh = SurfaceMesh::new();
/// mesh.push_vertex(Vertex::from_coords(0.0, 0.0, 0.0));
/// mesh.push_vertex(Vertex::from_coords(1.0, 0.0, 0.0));
/// mesh.push_vertex(Vertex::from_coords(0.0, 1.0, 0.0));
/// mesh.faces.push([0, 1, 2]);
/// mesh.compute_vertex_normals();
///
/// assert_eq!(mesh.vertex_count(), 3);
/// assert!(mesh.vertices[0].has_unit_normal(1e-9));
/// ```
#[derive(Debug, Clone, Default)]
pub struct SurfaceMesh {
    /// Vertex data (position + unit normal), index-aligned with `flags`.
    pub vertices: Vec<Vertex>,

    /// Triangle faces as indices into the vertex array, CCW winding.
    pub faces: Vec<[u32; 3]>,

    /// Per-vertex participation flags in {0.0, 1.0}.
    pub flags: Vec<f64>,
}

impl SurfaceMesh {
    /// Creates a new empty mesh.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            vertices: Vec::new(),
            faces: Vec::new(),
            flags: Vec::new(),
        }
    }

    /// Creates a mesh with pre-allocated capacity.
    #[inline]
    #[must_use]
    pub fn with_capacity(vertex_count: usize, face_count: usize) -> Self {
        Self {
            vertices: Vec::with_capacity(vertex_count),
            faces: Vec::with_capacity(face_count),
            flags: Vec::with_capacity(vertex_count),
        }
    }

    /// Creates a mesh from vertices and faces, with all flags set to 1.
    #[must_use]
    pub fn from_parts(vertices: Vec<Vertex>, faces: Vec<[u32; 3]>) -> Self {
        let flags = vec![1.0; vertices.len()];
        Self {
            vertices,
            faces,
            flags,
        }
    }

    /// Appends a vertex with its flag set to 1.
    #[inline]
    pub fn push_vertex(&mut self, vertex: Vertex) {
        self.vertices.push(vertex);
        self.flags.push(1.0);
    }

    /// Number of vertices.
    #[inline]
    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Number of faces.
    #[inline]
    #[must_use]
    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// Whether the mesh has no vertices.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Iterator over vertex positions.
    pub fn positions(&self) -> impl Iterator<Item = Point3<f64>> + '_ {
        self.vertices.iter().map(|v| v.position)
    }

    /// Recomputes all vertex normals from face connectivity.
    ///
    /// Each vertex normal is the normalized sum of the (un-normalized) cross
    /// products of its incident faces; the cross-product magnitude is twice
    /// the face area, so large faces weigh in proportionally. Vertices whose
    /// accumulated normal is degenerate (isolated vertices, needle fans)
    /// keep their previous normal.
    pub fn compute_vertex_normals(&mut self) {
        let mut sums = vec![Vector3::zeros(); self.vertices.len()];

        for &[i0, i1, i2] in &self.faces {
            let p0 = self.vertices[i0 as usize].position;
            let p1 = self.vertices[i1 as usize].position;
            let p2 = self.vertices[i2 as usize].position;
            let face_normal = (p1 - p0).cross(&(p2 - p0));

            sums[i0 as usize] += face_normal;
            sums[i1 as usize] += face_normal;
            sums[i2 as usize] += face_normal;
        }

        for (vertex, sum) in self.vertices.iter_mut().zip(&sums) {
            let norm = sum.norm();
            if norm > 1e-12 {
                vertex.normal = sum / norm;
            }
        }
    }

    /// Sets the flag to 0 for every vertex on a boundary edge.
    ///
    /// A boundary edge is one with exactly one adjacent face. Returns the
    /// number of vertices flagged out.
    ///
    /// Boundary vertices pull correspondences toward the rim of a partial
    /// scan; excluding them from transform estimation is the standard
    /// counter-measure.
    pub fn flag_boundary_vertices(&mut self) -> usize {
        let mut edge_faces: HashMap<(u32, u32), usize> = HashMap::new();

        for face in &self.faces {
            for i in 0..3 {
                let a = face[i];
                let b = face[(i + 1) % 3];
                let edge = if a < b { (a, b) } else { (b, a) };
                *edge_faces.entry(edge).or_insert(0) += 1;
            }
        }

        let mut flagged = 0;
        for (&(a, b), &count) in &edge_faces {
            if count == 1 {
                for v in [a as usize, b as usize] {
                    if self.flags[v] != 0.0 {
                        self.flags[v] = 0.0;
                        flagged += 1;
                    }
                }
            }
        }

        flagged
    }

    /// The diagonal length of the axis-aligned bounding box.
    ///
    /// Returns 0.0 for an empty mesh.
    #[must_use]
    pub fn bounding_diameter(&self) -> f64 {
        let Some(first) = self.vertices.first() else {
            return 0.0;
        };

        let mut min = first.position;
        let mut max = first.position;
        for v in &self.vertices[1..] {
            min = Point3::new(
                min.x.min(v.position.x),
                min.y.min(v.position.y),
                min.z.min(v.position.z),
            );
            max = Point3::new(
                max.x.max(v.position.x),
                max.y.max(v.position.y),
                max.z.max(v.position.z),
            );
        }

        (max - min).norm()
    }

    /// Translates all vertex positions by `offset`.
    pub fn translate(&mut self, offset: Vector3<f64>) {
        for vertex in &mut self.vertices {
            vertex.position += offset;
        }
    }
}

/// Creates a unit cube mesh from (0,0,0) to (1,1,1) with outward normals.
///
/// # Example
///
/// ```
/// use surface_types::unit_cube;
///
/// let cube = unit_cube();
/// assert_eq!(cube.vertex_count(), 8);
/// assert_eq!(cube.face_count(), 12);
/// ```
#[must_use]
pub fn unit_cube() -> SurfaceMesh {
    let mut mesh = SurfaceMesh::with_capacity(8, 12);

    mesh.push_vertex(Vertex::from_coords(0.0, 0.0, 0.0));
    mesh.push_vertex(Vertex::from_coords(1.0, 0.0, 0.0));
    mesh.push_vertex(Vertex::from_coords(1.0, 1.0, 0.0));
    mesh.push_vertex(Vertex::from_coords(0.0, 1.0, 0.0));
    mesh.push_vertex(Vertex::from_coords(0.0, 0.0, 1.0));
    mesh.push_vertex(Vertex::from_coords(1.0, 0.0, 1.0));
    mesh.push_vertex(Vertex::from_coords(1.0, 1.0, 1.0));
    mesh.push_vertex(Vertex::from_coords(0.0, 1.0, 1.0));

    // Two CCW triangles per cube face, viewed from outside.
    mesh.faces.push([0, 2, 1]);
    mesh.faces.push([0, 3, 2]);
    mesh.faces.push([4, 5, 6]);
    mesh.faces.push([4, 6, 7]);
    mesh.faces.push([0, 1, 5]);
    mesh.faces.push([0, 5, 4]);
    mesh.faces.push([3, 7, 6]);
    mesh.faces.push([3, 6, 2]);
    mesh.faces.push([0, 4, 7]);
    mesh.faces.push([0, 7, 3]);
    mesh.faces.push([1, 2, 6]);
    mesh.faces.push([1, 6, 5]);

    mesh.compute_vertex_normals();
    mesh
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn from_parts_sets_flags() {
        let mesh = SurfaceMesh::from_parts(
            vec![
                Vertex::from_coords(0.0, 0.0, 0.0),
                Vertex::from_coords(1.0, 0.0, 0.0),
            ],
            vec![],
        );
        assert_eq!(mesh.flags, vec![1.0, 1.0]);
    }

    #[test]
    fn cube_normals_point_outward() {
        let cube = unit_cube();
        let center = Point3::new(0.5, 0.5, 0.5);
        for v in &cube.vertices {
            assert!(v.has_unit_normal(1e-9));
            let outward = v.position - center;
            assert!(
                v.normal.dot(&outward) > 0.0,
                "normal at {:?} points inward",
                v.position
            );
        }
    }

    #[test]
    fn isolated_vertex_keeps_normal() {
        let mut mesh = SurfaceMesh::new();
        mesh.push_vertex(Vertex::from_coords(0.0, 0.0, 0.0));
        mesh.compute_vertex_normals();
        assert!(mesh.vertices[0].has_unit_normal(1e-12));
    }

    #[test]
    fn closed_cube_has_no_boundary() {
        let mut cube = unit_cube();
        assert_eq!(cube.flag_boundary_vertices(), 0);
        assert!(cube.flags.iter().all(|&f| f == 1.0));
    }

    #[test]
    fn open_triangle_is_all_boundary() {
        let mut mesh = SurfaceMesh::from_parts(
            vec![
                Vertex::from_coords(0.0, 0.0, 0.0),
                Vertex::from_coords(1.0, 0.0, 0.0),
                Vertex::from_coords(0.0, 1.0, 0.0),
            ],
            vec![[0, 1, 2]],
        );
        assert_eq!(mesh.flag_boundary_vertices(), 3);
        assert!(mesh.flags.iter().all(|&f| f == 0.0));
    }

    #[test]
    fn bounding_diameter_of_cube() {
        let cube = unit_cube();
        assert_relative_eq!(cube.bounding_diameter(), 3f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn empty_mesh_diameter_is_zero() {
        assert_relative_eq!(SurfaceMesh::new().bounding_diameter(), 0.0);
    }

    #[test]
    fn translate_moves_positions_only() {
        let mut cube = unit_cube();
        let normals_before: Vec<_> = cube.vertices.iter().map(|v| v.normal).collect();
        cube.translate(Vector3::new(5.0, 0.0, 0.0));
        assert_relative_eq!(cube.vertices[0].position.x, 5.0, epsilon = 1e-12);
        for (v, n) in cube.vertices.iter().zip(normals_before) {
            assert_relative_eq!(v.normal, n, epsilon = 1e-12);
        }
    }
}
