//! Edge-collapse decimation with quadric error metrics.
//!
//! Repeatedly collapses the cheapest edge (by combined endpoint quadric)
//! until the requested fraction of faces has been removed. Surviving
//! vertices keep their input row recorded in
//! [`Decimation::original_indices`], which is what lets a registration
//! pyramid move per-vertex state between resolutions.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use nalgebra::Point3;
use surface_types::{SurfaceMesh, Vertex};
use tracing::debug;

use crate::error::{DecimateError, DecimateResult};
use crate::params::DecimateParams;
use crate::quadric::Quadric;
use crate::result::Decimation;

/// An edge collapse candidate in the priority queue.
#[derive(Debug, Clone)]
struct EdgeCollapse {
    v1: u32,
    v2: u32,
    cost: f64,
    merged_position: Point3<f64>,
}

impl PartialEq for EdgeCollapse {
    fn eq(&self, other: &Self) -> bool {
        self.cost == other.cost
    }
}

impl Eq for EdgeCollapse {}

impl PartialOrd for EdgeCollapse {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EdgeCollapse {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the binary heap pops the cheapest collapse first.
        other
            .cost
            .partial_cmp(&self.cost)
            .unwrap_or(Ordering::Equal)
    }
}

/// Decimates a mesh, removing `params.removal_ratio` of its faces.
///
/// Flags are copied onto surviving vertices and normals are recomputed from
/// the decimated connectivity.
///
/// # Errors
///
/// Returns an error if the ratio is outside `[0, 1)`, the flag vector is
/// misaligned, or a non-zero removal is requested on a mesh without faces.
///
/// # Example
///
/// ```
/// use surface_decimate::{decimate_mesh, DecimateParams};
/// use surface_types::uv_sphere;
///
/// let sphere = uv_sphere(1.0, 10, 20);
/// let result = decimate_mesh(&sphere, &DecimateParams::with_removal_ratio(0.8)).unwrap();
/// assert!(result.final_faces < sphere.face_count() / 4);
/// ```
pub fn decimate_mesh(mesh: &SurfaceMesh, params: &DecimateParams) -> DecimateResult<Decimation> {
    if !(0.0..1.0).contains(&params.removal_ratio) {
        return Err(DecimateError::InvalidRatio(params.removal_ratio));
    }
    if mesh.flags.len() != mesh.vertices.len() {
        return Err(DecimateError::FlagMismatch {
            flags: mesh.flags.len(),
            vertices: mesh.vertices.len(),
        });
    }

    let original_faces = mesh.face_count();

    if params.removal_ratio == 0.0 {
        // Identity mapping; nothing to remove.
        return Ok(Decimation {
            mesh: mesh.clone(),
            original_indices: (0..mesh.vertex_count() as u32).collect(),
            original_faces,
            final_faces: original_faces,
            collapses_performed: 0,
            collapses_rejected: 0,
        });
    }

    if original_faces == 0 {
        return Err(DecimateError::NoFaces);
    }

    let target = ((original_faces as f64) * (1.0 - params.removal_ratio)).ceil() as usize;
    let target = target.max(1);

    debug!(original = original_faces, target, "decimating mesh");

    let mut vertices: Vec<Option<Vertex>> = mesh.vertices.iter().copied().map(Some).collect();
    let mut faces: Vec<Option<[u32; 3]>> = mesh.faces.iter().copied().map(Some).collect();
    let mut active_faces = original_faces;

    let mut quadrics = compute_vertex_quadrics(mesh);
    let boundary_edges = find_boundary_edges(&mesh.faces);
    let boundary_vertices: HashSet<u32> = boundary_edges
        .iter()
        .flat_map(|&(a, b)| [a, b])
        .collect();

    let mut heap = build_collapse_queue(mesh, &quadrics, &boundary_vertices, &boundary_edges, params);

    // Collapsed vertex -> the vertex it was merged into.
    let mut merged_into: HashMap<u32, u32> = HashMap::new();

    let mut collapses_performed = 0;
    let mut collapses_rejected = 0;

    while active_faces > target {
        let Some(collapse) = heap.pop() else {
            break;
        };

        let v1 = resolve_vertex(collapse.v1, &merged_into);
        let v2 = resolve_vertex(collapse.v2, &merged_into);

        // Stale queue entry: endpoints already merged away.
        if v1 == v2 || vertices[v1 as usize].is_none() || vertices[v2 as usize].is_none() {
            continue;
        }

        if params.preserve_boundary
            && (boundary_vertices.contains(&v1) || boundary_vertices.contains(&v2))
        {
            collapses_rejected += 1;
            continue;
        }

        if !collapse_keeps_manifold(&vertices, &faces, v1, v2) {
            collapses_rejected += 1;
            continue;
        }

        if let Some(v) = vertices[v1 as usize].as_mut() {
            v.position = collapse.merged_position;
        }

        let q2 = quadrics[v2 as usize];
        quadrics[v1 as usize].add(&q2);

        vertices[v2 as usize] = None;
        merged_into.insert(v2, v1);

        for face_opt in &mut faces {
            if let Some(face) = face_opt {
                for idx in face.iter_mut() {
                    *idx = resolve_vertex(*idx, &merged_into);
                }
                if face[0] == face[1] || face[1] == face[2] || face[0] == face[2] {
                    *face_opt = None;
                    active_faces -= 1;
                }
            }
        }

        collapses_performed += 1;

        requeue_edges_at(
            v1,
            &vertices,
            &faces,
            &quadrics,
            &boundary_vertices,
            &boundary_edges,
            params,
            &mut heap,
        );
    }

    let (mut final_mesh, original_indices) = build_final_mesh(mesh, &vertices, &faces);
    final_mesh.compute_vertex_normals();

    debug!(
        final_faces = active_faces,
        collapses = collapses_performed,
        rejected = collapses_rejected,
        "decimation complete"
    );

    Ok(Decimation {
        mesh: final_mesh,
        original_indices,
        original_faces,
        final_faces: active_faces,
        collapses_performed,
        collapses_rejected,
    })
}

const fn ordered_edge(v1: u32, v2: u32) -> (u32, u32) {
    if v1 < v2 { (v1, v2) } else { (v2, v1) }
}

fn resolve_vertex(mut v: u32, merged_into: &HashMap<u32, u32>) -> u32 {
    while let Some(&next) = merged_into.get(&v) {
        v = next;
    }
    v
}

fn find_boundary_edges(faces: &[[u32; 3]]) -> HashSet<(u32, u32)> {
    let mut edge_faces: HashMap<(u32, u32), usize> = HashMap::new();
    for face in faces {
        for i in 0..3 {
            let edge = ordered_edge(face[i], face[(i + 1) % 3]);
            *edge_faces.entry(edge).or_insert(0) += 1;
        }
    }
    edge_faces
        .into_iter()
        .filter(|&(_, count)| count == 1)
        .map(|(edge, _)| edge)
        .collect()
}

fn compute_vertex_quadrics(mesh: &SurfaceMesh) -> Vec<Quadric> {
    let mut quadrics = vec![Quadric::default(); mesh.vertex_count()];

    for face in &mesh.faces {
        let p0 = mesh.vertices[face[0] as usize].position;
        let p1 = mesh.vertices[face[1] as usize].position;
        let p2 = mesh.vertices[face[2] as usize].position;

        let cross = (p1 - p0).cross(&(p2 - p0));
        let norm = cross.norm();
        if norm < 1e-12 {
            continue;
        }

        let q = Quadric::from_plane(cross / norm, p0);
        for &vi in face {
            quadrics[vi as usize].add(&q);
        }
    }

    quadrics
}

fn build_collapse_queue(
    mesh: &SurfaceMesh,
    quadrics: &[Quadric],
    boundary_vertices: &HashSet<u32>,
    boundary_edges: &HashSet<(u32, u32)>,
    params: &DecimateParams,
) -> BinaryHeap<EdgeCollapse> {
    let mut heap = BinaryHeap::new();
    let mut seen = HashSet::new();

    for face in &mesh.faces {
        for i in 0..3 {
            let v1 = face[i];
            let v2 = face[(i + 1) % 3];
            let edge = ordered_edge(v1, v2);
            if !seen.insert(edge) {
                continue;
            }

            let p1 = mesh.vertices[v1 as usize].position;
            let p2 = mesh.vertices[v2 as usize].position;
            if let Some(collapse) =
                score_collapse(v1, v2, p1, p2, quadrics, boundary_vertices, boundary_edges, params)
            {
                heap.push(collapse);
            }
        }
    }

    heap
}

#[allow(clippy::too_many_arguments)]
fn score_collapse(
    v1: u32,
    v2: u32,
    p1: Point3<f64>,
    p2: Point3<f64>,
    quadrics: &[Quadric],
    boundary_vertices: &HashSet<u32>,
    boundary_edges: &HashSet<(u32, u32)>,
    params: &DecimateParams,
) -> Option<EdgeCollapse> {
    let edge = ordered_edge(v1, v2);
    if params.preserve_boundary
        && (boundary_vertices.contains(&v1) || boundary_vertices.contains(&v2))
    {
        return None;
    }

    let mut combined = quadrics[v1 as usize];
    combined.add(&quadrics[v2 as usize]);

    let midpoint = Point3::from((p1.coords + p2.coords) / 2.0);
    let merged_position = combined.minimizer().unwrap_or(midpoint);

    let mut cost = combined.evaluate(merged_position);
    if boundary_edges.contains(&edge) {
        cost *= params.boundary_penalty;
    }

    Some(EdgeCollapse {
        v1,
        v2,
        cost,
        merged_position,
    })
}

/// Rejects collapses that would pinch the surface: the endpoints may share
/// at most the two opposite vertices of the edge's adjacent triangles.
fn collapse_keeps_manifold(
    vertices: &[Option<Vertex>],
    faces: &[Option<[u32; 3]>],
    v1: u32,
    v2: u32,
) -> bool {
    let mut v1_ring: HashSet<u32> = HashSet::new();
    let mut v2_ring: HashSet<u32> = HashSet::new();

    for face in faces.iter().flatten() {
        let has_v1 = face.contains(&v1);
        let has_v2 = face.contains(&v2);

        for &vi in face {
            if vi == v1 || vi == v2 || vertices[vi as usize].is_none() {
                continue;
            }
            if has_v1 {
                v1_ring.insert(vi);
            }
            if has_v2 {
                v2_ring.insert(vi);
            }
        }
    }

    v1_ring.intersection(&v2_ring).count() <= 2
}

#[allow(clippy::too_many_arguments)]
fn requeue_edges_at(
    v1: u32,
    vertices: &[Option<Vertex>],
    faces: &[Option<[u32; 3]>],
    quadrics: &[Quadric],
    boundary_vertices: &HashSet<u32>,
    boundary_edges: &HashSet<(u32, u32)>,
    params: &DecimateParams,
    heap: &mut BinaryHeap<EdgeCollapse>,
) {
    let Some(v1_vertex) = vertices[v1 as usize] else {
        return;
    };

    let mut neighbors: HashSet<u32> = HashSet::new();
    for face in faces.iter().flatten() {
        if face.contains(&v1) {
            for &vi in face {
                if vi != v1 && vertices[vi as usize].is_some() {
                    neighbors.insert(vi);
                }
            }
        }
    }

    for &v2 in &neighbors {
        let Some(v2_vertex) = vertices[v2 as usize] else {
            continue;
        };
        if let Some(collapse) = score_collapse(
            v1,
            v2,
            v1_vertex.position,
            v2_vertex.position,
            quadrics,
            boundary_vertices,
            boundary_edges,
            params,
        ) {
            heap.push(collapse);
        }
    }
}

fn build_final_mesh(
    input: &SurfaceMesh,
    vertices: &[Option<Vertex>],
    faces: &[Option<[u32; 3]>],
) -> (SurfaceMesh, Vec<u32>) {
    let mut remap: HashMap<u32, u32> = HashMap::new();
    let mut final_mesh = SurfaceMesh::new();
    let mut original_indices = Vec::new();

    for (old_idx, vertex) in vertices.iter().enumerate() {
        if let Some(vertex) = vertex {
            remap.insert(old_idx as u32, final_mesh.vertex_count() as u32);
            final_mesh.vertices.push(*vertex);
            final_mesh.flags.push(input.flags[old_idx]);
            original_indices.push(old_idx as u32);
        }
    }

    for face in faces.iter().flatten() {
        if let (Some(&i0), Some(&i1), Some(&i2)) = (
            remap.get(&face[0]),
            remap.get(&face[1]),
            remap.get(&face[2]),
        ) {
            final_mesh.faces.push([i0, i1, i2]);
        }
    }

    (final_mesh, original_indices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use surface_types::{unit_cube, uv_sphere};

    #[test]
    fn zero_ratio_is_identity() {
        let cube = unit_cube();
        let result = decimate_mesh(&cube, &DecimateParams::with_removal_ratio(0.0)).unwrap();
        assert_eq!(result.final_faces, cube.face_count());
        assert_eq!(result.collapses_performed, 0);
        assert_eq!(
            result.original_indices,
            (0..cube.vertex_count() as u32).collect::<Vec<_>>()
        );
    }

    #[test]
    fn removes_requested_fraction() {
        let sphere = uv_sphere(1.0, 12, 24);
        let result = decimate_mesh(&sphere, &DecimateParams::with_removal_ratio(0.8)).unwrap();
        let kept = result.final_faces as f64 / result.original_faces as f64;
        assert!(kept <= 0.25, "kept {kept} of faces, wanted <= 0.25");
        assert!(result.final_faces > 0);
    }

    #[test]
    fn original_indices_point_at_input_rows() {
        let sphere = uv_sphere(1.0, 8, 16);
        let result = decimate_mesh(&sphere, &DecimateParams::with_removal_ratio(0.5)).unwrap();

        assert_eq!(result.original_indices.len(), result.mesh.vertex_count());
        for &idx in &result.original_indices {
            assert!((idx as usize) < sphere.vertex_count());
        }
        // Strictly increasing: survivors keep input order.
        for pair in result.original_indices.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn flags_survive_decimation() {
        let mut sphere = uv_sphere(1.0, 8, 16);
        // Flag out the north-pole half.
        for (i, flag) in sphere.flags.iter_mut().enumerate() {
            if sphere.vertices[i].position.z > 0.0 {
                *flag = 0.0;
            }
        }

        let result = decimate_mesh(&sphere, &DecimateParams::with_removal_ratio(0.5)).unwrap();
        for (row, &orig) in result.original_indices.iter().enumerate() {
            assert_eq!(result.mesh.flags[row], sphere.flags[orig as usize]);
        }
    }

    #[test]
    fn normals_recomputed_and_unit() {
        let sphere = uv_sphere(1.0, 10, 20);
        let result = decimate_mesh(&sphere, &DecimateParams::with_removal_ratio(0.7)).unwrap();
        for v in &result.mesh.vertices {
            assert!(v.has_unit_normal(1e-6));
        }
    }

    #[test]
    fn rejects_invalid_ratio() {
        let cube = unit_cube();
        assert!(matches!(
            decimate_mesh(&cube, &DecimateParams::with_removal_ratio(1.0)),
            Err(DecimateError::InvalidRatio(_))
        ));
        assert!(matches!(
            decimate_mesh(&cube, &DecimateParams::with_removal_ratio(-0.1)),
            Err(DecimateError::InvalidRatio(_))
        ));
    }

    #[test]
    fn rejects_faceless_mesh() {
        let mut mesh = SurfaceMesh::new();
        mesh.push_vertex(Vertex::from_coords(0.0, 0.0, 0.0));
        assert!(matches!(
            decimate_mesh(&mesh, &DecimateParams::with_removal_ratio(0.5)),
            Err(DecimateError::NoFaces)
        ));
    }

    #[test]
    fn preserve_boundary_keeps_rim() {
        let mut disk = surface_types::flat_disk(1.0, 4, 12);
        disk.flag_boundary_vertices();
        let rim_before: Vec<u32> = (0..disk.vertex_count() as u32)
            .filter(|&i| disk.flags[i as usize] == 0.0)
            .collect();

        let params = DecimateParams::with_removal_ratio(0.5).with_preserve_boundary(true);
        let result = decimate_mesh(&disk, &params).unwrap();

        // Every rim vertex survives.
        for rim in rim_before {
            assert!(result.original_indices.contains(&rim));
        }
    }
}
