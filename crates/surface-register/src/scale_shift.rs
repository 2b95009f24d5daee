//! State transfer between pyramid resolutions.
//!
//! Pyramid levels are decimations of the same base mesh, so every level
//! vertex knows its row in the base mesh. Moving the deformed state up a
//! level means finding, for each vertex of the denser level, the
//! previous-level vertex with the same base row, or the nearest surviving
//! one when decimation removed it.

use hashbrown::HashMap;
use surface_types::SurfaceMesh;
use tracing::debug;

use crate::error::{RegistrationError, RegistrationResult};

/// Copies positions and normals from a previous pyramid level onto a new
/// (usually denser) level.
///
/// `previous_indices[i]` is the base-mesh row of previous-level vertex `i`;
/// `new_indices[v]` likewise for the new level. Each new vertex takes the
/// previous vertex whose base row is equal to its own, or failing that the
/// numerically closest one (ties resolve to the lower row). Flags and faces
/// of the new level are left untouched.
///
/// # Errors
///
/// Returns an error if either index vector is misaligned with its mesh or
/// the previous level is empty.
pub fn scale_shift_mesh(
    previous: &SurfaceMesh,
    previous_indices: &[u32],
    new: &mut SurfaceMesh,
    new_indices: &[u32],
) -> RegistrationResult<()> {
    if previous.is_empty() {
        return Err(RegistrationError::EmptyFloatingMesh);
    }
    if previous_indices.len() != previous.vertex_count() {
        return Err(RegistrationError::LengthMismatch {
            what: "previous level indices",
            expected: previous.vertex_count(),
            got: previous_indices.len(),
        });
    }
    if new_indices.len() != new.vertex_count() {
        return Err(RegistrationError::LengthMismatch {
            what: "new level indices",
            expected: new.vertex_count(),
            got: new_indices.len(),
        });
    }

    // Exact matches dominate (decimation keeps a subset of base rows), so
    // try a map lookup first and fall back to a sorted nearest-row search.
    let mut by_base_row: HashMap<u32, usize> = HashMap::with_capacity(previous_indices.len());
    for (row, &base) in previous_indices.iter().enumerate() {
        by_base_row.entry(base).or_insert(row);
    }

    let mut sorted: Vec<(u32, usize)> = previous_indices
        .iter()
        .enumerate()
        .map(|(row, &base)| (base, row))
        .collect();
    sorted.sort_unstable();

    let mut exact = 0usize;
    for (vertex, &base) in new.vertices.iter_mut().zip(new_indices) {
        let source_row = match by_base_row.get(&base) {
            Some(&row) => {
                exact += 1;
                row
            }
            None => nearest_base_row(&sorted, base),
        };
        let source = &previous.vertices[source_row];
        vertex.position = source.position;
        vertex.normal = source.normal;
    }

    debug!(
        new_vertices = new.vertex_count(),
        exact,
        approximate = new.vertex_count() - exact,
        "scale-shifted mesh state"
    );
    Ok(())
}

/// Finds the row whose base index is numerically closest to `base`;
/// equidistant candidates resolve to the lower base index.
fn nearest_base_row(sorted: &[(u32, usize)], base: u32) -> usize {
    match sorted.binary_search_by_key(&base, |&(b, _)| b) {
        Ok(i) => sorted[i].1,
        Err(insertion) => {
            let after = sorted.get(insertion);
            let before = insertion.checked_sub(1).and_then(|i| sorted.get(i));
            match (before, after) {
                (Some(&(b, row_b)), Some(&(a, row_a))) => {
                    if base - b <= a - base {
                        row_b
                    } else {
                        row_a
                    }
                }
                (Some(&(_, row)), None) | (None, Some(&(_, row))) => row,
                // The slice is non-empty, one side always exists.
                (None, None) => 0,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;
    use surface_decimate::{DecimateParams, decimate_mesh};
    use surface_types::uv_sphere;

    #[test]
    fn exact_rows_copy_through() {
        let base = uv_sphere(1.0, 8, 16);
        let coarse = decimate_mesh(&base, &DecimateParams::with_removal_ratio(0.5)).unwrap();

        // Deform the coarse level, then shift onto a fresh copy of itself.
        let mut deformed = coarse.mesh.clone();
        deformed.translate(Vector3::new(0.0, 0.0, 2.0));

        let mut receiver = coarse.mesh.clone();
        scale_shift_mesh(
            &deformed,
            &coarse.original_indices,
            &mut receiver,
            &coarse.original_indices,
        )
        .unwrap();

        for (r, d) in receiver.vertices.iter().zip(&deformed.vertices) {
            assert_relative_eq!(r.position, d.position, epsilon = 1e-12);
        }
    }

    #[test]
    fn missing_rows_take_nearest_surviving_vertex() {
        let base = uv_sphere(1.0, 8, 16);
        let coarse = decimate_mesh(&base, &DecimateParams::with_removal_ratio(0.7)).unwrap();

        let mut deformed = coarse.mesh.clone();
        deformed.translate(Vector3::new(5.0, 0.0, 0.0));

        // Shift onto the full-resolution base (identity indices).
        let mut receiver = base.clone();
        let identity: Vec<u32> = (0..base.vertex_count() as u32).collect();
        scale_shift_mesh(&deformed, &coarse.original_indices, &mut receiver, &identity).unwrap();

        // Every receiver vertex now carries some deformed coarse position.
        let deformed_positions: Vec<_> = deformed.positions().collect();
        for v in &receiver.vertices {
            assert!(
                deformed_positions
                    .iter()
                    .any(|p| (p - v.position).norm() < 1e-12),
                "vertex did not come from the previous level"
            );
        }
        // Survivors got their exact rows.
        for (row, &base_row) in coarse.original_indices.iter().enumerate() {
            assert_relative_eq!(
                receiver.vertices[base_row as usize].position,
                deformed.vertices[row].position,
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn faces_and_flags_are_untouched() {
        let base = uv_sphere(1.0, 6, 12);
        let coarse = decimate_mesh(&base, &DecimateParams::with_removal_ratio(0.5)).unwrap();

        let mut receiver = base.clone();
        receiver.flags[3] = 0.0;
        let faces_before = receiver.faces.clone();
        let identity: Vec<u32> = (0..base.vertex_count() as u32).collect();

        scale_shift_mesh(
            &coarse.mesh,
            &coarse.original_indices,
            &mut receiver,
            &identity,
        )
        .unwrap();

        assert_eq!(receiver.faces, faces_before);
        assert_eq!(receiver.flags[3], 0.0);
    }

    #[test]
    fn tie_breaks_to_lower_row() {
        let sorted = vec![(2u32, 7usize), (6u32, 9usize)];
        // Base 4 is equidistant from 2 and 6.
        assert_eq!(nearest_base_row(&sorted, 4), 7);
        assert_eq!(nearest_base_row(&sorted, 5), 9);
        assert_eq!(nearest_base_row(&sorted, 1), 7);
        assert_eq!(nearest_base_row(&sorted, 100), 9);
    }

    #[test]
    fn rejects_misaligned_indices() {
        let base = uv_sphere(1.0, 4, 8);
        let mut receiver = base.clone();
        let identity: Vec<u32> = (0..base.vertex_count() as u32).collect();
        assert!(matches!(
            scale_shift_mesh(&base, &identity[..3], &mut receiver, &identity),
            Err(RegistrationError::LengthMismatch { .. })
        ));
    }
}
