//! Weighted closed-form rigid alignment (Horn's quaternion method).
//!
//! The optimal rotation is the eigenvector of the largest eigenvalue of a
//! 4x4 symmetric matrix assembled from the weighted cross-covariance of the
//! floating and corresponding positions. Unlike the SVD formulation, the
//! quaternion solve cannot produce a reflection, so no determinant fix-up is
//! needed.

use nalgebra::{Matrix3, Matrix4, Quaternion, SymmetricEigen, UnitQuaternion, Vector3};
use surface_types::SurfaceMesh;
use tracing::debug;

use crate::correspondence::Correspondences;
use crate::error::{RegistrationError, RegistrationResult};
use crate::transform::RigidTransform;

/// Computes the weighted rigid (or similarity) transform onto the
/// correspondences and applies it to the floating mesh in place.
///
/// Positions get the full transform; normals are rotated only and
/// renormalized. Returns the transform for composition by the drivers.
///
/// # Errors
///
/// Returns an error if buffers are misaligned, any weight is negative or
/// non-finite, the weight sum is zero, the covariance is degenerate, or the
/// eigendecomposition fails.
///
/// # Example
///
/// ```
/// use surface_register::{
///     CorrespondenceParams, compute_correspondences, compute_inlier_weights,
///     compute_rigid_transformation,
/// };
/// use surface_types::unit_cube;
///
/// let mut floating = unit_cube();
/// let target = unit_cube();
/// let corr = compute_correspondences(&floating, &target, &CorrespondenceParams::default()).unwrap();
/// let weights = compute_inlier_weights(&floating, &corr, 4.0).unwrap();
/// let transform = compute_rigid_transformation(&mut floating, &corr, &weights, false).unwrap();
/// assert!(transform.is_identity(1e-6));
/// ```
pub fn compute_rigid_transformation(
    floating: &mut SurfaceMesh,
    correspondences: &Correspondences,
    weights: &[f64],
    allow_scaling: bool,
) -> RegistrationResult<RigidTransform> {
    let transform = estimate_transform(floating, correspondences, weights, allow_scaling)?;
    apply_transform(floating, &transform);
    Ok(transform)
}

/// Estimates the weighted transform without mutating the floating mesh.
fn estimate_transform(
    floating: &SurfaceMesh,
    correspondences: &Correspondences,
    weights: &[f64],
    allow_scaling: bool,
) -> RegistrationResult<RigidTransform> {
    let n = floating.vertex_count();
    if n == 0 {
        return Err(RegistrationError::EmptyFloatingMesh);
    }
    if correspondences.len() != n {
        return Err(RegistrationError::LengthMismatch {
            what: "correspondences",
            expected: n,
            got: correspondences.len(),
        });
    }
    if weights.len() != n {
        return Err(RegistrationError::LengthMismatch {
            what: "weights",
            expected: n,
            got: weights.len(),
        });
    }
    for (index, &value) in weights.iter().enumerate() {
        if !value.is_finite() {
            return Err(RegistrationError::NonFinite { stage: "rigid weights" });
        }
        if value < 0.0 {
            return Err(RegistrationError::NegativeWeight { index, value });
        }
    }

    // Weighted centroids. Reductions run sequentially in row order so the
    // result is reproducible bit-for-bit.
    let mut weight_sum = 0.0;
    let mut floating_centroid = Vector3::zeros();
    let mut corresponding_centroid = Vector3::zeros();
    for i in 0..n {
        let w = weights[i];
        weight_sum += w;
        floating_centroid += w * floating.vertices[i].position.coords;
        corresponding_centroid += w * correspondences.vertices[i].position.coords;
    }
    if weight_sum <= 0.0 {
        return Err(RegistrationError::ZeroWeightSum);
    }
    floating_centroid /= weight_sum;
    corresponding_centroid /= weight_sum;

    // Weighted cross-covariance C = E[p qᵀ] - μp μqᵀ.
    let mut cross = Matrix3::zeros();
    for i in 0..n {
        cross += weights[i]
            * floating.vertices[i].position.coords
            * correspondences.vertices[i].position.coords.transpose();
    }
    cross = cross / weight_sum - floating_centroid * corresponding_centroid.transpose();

    if cross.iter().any(|v| !v.is_finite()) {
        return Err(RegistrationError::NonFinite { stage: "rigid covariance" });
    }

    let rotation = solve_rotation(&cross)?;

    let scale = if allow_scaling {
        let mut numerator = 0.0;
        let mut denominator = 0.0;
        for i in 0..n {
            let centered_floating =
                rotation * (floating.vertices[i].position.coords - floating_centroid);
            let centered_corresponding =
                correspondences.vertices[i].position.coords - corresponding_centroid;
            numerator += weights[i] * centered_corresponding.dot(&centered_floating);
            denominator += weights[i] * centered_floating.norm_squared();
        }
        if denominator <= 1e-24 {
            return Err(RegistrationError::DegenerateCovariance);
        }
        numerator / denominator
    } else {
        1.0
    };

    let translation = corresponding_centroid - scale * (rotation * floating_centroid);

    debug!(
        angle = rotation.angle(),
        scale,
        translation = %translation,
        "estimated rigid transform"
    );
    Ok(RigidTransform::with_scale(rotation, translation, scale))
}

/// Solves for the optimal rotation from the cross-covariance matrix.
fn solve_rotation(cross: &Matrix3<f64>) -> RegistrationResult<UnitQuaternion<f64>> {
    // Antisymmetric part feeds the off-diagonal quaternion terms.
    let delta = Vector3::new(
        cross[(1, 2)] - cross[(2, 1)],
        cross[(2, 0)] - cross[(0, 2)],
        cross[(0, 1)] - cross[(1, 0)],
    );
    let trace = cross.trace();

    let mut q = Matrix4::zeros();
    q[(0, 0)] = trace;
    for i in 0..3 {
        q[(0, i + 1)] = delta[i];
        q[(i + 1, 0)] = delta[i];
        for j in 0..3 {
            q[(i + 1, j + 1)] = cross[(i, j)] + cross[(j, i)];
        }
        q[(i + 1, i + 1)] -= trace;
    }

    let eigen = SymmetricEigen::try_new(q, f64::EPSILON, 0)
        .ok_or(RegistrationError::EigendecompositionFailed)?;

    // Largest eigenvalue wins; near-equal candidates resolve to the largest
    // index so the choice is deterministic.
    let tolerance = 16.0 * f64::EPSILON * (1.0 + eigen.eigenvalues.amax());
    let mut best = 0;
    for i in 1..4 {
        if eigen.eigenvalues[i] > eigen.eigenvalues[best] - tolerance {
            best = i;
        }
    }

    let spread = eigen.eigenvalues.max() - eigen.eigenvalues.min();
    if spread <= tolerance {
        // All eigenvalues coincide: the correspondences carry no rotational
        // information (a single effective point). Identity is the only
        // defensible answer.
        return Ok(UnitQuaternion::identity());
    }

    let column = eigen.eigenvectors.column(best);
    let quaternion = Quaternion::new(column[0], column[1], column[2], column[3]);
    Ok(UnitQuaternion::from_quaternion(quaternion))
}

/// Applies the transform: full similarity on positions, rotation only on
/// normals, with renormalization against drift.
fn apply_transform(floating: &mut SurfaceMesh, transform: &RigidTransform) {
    for vertex in &mut floating.vertices {
        vertex.position = transform.transform_point(&vertex.position);
        let rotated = transform.rotate_normal(&vertex.normal);
        let norm = rotated.norm();
        vertex.normal = if norm > 1e-12 { rotated / norm } else { rotated };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Point3;
    use std::f64::consts::FRAC_PI_4;
    use surface_types::{Vertex, unit_cube, uv_sphere};

    /// Exact correspondences built by transforming the floating vertices.
    fn exact_correspondences(mesh: &SurfaceMesh, transform: &RigidTransform) -> Correspondences {
        Correspondences {
            vertices: mesh
                .vertices
                .iter()
                .map(|v| {
                    Vertex::new(
                        transform.transform_point(&v.position),
                        transform.rotate_normal(&v.normal),
                    )
                })
                .collect(),
            flags: vec![1.0; mesh.vertex_count()],
        }
    }

    #[test]
    fn recovers_translation() {
        let mut cube = unit_cube();
        let truth = RigidTransform::from_translation(Vector3::new(5.0, -3.0, 2.0));
        let corr = exact_correspondences(&cube, &truth);
        let weights = vec![1.0; cube.vertex_count()];

        let estimated =
            compute_rigid_transformation(&mut cube, &corr, &weights, false).unwrap();

        assert!(estimated.rotation.angle() < 1e-9);
        assert_relative_eq!(estimated.translation, truth.translation, epsilon = 1e-9);
        for (v, c) in cube.vertices.iter().zip(&corr.vertices) {
            assert_relative_eq!(v.position, c.position, epsilon = 1e-9);
        }
    }

    #[test]
    fn recovers_rotation_and_rotates_normals() {
        let mut sphere = uv_sphere(1.0, 6, 12);
        let rotation = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), FRAC_PI_4);
        let truth = RigidTransform::from_rotation(rotation);
        let corr = exact_correspondences(&sphere, &truth);
        let weights = vec![1.0; sphere.vertex_count()];

        let estimated =
            compute_rigid_transformation(&mut sphere, &corr, &weights, false).unwrap();

        assert_relative_eq!(estimated.rotation.angle(), FRAC_PI_4, epsilon = 1e-9);
        for (v, c) in sphere.vertices.iter().zip(&corr.vertices) {
            assert_relative_eq!(v.position, c.position, epsilon = 1e-9);
            assert_relative_eq!(v.normal, c.normal, epsilon = 1e-9);
            assert!(v.has_unit_normal(1e-9));
        }
    }

    #[test]
    fn recovers_similarity_scale() {
        let mut sphere = uv_sphere(1.0, 6, 12);
        let truth = RigidTransform::with_scale(
            UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 0.3),
            Vector3::new(1.0, 2.0, 3.0),
            1.5,
        );
        let corr = exact_correspondences(&sphere, &truth);
        let weights = vec![1.0; sphere.vertex_count()];

        let estimated = compute_rigid_transformation(&mut sphere, &corr, &weights, true).unwrap();
        assert_relative_eq!(estimated.scale, 1.5, epsilon = 1e-9);
    }

    #[test]
    fn rigid_step_preserves_pairwise_distances() {
        let mut sphere = uv_sphere(1.0, 6, 12);
        let before: Vec<_> = sphere.positions().collect();

        let truth = RigidTransform::new(
            UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 0.7),
            Vector3::new(0.4, 0.0, -0.2),
        );
        let corr = exact_correspondences(&sphere, &truth);
        let weights = vec![1.0; sphere.vertex_count()];
        compute_rigid_transformation(&mut sphere, &corr, &weights, false).unwrap();

        let after: Vec<_> = sphere.positions().collect();
        for i in (0..before.len()).step_by(7) {
            for j in (i + 1..before.len()).step_by(11) {
                let d_before = (before[i] - before[j]).norm();
                let d_after = (after[i] - after[j]).norm();
                assert!((d_before - d_after).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn weights_shift_the_fit() {
        // Two points want opposite translations; the heavy one wins.
        let mut mesh = SurfaceMesh::from_parts(
            vec![
                Vertex::from_coords(0.0, 0.0, 0.0),
                Vertex::from_coords(1.0, 0.0, 0.0),
            ],
            vec![],
        );
        let corr = Correspondences {
            vertices: vec![
                Vertex::from_coords(1.0, 0.0, 0.0),
                Vertex::from_coords(100.0, 0.0, 0.0),
            ],
            flags: vec![1.0, 1.0],
        };
        let weights = vec![100.0, 0.001];

        let estimated = compute_rigid_transformation(&mut mesh, &corr, &weights, false).unwrap();
        assert!(estimated.translation.x > 0.9 && estimated.translation.x < 1.2);
    }

    #[test]
    fn single_vertex_degenerates_to_translation() {
        let mut mesh = SurfaceMesh::from_parts(vec![Vertex::from_coords(1.0, 2.0, 3.0)], vec![]);
        let corr = Correspondences {
            vertices: vec![Vertex::from_coords(4.0, 4.0, 4.0)],
            flags: vec![1.0],
        };

        let estimated =
            compute_rigid_transformation(&mut mesh, &corr, &[0.7], false).unwrap();

        assert!(estimated.rotation.angle() < 1e-9, "expected pure translation");
        assert_relative_eq!(
            mesh.vertices[0].position,
            Point3::new(4.0, 4.0, 4.0),
            epsilon = 1e-9
        );
    }

    #[test]
    fn zero_weights_fail_loudly() {
        let mut cube = unit_cube();
        let corr = exact_correspondences(&cube, &RigidTransform::identity());
        let weights = vec![0.0; cube.vertex_count()];
        assert!(matches!(
            compute_rigid_transformation(&mut cube, &corr, &weights, false),
            Err(RegistrationError::ZeroWeightSum)
        ));
    }

    #[test]
    fn negative_weight_is_rejected() {
        let mut cube = unit_cube();
        let corr = exact_correspondences(&cube, &RigidTransform::identity());
        let mut weights = vec![1.0; cube.vertex_count()];
        weights[3] = -0.5;
        assert!(matches!(
            compute_rigid_transformation(&mut cube, &corr, &weights, false),
            Err(RegistrationError::NegativeWeight { index: 3, .. })
        ));
    }
}
