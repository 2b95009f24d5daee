//! Robust inlier weighting of correspondences.
//!
//! Residuals are compared against a robust scale (the median residual over
//! reliable rows), giving each correspondence a Cauchy-style weight in
//! [0, 1]. Outliers many scales away are damped toward zero instead of being
//! cut at a hard threshold, so the reweighting degrades gracefully on
//! heavy-tailed residual distributions.

use surface_types::SurfaceMesh;
use tracing::debug;

use crate::correspondence::Correspondences;
use crate::error::{RegistrationError, RegistrationResult};

/// Lower bound on the robust scale. A near-perfect alignment would otherwise
/// divide by zero; with the floor, exact matches weigh 1 and anything
/// measurably off weighs ~0, which is the right degenerate behaviour.
const MIN_SCALE: f64 = 1e-12;

/// Computes per-vertex inlier weights in [0, 1].
///
/// `kappa` controls the cutoff: residuals around `kappa` robust scales get
/// weight 1/2, far outliers approach 0. Rows whose correspondence is
/// unreliable (`flags == 0`) get weight 0 exactly.
///
/// # Errors
///
/// Returns an error if buffer lengths are misaligned, `kappa` is not
/// positive, or a residual is non-finite.
///
/// # Example
///
/// ```
/// use surface_register::{compute_correspondences, compute_inlier_weights, CorrespondenceParams};
/// use surface_types::unit_cube;
///
/// let cube = unit_cube();
/// let corr = compute_correspondences(&cube, &cube, &CorrespondenceParams::default()).unwrap();
/// let weights = compute_inlier_weights(&cube, &corr, 4.0).unwrap();
/// assert!(weights.iter().all(|&w| (0.0..=1.0).contains(&w)));
/// ```
pub fn compute_inlier_weights(
    floating: &SurfaceMesh,
    correspondences: &Correspondences,
    kappa: f64,
) -> RegistrationResult<Vec<f64>> {
    if floating.is_empty() {
        return Err(RegistrationError::EmptyFloatingMesh);
    }
    if correspondences.len() != floating.vertex_count() {
        return Err(RegistrationError::LengthMismatch {
            what: "correspondences",
            expected: floating.vertex_count(),
            got: correspondences.len(),
        });
    }
    if !(kappa > 0.0) {
        return Err(RegistrationError::InvalidParameter(format!(
            "kappa must be positive, got {kappa}"
        )));
    }

    // Positional residuals; rows with unreliable correspondences are
    // excluded from the scale estimate since their blends draw on
    // flagged-out targets or placeholders.
    let mut residuals = Vec::with_capacity(floating.vertex_count());
    for (vertex, corresponding) in floating.vertices.iter().zip(&correspondences.vertices) {
        let residual = (vertex.position - corresponding.position).norm();
        if !residual.is_finite() {
            return Err(RegistrationError::NonFinite { stage: "inlier residuals" });
        }
        residuals.push(residual);
    }

    let mut reliable_residuals: Vec<f64> = residuals
        .iter()
        .zip(&correspondences.flags)
        .filter(|&(_, &flag)| flag != 0.0)
        .map(|(&r, _)| r)
        .collect();

    if reliable_residuals.is_empty() {
        // Every correspondence is flagged out; downstream transforms see
        // all-zero weights and skip the iteration.
        debug!("all correspondences unreliable, inlier weights are zero");
        return Ok(vec![0.0; floating.vertex_count()]);
    }

    let scale = median(&mut reliable_residuals).max(MIN_SCALE);
    let cutoff = kappa * scale;

    let weights: Vec<f64> = residuals
        .iter()
        .zip(&correspondences.flags)
        .map(|(&residual, &flag)| {
            let normalized = residual / cutoff;
            flag / (1.0 + normalized * normalized)
        })
        .collect();

    debug!(
        scale,
        reliable = reliable_residuals.len(),
        "computed inlier weights"
    );
    Ok(weights)
}

/// Median by in-place selection. The slice must be non-empty.
fn median(values: &mut [f64]) -> f64 {
    let mid = values.len() / 2;
    let (_, pivot, _) =
        values.select_nth_unstable_by(mid, |a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    *pivot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correspondence::{CorrespondenceParams, compute_correspondences};
    use approx::assert_relative_eq;
    use nalgebra::Vector3;
    use surface_types::{Vertex, unit_cube, uv_sphere};

    fn identity_correspondences(mesh: &SurfaceMesh) -> Correspondences {
        Correspondences {
            vertices: mesh.vertices.clone(),
            flags: vec![1.0; mesh.vertex_count()],
        }
    }

    #[test]
    fn perfect_alignment_gets_full_weight() {
        let cube = unit_cube();
        let corr = identity_correspondences(&cube);
        let weights = compute_inlier_weights(&cube, &corr, 4.0).unwrap();
        for &w in &weights {
            assert_relative_eq!(w, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn outliers_are_damped_to_zero() {
        let sphere = uv_sphere(1.0, 6, 12);
        let mut corr = identity_correspondences(&sphere);
        // Push one correspondence ten diameters away.
        corr.vertices[7].position += Vector3::new(20.0, 0.0, 0.0);

        let weights = compute_inlier_weights(&sphere, &corr, 3.0).unwrap();
        assert!(weights[7] < 1e-6, "outlier weight {} too large", weights[7]);
        for (i, &w) in weights.iter().enumerate() {
            if i != 7 {
                assert_relative_eq!(w, 1.0, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn weights_lie_in_unit_interval_and_respect_flags() {
        let cube = unit_cube();
        let mut target = cube.clone();
        target.flags[0] = 0.0;
        target.flags[5] = 0.0;
        let corr =
            compute_correspondences(&cube, &target, &CorrespondenceParams::default()).unwrap();

        let weights = compute_inlier_weights(&cube, &corr, 4.0).unwrap();
        for (&w, &flag) in weights.iter().zip(&corr.flags) {
            assert!((0.0..=1.0).contains(&w));
            if flag == 0.0 {
                assert_eq!(w, 0.0);
            }
        }
    }

    #[test]
    fn all_flagged_out_yields_zero_weights() {
        let cube = unit_cube();
        let corr = Correspondences {
            vertices: vec![Vertex::from_feature([0.0; 6]); cube.vertex_count()],
            flags: vec![0.0; cube.vertex_count()],
        };
        let weights = compute_inlier_weights(&cube, &corr, 4.0).unwrap();
        assert!(weights.iter().all(|&w| w == 0.0));
    }

    #[test]
    fn larger_kappa_is_more_permissive() {
        let sphere = uv_sphere(1.0, 6, 12);
        let mut corr = identity_correspondences(&sphere);
        for v in &mut corr.vertices {
            v.position += Vector3::new(0.01, 0.0, 0.0);
        }
        corr.vertices[3].position += Vector3::new(0.3, 0.0, 0.0);

        let tight = compute_inlier_weights(&sphere, &corr, 1.0).unwrap();
        let loose = compute_inlier_weights(&sphere, &corr, 8.0).unwrap();
        assert!(tight[3] < loose[3]);
    }

    #[test]
    fn rejects_bad_kappa() {
        let cube = unit_cube();
        let corr = identity_correspondences(&cube);
        assert!(matches!(
            compute_inlier_weights(&cube, &corr, 0.0),
            Err(RegistrationError::InvalidParameter(_))
        ));
        assert!(matches!(
            compute_inlier_weights(&cube, &corr, f64::NAN),
            Err(RegistrationError::InvalidParameter(_))
        ));
    }

    #[test]
    fn rejects_misaligned_buffers() {
        let cube = unit_cube();
        let corr = Correspondences {
            vertices: vec![Vertex::from_coords(0.0, 0.0, 0.0); 3],
            flags: vec![1.0; 3],
        };
        assert!(matches!(
            compute_inlier_weights(&cube, &corr, 4.0),
            Err(RegistrationError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn median_of_odd_and_even() {
        assert_relative_eq!(median(&mut [3.0, 1.0, 2.0]), 2.0, epsilon = 1e-12);
        // Even length takes the upper middle element.
        assert_relative_eq!(median(&mut [4.0, 1.0, 3.0, 2.0]), 3.0, epsilon = 1e-12);
    }
}
