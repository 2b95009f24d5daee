//! Visco-elastic non-rigid deformation.
//!
//! The instantaneous pull toward the correspondences (the force field) is
//! Gaussian-smoothed over each vertex's spatial neighborhood a configurable
//! number of times (viscous regularization), then folded into the
//! accumulated displacement field, which is smoothed the same way (elastic
//! regularization). Smoothing counts are typically ramped down across
//! iterations: early iterations deform near-globally, late iterations
//! recover fine detail.
//!
//! The displacement field is cumulative from the start of a non-rigid
//! stage. It lives in a [`DeformationState`] owned by the driver and passed
//! in explicitly, so the stage boundary is visible in the call graph.

use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use surface_types::SurfaceMesh;
use tracing::debug;

use crate::correspondence::Correspondences;
use crate::error::{RegistrationError, RegistrationResult};
use crate::spatial::{Neighbor, PositionIndex};

/// Gaussian row sums below this keep the previous field value rather than
/// dividing.
const MIN_WEIGHT_SUM: f64 = 1e-12;

/// Parameters for one visco-elastic update.
#[derive(Debug, Clone)]
pub struct ViscoElasticParams {
    /// Neighbours per vertex for the Gaussian smoothing. Default: 10.
    pub num_neighbours: usize,

    /// Standard deviation of the smoothing kernel, in model units.
    /// Default: 3.0.
    pub sigma: f64,

    /// Smoothing passes over the force field. Default: 50.
    pub num_viscous_iterations: usize,

    /// Smoothing passes over the accumulated displacement field.
    /// Default: 50.
    pub num_elastic_iterations: usize,
}

impl Default for ViscoElasticParams {
    fn default() -> Self {
        Self {
            num_neighbours: 10,
            sigma: 3.0,
            num_viscous_iterations: 50,
            num_elastic_iterations: 50,
        }
    }
}

impl ViscoElasticParams {
    /// Creates parameters with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the smoothing neighbour count.
    #[must_use]
    pub const fn with_num_neighbours(mut self, k: usize) -> Self {
        self.num_neighbours = k;
        self
    }

    /// Sets the smoothing kernel width.
    #[must_use]
    pub const fn with_sigma(mut self, sigma: f64) -> Self {
        self.sigma = sigma;
        self
    }

    /// Sets the viscous pass count.
    #[must_use]
    pub const fn with_viscous_iterations(mut self, n: usize) -> Self {
        self.num_viscous_iterations = n;
        self
    }

    /// Sets the elastic pass count.
    #[must_use]
    pub const fn with_elastic_iterations(mut self, n: usize) -> Self {
        self.num_elastic_iterations = n;
        self
    }
}

/// Accumulated deformation of one non-rigid stage.
///
/// Captures the floating positions at stage start; the displacement field
/// is always applied against those, never against intermediate positions,
/// so repeated smoothing cannot compound application error.
#[derive(Debug, Clone)]
pub struct DeformationState {
    origin: Vec<Point3<f64>>,
    displacement: Vec<Vector3<f64>>,
}

impl DeformationState {
    /// Starts a new stage from the mesh's current positions.
    #[must_use]
    pub fn new(mesh: &SurfaceMesh) -> Self {
        Self {
            origin: mesh.positions().collect(),
            displacement: vec![Vector3::zeros(); mesh.vertex_count()],
        }
    }

    /// Number of tracked vertices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.origin.len()
    }

    /// Whether the state tracks no vertices.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.origin.is_empty()
    }

    /// The accumulated displacement per vertex.
    #[must_use]
    pub fn displacement(&self) -> &[Vector3<f64>] {
        &self.displacement
    }
}

/// Applies one visco-elastic update to the floating mesh in place.
///
/// Normals are recomputed from the deformed face connectivity afterwards.
/// A mesh with fewer than two vertices has no smoothing neighborhood and is
/// left untouched.
///
/// # Errors
///
/// Returns an error if buffers are misaligned, a weight is negative, all
/// weights are zero, parameters are out of range, or the deformed
/// positions come out non-finite.
pub fn compute_nonrigid_transformation(
    floating: &mut SurfaceMesh,
    correspondences: &Correspondences,
    weights: &[f64],
    state: &mut DeformationState,
    params: &ViscoElasticParams,
) -> RegistrationResult<()> {
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
    if state.len() != n {
        return Err(RegistrationError::LengthMismatch {
            what: "deformation state",
            expected: n,
            got: state.len(),
        });
    }
    if params.num_neighbours == 0 {
        return Err(RegistrationError::InvalidParameter(
            "num_neighbours must be at least 1".to_string(),
        ));
    }
    if !(params.sigma > 0.0) {
        return Err(RegistrationError::InvalidParameter(format!(
            "sigma must be positive, got {}",
            params.sigma
        )));
    }
    let mut weight_sum = 0.0;
    for (index, &value) in weights.iter().enumerate() {
        if value < 0.0 {
            return Err(RegistrationError::NegativeWeight { index, value });
        }
        weight_sum += value;
    }
    if weight_sum <= 0.0 {
        return Err(RegistrationError::ZeroWeightSum);
    }

    if n < 2 {
        // No smoothing neighborhood exists; the non-rigid update is a no-op.
        debug!("fewer than two vertices, skipping visco-elastic update");
        return Ok(());
    }

    // Instantaneous pull toward the correspondences. Vertices with zero
    // inlier weight or a zero participation flag exert and feel no force.
    let mut force: Vec<Vector3<f64>> = (0..n)
        .map(|i| {
            if weights[i] == 0.0 || floating.flags[i] == 0.0 {
                Vector3::zeros()
            } else {
                correspondences.vertices[i].position - floating.vertices[i].position
            }
        })
        .collect();

    // Neighborhoods come from the current floating positions and stay fixed
    // for the whole call; the index is dropped on return.
    let index = PositionIndex::build(&floating.vertices);
    let k = params.num_neighbours.min(n - 1);
    let neighborhoods: Vec<Vec<Neighbor>> = floating
        .vertices
        .par_iter()
        .enumerate()
        .map(|(i, v)| {
            index.knn_excluding(&[v.position.x, v.position.y, v.position.z], k, i)
        })
        .collect();

    // Viscous passes regularize the force field.
    let mut scratch = vec![Vector3::zeros(); n];
    for _ in 0..params.num_viscous_iterations {
        smooth_field(&force, &mut scratch, &neighborhoods, weights, params.sigma);
        std::mem::swap(&mut force, &mut scratch);
    }

    // Elastic passes regularize the accumulated displacement.
    let mut displacement: Vec<Vector3<f64>> = state
        .displacement
        .iter()
        .zip(&force)
        .map(|(d, f)| d + f)
        .collect();
    for _ in 0..params.num_elastic_iterations {
        smooth_field(&displacement, &mut scratch, &neighborhoods, weights, params.sigma);
        std::mem::swap(&mut displacement, &mut scratch);
    }
    state.displacement = displacement;

    // Deform from the stage origin, then rebuild normals on the new shape.
    for i in 0..n {
        let position = state.origin[i] + state.displacement[i];
        if !position.coords.iter().all(|v| v.is_finite()) {
            return Err(RegistrationError::NonFinite { stage: "viscoelastic positions" });
        }
        floating.vertices[i].position = position;
    }
    floating.compute_vertex_normals();

    Ok(())
}

/// One double-buffered Gaussian smoothing pass: `out[i]` is the weighted
/// average of `field` over vertex `i`'s neighborhood, with the inlier
/// weights as extra multipliers. Rows with a vanishing weight sum keep
/// their previous value.
fn smooth_field(
    field: &[Vector3<f64>],
    out: &mut [Vector3<f64>],
    neighborhoods: &[Vec<Neighbor>],
    weights: &[f64],
    sigma: f64,
) {
    let inv_two_sigma_squared = 0.5 / (sigma * sigma);

    out.par_iter_mut().enumerate().for_each(|(i, row)| {
        let mut sum = Vector3::zeros();
        let mut weight_sum = 0.0;

        for neighbor in &neighborhoods[i] {
            let gaussian = (-neighbor.distance_squared * inv_two_sigma_squared).exp();
            let combined = gaussian * weights[neighbor.index];
            sum += combined * field[neighbor.index];
            weight_sum += combined;
        }

        *row = if weight_sum < MIN_WEIGHT_SUM {
            field[i]
        } else {
            sum / weight_sum
        };
    });
}
