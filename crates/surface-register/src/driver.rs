//! Registration drivers: rigid, non-rigid, and multi-resolution pyramid.
//!
//! Each driver runs the same iteration skeleton - correspondence, inlier
//! reweighting, transform - and differs in which transformer it applies and
//! how parameters ramp across iterations. Drivers mutate a scratch copy and
//! commit into the caller's mesh only when every iteration succeeded, so a
//! failed registration leaves the input untouched.

use surface_types::SurfaceMesh;
use tracing::{debug, info};

use crate::correspondence::{CorrespondenceParams, Correspondences, compute_correspondences};
use crate::downsample::downsample_mesh;
use crate::error::{RegistrationError, RegistrationResult};
use crate::inlier::compute_inlier_weights;
use crate::rigid::compute_rigid_transformation;
use crate::scale_shift::scale_shift_mesh;
use crate::transform::RigidTransform;
use crate::viscoelastic::{
    DeformationState, ViscoElasticParams, compute_nonrigid_transformation,
};

/// Parameters for rigid registration.
#[derive(Debug, Clone)]
pub struct RigidRegistrationParams {
    /// Number of correspondence/transform iterations. Default: 20.
    pub num_iterations: usize,

    /// Correspondence estimation parameters.
    pub correspondence: CorrespondenceParams,

    /// Inlier cutoff in robust scales. Default: 4.0.
    pub inlier_kappa: f64,

    /// Estimate a uniform scale along with the rigid motion.
    /// Default: false.
    pub allow_scaling: bool,
}

impl Default for RigidRegistrationParams {
    fn default() -> Self {
        Self {
            num_iterations: 20,
            correspondence: CorrespondenceParams::default(),
            inlier_kappa: 4.0,
            allow_scaling: false,
        }
    }
}

impl RigidRegistrationParams {
    /// Creates parameters with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the iteration count.
    #[must_use]
    pub const fn with_num_iterations(mut self, n: usize) -> Self {
        self.num_iterations = n;
        self
    }

    /// Sets the correspondence parameters.
    #[must_use]
    pub const fn with_correspondence(mut self, correspondence: CorrespondenceParams) -> Self {
        self.correspondence = correspondence;
        self
    }

    /// Sets the inlier kappa.
    #[must_use]
    pub const fn with_inlier_kappa(mut self, kappa: f64) -> Self {
        self.inlier_kappa = kappa;
        self
    }

    /// Enables similarity (scaled) alignment.
    #[must_use]
    pub const fn with_scaling(mut self, allow: bool) -> Self {
        self.allow_scaling = allow;
        self
    }
}

/// Outcome of a rigid registration.
#[derive(Debug, Clone)]
pub struct RigidRegistrationResult {
    /// Product of all per-iteration transforms, mapping the input floating
    /// mesh onto the result.
    pub transform: RigidTransform,

    /// Iterations performed.
    pub iterations: usize,

    /// Weighted RMS residual after the final transform, infinite when no
    /// iteration had usable correspondences.
    pub rms_residual: f64,
}

/// Parameters for single-resolution non-rigid registration.
#[derive(Debug, Clone)]
pub struct NonrigidRegistrationParams {
    /// Number of outer iterations. Default: 60.
    pub num_iterations: usize,

    /// Correspondence estimation parameters.
    pub correspondence: CorrespondenceParams,

    /// Inlier cutoff in robust scales. Default: 4.0.
    pub inlier_kappa: f64,

    /// Gaussian smoothing kernel width. Default: 3.0.
    pub sigma_smoothing: f64,

    /// Neighbours per vertex in the smoothing kernel. Default: 10.
    pub num_smoothing_neighbours: usize,

    /// Viscous pass count at the first iteration. Default: 50.
    pub viscous_iterations_start: usize,

    /// Viscous pass count at the last iteration. Default: 1.
    pub viscous_iterations_end: usize,

    /// Elastic pass count at the first iteration. Default: 50.
    pub elastic_iterations_start: usize,

    /// Elastic pass count at the last iteration. Default: 1.
    pub elastic_iterations_end: usize,
}

impl Default for NonrigidRegistrationParams {
    fn default() -> Self {
        Self {
            num_iterations: 60,
            correspondence: CorrespondenceParams::default(),
            inlier_kappa: 4.0,
            sigma_smoothing: 3.0,
            num_smoothing_neighbours: 10,
            viscous_iterations_start: 50,
            viscous_iterations_end: 1,
            elastic_iterations_start: 50,
            elastic_iterations_end: 1,
        }
    }
}

impl NonrigidRegistrationParams {
    /// Creates parameters with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the iteration count.
    #[must_use]
    pub const fn with_num_iterations(mut self, n: usize) -> Self {
        self.num_iterations = n;
        self
    }

    /// Sets the correspondence parameters.
    #[must_use]
    pub const fn with_correspondence(mut self, correspondence: CorrespondenceParams) -> Self {
        self.correspondence = correspondence;
        self
    }

    /// Sets the inlier kappa.
    #[must_use]
    pub const fn with_inlier_kappa(mut self, kappa: f64) -> Self {
        self.inlier_kappa = kappa;
        self
    }

    /// Sets the smoothing kernel width.
    #[must_use]
    pub const fn with_sigma_smoothing(mut self, sigma: f64) -> Self {
        self.sigma_smoothing = sigma;
        self
    }

    /// Sets the smoothing neighbour count.
    #[must_use]
    pub const fn with_num_smoothing_neighbours(mut self, k: usize) -> Self {
        self.num_smoothing_neighbours = k;
        self
    }

    /// Sets the viscous ramp endpoints.
    #[must_use]
    pub const fn with_viscous_ramp(mut self, start: usize, end: usize) -> Self {
        self.viscous_iterations_start = start;
        self.viscous_iterations_end = end;
        self
    }

    /// Sets the elastic ramp endpoints.
    #[must_use]
    pub const fn with_elastic_ramp(mut self, start: usize, end: usize) -> Self {
        self.elastic_iterations_start = start;
        self.elastic_iterations_end = end;
        self
    }
}

/// Outcome of a non-rigid registration.
#[derive(Debug, Clone)]
pub struct NonrigidRegistrationResult {
    /// Iterations performed.
    pub iterations: usize,

    /// Weighted RMS residual after the final iteration, infinite when no
    /// iteration had usable correspondences.
    pub rms_residual: f64,
}

/// Parameters for pyramid (multi-resolution) non-rigid registration.
#[derive(Debug, Clone)]
pub struct PyramidRegistrationParams {
    /// Total non-rigid iterations across all levels. Default: 60.
    pub num_iterations: usize,

    /// Number of pyramid levels, coarsest first. Default: 3.
    pub num_pyramid_layers: usize,

    /// Percent of floating faces removed at the coarsest level.
    /// Default: 90.
    pub downsample_floating_start: f64,

    /// Percent of floating faces removed at the finest level. Default: 0.
    pub downsample_floating_end: f64,

    /// Percent of target faces removed at the coarsest level. Default: 90.
    pub downsample_target_start: f64,

    /// Percent of target faces removed at the finest level. Default: 0.
    pub downsample_target_end: f64,

    /// Correspondence estimation parameters.
    pub correspondence: CorrespondenceParams,

    /// Inlier cutoff in robust scales. Default: 4.0.
    pub inlier_kappa: f64,

    /// Gaussian smoothing kernel width. Default: 3.0.
    pub sigma_smoothing: f64,

    /// Neighbours per vertex in the smoothing kernel. Default: 10.
    pub num_smoothing_neighbours: usize,

    /// Viscous pass count at the first global iteration. Default: 50.
    pub viscous_iterations_start: usize,

    /// Viscous pass count at the last global iteration. Default: 1.
    pub viscous_iterations_end: usize,

    /// Elastic pass count at the first global iteration. Default: 50.
    pub elastic_iterations_start: usize,

    /// Elastic pass count at the last global iteration. Default: 1.
    pub elastic_iterations_end: usize,
}

impl Default for PyramidRegistrationParams {
    fn default() -> Self {
        Self {
            num_iterations: 60,
            num_pyramid_layers: 3,
            downsample_floating_start: 90.0,
            downsample_floating_end: 0.0,
            downsample_target_start: 90.0,
            downsample_target_end: 0.0,
            correspondence: CorrespondenceParams::default(),
            inlier_kappa: 4.0,
            sigma_smoothing: 3.0,
            num_smoothing_neighbours: 10,
            viscous_iterations_start: 50,
            viscous_iterations_end: 1,
            elastic_iterations_start: 50,
            elastic_iterations_end: 1,
        }
    }
}

impl PyramidRegistrationParams {
    /// Creates parameters with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the total iteration count.
    #[must_use]
    pub const fn with_num_iterations(mut self, n: usize) -> Self {
        self.num_iterations = n;
        self
    }

    /// Sets the layer count.
    #[must_use]
    pub const fn with_num_pyramid_layers(mut self, layers: usize) -> Self {
        self.num_pyramid_layers = layers;
        self
    }

    /// Sets the floating downsample ramp, in percent of faces removed.
    #[must_use]
    pub const fn with_floating_downsampling(mut self, start: f64, end: f64) -> Self {
        self.downsample_floating_start = start;
        self.downsample_floating_end = end;
        self
    }

    /// Sets the target downsample ramp, in percent of faces removed.
    #[must_use]
    pub const fn with_target_downsampling(mut self, start: f64, end: f64) -> Self {
        self.downsample_target_start = start;
        self.downsample_target_end = end;
        self
    }

    /// Sets the correspondence parameters.
    #[must_use]
    pub const fn with_correspondence(mut self, correspondence: CorrespondenceParams) -> Self {
        self.correspondence = correspondence;
        self
    }

    /// Sets the inlier kappa.
    #[must_use]
    pub const fn with_inlier_kappa(mut self, kappa: f64) -> Self {
        self.inlier_kappa = kappa;
        self
    }

    /// Sets the smoothing kernel width.
    #[must_use]
    pub const fn with_sigma_smoothing(mut self, sigma: f64) -> Self {
        self.sigma_smoothing = sigma;
        self
    }

    /// Sets the viscous ramp endpoints.
    #[must_use]
    pub const fn with_viscous_ramp(mut self, start: usize, end: usize) -> Self {
        self.viscous_iterations_start = start;
        self.viscous_iterations_end = end;
        self
    }

    /// Sets the elastic ramp endpoints.
    #[must_use]
    pub const fn with_elastic_ramp(mut self, start: usize, end: usize) -> Self {
        self.elastic_iterations_start = start;
        self.elastic_iterations_end = end;
        self
    }
}

/// Outcome of a pyramid registration.
#[derive(Debug, Clone)]
pub struct PyramidRegistrationResult {
    /// Total iterations performed across levels.
    pub iterations: usize,

    /// Pyramid levels run.
    pub layers: usize,

    /// Weighted RMS residual after the final iteration of the finest level.
    pub rms_residual: f64,
}

/// Rigidly registers the floating mesh onto the target.
///
/// On success the floating mesh holds the aligned positions and rotated
/// normals; on failure it is untouched.
///
/// # Errors
///
/// Returns an error on invalid input or when any iteration degenerates
/// (see [`RegistrationError`]).
///
/// # Example
///
/// ```
/// use surface_register::{RigidRegistrationParams, rigid_registration};
/// use surface_types::unit_cube;
///
/// let mut floating = unit_cube();
/// let target = unit_cube();
/// let result = rigid_registration(
///     &mut floating,
///     &target,
///     &RigidRegistrationParams::new().with_num_iterations(5),
/// )
/// .unwrap();
/// assert!(result.transform.is_identity(1e-6));
/// ```
pub fn rigid_registration(
    floating: &mut SurfaceMesh,
    target: &SurfaceMesh,
    params: &RigidRegistrationParams,
) -> RegistrationResult<RigidRegistrationResult> {
    validate_pair(floating, target)?;
    if params.num_iterations == 0 {
        return Err(RegistrationError::InvalidParameter(
            "num_iterations must be at least 1".to_string(),
        ));
    }

    let mut scratch = floating.clone();
    let mut composed = RigidTransform::identity();
    let mut rms_residual = f64::INFINITY;

    for iteration in 0..params.num_iterations {
        let correspondences =
            compute_correspondences(&scratch, target, &params.correspondence)?;
        let weights = compute_inlier_weights(&scratch, &correspondences, params.inlier_kappa)?;

        if weights.iter().sum::<f64>() <= 0.0 {
            // Every correspondence is flagged out; transforming would be
            // meaningless, so this iteration is a no-op.
            debug!(iteration, "no usable correspondences, skipping transform");
            continue;
        }

        let transform = compute_rigid_transformation(
            &mut scratch,
            &correspondences,
            &weights,
            params.allow_scaling,
        )?;
        composed = transform.compose(&composed);
        rms_residual = weighted_rms(&scratch, &correspondences, &weights);
        debug!(iteration, rms_residual, "rigid iteration complete");
    }

    info!(
        iterations = params.num_iterations,
        rms_residual, "rigid registration complete"
    );
    *floating = scratch;
    Ok(RigidRegistrationResult {
        transform: composed,
        iterations: params.num_iterations,
        rms_residual,
    })
}

/// Non-rigidly registers the floating mesh onto the target at a single
/// resolution.
///
/// Viscous and elastic smoothing counts ramp linearly from their start to
/// end values across the iterations.
///
/// # Errors
///
/// Returns an error on invalid input or when any iteration degenerates.
pub fn nonrigid_registration(
    floating: &mut SurfaceMesh,
    target: &SurfaceMesh,
    params: &NonrigidRegistrationParams,
) -> RegistrationResult<NonrigidRegistrationResult> {
    validate_pair(floating, target)?;
    if params.num_iterations == 0 {
        return Err(RegistrationError::InvalidParameter(
            "num_iterations must be at least 1".to_string(),
        ));
    }

    let schedule: Vec<(usize, usize)> = (0..params.num_iterations)
        .map(|i| {
            (
                ramp_count(
                    params.viscous_iterations_start,
                    params.viscous_iterations_end,
                    i,
                    params.num_iterations,
                ),
                ramp_count(
                    params.elastic_iterations_start,
                    params.elastic_iterations_end,
                    i,
                    params.num_iterations,
                ),
            )
        })
        .collect();

    let mut scratch = floating.clone();
    let rms_residual = run_nonrigid_stage(
        &mut scratch,
        target,
        &params.correspondence,
        params.inlier_kappa,
        params.num_smoothing_neighbours,
        params.sigma_smoothing,
        &schedule,
    )?;

    info!(
        iterations = params.num_iterations,
        rms_residual, "non-rigid registration complete"
    );
    *floating = scratch;
    Ok(NonrigidRegistrationResult {
        iterations: params.num_iterations,
        rms_residual,
    })
}

/// Non-rigidly registers through a coarse-to-fine pyramid.
///
/// Each level works on decimations of the input meshes; the deformed state
/// moves between levels through the scale shifter, and the finest level's
/// result is written back at the input resolution.
///
/// # Errors
///
/// Returns an error on invalid input, decimation failure, or a degenerate
/// iteration at any level.
pub fn pyramid_registration(
    floating: &mut SurfaceMesh,
    target: &SurfaceMesh,
    params: &PyramidRegistrationParams,
) -> RegistrationResult<PyramidRegistrationResult> {
    validate_pair(floating, target)?;
    let layers = params.num_pyramid_layers;
    if layers == 0 {
        return Err(RegistrationError::InvalidParameter(
            "num_pyramid_layers must be at least 1".to_string(),
        ));
    }
    if params.num_iterations == 0 {
        return Err(RegistrationError::InvalidParameter(
            "num_iterations must be at least 1".to_string(),
        ));
    }
    for percent in [
        params.downsample_floating_start,
        params.downsample_floating_end,
        params.downsample_target_start,
        params.downsample_target_end,
    ] {
        if !(0.0..100.0).contains(&percent) {
            return Err(RegistrationError::InvalidParameter(format!(
                "downsample percentage {percent} outside [0, 100)"
            )));
        }
    }

    let iterations_per_level = (params.num_iterations / layers).max(1);
    let total_iterations = iterations_per_level * layers;
    let schedule: Vec<(usize, usize)> = (0..total_iterations)
        .map(|i| {
            (
                ramp_count(
                    params.viscous_iterations_start,
                    params.viscous_iterations_end,
                    i,
                    total_iterations,
                ),
                ramp_count(
                    params.elastic_iterations_start,
                    params.elastic_iterations_end,
                    i,
                    total_iterations,
                ),
            )
        })
        .collect();

    let mut previous: Option<(SurfaceMesh, Vec<u32>)> = None;
    let mut rms_residual = f64::INFINITY;

    for level in 0..layers {
        let floating_ratio = level_ratio(
            params.downsample_floating_start,
            params.downsample_floating_end,
            level,
            layers,
        ) / 100.0;
        let target_ratio = level_ratio(
            params.downsample_target_start,
            params.downsample_target_end,
            level,
            layers,
        ) / 100.0;

        // Levels decimate the caller's meshes; the deformation so far lives
        // only in the previous level's vertices and is stitched on below.
        let floating_level = downsample_mesh(floating, floating_ratio)?;
        let target_level = downsample_mesh(target, target_ratio)?;
        let mut level_mesh = floating_level.mesh;

        if let Some((previous_mesh, previous_indices)) = &previous {
            scale_shift_mesh(
                previous_mesh,
                previous_indices,
                &mut level_mesh,
                &floating_level.original_indices,
            )?;
            level_mesh.compute_vertex_normals();
        }

        info!(
            level,
            vertices = level_mesh.vertex_count(),
            target_vertices = target_level.mesh.vertex_count(),
            floating_ratio,
            target_ratio,
            "starting pyramid level"
        );

        let window =
            &schedule[level * iterations_per_level..(level + 1) * iterations_per_level];
        rms_residual = run_nonrigid_stage(
            &mut level_mesh,
            &target_level.mesh,
            &params.correspondence,
            params.inlier_kappa,
            params.num_smoothing_neighbours,
            params.sigma_smoothing,
            window,
        )?;

        previous = Some((level_mesh, floating_level.original_indices));
    }

    let Some((last_mesh, last_indices)) = previous else {
        return Err(RegistrationError::InvalidParameter(
            "pyramid produced no levels".to_string(),
        ));
    };

    // Write the finest level back at the input resolution. With a finest
    // ratio of zero the index map is the identity and this is an exact copy.
    let mut result = floating.clone();
    let identity: Vec<u32> = (0..floating.vertex_count() as u32).collect();
    scale_shift_mesh(&last_mesh, &last_indices, &mut result, &identity)?;
    result.compute_vertex_normals();

    info!(
        layers,
        iterations = total_iterations,
        rms_residual, "pyramid registration complete"
    );
    *floating = result;
    Ok(PyramidRegistrationResult {
        iterations: total_iterations,
        layers,
        rms_residual,
    })
}

/// Shared non-rigid iteration loop over a precomputed smoothing schedule.
fn run_nonrigid_stage(
    scratch: &mut SurfaceMesh,
    target: &SurfaceMesh,
    correspondence: &CorrespondenceParams,
    inlier_kappa: f64,
    num_smoothing_neighbours: usize,
    sigma_smoothing: f64,
    schedule: &[(usize, usize)],
) -> RegistrationResult<f64> {
    let mut state = DeformationState::new(scratch);
    let mut rms_residual = f64::INFINITY;

    for (iteration, &(viscous, elastic)) in schedule.iter().enumerate() {
        let correspondences = compute_correspondences(scratch, target, correspondence)?;
        let weights = compute_inlier_weights(scratch, &correspondences, inlier_kappa)?;

        if weights.iter().sum::<f64>() <= 0.0 {
            debug!(iteration, "no usable correspondences, skipping transform");
            continue;
        }

        let params = ViscoElasticParams::new()
            .with_num_neighbours(num_smoothing_neighbours)
            .with_sigma(sigma_smoothing)
            .with_viscous_iterations(viscous)
            .with_elastic_iterations(elastic);
        compute_nonrigid_transformation(scratch, &correspondences, &weights, &mut state, &params)?;

        rms_residual = weighted_rms(scratch, &correspondences, &weights);
        debug!(iteration, viscous, elastic, rms_residual, "non-rigid iteration complete");
    }

    Ok(rms_residual)
}

/// Weighted RMS positional residual against the correspondences.
fn weighted_rms(mesh: &SurfaceMesh, correspondences: &Correspondences, weights: &[f64]) -> f64 {
    let mut sum = 0.0;
    let mut weight_sum = 0.0;
    for ((vertex, corresponding), &w) in mesh
        .vertices
        .iter()
        .zip(&correspondences.vertices)
        .zip(weights)
    {
        sum += w * (vertex.position - corresponding.position).norm_squared();
        weight_sum += w;
    }
    if weight_sum > 0.0 {
        (sum / weight_sum).sqrt()
    } else {
        f64::INFINITY
    }
}

/// Linear ramp from `start` to `end` over `total` iterations, floored and
/// clamped to at least one pass.
fn ramp_count(start: usize, end: usize, iteration: usize, total: usize) -> usize {
    let value = if total <= 1 {
        start as f64
    } else {
        let fraction = iteration as f64 / (total - 1) as f64;
        start as f64 + (end as f64 - start as f64) * fraction
    };
    (value.floor() as usize).max(1)
}

/// Per-level decimation ratio: level 0 is the coarsest.
fn level_ratio(start_percent: f64, end_percent: f64, level: usize, layers: usize) -> f64 {
    if layers <= 1 {
        end_percent
    } else {
        let fraction = level as f64 / (layers - 1) as f64;
        start_percent + (end_percent - start_percent) * fraction
    }
}

/// Input validation shared by all drivers.
fn validate_pair(floating: &SurfaceMesh, target: &SurfaceMesh) -> RegistrationResult<()> {
    if floating.is_empty() {
        return Err(RegistrationError::EmptyFloatingMesh);
    }
    if target.is_empty() {
        return Err(RegistrationError::EmptyTargetMesh);
    }
    for mesh in [floating, target] {
        for vertex in &mesh.vertices {
            if !vertex.feature().iter().all(|v| v.is_finite()) {
                return Err(RegistrationError::NonFinite { stage: "input features" });
            }
        }
    }
    Ok(())
}
