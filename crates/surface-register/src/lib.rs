//! Non-rigid surface registration.
//!
//! Deforms a *floating* triangle mesh onto a *target* mesh while preserving
//! the floating topology, tolerating noise, partial overlap, and moderate
//! initial misalignment. The pipeline iterates four stages:
//!
//! 1. **Correspondences** - symmetric weighted k-NN blending over the 6-D
//!    feature space of position + unit normal
//!    ([`compute_correspondences`])
//! 2. **Inlier weights** - robust residual-based damping of outlier
//!    correspondences ([`compute_inlier_weights`])
//! 3. **Transform** - either a closed-form weighted rigid/similarity
//!    alignment via the quaternion method
//!    ([`compute_rigid_transformation`]) or a visco-elastic deformation
//!    update ([`compute_nonrigid_transformation`])
//! 4. repeat, with regularization ramping down across iterations
//!
//! Three drivers compose the stages: [`rigid_registration`],
//! [`nonrigid_registration`], and [`pyramid_registration`], the last
//! running the non-rigid loop through a coarse-to-fine stack of decimated
//! meshes ([`downsample_mesh`], [`scale_shift_mesh`]).
//!
//! # Example
//!
//! ```
//! use surface_register::{PyramidRegistrationParams, pyramid_registration};
//! use surface_types::uv_sphere;
//! use nalgebra::Vector3;
//!
//! let mut floating = uv_sphere(1.0, 8, 16);
//! let mut target = uv_sphere(1.0, 8, 16);
//! target.translate(Vector3::new(0.05, 0.0, 0.0));
//!
//! let params = PyramidRegistrationParams::new()
//!     .with_num_iterations(6)
//!     .with_num_pyramid_layers(2)
//!     .with_floating_downsampling(50.0, 0.0)
//!     .with_target_downsampling(50.0, 0.0)
//!     .with_viscous_ramp(3, 1)
//!     .with_elastic_ramp(3, 1);
//! let result = pyramid_registration(&mut floating, &target, &params).unwrap();
//! assert_eq!(result.layers, 2);
//! ```
//!
//! # Concurrency
//!
//! Drivers are single-threaded and synchronous: stages run in strict
//! sequence. Inside a stage, per-row work (correspondence rows, smoothing
//! queries) is parallelized with rayon, while every reduction runs
//! sequentially in index order, so results are reproducible bit-for-bit
//! for a given input.

#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

mod correspondence;
mod downsample;
mod driver;
mod error;
mod inlier;
mod rigid;
mod scale_shift;
mod spatial;
mod transform;
mod viscoelastic;

pub use correspondence::{CorrespondenceParams, Correspondences, compute_correspondences};
pub use downsample::downsample_mesh;
pub use driver::{
    NonrigidRegistrationParams, NonrigidRegistrationResult, PyramidRegistrationParams,
    PyramidRegistrationResult, RigidRegistrationParams, RigidRegistrationResult,
    nonrigid_registration, pyramid_registration, rigid_registration,
};
pub use error::{RegistrationError, RegistrationResult};
pub use inlier::compute_inlier_weights;
pub use rigid::compute_rigid_transformation;
pub use scale_shift::scale_shift_mesh;
pub use spatial::{FeatureIndex, Neighbor, PositionIndex};
pub use transform::RigidTransform;
pub use viscoelastic::{
    DeformationState, ViscoElasticParams, compute_nonrigid_transformation,
};

// Re-export the decimation surface used by the pyramid so callers need not
// depend on surface-decimate directly.
pub use surface_decimate::{DecimateParams, Decimation};
