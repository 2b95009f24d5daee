//! Narrow contract over the external decimator.
//!
//! The registration pyramid talks to quadric decimation through exactly one
//! call: remove a fraction of faces, get back the decimated mesh with
//! carried-over flags, recomputed normals, and the survivor-to-base index
//! map.

use surface_decimate::{DecimateParams, Decimation, decimate_mesh};
use surface_types::SurfaceMesh;

use crate::error::RegistrationResult;

/// Decimates a mesh for a pyramid level.
///
/// `removal_ratio` is the fraction of faces to remove, in `[0, 1)`; 0 is an
/// identity pass that still produces the index map.
///
/// # Errors
///
/// Returns an error if the ratio is out of range or the mesh has no faces
/// while removal was requested.
///
/// # Example
///
/// ```
/// use surface_register::downsample_mesh;
/// use surface_types::uv_sphere;
///
/// let sphere = uv_sphere(1.0, 10, 20);
/// let coarse = downsample_mesh(&sphere, 0.9).unwrap();
/// assert!(coarse.final_faces <= sphere.face_count() / 8);
/// ```
pub fn downsample_mesh(mesh: &SurfaceMesh, removal_ratio: f64) -> RegistrationResult<Decimation> {
    let decimation = decimate_mesh(mesh, &DecimateParams::with_removal_ratio(removal_ratio))?;
    Ok(decimation)
}
