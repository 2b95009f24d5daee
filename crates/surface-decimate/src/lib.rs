//! Mesh decimation for registration pyramids.
//!
//! Quadric error metric (QEM) edge collapse, with the bookkeeping a
//! multi-resolution registration needs on top of plain simplification:
//!
//! - every surviving vertex records its row in the input mesh
//!   ([`Decimation::original_indices`])
//! - per-vertex participation flags are carried over unchanged
//! - normals are recomputed from the decimated connectivity
//! - the target is expressed as the fraction of faces to *remove*, matching
//!   how pyramid levels are scheduled
//!
//! # Example
//!
//! ```
//! use surface_decimate::{decimate_mesh, DecimateParams};
//! use surface_types::uv_sphere;
//!
//! let sphere = uv_sphere(1.0, 10, 20);
//! let coarse = decimate_mesh(&sphere, &DecimateParams::with_removal_ratio(0.9)).unwrap();
//! println!("{coarse}");
//! ```

#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

mod decimate;
mod error;
mod params;
mod quadric;
mod result;

pub use decimate::decimate_mesh;
pub use error::{DecimateError, DecimateResult};
pub use params::DecimateParams;
pub use result::Decimation;
