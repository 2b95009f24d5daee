//! Core mesh types for non-rigid surface registration.
//!
//! This crate defines the shared data model of the registration workspace:
//!
//! - [`Vertex`] - a 3D position paired with a mandatory unit normal; its
//!   [`Vertex::feature`] is the 6-D vector the correspondence search runs on
//! - [`SurfaceMesh`] - indexed triangle mesh with per-vertex participation
//!   flags in {0, 1}
//! - normal recomputation from face connectivity (area-weighted) and
//!   boundary-vertex flagging
//! - parametric test surfaces ([`unit_cube`], [`uv_sphere`], [`flat_disk`])
//!
//! # Example
//!
//! ```
//! use surface_types::unit_cube;
//!
//! let mut cube = unit_cube();
//! cube.flag_boundary_vertices();
//!
//! // A closed mesh has no boundary, so every vertex participates.
//! assert!(cube.flags.iter().all(|&f| f == 1.0));
//! ```

#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

mod mesh;
mod shapes;
mod vertex;

pub use mesh::{SurfaceMesh, unit_cube};
pub use shapes::{flat_disk, uv_sphere};
pub use vertex::{FEATURE_DIM, Vertex};

// Re-export the nalgebra types that appear in this crate's public API.
pub use nalgebra::{Point3, Vector3};
