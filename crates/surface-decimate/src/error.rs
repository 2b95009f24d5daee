//! Error types for decimation.

use thiserror::Error;

/// Errors that can occur during decimation.
#[derive(Debug, Error)]
pub enum DecimateError {
    /// Mesh has no faces to decimate.
    #[error("mesh has no faces")]
    NoFaces,

    /// Removal ratio outside `[0, 1)`.
    #[error("invalid removal ratio {0} (must be in [0.0, 1.0))")]
    InvalidRatio(f64),

    /// Flag vector length does not match the vertex count.
    #[error("flag count {flags} does not match vertex count {vertices}")]
    FlagMismatch {
        /// Number of flags supplied.
        flags: usize,
        /// Number of vertices in the mesh.
        vertices: usize,
    },
}

/// Result type for decimation operations.
pub type DecimateResult<T> = Result<T, DecimateError>;
