//! Error types for registration.

use thiserror::Error;

/// Errors that can occur during surface registration.
///
/// The pipeline fails loudly instead of propagating NaNs: a degenerate
/// iteration anywhere aborts the whole registration and the caller's mesh is
/// left untouched.
#[derive(Debug, Error)]
pub enum RegistrationError {
    /// Floating mesh has no vertices.
    #[error("floating mesh has no vertices")]
    EmptyFloatingMesh,

    /// Target mesh has no vertices.
    #[error("target mesh has no vertices")]
    EmptyTargetMesh,

    /// Two index-aligned buffers have different lengths.
    #[error("{what}: expected {expected} rows, got {got}")]
    LengthMismatch {
        /// Which buffer pair is misaligned.
        what: &'static str,
        /// Expected row count.
        expected: usize,
        /// Actual row count.
        got: usize,
    },

    /// A vertex flag was neither 0 nor 1.
    #[error("flag at row {index} is {value}, must be 0 or 1")]
    InvalidFlag {
        /// Row of the offending flag.
        index: usize,
        /// Its value.
        value: f64,
    },

    /// A weight was negative.
    #[error("weight at row {index} is {value}, must be non-negative")]
    NegativeWeight {
        /// Row of the offending weight.
        index: usize,
        /// Its value.
        value: f64,
    },

    /// Every weight was zero where a weighted average was required.
    #[error("weight sum is zero, cannot compute weighted average")]
    ZeroWeightSum,

    /// The cross-covariance carried no usable geometry (coincident points,
    /// vanishing scale denominator).
    #[error("degenerate covariance, cannot estimate transform")]
    DegenerateCovariance,

    /// The eigendecomposition of the quaternion matrix did not converge.
    #[error("eigendecomposition failed during rigid transform estimation")]
    EigendecompositionFailed,

    /// A non-finite value appeared.
    #[error("non-finite value encountered in {stage}")]
    NonFinite {
        /// Pipeline stage that produced or received the value.
        stage: &'static str,
    },

    /// Invalid parameter value.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Decimation failed while building a pyramid level.
    #[error("decimation failed: {0}")]
    Decimate(#[from] surface_decimate::DecimateError),
}

/// Result type for registration operations.
pub type RegistrationResult<T> = Result<T, RegistrationError>;
