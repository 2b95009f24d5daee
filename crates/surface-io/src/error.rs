//! Error types for OBJ I/O.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for OBJ I/O operations.
pub type ObjResult<T> = Result<T, ObjError>;

/// Errors that can occur while reading or writing OBJ files.
#[derive(Debug, Error)]
pub enum ObjError {
    /// File not found.
    #[error("file not found: {path}")]
    FileNotFound {
        /// Path that was not found.
        path: PathBuf,
    },

    /// Malformed record in an OBJ file.
    #[error("invalid OBJ content at {path}:{line}: {message}")]
    InvalidContent {
        /// File being parsed.
        path: PathBuf,
        /// 1-based line number.
        line: usize,
        /// Description of what was invalid.
        message: String,
    },

    /// A face referenced a vertex that does not exist.
    #[error(
        "face at {path}:{line} references vertex {index}, but only {vertex_count} are defined"
    )]
    IndexOutOfRange {
        /// File being parsed.
        path: PathBuf,
        /// 1-based line number.
        line: usize,
        /// The offending 1-based vertex index.
        index: i64,
        /// Number of vertices defined so far.
        vertex_count: usize,
    },

    /// The file parsed but contained no vertices.
    #[error("OBJ file {path} contains no vertices")]
    EmptyMesh {
        /// File being parsed.
        path: PathBuf,
    },

    /// I/O error from the standard library.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
