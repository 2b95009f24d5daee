//! Result types for decimation.

use surface_types::SurfaceMesh;

/// Result of a decimation run.
#[derive(Debug, Clone)]
pub struct Decimation {
    /// The decimated mesh, with flags carried over and normals recomputed.
    pub mesh: SurfaceMesh,

    /// For each surviving vertex, its row in the input mesh.
    ///
    /// Index-aligned with `mesh.vertices`; the pyramid scale shifter uses
    /// this to carry state between resolutions.
    pub original_indices: Vec<u32>,

    /// Number of faces in the input mesh.
    pub original_faces: usize,

    /// Number of faces in the decimated mesh.
    pub final_faces: usize,

    /// Number of edge collapses performed.
    pub collapses_performed: usize,

    /// Number of collapses rejected (boundary or manifold constraints).
    pub collapses_rejected: usize,
}

impl Decimation {
    /// Fraction of faces removed.
    #[must_use]
    pub fn removed_fraction(&self) -> f64 {
        if self.original_faces == 0 {
            0.0
        } else {
            1.0 - self.final_faces as f64 / self.original_faces as f64
        }
    }
}

impl std::fmt::Display for Decimation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "decimation: {} -> {} faces ({:.1}% removed, {} collapses)",
            self.original_faces,
            self.final_faces,
            self.removed_fraction() * 100.0,
            self.collapses_performed
        )
    }
}
