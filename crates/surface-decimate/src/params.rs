//! Parameters for decimation.

/// Parameters for quadric edge-collapse decimation.
#[derive(Debug, Clone)]
pub struct DecimateParams {
    /// Fraction of faces to remove, in `[0.0, 1.0)`. Default: 0.5.
    ///
    /// A ratio of 0.0 is a no-op; 0.9 keeps roughly a tenth of the faces.
    pub removal_ratio: f64,

    /// Refuse to collapse boundary edges. Default: false.
    ///
    /// Registration pyramids decimate open scans rim and all; set this when
    /// the boundary outline itself must survive.
    pub preserve_boundary: bool,

    /// Cost multiplier for boundary edges when they may collapse.
    /// Default: 10.0.
    pub boundary_penalty: f64,
}

impl Default for DecimateParams {
    fn default() -> Self {
        Self {
            removal_ratio: 0.5,
            preserve_boundary: false,
            boundary_penalty: 10.0,
        }
    }
}

impl DecimateParams {
    /// Creates params removing the given fraction of faces.
    #[must_use]
    pub fn with_removal_ratio(ratio: f64) -> Self {
        Self {
            removal_ratio: ratio,
            ..Default::default()
        }
    }

    /// Sets boundary preservation.
    #[must_use]
    pub const fn with_preserve_boundary(mut self, preserve: bool) -> Self {
        self.preserve_boundary = preserve;
        self
    }

    /// Sets the boundary collapse penalty.
    #[must_use]
    pub const fn with_boundary_penalty(mut self, penalty: f64) -> Self {
        self.boundary_penalty = penalty;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_removes_half() {
        let params = DecimateParams::default();
        assert!((params.removal_ratio - 0.5).abs() < 1e-12);
        assert!(!params.preserve_boundary);
    }

    #[test]
    fn builder_chain() {
        let params = DecimateParams::with_removal_ratio(0.9)
            .with_preserve_boundary(true)
            .with_boundary_penalty(5.0);
        assert!((params.removal_ratio - 0.9).abs() < 1e-12);
        assert!(params.preserve_boundary);
        assert!((params.boundary_penalty - 5.0).abs() < 1e-12);
    }
}
