//! Quadric error metric.
//!
//! A quadric accumulates squared distances to a set of planes; evaluating it
//! at a point gives the total squared plane distance. During edge collapse
//! the combined quadric of the two endpoints scores candidate positions.

use nalgebra::{Point3, Vector3};

/// Sum of squared plane distances, stored as the upper triangle of the
/// symmetric 4x4 matrix `K = p pᵀ` for plane `p = (a, b, c, d)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Quadric {
    aa: f64,
    ab: f64,
    ac: f64,
    ad: f64,
    bb: f64,
    bc: f64,
    bd: f64,
    cc: f64,
    cd: f64,
    dd: f64,
}

impl Quadric {
    /// Builds the quadric of a single plane through `point` with unit
    /// normal `normal`.
    #[must_use]
    pub fn from_plane(normal: Vector3<f64>, point: Point3<f64>) -> Self {
        let d = -normal.dot(&point.coords);
        Self {
            aa: normal.x * normal.x,
            ab: normal.x * normal.y,
            ac: normal.x * normal.z,
            ad: normal.x * d,
            bb: normal.y * normal.y,
            bc: normal.y * normal.z,
            bd: normal.y * d,
            cc: normal.z * normal.z,
            cd: normal.z * d,
            dd: d * d,
        }
    }

    /// Accumulates another quadric into this one.
    pub fn add(&mut self, other: &Self) {
        self.aa += other.aa;
        self.ab += other.ab;
        self.ac += other.ac;
        self.ad += other.ad;
        self.bb += other.bb;
        self.bc += other.bc;
        self.bd += other.bd;
        self.cc += other.cc;
        self.cd += other.cd;
        self.dd += other.dd;
    }

    /// Evaluates `vᵀ Q v` for `v = [x, y, z, 1]`.
    #[must_use]
    pub fn evaluate(&self, p: Point3<f64>) -> f64 {
        let (x, y, z) = (p.x, p.y, p.z);
        x * (self.aa * x + 2.0 * (self.ab * y + self.ac * z + self.ad))
            + y * (self.bb * y + 2.0 * (self.bc * z + self.bd))
            + z * (self.cc * z + 2.0 * self.cd)
            + self.dd
    }

    /// The point minimizing this quadric, or `None` when the 3x3 block is
    /// singular (a flat or line-like neighborhood).
    #[must_use]
    pub fn minimizer(&self) -> Option<Point3<f64>> {
        // Solve [aa ab ac; ab bb bc; ac bc cc] x = -[ad; bd; cd].
        let det = self.aa * (self.bb * self.cc - self.bc * self.bc)
            - self.ab * (self.ab * self.cc - self.bc * self.ac)
            + self.ac * (self.ab * self.bc - self.bb * self.ac);

        if det.abs() < 1e-10 {
            return None;
        }

        let inv = 1.0 / det;
        let m00 = (self.bb * self.cc - self.bc * self.bc) * inv;
        let m01 = (self.ac * self.bc - self.ab * self.cc) * inv;
        let m02 = (self.ab * self.bc - self.ac * self.bb) * inv;
        let m11 = (self.aa * self.cc - self.ac * self.ac) * inv;
        let m12 = (self.ab * self.ac - self.aa * self.bc) * inv;
        let m22 = (self.aa * self.bb - self.ab * self.ab) * inv;

        Some(Point3::new(
            -(m00 * self.ad + m01 * self.bd + m02 * self.cd),
            -(m01 * self.ad + m11 * self.bd + m12 * self.cd),
            -(m02 * self.ad + m12 * self.bd + m22 * self.cd),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_quadric_evaluates_to_zero() {
        let q = Quadric::default();
        assert!(q.evaluate(Point3::new(1.0, 2.0, 3.0)).abs() < f64::EPSILON);
    }

    #[test]
    fn plane_distance_squared() {
        // Plane z = 0.
        let q = Quadric::from_plane(Vector3::z(), Point3::origin());
        assert!(q.evaluate(Point3::new(3.0, -2.0, 0.0)).abs() < 1e-12);
        assert!((q.evaluate(Point3::new(0.0, 0.0, 2.0)) - 4.0).abs() < 1e-12);
    }

    #[test]
    fn minimizer_of_three_planes() {
        let mut q = Quadric::from_plane(Vector3::x(), Point3::new(1.0, 0.0, 0.0));
        q.add(&Quadric::from_plane(Vector3::y(), Point3::new(0.0, 2.0, 0.0)));
        q.add(&Quadric::from_plane(Vector3::z(), Point3::new(0.0, 0.0, 3.0)));

        let p = q.minimizer().unwrap();
        assert!((p.x - 1.0).abs() < 1e-9);
        assert!((p.y - 2.0).abs() < 1e-9);
        assert!((p.z - 3.0).abs() < 1e-9);
    }

    #[test]
    fn single_plane_is_singular() {
        let q = Quadric::from_plane(Vector3::z(), Point3::origin());
        assert!(q.minimizer().is_none());
    }
}
