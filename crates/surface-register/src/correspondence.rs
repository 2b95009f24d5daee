//! Soft correspondence estimation over the 6-D feature space.
//!
//! Every floating vertex is matched to a weighted blend of target vertices:
//! a sparse affinity row holds Gaussian-in-distance weights over the k
//! nearest target features, suppressed by the target flags and
//! row-normalized to sum to one. In symmetric mode (the default) the
//! reverse (target-to-floating) affinity is fused in, which stops the
//! floating surface from collapsing onto a subset of the target.
//!
//! Flags travel alongside: a correspondence blended mostly out of
//! flagged-out target vertices is itself declared unreliable.

use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use surface_types::{SurfaceMesh, Vertex};
use tracing::debug;

use crate::error::{RegistrationError, RegistrationResult};
use crate::spatial::FeatureIndex;

/// Rows whose affinity share on reliable targets falls below this limit are
/// declared unreliable (`corresponding_flags = 0`): more than 10% of the
/// pull coming from flagged-out target vertices disqualifies the row.
const FLAG_ROUNDING_LIMIT: f64 = 0.9;

/// Parameters for correspondence estimation.
#[derive(Debug, Clone)]
pub struct CorrespondenceParams {
    /// Fuse push (floating-to-target) and pull (target-to-floating)
    /// affinities. Default: true.
    pub symmetric: bool,

    /// Number of nearest neighbours per affinity row. Default: 5.
    ///
    /// Clamped to the indexed vertex count, so a small target falls back to
    /// using all of its vertices.
    pub num_neighbours: usize,
}

impl Default for CorrespondenceParams {
    fn default() -> Self {
        Self {
            symmetric: true,
            num_neighbours: 5,
        }
    }
}

impl CorrespondenceParams {
    /// Creates parameters with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets symmetric fusion.
    #[must_use]
    pub const fn with_symmetric(mut self, symmetric: bool) -> Self {
        self.symmetric = symmetric;
        self
    }

    /// Sets the neighbour count.
    #[must_use]
    pub const fn with_num_neighbours(mut self, k: usize) -> Self {
        self.num_neighbours = k;
        self
    }
}

/// Soft correspondences for every floating vertex.
///
/// Index-aligned with the floating mesh. Rows with `flags == 0.0` are
/// unreliable and must not contribute to transform estimation; their vertex
/// may still carry a blended feature. Rows with no surviving affinity at
/// all hold an origin placeholder with a `+z` unit normal, so normals are
/// unit length on every row.
#[derive(Debug, Clone)]
pub struct Correspondences {
    /// Blended target-side feature per floating vertex.
    pub vertices: Vec<Vertex>,

    /// Reliability flag per floating vertex, in {0.0, 1.0}.
    pub flags: Vec<f64>,
}

impl Correspondences {
    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    /// Whether there are no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Number of rows flagged reliable.
    #[must_use]
    pub fn reliable_count(&self) -> usize {
        self.flags.iter().filter(|&&f| f != 0.0).count()
    }
}

/// One sparse affinity row: `(target row, weight)` pairs.
type AffinityRow = Vec<(u32, f64)>;

/// Computes soft correspondences from the floating mesh into the target.
///
/// # Errors
///
/// Returns an error if either mesh is empty, a flag vector is misaligned,
/// or `num_neighbours` is zero.
///
/// # Example
///
/// ```
/// use surface_register::{compute_correspondences, CorrespondenceParams};
/// use surface_types::unit_cube;
///
/// let cube = unit_cube();
/// let corr = compute_correspondences(&cube, &cube, &CorrespondenceParams::default()).unwrap();
/// assert_eq!(corr.len(), cube.vertex_count());
/// assert_eq!(corr.reliable_count(), cube.vertex_count());
/// ```
pub fn compute_correspondences(
    floating: &SurfaceMesh,
    target: &SurfaceMesh,
    params: &CorrespondenceParams,
) -> RegistrationResult<Correspondences> {
    if floating.is_empty() {
        return Err(RegistrationError::EmptyFloatingMesh);
    }
    if target.is_empty() {
        return Err(RegistrationError::EmptyTargetMesh);
    }
    if params.num_neighbours == 0 {
        return Err(RegistrationError::InvalidParameter(
            "num_neighbours must be at least 1".to_string(),
        ));
    }
    check_flags(floating, "floating flags")?;
    check_flags(target, "target flags")?;

    let push_k = params.num_neighbours.min(target.vertex_count());
    let target_index = FeatureIndex::build(&target.vertices);

    let correspondences = if params.symmetric {
        // Push rows are suppressed by the target flags and renormalized
        // before fusion, so push and pull enter the sum at the same scope.
        let mut affinity =
            gaussian_affinity(&floating.vertices, &target_index, push_k, Some(&target.flags));

        // Pull direction: target rows query the floating mesh, suppressed by
        // floating flags so flagged-out floating vertices attract nothing.
        let pull_k = params.num_neighbours.min(floating.vertex_count());
        let floating_index = FeatureIndex::build(&floating.vertices);
        let pull = gaussian_affinity(
            &target.vertices,
            &floating_index,
            pull_k,
            Some(&floating.flags),
        );

        fuse_pull(&mut affinity, &pull, target.vertex_count());
        blend_fused(&affinity, target)
    } else {
        // One-sided rows are built unsuppressed: with suppression first, a
        // renormalized push-only row always blends its flags back to
        // exactly one and the reliability threshold could never fire.
        // Suppression is applied at blend time instead.
        let affinity = gaussian_affinity(&floating.vertices, &target_index, push_k, None);
        blend_one_sided(&affinity, target)
    };

    debug!(
        rows = correspondences.len(),
        reliable = correspondences.reliable_count(),
        symmetric = params.symmetric,
        "computed correspondences"
    );
    Ok(correspondences)
}

fn check_flags(mesh: &SurfaceMesh, what: &'static str) -> RegistrationResult<()> {
    if mesh.flags.len() != mesh.vertex_count() {
        return Err(RegistrationError::LengthMismatch {
            what,
            expected: mesh.vertex_count(),
            got: mesh.flags.len(),
        });
    }
    for (index, &value) in mesh.flags.iter().enumerate() {
        if value != 0.0 && value != 1.0 {
            return Err(RegistrationError::InvalidFlag { index, value });
        }
    }
    Ok(())
}

/// Builds normalized Gaussian affinity rows from `queries` into the indexed
/// set. Each row uses its k-th neighbour distance as the kernel width, so
/// dense and sparse regions are weighted comparably.
///
/// `indexed_flags`, when given, suppresses indexed rows before
/// normalization; rows whose every neighbour is suppressed come out empty.
fn gaussian_affinity(
    queries: &[Vertex],
    index: &FeatureIndex,
    k: usize,
    indexed_flags: Option<&[f64]>,
) -> Vec<AffinityRow> {
    queries
        .par_iter()
        .map(|query| {
            let neighbors = index.knn(&query.feature(), k);
            let Some(furthest) = neighbors.last() else {
                return AffinityRow::new();
            };
            let sigma_squared = furthest.distance_squared;

            let mut row: AffinityRow = neighbors
                .iter()
                .map(|n| {
                    let gaussian = if sigma_squared <= 1e-24 {
                        // All neighbours coincide with the query; weight
                        // them uniformly.
                        1.0
                    } else {
                        (-0.5 * n.distance_squared / sigma_squared).exp()
                    };
                    let suppression = indexed_flags.map_or(1.0, |flags| flags[n.index]);
                    (n.index as u32, gaussian * suppression)
                })
                .filter(|&(_, w)| w > 0.0)
                .collect();

            merge_and_normalize(&mut row);
            row
        })
        .collect()
}

/// Fuses the transposed pull affinity into the push rows and renormalizes,
/// producing the symmetric affinity. Both operands are row-normalized
/// before the sum, so the per-row rescale makes the 1/2 factor of the
/// averaging formulation immaterial.
fn fuse_pull(affinity: &mut [AffinityRow], pull: &[AffinityRow], target_count: usize) {
    for (j, row) in pull.iter().enumerate() {
        debug_assert!(j < target_count);
        for &(i, weight) in row {
            affinity[i as usize].push((j as u32, weight));
        }
    }
    for row in affinity.iter_mut() {
        merge_and_normalize(row);
    }
}

/// Sorts a row by target index, merges duplicate entries, and rescales it to
/// sum to one. Rows whose weight sum vanishes become empty.
fn merge_and_normalize(row: &mut AffinityRow) {
    row.sort_unstable_by_key(|&(index, _)| index);

    let mut merged = AffinityRow::with_capacity(row.len());
    for &(index, weight) in row.iter() {
        match merged.last_mut() {
            Some((last_index, last_weight)) if *last_index == index => *last_weight += weight,
            _ => merged.push((index, weight)),
        }
    }

    let sum: f64 = merged.iter().map(|&(_, w)| w).sum();
    if sum > 0.0 {
        for (_, weight) in &mut merged {
            *weight /= sum;
        }
        *row = merged;
    } else {
        row.clear();
    }
}

/// Placeholder for rows with no surviving affinity.
fn empty_row_vertex() -> Vertex {
    Vertex::new(Point3::origin(), Vector3::z())
}

/// Correspondences read directly off a fused, renormalized affinity:
/// features are the row blends and flags are the row's blended target
/// flags, rounded at the reliability limit. Flagged-out targets can only
/// appear in a fused row through the pull direction.
fn blend_fused(affinity: &[AffinityRow], target: &SurfaceMesh) -> Correspondences {
    let mut vertices = Vec::with_capacity(affinity.len());
    let mut flags = Vec::with_capacity(affinity.len());

    for row in affinity {
        if row.is_empty() {
            vertices.push(empty_row_vertex());
            flags.push(0.0);
            continue;
        }

        let mut feature = [0.0; 6];
        let mut reliable_share = 0.0;
        for &(j, w) in row {
            let target_vertex = &target.vertices[j as usize];
            reliable_share += w * target.flags[j as usize];
            for (accumulator, component) in feature.iter_mut().zip(target_vertex.feature()) {
                *accumulator += w * component;
            }
        }

        vertices.push(Vertex::from_feature(feature));
        flags.push(if reliable_share >= FLAG_ROUNDING_LIMIT {
            1.0
        } else {
            0.0
        });
    }

    Correspondences { vertices, flags }
}

/// Correspondences from unsuppressed one-sided rows: the raw row measures
/// each row's contamination share from flagged-out targets, while the
/// feature blend rescales to the reliable entries so flagged-out targets
/// contribute nothing to positions or normals.
fn blend_one_sided(affinity: &[AffinityRow], target: &SurfaceMesh) -> Correspondences {
    let mut vertices = Vec::with_capacity(affinity.len());
    let mut flags = Vec::with_capacity(affinity.len());

    for row in affinity {
        let reliable_share: f64 = row
            .iter()
            .map(|&(j, w)| w * target.flags[j as usize])
            .sum();

        if row.is_empty() || reliable_share < FLAG_ROUNDING_LIMIT {
            vertices.push(empty_row_vertex());
            flags.push(0.0);
            continue;
        }

        let mut feature = [0.0; 6];
        for &(j, w) in row {
            let target_vertex = &target.vertices[j as usize];
            let weight = w * target.flags[j as usize] / reliable_share;
            for (accumulator, component) in feature.iter_mut().zip(target_vertex.feature()) {
                *accumulator += weight * component;
            }
        }

        vertices.push(Vertex::from_feature(feature));
        flags.push(1.0);
    }

    Correspondences { vertices, flags }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use surface_types::{unit_cube, uv_sphere};

    #[test]
    fn self_correspondence_is_reliable_everywhere() {
        let cube = unit_cube();
        let corr =
            compute_correspondences(&cube, &cube, &CorrespondenceParams::default()).unwrap();

        assert_eq!(corr.len(), cube.vertex_count());
        assert!(corr.flags.iter().all(|&f| f == 1.0));
        // Blended positions stay inside the target's bounding box.
        for v in &corr.vertices {
            assert!((-1e-9..=1.0 + 1e-9).contains(&v.position.x));
            assert!((-1e-9..=1.0 + 1e-9).contains(&v.position.y));
            assert!((-1e-9..=1.0 + 1e-9).contains(&v.position.z));
        }
    }

    #[test]
    fn every_row_has_a_unit_normal() {
        let sphere = uv_sphere(1.0, 6, 12);
        let mut target = sphere.clone();
        for (i, flag) in target.flags.iter_mut().enumerate() {
            if target.vertices[i].position.z > 0.0 {
                *flag = 0.0;
            }
        }

        for symmetric in [true, false] {
            let params = CorrespondenceParams::new().with_symmetric(symmetric);
            let corr = compute_correspondences(&sphere, &target, &params).unwrap();
            for v in &corr.vertices {
                assert!(v.has_unit_normal(1e-9), "non-unit normal at {:?}", v.position);
            }
        }
    }

    #[test]
    fn zero_flag_target_suppresses_everything() {
        let cube = unit_cube();
        let mut target = cube.clone();
        target.flags.fill(0.0);

        for symmetric in [true, false] {
            let params = CorrespondenceParams::new().with_symmetric(symmetric);
            let corr = compute_correspondences(&cube, &target, &params).unwrap();
            assert!(corr.flags.iter().all(|&f| f == 0.0));
            assert_eq!(corr.reliable_count(), 0);
        }
    }

    #[test]
    fn k_larger_than_target_falls_back_to_all_vertices() {
        let cube = unit_cube();
        let params = CorrespondenceParams::new().with_num_neighbours(100);
        let corr = compute_correspondences(&cube, &cube, &params).unwrap();
        assert_eq!(corr.len(), cube.vertex_count());
        assert!(corr.flags.iter().all(|&f| f == 1.0));
    }

    #[test]
    fn partially_flagged_target_marks_unreliable_rows() {
        // Floating sits exactly on a target whose upper half is flagged out;
        // upper floating vertices draw all their affinity from flagged-out
        // targets and must come back unreliable.
        let sphere = uv_sphere(1.0, 6, 12);
        let mut target = sphere.clone();
        for (i, flag) in target.flags.iter_mut().enumerate() {
            if target.vertices[i].position.z > 0.0 {
                *flag = 0.0;
            }
        }

        let corr =
            compute_correspondences(&sphere, &target, &CorrespondenceParams::default()).unwrap();

        let unreliable = corr.len() - corr.reliable_count();
        assert!(unreliable > 0, "no rows were flagged out");
        // Rows deep in the flagged-out cap are certainly unreliable.
        for (i, v) in sphere.vertices.iter().enumerate() {
            if v.position.z > 0.8 {
                assert_eq!(corr.flags[i], 0.0, "row {i} should be unreliable");
            }
            if v.position.z < -0.8 {
                assert_eq!(corr.flags[i], 1.0, "row {i} should be reliable");
            }
        }
    }

    #[test]
    fn symmetric_fusion_matches_hand_computation() {
        // One floating row over three targets with flags (1, 1, 0). The
        // push row is already target-flag-suppressed and renormalized: raw
        // Gaussian weights (0.5, 0.3, 0.2) suppress to (0.5, 0.3, 0) and
        // renormalize to (0.625, 0.375, 0). The pull direction contributes
        // (0.4, 0.1, 0.5) into the same floating row.
        let mut target = SurfaceMesh::from_parts(
            vec![
                Vertex::new(Point3::new(0.0, 0.0, 0.0), Vector3::z()),
                Vertex::new(Point3::new(1.0, 0.0, 0.0), Vector3::z()),
                Vertex::new(Point3::new(0.0, 1.0, 0.0), Vector3::z()),
            ],
            vec![],
        );
        target.flags = vec![1.0, 1.0, 0.0];

        let mut affinity = vec![vec![(0u32, 0.625), (1u32, 0.375)]];
        let pull = vec![vec![(0u32, 0.4)], vec![(0u32, 0.1)], vec![(0u32, 0.5)]];
        fuse_pull(&mut affinity, &pull, 3);

        // Fused row (1.025, 0.475, 0.5) renormalizes over its sum 2.0.
        let row = &affinity[0];
        assert_eq!(row.len(), 3);
        assert_relative_eq!(row[0].1, 0.5125, epsilon = 1e-12);
        assert_relative_eq!(row[1].1, 0.2375, epsilon = 1e-12);
        assert_relative_eq!(row[2].1, 0.25, epsilon = 1e-12);

        let corr = blend_fused(&affinity, &target);
        // Reliable share 0.5125 + 0.2375 = 0.75 < 0.9: unreliable.
        assert_eq!(corr.flags[0], 0.0);
        // Features are read straight off the fused row, flagged-out target
        // included: x picks up target 1's weight, y target 2's.
        assert_relative_eq!(corr.vertices[0].position.x, 0.2375, epsilon = 1e-12);
        assert_relative_eq!(corr.vertices[0].position.y, 0.25, epsilon = 1e-12);
        assert_relative_eq!(corr.vertices[0].position.z, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn fused_reliable_row_rounds_up() {
        // Same construction with the third target reliable as well: the
        // share is exactly 1 and the row rounds to reliable.
        let target = SurfaceMesh::from_parts(
            vec![
                Vertex::new(Point3::new(0.0, 0.0, 0.0), Vector3::z()),
                Vertex::new(Point3::new(1.0, 0.0, 0.0), Vector3::z()),
                Vertex::new(Point3::new(0.0, 1.0, 0.0), Vector3::z()),
            ],
            vec![],
        );

        let mut affinity = vec![vec![(0u32, 0.5), (1u32, 0.3), (2u32, 0.2)]];
        let pull = vec![vec![(0u32, 0.4)], vec![(0u32, 0.1)], vec![(0u32, 0.5)]];
        fuse_pull(&mut affinity, &pull, 3);

        let corr = blend_fused(&affinity, &target);
        assert_eq!(corr.flags[0], 1.0);
        let sum: f64 = affinity[0].iter().map(|&(_, w)| w).sum();
        assert_relative_eq!(sum, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn asymmetric_mode_matches_displaced_floating() {
        let mut floating = unit_cube();
        floating.translate(Vector3::new(0.05, 0.0, 0.0));
        let target = unit_cube();

        let params = CorrespondenceParams::new().with_symmetric(false);
        let corr = compute_correspondences(&floating, &target, &params).unwrap();

        // Each displaced corner should still blend around its counterpart.
        for (f, c) in floating.vertices.iter().zip(&corr.vertices) {
            assert!((f.position - c.position).norm() < 0.5);
        }
    }

    #[test]
    fn one_sided_blend_defers_suppression() {
        // Contamination below 10%: the row stays reliable and the feature
        // blend rescales over the reliable entries only.
        let mut target = SurfaceMesh::from_parts(
            vec![
                Vertex::new(Point3::new(0.0, 0.0, 0.0), Vector3::z()),
                Vertex::new(Point3::new(1.0, 0.0, 0.0), Vector3::z()),
                Vertex::new(Point3::new(0.0, 1.0, 0.0), Vector3::z()),
            ],
            vec![],
        );
        target.flags = vec![1.0, 1.0, 0.0];

        let affinity = vec![vec![(0u32, 0.57), (1u32, 0.38), (2u32, 0.05)]];
        let corr = blend_one_sided(&affinity, &target);

        assert_eq!(corr.flags[0], 1.0);
        // x = 0.38 / (0.57 + 0.38); the flagged-out target contributes
        // nothing even though it sat in the raw row.
        assert_relative_eq!(corr.vertices[0].position.x, 0.4, epsilon = 1e-12);
        assert_relative_eq!(corr.vertices[0].position.y, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn rejects_zero_neighbours() {
        let cube = unit_cube();
        let params = CorrespondenceParams::new().with_num_neighbours(0);
        assert!(matches!(
            compute_correspondences(&cube, &cube, &params),
            Err(RegistrationError::InvalidParameter(_))
        ));
    }

    #[test]
    fn rejects_empty_meshes() {
        let cube = unit_cube();
        let empty = SurfaceMesh::new();
        assert!(matches!(
            compute_correspondences(&empty, &cube, &CorrespondenceParams::default()),
            Err(RegistrationError::EmptyFloatingMesh)
        ));
        assert!(matches!(
            compute_correspondences(&cube, &empty, &CorrespondenceParams::default()),
            Err(RegistrationError::EmptyTargetMesh)
        ));
    }

    #[test]
    fn rejects_non_binary_flags() {
        let cube = unit_cube();
        let mut bad = cube.clone();
        bad.flags[2] = 0.5;
        assert!(matches!(
            compute_correspondences(&cube, &bad, &CorrespondenceParams::default()),
            Err(RegistrationError::InvalidFlag { index: 2, .. })
        ));
    }

    #[test]
    fn merge_and_normalize_combines_duplicates() {
        let mut row = vec![(3u32, 0.25), (1u32, 0.25), (3u32, 0.25), (2u32, 0.25)];
        merge_and_normalize(&mut row);
        assert_eq!(row.len(), 3);
        assert_eq!(row[0].0, 1);
        assert_eq!(row[2].0, 3);
        assert_relative_eq!(row[2].1, 0.5, epsilon = 1e-12);
        let sum: f64 = row.iter().map(|&(_, w)| w).sum();
        assert_relative_eq!(sum, 1.0, epsilon = 1e-12);
    }
}
