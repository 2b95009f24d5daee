//! Static kd-tree indexes over vertex features and positions.
//!
//! Correspondence search runs in the 6-D feature space (position + normal);
//! visco-elastic smoothing runs in plain 3-D. Both wrap a [`kiddo`] tree
//! built once from a snapshot of the data: any mutation of the underlying
//! vertices requires a rebuild.
//!
//! Queries can exclude one caller-identified row, so searching an index
//! built over the query set itself never returns the query row.

use kiddo::{KdTree, SquaredEuclidean};
use surface_types::{FEATURE_DIM, Vertex};

/// One neighbor returned by an index query.
#[derive(Debug, Clone, Copy)]
pub struct Neighbor {
    /// Row of the neighbor in the indexed data.
    pub index: usize,
    /// Squared distance to the query.
    pub distance_squared: f64,
}

/// kd-tree over 6-D vertex features.
pub struct FeatureIndex {
    tree: KdTree<f64, FEATURE_DIM>,
}

impl FeatureIndex {
    /// Builds the index over the feature vectors of `vertices`.
    #[must_use]
    pub fn build(vertices: &[Vertex]) -> Self {
        let mut tree = KdTree::new();
        for (i, v) in vertices.iter().enumerate() {
            tree.add(&v.feature(), i as u64);
        }
        Self { tree }
    }

    /// The `k` nearest rows to `query`, ascending by distance.
    ///
    /// Returns fewer than `k` rows when the index holds fewer.
    #[must_use]
    pub fn knn(&self, query: &[f64; FEATURE_DIM], k: usize) -> Vec<Neighbor> {
        self.tree
            .nearest_n::<SquaredEuclidean>(query, k)
            .into_iter()
            .map(|n| Neighbor {
                index: n.item as usize,
                distance_squared: n.distance,
            })
            .collect()
    }

    /// The `k` nearest rows to `query`, never returning row `exclude`.
    #[must_use]
    pub fn knn_excluding(
        &self,
        query: &[f64; FEATURE_DIM],
        k: usize,
        exclude: usize,
    ) -> Vec<Neighbor> {
        let mut neighbors: Vec<Neighbor> = self
            .tree
            .nearest_n::<SquaredEuclidean>(query, k + 1)
            .into_iter()
            .filter(|n| n.item as usize != exclude)
            .map(|n| Neighbor {
                index: n.item as usize,
                distance_squared: n.distance,
            })
            .collect();
        neighbors.truncate(k);
        neighbors
    }

    /// All rows within squared distance `radius_squared` of `query`,
    /// in no particular order.
    #[must_use]
    pub fn within(&self, query: &[f64; FEATURE_DIM], radius_squared: f64) -> Vec<Neighbor> {
        self.tree
            .within_unsorted::<SquaredEuclidean>(query, radius_squared)
            .into_iter()
            .map(|n| Neighbor {
                index: n.item as usize,
                distance_squared: n.distance,
            })
            .collect()
    }
}

/// kd-tree over 3-D vertex positions.
pub struct PositionIndex {
    tree: KdTree<f64, 3>,
}

impl PositionIndex {
    /// Builds the index over the positions of `vertices`.
    #[must_use]
    pub fn build(vertices: &[Vertex]) -> Self {
        let mut tree = KdTree::new();
        for (i, v) in vertices.iter().enumerate() {
            tree.add(&[v.position.x, v.position.y, v.position.z], i as u64);
        }
        Self { tree }
    }

    /// The `k` nearest rows to `query`, never returning row `exclude`.
    #[must_use]
    pub fn knn_excluding(&self, query: &[f64; 3], k: usize, exclude: usize) -> Vec<Neighbor> {
        let mut neighbors: Vec<Neighbor> = self
            .tree
            .nearest_n::<SquaredEuclidean>(query, k + 1)
            .into_iter()
            .filter(|n| n.item as usize != exclude)
            .map(|n| Neighbor {
                index: n.item as usize,
                distance_squared: n.distance,
            })
            .collect();
        neighbors.truncate(k);
        neighbors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use surface_types::unit_cube;

    #[test]
    fn knn_is_sorted_ascending() {
        let cube = unit_cube();
        let index = FeatureIndex::build(&cube.vertices);

        let neighbors = index.knn(&cube.vertices[0].feature(), 4);
        assert_eq!(neighbors.len(), 4);
        for pair in neighbors.windows(2) {
            assert!(pair[0].distance_squared <= pair[1].distance_squared);
        }
        // The query point itself is in the index, so it comes first.
        assert_eq!(neighbors[0].index, 0);
        assert!(neighbors[0].distance_squared < 1e-12);
    }

    #[test]
    fn knn_excluding_skips_self() {
        let cube = unit_cube();
        let index = FeatureIndex::build(&cube.vertices);

        let neighbors = index.knn_excluding(&cube.vertices[3].feature(), 4, 3);
        assert_eq!(neighbors.len(), 4);
        assert!(neighbors.iter().all(|n| n.index != 3));
    }

    #[test]
    fn knn_clamps_to_index_size() {
        let cube = unit_cube();
        let index = FeatureIndex::build(&cube.vertices);

        let neighbors = index.knn(&cube.vertices[0].feature(), 50);
        assert_eq!(neighbors.len(), cube.vertex_count());
    }

    #[test]
    fn within_finds_close_rows_only() {
        let cube = unit_cube();
        let index = FeatureIndex::build(&cube.vertices);

        let found = index.within(&cube.vertices[0].feature(), 0.5);
        assert!(found.iter().any(|n| n.index == 0));
        // Feature distance to any other corner exceeds the radius: positions
        // are an edge apart and corner normals differ substantially.
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn position_index_excludes_query_row() {
        let cube = unit_cube();
        let index = PositionIndex::build(&cube.vertices);
        let p = cube.vertices[5].position;

        let neighbors = index.knn_excluding(&[p.x, p.y, p.z], 3, 5);
        assert_eq!(neighbors.len(), 3);
        assert!(neighbors.iter().all(|n| n.index != 5));
        // Nearest other corners are one edge away.
        assert!((neighbors[0].distance_squared - 1.0).abs() < 1e-9);
    }
}
