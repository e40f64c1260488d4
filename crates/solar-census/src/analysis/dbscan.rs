//! Density-based clustering (DBSCAN) over standardized orbital features

use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::types::OUTLIER_LABEL;

use super::kmeans::sq_dist;

/// DBSCAN clusterer with Euclidean distance
pub struct DbscanClusterer {
    /// Neighborhood radius
    epsilon: f64,
    /// Neighbors within `epsilon`, the point itself included, that make a core point
    min_points: usize,
}

impl DbscanClusterer {
    pub fn new(epsilon: f64, min_points: usize) -> Self {
        Self { epsilon, min_points }
    }

    /// Label every row with a density cluster id or [`OUTLIER_LABEL`]
    pub fn cluster(&self, features: &Array2<f64>) -> DensityResult {
        let n = features.nrows();
        if n == 0 {
            return DensityResult::empty();
        }

        // Core flags first; the expansion below only reads them
        let core: Vec<bool> = (0..n)
            .into_par_iter()
            .map(|i| self.neighbor_count(features, i) >= self.min_points)
            .collect();

        let mut labels: Vec<Option<i32>> = vec![None; n];
        let mut cluster_id = 0i32;
        for i in 0..n {
            if labels[i].is_some() || !core[i] {
                continue;
            }
            self.expand_cluster(i, cluster_id, features, &core, &mut labels);
            cluster_id += 1;
        }

        DensityResult {
            labels: labels.into_iter().map(|l| l.unwrap_or(OUTLIER_LABEL)).collect(),
            core,
            num_clusters: cluster_id as usize,
        }
    }

    fn neighbor_count(&self, features: &Array2<f64>, point_idx: usize) -> usize {
        let eps2 = self.epsilon * self.epsilon;
        let point = features.row(point_idx);
        features
            .rows()
            .into_iter()
            .filter(|row| sq_dist(point, *row) <= eps2)
            .count()
    }

    fn range_query(&self, features: &Array2<f64>, point_idx: usize) -> Vec<usize> {
        let eps2 = self.epsilon * self.epsilon;
        let point = features.row(point_idx);
        features
            .rows()
            .into_iter()
            .enumerate()
            .filter(|(_, row)| sq_dist(point, *row) <= eps2)
            .map(|(i, _)| i)
            .collect()
    }

    /// Breadth-first growth from a core point; border points join the first cluster reaching them
    fn expand_cluster(
        &self,
        point_idx: usize,
        cluster_id: i32,
        features: &Array2<f64>,
        core: &[bool],
        labels: &mut [Option<i32>],
    ) {
        labels[point_idx] = Some(cluster_id);
        let mut seed_set = VecDeque::from([point_idx]);

        while let Some(q_idx) = seed_set.pop_front() {
            for neighbor in self.range_query(features, q_idx) {
                if labels[neighbor].is_some() {
                    continue;
                }
                labels[neighbor] = Some(cluster_id);
                if core[neighbor] {
                    seed_set.push_back(neighbor);
                }
            }
        }
    }
}

/// Result of one density scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DensityResult {
    /// Cluster id per row, or [`OUTLIER_LABEL`]
    pub labels: Vec<i32>,
    pub core: Vec<bool>,
    pub num_clusters: usize,
}

impl DensityResult {
    fn empty() -> Self {
        Self {
            labels: vec![],
            core: vec![],
            num_clusters: 0,
        }
    }

    pub fn is_outlier(&self, idx: usize) -> bool {
        self.labels[idx] == OUTLIER_LABEL
    }

    pub fn core_indices(&self) -> Vec<usize> {
        self.core
            .iter()
            .enumerate()
            .filter(|(_, c)| **c)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn statistics(&self) -> DensityStats {
        let mut sizes = vec![0usize; self.num_clusters];
        for &label in &self.labels {
            if label >= 0 {
                sizes[label as usize] += 1;
            }
        }
        let clustered: usize = sizes.iter().sum();
        DensityStats {
            num_clusters: self.num_clusters,
            total_points: self.labels.len(),
            clustered_points: clustered,
            outliers: self.labels.len() - clustered,
            core_points: self.core.iter().filter(|c| **c).count(),
            max_cluster_size: sizes.iter().copied().max().unwrap_or(0),
            min_cluster_size: sizes.iter().copied().min().unwrap_or(0),
        }
    }
}

/// Summary of a density scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DensityStats {
    pub num_clusters: usize,
    pub total_points: usize,
    pub clustered_points: usize,
    pub outliers: usize,
    pub core_points: usize,
    pub max_cluster_size: usize,
    pub min_cluster_size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    /// (a, e, i) of Pluto, Orcus, Quaoar, Varuna, Eris and Sedna
    fn trans_neptunian() -> Array2<f64> {
        array![
            [39.59, 0.2518, 17.15],
            [39.34, 0.2217, 20.56],
            [43.15, 0.0358, 7.99],
            [43.18, 0.0525, 17.14],
            [68.0, 0.4370, 43.87],
            [549.5, 0.8613, 11.93],
        ]
    }

    #[test]
    fn test_isolated_point_is_outlier() {
        let clusterer = DbscanClusterer::new(4.0, 2);
        let result = clusterer.cluster(&trans_neptunian());

        assert_eq!(result.labels[0], result.labels[1]);
        assert!(result.labels[0] >= 0);
        assert!(result.is_outlier(5));
        assert!(result.is_outlier(4));
    }

    #[test]
    fn test_border_point_joins_cluster() {
        // Five points in a row 1 apart: only the middle three have 3 neighbors
        let data = array![[0.0], [1.0], [2.0], [3.0], [4.0], [20.0]];
        let result = DbscanClusterer::new(1.0, 3).cluster(&data);
        assert_eq!(result.labels, vec![0, 0, 0, 0, 0, OUTLIER_LABEL]);
        assert_eq!(result.core, vec![false, true, true, true, false, false]);
        assert_eq!(result.num_clusters, 1);
    }

    #[test]
    fn test_statistics() {
        let result = DbscanClusterer::new(4.0, 2).cluster(&trans_neptunian());
        let stats = result.statistics();
        assert_eq!(stats.total_points, 6);
        assert_eq!(stats.clustered_points + stats.outliers, 6);
        assert!(stats.num_clusters >= 1);
    }

    #[test]
    fn test_min_points_counts_self() {
        let data = array![[0.0], [0.1]];
        assert_eq!(DbscanClusterer::new(0.5, 2).cluster(&data).labels, vec![0, 0]);
        assert_eq!(
            DbscanClusterer::new(0.5, 3).cluster(&data).labels,
            vec![OUTLIER_LABEL, OUTLIER_LABEL]
        );
    }
}
