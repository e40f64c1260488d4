//! K-means with silhouette-based choice of k

use ndarray::{Array2, ArrayView1, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::ClusteringConfig;
use crate::types::StageStatus;

/// Silhouette gains below this do not beat a smaller k
const SILHOUETTE_TOLERANCE: f64 = 1e-12;

/// Score of one candidate k
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KCandidate {
    pub k: usize,
    pub inertia: f64,
    pub silhouette: f64,
}

/// Result of the clustering stage
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterOutcome {
    pub status: StageStatus,
    /// Cluster per matrix row, each in `0..chosen_k`
    pub labels: Option<Vec<u32>>,
    /// Euclidean distance of each row to its centroid
    pub distances: Option<Vec<f64>>,
    pub chosen_k: Option<usize>,
    pub silhouette: Option<f64>,
    pub centroids: Option<Array2<f64>>,
    /// Every k that was evaluated, ascending
    pub candidates: Vec<KCandidate>,
}

impl ClusterOutcome {
    fn insufficient(candidates: Vec<KCandidate>) -> Self {
        Self {
            status: StageStatus::InsufficientData,
            labels: None,
            distances: None,
            chosen_k: None,
            silhouette: None,
            centroids: None,
            candidates,
        }
    }
}

struct Fit {
    labels: Vec<usize>,
    distances: Vec<f64>,
    centroids: Array2<f64>,
    inertia: f64,
}

/// Seeded k-means over a standardized feature matrix
pub struct KMeans {
    config: ClusteringConfig,
}

impl KMeans {
    pub fn new(config: &ClusteringConfig) -> Self {
        Self { config: config.clone() }
    }

    /// Fit every candidate k and keep the one with the best mean silhouette
    pub fn cluster(&self, matrix: &Array2<f64>) -> ClusterOutcome {
        let n = matrix.nrows();
        let ks: Vec<usize> = (self.config.k_min..=self.config.k_max)
            .filter(|k| n >= 2 * k)
            .collect();
        if ks.is_empty() {
            tracing::info!(
                "Clustering skipped: {} points, at least {} needed",
                n,
                2 * self.config.k_min
            );
            return ClusterOutcome::insufficient(Vec::new());
        }

        let mut candidates = Vec::with_capacity(ks.len());
        let mut best: Option<(usize, f64, Fit)> = None;
        for k in ks {
            let fit = self.fit(matrix, k);
            let score = silhouette(matrix, &fit.labels, k, self.config.silhouette_sample, self.config.seed);
            tracing::debug!("k={} inertia={:.4} silhouette={:.4}", k, fit.inertia, score);
            candidates.push(KCandidate { k, inertia: fit.inertia, silhouette: score });

            let better = match &best {
                Some((_, best_score, _)) => score > best_score + SILHOUETTE_TOLERANCE,
                None => true,
            };
            if better {
                best = Some((k, score, fit));
            }
        }

        let Some((k, score, fit)) = best else {
            return ClusterOutcome::insufficient(candidates);
        };
        tracing::info!("Chose k={} (silhouette {:.4}) over {} points", k, score, n);
        ClusterOutcome {
            status: StageStatus::Completed,
            labels: Some(fit.labels.iter().map(|&l| l as u32).collect()),
            distances: Some(fit.distances),
            chosen_k: Some(k),
            silhouette: Some(score),
            centroids: Some(fit.centroids),
            candidates,
        }
    }

    /// Best of `n_init` seeded restarts by inertia
    fn fit(&self, matrix: &Array2<f64>, k: usize) -> Fit {
        let run = |restart: usize| {
            let mut rng = StdRng::seed_from_u64(self.config.seed.wrapping_add(restart as u64));
            let centroids = plus_plus_init(matrix, k, &mut rng);
            lloyd(matrix, centroids, self.config.max_iterations)
        };
        let first = run(0);
        (1..self.config.n_init.max(1))
            .map(run)
            .fold(first, |best, fit| if fit.inertia < best.inertia { fit } else { best })
    }
}

pub(crate) fn sq_dist(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// k-means++ seeding: each next center drawn with probability proportional to D(x)^2
fn plus_plus_init(data: &Array2<f64>, k: usize, rng: &mut StdRng) -> Array2<f64> {
    let n = data.nrows();
    let mut chosen = Vec::with_capacity(k);
    chosen.push(rng.gen_range(0..n));

    let mut nearest: Vec<f64> = (0..n)
        .into_par_iter()
        .map(|i| sq_dist(data.row(i), data.row(chosen[0])))
        .collect();

    while chosen.len() < k {
        let total: f64 = nearest.iter().sum();
        let next = if total > 0.0 {
            let target = rng.gen::<f64>() * total;
            let mut acc = 0.0;
            let mut pick = None;
            for (i, d) in nearest.iter().enumerate() {
                if *d <= 0.0 {
                    continue;
                }
                acc += d;
                pick = Some(i);
                if acc >= target {
                    break;
                }
            }
            pick
        } else {
            None
        };
        // Every point already coincides with a center
        let next = next
            .or_else(|| (0..n).find(|i| !chosen.contains(i)))
            .unwrap_or(0);
        chosen.push(next);

        let center = data.row(next);
        nearest = nearest
            .par_iter()
            .enumerate()
            .map(|(i, &d)| d.min(sq_dist(data.row(i), center)))
            .collect();
    }

    data.select(Axis(0), &chosen)
}

/// Nearest centroid and squared distance for every row
fn assign(data: &Array2<f64>, centroids: &Array2<f64>) -> Vec<(usize, f64)> {
    (0..data.nrows())
        .into_par_iter()
        .map(|i| {
            let row = data.row(i);
            let mut best = (0usize, f64::INFINITY);
            for (c, centroid) in centroids.axis_iter(Axis(0)).enumerate() {
                let d = sq_dist(row, centroid);
                if d < best.1 {
                    best = (c, d);
                }
            }
            best
        })
        .collect()
}

fn lloyd(data: &Array2<f64>, mut centroids: Array2<f64>, max_iterations: usize) -> Fit {
    let k = centroids.nrows();
    let mut assignment = assign(data, &centroids);

    for _ in 0..max_iterations {
        let mut sums = Array2::<f64>::zeros(centroids.dim());
        let mut counts = vec![0usize; k];
        for (i, &(c, _)) in assignment.iter().enumerate() {
            let mut row = sums.row_mut(c);
            row += &data.row(i);
            counts[c] += 1;
        }

        // Empty clusters take the points farthest from their current centroid
        let mut taken: Vec<usize> = Vec::new();
        for c in 0..k {
            if counts[c] > 0 {
                let mean = &sums.row(c) / counts[c] as f64;
                centroids.row_mut(c).assign(&mean);
                continue;
            }
            let farthest = assignment
                .iter()
                .enumerate()
                .filter(|(i, _)| !taken.contains(i))
                .fold(None, |best: Option<(usize, f64)>, (i, &(_, d))| match best {
                    Some((_, bd)) if bd >= d => best,
                    _ => Some((i, d)),
                });
            if let Some((i, _)) = farthest {
                taken.push(i);
                centroids.row_mut(c).assign(&data.row(i));
            }
        }

        let next = assign(data, &centroids);
        let changed = next.iter().zip(assignment.iter()).any(|(a, b)| a.0 != b.0);
        assignment = next;
        if !changed {
            break;
        }
    }

    let inertia = assignment.iter().map(|(_, d)| d).sum();
    Fit {
        labels: assignment.iter().map(|(c, _)| *c).collect(),
        distances: assignment.iter().map(|(_, d)| d.sqrt()).collect(),
        centroids,
        inertia,
    }
}

/// Mean silhouette; singleton clusters score 0
///
/// With `sample` set, only that many seeded rows are scored, against all rows.
pub fn silhouette(data: &Array2<f64>, labels: &[usize], k: usize, sample: Option<usize>, seed: u64) -> f64 {
    let n = data.nrows();
    if n == 0 || k < 2 {
        return 0.0;
    }
    let mut sizes = vec![0usize; k];
    for &l in labels {
        sizes[l] += 1;
    }

    let rows: Vec<usize> = match sample {
        Some(cap) if cap > 0 && cap < n => {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut picked = rand::seq::index::sample(&mut rng, n, cap).into_vec();
            picked.sort_unstable();
            picked
        }
        _ => (0..n).collect(),
    };

    let scores: Vec<f64> = rows
        .par_iter()
        .map(|&i| {
            let own = labels[i];
            if sizes[own] <= 1 {
                return 0.0;
            }
            let mut totals = vec![0.0f64; k];
            let row = data.row(i);
            for j in 0..n {
                if j != i {
                    totals[labels[j]] += sq_dist(row, data.row(j)).sqrt();
                }
            }
            let a = totals[own] / (sizes[own] - 1) as f64;
            let b = (0..k)
                .filter(|&c| c != own && sizes[c] > 0)
                .map(|c| totals[c] / sizes[c] as f64)
                .fold(f64::INFINITY, f64::min);
            if !b.is_finite() {
                return 0.0;
            }
            let denom = a.max(b);
            if denom > 0.0 { (b - a) / denom } else { 0.0 }
        })
        .collect();

    scores.iter().sum::<f64>() / scores.len() as f64
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ndarray::array;

    /// Two tight blobs of `per_blob` points around (0,0) and (10,10)
    pub(crate) fn two_blobs(per_blob: usize) -> Array2<f64> {
        let mut data = Array2::zeros((per_blob * 2, 2));
        for i in 0..per_blob {
            let jitter = (i as f64 * 0.37).sin() * 0.3;
            data[[i, 0]] = jitter;
            data[[i, 1]] = -jitter;
            data[[per_blob + i, 0]] = 10.0 + jitter;
            data[[per_blob + i, 1]] = 10.0 - jitter;
        }
        data
    }

    #[test]
    fn test_two_blobs_choose_k2() {
        let data = two_blobs(20);
        let outcome = KMeans::new(&ClusteringConfig::default()).cluster(&data);
        assert_eq!(outcome.status, StageStatus::Completed);
        assert_eq!(outcome.chosen_k, Some(2));
        let labels = outcome.labels.unwrap();
        assert!(labels[..20].iter().all(|l| *l == labels[0]));
        assert!(labels[20..].iter().all(|l| *l == labels[20]));
        assert_ne!(labels[0], labels[20]);
        assert!(outcome.silhouette.unwrap() > 0.9);
    }

    #[test]
    fn test_deterministic_across_runs() {
        let data = two_blobs(15);
        let kmeans = KMeans::new(&ClusteringConfig::default());
        let first = kmeans.cluster(&data);
        let second = kmeans.cluster(&data);
        assert_eq!(first, second);
    }

    #[test]
    fn test_too_few_points_is_insufficient() {
        let data = array![[0.0, 0.0], [1.0, 1.0], [2.0, 2.0]];
        let outcome = KMeans::new(&ClusteringConfig::default()).cluster(&data);
        assert_eq!(outcome.status, StageStatus::InsufficientData);
        assert!(outcome.labels.is_none());
        assert!(outcome.chosen_k.is_none());
    }

    #[test]
    fn test_small_input_only_tries_affordable_k() {
        let data = two_blobs(3);
        let outcome = KMeans::new(&ClusteringConfig::default()).cluster(&data);
        let ks: Vec<usize> = outcome.candidates.iter().map(|c| c.k).collect();
        assert_eq!(ks, vec![2, 3]);
        assert!(outcome.labels.unwrap().iter().all(|l| (*l as usize) < outcome.chosen_k.unwrap()));
    }

    #[test]
    fn test_identical_points_do_not_panic() {
        let data = Array2::from_elem((8, 3), 1.5);
        let outcome = KMeans::new(&ClusteringConfig::default()).cluster(&data);
        assert_eq!(outcome.status, StageStatus::Completed);
        assert_eq!(outcome.chosen_k, Some(2));
    }

    #[test]
    fn test_silhouette_singletons_score_zero() {
        let data = array![[0.0], [5.0]];
        assert_eq!(silhouette(&data, &[0, 1], 2, None, 42), 0.0);
    }
}
