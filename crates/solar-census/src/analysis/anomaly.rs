//! Outlier detection, rarity scoring and 2-D projection

use ndarray::{Array1, Array2, Axis};
use rayon::prelude::*;
use std::collections::HashMap;

use crate::config::AnomalyConfig;
use crate::types::{AnomalyRecord, CanonicalBody, OrbitalElements, Projection, StageStatus};

use super::dbscan::{DbscanClusterer, DensityStats};
use super::features::NormalizedFeatures;
use super::kmeans::sq_dist;
use super::pca::Pca;
use super::taxonomy::classify;

/// Result of the anomaly stage
#[derive(Debug, Clone, PartialEq)]
pub struct AnomalyOutcome {
    pub status: StageStatus,
    /// One record per feature row, empty when data was insufficient
    pub records: Vec<AnomalyRecord>,
    /// One point per feature row
    pub projections: Vec<Projection>,
    pub density: Option<DensityStats>,
}

impl AnomalyOutcome {
    pub fn anomaly_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_anomaly).count()
    }
}

pub struct AnomalyDetector {
    config: AnomalyConfig,
}

impl AnomalyDetector {
    pub fn new(config: &AnomalyConfig) -> Self {
        Self { config: config.clone() }
    }

    pub fn detect(&self, features: &NormalizedFeatures, bodies: &[CanonicalBody]) -> AnomalyOutcome {
        let n = features.len();
        let pca = Pca::fit(&features.matrix, 2);
        let projected = pca.transform(&features.matrix);
        let projections: Vec<Projection> = features
            .body_ids
            .iter()
            .zip(projected.axis_iter(Axis(0)))
            .map(|(id, p)| Projection {
                body_id: id.clone(),
                x: p[0],
                y: p[1],
            })
            .collect();

        if n < self.config.min_samples {
            tracing::info!(
                "Anomaly detection skipped: {} points, {} needed",
                n,
                self.config.min_samples
            );
            return AnomalyOutcome {
                status: StageStatus::InsufficientData,
                records: Vec::new(),
                projections,
                density: None,
            };
        }

        let density = DbscanClusterer::new(self.config.eps, self.config.min_samples).cluster(&features.matrix);
        let space = if self.config.rarity_in_projection { &projected } else { &features.matrix };
        let rarity = rarity_scores(space, &density.core_indices());

        let by_id: HashMap<&str, &CanonicalBody> = bodies.iter().map(|b| (b.id.as_str(), b)).collect();
        let empty = OrbitalElements::default();
        let records: Vec<AnomalyRecord> = features
            .body_ids
            .iter()
            .enumerate()
            .map(|(row, id)| {
                let orbit = by_id.get(id.as_str()).map(|b| &b.orbit).unwrap_or(&empty);
                let verdict = classify(orbit, density.is_outlier(row), &self.config);
                AnomalyRecord {
                    body_id: id.clone(),
                    is_anomaly: verdict.is_anomaly,
                    rarity_score: rarity[row],
                    anomaly_subtype: verdict.subtypes,
                    specific_reasons: verdict.reasons,
                    density_label: density.labels[row],
                }
            })
            .collect();

        let stats = density.statistics();
        let outcome = AnomalyOutcome {
            status: StageStatus::Completed,
            records,
            projections,
            density: Some(stats.clone()),
        };
        tracing::info!(
            "DBSCAN found {} dense regions, {} outliers; {} bodies flagged anomalous",
            stats.num_clusters,
            stats.outliers,
            outcome.anomaly_count()
        );
        outcome
    }
}

/// Distance to the nearest core point (or to the centroid without any), scaled by the run maximum
pub fn rarity_scores(space: &Array2<f64>, core: &[usize]) -> Vec<f64> {
    let n = space.nrows();
    if n == 0 {
        return Vec::new();
    }
    let centroid = space
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(space.ncols()));

    let distances: Vec<f64> = (0..n)
        .into_par_iter()
        .map(|i| {
            let row = space.row(i);
            if core.is_empty() {
                return sq_dist(row, centroid.view()).sqrt();
            }
            core.iter()
                .map(|&c| sq_dist(row, space.row(c)))
                .fold(f64::INFINITY, f64::min)
                .sqrt()
        })
        .collect();

    let max = distances.iter().copied().fold(0.0f64, f64::max);
    if max <= 0.0 {
        return vec![0.0; n];
    }
    distances.into_iter().map(|d| d / max).collect()
}
