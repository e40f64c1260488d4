//! Analysis stages over fused bodies
//!
//! Both engines read the same standardized matrix; they run side by side on the
//! rayon pool and never mutate shared state.

mod anomaly;
mod dbscan;
mod features;
mod interpret;
mod kmeans;
mod pca;
mod taxonomy;

pub use anomaly::{rarity_scores, AnomalyDetector, AnomalyOutcome};
pub use dbscan::{DbscanClusterer, DensityResult, DensityStats};
pub use features::{normalize, FeatureColumn, NormalizedFeatures, Scaler};
pub use interpret::{interpret, population_for};
pub use kmeans::{silhouette, ClusterOutcome, KCandidate, KMeans};
pub use pca::Pca;
pub use taxonomy::{classify, Classification};

use crate::config::{AnomalyConfig, ClusteringConfig};
use crate::types::{CanonicalBody, ClusterProfile};

/// Everything the analysis stages derive from one body set
#[derive(Debug, Clone)]
pub struct AnalysisOutput {
    pub features: NormalizedFeatures,
    pub clusters: ClusterOutcome,
    pub anomalies: AnomalyOutcome,
    pub profiles: Vec<ClusterProfile>,
}

/// Normalize, then cluster and scan for anomalies in parallel
pub fn analyze(
    bodies: &[CanonicalBody],
    clustering: &ClusteringConfig,
    anomaly: &AnomalyConfig,
) -> AnalysisOutput {
    let features = normalize(bodies);
    let (clusters, anomalies) = rayon::join(
        || KMeans::new(clustering).cluster(&features.matrix),
        || AnomalyDetector::new(anomaly).detect(&features, bodies),
    );
    let profiles = interpret(&clusters, &features, bodies);

    AnalysisOutput {
        features,
        clusters,
        anomalies,
        profiles,
    }
}
