//! Configuration for the census pipeline

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::TtlClass;
use crate::error::{Error, Result};
use crate::types::SourceKind;

/// Main census configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CensusConfig {
    /// Upstream sources
    #[serde(default)]
    pub sources: SourcesConfig,
    /// Cache TTLs per staleness class
    #[serde(default)]
    pub cache: CacheConfig,
    /// Fusion priority rules
    #[serde(default)]
    pub fusion: FusionConfig,
    /// K-means settings
    #[serde(default)]
    pub clustering: ClusteringConfig,
    /// DBSCAN and taxonomy settings
    #[serde(default)]
    pub anomaly: AnomalyConfig,
    /// Worker pool and timeouts
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Result store location and retention
    #[serde(default)]
    pub storage: StorageConfig,
}

impl CensusConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml_str(&text)?;
        tracing::info!("Loaded configuration from {}", path.as_ref().display());
        Ok(config)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: CensusConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let c = &self.clustering;
        if c.k_min < 2 || c.k_max < c.k_min {
            return Err(Error::config(format!(
                "clustering k range {}..={} must start at 2 or more and be non-empty",
                c.k_min, c.k_max
            )));
        }
        if c.max_iterations == 0 || c.n_init == 0 {
            return Err(Error::config("clustering max_iterations and n_init must be positive"));
        }
        if !(self.anomaly.eps > 0.0) || self.anomaly.min_samples == 0 {
            return Err(Error::config("anomaly eps and min_samples must be positive"));
        }
        if self.cache.semi_static_days == 0 || self.cache.static_days == 0 {
            return Err(Error::config("cache day TTLs must be positive"));
        }
        for (key, order) in [
            ("absolute_magnitude_priority", &self.fusion.absolute_magnitude_priority),
            ("descriptive_priority", &self.fusion.descriptive_priority),
        ] {
            if let Some(kind) = SourceKind::ALL.into_iter().find(|k| !order.contains(k)) {
                return Err(Error::config(format!(
                    "fusion.{} is missing source '{}'",
                    key, kind
                )));
            }
        }
        if self.pipeline.fetch_timeout_secs == 0 {
            return Err(Error::config("pipeline.fetch_timeout_secs must be positive"));
        }
        Ok(())
    }

    /// Settings for one source
    pub fn source(&self, kind: SourceKind) -> &SourceConfig {
        match kind {
            SourceKind::Facts => &self.sources.facts,
            SourceKind::Elements => &self.sources.elements,
            SourceKind::Ephemeris => &self.sources.ephemeris,
            SourceKind::NearApproach => &self.sources.near_approach,
        }
    }
}

/// Per-source settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub facts: SourceConfig,
    pub elements: SourceConfig,
    pub ephemeris: SourceConfig,
    pub near_approach: SourceConfig,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            facts: SourceConfig::new("https://api.le-systeme-solaire.net/rest/bodies/", vec![]),
            elements: SourceConfig::new(
                "https://ssd-api.jpl.nasa.gov/sbdb_query.api",
                ["neo", "pha", "MBA", "TJN", "CEN", "JFc", "HTC"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            ),
            ephemeris: SourceConfig::new(
                "https://ssd.jpl.nasa.gov/api/horizons.api",
                ["199", "299", "399", "499", "599", "699", "799", "899", "2000001", "134340"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            ),
            near_approach: SourceConfig {
                api_key: Some("DEMO_KEY".to_string()),
                ..SourceConfig::new("https://api.nasa.gov/neo/rest/v1/", vec![])
            },
        }
    }
}

/// Settings shared by every source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Whether the source takes part in runs (default: true)
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Endpoint URL
    pub base_url: String,
    /// Override of the source's default staleness class
    #[serde(default)]
    pub ttl_class: Option<TtlClass>,
    /// Query targets: class groups for elements, SPK-IDs for ephemeris
    #[serde(default)]
    pub targets: Vec<String>,
    /// API key appended as `api_key` when set
    #[serde(default)]
    pub api_key: Option<String>,
    /// Attempts per request including the first (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First backoff delay, doubled per attempt (default: 2000ms)
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,
    /// Backoff ceiling (default: 10000ms)
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_ms: u64,
    /// Pause between consecutive requests to this source (default: 0)
    #[serde(default)]
    pub min_interval_ms: u64,
    /// Near-approach feed window in days, capped at 7 (default: 7)
    #[serde(default = "default_window_days")]
    pub window_days: u32,
    /// Row limit per elements query (default: 5000)
    #[serde(default = "default_row_limit")]
    pub row_limit: usize,
}

fn default_enabled() -> bool { true }
fn default_max_attempts() -> u32 { 3 }
fn default_retry_base_delay() -> u64 { 2000 }
fn default_retry_max_delay() -> u64 { 10_000 }
fn default_window_days() -> u32 { 7 }
fn default_row_limit() -> usize { 5000 }

impl SourceConfig {
    pub fn new(base_url: &str, targets: Vec<String>) -> Self {
        Self {
            enabled: true,
            base_url: base_url.to_string(),
            ttl_class: None,
            targets,
            api_key: None,
            max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay(),
            retry_max_delay_ms: default_retry_max_delay(),
            min_interval_ms: 0,
            window_days: default_window_days(),
            row_limit: default_row_limit(),
        }
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

/// Cache TTLs per staleness class
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Refresh period of static sources (default: 7 days)
    #[serde(default = "default_static_days")]
    pub static_days: u32,
    /// Refresh period of semi-static sources (default: 15 days)
    #[serde(default = "default_semi_static_days")]
    pub semi_static_days: u32,
    /// TTL of high-churn hybrid queries (default: 6 hours)
    #[serde(default = "default_high_churn_hours")]
    pub hybrid_high_churn_hours: u32,
    /// TTL of low-churn hybrid queries (default: 12 hours)
    #[serde(default = "default_low_churn_hours")]
    pub hybrid_low_churn_hours: u32,
}

fn default_static_days() -> u32 { 7 }
fn default_semi_static_days() -> u32 { 15 }
fn default_high_churn_hours() -> u32 { 6 }
fn default_low_churn_hours() -> u32 { 12 }

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            static_days: default_static_days(),
            semi_static_days: default_semi_static_days(),
            hybrid_high_churn_hours: default_high_churn_hours(),
            hybrid_low_churn_hours: default_low_churn_hours(),
        }
    }
}

/// Fusion priority rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionConfig {
    /// Source order for absolute magnitude, which both catalogs describe
    /// (default: elements, facts, ephemeris, near_approach)
    #[serde(default = "default_magnitude_priority")]
    pub absolute_magnitude_priority: Vec<SourceKind>,
    /// Source order for name, category and parent body
    /// (default: elements, facts, ephemeris, near_approach)
    #[serde(default = "default_descriptive_priority")]
    pub descriptive_priority: Vec<SourceKind>,
    /// Significant digits kept on every fused number (default: 10)
    #[serde(default = "default_significant_digits")]
    pub significant_digits: u32,
}

fn default_magnitude_priority() -> Vec<SourceKind> {
    vec![
        SourceKind::Elements,
        SourceKind::Facts,
        SourceKind::Ephemeris,
        SourceKind::NearApproach,
    ]
}
fn default_descriptive_priority() -> Vec<SourceKind> {
    default_magnitude_priority()
}
fn default_significant_digits() -> u32 { 10 }

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            absolute_magnitude_priority: default_magnitude_priority(),
            descriptive_priority: default_descriptive_priority(),
            significant_digits: default_significant_digits(),
        }
    }
}

/// K-means settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusteringConfig {
    /// Smallest candidate k (default: 2)
    #[serde(default = "default_k_min")]
    pub k_min: usize,
    /// Largest candidate k (default: 6)
    #[serde(default = "default_k_max")]
    pub k_max: usize,
    /// Seed for centroid initialization (default: 42)
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Lloyd iteration cap (default: 300)
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Seeded restarts per k, best inertia kept (default: 4)
    #[serde(default = "default_n_init")]
    pub n_init: usize,
    /// Points scored by the silhouette, sampled with the seed (default: 5000)
    #[serde(default = "default_silhouette_sample")]
    pub silhouette_sample: Option<usize>,
}

fn default_k_min() -> usize { 2 }
fn default_k_max() -> usize { 6 }
fn default_seed() -> u64 { 42 }
fn default_max_iterations() -> usize { 300 }
fn default_n_init() -> usize { 4 }
fn default_silhouette_sample() -> Option<usize> { Some(5000) }

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            k_min: default_k_min(),
            k_max: default_k_max(),
            seed: default_seed(),
            max_iterations: default_max_iterations(),
            n_init: default_n_init(),
            silhouette_sample: default_silhouette_sample(),
        }
    }
}

/// DBSCAN and taxonomy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyConfig {
    /// Neighborhood radius in standardized units (default: 0.5)
    #[serde(default = "default_eps")]
    pub eps: f64,
    /// Neighbors (self included) that make a core point (default: 10)
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
    /// Measure rarity in the 2-D projection instead of the full space (default: false)
    #[serde(default)]
    pub rarity_in_projection: bool,
    /// Eccentricity above which a body is anomalous regardless of density (default: 0.8)
    #[serde(default = "default_extreme_e")]
    pub extreme_eccentricity: f64,
    /// Inclination above which a body is anomalous regardless of density (default: 150)
    #[serde(default = "default_extreme_i")]
    pub extreme_inclination_deg: f64,
    /// Perihelion below which a body is anomalous regardless of density (default: 0.1 AU)
    #[serde(default = "default_extreme_q")]
    pub extreme_perihelion_au: f64,
}

fn default_eps() -> f64 { 0.5 }
fn default_min_samples() -> usize { 10 }
fn default_extreme_e() -> f64 { 0.8 }
fn default_extreme_i() -> f64 { 150.0 }
fn default_extreme_q() -> f64 { 0.1 }

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            eps: default_eps(),
            min_samples: default_min_samples(),
            rarity_in_projection: false,
            extreme_eccentricity: default_extreme_e(),
            extreme_inclination_deg: default_extreme_i(),
            extreme_perihelion_au: default_extreme_q(),
        }
    }
}

/// Worker pool and timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Sources fetched concurrently (default: number of sources, at most CPU count)
    #[serde(default)]
    pub parallel_sources: Option<usize>,
    /// Global timeout for one fetch attempt in seconds (default: 30)
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    /// Ignore fresh cache entries and refetch everything (default: false)
    #[serde(default)]
    pub force_refresh: bool,
}

fn default_fetch_timeout() -> u64 { 30 }

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            parallel_sources: None,
            fetch_timeout_secs: default_fetch_timeout(),
            force_refresh: false,
        }
    }
}

impl PipelineConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

/// Result store location and retention
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database holding snapshots and cache entries
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// Snapshot versions kept after each commit (default: 10)
    #[serde(default = "default_keep_snapshots")]
    pub keep_snapshots: usize,
}

fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
        .join("solar-census")
        .join("census.db")
}
fn default_keep_snapshots() -> usize { 10 }

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            keep_snapshots: default_keep_snapshots(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = CensusConfig::default();
        config.validate().unwrap();
        assert_eq!(config.anomaly.eps, 0.5);
        assert_eq!(config.anomaly.min_samples, 10);
        assert_eq!(config.cache.semi_static_days, 15);
        assert_eq!(config.clustering.seed, 42);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = CensusConfig::from_toml_str(
            r#"
            [anomaly]
            min_samples = 5

            [fusion]
            absolute_magnitude_priority = ["facts", "elements", "ephemeris", "near_approach"]
            "#,
        )
        .unwrap();
        assert_eq!(config.anomaly.min_samples, 5);
        assert_eq!(config.anomaly.eps, 0.5);
        assert_eq!(config.fusion.absolute_magnitude_priority[0], SourceKind::Facts);
        assert_eq!(config.fusion.descriptive_priority[0], SourceKind::Elements);
        assert_eq!(config.clustering.k_max, 6);
    }

    #[test]
    fn test_rejects_incomplete_priority() {
        let err = CensusConfig::from_toml_str(
            r#"
            [fusion]
            absolute_magnitude_priority = ["facts"]
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = CensusConfig::from_toml_str(
            r#"
            [fusion]
            descriptive_priority = ["facts", "elements", "ephemeris"]
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("descriptive_priority"));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[clustering]\nk_max = 4\n\n[sources.facts]\nenabled = false\nbase_url = \"http://localhost\"").unwrap();
        let config = CensusConfig::from_file(file.path()).unwrap();
        assert_eq!(config.clustering.k_max, 4);
        assert!(!config.sources.facts.enabled);
        assert!(config.sources.elements.enabled);
    }
}
