//! Derived annotations appended by the analysis stages

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::body::{BodyCategory, CanonicalBody};

/// Label DBSCAN gives points reachable from no core point
pub const OUTLIER_LABEL: i32 = -1;

/// Outcome of an analysis stage for one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageStatus {
    Completed,
    InsufficientData,
    Skipped,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Completed => "completed",
            StageStatus::InsufficientData => "insufficient-data",
            StageStatus::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "completed" => StageStatus::Completed,
            "insufficient-data" => StageStatus::InsufficientData,
            _ => StageStatus::Skipped,
        }
    }
}

/// K-means membership of one body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterAssignment {
    pub body_id: String,
    /// Always in `0..chosen_k`
    pub cluster: u32,
    pub distance_to_centroid: f64,
}

/// Rule-based anomaly subtype
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnomalySubtype {
    CometLike,
    Retrograde,
    NearSunGrazer,
    ScatteredDisk,
    Hybrid,
}

impl AnomalySubtype {
    pub const ALL: [AnomalySubtype; 5] = [
        AnomalySubtype::CometLike,
        AnomalySubtype::Retrograde,
        AnomalySubtype::NearSunGrazer,
        AnomalySubtype::ScatteredDisk,
        AnomalySubtype::Hybrid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalySubtype::CometLike => "comet-like",
            AnomalySubtype::Retrograde => "retrograde",
            AnomalySubtype::NearSunGrazer => "near-sun-grazer",
            AnomalySubtype::ScatteredDisk => "scattered-disk",
            AnomalySubtype::Hybrid => "hybrid",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

/// Outlier verdict for one body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    pub body_id: String,
    pub is_anomaly: bool,
    /// 0 = inside a dense region, 1 = farthest from any dense region this run
    pub rarity_score: f64,
    /// Tags in rule order, no duplicates
    pub anomaly_subtype: Vec<AnomalySubtype>,
    pub specific_reasons: Vec<String>,
    /// DBSCAN cluster id, or `OUTLIER_LABEL`
    pub density_label: i32,
}

/// 2-D projection of a body's feature vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    pub body_id: String,
    pub x: f64,
    pub y: f64,
}

/// Dynamical population a k-means cluster most resembles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Population {
    MainBelt,
    JupiterTrojans,
    NearEarth,
    CometLike,
    Centaurs,
    HighInclination,
    Mixed,
}

impl Population {
    pub fn label(&self) -> &'static str {
        match self {
            Population::MainBelt => "Main Belt",
            Population::JupiterTrojans => "Jupiter Trojans",
            Population::NearEarth => "Near-Earth Objects",
            Population::CometLike => "Comet-like",
            Population::Centaurs => "Centaurs",
            Population::HighInclination => "High Inclination",
            Population::Mixed => "Mixed Population",
        }
    }
}

/// Summary statistics of one k-means cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterProfile {
    pub cluster: u32,
    pub population: Population,
    pub count: usize,
    pub mean_a: f64,
    pub mean_e: f64,
    pub mean_i: f64,
    /// Mean over members with a known radius
    pub mean_radius_km: Option<f64>,
    pub dominant_category: BodyCategory,
    pub category_breakdown: BTreeMap<BodyCategory, usize>,
}

/// Everything one pipeline run publishes, in canonical order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub bodies: Vec<CanonicalBody>,
    pub assignments: Vec<ClusterAssignment>,
    pub anomalies: Vec<AnomalyRecord>,
    pub projections: Vec<Projection>,
    pub clusters: Vec<ClusterProfile>,
}

impl Snapshot {
    /// Sort every table by body id so serialization is stable
    pub fn canonicalize(&mut self) {
        self.bodies.sort_by(|a, b| a.id.cmp(&b.id));
        self.assignments.sort_by(|a, b| a.body_id.cmp(&b.body_id));
        self.anomalies.sort_by(|a, b| a.body_id.cmp(&b.body_id));
        self.projections.sort_by(|a, b| a.body_id.cmp(&b.body_id));
        self.clusters.sort_by_key(|c| c.cluster);
    }

    /// Canonical JSON bytes of the snapshot
    pub fn to_canonical_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
