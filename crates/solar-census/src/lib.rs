//! solar-census: solar-system catalog fusion with population clustering and anomaly detection
//!
//! Pulls several independent catalogs (physical facts, orbital elements, live ephemerides and a
//! near-approach feed) through a staleness-aware cache, fuses them into one canonical record per
//! body, clusters the orbital feature space with k-means, flags density outliers with DBSCAN and
//! publishes each run as a versioned snapshot in SQLite.

pub mod analysis;
pub mod cache;
pub mod config;
pub mod error;
pub mod fusion;
pub mod pipeline;
pub mod sources;
pub mod storage;
pub mod types;

pub use cache::{CacheStore, Clock, ManualClock, SystemClock};
pub use config::CensusConfig;
pub use error::{Error, Result};
pub use pipeline::{Pipeline, RunReport, SourceReport};
pub use storage::ResultStore;
pub use types::{
    AnomalyRecord, AnomalySubtype, BodyCategory, CanonicalBody, ClusterAssignment, Snapshot,
    SourceKind,
};
