//! Storage module for persistent data storage
//!
//! Provides SQLite-based persistence for versioned run snapshots, the query views read
//! from them and the source cache.

mod database;
mod query;

pub use database::{ResultStore, RunMetadata, RunRecord, DEFAULT_KEEP_SNAPSHOTS};
pub use query::{
    AnomalyFilter, AnomalyRow, AnomalyView, BodyDetail, BodyFilter, BodyRow, Bounds,
    ClusterPoint, ClusteringView, DashboardStats, FilterRanges, Page, ValueRange,
    DEFAULT_ANOMALY_PAGE_SIZE, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};
