//! SQLite result store
//!
//! Every run writes a complete snapshot version in one transaction and then moves the
//! current-version pointer, so readers never observe a partially written run. The same
//! database holds the source cache.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use crate::cache::{payload_checksum, CacheBackend, CacheKey, Churn, StoredEntry, TtlClass};
use crate::config::StorageConfig;
use crate::error::{Error, Result};
use crate::types::{Snapshot, SourceKind, StageStatus};

/// Snapshot versions kept when no retention is configured
pub const DEFAULT_KEEP_SNAPSHOTS: usize = 10;

/// Run facts recorded next to a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub chosen_k: Option<usize>,
    pub silhouette: Option<f64>,
    pub cluster_status: StageStatus,
    pub anomaly_status: StageStatus,
    /// Sources that failed and were served from stale cache or skipped
    pub degraded_sources: Vec<SourceKind>,
}

/// A committed snapshot version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub version: i64,
    #[serde(flatten)]
    pub metadata: RunMetadata,
    pub body_count: usize,
    pub clustered_count: usize,
    pub anomaly_count: usize,
    /// Hex SHA-256 of the canonical snapshot JSON
    pub content_hash: String,
    pub is_current: bool,
}

/// SQLite-backed snapshot and cache store
pub struct ResultStore {
    pub(super) conn: Arc<Mutex<Connection>>,
    keep_snapshots: usize,
}

impl ResultStore {
    /// Create or open the database at the given path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| Error::storage(format!("Failed to open database: {}", e)))?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            keep_snapshots: DEFAULT_KEEP_SNAPSHOTS,
        };

        store.migrate()?;
        Ok(store)
    }

    /// Open the configured database, creating its directory if needed
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        if let Some(parent) = config.database_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let store = Self::new(&config.database_path)?.with_retention(config.keep_snapshots);
        tracing::info!("Result store at {}", config.database_path.display());
        Ok(store)
    }

    /// Create an in-memory database (for testing)
    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::storage(format!("Failed to open in-memory database: {}", e)))?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            keep_snapshots: DEFAULT_KEEP_SNAPSHOTS,
        };

        store.migrate()?;
        Ok(store)
    }

    /// Number of snapshot versions kept after each commit (at least one)
    pub fn with_retention(mut self, keep_snapshots: usize) -> Self {
        self.keep_snapshots = keep_snapshots.max(1);
        self
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA temp_store=MEMORY;
        "#).map_err(|e| Error::storage(format!("Failed to set pragmas: {}", e)))?;

        conn.execute_batch(r#"
            -- One row per committed snapshot version
            CREATE TABLE IF NOT EXISTS runs (
                version INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL UNIQUE,
                started_at TEXT NOT NULL,
                finished_at TEXT NOT NULL,
                chosen_k INTEGER,
                silhouette REAL,
                cluster_status TEXT NOT NULL,
                anomaly_status TEXT NOT NULL,
                degraded_sources TEXT NOT NULL,
                body_count INTEGER NOT NULL,
                clustered_count INTEGER NOT NULL,
                anomaly_count INTEGER NOT NULL,
                content_hash TEXT NOT NULL,
                snapshot_json TEXT NOT NULL
            );

            -- Canonical bodies, flattened for filtering
            CREATE TABLE IF NOT EXISTS bodies (
                version INTEGER NOT NULL,
                id TEXT NOT NULL,
                name TEXT NOT NULL,
                category TEXT NOT NULL,
                radius_km REAL,
                a REAL,
                e REAL,
                i REAL,
                cluster INTEGER,
                is_anomaly INTEGER NOT NULL DEFAULT 0,
                search_text TEXT NOT NULL,
                body_json TEXT NOT NULL,
                PRIMARY KEY (version, id)
            );

            CREATE INDEX IF NOT EXISTS idx_bodies_category ON bodies(version, category);
            CREATE INDEX IF NOT EXISTS idx_bodies_anomaly ON bodies(version, is_anomaly);

            CREATE TABLE IF NOT EXISTS assignments (
                version INTEGER NOT NULL,
                body_id TEXT NOT NULL,
                cluster INTEGER NOT NULL,
                distance REAL NOT NULL,
                PRIMARY KEY (version, body_id)
            );

            CREATE TABLE IF NOT EXISTS anomalies (
                version INTEGER NOT NULL,
                body_id TEXT NOT NULL,
                is_anomaly INTEGER NOT NULL,
                rarity_score REAL NOT NULL,
                density_label INTEGER NOT NULL,
                record_json TEXT NOT NULL,
                PRIMARY KEY (version, body_id)
            );

            CREATE INDEX IF NOT EXISTS idx_anomalies_rarity ON anomalies(version, rarity_score);

            -- One row per (anomaly, subtype) for subtype filtering
            CREATE TABLE IF NOT EXISTS anomaly_subtypes (
                version INTEGER NOT NULL,
                body_id TEXT NOT NULL,
                subtype TEXT NOT NULL,
                PRIMARY KEY (version, body_id, subtype)
            );

            CREATE TABLE IF NOT EXISTS projections (
                version INTEGER NOT NULL,
                body_id TEXT NOT NULL,
                x REAL NOT NULL,
                y REAL NOT NULL,
                PRIMARY KEY (version, body_id)
            );

            CREATE TABLE IF NOT EXISTS cluster_profiles (
                version INTEGER NOT NULL,
                cluster INTEGER NOT NULL,
                profile_json TEXT NOT NULL,
                PRIMARY KEY (version, cluster)
            );

            -- Single-row pointer to the version readers see
            CREATE TABLE IF NOT EXISTS current_snapshot (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- Source cache, one row per (source, query)
            CREATE TABLE IF NOT EXISTS cache_entries (
                source TEXT NOT NULL,
                query TEXT NOT NULL,
                payload TEXT NOT NULL,
                checksum TEXT NOT NULL,
                fetched_at TEXT NOT NULL,
                ttl_class TEXT NOT NULL,
                churn TEXT NOT NULL,
                expires_at TEXT,
                PRIMARY KEY (source, query)
            );
        "#).map_err(|e| Error::storage(format!("Failed to create tables: {}", e)))?;

        Ok(())
    }

    // ==================== Snapshot Operations ====================

    /// Write a snapshot as a new version and make it current, all or nothing
    pub fn commit(&self, snapshot: &Snapshot, metadata: &RunMetadata) -> Result<RunRecord> {
        let snapshot_json = snapshot.to_canonical_json()?;
        let content_hash = payload_checksum(&snapshot_json);
        let anomaly_ids: std::collections::HashSet<&str> = snapshot
            .anomalies
            .iter()
            .filter(|a| a.is_anomaly)
            .map(|a| a.body_id.as_str())
            .collect();
        let clusters: std::collections::HashMap<&str, u32> = snapshot
            .assignments
            .iter()
            .map(|a| (a.body_id.as_str(), a.cluster))
            .collect();

        let mut conn = self.conn.lock();
        let tx = conn.transaction()
            .map_err(|e| Error::storage(format!("Failed to begin transaction: {}", e)))?;

        tx.execute(
            r#"
            INSERT INTO runs (
                run_id, started_at, finished_at, chosen_k, silhouette, cluster_status,
                anomaly_status, degraded_sources, body_count, clustered_count, anomaly_count,
                content_hash, snapshot_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                metadata.run_id.to_string(),
                metadata.started_at.to_rfc3339(),
                metadata.finished_at.to_rfc3339(),
                metadata.chosen_k.map(|k| k as i64),
                metadata.silhouette,
                metadata.cluster_status.as_str(),
                metadata.anomaly_status.as_str(),
                serde_json::to_string(&metadata.degraded_sources)?,
                snapshot.bodies.len() as i64,
                snapshot.assignments.len() as i64,
                anomaly_ids.len() as i64,
                content_hash,
                snapshot_json,
            ],
        ).map_err(|e| Error::storage(format!("Failed to insert run: {}", e)))?;
        let version = tx.last_insert_rowid();

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO bodies (
                    version, id, name, category, radius_km, a, e, i, cluster, is_anomaly,
                    search_text, body_json
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                "#
            ).map_err(|e| Error::storage(format!("Failed to prepare statement: {}", e)))?;

            for body in &snapshot.bodies {
                let is_anomaly = anomaly_ids.contains(body.id.as_str());
                stmt.execute(params![
                    version,
                    body.id,
                    body.name,
                    body.category.as_str(),
                    body.physical.radius_km,
                    body.orbit.a,
                    body.orbit.e,
                    body.orbit.i,
                    clusters.get(body.id.as_str()).map(|c| *c as i64),
                    is_anomaly,
                    body.search_keywords(is_anomaly),
                    serde_json::to_string(body)?,
                ]).map_err(|e| Error::storage(format!("Failed to insert body: {}", e)))?;
            }
        }

        {
            let mut stmt = tx.prepare(
                "INSERT INTO assignments (version, body_id, cluster, distance) VALUES (?1, ?2, ?3, ?4)"
            ).map_err(|e| Error::storage(format!("Failed to prepare statement: {}", e)))?;
            for a in &snapshot.assignments {
                stmt.execute(params![version, a.body_id, a.cluster as i64, a.distance_to_centroid])
                    .map_err(|e| Error::storage(format!("Failed to insert assignment: {}", e)))?;
            }
        }

        {
            let mut records = tx.prepare(
                r#"
                INSERT INTO anomalies (
                    version, body_id, is_anomaly, rarity_score, density_label, record_json
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#
            ).map_err(|e| Error::storage(format!("Failed to prepare statement: {}", e)))?;
            let mut subtypes = tx.prepare(
                "INSERT INTO anomaly_subtypes (version, body_id, subtype) VALUES (?1, ?2, ?3)"
            ).map_err(|e| Error::storage(format!("Failed to prepare statement: {}", e)))?;

            for record in &snapshot.anomalies {
                records.execute(params![
                    version,
                    record.body_id,
                    record.is_anomaly,
                    record.rarity_score,
                    record.density_label,
                    serde_json::to_string(record)?,
                ]).map_err(|e| Error::storage(format!("Failed to insert anomaly: {}", e)))?;
                for subtype in &record.anomaly_subtype {
                    subtypes.execute(params![version, record.body_id, subtype.as_str()])
                        .map_err(|e| Error::storage(format!("Failed to insert subtype: {}", e)))?;
                }
            }
        }

        {
            let mut stmt = tx.prepare(
                "INSERT INTO projections (version, body_id, x, y) VALUES (?1, ?2, ?3, ?4)"
            ).map_err(|e| Error::storage(format!("Failed to prepare statement: {}", e)))?;
            for p in &snapshot.projections {
                stmt.execute(params![version, p.body_id, p.x, p.y])
                    .map_err(|e| Error::storage(format!("Failed to insert projection: {}", e)))?;
            }
        }

        {
            let mut stmt = tx.prepare(
                "INSERT INTO cluster_profiles (version, cluster, profile_json) VALUES (?1, ?2, ?3)"
            ).map_err(|e| Error::storage(format!("Failed to prepare statement: {}", e)))?;
            for profile in &snapshot.clusters {
                stmt.execute(params![version, profile.cluster as i64, serde_json::to_string(profile)?])
                    .map_err(|e| Error::storage(format!("Failed to insert cluster profile: {}", e)))?;
            }
        }

        tx.execute(
            r#"
            INSERT INTO current_snapshot (id, version, updated_at) VALUES (1, ?1, ?2)
            ON CONFLICT(id) DO UPDATE SET version = excluded.version, updated_at = excluded.updated_at
            "#,
            params![version, metadata.finished_at.to_rfc3339()],
        ).map_err(|e| Error::storage(format!("Failed to move current pointer: {}", e)))?;

        let pruned = prune_versions(&tx, self.keep_snapshots)?;

        tx.commit()
            .map_err(|e| Error::storage(format!("Failed to commit transaction: {}", e)))?;

        tracing::info!(
            "Committed snapshot v{} ({} bodies, {} anomalies, hash {}){}",
            version,
            snapshot.bodies.len(),
            anomaly_ids.len(),
            &content_hash[..12],
            if pruned > 0 { format!(", pruned {} old versions", pruned) } else { String::new() }
        );

        Ok(RunRecord {
            version,
            metadata: metadata.clone(),
            body_count: snapshot.bodies.len(),
            clustered_count: snapshot.assignments.len(),
            anomaly_count: anomaly_ids.len(),
            content_hash,
            is_current: true,
        })
    }

    /// Version readers currently see
    pub fn current_version(&self) -> Result<Option<i64>> {
        let conn = self.conn.lock();
        current_version(&conn)
    }

    /// Committed runs, newest first
    pub fn list_runs(&self) -> Result<Vec<RunRecord>> {
        let conn = self.conn.lock();
        let current = current_version(&conn)?;

        let mut stmt = conn.prepare(
            r#"
            SELECT version, run_id, started_at, finished_at, chosen_k, silhouette, cluster_status,
                   anomaly_status, degraded_sources, body_count, clustered_count, anomaly_count,
                   content_hash
            FROM runs ORDER BY version DESC
            "#
        ).map_err(|e| Error::storage(format!("Failed to prepare query: {}", e)))?;

        let runs = stmt.query_map([], |row| row_to_run_record(row, current))
            .map_err(|e| Error::storage(format!("Failed to list runs: {}", e)))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(runs)
    }

    /// Metadata of one version
    pub fn get_run(&self, version: i64) -> Result<Option<RunRecord>> {
        let conn = self.conn.lock();
        let current = current_version(&conn)?;

        conn.query_row(
            r#"
            SELECT version, run_id, started_at, finished_at, chosen_k, silhouette, cluster_status,
                   anomaly_status, degraded_sources, body_count, clustered_count, anomaly_count,
                   content_hash
            FROM runs WHERE version = ?1
            "#,
            params![version],
            |row| row_to_run_record(row, current),
        ).optional()
        .map_err(|e| Error::storage(format!("Failed to get run: {}", e)))
    }

    /// Canonical snapshot bytes of a version, as hashed at commit time
    pub fn snapshot_json(&self, version: i64) -> Result<Option<String>> {
        let conn = self.conn.lock();

        conn.query_row(
            "SELECT snapshot_json FROM runs WHERE version = ?1",
            params![version],
            |row| row.get(0),
        ).optional()
        .map_err(|e| Error::storage(format!("Failed to read snapshot: {}", e)))
    }

    /// Decoded snapshot of a version
    pub fn load_snapshot(&self, version: i64) -> Result<Option<Snapshot>> {
        match self.snapshot_json(version)? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Drop all but the newest `keep` versions; the current version always survives
    pub fn prune(&self, keep: usize) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()
            .map_err(|e| Error::storage(format!("Failed to begin transaction: {}", e)))?;
        let pruned = prune_versions(&tx, keep.max(1))?;
        tx.commit()
            .map_err(|e| Error::storage(format!("Failed to commit transaction: {}", e)))?;
        Ok(pruned)
    }
}

// ==================== Cache Entry Operations ====================

impl CacheBackend for ResultStore {
    fn load(&self, key: &CacheKey) -> Result<Option<StoredEntry>> {
        let conn = self.conn.lock();

        conn.query_row(
            r#"
            SELECT source, query, payload, checksum, fetched_at, ttl_class, churn, expires_at
            FROM cache_entries WHERE source = ?1 AND query = ?2
            "#,
            params![key.source.as_str(), key.query],
            row_to_stored_entry,
        ).optional()
        .map_err(|e| Error::storage(format!("Failed to load cache entry: {}", e)))
    }

    fn store(&self, entry: &StoredEntry) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute(
            r#"
            INSERT OR REPLACE INTO cache_entries (
                source, query, payload, checksum, fetched_at, ttl_class, churn, expires_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                entry.key.source.as_str(),
                entry.key.query,
                entry.payload,
                entry.checksum,
                entry.fetched_at.to_rfc3339(),
                entry.ttl_class.as_str(),
                entry.churn.as_str(),
                entry.expires_at.map(|t| t.to_rfc3339()),
            ],
        ).map_err(|e| Error::storage(format!("Failed to store cache entry: {}", e)))?;

        Ok(())
    }

    fn remove(&self, key: &CacheKey) -> Result<bool> {
        let conn = self.conn.lock();

        let count = conn.execute(
            "DELETE FROM cache_entries WHERE source = ?1 AND query = ?2",
            params![key.source.as_str(), key.query],
        ).map_err(|e| Error::storage(format!("Failed to remove cache entry: {}", e)))?;

        Ok(count > 0)
    }

    fn remove_source(&self, source: SourceKind) -> Result<usize> {
        let conn = self.conn.lock();

        let count = conn.execute(
            "DELETE FROM cache_entries WHERE source = ?1",
            params![source.as_str()],
        ).map_err(|e| Error::storage(format!("Failed to remove cache entries: {}", e)))?;

        Ok(count)
    }

    fn list(&self) -> Result<Vec<StoredEntry>> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(
            r#"
            SELECT source, query, payload, checksum, fetched_at, ttl_class, churn, expires_at
            FROM cache_entries ORDER BY source, query
            "#
        ).map_err(|e| Error::storage(format!("Failed to prepare query: {}", e)))?;

        let mut entries: Vec<StoredEntry> = stmt.query_map([], row_to_stored_entry)
            .map_err(|e| Error::storage(format!("Failed to list cache entries: {}", e)))?
            .filter_map(|r| r.ok())
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));

        Ok(entries)
    }
}

// ==================== Helpers ====================

pub(super) fn current_version(conn: &Connection) -> Result<Option<i64>> {
    conn.query_row(
        "SELECT version FROM current_snapshot WHERE id = 1",
        [],
        |row| row.get(0),
    ).optional()
    .map_err(|e| Error::storage(format!("Failed to read current version: {}", e)))
}

fn prune_versions(conn: &Connection, keep: usize) -> Result<usize> {
    let current = current_version(conn)?;
    let stale: Vec<i64> = {
        let mut stmt = conn.prepare(
            "SELECT version FROM runs ORDER BY version DESC LIMIT -1 OFFSET ?1"
        ).map_err(|e| Error::storage(format!("Failed to prepare query: {}", e)))?;
        let versions = stmt.query_map(params![keep as i64], |row| row.get::<_, i64>(0))
            .map_err(|e| Error::storage(format!("Failed to list old versions: {}", e)))?
            .filter_map(|r| r.ok())
            .filter(|v| Some(*v) != current)
            .collect();
        versions
    };

    for version in &stale {
        for table in [
            "bodies",
            "assignments",
            "anomalies",
            "anomaly_subtypes",
            "projections",
            "cluster_profiles",
            "runs",
        ] {
            conn.execute(&format!("DELETE FROM {} WHERE version = ?1", table), params![version])
                .map_err(|e| Error::storage(format!("Failed to prune {}: {}", table, e)))?;
        }
    }

    Ok(stale.len())
}

pub(super) fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_default()
}

fn row_to_run_record(row: &rusqlite::Row, current: Option<i64>) -> rusqlite::Result<RunRecord> {
    let version: i64 = row.get(0)?;
    let run_id_str: String = row.get(1)?;
    let started_at_str: String = row.get(2)?;
    let finished_at_str: String = row.get(3)?;
    let chosen_k: Option<i64> = row.get(4)?;
    let silhouette: Option<f64> = row.get(5)?;
    let cluster_status: String = row.get(6)?;
    let anomaly_status: String = row.get(7)?;
    let degraded_json: String = row.get(8)?;
    let body_count: i64 = row.get(9)?;
    let clustered_count: i64 = row.get(10)?;
    let anomaly_count: i64 = row.get(11)?;
    let content_hash: String = row.get(12)?;

    Ok(RunRecord {
        version,
        metadata: RunMetadata {
            run_id: Uuid::parse_str(&run_id_str).unwrap_or_default(),
            started_at: parse_timestamp(&started_at_str),
            finished_at: parse_timestamp(&finished_at_str),
            chosen_k: chosen_k.map(|k| k as usize),
            silhouette,
            cluster_status: StageStatus::parse(&cluster_status),
            anomaly_status: StageStatus::parse(&anomaly_status),
            degraded_sources: serde_json::from_str(&degraded_json).unwrap_or_default(),
        },
        body_count: body_count as usize,
        clustered_count: clustered_count as usize,
        anomaly_count: anomaly_count as usize,
        content_hash,
        is_current: current == Some(version),
    })
}

fn row_to_stored_entry(row: &rusqlite::Row) -> rusqlite::Result<StoredEntry> {
    let source_str: String = row.get(0)?;
    let query: String = row.get(1)?;
    let payload: String = row.get(2)?;
    let checksum: String = row.get(3)?;
    let fetched_at_str: String = row.get(4)?;
    let ttl_class_str: String = row.get(5)?;
    let churn_str: String = row.get(6)?;
    let expires_at_str: Option<String> = row.get(7)?;

    let source = SourceKind::parse(&source_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("unknown source '{}'", source_str).into(),
        )
    })?;

    Ok(StoredEntry {
        key: CacheKey::new(source, query),
        payload,
        checksum,
        fetched_at: parse_timestamp(&fetched_at_str),
        ttl_class: TtlClass::parse(&ttl_class_str).unwrap_or_else(|| TtlClass::default_for(source)),
        churn: Churn::parse(&churn_str),
        expires_at: expires_at_str.map(|s| parse_timestamp(&s)),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cache::{CachePolicy, CacheStore, ManualClock};
    use crate::types::{
        AnomalyRecord, AnomalySubtype, BodyCategory, CanonicalBody, ClusterAssignment,
        ClusterProfile, OrbitalElements, PhysicalAttributes, Population, Projection,
    };
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    pub(crate) fn body(id: &str, name: &str, category: BodyCategory, a: Option<f64>, radius: Option<f64>) -> CanonicalBody {
        CanonicalBody {
            id: id.to_string(),
            name: name.to_string(),
            category,
            dynamical_class: None,
            orbits: None,
            is_neo: None,
            is_pha: None,
            physical: PhysicalAttributes {
                radius_km: radius,
                ..Default::default()
            },
            orbit: OrbitalElements {
                a,
                e: a.map(|_| 0.1),
                i: a.map(|_| 5.0),
                ..Default::default()
            },
            ephemeris: None,
            close_approach: None,
            provenance: BTreeMap::new(),
        }
    }

    /// Small snapshot: two clustered asteroids (one anomalous) and a moon without orbit
    pub(crate) fn sample_snapshot() -> Snapshot {
        let mut snapshot = Snapshot {
            bodies: vec![
                body("2000001", "Ceres", BodyCategory::DwarfPlanet, Some(2.77), Some(469.7)),
                body("2000004", "Vesta", BodyCategory::Asteroid, Some(2.36), Some(262.7)),
                body("moon:io", "Io", BodyCategory::Moon, None, Some(1821.6)),
            ],
            assignments: vec![
                ClusterAssignment { body_id: "2000001".into(), cluster: 0, distance_to_centroid: 0.4 },
                ClusterAssignment { body_id: "2000004".into(), cluster: 1, distance_to_centroid: 0.2 },
            ],
            anomalies: vec![
                AnomalyRecord {
                    body_id: "2000001".into(),
                    is_anomaly: false,
                    rarity_score: 0.0,
                    anomaly_subtype: vec![],
                    specific_reasons: vec![],
                    density_label: 0,
                },
                AnomalyRecord {
                    body_id: "2000004".into(),
                    is_anomaly: true,
                    rarity_score: 1.0,
                    anomaly_subtype: vec![AnomalySubtype::Hybrid],
                    specific_reasons: vec!["density outlier matching no known orbital family".into()],
                    density_label: -1,
                },
            ],
            projections: vec![
                Projection { body_id: "2000001".into(), x: -1.0, y: 0.5 },
                Projection { body_id: "2000004".into(), x: 1.0, y: -0.5 },
            ],
            clusters: vec![ClusterProfile {
                cluster: 0,
                population: Population::MainBelt,
                count: 1,
                mean_a: 2.77,
                mean_e: 0.1,
                mean_i: 5.0,
                mean_radius_km: Some(469.7),
                dominant_category: BodyCategory::DwarfPlanet,
                category_breakdown: BTreeMap::from([(BodyCategory::DwarfPlanet, 1)]),
            }],
        };
        snapshot.canonicalize();
        snapshot
    }

    pub(crate) fn metadata(minute: u32) -> RunMetadata {
        let at = Utc.with_ymd_and_hms(2026, 10, 1, 12, minute, 0).unwrap();
        RunMetadata {
            run_id: Uuid::new_v4(),
            started_at: at,
            finished_at: at,
            chosen_k: Some(2),
            silhouette: Some(0.71),
            cluster_status: StageStatus::Completed,
            anomaly_status: StageStatus::Completed,
            degraded_sources: vec![SourceKind::Ephemeris],
        }
    }

    #[test]
    fn test_commit_moves_current_pointer() {
        let store = ResultStore::in_memory().unwrap();
        assert_eq!(store.current_version().unwrap(), None);

        let first = store.commit(&sample_snapshot(), &metadata(0)).unwrap();
        let second = store.commit(&sample_snapshot(), &metadata(1)).unwrap();
        assert_eq!(store.current_version().unwrap(), Some(second.version));
        assert!(second.version > first.version);
        assert_eq!(second.body_count, 3);
        assert_eq!(second.clustered_count, 2);
        assert_eq!(second.anomaly_count, 1);

        let runs = store.list_runs().unwrap();
        assert_eq!(runs.len(), 2);
        assert!(runs[0].is_current);
        assert!(!runs[1].is_current);
        assert_eq!(runs[0].metadata.degraded_sources, vec![SourceKind::Ephemeris]);
        assert_eq!(runs[0].metadata.chosen_k, Some(2));
    }

    #[test]
    fn test_snapshot_json_reproduces_hash() {
        let store = ResultStore::in_memory().unwrap();
        let snapshot = sample_snapshot();
        let run = store.commit(&snapshot, &metadata(0)).unwrap();

        let json = store.snapshot_json(run.version).unwrap().unwrap();
        assert_eq!(json, snapshot.to_canonical_json().unwrap());
        assert_eq!(payload_checksum(&json), run.content_hash);
        assert_eq!(store.load_snapshot(run.version).unwrap().unwrap(), snapshot);
        assert!(store.snapshot_json(run.version + 100).unwrap().is_none());
    }

    #[test]
    fn test_retention_keeps_newest_versions() {
        let store = ResultStore::in_memory().unwrap().with_retention(2);
        let versions: Vec<i64> = (0..4)
            .map(|m| store.commit(&sample_snapshot(), &metadata(m)).unwrap().version)
            .collect();

        let kept: Vec<i64> = store.list_runs().unwrap().iter().map(|r| r.version).collect();
        assert_eq!(kept, vec![versions[3], versions[2]]);
        assert!(store.snapshot_json(versions[0]).unwrap().is_none());

        let conn = store.conn.lock();
        let orphaned: i64 = conn
            .query_row("SELECT COUNT(*) FROM bodies WHERE version = ?1", params![versions[0]], |r| r.get(0))
            .unwrap();
        assert_eq!(orphaned, 0);
    }

    #[test]
    fn test_on_disk_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            database_path: dir.path().join("nested").join("census.db"),
            keep_snapshots: 3,
        };
        let version = {
            let store = ResultStore::from_config(&config).unwrap();
            store.commit(&sample_snapshot(), &metadata(0)).unwrap().version
        };
        let reopened = ResultStore::from_config(&config).unwrap();
        assert_eq!(reopened.current_version().unwrap(), Some(version));
    }

    #[test]
    fn test_cache_backend_roundtrip() {
        let store = Arc::new(ResultStore::in_memory().unwrap());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap()));
        let cache = CacheStore::new(store.clone(), CachePolicy::default(), clock);

        let key = CacheKey::new(SourceKind::Elements, "sb-class=MBA");
        cache
            .put(key.clone(), serde_json::json!({"data": [["1"]]}), TtlClass::SemiStatic, Churn::Low)
            .unwrap();

        let entry = cache.get(&key).unwrap();
        assert_eq!(entry.payload["data"][0][0], "1");
        assert_eq!(entry.ttl_class, TtlClass::SemiStatic);
        assert!(cache.is_fresh(&entry));

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].key, key);

        assert_eq!(store.remove_source(SourceKind::Elements).unwrap(), 1);
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn test_tampered_cache_row_is_a_miss() {
        let store = Arc::new(ResultStore::in_memory().unwrap());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap()));
        let cache = CacheStore::new(store.clone(), CachePolicy::default(), clock);
        let key = CacheKey::new(SourceKind::Facts, "bodies");
        cache.put(key.clone(), serde_json::json!({"bodies": []}), TtlClass::Static, Churn::Low).unwrap();

        store.conn.lock()
            .execute("UPDATE cache_entries SET payload = '{\"bodies\": [1]}'", [])
            .unwrap();
        assert!(cache.get(&key).is_none());
    }
}
