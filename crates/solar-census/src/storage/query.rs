//! Read-side views over the current snapshot

use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::types::{
    AnomalyRecord, AnomalySubtype, BodyCategory, CanonicalBody, ClusterAssignment, ClusterProfile,
    Projection,
};

use super::database::{current_version, parse_timestamp, ResultStore};

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const DEFAULT_ANOMALY_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 200;

/// One page of a listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    /// 1-based
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
}

impl<T> Page<T> {
    fn empty(page: usize, page_size: usize) -> Self {
        Self {
            items: Vec::new(),
            total: 0,
            page,
            page_size,
            total_pages: 0,
        }
    }
}

fn clamp_page(page: usize, page_size: Option<usize>, default: usize) -> (usize, usize) {
    (page.max(1), page_size.unwrap_or(default).clamp(1, MAX_PAGE_SIZE))
}

/// Row offset of a 1-based page, saturating at the largest SQLite integer
fn page_offset(page: usize, page_size: usize) -> i64 {
    let offset = page.saturating_sub(1).saturating_mul(page_size);
    i64::try_from(offset).unwrap_or(i64::MAX)
}

/// Filters of the body listing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BodyFilter {
    pub category: Option<BodyCategory>,
    pub anomaly: Option<bool>,
    pub min_radius_km: Option<f64>,
    pub max_radius_km: Option<f64>,
    /// Matched against name, id, category and the neo/pha/anomaly keywords
    pub text: Option<String>,
    pub page: usize,
    pub page_size: Option<usize>,
}

/// Flattened body with its analysis labels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodyRow {
    pub id: String,
    pub name: String,
    pub category: BodyCategory,
    pub dynamical_class: Option<String>,
    pub radius_km: Option<f64>,
    pub mass_kg: Option<f64>,
    pub a: Option<f64>,
    pub e: Option<f64>,
    pub i: Option<f64>,
    pub h: Option<f64>,
    pub is_neo: Option<bool>,
    pub is_pha: Option<bool>,
    pub cluster: Option<u32>,
    pub is_anomaly: bool,
}

impl BodyRow {
    fn new(body: CanonicalBody, cluster: Option<u32>, is_anomaly: bool) -> Self {
        Self {
            id: body.id,
            name: body.name,
            category: body.category,
            dynamical_class: body.dynamical_class,
            radius_km: body.physical.radius_km,
            mass_kg: body.physical.mass_kg,
            a: body.orbit.a,
            e: body.orbit.e,
            i: body.orbit.i,
            h: body.orbit.h,
            is_neo: body.is_neo,
            is_pha: body.is_pha,
            cluster,
            is_anomaly,
        }
    }
}

/// Everything known about one body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodyDetail {
    /// Includes per-field provenance
    pub body: CanonicalBody,
    pub assignment: Option<ClusterAssignment>,
    pub anomaly: Option<AnomalyRecord>,
    pub projection: Option<Projection>,
}

/// A projected body in the clustering view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterPoint {
    pub body_id: String,
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub cluster: Option<u32>,
    pub category: BodyCategory,
    pub radius_km: Option<f64>,
    pub rarity_score: Option<f64>,
    pub is_anomaly: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusteringView {
    pub points: Vec<ClusterPoint>,
    pub profiles: Vec<ClusterProfile>,
    /// `None` when nothing was projected
    pub bounds: Option<Bounds>,
}

/// Filters of the anomaly catalog
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnomalyFilter {
    pub subtype: Option<AnomalySubtype>,
    pub page: usize,
    pub page_size: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRow {
    pub name: String,
    pub category: BodyCategory,
    #[serde(flatten)]
    pub record: AnomalyRecord,
}

/// Anomaly catalog page, rarest first, with counts over the whole catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyView {
    pub page: Page<AnomalyRow>,
    pub total_anomalies: usize,
    pub subtype_counts: BTreeMap<AnomalySubtype, usize>,
}

/// Headline numbers of the current snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub version: Option<i64>,
    pub total_bodies: usize,
    pub by_category: BTreeMap<BodyCategory, usize>,
    /// Bodies with at least one field from each source
    pub by_source: BTreeMap<String, usize>,
    pub clustered: usize,
    pub anomalies: usize,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
    pub median: f64,
}

impl ValueRange {
    /// Range of already sorted values
    fn from_sorted(values: &[f64]) -> Option<Self> {
        let (first, last) = (*values.first()?, *values.last()?);
        let mid = values.len() / 2;
        let median = if values.len() % 2 == 0 {
            (values[mid - 1] + values[mid]) / 2.0
        } else {
            values[mid]
        };
        Some(Self { min: first, max: last, median })
    }
}

/// Slider bounds for the listing filters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterRanges {
    pub radius_km: Option<ValueRange>,
    pub a: Option<ValueRange>,
    pub e: Option<ValueRange>,
    pub i: Option<ValueRange>,
}

impl ResultStore {
    // ==================== Listing and Detail ====================

    /// Filtered, paginated bodies of the current snapshot, ordered by id
    pub fn list_bodies(&self, filter: &BodyFilter) -> Result<Page<BodyRow>> {
        let (page, page_size) = clamp_page(filter.page, filter.page_size, DEFAULT_PAGE_SIZE);
        let conn = self.conn.lock();
        let Some(version) = current_version(&conn)? else {
            return Ok(Page::empty(page, page_size));
        };

        let mut clauses = vec!["version = ?".to_string()];
        let mut args: Vec<SqlValue> = vec![SqlValue::Integer(version)];
        if let Some(category) = filter.category {
            clauses.push("category = ?".into());
            args.push(SqlValue::Text(category.as_str().into()));
        }
        if let Some(anomaly) = filter.anomaly {
            clauses.push("is_anomaly = ?".into());
            args.push(SqlValue::Integer(anomaly as i64));
        }
        if let Some(min) = filter.min_radius_km {
            clauses.push("radius_km >= ?".into());
            args.push(SqlValue::Real(min));
        }
        if let Some(max) = filter.max_radius_km {
            clauses.push("radius_km <= ?".into());
            args.push(SqlValue::Real(max));
        }
        if let Some(text) = filter.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            for word in text.split_whitespace() {
                clauses.push("search_text LIKE ? ESCAPE '\\'".into());
                args.push(SqlValue::Text(format!("%{}%", escape_like(&word.to_lowercase()))));
            }
        }
        let where_clause = clauses.join(" AND ");

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM bodies WHERE {}", where_clause),
            params_from_iter(args.iter()),
            |row| row.get(0),
        ).map_err(|e| Error::storage(format!("Failed to count bodies: {}", e)))?;

        let mut page_args = args.clone();
        page_args.push(SqlValue::Integer(page_size as i64));
        page_args.push(SqlValue::Integer(page_offset(page, page_size)));

        let mut stmt = conn.prepare(&format!(
            "SELECT body_json, cluster, is_anomaly FROM bodies WHERE {} ORDER BY id LIMIT ? OFFSET ?",
            where_clause
        )).map_err(|e| Error::storage(format!("Failed to prepare query: {}", e)))?;

        let items = stmt.query_map(params_from_iter(page_args.iter()), |row| {
            let json: String = row.get(0)?;
            let cluster: Option<i64> = row.get(1)?;
            let is_anomaly: bool = row.get(2)?;
            Ok((json, cluster, is_anomaly))
        })
        .map_err(|e| Error::storage(format!("Failed to list bodies: {}", e)))?
        .filter_map(|r| r.ok())
        .filter_map(|(json, cluster, is_anomaly)| {
            let body: CanonicalBody = serde_json::from_str(&json).ok()?;
            Some(BodyRow::new(body, cluster.map(|c| c as u32), is_anomaly))
        })
        .collect();

        let total = total as usize;
        Ok(Page {
            items,
            total,
            page,
            page_size,
            total_pages: total.div_ceil(page_size),
        })
    }

    /// Body, assignment, anomaly record and projection of one id
    pub fn body_detail(&self, id: &str) -> Result<Option<BodyDetail>> {
        let conn = self.conn.lock();
        let Some(version) = current_version(&conn)? else {
            return Ok(None);
        };

        let body_json: Option<String> = conn.query_row(
            "SELECT body_json FROM bodies WHERE version = ?1 AND id = ?2",
            params![version, id],
            |row| row.get(0),
        ).optional()
        .map_err(|e| Error::storage(format!("Failed to get body: {}", e)))?;
        let Some(body_json) = body_json else {
            return Ok(None);
        };
        let body: CanonicalBody = serde_json::from_str(&body_json)?;

        let assignment = conn.query_row(
            "SELECT cluster, distance FROM assignments WHERE version = ?1 AND body_id = ?2",
            params![version, id],
            |row| {
                let cluster: i64 = row.get(0)?;
                Ok(ClusterAssignment {
                    body_id: id.to_string(),
                    cluster: cluster as u32,
                    distance_to_centroid: row.get(1)?,
                })
            },
        ).optional()
        .map_err(|e| Error::storage(format!("Failed to get assignment: {}", e)))?;

        let anomaly_json: Option<String> = conn.query_row(
            "SELECT record_json FROM anomalies WHERE version = ?1 AND body_id = ?2",
            params![version, id],
            |row| row.get(0),
        ).optional()
        .map_err(|e| Error::storage(format!("Failed to get anomaly record: {}", e)))?;
        let anomaly = anomaly_json.map(|j| serde_json::from_str(&j)).transpose()?;

        let projection = conn.query_row(
            "SELECT x, y FROM projections WHERE version = ?1 AND body_id = ?2",
            params![version, id],
            |row| Ok(Projection { body_id: id.to_string(), x: row.get(0)?, y: row.get(1)? }),
        ).optional()
        .map_err(|e| Error::storage(format!("Failed to get projection: {}", e)))?;

        Ok(Some(BodyDetail { body, assignment, anomaly, projection }))
    }

    // ==================== Analysis Views ====================

    /// Projected points with cluster labels, cluster profiles and plot bounds
    pub fn clustering_view(&self) -> Result<ClusteringView> {
        let conn = self.conn.lock();
        let Some(version) = current_version(&conn)? else {
            return Ok(ClusteringView { points: Vec::new(), profiles: Vec::new(), bounds: None });
        };

        let mut stmt = conn.prepare(
            r#"
            SELECT p.body_id, b.name, p.x, p.y, s.cluster, b.category, b.radius_km,
                   an.rarity_score, b.is_anomaly
            FROM projections p
            JOIN bodies b ON b.version = p.version AND b.id = p.body_id
            LEFT JOIN assignments s ON s.version = p.version AND s.body_id = p.body_id
            LEFT JOIN anomalies an ON an.version = p.version AND an.body_id = p.body_id
            WHERE p.version = ?1
            ORDER BY p.body_id
            "#
        ).map_err(|e| Error::storage(format!("Failed to prepare query: {}", e)))?;

        let points: Vec<ClusterPoint> = stmt.query_map(params![version], |row| {
            let category: String = row.get(5)?;
            let cluster: Option<i64> = row.get(4)?;
            Ok(ClusterPoint {
                body_id: row.get(0)?,
                name: row.get(1)?,
                x: row.get(2)?,
                y: row.get(3)?,
                cluster: cluster.map(|c| c as u32),
                category: BodyCategory::parse(&category).unwrap_or_default(),
                radius_km: row.get(6)?,
                rarity_score: row.get(7)?,
                is_anomaly: row.get(8)?,
            })
        })
        .map_err(|e| Error::storage(format!("Failed to load projections: {}", e)))?
        .filter_map(|r| r.ok())
        .collect();

        let profiles = load_profiles(&conn, version)?;
        let bounds = points.iter().fold(None, |acc: Option<Bounds>, p| {
            Some(match acc {
                None => Bounds { min_x: p.x, max_x: p.x, min_y: p.y, max_y: p.y },
                Some(b) => Bounds {
                    min_x: b.min_x.min(p.x),
                    max_x: b.max_x.max(p.x),
                    min_y: b.min_y.min(p.y),
                    max_y: b.max_y.max(p.y),
                },
            })
        });

        Ok(ClusteringView { points, profiles, bounds })
    }

    /// Anomalous bodies, rarest first, optionally of one subtype
    pub fn anomaly_view(&self, filter: &AnomalyFilter) -> Result<AnomalyView> {
        let (page, page_size) = clamp_page(filter.page, filter.page_size, DEFAULT_ANOMALY_PAGE_SIZE);
        let conn = self.conn.lock();
        let Some(version) = current_version(&conn)? else {
            return Ok(AnomalyView {
                page: Page::empty(page, page_size),
                total_anomalies: 0,
                subtype_counts: BTreeMap::new(),
            });
        };

        let mut subtype_counts = BTreeMap::new();
        {
            let mut stmt = conn.prepare(
                "SELECT subtype, COUNT(*) FROM anomaly_subtypes WHERE version = ?1 GROUP BY subtype"
            ).map_err(|e| Error::storage(format!("Failed to prepare query: {}", e)))?;
            let rows = stmt.query_map(params![version], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(|e| Error::storage(format!("Failed to count subtypes: {}", e)))?;
            for (subtype, count) in rows.filter_map(|r| r.ok()) {
                if let Some(subtype) = AnomalySubtype::parse(&subtype) {
                    subtype_counts.insert(subtype, count as usize);
                }
            }
        }

        let total_anomalies: i64 = conn.query_row(
            "SELECT COUNT(*) FROM anomalies WHERE version = ?1 AND is_anomaly = 1",
            params![version],
            |row| row.get(0),
        ).map_err(|e| Error::storage(format!("Failed to count anomalies: {}", e)))?;

        let subtype = filter.subtype.map(|s| s.as_str().to_string());
        let filter_clause = if subtype.is_some() {
            "AND EXISTS (SELECT 1 FROM anomaly_subtypes t WHERE t.version = an.version AND t.body_id = an.body_id AND t.subtype = ?2)"
        } else {
            "AND ?2 IS NULL"
        };

        let total: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM anomalies an WHERE an.version = ?1 AND an.is_anomaly = 1 {}",
                filter_clause
            ),
            params![version, subtype],
            |row| row.get(0),
        ).map_err(|e| Error::storage(format!("Failed to count anomalies: {}", e)))?;

        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT an.record_json, b.name, b.category
            FROM anomalies an
            JOIN bodies b ON b.version = an.version AND b.id = an.body_id
            WHERE an.version = ?1 AND an.is_anomaly = 1 {}
            ORDER BY an.rarity_score DESC, an.body_id
            LIMIT ?3 OFFSET ?4
            "#,
            filter_clause
        )).map_err(|e| Error::storage(format!("Failed to prepare query: {}", e)))?;

        let items = stmt.query_map(
            params![version, subtype, page_size as i64, page_offset(page, page_size)],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .map_err(|e| Error::storage(format!("Failed to list anomalies: {}", e)))?
        .filter_map(|r| r.ok())
        .filter_map(|(json, name, category)| {
            Some(AnomalyRow {
                name,
                category: BodyCategory::parse(&category).unwrap_or_default(),
                record: serde_json::from_str(&json).ok()?,
            })
        })
        .collect();

        let total = total as usize;
        Ok(AnomalyView {
            page: Page {
                items,
                total,
                page,
                page_size,
                total_pages: total.div_ceil(page_size),
            },
            total_anomalies: total_anomalies as usize,
            subtype_counts,
        })
    }

    // ==================== Statistics ====================

    /// Totals of the current snapshot
    pub fn dashboard_stats(&self) -> Result<DashboardStats> {
        let conn = self.conn.lock();
        let Some(version) = current_version(&conn)? else {
            return Ok(DashboardStats::default());
        };

        let mut stats = DashboardStats {
            version: Some(version),
            ..Default::default()
        };

        let mut stmt = conn.prepare(
            "SELECT body_json, cluster IS NOT NULL, is_anomaly FROM bodies WHERE version = ?1"
        ).map_err(|e| Error::storage(format!("Failed to prepare query: {}", e)))?;
        let rows = stmt.query_map(params![version], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?, row.get::<_, bool>(2)?))
        })
        .map_err(|e| Error::storage(format!("Failed to load bodies: {}", e)))?;

        for (json, clustered, is_anomaly) in rows.filter_map(|r| r.ok()) {
            let Ok(body) = serde_json::from_str::<CanonicalBody>(&json) else {
                continue;
            };
            stats.total_bodies += 1;
            *stats.by_category.entry(body.category).or_insert(0) += 1;
            for source in body.contributing_sources() {
                *stats.by_source.entry(source.to_string()).or_insert(0) += 1;
            }
            stats.clustered += clustered as usize;
            stats.anomalies += is_anomaly as usize;
        }

        let updated_at: Option<String> = conn.query_row(
            "SELECT updated_at FROM current_snapshot WHERE id = 1",
            [],
            |row| row.get(0),
        ).optional()
        .map_err(|e| Error::storage(format!("Failed to read update time: {}", e)))?;
        stats.last_updated = updated_at.map(|s| parse_timestamp(&s));

        Ok(stats)
    }

    /// Min, max and median of radius, a, e and i over the current snapshot
    pub fn filter_ranges(&self) -> Result<FilterRanges> {
        let conn = self.conn.lock();
        let Some(version) = current_version(&conn)? else {
            return Ok(FilterRanges::default());
        };

        Ok(FilterRanges {
            radius_km: column_range(&conn, version, "radius_km")?,
            a: column_range(&conn, version, "a")?,
            e: column_range(&conn, version, "e")?,
            i: column_range(&conn, version, "i")?,
        })
    }

    /// Cluster profiles of the current snapshot
    pub fn cluster_profiles(&self) -> Result<Vec<ClusterProfile>> {
        let conn = self.conn.lock();
        match current_version(&conn)? {
            Some(version) => load_profiles(&conn, version),
            None => Ok(Vec::new()),
        }
    }
}

fn load_profiles(conn: &Connection, version: i64) -> Result<Vec<ClusterProfile>> {
    let mut stmt = conn.prepare(
        "SELECT profile_json FROM cluster_profiles WHERE version = ?1 ORDER BY cluster"
    ).map_err(|e| Error::storage(format!("Failed to prepare query: {}", e)))?;

    let profiles = stmt.query_map(params![version], |row| row.get::<_, String>(0))
        .map_err(|e| Error::storage(format!("Failed to load cluster profiles: {}", e)))?
        .filter_map(|r| r.ok())
        .filter_map(|json| serde_json::from_str(&json).ok())
        .collect();

    Ok(profiles)
}

fn column_range(conn: &Connection, version: i64, column: &str) -> Result<Option<ValueRange>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {col} FROM bodies WHERE version = ?1 AND {col} IS NOT NULL ORDER BY {col}",
        col = column
    )).map_err(|e| Error::storage(format!("Failed to prepare query: {}", e)))?;

    let values: Vec<f64> = stmt.query_map(params![version], |row| row.get(0))
        .map_err(|e| Error::storage(format!("Failed to read {}: {}", column, e)))?
        .filter_map(|r| r.ok())
        .collect();

    Ok(ValueRange::from_sorted(&values))
}

fn escape_like(text: &str) -> String {
    text.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::database::tests::{metadata, sample_snapshot};

    fn store() -> ResultStore {
        let store = ResultStore::in_memory().unwrap();
        store.commit(&sample_snapshot(), &metadata(0)).unwrap();
        store
    }

    #[test]
    fn test_empty_store_views() {
        let store = ResultStore::in_memory().unwrap();
        assert_eq!(store.list_bodies(&BodyFilter::default()).unwrap().total, 0);
        assert!(store.body_detail("2000001").unwrap().is_none());
        assert_eq!(store.dashboard_stats().unwrap(), DashboardStats::default());
        assert!(store.clustering_view().unwrap().bounds.is_none());
    }

    #[test]
    fn test_listing_filters() {
        let store = store();

        let all = store.list_bodies(&BodyFilter::default()).unwrap();
        assert_eq!(all.total, 3);
        assert_eq!(all.page, 1);
        assert_eq!(all.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(all.items[0].id, "2000001");
        assert_eq!(all.items[0].cluster, Some(0));

        let moons = store.list_bodies(&BodyFilter { category: Some(BodyCategory::Moon), ..Default::default() }).unwrap();
        assert_eq!(moons.total, 1);
        assert_eq!(moons.items[0].name, "Io");
        assert_eq!(moons.items[0].cluster, None);

        let anomalous = store.list_bodies(&BodyFilter { anomaly: Some(true), ..Default::default() }).unwrap();
        assert_eq!(anomalous.items.len(), 1);
        assert_eq!(anomalous.items[0].id, "2000004");

        let large = store.list_bodies(&BodyFilter { min_radius_km: Some(300.0), max_radius_km: Some(1000.0), ..Default::default() }).unwrap();
        assert_eq!(large.items.iter().map(|b| b.name.as_str()).collect::<Vec<_>>(), vec!["Ceres"]);

        let text = store.list_bodies(&BodyFilter { text: Some("VESTA anomaly".into()), ..Default::default() }).unwrap();
        assert_eq!(text.total, 1);
        let wildcard = store.list_bodies(&BodyFilter { text: Some("%".into()), ..Default::default() }).unwrap();
        assert_eq!(wildcard.total, 0);
    }

    #[test]
    fn test_page_size_is_capped() {
        let store = store();
        let page = store.list_bodies(&BodyFilter { page: 2, page_size: Some(1000), ..Default::default() }).unwrap();
        assert_eq!(page.page_size, MAX_PAGE_SIZE);
        assert!(page.items.is_empty());
        assert_eq!(page.total_pages, 1);

        let small = store.list_bodies(&BodyFilter { page: 2, page_size: Some(2), ..Default::default() }).unwrap();
        assert_eq!(small.items.len(), 1);
        assert_eq!(small.total_pages, 2);
    }

    #[test]
    fn test_far_pages_are_empty() {
        assert_eq!(page_offset(1, 50), 0);
        assert_eq!(page_offset(3, 20), 40);
        assert_eq!(page_offset(usize::MAX, MAX_PAGE_SIZE), i64::MAX);

        let store = store();
        let bodies = store.list_bodies(&BodyFilter { page: usize::MAX, ..Default::default() }).unwrap();
        assert_eq!(bodies.page, usize::MAX);
        assert_eq!(bodies.total, 3);
        assert!(bodies.items.is_empty());

        let anomalies = store
            .anomaly_view(&AnomalyFilter { page: usize::MAX, page_size: Some(MAX_PAGE_SIZE), ..Default::default() })
            .unwrap();
        assert_eq!(anomalies.page.total, 1);
        assert!(anomalies.page.items.is_empty());
    }

    #[test]
    fn test_detail_joins_annotations() {
        let store = store();
        let detail = store.body_detail("2000004").unwrap().unwrap();
        assert_eq!(detail.body.name, "Vesta");
        assert_eq!(detail.assignment.unwrap().cluster, 1);
        assert!(detail.anomaly.unwrap().is_anomaly);
        assert_eq!(detail.projection.unwrap().x, 1.0);

        let moon = store.body_detail("moon:io").unwrap().unwrap();
        assert!(moon.assignment.is_none() && moon.anomaly.is_none() && moon.projection.is_none());
    }

    #[test]
    fn test_clustering_view_bounds() {
        let view = store().clustering_view().unwrap();
        assert_eq!(view.points.len(), 2);
        assert_eq!(view.profiles.len(), 1);
        assert_eq!(view.bounds, Some(Bounds { min_x: -1.0, max_x: 1.0, min_y: -0.5, max_y: 0.5 }));
        assert_eq!(view.points[1].rarity_score, Some(1.0));
    }

    #[test]
    fn test_anomaly_view_subtype_filter() {
        let store = store();
        let view = store.anomaly_view(&AnomalyFilter::default()).unwrap();
        assert_eq!(view.total_anomalies, 1);
        assert_eq!(view.page.page_size, DEFAULT_ANOMALY_PAGE_SIZE);
        assert_eq!(view.page.items[0].name, "Vesta");
        assert_eq!(view.subtype_counts[&AnomalySubtype::Hybrid], 1);

        let comets = store
            .anomaly_view(&AnomalyFilter { subtype: Some(AnomalySubtype::CometLike), ..Default::default() })
            .unwrap();
        assert_eq!(comets.page.total, 0);
        assert_eq!(comets.total_anomalies, 1);
    }

    #[test]
    fn test_stats_and_ranges() {
        let store = store();
        let stats = store.dashboard_stats().unwrap();
        assert_eq!(stats.total_bodies, 3);
        assert_eq!(stats.clustered, 2);
        assert_eq!(stats.anomalies, 1);
        assert_eq!(stats.by_category[&BodyCategory::Moon], 1);
        assert!(stats.last_updated.is_some());

        let ranges = store.filter_ranges().unwrap();
        let radius = ranges.radius_km.unwrap();
        assert_eq!((radius.min, radius.median, radius.max), (262.7, 469.7, 1821.6));
        let a = ranges.a.unwrap();
        assert_eq!(a.median, (2.36 + 2.77) / 2.0);
    }
}
