//! Batch run orchestration
//!
//! Sources are pulled concurrently through a bounded pool; each query goes through the
//! cache gate, retry policy and global timeout. Fusion and analysis then run on a blocking
//! thread and the result is committed as one snapshot version.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout};
use uuid::Uuid;

use crate::analysis::{analyze, AnalysisOutput};
use crate::cache::{
    CacheKey, CachePolicy, CacheStore, Clock, FetchOrigin, Fetched, SystemClock, TtlClass,
};
use crate::config::CensusConfig;
use crate::error::{Error, Result};
use crate::fusion::{FusionEngine, IdentityConflict};
use crate::sources::{HttpSource, RetryPolicy, SourceAdapter, SourceQuery};
use crate::storage::{ResultStore, RunMetadata, RunRecord};
use crate::types::{CanonicalBody, ClusterAssignment, Snapshot, SourceKind, SourceRecord};

/// What one source contributed to a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceReport {
    pub source: Option<SourceKind>,
    pub name: String,
    pub queries: usize,
    pub records: usize,
    pub cache_hits: usize,
    pub network_fetches: usize,
    /// Queries answered from an expired entry after a failed fetch
    pub stale_served: usize,
    /// Queries that produced nothing, with the reason
    pub failures: Vec<String>,
}

impl SourceReport {
    pub fn is_degraded(&self) -> bool {
        self.stale_served > 0 || !self.failures.is_empty()
    }
}

/// Outcome of a full run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run: RunRecord,
    pub sources: Vec<SourceReport>,
    pub conflicts: Vec<IdentityConflict>,
    /// Clustered bodies with at least one imputed feature column
    pub imputed_bodies: usize,
}

struct SourceSlot {
    adapter: Arc<dyn SourceAdapter>,
    retry: RetryPolicy,
    ttl_class: TtlClass,
    min_interval: Duration,
}

/// End-to-end census run
pub struct Pipeline {
    config: CensusConfig,
    sources: Vec<SourceSlot>,
    cache: Arc<CacheStore>,
    store: Arc<ResultStore>,
    clock: Arc<dyn Clock>,
}

impl Pipeline {
    /// Pipeline without sources; the cache lives in the result store's database
    pub fn new(config: CensusConfig, store: Arc<ResultStore>, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let cache = Arc::new(CacheStore::new(
            store.clone(),
            CachePolicy::from_config(&config.cache),
            clock.clone(),
        ));
        Ok(Self {
            config,
            sources: Vec::new(),
            cache,
            store,
            clock,
        })
    }

    /// Pipeline over the configured HTTP sources and on-disk store
    pub fn from_config(config: CensusConfig) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(ResultStore::from_config(&config.storage)?);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let today = clock.now().date_naive();

        let mut pipeline = Self::new(config, store, clock)?;
        for kind in SourceKind::ALL {
            let source_config = pipeline.config.source(kind);
            if !source_config.enabled {
                tracing::info!("Source {} disabled", kind);
                continue;
            }
            let adapter = HttpSource::from_config(kind, source_config, today)?;
            pipeline = pipeline.with_source(Arc::new(adapter));
        }
        Ok(pipeline)
    }

    /// Add a source; retry, TTL class and pacing come from its config section
    pub fn with_source(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        let kind = adapter.kind();
        let source_config = self.config.source(kind);
        self.sources.push(SourceSlot {
            retry: RetryPolicy::from_config(source_config),
            ttl_class: source_config.ttl_class.unwrap_or_else(|| TtlClass::default_for(kind)),
            min_interval: source_config.min_interval(),
            adapter,
        });
        self
    }

    pub fn config(&self) -> &CensusConfig {
        &self.config
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    /// Force the next run to refetch every query of a source
    pub fn refresh(&self, kind: SourceKind) -> Result<usize> {
        self.cache.invalidate_source(kind)
    }

    /// Pull, fuse, analyze and commit one snapshot
    pub async fn run(&self, force_refresh: bool) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let started_at = self.clock.now();
        let force_refresh = force_refresh || self.config.pipeline.force_refresh;
        tracing::info!(
            "Run {} started with {} sources{}",
            run_id,
            self.sources.len(),
            if force_refresh { " (forced refresh)" } else { "" }
        );

        let (records, sources) = self.pull_all(force_refresh).await;
        let degraded_sources: Vec<SourceKind> = {
            let mut kinds: Vec<SourceKind> = sources
                .iter()
                .filter(|r| r.is_degraded())
                .filter_map(|r| r.source)
                .collect();
            kinds.sort();
            kinds.dedup();
            kinds
        };
        for kind in &degraded_sources {
            tracing::warn!("Source {} is degraded for run {}", kind, run_id);
        }

        let fusion = FusionEngine::new(&self.config.fusion);
        let clustering = self.config.clustering.clone();
        let anomaly = self.config.anomaly.clone();
        let (fused, analysis) = tokio::task::spawn_blocking(move || {
            let fused = fusion.fuse(records);
            let analysis = analyze(&fused.bodies, &clustering, &anomaly);
            (fused, analysis)
        })
        .await
        .map_err(|e| Error::internal(format!("Analysis task failed: {}", e)))?;

        let imputed_bodies = analysis.features.imputed.len();
        let snapshot = build_snapshot(fused.bodies, &analysis);
        let metadata = RunMetadata {
            run_id,
            started_at,
            finished_at: self.clock.now(),
            chosen_k: analysis.clusters.chosen_k,
            silhouette: analysis.clusters.silhouette,
            cluster_status: analysis.clusters.status,
            anomaly_status: analysis.anomalies.status,
            degraded_sources,
        };
        let run = self.store.commit(&snapshot, &metadata)?;

        tracing::info!(
            "Run {} committed as v{}: {} bodies, {} clustered (k={:?}), {} anomalies",
            run_id,
            run.version,
            run.body_count,
            run.clustered_count,
            run.metadata.chosen_k,
            run.anomaly_count
        );

        Ok(RunReport {
            run,
            sources,
            conflicts: fused.conflicts,
            imputed_bodies,
        })
    }

    /// Pull every source through the bounded pool
    async fn pull_all(&self, force_refresh: bool) -> (Vec<SourceRecord>, Vec<SourceReport>) {
        let parallel = self
            .config
            .pipeline
            .parallel_sources
            .unwrap_or_else(|| self.sources.len().min(num_cpus::get()))
            .max(1);
        let semaphore = Arc::new(Semaphore::new(parallel));

        let pulls = self.sources.iter().map(|slot| {
            let sem = semaphore.clone();
            async move {
                let _permit = sem.acquire().await.ok();
                self.pull_source(slot, force_refresh).await
            }
        });
        let results = join_all(pulls).await;

        let mut records = Vec::new();
        let mut reports = Vec::with_capacity(results.len());
        for (source_records, report) in results {
            records.extend(source_records);
            reports.push(report);
        }
        (records, reports)
    }

    /// Run one source's queries in order, pacing requests by its minimum interval
    async fn pull_source(&self, slot: &SourceSlot, force_refresh: bool) -> (Vec<SourceRecord>, SourceReport) {
        let adapter = &slot.adapter;
        let kind = adapter.kind();
        let queries = adapter.queries();
        let mut report = SourceReport {
            source: Some(kind),
            name: adapter.name().to_string(),
            queries: queries.len(),
            ..Default::default()
        };
        let mut records = Vec::new();

        for (index, query) in queries.iter().enumerate() {
            if index > 0 && !slot.min_interval.is_zero() {
                sleep(slot.min_interval).await;
            }

            let fetched = match self.fetch_query(slot, query, force_refresh).await {
                Ok(fetched) => fetched,
                Err(e) => {
                    tracing::warn!("{} query '{}' produced nothing: {}", adapter.name(), query.key, e);
                    report.failures.push(format!("{}: {}", query.key, e));
                    continue;
                }
            };
            match fetched.origin {
                FetchOrigin::Cache => report.cache_hits += 1,
                FetchOrigin::Network => report.network_fetches += 1,
                FetchOrigin::Stale => report.stale_served += 1,
            }

            match adapter.normalize(&fetched.payload) {
                Ok(raw) => {
                    report.records += raw.len();
                    records.extend(raw.into_iter().map(|r| r.into_source_record(fetched.fetched_at)));
                }
                Err(e) => {
                    tracing::warn!("{} query '{}' returned an unusable payload: {}", adapter.name(), query.key, e);
                    report.failures.push(format!("{}: {}", query.key, e));
                }
            }
        }

        tracing::info!(
            "{}: {} records from {} queries ({} cached, {} fetched, {} stale, {} failed)",
            report.name,
            report.records,
            report.queries,
            report.cache_hits,
            report.network_fetches,
            report.stale_served,
            report.failures.len()
        );
        (records, report)
    }

    async fn fetch_query(
        &self,
        slot: &SourceSlot,
        query: &SourceQuery,
        force_refresh: bool,
    ) -> Result<Fetched> {
        let adapter = &slot.adapter;
        let key = CacheKey::new(adapter.kind(), query.key.as_str());
        let limit = self.config.pipeline.fetch_timeout();
        let label = format!("{} query '{}'", adapter.name(), query.key);

        self.cache
            .get_or_fetch(&key, slot.ttl_class, query.churn, force_refresh, || {
                slot.retry.run(&label, move || async move {
                    match timeout(limit, adapter.fetch(query)).await {
                        Ok(result) => result,
                        Err(_) => Err(Error::Timeout {
                            operation: format!("fetch {}/{}", adapter.kind(), query.key),
                            secs: limit.as_secs(),
                        }),
                    }
                })
            })
            .await
    }
}

/// Assemble the canonical snapshot from fused bodies and analysis annotations
fn build_snapshot(bodies: Vec<CanonicalBody>, analysis: &AnalysisOutput) -> Snapshot {
    let ids = &analysis.features.body_ids;
    let assignments = match (&analysis.clusters.labels, &analysis.clusters.distances) {
        (Some(labels), Some(distances)) => ids
            .iter()
            .zip(labels.iter().zip(distances.iter()))
            .map(|(id, (&cluster, &distance))| ClusterAssignment {
                body_id: id.clone(),
                cluster,
                distance_to_centroid: distance,
            })
            .collect(),
        _ => Vec::new(),
    };

    let mut snapshot = Snapshot {
        bodies,
        assignments,
        anomalies: analysis.anomalies.records.clone(),
        projections: analysis.anomalies.projections.clone(),
        clusters: analysis.profiles.clone(),
    };
    snapshot.canonicalize();
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Churn, ManualClock};
    use crate::sources::StaticSource;
    use crate::storage::BodyFilter;
    use crate::types::StageStatus;
    use chrono::{TimeZone, Utc};
    use serde_json::{json, Value};

    const ELEMENT_COLUMNS: [&str; 12] = ["spkid", "name", "class", "neo", "pha", "a", "e", "i", "per", "q", "ad", "H"];

    fn element_row(spkid: u64, name: &str, class: &str, a: f64, e: f64, i: f64, h: f64) -> Value {
        let per = 365.25 * a.powf(1.5);
        json!([
            spkid.to_string(),
            name,
            class,
            "N",
            "N",
            a.to_string(),
            e.to_string(),
            i.to_string(),
            per.to_string(),
            (a * (1.0 - e)).to_string(),
            (a * (1.0 + e)).to_string(),
            h.to_string()
        ])
    }

    /// 20 orbital-only bodies, 10 bodies in both catalogs and 20 physical-only bodies
    fn sources() -> (Arc<StaticSource>, Arc<StaticSource>, Arc<StaticSource>) {
        let mut main_belt = Vec::new();
        for k in 0..15 {
            let t = k as f64 / 15.0;
            let (spkid, name) = if k < 10 {
                (2_000_100 + k as u64, format!("Orbit {}", k))
            } else {
                (3_000_100 + k as u64, format!("Blend {}", k))
            };
            main_belt.push(element_row(spkid, &name, "MBA", 2.6 + 0.2 * t, 0.1 + 0.05 * t, 5.0 + 3.0 * t, 12.0 + t));
        }
        let mut trojans = Vec::new();
        for k in 15..30 {
            let t = (k - 15) as f64 / 15.0;
            let (spkid, name) = if k < 25 {
                (2_000_100 + k as u64, format!("Orbit {}", k))
            } else {
                (3_000_100 + (k - 10) as u64, format!("Blend {}", k - 10))
            };
            trojans.push(element_row(spkid, &name, "TJN", 5.15 + 0.1 * t, 0.05 + 0.05 * t, 18.0 + 6.0 * t, 10.0 + t));
        }
        // Blend 10..14 sit in the main belt, Blend 15..19 among the trojans
        let elements = StaticSource::new(SourceKind::Elements)
            .with_churn_payload("sb-class=MBA", Churn::Low, json!({"fields": ELEMENT_COLUMNS, "data": main_belt}))
            .with_churn_payload("sb-class=TJN", Churn::Low, json!({"fields": ELEMENT_COLUMNS, "data": trojans}));

        let mut facts_bodies: Vec<Value> = (0..20)
            .map(|k| json!({"englishName": format!("Rock {}", k), "bodyType": "Asteroid", "meanRadius": 5.0 + k as f64}))
            .collect();
        facts_bodies.extend((10..20).map(|k| {
            json!({"englishName": format!("Blend {}", k), "bodyType": "Asteroid", "meanRadius": 40.0 + k as f64, "density": 2.1})
        }));
        let facts = StaticSource::new(SourceKind::Facts)
            .with_churn_payload("bodies", Churn::Low, json!({"bodies": facts_bodies}));

        let feed = json!({"near_earth_objects": {"2026-10-01": [{
            "id": "2000100",
            "name": "Orbit 0",
            "absolute_magnitude_h": 12.5,
            "estimated_diameter": {"kilometers": {"estimated_diameter_min": 1.0, "estimated_diameter_max": 3.0}},
            "is_potentially_hazardous_asteroid": false,
            "close_approach_data": [{
                "close_approach_date": "2026-10-03",
                "miss_distance": {"astronomical": "0.25"},
                "relative_velocity": {"kilometers_per_second": "12.5"},
                "orbiting_body": "Earth"
            }]
        }]}});
        let approach = StaticSource::new(SourceKind::NearApproach).with_payload("feed:7d", feed);

        (Arc::new(elements), Arc::new(facts), Arc::new(approach))
    }

    fn quick_config() -> CensusConfig {
        let mut config = CensusConfig::default();
        for source in [
            &mut config.sources.facts,
            &mut config.sources.elements,
            &mut config.sources.ephemeris,
            &mut config.sources.near_approach,
        ] {
            source.retry_base_delay_ms = 1;
            source.retry_max_delay_ms = 2;
        }
        config.pipeline.fetch_timeout_secs = 5;
        config
    }

    fn pipeline(
        elements: Arc<StaticSource>,
        facts: Arc<StaticSource>,
        approach: Arc<StaticSource>,
    ) -> (Pipeline, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 10, 1, 6, 0, 0).unwrap()));
        let store = Arc::new(ResultStore::in_memory().unwrap());
        let pipeline = Pipeline::new(quick_config(), store, clock.clone())
            .unwrap()
            .with_source(elements)
            .with_source(facts)
            .with_source(approach);
        (pipeline, clock)
    }

    #[tokio::test]
    async fn test_end_to_end_run_is_reproducible() {
        let (elements, facts, approach) = sources();
        let (pipeline, _) = pipeline(elements.clone(), facts.clone(), approach.clone());

        let first = pipeline.run(false).await.unwrap();
        assert_eq!(first.run.body_count, 50);
        assert_eq!(first.run.clustered_count, 30);
        assert_eq!(first.run.metadata.cluster_status, StageStatus::Completed);
        assert_eq!(first.run.metadata.anomaly_status, StageStatus::Completed);
        assert!(first.run.metadata.degraded_sources.is_empty());
        assert!(first.conflicts.is_empty());

        let snapshot = pipeline.store().load_snapshot(first.run.version).unwrap().unwrap();
        assert_eq!(snapshot.anomalies.len(), 30);
        assert_eq!(snapshot.projections.len(), 30);
        let rock = snapshot.bodies.iter().find(|b| b.name == "Rock 3").unwrap();
        assert!(rock.orbit.a.is_none());
        assert!(snapshot.assignments.iter().all(|a| a.body_id != rock.id));
        assert!(snapshot.anomalies.iter().all(|a| a.body_id != rock.id));

        let blend = snapshot.bodies.iter().find(|b| b.name == "Blend 12").unwrap();
        assert_eq!(blend.id, "3000112");
        assert_eq!(blend.physical.radius_km, Some(52.0));
        assert!(blend.orbit.a.is_some());
        assert_eq!(blend.contributing_sources(), vec![SourceKind::Facts, SourceKind::Elements]);

        let neo = snapshot.bodies.iter().find(|b| b.id == "2000100").unwrap();
        assert_eq!(neo.close_approach.as_ref().unwrap().miss_distance_au, 0.25);

        let calls = (elements.calls(), facts.calls(), approach.calls());
        let second = pipeline.run(false).await.unwrap();
        assert_eq!((elements.calls(), facts.calls(), approach.calls()), calls);
        assert!(second.sources.iter().all(|s| s.network_fetches == 0));
        assert_eq!(second.run.content_hash, first.run.content_hash);
        assert_eq!(
            pipeline.store().snapshot_json(first.run.version).unwrap(),
            pipeline.store().snapshot_json(second.run.version).unwrap()
        );
        assert_eq!(pipeline.store().list_bodies(&BodyFilter::default()).unwrap().total, 50);
    }

    #[tokio::test]
    async fn test_failed_source_serves_stale_cache() {
        let (elements, facts, approach) = sources();
        let (pipeline, clock) = pipeline(elements.clone(), facts, approach);
        let first = pipeline.run(false).await.unwrap();

        clock.advance(chrono::Duration::days(30));
        elements.fail_always(true);
        let second = pipeline.run(false).await.unwrap();

        assert_eq!(second.run.metadata.degraded_sources, vec![SourceKind::Elements]);
        assert_eq!(second.run.body_count, 50);
        let report = second.sources.iter().find(|s| s.source == Some(SourceKind::Elements)).unwrap();
        assert_eq!(report.stale_served, 2);
        assert!(report.failures.is_empty());
        assert_eq!(second.run.clustered_count, first.run.clustered_count);
    }

    #[tokio::test]
    async fn test_unreachable_source_without_cache_contributes_nothing() {
        let (elements, facts, approach) = sources();
        facts.fail_always(false);
        let (pipeline, _) = pipeline(elements, facts.clone(), approach);

        let report = pipeline.run(false).await.unwrap();
        assert_eq!(report.run.metadata.degraded_sources, vec![SourceKind::Facts]);
        // Permanent errors are not retried
        assert_eq!(facts.calls(), 1);
        assert_eq!(report.run.body_count, 30);
        let detail = pipeline.store().body_detail("3000112").unwrap().unwrap();
        assert!(detail.body.physical.radius_km.is_none());
    }

    #[tokio::test]
    async fn test_refresh_forces_refetch() {
        let (elements, facts, approach) = sources();
        let (pipeline, _) = pipeline(elements.clone(), facts, approach);
        pipeline.run(false).await.unwrap();
        assert_eq!(elements.calls(), 2);

        assert_eq!(pipeline.refresh(SourceKind::Elements).unwrap(), 2);
        let report = pipeline.run(false).await.unwrap();
        assert_eq!(elements.calls(), 4);
        let elements_report = report.sources.iter().find(|s| s.source == Some(SourceKind::Elements)).unwrap();
        assert_eq!(elements_report.network_fetches, 2);

        pipeline.run(true).await.unwrap();
        assert_eq!(elements.calls(), 6);
        assert_eq!(pipeline.store().list_runs().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_too_few_bodies_still_commits() {
        let elements = Arc::new(StaticSource::new(SourceKind::Elements).with_payload(
            "sb-class=MBA",
            json!({"fields": ELEMENT_COLUMNS, "data": [element_row(2_000_001, "Ceres", "MBA", 2.77, 0.08, 10.6, 3.3)]}),
        ));
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap()));
        let pipeline = Pipeline::new(quick_config(), Arc::new(ResultStore::in_memory().unwrap()), clock)
            .unwrap()
            .with_source(elements);

        let report = pipeline.run(false).await.unwrap();
        assert_eq!(report.run.body_count, 1);
        assert_eq!(report.run.metadata.cluster_status, StageStatus::InsufficientData);
        assert_eq!(report.run.metadata.anomaly_status, StageStatus::InsufficientData);
        assert_eq!(report.run.metadata.chosen_k, None);
        let snapshot = pipeline.store().load_snapshot(report.run.version).unwrap().unwrap();
        assert!(snapshot.assignments.is_empty());
        assert_eq!(snapshot.projections.len(), 1);
    }

    #[test]
    fn test_invalid_config_is_rejected_before_running() {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 10, 1, 6, 0, 0).unwrap()));
        let mut config = quick_config();
        config.clustering.k_min = 0;
        let result = Pipeline::new(config, Arc::new(ResultStore::in_memory().unwrap()), clock);
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
