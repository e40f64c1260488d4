//! HTTP transport shared by every upstream catalog

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use crate::cache::Churn;
use crate::config::SourceConfig;
use crate::error::{Error, Result};
use crate::types::SourceKind;

use super::elements::ELEMENT_FIELDS;
use super::{SourceAdapter, SourceQuery};

const USER_AGENT: &str = concat!("solar-census/", env!("CARGO_PKG_VERSION"));

/// Groups the elements catalog selects with `sb-group` rather than `sb-class`
const ELEMENT_GROUPS: &[&str] = &["neo", "pha"];

/// Comet orbit classes, queried with `sb-kind=c`
const COMET_CLASSES: &[&str] = &["JFc", "HTC", "ETc", "CTc", "PAR", "HYP", "COM"];

/// Catalog reached over HTTP(S), answering JSON
pub struct HttpSource {
    kind: SourceKind,
    name: String,
    client: Client,
    base_url: String,
    api_key: Option<String>,
    queries: Vec<SourceQuery>,
}

impl HttpSource {
    fn new(kind: SourceKind, config: &SourceConfig, queries: Vec<SourceQuery>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(4)
            .build()?;

        Ok(Self {
            kind,
            name: kind.as_str().to_string(),
            client,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            queries,
        })
    }

    /// Physical-facts catalog: a single listing of every body
    pub fn facts(config: &SourceConfig) -> Result<Self> {
        let queries = vec![SourceQuery::new("bodies").churn(Churn::Low)];
        Self::new(SourceKind::Facts, config, queries)
    }

    /// Orbital-elements catalog: one query per configured group or class
    pub fn elements(config: &SourceConfig) -> Result<Self> {
        let fields = ELEMENT_FIELDS.join(",");
        let queries = config
            .targets
            .iter()
            .map(|target| {
                let query = if ELEMENT_GROUPS.contains(&target.as_str()) {
                    SourceQuery::new(format!("sb-group={}", target)).param("sb-group", target.as_str())
                } else if COMET_CLASSES.contains(&target.as_str()) {
                    SourceQuery::new(format!("sb-class={}", target))
                        .param("sb-kind", "c")
                        .param("sb-class", target.as_str())
                } else {
                    SourceQuery::new(format!("sb-class={}", target)).param("sb-class", target.as_str())
                };
                query
                    .param("fields", fields.as_str())
                    .param("limit", config.row_limit.to_string())
                    .churn(Churn::Low)
            })
            .collect();
        Self::new(SourceKind::Elements, config, queries)
    }

    /// Live ephemeris: one state-vector request per target for `today`
    pub fn ephemeris(config: &SourceConfig, today: NaiveDate) -> Result<Self> {
        let start = today.format("%Y-%m-%d").to_string();
        let stop = (today + ChronoDuration::days(1)).format("%Y-%m-%d").to_string();
        let queries = config
            .targets
            .iter()
            .map(|target| {
                SourceQuery::new(target.as_str())
                    .param("format", "json")
                    .param("COMMAND", format!("'{}'", target))
                    .param("OBJ_DATA", "'NO'")
                    .param("MAKE_EPHEM", "'YES'")
                    .param("EPHEM_TYPE", "'VECTORS'")
                    .param("CENTER", "'500@10'")
                    .param("START_TIME", format!("'{}'", start))
                    .param("STOP_TIME", format!("'{}'", stop))
                    .param("STEP_SIZE", "'1 d'")
                    .param("OUT_UNITS", "'AU-D'")
                    .param("VEC_TABLE", "'2'")
            })
            .collect();
        Self::new(SourceKind::Ephemeris, config, queries)
    }

    /// Near-approach feed: the dated window (high churn) and the browse listing (low churn)
    pub fn near_approach(config: &SourceConfig, today: NaiveDate) -> Result<Self> {
        // The feed rejects windows longer than a week
        let days = config.window_days.clamp(1, 7);
        let end = today + ChronoDuration::days(i64::from(days));
        let queries = vec![
            SourceQuery::new(format!("feed:{}d", days))
                .path("feed")
                .param("start_date", today.format("%Y-%m-%d").to_string())
                .param("end_date", end.format("%Y-%m-%d").to_string())
                .churn(Churn::High),
            SourceQuery::new("browse")
                .path("neo/browse")
                .param("page", "0")
                .param("size", "20")
                .churn(Churn::Low),
        ];
        Self::new(SourceKind::NearApproach, config, queries)
    }

    /// Adapter for `kind` built from its settings
    pub fn from_config(kind: SourceKind, config: &SourceConfig, today: NaiveDate) -> Result<Self> {
        match kind {
            SourceKind::Facts => Self::facts(config),
            SourceKind::Elements => Self::elements(config),
            SourceKind::Ephemeris => Self::ephemeris(config, today),
            SourceKind::NearApproach => Self::near_approach(config, today),
        }
    }

    fn url(&self, query: &SourceQuery) -> String {
        if query.path.is_empty() {
            self.base_url.clone()
        } else {
            format!("{}/{}", self.base_url.trim_end_matches('/'), query.path)
        }
    }
}

#[async_trait]
impl SourceAdapter for HttpSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn queries(&self) -> Vec<SourceQuery> {
        self.queries.clone()
    }

    async fn fetch(&self, query: &SourceQuery) -> Result<Value> {
        let url = self.url(query);
        let mut request = self.client.get(&url).query(&query.params);
        if let Some(key) = &self.api_key {
            request = request.query(&[("api_key", key.as_str())]);
        }

        tracing::debug!("GET {} ({})", url, query.key);
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let transient = status.is_server_error() || status.as_u16() == 429;
            return Err(Error::source_unavailable(
                self.name.as_str(),
                format!("HTTP {} for {}", status, query.key),
                transient,
            ));
        }

        let mut payload: Value = response.json().await?;
        // The text report does not always echo the numeric target
        if self.kind == SourceKind::Ephemeris {
            if let Value::Object(map) = &mut payload {
                map.insert("target".to_string(), Value::String(query.key.clone()));
            }
        }
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourcesConfig;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
    }

    #[test]
    fn test_elements_queries_per_target() {
        let sources = SourcesConfig::default();
        let source = HttpSource::elements(&sources.elements).unwrap();
        let queries = source.queries();
        assert_eq!(queries.len(), sources.elements.targets.len());

        let neo = &queries[0];
        assert_eq!(neo.key, "sb-group=neo");
        assert!(neo.params.contains(&("sb-group".to_string(), "neo".to_string())));

        let jfc = queries.iter().find(|q| q.key == "sb-class=JFc").unwrap();
        assert!(jfc.params.contains(&("sb-kind".to_string(), "c".to_string())));
    }

    #[test]
    fn test_feed_window_is_capped_at_a_week() {
        let mut config = SourcesConfig::default().near_approach;
        config.window_days = 30;
        let source = HttpSource::near_approach(&config, today()).unwrap();
        let feed = &source.queries()[0];
        assert_eq!(feed.churn, Churn::High);
        assert!(feed.params.contains(&("end_date".to_string(), "2025-03-08".to_string())));
        assert_eq!(source.queries()[1].churn, Churn::Low);
    }

    #[test]
    fn test_ephemeris_query_keys_are_targets() {
        let config = SourcesConfig::default().ephemeris;
        let source = HttpSource::ephemeris(&config, today()).unwrap();
        let keys: Vec<String> = source.queries().into_iter().map(|q| q.key).collect();
        assert_eq!(keys, config.targets);
        assert_eq!(source.url(&source.queries()[0]), config.base_url);
    }
}
