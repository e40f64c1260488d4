//! In-process source serving canned payloads
//!
//! Backs offline runs from JSON files and lets tests script failures.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::cache::Churn;
use crate::error::{Error, Result};
use crate::types::SourceKind;

use super::{SourceAdapter, SourceQuery};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureMode {
    Never,
    /// Fail the next n fetches transiently
    Times(usize),
    Always { transient: bool },
}

/// Source answering from a fixed map of query key to payload
pub struct StaticSource {
    kind: SourceKind,
    name: String,
    payloads: BTreeMap<String, (Churn, Value)>,
    calls: AtomicUsize,
    failure: Mutex<FailureMode>,
}

impl StaticSource {
    pub fn new(kind: SourceKind) -> Self {
        Self {
            kind,
            name: format!("{} (static)", kind),
            payloads: BTreeMap::new(),
            calls: AtomicUsize::new(0),
            failure: Mutex::new(FailureMode::Never),
        }
    }

    /// Serve `payload` for query `key`
    pub fn with_payload(self, key: impl Into<String>, payload: Value) -> Self {
        self.with_churn_payload(key, Churn::High, payload)
    }

    pub fn with_churn_payload(mut self, key: impl Into<String>, churn: Churn, payload: Value) -> Self {
        self.payloads.insert(key.into(), (churn, payload));
        self
    }

    /// Load `{"<query key>": <payload>, ...}` from a JSON file
    pub fn from_json_file(kind: SourceKind, path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let document: Value = serde_json::from_str(&text)?;
        let Value::Object(map) = document else {
            return Err(Error::config(format!(
                "{}: expected an object of query key to payload",
                path.as_ref().display()
            )));
        };
        let source = map
            .into_iter()
            .fold(Self::new(kind), |source, (key, payload)| source.with_payload(key, payload));
        tracing::info!(
            "Loaded {} offline payloads for {} from {}",
            source.payloads.len(),
            kind,
            path.as_ref().display()
        );
        Ok(source)
    }

    /// One source per `<kind>.json` found in `dir`
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Vec<Self>> {
        let mut sources = Vec::new();
        for kind in SourceKind::ALL {
            let path = dir.as_ref().join(format!("{}.json", kind.as_str()));
            if path.exists() {
                sources.push(Self::from_json_file(kind, &path)?);
            }
        }
        Ok(sources)
    }

    /// Make every fetch fail until reset
    pub fn fail_always(&self, transient: bool) {
        *self.failure.lock() = FailureMode::Always { transient };
    }

    /// Make the next `n` fetches fail transiently
    pub fn fail_times(&self, n: usize) {
        *self.failure.lock() = FailureMode::Times(n);
    }

    pub fn recover(&self) {
        *self.failure.lock() = FailureMode::Never;
    }

    /// Fetches attempted so far, failed ones included
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceAdapter for StaticSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn queries(&self) -> Vec<SourceQuery> {
        self.payloads
            .iter()
            .map(|(key, (churn, _))| SourceQuery::new(key.as_str()).churn(*churn))
            .collect()
    }

    async fn fetch(&self, query: &SourceQuery) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        {
            let mut failure = self.failure.lock();
            match *failure {
                FailureMode::Never => {}
                FailureMode::Times(n) => {
                    *failure = if n > 1 { FailureMode::Times(n - 1) } else { FailureMode::Never };
                    return Err(Error::source_unavailable(self.name.as_str(), "scripted failure", true));
                }
                FailureMode::Always { transient } => {
                    return Err(Error::source_unavailable(self.name.as_str(), "source offline", transient));
                }
            }
        }
        self.payloads
            .get(&query.key)
            .map(|(_, payload)| payload.clone())
            .ok_or_else(|| Error::source_unavailable(self.name.as_str(), format!("no payload for {}", query.key), false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[tokio::test]
    async fn test_scripted_failures_then_recovery() {
        let source = StaticSource::new(SourceKind::Facts).with_payload("bodies", json!({"bodies": []}));
        source.fail_times(2);
        let query = SourceQuery::new("bodies");
        assert!(source.fetch(&query).await.unwrap_err().is_transient());
        assert!(source.fetch(&query).await.is_err());
        assert!(source.fetch(&query).await.is_ok());
        assert_eq!(source.calls(), 3);

        source.fail_always(false);
        assert!(!source.fetch(&query).await.unwrap_err().is_transient());
    }

    #[test]
    fn test_loads_payloads_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("facts.json")).unwrap();
        write!(file, r#"{{"bodies": {{"bodies": [{{"englishName": "Mars"}}]}}}}"#).unwrap();

        let sources = StaticSource::from_dir(dir.path()).unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].kind(), SourceKind::Facts);
        assert_eq!(sources[0].queries()[0].key, "bodies");
    }
}
