//! Source adapters
//!
//! Each upstream catalog is fetched as raw JSON (cached as-is) and normalized into
//! source-tagged [`RawRecord`]s with canonical field names and units.

mod approach;
mod elements;
mod ephemeris;
mod facts;
mod http;
mod memory;
mod retry;

use async_trait::async_trait;
use serde_json::Value;

use crate::cache::Churn;
use crate::error::Result;
use crate::types::{RawRecord, SourceKind};

pub use approach::parse_approach_payload;
pub use elements::parse_elements_payload;
pub use ephemeris::parse_ephemeris_payload;
pub use facts::parse_facts_payload;
pub use http::HttpSource;
pub use memory::StaticSource;
pub use retry::RetryPolicy;

/// One request shape sent to a source; `key` names its cache slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceQuery {
    pub key: String,
    /// Path appended to the source's base URL
    pub path: String,
    pub params: Vec<(String, String)>,
    pub churn: Churn,
}

impl SourceQuery {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            path: String::new(),
            params: Vec::new(),
            churn: Churn::High,
        }
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    pub fn churn(mut self, churn: Churn) -> Self {
        self.churn = churn;
        self
    }
}

/// Upstream catalog the pipeline can pull from
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Which catalog this adapter serves
    fn kind(&self) -> SourceKind;

    /// Human-readable name used in logs
    fn name(&self) -> &str;

    /// Queries making up one full pull of the source
    fn queries(&self) -> Vec<SourceQuery>;

    /// Fetch the raw payload of one query
    async fn fetch(&self, query: &SourceQuery) -> Result<Value>;

    /// Normalize a raw payload of this source
    fn normalize(&self, payload: &Value) -> Result<Vec<RawRecord>> {
        records_from_payload(self.kind(), payload)
    }
}

/// Dispatch a raw payload to its source's normalizer
pub fn records_from_payload(kind: SourceKind, payload: &Value) -> Result<Vec<RawRecord>> {
    let records = match kind {
        SourceKind::Facts => parse_facts_payload(payload)?
            .into_iter()
            .map(RawRecord::Facts)
            .collect(),
        SourceKind::Elements => parse_elements_payload(payload)?
            .into_iter()
            .map(RawRecord::Elements)
            .collect(),
        SourceKind::Ephemeris => parse_ephemeris_payload(payload)?
            .into_iter()
            .map(RawRecord::Ephemeris)
            .collect(),
        SourceKind::NearApproach => parse_approach_payload(payload)?
            .into_iter()
            .map(RawRecord::NearApproach)
            .collect(),
    };
    Ok(records)
}

/// Lenient number read: JSON numbers and numeric strings both count, blanks do not
pub(crate) fn value_f64(value: Option<&Value>) -> Option<f64> {
    let v = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    v.is_finite().then_some(v)
}

/// Like [`value_f64`] but treats 0 as "not reported"
pub(crate) fn value_nonzero(value: Option<&Value>) -> Option<f64> {
    value_f64(value).filter(|v| *v != 0.0)
}

pub(crate) fn value_str(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn value_u64(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
}

pub(crate) fn value_flag(value: Option<&Value>) -> Option<bool> {
    match value? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim() {
            "Y" | "y" | "true" | "1" => Some(true),
            "N" | "n" | "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lenient_readers() {
        assert_eq!(value_f64(Some(&json!("2.77"))), Some(2.77));
        assert_eq!(value_f64(Some(&json!(1))), Some(1.0));
        assert_eq!(value_f64(Some(&json!(""))), None);
        assert_eq!(value_f64(None), None);
        assert_eq!(value_nonzero(Some(&json!(0))), None);
        assert_eq!(value_u64(Some(&json!("2000001"))), Some(2_000_001));
        assert_eq!(value_flag(Some(&json!("Y"))), Some(true));
        assert_eq!(value_str(Some(&json!("  Ceres "))), Some("Ceres".to_string()));
    }

    #[test]
    fn test_dispatch_tags_records_with_source() {
        let payload = json!({"bodies": [{"englishName": "Mars", "bodyType": "Planet"}]});
        let records = records_from_payload(SourceKind::Facts, &payload).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source(), SourceKind::Facts);
    }
}
