//! Staleness classes, TTLs and the injectable clock

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::CacheConfig;
use crate::types::SourceKind;

/// How quickly a source's data goes stale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TtlClass {
    /// Refreshed weekly
    Static,
    /// Refreshed every N days
    SemiStatic,
    /// Never cached
    Live,
    /// Short TTL, length decided by the query's churn
    Hybrid,
}

impl TtlClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            TtlClass::Static => "static",
            TtlClass::SemiStatic => "semi-static",
            TtlClass::Live => "live",
            TtlClass::Hybrid => "hybrid",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "static" => Some(TtlClass::Static),
            "semi-static" => Some(TtlClass::SemiStatic),
            "live" => Some(TtlClass::Live),
            "hybrid" => Some(TtlClass::Hybrid),
            _ => None,
        }
    }

    /// Class a source uses unless configured otherwise
    pub fn default_for(kind: SourceKind) -> Self {
        match kind {
            SourceKind::Facts => TtlClass::Static,
            SourceKind::Elements => TtlClass::SemiStatic,
            SourceKind::Ephemeris => TtlClass::Live,
            SourceKind::NearApproach => TtlClass::Hybrid,
        }
    }
}

/// Update rate of a query within a hybrid source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Churn {
    #[default]
    High,
    Low,
}

impl Churn {
    pub fn as_str(&self) -> &'static str {
        match self {
            Churn::High => "high",
            Churn::Low => "low",
        }
    }

    pub fn parse(s: &str) -> Self {
        if s == "low" { Churn::Low } else { Churn::High }
    }
}

/// Time source for freshness checks
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// TTL lengths per class
#[derive(Debug, Clone)]
pub struct CachePolicy {
    static_ttl: Duration,
    semi_static_ttl: Duration,
    high_churn_ttl: Duration,
    low_churn_ttl: Duration,
}

impl CachePolicy {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            static_ttl: Duration::days(config.static_days as i64),
            semi_static_ttl: Duration::days(config.semi_static_days as i64),
            high_churn_ttl: Duration::hours(config.hybrid_high_churn_hours as i64),
            low_churn_ttl: Duration::hours(config.hybrid_low_churn_hours as i64),
        }
    }

    /// TTL of a class, `None` for data that is never cached
    pub fn ttl(&self, class: TtlClass, churn: Churn) -> Option<Duration> {
        match class {
            TtlClass::Static => Some(self.static_ttl),
            TtlClass::SemiStatic => Some(self.semi_static_ttl),
            TtlClass::Live => None,
            TtlClass::Hybrid => Some(match churn {
                Churn::High => self.high_churn_ttl,
                Churn::Low => self.low_churn_ttl,
            }),
        }
    }

    pub fn expires_at(
        &self,
        class: TtlClass,
        churn: Churn,
        fetched_at: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        self.ttl(class, churn).map(|ttl| fetched_at + ttl)
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ttls() {
        let policy = CachePolicy::default();
        assert_eq!(policy.ttl(TtlClass::Static, Churn::High), Some(Duration::days(7)));
        assert_eq!(policy.ttl(TtlClass::SemiStatic, Churn::High), Some(Duration::days(15)));
        assert_eq!(policy.ttl(TtlClass::Live, Churn::High), None);
        assert_eq!(policy.ttl(TtlClass::Hybrid, Churn::High), Some(Duration::hours(6)));
        assert_eq!(policy.ttl(TtlClass::Hybrid, Churn::Low), Some(Duration::hours(12)));
    }

    #[test]
    fn test_manual_clock_advances() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        clock.advance(Duration::hours(3));
        assert_eq!(clock.now(), start + Duration::hours(3));
    }
}
