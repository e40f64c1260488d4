//! Cache policy engine
//!
//! Decides per (source, query) whether a cached payload is fresh enough to reuse,
//! coalesces concurrent fetches of one key and falls back to stale data on failure.

mod policy;
mod store;

pub use policy::{CachePolicy, Churn, Clock, ManualClock, SystemClock, TtlClass};
pub use store::{
    CacheBackend, CacheEntry, CacheKey, CacheStatus, CacheStore, FetchOrigin, Fetched,
    MemoryCacheBackend, Resolution, StoredEntry,
};
pub(crate) use store::payload_checksum;
