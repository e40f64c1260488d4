//! Fusion of per-source records into canonical bodies

mod engine;
mod identity;

pub use engine::{fuse, round_significant, FusionEngine, FusionOutput, IdentityConflict, DEFAULT_PRIORITY};
pub use identity::{canonical_id, normalize_name};
