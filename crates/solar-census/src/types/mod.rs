//! Core types for the census pipeline

pub mod analysis;
pub mod body;
pub mod record;

pub use analysis::{
    AnomalyRecord, AnomalySubtype, ClusterAssignment, ClusterProfile, Population, Projection,
    Snapshot, StageStatus, OUTLIER_LABEL,
};
pub use body::{
    BodyCategory, BodyField, CanonicalBody, CloseApproach, EphemerisState, FieldProvenance,
    IdentityFamily, OrbitalElements, PhysicalAttributes,
};
pub use record::{
    ApproachRecord, BodyFields, ElementsRecord, EphemerisRecord, FactsRecord, RawRecord,
    SourceKind, SourceRecord, KM_PER_AU,
};
