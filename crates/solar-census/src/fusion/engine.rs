//! Merges per-source records into one canonical body per object

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::config::FusionConfig;
use crate::error::Error;
use crate::types::{
    BodyCategory, BodyField, BodyFields, CanonicalBody, CloseApproach, EphemerisState,
    FieldProvenance, IdentityFamily, OrbitalElements, PhysicalAttributes, SourceKind,
    SourceRecord,
};

use super::identity::{canonical_id, normalize_name};

/// Source order used unless a field has its own rule
pub const DEFAULT_PRIORITY: [SourceKind; 4] = [
    SourceKind::Elements,
    SourceKind::Facts,
    SourceKind::Ephemeris,
    SourceKind::NearApproach,
];

/// Order for physical attributes
const FACTS_FIRST: [SourceKind; 4] = [
    SourceKind::Facts,
    SourceKind::Elements,
    SourceKind::Ephemeris,
    SourceKind::NearApproach,
];

/// Two sources claimed one catalog id for bodies of different families
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityConflict {
    pub catalog_id: u64,
    pub kept: String,
    pub kept_source: SourceKind,
    pub rekeyed: String,
    pub rekeyed_source: SourceKind,
}

/// Fused bodies, sorted by id, plus the conflicts met on the way
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FusionOutput {
    pub bodies: Vec<CanonicalBody>,
    pub conflicts: Vec<IdentityConflict>,
}

struct Group {
    catalog_id: Option<u64>,
    family: IdentityFamily,
    name_key: String,
    /// In priority order
    members: Vec<SourceRecord>,
}

/// Priority-based record merger
pub struct FusionEngine {
    magnitude_priority: Vec<SourceKind>,
    descriptive_priority: Vec<SourceKind>,
    significant_digits: u32,
}

impl FusionEngine {
    pub fn new(config: &FusionConfig) -> Self {
        Self {
            magnitude_priority: config.absolute_magnitude_priority.clone(),
            descriptive_priority: config.descriptive_priority.clone(),
            significant_digits: config.significant_digits.clamp(1, 17),
        }
    }

    /// Fuse records from every source; the result depends only on the record set
    pub fn fuse(&self, mut records: Vec<SourceRecord>) -> FusionOutput {
        let input = records.len();
        records.sort_by(|a, b| {
            rank(a.source)
                .cmp(&rank(b.source))
                .then_with(|| a.catalog_id.cmp(&b.catalog_id))
                .then_with(|| a.family.cmp(&b.family))
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.fetched_at.cmp(&b.fetched_at))
                .then_with(|| tie_break(&a.fields).cmp(&tie_break(&b.fields)))
        });

        let (groups, conflicts) = group_records(records);
        let mut bodies: Vec<CanonicalBody> = groups.iter().map(|g| self.build(g)).collect();
        bodies.sort_by(|a, b| a.id.cmp(&b.id));

        tracing::info!(
            "Fused {} source records into {} bodies ({} identity conflicts)",
            input,
            bodies.len(),
            conflicts.len()
        );
        FusionOutput { bodies, conflicts }
    }

    /// Source order a field is resolved in; orbit-only fields use the default order,
    /// which already starts with elements
    fn order_for(&self, field: BodyField) -> &[SourceKind] {
        match field {
            BodyField::AbsoluteMagnitude => &self.magnitude_priority,
            BodyField::Name | BodyField::Category | BodyField::Orbits => &self.descriptive_priority,
            f if f.is_physical_only() => &FACTS_FIRST,
            _ => &DEFAULT_PRIORITY,
        }
    }

    /// First value in the field's source order, recording where it came from
    fn pick<T>(
        &self,
        members: &[SourceRecord],
        field: BodyField,
        provenance: &mut BTreeMap<BodyField, FieldProvenance>,
        get: impl Fn(&SourceRecord) -> Option<T>,
    ) -> Option<T> {
        let (value, from) = self.order_for(field).iter().find_map(|kind| {
            members
                .iter()
                .filter(|m| m.source == *kind)
                .find_map(|m| get(m).map(|v| (v, m)))
        })?;
        provenance.insert(
            field,
            FieldProvenance {
                source: from.source,
                fetched_at: from.fetched_at,
            },
        );
        Some(value)
    }

    fn number(
        &self,
        members: &[SourceRecord],
        field: BodyField,
        provenance: &mut BTreeMap<BodyField, FieldProvenance>,
        get: impl Fn(&BodyFields) -> Option<f64>,
    ) -> Option<f64> {
        self.pick(members, field, provenance, |m| get(&m.fields))
            .map(|v| round_significant(v, self.significant_digits))
    }

    fn build(&self, group: &Group) -> CanonicalBody {
        let m = group.members.as_slice();
        let mut prov = BTreeMap::new();
        let round = |v: f64| round_significant(v, self.significant_digits);

        let name = self
            .pick(m, BodyField::Name, &mut prov, |r| Some(r.name.trim().to_string()))
            .unwrap_or_else(|| group.name_key.clone());
        let category = self
            .pick(m, BodyField::Category, &mut prov, |r| r.fields.category)
            .unwrap_or(BodyCategory::Other);
        let dynamical_class = self.pick(m, BodyField::DynamicalClass, &mut prov, |r| r.fields.dynamical_class.clone());
        let orbits = self.pick(m, BodyField::Orbits, &mut prov, |r| r.fields.orbits.clone());
        let is_neo = self.pick(m, BodyField::IsNeo, &mut prov, |r| r.fields.is_neo);
        let is_pha = self.pick(m, BodyField::IsPha, &mut prov, |r| r.fields.is_pha);

        let physical = PhysicalAttributes {
            radius_km: self.number(m, BodyField::RadiusKm, &mut prov, |f| f.physical.radius_km),
            mass_kg: self.number(m, BodyField::MassKg, &mut prov, |f| f.physical.mass_kg),
            density_g_cm3: self.number(m, BodyField::DensityGCm3, &mut prov, |f| f.physical.density_g_cm3),
            gravity_m_s2: self.number(m, BodyField::GravityMS2, &mut prov, |f| f.physical.gravity_m_s2),
            mean_temperature_k: self.number(m, BodyField::MeanTemperatureK, &mut prov, |f| {
                f.physical.mean_temperature_k
            }),
        };

        let orbit = OrbitalElements {
            a: self.number(m, BodyField::SemiMajorAxisAu, &mut prov, |f| f.orbit.a),
            e: self.number(m, BodyField::Eccentricity, &mut prov, |f| f.orbit.e),
            i: self.number(m, BodyField::InclinationDeg, &mut prov, |f| f.orbit.i),
            period_days: self.number(m, BodyField::PeriodDays, &mut prov, |f| f.orbit.period_days),
            q: self.number(m, BodyField::PerihelionAu, &mut prov, |f| f.orbit.q),
            ad: self.number(m, BodyField::AphelionAu, &mut prov, |f| f.orbit.ad),
            h: self.number(m, BodyField::AbsoluteMagnitude, &mut prov, |f| f.orbit.h),
        };

        let ephemeris = self
            .pick(m, BodyField::Ephemeris, &mut prov, |r| r.fields.ephemeris.clone())
            .map(|state| EphemerisState {
                epoch: state.epoch,
                position_au: state.position_au.map(round),
                velocity_au_day: state.velocity_au_day.map(round),
            });
        let close_approach = self
            .pick(m, BodyField::CloseApproach, &mut prov, |r| r.fields.close_approach.clone())
            .map(|ca| CloseApproach {
                miss_distance_au: round(ca.miss_distance_au),
                relative_velocity_km_s: round(ca.relative_velocity_km_s),
                ..ca
            });

        CanonicalBody {
            id: canonical_id(group.catalog_id, group.family, &group.name_key),
            name,
            category,
            dynamical_class,
            orbits,
            is_neo,
            is_pha,
            physical,
            orbit,
            ephemeris,
            close_approach,
            provenance: prov,
        }
    }
}

/// Fuse with the given rules
pub fn fuse(records: Vec<SourceRecord>, config: &FusionConfig) -> FusionOutput {
    FusionEngine::new(config).fuse(records)
}

fn rank(kind: SourceKind) -> usize {
    DEFAULT_PRIORITY
        .iter()
        .position(|k| *k == kind)
        .unwrap_or(DEFAULT_PRIORITY.len())
}

fn tie_break(fields: &BodyFields) -> String {
    serde_json::to_string(fields).unwrap_or_default()
}

/// Assign priority-sorted records to identity groups
fn group_records(records: Vec<SourceRecord>) -> (Vec<Group>, Vec<IdentityConflict>) {
    let mut groups: Vec<Group> = Vec::new();
    let mut by_id: HashMap<u64, usize> = HashMap::new();
    let mut by_name: HashMap<(IdentityFamily, String), usize> = HashMap::new();
    let mut conflicts = Vec::new();

    for mut record in records {
        let name_key = normalize_name(&record.name);

        if let Some(id) = record.catalog_id {
            if let Some(&g) = by_id.get(&id) {
                if groups[g].family == record.family {
                    by_name.entry((record.family, name_key)).or_insert(g);
                    groups[g].members.push(record);
                    continue;
                }
                let kept = &groups[g].members[0];
                let conflict = IdentityConflict {
                    catalog_id: id,
                    kept: kept.name.clone(),
                    kept_source: kept.source,
                    rekeyed: record.name.clone(),
                    rekeyed_source: record.source,
                };
                tracing::warn!(
                    "{}; re-keying the {} record by name",
                    Error::IdentityConflict {
                        catalog_id: id,
                        kept: conflict.kept.clone(),
                        rekeyed: conflict.rekeyed.clone(),
                    },
                    record.source
                );
                conflicts.push(conflict);
                record.catalog_id = None;
            }
        }

        let name_slot = (record.family, name_key.clone());
        let joinable = by_name.get(&name_slot).copied().filter(|&g| {
            match (groups[g].catalog_id, record.catalog_id) {
                (Some(existing), Some(incoming)) => existing == incoming,
                _ => true,
            }
        });

        match joinable {
            Some(g) => {
                if groups[g].catalog_id.is_none() {
                    if let Some(id) = record.catalog_id {
                        groups[g].catalog_id = Some(id);
                        by_id.entry(id).or_insert(g);
                    }
                }
                groups[g].members.push(record);
            }
            None => {
                let g = groups.len();
                if let Some(id) = record.catalog_id {
                    by_id.entry(id).or_insert(g);
                }
                by_name.entry(name_slot).or_insert(g);
                groups.push(Group {
                    catalog_id: record.catalog_id,
                    family: record.family,
                    name_key,
                    members: vec![record],
                });
            }
        }
    }

    (groups, conflicts)
}

/// Round to `digits` significant digits through the decimal representation
pub fn round_significant(value: f64, digits: u32) -> f64 {
    if value == 0.0 || !value.is_finite() {
        return value;
    }
    let precision = digits.saturating_sub(1) as usize;
    format!("{:.*e}", precision, value).parse().unwrap_or(value)
}
