//! Per-source raw records and their mapping into the canonical field set

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::body::{
    BodyCategory, CloseApproach, EphemerisState, IdentityFamily, OrbitalElements,
    PhysicalAttributes,
};

/// Kilometres per astronomical unit
pub const KM_PER_AU: f64 = 149_597_870.7;

/// Upstream data source
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Stable physical-facts catalog
    Facts,
    /// Semi-static orbital-elements catalog
    Elements,
    /// Live ephemeris service
    Ephemeris,
    /// Near-approach feed
    NearApproach,
}

impl SourceKind {
    pub const ALL: [SourceKind; 4] = [
        SourceKind::Facts,
        SourceKind::Elements,
        SourceKind::Ephemeris,
        SourceKind::NearApproach,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Facts => "facts",
            SourceKind::Elements => "elements",
            SourceKind::Ephemeris => "ephemeris",
            SourceKind::NearApproach => "near_approach",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "facts" => Some(SourceKind::Facts),
            "elements" => Some(SourceKind::Elements),
            "ephemeris" | "live" => Some(SourceKind::Ephemeris),
            "near_approach" | "hybrid" => Some(SourceKind::NearApproach),
            _ => None,
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row from the physical-facts catalog, already in canonical units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactsRecord {
    pub name: String,
    pub category: BodyCategory,
    pub orbits: Option<String>,
    pub physical: PhysicalAttributes,
    pub orbit: OrbitalElements,
}

/// Row from the orbital-elements catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementsRecord {
    pub spkid: Option<u64>,
    pub name: String,
    pub class_code: Option<String>,
    pub is_neo: Option<bool>,
    pub is_pha: Option<bool>,
    pub is_comet: bool,
    pub orbit: OrbitalElements,
    pub diameter_km: Option<f64>,
}

/// State vector from the live ephemeris service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EphemerisRecord {
    pub spkid: Option<u64>,
    pub name: String,
    pub state: EphemerisState,
    /// Osculating elements when the service reported them
    pub orbit: OrbitalElements,
}

/// Object from the near-approach feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApproachRecord {
    pub neo_id: Option<u64>,
    pub name: String,
    pub absolute_magnitude: Option<f64>,
    pub diameter_min_km: Option<f64>,
    pub diameter_max_km: Option<f64>,
    pub is_pha: bool,
    pub approach: Option<CloseApproach>,
}

/// Source-tagged raw record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum RawRecord {
    Facts(FactsRecord),
    Elements(ElementsRecord),
    Ephemeris(EphemerisRecord),
    NearApproach(ApproachRecord),
}

/// Canonical attributes one source supplied for one body
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BodyFields {
    pub category: Option<BodyCategory>,
    pub dynamical_class: Option<String>,
    pub orbits: Option<String>,
    pub is_neo: Option<bool>,
    pub is_pha: Option<bool>,
    pub physical: PhysicalAttributes,
    pub orbit: OrbitalElements,
    pub ephemeris: Option<EphemerisState>,
    pub close_approach: Option<CloseApproach>,
}

/// A raw record mapped into the canonical schema, ready for identity resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub source: SourceKind,
    pub fetched_at: DateTime<Utc>,
    pub catalog_id: Option<u64>,
    pub name: String,
    pub family: IdentityFamily,
    pub fields: BodyFields,
}

impl RawRecord {
    pub fn source(&self) -> SourceKind {
        match self {
            RawRecord::Facts(_) => SourceKind::Facts,
            RawRecord::Elements(_) => SourceKind::Elements,
            RawRecord::Ephemeris(_) => SourceKind::Ephemeris,
            RawRecord::NearApproach(_) => SourceKind::NearApproach,
        }
    }

    /// Map into the canonical schema
    pub fn into_source_record(self, fetched_at: DateTime<Utc>) -> SourceRecord {
        let source = self.source();
        match self {
            RawRecord::Facts(r) => SourceRecord {
                source,
                fetched_at,
                catalog_id: None,
                family: r.category.family(),
                name: r.name,
                fields: BodyFields {
                    category: Some(r.category),
                    orbits: r.orbits,
                    physical: r.physical,
                    orbit: r.orbit,
                    ..Default::default()
                },
            },
            RawRecord::Elements(r) => {
                let category = elements_category(r.class_code.as_deref(), r.is_neo, r.is_pha, r.is_comet);
                let physical = PhysicalAttributes {
                    radius_km: r.diameter_km.map(|d| d / 2.0),
                    ..Default::default()
                };
                SourceRecord {
                    source,
                    fetched_at,
                    catalog_id: r.spkid,
                    family: IdentityFamily::SmallBody,
                    name: r.name,
                    fields: BodyFields {
                        category: Some(category),
                        dynamical_class: r.class_code,
                        is_neo: r.is_neo,
                        is_pha: r.is_pha,
                        physical,
                        orbit: r.orbit,
                        ..Default::default()
                    },
                }
            }
            RawRecord::Ephemeris(r) => {
                let category = r.spkid.map(category_for_spkid);
                SourceRecord {
                    source,
                    fetched_at,
                    catalog_id: r.spkid,
                    family: category.map(|c| c.family()).unwrap_or(IdentityFamily::SmallBody),
                    name: r.name,
                    fields: BodyFields {
                        category,
                        orbit: r.orbit,
                        ephemeris: Some(r.state),
                        ..Default::default()
                    },
                }
            }
            RawRecord::NearApproach(r) => {
                // Feed reports a diameter range; radius is half its midpoint
                let radius_km = match (r.diameter_min_km, r.diameter_max_km) {
                    (Some(lo), Some(hi)) => Some((lo + hi) / 4.0),
                    (Some(d), None) | (None, Some(d)) => Some(d / 2.0),
                    (None, None) => None,
                };
                let physical = PhysicalAttributes { radius_km, ..Default::default() };
                let orbit = OrbitalElements { h: r.absolute_magnitude, ..Default::default() };
                SourceRecord {
                    source,
                    fetched_at,
                    catalog_id: r.neo_id,
                    family: IdentityFamily::SmallBody,
                    name: r.name,
                    fields: BodyFields {
                        category: Some(if r.is_pha { BodyCategory::Pha } else { BodyCategory::Neo }),
                        is_neo: Some(true),
                        is_pha: Some(r.is_pha),
                        physical,
                        orbit,
                        close_approach: r.approach,
                        ..Default::default()
                    },
                }
            }
        }
    }
}

/// Category from an elements-catalog class code and hazard flags
pub fn elements_category(
    class_code: Option<&str>,
    is_neo: Option<bool>,
    is_pha: Option<bool>,
    is_comet: bool,
) -> BodyCategory {
    if is_comet {
        return BodyCategory::Comet;
    }
    if is_pha == Some(true) {
        return BodyCategory::Pha;
    }
    let by_class = match class_code.map(|c| c.to_ascii_uppercase()) {
        Some(code) => match code.as_str() {
            "MBA" | "IMB" | "OMB" | "AST" | "MCA" => Some(BodyCategory::Asteroid),
            "TJN" => Some(BodyCategory::Trojan),
            "CEN" => Some(BodyCategory::Centaur),
            "TNO" => Some(BodyCategory::TransNeptunian),
            "APO" | "ATE" | "AMO" | "IEO" => Some(BodyCategory::Neo),
            "JFC" | "HTC" | "ETC" | "CTC" | "PAR" | "HYP" | "COM" => Some(BodyCategory::Comet),
            _ => None,
        },
        None => None,
    };
    match by_class {
        Some(category) => category,
        None if is_neo == Some(true) => BodyCategory::Neo,
        None => BodyCategory::Other,
    }
}

/// Category implied by an SPK-ID (sun 10, planets X99, moons X01..X98)
pub fn category_for_spkid(spkid: u64) -> BodyCategory {
    match spkid {
        10 => BodyCategory::Star,
        100..=999 if spkid % 100 == 99 => BodyCategory::Planet,
        100..=999 => BodyCategory::Moon,
        1_000_000..=1_999_999 => BodyCategory::Comet,
        _ => BodyCategory::Asteroid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elements_category_mapping() {
        assert_eq!(elements_category(Some("MBA"), Some(false), Some(false), false), BodyCategory::Asteroid);
        assert_eq!(elements_category(Some("APO"), Some(true), Some(true), false), BodyCategory::Pha);
        assert_eq!(elements_category(Some("JFc"), None, None, true), BodyCategory::Comet);
        assert_eq!(elements_category(None, Some(true), None, false), BodyCategory::Neo);
        assert_eq!(elements_category(Some("XYZ"), None, None, false), BodyCategory::Other);
    }

    #[test]
    fn test_spkid_categories() {
        assert_eq!(category_for_spkid(599), BodyCategory::Planet);
        assert_eq!(category_for_spkid(501), BodyCategory::Moon);
        assert_eq!(category_for_spkid(2_000_433), BodyCategory::Asteroid);
        assert_eq!(category_for_spkid(1_000_036), BodyCategory::Comet);
    }

    #[test]
    fn test_approach_diameter_range_becomes_radius() {
        let raw = RawRecord::NearApproach(ApproachRecord {
            neo_id: Some(2_000_433),
            name: "433 Eros (A898 PA)".to_string(),
            absolute_magnitude: Some(10.3),
            diameter_min_km: Some(20.0),
            diameter_max_km: Some(40.0),
            is_pha: false,
            approach: None,
        });
        let rec = raw.into_source_record(Utc::now());
        assert_eq!(rec.fields.physical.radius_km, Some(15.0));
        assert_eq!(rec.fields.category, Some(BodyCategory::Neo));
        assert_eq!(rec.catalog_id, Some(2_000_433));
    }
}
