//! Canonical body model produced by fusion

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::record::SourceKind;

/// Population category of a body
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BodyCategory {
    Star,
    Planet,
    DwarfPlanet,
    Moon,
    Asteroid,
    Trojan,
    Neo,
    Pha,
    Comet,
    Centaur,
    TransNeptunian,
    #[default]
    Other,
}

impl BodyCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            BodyCategory::Star => "star",
            BodyCategory::Planet => "planet",
            BodyCategory::DwarfPlanet => "dwarf-planet",
            BodyCategory::Moon => "moon",
            BodyCategory::Asteroid => "asteroid",
            BodyCategory::Trojan => "trojan",
            BodyCategory::Neo => "neo",
            BodyCategory::Pha => "pha",
            BodyCategory::Comet => "comet",
            BodyCategory::Centaur => "centaur",
            BodyCategory::TransNeptunian => "trans-neptunian",
            BodyCategory::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let category = match s {
            "star" => BodyCategory::Star,
            "planet" => BodyCategory::Planet,
            "dwarf-planet" => BodyCategory::DwarfPlanet,
            "moon" => BodyCategory::Moon,
            "asteroid" => BodyCategory::Asteroid,
            "trojan" => BodyCategory::Trojan,
            "neo" => BodyCategory::Neo,
            "pha" => BodyCategory::Pha,
            "comet" => BodyCategory::Comet,
            "centaur" => BodyCategory::Centaur,
            "trans-neptunian" => BodyCategory::TransNeptunian,
            "other" => BodyCategory::Other,
            _ => return None,
        };
        Some(category)
    }

    /// Identity family used to tell same-named bodies apart
    pub fn family(&self) -> IdentityFamily {
        match self {
            BodyCategory::Star | BodyCategory::Planet => IdentityFamily::Planetary,
            BodyCategory::Moon => IdentityFamily::Satellite,
            _ => IdentityFamily::SmallBody,
        }
    }
}

/// Coarse identity namespace: a moon "Io" and asteroid "85 Io" never merge
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdentityFamily {
    Planetary,
    Satellite,
    SmallBody,
}

impl IdentityFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityFamily::Planetary => "planet",
            IdentityFamily::Satellite => "moon",
            IdentityFamily::SmallBody => "small",
        }
    }
}

/// Every fusable attribute, used as the provenance key
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyField {
    Name,
    Category,
    DynamicalClass,
    Orbits,
    IsNeo,
    IsPha,
    RadiusKm,
    MassKg,
    DensityGCm3,
    GravityMS2,
    MeanTemperatureK,
    SemiMajorAxisAu,
    Eccentricity,
    InclinationDeg,
    PeriodDays,
    PerihelionAu,
    AphelionAu,
    AbsoluteMagnitude,
    Ephemeris,
    CloseApproach,
}

impl BodyField {
    /// Fields only an orbital-elements catalog is authoritative for
    pub fn is_orbit_only(&self) -> bool {
        matches!(
            self,
            BodyField::SemiMajorAxisAu
                | BodyField::Eccentricity
                | BodyField::InclinationDeg
                | BodyField::PeriodDays
                | BodyField::PerihelionAu
                | BodyField::AphelionAu
        )
    }

    /// Fields only a physical-facts catalog is authoritative for
    pub fn is_physical_only(&self) -> bool {
        matches!(
            self,
            BodyField::RadiusKm
                | BodyField::MassKg
                | BodyField::DensityGCm3
                | BodyField::GravityMS2
                | BodyField::MeanTemperatureK
        )
    }
}

/// Physical attributes, each absent when no source supplied it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhysicalAttributes {
    pub radius_km: Option<f64>,
    pub mass_kg: Option<f64>,
    pub density_g_cm3: Option<f64>,
    pub gravity_m_s2: Option<f64>,
    pub mean_temperature_k: Option<f64>,
}

/// Heliocentric orbital elements
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrbitalElements {
    /// Semi-major axis (AU)
    pub a: Option<f64>,
    /// Eccentricity
    pub e: Option<f64>,
    /// Inclination (degrees)
    pub i: Option<f64>,
    /// Orbital period (days)
    pub period_days: Option<f64>,
    /// Perihelion distance (AU)
    pub q: Option<f64>,
    /// Aphelion distance (AU)
    pub ad: Option<f64>,
    /// Absolute magnitude
    pub h: Option<f64>,
}

impl OrbitalElements {
    /// Whether the body can enter the feature matrix
    pub fn is_clusterable(&self) -> bool {
        self.a.is_some() && self.e.is_some()
    }

    pub fn populated(&self) -> usize {
        [self.a, self.e, self.i, self.period_days, self.q, self.ad, self.h]
            .iter()
            .filter(|v| v.is_some())
            .count()
    }
}

/// Position and velocity from the live ephemeris service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EphemerisState {
    pub epoch: DateTime<Utc>,
    /// Heliocentric position (AU)
    pub position_au: [f64; 3],
    /// Velocity (AU/day)
    pub velocity_au_day: [f64; 3],
}

impl EphemerisState {
    pub fn heliocentric_distance_au(&self) -> f64 {
        self.position_au.iter().map(|v| v * v).sum::<f64>().sqrt()
    }
}

/// Closest upcoming approach from the near-approach feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseApproach {
    pub date: NaiveDate,
    pub miss_distance_au: f64,
    pub relative_velocity_km_s: f64,
    pub orbiting_body: String,
}

/// Which source set a field and when that source's snapshot was fetched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldProvenance {
    pub source: SourceKind,
    pub fetched_at: DateTime<Utc>,
}

/// One fused record per unique object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalBody {
    /// Catalog number when known, otherwise `family:normalized-name`
    pub id: String,
    pub name: String,
    pub category: BodyCategory,
    /// Raw catalog class code (e.g. `MBA`, `JFc`)
    pub dynamical_class: Option<String>,
    /// Parent body for moons
    pub orbits: Option<String>,
    pub is_neo: Option<bool>,
    pub is_pha: Option<bool>,
    pub physical: PhysicalAttributes,
    pub orbit: OrbitalElements,
    pub ephemeris: Option<EphemerisState>,
    pub close_approach: Option<CloseApproach>,
    pub provenance: BTreeMap<BodyField, FieldProvenance>,
}

impl CanonicalBody {
    /// Sources that contributed at least one field, in priority-independent order
    pub fn contributing_sources(&self) -> Vec<SourceKind> {
        let mut sources: Vec<SourceKind> = self.provenance.values().map(|p| p.source).collect();
        sources.sort();
        sources.dedup();
        sources
    }

    /// Lowercased text used for free-text search
    pub fn search_keywords(&self, is_anomaly: bool) -> String {
        let mut words = vec![
            self.name.to_lowercase(),
            self.id.to_lowercase(),
            self.category.as_str().to_string(),
        ];
        if let Some(class) = &self.dynamical_class {
            words.push(class.to_lowercase());
        }
        if let Some(parent) = &self.orbits {
            words.push(parent.to_lowercase());
        }
        if self.is_neo == Some(true) || self.category == BodyCategory::Neo {
            words.push("neo".to_string());
        }
        if self.is_pha == Some(true) || self.category == BodyCategory::Pha {
            words.push("pha".to_string());
        }
        if is_anomaly {
            words.push("anomaly".to_string());
        }
        words.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_roundtrip_and_family() {
        for cat in [BodyCategory::DwarfPlanet, BodyCategory::Moon, BodyCategory::TransNeptunian] {
            assert_eq!(BodyCategory::parse(cat.as_str()), Some(cat));
        }
        assert_eq!(BodyCategory::Moon.family(), IdentityFamily::Satellite);
        assert_eq!(BodyCategory::DwarfPlanet.family(), IdentityFamily::SmallBody);
        assert_eq!(BodyCategory::Planet.family(), IdentityFamily::Planetary);
    }

    #[test]
    fn test_field_authority_sets_are_disjoint() {
        assert!(BodyField::Eccentricity.is_orbit_only());
        assert!(BodyField::MassKg.is_physical_only());
        assert!(!BodyField::AbsoluteMagnitude.is_orbit_only());
        assert!(!BodyField::AbsoluteMagnitude.is_physical_only());
    }
}
