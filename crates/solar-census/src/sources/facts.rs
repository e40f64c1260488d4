//! Physical-facts catalog normalizer
//!
//! Distances arrive in km, mass as mantissa/exponent, temperatures in K.

use serde_json::Value;

use crate::error::{Error, Result};
use crate::types::{BodyCategory, FactsRecord, OrbitalElements, PhysicalAttributes, KM_PER_AU};

use super::{value_f64, value_nonzero, value_str};

/// Parse a `{"bodies": [...]}` payload
pub fn parse_facts_payload(payload: &Value) -> Result<Vec<FactsRecord>> {
    let bodies = payload
        .get("bodies")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::malformed("facts", "missing 'bodies' array"))?;

    let mut records = Vec::with_capacity(bodies.len());
    for body in bodies {
        match parse_body(body) {
            Some(record) => records.push(record),
            None => tracing::debug!("Skipping facts entry without a name"),
        }
    }
    Ok(records)
}

fn parse_body(body: &Value) -> Option<FactsRecord> {
    let name = value_str(body.get("englishName"))
        .or_else(|| value_str(body.get("name")))
        .or_else(|| value_str(body.get("id")))?;

    let category = body_type_category(
        value_str(body.get("bodyType")).as_deref(),
        body.get("isPlanet").and_then(Value::as_bool).unwrap_or(false),
    );

    let mass_kg = body.get("mass").and_then(|m| {
        let value = value_f64(m.get("massValue"))?;
        let exponent = value_f64(m.get("massExponent"))?;
        let kg = value * 10f64.powf(exponent);
        (kg > 0.0).then_some(kg)
    });

    let physical = PhysicalAttributes {
        radius_km: value_nonzero(body.get("meanRadius")),
        mass_kg,
        density_g_cm3: value_nonzero(body.get("density")),
        gravity_m_s2: value_nonzero(body.get("gravity")),
        mean_temperature_k: value_nonzero(body.get("avgTemp")),
    };

    let orbits = body
        .get("aroundPlanet")
        .and_then(|p| value_str(p.get("planet")));

    // Moon elements are planetocentric; only heliocentric orbits are kept
    let orbit = if category == BodyCategory::Moon || orbits.is_some() {
        OrbitalElements::default()
    } else {
        heliocentric_elements(body)
    };

    Some(FactsRecord {
        name,
        category,
        orbits,
        physical,
        orbit,
    })
}

fn heliocentric_elements(body: &Value) -> OrbitalElements {
    let a = value_nonzero(body.get("semimajorAxis")).map(|km| km / KM_PER_AU);
    // A zero eccentricity only means something next to a reported axis
    let e = a.and(value_f64(body.get("eccentricity")));
    let i = a.and(value_f64(body.get("inclination")));
    OrbitalElements {
        a,
        e,
        i,
        period_days: value_nonzero(body.get("sideralOrbit")),
        q: value_nonzero(body.get("perihelion")).map(|km| km / KM_PER_AU),
        ad: value_nonzero(body.get("aphelion")).map(|km| km / KM_PER_AU),
        h: None,
    }
}

fn body_type_category(body_type: Option<&str>, is_planet: bool) -> BodyCategory {
    match body_type.map(|t| t.to_ascii_lowercase()) {
        Some(t) if t == "star" => BodyCategory::Star,
        Some(t) if t == "planet" => BodyCategory::Planet,
        Some(t) if t == "dwarf planet" => BodyCategory::DwarfPlanet,
        Some(t) if t == "moon" => BodyCategory::Moon,
        Some(t) if t == "asteroid" => BodyCategory::Asteroid,
        Some(t) if t == "comet" => BodyCategory::Comet,
        _ if is_planet => BodyCategory::Planet,
        _ => BodyCategory::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_planet_units() {
        let payload = json!({"bodies": [{
            "englishName": "Mars",
            "bodyType": "Planet",
            "isPlanet": true,
            "mass": {"massValue": 6.41712, "massExponent": 23},
            "meanRadius": 3389.5,
            "density": 3.9341,
            "gravity": 3.71,
            "avgTemp": 210,
            "semimajorAxis": 227939200,
            "perihelion": 206700000,
            "aphelion": 249200000,
            "eccentricity": 0.0935,
            "inclination": 1.85,
            "sideralOrbit": 686.98
        }]});
        let records = parse_facts_payload(&payload).unwrap();
        let mars = &records[0];
        assert_eq!(mars.category, BodyCategory::Planet);
        assert!((mars.orbit.a.unwrap() - 1.5237).abs() < 1e-3);
        assert!((mars.physical.mass_kg.unwrap() - 6.41712e23).abs() / 6.41712e23 < 1e-9);
        assert_eq!(mars.physical.mean_temperature_k, Some(210.0));
        assert_eq!(mars.orbit.e, Some(0.0935));
    }

    #[test]
    fn test_moon_keeps_parent_not_orbit() {
        let payload = json!({"bodies": [{
            "englishName": "Io",
            "bodyType": "Moon",
            "aroundPlanet": {"planet": "jupiter", "rel": "https://example/jupiter"},
            "semimajorAxis": 421700,
            "eccentricity": 0.004,
            "meanRadius": 1821.6
        }]});
        let io = &parse_facts_payload(&payload).unwrap()[0];
        assert_eq!(io.category, BodyCategory::Moon);
        assert_eq!(io.orbits.as_deref(), Some("jupiter"));
        assert_eq!(io.orbit.a, None);
        assert_eq!(io.physical.radius_km, Some(1821.6));
    }

    #[test]
    fn test_zero_means_unknown() {
        let payload = json!({"bodies": [{"englishName": "Hygiea", "bodyType": "Asteroid",
            "meanRadius": 0, "semimajorAxis": 0, "eccentricity": 0}]});
        let hygiea = &parse_facts_payload(&payload).unwrap()[0];
        assert_eq!(hygiea.physical.radius_km, None);
        assert_eq!(hygiea.orbit.a, None);
        assert_eq!(hygiea.orbit.e, None);
    }

    #[test]
    fn test_missing_bodies_is_malformed() {
        assert!(matches!(
            parse_facts_payload(&json!({"rows": []})),
            Err(Error::MalformedPayload { .. })
        ));
    }
}
