//! Rule-based subtypes for anomalous orbits
//!
//! Rules read raw (unscaled) elements and fire independently, in a fixed order.
//! They run for every body; a density outlier is only needed for the hybrid tag.

use crate::config::AnomalyConfig;
use crate::types::{AnomalySubtype, OrbitalElements};

/// Verdict for one body
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classification {
    pub is_anomaly: bool,
    pub subtypes: Vec<AnomalySubtype>,
    pub reasons: Vec<String>,
}

/// Perihelion as reported, else derived from a and e
fn perihelion(orbit: &OrbitalElements) -> Option<f64> {
    orbit.q.or_else(|| Some(orbit.a? * (1.0 - orbit.e?)))
}

/// Extreme-orbit thresholds that fired, as readable fragments
fn extreme_fragments(orbit: &OrbitalElements, config: &AnomalyConfig) -> Vec<String> {
    let mut fired = Vec::new();
    if let Some(e) = orbit.e.filter(|e| *e > config.extreme_eccentricity) {
        fired.push(format!("e={:.3} > {}", e, config.extreme_eccentricity));
    }
    if let Some(i) = orbit.i.filter(|i| *i > config.extreme_inclination_deg) {
        fired.push(format!("i={:.1}° > {}°", i, config.extreme_inclination_deg));
    }
    if let Some(q) = perihelion(orbit).filter(|q| *q < config.extreme_perihelion_au) {
        fired.push(format!("q={:.3} AU < {} AU", q, config.extreme_perihelion_au));
    }
    fired
}

/// Decide whether a body is anomalous and tag it
pub fn classify(orbit: &OrbitalElements, is_outlier: bool, config: &AnomalyConfig) -> Classification {
    let extremes = extreme_fragments(orbit, config);
    let mut subtypes = Vec::new();
    let mut reasons = Vec::new();
    let (a, e, i, q) = (orbit.a, orbit.e, orbit.i, perihelion(orbit));

    if let (Some(a), Some(e)) = (a, e) {
        if e > 0.7 && a > 10.0 {
            subtypes.push(AnomalySubtype::CometLike);
            reasons.push(format!("comet-like orbit: e={:.3} > 0.7 and a={:.2} AU > 10 AU", e, a));
        }
    }
    if let Some(i) = i.filter(|i| *i > 90.0) {
        subtypes.push(AnomalySubtype::Retrograde);
        reasons.push(format!("retrograde orbit: i={:.1}° > 90°", i));
    }
    if let Some(q) = q.filter(|q| *q < 0.1) {
        subtypes.push(AnomalySubtype::NearSunGrazer);
        reasons.push(format!("near-sun grazer: q={:.3} AU < 0.1 AU", q));
    }
    if let (Some(a), Some(e), Some(i)) = (a, e, i) {
        if a > 15.0 && e > 0.4 && i > 20.0 {
            subtypes.push(AnomalySubtype::ScatteredDisk);
            reasons.push(format!(
                "scattered-disk orbit: a={:.2} AU > 15 AU, e={:.3} > 0.4 and i={:.1}° > 20°",
                a, e, i
            ));
        }
    }
    if subtypes.is_empty() && is_outlier {
        subtypes.push(AnomalySubtype::Hybrid);
        reasons.push("density outlier matching no known orbital family".to_string());
    }
    if !extremes.is_empty() {
        reasons.push(format!("extreme orbit: {}", extremes.join(", ")));
    }

    if reasons.is_empty() {
        return Classification::default();
    }
    Classification {
        is_anomaly: true,
        subtypes,
        reasons,
    }
}
