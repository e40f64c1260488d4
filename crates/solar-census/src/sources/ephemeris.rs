//! Live ephemeris normalizer
//!
//! Accepts either a structured `{"vectors": [...]}` document or the service's
//! text report, where the state table sits between `$$SOE` and `$$EOE`.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::types::{EphemerisRecord, EphemerisState, OrbitalElements};

use super::{value_f64, value_str, value_u64};

const UNIX_EPOCH_JD: f64 = 2_440_587.5;
const SECONDS_PER_DAY: f64 = 86_400.0;

/// Parse one ephemeris payload into state vectors
pub fn parse_ephemeris_payload(payload: &Value) -> Result<Vec<EphemerisRecord>> {
    if let Some(message) = value_str(payload.get("error")) {
        return Err(Error::malformed("ephemeris", message));
    }
    if let Some(vectors) = payload.get("vectors").and_then(Value::as_array) {
        return Ok(vectors.iter().filter_map(parse_vector_entry).collect());
    }
    let text = payload
        .get("result")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::malformed("ephemeris", "neither 'vectors' nor 'result' present"))?;
    let target = value_u64(payload.get("target"));
    Ok(parse_report(text, target).into_iter().collect())
}

fn parse_vector_entry(entry: &Value) -> Option<EphemerisRecord> {
    let spkid = value_u64(entry.get("spkid")).or_else(|| value_u64(entry.get("target")));
    let name = value_str(entry.get("name")).or_else(|| spkid.map(|id| id.to_string()))?;
    let epoch = value_f64(entry.get("jd"))
        .and_then(jd_to_datetime)
        .or_else(|| {
            value_str(entry.get("epoch"))
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.with_timezone(&Utc))
        })?;
    let get = |key: &str| value_f64(entry.get(key));

    Some(EphemerisRecord {
        spkid,
        name,
        state: EphemerisState {
            epoch,
            position_au: [get("x")?, get("y")?, get("z")?],
            velocity_au_day: [get("vx")?, get("vy")?, get("vz")?],
        },
        orbit: OrbitalElements {
            a: get("a"),
            e: get("e"),
            i: get("i"),
            period_days: get("per"),
            q: get("q"),
            ad: get("ad"),
            h: get("H"),
        },
    })
}

fn parse_report(text: &str, target: Option<u64>) -> Option<EphemerisRecord> {
    let (name, reported_id) = target_name(text)?;
    let spkid = target.or(reported_id);

    let start = text.find("$$SOE")? + "$$SOE".len();
    let end = start + text[start..].find("$$EOE")?;
    let table = &text[start..end];

    // First token of the table is the Julian date of the first row
    let jd = table
        .split_whitespace()
        .next()
        .and_then(|tok| tok.parse::<f64>().ok())?;

    let spaced = table.replace('=', " = ");
    let tokens: Vec<&str> = spaced.split_whitespace().collect();
    let mut values: HashMap<&str, f64> = HashMap::new();
    for window in tokens.windows(3) {
        if let [label, "=", value] = window {
            if let Ok(v) = value.parse::<f64>() {
                // Only the first row's values
                values.entry(*label).or_insert(v);
            }
        }
    }
    let get = |key: &str| values.get(key).copied();

    Some(EphemerisRecord {
        spkid,
        name,
        state: EphemerisState {
            epoch: jd_to_datetime(jd)?,
            position_au: [get("X")?, get("Y")?, get("Z")?],
            velocity_au_day: [get("VX")?, get("VY")?, get("VZ")?],
        },
        orbit: OrbitalElements::default(),
    })
}

/// Name and numeric id from the `Target body name:` header line
fn target_name(text: &str) -> Option<(String, Option<u64>)> {
    let line = text
        .lines()
        .find_map(|l| l.trim_start().strip_prefix("Target body name:"))?;
    let line = line.split('{').next().unwrap_or(line).trim();

    if let Some(open) = line.rfind('(') {
        let inner = line[open + 1..].trim_end_matches(')').trim();
        if let Ok(id) = inner.parse::<u64>() {
            return Some((line[..open].trim().to_string(), Some(id)));
        }
    }
    (!line.is_empty()).then(|| (line.to_string(), None))
}

fn jd_to_datetime(jd: f64) -> Option<DateTime<Utc>> {
    let secs = (jd - UNIX_EPOCH_JD) * SECONDS_PER_DAY;
    DateTime::from_timestamp(secs.floor() as i64, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const REPORT: &str = "\
*******************************************************************************
 Revised: April 12, 2021                Mars                              499
Target body name: Mars (499)                      {source: mar097}
Center body name: Sun (10)                        {source: DE441}
*******************************************************************************
$$SOE
2460000.500000000 = A.D. 2023-Feb-25 00:00:00.0000 TDB
 X =-1.283400000000000E-01 Y = 1.520000000000000E+00 Z = 3.500000000000000E-02
 VX=-1.330000000000000E-02 VY= 9.000000000000000E-04 VZ= 3.500000000000000E-04
2460001.500000000 = A.D. 2023-Feb-26 00:00:00.0000 TDB
 X =-9.999999999999999E-01 Y = 9.999999999999999E-01 Z = 0.000000000000000E+00
 VX= 0.000000000000000E+00 VY= 0.000000000000000E+00 VZ= 0.000000000000000E+00
$$EOE
";

    #[test]
    fn test_text_report_first_row() {
        let payload = json!({"result": REPORT, "target": "499"});
        let records = parse_ephemeris_payload(&payload).unwrap();
        assert_eq!(records.len(), 1);
        let mars = &records[0];
        assert_eq!(mars.name, "Mars");
        assert_eq!(mars.spkid, Some(499));
        assert!((mars.state.position_au[1] - 1.52).abs() < 1e-12);
        assert!((mars.state.velocity_au_day[0] + 0.0133).abs() < 1e-12);
        assert_eq!(mars.state.epoch.format("%Y-%m-%d").to_string(), "2023-02-25");
    }

    #[test]
    fn test_vectors_document() {
        let payload = json!({"vectors": [{
            "spkid": 2000001, "name": "Ceres", "jd": 2460000.5,
            "x": 1.0, "y": 2.0, "z": 0.1, "vx": 0.001, "vy": 0.002, "vz": 0.0,
            "a": 2.77, "e": 0.0785
        }]});
        let records = parse_ephemeris_payload(&payload).unwrap();
        assert_eq!(records[0].spkid, Some(2_000_001));
        assert_eq!(records[0].orbit.a, Some(2.77));
    }

    #[test]
    fn test_service_error_is_malformed() {
        let payload = json!({"error": "No ephemeris for target"});
        assert!(matches!(
            parse_ephemeris_payload(&payload),
            Err(Error::MalformedPayload { .. })
        ));
    }

    #[test]
    fn test_report_without_table_yields_nothing() {
        let payload = json!({"result": "Target body name: Ghost (999999)\nno table"});
        assert!(parse_ephemeris_payload(&payload).unwrap().is_empty());
    }
}
