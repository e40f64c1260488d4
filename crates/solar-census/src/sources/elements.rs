//! Orbital-elements catalog normalizer
//!
//! The catalog answers with a column list plus rows of strings.

use serde_json::Value;
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::types::{ElementsRecord, OrbitalElements};

use super::{value_f64, value_flag, value_str, value_u64};

/// Columns requested from the catalog, in request order
pub const ELEMENT_FIELDS: &[&str] = &[
    "spkid", "full_name", "name", "pdes", "prefix", "kind", "class", "neo", "pha",
    "a", "e", "i", "per", "q", "ad", "H", "diameter",
];

const COMET_CLASSES: &[&str] = &["JFC", "HTC", "ETC", "CTC", "PAR", "HYP", "COM"];

/// Parse a `{"fields": [...], "data": [[...], ...]}` payload
pub fn parse_elements_payload(payload: &Value) -> Result<Vec<ElementsRecord>> {
    let fields = payload
        .get("fields")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::malformed("elements", "missing 'fields' array"))?;
    // An empty result set carries no data array
    let rows = match payload.get("data") {
        Some(Value::Array(rows)) => rows.as_slice(),
        Some(Value::Null) | None => &[],
        Some(_) => return Err(Error::malformed("elements", "'data' is not an array")),
    };

    let column: HashMap<&str, usize> = fields
        .iter()
        .enumerate()
        .filter_map(|(idx, f)| f.as_str().map(|name| (name, idx)))
        .collect();

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let Some(cells) = row.as_array() else {
            return Err(Error::malformed("elements", "row is not an array"));
        };
        let cell = |name: &str| column.get(name).and_then(|&idx| cells.get(idx));
        if let Some(record) = parse_row(&cell) {
            records.push(record);
        }
    }
    Ok(records)
}

fn parse_row<'a>(cell: &dyn Fn(&str) -> Option<&'a Value>) -> Option<ElementsRecord> {
    let name = value_str(cell("name"))
        .or_else(|| value_str(cell("full_name")))
        .or_else(|| value_str(cell("pdes")))?;

    let class_code = value_str(cell("class"));
    let is_comet = value_str(cell("kind"))
        .map(|k| k.starts_with('c'))
        .or_else(|| value_str(cell("prefix")).map(|p| matches!(p.as_str(), "P" | "C" | "D" | "X" | "I")))
        .unwrap_or_else(|| {
            class_code
                .as_deref()
                .map(|c| COMET_CLASSES.contains(&c.to_ascii_uppercase().as_str()))
                .unwrap_or(false)
        });

    Some(ElementsRecord {
        spkid: value_u64(cell("spkid")),
        name,
        class_code,
        is_neo: value_flag(cell("neo")),
        is_pha: value_flag(cell("pha")),
        is_comet,
        orbit: OrbitalElements {
            a: value_f64(cell("a")),
            e: value_f64(cell("e")),
            i: value_f64(cell("i")),
            period_days: value_f64(cell("per")),
            q: value_f64(cell("q")),
            ad: value_f64(cell("ad")),
            h: value_f64(cell("H")),
        },
        diameter_km: value_f64(cell("diameter")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload() -> Value {
        json!({
            "signature": {"version": "1.0"},
            "count": 2,
            "fields": ["spkid", "full_name", "name", "kind", "class", "neo", "pha",
                       "a", "e", "i", "per", "q", "ad", "H", "diameter"],
            "data": [
                ["2000001", "     1 Ceres (A801 AA)", "Ceres", "an", "MBA", "N", "N",
                 "2.7670", "0.0785", "10.59", "1681.6", "2.55", "2.98", "3.34", "939.4"],
                ["1000036", "1P/Halley", null, "cn", "HTC", "N", null,
                 "17.93", "0.9679", "162.19", "27731", "0.575", "35.3", null, null]
            ]
        })
    }

    #[test]
    fn test_rows_map_by_column_name() {
        let records = parse_elements_payload(&payload()).unwrap();
        assert_eq!(records.len(), 2);

        let ceres = &records[0];
        assert_eq!(ceres.spkid, Some(2_000_001));
        assert_eq!(ceres.name, "Ceres");
        assert_eq!(ceres.orbit.a, Some(2.767));
        assert_eq!(ceres.diameter_km, Some(939.4));
        assert_eq!(ceres.is_neo, Some(false));
        assert!(!ceres.is_comet);

        let halley = &records[1];
        assert_eq!(halley.name, "1P/Halley");
        assert!(halley.is_comet);
        assert_eq!(halley.orbit.h, None);
        assert_eq!(halley.is_pha, None);
    }

    #[test]
    fn test_empty_result_has_no_data() {
        let records = parse_elements_payload(&json!({"fields": ["spkid"], "count": 0})).unwrap();
        assert!(records.is_empty());
    }
}
