//! Near-approach feed normalizer
//!
//! The dated feed groups objects under one key per day and repeats an object
//! on every day it approaches; the browse listing is a flat array.

use chrono::NaiveDate;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::types::{ApproachRecord, CloseApproach};

use super::{value_f64, value_str, value_u64};

/// Parse a feed or browse payload, one record per object
pub fn parse_approach_payload(payload: &Value) -> Result<Vec<ApproachRecord>> {
    let objects: Vec<&Value> = match payload.get("near_earth_objects") {
        Some(Value::Object(by_date)) => by_date
            .values()
            .filter_map(Value::as_array)
            .flatten()
            .collect(),
        Some(Value::Array(list)) => list.iter().collect(),
        _ => return Err(Error::malformed("near_approach", "missing 'near_earth_objects'")),
    };

    // Keyed by id (or name) so repeated sightings collapse deterministically
    let mut merged: BTreeMap<String, ApproachRecord> = BTreeMap::new();
    for object in objects {
        let Some(record) = parse_object(object) else {
            continue;
        };
        let key = record
            .neo_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| record.name.clone());
        match merged.get_mut(&key) {
            Some(existing) => {
                if closer(record.approach.as_ref(), existing.approach.as_ref()) {
                    existing.approach = record.approach;
                }
            }
            None => {
                merged.insert(key, record);
            }
        }
    }
    Ok(merged.into_values().collect())
}

fn closer(candidate: Option<&CloseApproach>, current: Option<&CloseApproach>) -> bool {
    match (candidate, current) {
        (Some(c), Some(cur)) => {
            c.miss_distance_au < cur.miss_distance_au
                || (c.miss_distance_au == cur.miss_distance_au && c.date < cur.date)
        }
        (Some(_), None) => true,
        _ => false,
    }
}

fn parse_object(object: &Value) -> Option<ApproachRecord> {
    let neo_id = value_u64(object.get("neo_reference_id")).or_else(|| value_u64(object.get("id")));
    let name = value_str(object.get("name")).or_else(|| neo_id.map(|id| id.to_string()))?;

    let km = object
        .get("estimated_diameter")
        .and_then(|d| d.get("kilometers"));
    let diameter_min_km = km.and_then(|k| value_f64(k.get("estimated_diameter_min")));
    let diameter_max_km = km.and_then(|k| value_f64(k.get("estimated_diameter_max")));

    let approach = object
        .get("close_approach_data")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(parse_approach)
        .fold(None, |best: Option<CloseApproach>, next| {
            if closer(Some(&next), best.as_ref()) {
                Some(next)
            } else {
                best
            }
        });

    Some(ApproachRecord {
        neo_id,
        name,
        absolute_magnitude: value_f64(object.get("absolute_magnitude_h")),
        diameter_min_km,
        diameter_max_km,
        is_pha: object
            .get("is_potentially_hazardous_asteroid")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        approach,
    })
}

fn parse_approach(entry: &Value) -> Option<CloseApproach> {
    let date = value_str(entry.get("close_approach_date"))
        .and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())?;
    let miss_distance_au = value_f64(entry.get("miss_distance").and_then(|m| m.get("astronomical")))?;
    let relative_velocity_km_s = value_f64(
        entry
            .get("relative_velocity")
            .and_then(|v| v.get("kilometers_per_second")),
    )
    .unwrap_or(0.0);
    Some(CloseApproach {
        date,
        miss_distance_au,
        relative_velocity_km_s,
        orbiting_body: value_str(entry.get("orbiting_body")).unwrap_or_else(|| "Earth".to_string()),
    })
}
