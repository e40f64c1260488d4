//! Population labels and summary statistics for k-means clusters

use std::collections::{BTreeMap, HashMap};

use crate::types::{BodyCategory, CanonicalBody, ClusterProfile, Population};

use super::features::NormalizedFeatures;
use super::kmeans::ClusterOutcome;

/// Dynamical population matching mean elements, first rule wins
pub fn population_for(a: f64, e: f64, i: f64) -> Population {
    if (2.0..=3.5).contains(&a) && e < 0.3 {
        Population::MainBelt
    } else if (4.8..=5.5).contains(&a) {
        Population::JupiterTrojans
    } else if a < 1.3 || (a < 1.7 && e > 0.6) {
        Population::NearEarth
    } else if e > 0.7 && a > 3.0 {
        Population::CometLike
    } else if (9.0..=30.0).contains(&a) {
        Population::Centaurs
    } else if i > 30.0 {
        Population::HighInclination
    } else {
        Population::Mixed
    }
}

#[derive(Default)]
struct Accumulator {
    count: usize,
    sum_a: f64,
    sum_e: f64,
    sum_i: f64,
    with_i: usize,
    sum_radius: f64,
    with_radius: usize,
    categories: BTreeMap<BodyCategory, usize>,
}

/// One profile per cluster of a completed k-means outcome
pub fn interpret(
    outcome: &ClusterOutcome,
    features: &NormalizedFeatures,
    bodies: &[CanonicalBody],
) -> Vec<ClusterProfile> {
    let (Some(labels), Some(k)) = (&outcome.labels, outcome.chosen_k) else {
        return Vec::new();
    };
    let by_id: HashMap<&str, &CanonicalBody> = bodies.iter().map(|b| (b.id.as_str(), b)).collect();

    let mut acc: Vec<Accumulator> = (0..k).map(|_| Accumulator::default()).collect();
    for (id, &label) in features.body_ids.iter().zip(labels.iter()) {
        let Some(body) = by_id.get(id.as_str()) else {
            continue;
        };
        let slot = &mut acc[label as usize];
        slot.count += 1;
        slot.sum_a += body.orbit.a.unwrap_or(0.0);
        slot.sum_e += body.orbit.e.unwrap_or(0.0);
        if let Some(i) = body.orbit.i {
            slot.sum_i += i;
            slot.with_i += 1;
        }
        if let Some(r) = body.physical.radius_km {
            slot.sum_radius += r;
            slot.with_radius += 1;
        }
        *slot.categories.entry(body.category).or_insert(0) += 1;
    }

    acc.into_iter()
        .enumerate()
        .map(|(cluster, slot)| {
            let n = slot.count.max(1) as f64;
            let mean_a = slot.sum_a / n;
            let mean_e = slot.sum_e / n;
            let mean_i = if slot.with_i > 0 { slot.sum_i / slot.with_i as f64 } else { 0.0 };
            let dominant_category = slot
                .categories
                .iter()
                .fold(None, |best: Option<(BodyCategory, usize)>, (cat, count)| match best {
                    Some((_, c)) if c >= *count => best,
                    _ => Some((*cat, *count)),
                })
                .map(|(cat, _)| cat)
                .unwrap_or_default();

            ClusterProfile {
                cluster: cluster as u32,
                population: population_for(mean_a, mean_e, mean_i),
                count: slot.count,
                mean_a,
                mean_e,
                mean_i,
                mean_radius_km: (slot.with_radius > 0).then(|| slot.sum_radius / slot.with_radius as f64),
                dominant_category,
                category_breakdown: slot.categories,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::features::{normalize, tests::ae};
    use crate::analysis::kmeans::KMeans;
    use crate::config::ClusteringConfig;

    #[test]
    fn test_population_rules_in_order() {
        assert_eq!(population_for(2.7, 0.1, 5.0), Population::MainBelt);
        assert_eq!(population_for(5.2, 0.1, 10.0), Population::JupiterTrojans);
        assert_eq!(population_for(1.1, 0.2, 5.0), Population::NearEarth);
        assert_eq!(population_for(1.6, 0.7, 5.0), Population::NearEarth);
        assert_eq!(population_for(17.8, 0.96, 162.0), Population::CometLike);
        assert_eq!(population_for(15.0, 0.4, 20.0), Population::Centaurs);
        assert_eq!(population_for(3.2, 0.2, 35.0), Population::HighInclination);
        assert_eq!(population_for(45.0, 0.1, 3.0), Population::Mixed);
    }

    #[test]
    fn test_profiles_from_two_populations() {
        let mut bodies: Vec<CanonicalBody> = (0..6)
            .map(|k| ae(&format!("mb{}", k), 2.6 + 0.05 * k as f64, 0.1, 6.0))
            .collect();
        bodies.extend((0..6).map(|k| {
            let mut b = ae(&format!("tj{}", k), 5.2 + 0.01 * k as f64, 0.08, 20.0);
            b.category = BodyCategory::Trojan;
            b.physical.radius_km = Some(50.0 + k as f64);
            b
        }));

        let features = normalize(&bodies);
        let outcome = KMeans::new(&ClusteringConfig::default()).cluster(&features.matrix);
        let profiles = interpret(&outcome, &features, &bodies);

        assert_eq!(profiles.len(), outcome.chosen_k.unwrap());
        let trojans = profiles
            .iter()
            .find(|p| p.population == Population::JupiterTrojans)
            .unwrap();
        assert_eq!(trojans.count, 6);
        assert_eq!(trojans.dominant_category, BodyCategory::Trojan);
        assert_eq!(trojans.mean_radius_km, Some(52.5));
        let main_belt = profiles.iter().find(|p| p.population == Population::MainBelt).unwrap();
        assert_eq!(main_belt.mean_radius_km, None);
        assert_eq!(main_belt.category_breakdown[&BodyCategory::Asteroid], 6);
    }
}
