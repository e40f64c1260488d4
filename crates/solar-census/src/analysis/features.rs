//! Orbital feature extraction and standardization

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{CanonicalBody, OrbitalElements};

/// Standard deviations below this count as zero variance
const MIN_STD: f64 = 1e-12;

/// Feature columns in matrix order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureColumn {
    SemiMajorAxis,
    Eccentricity,
    Inclination,
    Period,
    Perihelion,
    Aphelion,
    AbsoluteMagnitude,
}

impl FeatureColumn {
    pub const ALL: [FeatureColumn; 7] = [
        FeatureColumn::SemiMajorAxis,
        FeatureColumn::Eccentricity,
        FeatureColumn::Inclination,
        FeatureColumn::Period,
        FeatureColumn::Perihelion,
        FeatureColumn::Aphelion,
        FeatureColumn::AbsoluteMagnitude,
    ];

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureColumn::SemiMajorAxis => "a",
            FeatureColumn::Eccentricity => "e",
            FeatureColumn::Inclination => "i",
            FeatureColumn::Period => "per",
            FeatureColumn::Perihelion => "q",
            FeatureColumn::Aphelion => "ad",
            FeatureColumn::AbsoluteMagnitude => "H",
        }
    }

    fn value(&self, orbit: &OrbitalElements) -> Option<f64> {
        match self {
            FeatureColumn::SemiMajorAxis => orbit.a,
            FeatureColumn::Eccentricity => orbit.e,
            FeatureColumn::Inclination => orbit.i,
            FeatureColumn::Period => orbit.period_days,
            FeatureColumn::Perihelion => orbit.q,
            FeatureColumn::Aphelion => orbit.ad,
            FeatureColumn::AbsoluteMagnitude => orbit.h,
        }
    }
}

/// Per-column standardization parameters, computed once per run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scaler {
    pub mean: Vec<f64>,
    /// Population standard deviation
    pub std: Vec<f64>,
}

impl Scaler {
    pub fn fit(raw: &Array2<f64>) -> Self {
        let cols = raw.ncols();
        if raw.nrows() == 0 {
            return Self { mean: vec![0.0; cols], std: vec![0.0; cols] };
        }
        let mean: Array1<f64> = raw.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(cols));
        let std = raw.std_axis(Axis(0), 0.0);
        Self { mean: mean.to_vec(), std: std.to_vec() }
    }

    /// Standardize raw values; zero-variance columns map to 0
    pub fn transform(&self, raw: &Array2<f64>) -> Array2<f64> {
        let mut out = raw.clone();
        for (j, mut column) in out.axis_iter_mut(Axis(1)).enumerate() {
            let (mean, std) = (self.mean[j], self.std[j]);
            column.mapv_inplace(|v| if std > MIN_STD { (v - mean) / std } else { 0.0 });
        }
        out
    }
}

/// Standardized feature matrix, one row per qualifying body
#[derive(Debug, Clone)]
pub struct NormalizedFeatures {
    pub matrix: Array2<f64>,
    /// Unscaled values, imputed zeros included
    pub raw: Array2<f64>,
    /// Row order of both matrices
    pub body_ids: Vec<String>,
    pub scaler: Scaler,
    /// Columns filled with 0 per body id
    pub imputed: BTreeMap<String, Vec<FeatureColumn>>,
}

impl NormalizedFeatures {
    pub fn len(&self) -> usize {
        self.body_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body_ids.is_empty()
    }
}

/// Build the feature matrix from fused bodies
///
/// Only bodies with both a and e qualify; the order of `bodies` is kept.
pub fn normalize(bodies: &[CanonicalBody]) -> NormalizedFeatures {
    let cols = FeatureColumn::ALL.len();
    let qualifying: Vec<&CanonicalBody> = bodies.iter().filter(|b| b.orbit.is_clusterable()).collect();

    let mut raw = Array2::<f64>::zeros((qualifying.len(), cols));
    let mut imputed = BTreeMap::new();
    for (row, body) in qualifying.iter().enumerate() {
        let mut missing = Vec::new();
        for column in FeatureColumn::ALL {
            match column.value(&body.orbit) {
                Some(v) => raw[[row, column.index()]] = v,
                None => missing.push(column),
            }
        }
        if !missing.is_empty() {
            imputed.insert(body.id.clone(), missing);
        }
    }

    let scaler = Scaler::fit(&raw);
    let matrix = scaler.transform(&raw);
    tracing::info!(
        "Feature matrix: {} of {} bodies qualify, {} with imputed columns",
        qualifying.len(),
        bodies.len(),
        imputed.len()
    );

    NormalizedFeatures {
        matrix,
        raw,
        body_ids: qualifying.iter().map(|b| b.id.clone()).collect(),
        scaler,
        imputed,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::{BodyCategory, PhysicalAttributes};

    pub(crate) fn body(id: &str, orbit: OrbitalElements) -> CanonicalBody {
        CanonicalBody {
            id: id.to_string(),
            name: id.to_string(),
            category: BodyCategory::Asteroid,
            dynamical_class: None,
            orbits: None,
            is_neo: None,
            is_pha: None,
            physical: PhysicalAttributes::default(),
            orbit,
            ephemeris: None,
            close_approach: None,
            provenance: BTreeMap::new(),
        }
    }

    pub(crate) fn ae(id: &str, a: f64, e: f64, i: f64) -> CanonicalBody {
        body(id, OrbitalElements { a: Some(a), e: Some(e), i: Some(i), ..Default::default() })
    }

    #[test]
    fn test_only_bodies_with_a_and_e_qualify() {
        let bodies = vec![
            ae("1", 2.5, 0.1, 5.0),
            body("2", OrbitalElements { a: Some(3.0), ..Default::default() }),
            ae("3", 3.5, 0.3, 15.0),
        ];
        let features = normalize(&bodies);
        assert_eq!(features.body_ids, vec!["1", "3"]);
        assert_eq!(features.matrix.dim(), (2, 7));
        assert_eq!(
            features.imputed["1"],
            vec![
                FeatureColumn::Period,
                FeatureColumn::Perihelion,
                FeatureColumn::Aphelion,
                FeatureColumn::AbsoluteMagnitude
            ]
        );
    }

    #[test]
    fn test_standardization_uses_population_std() {
        let bodies = vec![ae("1", 1.0, 0.1, 0.0), ae("2", 3.0, 0.3, 0.0)];
        let features = normalize(&bodies);
        assert!((features.scaler.mean[0] - 2.0).abs() < 1e-12);
        assert!((features.scaler.std[0] - 1.0).abs() < 1e-12);
        assert!((features.matrix[[0, 0]] + 1.0).abs() < 1e-12);
        assert!((features.matrix[[1, 0]] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_variance_column_stays_zero() {
        let bodies = vec![ae("1", 1.0, 0.1, 7.0), ae("2", 3.0, 0.3, 7.0), ae("3", 5.0, 0.2, 7.0)];
        let features = normalize(&bodies);
        let inclination = features.matrix.column(FeatureColumn::Inclination.index());
        assert!(inclination.iter().all(|v| *v == 0.0));
        assert_eq!(features.raw[[0, FeatureColumn::Inclination.index()]], 7.0);
    }

    #[test]
    fn test_empty_input() {
        let features = normalize(&[]);
        assert!(features.is_empty());
        assert_eq!(features.matrix.dim(), (0, 7));
    }
}
