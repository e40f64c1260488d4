//! Principal components by power iteration with deflation

use ndarray::{Array1, Array2, Axis};

const MAX_ITERATIONS: usize = 1000;
const TOLERANCE: f64 = 1e-12;

/// Fitted projection onto the leading principal components
#[derive(Debug, Clone, PartialEq)]
pub struct Pca {
    pub mean: Array1<f64>,
    /// One unit-length component per row
    pub components: Array2<f64>,
    pub explained_variance: Vec<f64>,
}

impl Pca {
    pub fn fit(data: &Array2<f64>, n_components: usize) -> Self {
        let (n, d) = data.dim();
        let mean = data.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(d));
        let mut components = Array2::zeros((n_components, d));
        let mut explained_variance = vec![0.0; n_components];
        if n == 0 || d == 0 {
            return Self { mean, components, explained_variance };
        }

        let centered = data - &mean;
        let mut cov = centered.t().dot(&centered) / n as f64;

        for c in 0..n_components.min(d) {
            let (value, vector) = leading_eigenpair(&cov);
            if value <= TOLERANCE {
                break;
            }
            // Deflate so the next pass finds the next component
            cov = cov - outer(&vector) * value;
            explained_variance[c] = value;
            components.row_mut(c).assign(&vector);
        }

        Self { mean, components, explained_variance }
    }

    /// Project rows onto the fitted components
    pub fn transform(&self, data: &Array2<f64>) -> Array2<f64> {
        (data - &self.mean).dot(&self.components.t())
    }
}

fn leading_eigenpair(matrix: &Array2<f64>) -> (f64, Array1<f64>) {
    let d = matrix.nrows();
    // Fixed, uneven start vector keeps results reproducible
    let mut v = Array1::from_iter((0..d).map(|j| 1.0 + 0.1 * j as f64));
    let norm = v.dot(&v).sqrt();
    v /= norm;

    for _ in 0..MAX_ITERATIONS {
        let mut next = matrix.dot(&v);
        let norm = next.dot(&next).sqrt();
        if norm <= TOLERANCE {
            return (0.0, v);
        }
        next /= norm;
        let delta = (&next - &v).mapv(f64::abs).sum();
        v = next;
        if delta < TOLERANCE {
            break;
        }
    }

    // Sign convention: the largest-magnitude entry is positive
    let pivot = v
        .iter()
        .copied()
        .fold(0.0f64, |best, x| if x.abs() > best.abs() { x } else { best });
    if pivot < 0.0 {
        v.mapv_inplace(|x| -x);
    }
    let value = v.dot(&matrix.dot(&v));
    (value, v)
}

fn outer(v: &Array1<f64>) -> Array2<f64> {
    let col = v.view().insert_axis(Axis(1));
    let row = v.view().insert_axis(Axis(0));
    col.dot(&row)
}
