//! Distance kernels and the metric tag registry (components A and E).

use std::collections::HashMap;

use crate::error::{Error, Result};

/// A pure distance function over two equal-length vectors.
pub type Kernel = fn(&[f64], &[f64]) -> f64;

/// L2 (Euclidean) distance. Hot loop: difference, square, accumulate, one pass.
///
/// Undefined on mismatched lengths or non-finite inputs; callers guarantee both.
pub fn l2(a: &[f64], b: &[f64]) -> f64 {
    let mut acc = 0.0;
    for i in 0..a.len() {
        let diff = a[i] - b[i];
        acc += diff * diff;
    }
    acc.sqrt()
}

/// Fixed-at-startup lookup from metric tag to distance kernel.
///
/// Unknown tags surface as [`Error::InvalidArgument`]; the registry itself
/// never mutates after construction.
#[derive(Clone)]
pub struct MetricRegistry {
    kernels: HashMap<String, Kernel>,
}

impl MetricRegistry {
    /// Registry with the built-in L2 metric under tag `"l2"`.
    pub fn with_defaults() -> Self {
        let mut kernels: HashMap<String, Kernel> = HashMap::new();
        kernels.insert("l2".to_string(), l2 as Kernel);
        Self { kernels }
    }

    pub fn resolve(&self, tag: &str) -> Result<Kernel> {
        self.kernels
            .get(tag)
            .copied()
            .ok_or_else(|| Error::invalid_argument(format!("unknown metric: {tag}")))
    }
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
