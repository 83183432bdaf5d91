/// Per-metric normalisation descriptor computed once over the active
/// lineup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricDescriptor {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std: f64,
    pub range: f64,
}

impl MetricDescriptor {
    /// Neutral descriptor for an empty metric column.
    pub fn neutral() -> Self {
        Self {
            min: 0.0,
            max: 0.0,
            mean: 0.5,
            std: 0.5,
            range: 0.0,
        }
    }

    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::neutral();
        }
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        for &v in values {
            min = min.min(v);
            max = max.max(v);
            sum += v;
        }
        let mean = sum / values.len() as f64;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
        Self {
            min,
            max,
            mean,
            std: var.sqrt(),
            range: max - min,
        }
    }

    /// Range normalisation into `[0, 1]`, inverted for lower-is-better
    /// metrics. A collapsed metric maps every driver to `0.5`.
    pub fn linear(&self, value: f64, lower_is_better: bool) -> f64 {
        if self.range <= f64::EPSILON {
            return 0.5;
        }
        let scaled = ((value - self.min) / self.range).clamp(0.0, 1.0);
        if lower_is_better {
            1.0 - scaled
        } else {
            scaled
        }
    }

    /// Robust variant: logistic over the z-score. Provided alongside the
    /// linear policy; the pace scorer consumes the linear one.
    pub fn zscore_sigmoid(&self, value: f64, lower_is_better: bool) -> f64 {
        if self.std <= f64::EPSILON {
            return 0.5;
        }
        let z = (value - self.mean) / self.std;
        let s = 1.0 / (1.0 + (-z).exp());
        if lower_is_better {
            1.0 - s
        } else {
            s
        }
    }
}
