pub fn mean(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    Some(samples.iter().sum::<f64>() / samples.len() as f64)
}

/// Standard deviation with divisor `n`.
pub fn population_std_dev(samples: &[f64]) -> Option<f64> {
    let mu = mean(samples)?;
    let var = samples.iter().map(|x| (x - mu).powi(2)).sum::<f64>() / samples.len() as f64;
    Some(var.sqrt())
}

/// Keeps the samples strictly inside `mean ± 3·std`.
///
/// A sample set without spread is returned whole, so the result is empty only for empty input.
pub fn trim_outliers(samples: &[f64]) -> Vec<f64> {
    let (Some(mu), Some(sigma)) = (mean(samples), population_std_dev(samples)) else {
        return Vec::new();
    };
    if sigma.is_nan() || sigma <= 0.0 {
        return samples.to_vec();
    }
    let lo = mu - 3.0 * sigma;
    let hi = mu + 3.0 * sigma;
    samples
        .iter()
        .copied()
        .filter(|&x| x > lo && x < hi)
        .collect()
}
