//! Numeric building blocks for the verification battery.
//!
//! Only what the verifier needs: descriptive statistics, three hypothesis
//! tests and the special functions behind their p-values. Not a general
//! statistics library.

pub mod hypothesis;
pub mod special;

pub use hypothesis::{chi_square_uniform, one_sample_t_test, shapiro_wilk, TestResult};

/// Arithmetic mean; `None` for an empty slice
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation (divides by `n`)
pub fn population_std(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some(var.sqrt())
}

/// Sample standard deviation (divides by `n - 1`); `None` below two values
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(var.sqrt())
}

/// Split into `parts` contiguous chunks whose lengths differ by at most one,
/// the longer chunks first.
pub fn split_contiguous(values: &[f64], parts: usize) -> Vec<&[f64]> {
    if parts == 0 {
        return Vec::new();
    }
    let base = values.len() / parts;
    let extra = values.len() % parts;
    let mut chunks = Vec::with_capacity(parts);
    let mut start = 0;
    for i in 0..parts {
        let len = base + usize::from(i < extra);
        chunks.push(&values[start..start + len]);
        start += len;
    }
    chunks
}
