//! Hypothesis tests used by the significance phase.
//!
//! Each test returns `Err(reason)` when its statistic is undefined for the
//! supplied data (too few values, zero variance). Callers turn that into a
//! skipped or errored phase; nothing here panics on user data.

use super::special::{
    normal_quantile, normal_sf, regularized_gamma_q, regularized_incomplete_beta,
};
use super::{mean, sample_std};

/// Statistic and p-value of one test
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TestResult {
    pub statistic: f64,
    pub p_value: f64,
}

/// Two-sided one-sample Student t-test of `H0: mean == null_mean`
pub fn one_sample_t_test(values: &[f64], null_mean: f64) -> Result<TestResult, String> {
    let n = values.len();
    if n < 2 {
        return Err(format!("t-test needs at least 2 values, got {n}"));
    }
    let m = mean(values).ok_or("empty sample")?;
    let s = sample_std(values).ok_or("empty sample")?;
    if s == 0.0 || !s.is_finite() {
        return Err("t-test undefined for zero variance".to_string());
    }
    let df = (n - 1) as f64;
    let t = (m - null_mean) / (s / (n as f64).sqrt());
    let p = regularized_incomplete_beta(df / 2.0, 0.5, df / (df + t * t));
    Ok(TestResult {
        statistic: t,
        p_value: p.clamp(0.0, 1.0),
    })
}

/// Chi-square goodness-of-fit of `|x| + 1e-10` against a flat expected
/// distribution, `df = n - 1`
pub fn chi_square_uniform(values: &[f64]) -> Result<TestResult, String> {
    let n = values.len();
    if n < 2 {
        return Err(format!("chi-square needs at least 2 values, got {n}"));
    }
    let observed: Vec<f64> = values.iter().map(|v| v.abs() + 1e-10).collect();
    let expected = mean(&observed).ok_or("empty sample")?;
    let chi2: f64 = observed
        .iter()
        .map(|o| (o - expected).powi(2) / expected)
        .sum();
    if !chi2.is_finite() {
        return Err("chi-square statistic is not finite".to_string());
    }
    let df = (n - 1) as f64;
    let p = regularized_gamma_q(df / 2.0, chi2 / 2.0);
    Ok(TestResult {
        statistic: chi2,
        p_value: p.clamp(0.0, 1.0),
    })
}

const SW_C1: [f64; 6] = [0.0, 0.221_157, -0.147_981, -2.071_190, 4.434_685, -2.706_056];
const SW_C2: [f64; 6] = [0.0, 0.042_981, -0.293_762, -1.752_461, 5.682_633, -3.582_633];
const SW_C3: [f64; 4] = [0.544, -0.399_78, 0.025_054, -6.714e-4];
const SW_C4: [f64; 4] = [1.3822, -0.778_57, 0.062_767, -0.002_032_2];
const SW_C5: [f64; 4] = [-1.5861, -0.310_82, -0.083_751, 0.003_891_5];
const SW_C6: [f64; 3] = [-0.4803, -0.082_676, 0.003_030_2];
const SW_G: [f64; 2] = [-2.273, 0.459];
const SW_MAX_N: usize = 5000;

fn poly(coef: &[f64], x: f64) -> f64 {
    coef.iter().rev().fold(0.0, |acc, c| acc * x + c)
}

/// Shapiro-Wilk W test (Royston 1995), valid for `3 <= n <= 5000`
pub fn shapiro_wilk(values: &[f64]) -> Result<TestResult, String> {
    let n = values.len();
    if n < 3 {
        return Err(format!("Shapiro-Wilk needs at least 3 values, got {n}"));
    }
    if n > SW_MAX_N {
        return Err(format!("Shapiro-Wilk supports at most {SW_MAX_N} values, got {n}"));
    }

    let mut x = values.to_vec();
    x.sort_by(f64::total_cmp);
    let range = x[n - 1] - x[0];
    if range <= 0.0 {
        return Err("Shapiro-Wilk undefined for identical values".to_string());
    }

    let coefficients = shapiro_coefficients(n);
    let m = mean(&x).ok_or("empty sample")?;
    let ssq: f64 = x.iter().map(|v| (v - m).powi(2)).sum();
    let num: f64 = coefficients.iter().zip(&x).map(|(a, v)| a * v).sum();
    let w = ((num * num) / ssq).min(1.0);

    let p = if n == 3 {
        let pi6 = 6.0 / std::f64::consts::PI;
        let stqr = std::f64::consts::FRAC_PI_3;
        (pi6 * (w.sqrt().asin() - stqr)).max(0.0)
    } else {
        let w1 = (1.0 - w).ln();
        let nf = n as f64;
        let z = if n <= 11 {
            let gamma = poly(&SW_G, nf);
            if w1 >= gamma {
                // W so small the approximation saturates
                return Ok(TestResult {
                    statistic: w,
                    p_value: 1e-99,
                });
            }
            let y = -(gamma - w1).ln();
            let mu = poly(&SW_C3, nf);
            let sigma = poly(&SW_C4, nf).exp();
            (y - mu) / sigma
        } else {
            let ln_n = nf.ln();
            let mu = poly(&SW_C5, ln_n);
            let sigma = poly(&SW_C6, ln_n).exp();
            (w1 - mu) / sigma
        };
        if z.is_finite() {
            normal_sf(z)
        } else if z > 0.0 {
            0.0
        } else {
            1.0
        }
    };

    Ok(TestResult {
        statistic: w,
        p_value: p.clamp(0.0, 1.0),
    })
}

/// Antisymmetric weights `a_i` for sorted data
fn shapiro_coefficients(n: usize) -> Vec<f64> {
    let mut a = vec![0.0; n];
    if n == 3 {
        let s = std::f64::consts::FRAC_1_SQRT_2;
        a[0] = -s;
        a[2] = s;
        return a;
    }

    let nf = n as f64;
    let m: Vec<f64> = (1..=n)
        .map(|i| normal_quantile((i as f64 - 0.375) / (nf + 0.25)))
        .collect();
    let summ2: f64 = m.iter().map(|v| v * v).sum();
    let ssumm2 = summ2.sqrt();
    let rsn = 1.0 / nf.sqrt();

    let a1 = poly(&SW_C1, rsn) + m[n - 1] / ssumm2;
    let (first, fac) = if n > 5 {
        let a2 = poly(&SW_C2, rsn) + m[n - 2] / ssumm2;
        let fac = ((summ2 - 2.0 * m[n - 1].powi(2) - 2.0 * m[n - 2].powi(2))
            / (1.0 - 2.0 * a1 * a1 - 2.0 * a2 * a2))
            .sqrt();
        a[n - 2] = a2;
        a[1] = -a2;
        (2, fac)
    } else {
        let fac = ((summ2 - 2.0 * m[n - 1].powi(2)) / (1.0 - 2.0 * a1 * a1)).sqrt();
        (1, fac)
    };
    a[n - 1] = a1;
    a[0] = -a1;

    for i in first..(n - first) {
        a[i] = m[i] / fac;
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_t_test_reference_value() {
        // mean 2, n = 4, df = 3 -> t ~ 4.38, two-sided p ~ 0.022
        let values = [1.0, 1.5, 2.5, 3.0];
        let s = sample_std(&values).unwrap();
        let r = one_sample_t_test(&values, 0.0).unwrap();
        assert!((r.statistic - 2.0 / (s / 2.0)).abs() < 1e-12);
        assert!(r.p_value < 0.05);
    }

    #[test]
    fn test_t_test_two_sided_p() {
        // t = 2.0 with df = 10 has a two-sided p of ~0.0734
        let df = 10.0;
        let t: f64 = 2.0;
        let p = regularized_incomplete_beta(df / 2.0, 0.5, df / (df + t * t));
        assert!((p - 0.073_388).abs() < 1e-4, "p = {p}");
    }

    #[test]
    fn test_t_test_rejects_degenerate() {
        assert!(one_sample_t_test(&[1.0], 0.0).is_err());
        assert!(one_sample_t_test(&[3.0, 3.0, 3.0], 0.0).is_err());
    }

    #[test]
    fn test_t_test_centered_sample_not_significant() {
        let values = [-2.0, -1.0, 0.0, 1.0, 2.0];
        let r = one_sample_t_test(&values, 0.0).unwrap();
        assert_eq!(r.statistic, 0.0);
        assert!((r.p_value - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_chi_square_flat_sample() {
        let r = chi_square_uniform(&[5.0; 8]).unwrap();
        assert!(r.statistic < 1e-9);
        assert!(r.p_value > 0.99);
    }

    #[test]
    fn test_chi_square_spread_sample_significant() {
        let values = [0.0, 0.0, 0.0, 0.0, 100.0, 100.0, 100.0, 100.0];
        let r = chi_square_uniform(&values).unwrap();
        assert!(r.p_value < 0.001);
    }

    #[test]
    fn test_shapiro_normal_scores_look_normal() {
        let n = 50;
        let values: Vec<f64> = (1..=n)
            .map(|i| normal_quantile((i as f64 - 0.5) / n as f64))
            .collect();
        let r = shapiro_wilk(&values).unwrap();
        assert!(r.statistic > 0.97, "W = {}", r.statistic);
        assert!(r.p_value > 0.5, "p = {}", r.p_value);
    }

    #[test]
    fn test_shapiro_skewed_sample_rejected() {
        let values: Vec<f64> = (0..40).map(|i| (i as f64 / 4.0).exp()).collect();
        let r = shapiro_wilk(&values).unwrap();
        assert!(r.p_value < 0.01, "p = {}", r.p_value);
    }

    #[test]
    fn test_shapiro_small_n_paths() {
        assert!(shapiro_wilk(&[1.0, 2.0]).is_err());
        assert!(shapiro_wilk(&[1.0, 1.0, 1.0]).is_err());
        let r3 = shapiro_wilk(&[1.0, 2.0, 3.0]).unwrap();
        assert!((r3.statistic - 1.0).abs() < 1e-9);
        let r5 = shapiro_wilk(&[1.0, 2.0, 3.0, 4.0, 5.5]).unwrap();
        assert!(r5.p_value > 0.0 && r5.p_value <= 1.0);
    }
}
