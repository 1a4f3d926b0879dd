//! Descriptive statistics, significance tests and regret over outcome values.
//!
//! Everything here is pure and recomputed on every call; summaries are never
//! cached because the outcome log only grows.

use experiment_core::types::Arm;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Two-sided 95% normal critical value.
pub const Z_95: f64 = 1.96;

pub const SIGNIFICANCE_LEVEL: f64 = 0.05;

/// Percentiles reported by [`summarize`].
pub const PERCENTILES: [u32; 6] = [25, 50, 75, 90, 95, 99];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
}

impl ConfidenceInterval {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MetricSummary {
    pub count: u64,
    pub sum: f64,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub percentiles: BTreeMap<u32, f64>,
    pub confidence_interval: ConfidenceInterval,
}

/// Summarize a set of values. Non-finite values are ignored.
///
/// The standard deviation is the population form (divides by `n`). The
/// interval is the normal approximation `mean ± 1.96 · sd / √n`, meant as a
/// rough signal rather than a rigorous bound.
pub fn summarize(values: &[f64]) -> MetricSummary {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return MetricSummary {
            percentiles: PERCENTILES.iter().map(|&p| (p, 0.0)).collect(),
            ..MetricSummary::default()
        };
    }
    sorted.sort_by(f64::total_cmp);

    let n = sorted.len() as f64;
    let sum: f64 = sorted.iter().sum();
    let mean = sum / n;
    let variance = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();
    let margin = Z_95 * std_dev / n.sqrt();

    MetricSummary {
        count: sorted.len() as u64,
        sum,
        mean,
        std_dev,
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        percentiles: PERCENTILES
            .iter()
            .map(|&p| (p, percentile(&sorted, f64::from(p) / 100.0)))
            .collect(),
        confidence_interval: ConfidenceInterval {
            lower: mean - margin,
            upper: mean + margin,
        },
    }
}

/// Linear interpolation between the two sorted values bracketing `p * (n - 1)`.
/// `sorted` must be ascending; `p` is a fraction in `[0, 1]`.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let index = p.clamp(0.0, 1.0) * (n - 1) as f64;
            let lower = index.floor() as usize;
            let upper = index.ceil() as usize;
            let fraction = index - lower as f64;
            sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatisticalTest {
    pub t_statistic: f64,
    pub degrees_of_freedom: f64,
    /// Heuristic, see [`approximate_p_value`].
    pub p_value: f64,
    /// Cohen's d using the pooled standard deviation.
    pub effect_size: f64,
    /// `(treatment - control) / control`, 0 when the control mean is 0.
    pub relative_lift: f64,
    pub is_significant: bool,
}

impl StatisticalTest {
    fn inconclusive(relative_lift: f64) -> Self {
        Self {
            t_statistic: 0.0,
            degrees_of_freedom: 0.0,
            p_value: 1.0,
            effect_size: 0.0,
            relative_lift,
            is_significant: false,
        }
    }
}

/// Welch two-sample comparison of treatment against control at the 5% level.
pub fn compare_variants(control: &MetricSummary, treatment: &MetricSummary) -> StatisticalTest {
    compare_variants_at(control, treatment, SIGNIFICANCE_LEVEL)
}

pub fn compare_variants_at(
    control: &MetricSummary,
    treatment: &MetricSummary,
    significance_level: f64,
) -> StatisticalTest {
    let diff = treatment.mean - control.mean;
    let relative_lift = if control.mean != 0.0 {
        diff / control.mean
    } else {
        0.0
    };
    if control.count == 0 || treatment.count == 0 {
        return StatisticalTest::inconclusive(relative_lift);
    }

    let n1 = control.count as f64;
    let n2 = treatment.count as f64;
    let v1 = control.std_dev.powi(2);
    let v2 = treatment.std_dev.powi(2);
    let se1 = v1 / n1;
    let se2 = v2 / n2;
    let se = (se1 + se2).sqrt();
    if se <= 0.0 || !se.is_finite() {
        return StatisticalTest::inconclusive(relative_lift);
    }

    let t = diff / se;

    // Welch–Satterthwaite; a single-observation side contributes no term.
    let term = |s: f64, n: f64| if n > 1.0 { s.powi(2) / (n - 1.0) } else { 0.0 };
    let df_denominator = term(se1, n1) + term(se2, n2);
    let degrees_of_freedom = if df_denominator > 0.0 {
        (se1 + se2).powi(2) / df_denominator
    } else {
        (n1 + n2 - 2.0).max(0.0)
    };

    let pooled_df = n1 + n2 - 2.0;
    let pooled_sd = if pooled_df > 0.0 {
        (((n1 - 1.0) * v1 + (n2 - 1.0) * v2) / pooled_df).sqrt()
    } else {
        0.0
    };
    let effect_size = if pooled_sd > 0.0 { diff / pooled_sd } else { 0.0 };

    let p_value = approximate_p_value(t);
    StatisticalTest {
        t_statistic: t,
        degrees_of_freedom,
        p_value,
        effect_size,
        relative_lift,
        is_significant: p_value < significance_level,
    }
}

/// Linear heuristic `clamp(2 · (1 − |t| / 3), 0, 1)`.
///
/// This is NOT a Student-t CDF lookup: it reaches 0 at |t| = 3 regardless of
/// degrees of freedom, and crosses 0.05 near |t| ≈ 2.93. Treat it as a coarse
/// ranking signal.
pub fn approximate_p_value(t: f64) -> f64 {
    if !t.is_finite() {
        return if t.is_nan() { 1.0 } else { 0.0 };
    }
    (2.0 * (1.0 - t.abs() / 3.0)).clamp(0.0, 1.0)
}

/// Two-sided p-value of a pooled two-proportion z-test.
pub fn two_proportion_z_test(x1: u64, n1: u64, x2: u64, n2: u64) -> f64 {
    if n1 == 0 || n2 == 0 {
        return 1.0;
    }
    let p1 = x1 as f64 / n1 as f64;
    let p2 = x2 as f64 / n2 as f64;
    let p = (x1 + x2) as f64 / (n1 + n2) as f64;
    let se = (p * (1.0 - p) * (1.0 / n1 as f64 + 1.0 / n2 as f64)).sqrt();
    if se == 0.0 {
        return 1.0;
    }
    let z = (p1 - p2).abs() / se;
    (2.0 * (1.0 - normal_cdf(z))).clamp(0.0, 1.0)
}

/// Standard normal CDF (Abramowitz & Stegun 26.2.17, |error| < 7.5e-8).
pub fn normal_cdf(x: f64) -> f64 {
    let z = x.abs();
    let t = 1.0 / (1.0 + 0.2316419 * z);
    let density = 0.3989422804014327 * (-z * z / 2.0).exp();
    let tail = density
        * (t * (0.319381530
            + t * (-0.356563782 + t * (1.781477937 + t * (-1.821255978 + t * 1.330274429)))));
    if x >= 0.0 {
        1.0 - tail
    } else {
        tail
    }
}

/// Inverse standard normal CDF (Acklam's rational approximation).
/// Returns ±infinity at the endpoints and NaN outside `[0, 1]`.
pub fn normal_quantile(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969683028665376e+01,
        2.209460984245205e+02,
        -2.759285104469687e+02,
        1.383577518672690e+02,
        -3.066479806614716e+01,
        2.506628277459239e+00,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e+01,
        1.615858368580409e+02,
        -1.556989798598866e+02,
        6.680131188771972e+01,
        -1.328068155288572e+01,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-03,
        -3.223964580411365e-01,
        -2.400758277161838e+00,
        -2.549732539343734e+00,
        4.374664141464968e+00,
        2.938163982698783e+00,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-03,
        3.224671290700398e-01,
        2.445134137142996e+00,
        3.754408661907416e+00,
    ];
    const P_LOW: f64 = 0.02425;

    if !(0.0..=1.0).contains(&p) {
        return f64::NAN;
    }
    if p == 0.0 {
        return f64::NEG_INFINITY;
    }
    if p == 1.0 {
        return f64::INFINITY;
    }

    let tail = |q: f64| {
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    };

    if p < P_LOW {
        tail((-2.0 * p.ln()).sqrt())
    } else if p > 1.0 - P_LOW {
        -tail((-2.0 * (1.0 - p).ln()).sqrt())
    } else {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    }
}

/// Normal-approximation binomial interval, clamped to `[0, 1]`.
/// With no trials the rate is unknown, so the interval spans `[0, 1]`.
pub fn proportion_interval(successes: u64, trials: u64, z: f64) -> ConfidenceInterval {
    if trials == 0 {
        return ConfidenceInterval {
            lower: 0.0,
            upper: 1.0,
        };
    }
    let rate = successes as f64 / trials as f64;
    let margin = z * (rate * (1.0 - rate) / trials as f64).sqrt();
    ConfidenceInterval {
        lower: (rate - margin).max(0.0),
        upper: (rate + margin).min(1.0),
    }
}

/// Units needed per variant to detect an absolute lift of `mde` over
/// `baseline_rate` with a two-sided test. `None` when the inputs cannot
/// describe a conversion rate experiment.
pub fn required_sample_size(
    baseline_rate: f64,
    mde: f64,
    confidence_level: f64,
    power: f64,
) -> Option<u64> {
    if !(baseline_rate > 0.0 && baseline_rate < 1.0) || !(mde > 0.0) {
        return None;
    }
    if !(confidence_level > 0.0 && confidence_level < 1.0) || !(power > 0.0 && power < 1.0) {
        return None;
    }
    let treated = (baseline_rate + mde).min(1.0 - f64::EPSILON);
    let z_alpha = normal_quantile(1.0 - (1.0 - confidence_level) / 2.0);
    let z_beta = normal_quantile(power);
    let variance = baseline_rate * (1.0 - baseline_rate) + treated * (1.0 - treated);
    let n = (z_alpha + z_beta).powi(2) * variance / (treated - baseline_rate).powi(2);
    Some(n.ceil() as u64)
}

/// Opportunity cost of this arm's pulls against the best observed rate.
pub fn regret(arm: &Arm, best_observed_rate: f64) -> f64 {
    (best_observed_rate - arm.success_rate()) * arm.pulls as f64
}

/// Best observed success rate across `arms`, 0 when none has been pulled.
pub fn best_observed_rate(arms: &[Arm]) -> f64 {
    arms.iter().map(Arm::success_rate).fold(0.0, f64::max)
}

/// Sum of [`regret`] over all arms against the best rate among them.
pub fn total_regret(arms: &[Arm]) -> f64 {
    let best = best_observed_rate(arms);
    arms.iter().map(|arm| regret(arm, best)).sum()
}
