//! Posterior sampling for Thompson Sampling.

use rand::Rng;
use rand_distr::{Distribution, Gamma};

/// Draw from `Beta(alpha, beta)` as `X / (X + Y)` with `X ~ Gamma(alpha, 1)`
/// and `Y ~ Gamma(beta, 1)`.
///
/// Invalid shapes fall back to the posterior mean so a corrupted arm cannot
/// poison the comparison with NaN.
pub fn beta_sample<R: Rng + ?Sized>(rng: &mut R, alpha: f64, beta: f64) -> f64 {
    let (Some(x), Some(y)) = (gamma_sample(rng, alpha), gamma_sample(rng, beta)) else {
        return posterior_mean(alpha, beta);
    };
    let total = x + y;
    if total > 0.0 && total.is_finite() {
        x / total
    } else {
        posterior_mean(alpha, beta)
    }
}

fn gamma_sample<R: Rng + ?Sized>(rng: &mut R, shape: f64) -> Option<f64> {
    if !(shape.is_finite() && shape > 0.0) {
        return None;
    }
    Gamma::new(shape, 1.0).ok().map(|g| g.sample(rng))
}

fn posterior_mean(alpha: f64, beta: f64) -> f64 {
    let denom = alpha + beta;
    if denom > 0.0 && denom.is_finite() {
        (alpha / denom).clamp(0.0, 1.0)
    } else {
        0.5
    }
}
