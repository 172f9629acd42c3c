use rand::{rngs::StdRng, SeedableRng};
use rand_distr::LogNormal;

/// Convert mean and standard deviation to log-normal distribution parameters
/// Returns (μ, σ) for LogNormal(μ, σ) that approximates the given mean and stddev
///
/// For LogNormal(μ, σ):
/// - E[X] = exp(μ + σ²/2)
/// - Var[X] = (exp(σ²) - 1) * exp(2μ + σ²)
fn lognormal_from_mean_stddev(mean: f64, stddev: f64) -> (f64, f64) {
    let variance = stddev * stddev;
    let sigma_squared = (1.0 + variance / (mean * mean)).ln();
    let sigma = sigma_squared.sqrt();
    let mu = mean.ln() - sigma_squared / 2.0;
    (mu, sigma)
}

/// Create a log-normal distribution from mean and standard deviation
/// Returns None when the parameters do not describe a valid distribution (non-positive mean)
pub fn lognormal_dist(mean: f64, stddev: f64) -> Option<LogNormal<f64>> {
    if !(mean > 0.0) || !stddev.is_finite() || stddev < 0.0 {
        return None;
    }
    let (mu, sigma) = lognormal_from_mean_stddev(mean, stddev);
    LogNormal::new(mu, sigma).ok()
}

/// Independent RNG stream derived from the run seed
/// Different streams keep e.g. tie-breaking and debug sampling from disturbing each other
pub fn seeded_rng(seed: u64, stream: u64) -> StdRng {
    StdRng::seed_from_u64(seed.wrapping_mul(0x9E37_79B9_7F4A_7C15).wrapping_add(stream))
}
