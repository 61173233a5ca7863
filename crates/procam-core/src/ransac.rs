//! Generic, model-agnostic RANSAC engine.
//!
//! Implement [`Estimator`] for a geometric model and call [`ransac`]. The
//! engine never panics: with insufficient data or no consensus it returns
//! `None`.

use rand::rngs::StdRng;
use rand::SeedableRng;

/// Configuration for the RANSAC engine.
#[derive(Debug, Clone)]
pub struct RansacOptions {
    /// Maximum number of iterations.
    pub max_iters: usize,
    /// Inlier residual threshold, in the units of [`Estimator::residual`].
    pub thresh: f64,
    /// Minimum number of inliers required to accept a model.
    pub min_inliers: usize,
    /// Desired confidence in `[0, 1]` for the adaptive iteration bound.
    pub confidence: f64,
    /// Seed for reproducible sampling.
    pub seed: u64,
}

impl Default for RansacOptions {
    fn default() -> Self {
        Self {
            max_iters: 500,
            thresh: 2.0,
            min_inliers: 12,
            confidence: 0.99,
            seed: 1_234_567,
        }
    }
}

/// A consensus model together with its supporting data.
#[derive(Debug, Clone)]
pub struct RansacEstimate<M> {
    pub model: M,
    /// Indices of inlier data points.
    pub inliers: Vec<usize>,
    /// Root-mean-square residual over the inliers.
    pub inlier_rms: f64,
    /// Iterations actually performed.
    pub iters: usize,
}

/// Minimal-sample model estimator consumed by [`ransac`].
pub trait Estimator {
    type Datum;
    type Model;

    /// Number of samples needed to fit one candidate model.
    const MIN_SAMPLES: usize;

    /// Fit a model from a sample subset; `None` when the subset is degenerate.
    fn fit(data: &[Self::Datum], sample_indices: &[usize]) -> Option<Self::Model>;

    /// Non-negative residual of one datum under a model.
    fn residual(model: &Self::Model, datum: &Self::Datum) -> f64;
}

/// Adaptive iteration bound from the current inlier ratio.
fn required_iterations(confidence: f64, inlier_ratio: f64, min_samples: usize, cap: usize) -> usize {
    if confidence <= 0.0 || inlier_ratio <= 0.0 {
        return cap;
    }
    let denom = (1.0 - inlier_ratio.powf(min_samples as f64)).max(1e-12).ln();
    if denom >= 0.0 {
        return cap;
    }
    let n = ((1.0 - confidence).ln() / denom).ceil();
    (n as usize).min(cap)
}

/// Run the RANSAC loop for an [`Estimator`] implementation.
pub fn ransac<E: Estimator>(data: &[E::Datum], opts: &RansacOptions) -> Option<RansacEstimate<E::Model>> {
    if data.len() < E::MIN_SAMPLES || data.len() < opts.min_inliers {
        return None;
    }

    let mut rng = StdRng::seed_from_u64(opts.seed);
    let mut best: Option<RansacEstimate<E::Model>> = None;
    let mut iter_bound = opts.max_iters;

    let mut iters = 0;
    while iters < iter_bound {
        iters += 1;

        let sample: Vec<usize> = rand::seq::index::sample(&mut rng, data.len(), E::MIN_SAMPLES).into_vec();
        let Some(model) = E::fit(data, &sample) else {
            continue;
        };

        let mut inliers = Vec::with_capacity(data.len());
        let mut sum_sq = 0.0;
        for (i, datum) in data.iter().enumerate() {
            let r = E::residual(&model, datum);
            if r <= opts.thresh {
                inliers.push(i);
                sum_sq += r * r;
            }
        }

        if inliers.len() < opts.min_inliers {
            continue;
        }

        let rms = (sum_sq / inliers.len() as f64).sqrt();
        let better = match &best {
            None => true,
            Some(b) => {
                inliers.len() > b.inliers.len()
                    || (inliers.len() == b.inliers.len() && rms < b.inlier_rms)
            }
        };
        if better {
            let ratio = inliers.len() as f64 / data.len() as f64;
            iter_bound =
                required_iterations(opts.confidence, ratio, E::MIN_SAMPLES, opts.max_iters)
                    .max(iters);
            best = Some(RansacEstimate {
                model,
                inliers,
                inlier_rms: rms,
                iters,
            });
        }
    }

    best
}
