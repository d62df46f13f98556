//! Stable log-domain arithmetic for mixture-model training.
//!
//! Every probability in the engine is carried as a natural log; products
//! become sums and sums go through [`log_sum_exp`]. `log(0)` is represented
//! as `-inf` and acts as an explicit mask value: the helpers here never turn
//! a masked term into NaN when it is combined with finite mass.

/// Probability-space tolerance used when checking that trained
/// distributions sum to 1.
pub const PROB_TOLERANCE: f64 = 1e-9;

/// True when `value` equals `expected` within [`PROB_TOLERANCE`].
///
/// Used for normalization checks, where exponentiation and summation leave
/// rounding noise around the exact value.
pub fn tolerant_eq(value: f64, expected: f64) -> bool {
    (value - expected).abs() <= PROB_TOLERANCE
}

/// Stable log(sum(exp(values))) via max-shift.
///
/// Empty input and all-`-inf` input both yield `-inf` (the log of zero
/// total mass). NaN inputs propagate NaN.
pub fn log_sum_exp(values: &[f64]) -> f64 {
    let mut max = f64::NEG_INFINITY;
    for &v in values {
        if v.is_nan() {
            return f64::NAN;
        }
        if v > max {
            max = v;
        }
    }
    if max == f64::NEG_INFINITY || max == f64::INFINITY {
        return max;
    }
    let sum: f64 = values.iter().map(|&v| (v - max).exp()).sum();
    max + sum.ln()
}

/// Stable log(exp(a) + exp(b)).
///
/// A `-inf` operand contributes nothing; `+inf` dominates.
pub fn log_add_exp(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        return f64::NAN;
    }
    if a == f64::NEG_INFINITY {
        return b;
    }
    if b == f64::NEG_INFINITY {
        return a;
    }
    if a == f64::INFINITY || b == f64::INFINITY {
        return f64::INFINITY;
    }
    a.max(b) + (-(a - b).abs()).exp().ln_1p()
}

/// Normalize a slice of log-probabilities in place so they sum to 1 in
/// probability space.
///
/// Returns the log normalizer. When the slice carries no mass at all
/// (empty, all `-inf`, or NaN-contaminated) it is left untouched and `None`
/// is returned; the caller decides whether that is an error.
pub fn normalize_log_probs(values: &mut [f64]) -> Option<f64> {
    let z = log_sum_exp(values);
    if z == f64::NEG_INFINITY || z.is_nan() {
        return None;
    }
    for v in values.iter_mut() {
        *v -= z;
    }
    Some(z)
}
