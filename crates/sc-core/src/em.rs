//! Log-space EM training for the latent-class mixture model.
//!
//! The model: each user belongs to an unobserved class `k` with prior
//! `P(Y=k)`; conditioned on class, each feature's score is an independent
//! categorical draw from `P(R_f = s | Y=k)`. Unrated cells are missing at
//! random and marginalize out of the per-user likelihood, so only rated
//! features contribute evidence.
//!
//! All parameters are carried as natural logs. `-inf` is the mask for zero
//! mass; the update formulas combine terms with [`log_add_exp`] and
//! [`log_sum_exp`] so masked contributions never become NaN.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use sc_math::{log_add_exp, log_sum_exp, normalize_log_probs, tolerant_eq};

use crate::error::{Error, Result};
use crate::matrix::{RatingMatrix, SCORE_LEVELS, UNRATED};

/// Fixed default seed; refitting the same data must reproduce the same
/// parameters bit for bit.
pub const DEFAULT_SEED: u64 = 0x4f6d_6165_5761_4d6f;
/// Default number of latent user classes.
pub const DEFAULT_CLASSES: usize = 15;
/// Default EM iteration count. Termination is a fixed count rather than a
/// convergence threshold; together with the fixed seed this makes every
/// fit deterministic.
pub const DEFAULT_ITERATIONS: usize = 128;

/// Bounds on the stick-breaking fractions used for the random emission
/// initialization. Staying away from 0 and 1 avoids near-degenerate draws.
const MIN_INITIAL_FRAC: f64 = 0.1;
const MAX_INITIAL_FRAC: f64 = 0.9;

/// Slack for the non-decreasing likelihood check. EM is monotone in exact
/// arithmetic; this absorbs floating-point rounding only.
const LIKELIHOOD_SLACK: f64 = 1e-9;

/// Training hyperparameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmConfig {
    /// Number of latent classes K.
    pub classes: usize,
    /// Number of EM update iterations.
    pub iterations: usize,
    /// Seed for the emission-table initialization.
    pub seed: u64,
}

impl Default for EmConfig {
    fn default() -> Self {
        Self {
            classes: DEFAULT_CLASSES,
            iterations: DEFAULT_ITERATIONS,
            seed: DEFAULT_SEED,
        }
    }
}

impl EmConfig {
    pub fn validate(&self) -> Result<()> {
        if self.classes == 0 {
            return Err(Error::InvalidConfig("classes must be at least 1".into()));
        }
        if self.iterations == 0 {
            return Err(Error::InvalidConfig("iterations must be at least 1".into()));
        }
        Ok(())
    }
}

/// K x F x S table of log emission probabilities `log P(R_f = s | Y=k)`.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEmission {
    classes: usize,
    features: usize,
    data: Vec<f64>,
}

impl LogEmission {
    fn filled(classes: usize, features: usize, value: f64) -> Self {
        Self {
            classes,
            features,
            data: vec![value; classes * features * SCORE_LEVELS],
        }
    }

    #[inline]
    fn offset(&self, class: usize, feature: usize) -> usize {
        (class * self.features + feature) * SCORE_LEVELS
    }

    /// `log P(R_feature = shifted | Y=class)`.
    #[inline]
    pub fn get(&self, class: usize, feature: usize, shifted: usize) -> f64 {
        self.data[self.offset(class, feature) + shifted]
    }

    /// The score distribution for one (class, feature) pair.
    pub fn row(&self, class: usize, feature: usize) -> &[f64] {
        let start = self.offset(class, feature);
        &self.data[start..start + SCORE_LEVELS]
    }

    fn row_mut(&mut self, class: usize, feature: usize) -> &mut [f64] {
        let start = self.offset(class, feature);
        &mut self.data[start..start + SCORE_LEVELS]
    }

    pub fn classes(&self) -> usize {
        self.classes
    }

    pub fn features(&self) -> usize {
        self.features
    }
}

/// A trained mixture: log class priors plus per-class, per-feature
/// categorical emissions. Frozen once [`fit`] returns.
#[derive(Debug, Clone)]
pub struct MixtureModel {
    log_prior: Vec<f64>,
    emission: LogEmission,
    log_likelihood_trace: Vec<f64>,
}

impl MixtureModel {
    pub fn classes(&self) -> usize {
        self.log_prior.len()
    }

    /// `log P(Y=k)` for every class.
    pub fn log_prior(&self) -> &[f64] {
        &self.log_prior
    }

    pub fn emission(&self) -> &LogEmission {
        &self.emission
    }

    /// Average per-user log-likelihood at initialization and after every
    /// iteration, in order. Non-decreasing by construction.
    pub fn log_likelihood_trace(&self) -> &[f64] {
        &self.log_likelihood_trace
    }

    /// Log posterior over classes for one user row: the E-step formula
    /// `log P(Y=k | ratings)` with unrated cells marginalized out.
    pub fn log_class_posterior(&self, row: &[u8]) -> Result<Vec<f64>> {
        let mut logq = log_joint(row, &self.log_prior, &self.emission);
        if normalize_log_probs(&mut logq).is_none() {
            return Err(Error::NumericalInstability(
                "user class posterior has no probability mass".into(),
            ));
        }
        Ok(logq)
    }

    fn validate(&self) -> Result<()> {
        let prior_sum: f64 = self.log_prior.iter().map(|p| p.exp()).sum();
        if prior_sum.is_nan() {
            return Err(Error::NumericalInstability("NaN in class prior".into()));
        }
        if !tolerant_eq(prior_sum, 1.0) {
            return Err(Error::Unnormalized {
                table: "class prior",
                sum: prior_sum,
            });
        }
        for class in 0..self.emission.classes() {
            for feature in 0..self.emission.features() {
                let row = self.emission.row(class, feature);
                let sum: f64 = row.iter().map(|p| p.exp()).sum();
                if sum.is_nan() {
                    return Err(Error::NumericalInstability(format!(
                        "NaN in emission table at class {class}, feature {feature}"
                    )));
                }
                if !tolerant_eq(sum, 1.0) {
                    return Err(Error::Unnormalized {
                        table: "emission distribution",
                        sum,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Fit a K-class mixture to a dense rating matrix.
///
/// Runs `config.iterations` EM updates from a deterministic random
/// initialization, enforcing the non-decreasing likelihood invariant after
/// every step, and validates the returned tables are normalized and
/// NaN-free.
pub fn fit(matrix: &RatingMatrix, config: &EmConfig) -> Result<MixtureModel> {
    config.validate()?;
    let users = matrix.users();
    let features = matrix.features();
    if users == 0 || features == 0 {
        return Err(Error::EmptyTrainingSet { users, features });
    }
    let classes = config.classes;

    // Uniform prior, random simplex per (class, feature) emission row.
    let mut log_prior = vec![-(classes as f64).ln(); classes];
    let mut emission = initial_emission(classes, features, config.seed);

    let mut trace = Vec::with_capacity(config.iterations + 1);
    trace.push(average_log_likelihood(matrix, &log_prior, &emission));

    for iteration in 1..=config.iterations {
        let gamma = e_step(matrix, &log_prior, &emission)?;
        let (next_prior, next_emission) = m_step(matrix, &gamma, &emission, classes);
        log_prior = next_prior;
        emission = next_emission;

        let current = average_log_likelihood(matrix, &log_prior, &emission);
        let previous = trace[trace.len() - 1];
        // NaN fails this comparison and is caught here as well.
        if !(current >= previous - LIKELIHOOD_SLACK) {
            return Err(Error::LikelihoodDecreased {
                iteration,
                previous,
                current,
            });
        }
        debug!(iteration, log_likelihood = current, "em iteration complete");
        trace.push(current);
    }

    let model = MixtureModel {
        log_prior,
        emission,
        log_likelihood_trace: trace,
    };
    model.validate()?;
    Ok(model)
}

/// Unnormalized log joint `log P(Y=k) + sum over rated f of
/// log P(R_f = r_f | Y=k)` for a single user row.
fn log_joint(row: &[u8], log_prior: &[f64], emission: &LogEmission) -> Vec<f64> {
    let mut logq = log_prior.to_vec();
    for (feature, &cell) in row.iter().enumerate() {
        if cell == UNRATED {
            continue;
        }
        let shifted = cell as usize;
        for (class, q) in logq.iter_mut().enumerate() {
            *q += emission.get(class, feature, shifted);
        }
    }
    logq
}

/// Average per-user log-likelihood of the observed ratings.
fn average_log_likelihood(matrix: &RatingMatrix, log_prior: &[f64], emission: &LogEmission) -> f64 {
    let users = matrix.users();
    let mut total = 0.0;
    for user in 0..users {
        total += log_sum_exp(&log_joint(matrix.row(user), log_prior, emission));
    }
    total / users as f64
}

/// E-step: log responsibilities `gamma[t][k] = log P(Y=k | user t)`,
/// flattened row-major over users.
fn e_step(matrix: &RatingMatrix, log_prior: &[f64], emission: &LogEmission) -> Result<Vec<f64>> {
    let users = matrix.users();
    let classes = log_prior.len();
    let mut gamma = Vec::with_capacity(users * classes);
    for user in 0..users {
        let mut logq = log_joint(matrix.row(user), log_prior, emission);
        if normalize_log_probs(&mut logq).is_none() {
            // Every class assigns zero probability to one of this user's
            // ratings; the responsibilities would be 0/0.
            return Err(Error::NumericalInstability(format!(
                "user {user} has zero likelihood under every class"
            )));
        }
        gamma.extend_from_slice(&logq);
    }
    Ok(gamma)
}

/// M-step: re-estimate priors and emissions from the responsibilities.
///
/// Rated cells contribute their responsibility mass to the matching score
/// bucket; unrated cells contribute their mass spread by the *current*
/// emission row (self-consistent imputation of the missing entries).
fn m_step(
    matrix: &RatingMatrix,
    gamma: &[f64],
    emission: &LogEmission,
    classes: usize,
) -> (Vec<f64>, LogEmission) {
    let users = matrix.users();
    let features = emission.features();

    // log sum over users of gamma[t][k], per class.
    let mut class_mass = vec![f64::NEG_INFINITY; classes];
    let mut column = vec![0.0; users];
    for (class, mass) in class_mass.iter_mut().enumerate() {
        for (user, slot) in column.iter_mut().enumerate() {
            *slot = gamma[user * classes + class];
        }
        *mass = log_sum_exp(&column);
    }

    let log_users = (users as f64).ln();
    let log_prior: Vec<f64> = class_mass.iter().map(|m| m - log_users).collect();

    let mut next = LogEmission::filled(classes, features, f64::NEG_INFINITY);
    for class in 0..classes {
        for feature in 0..features {
            let mut rated = [f64::NEG_INFINITY; SCORE_LEVELS];
            let mut unrated = f64::NEG_INFINITY;
            for user in 0..users {
                let g = gamma[user * classes + class];
                match matrix.rated(user, feature) {
                    Some(shifted) => {
                        let slot = &mut rated[shifted as usize];
                        *slot = log_add_exp(*slot, g);
                    }
                    None => unrated = log_add_exp(unrated, g),
                }
            }

            let row = next.row_mut(class, feature);
            for (shifted, slot) in row.iter_mut().enumerate() {
                *slot = log_add_exp(
                    rated[shifted],
                    unrated + emission.get(class, feature, shifted),
                );
            }
            if normalize_log_probs(row).is_none() {
                // No responsibility mass reached this cell at all; keep
                // the previous distribution instead of emitting NaN.
                warn!(class, feature, "degenerate emission update, keeping previous row");
                row.copy_from_slice(emission.row(class, feature));
            }
        }
    }

    (log_prior, next)
}

/// Random emission initialization: for every (class, feature) row, peel a
/// uniform random fraction of the remaining probability mass off for each
/// score in turn, giving the last score whatever is left.
fn initial_emission(classes: usize, features: usize, seed: u64) -> LogEmission {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut emission = LogEmission::filled(classes, features, f64::NEG_INFINITY);
    for class in 0..classes {
        for feature in 0..features {
            let row = emission.row_mut(class, feature);
            let mut remaining = 1.0_f64;
            for slot in row.iter_mut().take(SCORE_LEVELS - 1) {
                let p = remaining * rng.random_range(MIN_INITIAL_FRAC..MAX_INITIAL_FRAC);
                *slot = p.ln();
                remaining -= p;
            }
            row[SCORE_LEVELS - 1] = remaining.ln();
        }
    }
    emission
}
