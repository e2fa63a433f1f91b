//! Failure injection for the management API transport.
//!
//! Lets test fleets exercise the controller against loud and silent power
//! management failures. The dice is built once from configuration and
//! shared by every management API client; a fixed seed makes a run
//! reproducible.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Mutex, PoisonError};

/// Result of a roll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// The call must fail with an error
    ExplicitFailure,
    /// The call must pretend to succeed without doing anything
    SilentFailure,
    NoFailure,
}

/// Weighted three-outcome sampler.
#[derive(Debug)]
pub struct FailureDice {
    /// Cumulative thresholds: `[p_explicit, p_explicit + p_silent]`
    rates: [f64; 2],
    rng: Mutex<StdRng>,
}

impl FailureDice {
    /// Creates a dice with the given failure probabilities and seed.
    #[must_use]
    pub fn new(p_explicit: f64, p_silent: f64, seed: u64) -> Self {
        let p_explicit = p_explicit.clamp(0.0, 1.0);
        let p_silent = p_silent.clamp(0.0, 1.0);
        Self {
            rates: [p_explicit, p_explicit + p_silent],
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// A dice that never fails.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(0.0, 0.0, 0)
    }

    /// Whether any failure can be produced at all.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.rates[1] > 0.0
    }

    /// Maps a uniform sample in `[0, 1)` to an outcome.
    #[must_use]
    pub fn outcome_for(&self, sample: f64) -> FailureOutcome {
        if sample < self.rates[0] {
            FailureOutcome::ExplicitFailure
        } else if sample < self.rates[1] {
            FailureOutcome::SilentFailure
        } else {
            FailureOutcome::NoFailure
        }
    }

    /// Draws the next outcome.
    pub fn roll(&self) -> FailureOutcome {
        if !self.is_enabled() {
            return FailureOutcome::NoFailure;
        }
        let sample = self.rng.lock().unwrap_or_else(PoisonError::into_inner).gen_range(0.0..1.0);
        self.outcome_for(sample)
    }

    /// A plausible but arbitrary boolean, used to fake a power status.
    pub fn flip(&self) -> bool {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).gen_bool(0.5)
    }
}

impl Default for FailureDice {
    fn default() -> Self {
        Self::disabled()
    }
}
