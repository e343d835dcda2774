use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry policy for generator calls.
///
/// The delay is a fixed constant, identical for every attempt — there is
/// no exponential growth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts allowed, including the first.
    pub max_retries: u32,
    /// Fixed pause between attempts in milliseconds.
    pub delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay_ms: 5000,
        }
    }
}

impl RetryPolicy {
    /// The fixed pause before the next attempt.
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Where a single file's dispatch currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    /// Attempt `n` (1-based) is in flight or about to start.
    Attempting(u32),
    /// Terminal: all done, successfully or not.
    Done { success: bool },
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchState::Attempting(n) => write!(f, "ATTEMPTING({n})"),
            DispatchState::Done { success: true } => write!(f, "DONE(success)"),
            DispatchState::Done { success: false } => write!(f, "DONE(failed)"),
        }
    }
}

/// The result of one generator call, after folding transport errors,
/// in-band errors, and unfetchable artifacts into a single failure signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Failure(String),
}

/// The machine's reaction to an attempt outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Sleep the fixed delay, then run attempt `next_attempt`.
    Retry { next_attempt: u32, reason: String },
    /// Terminal outcome reached; exactly one result record follows.
    Complete { success: bool },
}

/// Drives one file through `Attempting(1) … Attempting(n) → Done`.
#[derive(Debug)]
pub struct RetryMachine {
    policy: RetryPolicy,
    state: DispatchState,
    attempts_made: u32,
}

impl RetryMachine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            state: DispatchState::Attempting(1),
            attempts_made: 0,
        }
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    /// Attempts consumed so far, including the one just reported.
    pub fn attempts(&self) -> u32 {
        self.attempts_made
    }

    /// Record the outcome of the current attempt and compute the transition.
    pub fn next(&mut self, outcome: AttemptOutcome) -> Transition {
        match self.state {
            DispatchState::Attempting(n) => {
                self.attempts_made = n;
                match outcome {
                    AttemptOutcome::Success => {
                        self.state = DispatchState::Done { success: true };
                        Transition::Complete { success: true }
                    }
                    AttemptOutcome::Failure(reason) => {
                        if n < self.policy.max_retries {
                            self.state = DispatchState::Attempting(n + 1);
                            Transition::Retry {
                                next_attempt: n + 1,
                                reason,
                            }
                        } else {
                            self.state = DispatchState::Done { success: false };
                            Transition::Complete { success: false }
                        }
                    }
                }
            }
            DispatchState::Done { success } => Transition::Complete { success },
        }
    }
}
