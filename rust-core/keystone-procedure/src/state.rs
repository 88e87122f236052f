// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! Procedure lifecycle states and the retry policy.
//!
//! # State Machine
//!
//! ```text
//! ┌─────────┐        ┌─────────┐  done   ┌───────────┐
//! │ Pending │ ─────> │ Running │ ──────> │ Completed │
//! └─────────┘        └─────────┘         └───────────┘
//!                     │   ▲   │
//!         step failed │   │   │ exhausted / fatal / cancelled
//!                     ▼   │   ▼
//!               ┌──────────┐ ┌────────┐
//!               │ Retrying │ │ Failed │
//!               └──────────┘ └────────┘
//! ```
//!
//! `Retrying -> Running` is the only cycle. `Completed` and `Failed` are
//! terminal. `Pending` and `Retrying` may also go straight to `Failed` when
//! the procedure is cancelled before it runs again.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ProcedureError;

/// Lifecycle state of a procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcedureState {
    /// Submitted, not yet started.
    Pending,
    /// Executing steps.
    Running,
    /// A step failed; waiting for the retry delay to pass.
    Retrying,
    /// All steps done.
    Completed,
    /// Gave up. The record carries the cause.
    Failed,
}

impl ProcedureState {
    /// `true` for `Completed` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: Self) -> bool {
        use ProcedureState::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Failed)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Retrying)
                | (Retrying, Running)
                | (Retrying, Failed)
        )
    }
}

impl fmt::Display for ProcedureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Retrying => "retrying",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Why a procedure ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProcedureFailure {
    /// A step returned a non-retryable error.
    Step { message: String },
    /// A retryable step error outlasted the retry budget.
    RetryExhausted { attempts: u32, message: String },
    /// Cancelled between steps.
    Cancelled,
    /// The procedure could not be rebuilt from its persisted dump.
    Load { message: String },
    /// A transition could not be written to the log. Never persisted itself.
    Persist { message: String },
}

impl ProcedureFailure {
    /// The recorded cause string.
    pub fn cause(&self) -> &str {
        match self {
            Self::Step { message }
            | Self::RetryExhausted { message, .. }
            | Self::Load { message } => message,
            Self::Cancelled => "cancelled",
            Self::Persist { .. } => "failed to persist procedure state",
        }
    }
}

impl fmt::Display for ProcedureFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.cause())
    }
}

impl From<ProcedureFailure> for ProcedureError {
    fn from(failure: ProcedureFailure) -> Self {
        match failure {
            ProcedureFailure::Step { message } => Self::StepFailed(message),
            ProcedureFailure::RetryExhausted { attempts, message } => Self::RetryExhausted {
                attempts,
                cause: message,
            },
            ProcedureFailure::Cancelled => Self::Cancelled,
            ProcedureFailure::Load { message } => Self::LoadFailed(message),
            ProcedureFailure::Persist { message } => Self::PersistFailed(message),
        }
    }
}

/// Bounded-attempt, fixed-delay retry strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed over the whole procedure, counted across all steps.
    pub max_retry_times: u32,
    /// Fixed wait between attempts.
    pub retry_delay: Duration,
}

impl RetryPolicy {
    /// Default retry budget.
    pub const DEFAULT_MAX_RETRY_TIMES: u32 = 3;
    /// Default wait between attempts.
    pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

    /// Whether another attempt is allowed after `retries_made` retries.
    pub fn should_retry(&self, retries_made: u32) -> bool {
        retries_made < self.max_retry_times
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retry_times: Self::DEFAULT_MAX_RETRY_TIMES,
            retry_delay: Self::DEFAULT_RETRY_DELAY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(ProcedureState::Completed.is_terminal());
        assert!(ProcedureState::Failed.is_terminal());
        assert!(!ProcedureState::Pending.is_terminal());
        assert!(!ProcedureState::Running.is_terminal());
        assert!(!ProcedureState::Retrying.is_terminal());
    }

    #[test]
    fn test_transitions() {
        use ProcedureState::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(Retrying));
        assert!(Retrying.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Failed.can_transition_to(Retrying));
        assert!(!Retrying.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Completed));
    }

    #[test]
    fn test_retry_budget() {
        let policy = RetryPolicy {
            max_retry_times: 2,
            retry_delay: Duration::ZERO,
        };
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));

        let never = RetryPolicy {
            max_retry_times: 0,
            ..Default::default()
        };
        assert!(!never.should_retry(0));
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retry_times, 3);
        assert_eq!(policy.retry_delay, Duration::from_millis(500));
    }

    #[test]
    fn test_failure_causes() {
        let failure = ProcedureFailure::RetryExhausted {
            attempts: 1,
            message: "disk busy".into(),
        };
        assert_eq!(failure.cause(), "disk busy");
        assert_eq!(ProcedureFailure::Cancelled.cause(), "cancelled");
        assert!(matches!(
            ProcedureError::from(failure),
            ProcedureError::RetryExhausted { attempts: 1, .. }
        ));
    }

    #[test]
    fn test_state_serializes_snake_case() {
        let json = serde_json::to_string(&ProcedureState::Retrying).unwrap();
        assert_eq!(json, "\"retrying\"");
    }
}
