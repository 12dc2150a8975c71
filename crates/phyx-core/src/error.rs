//! # Errors and Diagnostics
//!
//! Plan enumeration distinguishes three outcomes for anything that goes wrong:
//!
//! - **Soft infeasibility**: a candidate shape cannot be built. This is never an
//!   error; enumerators return an empty candidate set and attachment returns
//!   `Task::Invalid`.
//! - **Diagnostics**: inapplicable or conflicting hints and MPP push-down blockers.
//!   These are appended to the statement's warning sink (see `context`) as
//!   [`PlanWarning`] values and compilation continues.
//! - **Hard errors**: [`PlanError`]. Internal invariant violations, malformed plans,
//!   cancellation and timeouts abort compilation of the statement.
//!
//! Every error and warning carries an [`ErrorCode`] with a stable string identifier
//! and a MySQL-compatible errno, so callers can match on codes instead of messages.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifying code for errors and warnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    InternalInvariant,
    MalformedPlan,
    Cancelled,
    Timeout,
    InvalidConfig,
    HintInapplicable,
    HintConflict,
    MppBlocked,
    PushdownIneligible,
    /// A request the chosen operator cannot honour, outside of any hint.
    Unsupported,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InternalInvariant => "internal-invariant",
            ErrorCode::MalformedPlan => "malformed-plan",
            ErrorCode::Cancelled => "cancelled",
            ErrorCode::Timeout => "timeout",
            ErrorCode::InvalidConfig => "invalid-config",
            ErrorCode::HintInapplicable => "hint-inapplicable",
            ErrorCode::HintConflict => "hint-conflict",
            ErrorCode::MppBlocked => "mpp-blocked",
            ErrorCode::PushdownIneligible => "pushdown-ineligible",
            ErrorCode::Unsupported => "unsupported",
        }
    }

    /// MySQL-style error number reported to clients.
    pub fn errno(&self) -> u16 {
        match self {
            ErrorCode::Cancelled => 1317,
            ErrorCode::Timeout => 3024,
            ErrorCode::MppBlocked | ErrorCode::PushdownIneligible | ErrorCode::Unsupported => 1105,
            ErrorCode::InvalidConfig => 1231,
            ErrorCode::InternalInvariant
            | ErrorCode::MalformedPlan
            | ErrorCode::HintInapplicable
            | ErrorCode::HintConflict => 1815,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hard errors. Any of these aborts compilation of the current statement.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlanError {
    #[error("internal invariant violated: {0}")]
    Internal(String),

    #[error("malformed plan: {0}")]
    MalformedPlan(String),

    #[error("query execution was interrupted")]
    Cancelled,

    #[error("plan compilation exceeded the {0} ms time budget")]
    Timeout(u64),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PlanError {
    pub fn code(&self) -> ErrorCode {
        match self {
            PlanError::Internal(_) => ErrorCode::InternalInvariant,
            PlanError::MalformedPlan(_) => ErrorCode::MalformedPlan,
            PlanError::Cancelled => ErrorCode::Cancelled,
            PlanError::Timeout(_) => ErrorCode::Timeout,
            PlanError::InvalidConfig(_) => ErrorCode::InvalidConfig,
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        PlanError::Internal(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        PlanError::MalformedPlan(msg.into())
    }
}

pub type PlanResult<T> = Result<T, PlanError>;

/// A diagnostic appended to the statement's warning list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlanWarning {
    pub code: ErrorCode,
    pub message: String,
}

impl PlanWarning {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for PlanWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(PlanError::Cancelled.code().errno(), 1317);
        assert_eq!(PlanError::Timeout(10).code().as_str(), "timeout");
        assert_eq!(
            PlanError::internal("equal-condition count mismatch").code(),
            ErrorCode::InternalInvariant
        );
    }

    #[test]
    fn test_warning_display() {
        let w = PlanWarning::new(ErrorCode::HintConflict, "conflict");
        assert_eq!(w.to_string(), "[hint-conflict] conflict");
    }
}
