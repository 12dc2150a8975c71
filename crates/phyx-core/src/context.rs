//! # Compilation Context
//!
//! A [`PlanContext`] is created for one statement compilation and threaded by
//! reference through every enumerator and the driver. It bundles the read-only
//! inputs (session variables, the column side table, the statistics oracle) with
//! the statement's append-only warning sink and its cancellation state.
//!
//! ## Interruption
//!
//! Enumeration is synchronous and never suspends. The driver calls
//! [`PlanContext::check_cancelled`] before every sub-enumeration; a raised cancel
//! flag or an expired deadline aborts compilation with [`PlanError::Cancelled`] or
//! [`PlanError::Timeout`]. No partial plan is ever returned.
//!
//! ## Warnings
//!
//! Warnings keep insertion order, so two runs over the same input report
//! identical lists. Hint diagnostics (inapplicable or conflicting hints) are
//! recorded once per statement: the driver may solve a hinted node under several
//! requests, and each solve reaches the same verdict. Every other warning is
//! appended as raised.

use crate::error::{ErrorCode, PlanError, PlanResult, PlanWarning};
use crate::expr::{ColumnTable, PushDownCtx};
use crate::session::SessionVars;
use crate::stats::{DefaultStatsOracle, StatsOracle};
use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

pub struct PlanContext {
    pub vars: SessionVars,
    pub columns: ColumnTable,
    pub oracle: Arc<dyn StatsOracle>,
    warnings: RefCell<Vec<PlanWarning>>,
    cancel: Arc<AtomicBool>,
    deadline: Option<(Instant, u64)>,
}

impl PlanContext {
    pub fn new(vars: SessionVars, columns: ColumnTable) -> Self {
        Self {
            vars,
            columns,
            oracle: Arc::new(DefaultStatsOracle),
            warnings: RefCell::new(Vec::new()),
            cancel: Arc::new(AtomicBool::new(false)),
            deadline: None,
        }
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn StatsOracle>) -> Self {
        self.oracle = oracle;
        self
    }

    /// Share a cancel flag with the caller (e.g. a `KILL QUERY` handler).
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }

    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        let ms = u64::try_from(budget.as_millis()).unwrap_or(u64::MAX);
        self.deadline = Some((Instant::now() + budget, ms));
        self
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn check_cancelled(&self) -> PlanResult<()> {
        if self.cancel.load(Ordering::Relaxed) {
            return Err(PlanError::Cancelled);
        }
        if let Some((deadline, ms)) = self.deadline {
            if Instant::now() >= deadline {
                return Err(PlanError::Timeout(ms));
            }
        }
        Ok(())
    }

    pub fn push_down_ctx(&self) -> PushDownCtx<'_> {
        PushDownCtx {
            columns: &self.columns,
            blocked: &self.vars.expr_pushdown_blacklist,
        }
    }

    pub fn warn(&self, code: ErrorCode, message: impl Into<String>) {
        let warning = PlanWarning::new(code, message);
        let mut warnings = self.warnings.borrow_mut();
        let is_hint = matches!(code, ErrorCode::HintInapplicable | ErrorCode::HintConflict);
        if is_hint && warnings.contains(&warning) {
            return;
        }
        debug!(code = %warning.code, "plan warning: {}", warning.message);
        warnings.push(warning);
    }

    pub fn warn_hint(&self, message: impl Into<String>) {
        self.warn(ErrorCode::HintInapplicable, message);
    }

    /// MPP blockers are only reported when the user asked for MPP enforcement.
    pub fn warn_mpp_blocked(&self, reason: impl AsRef<str>) {
        if self.vars.enforce_mpp {
            self.warn(
                ErrorCode::MppBlocked,
                format!("MPP mode may be blocked because {}", reason.as_ref()),
            );
        }
    }

    /// `operator `X` is not supported now.` flavour of [`Self::warn_mpp_blocked`].
    pub fn warn_mpp_unsupported_operator(&self, operator: &str) {
        self.warn_mpp_blocked(format!("operator `{}` is not supported now.", operator));
    }

    pub fn warnings(&self) -> Vec<PlanWarning> {
        self.warnings.borrow().clone()
    }

    pub fn warning_count(&self) -> usize {
        self.warnings.borrow().len()
    }

    pub fn take_warnings(&self) -> Vec<PlanWarning> {
        std::mem::take(&mut *self.warnings.borrow_mut())
    }
}

impl Default for PlanContext {
    fn default() -> Self {
        Self::new(SessionVars::default(), ColumnTable::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_flag_aborts() {
        let ctx = PlanContext::default();
        assert!(ctx.check_cancelled().is_ok());
        ctx.cancel_flag().store(true, Ordering::Relaxed);
        assert_eq!(ctx.check_cancelled(), Err(PlanError::Cancelled));
    }

    #[test]
    fn test_expired_deadline_times_out() {
        let ctx = PlanContext::default().with_time_budget(Duration::ZERO);
        assert!(matches!(ctx.check_cancelled(), Err(PlanError::Timeout(0))));
    }

    #[test]
    fn test_hint_warnings_recorded_once() {
        let ctx = PlanContext::default();
        ctx.warn_hint("Optimizer Hint STREAM_AGG is inapplicable");
        ctx.warn_hint("Optimizer Hint STREAM_AGG is inapplicable");
        ctx.warn(ErrorCode::HintConflict, "Optimizer aggregation hints are conflicted");
        ctx.warn(ErrorCode::HintConflict, "Optimizer aggregation hints are conflicted");
        ctx.warn_hint("Optimizer Hint AGG_TO_COP is inapplicable");
        let codes: Vec<ErrorCode> = ctx.warnings().into_iter().map(|w| w.code).collect();
        assert_eq!(
            codes,
            vec![ErrorCode::HintInapplicable, ErrorCode::HintConflict, ErrorCode::HintInapplicable]
        );
    }

    #[test]
    fn test_other_warnings_are_appended_as_raised() {
        let ctx = PlanContext::default();
        for _ in 0..2 {
            ctx.warn(
                ErrorCode::Unsupported,
                "Parallel Apply rejects the possible order properties of its outer child currently",
            );
        }
        assert_eq!(ctx.warning_count(), 2);
    }

    #[test]
    fn test_mpp_warnings_need_enforcement() {
        let ctx = PlanContext::default();
        ctx.warn_mpp_unsupported_operator("Lock");
        assert_eq!(ctx.warning_count(), 0);
        let vars = SessionVars {
            enforce_mpp: true,
            ..Default::default()
        };
        let ctx = PlanContext::new(vars, ColumnTable::new());
        ctx.warn_mpp_unsupported_operator("Lock");
        let w = ctx.take_warnings();
        assert_eq!(w.len(), 1);
        assert_eq!(w[0].message, "MPP mode may be blocked because operator `Lock` is not supported now.");
        assert_eq!(ctx.warning_count(), 0);
    }
}
