//! # Session Variables
//!
//! Global switches consumed by the enumerator. One [`SessionVars`] value is frozen
//! per statement compilation; enumerators only read it.
//!
//! Every field has a serde default, so a JSON document naming a handful of
//! variables is a complete configuration:
//!
//! ```json
//! { "allow_mpp": true, "mpp_store_count": 4, "enable_index_merge_join": true }
//! ```

use crate::error::{PlanError, PlanResult};
use serde::{Deserialize, Serialize};

/// Statement-scoped optimizer switches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionVars {
    /// MPP placement may be considered at all.
    pub allow_mpp: bool,
    /// Prefer MPP whenever possible and explain why it is not used.
    pub enforce_mpp: bool,
    /// Number of columnar compute nodes.
    pub mpp_store_count: u32,
    /// Bytes below which a join child may be broadcast; `-1` means unlimited.
    pub broadcast_join_threshold_size: i64,
    /// Rows below which a join child may be broadcast when no size statistics
    /// exist; `-1` means unlimited.
    pub broadcast_join_threshold_count: i64,
    /// Cartesian joins under MPP: 0 never, 1 allowed via broadcast, 2 prefer broadcast.
    pub allow_cartesian_bcj: u8,
    /// Compare broadcast and shuffle by estimated exchanged data instead of thresholds.
    pub prefer_bcj_by_exchange_data_size: bool,
    /// MPP outer joins always build on the inner side.
    pub mpp_outer_join_fixed_build_side: bool,
    pub enable_index_merge_join: bool,
    /// Selection/Projection/Aggregation may sit between an index join and its
    /// inner data source.
    pub enable_inl_join_inner_multi_pattern: bool,
    pub allow_distinct_agg_push_down: bool,
    pub allow_projection_push_down: bool,
    /// Rewrite skewed distinct aggregates; disables one-phase MPP aggregation.
    pub enable_skew_distinct_agg: bool,
    pub enable_parallel_apply: bool,
    pub executor_concurrency: usize,
    /// Bytes available to the apply cache; `0` disables it.
    pub mem_quota_apply_cache: i64,
    /// LIMIT/TOP-N below this count are pushed to the coprocessor.
    pub limit_push_down_threshold: u64,
    pub enable_hash_join_v2: bool,
    /// `tidb_opt_enable_hash_join`; `false` behaves like `NO_HASH_JOIN` everywhere.
    pub enable_hash_join: bool,
    pub allow_cop_tiflash: bool,
    /// Weight of rows an ordered scan may need before the first match, in `[0, 1]`.
    pub order_ratio: f64,
    /// Functions and operators never pushed to the columnar engine.
    pub expr_pushdown_blacklist: Vec<String>,
}

impl Default for SessionVars {
    fn default() -> Self {
        Self {
            allow_mpp: true,
            enforce_mpp: false,
            mpp_store_count: 3,
            broadcast_join_threshold_size: 100 * 1024 * 1024,
            broadcast_join_threshold_count: 10 * 1024,
            allow_cartesian_bcj: 1,
            prefer_bcj_by_exchange_data_size: false,
            mpp_outer_join_fixed_build_side: false,
            enable_index_merge_join: false,
            enable_inl_join_inner_multi_pattern: false,
            allow_distinct_agg_push_down: false,
            allow_projection_push_down: false,
            enable_skew_distinct_agg: false,
            enable_parallel_apply: false,
            executor_concurrency: 5,
            mem_quota_apply_cache: 32 << 20,
            limit_push_down_threshold: 100,
            enable_hash_join_v2: true,
            enable_hash_join: true,
            allow_cop_tiflash: false,
            order_ratio: 0.0,
            expr_pushdown_blacklist: Vec::new(),
        }
    }
}

impl SessionVars {
    /// Reject combinations the engine cannot honour.
    pub fn validate(&self) -> PlanResult<()> {
        if self.enforce_mpp && !self.allow_mpp {
            return Err(PlanError::InvalidConfig(
                "enforce_mpp cannot be set when allow_mpp is false".to_string(),
            ));
        }
        if self.allow_cartesian_bcj > 2 {
            return Err(PlanError::InvalidConfig(format!(
                "allow_cartesian_bcj must be 0, 1 or 2, got {}",
                self.allow_cartesian_bcj
            )));
        }
        for (name, v) in [
            ("broadcast_join_threshold_size", self.broadcast_join_threshold_size),
            ("broadcast_join_threshold_count", self.broadcast_join_threshold_count),
        ] {
            if v < -1 {
                return Err(PlanError::InvalidConfig(format!("{} must be >= -1, got {}", name, v)));
            }
        }
        if !(0.0..=1.0).contains(&self.order_ratio) {
            return Err(PlanError::InvalidConfig(format!(
                "order_ratio must be within [0, 1], got {}",
                self.order_ratio
            )));
        }
        if self.executor_concurrency == 0 {
            return Err(PlanError::InvalidConfig("executor_concurrency must be positive".to_string()));
        }
        Ok(())
    }

    /// MPP planning is possible for this statement.
    pub fn is_mpp_allowed(&self) -> bool {
        self.allow_mpp && self.mpp_store_count > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let vars: SessionVars = serde_json::from_str(r#"{"mpp_store_count": 8}"#).unwrap();
        assert_eq!(vars.mpp_store_count, 8);
        assert_eq!(vars.broadcast_join_threshold_count, 10240);
        assert!(vars.allow_mpp);
        assert!(vars.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_enforce_without_allow() {
        let vars = SessionVars {
            allow_mpp: false,
            enforce_mpp: true,
            ..Default::default()
        };
        assert!(matches!(vars.validate(), Err(PlanError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_bad_cartesian_mode() {
        let vars = SessionVars {
            allow_cartesian_bcj: 3,
            ..Default::default()
        };
        assert!(vars.validate().is_err());
    }
}
