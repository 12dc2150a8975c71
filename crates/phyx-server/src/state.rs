//! # Server State
//!
//! Everything a handler needs besides the request body: the base session
//! variables every request starts from, the driver knobs, and the cost model.
//! Built once at startup and shared behind an `Arc`.
//!
//! ## Configuration file
//!
//! `PHYX_CONFIG` may name a JSON file; missing keys keep their defaults:
//!
//! ```json
//! {
//!   "vars": { "mpp_store_count": 4, "enable_index_merge_join": true },
//!   "search": { "try_mpp_root": false },
//!   "time_budget_ms": 2000
//! }
//! ```
//!
//! A request may override any session variable on top of this base.

use crate::error::ApiError;
use phyx_core::cost::{CostModel, DefaultCostModel};
use phyx_core::session::SessionVars;
use phyx_core::PlanError;
use phyx_rules::SearchConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

pub const CONFIG_ENV: &str = "PHYX_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub vars: SessionVars,
    pub search: SearchConfig,
    /// Wall-clock limit for one compilation; unlimited when absent.
    pub time_budget_ms: Option<u64>,
}

impl ServerConfig {
    /// Read the file named by `PHYX_CONFIG`, or the defaults when unset.
    pub fn from_env() -> Result<Self, ApiError> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ApiError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            PlanError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ApiError> {
        let config: ServerConfig = serde_json::from_str(text)
            .map_err(|e| PlanError::InvalidConfig(format!("bad config file: {}", e)))?;
        config.vars.validate()?;
        Ok(config)
    }
}

pub struct AppState {
    pub config: ServerConfig,
    pub cost_model: Arc<dyn CostModel>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            cost_model: Arc::new(DefaultCostModel::default()),
        }
    }

    /// Base session variables with the request's overrides applied.
    ///
    /// Overrides are a JSON object keyed by variable name. Unknown names and
    /// values of the wrong type are rejected rather than ignored.
    pub fn session_vars(&self, overrides: Option<&Value>) -> Result<SessionVars, ApiError> {
        let Some(overrides) = overrides else {
            return Ok(self.config.vars.clone());
        };
        let Value::Object(patch) = overrides else {
            return Err(ApiError::BadRequest("`vars` must be a JSON object".to_string()));
        };
        let mut merged = serde_json::to_value(&self.config.vars)
            .map_err(|e| PlanError::internal(format!("cannot encode session variables: {}", e)))?;
        let Value::Object(base) = &mut merged else {
            return Err(PlanError::internal("session variables did not encode as an object").into());
        };
        for (name, value) in patch {
            if !base.contains_key(name) {
                return Err(ApiError::BadRequest(format!("unknown session variable `{}`", name)));
            }
            base.insert(name.clone(), value.clone());
        }
        let vars: SessionVars = serde_json::from_value(merged)
            .map_err(|e| ApiError::BadRequest(format!("bad session variable: {}", e)))?;
        vars.validate()?;
        Ok(vars)
    }
}
