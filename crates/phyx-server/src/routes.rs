//! # HTTP Route Handlers
//!
//! Both planning endpoints take a logical plan as a JSON arena (children listed
//! before parents, the last node is the root) together with the column table its
//! expressions refer to.
//!
//! ## Endpoints
//!
//! - `POST /enumerate` runs a single enumeration step: the candidate set one
//!   node offers for one physical request. Useful when debugging why an
//!   operator does or does not show up in a plan.
//! - `POST /optimize` runs the whole search from the root under a root request,
//!   optionally after predicate push-down, and returns the attached plan with
//!   its `EXPLAIN` rendering.
//!
//! Each request compiles under a fresh [`PlanContext`], so warnings never leak
//! between requests. Compilation is synchronous and runs on the blocking pool.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use phyx_core::expr::ColumnTable;
use phyx_core::memo::{NodeId, PlanArena, PlanRef};
use phyx_core::physical::{CandidateSet, PhysicalPlan};
use phyx_core::properties::PhysicalProperty;
use phyx_core::{PlanContext, PlanError, PlanWarning};
use phyx_rules::predicate_pushdown::push_down_predicates;
use phyx_rules::{exhaust_physical_plans, OptContext, PhysicalOptimizer, SearchConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::ApiError;
use crate::state::AppState;

/// GET /health
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EnumerateRequest {
    pub plan: PlanArena,
    #[serde(default)]
    pub columns: ColumnTable,
    /// Node to enumerate; the root when absent.
    #[serde(default)]
    pub node: Option<NodeId>,
    #[serde(default)]
    pub prop: PhysicalProperty,
    /// Session variable overrides keyed by name.
    #[serde(default)]
    pub vars: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EnumerateResponse {
    pub candidates: CandidateSet,
    pub warnings: Vec<PlanWarning>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OptimizeRequest {
    pub plan: PlanArena,
    #[serde(default)]
    pub columns: ColumnTable,
    /// Run predicate push-down over the plan before the search.
    #[serde(default)]
    pub push_down_predicates: bool,
    #[serde(default)]
    pub vars: Option<Value>,
    /// Replaces the server's driver configuration for this request.
    #[serde(default)]
    pub search: Option<SearchConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OptimizeResponse {
    pub plan: PhysicalPlan,
    pub explain: String,
    pub warnings: Vec<PlanWarning>,
}

/// POST /enumerate
pub async fn enumerate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EnumerateRequest>,
) -> Result<Json<EnumerateResponse>, ApiError> {
    let resp = blocking(move || run_enumerate(&state, &req)).await?;
    Ok(Json(resp))
}

/// POST /optimize
pub async fn optimize(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OptimizeRequest>,
) -> Result<Json<OptimizeResponse>, ApiError> {
    let resp = blocking(move || run_optimize(&state, req)).await?;
    Ok(Json(resp))
}

async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PlanError::internal(format!("planning task failed: {}", e)))?
}

fn plan_context(state: &AppState, columns: ColumnTable, vars: Option<&Value>) -> Result<PlanContext, ApiError> {
    let vars = state.session_vars(vars)?;
    let ctx = PlanContext::new(vars, columns);
    Ok(match state.config.time_budget_ms {
        Some(ms) => ctx.with_time_budget(Duration::from_millis(ms)),
        None => ctx,
    })
}

fn target_node(arena: &PlanArena, node: Option<NodeId>) -> Result<NodeId, ApiError> {
    arena.validate()?;
    let root = arena
        .root()
        .ok_or_else(|| PlanError::malformed("the plan has no nodes"))?;
    match node {
        None => Ok(root),
        Some(id) if id.0 < arena.len() => Ok(id),
        Some(id) => Err(PlanError::malformed(format!("node {} is not in the plan", id.0)).into()),
    }
}

pub fn run_enumerate(state: &AppState, req: &EnumerateRequest) -> Result<EnumerateResponse, ApiError> {
    let node = target_node(&req.plan, req.node)?;
    let ctx = plan_context(state, req.columns.clone(), req.vars.as_ref())?;
    let opt = OptContext::new(&req.plan, &ctx);
    let candidates = exhaust_physical_plans(&opt, PlanRef::Direct(node), &req.prop)?;
    debug!(
        node = node.0,
        candidates = candidates.len(),
        authoritative = candidates.authoritative,
        "enumerated"
    );
    Ok(EnumerateResponse {
        candidates,
        warnings: ctx.warnings(),
    })
}

pub fn run_optimize(state: &AppState, req: OptimizeRequest) -> Result<OptimizeResponse, ApiError> {
    let arena = if req.push_down_predicates {
        push_down_predicates(&req.plan)?
    } else {
        req.plan
    };
    let root = target_node(&arena, None)?;
    let ctx = plan_context(state, req.columns, req.vars.as_ref())?;
    let search = req.search.unwrap_or_else(|| state.config.search.clone());
    let mut optimizer = PhysicalOptimizer::new(
        OptContext::new(&arena, &ctx),
        Arc::clone(&state.cost_model),
        search,
    );
    let plan = optimizer.optimize(PlanRef::Direct(root))?;
    info!(
        nodes = arena.len(),
        solved = optimizer.memo_len(),
        cost = plan.cost,
        warnings = ctx.warning_count(),
        "optimized"
    );
    Ok(OptimizeResponse {
        explain: plan.explain(&ctx.columns),
        plan,
        warnings: ctx.warnings(),
    })
}
