//! # Pass-Through and Structural Operators
//!
//! Enumerators for the operators whose physical choice is mostly about where
//! they run: selection, projection, union, union scan, apply, expand, lock,
//! max-one-row, CTE producers and sequences.
//!
//! ## Placement
//!
//! | operator   | root request children          | MPP request            |
//! |------------|--------------------------------|------------------------|
//! | Selection  | same request, plus MPP         | same request           |
//! | Projection | mapped request, plus MPP/cop   | mapped request         |
//! | UnionAll   | root, plus all-MPP             | all-MPP, unpartitioned |
//! | Expand     | MPP expand, plus root expand   | MPP expand             |
//! | Sequence   | root producers, plus all-MPP   | MPP producers          |
//!
//! Operators the columnar engine cannot run (union scan, apply, lock,
//! max-one-row) refuse MPP requests and explain why when MPP is enforced.

use crate::index_join::admit_index_join_props;
use crate::impl_join::new_hash_join_op;
use crate::OptContext;
use ordered_float::OrderedFloat;
use phyx_core::error::{ErrorCode, PlanError, PlanResult};
use phyx_core::expr::{ColumnId, Expr, SortItem, StoreType};
use phyx_core::logical::{Apply, CteProducer, Expand, Lock, Projection, Selection, UnionAll, UnionScan};
use phyx_core::memo::PlanRef;
use phyx_core::physical::{ApplyOp, Candidate, CandidateSet, ExpandOp, PhysicalOp};
use phyx_core::properties::{CteProducerStatus, PartitionSpec, PhysicalProperty, TaskType};
use tracing::trace;

/// Functions cheap enough in the row store that pushing a projection of them
/// shrinks the data read back.
const PROJECTION_PUSHDOWN_FUNCS: &[&str] = &["json_extract", "json_unquote", "json_length", "vec_dims", "vec_l2_norm"];

/// A candidate keeping the logical statistics as they are.
fn unscaled(opt: &OptContext<'_>, plan: PlanRef, op: PhysicalOp, child_props: Vec<PhysicalProperty>) -> Candidate {
    Candidate::new(op, child_props, opt.stats(plan).clone(), opt.schema(plan).clone())
}

fn exprs_pushable(opt: &OptContext<'_>, exprs: &[Expr], store: StoreType) -> bool {
    let ctx = opt.plan_ctx.push_down_ctx();
    exprs.iter().all(|e| e.can_push_to(&ctx, store))
}

fn contains_virtual_column(opt: &OptContext<'_>, exprs: &[Expr]) -> bool {
    exprs.iter().any(|e| e.contains_virtual_column(&opt.plan_ctx.columns))
}

pub fn exhaust_selection(
    opt: &OptContext<'_>,
    plan: PlanRef,
    sel: &Selection,
    prop: &PhysicalProperty,
) -> PlanResult<CandidateSet> {
    let mut child_props = vec![prop.clone_essential_fields()];
    let to_flash = !contains_virtual_column(opt, &sel.conds) && exprs_pushable(opt, &sel.conds, StoreType::TiFlash);
    if prop.task_type != TaskType::Mpp && opt.vars().is_mpp_allowed() && to_flash {
        let mut mpp = prop.clone_essential_fields();
        mpp.task_type = TaskType::Mpp;
        child_props.push(mpp);
    }
    let cands = child_props
        .into_iter()
        .map(|child| {
            let op = PhysicalOp::Selection {
                conds: sel.conds.clone(),
            };
            opt.candidate(plan, prop, op, vec![child])
        })
        .collect();
    Ok(CandidateSet::new(admit_index_join_props(prop, cands), true))
}

/// The request a projection forwards: its sort items renamed to the input
/// columns they project. `None` when an item is computed.
fn projection_child_prop(opt: &OptContext<'_>, plan: PlanRef, proj: &Projection, prop: &PhysicalProperty) -> Option<PhysicalProperty> {
    let schema = opt.schema(plan);
    let mut child = prop.clone_essential_fields();
    child.sort_items = prop
        .sort_items
        .iter()
        .map(|item| {
            let col = proj.exprs.get(schema.offset(item.col)?)?.as_column()?;
            Some(SortItem { col, desc: item.desc })
        })
        .collect::<Option<Vec<_>>>()?;
    Some(child)
}

/// Only column references and a few cheap functions, and fewer outputs than
/// inputs when nothing is computed.
fn projection_benefits_from_push_down(exprs: &[Expr], input_len: usize) -> bool {
    let mut all_columns = true;
    for expr in exprs {
        match expr {
            Expr::Column(_) => {}
            Expr::Function { name, .. }
                if PROJECTION_PUSHDOWN_FUNCS.contains(&name.to_ascii_lowercase().as_str()) =>
            {
                all_columns = false;
            }
            _ => return false,
        }
    }
    !all_columns || exprs.len() < input_len
}

pub fn exhaust_projection(
    opt: &OptContext<'_>,
    plan: PlanRef,
    proj: &Projection,
    prop: &PhysicalProperty,
) -> PlanResult<CandidateSet> {
    let Some(child) = projection_child_prop(opt, plan, proj, prop) else {
        return Ok(CandidateSet::empty());
    };
    let input_len = opt.schema(opt.child(plan, 0)?).len();
    let mut child_props = vec![child.clone()];
    if child.task_type != TaskType::Mpp
        && opt.vars().is_mpp_allowed()
        && exprs_pushable(opt, &proj.exprs, StoreType::TiFlash)
    {
        let mut mpp = child.clone_essential_fields();
        mpp.task_type = TaskType::Mpp;
        child_props.push(mpp);
    }
    if child.task_type != TaskType::CopSingle
        && opt.vars().allow_projection_push_down
        && exprs_pushable(opt, &proj.exprs, StoreType::TiKv)
        && !contains_virtual_column(opt, &proj.exprs)
        && projection_benefits_from_push_down(&proj.exprs, input_len)
    {
        let mut cop = child.clone_essential_fields();
        cop.task_type = TaskType::CopSingle;
        child_props.push(cop);
    }
    let cands = child_props
        .into_iter()
        .map(|child| {
            let op = PhysicalOp::Projection {
                exprs: proj.exprs.clone(),
            };
            opt.candidate(plan, prop, op, vec![child])
        })
        .collect();
    Ok(CandidateSet::new(admit_index_join_props(prop, cands), true))
}

pub fn exhaust_union_all(
    opt: &OptContext<'_>,
    plan: PlanRef,
    _union: &UnionAll,
    prop: &PhysicalProperty,
) -> PlanResult<CandidateSet> {
    // UnionAll neither keeps an order nor forwards a partitioning.
    if !prop.is_sort_item_empty() {
        return Ok(CandidateSet::empty());
    }
    match prop.task_type {
        TaskType::CopSingle | TaskType::CopMulti => return Ok(CandidateSet::empty()),
        TaskType::Mpp if prop.partition != PartitionSpec::Any => return Ok(CandidateSet::empty()),
        _ => {}
    }
    let arity = opt.children(plan).len();
    if arity == 0 {
        return Err(PlanError::malformed(format!("UnionAll {} has no children", plan)));
    }
    let mpp_allowed = opt.vars().is_mpp_allowed();
    let child_for = |task_type: TaskType| PhysicalProperty {
        task_type,
        expected_cnt: prop.expected_cnt,
        cte_producer_status: prop.cte_producer_status,
        no_cop_push_down: prop.no_cop_push_down,
        ..PhysicalProperty::default()
    };

    let mpp = mpp_allowed && prop.task_type == TaskType::Mpp;
    let own = if mpp { TaskType::Mpp } else { TaskType::Root };
    let mut cands = vec![opt.candidate(plan, prop, PhysicalOp::UnionAll { mpp }, vec![child_for(own); arity])];
    if mpp_allowed && prop.task_type == TaskType::Root {
        cands.push(opt.candidate(
            plan,
            prop,
            PhysicalOp::UnionAll { mpp: true },
            vec![child_for(TaskType::Mpp); arity],
        ));
    }
    Ok(CandidateSet::new(cands, true))
}

pub fn exhaust_union_scan(opt: &OptContext<'_>, plan: PlanRef, us: &UnionScan, prop: &PhysicalProperty) -> CandidateSet {
    if prop.is_flash_prop() {
        opt.plan_ctx.warn_mpp_unsupported_operator("UnionScan");
        return CandidateSet::empty();
    }
    // the child keeps the request's order; the reader below decides keep-order
    let op = PhysicalOp::UnionScan { conds: us.conds.clone() };
    let cand = unscaled(opt, plan, op, vec![prop.clone_essential_fields()]);
    CandidateSet::new(admit_index_join_props(prop, vec![cand]), true)
}

/// Share of inner executions an apply cache would save, from the NDV of the
/// correlated columns.
fn apply_cache_hit_ratio(opt: &OptContext<'_>, plan: PlanRef, corr_cols: &[ColumnId]) -> f64 {
    let stats = opt.stats(plan);
    if stats.row_count == 0.0 {
        return 0.0;
    }
    let ndv = corr_cols
        .iter()
        .map(|c| stats.ndv(*c))
        .fold(1.0_f64, |acc, n| acc * n)
        .min(stats.row_count);
    1.0 - ndv / stats.row_count
}

pub fn exhaust_apply(opt: &OptContext<'_>, plan: PlanRef, apply: &Apply, prop: &PhysicalProperty) -> PlanResult<CandidateSet> {
    let outer = opt.child(plan, 0)?;
    if !prop.all_cols_from_schema(opt.schema(outer)) || prop.is_flash_prop() {
        opt.plan_ctx.warn_mpp_unsupported_operator("Apply");
        return Ok(CandidateSet::empty());
    }
    let vars = opt.vars();
    if !prop.is_sort_item_empty() && vars.enable_parallel_apply {
        opt.plan_ctx.warn(
            ErrorCode::Unsupported,
            "Parallel Apply rejects the possible order properties of its outer child currently",
        );
        return Ok(CandidateSet::empty());
    }

    let hit_ratio = apply_cache_hit_ratio(opt, plan, &apply.corr_cols);
    let can_use_cache = hit_ratio > 0.1 && vars.mem_quota_apply_cache > 0;
    trace!(plan = %plan, hit_ratio, can_use_cache, "apply cache");
    let op = PhysicalOp::Apply(ApplyOp {
        join: new_hash_join_op(&apply.join, 1, false),
        corr_cols: apply.corr_cols.clone(),
        can_use_cache,
        concurrency: if vars.enable_parallel_apply {
            vars.executor_concurrency
        } else {
            1
        },
    });
    let outer_prop = PhysicalProperty {
        sort_items: prop.sort_items.clone(),
        cte_producer_status: prop.cte_producer_status,
        no_cop_push_down: true,
        ..PhysicalProperty::default()
    };
    let inner_prop = PhysicalProperty {
        cte_producer_status: prop.cte_producer_status,
        no_cop_push_down: prop.no_cop_push_down,
        ..PhysicalProperty::default()
    };
    Ok(CandidateSet::new(
        vec![opt.candidate(plan, prop, op, vec![outer_prop, inner_prop])],
        true,
    ))
}

fn expand_op(expand: &Expand, mpp: bool) -> PhysicalOp {
    PhysicalOp::Expand(ExpandOp {
        grouping_sets: expand.grouping_sets.clone(),
        gid_col: expand.gid_col,
        gpos_col: expand.gpos_col,
        level_exprs: expand.level_exprs.clone(),
        mpp,
    })
}

pub fn exhaust_expand(opt: &OptContext<'_>, plan: PlanRef, expand: &Expand, prop: &PhysicalProperty) -> CandidateSet {
    // Replicated rows carry no order; let the enforcer sort above.
    if !prop.is_sort_item_empty() {
        return CandidateSet::new(Vec::new(), false);
    }
    if !matches!(prop.task_type, TaskType::Root | TaskType::Mpp) {
        return CandidateSet::empty();
    }
    if prop.task_type == TaskType::Mpp && prop.partition != PartitionSpec::Any {
        return CandidateSet::empty();
    }
    let mut cands = Vec::with_capacity(5);
    if opt.vars().is_mpp_allowed() {
        let mut child = prop.clone_essential_fields();
        child.task_type = TaskType::Mpp;
        cands.push(opt.candidate(plan, prop, expand_op(expand, true), vec![child]));
        if prop.task_type == TaskType::Mpp {
            return CandidateSet::new(cands, true);
        }
    }
    for task_type in [TaskType::CopSingle, TaskType::CopMulti, TaskType::Mpp, TaskType::Root] {
        let mut child = prop.clone_essential_fields();
        child.task_type = task_type;
        cands.push(opt.candidate(plan, prop, expand_op(expand, false), vec![child]));
    }
    CandidateSet::new(cands, true)
}

pub fn exhaust_max_one_row(opt: &OptContext<'_>, plan: PlanRef, prop: &PhysicalProperty) -> CandidateSet {
    if !prop.is_sort_item_empty() || prop.is_flash_prop() {
        opt.plan_ctx.warn_mpp_unsupported_operator("MaxOneRow");
        return CandidateSet::empty();
    }
    // two rows are enough to tell "more than one"
    let child = PhysicalProperty {
        expected_cnt: OrderedFloat(2.0),
        cte_producer_status: prop.cte_producer_status,
        no_cop_push_down: prop.no_cop_push_down,
        ..PhysicalProperty::default()
    };
    CandidateSet::new(vec![unscaled(opt, plan, PhysicalOp::MaxOneRow, vec![child])], true)
}

pub fn exhaust_lock(opt: &OptContext<'_>, plan: PlanRef, lock: &Lock, prop: &PhysicalProperty) -> CandidateSet {
    if prop.is_flash_prop() {
        opt.plan_ctx.warn_mpp_unsupported_operator("Lock");
        return CandidateSet::empty();
    }
    let op = PhysicalOp::Lock {
        lock_kind: lock.lock_kind.clone(),
    };
    CandidateSet::new(vec![opt.candidate(plan, prop, op, vec![prop.clone_essential_fields()])], true)
}

pub fn exhaust_cte_producer(opt: &OptContext<'_>, plan: PlanRef, cte: &CteProducer, prop: &PhysicalProperty) -> CandidateSet {
    // MPP consumers read the materialized result through a broadcast.
    let op = PhysicalOp::CteStorage {
        cte_id: cte.cte_id,
        broadcast: prop.is_flash_prop(),
    };
    CandidateSet::new(vec![unscaled(opt, plan, op, vec![prop.clone_essential_fields()])], true)
}

/// Every child but the last produces CTEs; the last one delivers the output.
pub fn exhaust_sequence(opt: &OptContext<'_>, plan: PlanRef, prop: &PhysicalProperty) -> PlanResult<CandidateSet> {
    let children = opt.children(plan);
    let Some(last) = children.last().copied() else {
        return Err(PlanError::malformed(format!("Sequence {} has no children", plan)));
    };
    let any_mpp = PhysicalProperty {
        task_type: TaskType::Mpp,
        can_add_enforcer: true,
        cte_producer_status: prop.cte_producer_status,
        no_cop_push_down: prop.no_cop_push_down,
        ..PhysicalProperty::default()
    };

    let mut choices: Vec<(PhysicalProperty, PhysicalProperty)> = Vec::with_capacity(2);
    if prop.task_type == TaskType::Mpp {
        if prop.cte_producer_status == CteProducerStatus::SomeCteFailedMpp {
            return Ok(CandidateSet::empty());
        }
        let producers = PhysicalProperty {
            cte_producer_status: CteProducerStatus::AllCteCanMpp,
            ..any_mpp.clone()
        };
        choices.push((producers, prop.clone_essential_fields()));
    } else {
        let mut output = prop.clone_essential_fields();
        output.cte_producer_status = CteProducerStatus::SomeCteFailedMpp;
        let producers = PhysicalProperty {
            cte_producer_status: CteProducerStatus::SomeCteFailedMpp,
            ..PhysicalProperty::default()
        };
        choices.push((producers, output));
    }
    if prop.task_type != TaskType::Mpp
        && prop.cte_producer_status != CteProducerStatus::SomeCteFailedMpp
        && opt.vars().is_mpp_allowed()
        && prop.is_sort_item_empty()
    {
        choices.push((any_mpp.clone(), any_mpp.clone_essential_fields()));
    }

    let schema = opt.schema(last).clone();
    let stats = opt.stats(plan).clone();
    let cands = choices
        .into_iter()
        .map(|(producers, output)| {
            let mut child_props: Vec<PhysicalProperty> = (1..children.len())
                .map(|_| producers.clone_essential_fields())
                .collect();
            child_props.push(output);
            Candidate::new(PhysicalOp::Sequence, child_props, stats.clone(), schema.clone())
        })
        .collect();
    Ok(CandidateSet::new(cands, true))
}
