//! # Aggregation Enumeration
//!
//! Three families compete for a logical aggregation:
//!
//! - **Hash aggregation**: works on any input order, so it is only offered for
//!   unsorted requests. One candidate per child placement (coprocessor single
//!   and double read, root) plus the MPP shapes below.
//! - **Stream aggregation**: needs its input sorted on the group-by columns. One
//!   candidate per cheap child order the logical phase found
//!   (`possible_properties`), and an enforced variant under `STREAM_AGG`.
//! - **MPP aggregation**: hash aggregation inside the columnar engine, as
//!
//!   | mode      | child request             | shape at attach                      |
//!   |-----------|---------------------------|--------------------------------------|
//!   | one-phase | `Hash(group keys)`        | final agg                            |
//!   | two-phase | `Any`                     | partial, hash exchange, final        |
//!   | TiDB      | `Any`                     | partial in MPP, final at root        |
//!   | scalar    | `Any`                     | partial, gather exchange, final      |
//!
//! A `HASH_AGG` or `STREAM_AGG` hint makes the matching non-empty family
//! authoritative. `MPP_1PHASE_AGG` and `MPP_2PHASE_AGG` narrow the MPP shapes.

use crate::index_join::admit_index_join_props;
use crate::OptContext;
use ordered_float::OrderedFloat;
use phyx_core::error::{ErrorCode, PlanResult};
use phyx_core::expr::{AggFuncDesc, AggFuncName, AggMode, ColumnId, StoreType};
use phyx_core::hint::AggPrefer;
use phyx_core::logical::LogicalAggregation;
use phyx_core::memo::PlanRef;
use phyx_core::physical::{AggOp, Candidate, CandidateSet, MppAggMode, PhysicalOp};
use phyx_core::properties::{sort_items_from_cols, PartitionColumn, PartitionSpec, PhysicalProperty, TaskType};

pub fn exhaust_aggregation(
    opt: &OptContext<'_>,
    plan: PlanRef,
    agg: &LogicalAggregation,
    prop: &PhysicalProperty,
) -> PlanResult<CandidateSet> {
    let (prefer, conflicted) = agg.hints.resolve_conflicts();
    if conflicted {
        opt.plan_ctx
            .warn(ErrorCode::HintConflict, "Optimizer aggregation hints are conflicted");
    }
    let prefer_hash = prefer.contains(AggPrefer::HASH_AGG);
    let prefer_stream = prefer.contains(AggPrefer::STREAM_AGG);

    let hash_aggs = get_hash_aggs(opt, plan, agg, prefer, prop);
    if prefer_hash && !hash_aggs.is_empty() {
        return Ok(CandidateSet::new(hash_aggs, true));
    }
    let stream_aggs = get_stream_aggs(opt, plan, agg, prefer, prop);
    if prefer_stream && !stream_aggs.is_empty() {
        return Ok(CandidateSet::new(stream_aggs, true));
    }
    if prefer_stream && stream_aggs.is_empty() && !prop.is_sort_item_empty() {
        opt.plan_ctx.warn_hint("Optimizer Hint STREAM_AGG is inapplicable");
    }

    let mut aggs = hash_aggs;
    aggs.extend(stream_aggs);
    Ok(CandidateSet::new(aggs, !(prefer_hash || prefer_stream)))
}

fn agg_op(agg: &LogicalAggregation, mpp: Option<MppAggMode>) -> AggOp {
    AggOp {
        group_by: agg.group_by.clone(),
        agg_funcs: agg.agg_funcs.clone(),
        mpp,
        partition_cols: Vec::new(),
    }
}

/// Whether a partial phase may run in the row store.
fn can_push_to_cop(opt: &OptContext<'_>, agg: &LogicalAggregation) -> bool {
    if agg.has_distinct() && !opt.vars().allow_distinct_agg_push_down {
        return false;
    }
    agg.can_push_to(&opt.plan_ctx.push_down_ctx(), StoreType::TiKv)
}

/// Whether the columnar engine can evaluate every function, warning about
/// distinct aggregates it cannot distribute.
fn can_push_to_mpp(opt: &OptContext<'_>, agg: &LogicalAggregation) -> bool {
    let unsupported = agg.agg_funcs.iter().any(|f| {
        f.name == AggFuncName::ApproxCountDistinct
            || (f.distinct && !matches!(f.name, AggFuncName::Count | AggFuncName::GroupConcat))
    });
    if unsupported {
        opt.plan_ctx.warn(
            ErrorCode::PushdownIneligible,
            "Aggregation can not be pushed to storage layer in mpp mode because it contains agg function with distinct",
        );
        return false;
    }
    agg.can_push_to(&opt.plan_ctx.push_down_ctx(), StoreType::TiFlash)
}

/// Child placements a non-MPP phase may take.
fn cop_task_types(opt: &OptContext<'_>, agg: &LogicalAggregation, prop: &PhysicalProperty, multi_read: bool) -> Vec<TaskType> {
    if prop.no_cop_push_down || !can_push_to_cop(opt, agg) {
        return vec![TaskType::Root];
    }
    if multi_read {
        vec![TaskType::CopSingle, TaskType::CopMulti, TaskType::Root]
    } else {
        vec![TaskType::CopSingle, TaskType::Root]
    }
}

fn get_hash_aggs(
    opt: &OptContext<'_>,
    plan: PlanRef,
    agg: &LogicalAggregation,
    prefer: AggPrefer,
    prop: &PhysicalProperty,
) -> Vec<Candidate> {
    if !prop.is_sort_item_empty() {
        return Vec::new();
    }
    let mpp_ok = if prop.task_type == TaskType::Mpp {
        if !can_push_to_mpp(opt, agg) {
            return Vec::new();
        }
        true
    } else {
        opt.vars().is_mpp_allowed() && can_push_to_mpp(opt, agg)
    };

    let mut task_types = cop_task_types(opt, agg, prop, true);
    if mpp_ok {
        task_types.push(TaskType::Mpp);
    } else if prefer.contains(AggPrefer::MPP_2PHASE_AGG) {
        opt.plan_ctx
            .warn_hint("The agg can not push down to the MPP side, the MPP_2PHASE_AGG() hint is invalid");
    } else if prefer.contains(AggPrefer::MPP_1PHASE_AGG) {
        opt.plan_ctx
            .warn_hint("The agg can not push down to the MPP side, the MPP_1PHASE_AGG() hint is invalid");
    }
    if prop.is_flash_prop() {
        task_types = vec![prop.task_type];
    }
    if prop.index_join_prop.is_some() {
        task_types.retain(|t| *t != TaskType::Mpp);
    }

    let mut aggs = Vec::with_capacity(task_types.len() + 3);
    for task_type in task_types {
        if task_type == TaskType::Mpp {
            aggs.extend(mpp_hash_aggs(opt, plan, agg, prefer, prop));
            continue;
        }
        let child = PhysicalProperty {
            task_type,
            expected_cnt: OrderedFloat(f64::MAX),
            cte_producer_status: prop.cte_producer_status,
            no_cop_push_down: prop.no_cop_push_down,
            ..Default::default()
        };
        aggs.push(opt.candidate(plan, prop, PhysicalOp::HashAgg(agg_op(agg, None)), vec![child]));
    }
    admit_index_join_props(prop, aggs)
}

/// Final `count` cannot be told apart from a fresh count in the columnar
/// engine; it sums the partial counts instead.
fn adjust_final_count(funcs: &[AggFuncDesc]) -> Vec<AggFuncDesc> {
    funcs
        .iter()
        .map(|f| {
            if f.mode == AggMode::Final && f.name == AggFuncName::Count {
                AggFuncDesc::new(AggFuncName::Sum, f.args.clone())
            } else {
                f.clone()
            }
        })
        .collect()
}

/// Every function finishes (final or complete), or none does.
fn modes_agree(funcs: &[AggFuncDesc]) -> bool {
    let finishes = |f: &AggFuncDesc| matches!(f.mode, AggMode::Final | AggMode::Complete);
    match funcs.first() {
        Some(first) => funcs.iter().all(|f| finishes(f) == finishes(first)),
        None => true,
    }
}

fn mpp_hash_aggs(
    opt: &OptContext<'_>,
    plan: PlanRef,
    agg: &LogicalAggregation,
    prefer: AggPrefer,
    prop: &PhysicalProperty,
) -> Vec<Candidate> {
    if !prop.is_sort_item_empty()
        || !matches!(prop.task_type, TaskType::Root | TaskType::Mpp)
        || prop.partition == PartitionSpec::Broadcast
    {
        return Vec::new();
    }
    let has_final = agg.agg_funcs.first().is_some_and(|f| f.mode == AggMode::Final);
    let child = |partition: PartitionSpec, can_add_enforcer: bool| PhysicalProperty {
        task_type: TaskType::Mpp,
        expected_cnt: OrderedFloat(f64::MAX),
        partition,
        can_add_enforcer,
        cte_producer_status: prop.cte_producer_status,
        no_cop_push_down: prop.no_cop_push_down,
        ..Default::default()
    };

    let mut aggs = Vec::new();
    if !agg.group_by.is_empty() {
        let mut partition_cols: Vec<PartitionColumn> =
            agg.group_by_cols().into_iter().map(PartitionColumn::new).collect();
        match &prop.partition {
            PartitionSpec::Hash(_) => {
                let matches = prop.is_subset_of(&partition_cols);
                if matches.is_empty() {
                    return Vec::new();
                }
                partition_cols = matches.iter().map(|&i| partition_cols[i].clone()).collect();
            }
            PartitionSpec::Any => {}
            PartitionSpec::Single | PartitionSpec::Broadcast => return Vec::new(),
        }

        if !partition_cols.is_empty() && !opt.vars().enable_skew_distinct_agg {
            let op = AggOp {
                agg_funcs: adjust_final_count(&agg.agg_funcs),
                ..agg_op(agg, Some(MppAggMode::OnePhase))
            };
            if modes_agree(&op.agg_funcs) {
                aggs.push(opt.candidate(
                    plan,
                    prop,
                    PhysicalOp::HashAgg(op),
                    vec![child(PartitionSpec::Hash(partition_cols.clone()), true)],
                ));
            }
        }

        if !has_final {
            let op = AggOp {
                partition_cols,
                ..agg_op(agg, Some(MppAggMode::TwoPhase))
            };
            if modes_agree(&op.agg_funcs) {
                aggs.push(opt.candidate(
                    plan,
                    prop,
                    PhysicalOp::HashAgg(op),
                    vec![child(PartitionSpec::Any, false)],
                ));
            }
            if prop.task_type == TaskType::Root {
                aggs.push(opt.candidate(
                    plan,
                    prop,
                    PhysicalOp::HashAgg(agg_op(agg, Some(MppAggMode::Tidb))),
                    vec![child(PartitionSpec::Any, false)],
                ));
            }
        }
    } else if !has_final {
        let mode = if agg.has_distinct() || agg.has_order_by() {
            MppAggMode::Scalar
        } else {
            MppAggMode::Tidb
        };
        aggs.push(opt.candidate(
            plan,
            prop,
            PhysicalOp::HashAgg(agg_op(agg, Some(mode))),
            vec![child(PartitionSpec::Any, false)],
        ));
    }

    let wanted = if prefer.contains(AggPrefer::MPP_1PHASE_AGG) {
        Some(MppAggMode::OnePhase)
    } else if prefer.contains(AggPrefer::MPP_2PHASE_AGG) {
        Some(MppAggMode::TwoPhase)
    } else {
        None
    };
    if let Some(mode) = wanted {
        aggs.retain(|c| matches!(&c.op, PhysicalOp::HashAgg(a) if a.mpp == Some(mode)));
    }
    aggs
}

/// Expected rows the child must produce for the aggregation to emit `prop`'s.
fn stream_child_expected(opt: &OptContext<'_>, plan: PlanRef, agg: &LogicalAggregation, prop: &PhysicalProperty) -> OrderedFloat<f64> {
    let rows = opt.stats(plan).row_count;
    if rows <= 0.0 {
        return prop.expected_cnt;
    }
    prop.scaled_expected(agg.input_count / rows).max(prop.expected_cnt)
}

/// Distinct arguments are all group-by items, so a group-ordered input also
/// orders the distinct values.
fn distinct_args_meet_order(agg: &LogicalAggregation) -> bool {
    agg.agg_funcs
        .iter()
        .filter(|f| f.distinct)
        .all(|f| f.args.iter().all(|a| agg.group_by.contains(a)))
}

fn get_stream_aggs(
    opt: &OptContext<'_>,
    plan: PlanRef,
    agg: &LogicalAggregation,
    prefer: AggPrefer,
    prop: &PhysicalProperty,
) -> Vec<Candidate> {
    if prop.is_flash_prop() {
        return Vec::new();
    }
    let (same_order, desc) = prop.all_same_order();
    if !same_order || agg.has_final_mode() {
        return Vec::new();
    }
    let group_cols = agg.group_by_cols();
    if group_cols.len() != agg.group_by.len() {
        return Vec::new();
    }
    if prop.index_join_prop.is_some() && !prefer.contains(AggPrefer::STREAM_AGG) {
        return Vec::new();
    }

    let expected_cnt = stream_child_expected(opt, plan, agg, prop);
    let distinct_blocks = agg.has_distinct() && opt.vars().allow_distinct_agg_push_down && !distinct_args_meet_order(agg);
    let mut aggs = Vec::new();
    for order in &agg.possible_properties {
        if order.len() < group_cols.len() {
            continue;
        }
        let child = PhysicalProperty {
            sort_items: sort_items_from_cols(&order[..group_cols.len()], desc),
            expected_cnt,
            no_cop_push_down: prop.no_cop_push_down,
            ..Default::default()
        };
        if !prop.is_prefix(&child) || distinct_blocks {
            continue;
        }
        for task_type in cop_task_types(opt, agg, prop, false) {
            aggs.push(opt.candidate(
                plan,
                prop,
                PhysicalOp::StreamAgg(agg_op(agg, None)),
                vec![PhysicalProperty {
                    task_type,
                    ..child.clone()
                }],
            ));
        }
    }
    if prefer.contains(AggPrefer::STREAM_AGG) {
        aggs.extend(enforced_stream_aggs(opt, plan, agg, prop, &group_cols, expected_cnt));
    }
    admit_index_join_props(prop, aggs)
}

/// Stream aggregations over a child sorted by an enforcer, for `STREAM_AGG`.
fn enforced_stream_aggs(
    opt: &OptContext<'_>,
    plan: PlanRef,
    agg: &LogicalAggregation,
    prop: &PhysicalProperty,
    group_cols: &[ColumnId],
    expected_cnt: OrderedFloat<f64>,
) -> Vec<Candidate> {
    if prop.index_join_prop.is_some() {
        return Vec::new();
    }
    let (_, desc) = prop.all_same_order();
    let child = PhysicalProperty {
        sort_items: sort_items_from_cols(group_cols, desc),
        expected_cnt,
        can_add_enforcer: true,
        no_cop_push_down: prop.no_cop_push_down,
        ..Default::default()
    };
    if !prop.is_prefix(&child) {
        return Vec::new();
    }
    cop_task_types(opt, agg, prop, true)
        .into_iter()
        .map(|task_type| {
            opt.candidate(
                plan,
                prop,
                PhysicalOp::StreamAgg(agg_op(agg, None)),
                vec![PhysicalProperty {
                    task_type,
                    ..child.clone()
                }],
            )
        })
        .collect()
}
