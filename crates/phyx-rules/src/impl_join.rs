//! # Join Enumeration
//!
//! [`exhaust_join`] walks the join strategy families in priority order and stops
//! at the first family a hint forces:
//!
//! 1. **MPP hash joins** (`impl_mpp`): broadcast and/or shuffle, only when the
//!    session allows MPP. A request for an MPP task ends here.
//! 2. **Merge joins**: a `MERGE_JOIN` hint with at least one merge candidate
//!    returns just those.
//! 3. **Index-join family** (`index_join`): forced by `INL_JOIN` and friends.
//! 4. **Hash joins**: forced by `HASH_JOIN` or a build-side hint.
//!
//! Without a forcing hint every family is returned together and the set is not
//! authoritative, so the driver may still try the request with an enforcer.
//!
//! Null-aware anti joins (from `NOT IN`) skip merge and index joins.
//!
//! ## Hint Masks
//!
//! The join's hint mask is never edited. When hash-only MPP hints are mixed with
//! method hints MPP cannot run, the whole mask is dropped for this enumeration by
//! working on a local copy (see [`effective_join_prefer`]).

use crate::data_source::possible_orders;
use crate::{impl_mpp, index_join, OptContext};
use ordered_float::OrderedFloat;
use phyx_core::error::{ErrorCode, PlanResult};
use phyx_core::expr::{ColumnId, Expr, JoinType, StoreType};
use phyx_core::hint::JoinPrefer;
use phyx_core::logical::LogicalJoin;
use phyx_core::memo::PlanRef;
use phyx_core::physical::{Candidate, CandidateSet, HashJoinOp, MergeJoinOp, PhysicalOp};
use phyx_core::properties::{sort_items_from_cols, PartitionSpec, PhysicalProperty, TaskType};
use std::collections::HashSet;

/// The join's hint mask as enumeration sees it: MPP hints mixed with method
/// hints MPP cannot honour void the whole mask.
pub(crate) fn effective_join_prefer(join: &LogicalJoin) -> JoinPrefer {
    let prefer = join.hints.prefer;
    if !prefer.is_supported_in_mpp() && prefer.has_mpp_join_hints() {
        JoinPrefer::NONE
    } else {
        prefer
    }
}

pub fn exhaust_join(
    opt: &OptContext<'_>,
    plan: PlanRef,
    join: &LogicalJoin,
    prop: &PhysicalProperty,
) -> PlanResult<CandidateSet> {
    let ctx = opt.plan_ctx;
    let prefer = effective_join_prefer(join);
    if !join.hints.prefer.is_supported_in_mpp() {
        if join.hints.prefer.has_mpp_join_hints() {
            ctx.warn(
                ErrorCode::HintConflict,
                "The MPP join hints are in conflict, and you can only specify join method hints that are currently supported by MPP mode now",
            );
        } else {
            ctx.warn_mpp_blocked(
                "you have used hint to specify a join algorithm which is not supported by mpp now.",
            );
            if prop.is_flash_prop() {
                return Ok(CandidateSet::new(Vec::new(), false));
            }
        }
    }
    if prop.partition == PartitionSpec::Broadcast {
        return Ok(CandidateSet::new(Vec::new(), false));
    }

    let mut joins = Vec::new();
    if opt.vars().is_mpp_allowed() {
        if prefer.has_mpp_join_hints() {
            joins.extend(impl_mpp::try_mpp_hash_join(opt, plan, join, prefer, prop, true)?);
            joins.extend(impl_mpp::try_mpp_hash_join(opt, plan, join, prefer, prop, false)?);
        } else {
            let use_bcj = impl_mpp::prefer_mpp_bcj(opt, plan, join)?;
            joins.extend(impl_mpp::try_mpp_hash_join(opt, plan, join, prefer, prop, use_bcj)?);
        }
    } else if prefer.contains(JoinPrefer::BC_JOIN) {
        ctx.warn_hint("The join can not push down to the MPP side, the broadcast_join() hint is invalid");
    } else if prefer.contains(JoinPrefer::SHUFFLE_JOIN) {
        ctx.warn_hint("The join can not push down to the MPP side, the shuffle_join() hint is invalid");
    }
    if prop.is_flash_prop() {
        return Ok(CandidateSet::new(joins, true));
    }

    if !join.is_naaj() {
        let merges = get_merge_joins(opt, plan, join, prefer, prop)?;
        if prefer.contains(JoinPrefer::MERGE_JOIN) && !merges.is_empty() {
            return Ok(CandidateSet::new(merges, true));
        }
        joins.extend(merges);

        let (index_joins, forced) = index_join::try_index_joins(opt, plan, join, prefer, prop)?;
        if forced {
            return Ok(CandidateSet::new(index_joins, true));
        }
        joins.extend(index_joins);
    }

    let (hash_joins, forced) = get_hash_joins(opt, plan, join, prefer, prop)?;
    if forced && !hash_joins.is_empty() {
        return Ok(CandidateSet::new(hash_joins, true));
    }
    joins.extend(hash_joins);
    Ok(CandidateSet::new(joins, false))
}

/// Hash join operator over the logical join's keys and conditions, run centrally.
pub(crate) fn new_hash_join_op(join: &LogicalJoin, inner_idx: usize, use_outer_to_build: bool) -> HashJoinOp {
    HashJoinOp {
        join_type: join.join_type,
        inner_child_idx: inner_idx,
        use_outer_to_build,
        left_keys: join.left_keys(),
        right_keys: join.right_keys(),
        na_left_keys: join.na_left_keys(),
        na_right_keys: join.na_right_keys(),
        equal_conds: join.equal_conds.clone(),
        left_conds: join.left_conds.clone(),
        right_conds: join.right_conds.clone(),
        other_conds: join.other_conds.clone(),
        store: StoreType::TiDb,
        mpp: None,
    }
}

fn can_use_hash_join_v2(join: &LogicalJoin) -> bool {
    !join.is_naaj() && !join.equal_conds.is_empty() && !join.has_null_eq()
}

/// Root hash joins in every build orientation the join type and hints allow.
/// The flag reports whether a hash-join hint forced them.
pub fn get_hash_joins(
    opt: &OptContext<'_>,
    plan: PlanRef,
    join: &LogicalJoin,
    prefer: JoinPrefer,
    prop: &PhysicalProperty,
) -> PlanResult<(Vec<Candidate>, bool)> {
    if !prop.is_sort_item_empty() {
        return Ok((Vec::new(), false));
    }
    let ctx = opt.plan_ctx;
    let mut left_build = prefer.force_left_to_build();
    let mut right_build = prefer.force_right_to_build();
    if left_build && right_build {
        ctx.warn(
            ErrorCode::HintConflict,
            "Conflicting HASH_JOIN_BUILD and HASH_JOIN_PROBE hints detected. Both sides cannot be specified to use the same table. Please review the hints",
        );
        left_build = false;
        right_build = false;
    }

    let mut orientations: Vec<(usize, bool)> = Vec::with_capacity(2);
    match join.join_type {
        JoinType::Semi | JoinType::AntiSemi => {
            if opt.vars().enable_hash_join_v2 && can_use_hash_join_v2(join) {
                if !left_build {
                    orientations.push((1, false));
                }
                if !right_build {
                    orientations.push((1, true));
                }
            } else {
                orientations.push((1, false));
                if left_build || right_build {
                    ctx.warn_hint(format!(
                        "The HASH_JOIN_BUILD and HASH_JOIN_PROBE hints are not supported for {} with hash join version 1. Please remove these hints",
                        join.join_type
                    ));
                    left_build = false;
                    right_build = false;
                }
            }
        }
        JoinType::LeftOuterSemi | JoinType::AntiLeftOuterSemi => {
            orientations.push((1, false));
            if left_build || right_build {
                ctx.warn_hint(format!(
                    "HASH_JOIN_BUILD and HASH_JOIN_PROBE hints are not supported for {} because the build side is fixed. Please remove these hints",
                    join.join_type
                ));
                left_build = false;
                right_build = false;
            }
        }
        JoinType::LeftOuter => {
            if !left_build {
                orientations.push((1, false));
            }
            if !right_build {
                orientations.push((1, true));
            }
        }
        JoinType::RightOuter => {
            if !left_build {
                orientations.push((0, true));
            }
            if !right_build {
                orientations.push((0, false));
            }
        }
        JoinType::Inner => {
            if left_build {
                orientations.push((0, false));
            } else if right_build {
                orientations.push((1, false));
            } else {
                orientations.push((1, false));
                orientations.push((0, false));
            }
        }
    }

    let mut joins = Vec::with_capacity(orientations.len());
    for (inner_idx, use_outer_to_build) in orientations {
        joins.push(get_hash_join(opt, plan, join, prop, inner_idx, use_outer_to_build)?);
    }

    let forced = prefer.contains(JoinPrefer::HASH_JOIN) || left_build || right_build;
    let skip = prefer.contains(JoinPrefer::NO_HASH_JOIN) || !opt.vars().enable_hash_join;
    if skip && !forced {
        return Ok((Vec::new(), false));
    }
    if skip {
        ctx.warn(
            ErrorCode::HintConflict,
            "A conflict between the HASH_JOIN hint and the NO_HASH_JOIN hint, or the tidb_opt_enable_hash_join system variable, the HASH_JOIN hint will take precedence.",
        );
    }
    Ok((joins, forced))
}

/// One root hash join. Children are unordered; when the request is bounded below
/// the join's estimate the probe side is scaled down proportionally.
pub fn get_hash_join(
    opt: &OptContext<'_>,
    plan: PlanRef,
    join: &LogicalJoin,
    prop: &PhysicalProperty,
    inner_idx: usize,
    use_outer_to_build: bool,
) -> PlanResult<Candidate> {
    let outer_idx = 1 - inner_idx;
    let base = PhysicalProperty {
        cte_producer_status: prop.cte_producer_status,
        no_cop_push_down: prop.no_cop_push_down,
        ..PhysicalProperty::default()
    };
    let mut child_props = vec![base.clone(), base];
    let join_rows = opt.stats(plan).row_count;
    if prop.expected() < join_rows {
        let outer = opt.child(plan, outer_idx)?;
        child_props[outer_idx].expected_cnt =
            OrderedFloat(opt.stats(outer).row_count * prop.expected() / join_rows);
    }
    let op = PhysicalOp::HashJoin(new_hash_join_op(join, inner_idx, use_outer_to_build));
    Ok(opt.candidate(plan, prop, op, child_props))
}

/// Offsets into `keys` of the longest prefix of `order` made of join keys.
fn key_offsets_by_order(order: &[ColumnId], keys: &[ColumnId]) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(order.len());
    for col in order {
        match keys.iter().position(|k| k == col) {
            Some(off) if !offsets.contains(&off) => offsets.push(off),
            _ => break,
        }
    }
    offsets
}

/// Merge joins over the orders the left child can deliver cheaply, plus an
/// enforced variant when hints leave nothing else.
pub fn get_merge_joins(
    opt: &OptContext<'_>,
    plan: PlanRef,
    join: &LogicalJoin,
    prefer: JoinPrefer,
    prop: &PhysicalProperty,
) -> PlanResult<Vec<Candidate>> {
    if join.equal_conds.is_empty() || join.is_naaj() || prop.task_type != TaskType::Root {
        return Ok(Vec::new());
    }
    if prefer.contains(JoinPrefer::NO_MERGE_JOIN) && !prefer.contains(JoinPrefer::MERGE_JOIN) {
        return Ok(Vec::new());
    }
    let (same_order, desc) = prop.all_same_order();
    if !same_order {
        return Ok(Vec::new());
    }
    let left_keys = join.left_keys();
    let right_keys = join.right_keys();
    let left = opt.child(plan, 0)?;

    let mut seen: HashSet<Vec<usize>> = HashSet::new();
    let mut joins = Vec::new();
    for order in possible_orders(opt, left)? {
        let offsets = key_offsets_by_order(&order, &left_keys);
        if offsets.is_empty() || !seen.insert(offsets.clone()) {
            continue;
        }
        if let Some(cand) = merge_join_with_offsets(opt, plan, join, prop, &offsets, desc, false) {
            joins.push(cand);
        }
    }

    let hash_skipped = prefer.contains(JoinPrefer::NO_HASH_JOIN) || !opt.vars().enable_hash_join;
    if joins.is_empty() && (prefer.contains(JoinPrefer::MERGE_JOIN) || hash_skipped) {
        let all: Vec<usize> = (0..left_keys.len().min(right_keys.len())).collect();
        if let Some(cand) = merge_join_with_offsets(opt, plan, join, prop, &all, desc, true) {
            joins.push(cand);
        }
    }
    Ok(joins)
}

fn merge_join_with_offsets(
    opt: &OptContext<'_>,
    plan: PlanRef,
    join: &LogicalJoin,
    prop: &PhysicalProperty,
    offsets: &[usize],
    desc: bool,
    enforced: bool,
) -> Option<Candidate> {
    let lk: Vec<ColumnId> = offsets.iter().map(|i| join.equal_conds[*i].left).collect();
    let rk: Vec<ColumnId> = offsets.iter().map(|i| join.equal_conds[*i].right).collect();
    let output_keys = if join.join_type == JoinType::RightOuter { &rk } else { &lk };
    let output_order = sort_items_from_cols(output_keys, desc);
    let request_is_prefix = prop.sort_items.len() <= output_order.len()
        && prop.sort_items.iter().zip(&output_order).all(|(r, o)| r == o);
    if !request_is_prefix {
        return None;
    }

    let mut residual: Vec<Expr> = join
        .equal_conds
        .iter()
        .enumerate()
        .filter(|(i, _)| !offsets.contains(i))
        .map(|(_, c)| c.to_expr())
        .collect();
    residual.extend(join.other_conds.iter().cloned());

    let child = |keys: &[ColumnId]| PhysicalProperty {
        sort_items: sort_items_from_cols(keys, desc),
        cte_producer_status: prop.cte_producer_status,
        can_add_enforcer: enforced,
        ..PhysicalProperty::default()
    };
    let op = PhysicalOp::MergeJoin(MergeJoinOp {
        join_type: join.join_type,
        left_keys: lk.clone(),
        right_keys: rk.clone(),
        left_conds: join.left_conds.clone(),
        right_conds: join.right_conds.clone(),
        other_conds: residual,
        desc,
    });
    Some(opt.candidate(plan, prop, op, vec![child(&lk), child(&rk)]))
}
