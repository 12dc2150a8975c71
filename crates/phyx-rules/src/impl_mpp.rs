//! # MPP Hash Joins
//!
//! The columnar engine only runs hash joins, in one of two exchange shapes:
//!
//! - **Broadcast**: the build side is replicated to every node and the probe
//!   side stays where it is. Cheap when the build side is small.
//! - **Shuffle**: both sides are hash-partitioned on the join keys.
//!
//! [`prefer_mpp_bcj`] picks the shape when no hint does, either by comparing the
//! estimated exchange volume of both shapes or by the broadcast thresholds.

use crate::impl_join::new_hash_join_op;
use crate::OptContext;
use ordered_float::OrderedFloat;
use phyx_core::error::{ErrorCode, PlanResult};
use phyx_core::expr::{Expr, JoinType, StoreType};
use phyx_core::hint::JoinPrefer;
use phyx_core::logical::LogicalJoin;
use phyx_core::memo::PlanRef;
use phyx_core::physical::{Candidate, MppJoinKind, PhysicalOp};
use phyx_core::properties::{PartitionColumn, PartitionSpec, PhysicalProperty, TaskType};
use phyx_core::stats::StatsInfo;

/// Rows and, when column sizes are known, bytes moved by an exchange.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ExchangeVolume {
    rows: f64,
    bytes: Option<f64>,
}

fn child_fits_broadcast(opt: &OptContext<'_>, child: PlanRef) -> bool {
    let vars = opt.vars();
    let stats = opt.stats(child);
    match opt.plan_ctx.oracle.avg_row_size(stats, &opt.schema(child).columns) {
        None => vars.broadcast_join_threshold_count == -1 || stats.count() < vars.broadcast_join_threshold_count,
        Some(avg) => {
            let size = avg * stats.count() as f64;
            vars.broadcast_join_threshold_size == -1 || size < vars.broadcast_join_threshold_size as f64
        }
    }
}

fn with_bytes(opt: &OptContext<'_>, child: PlanRef, stats: &StatsInfo, rows: f64) -> ExchangeVolume {
    let bytes = opt
        .plan_ctx
        .oracle
        .avg_row_size(stats, &opt.schema(child).columns)
        .map(|avg| avg * rows);
    ExchangeVolume { rows, bytes }
}

/// Broadcasting `child` to the other `stores - 1` nodes.
fn broadcast_volume(opt: &OptContext<'_>, child: PlanRef, stores: u32) -> ExchangeVolume {
    let stats = opt.stats(child);
    let rows = stats.count() as f64 * (stores as f64 - 1.0);
    with_bytes(opt, child, stats, rows)
}

/// Hash-partitioning `child`: all but one node's share moves.
fn hash_volume(opt: &OptContext<'_>, child: PlanRef, stores: u32) -> ExchangeVolume {
    let stats = opt.stats(child);
    let rows = stats.count() as f64 * (stores as f64 - 1.0) / stores as f64;
    with_bytes(opt, child, stats, rows)
}

fn combine(a: ExchangeVolume, b: ExchangeVolume, f: fn(f64, f64) -> f64) -> ExchangeVolume {
    ExchangeVolume {
        rows: f(a.rows, b.rows),
        bytes: match (a.bytes, b.bytes) {
            (Some(x), Some(y)) => Some(f(x, y)),
            _ => None,
        },
    }
}

/// Broadcast wins when its volume, scaled by the store count to account for
/// every node building the full hash table, does not exceed the shuffle volume.
fn broadcast_fits(bc: ExchangeVolume, hash: ExchangeVolume, stores: u32) -> bool {
    let scale = stores as f64;
    match (bc.bytes, hash.bytes) {
        (Some(bc_bytes), Some(hash_bytes)) => bc_bytes * scale <= hash_bytes,
        _ => bc.rows * scale <= hash.rows,
    }
}

/// Whether a broadcast join should be tried instead of a shuffle join.
pub fn prefer_mpp_bcj(opt: &OptContext<'_>, plan: PlanRef, join: &LogicalJoin) -> PlanResult<bool> {
    let vars = opt.vars();
    if join.equal_conds.is_empty() && vars.allow_cartesian_bcj == 2 {
        return Ok(true);
    }
    let left = opt.child(plan, 0)?;
    let right = opt.child(plan, 1)?;
    let only_check_right = matches!(
        join.join_type,
        JoinType::LeftOuter | JoinType::Semi | JoinType::AntiSemi
    );
    let only_check_left = join.join_type == JoinType::RightOuter;

    let stores = vars.mpp_store_count;
    if vars.prefer_bcj_by_exchange_data_size && stores > 0 {
        let hash = combine(hash_volume(opt, left, stores), hash_volume(opt, right, stores), |a, b| a + b);
        if !(only_check_left || only_check_right) {
            let bc = combine(
                broadcast_volume(opt, left, stores),
                broadcast_volume(opt, right, stores),
                f64::min,
            );
            return Ok(broadcast_fits(bc, hash, stores));
        }
        // With a single store and a fixed build side, fall back to the thresholds.
        if stores > 1 {
            let side = if only_check_right { right } else { left };
            return Ok(broadcast_fits(broadcast_volume(opt, side, stores), hash, stores));
        }
    }

    Ok(if only_check_right {
        child_fits_broadcast(opt, right)
    } else if only_check_left {
        child_fits_broadcast(opt, left)
    } else {
        child_fits_broadcast(opt, left) || child_fits_broadcast(opt, right)
    })
}

fn join_exprs_pushable(opt: &OptContext<'_>, join: &LogicalJoin) -> bool {
    if join.has_null_eq() {
        return false;
    }
    let ctx = opt.plan_ctx.push_down_ctx();
    let pushable = |e: &Expr| e.can_push_to(&ctx, StoreType::TiFlash);
    join.equal_conds.iter().all(|c| pushable(&c.to_expr()))
        && join.left_conds.iter().all(pushable)
        && join.right_conds.iter().all(pushable)
        && join.other_conds.iter().all(pushable)
}

fn potential_partition_keys(join: &LogicalJoin) -> (Vec<PartitionColumn>, Vec<PartitionColumn>) {
    join.equal_conds
        .iter()
        .map(|c| (PartitionColumn::new(c.left), PartitionColumn::new(c.right)))
        .unzip()
}

pub(crate) fn choose_partition_keys(keys: &[PartitionColumn], matches: &[usize]) -> Vec<PartitionColumn> {
    matches.iter().map(|i| keys[*i].clone()).collect()
}

/// Build side for an MPP join: the smaller input unless the join type fixes it,
/// then adjusted by build-side hints where the side is not fixed.
fn preferred_build_index(
    opt: &OptContext<'_>,
    join: &LogicalJoin,
    prefer: JoinPrefer,
    left_rows: i64,
    right_rows: i64,
    use_bcj: bool,
) -> usize {
    let ctx = opt.plan_ctx;
    let vars = opt.vars();
    let mut force_left = prefer.force_left_to_build();
    let mut force_right = prefer.force_right_to_build();
    if force_left && force_right {
        ctx.warn(
            ErrorCode::HintConflict,
            "Some HASH_JOIN_BUILD and HASH_JOIN_PROBE hints are conflicts, please check the hints",
        );
        force_left = false;
        force_right = false;
    }

    let mut build = 0;
    let mut fixed = false;
    match join.join_type {
        JoinType::Inner => {
            if left_rows > right_rows {
                build = 1;
            }
        }
        jt if jt.is_semi() => {
            let both_sides_usable = !use_bcj
                && !join.is_naaj()
                && !join.equal_conds.is_empty()
                && matches!(jt, JoinType::Semi | JoinType::AntiSemi);
            build = 1;
            if both_sides_usable {
                if !vars.mpp_outer_join_fixed_build_side && right_rows > left_rows {
                    build = 0;
                }
            } else {
                fixed = true;
            }
        }
        _ => {
            if use_bcj || join.is_naaj() || join.equal_conds.is_empty() || vars.mpp_outer_join_fixed_build_side {
                if !vars.mpp_outer_join_fixed_build_side {
                    fixed = true;
                }
                if join.join_type == JoinType::LeftOuter {
                    build = 1;
                }
            } else if left_rows > right_rows {
                build = 1;
            }
        }
    }

    if force_left || force_right {
        let matched = (force_left && build == 0) || (force_right && build == 1);
        if !matched {
            if fixed {
                ctx.warn_hint("Some HASH_JOIN_BUILD and HASH_JOIN_PROBE hints cannot be utilized for MPP joins, please check the hints");
            } else {
                build = 1 - build;
            }
        }
    }
    build
}

/// One MPP hash join in the requested exchange shape, if the join qualifies.
pub fn try_mpp_hash_join(
    opt: &OptContext<'_>,
    plan: PlanRef,
    join: &LogicalJoin,
    prefer: JoinPrefer,
    prop: &PhysicalProperty,
    use_bcj: bool,
) -> PlanResult<Vec<Candidate>> {
    if !prop.is_sort_item_empty() {
        return Ok(Vec::new());
    }
    if prop.task_type != TaskType::Root && prop.task_type != TaskType::Mpp {
        return Ok(Vec::new());
    }
    let ctx = opt.plan_ctx;
    let vars = opt.vars();
    let jt = join.join_type.to_string();
    if ctx.push_down_ctx().is_blocked(&jt, StoreType::TiFlash) {
        ctx.warn_mpp_blocked(format!(
            "join type `{jt}` is blocked by blacklist, check `table mysql.expr_pushdown_blacklist;` for more information."
        ));
        return Ok(Vec::new());
    }
    if join.equal_conds.is_empty() {
        if !use_bcj {
            ctx.warn_mpp_blocked("`Cartesian Product` is only supported by broadcast join, check value and documents of variables `tidb_broadcast_join_threshold_size` and `tidb_broadcast_join_threshold_count`.");
            return Ok(Vec::new());
        }
        if vars.allow_cartesian_bcj == 0 {
            ctx.warn_mpp_blocked("`Cartesian Product` is only supported by broadcast join, check value and documents of variable `tidb_opt_broadcast_cartesian_join`.");
            return Ok(Vec::new());
        }
    }
    if !join.left_conds.is_empty() && join.join_type != JoinType::LeftOuter {
        ctx.warn_mpp_blocked("there is a join that is not `left join` but has left conditions, which is not supported by mpp now, see github.com/pingcap/tidb/issues/26090 for more information.");
        return Ok(Vec::new());
    }
    if !join.right_conds.is_empty() && join.join_type != JoinType::RightOuter {
        ctx.warn_mpp_blocked("there is a join that is not `right join` but has right conditions, which is not supported by mpp now.");
        return Ok(Vec::new());
    }
    if prop.partition == PartitionSpec::Broadcast || !join_exprs_pushable(opt, join) {
        return Ok(Vec::new());
    }

    let left = opt.child(plan, 0)?;
    let right = opt.child(plan, 1)?;
    let left_stats = opt.stats(left);
    let right_stats = opt.stats(right);
    let build = preferred_build_index(opt, join, prefer, left_stats.count(), right_stats.count(), use_bcj);
    let probe = 1 - build;

    let mpp_prop = |partition: PartitionSpec, expected: f64, can_add_enforcer: bool| PhysicalProperty {
        task_type: TaskType::Mpp,
        partition,
        expected_cnt: OrderedFloat(expected),
        can_add_enforcer,
        cte_producer_status: prop.cte_producer_status,
        ..PhysicalProperty::default()
    };
    let (mut left_keys, mut right_keys) = potential_partition_keys(join);
    let mut child_props = vec![PhysicalProperty::default(), PhysicalProperty::default()];
    if use_bcj {
        child_props[build] = mpp_prop(PartitionSpec::Broadcast, f64::MAX, true);
        let join_rows = opt.stats(plan).row_count;
        let mut expected = f64::MAX;
        if prop.expected() < join_rows {
            let probe_stats = if probe == 0 { left_stats } else { right_stats };
            expected = probe_stats.row_count * prop.expected() / join_rows;
        }
        child_props[probe] = if let PartitionSpec::Hash(cols) = &prop.partition {
            let probe_keys = if build == 1 { &left_keys } else { &right_keys };
            if prop.is_subset_of(probe_keys).is_empty() {
                return Ok(Vec::new());
            }
            mpp_prop(PartitionSpec::Hash(cols.clone()), expected, false)
        } else {
            mpp_prop(PartitionSpec::Any, expected, false)
        };
    } else {
        if matches!(prop.partition, PartitionSpec::Hash(_)) {
            let matches = match join.join_type {
                JoinType::Inner => {
                    let m = prop.is_subset_of(&left_keys);
                    if m.is_empty() {
                        prop.is_subset_of(&right_keys)
                    } else {
                        m
                    }
                }
                // Only the preserved side's keys survive an outer join unchanged.
                JoinType::RightOuter => prop.is_subset_of(&right_keys),
                _ => prop.is_subset_of(&left_keys),
            };
            if matches.is_empty() {
                return Ok(Vec::new());
            }
            left_keys = choose_partition_keys(&left_keys, &matches);
            right_keys = choose_partition_keys(&right_keys, &matches);
        }
        child_props[0] = mpp_prop(PartitionSpec::Hash(left_keys), f64::MAX, true);
        child_props[1] = mpp_prop(PartitionSpec::Hash(right_keys), f64::MAX, true);
    }

    let mut op = new_hash_join_op(join, build, false);
    op.store = StoreType::TiFlash;
    op.mpp = Some(if use_bcj {
        MppJoinKind::Broadcast
    } else {
        MppJoinKind::Shuffle
    });
    // MPP joins are too heavy for a LIMIT to stop early, so stats stay unscaled.
    Ok(vec![Candidate::new(
        PhysicalOp::HashJoin(op),
        child_props,
        opt.stats(plan).clone(),
        opt.schema(plan).clone(),
    )])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use phyx_core::expr::EqCond;
    use phyx_core::logical::LogicalOp;
    use phyx_core::memo::LogicalView;
    use phyx_core::session::SessionVars;
    use proptest::prelude::*;

    fn mpp_vars() -> SessionVars {
        SessionVars {
            allow_mpp: true,
            mpp_store_count: 3,
            ..Default::default()
        }
    }

    fn build(fx: &mut Fixture, jt: JoinType, left_rows: f64, right_rows: f64) -> (PlanRef, LogicalJoin) {
        let (t1, c1) = fx.table("t1", &["a"], left_rows);
        let (t2, c2) = fx.table("t2", &["a"], right_rows);
        let join = LogicalJoin::new(jt, vec![EqCond::new(c1[0], c2[0])]);
        let schema = c1.iter().chain(&c2).copied().collect();
        let node = fx.add(LogicalOp::Join(join.clone()), vec![t1, t2], schema, left_rows.max(right_rows));
        (PlanRef::Direct(node), join)
    }

    #[test]
    fn test_broadcast_builds_on_smaller_side() {
        let mut fx = Fixture::new();
        let (plan, join) = build(&mut fx, JoinType::Inner, 1_000_000.0, 100.0);
        let ctx = fx.ctx(mpp_vars());
        let opt = OptContext::new(&fx.arena, &ctx);
        assert!(prefer_mpp_bcj(&opt, plan, &join).unwrap());
        let cands = try_mpp_hash_join(&opt, plan, &join, JoinPrefer::NONE, &PhysicalProperty::root(), true).unwrap();
        assert_eq!(cands.len(), 1);
        let PhysicalOp::HashJoin(hj) = &cands[0].op else {
            panic!("expected a hash join")
        };
        assert_eq!(hj.build_child_idx(), 1);
        assert_eq!(hj.mpp, Some(MppJoinKind::Broadcast));
        assert_eq!(cands[0].child_props[1].partition, PartitionSpec::Broadcast);
        assert_eq!(cands[0].child_props[0].partition, PartitionSpec::Any);
    }

    #[test]
    fn test_shuffle_partitions_both_sides_on_keys() {
        let mut fx = Fixture::new();
        let (plan, join) = build(&mut fx, JoinType::Inner, 1_000_000.0, 900_000.0);
        let ctx = fx.ctx(mpp_vars());
        let opt = OptContext::new(&fx.arena, &ctx);
        let cands = try_mpp_hash_join(&opt, plan, &join, JoinPrefer::NONE, &PhysicalProperty::root(), false).unwrap();
        let props = &cands[0].child_props;
        assert_eq!(props[0].partition, PartitionSpec::Hash(vec![PartitionColumn::new(join.equal_conds[0].left)]));
        assert_eq!(props[1].partition, PartitionSpec::Hash(vec![PartitionColumn::new(join.equal_conds[0].right)]));
        assert!(props.iter().all(|p| p.can_add_enforcer && p.task_type == TaskType::Mpp));
    }

    #[test]
    fn test_cartesian_needs_broadcast() {
        let mut fx = Fixture::new();
        let (t1, c1) = fx.table("t1", &["a"], 10.0);
        let (t2, c2) = fx.table("t2", &["a"], 10.0);
        let join = LogicalJoin::new(JoinType::Inner, vec![]);
        let schema = c1.iter().chain(&c2).copied().collect();
        let plan = PlanRef::Direct(fx.add(LogicalOp::Join(join.clone()), vec![t1, t2], schema, 100.0));
        let mut vars = mpp_vars();
        vars.enforce_mpp = true;
        let ctx = fx.ctx(vars);
        let opt = OptContext::new(&fx.arena, &ctx);
        let cands = try_mpp_hash_join(&opt, plan, &join, JoinPrefer::NONE, &PhysicalProperty::root(), false).unwrap();
        assert!(cands.is_empty());
        assert_eq!(ctx.warnings()[0].code, ErrorCode::MppBlocked);
    }

    #[test]
    fn test_left_outer_join_fixes_build_side_under_broadcast() {
        let mut fx = Fixture::new();
        let (plan, join) = build(&mut fx, JoinType::LeftOuter, 10.0, 1_000.0);
        let ctx = fx.ctx(mpp_vars());
        let opt = OptContext::new(&fx.arena, &ctx);
        let prefer = JoinPrefer::LEFT_AS_HJ_BUILD;
        let cands = try_mpp_hash_join(&opt, plan, &join, prefer, &PhysicalProperty::root(), true).unwrap();
        let PhysicalOp::HashJoin(hj) = &cands[0].op else {
            panic!("expected a hash join")
        };
        assert_eq!(hj.build_child_idx(), 1);
        assert!(ctx.warnings()[0].message.contains("cannot be utilized for MPP joins"));
    }

    #[test]
    fn test_hash_request_must_match_probe_keys() {
        let mut fx = Fixture::new();
        let (plan, join) = build(&mut fx, JoinType::Inner, 1_000.0, 10.0);
        let ctx = fx.ctx(mpp_vars());
        let opt = OptContext::new(&fx.arena, &ctx);
        let mut prop = PhysicalProperty::with_task(TaskType::Mpp);
        prop.partition = PartitionSpec::Hash(vec![PartitionColumn::new(join.equal_conds[0].left)]);
        assert_eq!(
            try_mpp_hash_join(&opt, plan, &join, JoinPrefer::NONE, &prop, true).unwrap().len(),
            1
        );
        prop.partition = PartitionSpec::Hash(vec![PartitionColumn::new(join.equal_conds[0].right)]);
        assert!(try_mpp_hash_join(&opt, plan, &join, JoinPrefer::NONE, &prop, true)
            .unwrap()
            .is_empty());
    }

    proptest! {
        #[test]
        fn prop_bcj_is_monotone_in_build_size(small in 1.0f64..1_000.0, extra in 0.0f64..1_000_000.0) {
            let vars = SessionVars {
                broadcast_join_threshold_count: 5_000,
                ..mpp_vars()
            };
            let decide = |right_rows: f64| {
                let mut fx = Fixture::new();
                let (plan, join) = build(&mut fx, JoinType::LeftOuter, 1_000_000.0, right_rows);
                let ctx = fx.ctx(vars.clone());
                let opt = OptContext::new(&fx.arena, &ctx);
                assert_eq!(fx.arena.op(plan).name(), "Join");
                prefer_mpp_bcj(&opt, plan, &join).unwrap()
            };
            // Growing the broadcast side never turns a shuffle into a broadcast.
            if decide(small + extra) {
                prop_assert!(decide(small));
            }
        }
    }
}
