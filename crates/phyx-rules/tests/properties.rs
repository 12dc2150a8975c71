//! Properties the enumerator must keep for any input, not only hand-picked ones.

mod common;

use common::Query;
use phyx_core::access_path::{AccessPath, IndexInfo};
use phyx_core::cost::DefaultCostModel;
use phyx_core::expr::{
    AggFuncDesc, AggFuncName, BinaryOp, ByItem, ColumnId, EqCond, Expr, JoinType, SortItem, StoreType,
};
use phyx_core::hint::{JoinHints, JoinPrefer};
use phyx_core::logical::{LogicalAggregation, LogicalJoin, LogicalOp, Projection, Selection, Sort, TopN};
use phyx_core::memo::{LogicalView, NodeId, PlanRef};
use phyx_core::physical::PhysicalOp;
use phyx_core::properties::{PhysicalProperty, TaskType};
use phyx_core::session::SessionVars;
use phyx_core::task::Task;
use phyx_core::ErrorCode;
use phyx_rules::attach::Attacher;
use phyx_rules::impl_mpp::prefer_mpp_bcj;
use phyx_rules::predicate_pushdown::push_down_predicates;
use phyx_rules::{OptContext, PhysicalOptimizer, SearchConfig};
use proptest::prelude::*;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const HINT_BITS: &[JoinPrefer] = &[
    JoinPrefer::MERGE_JOIN,
    JoinPrefer::HASH_JOIN,
    JoinPrefer::RIGHT_AS_INLJ_INNER,
    JoinPrefer::RIGHT_AS_INLHJ_INNER,
    JoinPrefer::LEFT_AS_HJ_BUILD,
    JoinPrefer::RIGHT_AS_HJ_BUILD,
    JoinPrefer::BC_JOIN,
    JoinPrefer::SHUFFLE_JOIN,
    JoinPrefer::NO_HASH_JOIN,
    JoinPrefer::NO_INDEX_JOIN,
];

fn mask(bits: &[bool]) -> JoinPrefer {
    bits.iter()
        .zip(HINT_BITS)
        .filter(|(on, _)| **on)
        .fold(JoinPrefer::NONE, |acc, (_, bit)| acc | *bit)
}

/// `t1 JOIN t2 ON t1.a = t2.a`, both tables with a columnar replica and an
/// index on `t2.a`.
fn join_query(left_rows: f64, right_rows: f64, prefer: JoinPrefer) -> (Query, NodeId) {
    let mut q = Query::new();
    let (t1, c1) = q.table("t1", &["a", "b"], left_rows);
    let (t2, c2) = q.table("t2", &["a", "b"], right_rows);
    q.path(t1, AccessPath::table(StoreType::TiFlash, left_rows));
    q.path(t2, AccessPath::table(StoreType::TiFlash, right_rows));
    q.path(t2, AccessPath::index(IndexInfo::new("ia", vec![c2[0]]), right_rows));
    let mut join = LogicalJoin::new(JoinType::Inner, vec![EqCond::new(c1[0], c2[0])]);
    join.hints = JoinHints {
        prefer,
        inl_join_tables: vec!["t2".to_string()],
        inl_hash_join_tables: vec!["t2".to_string()],
        ..JoinHints::default()
    };
    let node = q.join(join, t1, t2, left_rows.max(right_rows));
    (q, node)
}

// ---------------------------------------------------------------------------
// Hint determinism and conflict symmetry
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn enumeration_is_deterministic(
        left in 1.0f64..1_000_000.0,
        right in 1.0f64..1_000_000.0,
        bits in proptest::collection::vec(any::<bool>(), HINT_BITS.len()),
        mpp in any::<bool>(),
    ) {
        let (q, join) = join_query(left, right, mask(&bits));
        let vars = SessionVars {
            allow_mpp: mpp,
            ..SessionVars::default()
        };
        let run = || {
            let ctx = q.ctx(vars.clone());
            let set = q.enumerate(&ctx, join, &PhysicalProperty::root());
            (set, ctx.warnings())
        };
        let (first, first_warnings) = run();
        let (second, second_warnings) = run();
        prop_assert_eq!(first, second);
        prop_assert_eq!(first_warnings, second_warnings);
    }
}

#[test_log::test]
fn conflicting_build_hints_cancel_in_any_order() {
    let orders = [
        JoinPrefer::LEFT_AS_HJ_BUILD | JoinPrefer::RIGHT_AS_HJ_BUILD,
        JoinPrefer::RIGHT_AS_HJ_BUILD | JoinPrefer::LEFT_AS_HJ_BUILD,
    ];
    let mut outcomes = Vec::new();
    for prefer in orders {
        let (q, join) = join_query(10_000.0, 100.0, prefer | JoinPrefer::HASH_JOIN);
        let ctx = q.ctx(SessionVars {
            allow_mpp: false,
            ..SessionVars::default()
        });
        let set = q.enumerate(&ctx, join, &PhysicalProperty::root());
        let builds: Vec<usize> = set
            .candidates
            .iter()
            .filter_map(|c| match &c.op {
                PhysicalOp::HashJoin(h) => Some(h.build_child_idx()),
                _ => None,
            })
            .collect();
        // both orientations survive once the side hints are neutralized
        assert_eq!(builds.len(), 2, "{:?}", builds);
        let codes: Vec<ErrorCode> = ctx.warnings().into_iter().map(|w| w.code).collect();
        assert!(codes.contains(&ErrorCode::HintConflict));
        outcomes.push((builds, codes));
    }
    assert_eq!(outcomes[0], outcomes[1]);
}

// ---------------------------------------------------------------------------
// Every offered candidate delivers what was asked for
// ---------------------------------------------------------------------------

const SHAPES: usize = 7;

/// One operator over `t(a, b)` (or a join of two such tables); returns the
/// query, the operator's node and the column a sorted request may name.
fn shape(kind: usize, rows: f64, desc: bool, count: u64) -> (Query, NodeId, ColumnId) {
    let mut q = Query::new();
    let (t, cols) = q.table("t", &["a", "b"], rows);
    let by_a = vec![ByItem {
        expr: Expr::col(cols[0]),
        desc,
    }];
    let node = match kind {
        0 => {
            let (t2, c2) = q.table("t2", &["a", "b"], rows);
            q.path(t2, AccessPath::index(IndexInfo::new("ia", vec![c2[0]]), rows));
            let join = LogicalJoin::new(JoinType::Inner, vec![EqCond::new(cols[0], c2[0])]);
            q.join(join, t, t2, rows)
        }
        1 => {
            let (t2, c2) = q.table("t2", &["a", "b"], rows);
            let join = LogicalJoin::new(JoinType::LeftOuter, vec![EqCond::new(cols[0], c2[0])]);
            q.join(join, t, t2, rows)
        }
        2 => {
            let mut agg = LogicalAggregation::new(
                vec![Expr::col(cols[0])],
                vec![AggFuncDesc::new(AggFuncName::Count, vec![Expr::col(cols[1])])],
            );
            agg.possible_properties = vec![vec![cols[0]]];
            agg.input_count = rows;
            q.add(LogicalOp::Aggregation(agg), t, vec![cols[0]], (rows / 10.0).max(1.0))
        }
        3 => q.add(LogicalOp::Sort(Sort { by_items: by_a }), t, cols.clone(), rows),
        4 => {
            let topn = TopN {
                by_items: by_a,
                partition_by: vec![],
                offset: 0,
                count,
                prefer_limit_to_cop: false,
            };
            q.add(LogicalOp::TopN(topn), t, cols.clone(), (count as f64).min(rows))
        }
        5 => {
            let filter = Expr::binary(BinaryOp::Gt, Expr::col(cols[1]), Expr::int(5));
            q.add(
                LogicalOp::Selection(Selection { conds: vec![filter] }),
                t,
                cols.clone(),
                rows / 2.0,
            )
        }
        _ => {
            let exprs = cols.iter().map(|c| Expr::col(*c)).collect();
            q.add(LogicalOp::Projection(Projection { exprs }), t, cols.clone(), rows)
        }
    };
    (q, node, cols[0])
}

proptest! {
    #[test]
    fn authoritative_candidates_satisfy_the_request(
        kind in 0..SHAPES,
        rows in 1.0f64..1_000_000.0,
        desc in any::<bool>(),
        sorted in any::<bool>(),
        count in 1u64..1_000,
        mpp in any::<bool>(),
    ) {
        let (q, node, col) = shape(kind, rows, desc, count);
        let prop = if sorted {
            PhysicalProperty::with_sort(vec![SortItem { col, desc }])
        } else {
            PhysicalProperty::root()
        };
        let ctx = q.ctx(SessionVars {
            allow_mpp: mpp,
            ..SessionVars::default()
        });
        let set = q.enumerate(&ctx, node, &prop);
        if set.authoritative {
            for cand in &set.candidates {
                let delivered = cand.delivered();
                prop_assert!(
                    prop.satisfied_by(&delivered),
                    "{} under {:?} delivers {:?}",
                    cand.op.name(),
                    prop,
                    delivered
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Index join completion
// ---------------------------------------------------------------------------

#[test_log::test]
fn index_join_completion_consumes_pending_state() {
    let (q, join) = join_query(10_000.0, 1_000.0, JoinPrefer::RIGHT_AS_INLJ_INNER);
    let ctx = q.ctx(SessionVars {
        allow_mpp: false,
        ..SessionVars::default()
    });
    let opt = OptContext::new(&q.arena, &ctx);
    let cost_model = DefaultCostModel::default();
    let mut search = PhysicalOptimizer::new(opt, Arc::new(DefaultCostModel::default()), SearchConfig::default());

    let set = search.enumerate(PlanRef::Direct(join), &PhysicalProperty::root()).unwrap();
    let cand = set
        .candidates
        .iter()
        .find(|c| c.op.as_index_join().is_some())
        .expect("an index join candidate");
    let children = q.arena.children(PlanRef::Direct(join));
    let outer = search.find_best_task(children[0], &cand.child_props[0]).unwrap();
    let inner = search.find_best_task(children[1], &cand.child_props[1]).unwrap();
    assert!(inner.index_join_info().is_some());

    let attacher = Attacher::new(&opt, &cost_model);
    let task = attacher.attach(cand, vec![outer.clone(), inner.clone()]).unwrap();
    assert!(!task.is_invalid());
    assert!(task.index_join_info().is_none());
    let plan = task.into_root_plan().unwrap();
    let completed = plan.op.as_index_join().map(|j| j.completed);
    assert_eq!(completed, Some(true));

    // once taken, the pending information is gone and cannot complete a second join
    let mut drained = inner;
    assert!(drained.take_index_join_info().is_some());
    assert!(drained.take_index_join_info().is_none());
    let again = attacher.attach(cand, vec![outer, drained]).unwrap();
    assert!(matches!(again, Task::Invalid));
}

// ---------------------------------------------------------------------------
// Broadcast monotonicity
// ---------------------------------------------------------------------------

fn prefers_broadcast(left: f64, right: f64, stores: u32) -> bool {
    let (q, join) = join_query(left, right, JoinPrefer::NONE);
    let ctx = q.ctx(SessionVars {
        mpp_store_count: stores,
        prefer_bcj_by_exchange_data_size: true,
        ..SessionVars::default()
    });
    let opt = OptContext::new(&q.arena, &ctx);
    let LogicalOp::Join(logical) = q.arena.op(PlanRef::Direct(join)) else {
        panic!("expected a join");
    };
    prefer_mpp_bcj(&opt, PlanRef::Direct(join), logical).unwrap()
}

proptest! {
    #[test]
    fn fewer_stores_never_turn_broadcast_into_shuffle(
        left in 1.0f64..1_000_000.0,
        right in 1.0f64..1_000_000.0,
        fewer in 1u32..8,
        extra in 0u32..8,
    ) {
        if prefers_broadcast(left, right, fewer + extra) {
            prop_assert!(prefers_broadcast(left, right, fewer));
        }
    }

    #[test]
    fn growing_the_probe_side_keeps_broadcast(
        small in 1.0f64..10_000.0,
        big in 10_000.0f64..1_000_000.0,
        growth in 0.0f64..1_000_000.0,
        stores in 2u32..8,
    ) {
        if prefers_broadcast(big, small, stores) {
            prop_assert!(prefers_broadcast(big + growth, small, stores));
        }
    }
}

// ---------------------------------------------------------------------------
// Predicate push-down feeding the search
// ---------------------------------------------------------------------------

#[test_log::test]
fn pushed_filter_runs_in_the_coprocessor() {
    let mut q = Query::new();
    let (t, cols) = q.table("t", &["a", "b"], 10_000.0);
    let filter = Expr::binary(BinaryOp::Gt, Expr::col(cols[1]), Expr::int(5));
    q.add(
        LogicalOp::Selection(Selection {
            conds: vec![filter.clone()],
        }),
        t,
        cols.clone(),
        2_000.0,
    );
    q.arena = push_down_predicates(&q.arena).unwrap();
    let root = q.arena.root().unwrap();
    assert_eq!(q.arena.len(), 1);
    assert_eq!(root, NodeId(0));

    let ctx = q.ctx(SessionVars::default());
    let plan = q.optimize(&ctx, root);
    assert_eq!(plan.op_names(), vec!["TableReader", "Selection", "TableFullScan"]);
    assert_eq!(plan.task_type, TaskType::Root);
}
