//! # Hint Arbitration
//!
//! Hints are applied twice. During enumeration each enumerator filters or
//! forces its own candidates (see `impl_join`, `index_join`, `impl_agg`). Once
//! the driver has attached real child tasks it asks [`apply_hint_preference`]
//! whether a finished candidate is the one a hint asked for: a preferred
//! candidate beats every non-preferred one regardless of cost, and cost only
//! decides among equals.
//!
//! When no candidate was preferred although the operator carried a hint,
//! [`record_warnings`] appends the matching "inapplicable" diagnostic.
//!
//! ## Top-N and Limit
//!
//! A pushed-down Top-N (or Limit) turns into a root task as soon as it is
//! attached to a cop child, so the decision cannot be read off the result.
//! [`EnumerateState`] remembers, across the candidates of one request, whether a
//! cop-fed candidate has been seen; after that the root-fed ones stop being
//! preferred.

use crate::impl_join::effective_join_prefer;
use crate::OptContext;
use phyx_core::error::ErrorCode;
use phyx_core::hint::{AggPrefer, JoinPrefer};
use phyx_core::logical::{LogicalAggregation, LogicalJoin, LogicalOp};
use phyx_core::physical::{Candidate, IndexJoinKind, MppAggMode, MppJoinKind, PhysicalOp};
use phyx_core::properties::PhysicalProperty;
use phyx_core::task::Task;

/// Cop-fed Top-N/Limit candidates seen so far for one request.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnumerateState {
    pub topn_cop_exist: bool,
    pub limit_cop_exist: bool,
}

/// Whether `cand`, attached over `child_tasks`, is what the operator's hints ask for.
pub fn apply_hint_preference(
    opt: &OptContext<'_>,
    op: &LogicalOp,
    cand: &Candidate,
    child_tasks: &[Task],
    state: &mut EnumerateState,
) -> bool {
    match op {
        LogicalOp::Join(join) => {
            prefer_merge_join(join, cand) || prefer_index_join_family(join, cand) || prefer_hash_join(join, cand)
        }
        LogicalOp::TopN(t) => {
            let meet_threshold = t.count + t.offset <= opt.vars().limit_push_down_threshold;
            prefer_limit_like(t.prefer_limit_to_cop, meet_threshold, true, child_tasks, state)
        }
        LogicalOp::Limit(l) => prefer_limit_like(l.prefer_limit_to_cop, true, false, child_tasks, state),
        LogicalOp::Aggregation(agg) => prefer_agg(opt, agg, child_tasks) || prefer_mpp_agg_phase(agg, cand),
        _ => false,
    }
}

fn first_child(child_tasks: &[Task]) -> Option<&Task> {
    child_tasks.first()
}

fn prefer_limit_like(
    prefer_to_cop: bool,
    meet_threshold: bool,
    is_topn: bool,
    child_tasks: &[Task],
    state: &mut EnumerateState,
) -> bool {
    let child = first_child(child_tasks);
    let is_cop = matches!(child, Some(Task::Cop(_)));
    if prefer_to_cop {
        return is_cop;
    }
    if !meet_threshold {
        return false;
    }
    let cop_exist = if is_topn {
        &mut state.topn_cop_exist
    } else {
        &mut state.limit_cop_exist
    };
    match child {
        Some(Task::Cop(_)) => {
            *cop_exist = true;
            true
        }
        Some(Task::Root(_)) => !*cop_exist,
        Some(Task::Mpp(_)) => true,
        _ => false,
    }
}

fn prefer_agg(opt: &OptContext<'_>, agg: &LogicalAggregation, child_tasks: &[Task]) -> bool {
    let child = first_child(child_tasks);
    if agg.has_distinct() {
        if opt.vars().allow_distinct_agg_push_down {
            return matches!(child, Some(Task::Cop(_)));
        }
        return matches!(child, Some(Task::Root(_)) | Some(Task::Mpp(_)));
    }
    agg.hints.agg_to_cop && matches!(child, Some(Task::Cop(_)))
}

/// `MPP_1PHASE_AGG()` / `MPP_2PHASE_AGG()`: the hash aggregation running in that mode.
fn prefer_mpp_agg_phase(agg: &LogicalAggregation, cand: &Candidate) -> bool {
    let (prefer, _) = agg.hints.resolve_conflicts();
    let wanted = if prefer.contains(AggPrefer::MPP_1PHASE_AGG) {
        MppAggMode::OnePhase
    } else if prefer.contains(AggPrefer::MPP_2PHASE_AGG) {
        MppAggMode::TwoPhase
    } else {
        return false;
    };
    matches!(&cand.op, PhysicalOp::HashAgg(a) if a.mpp == Some(wanted))
}

fn prefer_merge_join(join: &LogicalJoin, cand: &Candidate) -> bool {
    matches!(cand.op, PhysicalOp::MergeJoin(_)) && effective_join_prefer(join).contains(JoinPrefer::MERGE_JOIN)
}

/// The hint bit that forces `kind` with the inner side at `inner_idx`.
pub(crate) fn index_join_hint_bit(kind: IndexJoinKind, inner_idx: usize) -> JoinPrefer {
    match (kind, inner_idx) {
        (IndexJoinKind::IndexJoin, 0) => JoinPrefer::LEFT_AS_INLJ_INNER,
        (IndexJoinKind::IndexJoin, _) => JoinPrefer::RIGHT_AS_INLJ_INNER,
        (IndexJoinKind::IndexHashJoin, 0) => JoinPrefer::LEFT_AS_INLHJ_INNER,
        (IndexJoinKind::IndexHashJoin, _) => JoinPrefer::RIGHT_AS_INLHJ_INNER,
        (IndexJoinKind::IndexMergeJoin, 0) => JoinPrefer::LEFT_AS_INLMJ_INNER,
        (IndexJoinKind::IndexMergeJoin, _) => JoinPrefer::RIGHT_AS_INLMJ_INNER,
    }
}

/// The `NO_*` hint bit that filters `kind`.
pub(crate) fn index_join_filter_bit(kind: IndexJoinKind) -> JoinPrefer {
    match kind {
        IndexJoinKind::IndexJoin => JoinPrefer::NO_INDEX_JOIN,
        IndexJoinKind::IndexHashJoin => JoinPrefer::NO_INDEX_HASH_JOIN,
        IndexJoinKind::IndexMergeJoin => JoinPrefer::NO_INDEX_MERGE_JOIN,
    }
}

fn prefer_index_join_family(join: &LogicalJoin, cand: &Candidate) -> bool {
    let prefer = effective_join_prefer(join);
    if !prefer.has_index_join_hints() {
        return false;
    }
    match &cand.op {
        PhysicalOp::IndexJoin(ij) => prefer.contains(index_join_hint_bit(ij.kind, ij.inner_child_idx)),
        _ => false,
    }
}

fn prefer_hash_join(join: &LogicalJoin, cand: &Candidate) -> bool {
    let prefer = effective_join_prefer(join);
    let mut left_build = prefer.force_left_to_build();
    let mut right_build = prefer.force_right_to_build();
    if left_build && right_build {
        left_build = false;
        right_build = false;
    }
    let PhysicalOp::HashJoin(hj) = &cand.op else {
        return false;
    };
    if prefer.contains(JoinPrefer::SHUFFLE_JOIN) {
        return hj.mpp == Some(MppJoinKind::Shuffle);
    }
    if prefer.contains(JoinPrefer::BC_JOIN) {
        return hj.mpp == Some(MppJoinKind::Broadcast);
    }
    let build = hj.build_child_idx();
    let side_matches = (right_build && build == 1) || (left_build && build == 0);
    if prefer.contains(JoinPrefer::HASH_JOIN) && !(left_build || right_build) {
        return true;
    }
    side_matches
}

/// `INL_JOIN(t) or TIDB_INLJ(t)`-style inapplicable message for the strongest
/// index-join hint on `join`, if it carries one.
pub(crate) fn index_join_inapplicable_message(join: &LogicalJoin) -> Option<String> {
    let prefer = join.hints.prefer;
    let tables = |t: &[String]| t.join(", ");
    let mut msg = if prefer.contains(JoinPrefer::LEFT_AS_INLJ_INNER | JoinPrefer::RIGHT_AS_INLJ_INNER) {
        let t = tables(&join.hints.inl_join_tables);
        format!("Optimizer Hint INL_JOIN({t}) or TIDB_INLJ({t}) is inapplicable")
    } else if prefer.contains(JoinPrefer::LEFT_AS_INLHJ_INNER | JoinPrefer::RIGHT_AS_INLHJ_INNER) {
        format!(
            "Optimizer Hint INL_HASH_JOIN({}) is inapplicable",
            tables(&join.hints.inl_hash_join_tables)
        )
    } else if prefer.contains(JoinPrefer::LEFT_AS_INLMJ_INNER | JoinPrefer::RIGHT_AS_INLMJ_INNER) {
        format!(
            "Optimizer Hint INL_MERGE_JOIN({}) is inapplicable",
            tables(&join.hints.inl_merge_join_tables)
        )
    } else {
        return None;
    };
    if join.equal_conds.is_empty() {
        msg.push_str(" without column equal ON condition");
    }
    Some(msg)
}

/// Diagnostic for a hinted operator none of whose candidates was preferred.
pub fn record_warnings(opt: &OptContext<'_>, op: &LogicalOp, prop: &PhysicalProperty, in_enforce: bool) {
    let ctx = opt.plan_ctx;
    match op {
        LogicalOp::Aggregation(agg) if agg.hints.agg_to_cop => {
            ctx.warn(ErrorCode::HintInapplicable, "Optimizer Hint AGG_TO_COP is inapplicable");
        }
        LogicalOp::TopN(t) if t.prefer_limit_to_cop => {
            ctx.warn(ErrorCode::HintInapplicable, "Optimizer Hint LIMIT_TO_COP is inapplicable");
        }
        LogicalOp::Limit(l) if l.prefer_limit_to_cop => {
            ctx.warn(ErrorCode::HintInapplicable, "Optimizer Hint LIMIT_TO_COP is inapplicable");
        }
        LogicalOp::Join(join) => {
            let prefer = effective_join_prefer(join);
            if prefer.contains(JoinPrefer::SHUFFLE_JOIN) {
                ctx.warn_hint("The join can not push down to the MPP side, the shuffle_join() hint is invalid");
            } else if prefer.contains(JoinPrefer::BC_JOIN) {
                ctx.warn_hint("The join can not push down to the MPP side, the broadcast_join() hint is invalid");
            } else if prop.is_sort_item_empty() || in_enforce {
                if let Some(msg) = index_join_inapplicable_message(join) {
                    ctx.warn_hint(msg);
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phyx_core::expr::{ColumnId, EqCond, JoinType, Schema, StoreType};
    use phyx_core::hint::JoinHints;
    use phyx_core::memo::PlanArena;
    use phyx_core::physical::HashJoinOp;
    use phyx_core::stats::StatsInfo;
    use phyx_core::PlanContext;

    fn hash_join(inner: usize, mpp: Option<MppJoinKind>) -> Candidate {
        Candidate::new(
            PhysicalOp::HashJoin(HashJoinOp {
                join_type: JoinType::Inner,
                inner_child_idx: inner,
                use_outer_to_build: false,
                left_keys: vec![ColumnId(1)],
                right_keys: vec![ColumnId(2)],
                na_left_keys: vec![],
                na_right_keys: vec![],
                equal_conds: vec![EqCond::new(ColumnId(1), ColumnId(2))],
                left_conds: vec![],
                right_conds: vec![],
                other_conds: vec![],
                store: if mpp.is_some() { StoreType::TiFlash } else { StoreType::TiDb },
                mpp,
            }),
            vec![PhysicalProperty::root(), PhysicalProperty::root()],
            StatsInfo::new(1.0),
            Schema::default(),
        )
    }

    fn join_with(prefer: JoinPrefer) -> LogicalJoin {
        let mut j = LogicalJoin::new(JoinType::Inner, vec![EqCond::new(ColumnId(1), ColumnId(2))]);
        j.hints = JoinHints::new(prefer);
        j
    }

    #[test]
    fn test_build_side_hint_preference() {
        let join = join_with(JoinPrefer::LEFT_AS_HJ_BUILD);
        assert!(prefer_hash_join(&join, &hash_join(0, None)));
        assert!(!prefer_hash_join(&join, &hash_join(1, None)));
    }

    #[test]
    fn test_conflicting_build_hints_prefer_nothing() {
        let join = join_with(JoinPrefer::LEFT_AS_HJ_BUILD | JoinPrefer::RIGHT_AS_HJ_BUILD);
        assert!(!prefer_hash_join(&join, &hash_join(0, None)));
        assert!(!prefer_hash_join(&join, &hash_join(1, None)));
        let with_hash = join_with(
            JoinPrefer::HASH_JOIN | JoinPrefer::LEFT_AS_HJ_BUILD | JoinPrefer::RIGHT_AS_HJ_BUILD,
        );
        assert!(prefer_hash_join(&with_hash, &hash_join(1, None)));
    }

    #[test]
    fn test_shuffle_hint_needs_shuffle_join() {
        let join = join_with(JoinPrefer::SHUFFLE_JOIN);
        assert!(prefer_hash_join(&join, &hash_join(1, Some(MppJoinKind::Shuffle))));
        assert!(!prefer_hash_join(&join, &hash_join(1, Some(MppJoinKind::Broadcast))));
        assert!(!prefer_hash_join(&join, &hash_join(1, None)));
    }

    #[test]
    fn test_limit_prefers_cop_once_seen() {
        let arena = PlanArena::new();
        let ctx = PlanContext::default();
        let opt = OptContext::new(&arena, &ctx);
        let op = LogicalOp::Limit(phyx_core::logical::Limit {
            partition_by: vec![],
            offset: 0,
            count: 10,
            prefer_limit_to_cop: false,
        });
        let cand = hash_join(1, None);
        let mut state = EnumerateState::default();
        let root = Task::Invalid.convert_to_root();
        assert!(!apply_hint_preference(&opt, &op, &cand, &[root], &mut state));
        let plan = phyx_core::physical::PhysicalPlan::leaf(
            PhysicalOp::TableDual { rows: 1 },
            StatsInfo::new(1.0),
            Schema::default(),
            phyx_core::properties::TaskType::Root,
        );
        let root = Task::root(plan.clone());
        assert!(apply_hint_preference(&opt, &op, &cand, &[root.clone()], &mut state));
        let cop = Task::Cop(phyx_core::task::CopTask::table(plan, StoreType::TiKv));
        assert!(apply_hint_preference(&opt, &op, &cand, &[cop], &mut state));
        assert!(state.limit_cop_exist);
        assert!(!apply_hint_preference(&opt, &op, &cand, &[root], &mut state));
    }

    fn hash_agg(mpp: Option<MppAggMode>) -> Candidate {
        Candidate::new(
            PhysicalOp::HashAgg(phyx_core::physical::AggOp {
                group_by: vec![phyx_core::expr::Expr::col(ColumnId(1))],
                agg_funcs: vec![],
                mpp,
                partition_cols: vec![],
            }),
            vec![PhysicalProperty::root()],
            StatsInfo::new(1.0),
            Schema::default(),
        )
    }

    #[test]
    fn test_mpp_phase_hint_prefers_matching_mode() {
        let arena = PlanArena::new();
        let ctx = PlanContext::default();
        let opt = OptContext::new(&arena, &ctx);
        let mut agg = LogicalAggregation::new(vec![phyx_core::expr::Expr::col(ColumnId(1))], vec![]);
        agg.hints.prefer = AggPrefer::MPP_2PHASE_AGG;
        let op = LogicalOp::Aggregation(agg);
        let mut state = EnumerateState::default();

        let two = hash_agg(Some(MppAggMode::TwoPhase));
        assert!(apply_hint_preference(&opt, &op, &two, &[], &mut state));
        for other in [hash_agg(Some(MppAggMode::OnePhase)), hash_agg(Some(MppAggMode::Tidb)), hash_agg(None)] {
            assert!(!apply_hint_preference(&opt, &op, &other, &[], &mut state));
        }
    }

    #[test]
    fn test_conflicting_mpp_phase_hints_prefer_nothing() {
        let mut agg = LogicalAggregation::new(vec![], vec![]);
        agg.hints.prefer = AggPrefer::MPP_1PHASE_AGG | AggPrefer::MPP_2PHASE_AGG;
        assert!(!prefer_mpp_agg_phase(&agg, &hash_agg(Some(MppAggMode::OnePhase))));
        assert!(!prefer_mpp_agg_phase(&agg, &hash_agg(Some(MppAggMode::TwoPhase))));

        agg.hints.prefer = AggPrefer::MPP_1PHASE_AGG;
        assert!(prefer_mpp_agg_phase(&agg, &hash_agg(Some(MppAggMode::OnePhase))));
    }

    #[test]
    fn test_index_join_message_without_equal_condition() {
        let mut join = LogicalJoin::new(JoinType::Inner, vec![]);
        join.hints = JoinHints::new(JoinPrefer::RIGHT_AS_INLJ_INNER);
        join.hints.inl_join_tables = vec!["t2".to_string()];
        assert_eq!(
            index_join_inapplicable_message(&join).as_deref(),
            Some("Optimizer Hint INL_JOIN(t2) or TIDB_INLJ(t2) is inapplicable without column equal ON condition")
        );
    }

    #[test]
    fn test_record_warnings_for_shuffle_hint() {
        let arena = PlanArena::new();
        let ctx = PlanContext::default();
        let opt = OptContext::new(&arena, &ctx);
        let op = LogicalOp::Join(join_with(JoinPrefer::SHUFFLE_JOIN));
        record_warnings(&opt, &op, &PhysicalProperty::root(), false);
        let warnings = ctx.warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("shuffle_join()"));
    }
}
