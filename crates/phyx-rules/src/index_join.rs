//! # Index-Join Family
//!
//! Index joins drive the inner side's access path with the outer rows' key
//! values: for every batch of outer rows the inner data source is read through
//! ranges built from those rows' keys, instead of being scanned once in full.
//! Three kinds share the machinery:
//!
//! | kind               | inner rows are matched by       | output order          |
//! |--------------------|---------------------------------|-----------------------|
//! | `IndexJoin`        | lookup per outer batch          | outer order           |
//! | `IndexHashJoin`    | hash table over the inner batch | outer order on demand |
//! | `IndexMergeJoin`   | merge on index order            | outer order           |
//!
//! They are built in two steps, because the ranges depend on the inner access
//! path, which is only chosen when the inner side is solved.
//!
//! ## Static Enumeration
//!
//! [`try_index_joins`] runs only for root requests and never when an equality
//! is null-safe (`<=>`). For each side that the join type allows as inner, it:
//!
//! 1. walks the inner subtree down to its data source. Only a data source, a
//!    union scan over it, and (with the multi-pattern switch) selections,
//!    projections and at most one aggregation are admissible on the way;
//!    anything else rules that side out. A union scan marks the pattern dirty,
//!    which excludes the merge kind;
//! 2. checks that some access path of the data source, the handle or an index,
//!    can be driven by the join keys; otherwise the side yields nothing;
//! 3. emits one candidate per feasible (kind, scan) pair. The outer request
//!    forwards the join request's order, with an expected count scaled to what
//!    the join needs. The inner request carries an [`IndexJoinRuntimeProp`]
//!    with the keys, the average inner rows per outer row and the hint mask.
//!
//! Hints then narrow the result. A forcing hint for a kind and side keeps only
//! the matching candidates and makes the set authoritative; when nothing
//! matches, the `NO_*` filters apply as usual and the driver may later report
//! the forcing hint as inapplicable. A kind that is both forced and filtered
//! raises a conflict warning, and the forcing hint wins.
//!
//! ## Inner Side Requests
//!
//! Operators between the join and the inner data source see the runtime
//! property on their request. [`admit_index_join_props`] drops their MPP
//! candidates and copies the property into every child request, so the data
//! source at the bottom receives it and builds an index-lookup task that records
//! its ranges and key offsets in an [`IndexJoinInfo`].
//!
//! ## Completion
//!
//! When the inner task is attached, [`complete_index_join`] takes that pending
//! information and copies it into the operator:
//!
//! - keys that feed the index stay join keys, renumbered densely, and range
//!   points referring to outer keys follow the renumbering;
//! - equalities that did not feed the index become residual conditions;
//! - residual column equalities between the two sides become extra hash keys,
//!   except those that came from an `IN` rewrite;
//! - the merge kind additionally requires orderable key types, no prefix index
//!   columns, no extra hash keys, and an outer order compatible with the index
//!   order. It records whether the outer side still has to be sorted.
//!
//! A combination that cannot run returns `false`, which invalidates the
//! candidate. The pending information is consumed by completion, so one inner
//! task never completes two joins.

use crate::data_source::best_index_join_path;
use crate::hints::{index_join_filter_bit, index_join_hint_bit};
use crate::OptContext;
use ordered_float::OrderedFloat;
use phyx_core::access_path::{IndexJoinRange, RangePoint};
use phyx_core::error::{ErrorCode, PlanResult};
use phyx_core::expr::{BinaryOp, ColumnId, ColumnTable, EqCond, Expr, JoinType, Schema, SortItem};
use phyx_core::hint::JoinPrefer;
use phyx_core::logical::{DataSource, LogicalJoin, LogicalOp};
use phyx_core::memo::PlanRef;
use phyx_core::physical::{Candidate, IndexJoinKind, IndexJoinOp, PhysicalOp};
use phyx_core::properties::{IndexJoinRuntimeProp, PhysicalProperty, TaskType};
use phyx_core::task::IndexJoinInfo;
use tracing::debug;

const KINDS: [IndexJoinKind; 3] = [
    IndexJoinKind::IndexJoin,
    IndexJoinKind::IndexHashJoin,
    IndexJoinKind::IndexMergeJoin,
];

/// The data source an index-join inner subtree reduces to.
struct InnerPattern<'a> {
    ds_plan: PlanRef,
    ds: &'a DataSource,
    /// A union scan merges uncommitted writes on the way.
    dirty: bool,
}

fn extract_inner_pattern<'a>(opt: &OptContext<'a>, inner: PlanRef) -> PlanResult<Option<InnerPattern<'a>>> {
    let multi = opt.vars().enable_inl_join_inner_multi_pattern;
    let mut cur = inner;
    let mut dirty = false;
    let mut num_agg = 0;
    loop {
        match opt.op(cur) {
            LogicalOp::DataSource(ds) => {
                if ds.prefer_tiflash {
                    return Ok(None);
                }
                return Ok(Some(InnerPattern {
                    ds_plan: cur,
                    ds,
                    dirty,
                }));
            }
            LogicalOp::UnionScan(_) => dirty = true,
            LogicalOp::Selection(_) | LogicalOp::Projection(_) if multi => {}
            LogicalOp::Aggregation(_) if multi => {
                num_agg += 1;
                if num_agg > 1 {
                    debug!(plan = %inner, "index join inner side with more than one aggregation");
                    return Ok(None);
                }
            }
            _ => return Ok(None),
        }
        cur = opt.child(cur, 0)?;
    }
}

/// Whether the child at `inner_idx` may be the inner side of `join_type`.
fn inner_side_allowed(join_type: JoinType, inner_idx: usize) -> bool {
    match inner_idx {
        0 => matches!(join_type, JoinType::Inner | JoinType::RightOuter),
        _ => !matches!(join_type, JoinType::RightOuter),
    }
}

/// Expected row count for the outer child so the join still meets `prop`.
fn outer_expected(opt: &OptContext<'_>, plan: PlanRef, outer: PlanRef, prop: &PhysicalProperty) -> f64 {
    let join_rows = opt.stats(plan).row_count;
    let outer_rows = opt.stats(outer).row_count;
    if prop.is_unbounded() || prop.expected() >= join_rows || join_rows <= 0.0 {
        return f64::MAX;
    }
    let rows_to_meet_first = ((outer_rows - join_rows) * opt.vars().order_ratio).max(0.0);
    outer_rows * prop.expected() / join_rows + rows_to_meet_first
}

fn enumerate_by_outer_idx(
    opt: &OptContext<'_>,
    plan: PlanRef,
    join: &LogicalJoin,
    prefer: JoinPrefer,
    prop: &PhysicalProperty,
    outer_idx: usize,
) -> PlanResult<Vec<Candidate>> {
    let inner_idx = 1 - outer_idx;
    let outer = opt.child(plan, outer_idx)?;
    let inner = opt.child(plan, inner_idx)?;
    let (same_order, desc) = prop.all_same_order();
    if !same_order || (!prop.is_sort_item_empty() && !prop.all_cols_from_schema(opt.schema(outer))) {
        return Ok(Vec::new());
    }
    let outer_keys = join.keys_of(outer_idx);
    let inner_keys = join.keys_of(inner_idx);
    if outer_keys.is_empty() {
        return Ok(Vec::new());
    }
    let Some(pattern) = extract_inner_pattern(opt, inner)? else {
        return Ok(Vec::new());
    };

    let outer_rows = opt.stats(outer).row_count;
    let avg_inner_row_cnt = if outer_rows > 0.0 {
        opt.stats(plan).row_count / outer_rows
    } else {
        1.0
    };
    let runtime_prop = |table_range_scan: bool, keep_order: bool| IndexJoinRuntimeProp {
        outer_join_keys: outer_keys.clone(),
        inner_join_keys: inner_keys.clone(),
        avg_inner_row_cnt: OrderedFloat(avg_inner_row_cnt),
        table_range_scan,
        other_conditions: join.other_conds.clone(),
        join_prefer: prefer,
        keep_order,
    };
    let ds_schema = opt.schema(pattern.ds_plan);
    let scans: Vec<bool> = [true, false]
        .into_iter()
        .filter(|trs| best_index_join_path(pattern.ds, ds_schema, &runtime_prop(*trs, false)).is_some())
        .collect();
    if scans.is_empty() {
        debug!(plan = %plan, inner = %inner, "no access path serves the index join keys");
        return Ok(Vec::new());
    }

    let outer_prop = PhysicalProperty {
        sort_items: prop.sort_items.clone(),
        expected_cnt: OrderedFloat(outer_expected(opt, plan, outer, prop)),
        ..PhysicalProperty::root()
    };
    let mut out = Vec::new();
    for kind in KINDS {
        if kind == IndexJoinKind::IndexMergeJoin && pattern.dirty {
            continue;
        }
        let keep_order = kind == IndexJoinKind::IndexMergeJoin;
        for &table_range_scan in &scans {
            let inner_prop = PhysicalProperty {
                index_join_prop: Some(Box::new(runtime_prop(table_range_scan, keep_order))),
                ..PhysicalProperty::root()
            };
            let op = IndexJoinOp {
                kind,
                join_type: join.join_type,
                inner_child_idx: inner_idx,
                outer_keys: outer_keys.clone(),
                inner_keys: inner_keys.clone(),
                equal_conds: join.equal_conds.clone(),
                left_conds: join.left_conds.clone(),
                right_conds: join.right_conds.clone(),
                other_conds: join.other_conds.clone(),
                table_range_scan,
                ranges: Vec::new(),
                key_off_to_idx_off: Vec::new(),
                idx_col_lens: Vec::new(),
                compare_filters: None,
                outer_hash_keys: Vec::new(),
                inner_hash_keys: Vec::new(),
                keep_outer_order: kind == IndexJoinKind::IndexHashJoin && !prop.is_sort_item_empty(),
                need_outer_sort: false,
                desc,
                key_off_to_key_off_order_by_idx: Vec::new(),
                completed: false,
            };
            let mut child_props = vec![PhysicalProperty::root(), PhysicalProperty::root()];
            child_props[outer_idx] = outer_prop.clone();
            child_props[inner_idx] = inner_prop;
            out.push(opt.candidate(plan, prop, PhysicalOp::IndexJoin(op), child_props));
        }
    }
    Ok(out)
}

fn hint_name(kind: IndexJoinKind) -> (&'static str, &'static str) {
    match kind {
        IndexJoinKind::IndexJoin => ("INL_JOIN", "NO_INDEX_JOIN"),
        IndexJoinKind::IndexHashJoin => ("INL_HASH_JOIN", "NO_INDEX_HASH_JOIN"),
        IndexJoinKind::IndexMergeJoin => ("INL_MERGE_JOIN", "NO_INDEX_MERGE_JOIN"),
    }
}

/// Index-join candidates for `join`. The flag reports that a hint forced the
/// returned candidates.
pub fn try_index_joins(
    opt: &OptContext<'_>,
    plan: PlanRef,
    join: &LogicalJoin,
    prefer: JoinPrefer,
    prop: &PhysicalProperty,
) -> PlanResult<(Vec<Candidate>, bool)> {
    if prop.task_type != TaskType::Root || join.has_null_eq() {
        return Ok((Vec::new(), false));
    }
    for kind in KINDS {
        let force = index_join_hint_bit(kind, 0) | index_join_hint_bit(kind, 1);
        if prefer.contains(force) && prefer.contains(index_join_filter_bit(kind)) {
            let (hint, no_hint) = hint_name(kind);
            opt.plan_ctx.warn(
                ErrorCode::HintConflict,
                format!("Some {hint} and {no_hint} hints conflict, {no_hint} may be ignored"),
            );
        }
    }

    let mut candidates = Vec::new();
    for outer_idx in [0, 1] {
        if inner_side_allowed(join.join_type, 1 - outer_idx) {
            candidates.extend(enumerate_by_outer_idx(opt, plan, join, prefer, prop, outer_idx)?);
        }
    }
    if !opt.vars().enable_index_merge_join {
        candidates.retain(|c| {
            !matches!(&c.op, PhysicalOp::IndexJoin(j) if j.kind == IndexJoinKind::IndexMergeJoin)
        });
    }

    let is_forced = |c: &Candidate| match &c.op {
        PhysicalOp::IndexJoin(j) => prefer.contains(index_join_hint_bit(j.kind, j.inner_child_idx)),
        _ => false,
    };
    if prefer.has_index_join_hints() {
        let forced: Vec<Candidate> = candidates.iter().filter(|c| is_forced(c)).cloned().collect();
        if !forced.is_empty() {
            return Ok((forced, true));
        }
    }
    candidates.retain(|c| match &c.op {
        PhysicalOp::IndexJoin(j) => !prefer.contains(index_join_filter_bit(j.kind)),
        _ => true,
    });
    Ok((candidates, false))
}

/// Narrow `cands` to what an index-join inner request admits: nothing placed in
/// MPP, and every child request forwarding the runtime property.
pub fn admit_index_join_props(prop: &PhysicalProperty, mut cands: Vec<Candidate>) -> Vec<Candidate> {
    let Some(ij) = &prop.index_join_prop else {
        return cands;
    };
    cands.retain(|c| c.task_type() != TaskType::Mpp);
    for cand in &mut cands {
        for child in &mut cand.child_props {
            child.index_join_prop = Some(ij.clone());
        }
    }
    cands
}

/// A residual condition as completion sees it.
struct Residual {
    expr: Expr,
    in_operand: bool,
}

/// `(outer, inner)` when `expr` is a column equality across the two sides.
fn cross_side_equality(expr: &Expr, inner: &Schema) -> Option<(ColumnId, ColumnId)> {
    let Expr::Binary {
        op: BinaryOp::Eq,
        left,
        right,
    } = expr
    else {
        return None;
    };
    let (l, r) = (left.as_column()?, right.as_column()?);
    match (inner.contains(l), inner.contains(r)) {
        (false, true) => Some((l, r)),
        (true, false) => Some((r, l)),
        _ => None,
    }
}

/// Fill `op` with the access details of its inner task and settle its keys.
///
/// Returns `false` when the combination cannot run, which invalidates the
/// candidate.
pub fn complete_index_join(
    op: &mut IndexJoinOp,
    info: IndexJoinInfo,
    inner: &Schema,
    outer_sort: &[SortItem],
    columns: &ColumnTable,
) -> bool {
    let IndexJoinInfo {
        key_off_to_idx_off,
        ranges,
        compare_filters,
        index_col_lens,
    } = info;
    if key_off_to_idx_off.len() != op.outer_keys.len() {
        return false;
    }

    let mut new_offsets = vec![None; key_off_to_idx_off.len()];
    let (mut outer_keys, mut inner_keys, mut idx_offs) = (Vec::new(), Vec::new(), Vec::new());
    let mut residuals = Vec::new();
    for (k, idx_off) in key_off_to_idx_off.iter().enumerate() {
        match idx_off {
            Some(off) => {
                new_offsets[k] = Some(outer_keys.len());
                outer_keys.push(op.outer_keys[k]);
                inner_keys.push(op.inner_keys[k]);
                idx_offs.push(Some(*off));
            }
            None => {
                let cond: Option<&EqCond> = op.equal_conds.get(k);
                if let Some(cond) = cond {
                    residuals.push(Residual {
                        expr: cond.to_expr(),
                        in_operand: cond.in_operand,
                    });
                }
            }
        }
    }
    if outer_keys.is_empty() {
        return false;
    }
    residuals.extend(op.other_conds.iter().map(|e| Residual {
        expr: e.clone(),
        in_operand: false,
    }));

    let mut outer_hash_keys = outer_keys.clone();
    let mut inner_hash_keys = inner_keys.clone();
    let mut kept = Vec::with_capacity(residuals.len());
    for residual in residuals.into_iter().rev() {
        if residual.in_operand {
            kept.push(residual.expr);
            continue;
        }
        match cross_side_equality(&residual.expr, inner) {
            Some((o, i)) => {
                outer_hash_keys.push(o);
                inner_hash_keys.push(i);
            }
            None => kept.push(residual.expr),
        }
    }
    kept.reverse();

    let ranges = ranges
        .into_iter()
        .map(|r| IndexJoinRange {
            points: r
                .points
                .into_iter()
                .map(|p| match p {
                    RangePoint::OuterKey(k) => RangePoint::OuterKey(new_offsets[k].unwrap_or(k)),
                    other => other,
                })
                .collect(),
        })
        .collect();

    if op.kind == IndexJoinKind::IndexMergeJoin {
        if outer_hash_keys.len() > outer_keys.len() {
            return false;
        }
        let unorderable = |c: &ColumnId| columns.field_type(*c).is_some_and(|t| t.is_enum_or_set());
        if outer_keys.iter().chain(&inner_keys).any(unorderable) {
            return false;
        }
        if index_col_lens.iter().any(Option::is_some) {
            return false;
        }
        let mut by_idx: Vec<usize> = (0..outer_keys.len()).collect();
        by_idx.sort_by_key(|&k| idx_offs[k]);
        let ordered_outer: Vec<ColumnId> = by_idx.iter().map(|&k| outer_keys[k]).collect();
        let keys_cover_sort = outer_sort.len() <= ordered_outer.len()
            && outer_sort.iter().zip(&ordered_outer).all(|(s, k)| s.col == *k);
        let sort_covers_keys = outer_sort.len() >= ordered_outer.len()
            && ordered_outer.iter().zip(outer_sort).all(|(k, s)| *k == s.col);
        if !outer_sort.is_empty() && !keys_cover_sort && !sort_covers_keys {
            return false;
        }
        op.need_outer_sort = !sort_covers_keys;
        op.desc = outer_sort.first().is_some_and(|s| s.desc);
        op.key_off_to_key_off_order_by_idx = by_idx;
    }

    op.outer_keys = outer_keys;
    op.inner_keys = inner_keys;
    op.key_off_to_idx_off = idx_offs;
    op.ranges = ranges;
    op.compare_filters = compare_filters;
    op.idx_col_lens = index_col_lens;
    op.outer_hash_keys = outer_hash_keys;
    op.inner_hash_keys = inner_hash_keys;
    op.other_conds = kept;
    op.equal_conds.clear();
    op.completed = true;
    true
}
