//! # Sort, Top-N and Limit
//!
//! ## Sort
//!
//! A root request whose order the sort's by-items cover gets two candidates: a
//! physical `Sort` over an unordered child, and a `NominalSort` asking the child
//! for the order itself (it is dropped before execution when the child delivers).
//! MPP requests only get the nominal form; sorting inside the fragment is the
//! enforcer's job.
//!
//! ## Top-N
//!
//! Top-N is offered at every placement it can be pushed to, plus a `Limit` over a
//! sorted child when the by-items are plain columns. The choice between a pushed
//! and a root copy is made after attach (see [`crate::hints`]).
//!
//! A single ascending vector-distance by-item directly over an unfiltered table
//! also yields an MPP Top-N whose child request carries the search, so the scan
//! can answer it from a vector index.

use crate::OptContext;
use ordered_float::OrderedFloat;
use phyx_core::error::PlanResult;
use phyx_core::expr::{sort_items_from_by_items, ByItem, Expr, SortItem};
use phyx_core::logical::{Limit, LogicalOp, Sort, TopN};
use phyx_core::memo::PlanRef;
use phyx_core::physical::{Candidate, CandidateSet, LimitOp, PhysicalOp, TopNOp};
use phyx_core::properties::{PhysicalProperty, TaskType, VectorSearchProp};

/// Whether the request's order is a prefix of `items`.
pub fn match_items(prop: &PhysicalProperty, items: &[ByItem]) -> bool {
    if items.len() < prop.sort_items.len() {
        return false;
    }
    prop.sort_items
        .iter()
        .zip(items)
        .all(|(s, b)| s.desc == b.desc && b.expr.as_column() == Some(s.col))
}

/// The column an order-preserving expression sorts by, and in which direction.
fn single_column(expr: &Expr, desc: bool) -> Option<SortItem> {
    match expr {
        Expr::Column(col) => Some(SortItem { col: *col, desc }),
        Expr::Function { name, args, .. } if args.len() == 1 => match name.to_ascii_lowercase().as_str() {
            "unaryminus" => single_column(&args[0], !desc),
            "cast" | "abs_unsigned" => single_column(&args[0], desc),
            _ => None,
        },
        _ => None,
    }
}

/// Sort items for `items`, and whether every item was a bare column.
fn sort_items_with_funcs(items: &[ByItem]) -> Option<(Vec<SortItem>, bool)> {
    let mut only_column = true;
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        only_column &= item.expr.is_column();
        out.push(single_column(&item.expr, item.desc)?);
    }
    Some((out, only_column))
}

pub fn exhaust_sort(opt: &OptContext<'_>, plan: PlanRef, sort: &Sort, prop: &PhysicalProperty) -> CandidateSet {
    match prop.task_type {
        TaskType::Root if match_items(prop, &sort.by_items) => {
            let child = PhysicalProperty {
                cte_producer_status: prop.cte_producer_status,
                no_cop_push_down: prop.no_cop_push_down,
                ..PhysicalProperty::root()
            };
            let mut cands = vec![opt.candidate(
                plan,
                prop,
                PhysicalOp::Sort {
                    by_items: sort.by_items.clone(),
                },
                vec![child],
            )];
            if let Some((sort_items, only_column)) = sort_items_with_funcs(&sort.by_items) {
                let child = PhysicalProperty {
                    sort_items,
                    expected_cnt: prop.expected_cnt,
                    no_cop_push_down: prop.no_cop_push_down,
                    ..PhysicalProperty::root()
                };
                cands.push(opt.candidate(
                    plan,
                    prop,
                    PhysicalOp::NominalSort {
                        by_items: sort.by_items.clone(),
                        only_column,
                    },
                    vec![child],
                ));
            }
            CandidateSet::new(cands, true)
        }
        TaskType::Mpp => match sort_items_with_funcs(&sort.by_items) {
            Some((sort_items, true)) => {
                let mut child = prop.clone_essential_fields();
                child.sort_items = sort_items;
                let op = PhysicalOp::NominalSort {
                    by_items: sort.by_items.clone(),
                    only_column: true,
                };
                CandidateSet::new(vec![opt.candidate(plan, prop, op, vec![child])], true)
            }
            _ => CandidateSet::empty(),
        },
        _ => CandidateSet::empty(),
    }
}

/// Placements a Top-N or Limit may be pushed to, in enumeration order.
fn limit_task_types(opt: &OptContext<'_>) -> Vec<TaskType> {
    let mut types = vec![TaskType::CopSingle, TaskType::CopMulti, TaskType::Root];
    if opt.vars().is_mpp_allowed() {
        types.push(TaskType::Mpp);
    }
    types
}

fn limit_expected(offset: u64, count: u64) -> OrderedFloat<f64> {
    OrderedFloat(offset.saturating_add(count) as f64)
}

// Top-N and Limit keep their logical statistics: the output is bounded by the
// count already.
fn unscaled(opt: &OptContext<'_>, plan: PlanRef, op: PhysicalOp, child: PhysicalProperty) -> Candidate {
    Candidate::new(op, vec![child], opt.stats(plan).clone(), opt.schema(plan).clone())
}

pub fn exhaust_topn(opt: &OptContext<'_>, plan: PlanRef, topn: &TopN, prop: &PhysicalProperty) -> PlanResult<CandidateSet> {
    if !match_items(prop, &topn.by_items) {
        return Ok(CandidateSet::empty());
    }
    let mut cands = topn_candidates(opt, plan, topn, prop)?;
    cands.extend(limit_over_sorted(opt, plan, topn, prop));
    Ok(CandidateSet::new(cands, true))
}

fn topn_op(topn: &TopN) -> TopNOp {
    TopNOp {
        by_items: topn.by_items.clone(),
        partition_by: topn.partition_by.clone(),
        offset: topn.offset,
        count: topn.count,
        vector_search: None,
    }
}

fn topn_candidates(opt: &OptContext<'_>, plan: PlanRef, topn: &TopN, prop: &PhysicalProperty) -> PlanResult<Vec<Candidate>> {
    let types = limit_task_types(opt);
    let mut cands = Vec::with_capacity(types.len() + 1);
    for task_type in types {
        let child = PhysicalProperty {
            task_type,
            cte_producer_status: prop.cte_producer_status,
            no_cop_push_down: prop.no_cop_push_down,
            ..PhysicalProperty::default()
        };
        cands.push(unscaled(opt, plan, PhysicalOp::TopN(topn_op(topn)), child));
    }
    if let Some(cand) = vector_search_topn(opt, plan, topn, prop)? {
        cands.push(cand);
    }
    Ok(cands)
}

fn vector_search_topn(
    opt: &OptContext<'_>,
    plan: PlanRef,
    topn: &TopN,
    prop: &PhysicalProperty,
) -> PlanResult<Option<Candidate>> {
    if !opt.vars().is_mpp_allowed() {
        return Ok(None);
    }
    let [item] = topn.by_items.as_slice() else {
        return Ok(None);
    };
    // vector indexes only serve ascending distance
    if item.desc {
        return Ok(None);
    }
    let Some(info) = item.expr.as_vector_search(&opt.plan_ctx.columns) else {
        return Ok(None);
    };
    match opt.op(opt.child(plan, 0)?) {
        LogicalOp::DataSource(ds) if ds.pushed_conds.is_empty() => {}
        _ => return Ok(None),
    }
    let top_k = u32::try_from(topn.offset.saturating_add(topn.count)).unwrap_or(u32::MAX);
    let child = PhysicalProperty {
        task_type: TaskType::Mpp,
        cte_producer_status: prop.cte_producer_status,
        vector_prop: Some(VectorSearchProp {
            info: info.clone(),
            top_k,
        }),
        ..PhysicalProperty::default()
    };
    let op = TopNOp {
        vector_search: Some(info),
        ..topn_op(topn)
    };
    Ok(Some(unscaled(opt, plan, PhysicalOp::TopN(op), child)))
}

/// `Limit` over a child already sorted on the by-items.
fn limit_over_sorted(opt: &OptContext<'_>, plan: PlanRef, topn: &TopN, prop: &PhysicalProperty) -> Vec<Candidate> {
    let Some(sort_items) = sort_items_from_by_items(&topn.by_items) else {
        return Vec::new();
    };
    [TaskType::CopSingle, TaskType::CopMulti, TaskType::Root]
        .into_iter()
        .map(|task_type| {
            let child = PhysicalProperty {
                task_type,
                expected_cnt: limit_expected(topn.offset, topn.count),
                sort_items: sort_items.clone(),
                cte_producer_status: prop.cte_producer_status,
                no_cop_push_down: prop.no_cop_push_down,
                ..PhysicalProperty::default()
            };
            let op = PhysicalOp::Limit(LimitOp {
                partition_by: topn.partition_by.clone(),
                offset: topn.offset,
                count: topn.count,
            });
            unscaled(opt, plan, op, child)
        })
        .collect()
}

pub fn exhaust_limit(opt: &OptContext<'_>, plan: PlanRef, limit: &Limit, prop: &PhysicalProperty) -> CandidateSet {
    if !prop.is_sort_item_empty() {
        return CandidateSet::empty();
    }
    let cands = limit_task_types(opt)
        .into_iter()
        .map(|task_type| {
            let child = PhysicalProperty {
                task_type,
                expected_cnt: limit_expected(limit.offset, limit.count),
                cte_producer_status: prop.cte_producer_status,
                no_cop_push_down: prop.no_cop_push_down,
                ..PhysicalProperty::default()
            };
            let op = PhysicalOp::Limit(LimitOp {
                partition_by: limit.partition_by.clone(),
                offset: limit.offset,
                count: limit.count,
            });
            unscaled(opt, plan, op, child)
        })
        .collect();
    CandidateSet::new(cands, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use phyx_core::access_path::HandleKind;
    use phyx_core::expr::{ColumnId, FieldType, ScalarValue, Schema};
    use phyx_core::logical::DataSource;
    use phyx_core::memo::NodeId;
    use phyx_core::session::SessionVars;
    use phyx_core::stats::StatsInfo;

    fn vars(allow_mpp: bool) -> SessionVars {
        SessionVars {
            allow_mpp,
            ..SessionVars::default()
        }
    }

    fn with_op(f: &Fixture, node: NodeId, vars: SessionVars, prop: &PhysicalProperty) -> (CandidateSet, Vec<String>) {
        let ctx = f.ctx(vars);
        let opt = OptContext::new(&f.arena, &ctx);
        let plan = PlanRef::Direct(node);
        let set = match &f.arena.node(node).op {
            LogicalOp::Sort(s) => exhaust_sort(&opt, plan, s, prop),
            LogicalOp::TopN(t) => exhaust_topn(&opt, plan, t, prop).unwrap(),
            LogicalOp::Limit(l) => exhaust_limit(&opt, plan, l, prop),
            other => panic!("unexpected {}", other.name()),
        };
        let warnings = ctx.warnings().into_iter().map(|w| w.message).collect();
        (set, warnings)
    }

    fn sort_over_table(f: &mut Fixture, by_items: Vec<ByItem>) -> (NodeId, Vec<ColumnId>) {
        let (t, cols) = f.table("t", &["a", "b"], 1000.0);
        let node = f.add(LogicalOp::Sort(Sort { by_items }), vec![t], cols.clone(), 1000.0);
        (node, cols)
    }

    fn names(set: &CandidateSet) -> Vec<&'static str> {
        set.candidates.iter().map(|c| c.op.name()).collect()
    }

    #[test]
    fn test_sort_offers_physical_and_nominal() {
        let mut f = Fixture::new();
        let (node, cols) = sort_over_table(&mut f, vec![ByItem::col(ColumnId(0), true)]);
        let prop = PhysicalProperty::with_sort(vec![SortItem::desc(cols[0])]);
        let (set, _) = with_op(&f, node, vars(false), &prop);
        assert_eq!(names(&set), vec!["Sort", "NominalSort"]);
        assert!(set.candidates[0].child_props[0].is_sort_item_empty());
        assert_eq!(set.candidates[1].child_props[0].sort_items, vec![SortItem::desc(cols[0])]);
        for cand in &set.candidates {
            assert!(prop.satisfied_by(&cand.delivered()));
        }

        let other = PhysicalProperty::with_sort(vec![SortItem::asc(cols[0])]);
        assert!(with_op(&f, node, vars(false), &other).0.is_empty());
        let cop = PhysicalProperty::with_task(TaskType::CopSingle);
        assert!(with_op(&f, node, vars(false), &cop).0.is_empty());
    }

    #[test]
    fn test_sort_by_function_stays_nominal_at_root_only() {
        let mut f = Fixture::new();
        let by = ByItem {
            expr: Expr::func("unaryminus", vec![Expr::col(ColumnId(1))]),
            desc: false,
        };
        let (node, cols) = sort_over_table(&mut f, vec![by]);
        let (set, _) = with_op(&f, node, vars(true), &PhysicalProperty::root());
        assert_eq!(names(&set), vec!["Sort", "NominalSort"]);
        assert!(matches!(set.candidates[1].op, PhysicalOp::NominalSort { only_column: false, .. }));
        assert_eq!(set.candidates[1].child_props[0].sort_items, vec![SortItem::desc(cols[1])]);

        let mpp = PhysicalProperty::with_task(TaskType::Mpp);
        assert!(with_op(&f, node, vars(true), &mpp).0.is_empty());
    }

    #[test]
    fn test_mpp_sort_is_nominal() {
        let mut f = Fixture::new();
        let (node, cols) = sort_over_table(&mut f, vec![ByItem::col(ColumnId(0), false)]);
        let (set, _) = with_op(&f, node, vars(true), &PhysicalProperty::with_task(TaskType::Mpp));
        assert_eq!(names(&set), vec!["NominalSort"]);
        let child = &set.candidates[0].child_props[0];
        assert_eq!(child.task_type, TaskType::Mpp);
        assert_eq!(child.sort_items, vec![SortItem::asc(cols[0])]);
    }

    fn topn_over(f: &mut Fixture, child: NodeId, by_items: Vec<ByItem>, schema: Vec<ColumnId>) -> NodeId {
        let topn = TopN {
            by_items,
            partition_by: vec![],
            offset: 5,
            count: 10,
            prefer_limit_to_cop: false,
        };
        f.add(LogicalOp::TopN(topn), vec![child], schema, 15.0)
    }

    #[test]
    fn test_topn_pushes_everywhere_and_offers_limits() {
        let mut f = Fixture::new();
        let (t, cols) = f.table("t", &["a", "b"], 1000.0);
        let node = topn_over(&mut f, t, vec![ByItem::col(cols[1], false)], cols.clone());
        let (set, _) = with_op(&f, node, vars(true), &PhysicalProperty::root());
        assert_eq!(
            names(&set),
            vec!["TopN", "TopN", "TopN", "TopN", "Limit", "Limit", "Limit"]
        );
        let placements: Vec<TaskType> = set.candidates.iter().map(|c| c.child_props[0].task_type).collect();
        assert_eq!(
            placements,
            vec![
                TaskType::CopSingle,
                TaskType::CopMulti,
                TaskType::Root,
                TaskType::Mpp,
                TaskType::CopSingle,
                TaskType::CopMulti,
                TaskType::Root,
            ]
        );
        let limit_child = &set.candidates[4].child_props[0];
        assert_eq!(limit_child.expected(), 15.0);
        assert_eq!(limit_child.sort_items, vec![SortItem::asc(cols[1])]);
        assert!(set.candidates[0].child_props[0].is_unbounded());
    }

    #[test]
    fn test_topn_rejects_foreign_order() {
        let mut f = Fixture::new();
        let (t, cols) = f.table("t", &["a", "b"], 1000.0);
        let node = topn_over(&mut f, t, vec![ByItem::col(cols[1], false)], cols.clone());
        let prop = PhysicalProperty::with_sort(vec![SortItem::asc(cols[0])]);
        assert!(with_op(&f, node, vars(false), &prop).0.is_empty());
    }

    fn vector_table(f: &mut Fixture, conds: Vec<Expr>) -> (NodeId, ColumnId) {
        let id = f.col("docs", "id");
        let v = f.columns.add(Some("docs"), "embedding", FieldType::Vector);
        let ds = DataSource {
            table: "docs".into(),
            handle: HandleKind::RowId,
            paths: vec![],
            pushed_conds: conds,
            prefer_tiflash: false,
            is_partitioned: false,
        };
        let node = f
            .arena
            .add(LogicalOp::DataSource(ds), vec![], Schema::new(vec![id, v]), StatsInfo::new(1e6));
        (node, v)
    }

    fn distance(v: ColumnId) -> Expr {
        let query = Expr::Literal(ScalarValue::Vector(vec![OrderedFloat(0.5), OrderedFloat(1.0)]));
        Expr::func("vec_cosine_distance", vec![Expr::col(v), query])
    }

    #[test]
    fn test_vector_distance_topn_asks_for_ann_scan() {
        let mut f = Fixture::new();
        let (ds, v) = vector_table(&mut f, vec![]);
        let by = ByItem {
            expr: distance(v),
            desc: false,
        };
        let node = topn_over(&mut f, ds, vec![by], vec![v]);
        let (set, _) = with_op(&f, node, vars(true), &PhysicalProperty::root());
        // four placements, the ANN variant, no limits (the by-item is not a column)
        assert_eq!(set.len(), 5);
        let ann = &set.candidates[4];
        let vp = ann.child_props[0].vector_prop.as_ref().unwrap();
        assert_eq!(vp.top_k, 15);
        assert_eq!(vp.info.column, v);
        assert!(matches!(&ann.op, PhysicalOp::TopN(t) if t.vector_search.is_some()));

        let (set, _) = with_op(&f, node, vars(false), &PhysicalProperty::root());
        assert!(set.candidates.iter().all(|c| c.child_props[0].vector_prop.is_none()));
    }

    #[test]
    fn test_filtered_table_gets_no_ann_topn() {
        let mut f = Fixture::new();
        let (ds, v) = vector_table(&mut f, vec![Expr::eq(Expr::col(ColumnId(0)), Expr::int(1))]);
        let by = ByItem {
            expr: distance(v),
            desc: false,
        };
        let node = topn_over(&mut f, ds, vec![by], vec![v]);
        let (set, _) = with_op(&f, node, vars(true), &PhysicalProperty::root());
        assert_eq!(set.len(), 4);
    }

    #[test]
    fn test_limit_needs_unsorted_request() {
        let mut f = Fixture::new();
        let (t, cols) = f.table("t", &["a"], 1000.0);
        let limit = Limit {
            partition_by: vec![],
            offset: 0,
            count: 3,
            prefer_limit_to_cop: false,
        };
        let node = f.add(LogicalOp::Limit(limit), vec![t], cols.clone(), 3.0);
        let (set, _) = with_op(&f, node, vars(false), &PhysicalProperty::root());
        assert_eq!(set.len(), 3);
        assert!(set.candidates.iter().all(|c| c.child_props[0].expected() == 3.0));

        let sorted = PhysicalProperty::with_sort(vec![SortItem::asc(cols[0])]);
        assert!(with_op(&f, node, vars(false), &sorted).0.is_empty());
    }
}
