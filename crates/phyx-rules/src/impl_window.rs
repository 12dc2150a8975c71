//! # Window Enumeration
//!
//! A window needs its input sorted on partition keys then order keys. At root
//! that is a plain sorted child request the enforcer may satisfy. In MPP the
//! order only has to hold within each partition, so the child is asked for a
//! hash partitioning on the partition keys (or a single partition when there are
//! none) plus a partition-scoped sort.

use crate::impl_mpp::choose_partition_keys;
use crate::OptContext;
use ordered_float::OrderedFloat;
use phyx_core::error::PlanResult;
use phyx_core::expr::{FieldType, FrameBound, FrameKind, StoreType};
use phyx_core::logical::Window;
use phyx_core::memo::PlanRef;
use phyx_core::physical::{Candidate, CandidateSet, PhysicalOp, WindowOp};
use phyx_core::properties::{PartitionColumn, PartitionSpec, PhysicalProperty, TaskType};

pub fn exhaust_window(
    opt: &OptContext<'_>,
    plan: PlanRef,
    window: &Window,
    prop: &PhysicalProperty,
) -> PlanResult<CandidateSet> {
    let mut windows = Vec::with_capacity(2);
    if opt.vars().is_mpp_allowed() {
        windows.extend(mpp_window(opt, plan, window, prop));
    }
    if prop.task_type == TaskType::Mpp {
        return Ok(CandidateSet::new(windows, true));
    }
    let child = PhysicalProperty {
        sort_items: window.child_sort_items(),
        can_add_enforcer: true,
        cte_producer_status: prop.cte_producer_status,
        no_cop_push_down: prop.no_cop_push_down,
        ..PhysicalProperty::root()
    };
    if !prop.is_prefix(&child) {
        return Ok(CandidateSet::empty());
    }
    windows.push(opt.candidate(plan, prop, PhysicalOp::Window(window_op(window, false)), vec![child]));
    Ok(CandidateSet::new(windows, true))
}

fn window_op(window: &Window, mpp: bool) -> WindowOp {
    WindowOp {
        funcs: window.funcs.clone(),
        partition_by: window.partition_by.clone(),
        order_by: window.order_by.clone(),
        frame: window.frame.clone(),
        mpp,
    }
}

/// Whether the columnar engine can run every function and the frame bounds,
/// warning under MPP enforcement when it cannot.
fn can_push_window(opt: &OptContext<'_>, window: &Window) -> bool {
    let ctx = opt.plan_ctx.push_down_ctx();
    let mut all_supported = true;
    for func in &window.funcs {
        if !func.can_push_to_tiflash(&ctx) {
            opt.plan_ctx.warn_mpp_blocked(format!(
                "window function `{}` or its arguments are not supported now.",
                func.name
            ));
            all_supported = false;
        } else if ctx.is_blocked(&func.name, StoreType::TiFlash) {
            opt.plan_ctx.warn_mpp_blocked(format!(
                "window function `{}` is blocked by blacklist, check `table mysql.expr_pushdown_blacklist;` for more information.",
                func.name
            ));
            return false;
        }
    }
    if !all_supported {
        return false;
    }

    let Some(frame) = window.frame.as_ref().filter(|f| f.kind == FrameKind::Ranges) else {
        return true;
    };
    for bound in [&frame.start, &frame.end] {
        if !bound.calc_funcs.iter().all(|e| e.can_push_to(&ctx, StoreType::TiFlash)) {
            opt.plan_ctx
                .warn_mpp_blocked("window function frame can't be pushed down");
            return false;
        }
    }
    let order_type = window
        .order_by
        .first()
        .and_then(|s| opt.plan_ctx.columns.field_type(s.col));
    if !comparable_in_mpp(order_type, &frame.start) || !comparable_in_mpp(order_type, &frame.end) {
        opt.plan_ctx.warn_mpp_blocked(
            "window function frame can't be pushed down, because Duration vs Datetime is invalid comparison as TiFlash can't handle it so far.",
        );
        return false;
    }
    true
}

/// The columnar engine cannot compare durations against other temporal types.
fn comparable_in_mpp(order_type: Option<FieldType>, bound: &FrameBound) -> bool {
    match (order_type, bound.cmp_type) {
        (Some(a), Some(b)) if a != b => a != FieldType::Duration && b != FieldType::Duration,
        _ => true,
    }
}

fn mpp_window(opt: &OptContext<'_>, plan: PlanRef, window: &Window, prop: &PhysicalProperty) -> Option<Candidate> {
    if !prop.is_sort_item_all_for_partition() {
        return None;
    }
    if !matches!(prop.task_type, TaskType::Root | TaskType::Mpp) || prop.partition == PartitionSpec::Broadcast {
        return None;
    }
    if !can_push_window(opt, window) {
        return None;
    }

    let by_items = window.child_sort_items();
    let mut child = PhysicalProperty {
        sort_items: by_items.clone(),
        sort_items_for_partition: by_items,
        task_type: TaskType::Mpp,
        expected_cnt: OrderedFloat(f64::MAX),
        can_add_enforcer: true,
        cte_producer_status: prop.cte_producer_status,
        ..PhysicalProperty::default()
    };
    if !prop.is_prefix(&child) {
        return None;
    }

    child.partition = if window.partition_by.is_empty() {
        PartitionSpec::Single
    } else {
        let mut keys: Vec<PartitionColumn> = window.partition_by.iter().map(|s| PartitionColumn::new(s.col)).collect();
        if matches!(prop.partition, PartitionSpec::Hash(_)) {
            let matches = prop.is_subset_of(&keys);
            if matches.is_empty() {
                return None;
            }
            keys = choose_partition_keys(&keys, &matches);
        }
        PartitionSpec::Hash(keys)
    };
    if prop.partition == PartitionSpec::Single && child.partition != PartitionSpec::Single {
        return None;
    }
    Some(opt.candidate(plan, prop, PhysicalOp::Window(window_op(window, true)), vec![child]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use phyx_core::expr::{ColumnId, Expr, Pushdown, SortItem, WindowFrame, WindowFuncDesc};
    use phyx_core::logical::LogicalOp;
    use phyx_core::memo::NodeId;
    use phyx_core::session::SessionVars;

    fn row_number() -> WindowFuncDesc {
        WindowFuncDesc {
            name: "row_number".into(),
            args: vec![],
            pushdown: Pushdown::default(),
        }
    }

    /// `row_number() over (partition by a order by b)` when `partitioned`,
    /// `over (order by b)` otherwise.
    fn setup(f: &mut Fixture, partitioned: bool, funcs: Vec<WindowFuncDesc>) -> (NodeId, Vec<ColumnId>) {
        let (t, cols) = f.table("t", &["a", "b"], 1000.0);
        let window = Window {
            funcs,
            partition_by: if partitioned { vec![SortItem::asc(cols[0])] } else { vec![] },
            order_by: vec![SortItem::asc(cols[1])],
            frame: None,
        };
        let node = f.add(LogicalOp::Window(window), vec![t], cols.clone(), 1000.0);
        (node, cols)
    }

    fn run(f: &Fixture, node: NodeId, vars: SessionVars, prop: &PhysicalProperty) -> (CandidateSet, Vec<String>) {
        let ctx = f.ctx(vars);
        let opt = OptContext::new(&f.arena, &ctx);
        let LogicalOp::Window(w) = &f.arena.node(node).op else {
            panic!("not a window");
        };
        let set = exhaust_window(&opt, PlanRef::Direct(node), w, prop).unwrap();
        let warnings = ctx.warnings().into_iter().map(|w| w.message).collect();
        (set, warnings)
    }

    fn mpp_flags(set: &CandidateSet) -> Vec<bool> {
        set.candidates
            .iter()
            .map(|c| matches!(&c.op, PhysicalOp::Window(w) if w.mpp))
            .collect()
    }

    #[test]
    fn test_root_and_mpp_windows() {
        let mut f = Fixture::new();
        let (node, cols) = setup(&mut f, true, vec![row_number()]);
        let (set, _) = run(&f, node, SessionVars::default(), &PhysicalProperty::root());
        assert_eq!(mpp_flags(&set), vec![true, false]);

        let mpp_child = &set.candidates[0].child_props[0];
        assert_eq!(mpp_child.partition, PartitionSpec::Hash(vec![PartitionColumn::new(cols[0])]));
        assert_eq!(mpp_child.sort_items_for_partition, mpp_child.sort_items);
        assert!(mpp_child.is_sort_item_all_for_partition());

        let root_child = &set.candidates[1].child_props[0];
        assert_eq!(root_child.sort_items, vec![SortItem::asc(cols[0]), SortItem::asc(cols[1])]);
        assert!(root_child.can_add_enforcer);

        let hashed_on_b = PhysicalProperty {
            partition: PartitionSpec::Hash(vec![PartitionColumn::new(cols[1])]),
            ..PhysicalProperty::with_task(TaskType::Mpp)
        };
        assert!(run(&f, node, SessionVars::default(), &hashed_on_b).0.is_empty());
    }

    #[test]
    fn test_unpartitioned_mpp_window_is_single() {
        let mut f = Fixture::new();
        let (node, _) = setup(&mut f, false, vec![row_number()]);
        let (set, _) = run(&f, node, SessionVars::default(), &PhysicalProperty::with_task(TaskType::Mpp));
        assert_eq!(mpp_flags(&set), vec![true]);
        assert_eq!(set.candidates[0].child_props[0].partition, PartitionSpec::Single);
    }

    #[test]
    fn test_global_order_request_keeps_window_at_root() {
        let mut f = Fixture::new();
        let (node, cols) = setup(&mut f, true, vec![row_number()]);
        let prop = PhysicalProperty::with_sort(vec![SortItem::asc(cols[0])]);
        let (set, _) = run(&f, node, SessionVars::default(), &prop);
        assert_eq!(mpp_flags(&set), vec![false]);

        let foreign = PhysicalProperty::with_sort(vec![SortItem::asc(cols[1])]);
        assert!(run(&f, node, SessionVars::default(), &foreign).0.is_empty());
    }

    #[test]
    fn test_unsupported_function_warns_under_enforce_mpp() {
        let mut f = Fixture::new();
        let func = WindowFuncDesc {
            name: "nth_value".into(),
            args: vec![Expr::col(ColumnId(1))],
            pushdown: Pushdown {
                tikv: true,
                tiflash: false,
            },
        };
        let (node, _) = setup(&mut f, true, vec![func]);
        let vars = SessionVars {
            enforce_mpp: true,
            ..SessionVars::default()
        };
        let (set, warnings) = run(&f, node, vars, &PhysicalProperty::root());
        assert_eq!(mpp_flags(&set), vec![false]);
        assert_eq!(
            warnings,
            vec!["MPP mode may be blocked because window function `nth_value` or its arguments are not supported now.".to_string()]
        );
    }

    #[test]
    fn test_blacklisted_function_blocks_mpp() {
        let mut f = Fixture::new();
        let (node, _) = setup(&mut f, true, vec![row_number()]);
        let vars = SessionVars {
            enforce_mpp: true,
            expr_pushdown_blacklist: vec!["ROW_NUMBER".into()],
            ..SessionVars::default()
        };
        let (set, warnings) = run(&f, node, vars, &PhysicalProperty::root());
        assert_eq!(mpp_flags(&set), vec![false]);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("is blocked by blacklist"));
    }

    #[test]
    fn test_duration_range_frame_stays_at_root() {
        let mut f = Fixture::new();
        let (node, _) = setup(&mut f, true, vec![row_number()]);
        let bound = FrameBound {
            unbounded: false,
            num: 1,
            calc_funcs: vec![],
            cmp_type: Some(FieldType::Duration),
        };
        if let LogicalOp::Window(w) = &mut f.arena.node_mut(node).op {
            w.frame = Some(WindowFrame {
                kind: FrameKind::Ranges,
                start: bound.clone(),
                end: bound,
            });
        }
        let vars = SessionVars {
            enforce_mpp: true,
            ..SessionVars::default()
        };
        let (set, warnings) = run(&f, node, vars, &PhysicalProperty::root());
        assert_eq!(mpp_flags(&set), vec![false]);
        assert!(warnings[0].ends_with("Duration vs Datetime is invalid comparison as TiFlash can't handle it so far."));
    }
}
