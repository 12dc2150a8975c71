//! # Leaf Tasks
//!
//! Data sources, CTE readers and table duals are not enumerated like the other
//! operators: the driver asks this module for the finished tasks a leaf can
//! produce under a request, one per usable access path.
//!
//! ## Plain Requests
//!
//! - **MPP**: a columnar table scan inside an MPP fragment. MPP scans deliver no
//!   order, so a sorted request gets nothing and the driver enforces a sort.
//! - **Cop / Root**: one cop task per row-store path (or columnar path when cop
//!   reads from TiFlash are allowed). A path joins a sorted request only when its
//!   key order covers the sort. Filters the storage cannot evaluate stay above the
//!   reader as a root selection.
//!
//! ## Index-Join Inner Side
//!
//! A request carrying an [`IndexJoinRuntimeProp`] asks for a scan whose ranges are
//! built from the outer rows. Index columns are consumed left to right: a join key
//! feeds the column from the outer row, an equality or `IN` over constants pins it,
//! and the first column that is neither ends the prefix. A range comparison against
//! an outer column on that stopping column becomes a compare filter. Among the
//! paths that use at least one join key, the one consuming the most columns wins.
//! The chosen mapping travels on the task as an [`IndexJoinInfo`] until the join
//! attaches and completes itself from it.

use crate::attach::{costed, to_root};
use crate::OptContext;
use phyx_core::access_path::{AccessPath, CompareFilters, HandleKind, IndexJoinRange, RangePoint};
use phyx_core::cost::CostModel;
use phyx_core::error::PlanResult;
use phyx_core::expr::{BinaryOp, ColumnId, Expr, ScalarValue, Schema, SortItem, StoreType};
use phyx_core::logical::{DataSource, LogicalOp};
use phyx_core::memo::PlanRef;
use phyx_core::physical::{IndexScanOp, PhysicalOp, TableScanOp};
use phyx_core::properties::{IndexJoinRuntimeProp, PartitionSpec, PhysicalProperty, TaskType};
use phyx_core::stats::StatsInfo;
use phyx_core::task::{CopTask, IndexJoinInfo, RootTask, Task};
use tracing::debug;

/// Orders the subtree under `plan` can deliver without a sort, as column lists.
///
/// Merge joins use these to pick key orders that avoid enforcers.
pub fn possible_orders(opt: &OptContext<'_>, plan: PlanRef) -> PlanResult<Vec<Vec<ColumnId>>> {
    let mut orders = match opt.op(plan) {
        LogicalOp::DataSource(ds) => ds
            .paths
            .iter()
            .filter(|p| !p.is_tiflash())
            .map(|p| p.delivered_order(&ds.handle))
            .filter(|o| !o.is_empty())
            .collect(),
        LogicalOp::Selection(_) | LogicalOp::UnionScan(_) | LogicalOp::Lock(_) => {
            possible_orders(opt, opt.child(plan, 0)?)?
        }
        LogicalOp::Projection(proj) => {
            let schema = opt.schema(plan);
            possible_orders(opt, opt.child(plan, 0)?)?
                .into_iter()
                .map(|order| {
                    order
                        .iter()
                        .map_while(|col| {
                            proj.exprs
                                .iter()
                                .position(|e| e.as_column() == Some(*col))
                                .and_then(|i| schema.columns.get(i).copied())
                        })
                        .collect::<Vec<_>>()
                })
                .filter(|o| !o.is_empty())
                .collect()
        }
        LogicalOp::Aggregation(agg) => agg.possible_properties.clone(),
        LogicalOp::Sort(sort) => {
            let cols: Vec<ColumnId> = sort
                .by_items
                .iter()
                .map_while(|b| b.expr.as_column())
                .collect();
            if cols.is_empty() {
                Vec::new()
            } else {
                vec![cols]
            }
        }
        _ => Vec::new(),
    };
    let mut seen = Vec::with_capacity(orders.len());
    orders.retain(|o| {
        if seen.contains(o) {
            false
        } else {
            seen.push(o.clone());
            true
        }
    });
    Ok(orders)
}

/// Every task the leaf `plan` can produce under `prop`. Empty when none fits.
pub fn leaf_tasks(
    opt: &OptContext<'_>,
    cost_model: &dyn CostModel,
    plan: PlanRef,
    prop: &PhysicalProperty,
) -> PlanResult<Vec<Task>> {
    let tasks = match opt.op(plan) {
        LogicalOp::DataSource(ds) => match &prop.index_join_prop {
            Some(ij) => index_join_inner_task(opt, cost_model, plan, ds, prop, ij)
                .into_iter()
                .collect(),
            None => data_source_tasks(opt, cost_model, plan, ds, prop),
        },
        LogicalOp::CteReader(reader) => {
            let op = PhysicalOp::CteReader {
                cte_id: reader.cte_id,
            };
            let stats = opt.stats(plan).scale_by_expect_cnt(prop.expected());
            let schema = opt.schema(plan).clone();
            match prop.task_type {
                _ if !prop.is_sort_item_empty() || prop.index_join_prop.is_some() => Vec::new(),
                TaskType::Root => vec![Task::root(costed(
                    cost_model,
                    op,
                    vec![],
                    stats,
                    schema,
                    TaskType::Root,
                ))],
                TaskType::Mpp if reader.producer_mpp_capable => {
                    let plan = costed(cost_model, op, vec![], stats, schema, TaskType::Mpp);
                    vec![Task::mpp(plan, PartitionSpec::Any)]
                }
                _ => Vec::new(),
            }
        }
        LogicalOp::TableDual { rows } => {
            // Zero or one row is trivially sorted.
            if prop.task_type != TaskType::Root || prop.index_join_prop.is_some() {
                Vec::new()
            } else {
                vec![Task::root(costed(
                    cost_model,
                    PhysicalOp::TableDual { rows: *rows },
                    vec![],
                    opt.stats(plan).clone(),
                    opt.schema(plan).clone(),
                    TaskType::Root,
                ))]
            }
        }
        other => {
            return Err(phyx_core::error::PlanError::internal(format!(
                "{} {} is not a leaf",
                other.name(),
                plan
            )))
        }
    };
    debug!(plan = %plan, request = ?prop.task_type, tasks = tasks.len(), "leaf tasks");
    Ok(tasks)
}

/// Returns `Some(desc)` when scanning `order` satisfies `sort`, `Some(false)`
/// when nothing is required.
fn scan_direction(sort: &[SortItem], order: &[ColumnId]) -> Option<bool> {
    let Some(first) = sort.first() else {
        return Some(false);
    };
    if sort.len() > order.len() {
        return None;
    }
    sort.iter()
        .zip(order)
        .all(|(item, col)| item.col == *col && item.desc == first.desc)
        .then_some(first.desc)
}

/// `base` rescaled to `rows` output rows.
fn rows_stats(base: &StatsInfo, rows: f64) -> StatsInfo {
    if base.row_count > 0.0 {
        base.scale(rows / base.row_count)
    } else {
        StatsInfo::new(rows)
    }
}

/// Splits `conds` into those `store` evaluates and those left for the root.
fn split_pushable(opt: &OptContext<'_>, conds: Vec<Expr>, store: StoreType) -> (Vec<Expr>, Vec<Expr>) {
    let ctx = opt.plan_ctx.push_down_ctx();
    conds.into_iter().partition(|c| c.can_push_to(&ctx, store))
}

fn data_source_tasks(
    opt: &OptContext<'_>,
    cost_model: &dyn CostModel,
    plan: PlanRef,
    ds: &DataSource,
    prop: &PhysicalProperty,
) -> Vec<Task> {
    let schema = opt.schema(plan);
    let ds_stats = opt.stats(plan);
    let expected = prop.expected();
    let mut tasks = Vec::new();

    if prop.task_type == TaskType::Mpp {
        if !prop.is_sort_item_empty() {
            return tasks;
        }
        // An ANN read returns at most top-k rows per scan.
        let expected = match &prop.vector_prop {
            Some(vp) => expected.min(f64::from(vp.top_k)),
            None => expected,
        };
        for path in ds.paths.iter().filter(|p| p.is_tiflash() && p.is_table_path()) {
            let (pushed, rest) = split_pushable(opt, ds.pushed_conds.clone(), StoreType::TiFlash);
            if !rest.is_empty() {
                opt.plan_ctx
                    .warn_mpp_blocked(format!("filters on table `{}` can not be pushed to tiflash", ds.table));
                continue;
            }
            let scan = TableScanOp {
                table: ds.table.clone(),
                store: StoreType::TiFlash,
                access_conds: path.access_conds.clone(),
                filters: pushed,
                keep_order: false,
                desc: false,
                range_from_join: false,
            };
            let stats = rows_stats(ds_stats, path.count_after_access).scale_by_expect_cnt(expected);
            let plan = costed(
                cost_model,
                PhysicalOp::TableScan(scan),
                vec![],
                stats,
                schema.clone(),
                TaskType::Mpp,
            );
            tasks.push(Task::mpp(plan, PartitionSpec::Any));
        }
        return tasks;
    }

    for path in &ds.paths {
        if path.is_mv_index() {
            continue;
        }
        if path.is_tiflash() {
            if !opt.vars().allow_cop_tiflash || !path.is_table_path() {
                continue;
            }
        } else if ds.prefer_tiflash && ds.has_tiflash_path() {
            continue;
        }
        let Some(desc) = scan_direction(&prop.sort_items, &path.delivered_order(&ds.handle)) else {
            continue;
        };
        let keep_order = !prop.is_sort_item_empty();
        if keep_order && path.is_tiflash() {
            continue;
        }
        let conds = residual_conds(path, &ds.pushed_conds);
        let Some(task) = cop_task_for_path(
            opt, cost_model, plan, ds, path, conds, keep_order, desc, prop,
        ) else {
            continue;
        };
        tasks.push(task);
    }
    tasks
}

/// Filters a path leaves for the scans: its own split when it has one, otherwise
/// every pushed condition not already used for ranges.
fn residual_conds(path: &AccessPath, pushed: &[Expr]) -> Vec<Expr> {
    if !path.index_filters.is_empty() || !path.table_filters.is_empty() {
        return path
            .index_filters
            .iter()
            .chain(&path.table_filters)
            .cloned()
            .collect();
    }
    pushed
        .iter()
        .filter(|c| !path.access_conds.contains(c))
        .cloned()
        .collect()
}

#[allow(clippy::too_many_arguments)]
fn cop_task_for_path(
    opt: &OptContext<'_>,
    cost_model: &dyn CostModel,
    plan: PlanRef,
    ds: &DataSource,
    path: &AccessPath,
    conds: Vec<Expr>,
    keep_order: bool,
    desc: bool,
    prop: &PhysicalProperty,
) -> Option<Task> {
    let schema = opt.schema(plan);
    let ds_stats = opt.stats(plan);
    let expected = prop.expected();
    let (pushed, root_conds) = split_pushable(opt, conds, path.store);
    if !root_conds.is_empty() && prop.task_type != TaskType::Root {
        return None;
    }

    let cop = match &path.index {
        None => {
            let scan = TableScanOp {
                table: ds.table.clone(),
                store: path.store,
                access_conds: path.access_conds.clone(),
                filters: pushed,
                keep_order,
                desc,
                range_from_join: false,
            };
            let stats = rows_stats(ds_stats, path.count_after_access).scale_by_expect_cnt(expected);
            let scan = costed(
                cost_model,
                PhysicalOp::TableScan(scan),
                vec![],
                stats,
                schema.clone(),
                TaskType::CopSingle,
            );
            let mut cop = CopTask::table(scan, path.store);
            cop.keep_order = keep_order;
            cop
        }
        Some(index) => {
            let (index_filters, table_filters): (Vec<Expr>, Vec<Expr>) = if path.is_single_scan {
                (pushed, Vec::new())
            } else {
                let index_schema = Schema::new(index.columns.clone());
                pushed.into_iter().partition(|c| c.columns_in(&index_schema))
            };
            let scan = IndexScanOp {
                table: ds.table.clone(),
                index: index.name.clone(),
                index_cols: index.columns.clone(),
                access_conds: path.access_conds.clone(),
                filters: index_filters,
                keep_order,
                desc,
                range_from_join: false,
                max_one_row: false,
            };
            let index_stats =
                rows_stats(ds_stats, path.count_after_access).scale_by_expect_cnt(expected);
            let index_schema = if path.is_single_scan {
                schema.clone()
            } else {
                Schema::new(index.columns.clone())
            };
            let index_plan = costed(
                cost_model,
                PhysicalOp::IndexScan(scan),
                vec![],
                index_stats,
                index_schema,
                TaskType::CopMulti,
            );
            let lookup = (!path.is_single_scan).then(|| {
                let lookup = TableScanOp {
                    table: ds.table.clone(),
                    store: StoreType::TiKv,
                    access_conds: vec![],
                    filters: table_filters,
                    keep_order: false,
                    desc: false,
                    range_from_join: true,
                };
                let stats = rows_stats(ds_stats, path.count_after_index).scale_by_expect_cnt(expected);
                costed(
                    cost_model,
                    PhysicalOp::TableScan(lookup),
                    vec![],
                    stats,
                    schema.clone(),
                    TaskType::CopMulti,
                )
            });
            CopTask::index(index_plan, lookup, keep_order)
        }
    };

    let task = Task::Cop(cop);
    match prop.task_type {
        TaskType::Root => Some(with_root_filters(
            cost_model,
            to_root(task, cost_model),
            root_conds,
        )),
        requested if task.task_type() == Some(requested) => Some(task),
        _ => None,
    }
}

/// Tops a root task with a selection over `conds`.
fn with_root_filters(cost_model: &dyn CostModel, task: Task, conds: Vec<Expr>) -> Task {
    if conds.is_empty() {
        return task;
    }
    match task {
        Task::Root(RootTask {
            plan: child,
            index_join_info,
        }) => {
            let (stats, schema) = (child.stats.clone(), child.schema.clone());
            let plan = costed(
                cost_model,
                PhysicalOp::Selection { conds },
                vec![child],
                stats,
                schema,
                TaskType::Root,
            );
            Task::Root(RootTask {
                plan,
                index_join_info,
            })
        }
        other => other,
    }
}

/// One index column's role in an index-join range.
enum ColumnPoint {
    Key(usize),
    Consts(Vec<ScalarValue>),
}

/// How one access path serves an index-join inner side.
#[derive(Debug, Clone)]
pub(crate) struct IndexJoinPathMatch {
    pub path_idx: usize,
    pub key_off_to_idx_off: Vec<Option<usize>>,
    pub ranges: Vec<IndexJoinRange>,
    pub compare_filters: Option<CompareFilters>,
    pub access_conds: Vec<Expr>,
    pub remaining: Vec<Expr>,
    pub used_cols: usize,
    pub max_one_row: bool,
    /// Columns the path is ordered by.
    pub cols: Vec<ColumnId>,
}

impl IndexJoinPathMatch {
    fn better_than(&self, other: &IndexJoinPathMatch) -> bool {
        (self.used_cols, self.compare_filters.is_some(), std::cmp::Reverse(self.remaining.len()))
            > (other.used_cols, other.compare_filters.is_some(), std::cmp::Reverse(other.remaining.len()))
    }
}

/// Constant points `col` is pinned to by one of `conds`, with that condition's offset.
fn const_points(col: ColumnId, conds: &[Expr]) -> Option<(Vec<ScalarValue>, usize)> {
    conds.iter().enumerate().find_map(|(i, cond)| match cond {
        Expr::Binary {
            op: BinaryOp::Eq,
            left,
            right,
        } => match (left.as_ref(), right.as_ref()) {
            (Expr::Column(c), Expr::Literal(v)) | (Expr::Literal(v), Expr::Column(c))
                if *c == col && *v != ScalarValue::Null =>
            {
                Some((vec![v.clone()], i))
            }
            _ => None,
        },
        Expr::In {
            expr,
            list,
            negated: false,
        } if expr.as_column() == Some(col) && !list.is_empty() => list
            .iter()
            .map(|e| match e {
                Expr::Literal(v) => Some(v.clone()),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()
            .map(|vals| (vals, i)),
        _ => None,
    })
}

/// `inner_col <op> outer_col` comparisons from the join's residual conditions.
fn compare_filters_for(col: ColumnId, ij: &IndexJoinRuntimeProp, inner: &Schema) -> Option<CompareFilters> {
    let mut conds = Vec::new();
    let mut exprs = Vec::new();
    for expr in &ij.other_conditions {
        let Expr::Binary { op, left, right } = expr else {
            continue;
        };
        if !op.is_range_cmp() {
            continue;
        }
        let entry = match (left.as_column(), right.as_column()) {
            (Some(l), Some(r)) if l == col && !inner.contains(r) => (*op, r),
            (Some(l), Some(r)) if r == col && !inner.contains(l) => (op.swapped(), l),
            _ => continue,
        };
        conds.push(entry);
        exprs.push(expr.clone());
    }
    (!conds.is_empty()).then_some(CompareFilters {
        target_col: col,
        conds,
        exprs,
    })
}

fn match_columns(
    path_idx: usize,
    cols: &[ColumnId],
    unique: bool,
    ij: &IndexJoinRuntimeProp,
    conds: &[Expr],
    inner: &Schema,
) -> Option<IndexJoinPathMatch> {
    let mut key_off_to_idx_off = vec![None; ij.inner_join_keys.len()];
    let mut points = Vec::new();
    let mut used_conds = Vec::new();
    let mut compare_filters = None;
    let mut multi_point = false;
    for (idx_off, col) in cols.iter().enumerate() {
        if let Some(key_off) = ij.inner_join_keys.iter().position(|k| k == col) {
            key_off_to_idx_off[key_off] = Some(idx_off);
            points.push(ColumnPoint::Key(key_off));
            continue;
        }
        if let Some((vals, cond_idx)) = const_points(*col, conds) {
            multi_point |= vals.len() > 1;
            used_conds.push(cond_idx);
            points.push(ColumnPoint::Consts(vals));
            continue;
        }
        compare_filters = compare_filters_for(*col, ij, inner);
        break;
    }
    if key_off_to_idx_off.iter().all(Option::is_none) {
        return None;
    }

    let mut ranges = vec![IndexJoinRange::default()];
    for point in &points {
        ranges = match point {
            ColumnPoint::Key(k) => ranges
                .into_iter()
                .map(|mut r| {
                    r.points.push(RangePoint::OuterKey(*k));
                    r
                })
                .collect(),
            ColumnPoint::Consts(vals) => ranges
                .iter()
                .flat_map(|r| {
                    vals.iter().map(move |v| {
                        let mut r = r.clone();
                        r.points.push(RangePoint::Const(v.clone()));
                        r
                    })
                })
                .collect(),
        };
    }

    let used_cols = points.len();
    let (access_conds, remaining) = conds
        .iter()
        .enumerate()
        .fold((Vec::new(), Vec::new()), |(mut used, mut rest), (i, c)| {
            if used_conds.contains(&i) {
                used.push(c.clone());
            } else {
                rest.push(c.clone());
            }
            (used, rest)
        });
    Some(IndexJoinPathMatch {
        path_idx,
        key_off_to_idx_off,
        ranges,
        max_one_row: unique && used_cols == cols.len() && !multi_point && compare_filters.is_none(),
        compare_filters,
        access_conds,
        remaining,
        used_cols,
        cols: cols.to_vec(),
    })
}

/// Best access path of `ds` for the index-join inner request `ij`, if any uses a
/// join key. `table_range_scan` selects between the handle and the indexes.
pub(crate) fn best_index_join_path(
    ds: &DataSource,
    inner: &Schema,
    ij: &IndexJoinRuntimeProp,
) -> Option<IndexJoinPathMatch> {
    if ds.prefer_tiflash {
        return None;
    }
    let conds = &ds.pushed_conds;
    if ij.table_range_scan {
        let path_idx = ds
            .paths
            .iter()
            .position(|p| p.is_table_path() && p.store == StoreType::TiKv)?;
        return match &ds.handle {
            HandleKind::IntHandle(c) => match_columns(path_idx, &[*c], true, ij, conds, inner),
            HandleKind::CommonHandle(cols) => match_columns(path_idx, cols, true, ij, conds, inner),
            HandleKind::RowId => None,
        };
    }
    ds.paths
        .iter()
        .enumerate()
        .filter(|(_, p)| !p.is_mv_index() && p.store == StoreType::TiKv)
        .filter_map(|(i, p)| {
            let index = p.index.as_ref()?;
            match_columns(i, &index.columns, index.unique, ij, conds, inner)
        })
        .fold(None, |best: Option<IndexJoinPathMatch>, m| match best {
            Some(b) if !m.better_than(&b) => Some(b),
            _ => Some(m),
        })
}

fn index_join_inner_task(
    opt: &OptContext<'_>,
    cost_model: &dyn CostModel,
    plan: PlanRef,
    ds: &DataSource,
    prop: &PhysicalProperty,
    ij: &IndexJoinRuntimeProp,
) -> Option<Task> {
    if prop.task_type == TaskType::Mpp {
        return None;
    }
    let schema = opt.schema(plan);
    let m = best_index_join_path(ds, schema, ij)?;
    let path = &ds.paths[m.path_idx];
    let desc = scan_direction(&prop.sort_items, &m.cols)?;
    let keep_order = ij.keep_order || !prop.is_sort_item_empty();
    if keep_order && ds.is_partitioned {
        debug!(table = %ds.table, "ordered index join inner side over a partitioned table");
        return None;
    }

    let ds_stats = opt.stats(plan);
    let index_col_lens = match &path.index {
        Some(index) => (0..m.cols.len()).map(|i| index.col_len(i)).collect(),
        None => vec![None; m.cols.len()],
    };
    let (pushed, root_conds) = split_pushable(opt, m.remaining.clone(), StoreType::TiKv);

    let cop = match &path.index {
        None => {
            let rows = 1.0_f64.min(path.count_after_access);
            let scan = TableScanOp {
                table: ds.table.clone(),
                store: StoreType::TiKv,
                access_conds: m.access_conds.clone(),
                filters: pushed,
                keep_order,
                desc,
                range_from_join: true,
            };
            let scan = costed(
                cost_model,
                PhysicalOp::TableScan(scan),
                vec![],
                rows_stats(ds_stats, rows),
                schema.clone(),
                TaskType::CopSingle,
            );
            let mut cop = CopTask::table(scan, StoreType::TiKv);
            cop.keep_order = keep_order;
            cop
        }
        Some(index) => {
            let mut rows = ij.avg_inner_row_cnt.0.min(path.count_after_access);
            if m.max_one_row {
                rows = rows.min(1.0);
            }
            let index_schema = Schema::new(index.columns.clone());
            let (index_filters, table_filters): (Vec<Expr>, Vec<Expr>) = if path.is_single_scan {
                (pushed, Vec::new())
            } else {
                pushed.into_iter().partition(|c| c.columns_in(&index_schema))
            };
            let scan = IndexScanOp {
                table: ds.table.clone(),
                index: index.name.clone(),
                index_cols: index.columns.clone(),
                access_conds: m.access_conds.clone(),
                filters: index_filters,
                keep_order,
                desc,
                range_from_join: true,
                max_one_row: m.max_one_row,
            };
            let index_plan = costed(
                cost_model,
                PhysicalOp::IndexScan(scan),
                vec![],
                rows_stats(ds_stats, rows),
                if path.is_single_scan {
                    schema.clone()
                } else {
                    index_schema
                },
                TaskType::CopMulti,
            );
            let lookup = (!path.is_single_scan).then(|| {
                let lookup = TableScanOp {
                    table: ds.table.clone(),
                    store: StoreType::TiKv,
                    access_conds: vec![],
                    filters: table_filters,
                    keep_order: false,
                    desc: false,
                    range_from_join: true,
                };
                costed(
                    cost_model,
                    PhysicalOp::TableScan(lookup),
                    vec![],
                    rows_stats(ds_stats, rows),
                    schema.clone(),
                    TaskType::CopMulti,
                )
            });
            CopTask::index(index_plan, lookup, keep_order)
        }
    };

    let info = IndexJoinInfo {
        key_off_to_idx_off: m.key_off_to_idx_off,
        ranges: m.ranges,
        compare_filters: m.compare_filters,
        index_col_lens,
    };
    debug!(
        table = %ds.table,
        path = path.name(),
        used_cols = m.used_cols,
        "index join inner path"
    );
    match prop.task_type {
        TaskType::Root => {
            match with_root_filters(cost_model, to_root(Task::Cop(cop), cost_model), root_conds) {
                Task::Root(mut root) => {
                    root.index_join_info = Some(info);
                    Some(Task::Root(root))
                }
                _ => None,
            }
        }
        requested if root_conds.is_empty() => {
            let mut cop = cop;
            cop.index_join_info = Some(info);
            let task = Task::Cop(cop);
            (task.task_type() == Some(requested)).then_some(task)
        }
        _ => None,
    }
}
