//! # Logical Operators
//!
//! The closed set of logical operator kinds the enumerator understands. Every
//! enumerator entry point matches exhaustively on [`LogicalOp`], so adding a new
//! kind is a compile error until each dispatch site handles it.
//!
//! Operators only carry their own payload (conditions, hints, by-items). Children,
//! output schema and statistics live on the containing node (see `memo`).
//!
//! ## Join Conditions
//!
//! A [`LogicalJoin`] keeps its conditions pre-split the way the join enumerators
//! consume them:
//!
//! - `equal_conds`: column equalities `left_col = right_col`, left operand from the
//!   left child's schema.
//! - `na_equal_conds`: null-aware equalities produced by `NOT IN` rewrites (NAAJ).
//! - `left_conds` / `right_conds`: filters referencing only one side. Only legal for
//!   the preserved side of an outer join.
//! - `other_conds`: everything else.

use crate::access_path::{AccessPath, HandleKind};
use crate::expr::{
    AggFuncDesc, AggFuncName, AggMode, ByItem, ColumnId, EqCond, Expr, JoinType, PushDownCtx,
    SortItem, StoreType, WindowFrame, WindowFuncDesc,
};
use crate::hint::{AggHints, JoinHints};
use serde::{Deserialize, Serialize};

/// A table read, the leaf of every plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    pub table: String,
    pub handle: HandleKind,
    /// Access paths offered by the statistics collaborator.
    pub paths: Vec<AccessPath>,
    /// Filters pushed into the scan by predicate push-down.
    #[serde(default)]
    pub pushed_conds: Vec<Expr>,
    /// `READ_FROM_STORAGE(TIFLASH[t])`.
    #[serde(default)]
    pub prefer_tiflash: bool,
    #[serde(default)]
    pub is_partitioned: bool,
}

impl DataSource {
    pub fn has_tiflash_path(&self) -> bool {
        self.paths.iter().any(AccessPath::is_tiflash)
    }

    pub fn tikv_table_path(&self) -> Option<&AccessPath> {
        self.paths
            .iter()
            .find(|p| p.is_table_path() && p.store == StoreType::TiKv)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalJoin {
    pub join_type: JoinType,
    #[serde(default)]
    pub equal_conds: Vec<EqCond>,
    #[serde(default)]
    pub na_equal_conds: Vec<EqCond>,
    #[serde(default)]
    pub left_conds: Vec<Expr>,
    #[serde(default)]
    pub right_conds: Vec<Expr>,
    #[serde(default)]
    pub other_conds: Vec<Expr>,
    #[serde(default)]
    pub hints: JoinHints,
}

impl LogicalJoin {
    pub fn new(join_type: JoinType, equal_conds: Vec<EqCond>) -> Self {
        Self {
            join_type,
            equal_conds,
            na_equal_conds: Vec::new(),
            left_conds: Vec::new(),
            right_conds: Vec::new(),
            other_conds: Vec::new(),
            hints: JoinHints::default(),
        }
    }

    pub fn left_keys(&self) -> Vec<ColumnId> {
        self.equal_conds.iter().map(|c| c.left).collect()
    }

    pub fn right_keys(&self) -> Vec<ColumnId> {
        self.equal_conds.iter().map(|c| c.right).collect()
    }

    pub fn na_left_keys(&self) -> Vec<ColumnId> {
        self.na_equal_conds.iter().map(|c| c.left).collect()
    }

    pub fn na_right_keys(&self) -> Vec<ColumnId> {
        self.na_equal_conds.iter().map(|c| c.right).collect()
    }

    /// Null-aware anti join (from `NOT IN`).
    pub fn is_naaj(&self) -> bool {
        !self.na_equal_conds.is_empty()
    }

    pub fn has_null_eq(&self) -> bool {
        self.equal_conds.iter().any(|c| c.null_eq)
    }

    /// No equality key at all: only broadcast or nested-loop style joins apply.
    pub fn is_cartesian(&self) -> bool {
        self.equal_conds.is_empty() && self.na_equal_conds.is_empty()
    }

    /// Keys of one side, `0` for left and `1` for right.
    pub fn keys_of(&self, side: usize) -> Vec<ColumnId> {
        if side == 0 {
            self.left_keys()
        } else {
            self.right_keys()
        }
    }

    /// Conditions other than the key equalities, in evaluation order.
    pub fn all_residual_conds(&self) -> Vec<Expr> {
        let mut out = self.left_conds.clone();
        out.extend(self.right_conds.iter().cloned());
        out.extend(self.other_conds.iter().cloned());
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalAggregation {
    #[serde(default)]
    pub group_by: Vec<Expr>,
    pub agg_funcs: Vec<AggFuncDesc>,
    #[serde(default)]
    pub hints: AggHints,
    /// Orders in which the child can deliver rows cheaply, each a column list.
    /// Filled by the logical phase; consumed by stream aggregation.
    #[serde(default)]
    pub possible_properties: Vec<Vec<ColumnId>>,
    /// Row count of the aggregation input.
    #[serde(default)]
    pub input_count: f64,
}

impl LogicalAggregation {
    pub fn new(group_by: Vec<Expr>, agg_funcs: Vec<AggFuncDesc>) -> Self {
        Self {
            group_by,
            agg_funcs,
            hints: AggHints::default(),
            possible_properties: Vec::new(),
            input_count: 0.0,
        }
    }

    /// Group-by columns, skipping non-column items.
    pub fn group_by_cols(&self) -> Vec<ColumnId> {
        self.group_by.iter().filter_map(Expr::as_column).collect()
    }

    pub fn group_by_all_columns(&self) -> bool {
        self.group_by.iter().all(Expr::is_column)
    }

    pub fn has_distinct(&self) -> bool {
        self.agg_funcs.iter().any(|f| f.distinct)
    }

    pub fn has_order_by(&self) -> bool {
        self.agg_funcs.iter().any(|f| !f.order_by.is_empty())
    }

    pub fn has_final_mode(&self) -> bool {
        self.agg_funcs.iter().any(|f| f.mode == AggMode::Final)
    }

    /// Every function is in final mode, or every function is complete.
    pub fn modes_consistent(&self) -> bool {
        let finals = self.agg_funcs.iter().filter(|f| f.mode == AggMode::Final).count();
        finals == 0 || finals == self.agg_funcs.len()
    }

    /// Expressions (group-by and function arguments) push-down eligible to `store`.
    pub fn can_push_to(&self, ctx: &PushDownCtx<'_>, store: StoreType) -> bool {
        self.group_by.iter().all(|e| e.can_push_to(ctx, store))
            && self.agg_funcs.iter().all(|f| f.can_push_to(ctx, store))
    }

    /// Distinct aggregates the columnar engine can evaluate in a distributed way.
    pub fn distinct_supported_in_mpp(&self) -> bool {
        self.agg_funcs.iter().filter(|f| f.distinct).all(|f| {
            matches!(f.name, AggFuncName::Count | AggFuncName::GroupConcat)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    /// One expression per output column, in schema order.
    pub exprs: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub conds: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sort {
    pub by_items: Vec<ByItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopN {
    pub by_items: Vec<ByItem>,
    /// Per-partition top-N (from window derived limits).
    #[serde(default)]
    pub partition_by: Vec<SortItem>,
    #[serde(default)]
    pub offset: u64,
    pub count: u64,
    /// `LIMIT_TO_COP()`.
    #[serde(default)]
    pub prefer_limit_to_cop: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Limit {
    #[serde(default)]
    pub partition_by: Vec<SortItem>,
    #[serde(default)]
    pub offset: u64,
    pub count: u64,
    #[serde(default)]
    pub prefer_limit_to_cop: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Window {
    pub funcs: Vec<WindowFuncDesc>,
    #[serde(default)]
    pub partition_by: Vec<SortItem>,
    #[serde(default)]
    pub order_by: Vec<SortItem>,
    #[serde(default)]
    pub frame: Option<WindowFrame>,
}

impl Window {
    /// Sort the window needs from its child: partition keys then order keys.
    pub fn child_sort_items(&self) -> Vec<SortItem> {
        let mut items = self.partition_by.clone();
        items.extend(self.order_by.iter().copied());
        items
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnionAll {
    /// Union over the partitions of one partitioned table.
    #[serde(default)]
    pub partitioned: bool,
}

/// Merges the transaction's uncommitted rows into its child's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnionScan {
    #[serde(default)]
    pub conds: Vec<Expr>,
    #[serde(default)]
    pub handle_cols: Vec<ColumnId>,
}

/// Correlated nested-loop evaluation of a subquery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Apply {
    pub join: LogicalJoin,
    /// Outer columns referenced by the inner side.
    pub corr_cols: Vec<ColumnId>,
}

/// Row replication for grouping sets (`ROLLUP`, multiple distinct aggregates).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expand {
    pub grouping_sets: Vec<Vec<ColumnId>>,
    pub gid_col: ColumnId,
    #[serde(default)]
    pub gpos_col: Option<ColumnId>,
    /// Projection per replica when the expand is in level-projection form.
    #[serde(default)]
    pub level_exprs: Vec<Vec<Expr>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lock {
    /// `FOR UPDATE`, `FOR SHARE`, ...
    pub lock_kind: String,
}

/// Producer side of a common table expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CteProducer {
    pub cte_id: u32,
}

/// Read of a materialized common table expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CteReader {
    pub cte_id: u32,
    /// The producer could be planned for MPP.
    #[serde(default)]
    pub producer_mpp_capable: bool,
}

/// The closed set of logical operator kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogicalOp {
    DataSource(DataSource),
    Join(LogicalJoin),
    Aggregation(LogicalAggregation),
    Projection(Projection),
    Selection(Selection),
    Sort(Sort),
    TopN(TopN),
    Limit(Limit),
    Window(Window),
    UnionAll(UnionAll),
    UnionScan(UnionScan),
    Apply(Apply),
    Expand(Expand),
    MaxOneRow,
    Lock(Lock),
    CteProducer(CteProducer),
    CteReader(CteReader),
    /// Runs its children in order; the last child produces the output.
    Sequence,
    /// Constant relation without a table (`SELECT 1`).
    TableDual { rows: u64 },
}

impl LogicalOp {
    pub fn name(&self) -> &'static str {
        match self {
            LogicalOp::DataSource(_) => "DataSource",
            LogicalOp::Join(_) => "Join",
            LogicalOp::Aggregation(_) => "Aggregation",
            LogicalOp::Projection(_) => "Projection",
            LogicalOp::Selection(_) => "Selection",
            LogicalOp::Sort(_) => "Sort",
            LogicalOp::TopN(_) => "TopN",
            LogicalOp::Limit(_) => "Limit",
            LogicalOp::Window(_) => "Window",
            LogicalOp::UnionAll(u) if u.partitioned => "PartitionUnionAll",
            LogicalOp::UnionAll(_) => "UnionAll",
            LogicalOp::UnionScan(_) => "UnionScan",
            LogicalOp::Apply(_) => "Apply",
            LogicalOp::Expand(_) => "Expand",
            LogicalOp::MaxOneRow => "MaxOneRow",
            LogicalOp::Lock(_) => "Lock",
            LogicalOp::CteProducer(_) => "CTE",
            LogicalOp::CteReader(_) => "CTEReader",
            LogicalOp::Sequence => "Sequence",
            LogicalOp::TableDual { .. } => "TableDual",
        }
    }

    /// Leaves are resolved into tasks directly by the driver.
    pub fn is_leaf(&self) -> bool {
        matches!(
            self,
            LogicalOp::DataSource(_) | LogicalOp::CteReader(_) | LogicalOp::TableDual { .. }
        )
    }

    /// Expected number of children, `None` for n-ary operators.
    pub fn arity(&self) -> Option<usize> {
        match self {
            LogicalOp::DataSource(_) | LogicalOp::CteReader(_) | LogicalOp::TableDual { .. } => {
                Some(0)
            }
            LogicalOp::Join(_) | LogicalOp::Apply(_) => Some(2),
            LogicalOp::UnionAll(_) | LogicalOp::Sequence => None,
            _ => Some(1),
        }
    }

    /// Join hint mask, if the operator carries one.
    pub fn join_hints(&self) -> Option<&JoinHints> {
        match self {
            LogicalOp::Join(j) => Some(&j.hints),
            LogicalOp::Apply(a) => Some(&a.join.hints),
            _ => None,
        }
    }
}
