//! # Physical Operators and Candidates
//!
//! Enumerators answer a property request with [`Candidate`]s: a physical operator
//! that is not yet connected to any child, plus the property it requires from each
//! logical child. The driver solves those child requests, attaches the resulting
//! tasks, and only then does the operator become part of a [`PhysicalPlan`] tree.
//!
//! ## Static vs Completed Fields
//!
//! Most operator fields are fixed during enumeration. The index-join family is the
//! exception: range templates, index column lengths, compare filters and hash keys
//! depend on the access path the inner side actually chose, so [`IndexJoinOp`]
//! starts with those fields empty and `completed = false`. Completion happens once,
//! at attach time, from the inner task's pending `IndexJoinInfo`.
//!
//! ## Delivered Properties
//!
//! [`Candidate::delivered`] derives what the candidate will produce from the
//! operator and its child requests: the order it keeps or creates, the placement of
//! its children and, for MPP fragments, the partitioning of its output. Tests use it
//! to check that authoritative candidates never silently violate a request.

use crate::access_path::{CompareFilters, IndexJoinRange};
use crate::expr::{
    sort_items_from_by_items, AggFuncDesc, ByItem, ColumnId, ColumnTable, EqCond, Expr, JoinType,
    Schema, SortItem, StoreType, VectorSearchInfo, WindowFrame, WindowFuncDesc,
};
use crate::properties::{DeliveredProperty, PartitionColumn, PartitionSpec, PhysicalProperty, TaskType};
use crate::stats::StatsInfo;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// How an exchange sender distributes rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExchangeKind {
    /// Everything to a single receiver (MPP gather).
    PassThrough,
    Hash(Vec<PartitionColumn>),
    Broadcast,
}

/// Data movement strategy of an MPP join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MppJoinKind {
    Broadcast,
    Shuffle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HashJoinOp {
    pub join_type: JoinType,
    /// Child probed against the hash table (or building it when `use_outer_to_build`).
    pub inner_child_idx: usize,
    /// Build the hash table from the outer side (outer/semi joins only).
    pub use_outer_to_build: bool,
    pub left_keys: Vec<ColumnId>,
    pub right_keys: Vec<ColumnId>,
    pub na_left_keys: Vec<ColumnId>,
    pub na_right_keys: Vec<ColumnId>,
    pub equal_conds: Vec<EqCond>,
    pub left_conds: Vec<Expr>,
    pub right_conds: Vec<Expr>,
    pub other_conds: Vec<Expr>,
    pub store: StoreType,
    pub mpp: Option<MppJoinKind>,
}

impl HashJoinOp {
    /// Index of the child the hash table is built from.
    pub fn build_child_idx(&self) -> usize {
        if self.use_outer_to_build {
            1 - self.inner_child_idx
        } else {
            self.inner_child_idx
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeJoinOp {
    pub join_type: JoinType,
    pub left_keys: Vec<ColumnId>,
    pub right_keys: Vec<ColumnId>,
    pub left_conds: Vec<Expr>,
    pub right_conds: Vec<Expr>,
    pub other_conds: Vec<Expr>,
    pub desc: bool,
}

/// Members of the index-join family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexJoinKind {
    IndexJoin,
    IndexHashJoin,
    IndexMergeJoin,
}

impl IndexJoinKind {
    pub fn name(&self) -> &'static str {
        match self {
            IndexJoinKind::IndexJoin => "IndexJoin",
            IndexJoinKind::IndexHashJoin => "IndexHashJoin",
            IndexJoinKind::IndexMergeJoin => "IndexMergeJoin",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexJoinOp {
    pub kind: IndexJoinKind,
    pub join_type: JoinType,
    pub inner_child_idx: usize,
    pub outer_keys: Vec<ColumnId>,
    pub inner_keys: Vec<ColumnId>,
    /// Cleared on completion; the keys above and the hash keys take over.
    pub equal_conds: Vec<EqCond>,
    pub left_conds: Vec<Expr>,
    pub right_conds: Vec<Expr>,
    pub other_conds: Vec<Expr>,
    /// The inner side must be a table range scan.
    pub table_range_scan: bool,

    pub ranges: Vec<IndexJoinRange>,
    /// For each join key, the index column it feeds, if any.
    pub key_off_to_idx_off: Vec<Option<usize>>,
    pub idx_col_lens: Vec<Option<u32>>,
    pub compare_filters: Option<CompareFilters>,
    pub outer_hash_keys: Vec<ColumnId>,
    pub inner_hash_keys: Vec<ColumnId>,
    /// Index hash join returns rows in outer order.
    pub keep_outer_order: bool,
    /// Index merge join: the outer side must be sorted on its keys first.
    pub need_outer_sort: bool,
    pub desc: bool,
    /// Index merge join: join key offsets in index column order.
    pub key_off_to_key_off_order_by_idx: Vec<usize>,
    pub completed: bool,
}

impl IndexJoinOp {
    pub fn outer_child_idx(&self) -> usize {
        1 - self.inner_child_idx
    }
}

/// Distributed execution shape of an aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MppAggMode {
    /// Child is hash partitioned on the group keys; aggregate once.
    OnePhase,
    /// Partial aggregation, hash exchange on group keys, final aggregation.
    TwoPhase,
    /// Partial aggregation in MPP, final aggregation at root.
    Tidb,
    /// No group-by: partial aggregation, pass-through exchange, final aggregation.
    Scalar,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggOp {
    pub group_by: Vec<Expr>,
    pub agg_funcs: Vec<AggFuncDesc>,
    pub mpp: Option<MppAggMode>,
    /// Keys the two-phase exchange shuffles on; empty means every group-by column.
    #[serde(default)]
    pub partition_cols: Vec<PartitionColumn>,
}

impl AggOp {
    pub fn group_by_cols(&self) -> Vec<ColumnId> {
        self.group_by.iter().filter_map(Expr::as_column).collect()
    }

    /// Partitioning between the partial and final phase of a two-phase aggregation.
    pub fn shuffle_keys(&self) -> Vec<PartitionColumn> {
        if self.partition_cols.is_empty() {
            self.group_by_cols().into_iter().map(PartitionColumn::new).collect()
        } else {
            self.partition_cols.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopNOp {
    pub by_items: Vec<ByItem>,
    pub partition_by: Vec<SortItem>,
    pub offset: u64,
    pub count: u64,
    #[serde(default)]
    pub vector_search: Option<VectorSearchInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitOp {
    pub partition_by: Vec<SortItem>,
    pub offset: u64,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowOp {
    pub funcs: Vec<WindowFuncDesc>,
    pub partition_by: Vec<SortItem>,
    pub order_by: Vec<SortItem>,
    pub frame: Option<WindowFrame>,
    pub mpp: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyOp {
    pub join: HashJoinOp,
    pub corr_cols: Vec<ColumnId>,
    pub can_use_cache: bool,
    pub concurrency: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpandOp {
    pub grouping_sets: Vec<Vec<ColumnId>>,
    pub gid_col: ColumnId,
    pub gpos_col: Option<ColumnId>,
    pub level_exprs: Vec<Vec<Expr>>,
    pub mpp: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableScanOp {
    pub table: String,
    pub store: StoreType,
    pub access_conds: Vec<Expr>,
    pub filters: Vec<Expr>,
    pub keep_order: bool,
    pub desc: bool,
    /// Ranges are funded by an index join's outer rows.
    pub range_from_join: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexScanOp {
    pub table: String,
    pub index: String,
    pub index_cols: Vec<ColumnId>,
    pub access_conds: Vec<Expr>,
    pub filters: Vec<Expr>,
    pub keep_order: bool,
    pub desc: bool,
    pub range_from_join: bool,
    /// Every lookup yields at most one row (unique index fully matched by equality).
    pub max_one_row: bool,
}

/// Every physical operator kind the engine can produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PhysicalOp {
    TableScan(TableScanOp),
    IndexScan(IndexScanOp),
    TableReader { store: StoreType },
    IndexReader,
    IndexLookUpReader { keep_order: bool },
    HashJoin(HashJoinOp),
    MergeJoin(MergeJoinOp),
    IndexJoin(IndexJoinOp),
    Apply(ApplyOp),
    HashAgg(AggOp),
    StreamAgg(AggOp),
    Projection { exprs: Vec<Expr> },
    Selection { conds: Vec<Expr> },
    Sort { by_items: Vec<ByItem> },
    /// Claims an order the child already provides; removed before execution.
    NominalSort { by_items: Vec<ByItem>, only_column: bool },
    TopN(TopNOp),
    Limit(LimitOp),
    Window(WindowOp),
    UnionAll { mpp: bool },
    UnionScan { conds: Vec<Expr> },
    Lock { lock_kind: String },
    MaxOneRow,
    TableDual { rows: u64 },
    CteStorage { cte_id: u32, broadcast: bool },
    CteReader { cte_id: u32 },
    Sequence,
    Expand(ExpandOp),
    ExchangeSender { kind: ExchangeKind },
    ExchangeReceiver,
}

impl PhysicalOp {
    pub fn name(&self) -> &'static str {
        match self {
            PhysicalOp::TableScan(t) if t.range_from_join => "TableRangeScan",
            PhysicalOp::TableScan(t) if t.access_conds.is_empty() => "TableFullScan",
            PhysicalOp::TableScan(_) => "TableRangeScan",
            PhysicalOp::IndexScan(i) if i.access_conds.is_empty() && !i.range_from_join => {
                "IndexFullScan"
            }
            PhysicalOp::IndexScan(_) => "IndexRangeScan",
            PhysicalOp::TableReader { .. } => "TableReader",
            PhysicalOp::IndexReader => "IndexReader",
            PhysicalOp::IndexLookUpReader { .. } => "IndexLookUp",
            PhysicalOp::HashJoin(_) => "HashJoin",
            PhysicalOp::MergeJoin(_) => "MergeJoin",
            PhysicalOp::IndexJoin(j) => j.kind.name(),
            PhysicalOp::Apply(_) => "Apply",
            PhysicalOp::HashAgg(_) => "HashAgg",
            PhysicalOp::StreamAgg(_) => "StreamAgg",
            PhysicalOp::Projection { .. } => "Projection",
            PhysicalOp::Selection { .. } => "Selection",
            PhysicalOp::Sort { .. } => "Sort",
            PhysicalOp::NominalSort { .. } => "NominalSort",
            PhysicalOp::TopN(_) => "TopN",
            PhysicalOp::Limit(_) => "Limit",
            PhysicalOp::Window(_) => "Window",
            PhysicalOp::UnionAll { .. } => "UnionAll",
            PhysicalOp::UnionScan { .. } => "UnionScan",
            PhysicalOp::Lock { .. } => "Lock",
            PhysicalOp::MaxOneRow => "MaxOneRow",
            PhysicalOp::TableDual { .. } => "TableDual",
            PhysicalOp::CteStorage { .. } => "CTE",
            PhysicalOp::CteReader { .. } => "CTEFullScan",
            PhysicalOp::Sequence => "Sequence",
            PhysicalOp::Expand(_) => "Expand",
            PhysicalOp::ExchangeSender { .. } => "ExchangeSender",
            PhysicalOp::ExchangeReceiver => "ExchangeReceiver",
        }
    }

    pub fn as_index_join(&self) -> Option<&IndexJoinOp> {
        match self {
            PhysicalOp::IndexJoin(j) => Some(j),
            _ => None,
        }
    }

    /// Operators that only ever run centrally.
    pub fn is_root_only(&self) -> bool {
        matches!(
            self,
            PhysicalOp::MergeJoin(_)
                | PhysicalOp::IndexJoin(_)
                | PhysicalOp::Apply(_)
                | PhysicalOp::UnionScan { .. }
                | PhysicalOp::Lock { .. }
                | PhysicalOp::MaxOneRow
                | PhysicalOp::TableReader { .. }
                | PhysicalOp::IndexReader
                | PhysicalOp::IndexLookUpReader { .. }
        )
    }

    /// Which child's order the operator preserves, if any.
    fn order_source(&self) -> Option<usize> {
        match self {
            PhysicalOp::Selection { .. }
            | PhysicalOp::Projection { .. }
            | PhysicalOp::Limit(_)
            | PhysicalOp::UnionScan { .. }
            | PhysicalOp::Lock { .. }
            | PhysicalOp::MaxOneRow
            | PhysicalOp::StreamAgg(_)
            | PhysicalOp::Window(_)
            | PhysicalOp::Expand(_)
            | PhysicalOp::CteStorage { .. } => Some(0),
            PhysicalOp::MergeJoin(m) if m.join_type == JoinType::RightOuter => Some(1),
            PhysicalOp::MergeJoin(_) => Some(0),
            PhysicalOp::Apply(a) => Some(1 - a.join.inner_child_idx),
            PhysicalOp::IndexJoin(j) => match j.kind {
                IndexJoinKind::IndexJoin | IndexJoinKind::IndexMergeJoin => Some(j.outer_child_idx()),
                IndexJoinKind::IndexHashJoin if j.keep_outer_order => Some(j.outer_child_idx()),
                IndexJoinKind::IndexHashJoin => None,
            },
            _ => None,
        }
    }
}

/// One physical alternative for a logical node under one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub op: PhysicalOp,
    /// Requirement sent to each logical child, in child order.
    pub child_props: Vec<PhysicalProperty>,
    /// Output statistics, already scaled by the request's expected count.
    pub stats: StatsInfo,
    pub schema: Schema,
}

impl Candidate {
    pub fn new(op: PhysicalOp, child_props: Vec<PhysicalProperty>, stats: StatsInfo, schema: Schema) -> Self {
        Self {
            op,
            child_props,
            stats,
            schema,
        }
    }

    /// Placement the candidate runs at, judged from its children's requests.
    pub fn task_type(&self) -> TaskType {
        if self.op.is_root_only() {
            return TaskType::Root;
        }
        match &self.op {
            PhysicalOp::Sequence => self
                .child_props
                .last()
                .map(|p| p.task_type)
                .unwrap_or(TaskType::Root),
            PhysicalOp::HashJoin(j) if j.mpp.is_some() => TaskType::Mpp,
            PhysicalOp::HashJoin(_) => TaskType::Root,
            PhysicalOp::Expand(e) if !e.mpp => TaskType::Root,
            _ => self
                .child_props
                .first()
                .map(|p| p.task_type)
                .unwrap_or(TaskType::Root),
        }
    }

    /// The property this candidate produces once its children satisfy their requests.
    pub fn delivered(&self) -> DeliveredProperty {
        let task_type = self.task_type();
        let sort_items = match &self.op {
            PhysicalOp::Sort { by_items } | PhysicalOp::NominalSort { by_items, .. } => {
                sort_items_from_by_items(by_items).unwrap_or_default()
            }
            PhysicalOp::TopN(t) => sort_items_from_by_items(&t.by_items).unwrap_or_default(),
            PhysicalOp::Sequence => self
                .child_props
                .last()
                .map(|p| p.sort_items.clone())
                .unwrap_or_default(),
            PhysicalOp::Projection { exprs } => {
                let child = self.child_props.first().map(|p| p.sort_items.as_slice()).unwrap_or(&[]);
                map_through_projection(child, exprs, &self.schema)
            }
            op => op
                .order_source()
                .and_then(|idx| self.child_props.get(idx))
                .map(|p| p.sort_items.clone())
                .unwrap_or_default(),
        };
        let partition = if task_type == TaskType::Mpp {
            self.delivered_partition()
        } else {
            PartitionSpec::Any
        };
        DeliveredProperty {
            sort_items,
            task_type,
            partition,
        }
    }

    fn delivered_partition(&self) -> PartitionSpec {
        match &self.op {
            PhysicalOp::HashJoin(j) => {
                let probe = 1 - j.build_child_idx();
                self.child_props
                    .get(probe)
                    .map(|p| p.partition.clone())
                    .unwrap_or_default()
            }
            PhysicalOp::HashAgg(a) if a.mpp == Some(MppAggMode::TwoPhase) => {
                PartitionSpec::Hash(a.shuffle_keys())
            }
            PhysicalOp::HashAgg(a) if a.mpp == Some(MppAggMode::Scalar) => PartitionSpec::Single,
            PhysicalOp::Sequence => self
                .child_props
                .last()
                .map(|p| p.partition.clone())
                .unwrap_or_default(),
            _ => self
                .child_props
                .first()
                .map(|p| p.partition.clone())
                .unwrap_or_default(),
        }
    }
}

fn map_through_projection(child: &[SortItem], exprs: &[Expr], schema: &Schema) -> Vec<SortItem> {
    let mut out = Vec::with_capacity(child.len());
    for item in child {
        let pos = exprs.iter().position(|e| e.as_column() == Some(item.col));
        match pos.and_then(|p| schema.columns.get(p)) {
            Some(col) => out.push(SortItem {
                col: *col,
                desc: item.desc,
            }),
            None => break,
        }
    }
    out
}

/// Result of one enumeration call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateSet {
    pub candidates: Vec<Candidate>,
    /// `true`: the driver must not retry with a relaxed or enforced request.
    pub authoritative: bool,
}

impl CandidateSet {
    pub fn new(candidates: Vec<Candidate>, authoritative: bool) -> Self {
        Self {
            candidates,
            authoritative,
        }
    }

    /// "Cannot satisfy this request", which is not an error.
    pub fn empty() -> Self {
        Self::new(Vec::new(), true)
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }
}

/// A fully attached physical plan tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalPlan {
    pub op: PhysicalOp,
    #[serde(default)]
    pub children: Vec<PhysicalPlan>,
    pub stats: StatsInfo,
    pub schema: Schema,
    pub task_type: TaskType,
    /// Accumulated cost of the subtree.
    pub cost: f64,
}

impl PhysicalPlan {
    pub fn leaf(op: PhysicalOp, stats: StatsInfo, schema: Schema, task_type: TaskType) -> Self {
        Self {
            op,
            children: Vec::new(),
            stats,
            schema,
            task_type,
            cost: 0.0,
        }
    }

    /// Pre-order walk.
    pub fn walk<'a>(&'a self, f: &mut dyn FnMut(&'a PhysicalPlan)) {
        f(self);
        for c in &self.children {
            c.walk(f);
        }
    }

    /// Operator names in pre-order, handy for assertions.
    pub fn op_names(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        self.walk(&mut |p| out.push(p.op.name()));
        out
    }

    /// Indented tree rendering in the familiar `EXPLAIN` shape.
    pub fn explain(&self, columns: &ColumnTable) -> String {
        let mut out = String::new();
        self.explain_into(columns, 0, &mut out);
        out
    }

    fn explain_into(&self, columns: &ColumnTable, depth: usize, out: &mut String) {
        let task = match self.task_type {
            TaskType::Root => "root",
            TaskType::CopSingle | TaskType::CopMulti => "cop",
            TaskType::Mpp => "mpp",
        };
        let _ = writeln!(
            out,
            "{}{}\t{:.2}\t{}\t{}",
            "  ".repeat(depth),
            self.op.name(),
            self.stats.row_count,
            task,
            self.op_info(columns)
        );
        for c in &self.children {
            c.explain_into(columns, depth + 1, out);
        }
    }

    fn op_info(&self, columns: &ColumnTable) -> String {
        let cols = |ids: &[ColumnId]| {
            ids.iter()
                .map(|c| columns.display(*c))
                .collect::<Vec<_>>()
                .join(", ")
        };
        match &self.op {
            PhysicalOp::HashJoin(j) => format!(
                "{}, build:{}, keys:[{}]=[{}]",
                j.join_type,
                j.build_child_idx(),
                cols(&j.left_keys),
                cols(&j.right_keys)
            ),
            PhysicalOp::IndexJoin(j) => format!(
                "{}, inner:{}, outer key:{}, inner key:{}",
                j.join_type,
                j.inner_child_idx,
                cols(&j.outer_keys),
                cols(&j.inner_keys)
            ),
            PhysicalOp::MergeJoin(m) => format!(
                "{}, left key:{}, right key:{}",
                m.join_type,
                cols(&m.left_keys),
                cols(&m.right_keys)
            ),
            PhysicalOp::TableScan(t) => format!("table:{}, keep order:{}", t.table, t.keep_order),
            PhysicalOp::IndexScan(i) => format!(
                "table:{}, index:{}({}), keep order:{}",
                i.table,
                i.index,
                cols(&i.index_cols),
                i.keep_order
            ),
            PhysicalOp::HashAgg(a) | PhysicalOp::StreamAgg(a) => format!(
                "group by:{}, funcs:{}",
                a.group_by.iter().map(|e| e.display(columns)).collect::<Vec<_>>().join(", "),
                a.agg_funcs.iter().map(|f| f.name.as_str()).collect::<Vec<_>>().join(", ")
            ),
            PhysicalOp::ExchangeSender { kind } => match kind {
                ExchangeKind::PassThrough => "ExchangeType: PassThrough".to_string(),
                ExchangeKind::Broadcast => "ExchangeType: Broadcast".to_string(),
                ExchangeKind::Hash(cols_) => format!(
                    "ExchangeType: HashPartition, Hash Cols: {}",
                    cols(&cols_.iter().map(|c| c.col).collect::<Vec<_>>())
                ),
            },
            PhysicalOp::TopN(t) => format!("offset:{}, count:{}", t.offset, t.count),
            PhysicalOp::Limit(l) => format!("offset:{}, count:{}", l.offset, l.count),
            PhysicalOp::Selection { conds } => conds
                .iter()
                .map(|e| e.display(columns))
                .collect::<Vec<_>>()
                .join(", "),
            _ => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access_path::RangePoint;
    use crate::expr::{ColumnId, ScalarValue};

    fn c(i: u32) -> ColumnId {
        ColumnId(i)
    }

    #[test]
    fn test_sort_delivers_its_by_items() {
        let cand = Candidate::new(
            PhysicalOp::Sort {
                by_items: vec![ByItem::col(c(1), true)],
            },
            vec![PhysicalProperty::root()],
            StatsInfo::new(10.0),
            Schema::new(vec![c(1)]),
        );
        let d = cand.delivered();
        assert_eq!(d.sort_items, vec![SortItem::desc(c(1))]);
        assert_eq!(d.task_type, TaskType::Root);
    }

    #[test]
    fn test_projection_maps_child_order() {
        let child = PhysicalProperty::with_sort(vec![SortItem::asc(c(1))]);
        let cand = Candidate::new(
            PhysicalOp::Projection {
                exprs: vec![Expr::col(c(1))],
            },
            vec![child],
            StatsInfo::new(10.0),
            Schema::new(vec![c(9)]),
        );
        assert_eq!(cand.delivered().sort_items, vec![SortItem::asc(c(9))]);
    }

    #[test]
    fn test_hash_join_build_child() {
        let j = HashJoinOp {
            join_type: JoinType::LeftOuter,
            inner_child_idx: 1,
            use_outer_to_build: true,
            left_keys: vec![c(1)],
            right_keys: vec![c(2)],
            na_left_keys: vec![],
            na_right_keys: vec![],
            equal_conds: vec![EqCond::new(c(1), c(2))],
            left_conds: vec![],
            right_conds: vec![],
            other_conds: vec![],
            store: StoreType::TiDb,
            mpp: None,
        };
        assert_eq!(j.build_child_idx(), 0);
    }

    fn index_join_op() -> IndexJoinOp {
        IndexJoinOp {
            kind: IndexJoinKind::IndexHashJoin,
            join_type: JoinType::Inner,
            inner_child_idx: 1,
            outer_keys: vec![c(1)],
            inner_keys: vec![c(4)],
            equal_conds: vec![],
            left_conds: vec![],
            right_conds: vec![],
            other_conds: vec![],
            table_range_scan: false,
            ranges: vec![IndexJoinRange {
                points: vec![RangePoint::OuterKey(0), RangePoint::Const(ScalarValue::Int64(7))],
            }],
            key_off_to_idx_off: vec![Some(0)],
            idx_col_lens: vec![None],
            compare_filters: None,
            outer_hash_keys: vec![c(1)],
            inner_hash_keys: vec![c(4)],
            keep_outer_order: true,
            need_outer_sort: false,
            desc: false,
            key_off_to_key_off_order_by_idx: vec![],
            completed: true,
        }
    }

    #[test]
    fn test_ops_with_own_kind_field_survive_json() {
        let ops = vec![
            PhysicalOp::IndexJoin(index_join_op()),
            PhysicalOp::ExchangeSender {
                kind: ExchangeKind::Hash(vec![PartitionColumn::new(c(2))]),
            },
            PhysicalOp::ExchangeSender {
                kind: ExchangeKind::Broadcast,
            },
        ];
        for op in ops {
            let json = serde_json::to_value(&op).unwrap();
            assert_eq!(json["op"], serde_json::json!(op_tag(&op)));
            assert!(json.get("kind").is_some());
            let back: PhysicalOp = serde_json::from_value(json).unwrap();
            assert_eq!(back, op);
        }
    }

    fn op_tag(op: &PhysicalOp) -> &'static str {
        match op {
            PhysicalOp::IndexJoin(_) => "index_join",
            _ => "exchange_sender",
        }
    }

    #[test]
    fn test_empty_set_is_authoritative() {
        let s = CandidateSet::empty();
        assert!(s.is_empty());
        assert!(s.authoritative);
    }
}
