//! # Physical Properties
//!
//! A [`PhysicalProperty`] is the request a parent sends to a child: "give me a plan
//! that produces rows in this order, at this placement, partitioned this way, and
//! I will probably read only this many rows of it". Enumerators answer a request
//! with candidate operators, each carrying the properties it in turn requires from
//! its own children.
//!
//! ## Components
//!
//! - **Sort items**: a column/direction sequence. Satisfied by any delivered order
//!   of which it is a prefix.
//! - **Task type**: root (central), single-read or multi-read coprocessor, or MPP.
//! - **Partition**: for MPP requests; any, single, hash on columns, or broadcast.
//! - **Expected count**: how many rows the parent expects to consume.
//!   `f64::MAX` means unbounded. Used to scale child estimates (e.g. below a LIMIT).
//! - **Index-join runtime property**: present only on the inner side of an
//!   index-join family candidate; tells the inner data source which keys will
//!   drive its access path.
//! - **Enforcement bit**: allows the driver to insert a sort or exchange on top of a
//!   plan that does not natively satisfy the request.
//!
//! ## Cloning Discipline
//!
//! Properties are immutable by convention. Propagation to children always goes
//! through `clone()` or [`PhysicalProperty::clone_essential_fields`] followed by local
//! modification; the column vectors are owned, so a clone never aliases the
//! parent's request.

use crate::expr::{ColumnId, Expr, Schema, SortItem, VectorSearchInfo};
use crate::hint::JoinPrefer;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

/// Execution placement of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskType {
    /// Runs centrally in the SQL layer.
    #[default]
    Root,
    /// Coprocessor task reading through a single access path (table or covering index).
    CopSingle,
    /// Coprocessor task reading an index and then looking up the table.
    CopMulti,
    /// Distributed MPP fragment.
    Mpp,
}

impl TaskType {
    pub fn is_cop(&self) -> bool {
        matches!(self, TaskType::CopSingle | TaskType::CopMulti)
    }
}

/// One column of a hash partition requirement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionColumn {
    pub col: ColumnId,
    /// Collation id; two hash partitions only match when collations agree.
    #[serde(default)]
    pub collation: u32,
}

impl PartitionColumn {
    pub fn new(col: ColumnId) -> Self {
        Self { col, collation: 0 }
    }
}

/// MPP data distribution requirement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartitionSpec {
    /// No requirement.
    #[default]
    Any,
    /// All rows on one node.
    Single,
    /// Hash partitioned on the columns.
    Hash(Vec<PartitionColumn>),
    /// Every row replicated to all nodes.
    Broadcast,
}

impl PartitionSpec {
    pub fn hash_cols(&self) -> &[PartitionColumn] {
        match self {
            PartitionSpec::Hash(cols) => cols,
            _ => &[],
        }
    }
}

/// CTE producer compatibility of the subtree being planned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CteProducerStatus {
    #[default]
    NoCte,
    /// Some CTE producer in scope could not be planned for MPP.
    SomeCteFailedMpp,
    /// Every CTE producer in scope is MPP capable.
    AllCteCanMpp,
}

/// Runtime requirement sent to the inner side of an index-join family candidate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexJoinRuntimeProp {
    pub outer_join_keys: Vec<ColumnId>,
    pub inner_join_keys: Vec<ColumnId>,
    /// Average number of inner rows fetched per outer row.
    pub avg_inner_row_cnt: OrderedFloat<f64>,
    /// The inner side must be a table range scan instead of an index scan.
    pub table_range_scan: bool,
    /// Join residual conditions usable to build compare filters.
    pub other_conditions: Vec<Expr>,
    /// Hint mask of the join, so the inner side can honour STREAM_AGG etc.
    pub join_prefer: JoinPrefer,
    /// Index-merge-join inner sides must keep index order.
    pub keep_order: bool,
}

/// Vector-search requirement pushed down by a Top-N.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VectorSearchProp {
    pub info: VectorSearchInfo,
    pub top_k: u32,
}

/// The request a parent sends to a child.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhysicalProperty {
    #[serde(default)]
    pub sort_items: Vec<SortItem>,
    /// Sort items that only need to hold within each partition (MPP windows).
    #[serde(default)]
    pub sort_items_for_partition: Vec<SortItem>,
    #[serde(default)]
    pub task_type: TaskType,
    #[serde(default)]
    pub partition: PartitionSpec,
    #[serde(default = "unbounded")]
    pub expected_cnt: OrderedFloat<f64>,
    #[serde(default)]
    pub index_join_prop: Option<Box<IndexJoinRuntimeProp>>,
    #[serde(default)]
    pub cte_producer_status: CteProducerStatus,
    #[serde(default)]
    pub can_add_enforcer: bool,
    /// The parent refuses coprocessor push-down below this point.
    #[serde(default)]
    pub no_cop_push_down: bool,
    #[serde(default)]
    pub vector_prop: Option<VectorSearchProp>,
}

fn unbounded() -> OrderedFloat<f64> {
    OrderedFloat(f64::MAX)
}

impl Default for PhysicalProperty {
    fn default() -> Self {
        Self {
            sort_items: Vec::new(),
            sort_items_for_partition: Vec::new(),
            task_type: TaskType::Root,
            partition: PartitionSpec::Any,
            expected_cnt: unbounded(),
            index_join_prop: None,
            cte_producer_status: CteProducerStatus::NoCte,
            can_add_enforcer: false,
            no_cop_push_down: false,
            vector_prop: None,
        }
    }
}

/// What a built plan actually delivers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliveredProperty {
    pub sort_items: Vec<SortItem>,
    pub task_type: TaskType,
    pub partition: PartitionSpec,
}

impl PhysicalProperty {
    /// A root request with no requirement at all.
    pub fn root() -> Self {
        Self::default()
    }

    pub fn with_task(task_type: TaskType) -> Self {
        Self {
            task_type,
            ..Self::default()
        }
    }

    pub fn with_sort(sort_items: Vec<SortItem>) -> Self {
        Self {
            sort_items,
            ..Self::default()
        }
    }

    pub fn expected(&self) -> f64 {
        self.expected_cnt.into_inner()
    }

    pub fn is_unbounded(&self) -> bool {
        self.expected_cnt.into_inner() == f64::MAX
    }

    /// Copy of the fields that define what is being asked for, dropping enforcement
    /// permission, partition-scoped sort items and vector search hints.
    pub fn clone_essential_fields(&self) -> PhysicalProperty {
        PhysicalProperty {
            sort_items: self.sort_items.clone(),
            sort_items_for_partition: Vec::new(),
            task_type: self.task_type,
            partition: self.partition.clone(),
            expected_cnt: self.expected_cnt,
            index_join_prop: self.index_join_prop.clone(),
            cte_producer_status: self.cte_producer_status,
            can_add_enforcer: false,
            no_cop_push_down: self.no_cop_push_down,
            vector_prop: None,
        }
    }

    pub fn is_sort_item_empty(&self) -> bool {
        self.sort_items.is_empty()
    }

    /// Every sort item is also a partition-scoped item, i.e. a parent window only
    /// needs order within partitions.
    pub fn is_sort_item_all_for_partition(&self) -> bool {
        self.sort_items_for_partition.len() >= self.sort_items.len()
            && self
                .sort_items
                .iter()
                .zip(&self.sort_items_for_partition)
                .all(|(a, b)| a == b)
    }

    /// Whether every sort item has the same direction, and which one.
    pub fn all_same_order(&self) -> (bool, bool) {
        let Some(first) = self.sort_items.first() else {
            return (true, false);
        };
        let same = self.sort_items.iter().all(|s| s.desc == first.desc);
        (same, first.desc)
    }

    /// True if this request's sort items are a prefix of `other`'s.
    pub fn is_prefix(&self, other: &PhysicalProperty) -> bool {
        self.sort_items.len() <= other.sort_items.len()
            && self.sort_items.iter().zip(&other.sort_items).all(|(a, b)| a == b)
    }

    /// For a hash-partition request, finds each required column among `keys`.
    /// Returns the matched offsets into `keys` in request order, or an empty vector
    /// if some required column is missing.
    pub fn is_subset_of(&self, keys: &[PartitionColumn]) -> Vec<usize> {
        let required = self.partition.hash_cols();
        let mut matches = Vec::with_capacity(required.len());
        for req in required {
            match keys
                .iter()
                .position(|k| k.col == req.col && k.collation == req.collation)
            {
                Some(idx) => matches.push(idx),
                None => return Vec::new(),
            }
        }
        matches
    }

    pub fn all_cols_from_schema(&self, schema: &Schema) -> bool {
        self.sort_items.iter().all(|s| schema.contains(s.col))
    }

    /// Request targets the columnar engine.
    pub fn is_flash_prop(&self) -> bool {
        self.task_type == TaskType::Mpp
    }

    /// Child task types that can feed an operator asked for this request.
    pub fn possible_child_task_types(&self) -> Vec<TaskType> {
        match self.task_type {
            TaskType::Root => vec![TaskType::CopSingle, TaskType::CopMulti, TaskType::Root],
            other => vec![other],
        }
    }

    /// Scale the expected count; unbounded stays unbounded.
    pub fn scaled_expected(&self, factor: f64) -> OrderedFloat<f64> {
        if self.is_unbounded() {
            self.expected_cnt
        } else {
            OrderedFloat(self.expected() * factor)
        }
    }

    /// Whether a delivered property satisfies this request.
    ///
    /// - **Sort**: the requested items must be a prefix of (or equal to) the
    ///   delivered order.
    /// - **Task**: root requests accept any delivered placement (conversion to root
    ///   is always possible); other requests need an exact match.
    /// - **Partition**: `Any` accepts everything; hash requests are satisfied by a
    ///   hash partition on a subset of the requested columns.
    pub fn satisfied_by(&self, delivered: &DeliveredProperty) -> bool {
        let sort_ok = self.sort_items.len() <= delivered.sort_items.len()
            && self
                .sort_items
                .iter()
                .zip(&delivered.sort_items)
                .all(|(r, p)| r == p);
        let task_ok = self.task_type == TaskType::Root || self.task_type == delivered.task_type;
        let part_ok = match (&self.partition, &delivered.partition) {
            (PartitionSpec::Any, _) => true,
            (PartitionSpec::Hash(req), PartitionSpec::Hash(got)) => {
                !got.is_empty() && got.iter().all(|g| req.contains(g))
            }
            (req, got) => req == got,
        };
        sort_ok && task_ok && part_ok
    }
}

/// Sort items over the given columns with one direction.
pub fn sort_items_from_cols(cols: &[ColumnId], desc: bool) -> Vec<SortItem> {
    cols.iter().map(|c| SortItem { col: *c, desc }).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(i: u32) -> ColumnId {
        ColumnId(i)
    }

    #[test]
    fn test_sort_prefix_satisfaction() {
        let req = PhysicalProperty::with_sort(vec![SortItem::asc(c(1))]);
        let delivered = DeliveredProperty {
            sort_items: vec![SortItem::asc(c(1)), SortItem::asc(c(2))],
            ..Default::default()
        };
        assert!(req.satisfied_by(&delivered));
        let wrong_dir = DeliveredProperty {
            sort_items: vec![SortItem::desc(c(1))],
            ..Default::default()
        };
        assert!(!req.satisfied_by(&wrong_dir));
    }

    #[test]
    fn test_is_subset_of_returns_offsets() {
        let mut prop = PhysicalProperty::with_task(TaskType::Mpp);
        prop.partition = PartitionSpec::Hash(vec![PartitionColumn::new(c(3))]);
        let keys = vec![PartitionColumn::new(c(2)), PartitionColumn::new(c(3))];
        assert_eq!(prop.is_subset_of(&keys), vec![1]);
        assert!(prop.is_subset_of(&keys[..1]).is_empty());
    }

    #[test]
    fn test_clone_is_independent() {
        let mut parent = PhysicalProperty::with_sort(vec![SortItem::asc(c(1))]);
        parent.can_add_enforcer = true;
        let mut child = parent.clone_essential_fields();
        child.sort_items.push(SortItem::asc(c(2)));
        assert_eq!(parent.sort_items.len(), 1);
        assert!(!child.can_add_enforcer);
    }

    #[test]
    fn test_all_same_order() {
        let mut prop = PhysicalProperty::with_sort(vec![SortItem::desc(c(1)), SortItem::desc(c(2))]);
        assert_eq!(prop.all_same_order(), (true, true));
        prop.sort_items.push(SortItem::asc(c(3)));
        assert!(!prop.all_same_order().0);
    }
}
