//! # Cost Model
//!
//! The enumerator itself never compares candidates; the driver does, after each
//! candidate has been attached to real child tasks. It asks a [`CostModel`] for
//! the local cost of one operator given its output and input statistics, and adds
//! the accumulated cost of the children.
//!
//! ## Default Weights
//!
//! [`DefaultCostModel`] collapses three dimensions into one number:
//!
//! ```text
//! local = cpu_weight * cpu + memory_weight * memory + network_weight * network
//! ```
//!
//! Network transfer (exchanges, coprocessor readers) is weighted ten times CPU and
//! memory. Coprocessor and MPP work is discounted by `remote_cpu_factor` because it
//! runs in parallel close to the data.

use crate::physical::{ExchangeKind, IndexJoinKind, PhysicalOp};
use crate::properties::TaskType;
use crate::stats::StatsInfo;
use serde::{Deserialize, Serialize};

/// Comparable plan cost. Lower is better; `f64::MAX` is infeasible.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Cost {
    pub total: f64,
}

impl Cost {
    pub fn zero() -> Self {
        Self { total: 0.0 }
    }

    pub fn new(total: f64) -> Self {
        Self { total }
    }

    pub fn infinite() -> Self {
        Self { total: f64::MAX }
    }

    pub fn is_infinite(&self) -> bool {
        self.total == f64::MAX
    }
}

impl PartialEq for Cost {
    fn eq(&self, other: &Self) -> bool {
        (self.total - other.total).abs() < f64::EPSILON
    }
}

impl PartialOrd for Cost {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.total.partial_cmp(&other.total)
    }
}

/// Pluggable local cost of one physical operator.
pub trait CostModel: Send + Sync {
    fn compute_cost(
        &self,
        op: &PhysicalOp,
        output: &StatsInfo,
        inputs: &[&StatsInfo],
        children_costs: &[Cost],
        task_type: TaskType,
    ) -> Cost;
}

pub struct DefaultCostModel {
    pub cpu_weight: f64,
    pub memory_weight: f64,
    pub network_weight: f64,
    /// Multiplier for CPU work done in storage or MPP nodes.
    pub remote_cpu_factor: f64,
    /// Bytes per row assumed by memory and network estimates.
    pub row_width: f64,
}

impl Default for DefaultCostModel {
    fn default() -> Self {
        Self {
            cpu_weight: 1.0,
            memory_weight: 1.0,
            network_weight: 10.0,
            remote_cpu_factor: 0.5,
            row_width: 8.0,
        }
    }
}

impl DefaultCostModel {
    fn rows(inputs: &[&StatsInfo], idx: usize) -> f64 {
        inputs.get(idx).map(|s| s.row_count).unwrap_or(1.0)
    }

    fn sort_cost(&self, rows: f64) -> f64 {
        let n_log_n = if rows > 1.0 { rows * rows.log2() } else { 1.0 };
        self.cpu_weight * n_log_n + self.memory_weight * rows * self.row_width
    }
}

impl CostModel for DefaultCostModel {
    fn compute_cost(
        &self,
        op: &PhysicalOp,
        output: &StatsInfo,
        inputs: &[&StatsInfo],
        children_costs: &[Cost],
        task_type: TaskType,
    ) -> Cost {
        let children_total: f64 = children_costs.iter().map(|c| c.total).sum();
        let input = Self::rows(inputs, 0);
        let local = match op {
            PhysicalOp::TableScan(_) | PhysicalOp::IndexScan(_) => self.cpu_weight * output.row_count,
            PhysicalOp::TableReader { .. } | PhysicalOp::IndexReader => {
                self.network_weight * input * self.row_width / 64.0
            }
            // Index side rows are read in key order, table rows fetched by handle.
            PhysicalOp::IndexLookUpReader { .. } => {
                let lookups = Self::rows(inputs, 1);
                self.network_weight * (input + 2.0 * lookups) * self.row_width / 64.0
            }
            PhysicalOp::HashJoin(j) => {
                let build = Self::rows(inputs, j.build_child_idx());
                let probe = Self::rows(inputs, 1 - j.build_child_idx());
                self.cpu_weight * (build + probe) + self.memory_weight * build * self.row_width
            }
            PhysicalOp::MergeJoin(_) => self.cpu_weight * (input + Self::rows(inputs, 1)),
            PhysicalOp::IndexJoin(j) => {
                let outer = Self::rows(inputs, j.outer_child_idx());
                let inner = Self::rows(inputs, j.inner_child_idx);
                let per_batch = match j.kind {
                    IndexJoinKind::IndexJoin => 1.0,
                    IndexJoinKind::IndexHashJoin => 0.9,
                    IndexJoinKind::IndexMergeJoin => 1.1,
                };
                per_batch * (self.cpu_weight * outer + self.cpu_weight * inner)
                    + self.network_weight * outer.sqrt()
            }
            PhysicalOp::Apply(a) => {
                let outer = Self::rows(inputs, 1 - a.join.inner_child_idx);
                let inner = Self::rows(inputs, a.join.inner_child_idx);
                let factor = if a.can_use_cache { 0.5 } else { 1.0 };
                self.cpu_weight * outer * inner * factor
            }
            PhysicalOp::HashAgg(_) => {
                self.cpu_weight * input + self.memory_weight * output.row_count * self.row_width
            }
            PhysicalOp::StreamAgg(_) => self.cpu_weight * input,
            PhysicalOp::Sort { .. } => self.sort_cost(input),
            PhysicalOp::TopN(t) => {
                let n = (t.offset + t.count).max(2) as f64;
                self.cpu_weight * input * n.log2()
            }
            PhysicalOp::Window(_) => self.cpu_weight * input,
            PhysicalOp::ExchangeSender { kind } => {
                let fanout = match kind {
                    ExchangeKind::Broadcast => 3.0,
                    ExchangeKind::Hash(_) | ExchangeKind::PassThrough => 1.0,
                };
                self.network_weight * input * fanout * self.row_width / 64.0
            }
            PhysicalOp::ExchangeReceiver => 0.0,
            PhysicalOp::Selection { .. }
            | PhysicalOp::Projection { .. }
            | PhysicalOp::Expand(_)
            | PhysicalOp::UnionScan { .. } => self.cpu_weight * input,
            PhysicalOp::UnionAll { .. } => self.cpu_weight * inputs.iter().map(|s| s.row_count).sum::<f64>(),
            PhysicalOp::Limit(_)
            | PhysicalOp::NominalSort { .. }
            | PhysicalOp::Lock { .. }
            | PhysicalOp::MaxOneRow
            | PhysicalOp::TableDual { .. }
            | PhysicalOp::CteStorage { .. }
            | PhysicalOp::CteReader { .. }
            | PhysicalOp::Sequence => self.cpu_weight * output.row_count,
        };
        let local = match task_type {
            TaskType::Root => local,
            TaskType::CopSingle | TaskType::CopMulti | TaskType::Mpp => local * self.remote_cpu_factor,
        };
        Cost::new(children_total + local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{ByItem, ColumnId, JoinType, StoreType};
    use crate::physical::HashJoinOp;

    fn hash_join(inner: usize) -> PhysicalOp {
        PhysicalOp::HashJoin(HashJoinOp {
            join_type: JoinType::Inner,
            inner_child_idx: inner,
            use_outer_to_build: false,
            left_keys: vec![],
            right_keys: vec![],
            na_left_keys: vec![],
            na_right_keys: vec![],
            equal_conds: vec![],
            left_conds: vec![],
            right_conds: vec![],
            other_conds: vec![],
            store: StoreType::TiDb,
            mpp: None,
        })
    }

    #[test]
    fn test_smaller_build_side_is_cheaper() {
        let model = DefaultCostModel::default();
        let small = StatsInfo::new(100.0);
        let large = StatsInfo::new(1_000_000.0);
        let out = StatsInfo::new(100.0);
        let zero = [Cost::zero(), Cost::zero()];
        let build_small = model.compute_cost(&hash_join(0), &out, &[&small, &large], &zero, TaskType::Root);
        let build_large = model.compute_cost(&hash_join(1), &out, &[&small, &large], &zero, TaskType::Root);
        assert!(build_small < build_large);
    }

    #[test]
    fn test_children_costs_accumulate() {
        let model = DefaultCostModel::default();
        let s = StatsInfo::new(10.0);
        let sort = PhysicalOp::Sort {
            by_items: vec![ByItem::col(ColumnId(1), false)],
        };
        let alone = model.compute_cost(&sort, &s, &[&s], &[Cost::zero()], TaskType::Root);
        let stacked = model.compute_cost(&sort, &s, &[&s], &[Cost::new(5.0)], TaskType::Root);
        assert_eq!(stacked, Cost::new(alone.total + 5.0));
    }
}
