//! # Tasks
//!
//! A [`Task`] is a physical plan fragment anchored to where it executes:
//!
//! - [`RootTask`]: fully materialized, runs centrally.
//! - [`CopTask`]: a storage coprocessor request still being assembled. It may hold
//!   an index-side plan and a table-side plan that are only joined (as an index
//!   lookup) when the task is converted to root.
//! - [`MppTask`]: an MPP fragment together with the partitioning of its output.
//! - `Invalid`: the explicit "cannot be built" sentinel.
//!
//! ## Pending Index-Join Information
//!
//! When a data source is planned as the inner side of an index join it records the
//! ranges, key mapping and compare filters it chose in an [`IndexJoinInfo`] on its
//! task. The slot travels with the task (a cop task hands it to the root task it is
//! converted into) until the index join attaches and consumes it with
//! [`Task::take_index_join_info`]. After that the slot is empty, so completion
//! cannot run twice on the same information.

use crate::access_path::{CompareFilters, IndexJoinRange};
use crate::expr::{Schema, StoreType};
use crate::physical::{ExchangeKind, PhysicalOp, PhysicalPlan};
use crate::properties::{PartitionSpec, TaskType};
use crate::stats::StatsInfo;
use serde::{Deserialize, Serialize};

/// Access details an index-join inner side reports back to its join.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexJoinInfo {
    /// For each join key, the index column it feeds (`None`: not usable for ranges).
    pub key_off_to_idx_off: Vec<Option<usize>>,
    pub ranges: Vec<IndexJoinRange>,
    pub compare_filters: Option<CompareFilters>,
    pub index_col_lens: Vec<Option<u32>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootTask {
    pub plan: PhysicalPlan,
    #[serde(default)]
    pub index_join_info: Option<IndexJoinInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopTask {
    pub index_plan: Option<PhysicalPlan>,
    pub table_plan: Option<PhysicalPlan>,
    pub store: StoreType,
    pub keep_order: bool,
    /// Further operators go to the table side.
    pub index_plan_finished: bool,
    #[serde(default)]
    pub index_join_info: Option<IndexJoinInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MppTask {
    pub plan: PhysicalPlan,
    pub partition: PartitionSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Task {
    Root(RootTask),
    Cop(CopTask),
    Mpp(MppTask),
    Invalid,
}

impl Task {
    pub fn root(plan: PhysicalPlan) -> Task {
        Task::Root(RootTask {
            plan,
            index_join_info: None,
        })
    }

    pub fn mpp(plan: PhysicalPlan, partition: PartitionSpec) -> Task {
        Task::Mpp(MppTask { plan, partition })
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, Task::Invalid)
    }

    pub fn task_type(&self) -> Option<TaskType> {
        match self {
            Task::Root(_) => Some(TaskType::Root),
            Task::Cop(c) if c.table_plan.is_some() && c.index_plan.is_some() => Some(TaskType::CopMulti),
            Task::Cop(_) => Some(TaskType::CopSingle),
            Task::Mpp(_) => Some(TaskType::Mpp),
            Task::Invalid => None,
        }
    }

    /// Accumulated cost; infinite for the invalid task.
    pub fn cost(&self) -> f64 {
        match self {
            Task::Root(r) => r.plan.cost,
            Task::Cop(c) => {
                c.index_plan.as_ref().map_or(0.0, |p| p.cost)
                    + c.table_plan.as_ref().map_or(0.0, |p| p.cost)
            }
            Task::Mpp(m) => m.plan.cost,
            Task::Invalid => f64::MAX,
        }
    }

    pub fn stats(&self) -> Option<&StatsInfo> {
        self.top_plan().map(|p| &p.stats)
    }

    /// The plan the next operator would be stacked on.
    pub fn top_plan(&self) -> Option<&PhysicalPlan> {
        match self {
            Task::Root(r) => Some(&r.plan),
            Task::Cop(c) => {
                if c.index_plan_finished {
                    c.table_plan.as_ref()
                } else {
                    c.index_plan.as_ref().or(c.table_plan.as_ref())
                }
            }
            Task::Mpp(m) => Some(&m.plan),
            Task::Invalid => None,
        }
    }

    pub fn index_join_info(&self) -> Option<&IndexJoinInfo> {
        match self {
            Task::Root(r) => r.index_join_info.as_ref(),
            Task::Cop(c) => c.index_join_info.as_ref(),
            Task::Mpp(_) | Task::Invalid => None,
        }
    }

    /// Hand the pending index-join information to the caller, leaving the slot empty.
    pub fn take_index_join_info(&mut self) -> Option<IndexJoinInfo> {
        match self {
            Task::Root(r) => r.index_join_info.take(),
            Task::Cop(c) => c.index_join_info.take(),
            Task::Mpp(_) | Task::Invalid => None,
        }
    }

    /// Close the task so a root operator can sit on top of it.
    ///
    /// - cop: wrapped by a table reader, an index reader, or an index lookup
    ///   (index side first) when both sides exist;
    /// - MPP: gathered through a pass-through exchange under a columnar table reader;
    /// - root and invalid tasks are returned unchanged.
    pub fn convert_to_root(self) -> Task {
        match self {
            Task::Cop(cop) => {
                let index_join_info = cop.index_join_info;
                let plan = match (cop.index_plan, cop.table_plan) {
                    (Some(index), Some(table)) => {
                        let stats = table.stats.clone();
                        let schema = table.schema.clone();
                        wrap(
                            PhysicalOp::IndexLookUpReader {
                                keep_order: cop.keep_order,
                            },
                            vec![index, table],
                            stats,
                            schema,
                            TaskType::Root,
                        )
                    }
                    (Some(index), None) => {
                        let (stats, schema) = (index.stats.clone(), index.schema.clone());
                        wrap(PhysicalOp::IndexReader, vec![index], stats, schema, TaskType::Root)
                    }
                    (None, Some(table)) => {
                        let (stats, schema) = (table.stats.clone(), table.schema.clone());
                        wrap(
                            PhysicalOp::TableReader { store: cop.store },
                            vec![table],
                            stats,
                            schema,
                            TaskType::Root,
                        )
                    }
                    (None, None) => return Task::Invalid,
                };
                Task::Root(RootTask {
                    plan,
                    index_join_info,
                })
            }
            Task::Mpp(mpp) => {
                let (stats, schema) = (mpp.plan.stats.clone(), mpp.plan.schema.clone());
                let sender = wrap(
                    PhysicalOp::ExchangeSender {
                        kind: ExchangeKind::PassThrough,
                    },
                    vec![mpp.plan],
                    stats.clone(),
                    schema.clone(),
                    TaskType::Mpp,
                );
                Task::root(wrap(
                    PhysicalOp::TableReader {
                        store: StoreType::TiFlash,
                    },
                    vec![sender],
                    stats,
                    schema,
                    TaskType::Root,
                ))
            }
            other => other,
        }
    }

    /// Into the root plan, converting first when needed.
    pub fn into_root_plan(self) -> Option<PhysicalPlan> {
        match self.convert_to_root() {
            Task::Root(r) => Some(r.plan),
            _ => None,
        }
    }
}

impl CopTask {
    /// Cop task reading through a single plan on the table side.
    pub fn table(plan: PhysicalPlan, store: StoreType) -> Self {
        Self {
            index_plan: None,
            table_plan: Some(plan),
            store,
            keep_order: false,
            index_plan_finished: true,
            index_join_info: None,
        }
    }

    /// Cop task reading a covering index, or an index followed by a lookup when
    /// `lookup` is given.
    pub fn index(index: PhysicalPlan, lookup: Option<PhysicalPlan>, keep_order: bool) -> Self {
        Self {
            index_plan: Some(index),
            index_plan_finished: lookup.is_some(),
            table_plan: lookup,
            store: StoreType::TiKv,
            keep_order,
            index_join_info: None,
        }
    }

    /// Stack an operator on the side currently accepting operators.
    pub fn push(&mut self, op: PhysicalOp, stats: StatsInfo, schema: Schema, local_cost: f64) {
        let slot = if self.index_plan_finished {
            &mut self.table_plan
        } else {
            &mut self.index_plan
        };
        if let Some(child) = slot.take() {
            let mut plan = wrap(op, vec![child], stats, schema, TaskType::CopSingle);
            plan.cost += local_cost;
            *slot = Some(plan);
        }
    }
}

/// New plan node over `children`, accumulating their costs.
pub fn wrap(
    op: PhysicalOp,
    children: Vec<PhysicalPlan>,
    stats: StatsInfo,
    schema: Schema,
    task_type: TaskType,
) -> PhysicalPlan {
    let cost = children.iter().map(|c| c.cost).sum();
    PhysicalPlan {
        op,
        children,
        stats,
        schema,
        task_type,
        cost,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::ColumnId;
    use crate::physical::TableScanOp;

    fn scan(cost: f64) -> PhysicalPlan {
        let mut p = PhysicalPlan::leaf(
            PhysicalOp::TableScan(TableScanOp {
                table: "t".into(),
                store: StoreType::TiKv,
                access_conds: vec![],
                filters: vec![],
                keep_order: false,
                desc: false,
                range_from_join: false,
            }),
            StatsInfo::new(10.0),
            Schema::new(vec![ColumnId(0)]),
            TaskType::CopSingle,
        );
        p.cost = cost;
        p
    }

    #[test]
    fn test_cop_to_root_keeps_index_join_info() {
        let mut cop = CopTask::table(scan(5.0), StoreType::TiKv);
        cop.index_join_info = Some(IndexJoinInfo {
            key_off_to_idx_off: vec![Some(0)],
            ..Default::default()
        });
        let mut root = Task::Cop(cop).convert_to_root();
        assert_eq!(root.task_type(), Some(TaskType::Root));
        assert!(root.index_join_info().is_some());
        assert!(root.take_index_join_info().is_some());
        assert!(root.take_index_join_info().is_none());
    }

    #[test]
    fn test_mpp_gather_shape() {
        let plan = Task::mpp(scan(1.0), PartitionSpec::Any).into_root_plan().unwrap();
        assert_eq!(plan.op_names(), vec!["TableReader", "ExchangeSender", "TableFullScan"]);
        assert_eq!(plan.cost, 1.0);
    }

    #[test]
    fn test_index_lookup_on_conversion() {
        let cop = CopTask::index(scan(2.0), Some(scan(3.0)), true);
        let t = Task::Cop(cop);
        assert_eq!(t.task_type(), Some(TaskType::CopMulti));
        assert_eq!(t.cost(), 5.0);
        let plan = t.into_root_plan().unwrap();
        assert_eq!(plan.op.name(), "IndexLookUp");
    }
}
