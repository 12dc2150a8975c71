//! # Enforcers
//!
//! An enforcer is an operator whose only job is to make a child satisfy a request
//! it does not satisfy natively. The driver solves the relaxed request (the same
//! request without sort items or partitioning, see
//! [`relax`]) and calls [`enforce`] on the winner:
//!
//! - **Root**: the task is closed into a root task and sorted there.
//! - **MPP**: an exchange redistributes rows to the requested partitioning, then
//!   a sort runs inside the fragment when only per-partition order is needed.
//! - **Cop**: coprocessor requests cannot be enforced.
//!
//! The sort cost is `n log n` CPU plus `n` memory; the driver compares it against
//! plans that deliver the order natively.

use crate::attach::{costed, exchange, to_root};
use phyx_core::cost::CostModel;
use phyx_core::expr::ByItem;
use phyx_core::physical::{ExchangeKind, PhysicalOp};
use phyx_core::properties::{DeliveredProperty, PartitionSpec, PhysicalProperty, TaskType};
use phyx_core::task::{MppTask, RootTask, Task};
use tracing::trace;

/// The request with its enforceable parts removed.
pub fn relax(prop: &PhysicalProperty) -> PhysicalProperty {
    let mut relaxed = prop.clone_essential_fields();
    relaxed.sort_items.clear();
    if relaxed.task_type == TaskType::Mpp {
        relaxed.partition = PartitionSpec::Any;
    }
    relaxed
}

/// Whether any part of `prop` can be produced by an enforcer.
pub fn is_enforceable(prop: &PhysicalProperty) -> bool {
    match prop.task_type {
        TaskType::Root => !prop.is_sort_item_empty(),
        TaskType::Mpp => !prop.is_sort_item_empty() || prop.partition != PartitionSpec::Any,
        TaskType::CopSingle | TaskType::CopMulti => false,
    }
}

/// Make `task`, solved for [`relax`]`(prop)`, satisfy `prop`.
pub fn enforce(task: Task, prop: &PhysicalProperty, cost_model: &dyn CostModel) -> Task {
    if task.is_invalid() {
        return task;
    }
    let task = match prop.task_type {
        TaskType::Root => {
            let task = to_root(task, cost_model);
            if prop.is_sort_item_empty() {
                task
            } else {
                sort_root(task, prop, cost_model)
            }
        }
        TaskType::Mpp => match task {
            Task::Mpp(mpp) => {
                let mpp = enforce_exchange(mpp, &prop.partition, cost_model);
                if prop.is_sort_item_empty() {
                    Task::Mpp(mpp)
                } else if prop.is_sort_item_all_for_partition() || mpp.partition == PartitionSpec::Single {
                    sort_mpp(mpp, prop, cost_model)
                } else {
                    Task::Invalid
                }
            }
            _ => Task::Invalid,
        },
        requested => {
            if prop.is_sort_item_empty() && task.task_type() == Some(requested) {
                task
            } else {
                Task::Invalid
            }
        }
    };
    trace!(task = ?task.task_type(), cost = task.cost(), "enforced");
    task
}

fn by_items(prop: &PhysicalProperty) -> Vec<ByItem> {
    prop.sort_items.iter().map(|s| ByItem::col(s.col, s.desc)).collect()
}

fn sort_root(task: Task, prop: &PhysicalProperty, cost_model: &dyn CostModel) -> Task {
    let Task::Root(root) = task else {
        return Task::Invalid;
    };
    let (stats, schema) = (root.plan.stats.clone(), root.plan.schema.clone());
    let plan = costed(
        cost_model,
        PhysicalOp::Sort {
            by_items: by_items(prop),
        },
        vec![root.plan],
        stats,
        schema,
        TaskType::Root,
    );
    Task::Root(RootTask {
        plan,
        index_join_info: root.index_join_info,
    })
}

fn sort_mpp(mpp: MppTask, prop: &PhysicalProperty, cost_model: &dyn CostModel) -> Task {
    let (stats, schema) = (mpp.plan.stats.clone(), mpp.plan.schema.clone());
    let plan = costed(
        cost_model,
        PhysicalOp::Sort {
            by_items: by_items(prop),
        },
        vec![mpp.plan],
        stats,
        schema,
        TaskType::Mpp,
    );
    Task::mpp(plan, mpp.partition)
}

/// Redistribute `mpp` unless its partitioning already satisfies `required`.
pub fn enforce_exchange(mpp: MppTask, required: &PartitionSpec, cost_model: &dyn CostModel) -> MppTask {
    let request = PhysicalProperty {
        partition: required.clone(),
        ..PhysicalProperty::with_task(TaskType::Mpp)
    };
    let delivered = DeliveredProperty {
        sort_items: Vec::new(),
        task_type: TaskType::Mpp,
        partition: mpp.partition.clone(),
    };
    if request.satisfied_by(&delivered) {
        return mpp;
    }
    let kind = match required {
        PartitionSpec::Any => return mpp,
        PartitionSpec::Single => ExchangeKind::PassThrough,
        PartitionSpec::Broadcast => ExchangeKind::Broadcast,
        PartitionSpec::Hash(cols) => ExchangeKind::Hash(cols.clone()),
    };
    MppTask {
        plan: exchange(cost_model, mpp.plan, kind),
        partition: required.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phyx_core::cost::DefaultCostModel;
    use phyx_core::expr::{ColumnId, Schema, SortItem, StoreType};
    use phyx_core::physical::{PhysicalPlan, TableScanOp};
    use phyx_core::properties::PartitionColumn;
    use phyx_core::stats::StatsInfo;
    use phyx_core::task::CopTask;

    fn scan(task_type: TaskType) -> PhysicalPlan {
        PhysicalPlan::leaf(
            PhysicalOp::TableScan(TableScanOp {
                table: "t".into(),
                store: StoreType::TiFlash,
                access_conds: vec![],
                filters: vec![],
                keep_order: false,
                desc: false,
                range_from_join: false,
            }),
            StatsInfo::new(1000.0),
            Schema::new(vec![ColumnId(0), ColumnId(1)]),
            task_type,
        )
    }

    #[test]
    fn test_relax_drops_sort_and_partition() {
        let prop = PhysicalProperty {
            sort_items: vec![SortItem::asc(ColumnId(0))],
            task_type: TaskType::Mpp,
            partition: PartitionSpec::Broadcast,
            can_add_enforcer: true,
            ..Default::default()
        };
        let relaxed = relax(&prop);
        assert!(relaxed.is_sort_item_empty());
        assert_eq!(relaxed.partition, PartitionSpec::Any);
        assert!(!relaxed.can_add_enforcer);
        assert!(is_enforceable(&prop));
        assert!(!is_enforceable(&relaxed));
    }

    #[test]
    fn test_root_sort_over_cop() {
        let cm = DefaultCostModel::default();
        let cop = Task::Cop(CopTask::table(scan(TaskType::CopSingle), StoreType::TiKv));
        let prop = PhysicalProperty::with_sort(vec![SortItem::desc(ColumnId(1))]);
        let plan = enforce(cop, &prop, &cm).into_root_plan().unwrap();
        assert_eq!(plan.op_names(), vec!["Sort", "TableReader", "TableFullScan"]);
        assert!(matches!(&plan.op, PhysicalOp::Sort { by_items } if by_items[0].desc));
    }

    #[test]
    fn test_hash_exchange_only_when_unsatisfied() {
        let cm = DefaultCostModel::default();
        let hash = PartitionSpec::Hash(vec![PartitionColumn::new(ColumnId(0))]);
        let any = MppTask {
            plan: scan(TaskType::Mpp),
            partition: PartitionSpec::Any,
        };
        let shuffled = enforce_exchange(any, &hash, &cm);
        assert_eq!(shuffled.partition, hash);
        assert_eq!(
            shuffled.plan.op_names(),
            vec!["ExchangeReceiver", "ExchangeSender", "TableFullScan"]
        );

        let again = enforce_exchange(shuffled.clone(), &hash, &cm);
        assert_eq!(again, shuffled);
    }

    #[test]
    fn test_cop_request_cannot_be_sorted() {
        let cm = DefaultCostModel::default();
        let cop = Task::Cop(CopTask::table(scan(TaskType::CopSingle), StoreType::TiKv));
        let prop = PhysicalProperty {
            sort_items: vec![SortItem::asc(ColumnId(0))],
            task_type: TaskType::CopSingle,
            ..Default::default()
        };
        assert!(enforce(cop, &prop, &cm).is_invalid());
    }

    #[test]
    fn test_mpp_global_sort_needs_single_partition() {
        let cm = DefaultCostModel::default();
        let task = Task::mpp(scan(TaskType::Mpp), PartitionSpec::Any);
        let global = PhysicalProperty {
            sort_items: vec![SortItem::asc(ColumnId(0))],
            task_type: TaskType::Mpp,
            ..Default::default()
        };
        assert!(enforce(task.clone(), &global, &cm).is_invalid());

        let gathered = PhysicalProperty {
            partition: PartitionSpec::Single,
            ..global
        };
        let sorted = enforce(task, &gathered, &cm);
        assert_eq!(
            sorted.top_plan().unwrap().op_names(),
            vec!["Sort", "ExchangeReceiver", "ExchangeSender", "TableFullScan"]
        );
    }
}
