//! # Attaching Candidates
//!
//! A candidate only names an operator and what it needs from its children. Once
//! the driver has found a task for every child request, [`Attacher::attach`]
//! stacks the operator onto those tasks and prices the result.
//!
//! ## Placement
//!
//! - **Cop children**: selections and projections are pushed into the coprocessor
//!   request. Aggregations push a partial phase and finish at root; limits and
//!   Top-Ns push a copy and repeat themselves at root.
//! - **MPP children**: operators join the fragment. Multi-phase aggregations grow
//!   their exchange between the partial and final phase here.
//! - **Root**: every child is closed into a root task first.
//!
//! An index join also completes itself here, from the access details its inner
//! task recorded. When completion fails the result is [`Task::Invalid`].

use crate::index_join::complete_index_join;
use crate::OptContext;
use phyx_core::cost::{Cost, CostModel};
use phyx_core::error::{PlanError, PlanResult};
use phyx_core::expr::Schema;
use phyx_core::physical::{
    AggOp, Candidate, ExchangeKind, MppAggMode, PhysicalOp, PhysicalPlan,
};
use phyx_core::properties::{PartitionSpec, TaskType};
use phyx_core::stats::StatsInfo;
use phyx_core::task::{wrap, MppTask, RootTask, Task};
use tracing::trace;

/// A new plan node over `children`, priced by `cost_model`.
pub(crate) fn costed(
    cost_model: &dyn CostModel,
    op: PhysicalOp,
    children: Vec<PhysicalPlan>,
    stats: StatsInfo,
    schema: Schema,
    task_type: TaskType,
) -> PhysicalPlan {
    let mut plan = wrap(op, children, stats, schema, task_type);
    recost(&mut plan, cost_model);
    plan
}

fn recost(plan: &mut PhysicalPlan, cost_model: &dyn CostModel) {
    let inputs: Vec<&StatsInfo> = plan.children.iter().map(|c| &c.stats).collect();
    let costs: Vec<Cost> = plan.children.iter().map(|c| Cost::new(c.cost)).collect();
    let total = cost_model
        .compute_cost(&plan.op, &plan.stats, &inputs, &costs, plan.task_type)
        .total;
    plan.cost = total;
}

/// Close a cop or MPP task into a root task, pricing the readers it gains.
pub fn to_root(task: Task, cost_model: &dyn CostModel) -> Task {
    let was_mpp = match &task {
        Task::Cop(_) => false,
        Task::Mpp(_) => true,
        Task::Root(_) | Task::Invalid => return task,
    };
    match task.convert_to_root() {
        Task::Root(mut root) => {
            if was_mpp {
                if let Some(sender) = root.plan.children.first_mut() {
                    recost(sender, cost_model);
                }
            }
            recost(&mut root.plan, cost_model);
            Task::Root(root)
        }
        other => other,
    }
}

/// Exchange pair moving an MPP plan into `kind` partitioning.
pub(crate) fn exchange(cost_model: &dyn CostModel, plan: PhysicalPlan, kind: ExchangeKind) -> PhysicalPlan {
    let (stats, schema) = (plan.stats.clone(), plan.schema.clone());
    let sender = costed(
        cost_model,
        PhysicalOp::ExchangeSender { kind },
        vec![plan],
        stats.clone(),
        schema.clone(),
        TaskType::Mpp,
    );
    costed(
        cost_model,
        PhysicalOp::ExchangeReceiver,
        vec![sender],
        stats,
        schema,
        TaskType::Mpp,
    )
}

pub struct Attacher<'a> {
    opt: &'a OptContext<'a>,
    cost_model: &'a dyn CostModel,
}

impl<'a> Attacher<'a> {
    pub fn new(opt: &'a OptContext<'a>, cost_model: &'a dyn CostModel) -> Self {
        Self { opt, cost_model }
    }

    /// Stack `cand` on `children`, one task per child request in child order.
    pub fn attach(&self, cand: &Candidate, children: Vec<Task>) -> PlanResult<Task> {
        if children.len() != cand.child_props.len() {
            return Err(PlanError::internal(format!(
                "{} expects {} child tasks, got {}",
                cand.op.name(),
                cand.child_props.len(),
                children.len()
            )));
        }
        if children.iter().any(Task::is_invalid) {
            return Ok(Task::Invalid);
        }
        let task = match cand.task_type() {
            TaskType::Root => self.attach_root(cand, children),
            TaskType::Mpp => self.attach_mpp(cand, children),
            TaskType::CopSingle | TaskType::CopMulti => self.attach_cop(cand, children),
        };
        trace!(op = cand.op.name(), task = ?task.task_type(), cost = task.cost(), "attached");
        Ok(task)
    }

    fn root_plans(&self, children: Vec<Task>) -> Option<Vec<PhysicalPlan>> {
        children
            .into_iter()
            .map(|t| to_root(t, self.cost_model).into_root_plan())
            .collect()
    }

    fn attach_root(&self, cand: &Candidate, mut children: Vec<Task>) -> Task {
        let mut op = cand.op.clone();
        if let PhysicalOp::IndexJoin(join) = &mut op {
            let inner = join.inner_child_idx;
            let Some(info) = children.get_mut(inner).and_then(Task::take_index_join_info) else {
                return Task::Invalid;
            };
            let Some(inner_schema) = children[inner].top_plan().map(|p| p.schema.clone()) else {
                return Task::Invalid;
            };
            let outer_sort = &cand.child_props[join.outer_child_idx()].sort_items;
            if !complete_index_join(join, info, &inner_schema, outer_sort, &self.opt.plan_ctx.columns) {
                return Task::Invalid;
            }
        }

        // Operators between an index join and its inner scan hand the access
        // details upward.
        let index_join_info = match cand.child_props.first() {
            Some(p) if p.index_join_prop.is_some() && children.len() == 1 => {
                children[0].take_index_join_info()
            }
            _ => None,
        };
        let Some(plans) = self.root_plans(children) else {
            return Task::Invalid;
        };
        let plan = costed(
            self.cost_model,
            op,
            plans,
            cand.stats.clone(),
            cand.schema.clone(),
            TaskType::Root,
        );
        Task::Root(RootTask {
            plan,
            index_join_info,
        })
    }

    /// Local cost of `op` over `input` at `task_type`, without children.
    fn local_cost(&self, op: &PhysicalOp, output: &StatsInfo, input: &StatsInfo, task_type: TaskType) -> f64 {
        self.cost_model
            .compute_cost(op, output, &[input], &[Cost::zero()], task_type)
            .total
    }

    fn attach_cop(&self, cand: &Candidate, mut children: Vec<Task>) -> Task {
        let Some(Task::Cop(mut cop)) = children.pop() else {
            return Task::Invalid;
        };
        let top = if cop.index_plan_finished {
            cop.table_plan.as_ref()
        } else {
            cop.index_plan.as_ref().or(cop.table_plan.as_ref())
        };
        let Some(input) = top.map(|p| p.stats.clone()) else {
            return Task::Invalid;
        };
        let local = self.local_cost(&cand.op, &cand.stats, &input, TaskType::CopSingle);
        match &cand.op {
            PhysicalOp::Selection { .. } | PhysicalOp::Projection { .. } => {
                cop.push(cand.op.clone(), cand.stats.clone(), cand.schema.clone(), local);
                Task::Cop(cop)
            }
            PhysicalOp::HashAgg(_)
            | PhysicalOp::StreamAgg(_)
            | PhysicalOp::TopN(_)
            | PhysicalOp::Limit(_) => {
                cop.push(cand.op.clone(), cand.stats.clone(), cand.schema.clone(), local);
                self.finish_at_root(cand, to_root(Task::Cop(cop), self.cost_model))
            }
            _ => self.finish_at_root(cand, to_root(Task::Cop(cop), self.cost_model)),
        }
    }

    /// The final phase of a split operator on top of a closed child.
    fn finish_at_root(&self, cand: &Candidate, child: Task) -> Task {
        match child {
            Task::Root(root) => Task::Root(RootTask {
                plan: costed(
                    self.cost_model,
                    cand.op.clone(),
                    vec![root.plan],
                    cand.stats.clone(),
                    cand.schema.clone(),
                    TaskType::Root,
                ),
                index_join_info: root.index_join_info,
            }),
            _ => Task::Invalid,
        }
    }

    fn attach_mpp(&self, cand: &Candidate, children: Vec<Task>) -> Task {
        let mut plans = Vec::with_capacity(children.len());
        for child in children {
            match child {
                Task::Mpp(MppTask { plan, .. }) => plans.push(plan),
                _ => return Task::Invalid,
            }
        }
        let cm = self.cost_model;
        let mpp = |op: PhysicalOp, children: Vec<PhysicalPlan>| {
            costed(
                cm,
                op,
                children,
                cand.stats.clone(),
                cand.schema.clone(),
                TaskType::Mpp,
            )
        };

        match &cand.op {
            PhysicalOp::HashAgg(agg) if agg.mpp.is_some_and(|m| m != MppAggMode::OnePhase) => {
                let partial = mpp(partial_agg(agg), plans);
                match agg.mpp {
                    Some(MppAggMode::TwoPhase) => {
                        let keys = agg.shuffle_keys();
                        let shuffled = exchange(cm, partial, ExchangeKind::Hash(keys.clone()));
                        Task::mpp(mpp(cand.op.clone(), vec![shuffled]), PartitionSpec::Hash(keys))
                    }
                    Some(MppAggMode::Scalar) => {
                        let gathered = exchange(cm, partial, ExchangeKind::PassThrough);
                        Task::mpp(mpp(cand.op.clone(), vec![gathered]), PartitionSpec::Single)
                    }
                    _ => self.finish_at_root(cand, to_root(Task::mpp(partial, PartitionSpec::Any), cm)),
                }
            }
            PhysicalOp::TopN(_) | PhysicalOp::Limit(_) => {
                let pushed = mpp(cand.op.clone(), plans);
                self.finish_at_root(cand, to_root(Task::mpp(pushed, PartitionSpec::Any), cm))
            }
            op => {
                let partition = cand.delivered().partition;
                Task::mpp(mpp(op.clone(), plans), partition)
            }
        }
    }
}

/// First phase of a split aggregation: same functions, no distributed mode.
fn partial_agg(agg: &AggOp) -> PhysicalOp {
    PhysicalOp::HashAgg(AggOp {
        group_by: agg.group_by.clone(),
        agg_funcs: agg.agg_funcs.clone(),
        mpp: None,
        partition_cols: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use phyx_core::cost::DefaultCostModel;
    use phyx_core::expr::{ColumnId, Expr, StoreType};
    use phyx_core::physical::{LimitOp, TableScanOp};
    use phyx_core::task::CopTask;
    use phyx_core::properties::PhysicalProperty;
    use phyx_core::session::SessionVars;

    fn scan(task_type: TaskType, store: StoreType) -> PhysicalPlan {
        costed(
            &DefaultCostModel::default(),
            PhysicalOp::TableScan(TableScanOp {
                table: "t".into(),
                store,
                access_conds: vec![],
                filters: vec![],
                keep_order: false,
                desc: false,
                range_from_join: false,
            }),
            vec![],
            StatsInfo::new(100.0),
            Schema::new(vec![ColumnId(0)]),
            task_type,
        )
    }

    fn cand(op: PhysicalOp, child: PhysicalProperty) -> Candidate {
        Candidate::new(op, vec![child], StatsInfo::new(10.0), Schema::new(vec![ColumnId(0)]))
    }

    #[test]
    fn test_to_root_prices_reader() {
        let cm = DefaultCostModel::default();
        let cop = Task::Cop(CopTask::table(scan(TaskType::CopSingle, StoreType::TiKv), StoreType::TiKv));
        let before = cop.cost();
        let root = to_root(cop, &cm);
        assert_eq!(root.task_type(), Some(TaskType::Root));
        assert!(root.cost() > before);
    }

    #[test]
    fn test_selection_stays_in_cop() {
        let fx = Fixture::new();
        let ctx = fx.ctx(SessionVars::default());
        let opt = OptContext::new(&fx.arena, &ctx);
        let cm = DefaultCostModel::default();
        let attacher = Attacher::new(&opt, &cm);
        let child = Task::Cop(CopTask::table(scan(TaskType::CopSingle, StoreType::TiKv), StoreType::TiKv));
        let sel = cand(
            PhysicalOp::Selection {
                conds: vec![Expr::eq(Expr::col(ColumnId(0)), Expr::int(1))],
            },
            PhysicalProperty::with_task(TaskType::CopSingle),
        );
        let task = attacher.attach(&sel, vec![child]).unwrap();
        assert!(matches!(task, Task::Cop(ref c) if c.index_plan_finished));
        assert_eq!(
            task.into_root_plan().unwrap().op_names(),
            vec!["TableReader", "Selection", "TableFullScan"]
        );
    }

    #[test]
    fn test_limit_over_cop_repeats_at_root() {
        let fx = Fixture::new();
        let ctx = fx.ctx(SessionVars::default());
        let opt = OptContext::new(&fx.arena, &ctx);
        let cm = DefaultCostModel::default();
        let attacher = Attacher::new(&opt, &cm);
        let child = Task::Cop(CopTask::table(scan(TaskType::CopSingle, StoreType::TiKv), StoreType::TiKv));
        let limit = cand(
            PhysicalOp::Limit(LimitOp {
                partition_by: vec![],
                offset: 0,
                count: 10,
            }),
            PhysicalProperty::with_task(TaskType::CopSingle),
        );
        let plan = attacher.attach(&limit, vec![child]).unwrap().into_root_plan().unwrap();
        assert_eq!(plan.op_names(), vec!["Limit", "TableReader", "Limit", "TableFullScan"]);
    }

    #[test]
    fn test_two_phase_mpp_agg_shuffles_on_group_keys() {
        let fx = Fixture::new();
        let ctx = fx.ctx(SessionVars::default());
        let opt = OptContext::new(&fx.arena, &ctx);
        let cm = DefaultCostModel::default();
        let attacher = Attacher::new(&opt, &cm);
        let child = Task::mpp(scan(TaskType::Mpp, StoreType::TiFlash), PartitionSpec::Any);
        let agg = cand(
            PhysicalOp::HashAgg(AggOp {
                group_by: vec![Expr::col(ColumnId(0))],
                agg_funcs: vec![],
                mpp: Some(MppAggMode::TwoPhase),
                partition_cols: vec![],
            }),
            PhysicalProperty::with_task(TaskType::Mpp),
        );
        let task = attacher.attach(&agg, vec![child]).unwrap();
        match &task {
            Task::Mpp(m) => assert_eq!(m.partition.hash_cols().len(), 1),
            other => panic!("unexpected {:?}", other.task_type()),
        }
        assert_eq!(
            task.top_plan().unwrap().op_names(),
            vec!["HashAgg", "ExchangeReceiver", "ExchangeSender", "HashAgg", "TableFullScan"]
        );
    }

    #[test]
    fn test_mpp_agg_finished_at_root() {
        let fx = Fixture::new();
        let ctx = fx.ctx(SessionVars::default());
        let opt = OptContext::new(&fx.arena, &ctx);
        let cm = DefaultCostModel::default();
        let attacher = Attacher::new(&opt, &cm);
        let child = Task::mpp(scan(TaskType::Mpp, StoreType::TiFlash), PartitionSpec::Any);
        let agg = cand(
            PhysicalOp::HashAgg(AggOp {
                group_by: vec![],
                agg_funcs: vec![],
                mpp: Some(MppAggMode::Tidb),
                partition_cols: vec![],
            }),
            PhysicalProperty::with_task(TaskType::Mpp),
        );
        let task = attacher.attach(&agg, vec![child]).unwrap();
        assert_eq!(task.task_type(), Some(TaskType::Root));
        assert_eq!(
            task.top_plan().unwrap().op_names(),
            vec!["HashAgg", "TableReader", "ExchangeSender", "HashAgg", "TableFullScan"]
        );
    }

    #[test]
    fn test_child_count_mismatch_is_internal() {
        let fx = Fixture::new();
        let ctx = fx.ctx(SessionVars::default());
        let opt = OptContext::new(&fx.arena, &ctx);
        let cm = DefaultCostModel::default();
        let attacher = Attacher::new(&opt, &cm);
        let sel = cand(PhysicalOp::Selection { conds: vec![] }, PhysicalProperty::root());
        assert!(attacher.attach(&sel, vec![]).is_err());
        let invalid = attacher.attach(&sel, vec![Task::Invalid]).unwrap();
        assert!(invalid.is_invalid());
    }
}
