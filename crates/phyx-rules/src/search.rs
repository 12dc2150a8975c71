//! # Physical Search Driver
//!
//! [`PhysicalOptimizer`] answers "what is the cheapest task for this logical
//! node under this property request" by recursion over the logical plan. Every
//! answer is memoized on `(PlanRef, PhysicalProperty)`, so a subtree requested
//! twice with the same property is solved once.
//!
//! ## One Request
//!
//! 1. Check the statement's cancellation flag and deadline.
//! 2. Leaves (data sources, CTE readers, table duals) produce tasks directly.
//! 3. Other nodes are enumerated with [`exhaust_physical_plans`]; each candidate's
//!    children are solved recursively with the child properties the candidate
//!    asked for, then the candidate is attached on top of them.
//! 4. A candidate preferred by a hint beats every non-preferred one. Cost only
//!    decides among equals; on a tie the first enumerated candidate wins.
//! 5. When the request permits enforcers, or the enumerator returned a
//!    non-authoritative set for a request an enforcer could satisfy, the relaxed
//!    request is solved as well and its winner is wrapped by a sort or exchange.
//!
//! When the operator carried a hint and nothing preferred won,
//! [`record_warnings`] explains why.
//!
//! ## Memo Alternatives
//!
//! For a [`PlanRef::Grouped`] expression the driver also tries every other
//! expression of the same group and keeps the cheapest. Children of grouped
//! expressions are group representatives, so the memo key of a child request is
//! stable across alternatives.
//!
//! ## Fitting a Task to the Request
//!
//! An attached candidate is brought to the placement the request names before
//! it competes. A root request closes cop tasks with a reader and MPP tasks with
//! a gather, so every placement can win a root request. Cop and MPP requests
//! accept only a task of exactly that placement; anything else is dropped as
//! [`Task::Invalid`], which is how an infeasible branch disappears without an
//! error.
//!
//! ## Enforced Pass
//!
//! The relaxed request drops the sort items, and for MPP requests the
//! partitioning, then the winner of that pass is wrapped by the matching
//! enforcer: a sort for order, an exchange for partitioning. Both passes offer
//! into the same [`PassResult`], so an enforced plan only wins when it is
//! cheaper or carries a hint the native pass could not honour. The cop
//! placements are never enforced.
//!
//! ## The Root
//!
//! [`PhysicalOptimizer::optimize`] solves the root under a plain root request.
//! With `try_mpp_root` and MPP allowed, the root is also solved under an MPP
//! request, closed with a gather, and kept when cheaper or when
//! `enforce_mpp` is set. The two requests share the memo, so subtrees common to
//! both are solved once.
//!
//! ## Termination
//!
//! The recursion follows the logical plan downwards, which is acyclic, and the
//! memo answers any repeated `(plan, property)` pair. The statement's
//! cancellation flag and deadline are checked on every request, so a long
//! search aborts with [`PlanError::Cancelled`] or a timeout instead of running
//! to completion.

use crate::attach::{to_root, Attacher};
use crate::data_source::leaf_tasks;
use crate::enforcer::{enforce, is_enforceable, relax};
use crate::hints::{apply_hint_preference, record_warnings, EnumerateState};
use crate::{exhaust_physical_plans, OptContext};
use phyx_core::cost::CostModel;
use phyx_core::error::{PlanError, PlanResult};
use phyx_core::memo::PlanRef;
use phyx_core::physical::{CandidateSet, PhysicalPlan};
use phyx_core::properties::{PhysicalProperty, TaskType};
use phyx_core::task::Task;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Knobs of the driver that are not session variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Also solve the root node for an MPP request and keep it when cheaper.
    pub try_mpp_root: bool,
    /// Explore every expression of a memo group, not only the one asked for.
    pub explore_alternatives: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            try_mpp_root: true,
            explore_alternatives: true,
        }
    }
}

/// Winner of one pass over a candidate set.
struct PassResult {
    task: Task,
    preferred: bool,
}

impl PassResult {
    fn invalid() -> Self {
        Self {
            task: Task::Invalid,
            preferred: false,
        }
    }

    /// Preferred beats non-preferred; otherwise strictly cheaper wins.
    fn offer(&mut self, task: Task, preferred: bool) {
        if task.is_invalid() {
            return;
        }
        let better = match (preferred, self.preferred) {
            (true, false) => true,
            (false, true) => false,
            _ => self.task.is_invalid() || task.cost() < self.task.cost(),
        };
        if better {
            self.task = task;
            self.preferred = preferred;
        }
    }
}

/// Recursive, memoizing physical plan search for one statement.
pub struct PhysicalOptimizer<'a> {
    opt: OptContext<'a>,
    cost_model: Arc<dyn CostModel>,
    config: SearchConfig,
    memo: HashMap<(PlanRef, PhysicalProperty), Task>,
}

impl<'a> PhysicalOptimizer<'a> {
    pub fn new(opt: OptContext<'a>, cost_model: Arc<dyn CostModel>, config: SearchConfig) -> Self {
        Self {
            opt,
            cost_model,
            config,
            memo: HashMap::new(),
        }
    }

    /// Number of solved `(plan, property)` requests.
    pub fn memo_len(&self) -> usize {
        self.memo.len()
    }

    /// Candidates of one node for one request, without solving children.
    pub fn enumerate(&self, plan: PlanRef, prop: &PhysicalProperty) -> PlanResult<CandidateSet> {
        exhaust_physical_plans(&self.opt, plan, prop)
    }

    /// The best complete plan for `root`, closed into a root task.
    pub fn optimize(&mut self, root: PlanRef) -> PlanResult<PhysicalPlan> {
        debug!(root = %root, "starting physical optimization");
        let cm = Arc::clone(&self.cost_model);
        let mut best = self.find_best_task(root, &PhysicalProperty::root())?;

        if self.config.try_mpp_root && self.opt.vars().is_mpp_allowed() {
            let mpp = self.find_best_task(root, &PhysicalProperty::with_task(TaskType::Mpp))?;
            let mpp = to_root(mpp, cm.as_ref());
            let take_mpp = !mpp.is_invalid()
                && (best.is_invalid() || self.opt.vars().enforce_mpp || mpp.cost() < best.cost());
            if take_mpp {
                debug!(cost = mpp.cost(), "MPP root plan wins");
                best = mpp;
            }
        }

        let cost = best.cost();
        let plan = best.into_root_plan().ok_or_else(|| {
            PlanError::internal(format!("no physical plan satisfies the root request for {}", root))
        })?;
        debug!(cost, solved = self.memo.len(), "physical optimization complete");
        Ok(plan)
    }

    /// Cheapest task for `plan` satisfying `prop`, [`Task::Invalid`] when none does.
    pub fn find_best_task(&mut self, plan: PlanRef, prop: &PhysicalProperty) -> PlanResult<Task> {
        self.opt.plan_ctx.check_cancelled()?;
        let key = (plan, prop.clone());
        if let Some(task) = self.memo.get(&key) {
            trace!(plan = %plan, "memo hit");
            return Ok(task.clone());
        }

        let alternatives = if self.config.explore_alternatives {
            self.opt.view.alternatives(plan)
        } else {
            vec![plan]
        };
        let mut best = PassResult::invalid();
        for alt in alternatives {
            let result = self.solve(alt, prop)?;
            best.offer(result.task, result.preferred);
        }

        debug!(
            plan = %plan,
            op = self.opt.op(plan).name(),
            task = ?prop.task_type,
            sorted = !prop.is_sort_item_empty(),
            cost = best.task.cost(),
            "best task"
        );
        self.memo.insert(key, best.task.clone());
        Ok(best.task)
    }

    fn solve(&mut self, plan: PlanRef, prop: &PhysicalProperty) -> PlanResult<PassResult> {
        let mut native_prop = prop.clone();
        native_prop.can_add_enforcer = false;

        let (mut best, authoritative) = self.solve_native(plan, &native_prop, false)?;

        if prop.can_add_enforcer || (!authoritative && is_enforceable(prop)) {
            let relaxed = relax(prop);
            let (inner, _) = self.solve_native(plan, &relaxed, true)?;
            let enforced = enforce(inner.task, prop, self.cost_model.as_ref());
            trace!(plan = %plan, cost = enforced.cost(), "enforced pass");
            best.offer(enforced, inner.preferred);
        }
        Ok(best)
    }

    /// Best task without enforcers, and whether the candidate set was authoritative.
    fn solve_native(
        &mut self,
        plan: PlanRef,
        prop: &PhysicalProperty,
        in_enforce: bool,
    ) -> PlanResult<(PassResult, bool)> {
        let opt = self.opt;
        let op = opt.op(plan);
        let cm = Arc::clone(&self.cost_model);
        let mut best = PassResult::invalid();

        if op.is_leaf() {
            for task in leaf_tasks(&opt, cm.as_ref(), plan, prop)? {
                best.offer(fit(task, prop, cm.as_ref()), false);
            }
            return Ok((best, true));
        }

        let set = exhaust_physical_plans(&opt, plan, prop)?;
        let children = opt.children(plan);
        let attacher = Attacher::new(&opt, cm.as_ref());
        let mut state = EnumerateState::default();

        'candidates: for cand in &set.candidates {
            if cand.child_props.len() != children.len() {
                return Err(PlanError::internal(format!(
                    "{} candidate for {} asks for {} children, node has {}",
                    cand.op.name(),
                    plan,
                    cand.child_props.len(),
                    children.len()
                )));
            }
            let mut child_tasks = Vec::with_capacity(children.len());
            for (child, child_prop) in children.iter().zip(&cand.child_props) {
                let task = self.find_best_task(*child, child_prop)?;
                if task.is_invalid() {
                    trace!(op = cand.op.name(), child = %child, "rejected: child has no task");
                    continue 'candidates;
                }
                child_tasks.push(task);
            }
            let preferred = apply_hint_preference(&opt, op, cand, &child_tasks, &mut state);
            let task = fit(attacher.attach(cand, child_tasks)?, prop, cm.as_ref());
            if task.is_invalid() {
                trace!(op = cand.op.name(), "rejected at attach");
                continue;
            }
            best.offer(task, preferred);
        }

        if !best.preferred {
            record_warnings(&opt, op, prop, in_enforce);
        }
        Ok((best, set.authoritative))
    }
}

/// Bring an attached task to the placement `prop` asks for.
///
/// Root requests close cop and MPP tasks; cop and MPP requests accept only a task
/// of that exact placement.
fn fit(task: Task, prop: &PhysicalProperty, cost_model: &dyn CostModel) -> Task {
    match prop.task_type {
        TaskType::Root => to_root(task, cost_model),
        requested if task.task_type() == Some(requested) => task,
        _ => Task::Invalid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use phyx_core::access_path::IndexInfo;
    use phyx_core::cost::DefaultCostModel;
    use phyx_core::expr::{ByItem, EqCond, JoinType, SortItem};
    use phyx_core::hint::{JoinHints, JoinPrefer};
    use phyx_core::logical::{LogicalJoin, LogicalOp, Sort};
    use phyx_core::memo::PlanRef;
    use phyx_core::session::SessionVars;
    use std::sync::atomic::Ordering;

    fn no_mpp() -> SessionVars {
        SessionVars {
            allow_mpp: false,
            ..SessionVars::default()
        }
    }

    fn optimizer<'a>(f: &'a Fixture, ctx: &'a phyx_core::PlanContext) -> PhysicalOptimizer<'a> {
        PhysicalOptimizer::new(
            OptContext::new(&f.arena, ctx),
            Arc::new(DefaultCostModel::default()),
            SearchConfig::default(),
        )
    }

    #[test]
    fn test_scan_closed_into_reader() {
        let mut f = Fixture::new();
        let (t, _) = f.table("t", &["a", "b"], 1000.0);
        let ctx = f.ctx(no_mpp());
        let mut search = optimizer(&f, &ctx);
        let plan = search.optimize(PlanRef::Direct(t)).unwrap();
        assert_eq!(plan.op_names(), vec!["TableReader", "TableFullScan"]);
    }

    #[test]
    fn test_sort_uses_index_order_or_sort_operator() {
        let mut f = Fixture::new();
        let (t, cols) = f.table("t", &["id", "a"], 10_000.0);
        let sort = f.add(
            LogicalOp::Sort(Sort {
                by_items: vec![ByItem::col(cols[1], false)],
            }),
            vec![t],
            cols.clone(),
            10_000.0,
        );
        let ctx = f.ctx(no_mpp());
        let plan = optimizer(&f, &ctx).optimize(PlanRef::Direct(sort)).unwrap();
        assert!(plan.op_names().contains(&"Sort"));

        f.add_index(t, IndexInfo::new("ia", vec![cols[1]]), 10_000.0);
        let ctx = f.ctx(no_mpp());
        let plan = optimizer(&f, &ctx).optimize(PlanRef::Direct(sort)).unwrap();
        let names = plan.op_names();
        assert!(!names.contains(&"Sort"), "{:?}", names);
        assert!(names.contains(&"IndexFullScan"), "{:?}", names);
    }

    #[test]
    fn test_memo_solves_each_request_once() {
        let mut f = Fixture::new();
        let (t1, c1) = f.table("t1", &["a"], 1000.0);
        let (t2, c2) = f.table("t2", &["a"], 100.0);
        let join = f.add(
            LogicalOp::Join(LogicalJoin::new(JoinType::Inner, vec![EqCond::new(c1[0], c2[0])])),
            vec![t1, t2],
            vec![c1[0], c2[0]],
            1000.0,
        );
        let ctx = f.ctx(no_mpp());
        let mut search = optimizer(&f, &ctx);
        search.optimize(PlanRef::Direct(join)).unwrap();
        let solved = search.memo_len();
        search.find_best_task(PlanRef::Direct(join), &PhysicalProperty::root()).unwrap();
        assert_eq!(search.memo_len(), solved);
    }

    #[test]
    fn test_hinted_candidate_beats_cheaper_one() {
        let mut f = Fixture::new();
        let (t1, c1) = f.table("t1", &["a"], 100.0);
        let (t2, c2) = f.table("t2", &["a"], 100.0);
        let mut logical = LogicalJoin::new(JoinType::Inner, vec![EqCond::new(c1[0], c2[0])]);
        logical.hints = JoinHints::new(JoinPrefer::MERGE_JOIN);
        let join = f.add(LogicalOp::Join(logical), vec![t1, t2], vec![c1[0], c2[0]], 100.0);
        let ctx = f.ctx(no_mpp());
        let plan = optimizer(&f, &ctx).optimize(PlanRef::Direct(join)).unwrap();
        assert_eq!(plan.op.name(), "MergeJoin");
        assert!(plan.op_names().contains(&"Sort"));
    }

    #[test]
    fn test_cancelled_statement_aborts() {
        let mut f = Fixture::new();
        let (t, cols) = f.table("t", &["a"], 10.0);
        let sort = f.add(
            LogicalOp::Sort(Sort {
                by_items: vec![ByItem::col(cols[0], false)],
            }),
            vec![t],
            cols,
            10.0,
        );
        let ctx = f.ctx(no_mpp());
        ctx.cancel_flag().store(true, Ordering::SeqCst);
        let err = optimizer(&f, &ctx).optimize(PlanRef::Direct(sort)).unwrap_err();
        assert!(matches!(err, PlanError::Cancelled));
    }

    #[test]
    fn test_cop_request_is_never_enforced() {
        let mut f = Fixture::new();
        let (t, cols) = f.table("t", &["a"], 10.0);
        let ctx = f.ctx(no_mpp());
        let mut search = optimizer(&f, &ctx);
        let unsorted = PhysicalProperty::with_task(TaskType::CopSingle);
        let task = search.find_best_task(PlanRef::Direct(t), &unsorted).unwrap();
        assert_eq!(task.task_type(), Some(TaskType::CopSingle));

        let sorted = PhysicalProperty {
            sort_items: vec![SortItem::asc(cols[0])],
            can_add_enforcer: true,
            ..unsorted
        };
        assert!(search.find_best_task(PlanRef::Direct(t), &sorted).unwrap().is_invalid());
    }

    #[test]
    fn test_search_config_from_partial_json() {
        let config: SearchConfig = serde_json::from_str(r#"{"try_mpp_root": false}"#).unwrap();
        assert_eq!(
            config,
            SearchConfig {
                try_mpp_root: false,
                ..SearchConfig::default()
            }
        );
    }
}
