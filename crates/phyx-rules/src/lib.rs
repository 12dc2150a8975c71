//! # Physical Plan Enumeration
//!
//! This crate turns a logical plan (a [`PlanArena`](phyx_core::memo::PlanArena) tree
//! or a [`Memo`](phyx_core::memo::Memo) of alternatives) into a physical plan. It is
//! split the same way the work is split:
//!
//! ## Enumerators (Logical -> Candidates)
//!
//! [`exhaust_physical_plans`] answers one property request for one logical node
//! with a [`CandidateSet`]: physical operators not yet connected to children, each
//! carrying the property it needs from every child, plus an `authoritative` flag
//! telling the driver whether an enforced retry may still find something better.
//!
//! - **`impl_join`**: join dispatcher, hash joins and merge joins.
//! - **`index_join`**: index join, index hash join and index merge join; static
//!   enumeration plus completion from the inner task.
//! - **`impl_mpp`**: MPP hash joins and the broadcast-vs-shuffle decision.
//! - **`impl_agg`**: hash, stream and MPP aggregation phases.
//! - **`impl_sort`**: Sort, TopN and Limit.
//! - **`impl_window`**: window functions.
//! - **`impl_misc`**: selection, projection, apply, union, lock and the other
//!   single-purpose operators.
//!
//! ## Arbitration
//!
//! - **`hints`**: hint preference over attached candidates and the
//!   inapplicable-hint diagnostics.
//!
//! ## Tasks (Candidates -> Plans)
//!
//! - **`data_source`**: leaf tasks for table, index and MPP scans, including the
//!   inner side of index joins.
//! - **`attach`**: wraps a candidate around its children's tasks, converting
//!   placement where needed and completing index joins.
//! - **`enforcer`**: sort and exchange enforcers.
//! - **`search`**: the memoizing driver, [`PhysicalOptimizer`].
//!
//! ## Logical Rewrites
//!
//! - **`predicate_pushdown`**: pushes selection conjuncts into data sources and
//!   join side conditions before enumeration.

pub mod attach;
pub mod data_source;
pub mod enforcer;
pub mod hints;
pub mod impl_agg;
pub mod impl_join;
pub mod impl_misc;
pub mod impl_mpp;
pub mod impl_sort;
pub mod impl_window;
pub mod index_join;
pub mod predicate_pushdown;
pub mod search;

use phyx_core::error::{PlanError, PlanResult};
use phyx_core::expr::Schema;
use phyx_core::logical::LogicalOp;
use phyx_core::memo::{LogicalView, PlanRef};
use phyx_core::physical::{Candidate, CandidateSet, PhysicalOp};
use phyx_core::properties::PhysicalProperty;
use phyx_core::session::SessionVars;
use phyx_core::stats::StatsInfo;
use phyx_core::PlanContext;
use tracing::trace;

pub use search::{PhysicalOptimizer, SearchConfig};

/// Everything an enumerator reads: the logical plan and the compilation context.
#[derive(Clone, Copy)]
pub struct OptContext<'a> {
    pub view: &'a dyn LogicalView,
    pub plan_ctx: &'a PlanContext,
}

impl<'a> OptContext<'a> {
    pub fn new(view: &'a dyn LogicalView, plan_ctx: &'a PlanContext) -> Self {
        Self { view, plan_ctx }
    }

    pub fn vars(&self) -> &'a SessionVars {
        &self.plan_ctx.vars
    }

    pub fn op(&self, plan: PlanRef) -> &'a LogicalOp {
        self.view.op(plan)
    }

    pub fn stats(&self, plan: PlanRef) -> &'a StatsInfo {
        self.view.stats(plan)
    }

    pub fn schema(&self, plan: PlanRef) -> &'a Schema {
        self.view.schema(plan)
    }

    pub fn child(&self, plan: PlanRef, idx: usize) -> PlanResult<PlanRef> {
        self.view.child(plan, idx)
    }

    pub fn children(&self, plan: PlanRef) -> Vec<PlanRef> {
        self.view.children(plan)
    }

    /// A candidate for `plan` whose statistics are scaled to the request.
    pub fn candidate(
        &self,
        plan: PlanRef,
        prop: &PhysicalProperty,
        op: PhysicalOp,
        child_props: Vec<PhysicalProperty>,
    ) -> Candidate {
        Candidate::new(
            op,
            child_props,
            self.stats(plan).scale_by_expect_cnt(prop.expected()),
            self.schema(plan).clone(),
        )
    }
}

/// Enumerate the physical alternatives of one logical node under one request.
///
/// Leaves (data sources, CTE readers, table duals) are not enumerated here; the
/// driver turns them into tasks directly. Asking for one is a caller bug.
pub fn exhaust_physical_plans(
    opt: &OptContext<'_>,
    plan: PlanRef,
    prop: &PhysicalProperty,
) -> PlanResult<CandidateSet> {
    opt.plan_ctx.check_cancelled()?;
    let set = match opt.op(plan) {
        LogicalOp::Join(join) => impl_join::exhaust_join(opt, plan, join, prop)?,
        LogicalOp::Aggregation(agg) => impl_agg::exhaust_aggregation(opt, plan, agg, prop)?,
        LogicalOp::Projection(proj) => impl_misc::exhaust_projection(opt, plan, proj, prop)?,
        LogicalOp::Selection(sel) => impl_misc::exhaust_selection(opt, plan, sel, prop)?,
        LogicalOp::Sort(sort) => impl_sort::exhaust_sort(opt, plan, sort, prop),
        LogicalOp::TopN(topn) => impl_sort::exhaust_topn(opt, plan, topn, prop)?,
        LogicalOp::Limit(limit) => impl_sort::exhaust_limit(opt, plan, limit, prop),
        LogicalOp::Window(window) => impl_window::exhaust_window(opt, plan, window, prop)?,
        LogicalOp::UnionAll(union) => impl_misc::exhaust_union_all(opt, plan, union, prop)?,
        LogicalOp::UnionScan(us) => impl_misc::exhaust_union_scan(opt, plan, us, prop),
        LogicalOp::Apply(apply) => impl_misc::exhaust_apply(opt, plan, apply, prop)?,
        LogicalOp::Expand(expand) => impl_misc::exhaust_expand(opt, plan, expand, prop),
        LogicalOp::MaxOneRow => impl_misc::exhaust_max_one_row(opt, plan, prop),
        LogicalOp::Lock(lock) => impl_misc::exhaust_lock(opt, plan, lock, prop),
        LogicalOp::CteProducer(cte) => impl_misc::exhaust_cte_producer(opt, plan, cte, prop),
        LogicalOp::Sequence => impl_misc::exhaust_sequence(opt, plan, prop)?,
        LogicalOp::DataSource(_) | LogicalOp::CteReader(_) | LogicalOp::TableDual { .. } => {
            return Err(PlanError::internal(format!(
                "{} {} is a leaf and has no enumerator",
                opt.op(plan).name(),
                plan
            )));
        }
    };
    for cand in &set.candidates {
        trace!(plan = %plan, op = cand.op.name(), task = ?cand.task_type(), "candidate");
    }
    Ok(set)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Small plan builders shared by the unit tests of this crate.

    use phyx_core::access_path::{AccessPath, HandleKind, IndexInfo};
    use phyx_core::expr::{ColumnId, ColumnTable, FieldType, Schema, StoreType};
    use phyx_core::logical::{DataSource, LogicalOp};
    use phyx_core::memo::{NodeId, PlanArena};
    use phyx_core::session::SessionVars;
    use phyx_core::stats::StatsInfo;
    use phyx_core::PlanContext;

    pub struct Fixture {
        pub arena: PlanArena,
        pub columns: ColumnTable,
    }

    impl Fixture {
        pub fn new() -> Self {
            Self {
                arena: PlanArena::new(),
                columns: ColumnTable::new(),
            }
        }

        pub fn col(&mut self, table: &str, name: &str) -> ColumnId {
            self.columns.add(Some(table), name, FieldType::Int)
        }

        /// Table `name` with int columns `cols`, a hidden row id and one row-store path.
        pub fn table(&mut self, name: &str, cols: &[&str], rows: f64) -> (NodeId, Vec<ColumnId>) {
            let ids: Vec<ColumnId> = cols.iter().map(|c| self.col(name, c)).collect();
            let ds = DataSource {
                table: name.to_string(),
                handle: HandleKind::RowId,
                paths: vec![AccessPath::table(StoreType::TiKv, rows)],
                pushed_conds: vec![],
                prefer_tiflash: false,
                is_partitioned: false,
            };
            let node = self.arena.add(
                LogicalOp::DataSource(ds),
                vec![],
                Schema::new(ids.clone()),
                StatsInfo::new(rows),
            );
            (node, ids)
        }

        pub fn add_index(&mut self, node: NodeId, index: IndexInfo, rows: f64) {
            if let LogicalOp::DataSource(ds) = &mut self.arena.node_mut(node).op {
                ds.paths.push(AccessPath::index(index, rows));
            }
        }

        pub fn add_tiflash(&mut self, node: NodeId, rows: f64) {
            if let LogicalOp::DataSource(ds) = &mut self.arena.node_mut(node).op {
                ds.paths.push(AccessPath::table(StoreType::TiFlash, rows));
            }
        }

        pub fn add(&mut self, op: LogicalOp, children: Vec<NodeId>, schema: Vec<ColumnId>, rows: f64) -> NodeId {
            self.arena
                .add(op, children, Schema::new(schema), StatsInfo::new(rows))
        }

        pub fn ctx(&self, vars: SessionVars) -> PlanContext {
            PlanContext::new(vars, self.columns.clone())
        }
    }
}
