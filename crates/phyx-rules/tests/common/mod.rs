//! Plan builder shared by the integration tests.

#![allow(dead_code)]

use phyx_core::access_path::{AccessPath, HandleKind};
use phyx_core::cost::DefaultCostModel;
use phyx_core::expr::{ColumnId, ColumnTable, FieldType, Schema, StoreType};
use phyx_core::logical::{DataSource, LogicalJoin, LogicalOp};
use phyx_core::memo::{NodeId, PlanArena, PlanRef};
use phyx_core::physical::{CandidateSet, PhysicalPlan};
use phyx_core::properties::PhysicalProperty;
use phyx_core::session::SessionVars;
use phyx_core::stats::StatsInfo;
use phyx_core::PlanContext;
use phyx_rules::{exhaust_physical_plans, OptContext, PhysicalOptimizer, SearchConfig};
use std::sync::Arc;

pub struct Query {
    pub arena: PlanArena,
    pub columns: ColumnTable,
}

impl Query {
    pub fn new() -> Self {
        Self {
            arena: PlanArena::new(),
            columns: ColumnTable::new(),
        }
    }

    /// Row-store table with a hidden row id.
    pub fn table(&mut self, name: &str, cols: &[&str], rows: f64) -> (NodeId, Vec<ColumnId>) {
        let ids: Vec<ColumnId> = cols
            .iter()
            .map(|c| self.columns.add(Some(name), c, FieldType::Int))
            .collect();
        let ds = DataSource {
            table: name.to_string(),
            handle: HandleKind::RowId,
            paths: vec![AccessPath::table(StoreType::TiKv, rows)],
            pushed_conds: vec![],
            prefer_tiflash: false,
            is_partitioned: false,
        };
        let node = self
            .arena
            .add(LogicalOp::DataSource(ds), vec![], Schema::new(ids.clone()), StatsInfo::new(rows));
        (node, ids)
    }

    pub fn path(&mut self, table: NodeId, path: AccessPath) {
        if let LogicalOp::DataSource(ds) = &mut self.arena.node_mut(table).op {
            ds.paths.push(path);
        }
    }

    pub fn join(&mut self, join: LogicalJoin, left: NodeId, right: NodeId, rows: f64) -> NodeId {
        let schema = Schema::merge(&self.arena.node(left).schema, &self.arena.node(right).schema);
        self.arena.add(LogicalOp::Join(join), vec![left, right], schema, StatsInfo::new(rows))
    }

    pub fn add(&mut self, op: LogicalOp, child: NodeId, schema: Vec<ColumnId>, rows: f64) -> NodeId {
        self.arena.add(op, vec![child], Schema::new(schema), StatsInfo::new(rows))
    }

    pub fn ctx(&self, vars: SessionVars) -> PlanContext {
        PlanContext::new(vars, self.columns.clone())
    }

    pub fn enumerate(&self, ctx: &PlanContext, node: NodeId, prop: &PhysicalProperty) -> CandidateSet {
        let opt = OptContext::new(&self.arena, ctx);
        exhaust_physical_plans(&opt, PlanRef::Direct(node), prop).unwrap()
    }

    pub fn optimize(&self, ctx: &PlanContext, node: NodeId) -> PhysicalPlan {
        let mut search = PhysicalOptimizer::new(
            OptContext::new(&self.arena, ctx),
            Arc::new(DefaultCostModel::default()),
            SearchConfig::default(),
        );
        search.optimize(PlanRef::Direct(node)).unwrap()
    }
}

