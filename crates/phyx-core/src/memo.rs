//! # Plan Arena and Memo
//!
//! Logical plans reach the enumerator in one of two shapes:
//!
//! - a plain tree stored in a [`PlanArena`], addressed by [`NodeId`];
//! - a memo of equivalence [`Group`]s, each holding one or more [`GroupExpr`]s
//!   (alternative logical expressions producing the same rows), addressed by
//!   [`GroupExprId`].
//!
//! [`PlanRef`] is the sum of the two handles. Enumerators never switch on it;
//! they go through the [`LogicalView`] trait, which answers the same questions
//! (operator, schema, statistics, children) for both shapes.
//!
//! ## Children of Grouped Expressions
//!
//! A group expression's children are groups, not expressions. `children()` returns
//! the group's first (representative) expression; the driver asks
//! `alternatives()` when it wants every expression of a child group.

use crate::error::{PlanError, PlanResult};
use crate::expr::Schema;
use crate::logical::LogicalOp;
use crate::stats::StatsInfo;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupExprId(pub usize);

/// Handle to a logical plan node in either representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlanRef {
    Direct(NodeId),
    Grouped(GroupExprId),
}

impl fmt::Display for PlanRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanRef::Direct(id) => write!(f, "n{}", id.0),
            PlanRef::Grouped(id) => write!(f, "ge{}", id.0),
        }
    }
}

/// Uniform read access to a logical plan regardless of representation.
pub trait LogicalView {
    fn op(&self, plan: PlanRef) -> &LogicalOp;
    fn schema(&self, plan: PlanRef) -> &Schema;
    fn stats(&self, plan: PlanRef) -> &StatsInfo;
    /// Child handles; for grouped expressions the representative of each child group.
    fn children(&self, plan: PlanRef) -> Vec<PlanRef>;
    /// Every logical alternative equivalent to `plan`, `plan` itself first.
    fn alternatives(&self, plan: PlanRef) -> Vec<PlanRef>;

    fn child(&self, plan: PlanRef, idx: usize) -> PlanResult<PlanRef> {
        self.children(plan).get(idx).copied().ok_or_else(|| {
            PlanError::malformed(format!(
                "{} {} has no child {}",
                self.op(plan).name(),
                plan,
                idx
            ))
        })
    }
}

/// One node of a plain logical tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalNode {
    pub op: LogicalOp,
    #[serde(default)]
    pub children: Vec<NodeId>,
    pub schema: Schema,
    pub stats: StatsInfo,
}

/// Owner of a plain logical tree. Children are always added before parents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanArena {
    nodes: Vec<LogicalNode>,
}

impl PlanArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        op: LogicalOp,
        children: Vec<NodeId>,
        schema: Schema,
        stats: StatsInfo,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(LogicalNode {
            op,
            children,
            schema,
            stats,
        });
        id
    }

    pub fn node(&self, id: NodeId) -> &LogicalNode {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut LogicalNode {
        &mut self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Last added node, conventionally the root.
    pub fn root(&self) -> Option<NodeId> {
        self.nodes.len().checked_sub(1).map(NodeId)
    }

    /// Structural checks for plans arriving from outside the process: children
    /// precede their parents (so the tree is acyclic) and arities match.
    pub fn validate(&self) -> PlanResult<()> {
        for (idx, node) in self.nodes.iter().enumerate() {
            for child in &node.children {
                if child.0 >= idx {
                    return Err(PlanError::malformed(format!(
                        "node {} references child {} which is not defined before it",
                        idx, child.0
                    )));
                }
            }
            if let Some(arity) = node.op.arity() {
                if node.children.len() != arity {
                    return Err(PlanError::malformed(format!(
                        "{} node {} has {} children, expected {}",
                        node.op.name(),
                        idx,
                        node.children.len(),
                        arity
                    )));
                }
            } else if node.children.is_empty() {
                return Err(PlanError::malformed(format!(
                    "{} node {} has no children",
                    node.op.name(),
                    idx
                )));
            }
        }
        Ok(())
    }

    fn direct(plan: PlanRef) -> NodeId {
        match plan {
            PlanRef::Direct(id) => id,
            PlanRef::Grouped(ge) => NodeId(ge.0),
        }
    }
}

impl LogicalView for PlanArena {
    fn op(&self, plan: PlanRef) -> &LogicalOp {
        &self.node(Self::direct(plan)).op
    }

    fn schema(&self, plan: PlanRef) -> &Schema {
        &self.node(Self::direct(plan)).schema
    }

    fn stats(&self, plan: PlanRef) -> &StatsInfo {
        &self.node(Self::direct(plan)).stats
    }

    fn children(&self, plan: PlanRef) -> Vec<PlanRef> {
        self.node(Self::direct(plan))
            .children
            .iter()
            .map(|c| PlanRef::Direct(*c))
            .collect()
    }

    fn alternatives(&self, plan: PlanRef) -> Vec<PlanRef> {
        vec![plan]
    }
}

/// Equivalence class of logical expressions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub exprs: Vec<GroupExprId>,
    pub schema: Schema,
    pub stats: StatsInfo,
}

/// One logical alternative inside a group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupExpr {
    pub id: GroupExprId,
    pub group: GroupId,
    pub op: LogicalOp,
    pub children: Vec<GroupId>,
}

/// Groups of equivalent logical expressions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Memo {
    groups: Vec<Group>,
    exprs: Vec<GroupExpr>,
}

impl Memo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_group(&mut self, schema: Schema, stats: StatsInfo) -> GroupId {
        let id = GroupId(self.groups.len());
        self.groups.push(Group {
            id,
            exprs: Vec::new(),
            schema,
            stats,
        });
        id
    }

    /// Add an alternative to an existing group.
    pub fn add_expr(
        &mut self,
        group: GroupId,
        op: LogicalOp,
        children: Vec<GroupId>,
    ) -> PlanResult<GroupExprId> {
        if group.0 >= self.groups.len() {
            return Err(PlanError::internal(format!("group {} does not exist", group.0)));
        }
        if let Some(bad) = children.iter().find(|c| c.0 >= self.groups.len()) {
            return Err(PlanError::internal(format!("child group {} does not exist", bad.0)));
        }
        let id = GroupExprId(self.exprs.len());
        self.exprs.push(GroupExpr {
            id,
            group,
            op,
            children,
        });
        self.groups[group.0].exprs.push(id);
        Ok(id)
    }

    /// Copy a plain tree into the memo, one group per node. Returns the root group.
    pub fn from_arena(arena: &PlanArena, root: NodeId) -> PlanResult<(Memo, GroupId)> {
        let mut memo = Memo::new();
        let mut mapping = vec![None; arena.len()];
        let root_group = memo.copy_in(arena, root, &mut mapping)?;
        Ok((memo, root_group))
    }

    fn copy_in(
        &mut self,
        arena: &PlanArena,
        id: NodeId,
        mapping: &mut [Option<GroupId>],
    ) -> PlanResult<GroupId> {
        if let Some(Some(g)) = mapping.get(id.0) {
            return Ok(*g);
        }
        let node = arena.node(id);
        let mut children = Vec::with_capacity(node.children.len());
        for child in &node.children {
            children.push(self.copy_in(arena, *child, mapping)?);
        }
        let group = self.add_group(node.schema.clone(), node.stats.clone());
        self.add_expr(group, node.op.clone(), children)?;
        mapping[id.0] = Some(group);
        Ok(group)
    }

    pub fn group(&self, id: GroupId) -> &Group {
        &self.groups[id.0]
    }

    pub fn expr(&self, id: GroupExprId) -> &GroupExpr {
        &self.exprs[id.0]
    }

    pub fn num_groups(&self) -> usize {
        self.groups.len()
    }

    pub fn num_exprs(&self) -> usize {
        self.exprs.len()
    }

    /// First expression of a group.
    pub fn representative(&self, id: GroupId) -> PlanResult<GroupExprId> {
        self.groups[id.0]
            .exprs
            .first()
            .copied()
            .ok_or_else(|| PlanError::internal(format!("group {} is empty", id.0)))
    }

    fn grouped(plan: PlanRef) -> GroupExprId {
        match plan {
            PlanRef::Grouped(id) => id,
            PlanRef::Direct(n) => GroupExprId(n.0),
        }
    }
}

impl LogicalView for Memo {
    fn op(&self, plan: PlanRef) -> &LogicalOp {
        &self.expr(Self::grouped(plan)).op
    }

    fn schema(&self, plan: PlanRef) -> &Schema {
        &self.group(self.expr(Self::grouped(plan)).group).schema
    }

    fn stats(&self, plan: PlanRef) -> &StatsInfo {
        &self.group(self.expr(Self::grouped(plan)).group).stats
    }

    fn children(&self, plan: PlanRef) -> Vec<PlanRef> {
        self.expr(Self::grouped(plan))
            .children
            .iter()
            .filter_map(|g| self.groups[g.0].exprs.first().copied())
            .map(PlanRef::Grouped)
            .collect()
    }

    fn alternatives(&self, plan: PlanRef) -> Vec<PlanRef> {
        let id = Self::grouped(plan);
        let group = self.group(self.expr(id).group);
        let mut out = vec![plan];
        out.extend(
            group
                .exprs
                .iter()
                .filter(|e| **e != id)
                .map(|e| PlanRef::Grouped(*e)),
        );
        out
    }
}
