//! # Predicate Push-Down
//!
//! A logical rewrite run before enumeration. Filters are moved as close to the
//! data as join semantics allow, so the enumerators see filtered data sources
//! (which decides whether an ANN read or a point lookup is possible) and join
//! side conditions instead of selections stacked on top of joins.
//!
//! ```text
//! Before: Selection(t.a = 1 AND s.b > 2, Join(t, s))
//! After:  Join(DataSource(t, [t.a = 1]), DataSource(s, [s.b > 2]))
//! ```
//!
//! ## Rules
//!
//! - Adjacent selections are merged; constant-true conjuncts are dropped.
//! - A data source absorbs every conjunct into its pushed conditions.
//! - A conjunct on one join side moves into that child unless the side is the
//!   null-supplying side of an outer join. Mixed conjuncts over an inner join
//!   become equality or other conditions of the join.
//! - The join's own side conditions move into the child when doing so cannot
//!   change which rows the join emits.
//! - Every other operator is a barrier: conjuncts stop above it as a selection.
//!
//! The pass rebuilds the tree into a fresh arena, children first, so the
//! arena invariants hold for the result.

use phyx_core::error::{PlanError, PlanResult};
use phyx_core::expr::{BinaryOp, EqCond, Expr, JoinType, ScalarValue, Schema};
use phyx_core::logical::{DataSource, LogicalJoin, LogicalOp, Selection};
use phyx_core::memo::{NodeId, PlanArena};
use phyx_core::stats::{derive_filter_stats, StatsInfo, DEFAULT_FILTER_SELECTIVITY};
use tracing::debug;

/// Rewrite `src` with selections pushed down. The root of the result is its
/// last node.
pub fn push_down_predicates(src: &PlanArena) -> PlanResult<PlanArena> {
    src.validate()?;
    let root = src
        .root()
        .ok_or_else(|| PlanError::malformed("cannot push predicates through an empty plan"))?;
    let mut pass = PushDown {
        src,
        dst: PlanArena::new(),
        absorbed: 0,
    };
    pass.rebuild(root, Vec::new(), None);
    debug!(
        nodes_before = src.len(),
        nodes_after = pass.dst.len(),
        absorbed = pass.absorbed,
        "predicate push-down"
    );
    Ok(pass.dst)
}

fn is_always_true(expr: &Expr) -> bool {
    match expr {
        Expr::Literal(ScalarValue::Bool(b)) => *b,
        Expr::Literal(ScalarValue::Int64(v)) => *v != 0,
        _ => false,
    }
}

fn split_conjuncts(conds: &[Expr]) -> impl Iterator<Item = Expr> + '_ {
    conds
        .iter()
        .flat_map(|c| c.conjuncts())
        .filter(|c| !is_always_true(c))
        .cloned()
}

/// Which side of a join the conjunct can be evaluated on.
enum Side {
    Left,
    Right,
    Both,
}

fn side_of(expr: &Expr, left: &Schema, right: &Schema) -> Side {
    let cols = expr.columns();
    if cols.iter().all(|c| left.contains(*c)) {
        Side::Left
    } else if cols.iter().all(|c| right.contains(*c)) {
        Side::Right
    } else {
        Side::Both
    }
}

/// `l = r` with one column from each side, oriented left to right.
fn as_join_key(expr: &Expr, left: &Schema, right: &Schema) -> Option<EqCond> {
    let Expr::Binary {
        op: op @ (BinaryOp::Eq | BinaryOp::NullEq),
        left: l,
        right: r,
    } = expr
    else {
        return None;
    };
    let (a, b) = (l.as_column()?, r.as_column()?);
    let (lc, rc) = if left.contains(a) && right.contains(b) {
        (a, b)
    } else if left.contains(b) && right.contains(a) {
        (b, a)
    } else {
        return None;
    };
    let mut cond = EqCond::new(lc, rc);
    cond.null_eq = *op == BinaryOp::NullEq;
    Some(cond)
}

/// Filters above the join may enter the left child.
fn left_accepts_outer_filters(jt: JoinType) -> bool {
    jt != JoinType::RightOuter
}

fn right_accepts_outer_filters(jt: JoinType) -> bool {
    matches!(jt, JoinType::Inner | JoinType::RightOuter)
}

/// The join's own left conditions may become a left-child filter.
fn left_conds_push_down(jt: JoinType) -> bool {
    matches!(jt, JoinType::Inner | JoinType::Semi | JoinType::RightOuter)
}

fn right_conds_push_down(jt: JoinType) -> bool {
    jt != JoinType::RightOuter
}

struct PushDown<'a> {
    src: &'a PlanArena,
    dst: PlanArena,
    absorbed: usize,
}

impl PushDown<'_> {
    /// Rebuild `node` with `preds` applied to its output. `filtered` is the
    /// known cardinality after the filter, when a removed selection gave one.
    fn rebuild(&mut self, node: NodeId, preds: Vec<Expr>, filtered: Option<StatsInfo>) -> NodeId {
        let src = self.src;
        let n = src.node(node);
        match &n.op {
            LogicalOp::Selection(sel) => {
                let mut all = preds;
                all.extend(split_conjuncts(&sel.conds));
                let filtered = filtered.or_else(|| Some(n.stats.clone()));
                self.rebuild(n.children[0], all, filtered)
            }
            LogicalOp::DataSource(ds) => self.absorb_into_source(ds, n.schema.clone(), &n.stats, preds, filtered),
            LogicalOp::Join(join) => self.push_through_join(node, join, preds, filtered),
            op => {
                let children = n.children.iter().map(|c| self.rebuild(*c, Vec::new(), None)).collect();
                let id = self.dst.add(op.clone(), children, n.schema.clone(), n.stats.clone());
                self.wrap(id, preds, filtered)
            }
        }
    }

    fn absorb_into_source(
        &mut self,
        ds: &DataSource,
        schema: Schema,
        stats: &StatsInfo,
        preds: Vec<Expr>,
        filtered: Option<StatsInfo>,
    ) -> NodeId {
        let mut ds = ds.clone();
        let stats = if preds.is_empty() {
            stats.clone()
        } else {
            filtered.unwrap_or_else(|| derive_filter_stats(stats, DEFAULT_FILTER_SELECTIVITY))
        };
        for pred in preds {
            if !ds.pushed_conds.contains(&pred) {
                ds.pushed_conds.push(pred);
                self.absorbed += 1;
            }
        }
        self.dst.add(LogicalOp::DataSource(ds), Vec::new(), schema, stats)
    }

    fn push_through_join(
        &mut self,
        node: NodeId,
        join: &LogicalJoin,
        preds: Vec<Expr>,
        filtered: Option<StatsInfo>,
    ) -> NodeId {
        let src = self.src;
        let n = src.node(node);
        let (left, right) = (n.children[0], n.children[1]);
        let left_schema = src.node(left).schema.clone();
        let right_schema = src.node(right).schema.clone();
        let jt = join.join_type;
        let mut join = join.clone();
        let mut left_preds = Vec::new();
        let mut right_preds = Vec::new();
        let mut above = Vec::new();

        for pred in preds {
            match side_of(&pred, &left_schema, &right_schema) {
                Side::Left if left_accepts_outer_filters(jt) => left_preds.push(pred),
                Side::Right if right_accepts_outer_filters(jt) => right_preds.push(pred),
                Side::Both if jt == JoinType::Inner => match as_join_key(&pred, &left_schema, &right_schema) {
                    Some(key) if !join.equal_conds.contains(&key) => join.equal_conds.push(key),
                    Some(_) => {}
                    None => join.other_conds.push(pred),
                },
                _ => above.push(pred),
            }
        }
        if left_conds_push_down(jt) {
            left_preds.extend(split_conjuncts(&std::mem::take(&mut join.left_conds)));
        }
        if right_conds_push_down(jt) {
            right_preds.extend(split_conjuncts(&std::mem::take(&mut join.right_conds)));
        }

        // a filter that moved into the join changes the join's cardinality
        let stats = match &filtered {
            Some(s) if above.is_empty() => s.clone(),
            _ => n.stats.clone(),
        };
        let children = vec![
            self.rebuild(left, left_preds, None),
            self.rebuild(right, right_preds, None),
        ];
        let id = self.dst.add(LogicalOp::Join(join), children, n.schema.clone(), stats);
        self.wrap(id, above, filtered)
    }

    /// Keep `preds` above `id` as a selection.
    fn wrap(&mut self, id: NodeId, preds: Vec<Expr>, filtered: Option<StatsInfo>) -> NodeId {
        if preds.is_empty() {
            return id;
        }
        let child = self.dst.node(id);
        let schema = child.schema.clone();
        let stats = filtered.unwrap_or_else(|| derive_filter_stats(&child.stats, DEFAULT_FILTER_SELECTIVITY));
        self.dst
            .add(LogicalOp::Selection(Selection { conds: preds }), vec![id], schema, stats)
    }
}
