//! # Columns, Scalar Expressions and Operator Vocabulary
//!
//! This module defines the scalar layer shared by logical and physical operators.
//!
//! ## Column Identity
//!
//! Columns are referenced everywhere by a stable integer [`ColumnId`]. The semantic
//! information (name, owning table, field type) lives in a side table, the
//! [`ColumnTable`], which is built once per statement and is read-only during
//! enumeration. Schema equality and subset checks therefore reduce to integer-set
//! operations instead of structural comparisons of expression trees.
//!
//! ## Scalar Expressions (`Expr`)
//!
//! Expressions appear in predicates, projections, group-by items, sort items and
//! join conditions. The engine never evaluates them; it only needs to answer
//! structural questions:
//! - which columns does the expression reference,
//! - can it be pushed down to a given storage/compute engine,
//! - is it a plain column, or a vector-distance search expression.
//!
//! ## Push-down Eligibility
//!
//! Each function call carries its own per-store eligibility flags (supplied by the
//! expression collaborator). On top of that a session may block function or
//! operator names for the MPP engine through a block list, mirroring the
//! `expr_pushdown_blacklist` table of the reference engine.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Stable numeric identity of a column across all operators of one statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnId(pub u32);

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Column value types the enumerator needs to distinguish.
///
/// Only a handful of properties matter: enum/set keys cannot be merge-compared,
/// vector columns only live in the columnar engine, and duration vs datetime frame
/// bounds cannot be compared by the MPP engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    Int,
    Decimal,
    Float,
    String,
    Enum,
    Set,
    Date,
    Datetime,
    Duration,
    Json,
    Vector,
}

impl FieldType {
    /// Enum and set values are not totally ordered the way merge comparison expects.
    pub fn is_enum_or_set(&self) -> bool {
        matches!(self, FieldType::Enum | FieldType::Set)
    }
}

/// Semantic information about one column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub id: ColumnId,
    pub name: String,
    #[serde(default)]
    pub table: Option<String>,
    pub field_type: FieldType,
    /// Virtual generated column: computed at read time, never pushed to MPP.
    #[serde(default)]
    pub is_virtual: bool,
}

/// Side table mapping column ids to their semantic information.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColumnTable {
    columns: BTreeMap<ColumnId, ColumnInfo>,
    next_id: u32,
}

impl ColumnTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new column and return its id.
    pub fn add(&mut self, table: Option<&str>, name: &str, field_type: FieldType) -> ColumnId {
        let id = ColumnId(self.next_id);
        self.next_id += 1;
        self.columns.insert(
            id,
            ColumnInfo {
                id,
                name: name.to_string(),
                table: table.map(str::to_string),
                field_type,
                is_virtual: false,
            },
        );
        id
    }

    pub fn mark_virtual(&mut self, id: ColumnId) {
        if let Some(info) = self.columns.get_mut(&id) {
            info.is_virtual = true;
        }
    }

    pub fn get(&self, id: ColumnId) -> Option<&ColumnInfo> {
        self.columns.get(&id)
    }

    pub fn field_type(&self, id: ColumnId) -> Option<FieldType> {
        self.columns.get(&id).map(|c| c.field_type)
    }

    pub fn is_virtual(&self, id: ColumnId) -> bool {
        self.columns.get(&id).is_some_and(|c| c.is_virtual)
    }

    /// Display name, `table.column` when the table is known.
    pub fn display(&self, id: ColumnId) -> String {
        match self.columns.get(&id) {
            Some(ColumnInfo { table: Some(t), name, .. }) => format!("{}.{}", t, name),
            Some(info) => info.name.clone(),
            None => id.to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Ordered output columns of an operator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    pub columns: Vec<ColumnId>,
}

impl Schema {
    pub fn new(columns: Vec<ColumnId>) -> Self {
        Self { columns }
    }

    pub fn contains(&self, col: ColumnId) -> bool {
        self.columns.contains(&col)
    }

    pub fn contains_all(&self, cols: &[ColumnId]) -> bool {
        cols.iter().all(|c| self.contains(*c))
    }

    /// Position of a column in the schema.
    pub fn offset(&self, col: ColumnId) -> Option<usize> {
        self.columns.iter().position(|c| *c == col)
    }

    /// Concatenation used for join output schemas.
    pub fn merge(left: &Schema, right: &Schema) -> Schema {
        let mut columns = left.columns.clone();
        columns.extend(right.columns.iter().copied());
        Schema { columns }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Constant values appearing in expressions and index ranges.
///
/// `f64` is wrapped in `OrderedFloat` so that values can participate in Eq/Hash,
/// which the driver's memo key (the physical property) relies on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(OrderedFloat<f64>),
    Utf8(String),
    Date(i32),
    /// Serialized vector literal, e.g. `[1,2,3]`.
    Vector(Vec<OrderedFloat<f32>>),
}

impl PartialEq for ScalarValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int64(a), Self::Int64(b)) => a == b,
            (Self::Float64(a), Self::Float64(b)) => a == b,
            (Self::Utf8(a), Self::Utf8(b)) => a == b,
            (Self::Date(a), Self::Date(b)) => a == b,
            (Self::Vector(a), Self::Vector(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ScalarValue {}

impl Hash for ScalarValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Null => {}
            Self::Bool(v) => v.hash(state),
            Self::Int64(v) => v.hash(state),
            Self::Float64(v) => v.hash(state),
            Self::Utf8(v) => v.hash(state),
            Self::Date(v) => v.hash(state),
            Self::Vector(v) => v.hash(state),
        }
    }
}

/// Binary operators for comparison, arithmetic and boolean logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    /// `=`
    Eq,
    /// Null-safe equality `<=>`.
    NullEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
}

impl BinaryOp {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::NullEq
                | BinaryOp::NotEq
                | BinaryOp::Lt
                | BinaryOp::LtEq
                | BinaryOp::Gt
                | BinaryOp::GtEq
        )
    }

    /// Range comparison usable as a compare filter on an index column.
    pub fn is_range_cmp(&self) -> bool {
        matches!(self, BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq)
    }

    /// The operator obtained by swapping operands (`a < b` to `b > a`).
    pub fn swapped(&self) -> BinaryOp {
        match self {
            BinaryOp::Lt => BinaryOp::Gt,
            BinaryOp::LtEq => BinaryOp::GtEq,
            BinaryOp::Gt => BinaryOp::Lt,
            BinaryOp::GtEq => BinaryOp::LtEq,
            other => *other,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::NullEq => "<=>",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }
}

/// Execution engines an expression or operator may be pushed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StoreType {
    /// Row-oriented storage coprocessor.
    TiKv,
    /// Columnar MPP compute layer.
    TiFlash,
    /// Central SQL layer.
    TiDb,
}

/// Per-store push-down eligibility of a function call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pushdown {
    pub tikv: bool,
    pub tiflash: bool,
}

impl Default for Pushdown {
    fn default() -> Self {
        Self {
            tikv: true,
            tiflash: true,
        }
    }
}

impl Pushdown {
    pub fn none() -> Self {
        Self {
            tikv: false,
            tiflash: false,
        }
    }

    pub fn allows(&self, store: StoreType) -> bool {
        match store {
            StoreType::TiKv => self.tikv,
            StoreType::TiFlash => self.tiflash,
            StoreType::TiDb => true,
        }
    }
}

/// Context for push-down checks: column types plus the session's MPP block list.
#[derive(Debug, Clone, Copy)]
pub struct PushDownCtx<'a> {
    pub columns: &'a ColumnTable,
    pub blocked: &'a [String],
}

impl<'a> PushDownCtx<'a> {
    pub fn is_blocked(&self, name: &str, store: StoreType) -> bool {
        store == StoreType::TiFlash && self.blocked.iter().any(|b| b.eq_ignore_ascii_case(name))
    }
}

/// Scalar expression tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Expr {
    Column(ColumnId),
    /// Correlated reference to an outer column (inside an Apply's inner side).
    Correlated(ColumnId),
    Literal(ScalarValue),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    In {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    Function {
        name: String,
        args: Vec<Expr>,
        #[serde(default)]
        pushdown: Pushdown,
    },
}

impl Expr {
    pub fn col(id: ColumnId) -> Expr {
        Expr::Column(id)
    }

    pub fn int(v: i64) -> Expr {
        Expr::Literal(ScalarValue::Int64(v))
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn eq(left: Expr, right: Expr) -> Expr {
        Expr::binary(BinaryOp::Eq, left, right)
    }

    pub fn func(name: &str, args: Vec<Expr>) -> Expr {
        Expr::Function {
            name: name.to_string(),
            args,
            pushdown: Pushdown::default(),
        }
    }

    /// The column id when the expression is a plain column reference.
    pub fn as_column(&self) -> Option<ColumnId> {
        match self {
            Expr::Column(c) => Some(*c),
            _ => None,
        }
    }

    pub fn is_column(&self) -> bool {
        matches!(self, Expr::Column(_))
    }

    pub fn is_constant(&self) -> bool {
        match self {
            Expr::Literal(_) => true,
            Expr::Column(_) | Expr::Correlated(_) => false,
            Expr::Binary { left, right, .. } => left.is_constant() && right.is_constant(),
            Expr::In { expr, list, .. } => expr.is_constant() && list.iter().all(Expr::is_constant),
            Expr::Function { args, .. } => args.iter().all(Expr::is_constant),
        }
    }

    /// All (non-correlated) columns referenced by the expression, in first-seen order.
    pub fn columns(&self) -> Vec<ColumnId> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns(&self, out: &mut Vec<ColumnId>) {
        match self {
            Expr::Column(c) => {
                if !out.contains(c) {
                    out.push(*c);
                }
            }
            Expr::Correlated(_) | Expr::Literal(_) => {}
            Expr::Binary { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
            Expr::In { expr, list, .. } => {
                expr.collect_columns(out);
                for e in list {
                    e.collect_columns(out);
                }
            }
            Expr::Function { args, .. } => {
                for a in args {
                    a.collect_columns(out);
                }
            }
        }
    }

    /// True if every referenced column belongs to `schema`.
    pub fn columns_in(&self, schema: &Schema) -> bool {
        self.columns().iter().all(|c| schema.contains(*c))
    }

    /// Flatten `a AND (b AND c)` into `[a, b, c]`.
    pub fn conjuncts(&self) -> Vec<&Expr> {
        match self {
            Expr::Binary {
                op: BinaryOp::And,
                left,
                right,
            } => {
                let mut out = left.conjuncts();
                out.extend(right.conjuncts());
                out
            }
            other => vec![other],
        }
    }

    pub fn contains_virtual_column(&self, columns: &ColumnTable) -> bool {
        self.columns().iter().any(|c| columns.is_virtual(*c))
    }

    /// Whether the whole expression can be evaluated by `store`.
    pub fn can_push_to(&self, ctx: &PushDownCtx<'_>, store: StoreType) -> bool {
        match self {
            Expr::Column(c) => match ctx.columns.field_type(*c) {
                Some(FieldType::Vector) => store != StoreType::TiKv,
                _ => true,
            },
            Expr::Correlated(_) => store != StoreType::TiFlash,
            Expr::Literal(_) => true,
            Expr::Binary { op, left, right } => {
                !ctx.is_blocked(op.symbol(), store)
                    && left.can_push_to(ctx, store)
                    && right.can_push_to(ctx, store)
            }
            Expr::In { expr, list, .. } => {
                !ctx.is_blocked("in", store)
                    && expr.can_push_to(ctx, store)
                    && list.iter().all(|e| e.can_push_to(ctx, store))
            }
            Expr::Function {
                name,
                args,
                pushdown,
            } => {
                pushdown.allows(store)
                    && !ctx.is_blocked(name, store)
                    && args.iter().all(|a| a.can_push_to(ctx, store))
            }
        }
    }

    /// Recognise `vec_<metric>_distance(col, const)` as a vector search expression.
    pub fn as_vector_search(&self, columns: &ColumnTable) -> Option<VectorSearchInfo> {
        let Expr::Function { name, args, .. } = self else {
            return None;
        };
        let metric = match name.to_ascii_lowercase().as_str() {
            "vec_l2_distance" => DistanceMetric::L2,
            "vec_cosine_distance" => DistanceMetric::Cosine,
            _ => return None,
        };
        if args.len() != 2 {
            return None;
        }
        let (col, constant) = match (&args[0], &args[1]) {
            (Expr::Column(c), k @ Expr::Literal(_)) | (k @ Expr::Literal(_), Expr::Column(c)) => {
                (*c, k)
            }
            _ => return None,
        };
        if columns.field_type(col) != Some(FieldType::Vector) {
            return None;
        }
        Some(VectorSearchInfo {
            column: col,
            metric,
            query: constant.clone(),
        })
    }

    /// Human-readable rendering using column names from the side table.
    pub fn display(&self, columns: &ColumnTable) -> String {
        match self {
            Expr::Column(c) => columns.display(*c),
            Expr::Correlated(c) => format!("outer({})", columns.display(*c)),
            Expr::Literal(v) => format!("{:?}", v),
            Expr::Binary { op, left, right } => format!(
                "{} {} {}",
                left.display(columns),
                op.symbol(),
                right.display(columns)
            ),
            Expr::In { expr, list, negated } => format!(
                "{} {}in({})",
                expr.display(columns),
                if *negated { "not " } else { "" },
                list.iter().map(|e| e.display(columns)).collect::<Vec<_>>().join(", ")
            ),
            Expr::Function { name, args, .. } => format!(
                "{}({})",
                name,
                args.iter().map(|e| e.display(columns)).collect::<Vec<_>>().join(", ")
            ),
        }
    }
}

/// Distance metric of a vector search expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DistanceMetric {
    L2,
    Cosine,
}

/// A recognised `ORDER BY vec_distance(col, const)` search.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VectorSearchInfo {
    pub column: ColumnId,
    pub metric: DistanceMetric,
    pub query: Expr,
}

/// One side-pair of an equality join condition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EqCond {
    pub left: ColumnId,
    pub right: ColumnId,
    /// Null-safe equality (`<=>`).
    #[serde(default)]
    pub null_eq: bool,
    /// The condition was produced by rewriting `IN`/`NOT IN` subqueries; its null
    /// semantics differ from a plain equality.
    #[serde(default)]
    pub in_operand: bool,
}

impl EqCond {
    pub fn new(left: ColumnId, right: ColumnId) -> Self {
        Self {
            left,
            right,
            null_eq: false,
            in_operand: false,
        }
    }

    pub fn to_expr(&self) -> Expr {
        let op = if self.null_eq { BinaryOp::NullEq } else { BinaryOp::Eq };
        Expr::binary(op, Expr::Column(self.left), Expr::Column(self.right))
    }
}

/// Required or delivered sort on a single column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortItem {
    pub col: ColumnId,
    #[serde(default)]
    pub desc: bool,
}

impl SortItem {
    pub fn asc(col: ColumnId) -> Self {
        Self { col, desc: false }
    }

    pub fn desc(col: ColumnId) -> Self {
        Self { col, desc: true }
    }
}

/// ORDER BY item over an arbitrary expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ByItem {
    pub expr: Expr,
    #[serde(default)]
    pub desc: bool,
}

impl ByItem {
    pub fn col(col: ColumnId, desc: bool) -> Self {
        Self {
            expr: Expr::Column(col),
            desc,
        }
    }
}

/// Converts by-items into sort items when every item is a plain column.
pub fn sort_items_from_by_items(items: &[ByItem]) -> Option<Vec<SortItem>> {
    items
        .iter()
        .map(|b| b.expr.as_column().map(|col| SortItem { col, desc: b.desc }))
        .collect()
}

/// Join types understood by the enumerator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinType {
    Inner,
    LeftOuter,
    RightOuter,
    Semi,
    AntiSemi,
    LeftOuterSemi,
    AntiLeftOuterSemi,
}

impl JoinType {
    pub fn is_semi(&self) -> bool {
        matches!(
            self,
            JoinType::Semi | JoinType::AntiSemi | JoinType::LeftOuterSemi | JoinType::AntiLeftOuterSemi
        )
    }

    pub fn is_outer(&self) -> bool {
        matches!(self, JoinType::LeftOuter | JoinType::RightOuter)
    }
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JoinType::Inner => "inner join",
            JoinType::LeftOuter => "left outer join",
            JoinType::RightOuter => "right outer join",
            JoinType::Semi => "semi join",
            JoinType::AntiSemi => "anti semi join",
            JoinType::LeftOuterSemi => "left outer semi join",
            JoinType::AntiLeftOuterSemi => "anti left outer semi join",
        };
        f.write_str(s)
    }
}

/// Aggregate function names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggFuncName {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    FirstRow,
    GroupConcat,
    ApproxCountDistinct,
}

impl AggFuncName {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggFuncName::Count => "count",
            AggFuncName::Sum => "sum",
            AggFuncName::Avg => "avg",
            AggFuncName::Min => "min",
            AggFuncName::Max => "max",
            AggFuncName::FirstRow => "firstrow",
            AggFuncName::GroupConcat => "group_concat",
            AggFuncName::ApproxCountDistinct => "approx_count_distinct",
        }
    }
}

/// Execution stage of an aggregate function.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggMode {
    #[default]
    Complete,
    Partial,
    Final,
}

/// Aggregate function descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggFuncDesc {
    pub name: AggFuncName,
    pub args: Vec<Expr>,
    #[serde(default)]
    pub distinct: bool,
    #[serde(default)]
    pub mode: AggMode,
    /// ORDER BY inside the aggregate (`group_concat(a order by b)`).
    #[serde(default)]
    pub order_by: Vec<ByItem>,
}

impl AggFuncDesc {
    pub fn new(name: AggFuncName, args: Vec<Expr>) -> Self {
        Self {
            name,
            args,
            distinct: false,
            mode: AggMode::Complete,
            order_by: Vec::new(),
        }
    }

    pub fn can_push_to(&self, ctx: &PushDownCtx<'_>, store: StoreType) -> bool {
        if ctx.is_blocked(self.name.as_str(), store) {
            return false;
        }
        if store == StoreType::TiKv
            && matches!(self.name, AggFuncName::GroupConcat | AggFuncName::ApproxCountDistinct)
        {
            return false;
        }
        self.args.iter().all(|a| a.can_push_to(ctx, store))
            && self.order_by.iter().all(|b| b.expr.can_push_to(ctx, store))
    }
}

/// Window function descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowFuncDesc {
    pub name: String,
    #[serde(default)]
    pub args: Vec<Expr>,
    #[serde(default)]
    pub pushdown: Pushdown,
}

impl WindowFuncDesc {
    pub fn can_push_to_tiflash(&self, ctx: &PushDownCtx<'_>) -> bool {
        self.pushdown.tiflash && self.args.iter().all(|a| a.can_push_to(ctx, StoreType::TiFlash))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameKind {
    Rows,
    Ranges,
}

/// One end of a window frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameBound {
    #[serde(default)]
    pub unbounded: bool,
    #[serde(default)]
    pub num: u64,
    /// Expressions computing the range boundary (RANGE frames only).
    #[serde(default)]
    pub calc_funcs: Vec<Expr>,
    /// Type the boundary is compared as; `None` when no comparison is involved.
    #[serde(default)]
    pub cmp_type: Option<FieldType>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowFrame {
    pub kind: FrameKind,
    pub start: FrameBound,
    pub end: FrameBound,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> (ColumnTable, ColumnId, ColumnId) {
        let mut t = ColumnTable::new();
        let a = t.add(Some("t"), "a", FieldType::Int);
        let v = t.add(Some("t"), "v", FieldType::Vector);
        (t, a, v)
    }

    #[test]
    fn test_columns_dedup_in_order() {
        let (_, a, v) = table();
        let e = Expr::binary(
            BinaryOp::And,
            Expr::eq(Expr::col(a), Expr::int(1)),
            Expr::eq(Expr::col(v), Expr::col(a)),
        );
        assert_eq!(e.columns(), vec![a, v]);
        assert_eq!(e.conjuncts().len(), 2);
    }

    #[test]
    fn test_push_down_respects_block_list_and_types() {
        let (t, a, v) = table();
        let blocked = vec!["abs".to_string()];
        let ctx = PushDownCtx {
            columns: &t,
            blocked: &blocked,
        };
        let f = Expr::func("abs", vec![Expr::col(a)]);
        assert!(f.can_push_to(&ctx, StoreType::TiKv));
        assert!(!f.can_push_to(&ctx, StoreType::TiFlash));
        assert!(!Expr::col(v).can_push_to(&ctx, StoreType::TiKv));
        assert!(Expr::col(v).can_push_to(&ctx, StoreType::TiFlash));
    }

    #[test]
    fn test_vector_search_recognition() {
        let (t, a, v) = table();
        let q = Expr::Literal(ScalarValue::Vector(vec![OrderedFloat(1.0)]));
        let e = Expr::func("VEC_L2_DISTANCE", vec![Expr::col(v), q.clone()]);
        let info = e.as_vector_search(&t).expect("vector search");
        assert_eq!(info.column, v);
        assert_eq!(info.metric, DistanceMetric::L2);
        let not_vec = Expr::func("vec_l2_distance", vec![Expr::col(a), q]);
        assert!(not_vec.as_vector_search(&t).is_none());
    }

    #[test]
    fn test_sort_items_from_by_items() {
        let (_, a, _) = table();
        let items = vec![ByItem::col(a, true)];
        assert_eq!(sort_items_from_by_items(&items), Some(vec![SortItem::desc(a)]));
        let expr_items = vec![ByItem {
            expr: Expr::func("abs", vec![Expr::col(a)]),
            desc: false,
        }];
        assert!(sort_items_from_by_items(&expr_items).is_none());
    }
}
