//! # Access Paths
//!
//! An [`AccessPath`] describes one way of reading a data source: a full table
//! (or handle range) scan, a secondary index, or a multi-valued index, on either
//! the row store or the columnar store. Paths are produced by the statistics
//! collaborator together with their filter split and row-count bounds and are
//! read-only for the enumerator.
//!
//! The index-join family additionally needs to describe ranges whose values are
//! only known at execution time (they are funded by outer rows). Those are
//! modelled by [`IndexJoinRange`] and [`CompareFilters`].

use crate::expr::{BinaryOp, ColumnId, Expr, ScalarValue, StoreType};
use serde::{Deserialize, Serialize};

/// A secondary (or MV) index definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<ColumnId>,
    /// Prefix length per column; `None` indexes the full value.
    #[serde(default)]
    pub prefix_lens: Vec<Option<u32>>,
    #[serde(default)]
    pub unique: bool,
    /// Multi-valued index over a JSON array.
    #[serde(default)]
    pub is_mv: bool,
}

impl IndexInfo {
    pub fn new(name: &str, columns: Vec<ColumnId>) -> Self {
        Self {
            name: name.to_string(),
            columns,
            prefix_lens: Vec::new(),
            unique: false,
            is_mv: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Column length used by the index (`None` = full length).
    pub fn col_len(&self, offset: usize) -> Option<u32> {
        self.prefix_lens.get(offset).copied().flatten()
    }

    pub fn has_prefix_col(&self) -> bool {
        self.prefix_lens.iter().any(Option::is_some)
    }
}

/// How rows of a table are identified.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandleKind {
    /// Integer primary key used as the row handle.
    IntHandle(ColumnId),
    /// Clustered composite primary key.
    CommonHandle(Vec<ColumnId>),
    /// Hidden row id.
    RowId,
}

/// One candidate way to read a data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessPath {
    /// `None` for a table path.
    #[serde(default)]
    pub index: Option<IndexInfo>,
    pub store: StoreType,
    /// Conditions turned into scan ranges.
    #[serde(default)]
    pub access_conds: Vec<Expr>,
    /// Conditions evaluated on index rows.
    #[serde(default)]
    pub index_filters: Vec<Expr>,
    /// Conditions evaluated on table rows.
    #[serde(default)]
    pub table_filters: Vec<Expr>,
    pub count_after_access: f64,
    #[serde(default)]
    pub count_after_index: f64,
    /// The index covers every needed column, so no table lookup is required.
    #[serde(default)]
    pub is_single_scan: bool,
}

impl AccessPath {
    pub fn table(store: StoreType, rows: f64) -> Self {
        Self {
            index: None,
            store,
            access_conds: Vec::new(),
            index_filters: Vec::new(),
            table_filters: Vec::new(),
            count_after_access: rows,
            count_after_index: rows,
            is_single_scan: true,
        }
    }

    pub fn index(index: IndexInfo, rows: f64) -> Self {
        Self {
            index: Some(index),
            store: StoreType::TiKv,
            access_conds: Vec::new(),
            index_filters: Vec::new(),
            table_filters: Vec::new(),
            count_after_access: rows,
            count_after_index: rows,
            is_single_scan: false,
        }
    }

    pub fn is_table_path(&self) -> bool {
        self.index.is_none()
    }

    pub fn is_mv_index(&self) -> bool {
        self.index.as_ref().is_some_and(|i| i.is_mv)
    }

    pub fn is_tiflash(&self) -> bool {
        self.store == StoreType::TiFlash
    }

    pub fn index_cols(&self) -> &[ColumnId] {
        self.index.as_ref().map(|i| i.columns.as_slice()).unwrap_or(&[])
    }

    pub fn name(&self) -> &str {
        self.index.as_ref().map(|i| i.name.as_str()).unwrap_or("primary")
    }

    /// Order delivered when the path is scanned in key order.
    pub fn delivered_order(&self, handle: &HandleKind) -> Vec<ColumnId> {
        match (&self.index, handle) {
            (Some(idx), _) => idx.columns.clone(),
            (None, HandleKind::IntHandle(c)) => vec![*c],
            (None, HandleKind::CommonHandle(cols)) => cols.clone(),
            (None, HandleKind::RowId) => Vec::new(),
        }
    }
}

/// One position in a runtime index-join range.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RangePoint {
    /// Value supplied by the outer row's join key at this key offset.
    OuterKey(usize),
    /// Constant point from an access condition of the inner side.
    Const(ScalarValue),
}

/// A range template over the leading index columns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexJoinRange {
    pub points: Vec<RangePoint>,
}

/// Residual comparisons between one inner index column and outer columns that
/// narrow the range after the equality prefix (`inner.b > outer.c`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompareFilters {
    pub target_col: ColumnId,
    pub conds: Vec<(BinaryOp, ColumnId)>,
    /// The original conditions, kept for display and cost.
    pub exprs: Vec<Expr>,
}
