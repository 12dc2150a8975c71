//! # Statistics Oracle
//!
//! Cardinality estimation is an external collaborator of the enumerator. Each
//! logical node arrives with a [`StatsInfo`] already derived (row count, column
//! NDVs, and optionally per-column byte sizes), and the engine only asks a few
//! questions on top of it through the [`StatsOracle`] trait:
//!
//! - **Average row size** of a set of columns, used to turn row counts into bytes
//!   when comparing broadcast and shuffle exchanges. Only available when the node
//!   has size statistics (`StatsInfo::size`); the MPP enumerator falls back to pure
//!   row-count comparisons otherwise.
//! - **Column group NDV**, used for the Apply cache hit ratio.
//! - **Selectivity** of a filter list, used by predicate push-down to rescale the
//!   data source estimate.
//!
//! ## Scaling by Expected Count
//!
//! When a parent only needs `k` rows (LIMIT, TOP-N, index-join outer side), every
//! candidate's stats are scaled by `k / row_count`. NDVs are capped by the scaled
//! row count; an NDV can never exceed the number of rows.

use crate::expr::{BinaryOp, ColumnId, Expr};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-column byte sizes, present only when the table has been analyzed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SizeStats {
    pub avg_col_size: BTreeMap<ColumnId, f64>,
}

/// Estimated statistics of one logical node's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsInfo {
    pub row_count: f64,
    #[serde(default)]
    pub col_ndvs: BTreeMap<ColumnId, f64>,
    #[serde(default)]
    pub size: Option<SizeStats>,
}

impl Default for StatsInfo {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl StatsInfo {
    pub fn new(row_count: f64) -> Self {
        Self {
            row_count,
            col_ndvs: BTreeMap::new(),
            size: None,
        }
    }

    pub fn with_ndv(mut self, col: ColumnId, ndv: f64) -> Self {
        self.col_ndvs.insert(col, ndv);
        self
    }

    pub fn with_col_size(mut self, col: ColumnId, bytes: f64) -> Self {
        self.size
            .get_or_insert_with(SizeStats::default)
            .avg_col_size
            .insert(col, bytes);
        self
    }

    /// Row count rounded the way the reference engine reports integral counts.
    pub fn count(&self) -> i64 {
        (self.row_count + 0.5) as i64
    }

    pub fn ndv(&self, col: ColumnId) -> f64 {
        self.col_ndvs.get(&col).copied().unwrap_or(self.row_count)
    }

    /// Scale row count by `factor`, capping NDVs by the new row count.
    pub fn scale(&self, factor: f64) -> StatsInfo {
        let row_count = self.row_count * factor;
        StatsInfo {
            row_count,
            col_ndvs: self
                .col_ndvs
                .iter()
                .map(|(c, ndv)| (*c, (ndv * factor).min(row_count)))
                .collect(),
            size: self.size.clone(),
        }
    }

    /// Scale down so that the node produces at most `expected` rows.
    pub fn scale_by_expect_cnt(&self, expected: f64) -> StatsInfo {
        if expected < self.row_count && self.row_count > 0.0 {
            self.scale(expected / self.row_count)
        } else {
            self.clone()
        }
    }
}

/// Row count after a LIMIT: `min(limit, child rows)`, NDVs capped accordingly.
pub fn derive_limit_stats(child: &StatsInfo, limit: f64) -> StatsInfo {
    let row_count = limit.min(child.row_count);
    StatsInfo {
        row_count,
        col_ndvs: child
            .col_ndvs
            .iter()
            .map(|(c, ndv)| (*c, ndv.min(row_count)))
            .collect(),
        size: child.size.clone(),
    }
}

/// Row count after applying a filter of the given selectivity, floored at one row.
pub fn derive_filter_stats(input: &StatsInfo, selectivity: f64) -> StatsInfo {
    let row_count = (input.row_count * selectivity).max(1.0);
    let ratio = if input.row_count > 0.0 {
        row_count / input.row_count
    } else {
        1.0
    };
    StatsInfo {
        row_count,
        col_ndvs: input
            .col_ndvs
            .iter()
            .map(|(c, ndv)| (*c, (ndv * ratio).max(1.0).min(row_count)))
            .collect(),
        size: input.size.clone(),
    }
}

/// Default selectivity for predicates the oracle cannot reason about.
pub const DEFAULT_FILTER_SELECTIVITY: f64 = 0.8;

/// Bytes assumed for a column without size statistics.
pub const DEFAULT_COL_SIZE: f64 = 8.0;

/// Read-only estimation services consumed by the enumerator.
pub trait StatsOracle: Send + Sync {
    /// Average bytes per row over `cols`; `None` when no size statistics exist.
    fn avg_row_size(&self, stats: &StatsInfo, cols: &[ColumnId]) -> Option<f64>;

    /// Estimated number of distinct value combinations of `cols`.
    fn cols_ndv(&self, stats: &StatsInfo, cols: &[ColumnId]) -> f64;

    /// Fraction of rows passing all of `conds`.
    fn selectivity(&self, stats: &StatsInfo, conds: &[Expr]) -> f64;
}

/// Oracle using the independence assumption and per-column statistics only.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultStatsOracle;

impl StatsOracle for DefaultStatsOracle {
    fn avg_row_size(&self, stats: &StatsInfo, cols: &[ColumnId]) -> Option<f64> {
        let size = stats.size.as_ref()?;
        Some(
            cols.iter()
                .map(|c| size.avg_col_size.get(c).copied().unwrap_or(DEFAULT_COL_SIZE))
                .sum(),
        )
    }

    fn cols_ndv(&self, stats: &StatsInfo, cols: &[ColumnId]) -> f64 {
        if cols.is_empty() {
            return 1.0;
        }
        // Largest single-column NDV is a lower bound for the group NDV.
        cols.iter()
            .map(|c| stats.ndv(*c))
            .fold(1.0_f64, f64::max)
            .min(stats.row_count.max(1.0))
    }

    fn selectivity(&self, stats: &StatsInfo, conds: &[Expr]) -> f64 {
        conds.iter().map(|c| cond_selectivity(stats, c)).product()
    }
}

fn cond_selectivity(stats: &StatsInfo, cond: &Expr) -> f64 {
    match cond {
        Expr::Binary {
            op: BinaryOp::Eq | BinaryOp::NullEq,
            left,
            right,
        } => match (left.as_column(), right.as_column()) {
            (Some(c), None) | (None, Some(c)) => 1.0 / stats.ndv(c).max(1.0),
            _ => DEFAULT_FILTER_SELECTIVITY,
        },
        Expr::Binary {
            op: BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq,
            ..
        } => 1.0 / 3.0,
        Expr::Binary {
            op: BinaryOp::And,
            left,
            right,
        } => cond_selectivity(stats, left) * cond_selectivity(stats, right),
        Expr::In { expr, list, negated: false } => match expr.as_column() {
            Some(c) => (list.len() as f64 / stats.ndv(c).max(1.0)).min(1.0),
            None => DEFAULT_FILTER_SELECTIVITY,
        },
        _ => DEFAULT_FILTER_SELECTIVITY,
    }
}
