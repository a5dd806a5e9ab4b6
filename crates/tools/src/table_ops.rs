//! Table operations and their dual evaluation engines.
//!
//! Every operation the tabular tool executes runs through **two**
//! independent engines — one scans rows with streaming accumulators, the
//! other projects the column and folds over the vector — and the results
//! must agree before anything is surfaced. Disagreement is a
//! [`ToolError::Inconsistent`], which the tool's retry shell turns into an
//! explicit uncertainty message if it persists.

use std::collections::{BTreeMap, BTreeSet};

use docpilot_core::document::{CellValue, TabularDataset};
use docpilot_core::error::ToolError;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Colors assigned to plot series, in order. Each series in one plot gets
/// its own entry; requests with more series than the palette are refused.
pub const SERIES_PALETTE: &[&str] = &[
    "blue", "red", "green", "orange", "purple", "brown", "pink", "gray",
];

/// Aggregation functions over a numeric column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFn {
    Count,
    Sum,
    Mean,
    Min,
    Max,
}

/// Row-filter comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
}

/// A single row-filter condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterCond {
    pub column: String,
    pub op: FilterOp,
    pub value: CellValue,
}

/// An executable table operation, as requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TableOp {
    /// Schema and row count.
    Describe,
    /// Aggregate one column, optionally filtered.
    Aggregate {
        column: String,
        agg: AggregateFn,
        #[serde(default)]
        filters: Vec<FilterCond>,
    },
    /// Aggregate one column within each group of another.
    GroupAggregate {
        group_by: String,
        column: String,
        agg: AggregateFn,
    },
    /// Produce a plot specification for one or more numeric series.
    Plot { series: Vec<String> },
}

impl TableOp {
    /// Columns this operation reads, for the explanation section.
    pub fn columns_used(&self) -> Vec<String> {
        match self {
            TableOp::Describe => vec![],
            TableOp::Aggregate {
                column, filters, ..
            } => {
                let mut cols = vec![column.clone()];
                cols.extend(filters.iter().map(|f| f.column.clone()));
                cols
            }
            TableOp::GroupAggregate {
                group_by, column, ..
            } => vec![group_by.clone(), column.clone()],
            TableOp::Plot { series } => series.clone(),
        }
    }
}

/// The result of executing a [`TableOp`].
#[derive(Debug, Clone, PartialEq)]
pub enum OpOutcome {
    Scalar(f64),
    Groups(Vec<(String, f64)>),
    Description(String),
    Plot(PlotSpec),
}

/// A textual plot specification with per-series styling.
#[derive(Debug, Clone, PartialEq)]
pub struct PlotSpec {
    pub series: Vec<SeriesStyle>,
}

/// One plotted series and its assigned color.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesStyle {
    pub column: String,
    pub color: String,
}

const SCALAR_TOLERANCE: f64 = 1e-9;

fn scalars_agree(a: f64, b: f64) -> bool {
    (a - b).abs() <= SCALAR_TOLERANCE * a.abs().max(b.abs()).max(1.0)
}

impl OpOutcome {
    /// Whether two outcomes agree, allowing float rounding noise.
    pub fn agrees_with(&self, other: &OpOutcome) -> bool {
        match (self, other) {
            (OpOutcome::Scalar(a), OpOutcome::Scalar(b)) => scalars_agree(*a, *b),
            (OpOutcome::Groups(a), OpOutcome::Groups(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|((ka, va), (kb, vb))| ka == kb && scalars_agree(*va, *vb))
            }
            (OpOutcome::Description(a), OpOutcome::Description(b)) => a == b,
            (OpOutcome::Plot(a), OpOutcome::Plot(b)) => a == b,
            _ => false,
        }
    }

    /// Render the outcome as observation text for the model.
    pub fn render(&self) -> String {
        match self {
            OpOutcome::Scalar(v) => format!("{v}"),
            OpOutcome::Groups(groups) => groups
                .iter()
                .map(|(k, v)| format!("{k}: {v}"))
                .collect::<Vec<_>>()
                .join("; "),
            OpOutcome::Description(text) => text.clone(),
            OpOutcome::Plot(spec) => {
                let series = spec
                    .series
                    .iter()
                    .map(|s| format!("'{}' drawn in {}", s.column, s.color))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("Plot specification: {series}, over the row index.")
            }
        }
    }
}

/// One independent execution engine for table operations.
pub trait TableEvaluator: Send + Sync {
    fn name(&self) -> &str;
    fn evaluate(&self, op: &TableOp, table: &TabularDataset) -> Result<OpOutcome, ToolError>;
}

/// Execute `op` on both engines and return the agreed outcome.
///
/// Column and input errors are returned as-is (both engines would fail the
/// same way); a genuine numeric disagreement becomes
/// [`ToolError::Inconsistent`].
pub fn cross_validate(
    op: &TableOp,
    table: &TabularDataset,
    eval_a: &dyn TableEvaluator,
    eval_b: &dyn TableEvaluator,
) -> Result<OpOutcome, ToolError> {
    let a = eval_a.evaluate(op, table)?;
    let b = eval_b.evaluate(op, table)?;

    if !a.agrees_with(&b) {
        return Err(ToolError::Inconsistent {
            method_a: eval_a.name().to_string(),
            value_a: a.render(),
            method_b: eval_b.name().to_string(),
            value_b: b.render(),
        });
    }

    debug!(op = ?op, outcome = %a.render(), "cross-validated table op");
    Ok(a)
}

// ── Shared filter logic ───────────────────────────────────────────────────

fn column_index(table: &TabularDataset, name: &str) -> Result<usize, ToolError> {
    table
        .column_index(name)
        .ok_or_else(|| ToolError::UnknownColumn(name.to_string()))
}

fn cell_matches(cell: &CellValue, op: FilterOp, value: &CellValue) -> bool {
    match op {
        FilterOp::Eq => cells_equal(cell, value),
        FilterOp::Ne => !cells_equal(cell, value),
        FilterOp::Lt | FilterOp::Le | FilterOp::Gt | FilterOp::Ge => {
            match (cell.as_f64(), value.as_f64()) {
                (Some(a), Some(b)) => match op {
                    FilterOp::Lt => a < b,
                    FilterOp::Le => a <= b,
                    FilterOp::Gt => a > b,
                    FilterOp::Ge => a >= b,
                    _ => false,
                },
                _ => false,
            }
        }
        FilterOp::Contains => cell.render().contains(&value.render()),
    }
}

fn cells_equal(a: &CellValue, b: &CellValue) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a.render() == b.render(),
    }
}

fn row_passes(row: &[CellValue], filters: &[(usize, FilterOp, CellValue)]) -> bool {
    filters
        .iter()
        .all(|(idx, op, value)| cell_matches(&row[*idx], *op, value))
}

fn resolve_filters(
    table: &TabularDataset,
    filters: &[FilterCond],
) -> Result<Vec<(usize, FilterOp, CellValue)>, ToolError> {
    filters
        .iter()
        .map(|f| Ok((column_index(table, &f.column)?, f.op, f.value.clone())))
        .collect()
}

fn describe(table: &TabularDataset) -> String {
    format!(
        "Table '{}' has {} rows and {} columns: {}.",
        table.name,
        table.rows.len(),
        table.columns.len(),
        table.schema_summary()
    )
}

fn plot_spec(table: &TabularDataset, series: &[String]) -> Result<PlotSpec, ToolError> {
    if series.is_empty() {
        return Err(ToolError::InvalidInput("a plot needs at least one series".into()));
    }
    if series.len() > SERIES_PALETTE.len() {
        return Err(ToolError::InvalidInput(format!(
            "cannot plot more than {} series with distinct colors",
            SERIES_PALETTE.len()
        )));
    }
    for column in series {
        column_index(table, column)?;
    }
    Ok(PlotSpec {
        series: series
            .iter()
            .zip(SERIES_PALETTE.iter())
            .map(|(column, color)| SeriesStyle {
                column: column.clone(),
                color: (*color).to_string(),
            })
            .collect(),
    })
}

// ── Engine 1: streaming row scan ──────────────────────────────────────────

/// Scans rows once, folding values into streaming accumulators.
pub struct RowScanEvaluator;

#[derive(Default)]
struct ScanAccum {
    non_null: usize,
    numeric: usize,
    sum: f64,
    min: f64,
    max: f64,
}

impl ScanAccum {
    fn push(&mut self, cell: &CellValue) {
        if !matches!(cell, CellValue::Null) {
            self.non_null += 1;
        }
        if let Some(v) = cell.as_f64() {
            if self.numeric == 0 {
                self.min = v;
                self.max = v;
            } else {
                self.min = self.min.min(v);
                self.max = self.max.max(v);
            }
            self.numeric += 1;
            self.sum += v;
        }
    }

    fn finish(&self, agg: AggregateFn) -> Result<f64, ToolError> {
        if agg == AggregateFn::Count {
            return Ok(self.non_null as f64);
        }
        if self.numeric == 0 {
            return Err(ToolError::InvalidInput(
                "no numeric values matched the query".into(),
            ));
        }
        Ok(match agg {
            AggregateFn::Count => unreachable!(),
            AggregateFn::Sum => self.sum,
            AggregateFn::Mean => self.sum / self.numeric as f64,
            AggregateFn::Min => self.min,
            AggregateFn::Max => self.max,
        })
    }
}

impl TableEvaluator for RowScanEvaluator {
    fn name(&self) -> &str {
        "row-scan"
    }

    fn evaluate(&self, op: &TableOp, table: &TabularDataset) -> Result<OpOutcome, ToolError> {
        match op {
            TableOp::Describe => Ok(OpOutcome::Description(describe(table))),
            TableOp::Aggregate {
                column,
                agg,
                filters,
            } => {
                let idx = column_index(table, column)?;
                let resolved = resolve_filters(table, filters)?;
                let mut accum = ScanAccum::default();
                for row in &table.rows {
                    if row_passes(row, &resolved) {
                        accum.push(&row[idx]);
                    }
                }
                Ok(OpOutcome::Scalar(accum.finish(*agg)?))
            }
            TableOp::GroupAggregate {
                group_by,
                column,
                agg,
            } => {
                let key_idx = column_index(table, group_by)?;
                let val_idx = column_index(table, column)?;
                let mut groups: BTreeMap<String, ScanAccum> = BTreeMap::new();
                for row in &table.rows {
                    groups
                        .entry(row[key_idx].render())
                        .or_default()
                        .push(&row[val_idx]);
                }
                let mut out = Vec::with_capacity(groups.len());
                for (key, accum) in groups {
                    out.push((key, accum.finish(*agg)?));
                }
                Ok(OpOutcome::Groups(out))
            }
            TableOp::Plot { series } => Ok(OpOutcome::Plot(plot_spec(table, series)?)),
        }
    }
}

// ── Engine 2: columnar projection ─────────────────────────────────────────

/// Projects the target column into a vector, then folds over it.
pub struct ColumnarEvaluator;

impl ColumnarEvaluator {
    fn project(
        table: &TabularDataset,
        column_idx: usize,
        mask: &[bool],
    ) -> (Vec<f64>, usize) {
        let mut values = Vec::new();
        let mut non_null = 0usize;
        for (row, keep) in table.rows.iter().zip(mask.iter()) {
            if !keep {
                continue;
            }
            let cell = &row[column_idx];
            if !matches!(cell, CellValue::Null) {
                non_null += 1;
            }
            if let Some(v) = cell.as_f64() {
                values.push(v);
            }
        }
        (values, non_null)
    }

    fn fold(values: &[f64], non_null: usize, agg: AggregateFn) -> Result<f64, ToolError> {
        if agg == AggregateFn::Count {
            return Ok(non_null as f64);
        }
        if values.is_empty() {
            return Err(ToolError::InvalidInput(
                "no numeric values matched the query".into(),
            ));
        }
        Ok(match agg {
            AggregateFn::Count => unreachable!(),
            AggregateFn::Sum => values.iter().sum(),
            AggregateFn::Mean => values.iter().sum::<f64>() / values.len() as f64,
            AggregateFn::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            AggregateFn::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        })
    }

    fn mask(
        table: &TabularDataset,
        filters: &[(usize, FilterOp, CellValue)],
    ) -> Vec<bool> {
        table
            .rows
            .iter()
            .map(|row| row_passes(row, filters))
            .collect()
    }
}

impl TableEvaluator for ColumnarEvaluator {
    fn name(&self) -> &str {
        "columnar"
    }

    fn evaluate(&self, op: &TableOp, table: &TabularDataset) -> Result<OpOutcome, ToolError> {
        match op {
            TableOp::Describe => Ok(OpOutcome::Description(describe(table))),
            TableOp::Aggregate {
                column,
                agg,
                filters,
            } => {
                let idx = column_index(table, column)?;
                let resolved = resolve_filters(table, filters)?;
                let mask = Self::mask(table, &resolved);
                let (values, non_null) = Self::project(table, idx, &mask);
                Ok(OpOutcome::Scalar(Self::fold(&values, non_null, *agg)?))
            }
            TableOp::GroupAggregate {
                group_by,
                column,
                agg,
            } => {
                let key_idx = column_index(table, group_by)?;
                let val_idx = column_index(table, column)?;

                let keys: BTreeSet<String> =
                    table.rows.iter().map(|row| row[key_idx].render()).collect();

                let mut out = Vec::with_capacity(keys.len());
                for key in keys {
                    let mask: Vec<bool> = table
                        .rows
                        .iter()
                        .map(|row| row[key_idx].render() == key)
                        .collect();
                    let (values, non_null) = Self::project(table, val_idx, &mask);
                    out.push((key, Self::fold(&values, non_null, *agg)?));
                }
                Ok(OpOutcome::Groups(out))
            }
            TableOp::Plot { series } => Ok(OpOutcome::Plot(plot_spec(table, series)?)),
        }
    }
}
