//! Deterministic aggregation over the table.
//!
//! Numeric aggregation never depends on a generated script or on a model
//! doing arithmetic: when the classifier detects an aggregation-shaped
//! query, the grouping runs here, over the real data, and the *result* is
//! what any later prompt sees. Cells that fail lenient numeric parsing are
//! skipped, never fatal; unresolvable columns decline the whole spec so
//! the caller can fall back to the generic path.

use sheetsense_engine::sandbox::{CellValue, DataTable};

use super::classify::{AggregateOp, AggregationSpec};
use crate::config::AnalysisConfig;

/// A computed grouping, in deterministic order.
#[derive(Clone, Debug, PartialEq)]
pub struct AggregationTable {
    pub group_header: String,
    pub value_header: String,
    /// `(group key, value)` pairs. First-appearance order for sum/count/
    /// mean; descending by value for top-k, ties in first-appearance order.
    pub groups: Vec<(String, f64)>,
}

/// Resolve a drafted column name against the real columns: exact
/// (case-insensitive), then substring, then edit distance.
fn resolve_column(name: &str, table: &DataTable, max_distance: usize) -> Option<usize> {
    if name.trim().is_empty() {
        return None;
    }
    if let Some(i) = table.column_index(name) {
        return Some(i);
    }
    let lower = name.to_lowercase();
    if let Some(i) = table
        .columns
        .iter()
        .position(|c| c.to_lowercase().contains(&lower) || lower.contains(&c.to_lowercase()))
    {
        return Some(i);
    }
    table
        .columns
        .iter()
        .position(|c| super::classify::edit_distance(&c.to_lowercase(), &lower) <= max_distance)
}

fn group_key(cell: Option<&CellValue>) -> String {
    match cell {
        Some(c) if !c.is_empty() => c.display(),
        _ => "(empty)".to_string(),
    }
}

/// Compute the aggregation, or `None` when the spec's columns do not
/// resolve - the signal to fall back to generic analysis.
pub fn compute(
    table: &DataTable,
    spec: &AggregationSpec,
    config: &AnalysisConfig,
) -> Option<AggregationTable> {
    let group_col = resolve_column(&spec.group_column, table, config.fuzzy_distance)?;
    let value_col = resolve_column(&spec.value_column, table, config.fuzzy_distance);
    if value_col.is_none() && spec.operation != AggregateOp::Count {
        return None;
    }

    // (key, sum, count) accumulated in first-appearance order.
    let mut acc: Vec<(String, f64, usize)> = Vec::new();
    for row in &table.rows {
        let key = group_key(row.get(group_col));
        let value = match value_col {
            Some(v) => row.get(v).and_then(|c| c.as_number()),
            None => None,
        };

        let counted = match spec.operation {
            // Count rows; a resolved value column restricts the count to
            // rows where it is non-empty.
            AggregateOp::Count => match value_col {
                Some(v) => row.get(v).map(|c| !c.is_empty()).unwrap_or(false),
                None => true,
            },
            _ => value.is_some(),
        };
        if !counted {
            continue;
        }
        let n = value.unwrap_or(0.0);

        match acc.iter_mut().find(|(k, _, _)| *k == key) {
            Some((_, sum, count)) => {
                *sum += n;
                *count += 1;
            }
            None => acc.push((key, n, 1)),
        }
    }

    let mut groups: Vec<(String, f64)> = acc
        .into_iter()
        .map(|(key, sum, count)| {
            let value = match spec.operation {
                AggregateOp::Sum | AggregateOp::TopK => sum,
                AggregateOp::Count => count as f64,
                AggregateOp::Mean => sum / count as f64,
            };
            (key, value)
        })
        .collect();

    if spec.operation == AggregateOp::TopK {
        // Stable sort keeps first-appearance order on ties.
        groups.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        groups.truncate(spec.k.unwrap_or(config.default_top_k));
    }

    let value_header = match spec.operation {
        AggregateOp::Count => "count".to_string(),
        AggregateOp::Mean => format!("mean({})", spec.value_column),
        _ => format!("sum({})", spec.value_column),
    };

    Some(AggregationTable {
        group_header: table.columns[group_col].clone(),
        value_header,
        groups,
    })
}
