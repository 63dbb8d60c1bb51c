//! Whitelisted data-transformation builtins for the script sandbox.
//!
//! Conventions:
//! - Script-facing builtin names are ALL CAPS (e.g. `GROUP_SUM`, `TOP_K`).
//! - The namespace exposes these builtins plus read-only table views and
//!   nothing else: no filesystem, network, process, or import capability.
//! - If you add a new builtin, update `TRANSFORM_BUILTINS` and register its
//!   implementation in `register_builtins`.

use crate::sandbox::table::{CellValue, DataTable, parse_number};
use rhai::{Array, Dynamic, Engine, EvalAltResult, FnPtr, Map, NativeCallContext, Position};
use std::sync::Arc;

pub struct TransformBuiltin {
    pub name: &'static str,
    pub signature: &'static str,
    pub description: &'static str,
}

/// Registry of every builtin reachable from a generated script.
/// Also consumed by prompt assembly so the generator is told exactly what
/// it may call.
pub const TRANSFORM_BUILTINS: &[TransformBuiltin] = &[
    TransformBuiltin {
        name: "NROWS",
        signature: "NROWS()",
        description: "Number of data rows (header excluded)",
    },
    TransformBuiltin {
        name: "NCOLS",
        signature: "NCOLS()",
        description: "Number of columns",
    },
    TransformBuiltin {
        name: "HEADERS",
        signature: "HEADERS()",
        description: "Column names as an array of strings",
    },
    TransformBuiltin {
        name: "CELL",
        signature: "CELL(row, col)",
        description: "Cell value at 0-based row/col (text, number, or ())",
    },
    TransformBuiltin {
        name: "ROW",
        signature: "ROW(row)",
        description: "A single row as an array of cell values",
    },
    TransformBuiltin {
        name: "ROWS",
        signature: "ROWS()",
        description: "All rows as an array of arrays",
    },
    TransformBuiltin {
        name: "COLUMN",
        signature: "COLUMN(name)",
        description: "0-based index of the named column, -1 if absent",
    },
    TransformBuiltin {
        name: "NUM",
        signature: "NUM(value)",
        description: "Lenient numeric coercion ('12,6' -> 12.6); NaN on failure",
    },
    TransformBuiltin {
        name: "FILTER",
        signature: "FILTER(|row| predicate)",
        description: "Rows for which the predicate returns true",
    },
    TransformBuiltin {
        name: "MATCH_ROWS",
        signature: "MATCH_ROWS(col, needle)",
        description: "0-based indices of rows whose cell contains needle (case-insensitive; col -1 searches all columns)",
    },
    TransformBuiltin {
        name: "GROUP_SUM",
        signature: "GROUP_SUM(group_col, value_col)",
        description: "Map of group key -> sum of numeric values",
    },
    TransformBuiltin {
        name: "GROUP_COUNT",
        signature: "GROUP_COUNT(group_col)",
        description: "Map of group key -> row count",
    },
    TransformBuiltin {
        name: "GROUP_MEAN",
        signature: "GROUP_MEAN(group_col, value_col)",
        description: "Map of group key -> mean of numeric values",
    },
    TransformBuiltin {
        name: "TOP_K",
        signature: "TOP_K(map, k)",
        description: "Top k [key, value] pairs ordered by value descending",
    },
    TransformBuiltin {
        name: "SORT_BY",
        signature: "SORT_BY(rows, col, descending)",
        description: "Rows sorted by the given column (numeric-aware)",
    },
    TransformBuiltin {
        name: "SUM_COL",
        signature: "SUM_COL(col)",
        description: "Sum of numeric values in a column",
    },
    TransformBuiltin {
        name: "MEAN_COL",
        signature: "MEAN_COL(col)",
        description: "Mean of numeric values in a column",
    },
    TransformBuiltin {
        name: "COUNT_COL",
        signature: "COUNT_COL(col)",
        description: "Count of non-empty cells in a column",
    },
    TransformBuiltin {
        name: "MIN_COL",
        signature: "MIN_COL(col)",
        description: "Minimum numeric value in a column",
    },
    TransformBuiltin {
        name: "MAX_COL",
        signature: "MAX_COL(col)",
        description: "Maximum numeric value in a column",
    },
];

fn invalid_arg(message: &str) -> Box<EvalAltResult> {
    EvalAltResult::ErrorRuntime(message.into(), Position::NONE).into()
}

pub(crate) fn cell_to_dynamic(cell: &CellValue) -> Dynamic {
    match cell {
        CellValue::Empty => Dynamic::UNIT,
        CellValue::Number(n) => Dynamic::from(*n),
        CellValue::Text(s) => Dynamic::from(s.clone()),
    }
}

fn row_to_array(row: &[CellValue]) -> Array {
    row.iter().map(cell_to_dynamic).collect()
}

fn dynamic_to_number(value: &Dynamic) -> f64 {
    if let Ok(n) = value.as_float() {
        return n;
    }
    if let Ok(n) = value.as_int() {
        return n as f64;
    }
    if let Ok(s) = value.clone().into_string() {
        return parse_number(&s).unwrap_or(f64::NAN);
    }
    f64::NAN
}

fn check_col(table: &DataTable, col: i64) -> Result<usize, Box<EvalAltResult>> {
    let idx = usize::try_from(col).map_err(|_| invalid_arg("column index must be >= 0"))?;
    if idx >= table.columns.len() {
        return Err(invalid_arg(&format!(
            "column index {} out of range (table has {} columns)",
            idx,
            table.columns.len()
        )));
    }
    Ok(idx)
}

fn group_key(cell: Option<&CellValue>) -> String {
    match cell {
        Some(c) if !c.is_empty() => c.display(),
        _ => "(empty)".to_string(),
    }
}

fn numeric_cells(table: &DataTable, col: usize) -> Vec<f64> {
    table
        .rows
        .iter()
        .filter_map(|row| row.get(col).and_then(|c| c.as_number()))
        .collect()
}

/// Register all whitelisted builtins into the sandbox engine.
pub fn register_builtins(engine: &mut Engine, table: Arc<DataTable>) {
    let t = table.clone();
    engine.register_fn("NROWS", move || -> i64 { t.rows.len() as i64 });

    let t = table.clone();
    engine.register_fn("NCOLS", move || -> i64 { t.columns.len() as i64 });

    let t = table.clone();
    engine.register_fn("HEADERS", move || -> Array {
        t.columns.iter().map(|c| Dynamic::from(c.clone())).collect()
    });

    let t = table.clone();
    engine.register_fn("CELL", move |row: i64, col: i64| -> Dynamic {
        let (Ok(r), Ok(c)) = (usize::try_from(row), usize::try_from(col)) else {
            return Dynamic::UNIT;
        };
        t.rows
            .get(r)
            .and_then(|cells| cells.get(c))
            .map(cell_to_dynamic)
            .unwrap_or(Dynamic::UNIT)
    });

    let t = table.clone();
    engine.register_fn("ROW", move |row: i64| -> Array {
        usize::try_from(row)
            .ok()
            .and_then(|r| t.rows.get(r))
            .map(|cells| row_to_array(cells))
            .unwrap_or_default()
    });

    let t = table.clone();
    engine.register_fn("ROWS", move || -> Array {
        t.rows
            .iter()
            .map(|row| Dynamic::from(row_to_array(row)))
            .collect()
    });

    let t = table.clone();
    engine.register_fn("COLUMN", move |name: &str| -> i64 {
        t.column_index(name).map(|i| i as i64).unwrap_or(-1)
    });

    engine.register_fn("NUM", |value: Dynamic| -> f64 { dynamic_to_number(&value) });

    let t = table.clone();
    engine.register_fn(
        "FILTER",
        move |ctx: NativeCallContext, predicate: FnPtr| -> Result<Array, Box<EvalAltResult>> {
            let mut kept = Array::new();
            for row in &t.rows {
                let row_dyn = row_to_array(row);
                let keep: Dynamic = predicate.call_within_context(&ctx, (row_dyn.clone(),))?;
                if keep.as_bool().unwrap_or(false) {
                    kept.push(Dynamic::from(row_dyn));
                }
            }
            Ok(kept)
        },
    );

    let t = table.clone();
    engine.register_fn(
        "MATCH_ROWS",
        move |col: i64, needle: &str| -> Result<Array, Box<EvalAltResult>> {
            let needle = needle.to_lowercase();
            if needle.is_empty() {
                return Err(invalid_arg("search needle must not be empty"));
            }
            let cols: Vec<usize> = if col < 0 {
                (0..t.columns.len()).collect()
            } else {
                vec![check_col(&t, col)?]
            };
            let mut out = Array::new();
            for (i, row) in t.rows.iter().enumerate() {
                let hit = cols.iter().any(|&c| {
                    row.get(c)
                        .map(|cell| cell.display().to_lowercase().contains(&needle))
                        .unwrap_or(false)
                });
                if hit {
                    out.push(Dynamic::from(i as i64));
                }
            }
            Ok(out)
        },
    );

    let t = table.clone();
    engine.register_fn(
        "GROUP_SUM",
        move |group_col: i64, value_col: i64| -> Result<Map, Box<EvalAltResult>> {
            let g = check_col(&t, group_col)?;
            let v = check_col(&t, value_col)?;
            let mut map = Map::new();
            for row in &t.rows {
                let Some(n) = row.get(v).and_then(|c| c.as_number()) else {
                    continue;
                };
                let key = group_key(row.get(g));
                let entry = map.entry(key.into()).or_insert_with(|| Dynamic::from(0.0_f64));
                let current = entry.as_float().unwrap_or(0.0);
                *entry = Dynamic::from(current + n);
            }
            Ok(map)
        },
    );

    let t = table.clone();
    engine.register_fn(
        "GROUP_COUNT",
        move |group_col: i64| -> Result<Map, Box<EvalAltResult>> {
            let g = check_col(&t, group_col)?;
            let mut map = Map::new();
            for row in &t.rows {
                let key = group_key(row.get(g));
                let entry = map.entry(key.into()).or_insert_with(|| Dynamic::from(0_i64));
                let current = entry.as_int().unwrap_or(0);
                *entry = Dynamic::from(current + 1);
            }
            Ok(map)
        },
    );

    let t = table.clone();
    engine.register_fn(
        "GROUP_MEAN",
        move |group_col: i64, value_col: i64| -> Result<Map, Box<EvalAltResult>> {
            let g = check_col(&t, group_col)?;
            let v = check_col(&t, value_col)?;
            let mut sums: Vec<(String, f64, usize)> = Vec::new();
            for row in &t.rows {
                let Some(n) = row.get(v).and_then(|c| c.as_number()) else {
                    continue;
                };
                let key = group_key(row.get(g));
                match sums.iter_mut().find(|(k, _, _)| *k == key) {
                    Some((_, sum, count)) => {
                        *sum += n;
                        *count += 1;
                    }
                    None => sums.push((key, n, 1)),
                }
            }
            let mut map = Map::new();
            for (key, sum, count) in sums {
                map.insert(key.into(), Dynamic::from(sum / count as f64));
            }
            Ok(map)
        },
    );

    engine.register_fn("TOP_K", |map: Map, k: i64| -> Array {
        let mut pairs: Vec<(String, f64)> = map
            .iter()
            .map(|(key, value)| (key.to_string(), dynamic_to_number(value)))
            .collect();
        pairs.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let k = usize::try_from(k).unwrap_or(0);
        pairs
            .into_iter()
            .take(k)
            .map(|(key, value)| {
                let pair: Array = vec![Dynamic::from(key), Dynamic::from(value)];
                Dynamic::from(pair)
            })
            .collect()
    });

    engine.register_fn("SORT_BY", |rows: Array, col: i64, descending: bool| -> Array {
        let idx = usize::try_from(col).unwrap_or(0);
        let mut rows = rows;
        rows.sort_by(|a, b| {
            let cell = |d: &Dynamic| -> f64 {
                d.clone()
                    .into_array()
                    .ok()
                    .and_then(|r| r.get(idx).map(dynamic_to_number))
                    .unwrap_or(f64::NAN)
            };
            let ord = cell(a)
                .partial_cmp(&cell(b))
                .unwrap_or(std::cmp::Ordering::Equal);
            if descending { ord.reverse() } else { ord }
        });
        rows
    });

    let t = table.clone();
    engine.register_fn("SUM_COL", move |col: i64| -> Result<f64, Box<EvalAltResult>> {
        let c = check_col(&t, col)?;
        Ok(numeric_cells(&t, c).iter().sum())
    });

    let t = table.clone();
    engine.register_fn("MEAN_COL", move |col: i64| -> Result<f64, Box<EvalAltResult>> {
        let c = check_col(&t, col)?;
        let values = numeric_cells(&t, c);
        if values.is_empty() {
            return Ok(f64::NAN);
        }
        Ok(values.iter().sum::<f64>() / values.len() as f64)
    });

    let t = table.clone();
    engine.register_fn("COUNT_COL", move |col: i64| -> Result<i64, Box<EvalAltResult>> {
        let c = check_col(&t, col)?;
        Ok(t.rows
            .iter()
            .filter(|row| row.get(c).map(|cell| !cell.is_empty()).unwrap_or(false))
            .count() as i64)
    });

    let t = table.clone();
    engine.register_fn("MIN_COL", move |col: i64| -> Result<f64, Box<EvalAltResult>> {
        let c = check_col(&t, col)?;
        Ok(numeric_cells(&t, c).into_iter().fold(f64::NAN, f64::min))
    });

    let t = table;
    engine.register_fn("MAX_COL", move |col: i64| -> Result<f64, Box<EvalAltResult>> {
        let c = check_col(&t, col)?;
        Ok(numeric_cells(&t, c).into_iter().fold(f64::NAN, f64::max))
    });
}
