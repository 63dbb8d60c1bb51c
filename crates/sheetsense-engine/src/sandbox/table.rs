//! Tabular data structures for sandbox execution.
//!
//! This module provides the core data types for representing caller-supplied
//! spreadsheet data:
//! - [`CellValue`] - A single cell (empty, text, or number)
//! - [`DataTable`] - An immutable header + body table shared with the sandbox
//! - [`parse_number`] - Locale-tolerant numeric parsing for text cells

use serde::{Deserialize, Serialize};

/// A single cell value as supplied by the caller.
///
/// Order of the untagged variants matters: numbers must be tried before
/// text so JSON numbers do not round-trip as strings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Number(f64),
    Text(String),
    Empty,
}

impl CellValue {
    /// Numeric view of the cell, parsing text cells leniently.
    /// Returns `None` for empty cells and unparseable text.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            CellValue::Text(s) => parse_number(s),
            CellValue::Empty => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            CellValue::Number(_) => false,
        }
    }

    /// Display string for comparisons and rendered output.
    pub fn display(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Text(s) => s.clone(),
            CellValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e10 {
                    format!("{:.0}", n)
                } else {
                    n.to_string()
                }
            }
        }
    }
}

/// Compare two cells for value equality, numeric-aware.
/// `Text("100")` and `Number(100.0)` are equal; otherwise trimmed text equality.
pub fn cells_equal(a: &CellValue, b: &CellValue) -> bool {
    if let (Some(x), Some(y)) = (a.as_number(), b.as_number()) {
        return (x - y).abs() < 1e-9;
    }
    a.display().trim() == b.display().trim()
}

/// Immutable table shared with the sandbox: column headers plus a body of rows.
///
/// The sandbox only ever receives cloned-out views of this data, so script
/// mutation can never leak back to the caller.
#[derive(Clone, Debug)]
pub struct DataTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl DataTable {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<CellValue>>) -> DataTable {
        DataTable { columns, rows }
    }

    /// Case-insensitive exact column lookup.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name) || c.to_lowercase() == name.to_lowercase())
    }

    /// True when a majority of the column's non-empty cells parse as numbers.
    pub fn column_is_numeric(&self, col: usize) -> bool {
        let mut numeric = 0usize;
        let mut filled = 0usize;
        for row in &self.rows {
            let Some(cell) = row.get(col) else { continue };
            if cell.is_empty() {
                continue;
            }
            filled += 1;
            if cell.as_number().is_some() {
                numeric += 1;
            }
        }
        filled > 0 && numeric * 2 > filled
    }
}

/// Parse a numeric string tolerating locale variants.
///
/// Both `.` and `,` are accepted as the decimal separator; thousands
/// separators, currency symbols, and spacing are stripped before parsing.
/// Rules:
/// - `"12,6"` -> 12.6 (comma decimal)
/// - `"1,234.5"` -> 1234.5 (comma thousands, dot decimal)
/// - `"1.234,5"` -> 1234.5 (dot thousands, comma decimal)
/// - `"1 234"` / `"$1,200"` -> 1234 / 1200
pub fn parse_number(raw: &str) -> Option<f64> {
    let mut s: String = raw
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace() && !"₽$€£%".contains(*c))
        .collect();
    if s.is_empty() {
        return None;
    }

    let dots = s.matches('.').count();
    let commas = s.matches(',').count();

    if dots > 0 && commas > 0 {
        // The rightmost separator is the decimal point; the other is grouping.
        let last_dot = s.rfind('.').unwrap_or(0);
        let last_comma = s.rfind(',').unwrap_or(0);
        if last_dot > last_comma {
            s = s.replace(',', "");
        } else {
            s = s.replace('.', "").replace(',', ".");
        }
    } else if commas > 0 {
        if commas == 1 {
            // A single comma followed by exactly three digits reads as
            // grouping ("1,200"); anything else reads as a decimal ("12,6").
            let after = s.rsplit(',').next().unwrap_or("");
            if after.len() == 3 && after.chars().all(|c| c.is_ascii_digit()) {
                s = s.replace(',', "");
            } else {
                s = s.replace(',', ".");
            }
        } else {
            // Multiple commas can only be grouping.
            s = s.replace(',', "");
        }
    } else if dots > 1 {
        s = s.replace('.', "");
    }

    s.parse::<f64>().ok()
}
