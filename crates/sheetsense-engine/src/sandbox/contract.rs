//! The result contract and its enforcement.
//!
//! Generated scripts are untrusted: they may fault, assign the wrong types,
//! read output variables before defining them, or define them in any order.
//! The contract is therefore seeded into the scope with safe defaults
//! *before* evaluation, and extraction afterwards merges the post-execution
//! scope into a fresh default contract field by field. Every code path ends
//! with a fully populated [`ExecutionContract`].

use regex::Regex;
use rhai::{Dynamic, Map, Scope};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use super::table::{CellValue, DataTable, cells_equal};

/// Default confidence reported when the script says nothing else.
pub const DEFAULT_CONFIDENCE: f64 = 0.95;

/// What the caller should do with the answer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    None,
    Highlight,
    Aggregate,
    Formula,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::None => "none",
            ActionType::Highlight => "highlight",
            ActionType::Aggregate => "aggregate",
            ActionType::Formula => "formula",
        }
    }

    fn from_token(token: &str) -> Option<ActionType> {
        match token.trim().to_lowercase().as_str() {
            "highlight" => Some(ActionType::Highlight),
            "aggregate" => Some(ActionType::Aggregate),
            "formula" => Some(ActionType::Formula),
            "none" => Some(ActionType::None),
            _ => None,
        }
    }
}

/// The fixed set of output slots a sandbox run must yield.
/// Never partially constructed: [`ExecutionContract::default`] populates
/// every field, and extraction only overwrites slots the script filled
/// with well-typed values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContract {
    pub result: Option<Vec<Vec<CellValue>>>,
    pub summary: String,
    pub methodology: String,
    pub key_findings: Vec<String>,
    pub confidence: f64,
    pub highlight_rows: Vec<usize>,
    pub highlight_color: Option<String>,
    pub action_type: ActionType,
}

impl Default for ExecutionContract {
    fn default() -> ExecutionContract {
        ExecutionContract {
            result: None,
            summary: String::new(),
            methodology: String::new(),
            key_findings: Vec::new(),
            confidence: DEFAULT_CONFIDENCE,
            highlight_rows: Vec::new(),
            highlight_color: None,
            action_type: ActionType::None,
        }
    }
}

/// Seed the scope with a default binding for every contract field so a
/// read of any output name before assignment resolves instead of faulting.
pub fn seed_scope(scope: &mut Scope) {
    scope.push_dynamic("result", Dynamic::UNIT);
    scope.push("summary", String::new());
    scope.push("methodology", String::new());
    scope.push("key_findings", rhai::Array::new());
    scope.push("confidence", DEFAULT_CONFIDENCE);
    scope.push("highlight_rows", rhai::Array::new());
    scope.push_dynamic("highlight_color", Dynamic::UNIT);
    scope.push("action_type", String::new());
}

fn scope_value(scope: &Scope, name: &str) -> Option<Dynamic> {
    scope.get_value::<Dynamic>(name)
}

fn dynamic_to_cell(value: &Dynamic) -> CellValue {
    if value.is_unit() {
        return CellValue::Empty;
    }
    if let Ok(n) = value.as_float() {
        return CellValue::Number(n);
    }
    if let Ok(n) = value.as_int() {
        return CellValue::Number(n as f64);
    }
    if let Ok(b) = value.as_bool() {
        return CellValue::Text(if b { "TRUE" } else { "FALSE" }.to_string());
    }
    if let Ok(s) = value.clone().into_string() {
        return CellValue::Text(s);
    }
    CellValue::Text(format!("{:?}", value))
}

fn extract_string(scope: &Scope, name: &str) -> Option<String> {
    scope_value(scope, name)?.into_string().ok()
}

fn extract_rows(value: Dynamic) -> Option<Vec<Vec<CellValue>>> {
    // Grouping builtins return maps; render them as [key, value] rows.
    if value.is_map() {
        let map = value.try_cast::<Map>()?;
        return Some(
            map.into_iter()
                .map(|(key, v)| vec![CellValue::Text(key.to_string()), dynamic_to_cell(&v)])
                .collect(),
        );
    }
    let array = value.into_array().ok()?;
    let rows: Vec<Vec<CellValue>> = array
        .into_iter()
        .map(|row| match row.clone().into_array() {
            Ok(cells) => cells.iter().map(dynamic_to_cell).collect(),
            // A scalar entry becomes a single-cell row.
            Err(_) => vec![dynamic_to_cell(&row)],
        })
        .collect();
    Some(rows)
}

/// Reconcile the post-execution scope against the contract.
///
/// Pure function of the scope snapshot and the table: calling it twice on
/// the same snapshot yields identical contracts.
pub fn extract_contract(scope: &Scope, table: &DataTable) -> ExecutionContract {
    let mut contract = ExecutionContract::default();

    if let Some(value) = scope_value(scope, "result") {
        if !value.is_unit() {
            if let Some(rows) = extract_rows(value) {
                // Emptiness is judged by row count, never by coercing the
                // table value itself to a boolean.
                if !rows.is_empty() {
                    contract.result = Some(rows);
                }
            }
        }
    }

    if let Some(s) = extract_string(scope, "summary") {
        contract.summary = normalize_labels(&s);
    }
    if let Some(s) = extract_string(scope, "methodology") {
        contract.methodology = normalize_labels(&s);
    }

    if let Some(value) = scope_value(scope, "key_findings") {
        if let Ok(items) = value.into_array() {
            contract.key_findings = items
                .into_iter()
                .filter_map(|d| match d.clone().into_string() {
                    Ok(s) => Some(s),
                    Err(_) if !d.is_unit() => Some(dynamic_to_cell(&d).display()),
                    Err(_) => None,
                })
                .collect();
        }
    }

    if let Some(value) = scope_value(scope, "confidence") {
        let n = if let Ok(f) = value.as_float() {
            Some(f)
        } else {
            value.as_int().ok().map(|i| i as f64)
        };
        if let Some(n) = n {
            if n.is_finite() {
                contract.confidence = n.clamp(0.0, 1.0);
            }
        }
    }

    if let Some(value) = scope_value(scope, "highlight_rows") {
        if let Ok(items) = value.into_array() {
            contract.highlight_rows = items
                .into_iter()
                .filter_map(|d| {
                    let n = d.as_int().ok().or_else(|| d.as_float().ok().map(|f| f as i64))?;
                    usize::try_from(n).ok()
                })
                .filter(|&i| i < table.rows.len())
                .collect();
        }
    }

    if let Some(value) = scope_value(scope, "highlight_color") {
        if let Ok(s) = value.into_string() {
            if !s.trim().is_empty() {
                contract.highlight_color = Some(s.trim().to_lowercase());
            }
        }
    }

    if let Some(s) = extract_string(scope, "action_type") {
        if let Some(action) = ActionType::from_token(&s) {
            contract.action_type = action;
        }
    }

    if contract.highlight_rows.is_empty() {
        if let Some(rows) = &contract.result {
            contract.highlight_rows = derive_highlight_rows(rows, table);
        }
    }

    contract
}

/// Bridge between "the script found a subset of rows" and "the caller must
/// color those rows": positional indices of result rows within the full
/// row set, matched by value/position correspondence. Each table row is
/// consumed at most once so duplicate result rows map to distinct indices.
fn derive_highlight_rows(result: &[Vec<CellValue>], table: &DataTable) -> Vec<usize> {
    let width = table.columns.len();
    let mut used = vec![false; table.rows.len()];
    let mut indices = Vec::new();
    for row in result {
        if row.len() != width {
            continue;
        }
        let hit = table.rows.iter().enumerate().find(|(i, candidate)| {
            !used[*i]
                && candidate.len() == row.len()
                && candidate.iter().zip(row.iter()).all(|(a, b)| cells_equal(a, b))
        });
        if let Some((i, _)) = hit {
            used[i] = true;
            indices.push(i);
        }
    }
    indices.sort_unstable();
    indices
}

fn label_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b([\w\p{L}]+)=([\w\p{L}.,%-]+)").expect("label regex must compile")
    })
}

/// Rewrite `key=value` tokens as `key: value`, but only on lines that do
/// not already carry a label separator, so already-formatted lines are not
/// double-labeled.
pub fn normalize_labels(text: &str) -> String {
    text.lines()
        .map(|line| {
            if line.contains(':') {
                line.to_string()
            } else {
                label_re().replace_all(line, "${1}: ${2}").to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
