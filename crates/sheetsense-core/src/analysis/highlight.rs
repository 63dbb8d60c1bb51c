//! Highlight resolution.
//!
//! Turns a contract's row sub-selection into the normalized
//! `(rows, color, message)` triple. This module is the single owner of the
//! header-offset rule: contract indices are 0-based against the data body,
//! and presentation layers apply the offset through
//! [`HighlightResult::with_header_offset`] instead of reasoning about it
//! themselves.

use sheetsense_engine::sandbox::ExecutionContract;

/// Color keyword stems mapped to palette tokens. Stems, not whole words,
/// so inflected forms ("жёлтым", "красного") match too.
const PALETTE: &[(&str, &str)] = &[
    ("красн", "red"),
    ("red", "red"),
    ("жёлт", "yellow"),
    ("желт", "yellow"),
    ("yellow", "yellow"),
    ("зелён", "green"),
    ("зелен", "green"),
    ("green", "green"),
    ("син", "blue"),
    ("голуб", "blue"),
    ("blue", "blue"),
    ("оранж", "orange"),
    ("orange", "orange"),
];

pub const DEFAULT_COLOR: &str = "yellow";

/// Normalized highlight output.
#[derive(Clone, Debug, PartialEq)]
pub struct HighlightResult {
    /// 0-based indices into the data body (header excluded).
    pub rows: Vec<usize>,
    pub color: String,
    pub message: String,
}

impl HighlightResult {
    /// Shift indices for a presentation layer whose row numbering includes
    /// `header_rows` leading header lines.
    pub fn with_header_offset(&self, header_rows: usize) -> HighlightResult {
        HighlightResult {
            rows: self.rows.iter().map(|r| r + header_rows).collect(),
            color: self.color.clone(),
            message: self.message.clone(),
        }
    }
}

/// First palette token whose stem appears in the text, if any.
pub fn detect_color(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    PALETTE
        .iter()
        .find(|(stem, _)| lower.contains(stem))
        .map(|(_, token)| *token)
}

fn valid_token(color: &str) -> Option<&'static str> {
    PALETTE
        .iter()
        .find(|(_, token)| *token == color)
        .map(|(_, token)| *token)
}

/// Resolve the contract (plus the query, for color keywords) into a
/// [`HighlightResult`]. Color preference: a valid contract color, then a
/// keyword detected in the query, then the default token.
pub fn resolve(contract: &ExecutionContract, query: &str) -> HighlightResult {
    let color = contract
        .highlight_color
        .as_deref()
        .and_then(valid_token)
        .or_else(|| detect_color(query))
        .unwrap_or(DEFAULT_COLOR)
        .to_string();

    let message = if !contract.summary.is_empty() {
        contract.summary.clone()
    } else if contract.highlight_rows.is_empty() {
        "No matching rows".to_string()
    } else {
        format!("Matched {} rows", contract.highlight_rows.len())
    };

    HighlightResult {
        rows: contract.highlight_rows.clone(),
        color,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_color_stems() {
        assert_eq!(detect_color("выдели жёлтым цветом"), Some("yellow"));
        assert_eq!(detect_color("подсвети красного поставщика"), Some("red"));
        assert_eq!(detect_color("highlight in green"), Some("green"));
        assert_eq!(detect_color("просто найди"), None);
    }

    #[test]
    fn test_resolve_prefers_contract_color() {
        let mut contract = ExecutionContract::default();
        contract.highlight_rows = vec![1, 3];
        contract.highlight_color = Some("red".into());
        let out = resolve(&contract, "выдели зелёным");
        assert_eq!(out.color, "red");
        assert_eq!(out.rows, vec![1, 3]);
        assert_eq!(out.message, "Matched 2 rows");
    }

    #[test]
    fn test_resolve_falls_back_to_query_then_default() {
        let mut contract = ExecutionContract::default();
        contract.highlight_rows = vec![0];
        let out = resolve(&contract, "выдели зелёным");
        assert_eq!(out.color, "green");

        let out = resolve(&contract, "выдели строки");
        assert_eq!(out.color, DEFAULT_COLOR);
    }

    #[test]
    fn test_invalid_contract_color_ignored() {
        let mut contract = ExecutionContract::default();
        contract.highlight_color = Some("vermilion".into());
        let out = resolve(&contract, "find rows");
        assert_eq!(out.color, DEFAULT_COLOR);
    }

    #[test]
    fn test_header_offset() {
        let result = HighlightResult {
            rows: vec![0, 2],
            color: "yellow".into(),
            message: String::new(),
        };
        assert_eq!(result.with_header_offset(1).rows, vec![1, 3]);
    }
}
