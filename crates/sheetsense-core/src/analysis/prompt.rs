//! Prompt assembly and completion-reply parsing.
//!
//! The prompt tells the generator exactly which builtins exist and which
//! output variables the sandbox expects. Pre-computed aggregation results
//! are interpolated as facts so the generator is never asked to do
//! arithmetic itself.

use regex::Regex;
use sheetsense_engine::builtins::TRANSFORM_BUILTINS;
use sheetsense_engine::sandbox::DataTable;
use std::sync::OnceLock;

use super::aggregate::AggregationTable;
use crate::config::AnalysisConfig;

/// Render an aggregation table as "key: value" fact lines.
pub fn render_aggregation(agg: &AggregationTable) -> String {
    let mut out = format!("{} -> {}\n", agg.group_header, agg.value_header);
    for (key, value) in &agg.groups {
        if value.fract() == 0.0 && value.abs() < 1e10 {
            out.push_str(&format!("{}: {:.0}\n", key, value));
        } else {
            out.push_str(&format!("{}: {:.2}\n", key, value));
        }
    }
    out
}

/// Assemble the completion prompt: schema, sample rows, pre-computed
/// facts, sanitized caller context, and the sandbox output contract.
pub fn build_prompt(
    query: &str,
    table: &DataTable,
    precomputed: Option<&AggregationTable>,
    context: Option<&str>,
    config: &AnalysisConfig,
) -> String {
    let mut prompt = String::new();

    prompt.push_str("You write short Rhai data-transformation scripts.\n\n");
    prompt.push_str(&format!("Columns: {}\n", table.columns.join(" | ")));
    prompt.push_str(&format!("Rows: {}\n", table.rows.len()));

    if !table.rows.is_empty() {
        prompt.push_str("Sample:\n");
        for row in table.rows.iter().take(config.prompt_sample_rows) {
            let cells: Vec<String> = row.iter().map(|c| c.display()).collect();
            prompt.push_str(&format!("  {}\n", cells.join(" | ")));
        }
    }

    if let Some(agg) = precomputed {
        prompt.push_str("\nPre-computed result (authoritative, do not recalculate):\n");
        prompt.push_str(&render_aggregation(agg));
    }

    if let Some(ctx) = context {
        prompt.push_str("\nAdditional context from the user:\n");
        prompt.push_str(ctx);
        prompt.push('\n');
    }

    prompt.push_str("\nAvailable functions (nothing else is callable):\n");
    for builtin in TRANSFORM_BUILTINS {
        prompt.push_str(&format!("  {} - {}\n", builtin.signature, builtin.description));
    }

    prompt.push_str(
        "\nAssign your answer to these variables (all pre-declared):\n\
         result, summary, methodology, key_findings, confidence,\n\
         highlight_rows, highlight_color, action_type.\n",
    );
    prompt.push_str(&format!("\nQuestion: {}\n", query));
    prompt.push_str("Reply with one fenced code block.\n");
    prompt
}

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)```(?:rhai|rust|js)?\s*\n(.*?)```").expect("fence regex must compile")
    })
}

/// Pull the script out of a completion reply.
///
/// Prefers the first fenced code block; a fenceless reply that still looks
/// like code (assignments with statement terminators) is taken whole.
/// Prose replies yield `None` and are treated as a direct textual answer.
pub fn extract_script(reply: &str) -> Option<String> {
    if let Some(caps) = fence_re().captures(reply) {
        let body = caps[1].trim();
        if !body.is_empty() {
            return Some(body.to_string());
        }
    }
    let trimmed = reply.trim();
    if trimmed.contains('=') && trimmed.contains(';') {
        return Some(trimmed.to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheetsense_engine::sandbox::CellValue;

    #[test]
    fn test_extract_fenced_script() {
        let reply = "Here you go:\n```rhai\nsummary = \"hi\";\n```\nthanks";
        assert_eq!(extract_script(reply).unwrap(), "summary = \"hi\";");
    }

    #[test]
    fn test_extract_bare_code() {
        let reply = "result = FILTER(|row| NUM(row[1]) > 5.0);";
        assert_eq!(extract_script(reply).unwrap(), reply);
    }

    #[test]
    fn test_prose_reply_is_not_a_script() {
        assert_eq!(extract_script("The table has three rows."), None);
        assert_eq!(extract_script(""), None);
    }

    #[test]
    fn test_prompt_carries_precomputed_facts() {
        let table = DataTable::new(
            vec!["g".into(), "v".into()],
            vec![vec![CellValue::Text("A".into()), CellValue::Number(1.0)]],
        );
        let agg = AggregationTable {
            group_header: "g".into(),
            value_header: "sum(v)".into(),
            groups: vec![("A".into(), 150.0), ("B".into(), 200.0)],
        };
        let cfg = AnalysisConfig::default();
        let prompt = build_prompt("сколько?", &table, Some(&agg), Some("март"), &cfg);
        assert!(prompt.contains("A: 150"));
        assert!(prompt.contains("authoritative"));
        assert!(prompt.contains("март"));
        assert!(prompt.contains("GROUP_SUM"));
        assert!(prompt.contains("сколько?"));
    }
}
