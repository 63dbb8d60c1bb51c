//! Pipeline configuration.

use serde::{Deserialize, Serialize};

/// Tunable thresholds for the analysis pipeline. All fields have defaults
/// so a partial TOML file (or none at all) is fine.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Maximum length of caller-supplied context, in characters.
    pub max_context_len: usize,
    /// Queries at or under this many tokens are candidates for
    /// follow-up rewriting against history.
    pub rewrite_max_tokens: usize,
    /// Prefix length used when matching free-text name searches against
    /// cell values. An approximation for inflected languages (Cyrillic
    /// case endings), not a linguistic rule.
    pub name_prefix_len: usize,
    /// Maximum Levenshtein distance for fuzzy column-name matching.
    pub fuzzy_distance: usize,
    /// Wall-clock budget for one sandbox run, in milliseconds. Independent
    /// of whatever timeout the completion capability enforces.
    pub sandbox_timeout_ms: u64,
    /// How many data rows to show in an assembled prompt.
    pub prompt_sample_rows: usize,
    /// Rows scanned when building the table's value vocabulary.
    pub vocab_scan_rows: usize,
    /// Group-count range for which a chart is recommended.
    pub chart_min_groups: usize,
    pub chart_max_groups: usize,
    /// Default k for top-k queries that name no number.
    pub default_top_k: usize,
}

impl Default for AnalysisConfig {
    fn default() -> AnalysisConfig {
        AnalysisConfig {
            max_context_len: 2000,
            rewrite_max_tokens: 4,
            name_prefix_len: 6,
            fuzzy_distance: 2,
            sandbox_timeout_ms: 2000,
            prompt_sample_rows: 5,
            vocab_scan_rows: 200,
            chart_min_groups: 2,
            chart_max_groups: 12,
            default_top_k: 5,
        }
    }
}

impl AnalysisConfig {
    pub fn from_toml_str(text: &str) -> Result<AnalysisConfig, toml::de::Error> {
        toml::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AnalysisConfig::default();
        assert_eq!(cfg.max_context_len, 2000);
        assert_eq!(cfg.name_prefix_len, 6);
    }

    #[test]
    fn test_partial_toml_overrides() {
        let cfg = AnalysisConfig::from_toml_str("sandbox_timeout_ms = 500").unwrap();
        assert_eq!(cfg.sandbox_timeout_ms, 500);
        assert_eq!(cfg.max_context_len, 2000);
    }
}
