//! Query classification and elliptical-follow-up rewriting.
//!
//! Pure and deterministic: no completion calls, no sandbox, no I/O.
//! Classification selects the processing path (aggregation / highlight /
//! formula / generic) and drafts an [`AggregationSpec`] when the query is
//! aggregation-shaped. Mismatches here are signalled fallbacks, never
//! fatal: the pipeline drops to the generic path.

use regex::Regex;
use sheetsense_engine::sandbox::{CellValue, DataTable};
use std::sync::OnceLock;

use crate::config::AnalysisConfig;
use super::request::HistoryTurn;

/// Aggregation operation drafted by the classifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggregateOp {
    Sum,
    Count,
    TopK,
    Mean,
}

/// Draft aggregation, carrying *column names* chosen by fuzzy match.
/// The pre-calculator re-resolves them and may still decline.
#[derive(Clone, Debug, PartialEq)]
pub struct AggregationSpec {
    pub group_column: String,
    pub value_column: String,
    pub operation: AggregateOp,
    pub k: Option<usize>,
}

/// The processing path selected for a query.
#[derive(Clone, Debug, PartialEq)]
pub enum Intent {
    Aggregate(AggregationSpec),
    Highlight { target: String },
    Formula,
    Generic,
}

fn token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\p{L}\p{N}]+").expect("token regex must compile"))
}

fn top_k_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(?:топ|top)\s*-?\s*(\d+)").expect("top-k regex must compile"))
}

pub(crate) fn tokenize(text: &str) -> Vec<String> {
    token_re()
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

const STOPWORDS: &[&str] = &[
    // Russian
    "а", "и", "но", "на", "в", "во", "по", "у", "о", "об", "за", "из", "к", "с", "со", "же",
    "ли", "это", "что", "как", "для", "не", "есть", "то", "бы",
    // English
    "a", "an", "the", "on", "in", "at", "of", "for", "and", "or", "to", "is", "are", "was",
    "what", "which", "about", "me", "my", "do", "does",
];

fn is_stopword(token: &str) -> bool {
    let lower = token.to_lowercase();
    STOPWORDS.iter().any(|s| *s == lower)
}

/// Levenshtein distance over characters. Both inputs are expected to be
/// short (column names, query tokens).
pub(crate) fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(prev[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut prev, &mut current);
    }
    prev[b.len()]
}

/// Case-insensitive fuzzy token match: substring either way, or edit
/// distance under the threshold.
pub(crate) fn fuzzy_match(a: &str, b: &str, max_distance: usize) -> bool {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    if a.len() >= 3 && b.len() >= 3 && (a.contains(&b) || b.contains(&a)) {
        return true;
    }
    edit_distance(&a, &b) <= max_distance
}

fn matches_any_column(token: &str, columns: &[String], max_distance: usize) -> bool {
    if token.chars().count() < 3 || is_stopword(token) {
        return false;
    }
    columns.iter().any(|c| {
        tokenize(c)
            .iter()
            .any(|col_tok| fuzzy_match(token, col_tok, max_distance))
    })
}

/// Lowercased text tokens appearing in cell values, for antecedent lookup.
fn value_vocabulary(rows: &[Vec<CellValue>], scan_rows: usize) -> Vec<String> {
    let mut vocab = Vec::new();
    for row in rows.iter().take(scan_rows) {
        for cell in row {
            if let CellValue::Text(s) = cell {
                for token in tokenize(s) {
                    let lower = token.to_lowercase();
                    if lower.chars().count() >= 2 && !vocab.contains(&lower) {
                        vocab.push(lower);
                    }
                }
            }
        }
    }
    vocab
}

/// The most content-bearing token of a short follow-up: the longest
/// non-stopword token.
fn salient_token(tokens: &[String]) -> Option<String> {
    tokens
        .iter()
        .filter(|t| !is_stopword(t))
        .max_by_key(|t| t.chars().count())
        .cloned()
}

/// Resolve an elliptical follow-up against history.
///
/// A short query with no recognizable subject takes the most recent
/// history query that has one, swapping in the follow-up's salient token:
/// "Сколько товаров на WB?" + "а на Ozon?" -> "Сколько товаров на Ozon?".
/// Returns the query unchanged when no suitable antecedent exists.
pub fn rewrite_followup(
    query: &str,
    history: &[HistoryTurn],
    columns: &[String],
    rows: &[Vec<CellValue>],
    config: &AnalysisConfig,
) -> String {
    let tokens = tokenize(query);
    if tokens.is_empty() || tokens.len() > config.rewrite_max_tokens {
        return query.to_string();
    }
    // Already self-contained if some token names a column.
    if tokens
        .iter()
        .any(|t| matches_any_column(t, columns, config.fuzzy_distance))
    {
        return query.to_string();
    }
    let Some(replacement) = salient_token(&tokens) else {
        return query.to_string();
    };

    let vocab = value_vocabulary(rows, config.vocab_scan_rows);

    for turn in history.iter().rev() {
        let prior_tokens = tokenize(&turn.query);
        let has_subject = prior_tokens
            .iter()
            .any(|t| matches_any_column(t, columns, config.fuzzy_distance));
        if !has_subject {
            continue;
        }

        // Prefer replacing the token that names a table value (the old
        // comparison target); otherwise the last non-stopword token.
        let target = prior_tokens
            .iter()
            .rev()
            .find(|t| vocab.contains(&t.to_lowercase()) && **t != replacement)
            .or_else(|| prior_tokens.iter().rev().find(|t| !is_stopword(t)))
            .cloned();
        let Some(target) = target else { continue };
        if target == replacement {
            return query.to_string();
        }
        if let Some(pos) = turn.query.rfind(&target) {
            let mut rewritten = turn.query.clone();
            rewritten.replace_range(pos..pos + target.len(), &replacement);
            return rewritten;
        }
    }

    query.to_string()
}

const COUNT_WORDS: &[&str] = &["сколько", "количество", "count", "many"];
const MEAN_WORDS: &[&str] = &["средн", "среднее", "average", "mean", "avg"];
const SUM_WORDS: &[&str] = &["сумм", "итог", "всего", "общ", "sum", "total"];
const HIGHLIGHT_WORDS: &[&str] = &[
    "найди", "найти", "выдели", "выделить", "подсвети", "отметь", "покажи", "find", "highlight",
    "select", "mark",
];
const FORMULA_WORDS: &[&str] = &["формул", "formula"];

fn query_mentions(query_lower: &str, stems: &[&str]) -> bool {
    stems.iter().any(|stem| query_lower.contains(stem))
}

/// Pick the column whose name best matches a query token, restricted by a
/// numeric/text predicate. Falls back to the first column satisfying the
/// predicate when the query names none.
fn pick_column(
    tokens: &[String],
    table: &DataTable,
    want_numeric: bool,
    max_distance: usize,
) -> Option<String> {
    let candidates: Vec<usize> = (0..table.columns.len())
        .filter(|&i| table.column_is_numeric(i) == want_numeric)
        .collect();
    for token in tokens {
        if token.chars().count() < 3 || is_stopword(token) {
            continue;
        }
        for &i in &candidates {
            let matched = tokenize(&table.columns[i])
                .iter()
                .any(|col_tok| fuzzy_match(token, col_tok, max_distance));
            if matched {
                return Some(table.columns[i].clone());
            }
        }
    }
    candidates.first().map(|&i| table.columns[i].clone())
}

/// A token that looks like a search target: capitalized mid-sentence,
/// quoted, or Latin inside a Cyrillic query.
fn extract_search_target(query: &str, tokens: &[String]) -> Option<String> {
    static QUOTED: OnceLock<Regex> = OnceLock::new();
    let quoted = QUOTED
        .get_or_init(|| Regex::new(r#"["'«]([^"'»]+)["'»]"#).expect("quote regex must compile"));
    if let Some(caps) = quoted.captures(query) {
        return Some(caps[1].trim().to_string());
    }
    let has_cyrillic = query.chars().any(|c| ('\u{0400}'..='\u{04FF}').contains(&c));
    tokens
        .iter()
        .skip(1)
        .find(|t| {
            let first_upper = t.chars().next().map(char::is_uppercase).unwrap_or(false);
            let latin_in_cyrillic = has_cyrillic && t.chars().all(|c| c.is_ascii_alphanumeric());
            !is_stopword(t) && (first_upper || latin_in_cyrillic)
        })
        .or_else(|| tokens.iter().rev().find(|t| !is_stopword(t)))
        .cloned()
}

/// Classify a (rewritten) query against intent signatures.
pub fn classify(query: &str, table: &DataTable, config: &AnalysisConfig) -> Intent {
    let query_lower = query.to_lowercase();
    let tokens = tokenize(query);

    if query_mentions(&query_lower, FORMULA_WORDS) {
        return Intent::Formula;
    }

    let top_k = top_k_re()
        .captures(query)
        .and_then(|caps| caps[1].parse::<usize>().ok());
    let is_aggregation = top_k.is_some()
        || query_mentions(&query_lower, COUNT_WORDS)
        || query_mentions(&query_lower, MEAN_WORDS)
        || query_mentions(&query_lower, SUM_WORDS);

    if is_aggregation {
        let operation = if top_k.is_some() {
            AggregateOp::TopK
        } else if query_mentions(&query_lower, COUNT_WORDS) {
            AggregateOp::Count
        } else if query_mentions(&query_lower, MEAN_WORDS) {
            AggregateOp::Mean
        } else {
            AggregateOp::Sum
        };

        // Grouping nouns tend to come last ("... на каждом маркетплейсе"),
        // value nouns first, so the two scans run in opposite directions.
        let reversed: Vec<String> = tokens.iter().rev().cloned().collect();
        let group = pick_column(&reversed, table, false, config.fuzzy_distance);
        let value = pick_column(&tokens, table, true, config.fuzzy_distance);
        match (group, value, operation) {
            // Counting needs only a grouping column.
            (Some(group_column), value, AggregateOp::Count) => {
                return Intent::Aggregate(AggregationSpec {
                    group_column,
                    value_column: value.unwrap_or_default(),
                    operation,
                    k: None,
                });
            }
            (Some(group_column), Some(value_column), op) => {
                return Intent::Aggregate(AggregationSpec {
                    group_column,
                    value_column,
                    operation: op,
                    k: top_k.or(if op == AggregateOp::TopK {
                        Some(config.default_top_k)
                    } else {
                        None
                    }),
                });
            }
            // Ambiguous shape: fall through to the generic path.
            _ => {}
        }
    }

    if query_mentions(&query_lower, HIGHLIGHT_WORDS) {
        if let Some(target) = extract_search_target(query, &tokens) {
            return Intent::Highlight { target };
        }
    }

    Intent::Generic
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marketplace_table() -> DataTable {
        DataTable::new(
            vec!["Товар".into(), "Маркетплейс".into(), "Цена".into()],
            vec![
                vec![
                    CellValue::Text("Чайник".into()),
                    CellValue::Text("WB".into()),
                    CellValue::Text("100".into()),
                ],
                vec![
                    CellValue::Text("Утюг".into()),
                    CellValue::Text("Ozon".into()),
                    CellValue::Text("200".into()),
                ],
                vec![
                    CellValue::Text("Лампа".into()),
                    CellValue::Text("WB".into()),
                    CellValue::Text("50".into()),
                ],
            ],
        )
    }

    fn history(queries: &[&str]) -> Vec<HistoryTurn> {
        queries
            .iter()
            .map(|q| HistoryTurn {
                query: q.to_string(),
                answer: String::new(),
            })
            .collect()
    }

    #[test]
    fn test_edit_distance() {
        assert_eq!(edit_distance("цена", "цена"), 0);
        assert_eq!(edit_distance("цена", "цены"), 1);
        assert_eq!(edit_distance("kitten", "sitting"), 3);
    }

    #[test]
    fn test_fuzzy_match_substring_and_distance() {
        assert!(fuzzy_match("товаров", "Товар", 2));
        assert!(fuzzy_match("price", "prices", 2));
        assert!(!fuzzy_match("цена", "маркет", 2));
    }

    #[test]
    fn test_followup_rewrite_substitutes_subject() {
        let table = marketplace_table();
        let cfg = AnalysisConfig::default();
        let rewritten = rewrite_followup(
            "а на Ozon?",
            &history(&["Сколько товаров на WB?"]),
            &table.columns,
            &table.rows,
            &cfg,
        );
        assert!(rewritten.contains("Ozon"), "got {:?}", rewritten);
        assert!(rewritten.contains("товаров"), "got {:?}", rewritten);
        assert_ne!(rewritten, "а на Ozon?");
    }

    #[test]
    fn test_followup_rewrite_noop_without_antecedent() {
        let table = marketplace_table();
        let cfg = AnalysisConfig::default();
        let rewritten =
            rewrite_followup("а на Ozon?", &history(&[]), &table.columns, &table.rows, &cfg);
        assert_eq!(rewritten, "а на Ozon?");
    }

    #[test]
    fn test_self_contained_query_not_rewritten() {
        let table = marketplace_table();
        let cfg = AnalysisConfig::default();
        let query = "Сколько товаров на Ozon?";
        let rewritten = rewrite_followup(
            query,
            &history(&["Сколько товаров на WB?"]),
            &table.columns,
            &table.rows,
            &cfg,
        );
        // Already names a column-vocabulary subject.
        assert_eq!(rewritten, query);
    }

    #[test]
    fn test_classify_count_query() {
        let table = marketplace_table();
        let cfg = AnalysisConfig::default();
        let intent = classify("Сколько товаров на каждом маркетплейсе?", &table, &cfg);
        match intent {
            Intent::Aggregate(spec) => {
                assert_eq!(spec.operation, AggregateOp::Count);
                assert_eq!(spec.group_column, "Маркетплейс");
            }
            other => panic!("expected aggregation, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_top_k_query() {
        let table = marketplace_table();
        let cfg = AnalysisConfig::default();
        let intent = classify("топ 2 маркетплейса по цене", &table, &cfg);
        match intent {
            Intent::Aggregate(spec) => {
                assert_eq!(spec.operation, AggregateOp::TopK);
                assert_eq!(spec.k, Some(2));
                assert_eq!(spec.value_column, "Цена");
            }
            other => panic!("expected aggregation, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_sum_query_english() {
        let table = DataTable::new(
            vec!["Region".into(), "Sales".into()],
            vec![
                vec![CellValue::Text("East".into()), CellValue::Number(10.0)],
                vec![CellValue::Text("West".into()), CellValue::Number(20.0)],
            ],
        );
        let cfg = AnalysisConfig::default();
        let intent = classify("total sales by region", &table, &cfg);
        match intent {
            Intent::Aggregate(spec) => {
                assert_eq!(spec.operation, AggregateOp::Sum);
                assert_eq!(spec.group_column, "Region");
                assert_eq!(spec.value_column, "Sales");
            }
            other => panic!("expected aggregation, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_highlight_query() {
        let table = marketplace_table();
        let cfg = AnalysisConfig::default();
        let intent = classify("Найди Иванова в таблице", &table, &cfg);
        match intent {
            Intent::Highlight { target } => assert_eq!(target, "Иванова"),
            other => panic!("expected highlight, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_formula_query() {
        let table = marketplace_table();
        let cfg = AnalysisConfig::default();
        assert_eq!(
            classify("напиши формулу для суммы цен", &table, &cfg),
            Intent::Formula
        );
    }

    #[test]
    fn test_classify_generic_query() {
        let table = marketplace_table();
        let cfg = AnalysisConfig::default();
        assert_eq!(
            classify("расскажи про эти данные", &table, &cfg),
            Intent::Generic
        );
    }

    #[test]
    fn test_classify_is_deterministic() {
        let table = marketplace_table();
        let cfg = AnalysisConfig::default();
        let q = "топ 2 маркетплейса по цене";
        assert_eq!(classify(q, &table, &cfg), classify(q, &table, &cfg));
    }
}
