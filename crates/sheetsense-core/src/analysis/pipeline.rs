//! End-to-end analysis pipeline.
//!
//! One request is processed by one logical task; nothing mutable is shared
//! across requests except the read-mostly classification cache. The only
//! blocking points are the completion call (its own timeout, retried once
//! on transient fault) and the sandbox run (deadline-bounded, partial
//! state discarded on failure). Every path out of here either returns a
//! fully populated [`AnalysisResponse`] or a caller-visible
//! [`AnalysisError`].

use dashmap::DashMap;
use sheetsense_engine::sandbox::{
    ActionType, CellValue, DataTable, ExecutionContract, FailureKind, RawExecutionOutcome,
    execute, extract_contract,
};
use std::sync::Arc;
use std::time::Duration;

use super::aggregate::{self, AggregationTable};
use super::classify::{self, Intent};
use super::highlight;
use super::prompt;
use super::request::{AnalysisRequest, AnalysisResponse, StructuredData};
use super::sanitize;
use crate::config::AnalysisConfig;
use crate::error::{AnalysisError, CompletionError, Result};

/// Confidence reported when the sandbox leg failed and the contract is
/// fully defaulted. Strictly below the contract default.
const FAILED_CONFIDENCE: f64 = 0.5;

/// The opaque text-completion capability. Implementations own their own
/// timeout; the pipeline only distinguishes transient faults (retried
/// once) from content-policy rejections (never retried).
pub trait CompletionProvider: Send + Sync {
    fn complete(&self, prompt: &str) -> std::result::Result<String, CompletionError>;
}

/// Provider returning a fixed reply. Used by tests and the CLI's offline
/// mode, where the "generated" script comes from a file.
pub struct ScriptedCompletion {
    reply: String,
}

impl ScriptedCompletion {
    pub fn new(reply: impl Into<String>) -> ScriptedCompletion {
        ScriptedCompletion { reply: reply.into() }
    }
}

impl CompletionProvider for ScriptedCompletion {
    fn complete(&self, _prompt: &str) -> std::result::Result<String, CompletionError> {
        Ok(self.reply.clone())
    }
}

/// Provider that always fails with a transient fault.
pub struct FailingCompletion;

impl CompletionProvider for FailingCompletion {
    fn complete(&self, _prompt: &str) -> std::result::Result<String, CompletionError> {
        Err(CompletionError::Transient("provider down".to_string()))
    }
}

type IntentCache = Arc<DashMap<u64, Intent>>;

/// The analysis pipeline. Cheap to clone; the classification cache is
/// shared, read-mostly, last-writer-wins.
#[derive(Clone)]
pub struct Analyzer {
    config: AnalysisConfig,
    provider: Option<Arc<dyn CompletionProvider>>,
    intent_cache: IntentCache,
}

impl Analyzer {
    pub fn new(config: AnalysisConfig) -> Analyzer {
        Analyzer {
            config,
            provider: None,
            intent_cache: Arc::new(DashMap::new()),
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn CompletionProvider>) -> Analyzer {
        self.provider = Some(provider);
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Process one request end to end.
    pub fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResponse> {
        request.validate()?;

        let table = Arc::new(DataTable::new(
            request.columns.clone(),
            request.rows.clone(),
        ));

        let context = request
            .custom_context
            .as_deref()
            .and_then(|text| sanitize::sanitize(text, self.config.max_context_len));

        let (rewritten, mut intent) = self.classify_cached(&request.query, request, &table);
        log::debug!("query {:?} rewritten to {:?}, intent {:?}", request.query, rewritten, intent);

        // Deterministic pre-calculation; an unresolvable spec falls back
        // to the generic path instead of failing the request.
        let mut precomputed: Option<AggregationTable> = None;
        if let Intent::Aggregate(spec) = &intent {
            match aggregate::compute(&table, spec, &self.config) {
                Some(agg) => precomputed = Some(agg),
                None => {
                    log::debug!("aggregation spec unresolvable, falling back to generic path");
                    intent = Intent::Generic;
                }
            }
        }

        // A highlight query answered by deterministic prefix search needs
        // no completion call at all.
        if let Intent::Highlight { target } = &intent {
            let rows = self.prefix_search(&table, target);
            if !rows.is_empty() {
                let mut contract = ExecutionContract::default();
                contract.summary = format!("Matched {} rows for '{}'", rows.len(), target);
                contract.highlight_rows = rows;
                contract.action_type = ActionType::Highlight;
                return Ok(self.build_response(contract, &rewritten, &table, None, &intent));
            }
            log::debug!("no prefix match for {:?}, trying the generic path", target);
        }

        let contract = self.completion_leg(&rewritten, &table, precomputed.as_ref(), context.as_deref(), &intent)?;

        Ok(self.build_response(contract, &rewritten, &table, precomputed, &intent))
    }

    /// Rewrite, then classify with caching. The rewrite depends on the
    /// request's history, so it always runs fresh; only the classification
    /// of the *rewritten* query is cached.
    fn classify_cached(
        &self,
        query: &str,
        request: &AnalysisRequest,
        table: &DataTable,
    ) -> (String, Intent) {
        let rewritten = classify::rewrite_followup(
            query,
            &request.history,
            &request.columns,
            &request.rows,
            &self.config,
        );
        let key = fingerprint(&rewritten, &request.columns);
        if let Some(hit) = self.intent_cache.get(&key) {
            return (rewritten, hit.value().clone());
        }
        let intent = classify::classify(&rewritten, table, &self.config);
        self.intent_cache.insert(key, intent.clone());
        (rewritten, intent)
    }

    /// Case-insensitive prefix search over text cells. The prefix length
    /// tolerates inflectional suffixes in name searches.
    fn prefix_search(&self, table: &DataTable, target: &str) -> Vec<usize> {
        let needle: String = target
            .to_lowercase()
            .chars()
            .take(self.config.name_prefix_len)
            .collect();
        if needle.is_empty() {
            return Vec::new();
        }
        table
            .rows
            .iter()
            .enumerate()
            .filter(|(_, row)| {
                row.iter()
                    .any(|cell| cell.display().to_lowercase().contains(&needle))
            })
            .map(|(i, _)| i)
            .collect()
    }

    /// The completion + sandbox leg. Returns a fully populated contract on
    /// every path; only an unreachable completion capability (with nothing
    /// deterministic to fall back on) is an error.
    fn completion_leg(
        &self,
        query: &str,
        table: &Arc<DataTable>,
        precomputed: Option<&AggregationTable>,
        context: Option<&str>,
        intent: &Intent,
    ) -> Result<ExecutionContract> {
        let Some(provider) = &self.provider else {
            let mut contract = ExecutionContract::default();
            if *intent == Intent::Formula {
                contract.action_type = ActionType::Formula;
            }
            return Ok(contract);
        };

        let assembled = prompt::build_prompt(query, table, precomputed, context, &self.config);
        let reply = match self.complete_with_retry(provider.as_ref(), &assembled) {
            Ok(reply) => reply,
            Err(err) => {
                if precomputed.is_some() {
                    // The deterministic answer stands on its own.
                    log::warn!("completion unavailable, answering from pre-computed data: {}", err);
                    let mut contract = ExecutionContract::default();
                    contract.methodology = "completion unavailable; computed deterministically".to_string();
                    return Ok(contract);
                }
                return Err(AnalysisError::CompletionUnavailable(err.to_string()));
            }
        };

        // Formula replies are spreadsheet formulas, not scripts; surface
        // the text instead of executing it.
        if *intent == Intent::Formula {
            let mut contract = ExecutionContract::default();
            contract.summary = prompt::extract_script(&reply).unwrap_or_else(|| reply.trim().to_string());
            contract.action_type = ActionType::Formula;
            return Ok(contract);
        }

        let Some(script) = prompt::extract_script(&reply) else {
            // A prose reply is a direct answer.
            let mut contract = ExecutionContract::default();
            contract.summary = reply.trim().to_string();
            return Ok(contract);
        };

        let timeout = Duration::from_millis(self.config.sandbox_timeout_ms);
        match execute(&script, table.clone(), timeout) {
            RawExecutionOutcome::Completed(scope) => Ok(extract_contract(&scope, table)),
            RawExecutionOutcome::Failed { kind, message } => {
                log::warn!("sandbox run failed ({}): {}", kind.as_str(), message);
                let mut contract = ExecutionContract::default();
                contract.confidence = FAILED_CONFIDENCE;
                contract.methodology = match kind {
                    FailureKind::Timeout => {
                        "generated script exceeded the time budget; returning defaults".to_string()
                    }
                    FailureKind::ScriptFault => format!(
                        "generated script failed ({}); returning defaults",
                        message
                    ),
                };
                Ok(contract)
            }
        }
    }

    fn complete_with_retry(
        &self,
        provider: &dyn CompletionProvider,
        assembled: &str,
    ) -> std::result::Result<String, CompletionError> {
        match provider.complete(assembled) {
            Ok(reply) => Ok(reply),
            Err(CompletionError::Transient(first)) => {
                log::debug!("transient completion fault, retrying once: {}", first);
                provider.complete(assembled)
            }
            Err(rejected) => Err(rejected),
        }
    }

    /// Assemble the final response: every field present, defaults filled.
    fn build_response(
        &self,
        contract: ExecutionContract,
        query: &str,
        table: &DataTable,
        precomputed: Option<AggregationTable>,
        intent: &Intent,
    ) -> AnalysisResponse {
        let mut summary = contract.summary.clone();
        let mut methodology = contract.methodology.clone();
        let mut action_type = contract.action_type;

        // The deterministic aggregation overrides whatever arithmetic the
        // generated script produced.
        let structured_data = if let Some(agg) = &precomputed {
            action_type = ActionType::Aggregate;
            if summary.is_empty() {
                summary = prompt::render_aggregation(agg).trim_end().to_string();
            }
            if !methodology.is_empty() {
                methodology.push('\n');
            }
            methodology.push_str(&format!(
                "aggregation computed deterministically over {} rows",
                table.rows.len()
            ));
            let group_count = agg.groups.len();
            Some(StructuredData {
                headers: vec![agg.group_header.clone(), agg.value_header.clone()],
                rows: agg
                    .groups
                    .iter()
                    .map(|(key, value)| {
                        vec![CellValue::Text(key.clone()), CellValue::Number(*value)]
                    })
                    .collect(),
                chart_recommended: group_count >= self.config.chart_min_groups
                    && group_count <= self.config.chart_max_groups,
                table_title: query.to_string(),
            })
        } else {
            contract.result.as_ref().map(|rows| {
                let width = rows.first().map(Vec::len).unwrap_or(0);
                let headers = if width == table.columns.len() {
                    table.columns.clone()
                } else {
                    (1..=width).map(|i| format!("col{}", i)).collect()
                };
                StructuredData {
                    headers,
                    rows: rows.clone(),
                    chart_recommended: false,
                    table_title: query.to_string(),
                }
            })
        };

        if matches!(intent, Intent::Highlight { .. }) && action_type == ActionType::None {
            action_type = ActionType::Highlight;
        }

        let resolved = highlight::resolve(&contract, query);
        let has_highlights = !resolved.rows.is_empty();

        let response_type = if structured_data.is_some() {
            "table"
        } else if has_highlights {
            "highlight"
        } else {
            "text"
        };

        AnalysisResponse {
            response_type: response_type.to_string(),
            summary,
            methodology,
            key_findings: contract.key_findings.clone(),
            confidence: contract.confidence,
            structured_data,
            highlight_rows: resolved.rows.clone(),
            highlight_color: has_highlights.then(|| resolved.color.clone()),
            highlight_message: resolved.message,
            action_type: action_type.as_str().to_string(),
        }
    }
}

/// FNV-1a fingerprint of `(query, column set)` for the classification
/// cache.
fn fingerprint(query: &str, columns: &[String]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET;
    let mut eat = |bytes: &[u8]| {
        for b in bytes {
            hash ^= u64::from(*b);
            hash = hash.wrapping_mul(PRIME);
        }
    };
    eat(query.as_bytes());
    eat(&[0xff]);
    for column in columns {
        eat(column.as_bytes());
        eat(&[0xfe]);
    }
    hash
}
