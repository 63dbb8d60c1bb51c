//! Analysis pipeline (UI-agnostic).

pub mod aggregate;
pub mod classify;
pub mod highlight;
pub mod pipeline;
pub mod prompt;
pub mod request;
pub mod sanitize;

pub use aggregate::AggregationTable;
pub use classify::{AggregateOp, AggregationSpec, Intent};
pub use highlight::HighlightResult;
pub use pipeline::{Analyzer, CompletionProvider, FailingCompletion, ScriptedCompletion};
pub use request::{AnalysisRequest, AnalysisResponse, HistoryTurn, StructuredData};
