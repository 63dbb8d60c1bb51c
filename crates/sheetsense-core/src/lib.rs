//! sheetsense-core - Natural-language spreadsheet analysis pipeline.

pub mod analysis;
pub mod config;
pub mod error;

pub use analysis::{Analyzer, AnalysisRequest, AnalysisResponse};
pub use config::AnalysisConfig;
pub use error::{AnalysisError, CompletionError, Result};

pub use sheetsense_engine::sandbox::{ActionType, CellValue, ExecutionContract};
