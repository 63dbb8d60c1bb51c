//! Script sandbox API.
//!
//! This module provides the restricted execution environment for untrusted
//! generated scripts:
//!
//! - [`CellValue`], [`DataTable`] - Tabular data shared with the sandbox
//! - [`parse_number`] - Locale-tolerant numeric parsing
//! - [`ExecutionContract`] - The defaulted output contract
//! - [`seed_scope`] / [`extract_contract`] - Contract seeding and enforcement
//! - [`execute`] - Run a script with allow-listed builtins and a deadline

mod contract;
mod exec;
pub(crate) mod table;

pub use contract::{
    ActionType, DEFAULT_CONFIDENCE, ExecutionContract, extract_contract, normalize_labels,
    seed_scope,
};
pub use exec::{FailureKind, RawExecutionOutcome, create_sandbox_engine, execute};
pub use table::{CellValue, DataTable, cells_equal, parse_number};

pub use rhai::{Dynamic, Scope};
