//! Restricted execution of untrusted generated scripts.
//!
//! The sandbox engine exposes only the whitelisted table builtins and the
//! pre-seeded contract scope. Imports and string-eval are disabled, and a
//! deadline is enforced through the engine's progress hook. Faults and
//! timeouts are captured at the eval boundary; partial scope state from a
//! failed run is discarded.

use rhai::module_resolvers::DummyModuleResolver;
use rhai::{Dynamic, Engine, EvalAltResult, Scope};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::contract::seed_scope;
use super::table::DataTable;

/// Operation cap as a second line of defense beside the wall-clock deadline.
const MAX_OPERATIONS: u64 = 5_000_000;
const MAX_CALL_LEVELS: usize = 32;

/// Why a sandbox run failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    Timeout,
    ScriptFault,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::ScriptFault => "script fault",
        }
    }
}

/// Outcome of one sandbox run. On success the post-execution scope is
/// handed to contract extraction; on failure nothing of the run survives.
pub enum RawExecutionOutcome {
    Completed(Scope<'static>),
    Failed { kind: FailureKind, message: String },
}

impl RawExecutionOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, RawExecutionOutcome::Failed { .. })
    }
}

/// Build the restricted engine: builtins registered, imports and eval
/// disabled, operation and recursion caps set, deadline wired in.
pub fn create_sandbox_engine(table: Arc<DataTable>, deadline: Instant) -> Engine {
    let mut engine = Engine::new();
    engine.set_module_resolver(DummyModuleResolver::new());
    engine.disable_symbol("eval");
    engine.set_max_operations(MAX_OPERATIONS);
    engine.set_max_call_levels(MAX_CALL_LEVELS);
    engine.on_progress(move |_ops| {
        if Instant::now() >= deadline {
            Some(Dynamic::from("deadline exceeded"))
        } else {
            None
        }
    });
    crate::builtins::register_builtins(&mut engine, table);
    engine
}

/// Execute an untrusted script against the table within `timeout`.
///
/// The scope is seeded with contract defaults before evaluation, so the
/// script may read any output variable before assigning it. Every runtime
/// fault is caught here; this function never panics on script content.
pub fn execute(script: &str, table: Arc<DataTable>, timeout: Duration) -> RawExecutionOutcome {
    let engine = create_sandbox_engine(table, Instant::now() + timeout);
    let mut scope = Scope::new();
    seed_scope(&mut scope);

    match engine.eval_with_scope::<Dynamic>(&mut scope, script) {
        Ok(_) => RawExecutionOutcome::Completed(scope),
        Err(err) => {
            let kind = match &*err {
                EvalAltResult::ErrorTerminated(..) => FailureKind::Timeout,
                EvalAltResult::ErrorTooManyOperations(..) => FailureKind::Timeout,
                _ => FailureKind::ScriptFault,
            };
            RawExecutionOutcome::Failed {
                kind,
                message: err.to_string(),
            }
        }
    }
}
