//! sheetsense_engine - Script sandbox + Rhai integration.

pub mod builtins;
pub mod sandbox;
