//! Scenario-based tests for capsule-builder

mod helpers;

mod build_flow;
mod cancellation;
mod compiler_contract;
mod config_file;
mod determinism;
mod hooks;
mod ordering;
mod timeouts;
