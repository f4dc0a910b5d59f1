//! Shared domain primitives for the spider job orchestrator.
//!
//! This crate has no I/O. It holds the pieces every other crate agrees
//! on: identifier rules, the execution-unit naming convention, the
//! lifecycle command type, and the domain error enum.

pub mod commands;
pub mod error;
pub mod naming;
pub mod types;
