//! RiskHedge Backend Library
//!
//! Lifecycle engine for paired risk/hedge pools, exposed for the CLI and
//! integration tests.

pub mod config;
pub mod engine;
pub mod lifecycle;
pub mod simulation;

pub use engine::Engine;
