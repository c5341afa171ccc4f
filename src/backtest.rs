//! Event-driven backtest core (spec §4.10-§4.12): configuration,
//! portfolio execution, strategy contract, engine loop, and result
//! analytics.

pub mod config;
pub mod engine;
pub mod portfolio;
pub mod result;
pub mod strategy;
