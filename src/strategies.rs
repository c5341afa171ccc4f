//! Representative strategies exercising the [`crate::backtest::strategy::Strategy`]
//! contract (spec §4.12). Their exact formulations are illustrative; the
//! contract is what the engine depends on.

pub mod low_pe_momentum;
pub mod red_line;
