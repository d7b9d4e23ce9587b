//! Wall pricing and order-book upkeep for one pegged pair.
//!
//! [`PegMonitor`] turns feed consensus into wall prices and raises shift
//! requests on [`PegState`]; [`PegStrategyEngine`] keeps the orders on the
//! exchange in line with them. [`PegBot`] wires both to their timers.

pub mod config;
pub mod monitor;
pub mod pricing;
pub mod runner;
pub mod sinks;
pub mod state;
pub mod strategy;
pub mod types;

pub use config::PegConfig;
pub use monitor::{MonitorOutcome, MonitorSettings, PegMonitor};
pub use runner::{PegBot, PegHandle, Schedule, StatusBoard};
pub use sinks::{CsvReportSink, LogNotifier, Notifier, OrdersRecord, ReportSink, WallShiftRecord};
pub use state::PegState;
pub use strategy::{PegStrategyEngine, StrategySettings};
pub use types::{
    OrderBookSnapshot, PegStatus, PegView, PriceDirection, ShiftRequest, StrategyFlags,
    StrategyState, WallPrices,
};
