//! Device command dispatch
//!
//! Turns "invoke function F on device or group D" into a correlated exchange
//! over an asynchronous command/response transport, with deduplicated batches
//! and coalesced last-value lookups.

pub mod command;
pub mod config;
pub mod error;
pub mod marshal;
pub mod metadata;
pub mod timeseries;
pub mod transport;

#[cfg(test)]
mod testing;

pub use command::{
    BatchResultElement, CommandMessage, CommandService, CorrelationRegister, DeviceCommandRequest,
    GroupCommandRequest,
};
pub use config::DispatchConfig;
pub use error::{CommandError, CommandResponse};
