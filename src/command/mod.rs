//! Command dispatch and correlation
//!
//! This module handles:
//! - Matching asynchronous responses to waiting callers by correlation id
//! - Coalescing concurrent last-value lookups into one time-series query
//! - Single-device command orchestration (live dispatch or last value)
//! - Group fan-out with partial-failure aggregation
//! - Deduplicated batch execution

mod batch;
mod coalescer;
mod device;
mod group;
mod register;
mod response;
mod service;

pub use batch::{BatchResultElement, CommandMessage, DedupKey};
pub use coalescer::{EventBatch, Participant};
pub use device::DeviceCommandRequest;
pub use group::{GroupCommandRequest, SubCommand};
pub use register::{CorrelationRegister, UNREGISTERED};
pub use response::{spawn_response_workers, ResponseHandler};
pub use service::CommandService;
