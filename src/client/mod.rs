//! Venue clients: the shared HTTP request engine and the typed wrappers
//! built on top of it.

pub mod clob;
pub mod contract;
pub mod core;
pub mod gamma;
pub mod log_sink;

pub use clob::{ClobClient, OrderSide, OrderType, PriceSource, VenueOrderApi};
pub use contract::{ContractClient, ContractResult, DisabledContractClient};
pub use core::{ApiRequest, ApiResponse, ClientConfig, ClientCore, RateLimitConfig, RetryConfig};
pub use gamma::{GammaClient, ListParams};
pub use log_sink::{ApiLogRecord, LogSink, MemoryLogSink, MultiSink, NullSink, RotatingFileSink};
