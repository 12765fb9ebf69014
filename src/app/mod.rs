//! Application core module
//!
//! Configuration and the wiring between the capture source, the
//! correlator and the flow sink.

mod config;
mod sink;

pub use config::{
    Config, CorrelatorSettings, CryptoConfig, GeneralConfig, ObserverConfig, DEFAULT_ROUTES,
};
pub use sink::{FlowRecord, FlowSink};
