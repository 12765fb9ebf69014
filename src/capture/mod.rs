//! Flow capture and correlation
//!
//! Consumes the request/response messages emitted by the in-process
//! capture script, pairs them by correlation token and hands each
//! completed flow to the observer registered for its route and method.

mod correlator;
mod event;
mod flow;
mod observer;
mod worker;

pub use correlator::{CorrelatorConfig, CorrelatorStats, FlowCorrelator, Outcome};
pub use event::{CaptureEvent, EventKind};
pub use flow::Flow;
pub use observer::{FlowObserver, MethodMatch, ObserverRegistry, WILDCARD_METHOD};
pub use worker::{spawn_correlator, CaptureSender};
