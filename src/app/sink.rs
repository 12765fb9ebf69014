//! JSON-lines output of completed flows

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::io::Write;
use std::sync::Arc;

use crate::capture::Flow;

/// Output shape of one completed flow
#[derive(Debug, Serialize)]
pub struct FlowRecord<'a> {
    pub token: &'a str,
    pub method: &'a str,
    pub route: &'a str,
    pub request_body: &'a str,
    pub response_body: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_plaintext: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_plaintext: Option<String>,
}

impl<'a> From<&'a Flow> for FlowRecord<'a> {
    fn from(flow: &'a Flow) -> Self {
        Self {
            token: &flow.token,
            method: &flow.method,
            route: &flow.route,
            request_body: &flow.request_body,
            response_body: flow.response_body.as_deref(),
            elapsed_ms: flow.elapsed().map(|d| d.num_milliseconds()),
            request_plaintext: flow.plaintext.as_ref().map(|p| p.request_text()),
            response_plaintext: flow.plaintext.as_ref().map(|p| p.response_text()),
        }
    }
}

/// Shared writer that every route observer appends to
pub struct FlowSink<W> {
    out: Arc<Mutex<W>>,
}

impl<W> Clone for FlowSink<W> {
    fn clone(&self) -> Self {
        Self {
            out: self.out.clone(),
        }
    }
}

impl<W: Write + Send + 'static> FlowSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Arc::new(Mutex::new(out)),
        }
    }

    /// Write one flow as a single JSON line
    pub fn write(&self, flow: &Flow) -> Result<()> {
        let line = serde_json::to_string(&FlowRecord::from(flow))
            .context("Failed to serialize flow")?;

        let mut out = self.out.lock();
        writeln!(out, "{}", line).context("Failed to write flow")?;
        out.flush().context("Failed to flush flow output")?;
        Ok(())
    }

    /// An observer that writes every flow it receives
    pub fn observer(&self) -> impl FnMut(&Flow) -> Result<()> + Send + 'static {
        let sink = self.clone();
        move |flow: &Flow| -> Result<()> { sink.write(flow) }
    }

    /// Run `f` with the underlying writer
    pub fn with_writer<T>(&self, f: impl FnOnce(&mut W) -> T) -> T {
        f(&mut self.out.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::FlowCorrelator;

    #[test]
    fn test_sink_writes_json_lines() {
        let sink = FlowSink::new(Vec::new());
        let mut correlator = FlowCorrelator::default();
        correlator.register("/user/get_bound_devices", "*", sink.observer());
        correlator.register("/device/bledevice_info", "*", sink.observer());

        for (token, route) in [("a", "/user/get_bound_devices"), ("b", "/device/bledevice_info")] {
            correlator
                .on_message(
                    &serde_json::json!({
                        "type": "request", "nonce": token, "method": "GET",
                        "route": route, "body": "Q0lQSEVS",
                    })
                    .to_string(),
                )
                .unwrap();
            correlator
                .on_message(
                    &serde_json::json!({ "type": "response", "nonce": token, "body": "UkVTVUxU" })
                        .to_string(),
                )
                .unwrap();
        }

        let output = sink.with_writer(|out| String::from_utf8(out.clone()).unwrap());
        let lines: Vec<serde_json::Value> = output
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["token"], "a");
        assert_eq!(lines[0]["request_body"], "Q0lQSEVS");
        assert_eq!(lines[1]["route"], "/device/bledevice_info");
        assert_eq!(lines[1]["response_body"], "UkVTVUxU");
        assert!(lines[1].get("request_plaintext").is_none());
    }
}
