//! Single-owner ingestion task
//!
//! Capture sources may run on any number of tasks or threads; they all
//! feed one channel, and one task owns the correlator, so the pending
//! and observer tables are only ever touched from that task.

use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::FlowCorrelator;
use crate::error::CaptureError;

/// Handle for pushing raw capture messages into the correlator task
#[derive(Debug, Clone)]
pub struct CaptureSender {
    tx: mpsc::Sender<String>,
}

impl CaptureSender {
    /// Queue a message, waiting for channel capacity
    pub async fn send(&self, raw: impl Into<String>) -> Result<(), CaptureError> {
        self.tx
            .send(raw.into())
            .await
            .map_err(|_| CaptureError::Closed)
    }

    /// Queue a message from a non-async thread
    pub fn blocking_send(&self, raw: impl Into<String>) -> Result<(), CaptureError> {
        self.tx
            .blocking_send(raw.into())
            .map_err(|_| CaptureError::Closed)
    }
}

/// Move `correlator` onto its own task.
///
/// The task ends when every [`CaptureSender`] is dropped or when
/// `shutdown` fires; in both cases messages already queued are processed
/// first. The correlator is handed back through the join handle.
pub fn spawn_correlator(
    mut correlator: FlowCorrelator,
    capacity: usize,
    mut shutdown: broadcast::Receiver<()>,
) -> (CaptureSender, JoinHandle<FlowCorrelator>) {
    let (tx, mut rx) = mpsc::channel::<String>(capacity.max(1));

    let ttl = correlator.config().pending_ttl;
    let sweep_period = ttl
        .map(|ttl| (ttl / 2).max(Duration::from_secs(1)))
        .unwrap_or(Duration::from_secs(60));

    let handle = tokio::spawn(async move {
        let mut sweep = tokio::time::interval(sweep_period);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    tracing::info!("Shutdown requested, draining capture queue");
                    rx.close();
                    while let Some(raw) = rx.recv().await {
                        ingest(&mut correlator, &raw);
                    }
                    break;
                }
                message = rx.recv() => match message {
                    Some(raw) => ingest(&mut correlator, &raw),
                    None => break,
                },
                _ = sweep.tick(), if ttl.is_some() => {
                    let evicted = correlator.sweep_expired(Instant::now());
                    if evicted > 0 {
                        tracing::debug!("Swept {} expired flows", evicted);
                    }
                }
            }
        }

        if correlator.pending_len() > 0 {
            tracing::info!(
                "Correlator stopped with {} flows still awaiting a response",
                correlator.pending_len()
            );
        }

        correlator
    });

    (CaptureSender { tx }, handle)
}

fn ingest(correlator: &mut FlowCorrelator, raw: &str) {
    // The correlator already logs each failure at the right level
    if let Err(e) = correlator.on_message(raw) {
        tracing::trace!("Message not dispatched: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Flow;
    use std::sync::{Arc, Mutex};

    fn correlator_with_recorder(seen: &Arc<Mutex<Vec<String>>>) -> FlowCorrelator {
        let seen = seen.clone();
        let mut correlator = FlowCorrelator::default();
        correlator.register("/r", "*", move |flow: &Flow| -> anyhow::Result<()> {
            seen.lock().unwrap().push(flow.token.clone());
            Ok(())
        });
        correlator
    }

    #[tokio::test]
    async fn test_worker_correlates_until_senders_drop() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let (sender, handle) = spawn_correlator(correlator_with_recorder(&seen), 8, shutdown_rx);

        sender
            .send(r#"{"type":"request","nonce":"a","method":"GET","route":"/r","body":""}"#)
            .await
            .unwrap();
        sender.send("garbage").await.unwrap();
        sender
            .send(r#"{"type":"response","nonce":"a","body":"ok"}"#)
            .await
            .unwrap();
        drop(sender);

        let correlator = handle.await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["a".to_string()]);
        assert_eq!(correlator.stats().dispatched, 1);
        assert_eq!(correlator.stats().malformed, 1);
    }

    #[tokio::test]
    async fn test_worker_drains_on_shutdown() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let (sender, handle) = spawn_correlator(correlator_with_recorder(&seen), 16, shutdown_rx);

        for token in ["x", "y"] {
            sender
                .send(format!(
                    r#"{{"type":"request","nonce":"{}","method":"POST","route":"/r","body":""}}"#,
                    token
                ))
                .await
                .unwrap();
            sender
                .send(format!(r#"{{"type":"response","nonce":"{}","body":""}}"#, token))
                .await
                .unwrap();
        }
        sender
            .send(r#"{"type":"request","nonce":"z","method":"GET","route":"/r","body":""}"#)
            .await
            .unwrap();

        shutdown_tx.send(()).unwrap();
        let correlator = handle.await.unwrap();

        assert_eq!(correlator.stats().dispatched, 2);
        assert_eq!(correlator.pending_len(), 1);
        assert!(sender.send("late").await.is_err());
    }

    #[tokio::test]
    async fn test_worker_accepts_many_producers() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let (sender, handle) = spawn_correlator(correlator_with_recorder(&seen), 4, shutdown_rx);

        let mut producers = Vec::new();
        for i in 0..8 {
            let sender = sender.clone();
            producers.push(tokio::spawn(async move {
                let token = format!("t{}", i);
                sender
                    .send(format!(
                        r#"{{"type":"request","nonce":"{}","method":"GET","route":"/r","body":""}}"#,
                        token
                    ))
                    .await
                    .unwrap();
                sender
                    .send(format!(r#"{{"type":"response","nonce":"{}","body":""}}"#, token))
                    .await
                    .unwrap();
            }));
        }
        for producer in producers {
            producer.await.unwrap();
        }
        drop(sender);

        let correlator = handle.await.unwrap();
        assert_eq!(correlator.stats().dispatched, 8);
        assert_eq!(seen.lock().unwrap().len(), 8);
    }
}
