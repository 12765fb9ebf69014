//! Request/response correlation and dispatch

use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::{CaptureEvent, Flow, FlowObserver, MethodMatch, ObserverRegistry};
use crate::crypto::SessionCipher;
use crate::error::CaptureError;

/// Correlator settings
#[derive(Debug, Clone, Default)]
pub struct CorrelatorConfig {
    /// Log every completed flow before dispatch
    pub verbose: bool,

    /// Evict open flows older than this (None keeps them forever)
    pub pending_ttl: Option<Duration>,

    /// Evict the oldest open flow once this many are pending
    pub max_pending: Option<usize>,

    /// Decrypt bodies on completion, using the token as the nonce.
    ///
    /// Only for sources that send ciphertext bodies. A source that hooks
    /// before encryption sends plaintext, and any of it that happens to be
    /// valid base64 would decrypt to garbage.
    pub decrypt_bodies: bool,

    /// Cipher used when `decrypt_bodies` is set
    pub cipher: SessionCipher,
}

/// Running counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CorrelatorStats {
    pub opened: u64,
    pub replaced: u64,
    pub completed: u64,
    pub dispatched: u64,
    pub unobserved: u64,
    pub orphaned: u64,
    pub malformed: u64,
    pub observer_failures: u64,
    pub evicted: u64,
}

/// What a single message did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A request opened a flow
    Opened { token: String, replaced: bool },

    /// A response completed a flow and an observer accepted it
    Dispatched {
        token: String,
        route: String,
        method: String,
        matched: MethodMatch,
    },

    /// A response completed a flow nobody observes
    Unobserved { token: String },
}

struct PendingFlow {
    flow: Flow,
    seen: Instant,
    /// Insertion order, for oldest-first eviction
    seq: u64,
}

/// Pairs request and response messages by token and dispatches the
/// completed flow to the matching observer.
///
/// Not internally synchronized: one owner feeds it messages in order.
/// See [`spawn_correlator`](super::spawn_correlator) for the task that
/// owns one on behalf of many producers.
pub struct FlowCorrelator {
    config: CorrelatorConfig,
    pending: HashMap<String, PendingFlow>,
    observers: ObserverRegistry,
    stats: CorrelatorStats,
    next_seq: u64,
}

impl FlowCorrelator {
    pub fn new(config: CorrelatorConfig) -> Self {
        Self {
            config,
            pending: HashMap::new(),
            observers: ObserverRegistry::new(),
            stats: CorrelatorStats::default(),
            next_seq: 0,
        }
    }

    /// Register an observer for `(route, method)`; `"*"` or
    /// [`MethodMatch::Any`] registers the route's wildcard.
    pub fn register<O>(&mut self, route: &str, method: impl Into<MethodMatch>, observer: O)
    where
        O: FlowObserver + 'static,
    {
        let method = method.into();
        if self.observers.register(route, method.clone(), observer) {
            tracing::debug!("Replaced observer for {} {}", method, route);
        }
    }

    pub fn observers(&self) -> &ObserverRegistry {
        &self.observers
    }

    pub fn config(&self) -> &CorrelatorConfig {
        &self.config
    }

    pub fn stats(&self) -> CorrelatorStats {
        self.stats
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, token: &str) -> bool {
        self.pending.contains_key(token)
    }

    /// Ingest one raw capture message
    pub fn on_message(&mut self, raw: &str) -> Result<Outcome, CaptureError> {
        let event = match CaptureEvent::parse(raw) {
            Ok(event) => event,
            Err(e) => {
                self.stats.malformed += 1;
                tracing::warn!("Dropping capture message: {}", e);
                return Err(e);
            }
        };

        self.on_event(event)
    }

    /// Ingest an already-parsed capture event
    pub fn on_event(&mut self, event: CaptureEvent) -> Result<Outcome, CaptureError> {
        match event {
            CaptureEvent::Request {
                token,
                method,
                route,
                body,
                ssecurity,
            } => {
                let mut flow = Flow::open(&token, &method, &route, &body);
                flow.session_secret = ssecurity;
                Ok(self.open(flow))
            }
            CaptureEvent::Response {
                token,
                body,
                ssecurity,
            } => self.complete(token, body, ssecurity),
        }
    }

    fn open(&mut self, flow: Flow) -> Outcome {
        if let Some(limit) = self.config.max_pending {
            if !self.pending.contains_key(&flow.token) && self.pending.len() >= limit {
                self.evict_oldest();
            }
        }

        let token = flow.token.clone();
        let seq = self.next_seq;
        self.next_seq += 1;
        tracing::trace!("Opened flow {}: {} {}", token, flow.method, flow.route);

        let replaced = self
            .pending
            .insert(
                token.clone(),
                PendingFlow {
                    flow,
                    seen: Instant::now(),
                    seq,
                },
            )
            .is_some();

        self.stats.opened += 1;
        if replaced {
            self.stats.replaced += 1;
            tracing::debug!("Token {} reused before its response; replacing open flow", token);
        }

        Outcome::Opened { token, replaced }
    }

    fn complete(
        &mut self,
        token: String,
        body: String,
        ssecurity: Option<String>,
    ) -> Result<Outcome, CaptureError> {
        let Some(PendingFlow { mut flow, .. }) = self.pending.remove(&token) else {
            self.stats.orphaned += 1;
            tracing::warn!("Response for unknown token {}", token);
            return Err(CaptureError::UnknownToken { token });
        };

        flow.complete(body, ssecurity);
        self.stats.completed += 1;

        if self.config.decrypt_bodies {
            match flow.decrypt_bodies(&self.config.cipher, &flow.token) {
                Ok(plaintext) => flow.plaintext = Some(plaintext),
                Err(e) => tracing::warn!("Could not decrypt flow {}: {}", flow.token, e),
            }
        }

        if self.config.verbose {
            tracing::info!(
                token = %flow.token,
                method = %flow.method,
                route = %flow.route,
                request_body = %flow.request_body,
                response_body = flow.response_body.as_deref().unwrap_or(""),
                "Completed flow"
            );
        }

        self.dispatch(flow)
    }

    fn dispatch(&mut self, flow: Flow) -> Result<Outcome, CaptureError> {
        let Some((matched, observer)) = self.observers.resolve_mut(&flow.route, &flow.method)
        else {
            self.stats.unobserved += 1;
            tracing::debug!("No observer for {} {}", flow.method, flow.route);
            return Ok(Outcome::Unobserved { token: flow.token });
        };

        match observer.on_flow(&flow) {
            Ok(()) => {
                self.stats.dispatched += 1;
                Ok(Outcome::Dispatched {
                    token: flow.token,
                    route: flow.route,
                    method: flow.method,
                    matched,
                })
            }
            Err(e) => {
                self.stats.observer_failures += 1;
                tracing::warn!("Observer for {} {} failed: {:#}", flow.method, flow.route, e);
                Err(CaptureError::Observer {
                    route: flow.route,
                    method: flow.method,
                    source: e.into(),
                })
            }
        }
    }

    /// Drop open flows older than the configured TTL. Returns how many
    /// were evicted.
    pub fn sweep_expired(&mut self, now: Instant) -> usize {
        let Some(ttl) = self.config.pending_ttl else {
            return 0;
        };

        let before = self.pending.len();
        self.pending.retain(|token, pending| {
            let alive = now.saturating_duration_since(pending.seen) < ttl;
            if !alive {
                tracing::warn!(
                    "Evicting flow {} ({} {}): no response within {:?}",
                    token,
                    pending.flow.method,
                    pending.flow.route,
                    ttl
                );
            }
            alive
        });

        let evicted = before - self.pending.len();
        self.stats.evicted += evicted as u64;
        evicted
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .pending
            .iter()
            .min_by_key(|(_, pending)| pending.seq)
            .map(|(token, _)| token.clone());

        if let Some(token) = oldest {
            self.pending.remove(&token);
            self.stats.evicted += 1;
            tracing::warn!("Pending table full; evicting oldest flow {}", token);
        }
    }
}

impl Default for FlowCorrelator {
    fn default() -> Self {
        Self::new(CorrelatorConfig::default())
    }
}
