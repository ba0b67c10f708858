//! Distribution hub
//!
//! Owns the connection and subscription tables and turns engine events
//! into channel updates. The WebSocket transport only moves frames; every
//! protocol decision is made here.
//!
//! CRITICAL PROPERTIES:
//! - A broadcast is encoded once and shared by every receiver
//! - A full outbound queue drops the connection, never the broadcast
//! - `orders:<USER_ID>` is only readable by that authenticated user

use common::UserId;
use matching_engine::{EngineEvent, Exchange};
use observability::DistributionMetrics;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::auth::JwtAuthenticator;
use super::channel::Channel;
use super::error::DistributionError;
use super::protocol::{ClientMessage, ServerMessage};
use super::registry::{ConnectionId, ConnectionState, Delivery, Outbound, SubscriptionRegistry};

/// Handle returned to the transport for a new connection
#[derive(Debug)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    /// Frames to write to the socket, in order
    pub outbound: mpsc::Receiver<Outbound>,
    /// Cancelled when the hub drops the connection
    pub cancel: CancellationToken,
}

/// Outcome of one liveness sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub probed: usize,
    pub closed: usize,
}

pub struct DistributionHub {
    exchange: Arc<Exchange>,
    registry: SubscriptionRegistry,
    auth: JwtAuthenticator,
    config: ::config::DistributionConfig,
    metrics: DistributionMetrics,
    next_id: AtomicU64,
}

impl DistributionHub {
    pub fn new(exchange: Arc<Exchange>, config: ::config::DistributionConfig) -> Self {
        if config.auth.jwt_secret.is_empty() {
            warn!("No JWT secret configured; private order channels are unavailable");
        }
        Self {
            exchange,
            registry: SubscriptionRegistry::new(),
            auth: JwtAuthenticator::new(&config.auth),
            config,
            metrics: DistributionMetrics::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &::config::DistributionConfig {
        &self.config
    }

    pub fn connection_count(&self) -> usize {
        self.registry.connection_count()
    }

    pub fn subscribers(&self, channel: &Channel) -> Vec<ConnectionId> {
        self.registry.subscribers(channel)
    }

    // ========================================================================
    // Connection lifecycle
    // ========================================================================

    /// Register a connection; its token is a child of `parent`
    pub fn connect(&self, peer_addr: SocketAddr, parent: &CancellationToken) -> ConnectionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.config.outbound_buffer.max(1));
        let cancel = parent.child_token();
        let now = Instant::now();

        self.registry.insert(ConnectionState {
            id,
            peer_addr,
            user: None,
            channels: HashSet::new(),
            last_seen: now,
            connected_at: now,
            violations: 0,
            outbound: tx,
            cancel: cancel.clone(),
        });
        self.metrics.connection_opened();
        debug!(connection_id = id, peer = %peer_addr, "Distribution client connected");

        ConnectionHandle {
            id,
            outbound: rx,
            cancel,
        }
    }

    /// Forget a connection; calling it twice is harmless
    pub fn disconnect(&self, id: ConnectionId) {
        if let Some(state) = self.registry.remove(id) {
            self.metrics.connection_closed();
            debug!(
                connection_id = id,
                peer = %state.peer_addr,
                subscriptions = state.channels.len(),
                connected_for_ms = state.connected_at.elapsed().as_millis() as u64,
                "Distribution client disconnected"
            );
        }
    }

    /// Tear a connection down without waiting for its writer
    fn drop_connection(&self, id: ConnectionId, reason: &str) {
        if let Some(token) = self.registry.cancel_token(id) {
            token.cancel();
        }
        info!(connection_id = id, reason, "Dropping distribution client");
        self.disconnect(id);
    }

    /// Record inbound activity
    pub fn touch(&self, id: ConnectionId) {
        self.registry.touch(id, Instant::now());
    }

    // ========================================================================
    // Inbound frames
    // ========================================================================

    /// Handle one text frame from a client
    pub async fn handle_text(&self, id: ConnectionId, text: &str) {
        self.touch(id);
        let message = match ClientMessage::parse(text) {
            Ok(message) => message,
            Err(e) => return self.reject(id, e),
        };

        match message {
            ClientMessage::Auth { token } => match self.authenticate(id, &token) {
                Ok(user_id) => self.send(id, &ServerMessage::Authenticated { user_id }),
                Err(e) => self.reject(id, e),
            },
            ClientMessage::Subscribe { channels } => self.subscribe(id, &channels).await,
            ClientMessage::Unsubscribe { channels } => self.unsubscribe(id, &channels),
            ClientMessage::Ping => self.send(id, &ServerMessage::Pong),
            ClientMessage::Pong => {}
        }
    }

    /// Report an error to the client and apply the violation policy
    pub fn reject(&self, id: ConnectionId, err: DistributionError) {
        self.send(id, &ServerMessage::error(&err));

        if err.is_fatal() {
            self.metrics.auth_failed();
            warn!(connection_id = id, error = %err, "Closing distribution client");
            self.registry.deliver(
                id,
                Outbound::Close {
                    reason: "authentication failed".to_string(),
                },
            );
            return;
        }

        self.metrics.protocol_violation();
        let violations = self.registry.record_violation(id);
        debug!(connection_id = id, violations, error = %err, "Protocol violation");
        if violations >= self.config.max_protocol_violations {
            warn!(connection_id = id, violations, "Too many protocol violations");
            self.registry.deliver(
                id,
                Outbound::Close {
                    reason: "too many protocol violations".to_string(),
                },
            );
        }
    }

    /// Bind a user identity to the connection
    pub fn authenticate(&self, id: ConnectionId, token: &str) -> Result<UserId, DistributionError> {
        if self.registry.user(id).is_some() {
            return Err(DistributionError::Protocol("already authenticated".to_string()));
        }
        let user_id = self.auth.authenticate(token)?;
        self.registry.set_user(id, user_id.clone());
        info!(connection_id = id, user_id = %user_id, "Distribution client authenticated");
        Ok(user_id)
    }

    /// Check that a channel may be subscribed by this connection
    fn authorize(&self, id: ConnectionId, channel: &Channel) -> Result<(), DistributionError> {
        if let Some(pair) = channel.pair() {
            if self.exchange.pair(pair).is_err() {
                return Err(DistributionError::InvalidChannel(format!("{} (unknown pair)", channel)));
            }
        }
        if let Some(owner) = channel.owner() {
            match self.registry.user(id) {
                Some(user) if &user == owner => {}
                Some(_) => return Err(DistributionError::Unauthorized(channel.to_string())),
                None => {
                    return Err(DistributionError::Unauthorized(format!(
                        "{} requires authentication",
                        channel
                    )))
                }
            }
        }
        Ok(())
    }

    /// Subscribe to every valid name; each rejected name is answered separately
    pub async fn subscribe(&self, id: ConnectionId, names: &[String]) {
        let mut added = Vec::new();
        for name in names {
            let channel = match name.parse::<Channel>() {
                Ok(channel) => channel,
                Err(e) => {
                    self.reject(id, e);
                    continue;
                }
            };
            if let Err(e) = self.authorize(id, &channel) {
                self.reject(id, e);
                continue;
            }
            if self.registry.subscription_count(id) >= self.config.max_subscriptions {
                self.reject(
                    id,
                    DistributionError::Protocol(format!(
                        "subscription limit of {} reached",
                        self.config.max_subscriptions
                    )),
                );
                break;
            }
            if self.registry.subscribe(id, channel.clone()) {
                added.push(channel);
            }
        }

        if added.is_empty() {
            return;
        }
        debug!(connection_id = id, channels = added.len(), "Subscribed");
        self.send(
            id,
            &ServerMessage::Subscribed {
                channels: added.clone(),
            },
        );

        // New book subscribers start from the current snapshot
        for channel in added {
            if let Channel::Book(pair) = &channel {
                match self.exchange.get_book_snapshot(pair, None).await {
                    Ok(snapshot) => match serde_json::to_value(&snapshot) {
                        Ok(payload) => self.send(id, &ServerMessage::update(channel.clone(), payload)),
                        Err(e) => error!(pair = %pair, error = %e, "Failed to encode book snapshot"),
                    },
                    Err(e) => warn!(pair = %pair, error = %e, "Failed to load initial book snapshot"),
                }
            }
        }
    }

    pub fn unsubscribe(&self, id: ConnectionId, names: &[String]) {
        let mut removed = Vec::new();
        for name in names {
            match name.parse::<Channel>() {
                Ok(channel) => {
                    if self.registry.unsubscribe(id, &channel) {
                        removed.push(channel);
                    }
                }
                Err(e) => self.reject(id, e),
            }
        }
        self.send(id, &ServerMessage::Unsubscribed { channels: removed });
    }

    // ========================================================================
    // Outbound
    // ========================================================================

    /// Serialize through a pooled buffer when one is free
    fn encode(&self, message: &ServerMessage) -> Option<Arc<str>> {
        let encoded = match self.exchange.pools().buffers.acquire() {
            Ok(mut buffer) => serde_json::to_writer(&mut *buffer, message)
                .map(|()| Arc::from(String::from_utf8_lossy(&buffer).as_ref())),
            Err(_) => serde_json::to_string(message).map(Arc::from),
        };
        match encoded {
            Ok(text) => Some(text),
            Err(e) => {
                error!(error = %e, "Failed to encode distribution message");
                None
            }
        }
    }

    fn send(&self, id: ConnectionId, message: &ServerMessage) {
        if let Some(text) = self.encode(message) {
            self.deliver(id, Outbound::Text(text));
        }
    }

    fn deliver(&self, id: ConnectionId, frame: Outbound) -> bool {
        match self.registry.deliver(id, frame) {
            Delivery::Queued => true,
            Delivery::Full => {
                self.metrics.slow_consumer_dropped();
                self.drop_connection(id, "slow consumer");
                false
            }
            Delivery::Gone => {
                self.disconnect(id);
                false
            }
        }
    }

    /// Fan a payload out to every subscriber of `channel`; returns the
    /// number of connections it was queued for
    pub fn broadcast(&self, channel: &Channel, payload: serde_json::Value) -> usize {
        let subscribers = self.registry.subscribers(channel);
        if subscribers.is_empty() {
            return 0;
        }

        let started = Instant::now();
        let Some(text) = self.encode(&ServerMessage::update(channel.clone(), payload)) else {
            return 0;
        };
        let delivered = subscribers
            .into_iter()
            .filter(|id| self.deliver(*id, Outbound::Text(Arc::clone(&text))))
            .count();

        self.metrics.messages_sent(channel.kind(), delivered as u64);
        self.metrics.record_broadcast(started.elapsed());
        delivered
    }

    // ========================================================================
    // Liveness
    // ========================================================================

    /// Drop connections silent past the timeout and probe the rest
    pub fn sweep(&self, now: Instant) -> SweepReport {
        let timeout = self.config.liveness_timeout();
        let mut report = SweepReport::default();
        let mut probe = None;

        for (id, last_seen) in self.registry.activity() {
            if now.saturating_duration_since(last_seen) > timeout {
                self.metrics.liveness_timeout();
                self.drop_connection(id, "liveness timeout");
                report.closed += 1;
                continue;
            }
            if probe.is_none() {
                probe = self.encode(&ServerMessage::Ping);
            }
            if let Some(text) = &probe {
                if self.deliver(id, Outbound::Text(Arc::clone(text))) {
                    report.probed += 1;
                }
            }
        }

        if report.closed > 0 {
            info!(closed = report.closed, probed = report.probed, "Liveness sweep");
        }
        report
    }

    // ========================================================================
    // Engine events
    // ========================================================================

    /// Map one engine event onto its channels
    pub async fn handle_event(&self, event: EngineEvent) {
        let kind = event.kind();
        match event {
            EngineEvent::TradeExecuted { trade } => {
                let channel = Channel::Trades(trade.pair.clone());
                match serde_json::to_value(&trade) {
                    Ok(payload) => {
                        self.broadcast(&channel, payload);
                    }
                    Err(e) => error!(error = %e, "Failed to encode trade"),
                }
            }
            EngineEvent::OrderAdded { order }
            | EngineEvent::OrderUpdated { order }
            | EngineEvent::OrderExpired { order } => {
                let channel = Channel::Orders(order.user_id.clone());
                if self.registry.has_subscribers(&channel) {
                    self.broadcast(&channel, serde_json::json!({ "event": kind, "order": order }));
                }
            }
            EngineEvent::BookChanged { pair, .. } => {
                let channel = Channel::Book(pair.clone());
                if !self.registry.has_subscribers(&channel) {
                    return;
                }
                match self.exchange.get_book_snapshot(&pair, None).await {
                    Ok(snapshot) => match serde_json::to_value(&snapshot) {
                        Ok(payload) => {
                            self.broadcast(&channel, payload);
                        }
                        Err(e) => error!(error = %e, "Failed to encode book snapshot"),
                    },
                    Err(e) => warn!(pair = %pair, error = %e, "Failed to load book snapshot"),
                }
            }
            EngineEvent::FinalityAdvanced { .. } => {}
        }
    }

    /// Start the liveness sweeper and the event pump
    pub fn spawn_background(self: &Arc<Self>, token: CancellationToken) -> Vec<JoinHandle<()>> {
        let sweeper = {
            let hub = Arc::clone(self);
            let token = token.clone();
            let period = self.config.ping_interval();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = interval.tick() => {
                            hub.sweep(Instant::now());
                        }
                    }
                }
                debug!("Liveness sweeper stopped");
            })
        };

        let pump = {
            let hub = Arc::clone(self);
            let mut events = self.exchange.subscribe_events();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        event = events.recv() => match event {
                            Ok(event) => hub.handle_event(event).await,
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                warn!(skipped, "Distribution event pump lagged behind the engine");
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        },
                    }
                }
                debug!("Distribution event pump stopped");
            })
        };

        vec![sweeper, pump]
    }
}
