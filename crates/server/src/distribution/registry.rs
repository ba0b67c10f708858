//! Connection and subscription tables
//!
//! Both tables are sharded maps. No method holds an entry of one table
//! while locking an entry of the other.

use common::UserId;
use dashmap::DashMap;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::channel::Channel;

/// A unique identifier for each connection
pub type ConnectionId = u64;

/// Frame queued for a connection's writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Encoded JSON frame, shared between all receivers of a broadcast
    Text(Arc<str>),
    /// Send a close frame and stop
    Close { reason: String },
}

/// Per-connection state
#[derive(Debug)]
pub struct ConnectionState {
    pub id: ConnectionId,
    pub peer_addr: SocketAddr,
    pub user: Option<UserId>,
    pub channels: HashSet<Channel>,
    pub last_seen: Instant,
    pub connected_at: Instant,
    pub violations: u32,
    pub outbound: mpsc::Sender<Outbound>,
    pub cancel: CancellationToken,
}

/// Result of delivering to one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// Outbound queue is full
    Full,
    /// Connection is gone
    Gone,
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    connections: DashMap<ConnectionId, ConnectionState>,
    channels: DashMap<Channel, HashSet<ConnectionId>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, state: ConnectionState) {
        self.connections.insert(state.id, state);
    }

    /// Remove a connection and all of its subscriptions
    pub fn remove(&self, id: ConnectionId) -> Option<ConnectionState> {
        let (_, state) = self.connections.remove(&id)?;
        for channel in &state.channels {
            self.drop_subscriber(channel, id);
        }
        Some(state)
    }

    fn drop_subscriber(&self, channel: &Channel, id: ConnectionId) {
        self.channels.remove_if_mut(channel, |_, subscribers| {
            subscribers.remove(&id);
            subscribers.is_empty()
        });
    }

    /// Add a subscription; returns false if it already existed
    pub fn subscribe(&self, id: ConnectionId, channel: Channel) -> bool {
        let added = match self.connections.get_mut(&id) {
            Some(mut state) => state.channels.insert(channel.clone()),
            None => return false,
        };
        if added {
            self.channels.entry(channel).or_default().insert(id);
        }
        added
    }

    /// Drop a subscription; returns false if it did not exist
    pub fn unsubscribe(&self, id: ConnectionId, channel: &Channel) -> bool {
        let removed = match self.connections.get_mut(&id) {
            Some(mut state) => state.channels.remove(channel),
            None => return false,
        };
        if removed {
            self.drop_subscriber(channel, id);
        }
        removed
    }

    pub fn subscribers(&self, channel: &Channel) -> Vec<ConnectionId> {
        self.channels
            .get(channel)
            .map(|subscribers| subscribers.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn has_subscribers(&self, channel: &Channel) -> bool {
        self.channels.contains_key(channel)
    }

    pub fn subscription_count(&self, id: ConnectionId) -> usize {
        self.connections.get(&id).map(|s| s.channels.len()).unwrap_or(0)
    }

    /// Queue a frame without waiting
    pub fn deliver(&self, id: ConnectionId, frame: Outbound) -> Delivery {
        let Some(state) = self.connections.get(&id) else {
            return Delivery::Gone;
        };
        match state.outbound.try_send(frame) {
            Ok(()) => Delivery::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Gone,
        }
    }

    pub fn touch(&self, id: ConnectionId, now: Instant) {
        if let Some(mut state) = self.connections.get_mut(&id) {
            state.last_seen = now;
        }
    }

    pub fn user(&self, id: ConnectionId) -> Option<UserId> {
        self.connections.get(&id).and_then(|s| s.user.clone())
    }

    pub fn set_user(&self, id: ConnectionId, user: UserId) {
        if let Some(mut state) = self.connections.get_mut(&id) {
            state.user = Some(user);
        }
    }

    /// Count a protocol violation; returns the new total
    pub fn record_violation(&self, id: ConnectionId) -> u32 {
        match self.connections.get_mut(&id) {
            Some(mut state) => {
                state.violations += 1;
                state.violations
            }
            None => 0,
        }
    }

    pub fn cancel_token(&self, id: ConnectionId) -> Option<CancellationToken> {
        self.connections.get(&id).map(|s| s.cancel.clone())
    }

    /// Ids and last activity of every connection
    pub fn activity(&self) -> Vec<(ConnectionId, Instant)> {
        self.connections.iter().map(|s| (s.id, s.last_seen)).collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(id: ConnectionId) -> (ConnectionState, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(1);
        let now = Instant::now();
        (
            ConnectionState {
                id,
                peer_addr: "127.0.0.1:1".parse().unwrap(),
                user: None,
                channels: HashSet::new(),
                last_seen: now,
                connected_at: now,
                violations: 0,
                outbound: tx,
                cancel: CancellationToken::new(),
            },
            rx,
        )
    }

    fn book() -> Channel {
        "book:BTC-USDT".parse().unwrap()
    }

    #[test]
    fn test_subscribe_and_remove() {
        let registry = SubscriptionRegistry::new();
        let (a, _ra) = state(1);
        let (b, _rb) = state(2);
        registry.insert(a);
        registry.insert(b);

        assert!(registry.subscribe(1, book()));
        assert!(!registry.subscribe(1, book()));
        assert!(registry.subscribe(2, book()));
        let mut subs = registry.subscribers(&book());
        subs.sort();
        assert_eq!(subs, vec![1, 2]);

        registry.remove(1);
        assert_eq!(registry.subscribers(&book()), vec![2]);
        assert!(registry.unsubscribe(2, &book()));
        assert!(!registry.has_subscribers(&book()));
        assert_eq!(registry.channel_count(), 0);
    }

    #[test]
    fn test_unknown_connection_is_ignored() {
        let registry = SubscriptionRegistry::new();
        assert!(!registry.subscribe(9, book()));
        assert_eq!(registry.deliver(9, Outbound::Text("x".into())), Delivery::Gone);
        assert_eq!(registry.record_violation(9), 0);
    }

    #[test]
    fn test_delivery_reports_full_queue() {
        let registry = SubscriptionRegistry::new();
        let (a, mut rx) = state(1);
        registry.insert(a);

        assert_eq!(registry.deliver(1, Outbound::Text("one".into())), Delivery::Queued);
        assert_eq!(registry.deliver(1, Outbound::Text("two".into())), Delivery::Full);
        assert_eq!(rx.try_recv().unwrap(), Outbound::Text("one".into()));

        drop(rx);
        assert_eq!(registry.deliver(1, Outbound::Text("three".into())), Delivery::Gone);
    }
}
