//! Real-time distribution of book, trade and order events
//!
//! - [`channel`] - closed channel grammar
//! - [`protocol`] - client and server frames
//! - [`auth`] - JWT verification
//! - [`registry`] - connection and subscription tables
//! - [`hub`] - protocol handling, fan-out and liveness

pub mod auth;
pub mod channel;
pub mod error;
pub mod hub;
pub mod protocol;
pub mod registry;

pub use auth::{issue_token, Claims, JwtAuthenticator};
pub use channel::Channel;
pub use error::DistributionError;
pub use hub::{ConnectionHandle, DistributionHub, SweepReport};
pub use protocol::{ClientMessage, ServerMessage};
pub use registry::{ConnectionId, ConnectionState, Delivery, Outbound, SubscriptionRegistry};
