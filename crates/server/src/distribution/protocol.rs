//! Wire protocol of the distribution server
//!
//! Every frame is a JSON object tagged by `"type"`. Client frames are
//! parsed into [`ClientMessage`] at the boundary; nothing untyped travels
//! further in.

use chrono::{DateTime, Utc};
use common::UserId;
use serde::{Deserialize, Serialize};

use super::channel::Channel;
use super::error::DistributionError;

/// Frames a client may send
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Auth { token: String },
    /// Channel names are validated after parsing so each bad name can be reported
    Subscribe { channels: Vec<String> },
    Unsubscribe { channels: Vec<String> },
    Ping,
    Pong,
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, DistributionError> {
        serde_json::from_str(text).map_err(|e| DistributionError::Protocol(format!("malformed message: {}", e)))
    }
}

/// Frames the server sends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Authenticated {
        user_id: UserId,
    },
    Subscribed {
        channels: Vec<Channel>,
    },
    Unsubscribed {
        channels: Vec<Channel>,
    },
    Update {
        channel: Channel,
        payload: serde_json::Value,
        timestamp: DateTime<Utc>,
    },
    Error {
        message: String,
    },
    Ping,
    Pong,
}

impl ServerMessage {
    pub fn update(channel: Channel, payload: serde_json::Value) -> Self {
        ServerMessage::Update {
            channel,
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn error(err: &DistributionError) -> Self {
        ServerMessage::Error {
            message: err.to_string(),
        }
    }
}
