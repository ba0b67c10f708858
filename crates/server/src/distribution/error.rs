//! Distribution protocol errors

use thiserror::Error;

/// Errors answered to a distribution client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DistributionError {
    /// Channel name does not match `book:<PAIR>`, `trades:<PAIR>` or `orders:<USER_ID>`
    #[error("Invalid channel: {0}")]
    InvalidChannel(String),

    /// Channel belongs to another user, or requires authentication
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Token rejected; the connection is closed
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// Malformed frame, unknown message type or a broken limit
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl DistributionError {
    /// Close the connection right away instead of counting a violation
    pub fn is_fatal(&self) -> bool {
        matches!(self, DistributionError::AuthFailed(_))
    }
}
