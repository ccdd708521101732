//! Venue error types.

use crate::types::VenueOrderId;

/// Errors that can occur during venue operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VenueError {
    /// The venue refused the order (size below lot minimum, unknown symbol...).
    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("market is closed")]
    MarketClosed,

    #[error("unknown order {0}")]
    UnknownOrder(VenueOrderId),

    #[error("venue unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Other(String),
}

impl VenueError {
    /// True when the venue saw and refused the order itself.
    pub fn is_rejection(&self) -> bool {
        matches!(self, VenueError::Rejected(_) | VenueError::MarketClosed)
    }
}
