//! Shared venue types: orders, ids, fill reports.

use std::fmt;

use weightbook::{Money, Phase, Symbol};

/// Buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum VenueSide {
    Buy,
    Sell,
}

impl From<Phase> for VenueSide {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::Sell => VenueSide::Sell,
            Phase::Buy => VenueSide::Buy,
        }
    }
}

impl fmt::Display for VenueSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VenueSide::Buy => f.write_str("BUY"),
            VenueSide::Sell => f.write_str("SELL"),
        }
    }
}

/// Market order sized in account currency.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VenueOrder {
    /// Stable id chosen by the caller; the venue deduplicates on it.
    pub client_order_id: String,
    pub symbol: Symbol,
    pub side: VenueSide,
    /// Notional, always positive.
    pub size: Money,
}

/// Order id assigned by the venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VenueOrderId(pub u64);

impl fmt::Display for VenueOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Venue-side order state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FillState {
    /// Accepted, not done.
    Working,
    /// Done. `filled_size` may be below the order size if the rest expired.
    Filled,
    Cancelled,
    Rejected,
}

impl FillState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, FillState::Working)
    }
}

/// Answer to a fill query.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FillReport {
    pub id: VenueOrderId,
    pub state: FillState,
    pub filled_size: Money,
}
