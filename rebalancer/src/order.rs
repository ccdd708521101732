//! Per-order state machine.
//!
//! ```text
//! PENDING ──submit──▶ SUBMITTED ──fill──▶ FILLED
//!    │                   │  │
//!    │ reject            │  └──timeout──▶ TIMED_OUT ──fill──▶ FILLED
//!    ▼                   ▼                    │
//! REJECTED           CANCELLING ◀──cancel─────┘
//!                        │
//!                        ▼
//!                    CANCELLED
//! ```
//!
//! Orders are keyed by `(batch, symbol, phase)`; the key doubles as the
//! client order id the venue deduplicates on.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use weightbook::{Money, Phase, Symbol};
use weightbook_venue::{FillReport, FillState, VenueOrder, VenueOrderId, VenueSide};

use crate::batch::BatchId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    Pending,
    Submitted,
    Filled,
    Rejected,
    /// No confirmation within the bound; may still be working at the venue.
    TimedOut,
    Cancelling,
    Cancelled,
}

impl OrderState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderState::Filled | OrderState::Rejected | OrderState::Cancelled)
    }

    /// Possibly working at the venue.
    pub fn is_live(&self) -> bool {
        matches!(self, OrderState::Submitted | OrderState::TimedOut | OrderState::Cancelling)
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderState::Pending => "PENDING",
            OrderState::Submitted => "SUBMITTED",
            OrderState::Filled => "FILLED",
            OrderState::Rejected => "REJECTED",
            OrderState::TimedOut => "TIMED_OUT",
            OrderState::Cancelling => "CANCELLING",
            OrderState::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// Stable identity of an order within its batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderKey {
    pub batch: BatchId,
    pub symbol: Symbol,
    pub phase: Phase,
}

impl OrderKey {
    /// Client order id sent to the venue, e.g. `B3-sell-AAPL`.
    pub fn client_order_id(&self) -> String {
        format!("{}-{}-{}", self.batch, self.phase, self.symbol.as_str())
    }
}

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.client_order_id())
    }
}

/// Something that happened to an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderEvent {
    /// Claimed for submission.
    Submit,
    /// The venue accepted it under this id.
    Ack(VenueOrderId),
    /// Terminal fill of the given notional.
    Fill(Money),
    Reject(String),
    Timeout,
    /// The venue refused because the market closed; nothing was placed.
    MarketClosed,
    Cancel,
    /// Cancel confirmed; carries any notional filled before it.
    Cancelled(Money),
}

impl fmt::Display for OrderEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderEvent::Submit => f.write_str("submit"),
            OrderEvent::Ack(id) => write!(f, "ack {id}"),
            OrderEvent::Fill(size) => write!(f, "fill {size}"),
            OrderEvent::Reject(reason) => write!(f, "reject ({reason})"),
            OrderEvent::Timeout => f.write_str("timeout"),
            OrderEvent::MarketClosed => f.write_str("market closed"),
            OrderEvent::Cancel => f.write_str("cancel"),
            OrderEvent::Cancelled(size) => write!(f, "cancelled after {size}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("order {key}: {event} not allowed in state {from}")]
pub struct TransitionError {
    pub key: OrderKey,
    pub from: OrderState,
    pub event: OrderEvent,
}

/// One venue order of an execution batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub key: OrderKey,
    /// Notional to trade, always positive.
    pub size: Money,
    pub state: OrderState,
    pub venue_id: Option<VenueOrderId>,
    /// Notional actually executed.
    pub filled: Money,
    pub reason: Option<String>,
}

impl Order {
    pub fn new(key: OrderKey, size: Money) -> Self {
        Self {
            key,
            size,
            state: OrderState::Pending,
            venue_id: None,
            filled: Decimal::ZERO,
            reason: None,
        }
    }

    pub fn symbol(&self) -> Symbol {
        self.key.symbol
    }

    pub fn phase(&self) -> Phase {
        self.key.phase
    }

    pub fn side(&self) -> VenueSide {
        self.key.phase.into()
    }

    /// Executed notional with sign: sells negative.
    pub fn signed_fill(&self) -> Money {
        match self.key.phase {
            Phase::Sell => -self.filled,
            Phase::Buy => self.filled,
        }
    }

    pub fn to_venue(&self) -> VenueOrder {
        VenueOrder {
            client_order_id: self.key.client_order_id(),
            symbol: self.key.symbol,
            side: self.side(),
            size: self.size,
        }
    }

    /// Apply `event`, moving to the next state.
    pub fn apply(&mut self, event: OrderEvent) -> Result<(), TransitionError> {
        use OrderEvent as E;
        use OrderState as S;

        let next = match (self.state, &event) {
            (S::Pending, E::Submit) => S::Submitted,
            (S::Pending, E::Reject(_)) => S::Rejected,
            (S::Pending, E::Cancel) => S::Cancelled,

            (S::Submitted | S::TimedOut | S::Cancelling, E::Ack(id)) => {
                self.venue_id = Some(*id);
                self.state
            }
            (S::Submitted | S::TimedOut | S::Cancelling, E::Fill(_)) => S::Filled,
            (S::Submitted | S::TimedOut | S::Cancelling, E::Reject(_)) => S::Rejected,
            (S::Submitted | S::TimedOut | S::Cancelling, E::Cancelled(_)) => S::Cancelled,
            (S::Submitted | S::Cancelling, E::Timeout) => S::TimedOut,
            (S::Submitted | S::TimedOut, E::Cancel) => S::Cancelling,
            (S::Submitted, E::MarketClosed) if self.venue_id.is_none() => S::Pending,
            (S::Cancelling, E::MarketClosed) if self.venue_id.is_none() => S::Cancelled,

            (S::Cancelling, E::Cancel) => S::Cancelling,
            (s, E::Cancel) if s.is_terminal() => s,

            (from, _) => {
                return Err(TransitionError {
                    key: self.key,
                    from,
                    event: event.clone(),
                });
            }
        };

        match event {
            E::Fill(size) | E::Cancelled(size) => self.filled = size,
            E::Reject(reason) => self.reason = Some(reason),
            _ => {}
        }
        self.state = next;
        Ok(())
    }

    /// Translate a venue fill report into the matching event, if the venue
    /// considers the order done.
    pub fn event_for(report: &FillReport) -> Option<OrderEvent> {
        match report.state {
            FillState::Working => None,
            FillState::Filled => Some(OrderEvent::Fill(report.filled_size)),
            FillState::Cancelled => Some(OrderEvent::Cancelled(report.filled_size)),
            FillState::Rejected => Some(OrderEvent::Reject("rejected by venue".into())),
        }
    }
}
