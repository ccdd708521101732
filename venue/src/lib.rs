//! Market venue trait and implementations for weightbook.
//!
//! The engine treats a venue as a black box that can report whether it is
//! open, accept notional-sized market orders, cancel them, and report fills.
//! Implementations:
//!
//! - **Paper** ([`paper::PaperVenue`]): in-process venue with scripted fill
//!   behaviour, used by tests and the command-line tool

pub mod error;
pub mod paper;
pub mod types;

pub use error::VenueError;
pub use types::*;

/// A connection to a market venue.
///
/// Every method may be slow or hang; callers bound them with their own
/// timeouts.
pub trait Venue: Send + Sync {
    /// Whether the venue currently accepts orders.
    fn is_open(&self) -> Result<bool, VenueError>;

    /// Submit a market order. Resubmitting an order with a client order id
    /// the venue already knows returns the existing venue id.
    fn submit_order(&self, order: &VenueOrder) -> Result<VenueOrderId, VenueError>;

    /// Cancel a working order. Cancelling a terminal order is a no-op.
    fn cancel_order(&self, id: VenueOrderId) -> Result<(), VenueError>;

    /// Current state and filled size of an order.
    fn fill(&self, id: VenueOrderId) -> Result<FillReport, VenueError>;

    /// Look up an order by client order id. Venues without the capability
    /// report nothing.
    fn find_order(&self, _client_order_id: &str) -> Result<Option<VenueOrderId>, VenueError> {
        Ok(None)
    }
}
