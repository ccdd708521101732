//! Paper venue: implements [`Venue`] in-process with scripted behaviour.
//!
//! Use this in tests and dry runs to exercise order lifecycles without a
//! real market.
//!
//! ```
//! use rust_decimal::Decimal;
//! use weightbook::Symbol;
//! use weightbook_venue::paper::{FillMode, PaperVenue};
//!
//! let venue = PaperVenue::builder()
//!     .fill_mode(FillMode::ImmediateFull)
//!     .symbol_mode(Symbol::new("TSLA"), FillMode::Never)
//!     .min_size(Decimal::ONE)
//!     .build();
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use log::{debug, info};
use rust_decimal::{Decimal, RoundingStrategy};
use rustc_hash::FxHashMap;
use weightbook::{Money, Symbol};

use crate::Venue;
use crate::error::VenueError;
use crate::types::*;

/// How the paper venue handles a submitted order.
#[derive(Clone, Debug, PartialEq)]
pub enum FillMode {
    /// Filled in full on submission.
    ImmediateFull,
    /// The given fraction (e.g. 0.5) fills on submission, the rest expires.
    ImmediatePartial(Decimal),
    /// Refused on submission.
    Reject,
    /// Accepted and left working until [`PaperVenue::complete`] or a cancel.
    Never,
}

/// A recorded order submission for assertion in tests.
#[derive(Clone, Debug)]
pub struct RecordedOrder {
    pub id: Option<VenueOrderId>,
    pub order: VenueOrder,
    /// Venue clock at submission.
    pub submitted_at: u64,
    /// Venue clock when the order became terminal, if it has.
    pub terminal_at: Option<u64>,
}

#[derive(Clone, Debug)]
struct PaperOrder {
    order: VenueOrder,
    state: FillState,
    filled: Money,
    record: usize,
}

#[derive(Default)]
struct Book {
    clock: u64,
    next_id: u64,
    orders: FxHashMap<VenueOrderId, PaperOrder>,
    by_client: FxHashMap<String, VenueOrderId>,
    recorded: Vec<RecordedOrder>,
    cancels: usize,
}

impl Book {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn settle(&mut self, id: VenueOrderId, state: FillState, filled: Money) {
        let now = self.tick();
        if let Some(o) = self.orders.get_mut(&id) {
            o.state = state;
            o.filled = filled;
            let record = o.record;
            if let Some(r) = self.recorded.get_mut(record) {
                r.terminal_at.get_or_insert(now);
            }
        }
    }
}

/// Builder for [`PaperVenue`].
pub struct PaperVenueBuilder {
    fill_mode: FillMode,
    symbol_modes: FxHashMap<Symbol, FillMode>,
    open: bool,
    min_size: Money,
    latency: Duration,
}

impl PaperVenueBuilder {
    /// Default behaviour for every symbol.
    pub fn fill_mode(mut self, mode: FillMode) -> Self {
        self.fill_mode = mode;
        self
    }

    /// Behaviour for one symbol, overriding the default.
    pub fn symbol_mode(mut self, symbol: Symbol, mode: FillMode) -> Self {
        self.symbol_modes.insert(symbol, mode);
        self
    }

    pub fn open(mut self, open: bool) -> Self {
        self.open = open;
        self
    }

    /// Orders below this notional are rejected.
    pub fn min_size(mut self, size: Money) -> Self {
        self.min_size = size;
        self
    }

    /// Delay applied to every call.
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn build(self) -> PaperVenue {
        PaperVenue {
            open: AtomicBool::new(self.open),
            fill_mode: self.fill_mode,
            symbol_modes: self.symbol_modes,
            min_size: self.min_size,
            latency: self.latency,
            book: Mutex::new(Book {
                next_id: 1,
                ..Book::default()
            }),
        }
    }
}

/// An in-process venue that records submissions and fills them according
/// to its [`FillMode`]s.
pub struct PaperVenue {
    open: AtomicBool,
    fill_mode: FillMode,
    symbol_modes: FxHashMap<Symbol, FillMode>,
    min_size: Money,
    latency: Duration,
    book: Mutex<Book>,
}

impl PaperVenue {
    pub fn builder() -> PaperVenueBuilder {
        PaperVenueBuilder {
            fill_mode: FillMode::ImmediateFull,
            symbol_modes: FxHashMap::default(),
            open: true,
            min_size: Decimal::ZERO,
            latency: Duration::ZERO,
        }
    }

    fn book(&self) -> MutexGuard<'_, Book> {
        self.book.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn delay(&self) {
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
    }

    fn mode_for(&self, symbol: &Symbol) -> &FillMode {
        self.symbol_modes.get(symbol).unwrap_or(&self.fill_mode)
    }

    /// Open or close the market.
    pub fn set_open(&self, open: bool) {
        info!("paper venue: market {}", if open { "opened" } else { "closed" });
        self.open.store(open, Ordering::SeqCst);
    }

    /// Fill a working order in full (a late fill). Returns `false` if the
    /// order is unknown or already terminal.
    pub fn complete(&self, id: VenueOrderId) -> bool {
        let mut book = self.book();
        let size = match book.orders.get(&id) {
            Some(o) if o.state == FillState::Working => o.order.size,
            _ => return false,
        };
        book.settle(id, FillState::Filled, size);
        debug!("paper venue: {id} filled late");
        true
    }

    /// Fill every working order. Returns how many were filled.
    pub fn complete_all(&self) -> usize {
        let working: Vec<VenueOrderId> = {
            let book = self.book();
            book.orders
                .iter()
                .filter(|(_, o)| o.state == FillState::Working)
                .map(|(id, _)| *id)
                .collect()
        };
        working.into_iter().filter(|id| self.complete(*id)).count()
    }

    /// Every submission attempt, in order (for assertion in tests).
    pub fn submitted_orders(&self) -> Vec<RecordedOrder> {
        self.book().recorded.clone()
    }

    /// Submission attempts that were accepted.
    pub fn accepted_orders(&self) -> Vec<RecordedOrder> {
        self.book().recorded.iter().filter(|r| r.id.is_some()).cloned().collect()
    }

    /// Venue ids of orders still working.
    pub fn working_orders(&self) -> Vec<VenueOrderId> {
        let mut ids: Vec<VenueOrderId> = self
            .book()
            .orders
            .iter()
            .filter(|(_, o)| o.state == FillState::Working)
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    /// Number of cancel requests that reached a working order.
    pub fn cancel_count(&self) -> usize {
        self.book().cancels
    }
}

impl Venue for PaperVenue {
    fn is_open(&self) -> Result<bool, VenueError> {
        self.delay();
        Ok(self.open.load(Ordering::SeqCst))
    }

    fn submit_order(&self, order: &VenueOrder) -> Result<VenueOrderId, VenueError> {
        self.delay();
        let mut book = self.book();

        if let Some(id) = book.by_client.get(&order.client_order_id) {
            debug!("paper venue: duplicate client id {}, returning {id}", order.client_order_id);
            return Ok(*id);
        }

        let submitted_at = book.tick();
        let record = book.recorded.len();
        book.recorded.push(RecordedOrder {
            id: None,
            order: order.clone(),
            submitted_at,
            terminal_at: None,
        });

        if !self.open.load(Ordering::SeqCst) {
            return Err(VenueError::MarketClosed);
        }
        if order.size <= Decimal::ZERO || order.size < self.min_size {
            return Err(VenueError::Rejected(format!(
                "size {} below lot minimum {}",
                order.size, self.min_size
            )));
        }
        let mode = self.mode_for(&order.symbol).clone();
        if mode == FillMode::Reject {
            return Err(VenueError::Rejected(format!("{} refused", order.symbol)));
        }

        let id = VenueOrderId(book.next_id);
        book.next_id += 1;
        book.by_client.insert(order.client_order_id.clone(), id);
        book.orders.insert(
            id,
            PaperOrder {
                order: order.clone(),
                state: FillState::Working,
                filled: Decimal::ZERO,
                record,
            },
        );
        if let Some(r) = book.recorded.get_mut(record) {
            r.id = Some(id);
        }

        match mode {
            FillMode::ImmediateFull => book.settle(id, FillState::Filled, order.size),
            FillMode::ImmediatePartial(frac) => {
                let filled = (order.size * frac).round_dp_with_strategy(2, RoundingStrategy::ToZero);
                book.settle(id, FillState::Filled, filled);
            }
            FillMode::Never | FillMode::Reject => {}
        }

        debug!(
            "paper venue: accepted {} {} {} as {id}",
            order.side, order.symbol, order.size
        );
        Ok(id)
    }

    fn cancel_order(&self, id: VenueOrderId) -> Result<(), VenueError> {
        self.delay();
        let mut book = self.book();
        let (state, filled) = match book.orders.get(&id) {
            Some(o) => (o.state, o.filled),
            None => return Err(VenueError::UnknownOrder(id)),
        };
        if state.is_terminal() {
            return Ok(());
        }
        book.cancels += 1;
        book.settle(id, FillState::Cancelled, filled);
        Ok(())
    }

    fn fill(&self, id: VenueOrderId) -> Result<FillReport, VenueError> {
        self.delay();
        let book = self.book();
        let o = book.orders.get(&id).ok_or(VenueError::UnknownOrder(id))?;
        Ok(FillReport {
            id,
            state: o.state,
            filled_size: o.filled,
        })
    }

    fn find_order(&self, client_order_id: &str) -> Result<Option<VenueOrderId>, VenueError> {
        self.delay();
        Ok(self.book().by_client.get(client_order_id).copied())
    }
}
