//! Market gate: every venue call made by the engine, each bounded by the
//! configured call timeout.
//!
//! A call that outlives its bound is abandoned, not retried: the worker
//! thread keeps running and its answer is discarded. While too many
//! abandoned workers are still running, new calls are refused.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use log::{debug, warn};
use weightbook_venue::{FillReport, Venue, VenueError, VenueOrder, VenueOrderId};

use crate::error::{Error, Result};

const DEFAULT_STRANDED_LIMIT: usize = 16;

const RUNNING: u8 = 0;
const ANSWERED: u8 = 1;
const ABANDONED: u8 = 2;

#[derive(Clone)]
pub struct MarketGate {
    venue: Arc<dyn Venue>,
    timeout: Duration,
    stranded: Arc<AtomicUsize>,
    stranded_limit: usize,
}

impl MarketGate {
    pub fn new(venue: Arc<dyn Venue>, timeout: Duration) -> Self {
        Self {
            venue,
            timeout,
            stranded: Arc::new(AtomicUsize::new(0)),
            stranded_limit: DEFAULT_STRANDED_LIMIT,
        }
    }

    /// Refuse new calls while `limit` abandoned calls are still running.
    pub fn with_stranded_limit(mut self, limit: usize) -> Self {
        self.stranded_limit = limit.max(1);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Abandoned calls whose worker has not returned yet.
    pub fn stranded(&self) -> usize {
        self.stranded.load(Ordering::SeqCst)
    }

    /// Run `op` against the venue on a worker thread and wait at most the
    /// call timeout for its answer.
    fn call<T, F>(&self, what: String, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Venue) -> std::result::Result<T, VenueError> + Send + 'static,
    {
        let stranded = self.stranded();
        if stranded >= self.stranded_limit {
            warn!("venue call '{what}' refused: {stranded} earlier call(s) still running");
            return Err(Error::Venue(VenueError::Unavailable(format!(
                "{stranded} timed-out venue call(s) still running"
            ))));
        }

        let venue = Arc::clone(&self.venue);
        let state = Arc::new(AtomicU8::new(RUNNING));
        let worker_state = Arc::clone(&state);
        let worker_stranded = Arc::clone(&self.stranded);
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("venue-call".into())
            .spawn(move || {
                // The receiver is gone if the caller already timed out.
                let _ = tx.send(op(venue.as_ref()));
                if worker_state.swap(ANSWERED, Ordering::SeqCst) == ABANDONED {
                    worker_stranded.fetch_sub(1, Ordering::SeqCst);
                }
            })
            .map_err(|e| Error::Venue(VenueError::Unavailable(format!("cannot spawn venue call: {e}"))))?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result.map_err(Error::Venue),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!("venue call '{what}' timed out after {:?}", self.timeout);
                // Count first so the worker never decrements below zero.
                self.stranded.fetch_add(1, Ordering::SeqCst);
                if state.swap(ABANDONED, Ordering::SeqCst) == ANSWERED {
                    self.stranded.fetch_sub(1, Ordering::SeqCst);
                }
                Err(Error::Timeout {
                    what,
                    after: self.timeout,
                    batch: None,
                })
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(Error::Venue(VenueError::Unavailable(format!(
                "venue call '{what}' ended without an answer"
            )))),
        }
    }

    pub fn is_open(&self) -> Result<bool> {
        self.call("is_open".into(), |v| v.is_open())
    }

    pub fn submit(&self, order: &VenueOrder) -> Result<VenueOrderId> {
        debug!("submitting {} {} {} ({})", order.side, order.symbol, order.size, order.client_order_id);
        let order = order.clone();
        self.call(format!("submit {}", order.client_order_id), move |v| v.submit_order(&order))
    }

    /// Cancel a working order. A no-op for terminal orders.
    pub fn cancel(&self, id: VenueOrderId) -> Result<()> {
        self.call(format!("cancel {id}"), move |v| v.cancel_order(id))
    }

    pub fn fill(&self, id: VenueOrderId) -> Result<FillReport> {
        self.call(format!("fill {id}"), move |v| v.fill(id))
    }

    pub fn find(&self, client_order_id: &str) -> Result<Option<VenueOrderId>> {
        let key = client_order_id.to_string();
        self.call(format!("find {client_order_id}"), move |v| v.find_order(&key))
    }
}
