//! Execution batches: all orders spawned by one rebalance or liquidation
//! call, and the registry that keeps them addressable by id.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use weightbook::{AccountId, Money, Phase, PortfolioId, Symbol};

use crate::diff::AccountPlan;
use crate::order::{Order, OrderKey, OrderState};
use crate::store::AccountSnapshot;

/// Batch identifier, unique within one engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BatchId(pub u64);

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

/// What spawned the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchKind {
    Rebalance,
    LiquidateAccount,
    LiquidatePortfolio(PortfolioId),
}

impl BatchKind {
    pub fn is_liquidation(&self) -> bool {
        !matches!(self, BatchKind::Rebalance)
    }
}

impl fmt::Display for BatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchKind::Rebalance => f.write_str("rebalance"),
            BatchKind::LiquidateAccount => f.write_str("liquidate account"),
            BatchKind::LiquidatePortfolio(id) => write!(f, "liquidate portfolio {id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    /// Planned; nothing live at the venue.
    Matching,
    Selling,
    Buying,
    /// Timed-out orders may still be working at the venue.
    Stalled,
    Cancelling,
    /// Every order terminal.
    Ready,
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BatchStatus::Matching => "MATCHING",
            BatchStatus::Selling => "SELLING",
            BatchStatus::Buying => "BUYING",
            BatchStatus::Stalled => "STALLED",
            BatchStatus::Cancelling => "CANCELLING",
            BatchStatus::Ready => "READY",
        };
        f.write_str(s)
    }
}

/// One rebalance or liquidation in flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionBatch {
    pub id: BatchId,
    pub account: AccountId,
    pub kind: BatchKind,
    pub status: BatchStatus,
    pub plan: AccountPlan,
    /// One order per (symbol, phase), sells first.
    pub orders: Vec<Order>,
    pub cancel_requested: bool,
    /// Buys have been sized against post-sell cash.
    pub buys_sized: bool,
    /// Fills have been written back to the store, or the batch was
    /// withdrawn without trading.
    pub applied: bool,
    /// The account as it was when the batch was planned.
    #[serde(default)]
    pub basis: Option<AccountSnapshot>,
    pub created_at: DateTime<Utc>,
}

impl ExecutionBatch {
    pub fn new(id: BatchId, kind: BatchKind, plan: AccountPlan) -> Self {
        let mut orders: Vec<Order> = plan
            .orders
            .iter()
            .map(|o| {
                Order::new(
                    OrderKey {
                        batch: id,
                        symbol: o.symbol,
                        phase: o.phase,
                    },
                    o.size,
                )
            })
            .collect();
        orders.sort_by_key(|o| (o.phase(), o.symbol()));

        Self {
            id,
            account: plan.account.clone(),
            kind,
            status: BatchStatus::Matching,
            plan,
            orders,
            cancel_requested: false,
            buys_sized: false,
            applied: false,
            basis: None,
            created_at: Utc::now(),
        }
    }

    /// Remember the account state the plan was computed from.
    pub fn with_basis(mut self, snapshot: AccountSnapshot) -> Self {
        self.basis = Some(snapshot);
        self
    }

    pub fn order(&self, key: &OrderKey) -> Option<&Order> {
        self.orders.iter().find(|o| &o.key == key)
    }

    pub fn order_mut(&mut self, key: &OrderKey) -> Option<&mut Order> {
        self.orders.iter_mut().find(|o| &o.key == key)
    }

    pub fn orders_in(&self, phase: Phase) -> impl Iterator<Item = &Order> {
        self.orders.iter().filter(move |o| o.phase() == phase)
    }

    pub fn is_complete(&self) -> bool {
        self.orders.iter().all(|o| o.state.is_terminal())
    }

    /// Whether the phase has reached its barrier: every order terminal, or
    /// timed out when `allow_timed_out` is set.
    pub fn phase_settled(&self, phase: Phase, allow_timed_out: bool) -> bool {
        self.orders_in(phase).all(|o| {
            o.state.is_terminal() || (allow_timed_out && o.state == OrderState::TimedOut)
        })
    }

    /// Orders may have moved money at the venue that the store does not
    /// show yet.
    pub fn has_exposure(&self) -> bool {
        !self.applied && self.orders.iter().any(|o| o.state.is_live() || !o.filled.is_zero())
    }

    pub fn count(&self, state: OrderState) -> usize {
        self.orders.iter().filter(|o| o.state == state).count()
    }

    /// Signed executed notional per symbol; sells are negative.
    pub fn executed(&self) -> FxHashMap<Symbol, Money> {
        let mut executed = FxHashMap::default();
        for o in self.orders.iter().filter(|o| !o.filled.is_zero()) {
            *executed.entry(o.symbol()).or_insert(Decimal::ZERO) += o.signed_fill();
        }
        executed
    }

    /// Notional filled by sells so far.
    pub fn sell_proceeds(&self) -> Money {
        self.orders_in(Phase::Sell).map(|o| o.filled).sum()
    }

    /// Derive the status from order states.
    pub fn refresh_status(&mut self) {
        let any = |state| self.orders.iter().any(|o| o.state == state);
        self.status = if self.is_complete() {
            BatchStatus::Ready
        } else if any(OrderState::Cancelling) {
            BatchStatus::Cancelling
        } else if any(OrderState::TimedOut) {
            BatchStatus::Stalled
        } else if self.orders_in(Phase::Buy).any(|o| o.state == OrderState::Submitted) {
            BatchStatus::Buying
        } else if any(OrderState::Submitted) {
            BatchStatus::Selling
        } else {
            BatchStatus::Matching
        };
    }
}

/// Shared handle to a batch.
pub type BatchHandle = Arc<Mutex<ExecutionBatch>>;

/// Lock a batch, recovering from poisoning.
pub fn lock(batch: &BatchHandle) -> MutexGuard<'_, ExecutionBatch> {
    batch.lock().unwrap_or_else(|e| e.into_inner())
}

/// Every batch the engine has created.
#[derive(Debug)]
pub struct BatchRegistry {
    next: AtomicU64,
    batches: Mutex<FxHashMap<BatchId, BatchHandle>>,
}

impl Default for BatchRegistry {
    fn default() -> Self {
        Self {
            next: AtomicU64::new(1),
            batches: Mutex::new(FxHashMap::default()),
        }
    }
}

impl BatchRegistry {
    pub fn next_id(&self) -> BatchId {
        BatchId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    pub fn insert(&self, batch: ExecutionBatch) -> BatchHandle {
        let id = batch.id;
        let handle = Arc::new(Mutex::new(batch));
        self.batches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, Arc::clone(&handle));
        handle
    }

    pub fn get(&self, id: BatchId) -> Option<BatchHandle> {
        self.batches.lock().unwrap_or_else(|e| e.into_inner()).get(&id).cloned()
    }

    pub fn ids(&self) -> Vec<BatchId> {
        let mut ids: Vec<BatchId> = self
            .batches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect();
        ids.sort();
        ids
    }
}
