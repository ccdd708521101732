//! The engine: plan → lease → gate → sells → barrier → buys → write-back.
//!
//! Each call that spawns a batch takes the account lease first and keeps it
//! until every order of the batch is terminal. A batch that stops with live
//! orders (timed out, or cancelling) parks its lease in the engine; the
//! lease is released when cancellation or reconciliation brings the batch to
//! `READY`. A batch that stops on a closed market after trading keeps its
//! lease the same way, so no newer batch plans against holdings the store
//! does not show yet.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

use chrono::{NaiveDate, Utc};
use log::{error, info, warn};
use rust_decimal::{Decimal, RoundingStrategy};
use rustc_hash::FxHashMap;
use weightbook::{
    AccountId, HistoryError, Phase, PerformanceReport, PortfolioId, PriceHistory, ReportingPeriod, Scope, Simulation,
    SimulationConfig, SimulationStep, Symbol, ValuePoint, Weights, flatten,
};
use weightbook_venue::{Venue, VenueError, VenueOrderId};

use crate::audit::{self, AuditLog};
use crate::batch::{BatchHandle, BatchId, BatchKind, BatchRegistry, BatchStatus, ExecutionBatch, lock};
use crate::config::{Config, ExecutionConfig};
use crate::diff::{AccountPlan, apply_fills, plan_liquidation, plan_rebalance};
use crate::error::{Error, Result};
use crate::gate::MarketGate;
use crate::lease::{AccountLeases, Lease};
use crate::order::{Order, OrderEvent, OrderKey, OrderState};
use crate::store::{AccountSnapshot, AccountStore};

/// A replay plus its whole-window report.
#[derive(Debug, Clone)]
pub struct Backtest {
    pub steps: Vec<SimulationStep>,
    pub report: PerformanceReport,
}

pub struct Engine {
    pub(crate) store: Arc<dyn AccountStore>,
    pub(crate) gate: MarketGate,
    pub(crate) history: Arc<dyn PriceHistory + Send + Sync>,
    pub(crate) leases: AccountLeases,
    pub(crate) batches: BatchRegistry,
    parked: Mutex<FxHashMap<BatchId, Lease>>,
    audit: Option<Mutex<AuditLog>>,
    pub(crate) execution: ExecutionConfig,
    simulation: SimulationConfig,
    benchmark: Symbol,
}

impl Engine {
    pub fn new(
        config: &Config,
        store: Arc<dyn AccountStore>,
        venue: Arc<dyn Venue>,
        history: Arc<dyn PriceHistory + Send + Sync>,
    ) -> Self {
        Self {
            store,
            gate: MarketGate::new(venue, config.execution.call_timeout())
                .with_stranded_limit(config.execution.max_stranded_calls),
            history,
            leases: AccountLeases::new(),
            batches: BatchRegistry::default(),
            parked: Mutex::new(FxHashMap::default()),
            audit: None,
            execution: config.execution.clone(),
            simulation: config.simulation_config(),
            benchmark: config.simulation.benchmark,
        }
    }

    /// Append batch events to `log`.
    pub fn with_audit(mut self, log: AuditLog) -> Self {
        self.audit = Some(Mutex::new(log));
        self
    }

    pub fn leases(&self) -> &AccountLeases {
        &self.leases
    }

    pub fn store(&self) -> &Arc<dyn AccountStore> {
        &self.store
    }

    // === Planning ===

    /// The rebalance plan for `account`, without trading.
    pub fn plan_account(&self, account: &AccountId) -> Result<AccountPlan> {
        let snapshot = self.store.load_account(account)?;
        plan_rebalance(&snapshot, self.execution.min_trade)
    }

    // === Batches ===

    /// Rebalance every portfolio of `account` to its target weights.
    pub fn execute_rebalance(&self, account: &AccountId) -> Result<ExecutionBatch> {
        self.start(account, BatchKind::Rebalance)
    }

    /// Sell every non-cash holding of `account`.
    pub fn liquidate_account(&self, account: &AccountId) -> Result<ExecutionBatch> {
        self.start(account, BatchKind::LiquidateAccount)
    }

    /// Sell every non-cash holding of one portfolio.
    pub fn liquidate_portfolio(&self, portfolio: &PortfolioId) -> Result<ExecutionBatch> {
        let account = self.store.account_of(portfolio)?;
        self.start(&account, BatchKind::LiquidatePortfolio(portfolio.clone()))
    }

    /// Snapshot of a batch.
    pub fn batch(&self, id: BatchId) -> Result<ExecutionBatch> {
        Ok(lock(&self.handle(id)?).clone())
    }

    pub fn batch_ids(&self) -> Vec<BatchId> {
        self.batches.ids()
    }

    pub(crate) fn handle(&self, id: BatchId) -> Result<BatchHandle> {
        self.batches.get(id).ok_or(Error::UnknownBatch(id))
    }

    fn start(&self, account: &AccountId, kind: BatchKind) -> Result<ExecutionBatch> {
        let id = self.batches.next_id();
        let lease = self.leases.acquire(account, id)?;

        let snapshot = self.store.load_account(account)?;
        let min_trade = self.execution.min_trade;
        let plan = match &kind {
            BatchKind::Rebalance => plan_rebalance(&snapshot, min_trade)?,
            BatchKind::LiquidateAccount => plan_liquidation(&snapshot, None, min_trade)?,
            BatchKind::LiquidatePortfolio(portfolio) => plan_liquidation(&snapshot, Some(portfolio), min_trade)?,
        };

        let batch = ExecutionBatch::new(id, kind, plan).with_basis(snapshot);
        info!(
            "{id}: {} of account {account}, {} order(s), {} dust",
            batch.kind,
            batch.orders.len(),
            batch.plan.dust
        );
        self.audit(|log| audit::log_batch_planned(log, &batch));

        let handle = self.batches.insert(batch);
        self.drive(&handle, lease)
    }

    /// Re-drive a batch that stopped on a closed market or a timeout. Only
    /// `PENDING` orders are submitted.
    ///
    /// A batch that has traded nothing and whose account changed since it was
    /// planned is withdrawn with [`Error::StaleBatch`]: its orders are
    /// cancelled and nothing reaches the venue.
    pub fn resume_batch(&self, id: BatchId) -> Result<ExecutionBatch> {
        let handle = self.handle(id)?;
        let (account, applied) = {
            let batch = lock(&handle);
            (batch.account.clone(), batch.applied)
        };
        if applied {
            return self.batch(id);
        }

        let lease = match self.unpark(id) {
            Some(lease) => lease,
            None => self.leases.acquire(&account, id)?,
        };

        {
            let mut batch = lock(&handle);
            if !batch.has_exposure() && batch.basis.is_some() {
                let current = self.store.load_account(&account)?;
                if batch.basis.as_ref() != Some(&current) {
                    warn!("{id}: account {account} changed since planning; withdrawing batch");
                    for order in batch.orders.iter_mut() {
                        transition(order, OrderEvent::Cancel);
                    }
                    batch.cancel_requested = true;
                    batch.refresh_status();
                    batch.applied = true;
                    self.audit(|log| audit::log_batch_cancelled(log, &batch));
                    drop(lease);
                    return Err(Error::StaleBatch { batch: id });
                }
            }
        }
        info!("{id}: resuming");
        self.drive(&handle, lease)
    }

    /// Cancel every non-terminal order of a batch. Safe to call repeatedly
    /// and on finished batches.
    pub fn cancel_batch(&self, id: BatchId) -> Result<ExecutionBatch> {
        let handle = self.handle(id)?;

        let at_venue: Vec<(OrderKey, VenueOrderId)> = {
            let mut batch = lock(&handle);
            if batch.applied {
                return Ok(batch.clone());
            }
            if !batch.cancel_requested {
                info!("{id}: cancel requested");
            }
            batch.cancel_requested = true;
            for order in batch.orders.iter_mut() {
                transition(order, OrderEvent::Cancel);
            }
            batch.refresh_status();
            batch
                .orders
                .iter()
                .filter(|o| o.state == OrderState::Cancelling)
                .filter_map(|o| o.venue_id.map(|v| (o.key, v)))
                .collect()
        };

        let mut first_error = None;
        for (key, venue_id) in at_venue {
            if let Err(e) = self.cancel_at_venue(&handle, key, venue_id) {
                first_error.get_or_insert(e);
            }
        }

        let mut batch = lock(&handle);
        batch.refresh_status();
        let settled = if batch.is_complete() {
            let result = self.settle_locked(&mut batch);
            self.release(id);
            result
        } else {
            Ok(())
        };
        self.audit(|log| audit::log_batch_cancelled(log, &batch));

        match first_error {
            Some(e) => Err(e),
            None => settled.map(|_| batch.clone()),
        }
    }

    /// Ask the venue to cancel one order, then record whatever it reports.
    fn cancel_at_venue(&self, handle: &BatchHandle, key: OrderKey, venue_id: VenueOrderId) -> Result<()> {
        info!("{key}: cancelling {venue_id} at venue");
        self.gate.cancel(venue_id)?;
        let report = self.gate.fill(venue_id)?;
        if let Some(event) = Order::event_for(&report) {
            self.record(handle, &key, event);
        }
        Ok(())
    }

    // === Driving ===

    fn drive(&self, handle: &BatchHandle, lease: Lease) -> Result<ExecutionBatch> {
        let id = lease.batch();

        if lock(handle).is_complete() {
            return self.finish(handle, lease);
        }

        let stopped = match self.gate.is_open() {
            Ok(true) => None,
            Ok(false) => {
                warn!("{id}: market closed, nothing submitted");
                Some(Error::MarketClosed { batch: id })
            }
            Err(Error::Timeout { what, after, .. }) => Some(Error::Timeout {
                what,
                after,
                batch: Some(id),
            }),
            Err(e) => Some(e),
        };
        if let Some(e) = stopped {
            let mut batch = lock(handle);
            batch.refresh_status();
            self.hold(&batch, lease);
            return Err(e);
        }

        for phase in Phase::ORDERED {
            if phase == Phase::Buy {
                self.size_buys(handle);
            }
            {
                let mut batch = lock(handle);
                if batch.cancel_requested {
                    drop(batch);
                    return self.stop_cancelled(handle, lease);
                }
                if batch.phase_settled(phase, false) {
                    continue;
                }
                batch.status = match phase {
                    Phase::Sell => BatchStatus::Selling,
                    Phase::Buy => BatchStatus::Buying,
                };
            }

            self.submit_phase(handle, phase);
            self.await_phase(handle, phase);

            // Barrier: nothing of the next phase starts until this one has
            // settled.
            let mut batch = lock(handle);
            batch.refresh_status();
            if batch.cancel_requested {
                drop(batch);
                return self.stop_cancelled(handle, lease);
            }

            let timed_out = batch.orders_in(phase).filter(|o| o.state == OrderState::TimedOut).count();
            let ignorable = phase == Phase::Sell && self.execution.ignore_timed_out_sells;
            if timed_out > 0 && !ignorable {
                warn!("{id}: {timed_out} {phase} order(s) timed out; batch stalled");
                self.park(lease);
                return Err(Error::Timeout {
                    what: format!("{timed_out} {phase} fill(s)"),
                    after: self.execution.fill_timeout(),
                    batch: Some(id),
                });
            }

            let pending = batch.orders_in(phase).any(|o| o.state == OrderState::Pending);
            if pending {
                warn!("{id}: market closed during the {phase} phase");
                self.hold(&batch, lease);
                return Err(Error::MarketClosed { batch: id });
            }
        }

        let mut batch = lock(handle);
        if batch.is_complete() {
            drop(batch);
            return self.finish(handle, lease);
        }

        // Only ignorable timed-out sells are left.
        batch.refresh_status();
        let timed_out = batch.count(OrderState::TimedOut);
        warn!("{id}: finished with {timed_out} timed-out order(s) still live");
        self.park(lease);
        Err(Error::Timeout {
            what: format!("{timed_out} fill(s)"),
            after: self.execution.fill_timeout(),
            batch: Some(id),
        })
    }

    /// Submit every `PENDING` order of `phase` concurrently.
    fn submit_phase(&self, handle: &BatchHandle, phase: Phase) {
        let claimed: Vec<Order> = {
            let mut batch = lock(handle);
            batch
                .orders
                .iter_mut()
                .filter(|o| o.phase() == phase && o.state == OrderState::Pending)
                .filter_map(|o| o.apply(OrderEvent::Submit).ok().map(|_| o.clone()))
                .collect()
        };
        if claimed.is_empty() {
            return;
        }

        let gate = &self.gate;
        let results: Vec<(OrderKey, Result<VenueOrderId>)> = thread::scope(|s| {
            let workers: Vec<_> = claimed
                .iter()
                .map(|order| {
                    let venue_order = order.to_venue();
                    s.spawn(move || gate.submit(&venue_order))
                })
                .collect();
            claimed
                .iter()
                .zip(workers)
                .map(|(order, worker)| {
                    let result = worker.join().unwrap_or_else(|_| {
                        Err(Error::Venue(VenueError::Unavailable("submission thread panicked".into())))
                    });
                    (order.key, result)
                })
                .collect()
        });

        let mut cancel_now = Vec::new();
        {
            let mut batch = lock(handle);
            for (key, result) in results {
                // Only an explicit refusal is terminal. Any other failure may
                // have reached the venue, so the order is left for
                // reconciliation to find by client id.
                let event = match result {
                    Ok(venue_id) => OrderEvent::Ack(venue_id),
                    Err(Error::Venue(VenueError::MarketClosed)) => OrderEvent::MarketClosed,
                    Err(Error::Venue(e)) if e.is_rejection() => OrderEvent::Reject(e.to_string()),
                    Err(e) => {
                        warn!("{key}: submission outcome unknown: {e}");
                        OrderEvent::Timeout
                    }
                };
                let Some(order) = batch.order_mut(&key) else {
                    continue;
                };
                transition(order, event);

                match order.state {
                    OrderState::Submitted => info!("{key}: submitted {} {}", order.side(), order.size),
                    OrderState::TimedOut => warn!("{key}: left for reconciliation"),
                    OrderState::Rejected => {
                        warn!("{key}: rejected: {}", order.reason.as_deref().unwrap_or("unknown"))
                    }
                    OrderState::Pending => warn!("{key}: venue closed, left pending"),
                    _ => {}
                }
                if order.state == OrderState::Cancelling {
                    if let Some(venue_id) = order.venue_id {
                        cancel_now.push((key, venue_id));
                    }
                }

                let order = order.clone();
                if order.venue_id.is_some() {
                    self.audit(|log| audit::log_order_submitted(log, &order));
                }
                if order.state.is_terminal() {
                    self.audit(|log| audit::log_order_terminal(log, &order));
                }
            }
        }

        // Cancelled while the submission was in flight.
        for (key, venue_id) in cancel_now {
            if let Err(e) = self.cancel_at_venue(handle, key, venue_id) {
                warn!("{key}: cancel after submission failed: {e}");
            }
        }
    }

    /// Poll fills of the phase's submitted orders until they are terminal or
    /// the fill timeout passes; whatever is still working then times out.
    fn await_phase(&self, handle: &BatchHandle, phase: Phase) {
        let deadline = Instant::now() + self.execution.fill_timeout();
        loop {
            let working: Vec<(OrderKey, VenueOrderId)> = {
                let batch = lock(handle);
                if batch.cancel_requested {
                    return;
                }
                batch
                    .orders_in(phase)
                    .filter(|o| o.state == OrderState::Submitted)
                    .filter_map(|o| o.venue_id.map(|v| (o.key, v)))
                    .collect()
            };
            if working.is_empty() {
                break;
            }

            for (key, venue_id) in working {
                match self.gate.fill(venue_id) {
                    Ok(report) => {
                        if let Some(event) = Order::event_for(&report) {
                            self.record(handle, &key, event);
                        }
                    }
                    Err(e) => warn!("{key}: fill query failed: {e}"),
                }
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(self.execution.poll_interval().min(deadline - now));
        }

        let mut batch = lock(handle);
        let mut expired = Vec::new();
        for order in batch.orders.iter_mut() {
            if order.phase() == phase && order.state == OrderState::Submitted {
                warn!("{}: no fill within {:?}", order.key, self.execution.fill_timeout());
                transition(order, OrderEvent::Timeout);
                expired.push(order.clone());
            }
        }
        for order in &expired {
            self.audit(|log| audit::log_order_terminal(log, order));
        }
    }

    /// Scale pending buys down to the cash actually available after sells.
    fn size_buys(&self, handle: &BatchHandle) {
        let mut batch = lock(handle);
        if batch.buys_sized {
            return;
        }
        batch.buys_sized = true;

        let available = (batch.plan.cash + batch.sell_proceeds()).max(Decimal::ZERO);
        let wanted: Decimal = batch
            .orders_in(Phase::Buy)
            .filter(|o| o.state == OrderState::Pending)
            .map(|o| o.size)
            .sum();
        if wanted.is_zero() || wanted <= available {
            return;
        }

        let factor = available / wanted;
        info!(
            "{}: buys of {wanted} exceed available cash {available}; scaling by {:.4}",
            batch.id, factor
        );
        for order in batch.orders.iter_mut() {
            if order.phase() != Phase::Buy || order.state != OrderState::Pending {
                continue;
            }
            order.size = (order.size * factor).round_dp_with_strategy(2, RoundingStrategy::ToZero);
            if order.size.is_zero() {
                transition(order, OrderEvent::Reject("no cash left for buys".into()));
            }
        }
    }

    /// Apply a venue-reported event to one order.
    pub(crate) fn record(&self, handle: &BatchHandle, key: &OrderKey, event: OrderEvent) {
        let mut batch = lock(handle);
        let Some(order) = batch.order_mut(key) else {
            return;
        };
        if order.state.is_terminal() {
            return;
        }
        transition(order, event);
        if order.state.is_terminal() {
            info!("{key}: {} ({} filled)", order.state, order.filled);
            let order = order.clone();
            self.audit(|log| audit::log_order_terminal(log, &order));
        }
    }

    /// The driver saw a cancel request: finish if nothing is live, otherwise
    /// leave the lease with the batch.
    fn stop_cancelled(&self, handle: &BatchHandle, lease: Lease) -> Result<ExecutionBatch> {
        let mut batch = lock(handle);
        batch.refresh_status();
        if batch.is_complete() {
            let result = self.settle_locked(&mut batch);
            self.release(batch.id);
            drop(lease);
            return result.map(|_| batch.clone());
        }
        info!("{}: cancelled with live orders; lease kept", batch.id);
        self.park(lease);
        Ok(batch.clone())
    }

    fn finish(&self, handle: &BatchHandle, lease: Lease) -> Result<ExecutionBatch> {
        let mut batch = lock(handle);
        let result = self.settle_locked(&mut batch);
        self.release(batch.id);
        drop(lease);
        result.map(|_| batch.clone())
    }

    /// Write a complete batch's fills back to the store, once.
    pub(crate) fn settle_locked(&self, batch: &mut ExecutionBatch) -> Result<()> {
        batch.refresh_status();
        if batch.applied {
            return Ok(());
        }

        let mut snapshot = self.store.load_account(&batch.account)?;
        apply_fills(&mut snapshot, &batch.plan, &batch.executed());
        self.store.write_account(&snapshot)?;
        batch.applied = true;
        self.record_values(&snapshot, Utc::now().date_naive());

        info!(
            "{}: {} with {} filled, {} rejected, {} cancelled",
            batch.id,
            batch.status,
            batch.count(OrderState::Filled),
            batch.count(OrderState::Rejected),
            batch.count(OrderState::Cancelled)
        );
        self.audit(|log| audit::log_batch_finished(log, batch));
        Ok(())
    }

    fn record_values(&self, snapshot: &AccountSnapshot, date: NaiveDate) {
        let account = Scope::Account(snapshot.id.clone());
        let mut points = vec![(account, snapshot.total_value())];
        points.extend(
            snapshot
                .portfolios
                .iter()
                .map(|p| (Scope::Portfolio(p.id.clone()), p.value())),
        );
        for (scope, value) in points {
            if let Err(e) = self.store.record_value(&scope, ValuePoint::new(date, value)) {
                warn!("could not record value of {scope}: {e}");
            }
        }
    }

    // === Lease parking ===
    //
    // Callers hold the batch lock; lock order is batch, then parked.

    /// Park the lease while the batch has unsettled exposure, otherwise let
    /// it go.
    fn hold(&self, batch: &ExecutionBatch, lease: Lease) {
        if batch.has_exposure() {
            info!("{}: stopped with unsettled orders; lease kept", batch.id);
            self.park(lease);
        }
    }

    pub(crate) fn park(&self, lease: Lease) {
        let mut parked = self.parked.lock().unwrap_or_else(|e| e.into_inner());
        parked.insert(lease.batch(), lease);
    }

    fn unpark(&self, id: BatchId) -> Option<Lease> {
        self.parked.lock().unwrap_or_else(|e| e.into_inner()).remove(&id)
    }

    pub(crate) fn release(&self, id: BatchId) {
        drop(self.unpark(id));
    }

    pub(crate) fn audit(&self, write: impl FnOnce(&mut AuditLog) -> Result<()>) {
        if let Some(log) = &self.audit {
            let mut log = log.lock().unwrap_or_else(|e| e.into_inner());
            if let Err(e) = write(&mut log) {
                error!("audit write failed: {e}");
            }
        }
    }

    // === Simulation and analysis ===

    /// Symbol-level targets of a scope. An account is flattened through its
    /// portfolios.
    pub fn scope_targets(&self, scope: &Scope) -> Result<Weights<Symbol>> {
        match scope {
            Scope::Account(account) => {
                let snapshot = self.store.load_account(account)?;
                let sleeves = snapshot.account_weights()?;
                let portfolios = snapshot
                    .portfolios
                    .iter()
                    .map(|p| Ok((p.id.clone(), p.position_weights()?)))
                    .collect::<Result<Vec<_>>>()?;
                Ok(flatten(&sleeves, &portfolios)?)
            }
            Scope::Portfolio(portfolio) => {
                let account = self.store.account_of(portfolio)?;
                let snapshot = self.store.load_account(&account)?;
                let record = snapshot
                    .portfolio(portfolio)
                    .ok_or_else(|| Error::UnknownPortfolio(portfolio.clone()))?;
                Ok(record.position_weights()?)
            }
        }
    }

    /// Replay the scope's current targets over `[start, end]` with the
    /// configured simulation settings. An all-cash scope replays flat on the
    /// configured benchmark's dates.
    pub fn simulate(&self, scope: &Scope, start: NaiveDate, end: NaiveDate) -> Result<Simulation> {
        self.simulate_on(scope, start, end, self.simulation.clone(), self.benchmark)
    }

    pub fn simulate_with(
        &self,
        scope: &Scope,
        start: NaiveDate,
        end: NaiveDate,
        config: SimulationConfig,
    ) -> Result<Simulation> {
        self.simulate_on(scope, start, end, config, self.benchmark)
    }

    fn simulate_on(
        &self,
        scope: &Scope,
        start: NaiveDate,
        end: NaiveDate,
        config: SimulationConfig,
        calendar: Symbol,
    ) -> Result<Simulation> {
        let targets = self.scope_targets(scope)?;
        let history: &dyn PriceHistory = self.history.as_ref();
        Ok(Simulation::with_calendar(
            scope.clone(),
            targets,
            history,
            start,
            end,
            config,
            calendar,
        )?)
    }

    /// Replay plus a whole-window report against `benchmark`.
    pub fn backtest(&self, scope: &Scope, start: NaiveDate, end: NaiveDate, benchmark: Symbol) -> Result<Backtest> {
        self.backtest_with(scope, start, end, self.simulation.clone(), benchmark)
    }

    pub fn backtest_with(
        &self,
        scope: &Scope,
        start: NaiveDate,
        end: NaiveDate,
        config: SimulationConfig,
        benchmark: Symbol,
    ) -> Result<Backtest> {
        let simulation = self.simulate_on(scope, start, end, config, benchmark)?;
        let steps = simulation.run();
        let values: Vec<ValuePoint> = steps.iter().map(|s| ValuePoint::new(s.date, s.value)).collect();
        let prices = self.history.prices(&benchmark, start, end)?;
        let report = weightbook::analyze(&values, Some(&prices), ReportingPeriod::Max)?;
        Ok(Backtest { steps, report })
    }

    /// Report on the recorded value history of a live scope.
    pub fn analyze(&self, scope: &Scope, period: ReportingPeriod, benchmark: Symbol) -> Result<PerformanceReport> {
        let values = self.store.value_history(scope)?;
        let (Some(first), Some(last)) = (values.first(), values.last()) else {
            return Err(HistoryError::TooShort { have: 0, need: 2 }.into());
        };
        let prices = self.history.prices(&benchmark, first.date, last.date)?;
        Ok(weightbook::analyze(&values, Some(&prices), period)?)
    }

    /// Default benchmark symbol from the configuration.
    pub fn benchmark(&self) -> Symbol {
        self.benchmark
    }
}

/// Apply `event`, logging a refused transition instead of failing.
fn transition(order: &mut Order, event: OrderEvent) {
    if let Err(e) = order.apply(event) {
        warn!("{e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, PortfolioRecord};
    use rust_decimal_macros::dec;
    use weightbook::MemoryHistory;
    use weightbook_venue::paper::{FillMode, PaperVenue};

    fn aapl() -> Symbol {
        Symbol::new("AAPL")
    }
    fn tsla() -> Symbol {
        Symbol::new("TSLA")
    }

    fn store() -> Arc<MemoryStore> {
        let store = MemoryStore::new();
        store
            .insert_account(
                AccountSnapshot::new("acct").with_portfolio(
                    PortfolioRecord::new("p", "P", dec!(100))
                        .with_position(aapl(), dec!(50), dec!(1000))
                        .with_position(tsla(), dec!(50), dec!(0)),
                ),
            )
            .unwrap();
        Arc::new(store)
    }

    fn fast_config() -> Config {
        let mut config = Config::default();
        config.execution.call_timeout_ms = 1_000;
        config.execution.fill_timeout_ms = 100;
        config.execution.poll_interval_ms = 5;
        config
    }

    fn engine(store: Arc<MemoryStore>, venue: Arc<PaperVenue>) -> Engine {
        Engine::new(&fast_config(), store, venue, Arc::new(MemoryHistory::new()))
    }

    #[test]
    fn rebalance_runs_to_ready() {
        let store = store();
        let venue = Arc::new(PaperVenue::builder().build());
        let engine = engine(Arc::clone(&store), Arc::clone(&venue));
        let acct = AccountId::new("acct");

        let batch = engine.execute_rebalance(&acct).unwrap();
        assert_eq!(batch.status, BatchStatus::Ready);
        assert!(batch.applied);
        assert_eq!(venue.accepted_orders().len(), 2);
        assert_eq!(engine.leases().holder(&acct), None);

        let snapshot = store.load_account(&acct).unwrap();
        let holdings = snapshot.portfolios[0].holdings();
        assert_eq!(holdings[&aapl()], dec!(500));
        assert_eq!(holdings[&tsla()], dec!(500));
        assert_eq!(store.value_history(&Scope::Account(acct)).unwrap().len(), 1);
    }

    #[test]
    fn closed_market_submits_nothing() {
        let store = store();
        let venue = Arc::new(PaperVenue::builder().open(false).build());
        let engine = engine(store, Arc::clone(&venue));
        let acct = AccountId::new("acct");

        let err = engine.execute_rebalance(&acct).unwrap_err();
        let id = err.batch().unwrap();
        assert!(matches!(err, Error::MarketClosed { .. }));
        assert!(venue.submitted_orders().is_empty());
        assert_eq!(engine.batch(id).unwrap().status, BatchStatus::Matching);
        assert_eq!(engine.leases().holder(&acct), None);

        venue.set_open(true);
        let batch = engine.resume_batch(id).unwrap();
        assert_eq!(batch.status, BatchStatus::Ready);
    }

    #[test]
    fn partial_sell_shrinks_buys() {
        let store = store();
        let venue = Arc::new(
            PaperVenue::builder()
                .symbol_mode(aapl(), FillMode::ImmediatePartial(dec!(0.5)))
                .build(),
        );
        let engine = engine(Arc::clone(&store), Arc::clone(&venue));

        let batch = engine.execute_rebalance(&AccountId::new("acct")).unwrap();
        let buy = batch.orders.iter().find(|o| o.phase() == Phase::Buy).unwrap();
        assert_eq!(buy.size, dec!(250));
        let snapshot = store.load_account(&AccountId::new("acct")).unwrap();
        assert_eq!(snapshot.total_value(), dec!(1000));
    }

    #[test]
    fn backtest_replays_account_targets() {
        use weightbook::PricePoint;

        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let flat: Vec<PricePoint> = (0..10)
            .map(|i| PricePoint::new(start + chrono::Duration::days(i), dec!(100)))
            .collect();
        let history = MemoryHistory::new()
            .with_series(aapl(), flat.clone())
            .with_series(tsla(), flat.clone())
            .with_series(Symbol::new("SPY"), flat);
        let engine = Engine::new(
            &fast_config(),
            store(),
            Arc::new(PaperVenue::builder().build()),
            Arc::new(history),
        );

        let end = start + chrono::Duration::days(9);
        let backtest = engine
            .backtest(&Scope::Account(AccountId::new("acct")), start, end, engine.benchmark())
            .unwrap();
        assert_eq!(backtest.steps.len(), 10);
        assert_eq!(backtest.steps[0].trades, 2);
        assert!(backtest.steps[1..].iter().all(|s| s.trades == 0));
        assert_eq!(backtest.report.assets.end_value, dec!(30000));
        assert_eq!(backtest.report.relative_return, Some(0.0));
    }

    #[test]
    fn all_cash_account_backtests_flat() {
        use weightbook::PricePoint;

        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let spy: Vec<PricePoint> = (0..5)
            .map(|i| PricePoint::new(start + chrono::Duration::days(i), dec!(400) + Decimal::from(i)))
            .collect();
        let store = MemoryStore::new();
        store
            .insert_account(
                AccountSnapshot::new("acct").with_portfolio(PortfolioRecord::new("p", "P", dec!(100)).with_cash(dec!(1000))),
            )
            .unwrap();
        let engine = Engine::new(
            &fast_config(),
            Arc::new(store),
            Arc::new(PaperVenue::builder().build()),
            Arc::new(MemoryHistory::new().with_series(Symbol::new("SPY"), spy)),
        );

        let end = start + chrono::Duration::days(4);
        let backtest = engine
            .backtest(&Scope::Account(AccountId::new("acct")), start, end, engine.benchmark())
            .unwrap();
        assert_eq!(backtest.steps.len(), 5);
        assert!(backtest.steps.iter().all(|s| s.trades == 0 && s.value == dec!(30000)));
        assert_eq!(backtest.report.assets.end_value, dec!(30000));
    }

    #[test]
    fn unknown_batch() {
        let engine = engine(store(), Arc::new(PaperVenue::builder().build()));
        assert!(matches!(engine.cancel_batch(BatchId(99)), Err(Error::UnknownBatch(_))));
        assert!(matches!(engine.resume_batch(BatchId(99)), Err(Error::UnknownBatch(_))));
    }

    #[test]
    fn validation_failure_releases_lease() {
        let store = store();
        let engine = engine(Arc::clone(&store), Arc::new(PaperVenue::builder().build()));
        let mut bad = store.load_account(&AccountId::new("acct")).unwrap();
        bad.portfolios[0].weight = dec!(120);
        store.write_account(&bad).unwrap();

        let err = engine.execute_rebalance(&AccountId::new("acct")).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(engine.leases().holder(&AccountId::new("acct")), None);
    }
}
