//! Reconciliation: settling timed-out orders against the venue, and
//! comparing actual weights against targets.

use log::info;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use weightbook::{AccountId, FULL, Money, Sleeve, Symbol, WeightError, Weights};
use weightbook_venue::VenueOrderId;

use crate::audit;
use crate::batch::{BatchId, ExecutionBatch, lock};
use crate::error::Result;
use crate::execution::Engine;
use crate::order::{Order, OrderEvent, OrderKey, OrderState};
use crate::store::AccountSnapshot;

impl Engine {
    /// Re-query the venue for every timed-out or cancelling order of a
    /// batch and record what it reports. This is the only path by which a
    /// late fill reaches the account's holdings.
    pub fn reconcile_batch(&self, id: BatchId) -> Result<ExecutionBatch> {
        let handle = self.handle(id)?;
        let unresolved: Vec<(OrderKey, OrderState, Option<VenueOrderId>)> = lock(&handle)
            .orders
            .iter()
            .filter(|o| matches!(o.state, OrderState::TimedOut | OrderState::Cancelling))
            .map(|o| (o.key, o.state, o.venue_id))
            .collect();

        for (key, state, venue_id) in unresolved {
            let venue_id = match venue_id {
                Some(v) => Some(v),
                None => self.gate.find(&key.client_order_id())?,
            };
            let Some(venue_id) = venue_id else {
                info!("{key}: unknown to the venue");
                let event = match state {
                    OrderState::Cancelling => OrderEvent::Cancelled(Money::ZERO),
                    _ => OrderEvent::Reject("never reached venue".into()),
                };
                self.record(&handle, &key, event);
                continue;
            };

            self.record(&handle, &key, OrderEvent::Ack(venue_id));
            let report = self.gate.fill(venue_id)?;
            match Order::event_for(&report) {
                Some(event) => self.record(&handle, &key, event),
                None => info!("{key}: still working at {venue_id}"),
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
        info!("{id}: reconciled, now {}", batch.status);
        self.audit(|log| audit::log_batch_reconciled(log, &batch));
        settled.map(|_| batch.clone())
    }

    /// Drift of `account` from its target weights.
    pub fn drift(&self, account: &AccountId) -> Result<DriftReport> {
        let snapshot = self.store.load_account(account)?;
        Ok(drift_report(&snapshot)?)
    }
}

/// Actual vs target weights of one account.
#[derive(Debug, Clone, Serialize)]
pub struct DriftReport {
    pub account: String,
    pub total_value: Money,
    pub portfolios: Vec<PortfolioDrift>,
    /// Root-mean-square of every symbol-level weight difference, in percent
    /// of the account.
    pub tracking_error_pct: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PortfolioDrift {
    pub portfolio: String,
    /// Share of the account, in percent.
    pub target_weight: f64,
    pub actual_weight: f64,
    pub entries: Vec<DriftEntry>,
}

/// One symbol's weights within its portfolio, in percent.
#[derive(Debug, Clone, Serialize)]
pub struct DriftEntry {
    pub symbol: String,
    pub target_weight: f64,
    pub actual_weight: f64,
    pub diff_weight: f64,
}

fn pct(part: Money, whole: Money) -> f64 {
    if whole.is_zero() {
        return 0.0;
    }
    (part * FULL / whole).to_f64().unwrap_or(0.0)
}

/// Compare each portfolio's actual weights against its targets.
pub fn drift_report(snapshot: &AccountSnapshot) -> std::result::Result<DriftReport, WeightError> {
    let sleeves: Weights<Sleeve> = snapshot.account_weights()?;
    let total = snapshot.total_value();

    let mut portfolios = Vec::with_capacity(snapshot.portfolios.len());
    let mut sum_sq = 0.0_f64;
    let mut count = 0_usize;

    for p in &snapshot.portfolios {
        let targets = p.position_weights()?;
        let value = p.value();
        let holdings = p.holdings();
        let share = sleeves.get(&Sleeve::Portfolio(p.id.clone()));

        let mut symbols: Vec<Symbol> = holdings.keys().copied().chain(targets.iter().map(|(s, _)| *s)).collect();
        symbols.sort();
        symbols.dedup();

        let entries: Vec<DriftEntry> = symbols
            .into_iter()
            .map(|symbol| {
                let target_weight = targets.get(&symbol).to_f64().unwrap_or(0.0);
                let actual = holdings.get(&symbol).copied().unwrap_or(Money::ZERO);
                let actual_weight = pct(actual, value);
                let diff_weight = actual_weight - target_weight;

                // Symbol drift scaled to the account.
                let account_diff = diff_weight * share.to_f64().unwrap_or(0.0) / 100.0;
                sum_sq += account_diff * account_diff;
                count += 1;

                DriftEntry {
                    symbol: symbol.as_str().to_string(),
                    target_weight,
                    actual_weight,
                    diff_weight,
                }
            })
            .collect();

        portfolios.push(PortfolioDrift {
            portfolio: p.id.to_string(),
            target_weight: share.to_f64().unwrap_or(0.0),
            actual_weight: pct(value, total),
            entries,
        });
    }

    let tracking_error_pct = (sum_sq / count.max(1) as f64).sqrt();

    Ok(DriftReport {
        account: snapshot.id.to_string(),
        total_value: total,
        portfolios,
        tracking_error_pct,
    })
}

impl std::fmt::Display for DriftReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "DRIFT for account {} (value {:.2}):", self.account, self.total_value)?;
        for p in &self.portfolios {
            writeln!(
                f,
                "  portfolio {}: target {:.2}%, actual {:.2}%",
                p.portfolio, p.target_weight, p.actual_weight
            )?;
            writeln!(f, "    {:8} {:>10} {:>10} {:>10}", "Symbol", "Target%", "Actual%", "Diff%")?;
            for e in &p.entries {
                writeln!(
                    f,
                    "    {:8} {:>9.2}% {:>9.2}% {:>+9.2}%",
                    e.symbol, e.target_weight, e.actual_weight, e.diff_weight,
                )?;
            }
        }
        writeln!(f, "\n  Tracking error: {:.3}%", self.tracking_error_pct)?;
        Ok(())
    }
}
