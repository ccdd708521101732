//! Account-level planning: per-portfolio trade plans netted into one venue
//! order per symbol, and the write-back of executed fills.

use std::fmt;

use rust_decimal::{Decimal, RoundingStrategy};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use weightbook::{
    AccountId, FULL, Money, Phase, PortfolioId, Scope, Sleeve, Symbol, TradePlan, Weights, compute_plan,
};

use crate::error::{Error, Result};
use crate::store::{AccountSnapshot, PortfolioRecord};

/// Trade plan of one portfolio within an account plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SleevePlan {
    pub portfolio: PortfolioId,
    /// Value the portfolio should have once the account is rebalanced.
    pub target_value: Money,
    pub plan: TradePlan,
}

/// One venue order: the net of every portfolio's delta for a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetOrder {
    pub symbol: Symbol,
    pub phase: Phase,
    /// Signed net delta before rounding.
    pub delta: Money,
    /// Notional sent to the venue, rounded toward zero to cents.
    pub size: Money,
}

/// Everything one account needs to trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountPlan {
    pub account: AccountId,
    pub total_value: Money,
    /// Account cash at planning time.
    pub cash: Money,
    /// Sell-only plan; target weights are zeroed once it settles.
    pub liquidation: bool,
    pub sleeves: Vec<SleevePlan>,
    pub orders: Vec<NetOrder>,
    /// Net orders dropped for being under the minimum trade.
    pub dust: usize,
}

impl AccountPlan {
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn sleeve(&self, id: &PortfolioId) -> Option<&SleevePlan> {
        self.sleeves.iter().find(|s| &s.portfolio == id)
    }

    pub fn orders_in(&self, phase: Phase) -> impl Iterator<Item = &NetOrder> {
        self.orders.iter().filter(move |o| o.phase == phase)
    }

    pub fn notional(&self, phase: Phase) -> Money {
        self.orders_in(phase).map(|o| o.size).sum()
    }
}

impl fmt::Display for AccountPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.liquidation { "LIQUIDATION" } else { "REBALANCE" };
        writeln!(
            f,
            "{kind} for account {} (value {:.2}, cash {:.2}):",
            self.account, self.total_value, self.cash
        )?;
        for sleeve in &self.sleeves {
            writeln!(
                f,
                "  portfolio {:12} target {:>12.2}  {} sell(s), {} buy(s)",
                sleeve.portfolio.to_string(),
                sleeve.target_value,
                sleeve.plan.sells.len(),
                sleeve.plan.buys.len(),
            )?;
        }
        if self.orders.is_empty() {
            writeln!(f, "  nothing to trade")?;
        } else {
            writeln!(f, "  {:>3}  {:5} {:8} {:>14}", "#", "Side", "Symbol", "Notional")?;
            for (i, o) in self.orders.iter().enumerate() {
                writeln!(
                    f,
                    "  {:>3}  {:5} {:8} {:>14.2}",
                    i + 1,
                    o.phase.to_string(),
                    o.symbol,
                    o.size
                )?;
            }
            writeln!(
                f,
                "  sells {:.2}, buys {:.2}",
                self.notional(Phase::Sell),
                self.notional(Phase::Buy)
            )?;
        }
        if self.dust > 0 {
            writeln!(f, "  ({} order(s) under the minimum skipped)", self.dust)?;
        }
        Ok(())
    }
}

/// Plan a full rebalance of `snapshot` to its target weights.
///
/// Both weight levels are validated before anything else; a portfolio's
/// target value is `total * w_portfolio / 100`.
pub fn plan_rebalance(snapshot: &AccountSnapshot, min_trade: Money) -> Result<AccountPlan> {
    let account_weights = snapshot.account_weights()?;
    let total_value = snapshot.total_value();

    let mut sleeves = Vec::with_capacity(snapshot.portfolios.len());
    for portfolio in &snapshot.portfolios {
        let positions = portfolio.position_weights()?;
        let share = account_weights.get(&Sleeve::Portfolio(portfolio.id.clone()));
        let target_value = total_value * share / FULL;
        sleeves.push(sleeve_plan(portfolio, &positions, target_value));
    }

    Ok(assemble(snapshot, sleeves, false, min_trade))
}

/// Plan a sell-only batch moving every non-cash holding of the account, or
/// of one portfolio, into cash.
pub fn plan_liquidation(
    snapshot: &AccountSnapshot,
    only: Option<&PortfolioId>,
    min_trade: Money,
) -> Result<AccountPlan> {
    if let Some(id) = only {
        if snapshot.portfolio(id).is_none() {
            return Err(Error::UnknownPortfolio(id.clone()));
        }
    }

    let cash_only = Weights::all_residual();
    let sleeves = snapshot
        .portfolios
        .iter()
        .filter(|p| only.is_none_or(|id| &p.id == id))
        .map(|p| sleeve_plan(p, &cash_only, p.value()))
        .collect();

    Ok(assemble(snapshot, sleeves, true, min_trade))
}

fn sleeve_plan(portfolio: &PortfolioRecord, targets: &Weights<Symbol>, target_value: Money) -> SleevePlan {
    // Dust is filtered after netting, not per portfolio.
    let plan = compute_plan(
        Scope::Portfolio(portfolio.id.clone()),
        &portfolio.holdings(),
        targets,
        target_value,
        Decimal::ZERO,
    );
    SleevePlan {
        portfolio: portfolio.id.clone(),
        target_value,
        plan,
    }
}

fn assemble(snapshot: &AccountSnapshot, sleeves: Vec<SleevePlan>, liquidation: bool, min_trade: Money) -> AccountPlan {
    let (orders, dust) = net_orders(&sleeves, min_trade);
    AccountPlan {
        account: snapshot.id.clone(),
        total_value: snapshot.total_value(),
        cash: snapshot.cash(),
        liquidation,
        sleeves,
        orders,
        dust,
    }
}

/// Net every portfolio's delta into one order per symbol. Returns the orders
/// (sells first, then by symbol) and the number dropped as dust.
pub fn net_orders(sleeves: &[SleevePlan], min_trade: Money) -> (Vec<NetOrder>, usize) {
    let mut net: FxHashMap<Symbol, Money> = FxHashMap::default();
    for entry in sleeves.iter().flat_map(|s| s.plan.entries()) {
        *net.entry(entry.symbol).or_insert(Decimal::ZERO) += entry.delta;
    }

    let mut orders = Vec::new();
    let mut dust = 0;
    for (symbol, delta) in net {
        if delta.is_zero() {
            continue;
        }
        let size = delta.abs().round_dp_with_strategy(2, RoundingStrategy::ToZero);
        if size.is_zero() || size < min_trade {
            dust += 1;
            continue;
        }
        let phase = if delta < Decimal::ZERO { Phase::Sell } else { Phase::Buy };
        orders.push(NetOrder {
            symbol,
            phase,
            delta,
            size,
        });
    }
    orders.sort_by_key(|o| (o.phase, o.symbol));
    (orders, dust)
}

/// Write executed fills back into `snapshot`.
///
/// For each symbol, portfolio deltas on the opposite side of the net order
/// are internal transfers and apply in full; the rest of the executed
/// notional is shared among same-side portfolios in proportion to their
/// deltas. Cash is then redistributed among the planned portfolios toward
/// their target values, the remainder staying unallocated. The account total
/// is unchanged. A liquidation zeroes the weights of the positions it
/// emptied; a position whose sell did not fill keeps its target.
pub fn apply_fills(snapshot: &mut AccountSnapshot, plan: &AccountPlan, executed: &FxHashMap<Symbol, Money>) {
    let mut allocations: FxHashMap<Symbol, Vec<(PortfolioId, Money)>> = FxHashMap::default();
    for sleeve in &plan.sleeves {
        for entry in sleeve.plan.entries() {
            allocations
                .entry(entry.symbol)
                .or_default()
                .push((sleeve.portfolio.clone(), entry.delta));
        }
    }

    for (symbol, deltas) in &allocations {
        let net: Money = deltas.iter().map(|(_, d)| *d).sum();
        let filled = executed.get(symbol).copied().unwrap_or(Decimal::ZERO);
        let same_side = |d: &Money| !net.is_zero() && d.is_sign_negative() == net.is_sign_negative();

        let crossed: Money = deltas.iter().map(|(_, d)| *d).filter(|d| !same_side(d)).sum();
        let same: Money = deltas.iter().map(|(_, d)| *d).filter(|d| same_side(d)).sum();
        let scale = if same.is_zero() {
            Decimal::ZERO
        } else {
            (filled - crossed) / same
        };

        for (portfolio, delta) in deltas {
            let applied = if same_side(delta) { *delta * scale } else { *delta };
            if applied.is_zero() {
                continue;
            }
            if let Some(record) = snapshot.portfolio_mut(portfolio) {
                record.trade(*symbol, applied);
            }
        }
    }

    redistribute_cash(snapshot, plan);

    if plan.liquidation {
        for sleeve in &plan.sleeves {
            if let Some(record) = snapshot.portfolio_mut(&sleeve.portfolio) {
                record.zero_sold_weights();
            }
        }
    }
}

fn redistribute_cash(snapshot: &mut AccountSnapshot, plan: &AccountPlan) {
    let planned: Vec<&SleevePlan> = plan
        .sleeves
        .iter()
        .filter(|s| snapshot.portfolio(&s.portfolio).is_some())
        .collect();

    let pool: Money = snapshot.unallocated_cash
        + planned
            .iter()
            .filter_map(|s| snapshot.portfolio(&s.portfolio))
            .map(|p| p.cash)
            .sum::<Money>();

    let desired: Vec<Money> = planned
        .iter()
        .map(|s| {
            let invested = snapshot.portfolio(&s.portfolio).map(PortfolioRecord::invested);
            (s.target_value - invested.unwrap_or(Decimal::ZERO)).max(Decimal::ZERO)
        })
        .collect();
    let wanted: Money = desired.iter().copied().sum();
    let scale = if wanted > pool && wanted > Decimal::ZERO {
        pool.max(Decimal::ZERO) / wanted
    } else {
        Decimal::ONE
    };

    let mut assigned = Decimal::ZERO;
    for (sleeve, want) in planned.iter().zip(desired) {
        let cash = (want * scale).round_dp_with_strategy(2, RoundingStrategy::ToZero);
        if let Some(record) = snapshot.portfolio_mut(&sleeve.portfolio) {
            record.cash = cash;
            assigned += cash;
        }
    }
    snapshot.unallocated_cash = pool - assigned;
}
