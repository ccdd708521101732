//! Plan Computer: CURRENT→TARGET diff for one scope.
//!
//! Works on market values, not share counts. Every symbol present in either
//! the holdings or the targets gets `target = total * weight / 100` and
//! `delta = target - current`; symbols held but not targeted are fully
//! liquidated. Deltas below the minimum trade are dropped. The result is
//! split into two ordered phases: sells settle before buys are sized.

use std::fmt;

use rust_decimal::Decimal;
use rustc_hash::FxHashMap;

use crate::types::{Money, Scope, Symbol, Weight};
use crate::weights::{FULL, Weights};

/// Current market value per symbol. May contain [`Symbol::CASH`].
pub type Holdings = FxHashMap<Symbol, Money>;

/// Execution phase. Sells (phase 1) complete before buys (phase 2) start.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Phase {
    Sell,
    Buy,
}

impl Phase {
    pub const ORDERED: [Phase; 2] = [Phase::Sell, Phase::Buy];
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Sell => f.write_str("sell"),
            Phase::Buy => f.write_str("buy"),
        }
    }
}

/// One line of a [`TradePlan`].
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PlanEntry {
    pub symbol: Symbol,
    pub target_weight: Weight,
    pub current_value: Money,
    pub target_value: Money,
    /// Signed value change: negative sells, positive buys.
    pub delta: Money,
}

impl PlanEntry {
    pub fn phase(&self) -> Phase {
        if self.delta.is_sign_negative() {
            Phase::Sell
        } else {
            Phase::Buy
        }
    }

    /// Unsigned trade value.
    pub fn notional(&self) -> Money {
        self.delta.abs()
    }
}

/// Ordered two-phase set of value deltas for one scope.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TradePlan {
    pub scope: Scope,
    pub total_value: Money,
    /// Phase 1.
    pub sells: Vec<PlanEntry>,
    /// Phase 2.
    pub buys: Vec<PlanEntry>,
    /// Non-zero deltas dropped for being under the minimum trade.
    pub dust: usize,
}

impl TradePlan {
    pub fn is_empty(&self) -> bool {
        self.sells.is_empty() && self.buys.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sells.len() + self.buys.len()
    }

    pub fn phase(&self, phase: Phase) -> &[PlanEntry] {
        match phase {
            Phase::Sell => &self.sells,
            Phase::Buy => &self.buys,
        }
    }

    /// Sells then buys.
    pub fn entries(&self) -> impl Iterator<Item = &PlanEntry> {
        self.sells.iter().chain(self.buys.iter())
    }

    pub fn sell_notional(&self) -> Money {
        self.sells.iter().map(PlanEntry::notional).sum()
    }

    pub fn buy_notional(&self) -> Money {
        self.buys.iter().map(PlanEntry::notional).sum()
    }

    /// Change in the scope's cash if the plan executes in full.
    pub fn cash_delta(&self) -> Money {
        -self.entries().map(|e| e.delta).sum::<Money>()
    }

    /// Execute the plan instantly against `holdings` (frictionless mode).
    ///
    /// Every delta moves value between the symbol and [`Symbol::CASH`], so
    /// the holdings total is unchanged.
    pub fn apply(&self, holdings: &Holdings) -> Holdings {
        let mut next = holdings.clone();
        for entry in self.entries() {
            *next.entry(entry.symbol).or_insert(Decimal::ZERO) += entry.delta;
            *next.entry(Symbol::CASH).or_insert(Decimal::ZERO) -= entry.delta;
        }
        next.retain(|sym, value| sym.is_cash() || !value.is_zero());
        next
    }
}

impl fmt::Display for TradePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "PLAN for {} (value {:.2}):", self.scope, self.total_value)?;
        writeln!(
            f,
            "  {:>5}  {:8} {:>8} {:>14} {:>14} {:>14}",
            "Phase", "Symbol", "Target%", "Current", "Target", "Delta"
        )?;
        for e in self.entries() {
            writeln!(
                f,
                "  {:>5}  {:8} {:>8.2} {:>14.2} {:>14.2} {:>+14.2}",
                e.phase().to_string(),
                e.symbol,
                e.target_weight,
                e.current_value,
                e.target_value,
                e.delta,
            )?;
        }
        if self.dust > 0 {
            writeln!(f, "  ({} trade(s) under the minimum skipped)", self.dust)?;
        }
        Ok(())
    }
}

/// Compute the trade plan that moves `current` to `targets`.
///
/// # Arguments
/// - `scope`: label carried into the plan
/// - `current`: market value per symbol (cash entries are ignored)
/// - `targets`: normalized target weights for the scope
/// - `total_value`: investable value of the scope
/// - `min_trade`: deltas with `|delta| < min_trade` are dropped
///
/// Within a phase entries are in symbol order; no other ordering is implied.
pub fn compute_plan(
    scope: Scope,
    current: &Holdings,
    targets: &Weights<Symbol>,
    total_value: Money,
    min_trade: Money,
) -> TradePlan {
    let mut symbols: Vec<Symbol> = current
        .keys()
        .copied()
        .chain(targets.explicit().map(|(s, _)| *s))
        .filter(|s| !s.is_cash())
        .collect();
    symbols.sort();
    symbols.dedup();

    let mut sells = Vec::new();
    let mut buys = Vec::new();
    let mut dust = 0;

    for symbol in symbols {
        let target_weight = targets.get(&symbol);
        let current_value = current.get(&symbol).copied().unwrap_or(Decimal::ZERO);
        let target_value = total_value * target_weight / FULL;
        let delta = target_value - current_value;

        if delta.is_zero() {
            continue;
        }
        if delta.abs() < min_trade {
            dust += 1;
            continue;
        }

        let entry = PlanEntry {
            symbol,
            target_weight,
            current_value,
            target_value,
            delta,
        };
        match entry.phase() {
            Phase::Sell => sells.push(entry),
            Phase::Buy => buys.push(entry),
        }
    }

    TradePlan {
        scope,
        total_value,
        sells,
        buys,
        dust,
    }
}

/// Total value of a holdings map, cash included.
pub fn holdings_value(holdings: &Holdings) -> Money {
    holdings.values().copied().sum()
}
