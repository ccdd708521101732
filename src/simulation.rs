//! Simulation Engine: frictionless replay of target weights over history.
//!
//! At each step the scope is valued from the previous step's holdings at the
//! new prices; when a rebalance is due the Plan Computer is run against that
//! value and its deltas execute instantly at the step's prices. No venue and
//! no orders are involved.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use rustc_hash::FxHashMap;

use crate::analysis::ValuePoint;
use crate::error::HistoryError;
use crate::history::{PriceHistory, PriceTable};
use crate::plan::{Holdings, compute_plan, holdings_value};
use crate::types::{Money, Scope, Symbol};
use crate::weights::Weights;

/// How often the replay trades back to target.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum RebalancingFrequency {
    /// Every step.
    #[default]
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
    /// Only the initial allocation.
    Never,
}

impl RebalancingFrequency {
    /// Whether a rebalance is due on `date` given the previous one.
    pub fn is_due(&self, last: Option<NaiveDate>, date: NaiveDate) -> bool {
        let Some(last) = last else {
            return true;
        };
        match self {
            RebalancingFrequency::Daily => true,
            RebalancingFrequency::Weekly => date.iso_week() != last.iso_week(),
            RebalancingFrequency::Monthly => (date.year(), date.month()) != (last.year(), last.month()),
            RebalancingFrequency::Quarterly => (date.year(), date.month0() / 3) != (last.year(), last.month0() / 3),
            RebalancingFrequency::Yearly => date.year() != last.year(),
            RebalancingFrequency::Never => false,
        }
    }
}

impl fmt::Display for RebalancingFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RebalancingFrequency::Daily => "daily",
            RebalancingFrequency::Weekly => "weekly",
            RebalancingFrequency::Monthly => "monthly",
            RebalancingFrequency::Quarterly => "quarterly",
            RebalancingFrequency::Yearly => "yearly",
            RebalancingFrequency::Never => "never",
        };
        f.write_str(s)
    }
}

impl FromStr for RebalancingFrequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            "quarterly" => Ok(Self::Quarterly),
            "yearly" => Ok(Self::Yearly),
            "never" => Ok(Self::Never),
            other => Err(format!("unknown rebalancing frequency: {other}")),
        }
    }
}

/// Replay parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimulationConfig {
    pub initial_cash: Money,
    pub frequency: RebalancingFrequency,
    /// Deltas under this value are not traded.
    pub min_trade: Money,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            initial_cash: dec!(30000),
            frequency: RebalancingFrequency::Daily,
            min_trade: dec!(1),
        }
    }
}

/// One replayed step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimulationStep {
    pub date: NaiveDate,
    /// Scope value at this step's prices, before any rebalance.
    pub value: Money,
    /// Trades executed at this step.
    pub trades: usize,
    /// Sum of traded notional at this step.
    pub turnover: Money,
}

/// A prepared replay over one window. Iterate with [`Simulation::iter`];
/// every call starts again from the first step.
#[derive(Clone, Debug)]
pub struct Simulation {
    scope: Scope,
    targets: Weights<Symbol>,
    table: PriceTable,
    config: SimulationConfig,
}

impl Simulation {
    /// Load prices for every weighted symbol of `targets` over `[start, end]`.
    ///
    /// An all-cash target has nothing to price and therefore no calendar:
    /// it fails with [`HistoryError::TooShort`]. Use
    /// [`Simulation::with_calendar`] to replay it anyway.
    pub fn new(
        scope: Scope,
        targets: Weights<Symbol>,
        history: &dyn PriceHistory,
        start: NaiveDate,
        end: NaiveDate,
        config: SimulationConfig,
    ) -> Result<Self, HistoryError> {
        Self::prepare(scope, targets, history, start, end, config, None)
    }

    /// Like [`Simulation::new`], but an all-cash target replays on the
    /// trading dates of `calendar` (typically the benchmark) and stays flat.
    pub fn with_calendar(
        scope: Scope,
        targets: Weights<Symbol>,
        history: &dyn PriceHistory,
        start: NaiveDate,
        end: NaiveDate,
        config: SimulationConfig,
        calendar: Symbol,
    ) -> Result<Self, HistoryError> {
        Self::prepare(scope, targets, history, start, end, config, Some(calendar))
    }

    fn prepare(
        scope: Scope,
        targets: Weights<Symbol>,
        history: &dyn PriceHistory,
        start: NaiveDate,
        end: NaiveDate,
        config: SimulationConfig,
        calendar: Option<Symbol>,
    ) -> Result<Self, HistoryError> {
        if start > end {
            return Err(HistoryError::TooShort { have: 0, need: 1 });
        }
        let mut symbols: Vec<Symbol> = targets
            .explicit()
            .filter(|(_, w)| !w.is_zero())
            .map(|(s, _)| *s)
            .collect();
        if symbols.is_empty() {
            match calendar {
                Some(symbol) => symbols.push(symbol),
                None => return Err(HistoryError::TooShort { have: 0, need: 1 }),
            }
        }
        let table = PriceTable::load(history, &symbols, start, end)?;
        if table.is_empty() {
            return Err(HistoryError::TooShort { have: 0, need: 1 });
        }
        Ok(Self {
            scope,
            targets,
            table,
            config,
        })
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn targets(&self) -> &Weights<Symbol> {
        &self.targets
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Number of steps in the window.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Lazy replay from the first step.
    pub fn iter(&self) -> Trajectory<'_> {
        Trajectory {
            sim: self,
            cursor: 0,
            units: FxHashMap::default(),
            cash: self.config.initial_cash,
            last_rebalance: None,
        }
    }

    /// Run the whole replay.
    pub fn run(&self) -> Vec<SimulationStep> {
        self.iter().collect()
    }

    /// `(date, value)` pairs of the whole replay.
    pub fn values(&self) -> Vec<ValuePoint> {
        self.iter().map(|s| ValuePoint::new(s.date, s.value)).collect()
    }
}

impl<'a> IntoIterator for &'a Simulation {
    type Item = SimulationStep;
    type IntoIter = Trajectory<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the steps of a [`Simulation`].
#[derive(Clone, Debug)]
pub struct Trajectory<'a> {
    sim: &'a Simulation,
    cursor: usize,
    /// Units held per symbol (fractional units are allowed).
    units: FxHashMap<Symbol, Decimal>,
    cash: Money,
    last_rebalance: Option<NaiveDate>,
}

impl Trajectory<'_> {
    fn holdings(&self, prices: &FxHashMap<Symbol, Money>) -> Holdings {
        let mut holdings: Holdings = self
            .units
            .iter()
            .map(|(sym, units)| (*sym, *units * prices.get(sym).copied().unwrap_or(Decimal::ZERO)))
            .collect();
        holdings.insert(Symbol::CASH, self.cash);
        holdings
    }
}

impl Iterator for Trajectory<'_> {
    type Item = SimulationStep;

    fn next(&mut self) -> Option<Self::Item> {
        let (date, row) = self.sim.table.row(self.cursor)?;
        self.cursor += 1;

        let prices: FxHashMap<Symbol, Money> = row.collect();
        let holdings = self.holdings(&prices);
        let value = holdings_value(&holdings);

        let mut trades = 0;
        let mut turnover = Decimal::ZERO;
        if self.sim.config.frequency.is_due(self.last_rebalance, date) {
            let plan = compute_plan(
                self.sim.scope.clone(),
                &holdings,
                &self.sim.targets,
                value,
                self.sim.config.min_trade,
            );
            for entry in plan.entries() {
                let Some(price) = prices.get(&entry.symbol).copied().filter(|p| !p.is_zero()) else {
                    continue;
                };
                *self.units.entry(entry.symbol).or_insert(Decimal::ZERO) += entry.delta / price;
                self.cash -= entry.delta;
                trades += 1;
                turnover += entry.notional();
            }
            self.last_rebalance = Some(date);
        }

        Some(SimulationStep {
            date,
            value,
            trades,
            turnover,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.sim.table.len().saturating_sub(self.cursor);
        (left, Some(left))
    }
}

impl ExactSizeIterator for Trajectory<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{MemoryHistory, PricePoint};
    use crate::types::PortfolioId;
    use chrono::Duration;

    fn day(n: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(n)
    }

    fn series(prices: &[Money]) -> Vec<PricePoint> {
        prices
            .iter()
            .enumerate()
            .map(|(i, p)| PricePoint::new(day(i as i64), *p))
            .collect()
    }

    fn scope() -> Scope {
        Scope::Portfolio(PortfolioId::new("p"))
    }

    #[test]
    fn frequency_due() {
        let jan31 = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        let feb1 = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        let apr1 = NaiveDate::from_ymd_opt(2024, 4, 1).unwrap();
        assert!(RebalancingFrequency::Never.is_due(None, jan31));
        assert!(!RebalancingFrequency::Never.is_due(Some(jan31), feb1));
        assert!(RebalancingFrequency::Monthly.is_due(Some(jan31), feb1));
        assert!(!RebalancingFrequency::Quarterly.is_due(Some(jan31), feb1));
        assert!(RebalancingFrequency::Quarterly.is_due(Some(jan31), apr1));
        assert!(!RebalancingFrequency::Yearly.is_due(Some(jan31), apr1));
        assert_eq!("Monthly".parse::<RebalancingFrequency>().unwrap(), RebalancingFrequency::Monthly);
        assert!("hourly".parse::<RebalancingFrequency>().is_err());
    }

    #[test]
    fn doubling_price_with_full_weight() {
        let a = Symbol::new("A");
        let h = MemoryHistory::new().with_series(a, series(&[dec!(10), dec!(20)]));
        let targets = Weights::normalize(&[(a, dec!(100))]).unwrap();
        let sim = Simulation::new(scope(), targets, &h, day(0), day(10), SimulationConfig::default()).unwrap();

        let steps = sim.run();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].value, dec!(30000));
        assert_eq!(steps[0].trades, 1);
        assert_eq!(steps[1].value, dec!(60000));
    }

    #[test]
    fn restartable() {
        let a = Symbol::new("A");
        let h = MemoryHistory::new().with_series(a, series(&[dec!(10), dec!(12), dec!(9)]));
        let targets = Weights::normalize(&[(a, dec!(60))]).unwrap();
        let sim = Simulation::new(scope(), targets, &h, day(0), day(10), SimulationConfig::default()).unwrap();

        let first: Vec<_> = sim.iter().collect();
        let second: Vec<_> = sim.iter().collect();
        assert_eq!(first, second);
        assert_eq!(sim.iter().len(), 3);
    }

    #[test]
    fn daily_rebalance_restores_weights() {
        let a = Symbol::new("A");
        let b = Symbol::new("B");
        let h = MemoryHistory::new()
            .with_series(a, series(&[dec!(10), dec!(20), dec!(20)]))
            .with_series(b, series(&[dec!(10), dec!(10), dec!(10)]));
        let targets = Weights::normalize(&[(a, dec!(50)), (b, dec!(50))]).unwrap();
        let sim = Simulation::new(scope(), targets, &h, day(0), day(10), SimulationConfig::default()).unwrap();

        let steps = sim.run();
        // 15000 in each; A doubles -> 45000, then rebalanced.
        assert_eq!(steps[1].value, dec!(45000));
        assert_eq!(steps[1].trades, 2);
        assert_eq!(steps[1].turnover, dec!(15000));
        assert_eq!(steps[2].value, dec!(45000));
        assert_eq!(steps[2].trades, 0);
    }

    #[test]
    fn never_rebalances_after_first_step() {
        let a = Symbol::new("A");
        let b = Symbol::new("B");
        let h = MemoryHistory::new()
            .with_series(a, series(&[dec!(10), dec!(20), dec!(40)]))
            .with_series(b, series(&[dec!(10), dec!(10), dec!(10)]));
        let targets = Weights::normalize(&[(a, dec!(50)), (b, dec!(50))]).unwrap();
        let config = SimulationConfig {
            frequency: RebalancingFrequency::Never,
            ..SimulationConfig::default()
        };
        let sim = Simulation::new(scope(), targets, &h, day(0), day(10), config).unwrap();

        let steps = sim.run();
        assert_eq!(steps.iter().map(|s| s.trades).sum::<usize>(), 2);
        // 1500 units of A at 40 + 15000 in B
        assert_eq!(steps[2].value, dec!(75000));
    }

    #[test]
    fn all_cash_target_needs_a_calendar() {
        let spy = Symbol::new("SPY");
        let h = MemoryHistory::new().with_series(spy, series(&[dec!(400), dec!(410), dec!(390)]));
        let targets: Weights<Symbol> = Weights::all_residual();

        let err = Simulation::new(scope(), targets.clone(), &h, day(0), day(10), SimulationConfig::default());
        assert!(matches!(err, Err(HistoryError::TooShort { .. })));

        let sim =
            Simulation::with_calendar(scope(), targets, &h, day(0), day(10), SimulationConfig::default(), spy).unwrap();
        let steps = sim.run();
        assert_eq!(steps.len(), 3);
        assert!(steps.iter().all(|s| s.value == dec!(30000) && s.trades == 0));
    }

    #[test]
    fn empty_window_fails() {
        let a = Symbol::new("A");
        let h = MemoryHistory::new().with_series(a, series(&[dec!(10)]));
        let targets = Weights::normalize(&[(a, dec!(100))]).unwrap();
        let err = Simulation::new(scope(), targets, &h, day(5), day(10), SimulationConfig::default()).unwrap_err();
        assert!(matches!(err, HistoryError::MissingSymbol { .. }));
    }
}
