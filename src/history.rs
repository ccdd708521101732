//! Price history collaborator and date alignment.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use rustc_hash::FxHashMap;

use crate::error::HistoryError;
use crate::types::{Money, Symbol};

/// One closing price.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PricePoint {
    pub date: NaiveDate,
    pub price: Money,
}

impl PricePoint {
    pub fn new(date: NaiveDate, price: Money) -> Self {
        Self { date, price }
    }
}

/// Source of historical prices.
pub trait PriceHistory {
    /// Prices for `symbol` with `start <= date <= end`, ascending by date.
    fn prices(&self, symbol: &Symbol, start: NaiveDate, end: NaiveDate) -> Result<Vec<PricePoint>, HistoryError>;
}

/// In-memory price history, used by tests and the command-line tool.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct MemoryHistory {
    series: FxHashMap<Symbol, Vec<PricePoint>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) the series for `symbol`. Points are sorted by date.
    pub fn insert(&mut self, symbol: Symbol, mut points: Vec<PricePoint>) {
        points.sort_by_key(|p| p.date);
        self.series.insert(symbol, points);
    }

    /// Builder-style [`MemoryHistory::insert`].
    pub fn with_series(mut self, symbol: Symbol, points: Vec<PricePoint>) -> Self {
        self.insert(symbol, points);
        self
    }

    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.series.keys()
    }

    /// Parse `{"SYM": [{"date": "...", "price": "..."}, ...], ...}`.
    #[cfg(feature = "serde")]
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let mut history: MemoryHistory = serde_json::from_str(json)?;
        for points in history.series.values_mut() {
            points.sort_by_key(|p| p.date);
        }
        Ok(history)
    }
}

impl PriceHistory for MemoryHistory {
    fn prices(&self, symbol: &Symbol, start: NaiveDate, end: NaiveDate) -> Result<Vec<PricePoint>, HistoryError> {
        Ok(self
            .series
            .get(symbol)
            .map(|points| {
                points
                    .iter()
                    .filter(|p| p.date >= start && p.date <= end)
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Prices of several symbols on a common calendar.
///
/// The calendar is the union of all dates in the window. A symbol missing a
/// date carries its previous price forward. Rows start on the first date on
/// which every symbol has a price.
#[derive(Clone, Debug)]
pub struct PriceTable {
    symbols: Vec<Symbol>,
    dates: Vec<NaiveDate>,
    /// `rows[i][j]` is the price of `symbols[j]` on `dates[i]`.
    rows: Vec<Vec<Money>>,
}

impl PriceTable {
    /// Fetch and align `symbols` over `[start, end]`.
    pub fn load(
        history: &dyn PriceHistory,
        symbols: &[Symbol],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Self, HistoryError> {
        let mut series = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            let points = history.prices(symbol, start, end)?;
            if points.is_empty() {
                return Err(HistoryError::MissingSymbol {
                    symbol: *symbol,
                    start,
                    end,
                });
            }
            series.push(points);
        }
        Ok(Self::align(symbols.to_vec(), &series))
    }

    fn align(symbols: Vec<Symbol>, series: &[Vec<PricePoint>]) -> Self {
        let calendar: BTreeSet<NaiveDate> = series.iter().flatten().map(|p| p.date).collect();

        let mut cursors = vec![0usize; series.len()];
        let mut last: Vec<Option<Money>> = vec![None; series.len()];
        let mut dates = Vec::new();
        let mut rows = Vec::new();

        for date in calendar {
            for (j, points) in series.iter().enumerate() {
                while cursors[j] < points.len() && points[cursors[j]].date <= date {
                    last[j] = Some(points[cursors[j]].price);
                    cursors[j] += 1;
                }
            }
            if let Some(row) = last.iter().copied().collect::<Option<Vec<Money>>>() {
                dates.push(date);
                rows.push(row);
            }
        }

        Self { symbols, dates, rows }
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Date and `(symbol, price)` pairs of row `i`.
    pub fn row(&self, i: usize) -> Option<(NaiveDate, impl Iterator<Item = (Symbol, Money)> + '_)> {
        let prices = self.rows.get(i)?;
        Some((self.dates[i], self.symbols.iter().copied().zip(prices.iter().copied())))
    }
}
