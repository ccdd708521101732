//! Persistence collaborator: account/portfolio/position records and value
//! history.
//!
//! The engine only needs to read a consistent snapshot of one account, write
//! it back after a batch settles, and keep a value series per scope.
//! [`MemoryStore`] keeps everything in memory and can be saved to and loaded
//! from a JSON file.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use log::info;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use weightbook::{
    AccountId, Holdings, Money, PortfolioId, Scope, Sleeve, Symbol, ValuePoint, Weight, WeightError, Weights,
    merge_position_weights, validate,
};

use crate::error::{Error, Result};

/// One position of a portfolio: a target weight and what is currently held.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub symbol: Symbol,
    pub weight: Weight,
    #[serde(default)]
    pub market_value: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioRecord {
    pub id: PortfolioId,
    pub name: String,
    /// Share of the account, in percent.
    pub weight: Weight,
    #[serde(default)]
    pub positions: Vec<PositionRecord>,
    /// Cash held by this portfolio.
    #[serde(default)]
    pub cash: Money,
}

impl PortfolioRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>, weight: Weight) -> Self {
        Self {
            id: PortfolioId::new(id),
            name: name.into(),
            weight,
            positions: Vec::new(),
            cash: Decimal::ZERO,
        }
    }

    /// Builder-style position.
    pub fn with_position(mut self, symbol: Symbol, weight: Weight, market_value: Money) -> Self {
        self.positions.push(PositionRecord {
            symbol,
            weight,
            market_value,
        });
        self
    }

    pub fn with_cash(mut self, cash: Money) -> Self {
        self.cash = cash;
        self
    }

    /// Normalized position weights, the cash slot filled with the remainder.
    pub fn position_weights(&self) -> std::result::Result<Weights<Symbol>, WeightError> {
        let entries: Vec<(Symbol, Weight)> = self.positions.iter().map(|p| (p.symbol, p.weight)).collect();
        Weights::normalize(&entries)
    }

    /// Market value per symbol, cash included.
    pub fn holdings(&self) -> Holdings {
        let mut holdings: Holdings = self
            .positions
            .iter()
            .filter(|p| !p.symbol.is_cash())
            .map(|p| (p.symbol, p.market_value))
            .collect();
        holdings.insert(Symbol::CASH, self.cash);
        holdings
    }

    /// Value of non-cash positions.
    pub fn invested(&self) -> Money {
        self.positions
            .iter()
            .filter(|p| !p.symbol.is_cash())
            .map(|p| p.market_value)
            .sum()
    }

    pub fn value(&self) -> Money {
        self.invested() + self.cash
    }

    /// Move `delta` of value from cash into `symbol` (negative sells).
    pub fn trade(&mut self, symbol: Symbol, delta: Money) {
        match self.positions.iter_mut().find(|p| p.symbol == symbol) {
            Some(p) => p.market_value += delta,
            None => self.positions.push(PositionRecord {
                symbol,
                weight: Decimal::ZERO,
                market_value: delta,
            }),
        }
        self.cash -= delta;
    }

    /// Set the target weight of every emptied non-cash position to 0,
    /// keeping the entries. A position with value left keeps its target.
    pub fn zero_sold_weights(&mut self) {
        for p in self
            .positions
            .iter_mut()
            .filter(|p| !p.symbol.is_cash() && p.market_value.is_zero())
        {
            p.weight = Decimal::ZERO;
        }
    }

    /// No non-cash position with a weight or a value.
    pub fn is_liquidated(&self) -> bool {
        self.positions
            .iter()
            .filter(|p| !p.symbol.is_cash())
            .all(|p| p.weight.is_zero() && p.market_value.is_zero())
    }
}

/// Everything the engine reads about one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub id: AccountId,
    /// Brokerage provider name. Opaque to the engine.
    #[serde(default)]
    pub provider: String,
    /// Reference to credentials held elsewhere. Opaque to the engine.
    #[serde(default)]
    pub credential_ref: String,
    #[serde(default)]
    pub portfolios: Vec<PortfolioRecord>,
    /// Cash not assigned to any portfolio.
    #[serde(default)]
    pub unallocated_cash: Money,
}

impl AccountSnapshot {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: AccountId::new(id),
            provider: String::new(),
            credential_ref: String::new(),
            portfolios: Vec::new(),
            unallocated_cash: Decimal::ZERO,
        }
    }

    pub fn with_portfolio(mut self, portfolio: PortfolioRecord) -> Self {
        self.portfolios.push(portfolio);
        self
    }

    pub fn with_unallocated_cash(mut self, cash: Money) -> Self {
        self.unallocated_cash = cash;
        self
    }

    /// Normalized portfolio weights, the unallocated slot filled with the
    /// remainder.
    pub fn account_weights(&self) -> std::result::Result<Weights<Sleeve>, WeightError> {
        let entries: Vec<(Sleeve, Weight)> = self
            .portfolios
            .iter()
            .map(|p| (Sleeve::Portfolio(p.id.clone()), p.weight))
            .collect();
        Weights::normalize(&entries)
    }

    pub fn portfolio(&self, id: &PortfolioId) -> Option<&PortfolioRecord> {
        self.portfolios.iter().find(|p| &p.id == id)
    }

    pub fn portfolio_mut(&mut self, id: &PortfolioId) -> Option<&mut PortfolioRecord> {
        self.portfolios.iter_mut().find(|p| &p.id == id)
    }

    /// Account cash: unallocated plus every portfolio's cash.
    pub fn cash(&self) -> Money {
        self.unallocated_cash + self.portfolios.iter().map(|p| p.cash).sum::<Money>()
    }

    pub fn total_value(&self) -> Money {
        self.unallocated_cash + self.portfolios.iter().map(PortfolioRecord::value).sum::<Money>()
    }
}

/// Storage the engine reads from and writes back to.
pub trait AccountStore: Send + Sync {
    fn load_account(&self, id: &AccountId) -> Result<AccountSnapshot>;

    /// Account owning `portfolio`.
    fn account_of(&self, portfolio: &PortfolioId) -> Result<AccountId>;

    /// Replace the stored account with `snapshot`.
    fn write_account(&self, snapshot: &AccountSnapshot) -> Result<()>;

    /// Recorded values of `scope`, ascending by date.
    fn value_history(&self, scope: &Scope) -> Result<Vec<ValuePoint>>;

    /// Record the value of `scope`. A second point on the same date
    /// replaces the first.
    fn record_value(&self, scope: &Scope, point: ValuePoint) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueSeries {
    pub scope: Scope,
    pub points: Vec<ValuePoint>,
}

/// Serialized form of a [`MemoryStore`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreState {
    #[serde(default)]
    pub accounts: Vec<AccountSnapshot>,
    #[serde(default)]
    pub values: Vec<ValueSeries>,
}

/// In-memory [`AccountStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_state(state: StoreState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    /// Load a JSON state file. A missing file yields an empty store.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Store(format!("failed to read {}: {e}", path.display())))?;
        Ok(Self::from_state(serde_json::from_str(&contents)?))
    }

    /// Write the state as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&*self.lock())?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn state(&self) -> StoreState {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add or replace an account after validating its portfolio weights.
    pub fn insert_account(&self, snapshot: AccountSnapshot) -> Result<()> {
        snapshot.account_weights()?;
        for p in &snapshot.portfolios {
            p.position_weights()?;
        }
        let mut state = self.lock();
        state.accounts.retain(|a| a.id != snapshot.id);
        state.accounts.push(snapshot);
        Ok(())
    }

    /// Apply a partial position-weight update to one portfolio. Symbols not
    /// named keep their entry with weight 0.
    pub fn update_positions(&self, portfolio: &PortfolioId, updates: &[(Symbol, Weight)]) -> Result<()> {
        let mut state = self.lock();
        let record = state
            .accounts
            .iter_mut()
            .flat_map(|a| a.portfolios.iter_mut())
            .find(|p| &p.id == portfolio)
            .ok_or_else(|| Error::UnknownPortfolio(portfolio.clone()))?;

        let merged = merge_position_weights(&record.position_weights()?, updates)?;
        for (symbol, weight) in merged.explicit() {
            match record.positions.iter_mut().find(|p| p.symbol == *symbol) {
                Some(p) => p.weight = weight,
                None => record.positions.push(PositionRecord {
                    symbol: *symbol,
                    weight,
                    market_value: Decimal::ZERO,
                }),
            }
        }
        // A declared cash entry would no longer match the new remainder.
        record.positions.retain(|p| !p.symbol.is_cash());
        Ok(())
    }

    /// Change a portfolio's share of its account.
    pub fn set_portfolio_weight(&self, portfolio: &PortfolioId, weight: Weight) -> Result<()> {
        let mut state = self.lock();
        let account = state
            .accounts
            .iter_mut()
            .find(|a| a.portfolio(portfolio).is_some())
            .ok_or_else(|| Error::UnknownPortfolio(portfolio.clone()))?;

        let entries: Vec<(PortfolioId, Weight)> = account
            .portfolios
            .iter()
            .map(|p| (p.id.clone(), if &p.id == portfolio { weight } else { p.weight }))
            .collect();
        let sleeves: Vec<(Sleeve, Weight)> = entries
            .iter()
            .map(|(id, w)| (Sleeve::Portfolio(id.clone()), *w))
            .collect();
        validate(&sleeves)?;

        if let Some(p) = account.portfolio_mut(portfolio) {
            p.weight = weight;
        }
        Ok(())
    }

    /// Remove a liquidated portfolio; its cash returns to the account.
    pub fn delete_portfolio(&self, portfolio: &PortfolioId) -> Result<()> {
        let mut state = self.lock();
        let account = state
            .accounts
            .iter_mut()
            .find(|a| a.portfolio(portfolio).is_some())
            .ok_or_else(|| Error::UnknownPortfolio(portfolio.clone()))?;

        let idx = account
            .portfolios
            .iter()
            .position(|p| &p.id == portfolio)
            .ok_or_else(|| Error::UnknownPortfolio(portfolio.clone()))?;
        if !account.portfolios[idx].is_liquidated() {
            return Err(Error::NotLiquidated(portfolio.clone()));
        }
        let removed = account.portfolios.remove(idx);
        account.unallocated_cash += removed.cash;
        info!("deleted portfolio {} from account {}", removed.id, account.id);
        Ok(())
    }
}

impl AccountStore for MemoryStore {
    fn load_account(&self, id: &AccountId) -> Result<AccountSnapshot> {
        self.lock()
            .accounts
            .iter()
            .find(|a| &a.id == id)
            .cloned()
            .ok_or_else(|| Error::UnknownAccount(id.clone()))
    }

    fn account_of(&self, portfolio: &PortfolioId) -> Result<AccountId> {
        self.lock()
            .accounts
            .iter()
            .find(|a| a.portfolio(portfolio).is_some())
            .map(|a| a.id.clone())
            .ok_or_else(|| Error::UnknownPortfolio(portfolio.clone()))
    }

    fn write_account(&self, snapshot: &AccountSnapshot) -> Result<()> {
        let mut state = self.lock();
        match state.accounts.iter_mut().find(|a| a.id == snapshot.id) {
            Some(a) => {
                *a = snapshot.clone();
                Ok(())
            }
            None => Err(Error::UnknownAccount(snapshot.id.clone())),
        }
    }

    fn value_history(&self, scope: &Scope) -> Result<Vec<ValuePoint>> {
        Ok(self
            .lock()
            .values
            .iter()
            .find(|s| &s.scope == scope)
            .map(|s| s.points.clone())
            .unwrap_or_default())
    }

    fn record_value(&self, scope: &Scope, point: ValuePoint) -> Result<()> {
        let mut state = self.lock();
        let idx = match state.values.iter().position(|s| &s.scope == scope) {
            Some(idx) => idx,
            None => {
                state.values.push(ValueSeries {
                    scope: scope.clone(),
                    points: Vec::new(),
                });
                state.values.len() - 1
            }
        };
        let points = &mut state.values[idx].points;
        match points.binary_search_by_key(&point.date, |p| p.date) {
            Ok(i) => points[i] = point,
            Err(i) => points.insert(i, point),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn aapl() -> Symbol {
        Symbol::new("AAPL")
    }
    fn tsla() -> Symbol {
        Symbol::new("TSLA")
    }

    fn account() -> AccountSnapshot {
        AccountSnapshot::new("acct")
            .with_portfolio(
                PortfolioRecord::new("growth", "Growth", dec!(40))
                    .with_position(aapl(), dec!(50), dec!(300))
                    .with_position(tsla(), dec!(50), dec!(100))
                    .with_cash(dec!(25)),
            )
            .with_unallocated_cash(dec!(575))
    }

    #[test]
    fn snapshot_values() {
        let a = account();
        assert_eq!(a.total_value(), dec!(1000));
        assert_eq!(a.cash(), dec!(600));
        assert_eq!(a.account_weights().unwrap().residual(), dec!(60));

        let p = &a.portfolios[0];
        assert_eq!(p.invested(), dec!(400));
        assert_eq!(p.holdings()[&Symbol::CASH], dec!(25));
        assert_eq!(p.position_weights().unwrap().residual(), Decimal::ZERO);
    }

    #[test]
    fn trade_moves_cash() {
        let mut p = account().portfolios.remove(0);
        p.trade(Symbol::new("MSFT"), dec!(20));
        p.trade(aapl(), dec!(-100));
        assert_eq!(p.cash, dec!(105));
        assert_eq!(p.value(), dec!(425));
        assert_eq!(p.positions.len(), 3);
    }

    #[test]
    fn update_positions_keeps_omitted_symbols() {
        let store = MemoryStore::new();
        store.insert_account(account()).unwrap();
        let id = PortfolioId::new("growth");

        store.update_positions(&id, &[(aapl(), dec!(40))]).unwrap();
        let snapshot = store.load_account(&AccountId::new("acct")).unwrap();
        let w = snapshot.portfolio(&id).unwrap().position_weights().unwrap();
        assert_eq!(w.get(&aapl()), dec!(40));
        assert_eq!(w.get(&tsla()), Decimal::ZERO);
        assert_eq!(w.residual(), dec!(60));

        let err = store.update_positions(&id, &[(aapl(), dec!(120))]).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn portfolio_weight_sum_is_enforced() {
        let store = MemoryStore::new();
        store.insert_account(account().with_portfolio(PortfolioRecord::new("income", "Income", dec!(50)))).unwrap();
        let err = store.set_portfolio_weight(&PortfolioId::new("income"), dec!(61)).unwrap_err();
        assert!(matches!(err, Error::Validation(WeightError::Sum { .. })));
        store.set_portfolio_weight(&PortfolioId::new("income"), dec!(60)).unwrap();
    }

    #[test]
    fn delete_requires_liquidation() {
        let store = MemoryStore::new();
        store.insert_account(account()).unwrap();
        let id = PortfolioId::new("growth");
        assert!(matches!(store.delete_portfolio(&id), Err(Error::NotLiquidated(_))));

        let mut snapshot = store.load_account(&AccountId::new("acct")).unwrap();
        let p = snapshot.portfolio_mut(&id).unwrap();
        p.trade(aapl(), dec!(-300));
        p.trade(tsla(), dec!(-100));
        p.zero_sold_weights();
        assert!(p.is_liquidated());
        store.write_account(&snapshot).unwrap();

        store.delete_portfolio(&id).unwrap();
        let after = store.load_account(&AccountId::new("acct")).unwrap();
        assert!(after.portfolios.is_empty());
        assert_eq!(after.unallocated_cash, dec!(1000));
    }

    #[test]
    fn unsold_positions_keep_their_weight() {
        let mut snapshot = account();
        let p = snapshot.portfolio_mut(&PortfolioId::new("growth")).unwrap();
        let tsla_weight = p.positions.iter().find(|x| x.symbol == tsla()).unwrap().weight;
        p.trade(aapl(), dec!(-300));
        p.zero_sold_weights();

        let weight_of = |s: Symbol| p.positions.iter().find(|x| x.symbol == s).unwrap().weight;
        assert!(weight_of(aapl()).is_zero());
        assert_eq!(weight_of(tsla()), tsla_weight);
        assert!(!p.is_liquidated());
    }

    #[test]
    fn value_history_is_sorted_and_deduplicated() {
        let store = MemoryStore::new();
        let scope = Scope::Account(AccountId::new("acct"));
        let d = |day| NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
        store.record_value(&scope, ValuePoint::new(d(3), dec!(3))).unwrap();
        store.record_value(&scope, ValuePoint::new(d(1), dec!(1))).unwrap();
        store.record_value(&scope, ValuePoint::new(d(3), dec!(4))).unwrap();

        let points = store.value_history(&scope).unwrap();
        assert_eq!(points, vec![ValuePoint::new(d(1), dec!(1)), ValuePoint::new(d(3), dec!(4))]);
        assert!(store.value_history(&Scope::Portfolio(PortfolioId::new("x"))).unwrap().is_empty());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("store.json");
        let store = MemoryStore::new();
        store.insert_account(account()).unwrap();
        store.save(&path).unwrap();

        let loaded = MemoryStore::load(&path).unwrap();
        assert_eq!(loaded.state(), store.state());
        assert!(MemoryStore::load(&dir.path().join("missing.json")).unwrap().state().accounts.is_empty());
    }

    #[test]
    fn unknown_ids() {
        let store = MemoryStore::new();
        assert!(matches!(store.load_account(&AccountId::new("x")), Err(Error::UnknownAccount(_))));
        assert!(matches!(store.account_of(&PortfolioId::new("x")), Err(Error::UnknownPortfolio(_))));
    }
}
