//! Weight Model: validation and normalization of target weights.
//!
//! One routine serves both levels of the hierarchy. An account weights its
//! portfolios (keys are [`Sleeve`]s, leftover goes to [`Sleeve::Unallocated`]);
//! a portfolio weights its positions (keys are [`Symbol`]s, leftover goes to
//! [`Symbol::CASH`]). The only difference between the two is which key owns
//! the residual slot, expressed by [`WeightKey::residual`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::error::WeightError;
use crate::types::{PortfolioId, Sleeve, Symbol, Weight};

/// The whole of a scope, in percent.
pub const FULL: Weight = dec!(100);

/// A child key of a weighted scope.
pub trait WeightKey: Clone + Ord + fmt::Display {
    /// The key that receives `100 - sum(explicit weights)`.
    fn residual() -> Self;

    fn is_residual(&self) -> bool {
        *self == Self::residual()
    }
}

impl WeightKey for Symbol {
    fn residual() -> Self {
        Symbol::CASH
    }
}

impl WeightKey for Sleeve {
    fn residual() -> Self {
        Sleeve::Unallocated
    }
}

/// Check every weight is in `[0, 100]`, keys are unique, and the sum is at
/// most 100. Under-allocation is legal. Returns the sum.
pub fn validate<K: WeightKey>(entries: &[(K, Weight)]) -> Result<Weight, WeightError> {
    let mut seen = BTreeSet::new();
    let mut total = Decimal::ZERO;

    for (key, weight) in entries {
        if *weight < Decimal::ZERO || *weight > FULL {
            return Err(WeightError::Range {
                key: key.to_string(),
                weight: *weight,
            });
        }
        if !seen.insert(key) {
            return Err(WeightError::Duplicate {
                key: key.to_string(),
            });
        }
        total += *weight;
    }

    if total > FULL {
        return Err(WeightError::Sum { total });
    }
    Ok(total)
}

/// A validated weight mapping whose values sum to exactly 100, residual
/// slot included.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Weights<K: Ord> {
    entries: BTreeMap<K, Weight>,
}

impl<K: WeightKey> Weights<K> {
    /// Validate `entries` and fill the residual key with the remainder.
    ///
    /// If the residual key is present its declared value must equal
    /// `100 - sum(other weights)` exactly.
    pub fn normalize(entries: &[(K, Weight)]) -> Result<Self, WeightError> {
        validate(entries)?;

        let explicit_sum: Weight = entries
            .iter()
            .filter(|(k, _)| !k.is_residual())
            .map(|(_, w)| *w)
            .sum();
        let remainder = FULL - explicit_sum;

        if let Some((key, declared)) = entries.iter().find(|(k, _)| k.is_residual()) {
            if *declared != remainder {
                return Err(WeightError::Residual {
                    key: key.to_string(),
                    declared: *declared,
                    remainder,
                });
            }
        }

        let mut map: BTreeMap<K, Weight> = entries.iter().cloned().collect();
        map.insert(K::residual(), remainder);
        Ok(Self { entries: map })
    }

    /// Everything in the residual slot.
    pub fn all_residual() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(K::residual(), FULL);
        Self { entries }
    }

    /// Weight of `key`, zero if absent.
    pub fn get(&self, key: &K) -> Weight {
        self.entries.get(key).copied().unwrap_or(Decimal::ZERO)
    }

    /// Weight of the residual slot.
    pub fn residual(&self) -> Weight {
        self.get(&K::residual())
    }

    /// All entries in key order, residual included.
    pub fn iter(&self) -> impl Iterator<Item = (&K, Weight)> {
        self.entries.iter().map(|(k, w)| (k, *w))
    }

    /// Entries other than the residual slot.
    pub fn explicit(&self) -> impl Iterator<Item = (&K, Weight)> {
        self.iter().filter(|(k, _)| !k.is_residual())
    }

    /// Sum of all weights. Always 100.
    pub fn total(&self) -> Weight {
        self.entries.values().copied().sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Entries as `(key, weight)` pairs.
    pub fn to_vec(&self) -> Vec<(K, Weight)> {
        self.entries.iter().map(|(k, w)| (k.clone(), *w)).collect()
    }
}

/// Apply a partial weight update to an existing mapping.
///
/// Children present in `existing` but absent from `updates` are kept with
/// weight 0; the residual slot is recomputed.
pub fn merge<K: WeightKey>(existing: &Weights<K>, updates: &[(K, Weight)]) -> Result<Weights<K>, WeightError> {
    let mut merged: Vec<(K, Weight)> = existing
        .explicit()
        .filter(|(k, _)| !updates.iter().any(|(u, _)| u == *k))
        .map(|(k, _)| (k.clone(), Decimal::ZERO))
        .collect();
    merged.extend(updates.iter().cloned());
    Weights::normalize(&merged)
}

/// Position-level [`merge`].
pub fn merge_position_weights(
    existing: &Weights<Symbol>,
    updates: &[(Symbol, Weight)],
) -> Result<Weights<Symbol>, WeightError> {
    merge(existing, updates)
}

/// Collapse account → portfolio → position weights into one symbol-level
/// mapping. The unallocated account slot and every portfolio's cash land in
/// [`Symbol::CASH`]. Portfolios missing from `portfolios` count as cash.
pub fn flatten(
    account: &Weights<Sleeve>,
    portfolios: &[(PortfolioId, Weights<Symbol>)],
) -> Result<Weights<Symbol>, WeightError> {
    let mut combined: BTreeMap<Symbol, Weight> = BTreeMap::new();
    for (id, positions) in portfolios {
        let sleeve = account.get(&Sleeve::Portfolio(id.clone()));
        if sleeve.is_zero() {
            continue;
        }
        for (symbol, weight) in positions.explicit() {
            *combined.entry(*symbol).or_insert(Decimal::ZERO) += sleeve * weight / FULL;
        }
    }
    let entries: Vec<(Symbol, Weight)> = combined.into_iter().collect();
    Weights::normalize(&entries)
}
