//! Validation and history errors raised by the engine library.

use chrono::NaiveDate;

use crate::types::{Symbol, Weight};

/// Weight-assignment violations. Raised locally, before any external call.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum WeightError {
    /// A single weight lies outside `[0, 100]`.
    #[error("weight {weight} for {key} is outside [0, 100]")]
    Range { key: String, weight: Weight },

    /// The weights of one scope add up to more than 100.
    #[error("weights sum to {total}, which exceeds 100")]
    Sum { total: Weight },

    /// The residual slot was declared but does not equal `100 - sum(explicit)`.
    /// A sum violation like [`WeightError::Sum`].
    #[error("{key} declares {declared} but the unallocated remainder is {remainder}")]
    Residual {
        key: String,
        declared: Weight,
        remainder: Weight,
    },

    /// The same child appears twice in one scope.
    #[error("duplicate weight entry for {key}")]
    Duplicate { key: String },
}

impl WeightError {
    /// True for the sum family (`Sum` and `Residual`).
    pub fn is_sum_violation(&self) -> bool {
        matches!(self, WeightError::Sum { .. } | WeightError::Residual { .. })
    }
}

/// Price/trajectory data problems for simulation and analysis.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum HistoryError {
    /// The requested window is longer than the data available.
    #[error("insufficient history: need data from {requested}, earliest available is {available}")]
    Insufficient {
        requested: NaiveDate,
        available: NaiveDate,
    },

    /// Fewer points than any computation needs.
    #[error("insufficient history: {have} points, need at least {need}")]
    TooShort { have: usize, need: usize },

    /// A symbol in scope has no price inside the window.
    #[error("no price history for {symbol} between {start} and {end}")]
    MissingSymbol {
        symbol: Symbol,
        start: NaiveDate,
        end: NaiveDate,
    },

    /// The price source itself failed.
    #[error("price history unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn display() {
        let e = WeightError::Sum { total: dec!(110) };
        assert_eq!(e.to_string(), "weights sum to 110, which exceeds 100");
        assert!(e.is_sum_violation());

        let e = WeightError::Range {
            key: "AAPL".into(),
            weight: dec!(-1),
        };
        assert!(e.to_string().contains("outside [0, 100]"));
        assert!(!e.is_sum_violation());
    }

    #[test]
    fn is_error() {
        let err: Box<dyn std::error::Error> = Box::new(HistoryError::TooShort { have: 1, need: 2 });
        assert!(err.to_string().contains("insufficient history"));
    }
}
