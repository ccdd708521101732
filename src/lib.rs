//! # weightbook
//!
//! A rebalancing and simulation engine for hierarchical target weights.
//!
//! An account weights its portfolios; a portfolio weights its positions.
//! Whatever is not allocated sits in a first-class cash slot
//! ([`Symbol::CASH`] for positions, [`Sleeve::Unallocated`] for portfolios).
//!
//! ## Features
//!
//! - **Weight Model**: one validation/normalization routine for both levels
//! - **Plan Computer**: value-based CURRENT→TARGET diff, split into a sell
//!   phase and a buy phase, dust below a minimum trade dropped
//! - **Simulation Engine**: frictionless replay of the same diff over price
//!   history, lazy and restartable
//! - **Performance Analyzer**: trailing-period return, volatility, drawdown
//!   and benchmark-relative return
//! - **Decimal money**: `rust_decimal` throughout, no float accumulation
//!
//! Live order execution lives in the `weightbook-rebalancer` crate.
//!
//! ## Quick Start
//!
//! ```
//! use rust_decimal_macros::dec;
//! use weightbook::{Holdings, PortfolioId, Scope, Symbol, Weights, compute_plan};
//!
//! let aapl = Symbol::new("AAPL");
//! let tsla = Symbol::new("TSLA");
//!
//! let targets = Weights::normalize(&[(aapl, dec!(50)), (tsla, dec!(50))]).unwrap();
//! let current: Holdings = [(aapl, dec!(1000))].into_iter().collect();
//!
//! let plan = compute_plan(Scope::Portfolio(PortfolioId::new("p")), &current, &targets, dec!(1000), dec!(1));
//!
//! assert_eq!(plan.sells[0].symbol, aapl);
//! assert_eq!(plan.sells[0].delta, dec!(-500));
//! assert_eq!(plan.buys[0].symbol, tsla);
//! assert_eq!(plan.buys[0].delta, dec!(500));
//! ```
//!
//! ## Weights
//!
//! Under-allocation is legal; the remainder goes to the residual slot.
//!
//! ```
//! use rust_decimal_macros::dec;
//! use weightbook::{PortfolioId, Sleeve, Weights, WeightError, validate};
//!
//! let a = Sleeve::Portfolio(PortfolioId::new("A"));
//! let b = Sleeve::Portfolio(PortfolioId::new("B"));
//!
//! let w = Weights::normalize(&[(a.clone(), dec!(50)), (b.clone(), dec!(30))]).unwrap();
//! assert_eq!(w.residual(), dec!(20));
//!
//! let err = validate(&[(a, dec!(60)), (b, dec!(50))]).unwrap_err();
//! assert_eq!(err, WeightError::Sum { total: dec!(110) });
//! ```

pub mod analysis;
mod error;
pub mod history;
pub mod metrics;
pub mod plan;
pub mod simulation;
#[cfg(feature = "parallel")]
pub mod sweep;
mod types;
pub mod weights;

// Re-export public API
pub use analysis::{Performance, PerformanceReport, ReportingPeriod, ValuePoint, analyze};
pub use error::{HistoryError, WeightError};
pub use history::{MemoryHistory, PriceHistory, PricePoint, PriceTable};
pub use metrics::{Metrics, compute_metrics};
pub use plan::{Holdings, Phase, PlanEntry, TradePlan, compute_plan, holdings_value};
pub use simulation::{RebalancingFrequency, Simulation, SimulationConfig, SimulationStep, Trajectory};
pub use types::{AccountId, Money, PortfolioId, SYMBOL_MAX_LEN, Scope, Sleeve, Symbol, Weight};
pub use weights::{FULL, WeightKey, Weights, flatten, merge, merge_position_weights, validate};
