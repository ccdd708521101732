//! Return and risk statistics over a value series.
//!
//! Values arrive as [`Money`]; statistics are ratios and are computed in
//! `f64`. Nothing here feeds back into value accumulation.

use rust_decimal::prelude::ToPrimitive;

use crate::types::Money;

/// Trading days per year, used to annualize daily step statistics.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Statistics of one value series.
#[derive(Clone, Debug, PartialEq)]
pub struct Metrics {
    /// `last / first - 1`
    pub total_return: f64,
    /// Compound annual growth rate over `years`
    pub cagr: f64,
    /// Sample standard deviation of step returns
    pub step_volatility: f64,
    /// `step_volatility * sqrt(periods_per_year)`
    pub annualized_volatility: f64,
    /// Annualized mean excess step return over step volatility
    pub sharpe: f64,
    /// Largest peak-to-trough loss as a positive fraction
    pub max_drawdown: f64,
    /// Number of step returns
    pub num_steps: usize,
}

impl std::fmt::Display for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "  Total return:    {:>8.2}%", self.total_return * 100.0)?;
        writeln!(f, "  CAGR:            {:>8.2}%", self.cagr * 100.0)?;
        writeln!(f, "  Step volatility: {:>8.4}%", self.step_volatility * 100.0)?;
        writeln!(f, "  Ann. volatility: {:>8.2}%", self.annualized_volatility * 100.0)?;
        writeln!(f, "  Sharpe:          {:>8.2}", self.sharpe)?;
        writeln!(f, "  Max drawdown:    {:>8.2}%", self.max_drawdown * 100.0)?;
        writeln!(f, "  Steps:           {:>8}", self.num_steps)
    }
}

/// Simple returns between consecutive values. A step from a zero value
/// yields 0.
pub fn step_returns(values: &[Money]) -> Vec<f64> {
    values
        .windows(2)
        .map(|w| {
            if w[0].is_zero() {
                0.0
            } else {
                ((w[1] - w[0]) / w[0]).to_f64().unwrap_or(0.0)
            }
        })
        .collect()
}

/// Sample standard deviation (n - 1). Zero for fewer than two samples.
pub fn sample_stdev(samples: &[f64]) -> f64 {
    let n = samples.len();
    if n < 2 {
        return 0.0;
    }
    let mean = samples.iter().sum::<f64>() / n as f64;
    let var = samples.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    var.sqrt()
}

/// Largest relative decline from a running peak.
pub fn max_drawdown(values: &[Money]) -> f64 {
    let mut peak: Option<Money> = None;
    let mut worst = 0.0_f64;
    for &v in values {
        let p = match peak {
            Some(p) if p >= v => p,
            _ => {
                peak = Some(v);
                v
            }
        };
        if !p.is_zero() {
            let dd = ((p - v) / p).to_f64().unwrap_or(0.0);
            worst = worst.max(dd);
        }
    }
    worst
}

/// Compute [`Metrics`] for a value series spanning `years` calendar years.
///
/// * `periods_per_year` — annualization factor for step statistics
/// * `risk_free` — risk-free rate per step
///
/// Returns `None` for fewer than two values or a non-positive start value.
pub fn compute_metrics(values: &[Money], years: f64, periods_per_year: f64, risk_free: f64) -> Option<Metrics> {
    let (first, last) = (*values.first()?, *values.last()?);
    if values.len() < 2 || first <= Money::ZERO {
        return None;
    }

    let total_return = ((last - first) / first).to_f64()?;

    let cagr = if total_return <= -1.0 {
        -1.0
    } else if years > 0.0 {
        (1.0 + total_return).powf(1.0 / years) - 1.0
    } else {
        0.0
    };

    let returns = step_returns(values);
    let step_volatility = sample_stdev(&returns);
    let annualized_volatility = step_volatility * periods_per_year.sqrt();

    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let sharpe = if step_volatility > 0.0 {
        (mean - risk_free) / step_volatility * periods_per_year.sqrt()
    } else {
        0.0
    };

    Some(Metrics {
        total_return,
        cagr,
        step_volatility,
        annualized_volatility,
        sharpe,
        max_drawdown: max_drawdown(values),
        num_steps: returns.len(),
    })
}
