//! Performance Analyzer: period-bounded return and risk of a value
//! trajectory, optionally against a benchmark price series.

use std::fmt;
use std::str::FromStr;

use chrono::{Months, NaiveDate};

use crate::error::HistoryError;
use crate::history::PricePoint;
use crate::metrics::{TRADING_DAYS_PER_YEAR, compute_metrics};
use crate::types::Money;

const DAYS_PER_YEAR: f64 = 365.25;

/// Trailing window ending at the last point of a trajectory.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ReportingPeriod {
    #[default]
    #[cfg_attr(feature = "serde", serde(rename = "1M"))]
    M1,
    #[cfg_attr(feature = "serde", serde(rename = "3M"))]
    M3,
    #[cfg_attr(feature = "serde", serde(rename = "6M"))]
    M6,
    #[cfg_attr(feature = "serde", serde(rename = "1Y"))]
    Y1,
    #[cfg_attr(feature = "serde", serde(rename = "3Y"))]
    Y3,
    #[cfg_attr(feature = "serde", serde(rename = "5Y"))]
    Y5,
    /// The whole trajectory.
    #[cfg_attr(feature = "serde", serde(rename = "MAX"))]
    Max,
}

impl ReportingPeriod {
    pub const ALL: [ReportingPeriod; 7] = [
        ReportingPeriod::M1,
        ReportingPeriod::M3,
        ReportingPeriod::M6,
        ReportingPeriod::Y1,
        ReportingPeriod::Y3,
        ReportingPeriod::Y5,
        ReportingPeriod::Max,
    ];

    /// Length in calendar months, `None` for [`ReportingPeriod::Max`].
    pub fn months(&self) -> Option<u32> {
        match self {
            ReportingPeriod::M1 => Some(1),
            ReportingPeriod::M3 => Some(3),
            ReportingPeriod::M6 => Some(6),
            ReportingPeriod::Y1 => Some(12),
            ReportingPeriod::Y3 => Some(36),
            ReportingPeriod::Y5 => Some(60),
            ReportingPeriod::Max => None,
        }
    }

    /// First date of the window ending at `end`.
    pub fn window_start(&self, end: NaiveDate) -> Option<NaiveDate> {
        self.months().and_then(|m| end.checked_sub_months(Months::new(m)))
    }
}

impl fmt::Display for ReportingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReportingPeriod::M1 => "1M",
            ReportingPeriod::M3 => "3M",
            ReportingPeriod::M6 => "6M",
            ReportingPeriod::Y1 => "1Y",
            ReportingPeriod::Y3 => "3Y",
            ReportingPeriod::Y5 => "5Y",
            ReportingPeriod::Max => "MAX",
        };
        f.write_str(s)
    }
}

impl FromStr for ReportingPeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReportingPeriod::ALL
            .into_iter()
            .find(|p| p.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown reporting period: {s} (expected 1M, 3M, 6M, 1Y, 3Y, 5Y or MAX)"))
    }
}

/// Scope value on one date.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ValuePoint {
    pub date: NaiveDate,
    pub value: Money,
}

impl ValuePoint {
    pub fn new(date: NaiveDate, value: Money) -> Self {
        Self { date, value }
    }
}

impl From<PricePoint> for ValuePoint {
    fn from(p: PricePoint) -> Self {
        Self::new(p.date, p.price)
    }
}

/// Return and risk of one series over one window.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Performance {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub start_value: Money,
    pub end_value: Money,
    pub period_return: f64,
    pub cagr: f64,
    pub step_volatility: f64,
    pub annualized_volatility: f64,
    pub sharpe: f64,
    pub max_drawdown: f64,
    pub num_steps: usize,
}

impl fmt::Display for Performance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  Window:          {} .. {}", self.start, self.end)?;
        writeln!(f, "  Value:           {:.2} -> {:.2}", self.start_value, self.end_value)?;
        writeln!(f, "  Return:          {:>8.2}%", self.period_return * 100.0)?;
        writeln!(f, "  CAGR:            {:>8.2}%", self.cagr * 100.0)?;
        writeln!(f, "  Volatility:      {:>8.4}% per step", self.step_volatility * 100.0)?;
        writeln!(f, "  Ann. volatility: {:>8.2}%", self.annualized_volatility * 100.0)?;
        writeln!(f, "  Sharpe:          {:>8.2}", self.sharpe)?;
        writeln!(f, "  Max drawdown:    {:>8.2}%", self.max_drawdown * 100.0)
    }
}

/// Output of [`analyze`].
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PerformanceReport {
    pub period: ReportingPeriod,
    pub assets: Performance,
    pub benchmark: Option<Performance>,
    /// `assets.period_return - benchmark.period_return`
    pub relative_return: Option<f64>,
}

impl fmt::Display for PerformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "PERFORMANCE ({}):", self.period)?;
        write!(f, "{}", self.assets)?;
        if let Some(bench) = &self.benchmark {
            writeln!(f, "BENCHMARK:")?;
            write!(f, "{bench}")?;
        }
        if let Some(rel) = self.relative_return {
            writeln!(f, "  Relative return: {:>+8.2}%", rel * 100.0)?;
        }
        Ok(())
    }
}

/// Slice of `points` covering `[start, end]`, starting from the last point on
/// or before `start`.
fn window(points: &[ValuePoint], start: Option<NaiveDate>) -> Result<&[ValuePoint], HistoryError> {
    let Some(first) = points.first() else {
        return Err(HistoryError::TooShort { have: 0, need: 2 });
    };
    let Some(start) = start else {
        return Ok(points);
    };
    if first.date > start {
        return Err(HistoryError::Insufficient {
            requested: start,
            available: first.date,
        });
    }
    let base = points.partition_point(|p| p.date <= start).saturating_sub(1);
    Ok(&points[base..])
}

/// Whole-series [`Performance`]. Needs at least two points.
pub fn performance(points: &[ValuePoint]) -> Result<Performance, HistoryError> {
    let too_short = || HistoryError::TooShort {
        have: points.len(),
        need: 2,
    };
    let (first, last) = match points {
        [first, .., last] => (*first, *last),
        _ => return Err(too_short()),
    };

    let days = (last.date - first.date).num_days() as f64;
    let years = days / DAYS_PER_YEAR;
    let steps = (points.len() - 1) as f64;
    let periods_per_year = if years > 0.0 { steps / years } else { TRADING_DAYS_PER_YEAR };

    let values: Vec<Money> = points.iter().map(|p| p.value).collect();
    let m = compute_metrics(&values, years, periods_per_year, 0.0).ok_or_else(too_short)?;

    Ok(Performance {
        start: first.date,
        end: last.date,
        start_value: first.value,
        end_value: last.value,
        period_return: m.total_return,
        cagr: m.cagr,
        step_volatility: m.step_volatility,
        annualized_volatility: m.annualized_volatility,
        sharpe: m.sharpe,
        max_drawdown: m.max_drawdown,
        num_steps: m.num_steps,
    })
}

/// Analyze the trailing `period` of `trajectory` (ascending by date).
///
/// The window ends at the last trajectory point. Fails with
/// [`HistoryError::Insufficient`] when the trajectory (or the benchmark)
/// starts after the window does.
pub fn analyze(
    trajectory: &[ValuePoint],
    benchmark: Option<&[PricePoint]>,
    period: ReportingPeriod,
) -> Result<PerformanceReport, HistoryError> {
    let last = trajectory.last().ok_or(HistoryError::TooShort { have: 0, need: 2 })?;
    let start = match period.months() {
        Some(_) => Some(period.window_start(last.date).ok_or(HistoryError::TooShort {
            have: trajectory.len(),
            need: 2,
        })?),
        None => None,
    };

    let assets = performance(window(trajectory, start)?)?;

    let benchmark = match benchmark {
        Some(prices) => {
            let points: Vec<ValuePoint> = prices
                .iter()
                .filter(|p| p.date <= last.date)
                .map(|p| ValuePoint::from(*p))
                .collect();
            // Benchmark is aligned to the trajectory's own window.
            Some(performance(window(&points, Some(assets.start))?)?)
        }
        None => None,
    };
    let relative_return = benchmark.as_ref().map(|b| assets.period_return - b.period_return);

    Ok(PerformanceReport {
        period,
        assets,
        benchmark,
        relative_return,
    })
}
