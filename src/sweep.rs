//! Parallel sweep over simulation configurations.

use chrono::NaiveDate;

use crate::analysis::{PerformanceReport, ReportingPeriod, analyze};
use crate::error::HistoryError;
use crate::history::{PriceHistory, PricePoint};
use crate::simulation::{Simulation, SimulationConfig};
use crate::types::{Scope, Symbol};
use crate::weights::Weights;

/// One configuration to replay.
#[derive(Clone, Debug)]
pub struct SweepCase {
    pub scope: Scope,
    pub targets: Weights<Symbol>,
    pub config: SimulationConfig,
}

/// Replay every case over `[start, end]` in parallel and report each over
/// the whole window.
///
/// Results are in the order of `cases`. A case that cannot be simulated
/// yields its error without affecting the others.
///
/// # Example
///
/// ```ignore
/// use weightbook::sweep::{SweepCase, sweep};
///
/// let cases: Vec<SweepCase> = frequencies
///     .iter()
///     .map(|&frequency| SweepCase { scope: scope.clone(), targets: targets.clone(),
///         config: SimulationConfig { frequency, ..Default::default() } })
///     .collect();
/// let reports = sweep(&cases, &history, start, end, Some(&spy));
/// ```
pub fn sweep(
    cases: &[SweepCase],
    history: &(dyn PriceHistory + Sync),
    start: NaiveDate,
    end: NaiveDate,
    benchmark: Option<&[PricePoint]>,
) -> Vec<Result<PerformanceReport, HistoryError>> {
    use rayon::prelude::*;

    cases
        .par_iter()
        .map(|case| {
            let sim = Simulation::new(
                case.scope.clone(),
                case.targets.clone(),
                history,
                start,
                end,
                case.config.clone(),
            )?;
            analyze(&sim.values(), benchmark, ReportingPeriod::Max)
        })
        .collect()
}
