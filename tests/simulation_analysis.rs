//! Replay and analysis over synthetic price history.

use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use weightbook::{
    AccountId, HistoryError, MemoryHistory, PortfolioId, PricePoint, RebalancingFrequency, ReportingPeriod, Scope,
    Simulation, SimulationConfig, Sleeve, Symbol, Weights, analyze, flatten,
};

fn start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 1, 2).unwrap()
}

/// Weekday dates from `start()` for `days` calendar days.
fn weekdays(days: i64) -> Vec<NaiveDate> {
    use chrono::Datelike;
    (0..days)
        .map(|i| start() + Duration::days(i))
        .filter(|d| d.weekday().number_from_monday() <= 5)
        .collect()
}

fn series(dates: &[NaiveDate], price: impl Fn(usize) -> Decimal) -> Vec<PricePoint> {
    dates.iter().enumerate().map(|(i, d)| PricePoint::new(*d, price(i))).collect()
}

fn spy() -> Symbol {
    Symbol::new("SPY")
}
fn tlt() -> Symbol {
    Symbol::new("TLT")
}
fn gld() -> Symbol {
    Symbol::new("GLD")
}

/// Deterministic zig-zag walk.
fn walk(i: usize, base: i64, step: i64) -> Decimal {
    let wiggle = ((i * 7919) % 11) as i64 - 5;
    Decimal::from(base + step * i as i64 / 10 + wiggle)
}

fn history(dates: &[NaiveDate]) -> MemoryHistory {
    MemoryHistory::new()
        .with_series(spy(), series(dates, |i| walk(i, 400, 3)))
        .with_series(tlt(), series(dates, |i| walk(i, 100, -1)))
        .with_series(gld(), series(dates, |i| walk(i, 180, 1)))
}

#[test]
fn flat_prices_trade_only_on_first_step() {
    let dates = weekdays(183);
    let history = MemoryHistory::new()
        .with_series(spy(), series(&dates, |_| dec!(412.37)))
        .with_series(tlt(), series(&dates, |_| dec!(97.13)))
        .with_series(gld(), series(&dates, |_| dec!(181.9)));
    let targets = Weights::normalize(&[(spy(), dec!(50)), (tlt(), dec!(30)), (gld(), dec!(15))]).unwrap();

    let sim = Simulation::new(
        Scope::Portfolio(PortfolioId::new("flat")),
        targets,
        &history,
        dates[0],
        *dates.last().unwrap(),
        SimulationConfig::default(),
    )
    .unwrap();

    let steps = sim.run();
    assert_eq!(steps.len(), dates.len());
    assert_eq!(steps[0].trades, 3);
    assert!(steps[1..].iter().all(|s| s.trades == 0));
    assert!(steps.iter().all(|s| (s.value - dec!(30000)).abs() < dec!(0.000001)));
}

#[test]
fn full_weight_portfolio_matches_account() {
    let dates = weekdays(400);
    let history = history(&dates);
    let end = *dates.last().unwrap();

    let positions = Weights::normalize(&[(spy(), dec!(60)), (tlt(), dec!(25)), (gld(), dec!(10))]).unwrap();
    let pid = PortfolioId::new("core");
    let account = Weights::normalize(&[(Sleeve::Portfolio(pid.clone()), dec!(100))]).unwrap();
    let account_targets = flatten(&account, &[(pid.clone(), positions.clone())]).unwrap();

    let config = SimulationConfig {
        frequency: RebalancingFrequency::Monthly,
        ..SimulationConfig::default()
    };
    let portfolio_sim =
        Simulation::new(Scope::Portfolio(pid), positions, &history, dates[0], end, config.clone()).unwrap();
    let account_sim =
        Simulation::new(Scope::Account(AccountId::new("acct")), account_targets, &history, dates[0], end, config)
            .unwrap();

    let p = analyze(&portfolio_sim.values(), None, ReportingPeriod::Max).unwrap();
    let a = analyze(&account_sim.values(), None, ReportingPeriod::Max).unwrap();
    assert_eq!(p.assets.end_value, a.assets.end_value);
    assert!((p.assets.cagr - a.assets.cagr).abs() < 1e-12);
}

#[test]
fn half_weight_portfolio_is_diluted_by_cash() {
    let dates = weekdays(120);
    let history = history(&dates);
    let end = *dates.last().unwrap();

    let positions = Weights::normalize(&[(spy(), dec!(100))]).unwrap();
    let pid = PortfolioId::new("eq");
    let account = Weights::normalize(&[(Sleeve::Portfolio(pid.clone()), dec!(50))]).unwrap();
    let flat = flatten(&account, &[(pid.clone(), positions.clone())]).unwrap();
    assert_eq!(flat.get(&spy()), dec!(50));

    let full = Simulation::new(Scope::Portfolio(pid), positions, &history, dates[0], end, SimulationConfig::default())
        .unwrap()
        .values();
    let half = Simulation::new(
        Scope::Account(AccountId::new("acct")),
        flat,
        &history,
        dates[0],
        end,
        SimulationConfig::default(),
    )
    .unwrap()
    .values();

    let full_ret = analyze(&full, None, ReportingPeriod::Max).unwrap().assets.period_return;
    let half_ret = analyze(&half, None, ReportingPeriod::Max).unwrap().assets.period_return;
    assert!(full_ret.abs() > half_ret.abs());
}

#[test]
fn backtest_against_benchmark() {
    let dates = weekdays(400);
    let history = history(&dates);
    let end = *dates.last().unwrap();
    let targets = Weights::normalize(&[(tlt(), dec!(50)), (gld(), dec!(50))]).unwrap();

    let sim = Simulation::new(
        Scope::Portfolio(PortfolioId::new("bonds")),
        targets,
        &history,
        dates[0],
        end,
        SimulationConfig::default(),
    )
    .unwrap();
    let bench = weightbook::PriceHistory::prices(&history, &spy(), dates[0], end).unwrap();

    for period in [ReportingPeriod::M1, ReportingPeriod::M6, ReportingPeriod::Y1, ReportingPeriod::Max] {
        let report = analyze(&sim.values(), Some(&bench), period).unwrap();
        let b = report.benchmark.as_ref().unwrap();
        assert_eq!(b.start, report.assets.start);
        assert_eq!(b.end, report.assets.end);
        let rel = report.relative_return.unwrap();
        assert!((rel - (report.assets.period_return - b.period_return)).abs() < 1e-12);
    }

    let err = analyze(&sim.values(), Some(&bench), ReportingPeriod::Y3).unwrap_err();
    assert!(matches!(err, HistoryError::Insufficient { .. }));
}

#[test]
fn window_outside_history_fails() {
    let dates = weekdays(30);
    let history = history(&dates);
    let targets = Weights::normalize(&[(spy(), dec!(100))]).unwrap();
    let later = dates[0] + Duration::days(365);

    let err = Simulation::new(
        Scope::Portfolio(PortfolioId::new("p")),
        targets,
        &history,
        later,
        later + Duration::days(30),
        SimulationConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(err, HistoryError::MissingSymbol { symbol, .. } if symbol == spy()));
}
