//! End-to-end batches against the paper venue.

use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use weightbook::{AccountId, MemoryHistory, Phase, PortfolioId, Symbol};
use weightbook_rebalancer::audit::AuditLog;
use weightbook_rebalancer::config::Config;
use weightbook_rebalancer::error::Error;
use weightbook_rebalancer::execution::Engine;
use weightbook_rebalancer::order::OrderState;
use weightbook_rebalancer::store::{AccountSnapshot, AccountStore, MemoryStore, PortfolioRecord};
use weightbook_rebalancer::{BatchKind, BatchStatus};
use weightbook_venue::paper::{FillMode, PaperVenue};

fn aapl() -> Symbol {
    Symbol::new("AAPL")
}
fn tsla() -> Symbol {
    Symbol::new("TSLA")
}
fn msft() -> Symbol {
    Symbol::new("MSFT")
}
fn acct() -> AccountId {
    AccountId::new("acct")
}

/// Growth (60%) holds AAPL/TSLA, income (30%) holds MSFT; 10% unallocated.
fn two_portfolios() -> AccountSnapshot {
    AccountSnapshot::new("acct")
        .with_portfolio(
            PortfolioRecord::new("growth", "Growth", dec!(60))
                .with_position(aapl(), dec!(50), dec!(4000))
                .with_position(tsla(), dec!(50), dec!(1000)),
        )
        .with_portfolio(
            PortfolioRecord::new("income", "Income", dec!(30))
                .with_position(msft(), dec!(80), dec!(2000))
                .with_cash(dec!(500)),
        )
        .with_unallocated_cash(dec!(2500))
}

fn config() -> Config {
    let mut config = Config::default();
    config.execution.call_timeout_ms = 1_000;
    config.execution.fill_timeout_ms = 200;
    config.execution.poll_interval_ms = 5;
    config
}

fn setup(snapshot: AccountSnapshot, venue: PaperVenue) -> (Engine, Arc<MemoryStore>, Arc<PaperVenue>) {
    let store = Arc::new(MemoryStore::new());
    store.insert_account(snapshot).unwrap();
    let venue = Arc::new(venue);
    let engine = Engine::new(
        &config(),
        Arc::clone(&store) as Arc<dyn AccountStore>,
        Arc::clone(&venue) as Arc<dyn weightbook_venue::Venue>,
        Arc::new(MemoryHistory::new()),
    );
    (engine, store, venue)
}

#[test]
fn sell_then_buy_example() {
    let snapshot = AccountSnapshot::new("acct").with_portfolio(
        PortfolioRecord::new("p", "P", dec!(100))
            .with_position(aapl(), dec!(50), dec!(1000))
            .with_position(tsla(), dec!(50), dec!(0)),
    );
    let (engine, store, venue) = setup(snapshot, PaperVenue::builder().build());

    let plan = engine.plan_account(&acct()).unwrap();
    assert_eq!(plan.orders.len(), 2);
    assert_eq!((plan.orders[0].symbol, plan.orders[0].phase), (aapl(), Phase::Sell));
    assert_eq!((plan.orders[1].symbol, plan.orders[1].phase), (tsla(), Phase::Buy));

    let batch = engine.execute_rebalance(&acct()).unwrap();
    assert_eq!(batch.status, BatchStatus::Ready);
    assert_eq!(batch.kind, BatchKind::Rebalance);

    let recorded = venue.submitted_orders();
    assert_eq!(recorded.len(), 2);
    assert_eq!(recorded[0].order.symbol, aapl());
    assert_eq!(recorded[0].order.size, dec!(500));
    assert_eq!(recorded[1].order.symbol, tsla());

    let holdings = store.load_account(&acct()).unwrap().portfolios[0].holdings();
    assert_eq!(holdings[&aapl()], dec!(500));
    assert_eq!(holdings[&tsla()], dec!(500));
}

#[test]
fn rebalance_conserves_account_value() {
    let (engine, store, _venue) = setup(two_portfolios(), PaperVenue::builder().build());
    let before = store.load_account(&acct()).unwrap().total_value();

    engine.execute_rebalance(&acct()).unwrap();
    let after = store.load_account(&acct()).unwrap();
    assert_eq!(after.total_value(), before);

    // Total 10000: growth 6000 (3000/3000), income 3000 (2400 MSFT + 600 cash).
    let growth = after.portfolio(&PortfolioId::new("growth")).unwrap();
    assert_eq!(growth.holdings()[&aapl()], dec!(3000));
    assert_eq!(growth.holdings()[&tsla()], dec!(3000));
    let income = after.portfolio(&PortfolioId::new("income")).unwrap();
    assert_eq!(income.holdings()[&msft()], dec!(2400));
    assert_eq!(income.cash, dec!(600));
    assert_eq!(after.unallocated_cash, dec!(1000));

    // A second run has nothing left to trade.
    let again = engine.execute_rebalance(&acct()).unwrap();
    assert!(again.orders.is_empty());
    assert_eq!(again.status, BatchStatus::Ready);
}

#[test]
fn market_closed_reaches_no_order() {
    let (engine, _store, venue) = setup(two_portfolios(), PaperVenue::builder().open(false).build());

    let err = engine.execute_rebalance(&acct()).unwrap_err();
    assert!(matches!(err, Error::MarketClosed { .. }));
    assert_eq!(err.exit_code(), 3);
    assert!(venue.submitted_orders().is_empty());

    let batch = engine.batch(err.batch().unwrap()).unwrap();
    assert!(batch.orders.iter().all(|o| o.state == OrderState::Pending));
    assert_eq!(engine.leases().holder(&acct()), None);
}

#[test]
fn rejection_does_not_abort_siblings() {
    let venue = PaperVenue::builder().symbol_mode(tsla(), FillMode::Reject).build();
    let (engine, store, _venue) = setup(two_portfolios(), venue);

    let batch = engine.execute_rebalance(&acct()).unwrap();
    assert_eq!(batch.status, BatchStatus::Ready);
    let tsla_order = batch.orders.iter().find(|o| o.symbol() == tsla()).unwrap();
    assert_eq!(tsla_order.state, OrderState::Rejected);
    assert!(tsla_order.reason.as_deref().unwrap_or("").contains("TSLA"));
    assert!(
        batch
            .orders
            .iter()
            .filter(|o| o.symbol() != tsla())
            .all(|o| o.state == OrderState::Filled)
    );

    let after = store.load_account(&acct()).unwrap();
    assert_eq!(after.total_value(), dec!(10000));
    let growth = after.portfolio(&PortfolioId::new("growth")).unwrap();
    assert_eq!(growth.holdings()[&tsla()], dec!(1000));
}

#[test]
fn liquidate_portfolio_then_delete() {
    let (engine, store, venue) = setup(two_portfolios(), PaperVenue::builder().build());
    let growth = PortfolioId::new("growth");

    assert!(matches!(store.delete_portfolio(&growth), Err(Error::NotLiquidated(_))));

    let batch = engine.liquidate_portfolio(&growth).unwrap();
    assert_eq!(batch.kind, BatchKind::LiquidatePortfolio(growth.clone()));
    assert_eq!(batch.status, BatchStatus::Ready);
    assert!(venue.submitted_orders().iter().all(|r| r.order.side == weightbook_venue::VenueSide::Sell));

    let after = store.load_account(&acct()).unwrap();
    let record = after.portfolio(&growth).unwrap();
    assert!(record.is_liquidated());
    assert_eq!(record.cash, dec!(5000));
    assert_eq!(after.portfolio(&PortfolioId::new("income")).unwrap().holdings()[&msft()], dec!(2000));

    store.delete_portfolio(&growth).unwrap();
    let after = store.load_account(&acct()).unwrap();
    assert_eq!(after.portfolios.len(), 1);
    assert_eq!(after.unallocated_cash, dec!(7500));
    assert_eq!(after.total_value(), dec!(10000));
}

#[test]
fn liquidate_account_moves_everything_to_cash() {
    let (engine, store, _venue) = setup(two_portfolios(), PaperVenue::builder().build());
    engine.liquidate_account(&acct()).unwrap();

    let after = store.load_account(&acct()).unwrap();
    assert!(after.portfolios.iter().all(|p| p.is_liquidated()));
    assert_eq!(after.cash(), dec!(10000));

    // Weights were zeroed, so a rebalance does not buy back.
    let plan = engine.plan_account(&acct()).unwrap();
    assert!(plan.orders_in(Phase::Buy).next().is_none());
}

#[test]
fn refused_liquidation_sell_keeps_its_weight() {
    let venue = PaperVenue::builder().symbol_mode(tsla(), FillMode::Reject).build();
    let (engine, store, _venue) = setup(two_portfolios(), venue);
    let growth = PortfolioId::new("growth");

    let batch = engine.liquidate_portfolio(&growth).unwrap();
    assert_eq!(batch.status, BatchStatus::Ready);

    let after = store.load_account(&acct()).unwrap();
    let record = after.portfolio(&growth).unwrap();
    let weight_of = |s: Symbol| record.positions.iter().find(|p| p.symbol == s).unwrap().weight;
    assert!(weight_of(aapl()).is_zero());
    assert_eq!(weight_of(tsla()), dec!(50));
    assert_eq!(record.holdings()[&tsla()], dec!(1000));
    assert!(!record.is_liquidated());
    assert!(matches!(store.delete_portfolio(&growth), Err(Error::NotLiquidated(_))));
}

#[test]
fn validation_rejected_before_venue() {
    let mut snapshot = two_portfolios();
    snapshot.portfolios[1].weight = dec!(50);
    let store = Arc::new(MemoryStore::new());
    store.insert_account(two_portfolios()).unwrap();
    store.write_account(&snapshot).unwrap();
    let venue = Arc::new(PaperVenue::builder().build());
    let engine = Engine::new(&config(), store, venue.clone(), Arc::new(MemoryHistory::new()));

    let err = engine.execute_rebalance(&acct()).unwrap_err();
    assert!(matches!(err, Error::Validation(ref e) if e.is_sum_violation()));
    assert!(venue.submitted_orders().is_empty());
}

#[test]
fn audit_trail_records_batch() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");
    let store = Arc::new(MemoryStore::new());
    store.insert_account(two_portfolios()).unwrap();
    let engine = Engine::new(
        &config(),
        store,
        Arc::new(PaperVenue::builder().build()),
        Arc::new(MemoryHistory::new()),
    )
    .with_audit(AuditLog::open(&path).unwrap());

    let batch = engine.execute_rebalance(&acct()).unwrap();
    let contents = std::fs::read_to_string(&path).unwrap();
    let events: Vec<serde_json::Value> = contents.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    let names: Vec<&str> = events.iter().map(|e| e["event"].as_str().unwrap()).collect();

    assert_eq!(names.first(), Some(&"batch_planned"));
    assert_eq!(names.last(), Some(&"batch_finished"));
    assert_eq!(names.iter().filter(|n| **n == "order_submitted").count(), batch.orders.len());
    assert_eq!(events.last().unwrap()["status"], "READY");
}

#[test]
fn drift_reflects_rebalance() {
    let (engine, _store, _venue) = setup(two_portfolios(), PaperVenue::builder().build());
    let before = engine.drift(&acct()).unwrap();
    engine.execute_rebalance(&acct()).unwrap();
    let after = engine.drift(&acct()).unwrap();
    assert!(before.tracking_error_pct > 1.0);
    assert!(after.tracking_error_pct < 1e-9);
    assert!(after.total_value > Decimal::ZERO);
}
