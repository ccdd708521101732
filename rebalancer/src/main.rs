//! CLI entry point for the weightbook rebalancer.

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use log::info;

use weightbook::{AccountId, MemoryHistory, PortfolioId, RebalancingFrequency, ReportingPeriod, Scope, Symbol};
use weightbook_rebalancer::audit::AuditLog;
use weightbook_rebalancer::config::Config;
use weightbook_rebalancer::error::Error;
use weightbook_rebalancer::execution::Engine;
use weightbook_rebalancer::store::MemoryStore;
use weightbook_venue::paper::{FillMode, PaperVenue};

#[derive(Parser)]
#[command(name = "rebalancer")]
#[command(about = "Weight-hierarchy rebalancer and backtester")]
#[command(version)]
struct Cli {
    /// Path to config.toml (defaults are used if it does not exist)
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// JSON snapshot of accounts, portfolios and value history
    #[arg(long, default_value = "state.json")]
    state: PathBuf,

    /// JSON price history: {"SYM": [{"date": "YYYY-MM-DD", "price": "..."}]}
    #[arg(long)]
    prices: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the rebalance plan of an account without trading
    Plan { account: String },

    /// Plan, confirm and execute a rebalance
    Rebalance {
        account: String,

        /// Show plan without executing
        #[arg(long)]
        dry_run: bool,

        /// Skip confirmation prompt (for automation/cron)
        #[arg(long)]
        force: bool,
    },

    /// Sell every holding of an account, or of one portfolio
    Liquidate {
        account: String,

        #[arg(long)]
        portfolio: Option<String>,

        #[arg(long)]
        force: bool,
    },

    /// Replay current targets over historical prices
    Simulate {
        /// `account:ID` or `portfolio:ID`
        #[arg(value_parser = parse_scope)]
        scope: Scope,

        #[arg(long)]
        start: NaiveDate,

        #[arg(long)]
        end: NaiveDate,

        #[arg(long)]
        frequency: Option<RebalancingFrequency>,

        #[arg(long)]
        cash: Option<rust_decimal::Decimal>,

        #[arg(long)]
        benchmark: Option<Symbol>,
    },

    /// Report performance of a live scope from its recorded values
    Analyze {
        #[arg(value_parser = parse_scope)]
        scope: Scope,

        /// 1M, 3M, 6M, 1Y, 3Y, 5Y or MAX
        #[arg(long, default_value = "1M")]
        period: ReportingPeriod,

        #[arg(long)]
        benchmark: Option<Symbol>,
    },

    /// Compare actual weights against targets
    Drift { account: String },
}

fn parse_scope(s: &str) -> Result<Scope, String> {
    match s.split_once(':') {
        Some(("account", id)) if !id.is_empty() => Ok(Scope::Account(AccountId::new(id))),
        Some(("portfolio", id)) if !id.is_empty() => Ok(Scope::Portfolio(PortfolioId::new(id))),
        _ => Err(format!("expected account:ID or portfolio:ID, got '{s}'")),
    }
}

fn load_config(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        Config::load(path).with_context(|| format!("loading {}", path.display()))
    } else {
        info!("{} not found, using defaults", path.display());
        Ok(Config::default())
    }
}

fn load_prices(path: Option<&Path>) -> anyhow::Result<MemoryHistory> {
    let Some(path) = path else {
        return Ok(MemoryHistory::new());
    };
    let json = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    MemoryHistory::from_json(&json).with_context(|| format!("parsing {}", path.display()))
}

fn confirm(prompt: &str) -> anyhow::Result<bool> {
    dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .context("confirmation prompt failed")
}

/// Exit status for a failed run: the engine's code when the cause is an
/// engine error, otherwise 1.
fn exit_code(e: &anyhow::Error) -> i32 {
    e.downcast_ref::<Error>().map_or(1, Error::exit_code)
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli.config)?;
    let store = Arc::new(MemoryStore::load(&cli.state)?);
    let history = Arc::new(load_prices(cli.prices.as_deref())?);
    let venue = Arc::new(PaperVenue::builder().fill_mode(FillMode::ImmediateFull).build());

    let mut engine = Engine::new(&config, store.clone(), venue, history);
    if matches!(cli.command, Command::Rebalance { dry_run: false, .. } | Command::Liquidate { .. }) {
        engine = engine.with_audit(AuditLog::open(&config.audit_path())?);
    }

    match cli.command {
        Command::Plan { account } => {
            print!("{}", engine.plan_account(&AccountId::new(account))?);
        }
        Command::Rebalance {
            account,
            dry_run,
            force,
        } => {
            let account = AccountId::new(account);
            let plan = engine.plan_account(&account)?;
            print!("{plan}");
            if plan.is_empty() {
                println!("\nNo rebalancing needed; portfolios match targets.");
                return Ok(());
            }
            if dry_run {
                println!("\n[DRY RUN] No orders submitted.");
                return Ok(());
            }
            if !force && !confirm("Execute?")? {
                println!("Aborted.");
                return Ok(());
            }
            let batch = engine.execute_rebalance(&account)?;
            println!("\n{}: {}", batch.id, batch.status);
            for order in &batch.orders {
                println!("  {:30} {:10} {:>12.2}", order.key.to_string(), order.state.to_string(), order.filled);
            }
            store.save(&cli.state)?;
        }
        Command::Liquidate {
            account,
            portfolio,
            force,
        } => {
            let target = match &portfolio {
                Some(p) => format!("portfolio {p}"),
                None => format!("account {account}"),
            };
            if !force && !confirm(&format!("Sell every holding of {target}?"))? {
                println!("Aborted.");
                return Ok(());
            }
            let batch = match portfolio {
                Some(p) => engine.liquidate_portfolio(&PortfolioId::new(p))?,
                None => engine.liquidate_account(&AccountId::new(account))?,
            };
            println!("{}: {} ({} order(s))", batch.id, batch.status, batch.orders.len());
            store.save(&cli.state)?;
        }
        Command::Simulate {
            scope,
            start,
            end,
            frequency,
            cash,
            benchmark,
        } => {
            let mut sim_config = config.simulation_config();
            if let Some(frequency) = frequency {
                sim_config.frequency = frequency;
            }
            if let Some(cash) = cash {
                sim_config.initial_cash = cash;
            }
            let benchmark = benchmark.unwrap_or_else(|| engine.benchmark());

            let backtest = engine.backtest_with(&scope, start, end, sim_config, benchmark)?;
            let steps = &backtest.steps;
            println!("SIMULATION of {scope} ({} steps):", steps.len());
            for step in steps.iter().filter(|s| s.trades > 0) {
                println!(
                    "  {}  value {:>14.2}  {} trade(s), turnover {:.2}",
                    step.date, step.value, step.trades, step.turnover
                );
            }
            if let Some(last) = steps.last() {
                println!("  {}  value {:>14.2}  (end)", last.date, last.value);
            }
            print!("\n{}", backtest.report);
        }
        Command::Analyze {
            scope,
            period,
            benchmark,
        } => {
            let benchmark = benchmark.unwrap_or_else(|| engine.benchmark());
            print!("{}", engine.analyze(&scope, period, benchmark)?);
        }
        Command::Drift { account } => {
            print!("{}", engine.drift(&AccountId::new(account))?);
        }
    }

    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {e:#}");
        if let Some(batch) = e.downcast_ref::<Error>().and_then(Error::batch) {
            eprintln!("Batch {batch} can be resumed, reconciled or cancelled.");
        }
        process::exit(exit_code(&e));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weightbook_rebalancer::BatchId;

    #[test]
    fn failed_prompt_is_a_failure() {
        let prompt: std::result::Result<bool, std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::NotConnected, "not a terminal"));
        let e = prompt.context("confirmation prompt failed").unwrap_err();
        assert_eq!(exit_code(&e), 1);
    }

    #[test]
    fn engine_errors_keep_their_code() {
        let e = anyhow::Error::from(Error::MarketClosed { batch: BatchId(1) });
        assert_eq!(exit_code(&e), 3);
        let e = anyhow::Error::from(Error::Config("bad".into())).context("loading config");
        assert_eq!(exit_code(&e), 1);
    }
}
