//! TOML configuration loading and validation.

use std::path::Path;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use weightbook::{Money, RebalancingFrequency, SimulationConfig, Symbol};

use crate::error::{Error, Result};

/// Top-level configuration. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub simulation: SimulationSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    /// Bound on every single venue call.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_ms: u64,
    /// Bound on waiting for one phase's fills.
    #[serde(default = "default_fill_timeout")]
    pub fill_timeout_ms: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Deltas below this notional are not traded.
    #[serde(default = "default_min_trade")]
    pub min_trade: Money,
    /// Let buys start even if some sells timed out.
    #[serde(default)]
    pub ignore_timed_out_sells: bool,
    /// Venue calls that outlived their bound and are still running. New
    /// calls are refused while this many are stranded.
    #[serde(default = "default_max_stranded_calls")]
    pub max_stranded_calls: usize,
}

fn default_call_timeout() -> u64 {
    5_000
}
fn default_fill_timeout() -> u64 {
    60_000
}
fn default_poll_interval() -> u64 {
    250
}
fn default_max_stranded_calls() -> usize {
    16
}
fn default_min_trade() -> Money {
    dec!(1.00)
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: default_call_timeout(),
            fill_timeout_ms: default_fill_timeout(),
            poll_interval_ms: default_poll_interval(),
            min_trade: default_min_trade(),
            ignore_timed_out_sells: false,
            max_stranded_calls: default_max_stranded_calls(),
        }
    }
}

impl ExecutionConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn fill_timeout(&self) -> Duration {
        Duration::from_millis(self.fill_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulationSettings {
    #[serde(default = "default_initial_cash")]
    pub initial_cash: Money,
    #[serde(default)]
    pub frequency: RebalancingFrequency,
    #[serde(default = "default_benchmark")]
    pub benchmark: Symbol,
}

fn default_initial_cash() -> Money {
    dec!(30000)
}
fn default_benchmark() -> Symbol {
    Symbol::new("SPY")
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            initial_cash: default_initial_cash(),
            frequency: RebalancingFrequency::default(),
            benchmark: default_benchmark(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub dir: String,
    #[serde(default = "default_audit_file")]
    pub audit_file: String,
}

fn default_log_dir() -> String {
    "./logs".into()
}
fn default_audit_file() -> String {
    "audit.jsonl".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            audit_file: default_audit_file(),
        }
    }
}

impl Config {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::ConfigRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&contents)
    }

    /// Parse and validate TOML text.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate config invariants.
    fn validate(&self) -> Result<()> {
        let e = &self.execution;
        if e.call_timeout_ms == 0 {
            return Err(Error::Config("call_timeout_ms must be > 0".into()));
        }
        if e.fill_timeout_ms == 0 {
            return Err(Error::Config("fill_timeout_ms must be > 0".into()));
        }
        if e.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms must be > 0".into()));
        }
        if e.max_stranded_calls == 0 {
            return Err(Error::Config("max_stranded_calls must be > 0".into()));
        }
        if e.min_trade < Decimal::ZERO {
            return Err(Error::Config("min_trade must be >= 0".into()));
        }
        if self.simulation.initial_cash <= Decimal::ZERO {
            return Err(Error::Config("initial_cash must be > 0".into()));
        }
        Ok(())
    }

    /// Replay parameters derived from the `[simulation]` and `[execution]`
    /// sections.
    pub fn simulation_config(&self) -> SimulationConfig {
        SimulationConfig {
            initial_cash: self.simulation.initial_cash,
            frequency: self.simulation.frequency,
            min_trade: self.execution.min_trade,
        }
    }

    /// Full path to the audit log file.
    pub fn audit_path(&self) -> std::path::PathBuf {
        Path::new(&self.logging.dir).join(&self.logging.audit_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example_toml() -> &'static str {
        r#"
[execution]
call_timeout_ms = 2000
fill_timeout_ms = 30000
poll_interval_ms = 100
min_trade = 5.00
ignore_timed_out_sells = true

[simulation]
initial_cash = 50000
frequency = "monthly"
benchmark = "QQQ"

[logging]
dir = "./logs"
audit_file = "audit.jsonl"
"#
    }

    #[test]
    fn parse_example_config() {
        let config = Config::parse(example_toml()).unwrap();
        assert_eq!(config.execution.call_timeout(), Duration::from_secs(2));
        assert_eq!(config.execution.fill_timeout_ms, 30_000);
        assert_eq!(config.execution.min_trade, dec!(5));
        assert!(config.execution.ignore_timed_out_sells);
        assert_eq!(config.simulation.initial_cash, dec!(50000));
        assert_eq!(config.simulation.frequency, RebalancingFrequency::Monthly);
        assert_eq!(config.simulation.benchmark, Symbol::new("QQQ"));
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.execution.call_timeout_ms, 5_000);
        assert_eq!(config.execution.fill_timeout(), Duration::from_secs(60));
        assert_eq!(config.execution.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.execution.min_trade, dec!(1));
        assert!(!config.execution.ignore_timed_out_sells);
        assert_eq!(config.execution.max_stranded_calls, 16);
        assert_eq!(config.simulation.initial_cash, dec!(30000));
        assert_eq!(config.simulation.frequency, RebalancingFrequency::Daily);
        assert_eq!(config.simulation.benchmark, Symbol::new("SPY"));
    }

    #[test]
    fn validate_catches_zero_timeout() {
        let mut config = Config::default();
        config.execution.call_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_catches_negative_min_trade() {
        let mut config = Config::default();
        config.execution.min_trade = dec!(-1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_catches_bad_cash() {
        let toml = "[simulation]\ninitial_cash = 0\n";
        assert!(matches!(Config::parse(toml), Err(Error::Config(_))));
    }

    #[test]
    fn unknown_frequency_is_a_parse_error() {
        let toml = "[simulation]\nfrequency = \"hourly\"\n";
        assert!(matches!(Config::parse(toml), Err(Error::ConfigParse(_))));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, example_toml()).unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.simulation_config().frequency, RebalancingFrequency::Monthly);

        let missing = Config::load(&dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(Error::ConfigRead { .. })));
    }

    #[test]
    fn audit_path() {
        let config = Config::default();
        assert_eq!(config.audit_path(), std::path::PathBuf::from("./logs/audit.jsonl"));
    }
}
