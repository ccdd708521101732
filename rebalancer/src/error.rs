//! Error types for the rebalancer.

use std::path::PathBuf;
use std::time::Duration;

use weightbook::{AccountId, HistoryError, PortfolioId, WeightError};
use weightbook_venue::VenueError;

use crate::batch::BatchId;

/// All errors that can occur during rebalancer operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Weight range/sum violation. Raised before any venue call.
    #[error("validation failed: {0}")]
    Validation(#[from] WeightError),

    /// The venue was closed when the batch tried to submit. Nothing was
    /// submitted for the remaining orders; the batch can be resumed.
    #[error("market is closed; batch {batch} left pending")]
    MarketClosed { batch: BatchId },

    #[error("venue error: {0}")]
    Venue(#[from] VenueError),

    /// No answer within the bound. Orders involved may still be live.
    #[error("timed out after {after:?} waiting for {what}")]
    Timeout {
        what: String,
        after: Duration,
        batch: Option<BatchId>,
    },

    /// Another batch holds the account lease.
    #[error("account {account} already has active batch {active}")]
    ConcurrentBatch { account: AccountId, active: BatchId },

    /// The account changed after the batch was planned and the batch had
    /// traded nothing; it was withdrawn instead of resumed.
    #[error("batch {batch} was planned against an older account state; plan again")]
    StaleBatch { batch: BatchId },

    #[error(transparent)]
    InsufficientHistory(#[from] HistoryError),

    #[error("unknown batch {0}")]
    UnknownBatch(BatchId),

    #[error("unknown account {0}")]
    UnknownAccount(AccountId),

    #[error("unknown portfolio {0}")]
    UnknownPortfolio(PortfolioId),

    #[error("portfolio {0} still holds positions; liquidate it first")]
    NotLiquidated(PortfolioId),

    #[error("config error: {0}")]
    Config(String),

    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("store error: {0}")]
    Store(String),

    #[error("failed to parse store state: {0}")]
    StoreParse(#[from] serde_json::Error),

    #[error("audit log error: {0}")]
    Audit(#[from] std::io::Error),
}

impl Error {
    /// Process exit code for the command-line tool.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::MarketClosed { .. } => 3,
            Error::Timeout { .. } => 4,
            Error::ConcurrentBatch { .. } => 5,
            _ => 1,
        }
    }

    /// The batch this error leaves behind, if any.
    pub fn batch(&self) -> Option<BatchId> {
        match self {
            Error::MarketClosed { batch } => Some(*batch),
            Error::Timeout { batch, .. } => *batch,
            Error::ConcurrentBatch { active, .. } => Some(*active),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
