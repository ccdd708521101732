//! Per-account exclusive leases: at most one active batch per account.

use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info};
use rustc_hash::FxHashMap;
use weightbook::AccountId;

use crate::batch::BatchId;
use crate::error::{Error, Result};

/// Lease table shared by every operation of one engine.
#[derive(Debug, Clone, Default)]
pub struct AccountLeases {
    held: Arc<Mutex<FxHashMap<AccountId, BatchId>>>,
}

impl AccountLeases {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, FxHashMap<AccountId, BatchId>> {
        self.held.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Take the lease on `account` for `batch`. Fails with
    /// [`Error::ConcurrentBatch`] if another batch holds it.
    pub fn acquire(&self, account: &AccountId, batch: BatchId) -> Result<Lease> {
        let mut table = self.table();
        if let Some(active) = table.get(account) {
            debug!("lease on {account} refused to {batch}: held by {active}");
            return Err(Error::ConcurrentBatch {
                account: account.clone(),
                active: *active,
            });
        }
        table.insert(account.clone(), batch);
        info!("lease on account {account} acquired by {batch}");
        Ok(Lease {
            leases: self.clone(),
            account: account.clone(),
            batch,
        })
    }

    /// Batch currently holding the lease on `account`.
    pub fn holder(&self, account: &AccountId) -> Option<BatchId> {
        self.table().get(account).copied()
    }
}

/// Exclusive right to trade one account. Released on drop.
#[derive(Debug)]
pub struct Lease {
    leases: AccountLeases,
    account: AccountId,
    batch: BatchId,
}

impl Lease {
    pub fn account(&self) -> &AccountId {
        &self.account
    }

    pub fn batch(&self) -> BatchId {
        self.batch
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let mut table = self.leases.table();
        if table.get(&self.account) == Some(&self.batch) {
            table.remove(&self.account);
            info!("lease on account {} released by {}", self.account, self.batch);
        }
    }
}
