//! Per-wallet write locks.
//!
//! Mutations of one wallet are serialized in-process so concurrent callers
//! queue instead of burning their optimistic retries. Operations touching two
//! wallets take both locks in ascending `WalletId` order.

use std::sync::Arc;

use dashmap::DashMap;
use interstellar_common::WalletId;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Entries kept before idle locks are pruned.
const PRUNE_THRESHOLD: usize = 10_000;

/// Guard for one or two wallets. Released on drop.
pub struct WalletGuard {
    _first: OwnedMutexGuard<()>,
    _second: Option<OwnedMutexGuard<()>>,
}

/// Table of wallet locks.
#[derive(Default)]
pub struct WalletLocks {
    locks: DashMap<WalletId, Arc<Mutex<()>>>,
}

impl WalletLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, id: WalletId) -> Arc<Mutex<()>> {
        self.locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Lock a single wallet.
    pub async fn acquire(&self, id: WalletId) -> WalletGuard {
        self.prune();
        let guard = self.handle(id).lock_owned().await;
        WalletGuard {
            _first: guard,
            _second: None,
        }
    }

    /// Lock two wallets in ascending id order.
    pub async fn acquire_pair(&self, a: WalletId, b: WalletId) -> WalletGuard {
        if a == b {
            return self.acquire(a).await;
        }

        self.prune();
        let (low, high) = if a < b { (a, b) } else { (b, a) };
        let first = self.handle(low).lock_owned().await;
        let second = self.handle(high).lock_owned().await;

        WalletGuard {
            _first: first,
            _second: Some(second),
        }
    }

    /// Number of wallets with a lock entry.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Drop entries nobody holds or waits on.
    fn prune(&self) {
        if self.locks.len() <= PRUNE_THRESHOLD {
            return;
        }

        let before = self.locks.len();
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        debug!(before, after = self.locks.len(), "Pruned idle wallet locks");
    }
}
