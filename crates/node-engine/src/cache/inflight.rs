//! At-most-one computation per fingerprint
//!
//! The first run to miss on a fingerprint claims it and receives an
//! [`InflightGuard`]. Any other run missing on the same fingerprint gets a
//! watch receiver instead and waits until the guard is dropped, then looks
//! the cache up again. If the owner failed (nothing was stored) the next
//! waiter to retry becomes the new owner.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;

use crate::fingerprint::Fingerprint;

struct InflightEntry {
    owner: String,
    done: watch::Receiver<bool>,
}

/// Fingerprints currently being computed, process-wide
#[derive(Clone, Default)]
pub(crate) struct InflightTable {
    entries: Arc<Mutex<HashMap<Fingerprint, InflightEntry>>>,
}

/// Outcome of trying to claim a fingerprint
pub(crate) enum Claim {
    Owner(InflightGuard),
    /// Another run is computing it
    Wait(watch::Receiver<bool>),
    /// This run already holds the claim
    Reentrant,
}

impl InflightTable {
    fn lock(&self) -> MutexGuard<'_, HashMap<Fingerprint, InflightEntry>> {
        // Every critical section is a single insert or remove, so the map is
        // consistent even after a panic elsewhere.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn claim(&self, fingerprint: Fingerprint, run_id: &str) -> Claim {
        let mut entries = self.lock();
        if let Some(entry) = entries.get(&fingerprint) {
            if entry.owner == run_id {
                return Claim::Reentrant;
            }
            return Claim::Wait(entry.done.clone());
        }

        let (tx, rx) = watch::channel(false);
        entries.insert(
            fingerprint,
            InflightEntry {
                owner: run_id.to_string(),
                done: rx,
            },
        );
        Claim::Owner(InflightGuard {
            fingerprint,
            table: self.clone(),
            done: tx,
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }
}

/// Exclusive right to compute one fingerprint
///
/// Dropping the guard releases the claim and wakes every waiter, whether or
/// not a result was stored.
pub struct InflightGuard {
    fingerprint: Fingerprint,
    table: InflightTable,
    done: watch::Sender<bool>,
}

impl InflightGuard {
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.table.lock().remove(&self.fingerprint);
        // No receivers left is fine
        let _ = self.done.send(true);
    }
}

impl std::fmt::Debug for InflightGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InflightGuard")
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(n: u8) -> Fingerprint {
        Fingerprint::from_bytes([n; 32])
    }

    #[test]
    fn test_second_claim_waits() {
        let table = InflightTable::default();
        let guard = match table.claim(fp(1), "run-a") {
            Claim::Owner(guard) => guard,
            _ => panic!("first claim should own"),
        };
        assert!(matches!(table.claim(fp(1), "run-b"), Claim::Wait(_)));
        assert!(matches!(table.claim(fp(1), "run-a"), Claim::Reentrant));
        assert!(matches!(table.claim(fp(2), "run-b"), Claim::Owner(_)));
        assert_eq!(table.len(), 1);

        drop(guard);
        assert_eq!(table.len(), 0);
        assert!(matches!(table.claim(fp(1), "run-b"), Claim::Owner(_)));
    }

    #[tokio::test]
    async fn test_drop_wakes_waiter() {
        let table = InflightTable::default();
        let Claim::Owner(guard) = table.claim(fp(1), "run-a") else {
            panic!("first claim should own");
        };
        let Claim::Wait(mut done) = table.claim(fp(1), "run-b") else {
            panic!("second claim should wait");
        };

        let waiter = tokio::spawn(async move {
            let _ = done.changed().await;
        });
        drop(guard);
        waiter.await.unwrap();
    }
}
