//! In-process lease store.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::{Lease, LeaseError, LeaseStore};

/// Number of store calls seen by a [`MemoryLeaseStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LeaseCalls {
    pub acquire: usize,
    pub extend: usize,
    pub release: usize,
}

#[derive(Debug)]
struct Entry {
    token: String,
    expires_at: Instant,
}

/// A [`LeaseStore`] kept in process memory.
///
/// Same semantics as the Redis store, including passive expiry, but only
/// coordinates callers sharing this value. Expiry follows the tokio clock so
/// paused-time tests can step past it.
#[derive(Debug, Default)]
pub struct MemoryLeaseStore {
    entries: Mutex<HashMap<String, Entry>>,
    acquires: AtomicUsize,
    extends: AtomicUsize,
    releases: AtomicUsize,
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls made so far, successful or not.
    pub fn calls(&self) -> LeaseCalls {
        LeaseCalls {
            acquire: self.acquires.load(Ordering::SeqCst),
            extend: self.extends.load(Ordering::SeqCst),
            release: self.releases.load(Ordering::SeqCst),
        }
    }

    /// Whether `name` is currently held by anyone.
    pub fn is_held(&self, name: &str) -> bool {
        let now = Instant::now();
        self.lock()
            .get(name)
            .is_some_and(|entry| entry.expires_at > now)
    }

    /// Replace the holder of `name` with a stranger, as if the lease expired
    /// and another host acquired it.
    pub fn steal(&self, name: &str, ttl: Duration) {
        self.lock().insert(
            name.to_string(),
            Entry {
                token: Lease::new(name, ttl).token().to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        // A poisoned map is still consistent: every mutation is a single insert or remove.
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn owned_entry<'a>(
        entries: &'a mut HashMap<String, Entry>,
        lease: &Lease,
    ) -> Result<&'a mut Entry, LeaseError> {
        let now = Instant::now();
        entries
            .get_mut(lease.name())
            .filter(|entry| entry.expires_at > now && entry.token == lease.token())
            .ok_or_else(|| LeaseError::NotOwner(lease.name().to_string()))
    }
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn acquire(&self, name: &str, ttl: Duration) -> Result<Lease, LeaseError> {
        self.acquires.fetch_add(1, Ordering::SeqCst);

        let now = Instant::now();
        let mut entries = self.lock();
        entries.retain(|_, entry| entry.expires_at > now);
        if entries.contains_key(name) {
            return Err(LeaseError::Busy(name.to_string()));
        }

        let lease = Lease::new(name, ttl);
        entries.insert(
            name.to_string(),
            Entry {
                token: lease.token().to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(lease)
    }

    async fn extend(&self, lease: &Lease) -> Result<(), LeaseError> {
        self.extends.fetch_add(1, Ordering::SeqCst);

        let mut entries = self.lock();
        let entry = Self::owned_entry(&mut entries, lease)?;
        entry.expires_at = Instant::now() + lease.ttl();
        Ok(())
    }

    async fn release(&self, lease: &Lease) -> Result<(), LeaseError> {
        self.releases.fetch_add(1, Ordering::SeqCst);

        let mut entries = self.lock();
        Self::owned_entry(&mut entries, lease)?;
        entries.remove(lease.name());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    const TTL: Duration = Duration::from_secs(10);

    #[tokio::test]
    async fn second_acquire_is_busy() {
        let store = MemoryLeaseStore::new();

        let lease = store.acquire("nightly-backup", TTL).await.unwrap();
        let err = store.acquire("nightly-backup", TTL).await.unwrap_err();

        assert!(err.is_busy());
        assert!(store.is_held(lease.name()));
    }

    #[tokio::test]
    async fn concurrent_acquires_have_one_winner() {
        let store = Arc::new(MemoryLeaseStore::new());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.acquire("shared", TTL).await })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(e) => assert!(e.is_busy()),
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_forgets_expired_names() {
        let store = MemoryLeaseStore::new();
        store.acquire("a", Duration::from_secs(1)).await.unwrap();
        store.acquire("b", Duration::from_secs(1)).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        store.acquire("c", TTL).await.unwrap();

        let names: Vec<String> = store.lock().keys().cloned().collect();
        assert_eq!(names, vec!["c".to_string()]);
    }

    #[tokio::test]
    async fn different_names_do_not_collide() {
        let store = MemoryLeaseStore::new();

        store.acquire("a", TTL).await.unwrap();
        store.acquire("b", TTL).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn expired_lease_can_be_reacquired() {
        let store = MemoryLeaseStore::new();
        let first = store.acquire("job", Duration::from_secs(5)).await.unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;

        let second = store.acquire("job", Duration::from_secs(5)).await.unwrap();
        assert_ne!(first.token(), second.token());

        // The stale holder can neither extend nor release the new lease.
        assert!(matches!(
            store.extend(&first).await,
            Err(LeaseError::NotOwner(_))
        ));
        assert!(matches!(
            store.release(&first).await,
            Err(LeaseError::NotOwner(_))
        ));
        assert!(store.is_held("job"));
    }

    #[tokio::test(start_paused = true)]
    async fn extend_pushes_expiry_forward() {
        let store = MemoryLeaseStore::new();
        let lease = store.acquire("job", Duration::from_secs(5)).await.unwrap();

        tokio::time::advance(Duration::from_secs(4)).await;
        store.extend(&lease).await.unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;

        assert!(store.is_held("job"));
        assert!(store.acquire("job", Duration::from_secs(5)).await.is_err());
    }

    #[tokio::test]
    async fn release_frees_the_name() {
        let store = MemoryLeaseStore::new();
        let lease = store.acquire("job", TTL).await.unwrap();

        store.release(&lease).await.unwrap();

        assert!(!store.is_held("job"));
        store.acquire("job", TTL).await.unwrap();
        assert_eq!(
            store.calls(),
            LeaseCalls {
                acquire: 2,
                extend: 0,
                release: 1
            }
        );
    }

    #[tokio::test]
    async fn stolen_lease_rejects_old_holder() {
        let store = MemoryLeaseStore::new();
        let lease = store.acquire("job", TTL).await.unwrap();

        store.steal("job", TTL);

        assert!(matches!(
            store.extend(&lease).await,
            Err(LeaseError::NotOwner(_))
        ));
        assert!(store.is_held("job"));
    }
}
