//! The lease value and the store contract.

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::LeaseError;

/// One successful acquisition of a named lease.
///
/// The token is unique to this acquisition. Extending or releasing with it
/// fails once the name has expired and been taken by another holder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    name: String,
    token: String,
    ttl: Duration,
}

impl Lease {
    /// Build a lease with a fresh random token.
    pub fn new(name: impl Into<String>, ttl: Duration) -> Self {
        Self {
            name: name.into(),
            token: Uuid::new_v4().to_string(),
            ttl,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Expiry in whole milliseconds, never below one.
    pub(crate) fn ttl_millis(&self) -> u64 {
        u64::try_from(self.ttl.as_millis()).unwrap_or(u64::MAX).max(1)
    }
}

/// Atomic lease primitives against a shared store.
///
/// Implementations must perform each call as one atomic operation on the
/// store; the client itself never serializes unrelated names.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Create `name` with a fresh token if it does not exist.
    ///
    /// Returns [`LeaseError::Busy`] when the name is held. Never retries.
    async fn acquire(&self, name: &str, ttl: Duration) -> Result<Lease, LeaseError>;

    /// Reset the expiry of `lease` to its TTL if the token still matches.
    async fn extend(&self, lease: &Lease) -> Result<(), LeaseError>;

    /// Delete `lease` if the token still matches.
    async fn release(&self, lease: &Lease) -> Result<(), LeaseError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_unique_per_acquisition() {
        let a = Lease::new("backup", Duration::from_secs(10));
        let b = Lease::new("backup", Duration::from_secs(10));

        assert_eq!(a.name(), b.name());
        assert_ne!(a.token(), b.token());
    }

    #[test]
    fn ttl_millis_rounds_down_but_stays_positive() {
        assert_eq!(Lease::new("x", Duration::from_secs(5)).ttl_millis(), 5000);
        assert_eq!(Lease::new("x", Duration::from_micros(10)).ttl_millis(), 1);
    }
}
