//! Expiring, token-owned leases on a shared key-value store.
//!
//! A lease is a key that exists only while somebody holds it:
//! - `acquire` creates the key if it is absent, with an expiry
//! - `extend` resets the expiry, but only for the token that created it
//! - `release` deletes the key, but only for the token that created it
//!
//! Every operation is a single atomic step on the store, so two hosts racing
//! for the same name can never both win.

mod error;
mod lease;
mod memory;
mod redis_store;

pub use error::LeaseError;
pub use lease::{Lease, LeaseStore};
pub use memory::{LeaseCalls, MemoryLeaseStore};
pub use redis_store::{RedisLeaseStore, RedisSettings};
