//! Redis-backed lease store.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{IntoConnectionInfo, Script};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::{Lease, LeaseError, LeaseStore};

/// How long to wait for the initial connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Reset the expiry only if the caller still holds the key.
const EXTEND_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("PEXPIRE", KEYS[1], ARGV[2])
else
    return 0
end
"#;

/// Delete the key only if the caller still holds it.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Connection settings for [`RedisLeaseStore`].
#[derive(Debug, Clone)]
pub struct RedisSettings {
    /// Connection URI, e.g. `redis://127.0.0.1:6379/0`.
    pub uri: String,
    /// Password applied on top of whatever the URI carries.
    pub password: Option<String>,
}

/// A [`LeaseStore`] on a single Redis server.
///
/// The connection is opened on first use and then shared: the multiplexed
/// manager is cloned per call, so concurrent executions never wait on each
/// other and a dropped connection is re-established transparently.
pub struct RedisLeaseStore {
    client: redis::Client,
    connection: OnceCell<ConnectionManager>,
    extend_script: Script,
    release_script: Script,
}

impl RedisLeaseStore {
    /// Create a store. Only validates the URI; no connection is made yet.
    pub fn new(settings: &RedisSettings) -> Result<Self, LeaseError> {
        let mut info = settings.uri.as_str().into_connection_info()?;
        if let Some(password) = settings.password.as_ref().filter(|p| !p.is_empty()) {
            info.redis.password = Some(password.clone());
        }

        Ok(Self {
            client: redis::Client::open(info)?,
            connection: OnceCell::new(),
            extend_script: Script::new(EXTEND_SCRIPT),
            release_script: Script::new(RELEASE_SCRIPT),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, LeaseError> {
        let manager = self
            .connection
            .get_or_try_init(|| async {
                let manager = tokio::time::timeout(
                    CONNECT_TIMEOUT,
                    ConnectionManager::new(self.client.clone()),
                )
                .await
                .map_err(|_| LeaseError::ConnectTimeout(CONNECT_TIMEOUT))??;
                info!("connected to lease store");
                Ok::<_, LeaseError>(manager)
            })
            .await?;
        Ok(manager.clone())
    }
}

#[async_trait]
impl LeaseStore for RedisLeaseStore {
    #[tracing::instrument(skip(self), fields(lease = %name))]
    async fn acquire(&self, name: &str, ttl: Duration) -> Result<Lease, LeaseError> {
        let lease = Lease::new(name, ttl);
        let mut conn = self.connection().await?;

        let reply: Option<String> = redis::cmd("SET")
            .arg(lease.name())
            .arg(lease.token())
            .arg("NX")
            .arg("PX")
            .arg(lease.ttl_millis())
            .query_async(&mut conn)
            .await?;

        match reply {
            Some(_) => {
                debug!(ttl_ms = lease.ttl_millis(), "lease acquired");
                Ok(lease)
            }
            None => Err(LeaseError::Busy(name.to_string())),
        }
    }

    #[tracing::instrument(skip_all, fields(lease = %lease.name()))]
    async fn extend(&self, lease: &Lease) -> Result<(), LeaseError> {
        let mut conn = self.connection().await?;

        let extended: i64 = self
            .extend_script
            .key(lease.name())
            .arg(lease.token())
            .arg(lease.ttl_millis())
            .invoke_async(&mut conn)
            .await?;

        if extended == 1 {
            Ok(())
        } else {
            Err(LeaseError::NotOwner(lease.name().to_string()))
        }
    }

    #[tracing::instrument(skip_all, fields(lease = %lease.name()))]
    async fn release(&self, lease: &Lease) -> Result<(), LeaseError> {
        let mut conn = self.connection().await?;

        let deleted: i64 = self
            .release_script
            .key(lease.name())
            .arg(lease.token())
            .invoke_async(&mut conn)
            .await?;

        if deleted == 1 {
            Ok(())
        } else {
            Err(LeaseError::NotOwner(lease.name().to_string()))
        }
    }
}
