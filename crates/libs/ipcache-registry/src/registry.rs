use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use log::{debug, info};

use crate::error::StoreError;
use crate::store::{AuthorizationType, SqliteStore, UpsertOutcome};

/// Shared directory: the durable store plus an in-memory mirror of
/// principal id to last known IP.
///
/// The store is authoritative. Each store call runs on the blocking pool,
/// bounded by `op_timeout`; the mirror is written only after the matching
/// durable write commits, under the same store lock, so mirror updates land
/// in commit order.
pub struct Registry {
    store: Arc<Mutex<SqliteStore>>,
    mirror: Arc<DashMap<String, IpAddr>>,
    op_timeout: Duration,
}

impl Registry {
    /// Wraps `store` and hydrates the mirror from every registrar row.
    pub async fn hydrate(store: SqliteStore, op_timeout: Duration) -> Result<Self, StoreError> {
        let registry = Self {
            store: Arc::new(Mutex::new(store)),
            mirror: Arc::new(DashMap::new()),
            op_timeout,
        };
        let mirror = Arc::clone(&registry.mirror);
        let loaded = registry
            .with_store("load registrar", move |store| {
                let entries = store.load_all_registrar_entries()?;
                let count = entries.len();
                for entry in entries {
                    debug!("registrar row principal={} ip={}", entry.principal_id, entry.ip);
                    mirror.insert(entry.principal_id, entry.ip);
                }
                Ok(count)
            })
            .await?;
        info!("registry hydrated with {loaded} registrar entries");
        Ok(registry)
    }

    /// Persists a registration with last-writer-wins semantics, then points
    /// the mirror at whatever row the store kept.
    pub async fn record_registration(
        &self,
        principal_id: &str,
        unix_ts: i64,
        ip: IpAddr,
    ) -> Result<UpsertOutcome, StoreError> {
        let principal_id = principal_id.to_string();
        let mirror = Arc::clone(&self.mirror);
        self.with_store("upsert registrar", move |store| {
            let outcome = store.upsert_registrar_entry(&principal_id, unix_ts, ip)?;
            mirror.insert(outcome.stored.principal_id.clone(), outcome.stored.ip);
            Ok(outcome)
        })
        .await
    }

    /// Last known IP from the mirror, without touching the store.
    pub fn lookup(&self, principal_id: &str) -> Option<IpAddr> {
        self.mirror.get(principal_id).map(|entry| *entry.value())
    }

    pub fn mirrored_len(&self) -> usize {
        self.mirror.len()
    }

    pub async fn grant_authorization(
        &self,
        owner: &str,
        other: &str,
        capability: AuthorizationType,
    ) -> Result<bool, StoreError> {
        let (owner, other) = (owner.to_string(), other.to_string());
        self.with_store("grant authorization", move |store| {
            store.grant_authorization(&owner, &other, capability)
        })
        .await
    }

    pub async fn revoke_authorization(
        &self,
        owner: &str,
        other: &str,
        capability: AuthorizationType,
    ) -> Result<bool, StoreError> {
        let (owner, other) = (owner.to_string(), other.to_string());
        self.with_store("revoke authorization", move |store| {
            store.revoke_authorization(&owner, &other, capability)
        })
        .await
    }

    pub async fn is_authorized(
        &self,
        owner: &str,
        other: &str,
        capability: AuthorizationType,
    ) -> Result<bool, StoreError> {
        let (owner, other) = (owner.to_string(), other.to_string());
        self.with_store("check authorization", move |store| {
            store.is_authorized(&owner, &other, capability)
        })
        .await
    }

    /// The IP of `owner` as visible to `requester`.
    ///
    /// A principal may always see itself; anyone else needs a `GetIP` grant
    /// from `owner`.
    pub async fn lookup_authorized(
        &self,
        requester: &str,
        owner: &str,
    ) -> Result<Option<IpAddr>, StoreError> {
        if requester != owner
            && !self.is_authorized(owner, requester, AuthorizationType::GetIp).await?
        {
            return Ok(None);
        }
        Ok(self.lookup(owner))
    }

    async fn with_store<T, F>(&self, operation: &'static str, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut SqliteStore) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let task = tokio::task::spawn_blocking(move || {
            let mut guard = store.lock().map_err(|_| StoreError::Poisoned)?;
            f(&mut *guard)
        });
        match tokio::time::timeout(self.op_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(StoreError::Task(join_err.to_string())),
            Err(_) => Err(StoreError::Timeout { operation }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const A: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 0, 10));
    const B: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 0, 11));

    async fn registry() -> Registry {
        Registry::hydrate(SqliteStore::in_memory().expect("store"), Duration::from_secs(5))
            .await
            .expect("hydrate")
    }

    #[tokio::test]
    async fn hydrate_mirrors_existing_rows() {
        let mut store = SqliteStore::in_memory().expect("store");
        store.upsert_registrar_entry("p1", 10, A).expect("p1");
        store.upsert_registrar_entry("p2", 10, B).expect("p2");

        let registry = Registry::hydrate(store, Duration::from_secs(5)).await.expect("hydrate");
        assert_eq!(registry.mirrored_len(), 2);
        assert_eq!(registry.lookup("p1"), Some(A));
        assert_eq!(registry.lookup("p2"), Some(B));
        assert_eq!(registry.lookup("p3"), None);
    }

    #[tokio::test]
    async fn stale_registration_leaves_mirror_on_newer_ip() {
        let registry = registry().await;
        registry.record_registration("p", 200, B).await.expect("newer");
        let outcome = registry.record_registration("p", 100, A).await.expect("older");
        assert!(!outcome.applied);
        assert_eq!(registry.lookup("p"), Some(B));
    }

    #[tokio::test]
    async fn lookup_authorized_applies_the_grant_gate() {
        let registry = registry().await;
        registry.record_registration("owner", 1, A).await.expect("register");

        assert_eq!(registry.lookup_authorized("owner", "owner").await.expect("self"), Some(A));
        assert_eq!(registry.lookup_authorized("peer", "owner").await.expect("denied"), None);

        registry
            .grant_authorization("owner", "peer", AuthorizationType::GetIp)
            .await
            .expect("grant");
        assert_eq!(registry.lookup_authorized("peer", "owner").await.expect("granted"), Some(A));

        registry
            .revoke_authorization("owner", "peer", AuthorizationType::GetIp)
            .await
            .expect("revoke");
        assert_eq!(registry.lookup_authorized("peer", "owner").await.expect("revoked"), None);
    }
}
