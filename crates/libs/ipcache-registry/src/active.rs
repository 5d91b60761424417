use std::net::IpAddr;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Outcome of [`ActiveDaemons::claim`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    Registered,
    /// The principal was live from another IP and now points here.
    TookOver { previous: IpAddr },
    /// The principal is already live from this same IP; nothing changed.
    Duplicate,
}

/// Principals that currently hold an open, registered connection.
///
/// Every operation is atomic per principal id.
#[derive(Debug, Default)]
pub struct ActiveDaemons {
    inner: DashMap<String, IpAddr>,
}

impl ActiveDaemons {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `principal_id` as live at `ip`.
    ///
    /// A live entry with the same IP is a duplicate and is left alone; a live
    /// entry with a different IP is replaced.
    pub fn claim(&self, principal_id: &str, ip: IpAddr) -> Claim {
        match self.inner.entry(principal_id.to_string()) {
            Entry::Occupied(entry) if *entry.get() == ip => Claim::Duplicate,
            Entry::Occupied(mut entry) => {
                let previous = entry.insert(ip);
                Claim::TookOver { previous }
            }
            Entry::Vacant(entry) => {
                entry.insert(ip);
                Claim::Registered
            }
        }
    }

    /// Removes the entry only if it still maps `principal_id` to `ip`.
    pub fn release(&self, principal_id: &str, ip: IpAddr) -> bool {
        self.inner.remove_if(principal_id, |_, current| *current == ip).is_some()
    }

    pub fn get(&self, principal_id: &str) -> Option<IpAddr> {
        self.inner.get(principal_id).map(|entry| *entry.value())
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    const A: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 1, 0, 1));
    const B: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 1, 0, 2));

    #[test]
    fn same_ip_is_duplicate_and_different_ip_takes_over() {
        let active = ActiveDaemons::new();
        assert_eq!(active.claim("p", A), Claim::Registered);
        assert_eq!(active.claim("p", A), Claim::Duplicate);
        assert_eq!(active.len(), 1);
        assert_eq!(active.claim("p", B), Claim::TookOver { previous: A });
        assert_eq!(active.get("p"), Some(B));
    }

    #[test]
    fn stale_release_does_not_evict_newer_owner() {
        let active = ActiveDaemons::new();
        active.claim("p", A);
        active.claim("p", B);
        assert!(!active.release("p", A), "stale connection must not evict");
        assert_eq!(active.get("p"), Some(B));
        assert!(active.release("p", B));
        assert!(active.is_empty());
        assert!(!active.release("p", B));
    }

    #[test]
    fn concurrent_claims_register_exactly_once() {
        let active = Arc::new(ActiveDaemons::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let active = Arc::clone(&active);
                std::thread::spawn(move || active.claim("p", A))
            })
            .collect();
        let claims: Vec<Claim> =
            handles.into_iter().map(|handle| handle.join().expect("join")).collect();
        assert_eq!(claims.iter().filter(|claim| **claim == Claim::Registered).count(), 1);
        assert_eq!(claims.iter().filter(|claim| **claim == Claim::Duplicate).count(), 15);
    }
}
