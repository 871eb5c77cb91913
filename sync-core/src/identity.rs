use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as SlotLock, OwnedMutexGuard};

/// Remote incident id as assigned by CachetHQ.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IncidentRef(pub u64);

impl fmt::Display for IncidentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncidentIdentity {
    pub component_key: String,
    pub incident_ref: Option<IncidentRef>,
}

impl IncidentIdentity {
    pub fn unattached(component_key: &str) -> Self {
        Self {
            component_key: component_key.to_string(),
            incident_ref: None,
        }
    }
}

/// Held while a transition for one identity is decided and applied.
pub type IdentityGuard = OwnedMutexGuard<IncidentIdentity>;

/// Best-effort map from identity to the incident opened for it by this process.
///
/// The outer lock only guards slot lookup/insert. Each slot carries its own
/// async lock which callers keep across the remote call, so that reading the
/// current ref and writing the new one is atomic per identity. A slot without
/// an open incident is dropped on [`IdentityCache::release`] once nobody else
/// holds or awaits it.
#[derive(Default)]
pub struct IdentityCache {
    slots: Mutex<HashMap<String, Arc<SlotLock<IncidentIdentity>>>>,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(entries: impl IntoIterator<Item = (String, IncidentRef)>) -> Self {
        let slots = entries
            .into_iter()
            .map(|(key, incident)| {
                let identity = IncidentIdentity {
                    component_key: key.clone(),
                    incident_ref: Some(incident),
                };
                (key, Arc::new(SlotLock::new(identity)))
            })
            .collect();
        Self {
            slots: Mutex::new(slots),
        }
    }

    /// Returns the locked entry for `identity`, creating an unattached one if needed.
    pub async fn resolve(&self, identity: &str) -> IdentityGuard {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots
                .entry(identity.to_string())
                .or_insert_with(|| Arc::new(SlotLock::new(IncidentIdentity::unattached(identity))))
                .clone()
        };
        slot.lock_owned().await
    }

    /// Unlocks `entry`, removing its slot if it has no open incident and no
    /// other task has reached it. Resolvers clone slots under the outer lock,
    /// so the reference count checked here cannot grow concurrently.
    pub fn release(&self, entry: IdentityGuard) {
        if entry.incident_ref.is_some() {
            return;
        }
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let held = OwnedMutexGuard::mutex(&entry);
        let idle = slots
            .get(&entry.component_key)
            .is_some_and(|slot| Arc::ptr_eq(slot, held) && Arc::strong_count(slot) == 2);
        if idle {
            slots.remove(&entry.component_key);
        }
        drop(slots);
        drop(entry);
    }

    /// Snapshot of the open incident for `identity`, without creating an entry.
    pub async fn incident_ref(&self, identity: &str) -> Option<IncidentRef> {
        let slot = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity)
            .cloned()?;
        let entry = slot.lock().await;
        entry.incident_ref
    }

    pub fn tracked(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_inserts_unattached_entry() {
        let cache = IdentityCache::new();
        assert_eq!(cache.tracked(), 0);

        let entry = cache.resolve("HighCPU").await;
        assert_eq!(entry.component_key, "HighCPU");
        assert_eq!(entry.incident_ref, None);
        drop(entry);

        assert_eq!(cache.tracked(), 1);
        assert_eq!(cache.incident_ref("HighCPU").await, None);
    }

    #[tokio::test]
    async fn writes_through_guard_are_visible() {
        let cache = IdentityCache::new();
        {
            let mut entry = cache.resolve("HighCPU").await;
            entry.incident_ref = Some(IncidentRef(7));
        }
        assert_eq!(cache.incident_ref("HighCPU").await, Some(IncidentRef(7)));

        {
            let mut entry = cache.resolve("HighCPU").await;
            entry.incident_ref = None;
        }
        assert_eq!(cache.incident_ref("HighCPU").await, None);
        assert_eq!(cache.tracked(), 1);
    }

    #[tokio::test]
    async fn seeded_cache_reports_open_incidents() {
        let cache = IdentityCache::seeded([("DiskFull".to_string(), IncidentRef(3))]);
        assert_eq!(cache.incident_ref("DiskFull").await, Some(IncidentRef(3)));
        assert_eq!(cache.incident_ref("Other").await, None);
        assert_eq!(cache.tracked(), 1);
    }

    #[tokio::test]
    async fn release_drops_idle_closed_slot() {
        let cache = IdentityCache::new();
        let entry = cache.resolve("HighCPU").await;
        cache.release(entry);
        assert_eq!(cache.tracked(), 0);

        let mut entry = cache.resolve("HighCPU").await;
        entry.incident_ref = Some(IncidentRef(4));
        cache.release(entry);
        assert_eq!(cache.tracked(), 1);
        assert_eq!(cache.incident_ref("HighCPU").await, Some(IncidentRef(4)));
    }

    #[tokio::test]
    async fn release_keeps_slot_with_waiter() {
        let cache = Arc::new(IdentityCache::new());
        let first = cache.resolve("X").await;

        let waiter = {
            let cache = cache.clone();
            tokio::spawn(async move {
                let mut entry = cache.resolve("X").await;
                entry.incident_ref = Some(IncidentRef(2));
                cache.release(entry);
            })
        };
        // Map, first guard, and the waiter's clone.
        while slot_refs(&cache, "X") < 3 {
            tokio::task::yield_now().await;
        }

        cache.release(first);
        assert_eq!(cache.tracked(), 1);

        waiter.await.expect("join");
        assert_eq!(cache.incident_ref("X").await, Some(IncidentRef(2)));
    }

    fn slot_refs(cache: &IdentityCache, identity: &str) -> usize {
        cache
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity)
            .map_or(0, Arc::strong_count)
    }

    #[tokio::test]
    async fn second_resolve_waits_for_first_guard() {
        let cache = Arc::new(IdentityCache::new());
        let first = cache.resolve("X").await;

        let waiter = {
            let cache = cache.clone();
            tokio::spawn(async move {
                let entry = cache.resolve("X").await;
                entry.incident_ref
            })
        };

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        let mut first = first;
        first.incident_ref = Some(IncidentRef(1));
        drop(first);

        assert_eq!(waiter.await.expect("join"), Some(IncidentRef(1)));
    }
}
