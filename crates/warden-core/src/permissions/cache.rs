//! Memoization layer over the policy and permission fetches.
//!
//! Cache keys are blake3 hashes of a canonical subset of the fetch
//! arguments: policy ids (order-sensitive), actions, the sorted collection
//! list, and the app flag. The full accountability object never enters a
//! key: keying on request-unique material would sink the hit rate, and the
//! key should not be derivable back into secrets. The request origin in
//! particular stays out of the policies key; what is cached is the ungated
//! assignment list with its IP ranges, and gating applies per lookup, so
//! one entry serves an identity from every origin.
//!
//! Invalidation is event-driven and narrow. A fetch handler reports the
//! access/policy row ids it read through [`Provided`]; the cache registers
//! one-shot listeners for mutations to exactly those rows. The first
//! matching event clears the entry and the listeners drain themselves.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, trace};
use warden_types::accountability::Accountability;
use warden_types::permission::Permission;

use super::fetch::{
    fetch_permissions, fetch_policies_ip_access, gate_policies_by_ip, AccessStore,
    FetchPermissionsArgs, PolicyIpAccess, Provided,
};
use crate::bus::{EventBus, ListenerOutcome, MutationKind, Topic};
use crate::error::Result;

/// Collection whose mutations invalidate access-row reads.
pub const ACCESS_COLLECTION: &str = "access";
/// Collection whose mutations invalidate policy reads.
pub const POLICIES_COLLECTION: &str = "policies";

type CacheKey = [u8; 32];

/// Running hit/miss counters.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

impl CacheStats {
    /// Cache hits so far.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Cache misses so far.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Entries cleared by invalidation events.
    pub fn invalidations(&self) -> u64 {
        self.invalidations.load(Ordering::Relaxed)
    }
}

/// Cache over [`fetch_policies_ip_access`] and [`fetch_permissions`].
///
/// Concurrent misses for the same key are deliberately not coalesced: both
/// callers run the fetch and converge on the same entry, which keeps the
/// layer lock-free. Lookups never fail; fetch errors propagate to the
/// caller uncached.
pub struct PermissionCache {
    policies: Arc<DashMap<CacheKey, Arc<Vec<PolicyIpAccess>>>>,
    permissions: Arc<DashMap<CacheKey, Arc<Vec<Permission>>>>,
    bus: Arc<EventBus>,
    stats: Arc<CacheStats>,
}

impl PermissionCache {
    /// Create a cache wired to the given event bus.
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            policies: Arc::new(DashMap::new()),
            permissions: Arc::new(DashMap::new()),
            bus,
            stats: Arc::new(CacheStats::default()),
        }
    }

    /// Counters for observability.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Number of live entries across both tables.
    pub fn len(&self) -> usize {
        self.policies.len() + self.permissions.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve the assigned policies and their IP ranges for an identity,
    /// memoized with no gating applied.
    pub fn fetch_policies_ip_access(
        &self,
        store: &dyn AccessStore,
        accountability: &Accountability,
    ) -> Result<Arc<Vec<PolicyIpAccess>>> {
        let key = policies_key(accountability);

        if let Some(hit) = self.policies.get(&key) {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            trace!(key = %hex::encode(key), "policies cache hit");
            return Ok(Arc::clone(&hit));
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);

        let mut provided = Provided::default();
        let value = Arc::new(fetch_policies_ip_access(store, accountability, &mut provided)?);
        self.policies.insert(key, Arc::clone(&value));
        self.register_invalidation(&self.policies, key, provided);
        Ok(value)
    }

    /// Resolve the effective policy ids for an identity, gated against the
    /// request origin. The underlying assignment list is memoized; the
    /// gate runs on every lookup.
    pub fn fetch_policies(
        &self,
        store: &dyn AccessStore,
        accountability: &Accountability,
    ) -> Result<Vec<String>> {
        let rows = self.fetch_policies_ip_access(store, accountability)?;
        Ok(gate_policies_by_ip(&rows, accountability.ip))
    }

    /// Fetch permission rows for a policy set, memoized.
    pub fn fetch_permissions(
        &self,
        store: &dyn AccessStore,
        args: &FetchPermissionsArgs<'_>,
    ) -> Result<Arc<Vec<Permission>>> {
        let key = permissions_key(args);

        if let Some(hit) = self.permissions.get(&key) {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            trace!(key = %hex::encode(key), "permissions cache hit");
            return Ok(Arc::clone(&hit));
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);

        let mut provided = Provided::default();
        let value = Arc::new(fetch_permissions(store, args, &mut provided)?);
        self.permissions.insert(key, Arc::clone(&value));
        self.register_invalidation(&self.permissions, key, provided);
        Ok(value)
    }

    /// Register one-shot listeners clearing `key` when any of the provided
    /// rows is mutated. Create events on the access collection match
    /// unconditionally: a brand-new assignment can change the result
    /// without touching any row that was read.
    fn register_invalidation<V: Send + Sync + 'static>(
        &self,
        table: &Arc<DashMap<CacheKey, V>>,
        key: CacheKey,
        provided: Provided,
    ) {
        let spent = Arc::new(AtomicBool::new(false));

        let mut watches: Vec<(Topic, Option<Vec<String>>)> = vec![(
            Topic::new(ACCESS_COLLECTION, MutationKind::Create),
            None,
        )];
        if !provided.access_ids.is_empty() {
            for kind in [MutationKind::Update, MutationKind::Delete] {
                watches.push((
                    Topic::new(ACCESS_COLLECTION, kind),
                    Some(provided.access_ids.clone()),
                ));
            }
        }
        if !provided.policy_ids.is_empty() {
            for kind in [MutationKind::Update, MutationKind::Delete] {
                watches.push((
                    Topic::new(POLICIES_COLLECTION, kind),
                    Some(provided.policy_ids.clone()),
                ));
            }
        }

        for (topic, watched_keys) in watches {
            let table = Arc::clone(table);
            let spent = Arc::clone(&spent);
            let stats = Arc::clone(&self.stats);

            self.bus
                .subscribe(topic, move |event| {
                    // A sibling listener already cleared the entry; drain.
                    if spent.load(Ordering::Acquire) {
                        return ListenerOutcome::Dispose;
                    }

                    let matched = match &watched_keys {
                        None => true,
                        Some(ids) => event.keys.iter().any(|k| ids.contains(k)),
                    };
                    if !matched {
                        return ListenerOutcome::Retain;
                    }

                    spent.store(true, Ordering::Release);
                    if table.remove(&key).is_some() {
                        stats.invalidations.fetch_add(1, Ordering::Relaxed);
                        debug!(topic = %event.topic, key = %hex::encode(key), "cache entry invalidated");
                    }
                    ListenerOutcome::Dispose
                })
                .detach();
        }
    }
}

fn policies_key(accountability: &Accountability) -> CacheKey {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"policies\x1f");
    hasher.update(accountability.user.as_deref().unwrap_or("").as_bytes());
    hasher.update(b"\x1f");
    for role in &accountability.roles {
        hasher.update(role.as_bytes());
        hasher.update(b"\x1e");
    }
    *hasher.finalize().as_bytes()
}

fn permissions_key(args: &FetchPermissionsArgs<'_>) -> CacheKey {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"permissions\x1f");
    for policy in args.policies {
        hasher.update(policy.as_bytes());
        hasher.update(b"\x1e");
    }
    hasher.update(b"\x1f");
    for action in args.actions {
        hasher.update(action.as_str().as_bytes());
        hasher.update(b"\x1e");
    }
    hasher.update(b"\x1f");
    if let Some(collections) = args.collections {
        let mut sorted: Vec<&String> = collections.iter().collect();
        sorted.sort();
        for collection in sorted {
            hasher.update(collection.as_bytes());
            hasher.update(b"\x1e");
        }
    }
    hasher.update(b"\x1f");
    hasher.update(&[u8::from(args.accountability.app)]);
    *hasher.finalize().as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MutationEvent;
    use crate::permissions::fetch::tests::MemoryStore;
    use crate::permissions::fetch::AccessRow;
    use warden_types::ip::IpRange;
    use warden_types::permission::{Action, Policy};

    fn store_with_one_policy() -> MemoryStore {
        MemoryStore::new(
            vec![AccessRow {
                id: "a1".into(),
                sort: 1,
                policy: Policy::new("p1"),
            }],
            vec![Permission::allow_all("articles", Action::Read).for_policy("p1")],
        )
    }

    fn event(collection: &str, kind: MutationKind, keys: &[&str]) -> MutationEvent {
        MutationEvent {
            topic: Topic::new(collection, kind),
            keys: keys.iter().map(|k| (*k).to_owned()).collect(),
        }
    }

    #[test]
    fn test_second_lookup_hits() {
        let bus = Arc::new(EventBus::new());
        let cache = PermissionCache::new(Arc::clone(&bus));
        let store = store_with_one_policy();
        let acc = Accountability::user("u1");

        let first = cache.fetch_policies(&store, &acc).unwrap();
        let second = cache.fetch_policies(&store, &acc).unwrap();

        assert_eq!(first, second);
        assert_eq!(*store.calls.lock(), 1);
        assert_eq!(cache.stats().hits(), 1);
        assert_eq!(cache.stats().misses(), 1);
    }

    #[test]
    fn test_key_subsets_distinguish_identities() {
        let bus = Arc::new(EventBus::new());
        let cache = PermissionCache::new(bus);
        let store = store_with_one_policy();

        cache
            .fetch_policies(&store, &Accountability::user("u1"))
            .unwrap();
        cache
            .fetch_policies(&store, &Accountability::user("u2"))
            .unwrap();

        // Different users, different keys: both were misses.
        assert_eq!(*store.calls.lock(), 2);
        // Admin flag is not part of the policies key.
        cache
            .fetch_policies(&store, &Accountability::admin("u1"))
            .unwrap();
        assert_eq!(*store.calls.lock(), 2);
    }

    #[test]
    fn test_origins_share_one_policies_entry() {
        let bus = Arc::new(EventBus::new());
        let cache = PermissionCache::new(bus);
        let restricted = Policy::new("p-office")
            .with_ip_access(vec!["10.0.0.0/8".parse::<IpRange>().unwrap()]);
        let store = MemoryStore::new(
            vec![
                AccessRow {
                    id: "a1".into(),
                    sort: 1,
                    policy: restricted,
                },
                AccessRow {
                    id: "a2".into(),
                    sort: 2,
                    policy: Policy::new("p-open"),
                },
            ],
            vec![],
        );

        let inside = Accountability::user("u1").with_ip("10.1.2.3".parse().unwrap());
        let outside = Accountability::user("u1").with_ip("192.168.0.1".parse().unwrap());

        assert_eq!(
            cache.fetch_policies(&store, &inside).unwrap(),
            vec!["p-office".to_owned(), "p-open".to_owned()]
        );
        assert_eq!(
            cache.fetch_policies(&store, &outside).unwrap(),
            vec!["p-open".to_owned()]
        );

        // One store read serves both origins; gating runs per lookup.
        assert_eq!(*store.calls.lock(), 1);
        assert_eq!(cache.stats().misses(), 1);
        assert_eq!(cache.stats().hits(), 1);
    }

    #[test]
    fn test_matching_mutation_invalidates_once() {
        let bus = Arc::new(EventBus::new());
        let cache = PermissionCache::new(Arc::clone(&bus));
        let store = store_with_one_policy();
        let acc = Accountability::user("u1");

        cache.fetch_policies(&store, &acc).unwrap();
        assert_eq!(cache.len(), 1);

        // Unrelated row: entry survives, listener stays.
        bus.publish(&event(POLICIES_COLLECTION, MutationKind::Update, &["p-other"]));
        assert_eq!(cache.len(), 1);

        // Matching row: entry cleared.
        bus.publish(&event(POLICIES_COLLECTION, MutationKind::Update, &["p1"]));
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.stats().invalidations(), 1);

        // Sibling listeners share the spent flag and drain on their next
        // delivery without clearing anything twice.
        bus.publish(&event(POLICIES_COLLECTION, MutationKind::Update, &["p1"]));
        bus.publish(&event(POLICIES_COLLECTION, MutationKind::Delete, &["p1"]));
        bus.publish(&event(ACCESS_COLLECTION, MutationKind::Create, &[]));
        bus.publish(&event(ACCESS_COLLECTION, MutationKind::Update, &["a1"]));
        bus.publish(&event(ACCESS_COLLECTION, MutationKind::Delete, &["a1"]));
        assert_eq!(bus.listener_count(), 0);
        assert_eq!(cache.stats().invalidations(), 1);
    }

    #[test]
    fn test_access_create_invalidates_unconditionally() {
        let bus = Arc::new(EventBus::new());
        let cache = PermissionCache::new(Arc::clone(&bus));
        let store = store_with_one_policy();
        let acc = Accountability::user("u1");

        cache.fetch_policies(&store, &acc).unwrap();
        bus.publish(&event(ACCESS_COLLECTION, MutationKind::Create, &[]));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_permissions_cache_keyed_on_policy_order() {
        let bus = Arc::new(EventBus::new());
        let cache = PermissionCache::new(bus);
        let store = store_with_one_policy();
        let acc = Accountability::user("u1");

        let forward = vec!["p1".to_owned(), "p2".to_owned()];
        let reversed = vec!["p2".to_owned(), "p1".to_owned()];
        for policies in [&forward, &reversed] {
            let args = FetchPermissionsArgs {
                policies,
                actions: &[Action::Read],
                collections: None,
                accountability: &acc,
            };
            cache.fetch_permissions(&store, &args).unwrap();
        }
        assert_eq!(cache.stats().misses(), 2);
    }

    #[test]
    fn test_fetch_errors_propagate_uncached() {
        struct FailingStore;
        impl AccessStore for FailingStore {
            fn access_rows(
                &self,
                _: &Accountability,
            ) -> std::result::Result<Vec<AccessRow>, super::super::fetch::BoxError> {
                Err("store offline".into())
            }
            fn permissions_for(
                &self,
                _: &[String],
                _: &[Action],
                _: Option<&[String]>,
            ) -> std::result::Result<Vec<Permission>, super::super::fetch::BoxError> {
                Err("store offline".into())
            }
        }

        let bus = Arc::new(EventBus::new());
        let cache = PermissionCache::new(bus);
        let acc = Accountability::user("u1");

        assert!(cache.fetch_policies(&FailingStore, &acc).is_err());
        assert!(cache.is_empty());
    }
}
