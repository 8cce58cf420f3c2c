use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

use super::mutation::{Mutation, MutationDescriptor, MutationFetcher};
use super::query::{Fetcher, QueryDescriptor, QueryState};
use super::retry::{execute_with_retry, RetryPolicy};
use super::transport::{HttpTransport, RequestOptions, TransportResponse};
use crate::app::NetworkConfig;
use crate::cache::{CacheKey, CacheStore, CacheTier, DurableChannel, PersistenceBridge};
use crate::graphql::{DocumentResolver, Operation};
use crate::identity::DeviceIdentityManager;
use crate::stats::{StatisticsCollector, StatisticsSnapshot};
use crate::utils::NetworkError;

type SharedFetch = Shared<BoxFuture<'static, Result<Value, NetworkError>>>;

/// Which subscriptions a bulk refetch targets
#[derive(Debug, Clone)]
pub enum RefetchScope {
    Active,
    Inactive,
    All,
    Key(CacheKey),
}

struct Subscription {
    descriptor: QueryDescriptor,
    fetcher: Fetcher,
    sender: watch::Sender<QueryState>,
    active: bool,
    poll_task: Option<tokio::task::JoinHandle<()>>,
}

/// The cache-tiered request engine.
///
/// One instance per long-lived client process; stateless server contexts
/// construct a fresh instance per request instead of sharing one.
pub struct NetworkService {
    self_ref: Weak<NetworkService>,
    config: Arc<NetworkConfig>,
    store: CacheStore,
    stats: StatisticsCollector,
    identity: Arc<DeviceIdentityManager>,
    transport: HttpTransport,
    resolver: DocumentResolver,
    bridge: PersistenceBridge,
    in_flight: Mutex<HashMap<CacheKey, SharedFetch>>,
    subscriptions: Mutex<HashMap<u64, Subscription>>,
    next_subscription_id: AtomicU64,
    backgrounded: AtomicBool,
}

impl NetworkService {
    pub fn new(config: NetworkConfig) -> Arc<Self> {
        Self::with_resolver(config, DocumentResolver::default())
    }

    pub fn with_resolver(config: NetworkConfig, resolver: DocumentResolver) -> Arc<Self> {
        let config = Arc::new(config);
        // Server-side execution is stateless: tracking would leak state
        // across invocations
        let stats = StatisticsCollector::new(!config.server_side);
        let identity = Arc::new(DeviceIdentityManager::new(Arc::clone(&config)));
        let transport = HttpTransport::new(
            Arc::clone(&config),
            Arc::clone(&identity),
            stats.clone(),
        );
        let store = CacheStore::new();
        let bridge = PersistenceBridge::new(&config);
        bridge.restore(&store);

        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            config,
            store,
            stats,
            identity,
            transport,
            resolver,
            bridge,
            in_flight: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            next_subscription_id: AtomicU64::new(0),
            backgrounded: AtomicBool::new(false),
        })
    }

    // ---- reads ----------------------------------------------------------

    /// One-shot read honoring the descriptor's cache tier, freshness
    /// window and retry policy
    pub async fn query(&self, descriptor: &QueryDescriptor, fetcher: Fetcher) -> QueryState {
        if !descriptor.enabled {
            return QueryState::idle(descriptor);
        }
        match self.run_query(descriptor, fetcher, false).await {
            Ok(raw) => QueryState::success(descriptor.project(&raw)),
            Err(error) => QueryState::failure(error, descriptor.seed_data()),
        }
    }

    /// Subscribe to a read: the returned watcher observes state changes
    /// from the initial load, invalidation-triggered refetches, polling,
    /// focus/reconnect notifications and bulk refetches.
    pub fn watch_query(&self, descriptor: QueryDescriptor, fetcher: Fetcher) -> QueryWatcher {
        let id = self.next_subscription_id.fetch_add(1, Ordering::SeqCst);
        let initial = if descriptor.enabled {
            QueryState::loading(&descriptor)
        } else {
            QueryState::idle(&descriptor)
        };
        let (sender, receiver) = watch::channel(initial);

        let poll_task = match (descriptor.enabled, descriptor.refresh_interval_ms) {
            (true, Some(interval_ms)) => {
                Some(self.spawn_poll_task(id, interval_ms, descriptor.refresh_in_background))
            }
            _ => None,
        };

        let key = descriptor.key.clone();
        let enabled = descriptor.enabled;
        self.subscriptions.lock().insert(
            id,
            Subscription {
                descriptor,
                fetcher,
                sender,
                active: true,
                poll_task,
            },
        );

        if enabled {
            if let Some(service) = self.self_ref.upgrade() {
                tokio::spawn(service.refetch_subscription(id, false, false));
            }
        }

        QueryWatcher {
            id,
            key,
            receiver,
            service: self.self_ref.clone(),
        }
    }

    /// Populate the cache ahead of need. Still gated behind device
    /// identity; failures are absorbed.
    pub async fn prefetch(&self, descriptor: &QueryDescriptor, fetcher: Fetcher) {
        if let Err(e) = self.run_query(descriptor, fetcher, false).await {
            debug!("Prefetch for {} failed: {}", descriptor.key, e);
        }
    }

    /// Core read path: identity, freshness check, deduplicated fetch,
    /// store per tier. Returns the raw (pre-select) value.
    async fn run_query(
        &self,
        descriptor: &QueryDescriptor,
        fetcher: Fetcher,
        force: bool,
    ) -> Result<Value, NetworkError> {
        self.identity.ensure().await;

        let cacheable = descriptor.cache != CacheTier::Uncached;
        if cacheable {
            if !force {
                if let Some(entry) = self.store.peek(&descriptor.key) {
                    if entry.is_fresh(descriptor.effective_valid_duration_ms(), chrono::Utc::now())
                    {
                        self.stats.track_cache_hit();
                        self.store.get(&descriptor.key);
                        return Ok(entry.data);
                    }
                }
            }
            self.stats.track_cache_miss();
        }

        let policy = RetryPolicy::with_retries(
            descriptor
                .maximum_retries
                .unwrap_or(self.config.cache.maximum_retries),
        );
        let result = self.fetch_deduped(&descriptor.key, fetcher, policy).await;

        if let Ok(value) = &result {
            self.store
                .set(descriptor.key.clone(), value.clone(), descriptor.cache);
        }
        result
    }

    /// Identical cache keys share one in-flight fetch: a single transport
    /// call per key at a time, with every caller observing the same
    /// resolved value or the same error.
    async fn fetch_deduped(
        &self,
        key: &CacheKey,
        fetcher: Fetcher,
        policy: RetryPolicy,
    ) -> Result<Value, NetworkError> {
        let shared = {
            let mut in_flight = self.in_flight.lock();
            if let Some(existing) = in_flight.get(key) {
                existing.clone()
            } else {
                let fut = async move { execute_with_retry(policy, || fetcher()).await }
                    .boxed()
                    .shared();
                in_flight.insert(key.clone(), fut.clone());
                fut
            }
        };

        let result = shared.clone().await;

        // Only the fetch we awaited is removed; a newer in-flight fetch
        // for the same key must not be evicted by a late completer
        let mut in_flight = self.in_flight.lock();
        if in_flight.get(key).is_some_and(|current| current.ptr_eq(&shared)) {
            in_flight.remove(key);
        }
        result
    }

    // ---- writes ---------------------------------------------------------

    /// Build a write handle. See `Mutation::execute`.
    pub fn mutation(&self, descriptor: MutationDescriptor, fetcher: MutationFetcher) -> Mutation {
        Mutation::new(self.self_ref.clone(), descriptor, fetcher)
    }

    // ---- direct call surface --------------------------------------------

    /// Direct transport call (identity, rewriting, classification, stats)
    pub async fn request(
        &self,
        options: RequestOptions,
    ) -> Result<TransportResponse, NetworkError> {
        self.transport.request(options).await
    }

    /// Resolve a named or raw operation and issue it as a GraphQL request
    pub async fn graphql_request<T: serde::de::DeserializeOwned>(
        &self,
        operation: &Operation,
        variables: Value,
    ) -> Result<T, NetworkError> {
        let document = self.resolver.resolve(operation)?;
        let data = self.transport.graphql(&document, variables).await?;
        serde_json::from_value(data).map_err(NetworkError::from)
    }

    // ---- cache management surface ---------------------------------------

    /// Read a cached value. Stale or expired entries are never returned.
    pub fn get(&self, key: &CacheKey) -> Option<Value> {
        self.store.get(key)
    }

    /// Write a value directly into the cache
    pub fn set(&self, key: CacheKey, value: Value, tier: CacheTier) {
        self.store.set(key, value, tier);
    }

    /// Mark a key stale and trigger a refetch for its active subscribers.
    /// The stale marking is synchronous; by the time this returns, `get`
    /// no longer serves the old value.
    pub fn invalidate(&self, key: &CacheKey) {
        self.store.invalidate(key);

        let ids: Vec<u64> = self
            .subscriptions
            .lock()
            .iter()
            .filter(|(_, sub)| sub.active && sub.descriptor.key == *key)
            .map(|(id, _)| *id)
            .collect();
        if ids.is_empty() {
            return;
        }
        // Refetches run in the background; spawning requires a runtime,
        // and without one there are no live subscribers to refresh anyway
        if let (Some(service), Ok(handle)) = (
            self.self_ref.upgrade(),
            tokio::runtime::Handle::try_current(),
        ) {
            for id in ids {
                handle.spawn(Arc::clone(&service).refetch_subscription(id, true, false));
            }
        }
    }

    /// Delete a cached entry outright
    pub fn remove(&self, key: &CacheKey) -> bool {
        self.store.remove(key)
    }

    /// Clear entries and treat them as never fetched; `None` resets all
    pub fn reset(&self, keys: Option<&[CacheKey]>) {
        self.store.reset(keys);
    }

    /// Wipe the memory cache and all durable persisted copies
    pub fn clear(&self) {
        self.store.clear();
        self.bridge.clear(None);
    }

    /// Evict entries unread past the configured retention window
    pub fn sweep_unused(&self) -> usize {
        self.store.sweep_unused(self.config.cache.clear_after_unused_ms)
    }

    /// Flush opted-in tiers to their durable channels
    pub fn persist(&self) {
        self.bridge.persist_all(&self.store);
    }

    /// Remove the persisted blob for a channel, or both
    pub fn clear_persisted_cache(&self, channel: Option<DurableChannel>) {
        self.bridge.clear(channel);
    }

    /// Byte size of a channel's persisted blob, 0 on any failure
    pub fn persisted_cache_size_in_bytes(&self, channel: DurableChannel) -> u64 {
        self.bridge.size_in_bytes(channel)
    }

    /// Refetch subscriptions in scope, awaiting completion
    pub async fn refetch_queries(&self, scope: RefetchScope) {
        let ids: Vec<u64> = {
            let subscriptions = self.subscriptions.lock();
            subscriptions
                .iter()
                .filter(|(_, sub)| match &scope {
                    RefetchScope::Active => sub.active,
                    RefetchScope::Inactive => !sub.active,
                    RefetchScope::All => true,
                    RefetchScope::Key(key) => sub.descriptor.key == *key,
                })
                .map(|(id, _)| *id)
                .collect()
        };
        self.refetch_ids(ids).await;
    }

    /// Refetch subscriptions whose cache key matches a predicate
    pub async fn refetch_matching(&self, predicate: impl Fn(&CacheKey) -> bool) {
        let ids: Vec<u64> = {
            let subscriptions = self.subscriptions.lock();
            subscriptions
                .iter()
                .filter(|(_, sub)| predicate(&sub.descriptor.key))
                .map(|(id, _)| *id)
                .collect()
        };
        self.refetch_ids(ids).await;
    }

    /// The host window regained focus
    pub async fn notify_focus(&self) {
        let ids = self.opted_in_ids(|d| d.refresh_on_focus);
        self.refetch_ids(ids).await;
    }

    /// Network connectivity came back
    pub async fn notify_reconnect(&self) {
        let ids = self.opted_in_ids(|d| d.refresh_on_reconnect);
        self.refetch_ids(ids).await;
    }

    /// Mark the host view background/foreground; polling subscriptions
    /// that did not opt into background refresh pause while backgrounded
    pub fn set_backgrounded(&self, backgrounded: bool) {
        self.backgrounded.store(backgrounded, Ordering::Relaxed);
    }

    // ---- statistics surface ---------------------------------------------

    pub fn get_statistics(&self) -> StatisticsSnapshot {
        self.stats.snapshot()
    }

    pub fn reset_statistics(&self) {
        self.stats.reset();
    }

    pub(crate) fn statistics(&self) -> &StatisticsCollector {
        &self.stats
    }

    pub(crate) fn identity(&self) -> &DeviceIdentityManager {
        &self.identity
    }

    /// Force the next identity check to re-validate from storage
    pub fn reset_identity(&self) {
        self.identity.reset();
    }

    // ---- subscription internals -----------------------------------------

    fn opted_in_ids(&self, opted: impl Fn(&QueryDescriptor) -> bool) -> Vec<u64> {
        self.subscriptions
            .lock()
            .iter()
            .filter(|(_, sub)| sub.active && opted(&sub.descriptor))
            .map(|(id, _)| *id)
            .collect()
    }

    async fn refetch_ids(&self, ids: Vec<u64>) {
        let Some(service) = self.self_ref.upgrade() else {
            return;
        };
        let refetches = ids
            .into_iter()
            .map(|id| Arc::clone(&service).refetch_subscription(id, true, true));
        futures::future::join_all(refetches).await;
    }

    /// Run one subscription's fetch and publish the resulting state.
    /// `background` keeps current data visible as a refresh rather than a
    /// fresh load; `force` bypasses the freshness check. Active-only
    /// filtering is the caller's job, so explicit bulk refetches can reach
    /// deactivated subscriptions too.
    async fn refetch_subscription(self: Arc<Self>, id: u64, background: bool, force: bool) {
        let (descriptor, fetcher, current) = {
            let subscriptions = self.subscriptions.lock();
            let Some(sub) = subscriptions.get(&id) else {
                return;
            };
            let current = sub.sender.borrow().clone();
            (sub.descriptor.clone(), Arc::clone(&sub.fetcher), current)
        };

        if background {
            self.publish(id, current.refreshing());
        }

        let state = match self.run_query(&descriptor, fetcher, force).await {
            Ok(raw) => QueryState::success(descriptor.project(&raw)),
            Err(error) => QueryState::failure(error, current.data.clone()),
        };
        self.publish(id, state);
    }

    fn publish(&self, id: u64, state: QueryState) {
        let subscriptions = self.subscriptions.lock();
        if let Some(sub) = subscriptions.get(&id) {
            let _ = sub.sender.send(state);
        }
    }

    fn spawn_poll_task(
        &self,
        id: u64,
        interval_ms: u64,
        refresh_in_background: bool,
    ) -> tokio::task::JoinHandle<()> {
        let service = self.self_ref.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
            // The first tick fires immediately; the initial load covers it
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(service) = service.upgrade() else {
                    break;
                };
                if !refresh_in_background && service.backgrounded.load(Ordering::Relaxed) {
                    continue;
                }
                service.refetch_subscription(id, true, true).await;
            }
        })
    }

    fn change_key(&self, id: u64, new_key: CacheKey) {
        {
            let mut subscriptions = self.subscriptions.lock();
            let Some(sub) = subscriptions.get_mut(&id) else {
                return;
            };
            sub.descriptor.key = new_key;
            let current = sub.sender.borrow().clone();
            let state = if sub.descriptor.keep_previous_data {
                current.refreshing()
            } else {
                QueryState::loading(&sub.descriptor)
            };
            let _ = sub.sender.send(state);
        }
        if let Some(service) = self.self_ref.upgrade() {
            tokio::spawn(service.refetch_subscription(id, true, false));
        }
    }

    fn cancel_subscription(&self, id: u64) {
        let key = {
            let mut subscriptions = self.subscriptions.lock();
            let Some(sub) = subscriptions.get_mut(&id) else {
                return;
            };
            sub.active = false;
            if let Some(task) = sub.poll_task.take() {
                task.abort();
            }
            let current = sub.sender.borrow().clone();
            if current.is_loading || current.is_refreshing {
                let _ = sub
                    .sender
                    .send(QueryState::failure(NetworkError::Cancelled, current.data));
            }
            sub.descriptor.key.clone()
        };
        // Best-effort: the underlying call may still run to completion,
        // but no new caller will attach to it
        self.in_flight.lock().remove(&key);
        self.stats.track_cancellation();
    }

    fn unsubscribe(&self, id: u64) {
        let mut subscriptions = self.subscriptions.lock();
        if let Some(sub) = subscriptions.remove(&id) {
            if let Some(task) = sub.poll_task {
                task.abort();
            }
        }
    }
}

impl Drop for NetworkService {
    fn drop(&mut self) {
        if !self.config.server_side {
            self.bridge.persist_all(&self.store);
        }
        for sub in self.subscriptions.lock().values_mut() {
            if let Some(task) = sub.poll_task.take() {
                task.abort();
            }
        }
    }
}

/// Handle to a subscribed read
pub struct QueryWatcher {
    id: u64,
    key: CacheKey,
    receiver: watch::Receiver<QueryState>,
    service: Weak<NetworkService>,
}

impl QueryWatcher {
    /// Latest published state
    pub fn current(&self) -> QueryState {
        self.receiver.borrow().clone()
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Wait for the next state change
    pub async fn changed(&mut self) -> QueryState {
        let _ = self.receiver.changed().await;
        self.current()
    }

    /// Wait until no load or refresh is in progress
    pub async fn settled(&mut self) -> QueryState {
        loop {
            let state = self.current();
            if !state.is_loading && !state.is_refreshing {
                return state;
            }
            if self.receiver.changed().await.is_err() {
                return self.current();
            }
        }
    }

    /// Force a refetch, bypassing the freshness window
    pub async fn refresh(&self) {
        if let Some(service) = self.service.upgrade() {
            service.refetch_subscription(self.id, true, true).await;
        }
    }

    /// Re-point the subscription at a new cache key. With
    /// `keep_previous_data` the prior result stays visible while the new
    /// key loads; otherwise the state falls back to seed data.
    pub fn set_key(&mut self, new_key: CacheKey) {
        self.key = new_key.clone();
        if let Some(service) = self.service.upgrade() {
            service.change_key(self.id, new_key);
        }
    }

    /// Stop waiting on the in-flight fetch for this key (best-effort; the
    /// transport call itself may still complete) and deactivate the
    /// subscription
    pub fn cancel(&self) {
        if let Some(service) = self.service.upgrade() {
            service.cancel_subscription(self.id);
        }
    }
}

impl Drop for QueryWatcher {
    fn drop(&mut self) {
        if let Some(service) = self.service.upgrade() {
            service.unsubscribe(self.id);
        }
    }
}
