//! The client side: live subscriptions backed by a local mirror.
//!
//! A subscription opens a channel, applies its frames to the mirror and
//! re-runs its query against the mirror with the client's own schema.
//! Handles are deduplicated per `(query, variables)`.

use crate::error::{SdkError, SdkResult};
use crate::mirror::{Held, Mirror};
use crate::reactive::ResultCell;
use crate::transport::{Channel, ChannelControl, Transport};
use indexmap::IndexMap;
use lgql_runtime::{Context, ExecutableSchema, Executor, MemoryStore, Request, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server endpoint name.
    pub endpoint: String,
    /// How many distinct subscriptions are remembered for deduplication.
    pub max_subscriptions: usize,
    /// How long [`Subscription::wait_ready`] waits.
    pub ready_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "/graphql".to_string(),
            max_subscriptions: 64,
            ready_timeout: Duration::from_secs(10),
        }
    }
}

impl ClientConfig {
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn max_subscriptions(mut self, max_subscriptions: usize) -> Self {
        self.max_subscriptions = max_subscriptions.max(1);
        self
    }

    pub fn ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }
}

/// Lifecycle of a [`Subscription`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionState {
    Created,
    AwaitingReady,
    Ready,
    Stopped,
}

/// Deep-equality key: the query text plus the canonical JSON of the
/// variables.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SubscriptionKey {
    query: String,
    variables: String,
}

impl SubscriptionKey {
    fn new(query: &str, variables: &Value) -> Self {
        let variables = match variables {
            Value::Null => Value::Object(serde_json::Map::new()),
            other => other.clone(),
        };
        Self {
            query: query.to_string(),
            variables: variables.to_string(),
        }
    }
}

/// Live handles by key, least recently used first.
#[derive(Default)]
struct Registry {
    entries: IndexMap<SubscriptionKey, Weak<SubscriptionInner>>,
}

impl Registry {
    fn lookup(&mut self, key: &SubscriptionKey) -> Option<Subscription> {
        let weak = self.entries.shift_remove(key)?;
        let inner = weak.upgrade()?;
        if inner.shared.state.get() == SubscriptionState::Stopped {
            return None;
        }
        self.entries.insert(key.clone(), weak);
        Some(Subscription { inner })
    }

    fn insert(&mut self, key: SubscriptionKey, subscription: &Subscription, capacity: usize) {
        self.entries
            .insert(key, Arc::downgrade(&subscription.inner));
        while self.entries.len() > capacity {
            self.entries.shift_remove_index(0);
        }
    }

    fn remove(&mut self, key: &SubscriptionKey, inner: &SubscriptionInner) {
        let current = self
            .entries
            .get(key)
            .is_some_and(|weak| std::ptr::eq(weak.as_ptr(), inner));
        if current {
            self.entries.shift_remove(key);
        }
    }
}

struct ClientInner {
    transport: Arc<dyn Transport>,
    executor: Executor,
    mirror: Mirror,
    config: ClientConfig,
    registry: Arc<Mutex<Registry>>,
}

/// A live client.
#[derive(Clone)]
pub struct LiveClient {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for LiveClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveClient")
            .field("config", &self.inner.config)
            .field("subscriptions", &self.subscription_count())
            .finish_non_exhaustive()
    }
}

impl LiveClient {
    /// Creates a client. `schema` resolves against `store`, which becomes
    /// the mirror of everything the server publishes.
    pub fn new(
        transport: Arc<dyn Transport>,
        schema: ExecutableSchema,
        store: MemoryStore,
    ) -> Self {
        Self::with_config(transport, schema, store, ClientConfig::default())
    }

    pub fn with_config(
        transport: Arc<dyn Transport>,
        schema: ExecutableSchema,
        store: MemoryStore,
        config: ClientConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                transport,
                executor: Executor::new(Arc::new(schema)),
                mirror: Mirror::new(store),
                config,
                registry: Arc::default(),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// The local mirror.
    pub fn store(&self) -> &MemoryStore {
        self.inner.mirror.store()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.inner
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of live handles remembered for deduplication.
    pub fn subscription_count(&self) -> usize {
        self.registry()
            .entries
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Sends a query once. Never opens a channel.
    pub async fn query(&self, query: &str, variables: Value) -> SdkResult<Response> {
        let request = Request::new(query).with_variables(variables);
        self.inner
            .transport
            .call(&self.inner.config.endpoint, request)
            .await
    }

    /// Sends a mutation once.
    pub async fn mutate(&self, mutation: &str, variables: Value) -> SdkResult<Response> {
        self.query(mutation, variables).await
    }

    /// Subscribes to a live query.
    ///
    /// A live handle for a deeply equal `(query, variables)` is returned
    /// as is. Otherwise a channel is opened and a task keeps the handle's
    /// result in sync with the mirror.
    pub async fn subscribe(&self, query: &str, variables: Value) -> SdkResult<Subscription> {
        let key = SubscriptionKey::new(query, &variables);
        if let Some(existing) = self.registry().lookup(&key) {
            tracing::trace!(query, "reusing subscription");
            return Ok(existing);
        }

        let request = Request::new(query).with_variables(variables);
        let shared = Arc::new(Shared::default());
        let channel = self
            .inner
            .transport
            .subscribe(&self.inner.config.endpoint, request.clone())
            .await?;
        let held = Arc::new(Mutex::new(Held::default()));
        let control = channel.control();
        shared.state.set(SubscriptionState::AwaitingReady);
        tracing::debug!(query, "subscription awaiting ready");

        let task = tokio::spawn(run(
            Arc::clone(&shared),
            channel,
            request,
            self.inner.executor.clone(),
            self.inner.mirror.clone(),
            Arc::clone(&held),
        ));

        let subscription = Subscription {
            inner: Arc::new(SubscriptionInner {
                key: key.clone(),
                shared,
                task: Mutex::new(Some(task)),
                control,
                held,
                mirror: self.inner.mirror.clone(),
                registry: Arc::downgrade(&self.inner.registry),
                ready_timeout: self.inner.config.ready_timeout,
            }),
        };
        self.registry()
            .insert(key, &subscription, self.inner.config.max_subscriptions);
        Ok(subscription)
    }
}

/// The cells a subscription's task writes.
struct Shared {
    state: ResultCell<SubscriptionState>,
    ready: ResultCell<bool>,
    result: ResultCell<Option<Response>>,
    failure: Mutex<Option<String>>,
}

impl Default for Shared {
    fn default() -> Self {
        Self {
            state: ResultCell::new(SubscriptionState::Created),
            ready: ResultCell::new(false),
            result: ResultCell::new(None),
            failure: Mutex::new(None),
        }
    }
}

impl Shared {
    fn fail(&self, error: String) {
        tracing::warn!(%error, "subscription failed");
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(error);
        self.state.set(SubscriptionState::Stopped);
    }

    fn failure(&self) -> Option<String> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Applies frames and recomputes the result until the channel ends.
async fn run(
    shared: Arc<Shared>,
    mut channel: Channel,
    request: Request,
    executor: Executor,
    mirror: Mirror,
    held: Arc<Mutex<Held>>,
) {
    let mut versions = mirror.store().subscribe();
    let mut ready = false;
    loop {
        tokio::select! {
            frame = channel.next() => {
                let Some(frame) = frame else {
                    shared.fail("channel closed by the server".to_string());
                    break;
                };
                let applied = held
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .apply(&mirror, &frame);
                let outcome = match applied {
                    Ok(Some(outcome)) => outcome,
                    Ok(None) => break,
                    Err(error) => {
                        shared.fail(error.message);
                        break;
                    }
                };
                if let Some(error) = outcome.failure {
                    shared.fail(error);
                    break;
                }
                ready |= outcome.ready;
            }
            changed = versions.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
        if !ready {
            continue;
        }
        versions.borrow_and_update();
        let response = executor.execute(&request, &Context::new()).await;
        shared.result.set(Some(response));
        if shared.ready.set(true) {
            shared.state.set(SubscriptionState::Ready);
            tracing::debug!(query = %request.query, "subscription ready");
        }
    }
}

struct SubscriptionInner {
    key: SubscriptionKey,
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
    control: Arc<dyn ChannelControl>,
    held: Arc<Mutex<Held>>,
    mirror: Mirror,
    registry: Weak<Mutex<Registry>>,
    ready_timeout: Duration,
}

impl SubscriptionInner {
    /// Stops the task and releases the mirror. Returns false if already
    /// stopped.
    fn halt(&self) -> bool {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(task) = task else {
            return false;
        };
        task.abort();
        self.shared.state.set(SubscriptionState::Stopped);

        let released = self
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .release(&self.mirror);
        if let Err(error) = released {
            tracing::warn!(%error, "failed to release mirrored documents");
        }
        if let Some(registry) = self.registry.upgrade() {
            registry
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&self.key, self);
        }
        true
    }
}

impl Drop for SubscriptionInner {
    fn drop(&mut self) {
        if self.halt() {
            let control = Arc::clone(&self.control);
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move { control.stop().await });
            }
        }
    }
}

/// A live query handle. Clones share the same subscription.
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<SubscriptionInner>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("query", &self.inner.key.query)
            .field("variables", &self.inner.key.variables)
            .field("state", &self.state())
            .finish()
    }
}

impl Subscription {
    /// Whether the first result has been computed.
    pub fn ready(&self) -> bool {
        self.inner.shared.ready.get()
    }

    /// The latest result. `None` until ready; frozen after stop.
    pub fn result(&self) -> Option<Response> {
        self.inner.shared.result.get()
    }

    /// A receiver that wakes whenever the result changes.
    pub fn watch(&self) -> watch::Receiver<Option<Response>> {
        self.inner.shared.result.subscribe()
    }

    pub fn state(&self) -> SubscriptionState {
        self.inner.shared.state.get()
    }

    /// The error that ended the subscription, if any.
    pub fn error(&self) -> Option<SdkError> {
        self.inner.shared.failure().map(SdkError::stream_failed)
    }

    /// Waits until the first result is available.
    pub async fn wait_ready(&self) -> SdkResult<()> {
        let mut states = self.inner.shared.state.subscribe();
        let wait = async {
            loop {
                let state = *states.borrow_and_update();
                match state {
                    SubscriptionState::Ready => return Ok(()),
                    SubscriptionState::Stopped => {
                        return Err(self.error().unwrap_or_else(SdkError::stopped))
                    }
                    SubscriptionState::Created | SubscriptionState::AwaitingReady => {}
                }
                if states.changed().await.is_err() {
                    return Err(SdkError::stopped());
                }
            }
        };
        tokio::time::timeout(self.inner.ready_timeout, wait)
            .await
            .map_err(|_| SdkError::timeout("the first result"))?
    }

    /// Stops the subscription and its channel. Idempotent.
    pub async fn stop(&self) {
        if self.inner.halt() {
            self.inner.control.stop().await;
            tracing::debug!(query = %self.inner.key.query, "subscription stopped");
        }
    }

    /// Returns true if both handles are the same subscription.
    pub fn ptr_eq(&self, other: &Subscription) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_keys_compare_variables_deeply() {
        let a = SubscriptionKey::new("{ a }", &json!({"x": 1, "y": [1, 2]}));
        let b = SubscriptionKey::new("{ a }", &json!({"y": [1, 2], "x": 1}));
        let c = SubscriptionKey::new("{ a }", &json!({"x": 2, "y": [1, 2]}));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(
            SubscriptionKey::new("{ a }", &Value::Null),
            SubscriptionKey::new("{ a }", &json!({}))
        );
    }

    #[test]
    fn test_config_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.max_subscriptions, 64);
        assert_eq!(config.endpoint, "/graphql");
        assert_eq!(ClientConfig::default().max_subscriptions(0).max_subscriptions, 1);
    }

    #[test]
    fn test_state_serialization() {
        assert_eq!(
            serde_json::to_value(SubscriptionState::AwaitingReady).unwrap(),
            json!("AWAITING_READY")
        );
    }
}
