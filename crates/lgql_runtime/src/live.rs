//! Live observations of cursor fields.
//!
//! A [`LiveScope`] belongs to one live request. Every cursor field resolved
//! under it becomes a [`LiveObservation`] that translates store change
//! events into publication writes, opening and closing nested observations
//! as parent rows come and go.

use crate::classify::Classification;
use crate::cursor::{ChangeEvent, Document, ObservationHandle};
use crate::error::ResolverError;
use crate::executable::ExecutableSchema;
use crate::executor::{Context, PathSegment};
use crate::projector::{cursor_children, project};
use crate::resolver::{ResolverArgs, ResolverInfo};
use crate::schema::ObjectDef;
use crate::selection::FieldSelection;
use crate::sink::PublicationSink;
use indexmap::{IndexMap, IndexSet};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// Identifies one observation within a live request.
///
/// The same cursor field reached through the same response path, for the
/// same parent document and arguments, is observed once.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObservationKey {
    path: String,
    parent: String,
    arguments: String,
}

impl ObservationKey {
    pub fn new(info: &ResolverInfo, parent: &Value, args: &ResolverArgs) -> Self {
        let path = info
            .path
            .iter()
            .filter_map(|segment| match segment {
                PathSegment::Field(name) => Some(name.as_str()),
                PathSegment::Index(_) => None,
            })
            .collect::<Vec<_>>()
            .join(".");
        let parent = parent
            .get("_id")
            .map(|id| match id {
                Value::String(id) => id.clone(),
                other => other.to_string(),
            })
            .unwrap_or_default();
        // serde_json maps are ordered by key, so this is stable.
        let arguments = Value::Object(
            args.all()
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
        )
        .to_string();
        Self {
            path,
            parent,
            arguments,
        }
    }
}

impl fmt::Display for ObservationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]{}", self.path, self.parent, self.arguments)
    }
}

struct ScopeInner {
    sink: Arc<dyn PublicationSink>,
    gate: tokio::sync::Mutex<()>,
    registry: Mutex<IndexMap<ObservationKey, Arc<LiveObservation>>>,
}

/// The live state of one request.
///
/// The gate serializes everything that writes to the sink: the initial
/// execution and each batch of change events hold it while they run.
#[derive(Clone)]
pub struct LiveScope {
    inner: Arc<ScopeInner>,
}

impl LiveScope {
    pub fn new(sink: Arc<dyn PublicationSink>) -> Self {
        let scope = Self {
            inner: Arc::new(ScopeInner {
                sink: Arc::clone(&sink),
                gate: tokio::sync::Mutex::new(()),
                registry: Mutex::new(IndexMap::new()),
            }),
        };
        let weak = Arc::downgrade(&scope.inner);
        sink.on_stop(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                LiveScope { inner }.clear();
            }
        }));
        scope
    }

    pub fn sink(&self) -> &Arc<dyn PublicationSink> {
        &self.inner.sink
    }

    /// Waits for exclusive access to the sink.
    pub async fn gate(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.inner.gate.lock().await
    }

    fn registry(&self) -> MutexGuard<'_, IndexMap<ObservationKey, Arc<LiveObservation>>> {
        self.inner
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn lookup(&self, key: &ObservationKey) -> Option<Arc<LiveObservation>> {
        self.registry().get(key).cloned()
    }

    /// Adds an observation. It is stopped when the scope stops, so a sink
    /// that has already stopped releases it straight away.
    pub fn register(&self, key: ObservationKey, observation: Arc<LiveObservation>) {
        let previous = self.registry().insert(key.clone(), observation);
        if let Some(previous) = previous {
            previous.stop();
        }
        if self.inner.sink.is_stopped() {
            self.release(&key);
        }
    }

    /// Stops and forgets an observation.
    pub fn release(&self, key: &ObservationKey) {
        let observation = self.registry().shift_remove(key);
        if let Some(observation) = observation {
            observation.stop();
        }
    }

    /// Number of observations currently open.
    pub fn observation_count(&self) -> usize {
        self.registry().len()
    }

    fn clear(&self) {
        let observations: Vec<_> = self.registry().drain(..).map(|(_, o)| o).collect();
        for observation in observations {
            observation.stop();
        }
    }
}

impl fmt::Debug for LiveScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveScope")
            .field("observations", &self.observation_count())
            .field("stopped", &self.inner.sink.is_stopped())
            .finish()
    }
}

#[derive(Default)]
struct ObservationState {
    rows: IndexMap<String, Document>,
    children: IndexMap<String, Vec<ObservationKey>>,
    stopped: bool,
}

/// One open cursor observation feeding a publication.
pub struct LiveObservation {
    key: ObservationKey,
    source: String,
    collection: String,
    shape: Classification,
    target_type: String,
    selection: Arc<FieldSelection>,
    selected: IndexSet<String>,
    path: Vec<PathSegment>,
    schema: Arc<ExecutableSchema>,
    ctx: Context,
    handle: ObservationHandle,
    state: Mutex<ObservationState>,
}

/// Parameters for [`LiveObservation::new`].
pub struct ObservationTarget {
    pub key: ObservationKey,
    pub collection: String,
    pub shape: Classification,
    pub target_type: String,
    pub selected: IndexSet<String>,
    pub info: ResolverInfo,
    pub schema: Arc<ExecutableSchema>,
}

impl LiveObservation {
    pub fn new(target: ObservationTarget, ctx: Context, handle: ObservationHandle) -> Self {
        Self {
            source: target.key.to_string(),
            key: target.key,
            collection: target.collection,
            shape: target.shape,
            target_type: target.target_type,
            selection: target.info.selection,
            selected: target.selected,
            path: target.info.path,
            schema: target.schema,
            ctx,
            handle,
            state: Mutex::new(ObservationState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, ObservationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn key(&self) -> &ObservationKey {
        &self.key
    }

    pub fn is_stopped(&self) -> bool {
        self.state().stopped
    }

    fn scope(&self) -> Result<&LiveScope, ResolverError> {
        self.ctx
            .live()
            .ok_or_else(|| ResolverError::Internal("observation outside a live scope".into()))
    }

    fn object(&self) -> Result<&ObjectDef, ResolverError> {
        self.schema.schema().object(&self.target_type).ok_or_else(|| {
            ResolverError::Internal(format!("`{}` is not an object type", self.target_type))
        })
    }

    /// The current result: the first row for a single object, every row
    /// for a list. Rows carry all their fields so nested resolvers can
    /// read foreign keys.
    pub fn snapshot(&self) -> Value {
        let state = self.state();
        let row = |(id, fields): (&String, &Document)| {
            let mut document = fields.clone();
            document.insert("_id".into(), Value::String(id.clone()));
            Value::Object(document)
        };
        match self.shape {
            Classification::SingleObject => state.rows.iter().next().map_or(Value::Null, row),
            _ => Value::Array(state.rows.iter().map(row).collect()),
        }
    }

    /// Applies one change event.
    pub async fn apply(&self, event: ChangeEvent) -> Result<(), ResolverError> {
        let scope = self.scope()?;
        let sink = scope.sink();
        match event {
            ChangeEvent::Added { id, fields } => {
                {
                    let mut state = self.state();
                    if state.stopped {
                        return Ok(());
                    }
                    state.rows.insert(id.clone(), fields.clone());
                }
                let projected = project(&fields, &self.selected);
                sink.added(&self.source, &self.collection, &id, projected);
                let keys = self.open_children(&id, &fields, None).await?;
                self.state().children.insert(id, keys);
            }
            ChangeEvent::Changed { id, fields } => {
                let row = {
                    let mut state = self.state();
                    if state.stopped {
                        return Ok(());
                    }
                    let Some(row) = state.rows.get_mut(&id) else {
                        return Ok(());
                    };
                    for (name, value) in &fields {
                        if value.is_null() {
                            row.remove(name);
                        } else {
                            row.insert(name.clone(), value.clone());
                        }
                    }
                    row.clone()
                };
                let projected = project(&fields, &self.selected);
                if projected.is_empty() {
                    return Ok(());
                }
                let changed: IndexSet<String> = projected.keys().cloned().collect();
                sink.changed(&self.source, &self.collection, &id, projected);
                self.reopen_children(&id, &row, &changed).await?;
            }
            ChangeEvent::Removed { id } => {
                let children = {
                    let mut state = self.state();
                    if state.stopped || state.rows.shift_remove(&id).is_none() {
                        return Ok(());
                    }
                    state.children.shift_remove(&id).unwrap_or_default()
                };
                sink.removed(&self.source, &self.collection, &id);
                for key in &children {
                    scope.release(key);
                }
            }
            ChangeEvent::Ready => {}
        }
        Ok(())
    }

    /// Re-resolves the nested cursor fields whose source fields changed.
    async fn reopen_children(
        &self,
        id: &str,
        row: &Document,
        changed: &IndexSet<String>,
    ) -> Result<(), ResolverError> {
        let scope = self.scope()?;
        let object = self.object()?;
        let affected: IndexSet<String> = cursor_children(&self.selection, object, Some(changed))
            .into_iter()
            .map(|(selection, _)| selection.response_key().to_string())
            .collect();
        if affected.is_empty() {
            return Ok(());
        }

        let stale: Vec<ObservationKey> = {
            let mut state = self.state();
            let keys = state.children.entry(id.to_string()).or_default();
            let (stale, kept) = keys.drain(..).partition(|key: &ObservationKey| {
                affected
                    .iter()
                    .any(|response_key| key.path.rsplit('.').next() == Some(response_key))
            });
            *keys = kept;
            stale
        };
        for key in &stale {
            scope.release(key);
        }

        let keys = self.open_children(id, row, Some(changed)).await?;
        self.state()
            .children
            .entry(id.to_string())
            .or_default()
            .extend(keys);
        Ok(())
    }

    /// Resolves the selected nested cursor fields of one row, which opens
    /// their observations under this scope.
    async fn open_children(
        &self,
        id: &str,
        fields: &Document,
        only: Option<&IndexSet<String>>,
    ) -> Result<Vec<ObservationKey>, ResolverError> {
        let object = self.object()?;
        let children = cursor_children(&self.selection, object, only);
        if children.is_empty() {
            return Ok(Vec::new());
        }

        let mut parent = fields.clone();
        parent.insert("_id".into(), Value::String(id.to_string()));
        let parent = Value::Object(parent);

        let mut keys = Vec::with_capacity(children.len());
        for (selection, field) in children {
            let Some(resolver) = self.schema.resolvers().get(&object.name, &field.name) else {
                continue;
            };
            let args = ResolverArgs::for_field(field, &selection);
            let mut path = self.path.clone();
            path.push(PathSegment::Field(selection.response_key().to_string()));
            let info = ResolverInfo::new(&field.name, &object.name)
                .with_return_type(field.ty.clone())
                .with_path(path)
                .with_selection(selection)
                .with_schema(Arc::clone(&self.schema));
            keys.push(ObservationKey::new(&info, &parent, &args));
            resolver.resolve(&parent, &args, &self.ctx, &info).await?;
        }
        Ok(keys)
    }

    /// Stops observing. Every row this observation published is removed
    /// from the sink and nested observations are released. Idempotent.
    pub fn stop(&self) {
        let (rows, children) = {
            let mut state = self.state();
            if state.stopped {
                return;
            }
            state.stopped = true;
            (
                std::mem::take(&mut state.rows),
                std::mem::take(&mut state.children),
            )
        };
        self.handle.stop();

        if let Some(scope) = self.ctx.live() {
            for id in rows.keys() {
                scope.sink().removed(&self.source, &self.collection, id);
            }
            for key in children.values().flatten() {
                scope.release(key);
            }
        }
        tracing::debug!(key = %self.key, rows = rows.len(), "observation stopped");
    }
}

impl fmt::Debug for LiveObservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveObservation")
            .field("key", &self.key)
            .field("collection", &self.collection)
            .field("shape", &self.shape)
            .field("rows", &self.state().rows.len())
            .finish_non_exhaustive()
    }
}

/// Applies events until the store reports the initial result set is
/// complete.
pub(crate) async fn replay(
    observation: &LiveObservation,
    events: &mut mpsc::UnboundedReceiver<ChangeEvent>,
) -> Result<(), ResolverError> {
    while let Some(event) = events.recv().await {
        if event == ChangeEvent::Ready {
            break;
        }
        observation.apply(event).await?;
    }
    Ok(())
}

/// Forwards later events to the sink, one gated batch at a time.
pub(crate) async fn pump(
    observation: Arc<LiveObservation>,
    mut events: mpsc::UnboundedReceiver<ChangeEvent>,
    scope: LiveScope,
) {
    while let Some(event) = events.recv().await {
        let _gate = scope.gate().await;
        if observation.is_stopped() || scope.sink().is_stopped() {
            break;
        }
        let mut result = observation.apply(event).await;
        while result.is_ok() {
            match events.try_recv() {
                Ok(event) => result = observation.apply(event).await,
                Err(_) => break,
            }
        }
        if let Err(error) = result {
            scope.sink().fail(error.to_string());
            break;
        }
        scope.sink().flush();
    }
    tracing::trace!(key = %observation.key, "observation pump finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{Executor, Request};
    use crate::memory::MemoryStore;
    use crate::resolver::ResolverMap;
    use crate::sink::{DataMessage, Publication};
    use serde_json::json;
    use std::time::Duration;

    const ENTRIES: &str = r#"
        type User { _id: ID! name: String }
        type Entry { _id: ID! content: String author: User @cursor }
        type Query { allEntries: [Entry] @cursor }
    "#;

    fn executor(store: &MemoryStore) -> Executor {
        let mut resolvers = ResolverMap::new();
        let entries = store.collection("entries");
        resolvers.register_fn("Query", "allEntries", move |_, _, _, _| {
            Ok(entries.find(json!({})))
        });
        let users = store.collection("users");
        resolvers.register_fn("Entry", "author", move |parent, _, _, _| {
            Ok(users.find(json!({"_id": parent["author"].clone()})))
        });
        let schema = ExecutableSchema::builder()
            .type_defs(ENTRIES)
            .resolvers(resolvers)
            .build()
            .unwrap();
        Executor::new(Arc::new(schema))
    }

    async fn frame(frames: &mut mpsc::UnboundedReceiver<Vec<DataMessage>>) -> Vec<DataMessage> {
        tokio::time::timeout(Duration::from_secs(1), frames.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_row_churn_keeps_stop_callbacks_flat() {
        let store = MemoryStore::new();
        store
            .collection("users")
            .insert(json!({"_id": "u1", "name": "Ada"}))
            .unwrap();
        let executor = executor(&store);
        let (publication, mut frames) = Publication::new();
        let scope = LiveScope::new(Arc::new(publication.clone()));
        let ctx = Context::new().with_live(scope.clone());
        {
            let _gate = scope.gate().await;
            let query = Request::new("{ allEntries { content author { name } } }");
            let response = executor.execute(&query, &ctx).await;
            assert!(!response.has_errors());
            publication.ready();
        }
        frame(&mut frames).await;
        let callbacks = publication.stop_callback_count();
        let observations = scope.observation_count();

        let entries = store.collection("entries");
        for n in 0..50 {
            let id = format!("e{n}");
            entries
                .insert(json!({"_id": id, "content": "churn", "author": "u1"}))
                .unwrap();
            frame(&mut frames).await;
            entries.remove(&id);
            frame(&mut frames).await;
        }

        assert_eq!(publication.stop_callback_count(), callbacks);
        assert_eq!(scope.observation_count(), observations);
        assert_eq!(store.collection("users").observer_count(), 0);

        publication.stop();
        assert_eq!(scope.observation_count(), 0);
        assert_eq!(store.collection("entries").observer_count(), 0);
    }
}
