//! In-memory document store with live observation.
//!
//! Collections hold JSON documents keyed by a string `_id`, in insertion
//! order. Every write computes the per-observer deltas while holding the
//! store lock, so each observation sees changes in the store's total order.

use crate::cursor::{ChangeEvent, Document, LiveCursor, Observation, ObservationHandle};
use crate::error::StoreError;
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use tokio::sync::{mpsc, watch};

/// Alphabet for generated ids (no easily confused characters).
const ID_ALPHABET: &[u8] = b"23456789ABCDEFGHJKLMNPQRSTWXYZabcdefghijkmnopqrstuvwxyz";
const ID_LENGTH: usize = 17;

/// A document selector.
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    clauses: Vec<(String, Condition)>,
}

#[derive(Debug, Clone, PartialEq)]
enum Condition {
    Eq(Value),
    Ne(Value),
    In(Vec<Value>),
}

impl Selector {
    /// Matches every document.
    pub fn all() -> Self {
        Self {
            clauses: Vec::new(),
        }
    }

    /// Matches the document with this id.
    pub fn id(id: impl Into<String>) -> Self {
        Self {
            clauses: vec![("_id".to_string(), Condition::Eq(Value::String(id.into())))],
        }
    }

    /// Parses a selector.
    ///
    /// Accepted forms: `null` and `{}` (everything), a string (an `_id`),
    /// and an object of field conditions. A condition is either a literal
    /// value (equality) or an object of `$eq`, `$ne` and `$in` operators.
    pub fn parse(selector: &Value) -> Result<Self, StoreError> {
        let fields = match selector {
            Value::Null => return Ok(Self::all()),
            Value::String(id) => return Ok(Self::id(id.clone())),
            Value::Object(fields) => fields,
            other => {
                return Err(StoreError::MalformedSelector(format!(
                    "expected an object or an id, found `{other}`"
                )))
            }
        };

        let mut clauses = Vec::with_capacity(fields.len());
        for (field, condition) in fields {
            if field.starts_with('$') {
                return Err(StoreError::MalformedSelector(format!(
                    "unsupported operator `{field}`"
                )));
            }
            match condition {
                Value::Object(ops) if ops.keys().any(|k| k.starts_with('$')) => {
                    for (op, operand) in ops {
                        let condition = match (op.as_str(), operand) {
                            ("$eq", value) => Condition::Eq(value.clone()),
                            ("$ne", value) => Condition::Ne(value.clone()),
                            ("$in", Value::Array(values)) => Condition::In(values.clone()),
                            ("$in", _) => {
                                return Err(StoreError::MalformedSelector(format!(
                                    "`$in` on `{field}` needs an array"
                                )))
                            }
                            (op, _) => {
                                return Err(StoreError::MalformedSelector(format!(
                                    "unsupported operator `{op}` on `{field}`"
                                )))
                            }
                        };
                        clauses.push((field.clone(), condition));
                    }
                }
                value => clauses.push((field.clone(), Condition::Eq(value.clone()))),
            }
        }
        Ok(Self { clauses })
    }

    /// Tests a document. A missing field compares equal to `null`.
    pub fn matches(&self, document: &Document) -> bool {
        self.clauses.iter().all(|(field, condition)| {
            let value = document.get(field).unwrap_or(&Value::Null);
            match condition {
                Condition::Eq(expected) => value == expected,
                Condition::Ne(unexpected) => value != unexpected,
                Condition::In(values) => values.contains(value),
            }
        })
    }
}

/// One write in a [`MemoryStore::apply`] batch.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Inserts the document, or replaces it if the id exists.
    Upsert {
        collection: String,
        id: String,
        fields: Document,
    },
    /// Merges fields into an existing document. `null` clears a field.
    Merge {
        collection: String,
        id: String,
        fields: Document,
    },
    /// Removes a document if present.
    Remove { collection: String, id: String },
}

struct Observer {
    selector: Selector,
    events: mpsc::UnboundedSender<ChangeEvent>,
}

#[derive(Default)]
struct CollectionState {
    documents: IndexMap<String, Document>,
    observers: FxHashMap<u64, Observer>,
}

impl CollectionState {
    fn notify(&mut self, mut event: impl FnMut(&Selector) -> Option<ChangeEvent>) {
        self.observers.retain(|_, observer| match event(&observer.selector) {
            Some(change) => observer.events.send(change).is_ok(),
            None => !observer.events.is_closed(),
        });
    }

    fn insert(&mut self, id: String, document: Document) {
        self.notify(|selector| {
            selector.matches(&document).then(|| ChangeEvent::Added {
                id: id.clone(),
                fields: without_id(&document),
            })
        });
        self.documents.insert(id, document);
    }

    /// Replaces a stored document. Returns false if nothing changed.
    fn replace(&mut self, id: &str, next: Document) -> bool {
        let Some(previous) = self.documents.get(id) else {
            self.insert(id.to_string(), next);
            return true;
        };
        if *previous == next {
            return false;
        }
        let previous = previous.clone();
        let diff = diff(&previous, &next);
        self.notify(|selector| {
            match (selector.matches(&previous), selector.matches(&next)) {
                (true, true) => Some(ChangeEvent::Changed {
                    id: id.to_string(),
                    fields: diff.clone(),
                }),
                (true, false) => Some(ChangeEvent::Removed { id: id.to_string() }),
                (false, true) => Some(ChangeEvent::Added {
                    id: id.to_string(),
                    fields: without_id(&next),
                }),
                (false, false) => None,
            }
        });
        self.documents.insert(id.to_string(), next);
        true
    }

    fn merge(&mut self, collection: &str, id: &str, fields: Document) -> Result<bool, StoreError> {
        let Some(current) = self.documents.get(id) else {
            return Err(StoreError::DocumentNotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        };
        let mut next = current.clone();
        for (key, value) in fields {
            if key == "_id" {
                continue;
            }
            if value.is_null() {
                next.remove(&key);
            } else {
                next.insert(key, value);
            }
        }
        Ok(self.replace(id, next))
    }

    fn remove(&mut self, id: &str) -> bool {
        let Some(document) = self.documents.shift_remove(id) else {
            return false;
        };
        self.notify(|selector| {
            selector
                .matches(&document)
                .then(|| ChangeEvent::Removed { id: id.to_string() })
        });
        true
    }

    fn select(&self, selector: &Selector) -> Vec<Document> {
        self.documents
            .values()
            .filter(|doc| selector.matches(doc))
            .cloned()
            .collect()
    }
}

/// Fields that differ between two versions of a document. Fields missing
/// from `next` are reported as `null`.
fn diff(previous: &Document, next: &Document) -> Document {
    let mut changed = Document::new();
    for (key, value) in next {
        if key != "_id" && previous.get(key) != Some(value) {
            changed.insert(key.clone(), value.clone());
        }
    }
    for key in previous.keys() {
        if !next.contains_key(key) {
            changed.insert(key.clone(), Value::Null);
        }
    }
    changed
}

fn without_id(document: &Document) -> Document {
    document
        .iter()
        .filter(|(key, _)| key.as_str() != "_id")
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

#[derive(Default)]
struct StoreState {
    collections: IndexMap<String, CollectionState>,
    next_observer: u64,
    id_seed: u64,
}

impl StoreState {
    fn collection(&mut self, name: &str) -> &mut CollectionState {
        self.collections.entry(name.to_string()).or_default()
    }

    fn next_id(&mut self) -> String {
        // splitmix64
        self.id_seed = self.id_seed.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.id_seed;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^= z >> 31;

        let base = ID_ALPHABET.len() as u64;
        let mut id = String::with_capacity(ID_LENGTH);
        let mut bits = z;
        for i in 0..ID_LENGTH {
            if i == 10 {
                bits = z.rotate_left(29) ^ self.id_seed;
            }
            id.push(char::from(ID_ALPHABET[(bits % base) as usize]));
            bits /= base;
        }
        id
    }
}

struct StoreInner {
    state: RwLock<StoreState>,
    version: watch::Sender<u64>,
}

/// An in-memory document store. Clones share the same data.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            inner: Arc::new(StoreInner {
                state: RwLock::new(StoreState::default()),
                version,
            }),
        }
    }

    /// Returns a handle to a named collection. Collections spring into
    /// existence on first write.
    pub fn collection(&self, name: impl Into<String>) -> Collection {
        Collection {
            store: self.clone(),
            name: name.into(),
        }
    }

    /// Names of the collections that have been written to or observed.
    pub fn collection_names(&self) -> Vec<String> {
        self.read().collections.keys().cloned().collect()
    }

    /// Current store version. Bumped once per effective write or batch.
    pub fn version(&self) -> u64 {
        *self.inner.version.borrow()
    }

    /// Subscribes to version changes.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.version.subscribe()
    }

    /// Applies a batch of writes with a single version bump.
    ///
    /// Writes are applied in order. The first failing write aborts the rest
    /// of the batch; earlier writes stay applied.
    pub fn apply(&self, ops: impl IntoIterator<Item = WriteOp>) -> Result<usize, StoreError> {
        let mut applied = 0;
        let result = {
            let mut state = self.write();
            ops.into_iter().try_for_each(|op| {
                let changed = match op {
                    WriteOp::Upsert {
                        collection,
                        id,
                        mut fields,
                    } => {
                        fields.insert("_id".to_string(), Value::String(id.clone()));
                        state.collection(&collection).replace(&id, fields)
                    }
                    WriteOp::Merge {
                        collection,
                        id,
                        fields,
                    } => state.collection(&collection).merge(&collection, &id, fields)?,
                    WriteOp::Remove { collection, id } => {
                        state.collection(&collection).remove(&id)
                    }
                };
                applied += usize::from(changed);
                Ok(())
            })
        };
        if applied > 0 {
            self.bump();
        }
        result.map(|()| applied)
    }

    fn bump(&self) {
        self.inner.version.send_modify(|version| *version += 1);
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.inner
            .state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.inner
            .state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("collections", &self.collection_names())
            .field("version", &self.version())
            .finish()
    }
}

/// A named collection in a [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct Collection {
    store: MemoryStore,
    name: String,
}

impl Collection {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Inserts a document and returns its id. A string `_id` in the document
    /// is used as is; otherwise one is generated.
    pub fn insert(&self, document: Value) -> Result<String, StoreError> {
        let Value::Object(mut document) = document else {
            return Err(StoreError::InvalidDocument(
                "documents must be JSON objects".to_string(),
            ));
        };
        let mut state = self.store.write();
        let id = match document.get("_id").cloned() {
            Some(Value::String(id)) => id,
            Some(other) => {
                return Err(StoreError::InvalidDocument(format!(
                    "`_id` must be a string, found `{other}`"
                )))
            }
            None => {
                let id = state.next_id();
                document.insert("_id".to_string(), Value::String(id.clone()));
                id
            }
        };
        let collection = state.collection(&self.name);
        if collection.documents.contains_key(&id) {
            return Err(StoreError::DuplicateId {
                collection: self.name.clone(),
                id,
            });
        }
        collection.insert(id.clone(), document);
        drop(state);
        self.store.bump();
        Ok(id)
    }

    /// Merges `fields` into the document with this id. A `null` value clears
    /// the field. Returns false if the document was already up to date.
    pub fn update(&self, id: &str, fields: Value) -> Result<bool, StoreError> {
        let fields = into_fields(fields)?;
        let changed = self
            .store
            .write()
            .collection(&self.name)
            .merge(&self.name, id, fields)?;
        if changed {
            self.store.bump();
        }
        Ok(changed)
    }

    /// Merges `fields` into every matching document. Returns how many
    /// documents changed.
    pub fn update_where(&self, selector: &Value, fields: Value) -> Result<usize, StoreError> {
        let selector = Selector::parse(selector)?;
        let fields = into_fields(fields)?;
        let mut state = self.store.write();
        let collection = state.collection(&self.name);
        let ids: Vec<String> = collection
            .documents
            .iter()
            .filter(|(_, doc)| selector.matches(doc))
            .map(|(id, _)| id.clone())
            .collect();
        let mut changed = 0;
        for id in ids {
            changed += usize::from(collection.merge(&self.name, &id, fields.clone())?);
        }
        drop(state);
        if changed > 0 {
            self.store.bump();
        }
        Ok(changed)
    }

    /// Removes the document with this id. Returns false if it did not exist.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.store.write().collection(&self.name).remove(id);
        if removed {
            self.store.bump();
        }
        removed
    }

    /// Removes every matching document and returns how many were removed.
    pub fn remove_where(&self, selector: &Value) -> Result<usize, StoreError> {
        let selector = Selector::parse(selector)?;
        let mut state = self.store.write();
        let collection = state.collection(&self.name);
        let ids: Vec<String> = collection
            .documents
            .iter()
            .filter(|(_, doc)| selector.matches(doc))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &ids {
            collection.remove(id);
        }
        drop(state);
        if !ids.is_empty() {
            self.store.bump();
        }
        Ok(ids.len())
    }

    /// Returns a cursor over matching documents. The selector is checked
    /// when the cursor is fetched or observed.
    pub fn find(&self, selector: impl Into<Value>) -> MemoryCursor {
        MemoryCursor {
            store: self.store.clone(),
            collection: self.name.clone(),
            selector: selector.into(),
        }
    }

    /// Returns the first matching document.
    pub fn find_one(&self, selector: impl Into<Value>) -> Result<Option<Document>, StoreError> {
        Ok(self.find(selector).fetch()?.into_iter().next())
    }

    /// Number of documents in the collection.
    pub fn len(&self) -> usize {
        self.store
            .read()
            .collections
            .get(&self.name)
            .map_or(0, |c| c.documents.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of active observations on the collection.
    pub fn observer_count(&self) -> usize {
        self.store
            .read()
            .collections
            .get(&self.name)
            .map_or(0, |c| c.observers.len())
    }
}

fn into_fields(fields: Value) -> Result<Document, StoreError> {
    match fields {
        Value::Object(fields) => Ok(fields),
        other => Err(StoreError::InvalidDocument(format!(
            "expected an object of fields, found `{other}`"
        ))),
    }
}

/// A query against a [`MemoryStore`] collection.
#[derive(Debug, Clone)]
pub struct MemoryCursor {
    store: MemoryStore,
    collection: String,
    selector: Value,
}

impl MemoryCursor {
    pub fn selector(&self) -> &Value {
        &self.selector
    }
}

impl LiveCursor for MemoryCursor {
    fn collection(&self) -> &str {
        &self.collection
    }

    fn fetch(&self) -> Result<Vec<Document>, StoreError> {
        let selector = Selector::parse(&self.selector)?;
        let state = self.store.read();
        Ok(state
            .collections
            .get(&self.collection)
            .map(|c| c.select(&selector))
            .unwrap_or_default())
    }

    fn observe(&self) -> Result<Observation, StoreError> {
        let selector = Selector::parse(&self.selector)?;
        let (events, receiver) = mpsc::unbounded_channel();

        let mut state = self.store.write();
        let observer_id = state.next_observer;
        state.next_observer += 1;

        let collection = state.collection(&self.collection);
        for document in collection.select(&selector) {
            let id = document
                .get("_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let _ = events.send(ChangeEvent::Added {
                id,
                fields: without_id(&document),
            });
        }
        let _ = events.send(ChangeEvent::Ready);
        collection
            .observers
            .insert(observer_id, Observer { selector, events });
        drop(state);

        tracing::debug!(collection = %self.collection, observer_id, "observation opened");

        let store: Weak<StoreInner> = Arc::downgrade(&self.store.inner);
        let name = self.collection.clone();
        let handle = ObservationHandle::new(move || {
            if let Some(inner) = store.upgrade() {
                let mut state = inner
                    .state
                    .write()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                if let Some(collection) = state.collections.get_mut(&name) {
                    collection.observers.remove(&observer_id);
                }
            }
            tracing::debug!(collection = %name, observer_id, "observation stopped");
        });

        Ok(Observation::new(receiver, handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn drain(observation: &mut Observation) -> Vec<ChangeEvent> {
        std::iter::from_fn(|| observation.try_next()).collect()
    }

    fn fields(value: Value) -> Document {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_selector_parse() {
        assert!(Selector::parse(&json!({})).unwrap().matches(&Document::new()));
        assert!(Selector::parse(&json!({"name": {"$in": ["banana"]}})).is_ok());
        assert_eq!(
            Selector::parse(&json!({"$or": []})),
            Err(StoreError::MalformedSelector(
                "unsupported operator `$or`".to_string()
            ))
        );
        assert!(Selector::parse(&json!({"name": {"$regex": "a"}})).is_err());
        assert!(Selector::parse(&json!({"name": {"$in": "banana"}})).is_err());
        assert!(Selector::parse(&json!(42)).is_err());
    }

    #[test]
    fn test_selector_matches() {
        let doc = json!({"_id": "a", "name": "banana", "author": null});
        let Value::Object(doc) = doc else { unreachable!() };

        assert!(Selector::parse(&json!("a")).unwrap().matches(&doc));
        assert!(Selector::parse(&json!({"name": "banana"})).unwrap().matches(&doc));
        assert!(Selector::parse(&json!({"name": {"$ne": "apple"}})).unwrap().matches(&doc));
        assert!(Selector::parse(&json!({"missing": null})).unwrap().matches(&doc));
        assert!(!Selector::parse(&json!({"_id": {"$in": []}})).unwrap().matches(&doc));
    }

    #[test]
    fn test_insert_update_remove() {
        let store = MemoryStore::new();
        let fruits = store.collection("fruits");

        let id = fruits.insert(json!({"name": "banana"})).unwrap();
        assert_eq!(id.len(), 17);
        assert_eq!(
            fruits.insert(json!({"_id": id, "name": "again"})),
            Err(StoreError::DuplicateId {
                collection: "fruits".to_string(),
                id: id.clone()
            })
        );

        assert!(fruits.update(&id, json!({"color": "yellow"})).unwrap());
        assert!(!fruits.update(&id, json!({"color": "yellow"})).unwrap());
        let doc = fruits.find_one(id.as_str()).unwrap().unwrap();
        assert_eq!(Value::Object(doc), json!({"_id": id, "name": "banana", "color": "yellow"}));

        assert!(fruits.update(&id, json!({"color": null})).unwrap());
        let doc = fruits.find_one(id.as_str()).unwrap().unwrap();
        assert!(!doc.contains_key("color"));

        assert!(fruits.remove(&id));
        assert!(!fruits.remove(&id));
        assert!(fruits.is_empty());
        assert_eq!(store.version(), 4);
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let store = MemoryStore::new();
        let items = store.collection("items");
        let ids: std::collections::HashSet<String> = (0..500)
            .map(|i| items.insert(json!({"n": i})).unwrap())
            .collect();
        assert_eq!(ids.len(), 500);
    }

    #[test]
    fn test_observe_replays_then_streams() {
        let store = MemoryStore::new();
        let fruits = store.collection("fruits");
        fruits.insert(json!({"_id": "a", "name": "apple"})).unwrap();
        fruits.insert(json!({"_id": "b", "name": "banana"})).unwrap();

        let mut observation = fruits.find(json!({"name": {"$ne": "avocado"}})).observe().unwrap();
        assert_eq!(
            drain(&mut observation),
            vec![
                ChangeEvent::Added {
                    id: "a".into(),
                    fields: fields(json!({"name": "apple"}))
                },
                ChangeEvent::Added {
                    id: "b".into(),
                    fields: fields(json!({"name": "banana"}))
                },
                ChangeEvent::Ready,
            ]
        );

        fruits.update("a", json!({"name": "avocado"})).unwrap();
        fruits.update("b", json!({"ripe": true})).unwrap();
        fruits.insert(json!({"_id": "c", "name": "avocado"})).unwrap();
        fruits.update("a", json!({"name": "apricot"})).unwrap();
        fruits.remove("b");

        assert_eq!(
            drain(&mut observation),
            vec![
                ChangeEvent::Removed { id: "a".into() },
                ChangeEvent::Changed {
                    id: "b".into(),
                    fields: fields(json!({"ripe": true}))
                },
                ChangeEvent::Added {
                    id: "a".into(),
                    fields: fields(json!({"name": "apricot"}))
                },
                ChangeEvent::Removed { id: "b".into() },
            ]
        );

        assert_eq!(fruits.observer_count(), 1);
        observation.handle().stop();
        assert_eq!(fruits.observer_count(), 0);
    }

    #[test]
    fn test_bulk_writes_move_rows_across_the_filter() {
        let store = MemoryStore::new();
        let fruits = store.collection("fruits");
        fruits.insert(json!({"_id": "a", "name": "apple", "color": "red"})).unwrap();
        fruits.insert(json!({"_id": "b", "name": "banana", "color": "yellow"})).unwrap();
        fruits.insert(json!({"_id": "c", "name": "cherry", "color": "red"})).unwrap();

        let mut observation = fruits.find(json!({"color": "red"})).observe().unwrap();
        assert_eq!(drain(&mut observation).len(), 3);

        let moved = fruits
            .update_where(&json!({"color": "red"}), json!({"color": "green"}))
            .unwrap();
        assert_eq!(moved, 2);
        assert_eq!(
            drain(&mut observation),
            vec![
                ChangeEvent::Removed { id: "a".into() },
                ChangeEvent::Removed { id: "c".into() },
            ]
        );

        let moved = fruits
            .update_where(
                &json!({"name": {"$in": ["apple", "banana"]}}),
                json!({"color": "red"}),
            )
            .unwrap();
        assert_eq!(moved, 2);
        assert_eq!(
            drain(&mut observation),
            vec![
                ChangeEvent::Added {
                    id: "a".into(),
                    fields: fields(json!({"name": "apple", "color": "red"}))
                },
                ChangeEvent::Added {
                    id: "b".into(),
                    fields: fields(json!({"name": "banana", "color": "red"}))
                },
            ]
        );

        assert_eq!(fruits.remove_where(&json!({"color": "red"})).unwrap(), 2);
        assert_eq!(
            drain(&mut observation),
            vec![
                ChangeEvent::Removed { id: "a".into() },
                ChangeEvent::Removed { id: "b".into() },
            ]
        );
        assert_eq!(fruits.len(), 1);
        assert_eq!(store.version(), 6);

        assert_eq!(fruits.remove_where(&json!({"color": "red"})).unwrap(), 0);
        assert_eq!(
            fruits.update_where(&json!({"color": "green"}), json!({"color": "green"})).unwrap(),
            0
        );
        assert_eq!(store.version(), 6);
        assert!(fruits.update_where(&json!({"$or": []}), json!({})).is_err());
        assert!(drain(&mut observation).is_empty());
    }

    #[test]
    fn test_malformed_selector_fails_on_observe() {
        let store = MemoryStore::new();
        let cursor = store.collection("fruits").find(json!({"$where": "1"}));
        assert!(matches!(
            cursor.observe(),
            Err(StoreError::MalformedSelector(_))
        ));
        assert!(cursor.fetch().is_err());
    }

    #[test]
    fn test_apply_batch_bumps_version_once() {
        let store = MemoryStore::new();
        let mut fields = Document::new();
        fields.insert("name".into(), json!("banana"));
        let applied = store
            .apply([
                WriteOp::Upsert {
                    collection: "fruits".into(),
                    id: "a".into(),
                    fields: fields.clone(),
                },
                WriteOp::Upsert {
                    collection: "fruits".into(),
                    id: "b".into(),
                    fields,
                },
                WriteOp::Remove {
                    collection: "fruits".into(),
                    id: "a".into(),
                },
            ])
            .unwrap();
        assert_eq!(applied, 3);
        assert_eq!(store.version(), 1);
        assert_eq!(store.collection("fruits").len(), 1);

        let missing = store.apply([WriteOp::Merge {
            collection: "fruits".into(),
            id: "zzz".into(),
            fields: Document::new(),
        }]);
        assert!(matches!(missing, Err(StoreError::DocumentNotFound { .. })));
        assert_eq!(store.version(), 1);
    }
}
