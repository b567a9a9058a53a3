//! The client's local copy of published documents.
//!
//! Every live channel writes into one shared [`MemoryStore`]. Documents are
//! reference counted per channel, so a document two subscriptions share
//! stays until both have removed it.

use crate::error::{ErrorCode, ResultExt, SdkResult};
use lgql_runtime::{DataMessage, Document, MemoryStore, WriteOp};
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// What a frame carried besides documents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameOutcome {
    /// The frame completed the initial result set.
    pub ready: bool,
    /// The publication terminated with this error.
    pub failure: Option<String>,
}

/// A reference-counted view over the client store.
#[derive(Debug, Clone)]
pub struct Mirror {
    store: MemoryStore,
    refs: Arc<Mutex<FxHashMap<(String, String), usize>>>,
}

impl Mirror {
    pub fn new(store: MemoryStore) -> Self {
        Self {
            store,
            refs: Arc::default(),
        }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    fn refs(&self) -> MutexGuard<'_, FxHashMap<(String, String), usize>> {
        self.refs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies one frame as a single store batch.
    pub fn apply(&self, frame: &[DataMessage]) -> SdkResult<FrameOutcome> {
        let mut outcome = FrameOutcome::default();
        let mut ops = Vec::with_capacity(frame.len());
        {
            let mut refs = self.refs();
            for message in frame {
                match message {
                    DataMessage::Added {
                        collection,
                        id,
                        fields,
                    } => {
                        let count = refs.entry((collection.clone(), id.clone())).or_insert(0);
                        *count += 1;
                        ops.push(if *count == 1 {
                            WriteOp::Upsert {
                                collection: collection.clone(),
                                id: id.clone(),
                                fields: fields.clone(),
                            }
                        } else {
                            WriteOp::Merge {
                                collection: collection.clone(),
                                id: id.clone(),
                                fields: fields.clone(),
                            }
                        });
                    }
                    DataMessage::Changed {
                        collection,
                        id,
                        fields,
                        cleared,
                    } => {
                        if !refs.contains_key(&(collection.clone(), id.clone())) {
                            continue;
                        }
                        let mut merged: Document = fields.clone();
                        for name in cleared {
                            merged.insert(name.clone(), Value::Null);
                        }
                        ops.push(WriteOp::Merge {
                            collection: collection.clone(),
                            id: id.clone(),
                            fields: merged,
                        });
                    }
                    DataMessage::Removed { collection, id } => {
                        release(&mut refs, collection, id, &mut ops);
                    }
                    DataMessage::Ready => outcome.ready = true,
                    DataMessage::Nosub { error } => outcome.failure = Some(error.clone()),
                }
            }
        }
        self.store
            .apply(ops)
            .map_sdk_err_with(ErrorCode::InternalError, "mirror write failed")?;
        Ok(outcome)
    }

    /// Drops one reference to every document a channel still held.
    pub fn forget(&self, held: impl IntoIterator<Item = (String, String)>) -> SdkResult<()> {
        let mut ops = Vec::new();
        {
            let mut refs = self.refs();
            for (collection, id) in held {
                release(&mut refs, &collection, &id, &mut ops);
            }
        }
        self.store
            .apply(ops)
            .map_sdk_err_with(ErrorCode::InternalError, "mirror write failed")?;
        Ok(())
    }
}

fn release(
    refs: &mut FxHashMap<(String, String), usize>,
    collection: &str,
    id: &str,
    ops: &mut Vec<WriteOp>,
) {
    let key = (collection.to_string(), id.to_string());
    let Some(count) = refs.get_mut(&key) else {
        return;
    };
    *count -= 1;
    if *count == 0 {
        refs.remove(&key);
        ops.push(WriteOp::Remove {
            collection: key.0,
            id: key.1,
        });
    }
}

/// Tracks which documents one channel has been sent.
///
/// Recording a frame and applying it happen in one call, as do taking the
/// held set and forgetting it, so a channel held behind a lock never
/// releases while a frame is half applied.
#[derive(Debug, Default)]
pub struct Held {
    documents: indexmap::IndexSet<(String, String)>,
    released: bool,
}

impl Held {
    /// Records a frame and applies it to `mirror`. Returns `None` once the
    /// channel has been released.
    pub fn apply(
        &mut self,
        mirror: &Mirror,
        frame: &[DataMessage],
    ) -> SdkResult<Option<FrameOutcome>> {
        if self.released {
            return Ok(None);
        }
        self.record(frame);
        mirror.apply(frame).map(Some)
    }

    /// Drops every held document from `mirror`. Later frames are ignored.
    pub fn release(&mut self, mirror: &Mirror) -> SdkResult<()> {
        self.released = true;
        let documents: Vec<_> = self.documents.drain(..).collect();
        mirror.forget(documents)
    }

    fn record(&mut self, frame: &[DataMessage]) {
        for message in frame {
            match message {
                DataMessage::Added { collection, id, .. } => {
                    self.documents.insert((collection.clone(), id.clone()));
                }
                DataMessage::Removed { collection, id } => {
                    self.documents.shift_remove(&(collection.clone(), id.clone()));
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn added(collection: &str, id: &str, fields: Value) -> DataMessage {
        DataMessage::Added {
            collection: collection.into(),
            id: id.into(),
            fields: match fields {
                Value::Object(map) => map,
                _ => Document::new(),
            },
        }
    }

    #[test]
    fn test_frame_is_one_batch() {
        let mirror = Mirror::new(MemoryStore::new());
        let outcome = mirror
            .apply(&[
                added("fruits", "a", json!({"name": "apple"})),
                added("fruits", "b", json!({"name": "banana"})),
                DataMessage::Ready,
            ])
            .unwrap();
        assert!(outcome.ready);
        assert_eq!(mirror.store().version(), 1);
        assert_eq!(mirror.store().collection("fruits").len(), 2);
    }

    #[test]
    fn test_shared_documents_survive_one_removal() {
        let mirror = Mirror::new(MemoryStore::new());
        let users = mirror.store().collection("users");
        mirror.apply(&[added("users", "u1", json!({"name": "Ada"}))]).unwrap();
        mirror.apply(&[added("users", "u1", json!({"email": "ada@example.com"}))]).unwrap();
        assert_eq!(
            users.find_one(json!({"_id": "u1"})).unwrap(),
            Some(json!({"_id": "u1", "name": "Ada", "email": "ada@example.com"}).as_object().cloned().unwrap())
        );

        let removed = DataMessage::Removed {
            collection: "users".into(),
            id: "u1".into(),
        };
        mirror.apply(&[removed.clone()]).unwrap();
        assert_eq!(users.len(), 1);
        mirror.apply(&[removed]).unwrap();
        assert!(users.is_empty());
    }

    #[test]
    fn test_changed_applies_cleared_fields() {
        let mirror = Mirror::new(MemoryStore::new());
        mirror
            .apply(&[added("entries", "e1", json!({"content": "hi", "author": "u1"}))])
            .unwrap();
        mirror
            .apply(&[DataMessage::Changed {
                collection: "entries".into(),
                id: "e1".into(),
                fields: json!({"content": "hey"}).as_object().cloned().unwrap(),
                cleared: vec!["author".into()],
            }])
            .unwrap();
        assert_eq!(
            mirror.store().collection("entries").find_one(json!({})).unwrap(),
            json!({"_id": "e1", "content": "hey"}).as_object().cloned()
        );
    }

    #[test]
    fn test_nosub_and_forget() {
        let mirror = Mirror::new(MemoryStore::new());
        let mut held = Held::default();
        let frame = vec![
            added("fruits", "a", json!({})),
            DataMessage::Nosub {
                error: "boom".into(),
            },
        ];
        let outcome = held.apply(&mirror, &frame).unwrap().unwrap();
        assert_eq!(outcome.failure.as_deref(), Some("boom"));

        held.release(&mirror).unwrap();
        assert!(mirror.store().collection("fruits").is_empty());
    }

    #[test]
    fn test_frames_after_release_are_dropped() {
        let mirror = Mirror::new(MemoryStore::new());
        let mut held = Held::default();
        held.apply(&mirror, &[added("users", "u1", json!({"name": "Ada"}))])
            .unwrap();
        held.release(&mirror).unwrap();

        let late = held
            .apply(&mirror, &[added("users", "u9", json!({"name": "Late"}))])
            .unwrap();
        assert!(late.is_none());
        assert!(mirror.store().collection("users").is_empty());
        held.release(&mirror).unwrap();
        assert!(mirror.store().collection("users").is_empty());
    }
}
