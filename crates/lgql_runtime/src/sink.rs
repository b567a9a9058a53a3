//! Publication sinks.
//!
//! A [`PublicationSink`] is one client's live channel. [`Publication`] is the
//! concrete sink: it keeps a merge box of every document it has told the
//! client about, buffers writes, and sends them as [`DataMessage`] frames.

use crate::cursor::Document;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// Callback run when a sink stops.
pub type StopCallback = Box<dyn FnOnce() + Send>;

/// A live channel receiving document deltas.
///
/// `source` names the observation making the write. The same document may
/// be published by several sources; each one's fields are tracked apart.
pub trait PublicationSink: Send + Sync {
    /// A document is now visible to the client.
    fn added(&self, source: &str, collection: &str, id: &str, fields: Document);

    /// Fields of a visible document changed. `null` clears a field.
    fn changed(&self, source: &str, collection: &str, id: &str, fields: Document);

    /// `source` no longer publishes the document.
    fn removed(&self, source: &str, collection: &str, id: &str);

    /// Registers a callback run when the sink stops. If the sink is already
    /// stopping, the callback runs immediately.
    fn on_stop(&self, callback: StopCallback);

    /// The initial result set has been sent.
    fn ready(&self);

    /// Terminates the channel with an error.
    fn fail(&self, error: String);

    /// Sends buffered writes as one frame.
    fn flush(&self);

    fn is_stopped(&self) -> bool;
}

/// A message on a live channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg", rename_all = "lowercase")]
pub enum DataMessage {
    Added {
        collection: String,
        id: String,
        fields: Document,
    },
    Changed {
        collection: String,
        id: String,
        fields: Document,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        cleared: Vec<String>,
    },
    Removed {
        collection: String,
        id: String,
    },
    Ready,
    Nosub {
        error: String,
    },
}

#[derive(Debug, Default)]
struct MergedDocument {
    /// Field names each source has published.
    sources: IndexMap<String, IndexSet<String>>,
    fields: Document,
}

impl MergedDocument {
    fn provided_elsewhere(&self, source: &str, name: &str) -> bool {
        self.sources
            .iter()
            .any(|(other, names)| other != source && names.contains(name))
    }
}

#[derive(Default)]
struct PublicationState {
    documents: IndexMap<(String, String), MergedDocument>,
    pending: Vec<DataMessage>,
    callbacks: Vec<StopCallback>,
    stopping: bool,
    stopped: bool,
}

struct PublicationInner {
    state: Mutex<PublicationState>,
    frames: mpsc::UnboundedSender<Vec<DataMessage>>,
}

/// The merge-box sink behind a live channel.
///
/// Documents are reference counted per `(collection, id)`: the first
/// `added` is forwarded, later ones become a `changed` with any new field
/// values, and `removed` is forwarded when the last source goes away. A
/// source leaving earlier clears the fields no remaining source provides.
#[derive(Clone)]
pub struct Publication {
    inner: Arc<PublicationInner>,
}

impl Publication {
    /// Creates a publication and the receiver for its frames.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Vec<DataMessage>>) {
        let (frames, receiver) = mpsc::unbounded_channel();
        let publication = Self {
            inner: Arc::new(PublicationInner {
                state: Mutex::new(PublicationState::default()),
                frames,
            }),
        };
        (publication, receiver)
    }

    fn state(&self) -> MutexGuard<'_, PublicationState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of documents the client currently holds.
    pub fn published_count(&self) -> usize {
        self.state().documents.len()
    }

    #[cfg(test)]
    pub(crate) fn stop_callback_count(&self) -> usize {
        self.state().callbacks.len()
    }

    /// Stops the publication.
    ///
    /// Stop callbacks run first, so observations can emit their own
    /// removals. Anything still published afterwards is removed, and the
    /// final frame is flushed. Idempotent.
    pub fn stop(&self) {
        self.sweep(None);
    }

    fn sweep(&self, error: Option<String>) {
        let callbacks = {
            let mut state = self.state();
            if state.stopping {
                return;
            }
            state.stopping = true;
            std::mem::take(&mut state.callbacks)
        };

        for callback in callbacks {
            callback();
        }

        {
            let mut state = self.state();
            let leftovers: Vec<_> = state.documents.drain(..).map(|(key, _)| key).collect();
            for (collection, id) in leftovers {
                state
                    .pending
                    .push(DataMessage::Removed { collection, id });
            }
            if let Some(error) = error {
                state.pending.push(DataMessage::Nosub { error });
            }
            state.stopped = true;
        }
        self.send_pending();
        tracing::debug!("publication stopped");
    }

    fn send_pending(&self) {
        let frame = std::mem::take(&mut self.state().pending);
        if !frame.is_empty() {
            // The receiver may already be gone; the client has left.
            let _ = self.inner.frames.send(frame);
        }
    }
}

impl PublicationSink for Publication {
    fn added(&self, source: &str, collection: &str, id: &str, fields: Document) {
        let mut state = self.state();
        if state.stopping {
            return;
        }
        let key = (collection.to_string(), id.to_string());
        let names: IndexSet<String> = fields.keys().cloned().collect();
        let message = match state.documents.get_mut(&key) {
            Some(existing) => {
                existing
                    .sources
                    .entry(source.to_string())
                    .or_default()
                    .extend(names);
                let delta: Document = fields
                    .into_iter()
                    .filter(|(name, value)| existing.fields.get(name) != Some(value))
                    .collect();
                if delta.is_empty() {
                    return;
                }
                for (name, value) in &delta {
                    existing.fields.insert(name.clone(), value.clone());
                }
                DataMessage::Changed {
                    collection: key.0,
                    id: key.1,
                    fields: delta,
                    cleared: Vec::new(),
                }
            }
            None => {
                let mut merged = MergedDocument {
                    fields: fields.clone(),
                    ..MergedDocument::default()
                };
                merged.sources.insert(source.to_string(), names);
                state.documents.insert(key.clone(), merged);
                DataMessage::Added {
                    collection: key.0,
                    id: key.1,
                    fields,
                }
            }
        };
        state.pending.push(message);
    }

    fn changed(&self, source: &str, collection: &str, id: &str, fields: Document) {
        let mut state = self.state();
        if state.stopping {
            return;
        }
        let key = (collection.to_string(), id.to_string());
        let Some(existing) = state.documents.get_mut(&key) else {
            tracing::debug!(collection, id, "change for unpublished document ignored");
            return;
        };
        if !existing.sources.contains_key(source) {
            tracing::debug!(source, collection, id, "change from a foreign source ignored");
            return;
        }

        let mut set = Document::new();
        let mut cleared = Vec::new();
        for (name, value) in fields {
            if value.is_null() {
                if let Some(names) = existing.sources.get_mut(source) {
                    names.shift_remove(&name);
                }
                if !existing.provided_elsewhere(source, &name)
                    && existing.fields.remove(&name).is_some()
                {
                    cleared.push(name);
                }
                continue;
            }
            if let Some(names) = existing.sources.get_mut(source) {
                names.insert(name.clone());
            }
            if existing.fields.get(&name) != Some(&value) {
                existing.fields.insert(name.clone(), value.clone());
                set.insert(name, value);
            }
        }
        if set.is_empty() && cleared.is_empty() {
            return;
        }
        state.pending.push(DataMessage::Changed {
            collection: key.0,
            id: key.1,
            fields: set,
            cleared,
        });
    }

    fn removed(&self, source: &str, collection: &str, id: &str) {
        let mut state = self.state();
        if state.stopped {
            return;
        }
        let key = (collection.to_string(), id.to_string());
        let Some(existing) = state.documents.get_mut(&key) else {
            return;
        };
        let Some(names) = existing.sources.shift_remove(source) else {
            return;
        };
        if existing.sources.is_empty() {
            state.documents.shift_remove(&key);
            state.pending.push(DataMessage::Removed {
                collection: key.0,
                id: key.1,
            });
            return;
        }

        let mut cleared: Vec<String> = names
            .into_iter()
            .filter(|name| !existing.provided_elsewhere(source, name))
            .collect();
        cleared.retain(|name| existing.fields.remove(name).is_some());
        if !cleared.is_empty() {
            state.pending.push(DataMessage::Changed {
                collection: key.0,
                id: key.1,
                fields: Document::new(),
                cleared,
            });
        }
    }

    fn on_stop(&self, callback: StopCallback) {
        let mut state = self.state();
        if state.stopping {
            drop(state);
            callback();
        } else {
            state.callbacks.push(callback);
        }
    }

    fn ready(&self) {
        {
            let mut state = self.state();
            if state.stopping {
                return;
            }
            state.pending.push(DataMessage::Ready);
        }
        self.send_pending();
        tracing::debug!("publication ready");
    }

    fn fail(&self, error: String) {
        tracing::warn!(%error, "publication failed");
        self.sweep(Some(error));
    }

    fn flush(&self) {
        if self.state().stopped {
            return;
        }
        self.send_pending();
    }

    fn is_stopped(&self) -> bool {
        self.state().stopping
    }
}

impl fmt::Debug for Publication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("Publication")
            .field("published", &state.documents.len())
            .field("pending", &state.pending.len())
            .field("stopped", &state.stopped)
            .finish()
    }
}

/// Builds a document from a JSON object, ignoring anything else.
pub fn document(value: Value) -> Document {
    match value {
        Value::Object(fields) => fields,
        _ => Document::new(),
    }
}
