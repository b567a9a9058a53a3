//! Live cursor abstraction.
//!
//! A [`LiveCursor`] is a store query that can be fetched once or observed
//! continuously. Resolvers return cursors; the `@cursor` resolver decides
//! which of the two to do.

use crate::error::StoreError;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// A stored document. Documents carry their identifier under `_id`.
pub type Document = Map<String, Value>;

/// One change delivered by an observation.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    /// A document entered the result set.
    Added { id: String, fields: Document },
    /// Fields of a member document changed. A `null` value means the field
    /// was cleared.
    Changed { id: String, fields: Document },
    /// A document left the result set.
    Removed { id: String },
    /// The initial replay is complete.
    Ready,
}

/// A query against a document store.
pub trait LiveCursor: Send + Sync + fmt::Debug {
    /// Name of the collection this cursor reads.
    fn collection(&self) -> &str;

    /// Fetches the current matching documents in order.
    fn fetch(&self) -> Result<Vec<Document>, StoreError>;

    /// Starts observing. The observation first replays every matching
    /// document as [`ChangeEvent::Added`], then sends [`ChangeEvent::Ready`],
    /// then delivers changes in store order.
    fn observe(&self) -> Result<Observation, StoreError>;
}

/// A running observation: an ordered event stream plus the handle that
/// stops it.
#[derive(Debug)]
pub struct Observation {
    events: mpsc::UnboundedReceiver<ChangeEvent>,
    handle: ObservationHandle,
}

impl Observation {
    pub fn new(events: mpsc::UnboundedReceiver<ChangeEvent>, handle: ObservationHandle) -> Self {
        Self { events, handle }
    }

    /// Receives the next event. Returns `None` once the observation is
    /// stopped and drained.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        if self.handle.is_stopped() {
            return None;
        }
        self.events.recv().await
    }

    /// Receives an already delivered event without waiting.
    pub fn try_next(&mut self) -> Option<ChangeEvent> {
        if self.handle.is_stopped() {
            return None;
        }
        self.events.try_recv().ok()
    }

    pub fn handle(&self) -> &ObservationHandle {
        &self.handle
    }

    pub fn into_parts(self) -> (mpsc::UnboundedReceiver<ChangeEvent>, ObservationHandle) {
        (self.events, self.handle)
    }
}

type StopFn = Box<dyn FnOnce() + Send>;

struct HandleInner {
    stopped: AtomicBool,
    on_stop: Mutex<Option<StopFn>>,
}

impl HandleInner {
    fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let callback = self
            .on_stop
            .lock()
            .ok()
            .and_then(|mut slot| slot.take());
        if let Some(callback) = callback {
            callback();
        }
    }
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Stops one observation. Cloning shares the handle; the observation stops
/// on the first [`stop`](Self::stop) or when the last clone is dropped.
#[derive(Clone)]
pub struct ObservationHandle {
    inner: Arc<HandleInner>,
}

impl ObservationHandle {
    pub fn new(on_stop: impl FnOnce() + Send + 'static) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                stopped: AtomicBool::new(false),
                on_stop: Mutex::new(Some(Box::new(on_stop))),
            }),
        }
    }

    /// Stops the observation. Idempotent.
    pub fn stop(&self) {
        self.inner.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }
}

impl fmt::Debug for ObservationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservationHandle")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_handle_stops_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handle = ObservationHandle::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let clone = handle.clone();

        handle.stop();
        clone.stop();
        assert!(clone.is_stopped());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handle_stops_on_last_drop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handle = ObservationHandle::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let clone = handle.clone();
        drop(handle);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        drop(clone);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_observation_ends_after_stop() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut observation = Observation::new(rx, ObservationHandle::new(|| {}));
        tx.send(ChangeEvent::Ready).unwrap();
        assert_eq!(observation.next().await, Some(ChangeEvent::Ready));

        tx.send(ChangeEvent::Removed { id: "a".into() }).unwrap();
        observation.handle().stop();
        assert_eq!(observation.next().await, None);
    }
}
