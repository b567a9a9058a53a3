//! Result cells: a value plus the listeners interested in it.

use tokio::sync::watch;

/// Holds the latest value and notifies subscribers when it changes.
///
/// Setting an equal value is a no-op, so listeners only wake for real
/// changes.
#[derive(Debug)]
pub struct ResultCell<T> {
    sender: watch::Sender<T>,
}

impl<T: Clone + PartialEq> ResultCell<T> {
    pub fn new(initial: T) -> Self {
        let (sender, _) = watch::channel(initial);
        Self { sender }
    }

    /// A receiver that wakes on every change.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.sender.subscribe()
    }

    /// Stores a value. Returns true if listeners were notified.
    pub fn set(&self, value: T) -> bool {
        self.sender.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        })
    }

    pub fn get(&self) -> T {
        self.sender.borrow().clone()
    }
}

impl<T: Clone + PartialEq + Default> Default for ResultCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_only_changes_notify() {
        let cell = ResultCell::new(1);
        let mut listener = cell.subscribe();

        assert!(!cell.set(1));
        assert!(!listener.has_changed().unwrap());

        assert!(cell.set(2));
        listener.changed().await.unwrap();
        assert_eq!(*listener.borrow_and_update(), 2);
        assert_eq!(cell.get(), 2);
    }
}
