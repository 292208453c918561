//! Change notifications for editor surfaces.
//!
//! The store emits a `DocumentEvent` after every successful save, reload,
//! close or draft creation so open views can refresh.

use crate::identifier::VirtualDocumentKey;

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DocumentEvent {
    /// Local content was written to the remote.
    Changed { key: VirtualDocumentKey },
    /// Local content was replaced by the remote version.
    Reloaded { key: VirtualDocumentKey },
    /// The document should be closed (its draft is gone).
    Closed { key: VirtualDocumentKey },
    /// Content was saved as a new draft version.
    DraftCreated {
        from: VirtualDocumentKey,
        to: VirtualDocumentKey,
    },
}

impl DocumentEvent {
    /// The key an editor should refresh.
    pub fn key(&self) -> &VirtualDocumentKey {
        match self {
            DocumentEvent::Changed { key }
            | DocumentEvent::Reloaded { key }
            | DocumentEvent::Closed { key } => key,
            DocumentEvent::DraftCreated { to, .. } => to,
        }
    }
}

/// Subscription handle that unsubscribes automatically when dropped.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

type Callback = Arc<dyn Fn(DocumentEvent) + Send + Sync>;

/// Event bus for publishing document events to subscribers.
///
/// Wrap in `Arc` to enable subscriptions.
#[derive(Default)]
pub struct EventBus {
    callbacks: RwLock<Vec<(usize, Callback)>>,
    next_id: AtomicUsize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns `Subscription` that unsubscribes on drop.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(DocumentEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        // try_write: Drop may run during unwinding while emit holds a read lock
        if let Ok(mut guard) = self.callbacks.try_write() {
            guard.retain(|(i, _)| *i != id);
        }
    }

    pub fn emit(&self, event: DocumentEvent) {
        // Snapshot so a callback may subscribe without deadlocking
        let callbacks: Vec<_> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn key(name: &str) -> VirtualDocumentKey {
        VirtualDocumentKey::from_uri(format!(
            "registry:/group/g/artifact/{}/version/1?state=DRAFT",
            name
        ))
    }

    #[test]
    fn test_subscribe_and_emit() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);

        let _sub = bus.subscribe(move |event| {
            seen_clone.lock().unwrap().push(event);
        });

        bus.emit(DocumentEvent::Changed { key: key("a") });

        assert_eq!(
            *seen.lock().unwrap(),
            vec![DocumentEvent::Changed { key: key("a") }]
        );
    }

    #[test]
    fn test_subscription_unsubscribes_on_drop() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);

        {
            let _sub = bus.subscribe(move |_event| {
                count_clone.fetch_add(1, Ordering::Relaxed);
            });
            bus.emit(DocumentEvent::Reloaded { key: key("a") });
            assert_eq!(count.load(Ordering::Relaxed), 1);
        }

        bus.emit(DocumentEvent::Reloaded { key: key("b") });
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_event_key_points_at_document_to_refresh() {
        let event = DocumentEvent::DraftCreated {
            from: key("a"),
            to: key("b"),
        };
        assert_eq!(event.key(), &key("b"));
        assert_eq!(DocumentEvent::Closed { key: key("c") }.key(), &key("c"));
    }

    #[test]
    fn test_event_serialization() {
        let event = DocumentEvent::DraftCreated {
            from: key("a"),
            to: key("b"),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"draftCreated\""));
        assert!(json.contains("\"from\":\"registry:/group/g/artifact/a/version/1?state=DRAFT\""));
    }
}
