use draft_sync::{
    DocumentEvent, InMemoryRegistry, ResourceIdentifier, ResourceState, ScriptedResolver,
    Subscription, VirtualDocumentKey, VirtualDocumentStore,
};
use std::sync::{Arc, Mutex};

pub type TestStore = VirtualDocumentStore<Arc<InMemoryRegistry>, ScriptedResolver>;

/// A store over an in-memory registry holding one draft `g/a@1.0.0`.
pub struct Session {
    pub store: TestStore,
    pub registry: Arc<InMemoryRegistry>,
    pub id: ResourceIdentifier,
    pub key: VirtualDocumentKey,
    pub events: Arc<Mutex<Vec<DocumentEvent>>>,
    _subscription: Subscription,
}

impl Session {
    pub fn new(resolver: ScriptedResolver) -> Self {
        let registry = Arc::new(InMemoryRegistry::new());
        let id = ResourceIdentifier::new("g", "a", "1.0.0");
        registry.insert(&id, b"{\"v\":0}", ResourceState::Draft);
        let key = VirtualDocumentKey::build(&id, ResourceState::Draft);

        let store = VirtualDocumentStore::new(Arc::clone(&registry), resolver);
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = Arc::clone(&events);
        let subscription = store.events().subscribe(move |event| {
            events_clone.lock().unwrap().push(event);
        });

        Self {
            store,
            registry,
            id,
            key,
            events,
            _subscription: subscription,
        }
    }

    pub fn events(&self) -> Vec<DocumentEvent> {
        self.events.lock().unwrap().clone()
    }
}
