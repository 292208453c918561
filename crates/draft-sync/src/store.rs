//! VirtualDocumentStore: file-like read/write/stat/delete over virtual URIs.
//!
//! Reads are served from an in-memory cache after the first remote fetch.
//! Opening a draft records its remote modification time with the
//! `ConflictTracker`, and every write runs the resolution protocol before
//! anything is sent to the remote.

use crate::events::{DocumentEvent, EventBus};
use crate::identifier::{ResourceIdentifier, ResourceState, VirtualDocumentKey};
use crate::remote::{RemoteClient, RemoteError};
use crate::resolution::{
    Clearance, ImmutableStateChoice, ResolutionConfig, ResolutionCoordinator, Resolver,
};
use crate::tracker::{ConflictRecord, ConflictTracker};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Document is read-only: {0}")]
    Permission(String),

    #[error("Save unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// What a write ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Content was written. `verified` is false when the conflict check was skipped.
    Saved { verified: bool },
    /// Local changes were dropped in favor of the remote version now in the cache.
    Reloaded,
    /// The draft is gone; the editor should close the document.
    Closed,
    /// Content was saved as a new draft under `key`.
    NewDraft { key: VirtualDocumentKey },
}

/// Document metadata, best-effort
#[derive(Debug, Clone)]
pub struct FileStat {
    /// Creation time in milliseconds since epoch
    pub ctime_millis: u64,
    /// Modification time in milliseconds since epoch
    pub mtime_millis: u64,
    /// Cached content size in bytes (0 if not loaded)
    pub size: u64,
    /// Whether writes will be refused
    pub readonly: bool,
}

pub struct VirtualDocumentStore<R: RemoteClient, P: Resolver> {
    remote: R,
    coordinator: ResolutionCoordinator<P>,
    tracker: ConflictTracker,
    /// Last content read from or written to the remote, per key
    cache: Mutex<HashMap<VirtualDocumentKey, Vec<u8>>>,
    events: Arc<EventBus>,
}

impl<R: RemoteClient, P: Resolver> VirtualDocumentStore<R, P> {
    pub fn new(remote: R, resolver: P) -> Self {
        Self::with_config(remote, resolver, ResolutionConfig::default())
    }

    pub fn with_config(remote: R, resolver: P, config: ResolutionConfig) -> Self {
        Self {
            remote,
            coordinator: ResolutionCoordinator::with_config(resolver, config),
            tracker: ConflictTracker::new(),
            cache: Mutex::new(HashMap::new()),
            events: Arc::new(EventBus::new()),
        }
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn tracker(&self) -> &ConflictTracker {
        &self.tracker
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn resolver(&self) -> &P {
        self.coordinator.resolver()
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<VirtualDocumentKey, Vec<u8>>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Cached content for `key`, if any.
    pub fn cached(&self, key: &VirtualDocumentKey) -> Option<Vec<u8>> {
        self.cache().get(key).cloned()
    }

    /// Read a document, fetching it from the remote on first access.
    pub async fn read(&self, key: &VirtualDocumentKey) -> Result<Vec<u8>> {
        if let Some(content) = self.cached(key) {
            return Ok(content);
        }

        let location = key.decode().map_err(|e| {
            debug!("Cannot read {}: {}", key, e);
            StoreError::NotFound(key.to_string())
        })?;

        let fetched = match self.remote.fetch_content(&location.identifier).await {
            Ok(fetched) => fetched,
            Err(e) => {
                error!("Failed to fetch {}: {}", location.identifier, e);
                return Err(StoreError::NotFound(key.to_string()));
            }
        };

        self.cache().insert(key.clone(), fetched.content.clone());

        if location.state == ResourceState::Draft {
            self.track_opened(key, &location.identifier).await;
        }

        Ok(fetched.content)
    }

    /// Write `content` to the remote draft behind `key`.
    ///
    /// Non-draft keys are refused before anything else happens. Otherwise the
    /// resolution protocol decides whether the write proceeds, turns into a
    /// reload, or is abandoned (`Unavailable`).
    pub async fn write(&self, key: &VirtualDocumentKey, content: &[u8]) -> Result<WriteOutcome> {
        if key.state() != Some(ResourceState::Draft) {
            return Err(StoreError::Permission(key.to_string()));
        }

        let location = key.decode().map_err(|e| {
            debug!("Cannot write {}: {}", key, e);
            StoreError::NotFound(key.to_string())
        })?;
        let identifier = location.identifier;

        let resolution = self
            .coordinator
            .clear_for_write(&self.tracker, &self.remote, key, &identifier, content)
            .await;
        debug!(
            "Resolution for {} after {} round(s): {:?}",
            identifier, resolution.rounds, resolution.clearance
        );

        match resolution.clearance {
            Clearance::Abort => {
                info!("Save of {} cancelled", identifier);
                Err(StoreError::Unavailable(format!("save of {} cancelled", identifier)))
            }
            Clearance::Reload(record) => {
                self.adopt_remote(key, record);
                Ok(WriteOutcome::Reloaded)
            }
            Clearance::Proceed { verified } => self.commit(key, &identifier, content, verified).await,
        }
    }

    /// Size comes from the cache; times are the current wall clock.
    pub fn stat(&self, key: &VirtualDocumentKey) -> FileStat {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let size = self.cache().get(key).map(|c| c.len() as u64).unwrap_or(0);
        FileStat {
            ctime_millis: now,
            mtime_millis: now,
            size,
            readonly: key.state() != Some(ResourceState::Draft),
        }
    }

    /// Forget the cached content for `key`. Never touches the remote.
    pub fn delete(&self, key: &VirtualDocumentKey) {
        self.cache().remove(key);
    }

    /// Drop all cached content and baselines. Call at session end.
    pub fn dispose(&self) {
        self.cache().clear();
        self.tracker.clear();
    }

    async fn track_opened(&self, key: &VirtualDocumentKey, identifier: &ResourceIdentifier) {
        match self.remote.fetch_metadata(identifier).await {
            Ok(metadata) => match metadata.modified_on {
                Some(modified_on) => self.tracker.track_opened(key, modified_on),
                None => debug!("{} has no modification time; not tracking", identifier),
            },
            Err(e) => warn!("Could not fetch metadata for {}: {}", identifier, e),
        }
    }

    async fn commit(
        &self,
        key: &VirtualDocumentKey,
        identifier: &ResourceIdentifier,
        content: &[u8],
        verified: bool,
    ) -> Result<WriteOutcome> {
        match self.remote.update_content(identifier, content).await {
            Ok(()) => {
                match self.remote.fetch_metadata(identifier).await {
                    Ok(metadata) => match metadata.modified_on {
                        Some(modified_on) => self.tracker.update_timestamp(key, modified_on),
                        None => debug!("{} has no modification time after save", identifier),
                    },
                    // Keeping the old baseline makes the next save report a
                    // conflict instead of missing one.
                    Err(e) => warn!("Saved {} but could not refresh its baseline: {}", identifier, e),
                }
                self.cache().insert(key.clone(), content.to_vec());
                self.emit(DocumentEvent::Changed { key: key.clone() });
                info!("Saved {} ({} bytes)", identifier, content.len());
                Ok(WriteOutcome::Saved { verified })
            }
            Err(error @ RemoteError::ImmutableState(_)) => {
                warn!("{} is no longer a draft: {}", identifier, error);
                self.on_immutable_state(key, identifier, content, error).await
            }
            Err(error) => {
                error!("Failed to save {}: {}", identifier, error);
                self.resolver().report_failure(identifier, &error).await;
                Err(StoreError::Unavailable(error.to_string()))
            }
        }
    }

    fn emit(&self, event: DocumentEvent) {
        debug!("Notifying subscribers: {:?} for {}", event, event.key());
        self.events.emit(event);
    }

    /// Replace local state with the remote snapshot from a conflict.
    fn adopt_remote(&self, key: &VirtualDocumentKey, record: ConflictRecord) {
        self.cache().insert(key.clone(), record.remote_content);
        self.tracker.update_timestamp(key, record.remote_modified_on);
        self.emit(DocumentEvent::Reloaded { key: key.clone() });
        info!("Reloaded {} from remote", record.identifier);
    }

    async fn on_immutable_state(
        &self,
        key: &VirtualDocumentKey,
        identifier: &ResourceIdentifier,
        content: &[u8],
        error: RemoteError,
    ) -> Result<WriteOutcome> {
        let choice = self
            .resolver()
            .resolve_immutable_state(identifier, &error)
            .await
            .unwrap_or(ImmutableStateChoice::Cancel);

        match choice {
            ImmutableStateChoice::Cancel => Err(StoreError::Unavailable(error.to_string())),
            ImmutableStateChoice::Discard => {
                self.cache().remove(key);
                self.tracker.stop_tracking(key);
                self.emit(DocumentEvent::Closed { key: key.clone() });
                Ok(WriteOutcome::Closed)
            }
            ImmutableStateChoice::CreateNewDraft => {
                match self.remote.create_draft(identifier, content).await {
                    Ok(created) => {
                        let new_key = VirtualDocumentKey::build(&created, ResourceState::Draft);
                        self.cache().insert(new_key.clone(), content.to_vec());
                        self.track_opened(&new_key, &created).await;
                        self.emit(DocumentEvent::DraftCreated {
                            from: key.clone(),
                            to: new_key.clone(),
                        });
                        info!("Saved changes to {} as new draft {}", identifier, created);
                        Ok(WriteOutcome::NewDraft { key: new_key })
                    }
                    Err(e) => {
                        error!("Failed to create a new draft from {}: {}", identifier, e);
                        self.resolver().report_failure(identifier, &e).await;
                        Err(StoreError::Unavailable(e.to_string()))
                    }
                }
            }
        }
    }
}
