//! RemoteClient trait abstraction over the registry that owns the documents.
//!
//! Implementations:
//! - `InMemoryRegistry` - For testing
//! - `HttpRegistryClient` (in draft-edit) - Talks to the registry REST API

use crate::identifier::{ResourceIdentifier, ResourceState};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};
use thiserror::Error;

/// Classified failure from the remote registry.
///
/// Callers dispatch on the variant, never on the message text.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Resource is no longer editable: {0}")]
    ImmutableState(String),

    #[error("Transport error: {message}")]
    Transport { message: String, retryable: bool },

    #[error("Remote error: {0}")]
    Other(String),
}

impl RemoteError {
    pub fn transport(message: impl Into<String>) -> Self {
        RemoteError::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Transport { retryable: true, .. })
    }
}

pub type Result<T> = std::result::Result<T, RemoteError>;

/// Raw document content as stored remotely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteContent {
    pub content: Vec<u8>,
    pub content_type: String,
}

/// Version metadata. Only `modified_on` matters for conflict detection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMetadata {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub state: Option<ResourceState>,
    #[serde(default)]
    pub modified_by: Option<String>,
    #[serde(default)]
    pub modified_on: Option<DateTime<Utc>>,
}

/// Remote store of versioned documents.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Fetch current content of a version
    async fn fetch_content(&self, identifier: &ResourceIdentifier) -> Result<RemoteContent>;

    /// Fetch current metadata of a version
    async fn fetch_metadata(&self, identifier: &ResourceIdentifier) -> Result<ResourceMetadata>;

    /// Overwrite the content of a draft version
    async fn update_content(&self, identifier: &ResourceIdentifier, content: &[u8]) -> Result<()>;

    /// Create a new draft version of the same artifact holding `content`.
    ///
    /// Returns the identifier of the created version.
    async fn create_draft(
        &self,
        identifier: &ResourceIdentifier,
        content: &[u8],
    ) -> Result<ResourceIdentifier>;
}

// Allows sharing one client between a store and test assertions.
#[async_trait]
impl<T: RemoteClient + ?Sized> RemoteClient for std::sync::Arc<T> {
    async fn fetch_content(&self, identifier: &ResourceIdentifier) -> Result<RemoteContent> {
        (**self).fetch_content(identifier).await
    }

    async fn fetch_metadata(&self, identifier: &ResourceIdentifier) -> Result<ResourceMetadata> {
        (**self).fetch_metadata(identifier).await
    }

    async fn update_content(&self, identifier: &ResourceIdentifier, content: &[u8]) -> Result<()> {
        (**self).update_content(identifier, content).await
    }

    async fn create_draft(
        &self,
        identifier: &ResourceIdentifier,
        content: &[u8],
    ) -> Result<ResourceIdentifier> {
        (**self).create_draft(identifier, content).await
    }
}

struct StoredVersion {
    content: Vec<u8>,
    content_type: String,
    state: ResourceState,
    modified_on: DateTime<Utc>,
}

/// Call counters for `InMemoryRegistry`.
#[derive(Debug, Default)]
struct CallCounts {
    content_fetches: AtomicUsize,
    metadata_fetches: AtomicUsize,
    updates: AtomicUsize,
    drafts_created: AtomicUsize,
}

/// In-memory registry for testing.
///
/// Modification times come from a monotonic clock (one second per change) so every change
/// is strictly newer than the previous one.
pub struct InMemoryRegistry {
    versions: RwLock<HashMap<ResourceIdentifier, StoredVersion>>,
    clock: Mutex<DateTime<Utc>>,
    calls: CallCounts,
    /// Failures returned (once each, in order) by the next metadata fetches
    metadata_failures: Mutex<Vec<RemoteError>>,
    /// Failure returned by the next update
    update_failure: Mutex<Option<RemoteError>>,
    /// Whether modified_on is reported in metadata
    report_modified_on: RwLock<bool>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self {
            versions: RwLock::new(HashMap::new()),
            clock: Mutex::new(DateTime::from_timestamp_millis(1_700_000_000_000).unwrap_or_default()),
            calls: CallCounts::default(),
            metadata_failures: Mutex::new(Vec::new()),
            update_failure: Mutex::new(None),
            report_modified_on: RwLock::new(true),
        }
    }

    fn tick(&self) -> DateTime<Utc> {
        let mut clock = self.clock.lock().unwrap();
        *clock += Duration::seconds(1);
        *clock
    }

    /// Insert (or replace) a version, as if another client created it.
    pub fn insert(
        &self,
        identifier: &ResourceIdentifier,
        content: &[u8],
        state: ResourceState,
    ) -> DateTime<Utc> {
        let modified_on = self.tick();
        self.versions.write().unwrap().insert(
            identifier.clone(),
            StoredVersion {
                content: content.to_vec(),
                content_type: "application/json".to_string(),
                state,
                modified_on,
            },
        );
        modified_on
    }

    /// Change content out-of-band (another client saving). Returns the new modified_on.
    pub fn modify(&self, identifier: &ResourceIdentifier, content: &[u8]) -> DateTime<Utc> {
        let modified_on = self.tick();
        if let Some(version) = self.versions.write().unwrap().get_mut(identifier) {
            version.content = content.to_vec();
            version.modified_on = modified_on;
        }
        modified_on
    }

    /// Set a specific modified_on for testing exact timestamp comparisons
    pub fn set_modified_on(&self, identifier: &ResourceIdentifier, modified_on: DateTime<Utc>) {
        if let Some(version) = self.versions.write().unwrap().get_mut(identifier) {
            version.modified_on = modified_on;
        }
    }

    /// Transition a version's state (e.g. publish a draft)
    pub fn set_state(&self, identifier: &ResourceIdentifier, state: ResourceState) {
        if let Some(version) = self.versions.write().unwrap().get_mut(identifier) {
            version.state = state;
        }
    }

    pub fn remove(&self, identifier: &ResourceIdentifier) {
        self.versions.write().unwrap().remove(identifier);
    }

    /// Stop reporting modified_on in metadata (older registries omit it)
    pub fn hide_modified_on(&self) {
        *self.report_modified_on.write().unwrap() = false;
    }

    /// Queue a failure for the next metadata fetch
    pub fn fail_next_metadata(&self, error: RemoteError) {
        self.metadata_failures.lock().unwrap().push(error);
    }

    /// Fail the next update with `error`
    pub fn fail_next_update(&self, error: RemoteError) {
        *self.update_failure.lock().unwrap() = Some(error);
    }

    pub fn content(&self, identifier: &ResourceIdentifier) -> Option<Vec<u8>> {
        self.versions
            .read()
            .unwrap()
            .get(identifier)
            .map(|v| v.content.clone())
    }

    pub fn modified_on(&self, identifier: &ResourceIdentifier) -> Option<DateTime<Utc>> {
        self.versions
            .read()
            .unwrap()
            .get(identifier)
            .map(|v| v.modified_on)
    }

    pub fn content_fetches(&self) -> usize {
        self.calls.content_fetches.load(Ordering::SeqCst)
    }

    pub fn metadata_fetches(&self) -> usize {
        self.calls.metadata_fetches.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> usize {
        self.calls.updates.load(Ordering::SeqCst)
    }

    pub fn drafts_created(&self) -> usize {
        self.calls.drafts_created.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteClient for InMemoryRegistry {
    async fn fetch_content(&self, identifier: &ResourceIdentifier) -> Result<RemoteContent> {
        self.calls.content_fetches.fetch_add(1, Ordering::SeqCst);
        let versions = self.versions.read().unwrap();
        versions
            .get(identifier)
            .map(|v| RemoteContent {
                content: v.content.clone(),
                content_type: v.content_type.clone(),
            })
            .ok_or_else(|| RemoteError::NotFound(identifier.to_string()))
    }

    async fn fetch_metadata(&self, identifier: &ResourceIdentifier) -> Result<ResourceMetadata> {
        self.calls.metadata_fetches.fetch_add(1, Ordering::SeqCst);
        {
            let mut failures = self.metadata_failures.lock().unwrap();
            if !failures.is_empty() {
                return Err(failures.remove(0));
            }
        }

        let report_modified_on = *self.report_modified_on.read().unwrap();
        let versions = self.versions.read().unwrap();
        versions
            .get(identifier)
            .map(|v| ResourceMetadata {
                name: Some(identifier.artifact_id.clone()),
                state: Some(v.state),
                modified_by: None,
                modified_on: report_modified_on.then_some(v.modified_on),
            })
            .ok_or_else(|| RemoteError::NotFound(identifier.to_string()))
    }

    async fn update_content(&self, identifier: &ResourceIdentifier, content: &[u8]) -> Result<()> {
        self.calls.updates.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.update_failure.lock().unwrap().take() {
            return Err(error);
        }

        let modified_on = self.tick();
        let mut versions = self.versions.write().unwrap();
        let version = versions
            .get_mut(identifier)
            .ok_or_else(|| RemoteError::NotFound(identifier.to_string()))?;
        if !version.state.is_mutable() {
            return Err(RemoteError::ImmutableState(format!(
                "{} is {}",
                identifier, version.state
            )));
        }
        version.content = content.to_vec();
        version.modified_on = modified_on;
        Ok(())
    }

    async fn create_draft(
        &self,
        identifier: &ResourceIdentifier,
        content: &[u8],
    ) -> Result<ResourceIdentifier> {
        self.calls.drafts_created.fetch_add(1, Ordering::SeqCst);
        let content_type = {
            let versions = self.versions.read().unwrap();
            let count = versions
                .keys()
                .filter(|id| {
                    id.group_id == identifier.group_id && id.artifact_id == identifier.artifact_id
                })
                .count();
            if count == 0 {
                return Err(RemoteError::NotFound(identifier.to_string()));
            }
            versions
                .get(identifier)
                .map(|v| v.content_type.clone())
                .unwrap_or_else(|| "application/json".to_string())
        };

        let mut version = format!("{}-draft", identifier.version);
        while self
            .versions
            .read()
            .unwrap()
            .contains_key(&ResourceIdentifier::new(
                &identifier.group_id,
                &identifier.artifact_id,
                &version,
            ))
        {
            version.push_str("-draft");
        }

        let created = ResourceIdentifier::new(&identifier.group_id, &identifier.artifact_id, version);
        let modified_on = self.tick();
        self.versions.write().unwrap().insert(
            created.clone(),
            StoredVersion {
                content: content.to_vec(),
                content_type,
                state: ResourceState::Draft,
                modified_on,
            },
        );
        Ok(created)
    }
}
