//! ConflictTracker: remembers the remote modification time each open draft was
//! based on, and detects when the remote has moved on.

use crate::identifier::{ResourceIdentifier, VirtualDocumentKey};
use crate::remote::{RemoteClient, RemoteError};

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Snapshot of a detected discrepancy between the baseline and the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictRecord {
    pub identifier: ResourceIdentifier,
    /// Baseline this session believed was current
    pub local_modified_on: DateTime<Utc>,
    /// Modification time the remote reports now
    pub remote_modified_on: DateTime<Utc>,
    pub local_content: Vec<u8>,
    pub remote_content: Vec<u8>,
}

/// Tracks baseline timestamps for open drafts.
///
/// Keys without a baseline are untracked and never conflict. Every mutation is
/// a single lock acquisition; the lock is never held across a remote call.
#[derive(Clone, Default)]
pub struct ConflictTracker {
    /// Map of key -> remote modified_on at open (or last save)
    baselines: Arc<Mutex<HashMap<VirtualDocumentKey, DateTime<Utc>>>>,
}

impl ConflictTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn baselines(&self) -> std::sync::MutexGuard<'_, HashMap<VirtualDocumentKey, DateTime<Utc>>> {
        self.baselines.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record the baseline observed when `key` was opened, replacing any prior value.
    pub fn track_opened(&self, key: &VirtualDocumentKey, modified_on: DateTime<Utc>) {
        debug!("Tracking {} at {}", key, modified_on);
        self.baselines().insert(key.clone(), modified_on);
    }

    /// Advance the baseline to a known-good value (after a save or a reload).
    pub fn update_timestamp(&self, key: &VirtualDocumentKey, modified_on: DateTime<Utc>) {
        self.baselines().insert(key.clone(), modified_on);
    }

    pub fn baseline(&self, key: &VirtualDocumentKey) -> Option<DateTime<Utc>> {
        self.baselines().get(key).copied()
    }

    pub fn is_tracking(&self, key: &VirtualDocumentKey) -> bool {
        self.baselines().contains_key(key)
    }

    pub fn stop_tracking(&self, key: &VirtualDocumentKey) {
        self.baselines().remove(key);
    }

    pub fn clear(&self) {
        self.baselines().clear();
    }

    /// Compare the baseline for `key` against the remote's current modification time.
    ///
    /// Returns `Ok(None)` without any remote call for untracked keys, and when
    /// the remote reports no modification time. Timestamps are compared at
    /// millisecond resolution; any difference is a conflict, even if the
    /// contents happen to be identical. Remote errors propagate unmodified.
    pub async fn check_for_conflict<R: RemoteClient + ?Sized>(
        &self,
        remote: &R,
        key: &VirtualDocumentKey,
        identifier: &ResourceIdentifier,
        local_content: &[u8],
    ) -> Result<Option<ConflictRecord>, RemoteError> {
        let Some(baseline) = self.baseline(key) else {
            return Ok(None);
        };

        let metadata = remote.fetch_metadata(identifier).await?;
        let Some(remote_modified_on) = metadata.modified_on else {
            debug!("No modification time reported for {}, skipping check", identifier);
            return Ok(None);
        };

        if remote_modified_on.timestamp_millis() == baseline.timestamp_millis() {
            return Ok(None);
        }

        debug!(
            "Conflict on {}: baseline {} vs remote {}",
            identifier, baseline, remote_modified_on
        );
        let remote_content = remote.fetch_content(identifier).await?;

        Ok(Some(ConflictRecord {
            identifier: identifier.clone(),
            local_modified_on: baseline,
            remote_modified_on,
            local_content: local_content.to_vec(),
            remote_content: remote_content.content,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::ResourceState;
    use crate::remote::InMemoryRegistry;
    use chrono::Duration;

    fn setup() -> (InMemoryRegistry, ResourceIdentifier, VirtualDocumentKey) {
        let registry = InMemoryRegistry::new();
        let id = ResourceIdentifier::new("g", "a", "1.0.0");
        registry.insert(&id, b"{}", ResourceState::Draft);
        let key = VirtualDocumentKey::build(&id, ResourceState::Draft);
        (registry, id, key)
    }

    #[tokio::test]
    async fn test_same_millisecond_is_not_a_conflict() {
        let (registry, id, key) = setup();
        let tracker = ConflictTracker::new();
        let t0 = registry.modified_on(&id).unwrap();
        tracker.track_opened(&key, t0);

        let result = tracker
            .check_for_conflict(&registry, &key, &id, b"something else entirely")
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_sub_millisecond_difference_is_ignored() {
        let (registry, id, key) = setup();
        let tracker = ConflictTracker::new();
        let t0 = registry.modified_on(&id).unwrap();
        tracker.track_opened(&key, t0);
        registry.set_modified_on(&id, t0 + Duration::microseconds(300));

        let result = tracker.check_for_conflict(&registry, &key, &id, b"{}").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_one_millisecond_difference_conflicts_with_identical_content() {
        let (registry, id, key) = setup();
        let tracker = ConflictTracker::new();
        let t0 = registry.modified_on(&id).unwrap();
        tracker.track_opened(&key, t0);
        registry.set_modified_on(&id, t0 + Duration::milliseconds(1));

        let record = tracker
            .check_for_conflict(&registry, &key, &id, b"{}")
            .await
            .unwrap()
            .expect("conflict expected");
        assert_eq!(record.local_modified_on, t0);
        assert_eq!(record.remote_modified_on, t0 + Duration::milliseconds(1));
        assert_eq!(record.local_content, record.remote_content);
    }

    #[tokio::test]
    async fn test_older_remote_also_conflicts() {
        let (registry, id, key) = setup();
        let tracker = ConflictTracker::new();
        let t0 = registry.modified_on(&id).unwrap();
        tracker.track_opened(&key, t0);
        registry.set_modified_on(&id, t0 - Duration::milliseconds(5));

        let result = tracker.check_for_conflict(&registry, &key, &id, b"{}").await.unwrap();
        assert!(result.is_some());
    }

    #[tokio::test]
    async fn test_untracked_key_makes_no_remote_call() {
        let (registry, id, key) = setup();
        let tracker = ConflictTracker::new();

        let result = tracker.check_for_conflict(&registry, &key, &id, b"{}").await.unwrap();
        assert!(result.is_none());
        assert_eq!(registry.metadata_fetches(), 0);

        tracker.track_opened(&key, registry.modified_on(&id).unwrap());
        tracker.stop_tracking(&key);
        registry.modify(&id, b"changed");

        let result = tracker.check_for_conflict(&registry, &key, &id, b"{}").await.unwrap();
        assert!(result.is_none());
        assert_eq!(registry.metadata_fetches(), 0);
    }

    #[tokio::test]
    async fn test_missing_remote_timestamp_cannot_conflict() {
        let (registry, id, key) = setup();
        let tracker = ConflictTracker::new();
        tracker.track_opened(&key, registry.modified_on(&id).unwrap());
        registry.modify(&id, b"changed");
        registry.hide_modified_on();

        let result = tracker.check_for_conflict(&registry, &key, &id, b"{}").await.unwrap();
        assert!(result.is_none());
        assert_eq!(registry.content_fetches(), 0);
    }

    #[tokio::test]
    async fn test_metadata_errors_propagate() {
        let (registry, id, key) = setup();
        let tracker = ConflictTracker::new();
        tracker.track_opened(&key, registry.modified_on(&id).unwrap());
        registry.fail_next_metadata(RemoteError::transport("timed out"));

        let err = tracker
            .check_for_conflict(&registry, &key, &id, b"{}")
            .await
            .unwrap_err();
        assert_eq!(err, RemoteError::transport("timed out"));
    }

    #[tokio::test]
    async fn test_overlapping_checks_each_fetch_remote_content() {
        let (registry, id, key) = setup();
        let tracker = ConflictTracker::new();
        tracker.track_opened(&key, registry.modified_on(&id).unwrap());
        registry.modify(&id, b"theirs");

        let (first, second) = futures::join!(
            tracker.check_for_conflict(&registry, &key, &id, b"mine"),
            tracker.check_for_conflict(&registry, &key, &id, b"mine"),
        );
        assert!(first.unwrap().is_some());
        assert!(second.unwrap().is_some());
        assert_eq!(registry.content_fetches(), 2);
    }

    #[test]
    fn test_track_update_and_clear() {
        let tracker = ConflictTracker::new();
        let a = VirtualDocumentKey::from_uri("registry:/group/g/artifact/a/version/1?state=DRAFT");
        let b = VirtualDocumentKey::from_uri("registry:/group/g/artifact/b/version/1?state=DRAFT");
        let t0 = DateTime::from_timestamp_millis(1_000).unwrap();
        let t1 = DateTime::from_timestamp_millis(2_000).unwrap();

        tracker.track_opened(&a, t0);
        tracker.track_opened(&a, t1);
        assert_eq!(tracker.baseline(&a), Some(t1));

        tracker.track_opened(&b, t0);
        tracker.update_timestamp(&b, t1);
        assert_eq!(tracker.baseline(&b), Some(t1));

        tracker.stop_tracking(&a);
        tracker.stop_tracking(&a);
        assert!(!tracker.is_tracking(&a));
        assert!(tracker.is_tracking(&b));

        tracker.clear();
        tracker.clear();
        assert!(!tracker.is_tracking(&b));
    }
}
