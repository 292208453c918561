//! draft-sync: Edit remote registry drafts as if they were local files.
//!
//! This crate provides:
//! - A virtual URI codec for (group, artifact, version, state) documents
//! - A document store with a content cache over a `RemoteClient`
//! - Timestamp-based conflict detection for open drafts
//! - The resolution protocol that turns conflicts into save / reload / abort,
//!   driven by an injectable `Resolver`

pub mod events;
pub mod identifier;
pub mod remote;
pub mod resolution;
pub mod store;
pub mod tracker;

pub use events::{DocumentEvent, EventBus, Subscription};
pub use identifier::{
    DocumentLocation, KeyError, ResourceIdentifier, ResourceState, VirtualDocumentKey,
};
pub use remote::{InMemoryRegistry, RemoteClient, RemoteContent, RemoteError, ResourceMetadata};
pub use resolution::{
    CheckFailureChoice, Clearance, ConflictChoice, Confirmation, ImmutableStateChoice,
    Resolution, ResolutionConfig, ResolutionCoordinator, Resolver, ScriptedResolver,
};
pub use store::{FileStat, StoreError, VirtualDocumentStore, WriteOutcome};
pub use tracker::{ConflictRecord, ConflictTracker};
