//! Resolution protocol: turns a conflict check into a write clearance.
//!
//! For every write attempt the coordinator runs:
//!
//! 1. CheckingConflict: ask the tracker whether the remote moved on
//! 2. NoConflict: clearance granted
//! 3. ConflictDetected: ask the resolver what to do with the `ConflictRecord`
//!    - ViewDiff shows both snapshots and asks again
//!    - Overwrite needs a second confirmation
//!    - Discard hands the remote snapshot back to the caller for a reload
//!    - Cancel (or dismissal) aborts
//! 4. CheckFailed: ask the resolver to Retry (back to 1), Force Save, or Cancel
//!
//! The loop only advances on a fresh human decision. A round is one conflict
//! check or one ViewDiff repeat; `ResolutionConfig::max_rounds` caps how many
//! rounds one write may take, and the resolver is told when the cap is hit.

use crate::identifier::{ResourceIdentifier, VirtualDocumentKey};
use crate::remote::{RemoteClient, RemoteError};
use crate::tracker::{ConflictRecord, ConflictTracker};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Answer to a detected conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictChoice {
    Overwrite,
    Discard,
    Cancel,
    ViewDiff,
}

/// Answer to "really overwrite the remote changes?"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Yes,
    No,
}

/// Answer to a failed conflict check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckFailureChoice {
    Retry,
    ForceSave,
    Cancel,
}

/// Answer to a save rejected because the version is no longer a draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImmutableStateChoice {
    CreateNewDraft,
    Discard,
    Cancel,
}

/// Human-facing decisions the engine needs.
///
/// Returning `None` means the prompt was dismissed, which is always treated as
/// Cancel.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve_conflict(&self, record: &ConflictRecord) -> Option<ConflictChoice>;

    /// Present local and remote snapshots side by side.
    async fn show_diff(&self, record: &ConflictRecord);

    async fn confirm_overwrite(&self, record: &ConflictRecord) -> Option<Confirmation>;

    async fn resolve_check_failure(
        &self,
        identifier: &ResourceIdentifier,
        error: &RemoteError,
    ) -> Option<CheckFailureChoice>;

    async fn resolve_immutable_state(
        &self,
        identifier: &ResourceIdentifier,
        error: &RemoteError,
    ) -> Option<ImmutableStateChoice>;

    /// One-shot notification that a save failed.
    async fn report_failure(&self, identifier: &ResourceIdentifier, error: &RemoteError);
}

#[async_trait]
impl<T: Resolver + ?Sized> Resolver for std::sync::Arc<T> {
    async fn resolve_conflict(&self, record: &ConflictRecord) -> Option<ConflictChoice> {
        (**self).resolve_conflict(record).await
    }

    async fn show_diff(&self, record: &ConflictRecord) {
        (**self).show_diff(record).await
    }

    async fn confirm_overwrite(&self, record: &ConflictRecord) -> Option<Confirmation> {
        (**self).confirm_overwrite(record).await
    }

    async fn resolve_check_failure(
        &self,
        identifier: &ResourceIdentifier,
        error: &RemoteError,
    ) -> Option<CheckFailureChoice> {
        (**self).resolve_check_failure(identifier, error).await
    }

    async fn resolve_immutable_state(
        &self,
        identifier: &ResourceIdentifier,
        error: &RemoteError,
    ) -> Option<ImmutableStateChoice> {
        (**self).resolve_immutable_state(identifier, error).await
    }

    async fn report_failure(&self, identifier: &ResourceIdentifier, error: &RemoteError) {
        (**self).report_failure(identifier, error).await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionConfig {
    /// Maximum rounds (conflict checks plus ViewDiff repeats) a single write
    /// may take before it is aborted.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
}

fn default_max_rounds() -> usize {
    100
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
        }
    }
}

/// Terminal outcome of the protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Clearance {
    /// Write may proceed. `verified` is false after a Force Save.
    Proceed { verified: bool },
    /// User chose the remote version; reload it instead of writing.
    Reload(ConflictRecord),
    /// Write must not happen.
    Abort,
}

/// A clearance plus the number of rounds it took to reach it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub clearance: Clearance,
    /// Conflict checks run plus ViewDiff answers given. 1 for a clean save;
    /// ViewDiff, ViewDiff, Cancel after one check is 3.
    pub rounds: usize,
}

pub struct ResolutionCoordinator<P: Resolver> {
    resolver: P,
    config: ResolutionConfig,
}

impl<P: Resolver> ResolutionCoordinator<P> {
    pub fn new(resolver: P) -> Self {
        Self::with_config(resolver, ResolutionConfig::default())
    }

    pub fn with_config(resolver: P, config: ResolutionConfig) -> Self {
        Self { resolver, config }
    }

    pub fn resolver(&self) -> &P {
        &self.resolver
    }

    /// Run the protocol for one write attempt of `local_content` to `key`.
    pub async fn clear_for_write<R: RemoteClient + ?Sized>(
        &self,
        tracker: &ConflictTracker,
        remote: &R,
        key: &VirtualDocumentKey,
        identifier: &ResourceIdentifier,
        local_content: &[u8],
    ) -> Resolution {
        let mut rounds = 0;

        let record = loop {
            rounds += 1;
            if rounds > self.config.max_rounds {
                return self.give_up(identifier, rounds - 1).await;
            }

            match tracker
                .check_for_conflict(remote, key, identifier, local_content)
                .await
            {
                Ok(None) => {
                    return Resolution {
                        clearance: Clearance::Proceed { verified: true },
                        rounds,
                    };
                }
                Ok(Some(record)) => break record,
                Err(error) => {
                    warn!("Conflict check for {} failed: {}", identifier, error);
                    let choice = self
                        .resolver
                        .resolve_check_failure(identifier, &error)
                        .await
                        .unwrap_or(CheckFailureChoice::Cancel);
                    match choice {
                        CheckFailureChoice::Retry => {
                            debug!("Retrying conflict check for {}", identifier);
                            continue;
                        }
                        CheckFailureChoice::ForceSave => {
                            info!("Force saving {} without a conflict check", identifier);
                            return Resolution {
                                clearance: Clearance::Proceed { verified: false },
                                rounds,
                            };
                        }
                        CheckFailureChoice::Cancel => {
                            return Resolution {
                                clearance: Clearance::Abort,
                                rounds,
                            };
                        }
                    }
                }
            }
        };

        loop {
            let choice = self
                .resolver
                .resolve_conflict(&record)
                .await
                .unwrap_or(ConflictChoice::Cancel);

            let clearance = match choice {
                ConflictChoice::ViewDiff => {
                    self.resolver.show_diff(&record).await;
                    rounds += 1;
                    if rounds > self.config.max_rounds {
                        return self.give_up(identifier, rounds - 1).await;
                    }
                    continue;
                }
                ConflictChoice::Overwrite => match self.resolver.confirm_overwrite(&record).await {
                    Some(Confirmation::Yes) => {
                        info!("Overwriting remote changes to {}", identifier);
                        Clearance::Proceed { verified: true }
                    }
                    _ => Clearance::Abort,
                },
                ConflictChoice::Discard => {
                    info!("Discarding local changes to {}", identifier);
                    Clearance::Reload(record)
                }
                ConflictChoice::Cancel => Clearance::Abort,
            };

            return Resolution { clearance, rounds };
        }
    }

    async fn give_up(&self, identifier: &ResourceIdentifier, rounds: usize) -> Resolution {
        warn!(
            "Giving up on saving {} after {} rounds without a decision",
            identifier, rounds
        );
        let error = RemoteError::Other(format!("gave up after {} rounds", rounds));
        self.resolver.report_failure(identifier, &error).await;
        Resolution {
            clearance: Clearance::Abort,
            rounds,
        }
    }
}

/// Resolver that replays scripted answers, for tests and non-interactive use.
///
/// An exhausted script behaves like a dismissed prompt.
#[derive(Default)]
pub struct ScriptedResolver {
    conflict: Mutex<VecDeque<ConflictChoice>>,
    confirm: Mutex<VecDeque<Confirmation>>,
    check_failure: Mutex<VecDeque<CheckFailureChoice>>,
    immutable: Mutex<VecDeque<ImmutableStateChoice>>,
    log: Mutex<Vec<Prompt>>,
}

/// A prompt the `ScriptedResolver` was asked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prompt {
    Conflict(ConflictRecord),
    Diff(ConflictRecord),
    ConfirmOverwrite,
    CheckFailure(RemoteError),
    ImmutableState(RemoteError),
    Failure(RemoteError),
}

impl ScriptedResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_conflict(self, choices: impl IntoIterator<Item = ConflictChoice>) -> Self {
        self.conflict.lock().unwrap().extend(choices);
        self
    }

    pub fn on_confirm(self, answers: impl IntoIterator<Item = Confirmation>) -> Self {
        self.confirm.lock().unwrap().extend(answers);
        self
    }

    pub fn on_check_failure(self, choices: impl IntoIterator<Item = CheckFailureChoice>) -> Self {
        self.check_failure.lock().unwrap().extend(choices);
        self
    }

    pub fn on_immutable_state(self, choices: impl IntoIterator<Item = ImmutableStateChoice>) -> Self {
        self.immutable.lock().unwrap().extend(choices);
        self
    }

    /// Every prompt shown so far, in order.
    pub fn prompts(&self) -> Vec<Prompt> {
        self.log.lock().unwrap().clone()
    }

    fn record(&self, prompt: Prompt) {
        self.log.lock().unwrap().push(prompt);
    }
}

#[async_trait]
impl Resolver for ScriptedResolver {
    async fn resolve_conflict(&self, record: &ConflictRecord) -> Option<ConflictChoice> {
        self.record(Prompt::Conflict(record.clone()));
        self.conflict.lock().unwrap().pop_front()
    }

    async fn show_diff(&self, record: &ConflictRecord) {
        self.record(Prompt::Diff(record.clone()));
    }

    async fn confirm_overwrite(&self, _record: &ConflictRecord) -> Option<Confirmation> {
        self.record(Prompt::ConfirmOverwrite);
        self.confirm.lock().unwrap().pop_front()
    }

    async fn resolve_check_failure(
        &self,
        _identifier: &ResourceIdentifier,
        error: &RemoteError,
    ) -> Option<CheckFailureChoice> {
        self.record(Prompt::CheckFailure(error.clone()));
        self.check_failure.lock().unwrap().pop_front()
    }

    async fn resolve_immutable_state(
        &self,
        _identifier: &ResourceIdentifier,
        error: &RemoteError,
    ) -> Option<ImmutableStateChoice> {
        self.record(Prompt::ImmutableState(error.clone()));
        self.immutable.lock().unwrap().pop_front()
    }

    async fn report_failure(&self, _identifier: &ResourceIdentifier, error: &RemoteError) {
        self.record(Prompt::Failure(error.clone()));
    }
}
