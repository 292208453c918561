//! One interactive edit of a remote draft through a local scratch file.
//!
//! The draft is read through the store, written to a temp file and handed to
//! the editor. When the editor exits, changes are saved through the store,
//! which runs conflict detection and resolution. A reload reopens the editor
//! on the remote version.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use draft_sync::{
    RemoteClient, ResourceState, Resolver, StoreError, VirtualDocumentKey, VirtualDocumentStore,
    WriteOutcome,
};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Something that lets a human edit a file in place.
#[async_trait]
pub trait Editor: Send + Sync {
    /// Returns once the user is done editing `path`.
    async fn edit(&self, path: &Path) -> Result<()>;
}

/// Runs an external editor command (e.g. `vi`, `code --wait`).
pub struct CommandEditor {
    command: String,
}

impl CommandEditor {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl Editor for CommandEditor {
    async fn edit(&self, path: &Path) -> Result<()> {
        let mut parts = self.command.split_whitespace();
        let program = parts.next().context("Editor command is empty")?;
        debug!("Launching {} on {}", self.command, path.display());

        let status = tokio::process::Command::new(program)
            .args(parts)
            .arg(path)
            .status()
            .await
            .with_context(|| format!("Failed to launch editor {:?}", self.command))?;
        if !status.success() {
            bail!("Editor {:?} exited with {}", self.command, status);
        }
        Ok(())
    }
}

/// How an edit session finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The editor exited without changes.
    Unchanged,
    Saved { verified: bool },
    /// The draft is gone and local changes were discarded.
    Closed,
    /// Changes were saved as a new draft.
    NewDraft { key: VirtualDocumentKey },
    /// The save was abandoned; the edited content is kept at `kept`.
    NotSaved { kept: PathBuf },
}

pub struct EditSession<'a, R: RemoteClient, P: Resolver, E: Editor> {
    store: &'a VirtualDocumentStore<R, P>,
    editor: E,
}

impl<'a, R: RemoteClient, P: Resolver, E: Editor> EditSession<'a, R, P, E> {
    pub fn new(store: &'a VirtualDocumentStore<R, P>, editor: E) -> Self {
        Self { store, editor }
    }

    pub async fn run(&self, key: &VirtualDocumentKey) -> Result<SessionEnd> {
        if key.state() != Some(ResourceState::Draft) {
            bail!("{} is not a draft and cannot be edited", key);
        }

        let mut original = self
            .store
            .read(key)
            .await
            .with_context(|| format!("Failed to open {}", key))?;

        let file = tempfile::Builder::new()
            .prefix("draft-")
            .suffix(suffix_for(&original))
            .tempfile()
            .context("Failed to create scratch file")?;
        tokio::fs::write(file.path(), &original).await?;

        loop {
            self.editor.edit(file.path()).await?;
            let edited = tokio::fs::read(file.path())
                .await
                .context("Failed to read back the edited file")?;

            if edited == original {
                info!("No changes to {}", key);
                return Ok(SessionEnd::Unchanged);
            }

            match self.store.write(key, &edited).await {
                Ok(WriteOutcome::Saved { verified }) => return Ok(SessionEnd::Saved { verified }),
                Ok(WriteOutcome::Reloaded) => {
                    original = self.store.read(key).await?;
                    tokio::fs::write(file.path(), &original).await?;
                    info!("Reopening {} with the remote version", key);
                }
                Ok(WriteOutcome::Closed) => return Ok(SessionEnd::Closed),
                Ok(WriteOutcome::NewDraft { key }) => return Ok(SessionEnd::NewDraft { key }),
                Err(StoreError::Unavailable(reason)) => {
                    warn!("{} not saved: {}", key, reason);
                    let (_, kept) = file.keep().context("Failed to keep the scratch file")?;
                    return Ok(SessionEnd::NotSaved { kept });
                }
                Err(e) => return Err(e).with_context(|| format!("Failed to save {}", key)),
            }
        }
    }
}

/// Scratch file extension so editors pick a sensible syntax mode.
fn suffix_for(content: &[u8]) -> &'static str {
    match content.iter().find(|b| !b.is_ascii_whitespace()) {
        Some(b'{') | Some(b'[') => ".json",
        Some(b'<') => ".xml",
        _ => ".txt",
    }
}
