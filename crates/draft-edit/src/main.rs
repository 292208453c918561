//! draft-edit: Edit registry drafts from the terminal.
//!
//! Reads go through the same document store an editor integration would use,
//! so saves get conflict detection against other clients editing the draft.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use draft_edit::session::CommandEditor;
use draft_edit::{Config, EditSession, HttpRegistryClient, SessionEnd, TerminalResolver};
use draft_sync::{ResourceIdentifier, ResourceState, VirtualDocumentKey, VirtualDocumentStore};

#[derive(Parser, Debug)]
#[command(name = "draft-edit")]
#[command(about = "Edit registry drafts with conflict detection")]
struct Args {
    /// Registry API base URL (overrides DRAFT_REGISTRY_URL)
    #[arg(long, global = true)]
    registry: Option<String>,

    /// Enable verbose logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the virtual URI for a version
    Uri {
        group: String,
        artifact: String,
        version: String,
        /// DRAFT, ENABLED, DISABLED or DEPRECATED
        #[arg(long, default_value = "DRAFT")]
        state: String,
    },
    /// Decode a virtual URI
    Parse { uri: String },
    /// Print a document's content
    Cat { uri: String },
    /// Open a draft in $EDITOR and save it back
    Edit {
        uri: String,
        /// Editor command (overrides VISUAL / EDITOR)
        #[arg(long)]
        editor: Option<String>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Respects RUST_LOG, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,draft_edit=debug,draft_sync=debug"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::from_env()?;
    if let Some(url) = &args.registry {
        config = config.with_registry_url(url)?;
    }
    debug!("Registry: {}", config.registry_url);

    match args.command {
        Command::Uri {
            group,
            artifact,
            version,
            state,
        } => {
            let state: ResourceState = state.parse()?;
            let id = ResourceIdentifier::new(group, artifact, version);
            println!("{}", VirtualDocumentKey::build(&id, state));
        }

        Command::Parse { uri } => {
            let location = VirtualDocumentKey::from_uri(uri).decode()?;
            println!("group:    {}", location.identifier.group_id);
            println!("artifact: {}", location.identifier.artifact_id);
            println!("version:  {}", location.identifier.version);
            println!("state:    {}", location.state);
        }

        Command::Cat { uri } => {
            let store = open_store(&config)?;
            let key = VirtualDocumentKey::from_uri(uri);
            let content = store.read(&key).await?;
            std::io::stdout()
                .write_all(&content)
                .context("Failed to write to stdout")?;
            store.dispose();
        }

        Command::Edit { uri, editor } => {
            let store = open_store(&config)?;
            let key = VirtualDocumentKey::from_uri(uri);
            let editor = CommandEditor::new(editor.unwrap_or_else(|| config.editor.clone()));

            let end = EditSession::new(&store, editor).run(&key).await;
            store.dispose();

            match end? {
                SessionEnd::Unchanged => info!("No changes"),
                SessionEnd::Saved { verified: true } => info!("Saved {}", key),
                SessionEnd::Saved { verified: false } => {
                    info!("Saved {} without checking for remote changes", key)
                }
                SessionEnd::Closed => info!("{} is no longer a draft; changes discarded", key),
                SessionEnd::NewDraft { key } => {
                    info!("Saved as a new draft");
                    println!("{}", key);
                }
                SessionEnd::NotSaved { kept } => {
                    anyhow::bail!("Not saved. Your edits are in {}", kept.display());
                }
            }
        }
    }

    Ok(())
}

fn open_store(config: &Config) -> Result<VirtualDocumentStore<HttpRegistryClient, TerminalResolver>> {
    let client = HttpRegistryClient::new(&config.registry_url, config.request_timeout)?;
    Ok(VirtualDocumentStore::with_config(
        client,
        TerminalResolver::stdio(),
        config.resolution.clone(),
    ))
}
