//! draft-edit library: the pieces behind the `draft-edit` binary.
//!
//! Exposed as a library so integration tests can drive them directly.

pub mod config;
pub mod prompt;
pub mod registry_client;
pub mod session;

pub use config::{Config, ConfigError};
pub use prompt::TerminalResolver;
pub use registry_client::HttpRegistryClient;
pub use session::{EditSession, SessionEnd};
