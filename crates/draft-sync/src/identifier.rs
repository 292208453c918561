//! Resource identifiers and the virtual document URI codec.
//!
//! A document is addressed by a `ResourceIdentifier` (group, artifact, version)
//! plus a `ResourceState` tag. Together they encode into a virtual URI:
//!
//! ```text
//! registry:/group/<groupId>/artifact/<artifactId>/version/<version>?state=<STATE>
//! ```
//!
//! Each path component is percent-encoded, including `/` and spaces, so the
//! path shape is always exactly six segments.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

/// URI scheme used for virtual documents.
pub const SCHEME: &str = "registry";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("Invalid scheme in {0}: expected 'registry:'")]
    InvalidScheme(String),

    #[error("Invalid path in {0}: expected /group/<g>/artifact/<a>/version/<v>")]
    InvalidPath(String),

    #[error("Invalid percent-encoding in {0}")]
    InvalidEncoding(String),

    #[error("Missing state query parameter in {0}")]
    MissingState(String),

    #[error("Unknown resource state: {0}")]
    UnknownState(String),
}

/// Identifies one versioned document on the remote registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceIdentifier {
    pub group_id: String,
    pub artifact_id: String,
    pub version: String,
}

impl ResourceIdentifier {
    pub fn new(
        group_id: impl Into<String>,
        artifact_id: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            artifact_id: artifact_id.into(),
            version: version.into(),
        }
    }
}

impl Display for ResourceIdentifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.group_id, self.artifact_id, self.version)
    }
}

/// Lifecycle state of a resource version. Only `Draft` content is mutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceState {
    Draft,
    Enabled,
    Disabled,
    Deprecated,
}

impl ResourceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceState::Draft => "DRAFT",
            ResourceState::Enabled => "ENABLED",
            ResourceState::Disabled => "DISABLED",
            ResourceState::Deprecated => "DEPRECATED",
        }
    }

    /// Whether content in this state may be written.
    pub fn is_mutable(&self) -> bool {
        matches!(self, ResourceState::Draft)
    }
}

impl Display for ResourceState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceState {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(ResourceState::Draft),
            "ENABLED" => Ok(ResourceState::Enabled),
            "DISABLED" => Ok(ResourceState::Disabled),
            "DEPRECATED" => Ok(ResourceState::Deprecated),
            other => Err(KeyError::UnknownState(other.to_string())),
        }
    }
}

/// A decoded virtual document key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentLocation {
    pub identifier: ResourceIdentifier,
    pub state: ResourceState,
}

/// Canonical string form of `(ResourceIdentifier, ResourceState)`.
///
/// Used as the cache and tracking key. Two keys are equal iff their strings are
/// equal. A key may hold any string (editors hand us whatever URI they have);
/// decoding is a separate, fallible step.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VirtualDocumentKey(String);

impl VirtualDocumentKey {
    /// Encode an identifier and state into a key.
    pub fn build(identifier: &ResourceIdentifier, state: ResourceState) -> Self {
        Self(format!(
            "{SCHEME}:/group/{}/artifact/{}/version/{}?state={}",
            urlencoding::encode(&identifier.group_id),
            urlencoding::encode(&identifier.artifact_id),
            urlencoding::encode(&identifier.version),
            state
        ))
    }

    /// Wrap a raw URI string without validating it.
    pub fn from_uri(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decode the key back into its identifier and state.
    pub fn decode(&self) -> Result<DocumentLocation, KeyError> {
        let rest = self
            .0
            .strip_prefix(SCHEME)
            .and_then(|r| r.strip_prefix(':'))
            .ok_or_else(|| KeyError::InvalidScheme(self.0.clone()))?;

        let (path, query) = match rest.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (rest, None),
        };

        let segments: Vec<&str> = path.split('/').collect();
        let &[empty, "group", group, "artifact", artifact, "version", version] = segments.as_slice()
        else {
            return Err(KeyError::InvalidPath(self.0.clone()));
        };
        if !empty.is_empty() {
            return Err(KeyError::InvalidPath(self.0.clone()));
        }

        let identifier = ResourceIdentifier {
            group_id: self.decode_component(group)?,
            artifact_id: self.decode_component(artifact)?,
            version: self.decode_component(version)?,
        };

        let state = query
            .and_then(state_param)
            .ok_or_else(|| KeyError::MissingState(self.0.clone()))?
            .parse()?;

        Ok(DocumentLocation { identifier, state })
    }

    /// The state tag alone, if the query carries a recognizable one.
    ///
    /// Used for permission checks that must not depend on the path being valid.
    pub fn state(&self) -> Option<ResourceState> {
        let (_, query) = self.0.split_once('?')?;
        state_param(query)?.parse().ok()
    }

    fn decode_component(&self, raw: &str) -> Result<String, KeyError> {
        urlencoding::decode(raw)
            .map(|s| s.into_owned())
            .map_err(|_| KeyError::InvalidEncoding(self.0.clone()))
    }
}

fn state_param(query: &str) -> Option<&str> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(name, _)| *name == "state")
        .map(|(_, value)| value)
}

impl Display for VirtualDocumentKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for VirtualDocumentKey {
    type Err = KeyError;

    /// Parse and validate a URI. Use `from_uri` to skip validation.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = Self(s.to_string());
        key.decode()?;
        Ok(key)
    }
}
