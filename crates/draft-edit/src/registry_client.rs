//! RemoteClient over the registry REST API (v3 layout).
//!
//! Endpoints, relative to the configured base URL:
//! - `GET  /groups/{g}/artifacts/{a}/versions/{v}/content` - raw content
//! - `GET  /groups/{g}/artifacts/{a}/versions/{v}` - version metadata
//! - `PUT  /groups/{g}/artifacts/{a}/versions/{v}/content` - update a draft
//! - `POST /groups/{g}/artifacts/{a}/versions` - create a version

use async_trait::async_trait;
use draft_sync::remote::Result;
use draft_sync::{RemoteClient, RemoteContent, RemoteError, ResourceIdentifier, ResourceMetadata};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

const DEFAULT_CONTENT_TYPE: &str = "application/json";

pub struct HttpRegistryClient {
    client: Client,
    base_url: String,
    /// Content type last seen per version, sent back on update
    content_types: Mutex<HashMap<ResourceIdentifier, String>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VersionContent<'a> {
    content: &'a str,
    content_type: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateVersion<'a> {
    content: VersionContent<'a>,
    is_draft: bool,
}

#[derive(Deserialize)]
struct CreatedVersion {
    version: String,
}

impl HttpRegistryClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Other(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            content_types: Mutex::new(HashMap::new()),
        })
    }

    fn artifact_url(&self, identifier: &ResourceIdentifier) -> String {
        format!(
            "{}/groups/{}/artifacts/{}",
            self.base_url,
            urlencoding::encode(&identifier.group_id),
            urlencoding::encode(&identifier.artifact_id)
        )
    }

    fn version_url(&self, identifier: &ResourceIdentifier) -> String {
        format!(
            "{}/versions/{}",
            self.artifact_url(identifier),
            urlencoding::encode(&identifier.version)
        )
    }

    fn content_type(&self, identifier: &ResourceIdentifier) -> String {
        self.content_types
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(identifier)
            .cloned()
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string())
    }

    /// Turn a non-success response into a classified error.
    async fn check(response: Response, identifier: &ResourceIdentifier) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        debug!("Registry answered {} for {}: {}", status, identifier, body);
        Err(classify_status(status, identifier, &body))
    }
}

/// Map an HTTP status to the error taxonomy.
pub fn classify_status(status: StatusCode, identifier: &ResourceIdentifier, body: &str) -> RemoteError {
    let detail = if body.trim().is_empty() {
        format!("{} ({})", identifier, status)
    } else {
        format!("{} ({}): {}", identifier, status, body.trim())
    };

    match status.as_u16() {
        404 | 410 => RemoteError::NotFound(detail),
        405 | 409 => RemoteError::ImmutableState(detail),
        408 | 429 | 500..=599 => RemoteError::Transport {
            message: detail,
            retryable: true,
        },
        _ => RemoteError::Other(detail),
    }
}

/// Map a reqwest failure (no usable response) to the error taxonomy.
fn classify_transport(error: reqwest::Error) -> RemoteError {
    if error.is_timeout() || error.is_connect() || error.is_request() {
        RemoteError::Transport {
            message: error.to_string(),
            retryable: true,
        }
    } else if error.is_decode() || error.is_body() {
        RemoteError::Transport {
            message: error.to_string(),
            retryable: false,
        }
    } else {
        RemoteError::Other(error.to_string())
    }
}

fn as_text(content: &[u8]) -> Result<&str> {
    std::str::from_utf8(content)
        .map_err(|_| RemoteError::Other("document content is not valid UTF-8".to_string()))
}

#[async_trait]
impl RemoteClient for HttpRegistryClient {
    async fn fetch_content(&self, identifier: &ResourceIdentifier) -> Result<RemoteContent> {
        let url = format!("{}/content", self.version_url(identifier));
        debug!("GET {}", url);
        let response = self.client.get(&url).send().await.map_err(classify_transport)?;
        let response = Self::check(response, identifier).await?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();
        let content = response.bytes().await.map_err(classify_transport)?.to_vec();

        self.content_types
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(identifier.clone(), content_type.clone());

        Ok(RemoteContent {
            content,
            content_type,
        })
    }

    async fn fetch_metadata(&self, identifier: &ResourceIdentifier) -> Result<ResourceMetadata> {
        let url = self.version_url(identifier);
        debug!("GET {}", url);
        let response = self.client.get(&url).send().await.map_err(classify_transport)?;
        let response = Self::check(response, identifier).await?;
        response
            .json::<ResourceMetadata>()
            .await
            .map_err(classify_transport)
    }

    async fn update_content(&self, identifier: &ResourceIdentifier, content: &[u8]) -> Result<()> {
        let url = format!("{}/content", self.version_url(identifier));
        let content_type = self.content_type(identifier);
        let body = VersionContent {
            content: as_text(content)?,
            content_type: &content_type,
        };
        debug!("PUT {} ({} bytes)", url, content.len());
        let response = self
            .client
            .put(&url)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;
        Self::check(response, identifier).await?;
        Ok(())
    }

    async fn create_draft(
        &self,
        identifier: &ResourceIdentifier,
        content: &[u8],
    ) -> Result<ResourceIdentifier> {
        let url = format!("{}/versions", self.artifact_url(identifier));
        let content_type = self.content_type(identifier);
        let body = CreateVersion {
            content: VersionContent {
                content: as_text(content)?,
                content_type: &content_type,
            },
            is_draft: true,
        };
        debug!("POST {}", url);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;
        let response = Self::check(response, identifier).await?;
        let created: CreatedVersion = response.json().await.map_err(classify_transport)?;

        let created = ResourceIdentifier::new(
            identifier.group_id.clone(),
            identifier.artifact_id.clone(),
            created.version,
        );
        self.content_types
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(created.clone(), content_type);
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> ResourceIdentifier {
        ResourceIdentifier::new("my group", "a/b", "1.0.0")
    }

    #[test]
    fn test_status_classification() {
        let classify = |code: u16| classify_status(StatusCode::from_u16(code).unwrap(), &id(), "");

        assert!(matches!(classify(404), RemoteError::NotFound(_)));
        assert!(matches!(classify(410), RemoteError::NotFound(_)));
        assert!(matches!(classify(405), RemoteError::ImmutableState(_)));
        assert!(matches!(classify(409), RemoteError::ImmutableState(_)));
        assert!(classify(503).is_retryable());
        assert!(classify(429).is_retryable());
        assert!(matches!(classify(400), RemoteError::Other(_)));
        assert!(matches!(classify(401), RemoteError::Other(_)));
    }

    #[test]
    fn test_status_detail_includes_body() {
        let err = classify_status(StatusCode::CONFLICT, &id(), " version is ENABLED ");
        assert_eq!(
            err,
            RemoteError::ImmutableState("my group/a/b@1.0.0 (409 Conflict): version is ENABLED".into())
        );
    }

    #[test]
    fn test_urls_encode_components() {
        let client =
            HttpRegistryClient::new("http://localhost:8080/apis/registry/v3/", Duration::from_secs(1))
                .unwrap();
        assert_eq!(
            client.version_url(&id()),
            "http://localhost:8080/apis/registry/v3/groups/my%20group/artifacts/a%2Fb/versions/1.0.0"
        );
    }

    #[test]
    fn test_unknown_content_type_defaults_to_json() {
        let client = HttpRegistryClient::new("http://localhost", Duration::from_secs(1)).unwrap();
        assert_eq!(client.content_type(&id()), "application/json");
    }

    #[test]
    fn test_metadata_parses_registry_json() {
        let json = r#"{
            "groupId": "my group",
            "artifactId": "a/b",
            "version": "1.0.0",
            "name": "Orders",
            "state": "DRAFT",
            "modifiedBy": "alice",
            "modifiedOn": "2024-05-01T10:11:12.345Z",
            "globalId": 12
        }"#;
        let metadata: ResourceMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(metadata.state, Some(draft_sync::ResourceState::Draft));
        assert_eq!(
            metadata.modified_on.unwrap().timestamp_millis() % 1000,
            345
        );
    }

    #[test]
    fn test_update_body_shape() {
        let body = VersionContent {
            content: "{}",
            content_type: "application/json",
        };
        let json = serde_json::to_string(&CreateVersion {
            content: body,
            is_draft: true,
        })
        .unwrap();
        assert_eq!(
            json,
            r#"{"content":{"content":"{}","contentType":"application/json"},"isDraft":true}"#
        );
    }

    #[test]
    fn test_non_utf8_content_rejected() {
        assert!(matches!(as_text(&[0xff, 0xfe]), Err(RemoteError::Other(_))));
    }
}
