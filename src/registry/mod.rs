#[cfg(test)]
pub mod mock;
mod oci;

#[cfg(test)]
pub use mock::{Endpoint, MockRegistry};
pub use oci::{OciRegistry, RegistryCredentials, RegistryTimeouts};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Registry host that serves Docker Hub's v2 API
pub const DOCKER_HUB_HOST: &str = "registry-1.docker.io";

/// Hostnames users write for Docker Hub
const DOCKER_HUB_ALIASES: &[&str] = &["docker.io", "index.docker.io", DOCKER_HUB_HOST];

/// True when `host` is absent or names Docker Hub
pub fn is_docker_hub(host: Option<&str>) -> bool {
    host.is_none_or(|h| DOCKER_HUB_ALIASES.contains(&h))
}

/// Low-level failure of a registry call, classified by cause.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Registry requires authentication (HTTP 401)")]
    Unauthorized,

    #[error("Access denied by registry (HTTP 403)")]
    Forbidden,

    #[error("Not found (HTTP 404): {0}")]
    NotFound(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Rate limited by registry (HTTP 429)")]
    RateLimited,

    #[error("Registry server error (HTTP {status})")]
    ServerError { status: u16 },

    #[error("Unexpected HTTP status {status}")]
    UnexpectedStatus { status: u16 },

    #[error("Malformed response body: {message}")]
    MalformedBody { message: String, body: String },

    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),
}

impl RegistryError {
    /// Classify a non-success HTTP status
    pub fn from_status(status: reqwest::StatusCode, url: &str) -> Self {
        match status.as_u16() {
            401 => RegistryError::Unauthorized,
            403 => RegistryError::Forbidden,
            404 => RegistryError::NotFound(url.to_string()),
            408 => RegistryError::Timeout(format!("HTTP 408 from {url}")),
            429 => RegistryError::RateLimited,
            code @ 500..=599 => RegistryError::ServerError { status: code },
            code => RegistryError::UnexpectedStatus { status: code },
        }
    }

    /// Failures worth retrying: timeouts, dropped connections, 5xx and 429
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RegistryError::Timeout(_)
                | RegistryError::ConnectionFailed(_)
                | RegistryError::RateLimited
                | RegistryError::ServerError { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RegistryError::NotFound(_))
    }

}

impl From<reqwest::Error> for RegistryError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RegistryError::Timeout(e.to_string())
        } else if e.is_connect() {
            RegistryError::ConnectionFailed(e.to_string())
        } else if e.is_decode() {
            RegistryError::MalformedBody {
                message: e.to_string(),
                body: String::new(),
            }
        } else {
            RegistryError::Network(e)
        }
    }
}

/// Metadata returned by a blob HEAD request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlobInfo {
    /// `Last-Modified` header, when present and parseable
    pub last_modified: Option<DateTime<Utc>>,
}

/// The registry operations the update checker consumes.
#[async_trait]
pub trait Registry: Send + Sync {
    /// All tags of a repository, across every page
    async fn list_tags(&self, repository: &str) -> Result<Vec<String>, RegistryError>;

    /// Content digest a tag currently points at; `None` when the registry
    /// does not expose one
    async fn digest(&self, repository: &str, tag: &str) -> Result<Option<String>, RegistryError>;

    async fn head_blob(&self, repository: &str, digest: &str) -> Result<BlobInfo, RegistryError>;

    /// Hostname used in error messages
    fn host(&self) -> &str;

    fn is_docker_hub(&self) -> bool {
        is_docker_hub(Some(self.host()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_is_docker_hub() {
        assert!(is_docker_hub(None));
        assert!(is_docker_hub(Some("docker.io")));
        assert!(is_docker_hub(Some("registry-1.docker.io")));
        assert!(!is_docker_hub(Some("ghcr.io")));
        assert!(!is_docker_hub(Some("registry.example.com:5000")));
    }

    #[test]
    fn test_from_status_classification() {
        let url = "https://r.example/v2/app/tags/list";
        assert!(matches!(
            RegistryError::from_status(StatusCode::UNAUTHORIZED, url),
            RegistryError::Unauthorized
        ));
        assert!(matches!(
            RegistryError::from_status(StatusCode::FORBIDDEN, url),
            RegistryError::Forbidden
        ));
        assert!(matches!(
            RegistryError::from_status(StatusCode::NOT_FOUND, url),
            RegistryError::NotFound(_)
        ));
        assert!(matches!(
            RegistryError::from_status(StatusCode::REQUEST_TIMEOUT, url),
            RegistryError::Timeout(_)
        ));
        assert!(matches!(
            RegistryError::from_status(StatusCode::TOO_MANY_REQUESTS, url),
            RegistryError::RateLimited
        ));
        assert!(matches!(
            RegistryError::from_status(StatusCode::SERVICE_UNAVAILABLE, url),
            RegistryError::ServerError { status: 503 }
        ));
        assert!(matches!(
            RegistryError::from_status(StatusCode::IM_A_TEAPOT, url),
            RegistryError::UnexpectedStatus { status: 418 }
        ));
    }

    #[test]
    fn test_transient_classification() {
        assert!(RegistryError::ServerError { status: 502 }.is_transient());
        assert!(RegistryError::RateLimited.is_transient());
        assert!(RegistryError::Timeout("read".into()).is_transient());
        assert!(RegistryError::ConnectionFailed("reset".into()).is_transient());
        assert!(!RegistryError::Unauthorized.is_transient());
        assert!(!RegistryError::NotFound("x".into()).is_transient());
        assert!(
            !RegistryError::MalformedBody {
                message: "eof".into(),
                body: String::new()
            }
            .is_transient()
        );
    }
}
