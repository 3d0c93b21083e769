//! Docker Registry HTTP API v2 client.
//!
//! Handles the parts of the distribution API the checker needs: paginated tag
//! listing, manifest digests and blob metadata, behind the bearer-token
//! challenge most registries (Docker Hub, GHCR, ECR...) answer with.

use super::{BlobInfo, DOCKER_HUB_HOST, Registry, RegistryError, is_docker_hub};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::header::{
    ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, LAST_MODIFIED, LINK, WWW_AUTHENTICATE,
};
use reqwest::{Client, Method, Response, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{LazyLock, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Tags requested per page of `/tags/list`
const PAGE_SIZE: usize = 1000;

/// Upper bound on followed `Link` pages, against registries that loop
const MAX_PAGES: usize = 500;

/// Default connect timeout for registry requests
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 2;

/// Default read timeout for registry requests
const DEFAULT_READ_TIMEOUT_SECS: u64 = 60;

pub const CONNECT_TIMEOUT_ENV: &str = "TAGUP_REGISTRY_CONNECT_TIMEOUT";
pub const READ_TIMEOUT_ENV: &str = "TAGUP_REGISTRY_READ_TIMEOUT";

/// Manifest media types accepted when resolving a tag's digest. Lists and
/// indexes come first so multi-arch images report their index digest.
const MANIFEST_ACCEPT: &str = "application/vnd.docker.distribution.manifest.list.v2+json, \
     application/vnd.oci.image.index.v1+json, \
     application/vnd.docker.distribution.manifest.v2+json, \
     application/vnd.oci.image.manifest.v1+json";

const DIGEST_HEADER: &str = "docker-content-digest";

/// Longest body excerpt kept on a malformed-response error
const BODY_EXCERPT_LEN: usize = 200;

static CHALLENGE_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(\w+)="([^"]*)""#).expect("valid regex"));
static NEXT_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<([^>]+)>\s*;\s*rel="?next"?"#).expect("valid regex"));

/// Username/password for a private registry
#[derive(Clone)]
pub struct RegistryCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl RegistryCredentials {
    fn basic_header(&self) -> Option<HeaderValue> {
        let encoded = BASE64.encode(format!("{}:{}", self.username, self.password));
        HeaderValue::from_str(&format!("Basic {}", encoded)).ok()
    }
}

/// Connect/read timeouts applied to every registry request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryTimeouts {
    pub connect: Duration,
    pub read: Duration,
}

impl Default for RegistryTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            read: Duration::from_secs(DEFAULT_READ_TIMEOUT_SECS),
        }
    }
}

impl RegistryTimeouts {
    /// Defaults overridden by `TAGUP_REGISTRY_CONNECT_TIMEOUT` /
    /// `TAGUP_REGISTRY_READ_TIMEOUT` (seconds)
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(self) -> Self {
        Self {
            connect: env_seconds(CONNECT_TIMEOUT_ENV).unwrap_or(self.connect),
            read: env_seconds(READ_TIMEOUT_ENV).unwrap_or(self.read),
        }
    }
}

fn env_seconds(var: &str) -> Option<Duration> {
    let value = std::env::var(var).ok().filter(|s| !s.is_empty())?;
    match value.trim().parse::<u64>() {
        Ok(secs) => Some(Duration::from_secs(secs)),
        Err(_) => {
            warn!(var, value = %value, "ignoring invalid timeout, expected whole seconds");
            None
        }
    }
}

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

/// Parameters of a `WWW-Authenticate: Bearer ...` challenge
#[derive(Debug, Clone, PartialEq, Eq)]
struct BearerChallenge {
    realm: String,
    service: Option<String>,
    scope: Option<String>,
}

impl BearerChallenge {
    fn parse(header: &str) -> Option<Self> {
        let (scheme, params) = header.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }

        let params: HashMap<String, String> = CHALLENGE_PARAM
            .captures_iter(params)
            .map(|c| (c[1].to_ascii_lowercase(), c[2].to_string()))
            .collect();

        Some(Self {
            realm: params.get("realm")?.clone(),
            service: params.get("service").cloned(),
            scope: params.get("scope").cloned(),
        })
    }
}

/// Extract the `rel="next"` target from a `Link` header
fn next_link(headers: &HeaderMap) -> Option<String> {
    let link = headers.get(LINK)?.to_str().ok()?;
    NEXT_LINK.captures(link).map(|c| c[1].to_string())
}

fn excerpt(body: &str) -> String {
    body.chars().take(BODY_EXCERPT_LEN).collect()
}

pub struct OciRegistry {
    client: Client,
    base_url: String,
    host: String,
    credentials: Option<RegistryCredentials>,
    token: Mutex<Option<String>>,
}

impl OciRegistry {
    /// Client for `host` over HTTPS; `None` means Docker Hub
    pub fn new(host: Option<&str>) -> Self {
        Self::for_host(host, None, RegistryTimeouts::from_env())
    }

    pub fn for_host(
        host: Option<&str>,
        credentials: Option<RegistryCredentials>,
        timeouts: RegistryTimeouts,
    ) -> Self {
        let host = if is_docker_hub(host) {
            DOCKER_HUB_HOST.to_string()
        } else {
            host.unwrap_or(DOCKER_HUB_HOST).to_string()
        };
        let base_url = format!("https://{}", host);
        Self::with_base_url_and_credentials(base_url, host, credentials, timeouts)
    }

    /// Client for an explicit base URL (e.g. `http://localhost:5000`)
    pub fn with_base_url_and_credentials(
        base_url: String,
        host: String,
        credentials: Option<RegistryCredentials>,
        timeouts: RegistryTimeouts,
    ) -> Self {
        let client = Client::builder()
            .gzip(true)
            .user_agent(concat!("tagup/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(timeouts.connect)
            .read_timeout(timeouts.read)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            host,
            credentials,
            token: Mutex::new(None),
        }
    }

    /// Official Docker Hub images live under `library/`
    fn repository_path(&self, repository: &str) -> String {
        if self.is_docker_hub() && !repository.contains('/') {
            format!("library/{}", repository)
        } else {
            repository.to_string()
        }
    }

    fn cached_token(&self) -> Option<String> {
        self.token.lock().ok().and_then(|t| t.clone())
    }

    fn store_token(&self, token: String) {
        if let Ok(mut slot) = self.token.lock() {
            *slot = Some(token);
        }
    }

    fn request(&self, method: Method, url: &str, accept: Option<&str>) -> reqwest::RequestBuilder {
        let mut request = self.client.request(method, url);
        if let Some(accept) = accept {
            request = request.header(ACCEPT, accept);
        }
        if let Some(token) = self.cached_token() {
            request = request.bearer_auth(token);
        } else if let Some(header) = self.credentials.as_ref().and_then(|c| c.basic_header()) {
            request = request.header(AUTHORIZATION, header);
        }
        request
    }

    /// Send a request, answering one bearer challenge if the registry issues it
    async fn send(
        &self,
        method: Method,
        url: &str,
        accept: Option<&str>,
    ) -> Result<Response, RegistryError> {
        let response = self.request(method.clone(), url, accept).send().await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Self::check_status(response, url);
        }

        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .and_then(BearerChallenge::parse);
        let Some(challenge) = challenge else {
            return Err(RegistryError::Unauthorized);
        };

        let token = self.fetch_token(&challenge).await?;
        self.store_token(token);

        let retried = self.request(method, url, accept).send().await?;
        Self::check_status(retried, url)
    }

    fn check_status(response: Response, url: &str) -> Result<Response, RegistryError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(RegistryError::from_status(status, url))
        }
    }

    async fn fetch_token(&self, challenge: &BearerChallenge) -> Result<String, RegistryError> {
        let mut params = Vec::new();
        if let Some(service) = &challenge.service {
            params.push(("service", service.as_str()));
        }
        if let Some(scope) = &challenge.scope {
            params.push(("scope", scope.as_str()));
        }
        let url = url::Url::parse_with_params(&challenge.realm, &params).map_err(|e| {
            RegistryError::MalformedBody {
                message: format!("invalid token realm '{}': {}", challenge.realm, e),
                body: String::new(),
            }
        })?;

        debug!(realm = %challenge.realm, scope = ?challenge.scope, "requesting registry token");

        let mut request = self.client.get(url.as_str());
        if let Some(header) = self.credentials.as_ref().and_then(|c| c.basic_header()) {
            request = request.header(AUTHORIZATION, header);
        }
        let response = Self::check_status(request.send().await?, url.as_str())?;
        let body = response.text().await?;
        let token: TokenResponse =
            serde_json::from_str(&body).map_err(|e| RegistryError::MalformedBody {
                message: e.to_string(),
                body: excerpt(&body),
            })?;

        token
            .token
            .or(token.access_token)
            .filter(|t| !t.is_empty())
            .ok_or(RegistryError::Unauthorized)
    }

    /// Resolve a `Link` target, which registries usually send relative
    fn resolve_link(&self, link: &str) -> String {
        if link.starts_with("http://") || link.starts_with("https://") {
            link.to_string()
        } else {
            format!("{}/{}", self.base_url, link.trim_start_matches('/'))
        }
    }
}

impl Default for OciRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl Registry for OciRegistry {
    async fn list_tags(&self, repository: &str) -> Result<Vec<String>, RegistryError> {
        let repository = self.repository_path(repository);
        let mut url = format!(
            "{}/v2/{}/tags/list?n={}",
            self.base_url, repository, PAGE_SIZE
        );
        let mut tags = Vec::new();

        for _ in 0..MAX_PAGES {
            let response = self.send(Method::GET, &url, None).await?;
            let next = next_link(response.headers());
            let body = response.text().await?;

            let page: TagList =
                serde_json::from_str(&body).map_err(|e| RegistryError::MalformedBody {
                    message: e.to_string(),
                    body: excerpt(&body),
                })?;
            tags.extend(page.tags.unwrap_or_default());

            match next {
                Some(link) => url = self.resolve_link(&link),
                None => return Ok(tags),
            }
        }

        warn!(repository = %repository, pages = MAX_PAGES, "stopped following tag pages");
        Ok(tags)
    }

    async fn digest(&self, repository: &str, tag: &str) -> Result<Option<String>, RegistryError> {
        let repository = self.repository_path(repository);
        let url = format!("{}/v2/{}/manifests/{}", self.base_url, repository, tag);
        let response = self.send(Method::HEAD, &url, Some(MANIFEST_ACCEPT)).await?;

        Ok(response
            .headers()
            .get(DIGEST_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string))
    }

    async fn head_blob(&self, repository: &str, digest: &str) -> Result<BlobInfo, RegistryError> {
        let repository = self.repository_path(repository);
        let url = format!("{}/v2/{}/blobs/{}", self.base_url, repository, digest);
        let response = self.send(Method::HEAD, &url, None).await?;

        let last_modified = response
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| DateTime::parse_from_rfc2822(v.trim()).ok())
            .map(|d| d.with_timezone(&Utc));

        Ok(BlobInfo { last_modified })
    }

    fn host(&self) -> &str {
        &self.host
    }
}
