//! Mock registry for testing the checker without network calls.

use super::{BlobInfo, Registry, RegistryError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Registry operation, for scripting failures and counting calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    ListTags,
    Digest,
    HeadBlob,
}

/// An in-memory registry serving one repository's tags.
pub struct MockRegistry {
    host: String,
    tags: Vec<String>,
    /// Tag name to manifest digest
    digests: HashMap<String, String>,
    /// Digest to `Last-Modified`
    releases: HashMap<String, DateTime<Utc>>,
    /// Errors returned, in order, before an endpoint starts answering
    failures: Mutex<HashMap<Endpoint, VecDeque<RegistryError>>>,
    calls: Mutex<HashMap<Endpoint, usize>>,
}

impl Default for MockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRegistry {
    pub fn new() -> Self {
        Self {
            host: "registry.example.com".to_string(),
            tags: Vec::new(),
            digests: HashMap::new(),
            releases: HashMap::new(),
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags.extend(tags.iter().map(|t| t.to_string()));
        self
    }

    pub fn with_digest(mut self, tag: &str, digest: &str) -> Self {
        self.digests.insert(tag.to_string(), digest.to_string());
        self
    }

    /// Give a digest a `Last-Modified` timestamp.
    pub fn with_release(mut self, digest: &str, released_at: DateTime<Utc>) -> Self {
        self.releases.insert(digest.to_string(), released_at);
        self
    }

    /// Queue an error for the next call to `endpoint`.
    pub fn with_failure(self, endpoint: Endpoint, error: RegistryError) -> Self {
        self.failures
            .lock()
            .unwrap()
            .entry(endpoint)
            .or_default()
            .push_back(error);
        self
    }

    pub fn call_count(&self, endpoint: Endpoint) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(&endpoint)
            .copied()
            .unwrap_or(0)
    }

    fn record(&self, endpoint: Endpoint) -> Result<(), RegistryError> {
        *self.calls.lock().unwrap().entry(endpoint).or_default() += 1;
        match self
            .failures
            .lock()
            .unwrap()
            .get_mut(&endpoint)
            .and_then(VecDeque::pop_front)
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Registry for MockRegistry {
    async fn list_tags(&self, _repository: &str) -> Result<Vec<String>, RegistryError> {
        self.record(Endpoint::ListTags)?;
        Ok(self.tags.clone())
    }

    async fn digest(&self, repository: &str, tag: &str) -> Result<Option<String>, RegistryError> {
        self.record(Endpoint::Digest)?;
        match self.digests.get(tag) {
            Some(digest) => Ok(Some(digest.clone())),
            None if self.tags.iter().any(|t| t == tag) => Ok(None),
            None => Err(RegistryError::NotFound(format!("{repository}:{tag}"))),
        }
    }

    async fn head_blob(&self, _repository: &str, digest: &str) -> Result<BlobInfo, RegistryError> {
        self.record(Endpoint::HeadBlob)?;
        Ok(BlobInfo {
            last_modified: self.releases.get(digest).copied(),
        })
    }

    fn host(&self) -> &str {
        &self.host
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_mock_registry_basic() {
        let registry = MockRegistry::new()
            .with_tags(&["1.0", "1.1", "latest"])
            .with_digest("latest", "sha256:aaa");

        assert_eq!(
            registry.list_tags("app").await.unwrap(),
            vec!["1.0", "1.1", "latest"]
        );
        assert_eq!(
            registry.digest("app", "latest").await.unwrap().as_deref(),
            Some("sha256:aaa")
        );
        assert_eq!(registry.digest("app", "1.0").await.unwrap(), None);
        assert!(
            registry
                .digest("app", "9.9")
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn test_mock_registry_scripted_failures() {
        let registry = MockRegistry::new()
            .with_tags(&["1.0"])
            .with_failure(Endpoint::ListTags, RegistryError::ServerError { status: 503 })
            .with_failure(Endpoint::ListTags, RegistryError::RateLimited);

        assert!(registry.list_tags("app").await.is_err());
        assert!(registry.list_tags("app").await.is_err());
        assert!(registry.list_tags("app").await.is_ok());
        assert_eq!(registry.call_count(Endpoint::ListTags), 3);
        assert_eq!(registry.call_count(Endpoint::Digest), 0);
    }

    #[tokio::test]
    async fn test_mock_registry_release() {
        let released = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let registry = MockRegistry::new().with_release("sha256:aaa", released);

        let info = registry.head_blob("app", "sha256:aaa").await.unwrap();
        assert_eq!(info.last_modified, Some(released));
        let info = registry.head_blob("app", "sha256:bbb").await.unwrap();
        assert_eq!(info.last_modified, None);
    }
}
