//! Per-resolution state: every registry answer a checker has already paid for.
//!
//! A session belongs to exactly one [`super::UpdateChecker`]; nothing here is
//! shared across checkers, so concurrent resolutions never see each other's
//! caches.

use crate::cooldown::PublicationRecord;
use crate::error::{DockerError, Result};
use crate::registry::{Registry, RegistryError};
use crate::retry::{RetryOutcome, RetryPolicy};
use crate::tag::{ComparableVersion, Tag};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// The tag whose digest identifies the newest published image
pub const LATEST_TAG: &str = "latest";

pub struct ResolutionSession {
    registry: Arc<dyn Registry>,
    repository: String,
    retry: RetryPolicy,
    tags: Option<Vec<Tag>>,
    digests: HashMap<String, Option<String>>,
    publications: HashMap<String, PublicationRecord>,
    latest_tag_version: Option<Option<ComparableVersion>>,
}

impl ResolutionSession {
    pub fn new(registry: Arc<dyn Registry>, repository: impl Into<String>) -> Self {
        Self {
            registry,
            repository: repository.into(),
            retry: RetryPolicy::default(),
            tags: None,
            digests: HashMap::new(),
            publications: HashMap::new(),
            latest_tag_version: None,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Every tag in the repository, fetched once
    pub async fn tags(&mut self) -> Result<Vec<Tag>> {
        if let Some(tags) = &self.tags {
            return Ok(tags.clone());
        }

        let registry = Arc::clone(&self.registry);
        let repository = self.repository.clone();
        let outcome = self
            .retry
            .run(
                || registry.list_tags(&repository),
                RegistryError::is_transient,
            )
            .await;

        let names = match outcome {
            RetryOutcome::Success(names) => names,
            RetryOutcome::Exhausted { error, attempts } => {
                warn!(
                    repository = %self.repository,
                    attempts,
                    %error,
                    "listing tags failed after retries"
                );
                return Err(self.convert(error));
            }
            RetryOutcome::Failed(error) => return Err(self.convert(error)),
        };

        debug!(repository = %self.repository, count = names.len(), "fetched tags");
        let tags: Vec<Tag> = names.into_iter().map(Tag::new).collect();
        self.tags = Some(tags.clone());
        Ok(tags)
    }

    pub async fn has_tag(&mut self, name: &str) -> Result<bool> {
        Ok(self.tags().await?.iter().any(|t| t.name() == name))
    }

    /// Digest a tag points at, fetched at most once per tag.
    ///
    /// A tag the registry reports as missing is probed again like any
    /// transient failure and then treated as having no digest.
    pub async fn digest_of(&mut self, tag: &str) -> Result<Option<String>> {
        if let Some(digest) = self.digests.get(tag) {
            return Ok(digest.clone());
        }

        let registry = Arc::clone(&self.registry);
        let repository = self.repository.clone();
        let outcome = self
            .retry
            .run(
                || registry.digest(&repository, tag),
                |e: &RegistryError| e.is_transient() || e.is_not_found(),
            )
            .await;

        let digest = match outcome {
            RetryOutcome::Success(digest) => digest,
            RetryOutcome::Exhausted { error, .. } if error.is_not_found() => {
                debug!(repository = %self.repository, tag, "no manifest for tag");
                None
            }
            RetryOutcome::Exhausted { error, attempts } => {
                warn!(
                    repository = %self.repository,
                    tag,
                    attempts,
                    %error,
                    "digest lookup failed after retries"
                );
                return Err(self.convert(error));
            }
            RetryOutcome::Failed(error) => return Err(self.convert(error)),
        };

        self.digests.insert(tag.to_string(), digest.clone());
        Ok(digest)
    }

    /// Digest of the `latest` tag, when the repository has one
    pub async fn latest_digest(&mut self) -> Result<Option<String>> {
        if !self.has_tag(LATEST_TAG).await? {
            return Ok(None);
        }
        self.digest_of(LATEST_TAG).await
    }

    /// Version of the highest canonical tag sharing `latest`'s digest.
    ///
    /// Tags above it are newer than what the repository advertises as
    /// `latest` and are treated as pre-releases.
    pub async fn version_of_latest_tag(&mut self) -> Result<Option<ComparableVersion>> {
        if let Some(version) = &self.latest_tag_version {
            return Ok(version.clone());
        }

        let version = match self.latest_digest().await? {
            Some(latest) => {
                let mut canonical: Vec<(ComparableVersion, Tag)> = self
                    .tags()
                    .await?
                    .into_iter()
                    .filter(Tag::is_canonical)
                    .filter_map(|t| Some((t.comparable_version()?, t)))
                    .collect();
                canonical.sort_by(|a, b| b.0.cmp(&a.0));

                let mut found = None;
                for (version, tag) in canonical {
                    if self.digest_of(tag.name()).await?.as_deref() == Some(latest.as_str()) {
                        found = Some(version);
                        break;
                    }
                }
                found
            }
            None => None,
        };

        self.latest_tag_version = Some(version.clone());
        Ok(version)
    }

    /// Release timestamp of a tag, from the `Last-Modified` of its manifest
    /// blob. Lookup failures leave `released_at` empty instead of failing.
    pub async fn publication_of(&mut self, tag: &Tag) -> PublicationRecord {
        if let Some(record) = self.publications.get(tag.name()) {
            return record.clone();
        }

        let released_at = match self.digest_of(tag.name()).await {
            Ok(Some(digest)) => self.release_date(&digest).await,
            Ok(None) => None,
            Err(error) => {
                warn!(
                    repository = %self.repository,
                    tag = %tag,
                    %error,
                    "could not resolve digest for release date"
                );
                None
            }
        };

        let record = PublicationRecord::new(tag.name(), released_at);
        self.publications
            .insert(tag.name().to_string(), record.clone());
        record
    }

    async fn release_date(&self, digest: &str) -> Option<chrono::DateTime<chrono::Utc>> {
        let registry = Arc::clone(&self.registry);
        let outcome = self
            .retry
            .run(
                || registry.head_blob(&self.repository, digest),
                RegistryError::is_transient,
            )
            .await;

        match outcome.into_result() {
            Ok(blob) => blob.last_modified,
            Err(error) => {
                warn!(
                    repository = %self.repository,
                    digest,
                    %error,
                    "could not fetch blob metadata"
                );
                None
            }
        }
    }

    /// Map a registry failure to what the caller is told.
    ///
    /// Timeouts from Docker Hub are reported as bad responses; only private
    /// registries get the dedicated timeout error.
    fn convert(&self, error: RegistryError) -> DockerError {
        let registry = self.registry.host().to_string();
        match error {
            RegistryError::Unauthorized | RegistryError::Forbidden => {
                DockerError::PrivateSourceAuthenticationFailure { registry }
            }
            RegistryError::Timeout(_) if !self.registry.is_docker_hub() => {
                DockerError::PrivateSourceTimedOut { registry }
            }
            RegistryError::MalformedBody { message, body } => {
                DockerError::DependencyFileNotResolvable {
                    message: if body.is_empty() {
                        message
                    } else {
                        format!("{message} (response began: {body})")
                    },
                }
            }
            other => DockerError::BadResponse {
                registry,
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{DOCKER_HUB_HOST, Endpoint, MockRegistry};
    use chrono::{TimeZone, Utc};

    fn session(registry: MockRegistry) -> (Arc<MockRegistry>, ResolutionSession) {
        let registry = Arc::new(registry);
        let session = ResolutionSession::new(registry.clone(), "app");
        (registry, session)
    }

    #[tokio::test]
    async fn test_tags_are_fetched_once() {
        let (registry, mut session) = session(MockRegistry::new().with_tags(&["1.0", "1.1"]));

        assert_eq!(session.tags().await.unwrap().len(), 2);
        assert_eq!(session.tags().await.unwrap().len(), 2);
        assert_eq!(registry.call_count(Endpoint::ListTags), 1);
    }

    #[tokio::test]
    async fn test_tags_retry_transient_failures() {
        let (registry, mut session) = session(
            MockRegistry::new()
                .with_tags(&["1.0"])
                .with_failure(Endpoint::ListTags, RegistryError::ServerError { status: 503 })
                .with_failure(Endpoint::ListTags, RegistryError::ServerError { status: 503 }),
        );

        assert_eq!(session.tags().await.unwrap(), vec![Tag::new("1.0")]);
        assert_eq!(registry.call_count(Endpoint::ListTags), 3);
    }

    #[tokio::test]
    async fn test_auth_failure_is_not_retried() {
        let (registry, mut session) = session(
            MockRegistry::new()
                .with_tags(&["1.0"])
                .with_failure(Endpoint::ListTags, RegistryError::Unauthorized),
        );

        let err = session.tags().await.unwrap_err();
        assert!(matches!(
            err,
            DockerError::PrivateSourceAuthenticationFailure { ref registry }
                if registry == "registry.example.com"
        ));
        assert_eq!(registry.call_count(Endpoint::ListTags), 1);
    }

    #[tokio::test]
    async fn test_timeout_conversion_depends_on_registry() {
        let timeouts = || {
            MockRegistry::new()
                .with_failure(Endpoint::ListTags, RegistryError::Timeout("read".into()))
                .with_failure(Endpoint::ListTags, RegistryError::Timeout("read".into()))
                .with_failure(Endpoint::ListTags, RegistryError::Timeout("read".into()))
        };

        let (_, mut private) = session(timeouts());
        assert!(matches!(
            private.tags().await,
            Err(DockerError::PrivateSourceTimedOut { .. })
        ));

        let (_, mut hub) = session(timeouts().with_host(DOCKER_HUB_HOST));
        assert!(matches!(
            hub.tags().await,
            Err(DockerError::BadResponse { .. })
        ));
    }

    #[tokio::test]
    async fn test_malformed_body_is_not_resolvable() {
        let (_, mut session) = session(MockRegistry::new().with_failure(
            Endpoint::ListTags,
            RegistryError::MalformedBody {
                message: "expected value at line 1".into(),
                body: "<html>".into(),
            },
        ));

        let err = session.tags().await.unwrap_err();
        assert!(matches!(err, DockerError::DependencyFileNotResolvable { .. }));
        assert!(err.to_string().contains("<html>"));
    }

    #[tokio::test]
    async fn test_digest_not_found_becomes_none_after_probing() {
        let (registry, mut session) = session(MockRegistry::new().with_tags(&["1.0"]));

        assert_eq!(session.digest_of("9.9").await.unwrap(), None);
        assert_eq!(registry.call_count(Endpoint::Digest), 3);

        // Memoized, including the miss
        assert_eq!(session.digest_of("9.9").await.unwrap(), None);
        assert_eq!(registry.call_count(Endpoint::Digest), 3);
    }

    #[tokio::test]
    async fn test_latest_digest_requires_latest_tag() {
        let (_, mut without) = session(
            MockRegistry::new()
                .with_tags(&["1.0"])
                .with_digest("latest", "sha256:aaa"),
        );
        assert_eq!(without.latest_digest().await.unwrap(), None);

        let (_, mut with) = session(
            MockRegistry::new()
                .with_tags(&["1.0", "latest"])
                .with_digest("latest", "sha256:aaa"),
        );
        assert_eq!(
            with.latest_digest().await.unwrap().as_deref(),
            Some("sha256:aaa")
        );
    }

    #[tokio::test]
    async fn test_version_of_latest_tag() {
        let (_, mut session) = session(
            MockRegistry::new()
                .with_tags(&["1.0", "1.1", "1.2", "1.1-alpine", "latest"])
                .with_digest("latest", "sha256:bbb")
                .with_digest("1.2", "sha256:ccc")
                .with_digest("1.1", "sha256:bbb")
                .with_digest("1.1-alpine", "sha256:ddd")
                .with_digest("1.0", "sha256:aaa"),
        );

        let version = session.version_of_latest_tag().await.unwrap().unwrap();
        assert_eq!(version, ComparableVersion::parse("1.1").unwrap());
    }

    #[tokio::test]
    async fn test_publication_record_soft_failures() {
        let released = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let (registry, mut session) = session(
            MockRegistry::new()
                .with_tags(&["1.0", "1.1"])
                .with_digest("1.0", "sha256:aaa")
                .with_release("sha256:aaa", released)
                .with_failure(Endpoint::Digest, RegistryError::Forbidden),
        );

        // The forbidden digest lookup is swallowed
        let record = session.publication_of(&Tag::new("1.1")).await;
        assert_eq!(record.released_at, None);

        let record = session.publication_of(&Tag::new("1.0")).await;
        assert_eq!(record.version, "1.0");
        assert_eq!(record.released_at, Some(released));

        session.publication_of(&Tag::new("1.0")).await;
        assert_eq!(registry.call_count(Endpoint::HeadBlob), 1);
    }
}
