//! Update checker for a single image dependency.
//!
//! [`UpdateChecker`] answers three questions about one image: what the best
//! tag is, whether the pinned tag/digest is already there, and what each
//! requirement should be rewritten to. Resolution runs the tag list through
//! the stages in [`filter`], the optional cooldown and the digest
//! reconciliation, caching every registry answer in a [`ResolutionSession`].

pub mod filter;
pub mod reconcile;
pub(crate) mod session;

pub use session::{LATEST_TAG, ResolutionSession};

use crate::cooldown::{CooldownOptions, apply_cooldown};
use crate::error::Result;
use crate::ignore::IgnoreRule;
use crate::registry::Registry;
use crate::requirement::{Dependency, Requirement};
use crate::retry::RetryPolicy;
use crate::tag::Tag;
use chrono::{DateTime, Utc};
use filter::IgnorePolicy;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Where a resolution currently stands; reported in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionStage {
    Idle,
    FetchingTags,
    AnalyzingComponents,
    Filtering,
    CooldownCheck,
    DigestReconciliation,
    Resolved,
    NoUpdateFound,
}

impl fmt::Display for ResolutionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResolutionStage::Idle => "idle",
            ResolutionStage::FetchingTags => "fetching tags",
            ResolutionStage::AnalyzingComponents => "analyzing components",
            ResolutionStage::Filtering => "filtering",
            ResolutionStage::CooldownCheck => "cooldown check",
            ResolutionStage::DigestReconciliation => "digest reconciliation",
            ResolutionStage::Resolved => "resolved",
            ResolutionStage::NoUpdateFound => "no update found",
        };
        f.write_str(name)
    }
}

pub struct UpdateChecker {
    dependency: Dependency,
    session: ResolutionSession,
    ignore_rules: Vec<IgnoreRule>,
    cooldown: Option<CooldownOptions>,
    raise_on_ignored: bool,
    now: Option<DateTime<Utc>>,
    stage: ResolutionStage,
    /// Resolved tag per starting version
    resolved: HashMap<String, Tag>,
}

impl UpdateChecker {
    pub fn new(dependency: Dependency, registry: Arc<dyn Registry>) -> Self {
        let session = ResolutionSession::new(registry, dependency.name.clone());
        Self {
            dependency,
            session,
            ignore_rules: Vec::new(),
            cooldown: None,
            raise_on_ignored: false,
            now: None,
            stage: ResolutionStage::Idle,
            resolved: HashMap::new(),
        }
    }

    pub fn with_ignore_rules(mut self, rules: Vec<IgnoreRule>) -> Self {
        self.ignore_rules = rules;
        self
    }

    pub fn with_cooldown(mut self, options: CooldownOptions) -> Self {
        self.cooldown = Some(options);
        self
    }

    /// Fail with `AllVersionsIgnored` instead of reporting no update when
    /// ignore rules remove every upgrade
    pub fn with_raise_on_ignored(mut self, raise: bool) -> Self {
        self.raise_on_ignored = raise;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.session = self.session.with_retry_policy(retry);
        self
    }

    /// Fix the clock used for cooldown windows
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    pub fn stage(&self) -> ResolutionStage {
        self.stage
    }

    fn enter(&mut self, stage: ResolutionStage) {
        debug!(
            dependency = %self.dependency.name,
            from = %self.stage,
            to = %stage,
            "resolution stage"
        );
        self.stage = stage;
    }

    /// Name of the best tag for the current version
    pub async fn latest_version(&mut self) -> Result<String> {
        let version = self.dependency.version.clone();
        Ok(self.latest_tag_from(&version).await?.name().to_string())
    }

    /// Same as [`Self::latest_version`]; images have no separate resolvability check
    pub async fn latest_resolvable_version(&mut self) -> Result<String> {
        self.latest_version().await
    }

    /// Digest the dependency should be pinned to after updating
    pub async fn updated_digest(&mut self) -> Result<Option<String>> {
        let version = self.dependency.version.clone();
        let latest = self.latest_tag_from(&version).await?;
        if latest.is_digest() {
            self.session.latest_digest().await
        } else {
            self.session.digest_of(latest.name()).await
        }
    }

    /// Current when the tag cannot move forward and, if any requirement pins a
    /// digest, every pinned digest already equals the updated one.
    pub async fn is_up_to_date(&mut self) -> Result<bool> {
        if !self.version_up_to_date().await? {
            return Ok(false);
        }
        if self.dependency.digest_requirements().next().is_none() {
            return Ok(true);
        }
        self.digest_up_to_date().await
    }

    pub async fn can_update(&mut self) -> Result<bool> {
        Ok(!self.is_up_to_date().await?)
    }

    async fn version_up_to_date(&mut self) -> Result<bool> {
        let current = Tag::new(self.dependency.version.clone());
        let Some(current_version) = current.comparable_version() else {
            return Ok(true);
        };
        let version = self.dependency.version.clone();
        let latest = self.latest_tag_from(&version).await?;
        Ok(latest
            .comparable_version()
            .is_none_or(|latest| latest <= current_version))
    }

    async fn digest_up_to_date(&mut self) -> Result<bool> {
        let Some(updated) = self.updated_digest().await? else {
            return Ok(true);
        };
        Ok(self
            .dependency
            .digest_requirements()
            .all(|r| r.source.digest.as_deref() == Some(updated.as_str())))
    }

    /// Requirements rewritten to the resolved tag and digest.
    ///
    /// A requirement naming a tag moves to the resolved tag, refreshing its
    /// digest if it pinned one. A digest-only requirement follows `latest`.
    pub async fn updated_requirements(&mut self) -> Result<Vec<Requirement>> {
        let mut updated = Vec::with_capacity(self.dependency.requirements.len());

        for requirement in self.dependency.requirements.clone() {
            let mut requirement = requirement;
            let source = &mut requirement.source;

            if source.tag.is_some() {
                let latest = self.latest_version().await?;
                if source.digest.is_some() {
                    source.digest = self.session.digest_of(&latest).await?;
                }
                source.tag = Some(latest);
            } else if source.digest.is_some() {
                source.digest = self.session.digest_of(LATEST_TAG).await?;
            }

            updated.push(requirement);
        }

        Ok(updated)
    }

    async fn latest_tag_from(&mut self, version: &str) -> Result<Tag> {
        if let Some(tag) = self.resolved.get(version) {
            return Ok(tag.clone());
        }
        let tag = self.resolve(version).await?;
        self.resolved.insert(version.to_string(), tag.clone());
        Ok(tag)
    }

    async fn resolve(&mut self, version: &str) -> Result<Tag> {
        let current = Tag::new(version);

        if current.is_digest() {
            self.enter(ResolutionStage::FetchingTags);
            if let Some(digest) = self.session.latest_digest().await? {
                self.enter(ResolutionStage::Resolved);
                info!(dependency = %self.dependency.name, %digest, "digest pin follows latest");
                return Ok(Tag::new(digest));
            }
        }
        if !current.is_comparable() {
            self.enter(ResolutionStage::NoUpdateFound);
            debug!(
                dependency = %self.dependency.name,
                tag = %current,
                "tag has no comparable version"
            );
            return Ok(current);
        }

        self.enter(ResolutionStage::FetchingTags);
        let tags = self.session.tags().await?;

        self.enter(ResolutionStage::AnalyzingComponents);
        let candidates = filter::comparable_candidates(&tags, &current);

        self.enter(ResolutionStage::Filtering);
        let candidates = filter::remove_downgrades(candidates, &current);
        let latest_version = self.session.version_of_latest_tag().await?;
        let candidates = filter::remove_prereleases(candidates, &current, latest_version.as_ref());
        let candidates = filter::filter_ignored(
            candidates,
            &current,
            IgnorePolicy {
                rules: &self.ignore_rules,
                raise_on_ignored: self.raise_on_ignored
                    && !self.dependency.has_digest_only_requirement(),
                dependency: &self.dependency.name,
            },
        )?;
        let mut candidates = filter::sort_candidates(candidates, &current);

        if let Some(options) = self.cooldown.clone()
            && options.applies_to(&self.dependency.name)
        {
            self.enter(ResolutionStage::CooldownCheck);
            let now = self.now.unwrap_or_else(Utc::now);
            candidates =
                apply_cooldown(&mut self.session, candidates, &current, &options, now).await;
        }

        let Some(latest) = candidates.last().cloned() else {
            self.enter(ResolutionStage::NoUpdateFound);
            return Ok(current);
        };

        let latest = if latest.has_same_precision(&current) {
            latest
        } else {
            self.enter(ResolutionStage::DigestReconciliation);
            reconcile::reconcile(&mut self.session, &candidates, latest, &current).await?
        };

        if latest == current {
            self.enter(ResolutionStage::NoUpdateFound);
        } else {
            self.enter(ResolutionStage::Resolved);
            info!(
                dependency = %self.dependency.name,
                from = %current,
                to = %latest,
                "found newer tag"
            );
        }
        Ok(latest)
    }
}
