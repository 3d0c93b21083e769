//! Release cooldown: hold back tags younger than a configured age.

use crate::checker::session::ResolutionSession;
use crate::tag::Tag;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Cooldown policy, usually read from the `[cooldown]` config table.
///
/// Only `default_days` drives the engine today. The per-semver-level windows
/// are parsed and reported but not yet applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CooldownOptions {
    pub default_days: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semver_major_days: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semver_minor_days: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semver_patch_days: Option<u32>,
    /// Dependency name patterns (`*` wildcards) the cooldown is limited to
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,
    /// Dependency name patterns exempt from the cooldown
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
}

impl CooldownOptions {
    pub fn new(default_days: u32) -> Self {
        Self {
            default_days,
            ..Self::default()
        }
    }

    /// Exclusions win; an empty include list covers every dependency.
    pub fn applies_to(&self, dependency: &str) -> bool {
        if self.exclude.iter().any(|p| matches_pattern(p, dependency)) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|p| matches_pattern(p, dependency))
    }

    /// Window for moving from `current` to `candidate`, by which version
    /// segment changed. Falls back to `default_days` for unset levels.
    pub fn days_for(&self, current: &Tag, candidate: &Tag) -> u32 {
        let (Some(current), Some(candidate)) =
            (current.comparable_version(), candidate.comparable_version())
        else {
            return self.default_days;
        };
        let current = current.numeric_segments();
        let candidate = candidate.numeric_segments();
        let segment = |v: &[u64], i: usize| v.get(i).copied().unwrap_or(0);

        let level = if segment(&current, 0) != segment(&candidate, 0) {
            self.semver_major_days
        } else if segment(&current, 1) != segment(&candidate, 1) {
            self.semver_minor_days
        } else {
            self.semver_patch_days
        };
        level.unwrap_or(self.default_days)
    }
}

/// Simple glob matching with `*` as the only wildcard.
pub fn matches_pattern(pattern: &str, name: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == name;
    }

    let (first, last) = (parts[0], parts[parts.len() - 1]);
    if !name.starts_with(first) || name.len() < first.len() + last.len() {
        return false;
    }
    let mut rest = &name[first.len()..];
    for part in &parts[1..parts.len() - 1] {
        match rest.find(part) {
            Some(i) => rest = &rest[i + part.len()..],
            None => return false,
        }
    }
    rest.ends_with(last)
}

/// When a tag's image was published, as far as the registry can tell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublicationRecord {
    pub version: String,
    pub released_at: Option<DateTime<Utc>>,
    pub yanked: bool,
    pub latest: bool,
}

impl PublicationRecord {
    pub fn new(version: impl Into<String>, released_at: Option<DateTime<Utc>>) -> Self {
        Self {
            version: version.into(),
            released_at,
            yanked: false,
            latest: false,
        }
    }
}

/// True while `released_at` is less than `days` old at `now`.
pub fn is_cooling(released_at: DateTime<Utc>, days: u32, now: DateTime<Utc>) -> bool {
    match now.checked_sub_signed(TimeDelta::days(i64::from(days))) {
        Some(cutoff) => released_at > cutoff,
        None => true,
    }
}

/// Walk `candidates` (sorted ascending) from the top and keep the first tag
/// that is old enough. Tags without a known release date are passed over.
pub(crate) async fn apply_cooldown(
    session: &mut ResolutionSession,
    candidates: Vec<Tag>,
    current: &Tag,
    options: &CooldownOptions,
    now: DateTime<Utc>,
) -> Vec<Tag> {
    let days = options.default_days;

    for tag in candidates.into_iter().rev() {
        let record = session.publication_of(&tag).await;
        let Some(released_at) = record.released_at else {
            debug!(tag = %tag, "no release date, skipping");
            continue;
        };

        if is_cooling(released_at, days, now) {
            debug!(
                tag = %tag,
                %released_at,
                window_days = days,
                level_days = options.days_for(current, &tag),
                "tag still cooling down"
            );
            continue;
        }
        return vec![tag];
    }

    Vec::new()
}
