//! Candidate filter stages.
//!
//! Each stage takes the previous stage's output. They run in the order they
//! appear here and the order matters: prerelease detection and ignore rules
//! only ever see tags that are already comparable and not downgrades.

use crate::components::{ComponentMatcher, compatible_components, identify_common_components};
use crate::error::{DockerError, Result};
use crate::ignore::IgnoreRule;
use crate::tag::{ComparableVersion, Tag};

/// Tags of the same shape and flavor as `current`.
///
/// Flavor is inferred from components that recur across the whole tag list,
/// so `18-alpine` is not offered for `18-slim`.
pub fn comparable_candidates(tags: &[Tag], current: &Tag) -> Vec<Tag> {
    let names: Vec<&str> = tags.iter().map(Tag::name).collect();
    let matcher = ComponentMatcher::new(&identify_common_components(names.as_slice()));
    let current_components = matcher.extract(current.name());

    tags.iter()
        .filter(|tag| tag.is_comparable_to(current))
        .filter(|tag| {
            current_components.is_empty()
                || compatible_components(&matcher.extract(tag.name()), &current_components)
        })
        .cloned()
        .collect()
}

/// Drop tags whose version is below `current`'s.
pub fn remove_downgrades(candidates: Vec<Tag>, current: &Tag) -> Vec<Tag> {
    let Some(floor) = current.comparable_version() else {
        return candidates;
    };
    candidates
        .into_iter()
        .filter(|tag| tag.comparable_version().is_some_and(|v| v >= floor))
        .collect()
}

/// A tag is a prerelease when it looks like one, or when it is newer than
/// what `latest` points at.
pub fn is_prerelease(tag: &Tag, latest_version: Option<&ComparableVersion>) -> bool {
    if tag.looks_like_prerelease() {
        return true;
    }
    match (tag.comparable_version(), latest_version) {
        (Some(version), Some(latest)) => &version > latest,
        _ => false,
    }
}

/// Drop prereleases unless `current` is one itself.
pub fn remove_prereleases(
    candidates: Vec<Tag>,
    current: &Tag,
    latest_version: Option<&ComparableVersion>,
) -> Vec<Tag> {
    if is_prerelease(current, latest_version) {
        return candidates;
    }
    candidates
        .into_iter()
        .filter(|tag| !is_prerelease(tag, latest_version))
        .collect()
}

/// Tags strictly above `current`.
fn higher_than<'a>(tags: &'a [Tag], current: &Tag) -> impl Iterator<Item = &'a Tag> {
    let floor = current.comparable_version();
    tags.iter().filter(move |tag| match (&floor, tag.comparable_version()) {
        (Some(floor), Some(version)) => &version > floor,
        _ => false,
    })
}

/// How the ignore stage reacts when rules swallow every upgrade.
#[derive(Debug, Clone, Copy)]
pub struct IgnorePolicy<'a> {
    pub rules: &'a [IgnoreRule],
    /// Raise instead of silently reporting no update
    pub raise_on_ignored: bool,
    pub dependency: &'a str,
}

/// Drop tags whose version any ignore rule matches.
///
/// With `raise_on_ignored`, removing every tag that was above `current` is an
/// [`DockerError::AllVersionsIgnored`] error.
pub fn filter_ignored(
    candidates: Vec<Tag>,
    current: &Tag,
    policy: IgnorePolicy<'_>,
) -> Result<Vec<Tag>> {
    if policy.rules.is_empty() {
        return Ok(candidates);
    }

    let had_upgrade = higher_than(&candidates, current).next().is_some();
    let filtered: Vec<Tag> = candidates
        .into_iter()
        .filter(|tag| {
            tag.comparable_version()
                .is_none_or(|v| !policy.rules.iter().any(|rule| rule.is_satisfied_by(&v)))
        })
        .collect();

    if policy.raise_on_ignored && had_upgrade && higher_than(&filtered, current).next().is_none() {
        return Err(DockerError::AllVersionsIgnored {
            dependency: policy.dependency.to_string(),
        });
    }

    Ok(filtered)
}

/// Ascending by version; on equal versions a tag with `current`'s precision
/// sorts last, so it wins.
pub fn sort_candidates(mut candidates: Vec<Tag>, current: &Tag) -> Vec<Tag> {
    candidates.sort_by_cached_key(|tag| {
        (tag.comparable_version(), tag.has_same_precision(current))
    });
    candidates
}

pub fn same_precision(candidates: &[Tag], current: &Tag) -> Vec<Tag> {
    candidates
        .iter()
        .filter(|tag| tag.has_same_precision(current))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(names: &[&str]) -> Vec<Tag> {
        names.iter().map(|n| Tag::new(*n)).collect()
    }

    fn names(tags: &[Tag]) -> Vec<&str> {
        tags.iter().map(Tag::name).collect()
    }

    fn v(s: &str) -> ComparableVersion {
        ComparableVersion::parse(s).unwrap()
    }

    #[test]
    fn test_comparable_candidates_keep_flavor() {
        let all = tags(&[
            "18-alpine",
            "18-slim",
            "19-alpine",
            "19-slim",
            "20-alpine",
            "20-slim",
            "20",
            "latest",
        ]);
        let current = Tag::new("18-slim");
        assert_eq!(
            names(&comparable_candidates(&all, &current)),
            vec!["18-slim", "19-slim", "20-slim"]
        );
    }

    #[test]
    fn test_comparable_candidates_without_components() {
        let all = tags(&["1.2.3", "1.2.4", "1.3", "1.3-alpine", "latest", "nightly"]);
        let current = Tag::new("1.2.3");
        assert_eq!(
            names(&comparable_candidates(&all, &current)),
            vec!["1.2.3", "1.2.4", "1.3"]
        );
    }

    #[test]
    fn test_remove_downgrades() {
        let current = Tag::new("1.2.3");
        let kept = remove_downgrades(tags(&["1.1", "1.2.2", "1.2.3", "1.2.4", "2"]), &current);
        assert_eq!(names(&kept), vec!["1.2.3", "1.2.4", "2"]);

        // Idempotent
        let again = remove_downgrades(kept.clone(), &current);
        assert_eq!(again, kept);
    }

    #[test]
    fn test_is_prerelease() {
        assert!(is_prerelease(&Tag::new("1.3.0rc1"), None));
        assert!(!is_prerelease(&Tag::new("1.3.0"), None));

        let latest = v("1.2.5");
        assert!(is_prerelease(&Tag::new("1.3.0"), Some(&latest)));
        assert!(!is_prerelease(&Tag::new("1.2.5"), Some(&latest)));
    }

    #[test]
    fn test_remove_prereleases() {
        let candidates = tags(&["1.2.3", "1.2.4", "1.3.0rc1"]);
        let kept = remove_prereleases(candidates.clone(), &Tag::new("1.2.3"), None);
        assert_eq!(names(&kept), vec!["1.2.3", "1.2.4"]);

        // Ahead of latest counts as a prerelease
        let latest = v("1.2.3");
        let kept = remove_prereleases(candidates.clone(), &Tag::new("1.2.3"), Some(&latest));
        assert_eq!(names(&kept), vec!["1.2.3"]);
    }

    #[test]
    fn test_prerelease_current_keeps_everything() {
        let candidates = tags(&["1.3.0rc1", "1.3.0rc2", "1.3.0"]);
        let kept = remove_prereleases(candidates.clone(), &Tag::new("1.3.0rc1"), None);
        assert_eq!(kept, candidates);
    }

    fn policy<'a>(rules: &'a [IgnoreRule], raise_on_ignored: bool) -> IgnorePolicy<'a> {
        IgnorePolicy {
            rules,
            raise_on_ignored,
            dependency: "app",
        }
    }

    #[test]
    fn test_filter_ignored() {
        let rules = [IgnoreRule::parse(">= 1.2.5").unwrap()];
        let kept = filter_ignored(
            tags(&["1.2.3", "1.2.4", "1.2.5"]),
            &Tag::new("1.2.3"),
            policy(&rules, true),
        )
        .unwrap();
        assert_eq!(names(&kept), vec!["1.2.3", "1.2.4"]);
    }

    #[test]
    fn test_filter_ignored_all_upgrades() {
        let rules = [IgnoreRule::parse("> 1.2.3").unwrap()];
        let candidates = tags(&["1.2.3", "1.2.4", "1.2.5"]);
        let current = Tag::new("1.2.3");

        let kept = filter_ignored(candidates.clone(), &current, policy(&rules, false)).unwrap();
        assert_eq!(names(&kept), vec!["1.2.3"]);

        assert!(matches!(
            filter_ignored(candidates, &current, policy(&rules, true)),
            Err(DockerError::AllVersionsIgnored { ref dependency }) if dependency == "app"
        ));
    }

    #[test]
    fn test_filter_ignored_no_upgrade_to_lose() {
        // Nothing above current to begin with, so nothing was "ignored away"
        let rules = [IgnoreRule::parse("> 1.0").unwrap()];
        let kept =
            filter_ignored(tags(&["1.2.3"]), &Tag::new("1.2.3"), policy(&rules, true)).unwrap();
        assert!(kept.is_empty());
    }

    #[test]
    fn test_sort_by_version_regardless_of_precision() {
        let current = Tag::new("1.2");
        let sorted = sort_candidates(tags(&["1.10", "1.2.3", "1.3", "1.2", "1.9.9"]), &current);
        assert_eq!(names(&sorted), vec!["1.2", "1.2.3", "1.3", "1.9.9", "1.10"]);
    }

    #[test]
    fn test_sort_prefers_current_precision_on_ties() {
        let current = Tag::new("1.2");
        let sorted = sort_candidates(tags(&["1.3", "1.3.0"]), &current);
        assert_eq!(names(&sorted), vec!["1.3.0", "1.3"]);

        let current = Tag::new("1.2.0");
        let sorted = sort_candidates(tags(&["1.3.0", "1.3"]), &current);
        assert_eq!(names(&sorted), vec!["1.3", "1.3.0"]);
    }

    #[test]
    fn test_same_precision() {
        let current = Tag::new("1.2");
        let kept = same_precision(&tags(&["1.2", "1.2.3", "1.3", "2"]), &current);
        assert_eq!(names(&kept), vec!["1.2", "1.3"]);
    }
}
