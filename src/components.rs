//! Flavor inference over a repository's tag list.
//!
//! Images publish the same version under several flavors (`18-alpine`,
//! `18-slim`, `18-bookworm`). The analyzer counts tokens across every tag in
//! the repository and keeps the ones that recur but do not look like version
//! material; those are the decorative components a candidate must share with
//! the current tag.

use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

/// A token must appear in at least this many distinct tags to count as common
const MIN_OCCURRENCES: usize = 2;

const VERSION_PLACEHOLDER: &str = "\u{0}version\u{0}";

static BUILD_SUFFIXED_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9]+\.[0-9]+\.[0-9]+_[0-9]+").expect("valid regex"));
static TOKEN_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[-./]").expect("valid regex"));

static PURE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]+$").expect("valid regex"));
static MAJOR_MINOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]+\.[0-9]+$").expect("valid regex"));
static V_PREFIXED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^v[0-9]+(?:\.[0-9]+)*$").expect("valid regex"));
static GIT_SHA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^g[0-9a-f]{5,}$").expect("valid regex"));
static TIMESTAMP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{8,14}$").expect("valid regex"));
static UNDERSCORE_PAIR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9]+_[0-9]+").expect("valid regex"));

/// True for tokens that carry version information rather than flavor
fn is_version_shaped(token: &str) -> bool {
    let lower = token.to_ascii_lowercase();
    if lower == "rc" || lower == "jre" {
        return true;
    }

    let has_letter = token.chars().any(|c| c.is_ascii_alphabetic());
    let has_digit = token.chars().any(|c| c.is_ascii_digit());

    PURE_NUMBER.is_match(token)
        || MAJOR_MINOR.is_match(token)
        || V_PREFIXED.is_match(&lower)
        || (has_letter && has_digit)
        || GIT_SHA.is_match(&lower)
        || TIMESTAMP.is_match(token)
        || UNDERSCORE_PAIR.is_match(token)
}

fn tokenize(tag: &str) -> BTreeSet<String> {
    let normalized = BUILD_SUFFIXED_VERSION.replace_all(tag, VERSION_PLACEHOLDER);
    TOKEN_SEPARATOR
        .split(&normalized)
        .filter(|t| !t.is_empty() && *t != VERSION_PLACEHOLDER)
        .map(str::to_string)
        .collect()
}

/// Tokens that recur across `tags` and are judged not version-bearing.
pub fn identify_common_components<S: AsRef<str>>(tags: &[S]) -> BTreeSet<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for tag in tags {
        for token in tokenize(tag.as_ref()) {
            *counts.entry(token).or_default() += 1;
        }
    }

    counts
        .into_iter()
        .filter(|(token, count)| {
            *count >= MIN_OCCURRENCES && token.len() > 1 && !is_version_shaped(token)
        })
        .map(|(token, _)| token)
        .collect()
}

/// Whole-word matchers for a repository's common components, compiled once
/// and reused for every tag.
#[derive(Debug, Clone)]
pub struct ComponentMatcher {
    components: Vec<(String, Regex)>,
}

impl ComponentMatcher {
    pub fn new(common_components: &BTreeSet<String>) -> Self {
        let components = common_components
            .iter()
            .filter_map(|component| {
                Regex::new(&format!(r"\b{}\b", regex::escape(component)))
                    .ok()
                    .map(|re| (component.clone(), re))
            })
            .collect();
        Self { components }
    }

    /// Which of the common components occur in `tag_name` as whole words.
    pub fn extract(&self, tag_name: &str) -> BTreeSet<String> {
        self.components
            .iter()
            .filter(|(_, re)| re.is_match(tag_name))
            .map(|(component, _)| component.clone())
            .collect()
    }
}

/// Two component sets are compatible iff they hold the same components.
pub fn compatible_components(a: &BTreeSet<String>, b: &BTreeSet<String>) -> bool {
    a == b
}
