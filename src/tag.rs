//! Registry tag model.
//!
//! A [`Tag`] wraps a literal registry tag (`1.25.3-alpine`, `jdk-21`, `latest`, a
//! pinned digest...) and derives everything the resolution pipeline needs from
//! it: the version-bearing part, its prefix/suffix decoration, the numeric
//! precision and a [`ComparableVersion`] for ordering.

use regex::Regex;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::LazyLock;

/// Version body shared by the three tag shapes below.
///
/// The "words with build" branch (`-ea-32`, `-jdk-nanoserver-1809`) is matched
/// case-sensitively even though the rest of the pattern is not.
const VERSION_PATTERN: &str = r"v?(?P<version>[0-9]+(?:[_.][0-9]+)*(?:\.[a-z0-9]+|(?-i:(?:(?:-[a-z]+)+-[0-9]+)+)|-(?:kb)?[0-9]+)*)";

static VERSION_WITH_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)^(?P<prefix>[a-z][a-z0-9.\-_]*-)?{VERSION_PATTERN}$"
    ))
    .expect("valid prefix regex")
});

static VERSION_WITH_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)^{VERSION_PATTERN}(?P<suffix>-[a-z][a-z0-9.\-]*)?$"
    ))
    .expect("valid suffix regex")
});

static VERSION_WITH_PREFIX_AND_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)^(?P<prefix>[a-z\-_]+-)?{VERSION_PATTERN}(?P<suffix>-[a-z\-]+)?$"
    ))
    .expect("valid prefix/suffix regex")
});

static WORDS_WITH_BUILD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:(?:-[a-z]+)+-[0-9]+)+").expect("valid regex"));
static BUILD_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-[0-9]+").expect("valid regex"));
static SHA_SUFFIXED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|-g?)[0-9a-f]{7,}$").expect("valid regex"));
static YEAR_MONTH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[12][0-9]{3}(?:[.\-]|$)").expect("valid regex"));
static YEAR_MONTH_DAY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[12](?:[0-9]{5}|[0-9]{7})(?:[.\-]|$)").expect("valid regex"));
static BUILD_NUM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9]+$").expect("valid regex"));
static KB_MARKER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)kb").expect("valid regex"));
static WORD_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-[a-z]+").expect("valid regex"));
static DIGEST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:sha256:)?[0-9a-f]{64}$").expect("valid regex"));
static VERSION_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)[0-9]+|[a-z]+").expect("valid regex"));

/// Shape of a tag's version, used to refuse comparisons across schemes
/// (a date-stamped tag is never an upgrade for a semantic one).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagFormat {
    /// Ends in a (possibly `g`-prefixed) git sha: `1.2-g4f3a9c1`
    ShaSuffixed,
    /// `2023.04`, `2023-04-1`
    YearMonth,
    /// `20230412`, `202304.1`
    YearMonthDay,
    /// A bare build number: `42` (year-like numbers read as dates)
    BuildNum,
    /// `<version>-ea-<build_num>` style; carries the normalized word template
    WordsWithBuild(String),
    Normal,
}

#[derive(Debug, Clone)]
struct TagParts {
    prefix: Option<String>,
    version: String,
    suffix: Option<String>,
}

/// An immutable registry tag. Two tags are equal iff their names are equal.
#[derive(Debug, Clone)]
pub struct Tag {
    name: String,
    parts: Option<TagParts>,
}

impl Tag {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let parts = [
            &*VERSION_WITH_PREFIX,
            &*VERSION_WITH_SUFFIX,
            &*VERSION_WITH_PREFIX_AND_SUFFIX,
        ]
        .iter()
        .find_map(|re| re.captures(&name))
        .and_then(|caps| {
            Some(TagParts {
                prefix: caps.name("prefix").map(|m| m.as_str().to_string()),
                version: caps.name("version")?.as_str().to_string(),
                suffix: caps.name("suffix").map(|m| m.as_str().to_string()),
            })
        });

        Self { name, parts }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True when the tag is itself a content digest rather than a mutable name
    pub fn is_digest(&self) -> bool {
        DIGEST.is_match(&self.name)
    }

    /// True when a version could be extracted from the tag
    pub fn is_comparable(&self) -> bool {
        self.parts.is_some()
    }

    pub fn prefix(&self) -> Option<&str> {
        self.parts.as_ref()?.prefix.as_deref()
    }

    pub fn suffix(&self) -> Option<&str> {
        self.parts.as_ref()?.suffix.as_deref()
    }

    /// The raw version-bearing part of the tag (`1.2.3` in `v1.2.3-alpine`)
    pub fn version(&self) -> Option<&str> {
        self.parts.as_ref().map(|p| p.version.as_str())
    }

    /// The version with `kb` markers and word segments stripped, lowercased.
    ///
    /// `21-ea-32` becomes `21-32`, `10.0.17763.KB5005568` becomes `10.0.17763.5005568`.
    pub fn numeric_version(&self) -> Option<String> {
        let version = self.version()?;
        let without_kb = KB_MARKER.replace_all(version, "");
        let without_words = WORD_SEGMENT.replace_all(&without_kb, "");
        Some(without_words.to_lowercase())
    }

    pub fn segments(&self) -> Vec<String> {
        self.numeric_version()
            .map(|v| v.split(['.', '-']).map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Number of version segments: `1.2` is 2, `1.2.3` is 3
    pub fn precision(&self) -> usize {
        self.segments().len()
    }

    pub fn format(&self) -> TagFormat {
        if SHA_SUFFIXED.is_match(&self.name) {
            return TagFormat::ShaSuffixed;
        }
        let Some(version) = self.version() else {
            return TagFormat::Normal;
        };
        if YEAR_MONTH.is_match(version) {
            return TagFormat::YearMonth;
        }
        if YEAR_MONTH_DAY.is_match(version) {
            return TagFormat::YearMonthDay;
        }
        if BUILD_NUM.is_match(version) {
            return TagFormat::BuildNum;
        }
        if let Some(words) = WORDS_WITH_BUILD.find(version) {
            let template = BUILD_NUMBER.replace_all(words.as_str(), "-<build_num>");
            return TagFormat::WordsWithBuild(format!("<version>{template}"));
        }
        TagFormat::Normal
    }

    /// Alpha/beta/rc style markers survive in the numeric version as letters
    pub fn looks_like_prerelease(&self) -> bool {
        self.numeric_version()
            .is_some_and(|v| v.chars().any(|c| c.is_ascii_alphabetic()))
    }

    /// Looks like a genuine release tag (`1.2.3`, `8.0-sdk`, `jdk-21`) rather
    /// than a flavored or branch tag.
    pub fn is_canonical(&self) -> bool {
        let Some(numeric) = self.numeric_version() else {
            return false;
        };
        self.name == numeric
            || self.name == format!("{numeric}-sdk")
            || self.name == format!("jdk-{numeric}")
    }

    /// Whether `self` can stand in as an update candidate for `other`:
    /// same prefix, same format, and (unless `other` is sha-suffixed) same suffix.
    pub fn is_comparable_to(&self, other: &Tag) -> bool {
        if !self.is_comparable() {
            return false;
        }

        let other_format = other.format();
        let equal_prefix = self.prefix() == other.prefix();
        let equal_format = self.format() == other_format;
        if other_format == TagFormat::ShaSuffixed {
            return equal_prefix && equal_format;
        }

        equal_prefix && equal_format && self.suffix() == other.suffix()
    }

    pub fn has_same_precision(&self, other: &Tag) -> bool {
        self.precision() == other.precision()
    }

    /// True when every segment of `self` matches the corresponding segment of
    /// `other`, i.e. `self` is `other` written with fewer (or equal) segments.
    pub fn is_same_but_less_precise(&self, other: &Tag) -> bool {
        let mine = self.segments();
        if mine.len() > other.precision() {
            return false;
        }
        other
            .segments()
            .iter()
            .enumerate()
            .all(|(i, theirs)| mine.get(i).is_none_or(|m| m == theirs))
    }

    pub fn comparable_version(&self) -> Option<ComparableVersion> {
        ComparableVersion::parse(&self.numeric_version()?)
    }
}

impl PartialEq for Tag {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Tag {}

impl Hash for Tag {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(Debug, Clone)]
enum Segment {
    Number(u64),
    Text(String),
}

impl Segment {
    fn cmp_segment(&self, other: &Segment) -> Ordering {
        match (self, other) {
            (Segment::Number(a), Segment::Number(b)) => a.cmp(b),
            (Segment::Text(a), Segment::Text(b)) => a.cmp(b),
            // Text segments are pre-release markers and sort below numbers
            (Segment::Text(_), Segment::Number(_)) => Ordering::Less,
            (Segment::Number(_), Segment::Text(_)) => Ordering::Greater,
        }
    }
}

/// A tag version wrapped for ordering.
///
/// The release part (before the first `_`) and an optional numeric update part
/// (after it) are compared in turn. Segments compare pairwise with missing
/// segments read as zero, so `1.2` and `1.2.0` are equal.
#[derive(Debug, Clone)]
pub struct ComparableVersion {
    raw: String,
    release: Vec<Segment>,
    update: Vec<Segment>,
}

impl ComparableVersion {
    pub fn parse(version: &str) -> Option<Self> {
        let version = version.trim();
        let version = version.strip_prefix(['v', 'V']).unwrap_or(version);
        let (release, update) = match version.split_once('_') {
            Some((release, update)) => (release, Some(update)),
            None => (version, None),
        };

        let release = release.trim_end_matches(['.', '-', '_']);
        let release = Tag::new(release)
            .numeric_version()
            .unwrap_or_else(|| release.to_string());
        if !release.starts_with(|c: char| c.is_ascii_digit()) {
            return None;
        }

        let update = update
            .filter(|u| u.starts_with(|c: char| c.is_ascii_digit()))
            .map(tokenize)
            .unwrap_or_default();

        Some(Self {
            raw: version.to_string(),
            release: tokenize(&release),
            update,
        })
    }

    /// Numeric release segments; stops at the first textual segment
    pub fn numeric_segments(&self) -> Vec<u64> {
        self.release
            .iter()
            .map_while(|s| match s {
                Segment::Number(n) => Some(*n),
                Segment::Text(_) => None,
            })
            .collect()
    }
}

fn tokenize(version: &str) -> Vec<Segment> {
    VERSION_TOKEN
        .find_iter(version)
        .map(|m| {
            let token = m.as_str();
            token
                .parse::<u64>()
                .map(Segment::Number)
                .unwrap_or_else(|_| Segment::Text(token.to_lowercase()))
        })
        .collect()
}

fn cmp_segments(a: &[Segment], b: &[Segment]) -> Ordering {
    let zero = Segment::Number(0);
    for i in 0..a.len().max(b.len()) {
        let lhs = a.get(i).unwrap_or(&zero);
        let rhs = b.get(i).unwrap_or(&zero);
        match lhs.cmp_segment(rhs) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

impl Ord for ComparableVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_segments(&self.release, &other.release)
            .then_with(|| cmp_segments(&self.update, &other.update))
    }
}

impl PartialOrd for ComparableVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ComparableVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ComparableVersion {}

impl fmt::Display for ComparableVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
