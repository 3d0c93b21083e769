//! Version ranges a caller asked never to be offered.
//!
//! Rules are written the way ignore conditions usually are in dependency
//! tooling: `"> 1.2.3"`, `">= 2, < 3"`, `"~> 1.4"`, or a bare `"1.2.3"`.
//! Conditions separated by commas must all hold for the rule to match.

use crate::error::DockerError;
use crate::tag::{ComparableVersion, Tag};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Pessimistic,
}

#[derive(Debug, Clone)]
struct Condition {
    op: Op,
    version: ComparableVersion,
}

impl Condition {
    fn parse(rule: &str, text: &str) -> Result<Self, DockerError> {
        let text = text.trim();
        // Longest operators first so ">=" is not read as ">"
        let (op, rest) = [
            ("~>", Op::Pessimistic),
            (">=", Op::Ge),
            ("<=", Op::Le),
            ("!=", Op::Ne),
            ("==", Op::Eq),
            (">", Op::Gt),
            ("<", Op::Lt),
            ("=", Op::Eq),
        ]
        .iter()
        .find_map(|(prefix, op)| text.strip_prefix(prefix).map(|rest| (*op, rest)))
        .unwrap_or((Op::Eq, text));

        let rest = rest.trim();
        let invalid = |reason: String| DockerError::InvalidIgnoreRule {
            rule: rule.to_string(),
            reason,
        };

        // Tag decoration (`-rc1`, `-alpine`, `-ea-`) would be dropped from the
        // comparison, so the rule would match more than it says
        let bare = rest.strip_prefix(['v', 'V']).unwrap_or(rest);
        if Tag::new(rest)
            .numeric_version()
            .is_some_and(|numeric| numeric != bare.to_lowercase())
        {
            return Err(invalid(format!(
                "'{rest}' carries a tag suffix or marker; use a plain version"
            )));
        }

        let version = ComparableVersion::parse(rest)
            .ok_or_else(|| invalid(format!("'{rest}' is not a version")))?;

        Ok(Self { op, version })
    }

    fn matches(&self, version: &ComparableVersion) -> bool {
        match self.op {
            Op::Eq => version == &self.version,
            Op::Ne => version != &self.version,
            Op::Gt => version > &self.version,
            Op::Ge => version >= &self.version,
            Op::Lt => version < &self.version,
            Op::Le => version <= &self.version,
            Op::Pessimistic => {
                version >= &self.version
                    && pessimistic_upper_bound(&self.version).is_none_or(|upper| version < &upper)
            }
        }
    }
}

/// `~> 1.4.2` allows `< 1.5`, `~> 1.4` allows `< 2`, `~> 1` allows `< 2`.
/// `None` when the bumped segment would overflow, leaving no upper bound.
fn pessimistic_upper_bound(version: &ComparableVersion) -> Option<ComparableVersion> {
    let mut segments = version.numeric_segments();
    if segments.len() > 1 {
        segments.pop();
    }
    let last = segments.last_mut()?;
    *last = last.checked_add(1)?;

    let bound = segments
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(".");
    ComparableVersion::parse(&bound)
}

/// A single ignore rule: a conjunction of version conditions.
#[derive(Debug, Clone)]
pub struct IgnoreRule {
    raw: String,
    conditions: Vec<Condition>,
}

impl IgnoreRule {
    pub fn parse(rule: &str) -> Result<Self, DockerError> {
        let conditions = rule
            .split(',')
            .filter(|c| !c.trim().is_empty())
            .map(|c| Condition::parse(rule, c))
            .collect::<Result<Vec<_>, _>>()?;

        if conditions.is_empty() {
            return Err(DockerError::InvalidIgnoreRule {
                rule: rule.to_string(),
                reason: "no version conditions".to_string(),
            });
        }

        Ok(Self {
            raw: rule.trim().to_string(),
            conditions,
        })
    }

    pub fn is_satisfied_by(&self, version: &ComparableVersion) -> bool {
        self.conditions.iter().all(|c| c.matches(version))
    }
}

impl FromStr for IgnoreRule {
    type Err = DockerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for IgnoreRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
