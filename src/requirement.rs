//! The dependency being checked and the places it is pinned.

use crate::registry::is_docker_hub;
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where one occurrence of the image points: a tag, a digest, or both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// One manifest occurrence of the image (e.g. one `FROM` line).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub source: Source,
}

impl Requirement {
    pub fn new(source: Source) -> Self {
        Self { file: None, source }
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    /// Pins a digest without naming a tag
    pub fn is_digest_only(&self) -> bool {
        self.source.digest.is_some() && self.source.tag.is_none()
    }
}

/// An image reference under management.
///
/// `version` is the currently pinned tag, or the digest when no requirement
/// names a tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    pub version: String,
    pub requirements: Vec<Requirement>,
}

impl Dependency {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            requirements: Vec::new(),
        }
    }

    pub fn with_requirement(mut self, requirement: Requirement) -> Self {
        self.requirements.push(requirement);
        self
    }

    /// Requirements that pin a digest (with or without a tag)
    pub fn digest_requirements(&self) -> impl Iterator<Item = &Requirement> {
        self.requirements
            .iter()
            .filter(|r| r.source.digest.is_some())
    }

    pub fn has_digest_only_requirement(&self) -> bool {
        self.requirements.iter().any(Requirement::is_digest_only)
    }

    /// Registry host named by the requirements, if any (Docker Hub otherwise)
    pub fn registry(&self) -> Option<&str> {
        self.requirements
            .iter()
            .find_map(|r| r.source.registry.as_deref())
    }
}

/// A parsed `[registry/]repository[:tag][@digest]` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub registry: Option<String>,
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl ImageReference {
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(anyhow!("Empty image reference"));
        }

        let (rest, digest) = match reference.split_once('@') {
            Some((rest, digest)) => (rest, Some(digest.to_string())),
            None => (reference, None),
        };

        // A first component with a dot, a port or "localhost" names a registry
        let (registry, path) = match rest.split_once('/') {
            Some((first, path))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (Some(first.to_string()), path)
            }
            _ => (None, rest),
        };

        let last_slash = path.rfind('/').map_or(0, |i| i + 1);
        let (repository, tag) = match path[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                (&path[..split], Some(path[split + 1..].to_string()))
            }
            None => (path, None),
        };

        if repository.is_empty() {
            return Err(anyhow!("Image reference '{}' has no repository", reference));
        }
        if tag.as_deref() == Some("") || digest.as_deref() == Some("") {
            return Err(anyhow!("Image reference '{}' is malformed", reference));
        }

        Ok(Self {
            registry,
            repository: repository.to_string(),
            tag,
            digest,
        })
    }

    /// Canonical dependency name: official Docker Hub images live under
    /// `library/`, so `nginx` and `library/nginx` name the same image.
    pub fn dependency_name(&self) -> String {
        if is_docker_hub(self.registry.as_deref()) && !self.repository.contains('/') {
            format!("library/{}", self.repository)
        } else {
            self.repository.clone()
        }
    }

    /// Build the dependency a checker resolves. A reference with neither tag nor
    /// digest is pinned to `latest`.
    pub fn into_dependency(self) -> Dependency {
        let tag = match (&self.tag, &self.digest) {
            (None, None) => Some("latest".to_string()),
            (tag, _) => tag.clone(),
        };
        let version = tag
            .clone()
            .or_else(|| self.digest.clone())
            .unwrap_or_default();

        let name = self.dependency_name();
        Dependency::new(name, version).with_requirement(Requirement::new(Source {
            registry: self.registry,
            tag,
            digest: self.digest,
        }))
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(registry) = &self.registry {
            write!(f, "{registry}/")?;
        }
        f.write_str(&self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}
