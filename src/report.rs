//! One check per image reference, shaped for terminal or JSON output.

use crate::checker::UpdateChecker;
use crate::config::TagupConfig;
use crate::cooldown::CooldownOptions;
use crate::error::DockerError;
use crate::ignore::IgnoreRule;
use crate::registry::{OciRegistry, Registry, RegistryCredentials};
use crate::requirement::{Dependency, ImageReference, Requirement};
use serde::Serialize;
use std::sync::Arc;

/// Settings shared by every image in one run.
#[derive(Debug, Clone, Default)]
pub struct CheckOptions {
    pub config: TagupConfig,
    /// Rules from the command line, applied to every image
    pub ignore: Vec<IgnoreRule>,
    /// Overrides the configured cooldown window
    pub cooldown_days: Option<u32>,
    pub strict: bool,
    pub credentials: Option<RegistryCredentials>,
}

impl CheckOptions {
    fn cooldown(&self) -> Option<CooldownOptions> {
        match (self.config.cooldown.clone(), self.cooldown_days) {
            (Some(mut options), Some(days)) => {
                options.default_days = days;
                Some(options)
            }
            (None, Some(days)) => Some(CooldownOptions::new(days)),
            (options, None) => options,
        }
    }

    fn ignore_rules_for(&self, dependency: &str) -> Result<Vec<IgnoreRule>, DockerError> {
        let mut rules = self.config.ignore_rules_for(dependency)?;
        rules.extend(self.ignore.iter().cloned());
        Ok(rules)
    }

    fn checker(
        &self,
        dependency: Dependency,
        registry: Arc<dyn Registry>,
    ) -> Result<UpdateChecker, DockerError> {
        let rules = self.ignore_rules_for(&dependency.name)?;
        let mut checker = UpdateChecker::new(dependency, registry)
            .with_ignore_rules(rules)
            .with_raise_on_ignored(self.strict || self.config.strict);
        if let Some(cooldown) = self.cooldown() {
            checker = checker.with_cooldown(cooldown);
        }
        Ok(checker)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    UpToDate,
    UpdateAvailable,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageReport {
    pub image: String,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub requirements: Vec<Requirement>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ImageReport {
    fn failed(image: &str, error: impl ToString) -> Self {
        Self {
            image: image.to_string(),
            status: Status::Error,
            current: None,
            latest: None,
            digest: None,
            requirements: Vec::new(),
            error: Some(error.to_string()),
        }
    }

    pub fn has_update(&self) -> bool {
        self.status == Status::UpdateAvailable
    }
}

/// Parse `image` and check it against its registry
pub async fn check_image(image: &str, options: &CheckOptions) -> ImageReport {
    let reference = match ImageReference::parse(image) {
        Ok(reference) => reference,
        Err(e) => return ImageReport::failed(image, e),
    };

    let registry = OciRegistry::for_host(
        reference.registry.as_deref(),
        options.credentials.clone(),
        options.config.registry_timeouts(),
    );
    check_dependency(image, reference.into_dependency(), Arc::new(registry), options).await
}

/// Check an already-built dependency against `registry`
pub async fn check_dependency(
    image: &str,
    dependency: Dependency,
    registry: Arc<dyn Registry>,
    options: &CheckOptions,
) -> ImageReport {
    let current = dependency.version.clone();
    let mut checker = match options.checker(dependency, registry) {
        Ok(checker) => checker,
        Err(e) => return ImageReport::failed(image, e),
    };

    match resolve(&mut checker).await {
        Ok((latest, up_to_date, digest, requirements)) => ImageReport {
            image: image.to_string(),
            status: if up_to_date {
                Status::UpToDate
            } else {
                Status::UpdateAvailable
            },
            current: Some(current),
            latest: Some(latest),
            digest,
            requirements,
            error: None,
        },
        Err(e) => ImageReport::failed(image, e),
    }
}

type Resolution = (String, bool, Option<String>, Vec<Requirement>);

async fn resolve(checker: &mut UpdateChecker) -> Result<Resolution, DockerError> {
    let latest = checker.latest_version().await?;
    let up_to_date = checker.is_up_to_date().await?;
    let digest = checker.updated_digest().await?;
    let requirements = if up_to_date {
        Vec::new()
    } else {
        checker.updated_requirements().await?
    };
    Ok((latest, up_to_date, digest, requirements))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Endpoint, MockRegistry, RegistryError};

    fn app(version: &str) -> Dependency {
        ImageReference::parse(&format!("app:{version}"))
            .unwrap()
            .into_dependency()
    }

    async fn check(
        registry: Arc<MockRegistry>,
        version: &str,
        options: &CheckOptions,
    ) -> ImageReport {
        let image = format!("app:{version}");
        check_dependency(&image, app(version), registry, options).await
    }

    fn registry() -> Arc<MockRegistry> {
        Arc::new(
            MockRegistry::new()
                .with_tags(&["1.0.0", "1.1.0", "2.0.0"])
                .with_digest("2.0.0", "sha256:two")
                .with_digest("1.1.0", "sha256:one"),
        )
    }

    #[tokio::test]
    async fn test_report_update_available() {
        let report = check(registry(), "1.0.0", &CheckOptions::default()).await;

        assert_eq!(report.status, Status::UpdateAvailable);
        assert!(report.has_update());
        assert_eq!(report.current.as_deref(), Some("1.0.0"));
        assert_eq!(report.latest.as_deref(), Some("2.0.0"));
        assert_eq!(report.digest.as_deref(), Some("sha256:two"));
        assert_eq!(report.requirements[0].source.tag.as_deref(), Some("2.0.0"));
    }

    #[tokio::test]
    async fn test_report_up_to_date() {
        let report = check(registry(), "2.0.0", &CheckOptions::default()).await;
        assert_eq!(report.status, Status::UpToDate);
        assert!(report.requirements.is_empty());
    }

    #[tokio::test]
    async fn test_cli_rules_combine_with_config() {
        let config: TagupConfig = toml::from_str(
            "[[ignore]]\ndependency = \"library/*\"\nversions = [\">= 2\"]\n",
        )
        .unwrap();
        let options = CheckOptions {
            config,
            ignore: vec![IgnoreRule::parse("1.1.0").unwrap()],
            ..CheckOptions::default()
        };

        let report = check(registry(), "1.0.0", &options).await;
        assert_eq!(report.status, Status::UpToDate);
        assert_eq!(report.latest.as_deref(), Some("1.0.0"));

        let strict = CheckOptions {
            strict: true,
            ..options
        };
        let report = check(registry(), "1.0.0", &strict).await;
        assert_eq!(report.status, Status::Error);
        assert!(report.error.unwrap().contains("ignored"));
    }

    #[tokio::test]
    async fn test_report_registry_error() {
        let registry = Arc::new(
            MockRegistry::new().with_failure(Endpoint::ListTags, RegistryError::Unauthorized),
        );
        let report = check(registry, "1.0.0", &CheckOptions::default()).await;
        assert_eq!(report.status, Status::Error);
        assert!(report.error.unwrap().contains("Authentication failed"));
    }

    #[tokio::test]
    async fn test_report_invalid_reference() {
        let report = check_image("nginx:", &CheckOptions::default()).await;
        assert_eq!(report.status, Status::Error);
        assert_eq!(report.current, None);
    }

    #[test]
    fn test_cooldown_override() {
        let mut options = CheckOptions::default();
        assert_eq!(options.cooldown(), None);

        options.cooldown_days = Some(3);
        assert_eq!(options.cooldown(), Some(CooldownOptions::new(3)));

        options.config.cooldown = Some(CooldownOptions {
            include: vec!["library/*".into()],
            ..CooldownOptions::new(30)
        });
        let cooldown = options.cooldown().unwrap();
        assert_eq!(cooldown.default_days, 3);
        assert_eq!(cooldown.include, vec!["library/*".to_string()]);
    }

    #[test]
    fn test_report_json_shape() {
        let report = ImageReport::failed("app", "boom");
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["error"], "boom");
        assert!(json.get("latest").is_none());
    }
}
