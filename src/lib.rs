pub mod checker;
pub mod cli;
pub mod components;
pub mod config;
pub mod cooldown;
pub mod error;
pub mod ignore;
pub mod registry;
pub mod report;
pub mod requirement;
pub mod retry;
pub mod tag;

pub use checker::{ResolutionStage, UpdateChecker};
pub use cli::{Cli, Command};
pub use config::TagupConfig;
pub use cooldown::{CooldownOptions, PublicationRecord};
pub use error::DockerError;
pub use ignore::IgnoreRule;
pub use registry::{OciRegistry, Registry, RegistryCredentials, RegistryError};
pub use requirement::{Dependency, ImageReference, Requirement, Source};
pub use tag::{ComparableVersion, Tag};
