//! Errors surfaced to callers of the update checker.
//!
//! Registry-level failures ([`crate::registry::RegistryError`]) never escape
//! directly: the checker retries what is transient and converts the rest into
//! one of these categories.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DockerError {
    #[error(
        "Authentication failed for registry '{registry}'. Check your credentials or API token."
    )]
    PrivateSourceAuthenticationFailure { registry: String },

    #[error("Registry '{registry}' timed out. The registry may be slow or unreachable.")]
    PrivateSourceTimedOut { registry: String },

    #[error("Unexpected response from registry '{registry}': {message}")]
    BadResponse { registry: String, message: String },

    #[error("Dependency file is not resolvable: {message}")]
    DependencyFileNotResolvable { message: String },

    #[error("All updates for '{dependency}' were ignored")]
    AllVersionsIgnored { dependency: String },

    #[error("Invalid ignore rule '{rule}': {reason}")]
    InvalidIgnoreRule { rule: String, reason: String },
}

pub type Result<T> = std::result::Result<T, DockerError>;
