use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tagup")]
#[command(
    author,
    version,
    about = "Check container images for newer tags and digests"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Ignore versions matching a rule, e.g. ">= 2.0" (can be specified multiple times)
    #[arg(long = "ignore", value_name = "RULE", global = true)]
    pub ignore: Vec<String>,

    /// Only propose tags published at least this many days ago
    #[arg(long, value_name = "DAYS", global = true)]
    pub cooldown_days: Option<u32>,

    /// Fail when ignore rules hide every available update
    #[arg(long, global = true)]
    pub strict: bool,

    /// Path to config file (default: auto-discover .tagup.toml or tagup.toml)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Registry username
    #[arg(long, global = true, env = "TAGUP_REGISTRY_USERNAME", requires = "password")]
    pub username: Option<String>,

    /// Registry password or token
    #[arg(
        long,
        global = true,
        env = "TAGUP_REGISTRY_PASSWORD",
        hide_env_values = true,
        requires = "username"
    )]
    pub password: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Check mode: exit with code 1 if updates are available
    #[arg(short = 'c', long, global = true)]
    pub check: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Check image references for newer tags
    Check {
        /// Image references, e.g. nginx:1.25 or ghcr.io/owner/app:2.1@sha256:...
        #[arg(required = true)]
        images: Vec<String>,
    },

    /// Show version information
    Version,
}
