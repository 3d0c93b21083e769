use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use futures::future::join_all;
use tracing_subscriber::EnvFilter;

use tagup::cli::{Cli, Command};
use tagup::config::TagupConfig;
use tagup::ignore::IgnoreRule;
use tagup::registry::RegistryCredentials;
use tagup::report::{CheckOptions, ImageReport, Status, check_image};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    // RUST_LOG wins over the verbosity flag
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("warn")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Command::Version => {
            println!("tagup version {}", VERSION);
        }
        Command::Check { images } => {
            let has_updates = run_check(&cli, images).await?;
            if cli.check && has_updates {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<TagupConfig> {
    if let Some(path) = &cli.config {
        return TagupConfig::load_from_path_with_error(path).map_err(anyhow::Error::msg);
    }

    let cwd = std::env::current_dir().context("Cannot determine current directory")?;
    match TagupConfig::discover(&cwd) {
        Some((config, path)) => {
            tracing::debug!(path = %path.display(), "loaded config");
            Ok(config)
        }
        None => Ok(TagupConfig::default()),
    }
}

/// Returns whether any image has an update
async fn run_check(cli: &Cli, images: &[String]) -> Result<bool> {
    let ignore = cli
        .ignore
        .iter()
        .map(|rule| IgnoreRule::parse(rule))
        .collect::<Result<Vec<_>, _>>()?;

    let credentials = match (&cli.username, &cli.password) {
        (Some(username), Some(password)) => Some(RegistryCredentials {
            username: username.clone(),
            password: password.clone(),
        }),
        _ => None,
    };

    let options = CheckOptions {
        config: load_config(cli)?,
        ignore,
        cooldown_days: cli.cooldown_days,
        strict: cli.strict,
        credentials,
    };

    // Each image gets its own checker, so nothing is shared between them
    let reports: Vec<ImageReport> =
        join_all(images.iter().map(|image| check_image(image, &options))).await;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            print_report(report);
        }
        println!();
        print_summary(&reports);
    }

    Ok(reports.iter().any(ImageReport::has_update))
}

fn print_report(report: &ImageReport) {
    match report.status {
        Status::Error => {
            println!(
                "{} {} {}",
                "✗".red(),
                report.image.bold(),
                report.error.as_deref().unwrap_or("unknown error").red()
            );
        }
        Status::UpToDate => {
            println!(
                "{} {} {}",
                "✓".green(),
                report.image.bold(),
                "up to date".dimmed()
            );
        }
        Status::UpdateAvailable => {
            let current = report.current.as_deref().unwrap_or_default();
            let latest = report.latest.as_deref().unwrap_or_default();
            println!(
                "{} {} {} → {}",
                "↑".yellow(),
                report.image.bold(),
                current.dimmed(),
                latest.green()
            );
            if let Some(digest) = &report.digest {
                println!("    {} {}", "digest".dimmed(), digest);
            }
        }
    }
}

fn print_summary(reports: &[ImageReport]) {
    let count = |status: Status| reports.iter().filter(|r| r.status == status).count();
    let updates = count(Status::UpdateAvailable);
    let errors = count(Status::Error);

    if updates == 0 && errors == 0 {
        println!(
            "{} Checked {} image(s), all up to date",
            "✓".green(),
            reports.len()
        );
        return;
    }

    println!(
        "{} update(s) available across {} image(s), {} up to date",
        updates.to_string().green().bold(),
        reports.len(),
        count(Status::UpToDate)
    );
    if errors > 0 {
        println!("{} error(s) occurred", errors.to_string().red().bold());
    }
}
