use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::thread;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use notes_update::update::DEFAULT_CAPACITY;
use notes_update::{progress_channel, ProgressEvent, ReleaseConfig, Settings, Stage, UpdateInfo, Updater};

#[derive(Parser, Debug)]
#[command(name = "notes-update", version)]
#[command(about = "Check for and install new ml-notes releases", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to the updater settings file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Installed ml-notes executable (required by update and rollback)
    #[arg(long, global = true)]
    target: Option<PathBuf>,

    /// Version of the installed ml-notes, e.g. v1.2.0 (required by check and update)
    #[arg(long, global = true)]
    current_version: Option<String>,

    /// Log level, overridden by RUST_LOG
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check whether a newer release is available
    Check {
        /// Include pre-release versions
        #[arg(long)]
        prerelease: bool,

        /// Print the update as JSON
        #[arg(long)]
        json: bool,
    },

    /// Download and install a release
    Update {
        /// Reinstall even if already on the latest version
        #[arg(long)]
        force: bool,

        /// Include pre-release versions
        #[arg(long)]
        prerelease: bool,

        /// Install a specific version (e.g. v1.2.3)
        #[arg(long)]
        version: Option<String>,

        /// Show what would be installed without installing
        #[arg(long)]
        dry_run: bool,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Restore the executable saved by the last update
    Rollback,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();

    let settings = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }
    .context("Failed to load updater settings")?;

    match &cli.command {
        Command::Check { prerelease, json } => {
            let config = release_config(&settings, required_version(&cli)?, *prerelease);
            let updater = Updater::new(config).context("Failed to initialise updater")?;
            run_check_command(&updater, *json)
        }
        Command::Update {
            force,
            prerelease,
            version,
            dry_run,
            yes,
        } => {
            let config = release_config(&settings, required_version(&cli)?, *prerelease);
            let updater = Updater::new(config)
                .context("Failed to initialise updater")?
                .with_executable_path(required_target(&cli)?);
            run_update_command(&updater, version.as_deref(), *force, *dry_run, *yes)
        }
        Command::Rollback => {
            // Rollback never talks to the registry, so the version is informational
            let current = cli.current_version.as_deref().unwrap_or("unknown");
            let updater = Updater::new(release_config(&settings, current, false))
                .context("Failed to initialise updater")?
                .with_executable_path(required_target(&cli)?);
            run_rollback_command(&updater)
        }
    }
}

/// notes-update is a separate binary, so it cannot infer what it is updating
fn required_target(cli: &Cli) -> Result<&Path> {
    cli.target
        .as_deref()
        .ok_or_else(|| anyhow!("--target <path to ml-notes> is required"))
}

fn required_version(cli: &Cli) -> Result<&str> {
    cli.current_version
        .as_deref()
        .ok_or_else(|| anyhow!("--current-version is required"))
}

fn release_config(settings: &Settings, current_version: &str, prerelease: bool) -> ReleaseConfig {
    let mut config = settings.to_release_config(current_version);
    config.include_prerelease |= prerelease;
    config
}

fn run_check_command(updater: &Updater, json: bool) -> Result<()> {
    let info = updater
        .check_for_update()
        .context("Failed to check for updates")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    match info {
        Some(info) => {
            println!(
                "{} New version available: {} → {}",
                "↑".yellow(),
                updater.current_version().dimmed(),
                info.version.green()
            );
            println!("  Run `notes-update update` to install");
        }
        None => println!(
            "{} You're running the latest version ({})",
            "✓".green(),
            updater.current_version()
        ),
    }
    Ok(())
}

fn run_update_command(
    updater: &Updater,
    version: Option<&str>,
    force: bool,
    dry_run: bool,
    yes: bool,
) -> Result<()> {
    println!("{}", "Checking for updates...".cyan());

    let found = match version {
        Some(v) => Some(
            updater
                .check_version(v)
                .with_context(|| format!("Failed to check version {}", v))?,
        ),
        None => updater
            .check_for_update()
            .context("Failed to check for updates")?,
    };

    println!("Current version: {}", updater.current_version());

    let info = match found {
        Some(info) => info,
        None => {
            println!(
                "{} You're running the latest version ({})",
                "✓".green(),
                updater.current_version()
            );
            if !force {
                return Ok(());
            }
            println!("{}", "Force update requested, proceeding anyway...".yellow());
            updater
                .latest_release()
                .context("Failed to get latest release")?
        }
    };

    print_release(&info);

    if dry_run {
        println!("Dry run: would update to {}", info.version.green());
        return Ok(());
    }

    if !force && !yes && !confirm(&info.version)? {
        println!("Update cancelled.");
        return Ok(());
    }

    println!("\nUpdating to {}...", info.version.green());

    let (tx, rx) = progress_channel(DEFAULT_CAPACITY);
    let renderer = thread::spawn(move || render_progress(rx));

    let result = updater.perform_update(&info, tx);
    renderer
        .join()
        .map_err(|_| anyhow!("progress renderer panicked"))?;
    result.context("Update failed")?;

    println!("\n{} Updated to version {}", "✓".green(), info.version.green());

    if !info.release_notes.is_empty() {
        println!("\n{}", format!("What's new in {}:", info.version).cyan());
        println!("{}\n", info.release_notes.dimmed());
    }

    Ok(())
}

fn run_rollback_command(updater: &Updater) -> Result<()> {
    updater.rollback().context("Rollback failed")?;
    let restored = updater.executable_path()?;
    println!(
        "{} Restored previous version at {}",
        "✓".green(),
        restored.display()
    );
    Ok(())
}

fn print_release(info: &UpdateInfo) {
    println!("Latest version:  {}", info.version.green());
    println!("Release URL:     {}", info.release_url);
    if let Some(published) = info.published_at {
        println!("Published:       {}", published.format("%Y-%m-%d %H:%M:%S"));
    }
    if info.size > 0 {
        println!("Download size:   {}", HumanBytes(info.size));
    }
    if info.prerelease {
        println!("{}", "This is a pre-release version".yellow());
    }
}

fn confirm(version: &str) -> Result<bool> {
    print!("\nDo you want to update to {}? [y/N]: ", version);
    io::stdout().flush()?;

    let mut response = String::new();
    io::stdin().lock().read_line(&mut response)?;
    Ok(matches!(response.trim(), "y" | "Y" | "yes" | "Yes"))
}

/// Drains the progress stream until the updater closes it
fn render_progress(rx: Receiver<ProgressEvent>) {
    let mut bar: Option<ProgressBar> = None;

    for event in rx {
        match event.stage {
            Stage::Download if event.total_bytes > 0 => {
                let pb = bar.get_or_insert_with(|| download_bar(event.total_bytes));
                pb.set_position(event.bytes_downloaded);
            }
            Stage::Download => println!("{}", event.message.cyan()),
            Stage::Complete => {
                if let Some(pb) = bar.take() {
                    pb.finish_and_clear();
                }
                println!("{} {}", "✓".green(), event.message);
            }
            _ => {
                if let Some(pb) = bar.take() {
                    pb.finish_with_message("Download complete");
                }
                println!("{}", event.message.cyan());
            }
        }
    }

    if let Some(pb) = bar.take() {
        pb.abandon();
    }
}

fn download_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb
}
