//! Main entry point for the ewsx CLI application.
//!
//! Each subcommand runs one archive operation to completion on a
//! single-threaded runtime.

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::path::Path;
use tracing_subscriber::EnvFilter;

use ewsx::cli::Command;
use ewsx::{Archive, Cli, LoadOptions, compose_dir, expand_archive};

/// Application entry point.
///
/// Installs the log subscriber, then runs the chosen subcommand.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.default_log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Command::Expand { file, dir, read } => {
            let report = expand_archive(file, dir, &read.expand_options())
                .await
                .with_context(|| format!("expanding {}", file.display()))?;
            if !cli.is_quiet() {
                for name in &report.directories {
                    println!("   creating: {}/", name);
                }
                for name in &report.files {
                    println!("  inflating: {}", name);
                }
            }
            if !report.is_complete() && !cli.is_very_quiet() {
                eprintln!(
                    "{} of {} entries could not be extracted",
                    report.failures.len(),
                    report.failures.len() + report.files.len() + report.directories.len()
                );
            }
        }

        Command::Compose { dir, output } => {
            let count = compose_dir(dir, output)
                .await
                .with_context(|| format!("composing {}", dir.display()))?;
            report_saved(&cli, output, count);
        }

        Command::Structure {
            file,
            new,
            template,
            read,
        } => {
            let archive = if *new {
                fresh(template.as_deref()).await?
            } else {
                let Some(file) = file else {
                    bail!("a schedule file is required unless --new is given");
                };
                load(file, read.expand_options()).await?
            };
            print!("{}", archive.structure());
        }

        Command::New { output, template } => {
            let archive = fresh(template.as_deref()).await?;
            archive
                .save(output)
                .await
                .with_context(|| format!("saving {}", output.display()))?;
            report_saved(&cli, output, archive.entries().len() + archive.directories().len());
        }

        Command::Repack { file, output, read } => {
            let archive = load(file, read.expand_options()).await?;
            archive
                .save(output)
                .await
                .with_context(|| format!("saving {}", output.display()))?;
            report_saved(&cli, output, archive.entries().len() + archive.directories().len());
        }

        Command::Unpack {
            file,
            output_dir,
            read,
        } => {
            let archive = load(file, read.expand_options()).await?;
            let path = archive
                .expand_to_dir(output_dir)
                .await
                .with_context(|| format!("expanding into {}", output_dir.display()))?;
            if !cli.is_quiet() {
                println!("Schedule expanded into `{}`", absolute(&path).display());
            }
        }
    }

    Ok(())
}

/// Build a new, empty schedule.
///
/// # Arguments
///
/// * `template` - Database to seed `main.db` from; `None` uses the bundled sample
///
/// # Returns
///
/// The fresh archive, or an error naming the template that could not be read.
async fn fresh(template: Option<&Path>) -> Result<Archive> {
    let archive = match template {
        Some(path) => Archive::create_with_template(path).await,
        None => Archive::create().await,
    };
    archive.context("reading template database")
}

/// Load an existing schedule file into memory.
///
/// # Arguments
///
/// * `file` - Path of the `.ewsx` file
/// * `expand` - CRC policy and directory detection used while unpacking
///
/// # Returns
///
/// The loaded archive. Entries that failed to extract are missing from it.
async fn load(file: &Path, expand: ewsx::ExpandOptions) -> Result<Archive> {
    let options = LoadOptions {
        expand,
        temp_root: None,
    };
    Archive::load_from_with(file, &options)
        .await
        .with_context(|| format!("loading {}", file.display()))
}

/// Tell the user where a schedule was written.
///
/// # Arguments
///
/// * `cli` - Parsed command-line arguments; nothing is printed with `-q`
/// * `output` - Destination of the saved file
/// * `entries` - Number of entries written, directories included
fn report_saved(cli: &Cli, output: &Path, entries: usize) {
    if !cli.is_quiet() {
        println!(
            "Saved schedule with {} entries in `{}`",
            entries,
            absolute(output).display()
        );
    }
}

/// Resolve `path` against the working directory for display.
///
/// # Returns
///
/// The absolute path, or `path` unchanged if the working directory is unavailable.
fn absolute(path: &Path) -> std::path::PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
