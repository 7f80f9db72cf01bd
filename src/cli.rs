use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::expand::{DirectoryDetection, ExpandOptions};
use crate::zip::CrcPolicy;

#[derive(Parser, Debug)]
#[command(name = "ewsx")]
#[command(version)]
#[command(about = "Expand, inspect and repackage EasyWorship .ewsx schedule files", long_about = None)]
#[command(after_help = "Examples:\n  \
  ewsx expand Sunday.ewsx -d out          unpack every entry into out/\n  \
  ewsx structure Sunday.ewsx              show directories and files\n  \
  ewsx compose out Sunday-edited.ewsx     pack a directory back into a schedule")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Quiet mode (-qq => quieter)
    #[arg(short = 'q', action = clap::ArgAction::Count, global = true)]
    pub quiet: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Extract every entry of a schedule file into a directory
    Expand {
        /// Schedule file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Extract into DIR (default: current directory)
        #[arg(short = 'd', value_name = "DIR", default_value = ".")]
        dir: PathBuf,

        #[command(flatten)]
        read: ReadArgs,
    },

    /// Pack a directory tree into a schedule file
    Compose {
        #[arg(value_name = "DIR")]
        dir: PathBuf,

        #[arg(value_name = "OUTPUT")]
        output: PathBuf,
    },

    /// Print the directories and files of a schedule
    Structure {
        /// Schedule file (omit with --new to show a fresh schedule)
        #[arg(value_name = "FILE", required_unless_present = "new")]
        file: Option<PathBuf>,

        /// Describe a fresh schedule built from the template
        #[arg(long)]
        new: bool,

        /// Template database for --new
        #[arg(long, value_name = "PATH")]
        template: Option<PathBuf>,

        #[command(flatten)]
        read: ReadArgs,
    },

    /// Write a fresh schedule seeded from the template database
    New {
        #[arg(value_name = "OUTPUT")]
        output: PathBuf,

        /// Template database (default: sample_files/main.db)
        #[arg(long, value_name = "PATH")]
        template: Option<PathBuf>,
    },

    /// Load a schedule and write it back out
    Repack {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        #[arg(value_name = "OUTPUT")]
        output: PathBuf,

        #[command(flatten)]
        read: ReadArgs,
    },

    /// Materialize a schedule as a new numbered scheduleN directory
    Unpack {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Parent directory for scheduleN
        #[arg(short = 'o', value_name = "DIR", default_value = "schedules")]
        output_dir: PathBuf,

        #[command(flatten)]
        read: ReadArgs,
    },
}

/// Options that control how schedule files are read.
#[derive(Args, Debug, Clone, Copy)]
pub struct ReadArgs {
    /// Fail entries whose CRC-32 does not match
    #[arg(long)]
    pub verify_crc: bool,

    /// Treat names without an extension as directories, like older unpackers
    #[arg(long)]
    pub legacy_dirs: bool,
}

impl ReadArgs {
    pub fn expand_options(&self) -> ExpandOptions {
        ExpandOptions {
            crc: if self.verify_crc {
                CrcPolicy::Verify
            } else {
                CrcPolicy::Skip
            },
            detection: if self.legacy_dirs {
                DirectoryDetection::LegacyExtensionHeuristic
            } else {
                DirectoryDetection::TrailingSeparator
            },
        }
    }
}

impl Cli {
    pub fn is_quiet(&self) -> bool {
        self.quiet > 0
    }

    pub fn is_very_quiet(&self) -> bool {
        self.quiet > 1
    }

    /// Default log filter when `RUST_LOG` is unset
    pub fn default_log_filter(&self) -> &'static str {
        match self.quiet {
            0 => "ewsx=info",
            1 => "ewsx=warn",
            _ => "ewsx=error",
        }
    }
}
