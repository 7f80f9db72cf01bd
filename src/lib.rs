//! # ewsx
//!
//! Tools for EasyWorship `.ewsx` schedule files.
//!
//! A schedule file is a deflate-compressed ZIP archive holding a `main.db`
//! database and a `media/` directory. This crate expands such files onto
//! disk, loads them into an in-memory [`Archive`], and writes them back out.
//!
//! ## Features
//!
//! - Expand a schedule into a directory, tolerating archives with bad CRCs
//! - Normalize Windows path separators found in entry names
//! - Create fresh schedules from a template database
//! - Print a readable listing of a schedule's layout
//! - Repackage a loaded schedule, or any directory tree, as a new `.ewsx`
//! - Materialize schedules as numbered `scheduleN` directories
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use ewsx::Archive;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> ewsx::Result<()> {
//!     let schedule = Archive::load_from(Path::new("Sunday.ewsx")).await?;
//!     print!("{}", schedule.structure());
//!     schedule.save(Path::new("Sunday-copy.ewsx")).await?;
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod cli;
pub mod error;
pub mod expand;
pub mod io;
pub mod zip;

pub use archive::{Archive, ArchiveEntry, LoadOptions, compose_dir};
pub use cli::Cli;
pub use error::{EwsxError, Result};
pub use expand::{DirectoryDetection, ExpandOptions, ExpandReport, expand_archive, is_directory_entry};
pub use io::{LocalFileReader, ReadAt};
pub use zip::{CrcPolicy, ZipExtractor, ZipFileEntry, ZipWriter};
