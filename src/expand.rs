//! Unpacking a schedule file onto disk.
//!
//! [`expand_archive`] walks the central directory in archive order and
//! writes every entry under a destination directory. Failures that make the
//! whole container unusable abort the run; anything that goes wrong with a
//! single entry is logged, recorded in the [`ExpandReport`] and skipped.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::{EwsxError, Result};
use crate::io::LocalFileReader;
use crate::zip::{CrcPolicy, ZipExtractor, ZipFileEntry};

/// How an entry name is classified as a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DirectoryDetection {
    /// Directory iff the name ends with `/` or `\`.
    #[default]
    TrailingSeparator,
    /// Compatibility with the historical unpacker: a trailing separator, or no
    /// `.` in the last path segment. Extensionless files such as `README`
    /// are misclassified as directories under this rule.
    LegacyExtensionHeuristic,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExpandOptions {
    pub crc: CrcPolicy,
    pub detection: DirectoryDetection,
}

/// One entry that could not be extracted.
#[derive(Debug, Clone)]
pub struct EntryFailure {
    pub name: String,
    pub message: String,
}

/// What an expansion actually wrote, as normalized relative paths.
#[derive(Debug, Clone, Default)]
pub struct ExpandReport {
    pub files: Vec<String>,
    pub directories: Vec<String>,
    pub failures: Vec<EntryFailure>,
}

impl ExpandReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

pub fn is_directory_entry(name: &str, detection: DirectoryDetection) -> bool {
    if name.ends_with('/') || name.ends_with('\\') {
        return true;
    }
    match detection {
        DirectoryDetection::TrailingSeparator => false,
        DirectoryDetection::LegacyExtensionHeuristic => {
            let last = name.rsplit(['/', '\\']).next().unwrap_or(name);
            !last.contains('.')
        }
    }
}

/// Normalize an entry name to a forward-slash relative path.
///
/// Backslashes from Windows-built schedules become `/`, empty and `.`
/// segments are dropped. Names that would escape the destination (`..`,
/// absolute paths, drive prefixes) are rejected.
pub fn normalize_entry_name(name: &str) -> Result<String> {
    let unified = name.replace('\\', "/");
    if unified.starts_with('/') {
        return Err(EwsxError::UnsafePath(name.to_string()));
    }

    let mut parts = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(EwsxError::UnsafePath(name.to_string())),
            s if s.contains(':') => return Err(EwsxError::UnsafePath(name.to_string())),
            s => parts.push(s),
        }
    }
    Ok(parts.join("/"))
}

/// Join a normalized relative path onto `root`, refusing anything but plain components.
pub fn safe_join(root: &Path, relative: &str) -> Result<PathBuf> {
    let mut out = root.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return Err(EwsxError::UnsafePath(relative.to_string())),
        }
    }
    Ok(out)
}

/// Expand the schedule file at `source` into `dest`, creating `dest` if absent.
pub async fn expand_archive(
    source: &Path,
    dest: &Path,
    options: &ExpandOptions,
) -> Result<ExpandReport> {
    let reader = Arc::new(LocalFileReader::new(source)?);
    let extractor = ZipExtractor::with_crc_policy(reader, options.crc);
    let entries = extractor.list_files().await?;

    fs::create_dir_all(dest).await?;
    info!(
        source = %source.display(),
        dest = %dest.display(),
        entries = entries.len(),
        "expanding archive"
    );

    let mut report = ExpandReport::default();
    for entry in &entries {
        if let Err(e) = expand_entry(&extractor, entry, dest, options, &mut report).await {
            warn!(entry = %entry.file_name, error = %e, "failed to extract entry");
            report.failures.push(EntryFailure {
                name: entry.file_name.clone(),
                message: e.to_string(),
            });
        }
    }

    info!(
        files = report.files.len(),
        directories = report.directories.len(),
        failures = report.failures.len(),
        "expansion finished"
    );
    Ok(report)
}

async fn expand_entry(
    extractor: &ZipExtractor<LocalFileReader>,
    entry: &ZipFileEntry,
    dest: &Path,
    options: &ExpandOptions,
    report: &mut ExpandReport,
) -> Result<()> {
    let relative = normalize_entry_name(&entry.file_name)?;
    if relative.is_empty() {
        return Ok(());
    }
    let out_path = safe_join(dest, &relative)?;

    if entry.is_directory || is_directory_entry(&entry.file_name, options.detection) {
        debug!(entry = %relative, "creating directory");
        fs::create_dir_all(&out_path).await?;
        report.directories.push(relative);
        return Ok(());
    }

    let (year, month, day) = entry.mod_date();
    let (hour, minute, second) = entry.mod_time();
    debug!(
        entry = %relative,
        size = entry.uncompressed_size,
        modified = format_args!("{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"),
        "extracting file"
    );
    extractor.extract_to_file(entry, &out_path).await?;
    report.files.push(relative);
    Ok(())
}
