//! In-memory model of a schedule file.
//!
//! An [`Archive`] is either fresh (built from the bundled template database)
//! or loaded from an existing `.ewsx` file. It can describe its layout,
//! be written back out as a schedule file, or be materialized as a numbered
//! directory tree. There is no API for editing a loaded archive.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tempfile::TempDir;
use tokio::fs;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{EwsxError, Result};
use crate::expand::{ExpandOptions, expand_archive, safe_join};
use crate::zip::ZipWriter;

/// Template database used to seed fresh schedules, relative to the working directory.
pub const DEFAULT_TEMPLATE_PATH: &str = "sample_files/main.db";
pub const DATABASE_NAME: &str = "main.db";
pub const MEDIA_DIR: &str = "media";

/// Prefix of the numbered directories created by [`Archive::expand_to_dir`].
pub const SCHEDULE_DIR_PREFIX: &str = "schedule";

/// A file recorded in an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Relative path with `/` separators
    pub path: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub expand: ExpandOptions,
    /// Where the private extraction directory is created; the system temp dir if unset
    pub temp_root: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct Archive {
    origin: Option<PathBuf>,
    entries: Vec<ArchiveEntry>,
    /// Insertion ordered, no duplicates, parents before children
    directories: Vec<String>,
}

impl Archive {
    /// Fresh schedule seeded from [`DEFAULT_TEMPLATE_PATH`].
    pub async fn create() -> Result<Self> {
        Self::create_with_template(Path::new(DEFAULT_TEMPLATE_PATH)).await
    }

    /// Fresh schedule: an empty `media/` directory and `main.db` copied from `template`.
    pub async fn create_with_template(template: &Path) -> Result<Self> {
        let data = fs::read(template)
            .await
            .map_err(|e| EwsxError::from_open(e, template))?;
        debug!(template = %template.display(), bytes = data.len(), "loaded template database");

        Ok(Self {
            origin: None,
            entries: vec![ArchiveEntry {
                path: DATABASE_NAME.to_string(),
                data,
            }],
            directories: vec![MEDIA_DIR.to_string()],
        })
    }

    pub async fn load_from(path: &Path) -> Result<Self> {
        Self::load_from_with(path, &LoadOptions::default()).await
    }

    /// Load an existing schedule by expanding it into a private temporary
    /// directory and reading the tree back. The temporary directory is
    /// removed when this returns, whether or not loading succeeded.
    pub async fn load_from_with(path: &Path, options: &LoadOptions) -> Result<Self> {
        let staging = staging_dir(options.temp_root.as_deref())?;

        expand_archive(path, staging.path(), &options.expand).await?;
        let (directories, files) = collect_tree(staging.path())?;

        let mut entries = Vec::with_capacity(files.len());
        for (relative, full) in files {
            let data = fs::read(&full).await?;
            entries.push(ArchiveEntry {
                path: relative,
                data,
            });
        }

        info!(
            path = %path.display(),
            files = entries.len(),
            directories = directories.len(),
            "loaded schedule"
        );

        Ok(Self {
            origin: Some(path.to_path_buf()),
            entries,
            directories: directories.into_iter().map(|(rel, _)| rel).collect(),
        })
    }

    /// The schedule file this archive was loaded from, `None` for a fresh one.
    pub fn origin(&self) -> Option<&Path> {
        self.origin.as_deref()
    }

    pub fn is_fresh(&self) -> bool {
        self.origin.is_none()
    }

    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    pub fn directories(&self) -> &[String] {
        &self.directories
    }

    /// Contents of the file at `path`, if recorded.
    pub fn file(&self, path: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|e| e.path == path)
            .map(|e| e.data.as_slice())
    }

    /// Human-readable listing.
    ///
    /// Each top-level directory is printed as `name/`, followed by the files
    /// beneath it indented by four spaces, then the remaining top-level
    /// files. Order follows the recorded sequences, not a sort.
    pub fn structure(&self) -> String {
        let mut out = String::new();
        let mut listed: HashSet<&str> = HashSet::new();

        for dir in self.directories.iter().filter(|d| !d.contains('/')) {
            out.push_str(dir);
            out.push_str("/\n");

            let prefix = format!("{}/", dir);
            for entry in &self.entries {
                if let Some(rest) = entry.path.strip_prefix(&prefix) {
                    out.push_str("    ");
                    out.push_str(rest);
                    out.push('\n');
                    listed.insert(entry.path.as_str());
                }
            }
        }

        for entry in &self.entries {
            if !listed.contains(entry.path.as_str()) {
                out.push_str(&entry.path);
                out.push('\n');
            }
        }
        out
    }

    /// Write this archive as a deflate-compressed schedule file at `dest`.
    ///
    /// The contents are first rebuilt as a staging tree, and the archive is
    /// produced by walking that tree, so every recorded directory appears as
    /// an explicit entry even when empty.
    pub async fn save(&self, dest: &Path) -> Result<()> {
        let staging = staging_dir(None)?;
        self.stage(staging.path()).await?;
        let entries = write_tree(staging.path(), dest).await?;

        info!(dest = %dest.display(), entries, "saved schedule");
        Ok(())
    }

    /// Materialize this archive as `output_dir/scheduleN`, where N is one more
    /// than the number of items already in `output_dir`.
    ///
    /// Every call creates a new numbered directory, even for identical content.
    pub async fn expand_to_dir(&self, output_dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(output_dir).await?;

        let mut existing = 0usize;
        let mut read_dir = fs::read_dir(output_dir).await?;
        while read_dir.next_entry().await?.is_some() {
            existing += 1;
        }
        let schedule_path = output_dir.join(format!("{}{}", SCHEDULE_DIR_PREFIX, existing + 1));
        fs::create_dir_all(&schedule_path).await?;

        let staging = staging_dir(None)?;
        self.stage(staging.path()).await?;

        let mut top_level = fs::read_dir(staging.path()).await?;
        while let Some(item) = top_level.next_entry().await? {
            let target = schedule_path.join(item.file_name());
            if item.file_type().await?.is_dir() {
                copy_tree(&item.path(), &target).await?;
            } else {
                fs::copy(item.path(), &target).await?;
            }
        }

        info!(path = %schedule_path.display(), "expanded schedule");
        Ok(schedule_path)
    }

    /// Rebuild the archive's contents under `root`: directories first, then files.
    async fn stage(&self, root: &Path) -> Result<()> {
        for dir in &self.directories {
            fs::create_dir_all(safe_join(root, dir)?).await?;
        }
        for entry in &self.entries {
            let path = safe_join(root, &entry.path)?;
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::write(&path, &entry.data).await?;
        }
        Ok(())
    }
}

/// Pack the directory tree at `source` into a schedule file at `dest`.
///
/// Returns the number of entries written.
pub async fn compose_dir(source: &Path, dest: &Path) -> Result<usize> {
    let metadata = fs::metadata(source)
        .await
        .map_err(|e| EwsxError::from_open(e, source))?;
    if !metadata.is_dir() {
        return Err(EwsxError::InvalidFormat(format!(
            "{} is not a directory",
            source.display()
        )));
    }

    let entries = write_tree(source, dest).await?;
    info!(source = %source.display(), dest = %dest.display(), entries, "composed schedule");
    Ok(entries)
}

fn staging_dir(temp_root: Option<&Path>) -> Result<TempDir> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("ewsx-");
    let dir = match temp_root {
        Some(root) => builder.tempdir_in(root)?,
        None => builder.tempdir()?,
    };
    Ok(dir)
}

type TreeListing = (Vec<(String, PathBuf)>, Vec<(String, PathBuf)>);

/// Walk `root` in file-name order, returning (directories, files) as
/// forward-slash relative paths paired with their full paths.
fn collect_tree(root: &Path) -> Result<TreeListing> {
    let mut directories = Vec::new();
    let mut files = Vec::new();

    for item in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let item = item.map_err(std::io::Error::from)?;
        let relative = relative_name(root, item.path())?;

        if item.file_type().is_dir() {
            directories.push((relative, item.path().to_path_buf()));
        } else if item.file_type().is_file() {
            files.push((relative, item.path().to_path_buf()));
        } else {
            debug!(path = %item.path().display(), "skipping non-regular file");
        }
    }
    Ok((directories, files))
}

fn relative_name(root: &Path, path: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| EwsxError::UnsafePath(path.display().to_string()))?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}

/// Zip every directory and file under `root` into `dest`.
async fn write_tree(root: &Path, dest: &Path) -> Result<usize> {
    let (directories, files) = collect_tree(root)?;
    let mut writer = ZipWriter::new(Vec::new());

    for (relative, full) in &directories {
        writer.add_directory(relative, modified(full).await)?;
    }
    for (relative, full) in &files {
        let data = fs::read(full).await?;
        debug!(entry = %relative, bytes = data.len(), "adding file");
        writer.add_file(relative, &data, modified(full).await)?;
    }

    let count = writer.len();
    let bytes = writer.finish()?;
    fs::write(dest, bytes).await?;
    Ok(count)
}

async fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).await.ok()?.modified().ok()
}

/// Recursively copy `src` into `dst`, merging with whatever `dst` already holds.
async fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst).await?;
    let (directories, files) = collect_tree(src)?;
    for (relative, _) in &directories {
        fs::create_dir_all(safe_join(dst, relative)?).await?;
    }
    for (relative, full) in &files {
        fs::copy(full, safe_join(dst, relative)?).await?;
    }
    Ok(())
}
