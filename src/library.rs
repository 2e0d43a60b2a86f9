//! Source video library.
//!
//! A single flat storage directory: listing offers the streamable files in
//! it, uploads land in it under their sanitised file name.

use hlsduo_common::paths::{is_video_file, sanitize_file_name};
use hlsduo_common::{Error, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// One entry of the library listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoInfo {
    pub name: String,
    /// Path accepted by the stream start endpoint.
    pub path: String,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct VideoLibrary {
    root: PathBuf,
}

impl VideoLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the storage directory if it is missing.
    pub async fn ensure_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| Error::io(format!("failed to create {}", self.root.display()), e))
    }

    /// Streamable files directly inside the storage directory, by name.
    pub async fn list(&self) -> Result<Vec<VideoInfo>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::io(format!("failed to read {}", self.root.display()), e));
            }
        };

        let mut videos = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::io(format!("failed to read {}", self.root.display()), e))?
        {
            let path = entry.path();
            if !is_video_file(&path) {
                continue;
            }
            // Entries that vanish or cannot be stat'ed are skipped.
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            videos.push(VideoInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: path.to_string_lossy().into_owned(),
                size: meta.len(),
            });
        }

        videos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(videos)
    }

    /// Open an upload for `file_name`.
    ///
    /// The bytes go to a hidden partial file that only replaces the target
    /// on [`Upload::finish`].
    ///
    /// # Errors
    ///
    /// [`Error::InvalidInput`] if the name has no usable final component.
    pub async fn begin_upload(&self, file_name: &str) -> Result<Upload> {
        let name = sanitize_file_name(file_name)
            .ok_or_else(|| Error::invalid_input(format!("invalid file name: {file_name:?}")))?;

        self.ensure_dir().await?;
        let dest = self.root.join(&name);
        let partial = self.root.join(format!(".{name}.part"));
        let file = tokio::fs::File::create(&partial)
            .await
            .map_err(|e| Error::io(format!("failed to create {}", partial.display()), e))?;

        Ok(Upload {
            name,
            dest,
            partial,
            file,
            written: 0,
        })
    }
}

/// An upload in progress.
#[derive(Debug)]
pub struct Upload {
    name: String,
    dest: PathBuf,
    partial: PathBuf,
    file: tokio::fs::File,
    written: u64,
}

impl Upload {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        self.file
            .write_all(chunk)
            .await
            .map_err(|e| Error::io(format!("failed to write {}", self.partial.display()), e))?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    /// Flush and move the upload into place. Returns the stored file name.
    pub async fn finish(mut self) -> Result<String> {
        self.file
            .flush()
            .await
            .map_err(|e| Error::io(format!("failed to write {}", self.partial.display()), e))?;
        drop(self.file);

        tokio::fs::rename(&self.partial, &self.dest)
            .await
            .map_err(|e| Error::io(format!("failed to store {}", self.dest.display()), e))?;

        tracing::info!(file = %self.dest.display(), bytes = self.written, "Upload stored");
        Ok(self.name)
    }

    /// Discard the partial file.
    pub async fn abort(self) {
        drop(self.file);
        if let Err(e) = tokio::fs::remove_file(&self.partial).await {
            tracing::debug!("Failed to remove {}: {e}", self.partial.display());
        }
    }
}
