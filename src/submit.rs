//! Archive of user-submitted images
//!
//! Uploads sent to `/submit/` are kept on disk for later labelling. Each file
//! is stored as `<UTC timestamp>_<sanitized name>` inside the archive
//! directory; existing files are never overwritten and a failed write never
//! leaves a partial file.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncWriteExt};

use crate::error::{MagnoliaError, Result};

/// Name used when the client sends no usable filename
pub const FALLBACK_NAME: &str = "upload";

/// A submission written to the archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredSubmission {
    /// Client-supplied filename after sanitizing
    pub original_name: String,
    /// Full path of the stored file
    pub path: PathBuf,
    /// Bytes written
    pub bytes: u64,
}

/// Directory-backed submission store
#[derive(Debug, Clone)]
pub struct SubmissionArchive {
    dir: PathBuf,
}

impl SubmissionArchive {
    /// Archive rooted at `dir`; the directory is created on first store
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Archive directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `bytes` under a timestamped copy of `filename`
    ///
    /// # Errors
    ///
    /// - [`MagnoliaError::EmptyUpload`] if `bytes` is empty
    /// - [`MagnoliaError::Io`] if the directory or file cannot be written
    pub async fn store(&self, filename: Option<&str>, bytes: &[u8]) -> Result<StoredSubmission> {
        if bytes.is_empty() {
            return Err(MagnoliaError::EmptyUpload);
        }
        self.store_from(filename, bytes).await
    }

    /// Stream `source` into the archive
    ///
    /// Data is staged in a hidden temporary file and only renamed into place
    /// once fully written, so a failed write leaves nothing behind.
    async fn store_from<R>(&self, filename: Option<&str>, mut source: R) -> Result<StoredSubmission>
    where
        R: AsyncRead + Unpin,
    {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            MagnoliaError::Io(format!("cannot create {}: {e}", self.dir.display()))
        })?;

        let staging = tempfile::Builder::new()
            .prefix(".magnolia-submission-")
            .suffix(".part")
            .tempfile_in(&self.dir)
            .map_err(|e| staging_err(&self.dir, &e))?;
        let mut file =
            tokio::fs::File::from_std(staging.reopen().map_err(|e| staging_err(&self.dir, &e))?);

        let written = tokio::io::copy(&mut source, &mut file)
            .await
            .map_err(|e| staging_err(&self.dir, &e))?;
        file.flush().await.map_err(|e| staging_err(&self.dir, &e))?;
        drop(file);

        if written == 0 {
            return Err(MagnoliaError::EmptyUpload);
        }

        let original_name = sanitize_filename(filename.unwrap_or_default());
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        let path = persist_unique(staging, &self.dir, &format!("{stamp}_{original_name}"))?;

        tracing::info!(path = %path.display(), bytes = written, "stored submission");
        Ok(StoredSubmission {
            original_name,
            path,
            bytes: written,
        })
    }
}

fn staging_err(dir: &Path, err: &std::io::Error) -> MagnoliaError {
    MagnoliaError::Io(format!("cannot stage submission in {}: {err}", dir.display()))
}

/// Move `staging` to `base` in `dir`, prefixing `<n>-` until the name is free
fn persist_unique(mut staging: NamedTempFile, dir: &Path, base: &str) -> Result<PathBuf> {
    let mut attempt = 0usize;
    loop {
        let name = if attempt == 0 {
            base.to_string()
        } else {
            format!("{attempt}-{base}")
        };
        let path = dir.join(name);
        match staging.persist_noclobber(&path) {
            Ok(_) => return Ok(path),
            Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists && attempt < 1000 => {
                staging = e.file;
                attempt += 1;
            },
            Err(e) => {
                return Err(MagnoliaError::Io(format!(
                    "cannot create {}: {}",
                    path.display(),
                    e.error
                )));
            },
        }
    }
}

/// Reduce a client filename to a safe single path component
///
/// Keeps only the last component (either separator) and maps every character
/// outside `[A-Za-z0-9._-]` to `_`. Names that end up empty or consist only
/// of dots become [`FALLBACK_NAME`].
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let last = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = last
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.trim_matches('.').is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        cleaned
    }
}
