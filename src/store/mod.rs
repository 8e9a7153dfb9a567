//! Local Store
//!
//! Per-node directory of uniquely-named files. The manifest is always
//! recomputed live from the directory; size-on-disk is the only state
//! used for reconciliation (no sidecar metadata).

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

use crate::error::{Error, Result};

/// One file in a node's manifest.
///
/// `size` is `None` when the file exists but its size could not be read;
/// a single unreadable entry must not abort the whole manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub name: String,
    pub size: Option<u64>,
}

/// A node's file directory
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Open a store rooted at `root`, creating the directory if needed
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Root directory of this store
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a file name inside the store, rejecting traversal attempts
    pub fn path_for(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }

    /// List the names of all files currently in the store. In-flight
    /// upload temp files are never listed.
    pub async fn list_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if is_temp_name(&name) {
                continue;
            }
            if fs::metadata(entry.path()).await.map(|m| m.is_file()).unwrap_or(false) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Compute the live manifest. A stat failure for one file yields the
    /// unreadable sentinel for that entry instead of failing the call.
    pub async fn manifest(&self) -> Result<Vec<ManifestEntry>> {
        let mut manifest = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if is_temp_name(&name) {
                continue;
            }
            // A full stat, not `DirEntry::metadata`: the latter does not
            // traverse symlinks and cannot fail on a broken entry.
            match fs::metadata(entry.path()).await {
                Ok(meta) if meta.is_file() => {
                    manifest.push(ManifestEntry {
                        name,
                        size: Some(meta.len()),
                    });
                }
                Ok(_) => {} // not a regular file
                Err(e) => {
                    tracing::warn!("Could not stat {}: {}", name, e);
                    manifest.push(ManifestEntry { name, size: None });
                }
            }
        }
        // Directory order is arbitrary; name order keeps plans stable.
        manifest.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(manifest)
    }

    /// Size of a file, or `None` if it does not exist
    pub async fn size_of(&self, name: &str) -> Result<Option<u64>> {
        let path = self.path_for(name)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Open a file for reading from `offset`, returning the handle and the
    /// file's total size. `NotFound` if the name does not exist.
    pub async fn open_range(&self, name: &str, offset: u64) -> Result<(fs::File, u64)> {
        let path = self.path_for(name)?;
        let mut file = match fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let total = file.metadata().await?.len();
        if offset > 0 {
            file.seek(SeekFrom::Start(offset)).await?;
        }
        Ok((file, total))
    }

    /// Write a file from a byte stream, atomically from a reader's
    /// perspective: bytes land in a uniquely-named temp file that is
    /// renamed over the target only on clean end-of-stream. An interrupted
    /// stream removes the temp file and leaves prior content untouched.
    pub async fn write_stream<S, E>(&self, name: &str, mut stream: S) -> Result<u64>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
        E: std::fmt::Display,
    {
        let target = self.path_for(name)?;
        let tmp = self.root.join(format!(".{}.{}.partial", name, uuid::Uuid::new_v4()));

        let mut file = fs::File::create(&tmp).await?;
        let mut written: u64 = 0;

        let result = loop {
            match stream.next().await {
                Some(Ok(chunk)) => {
                    if let Err(e) = file.write_all(&chunk).await {
                        break Err(Error::Io(e));
                    }
                    written += chunk.len() as u64;
                }
                Some(Err(e)) => {
                    break Err(Error::Protocol(format!(
                        "upload stream for {} interrupted: {}",
                        name, e
                    )));
                }
                None => break Ok(()),
            }
        };

        match result {
            Ok(()) => {
                file.flush().await?;
                drop(file);
                fs::rename(&tmp, &target).await?;
                Ok(written)
            }
            Err(e) => {
                drop(file);
                let _ = fs::remove_file(&tmp).await;
                Err(e)
            }
        }
    }

    /// Delete a file. Missing files are not an error; returns whether
    /// anything was actually removed.
    pub async fn delete(&self, name: &str) -> Result<bool> {
        let path = self.path_for(name)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Reject names that could escape the store root, and the temp-file
/// pattern so remote peers cannot write or read in-flight uploads
pub(crate) fn validate_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || is_temp_name(name)
    {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Whether a directory entry is an in-flight upload temp file
fn is_temp_name(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(".partial")
}
