//! Failover Download Controller
//!
//! Client-role downloads: build an ordered candidate list (primary first,
//! then the primary's registry snapshot), then walk it, resuming from
//! whatever bytes are already on disk and abandoning a candidate on its
//! first failure. A candidate is never retried within one session; a
//! fresh trigger starts a fresh session with an empty failed set.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::client::ControlClient;
use crate::error::{Error, Result};
use crate::events::{EventBus, StatusKind};
use crate::node::NodeRole;
use crate::store::validate_name;
use crate::transfer::{FetchOutcome, TransferClient};

/// Outcome of a successful failover download
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadReport {
    pub filename: String,
    /// The candidate that served the final, successful attempt
    pub endpoint: String,
    /// Bytes moved by the final attempt (0 when the file was already
    /// complete on disk)
    pub bytes_received: u64,
    pub dest: PathBuf,
}

/// Failover download controller
pub struct FailoverDownloader {
    control: ControlClient,
    transfer: TransferClient,
    events: EventBus,
}

impl FailoverDownloader {
    pub fn new(control: ControlClient, transfer: TransferClient, events: EventBus) -> Self {
        Self {
            control,
            transfer,
            events,
        }
    }

    /// Download `filename` into `dest_dir`, trying the primary first and
    /// then every replica in its registry snapshot. On exhaustion the
    /// partial bytes stay in place; a future trigger resumes from them.
    pub async fn download(
        &self,
        primary_address: &str,
        filename: &str,
        dest_dir: &Path,
    ) -> Result<DownloadReport> {
        validate_name(filename)?;
        fs::create_dir_all(dest_dir).await?;
        let dest = dest_dir.join(filename);

        // Candidate list is fixed at invocation time: primary first, then
        // the registry snapshot in whatever order it came back.
        let mut candidates = vec![primary_address.to_string()];
        match self.control.replicas(primary_address).await {
            Ok(replicas) => candidates.extend(replicas),
            Err(e) => {
                // The primary itself may still serve the file.
                self.events.status(
                    NodeRole::Client,
                    None,
                    StatusKind::Warning,
                    format!("could not fetch replica list: {}; trying the primary only", e),
                );
            }
        }

        self.events.status(
            NodeRole::Client,
            None,
            StatusKind::Info,
            format!("Starting download of {} ({} candidates)", filename, candidates.len()),
        );

        let mut failed = vec![false; candidates.len()];

        loop {
            // The offset may have advanced during a failed attempt, so it
            // is recomputed from disk on every pass.
            let resume_from = match fs::metadata(&dest).await {
                Ok(meta) => meta.len(),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
                Err(e) => return Err(e.into()),
            };

            let Some(idx) = failed.iter().position(|f| !f) else {
                self.events.status(
                    NodeRole::Client,
                    None,
                    StatusKind::Warning,
                    format!(
                        "All candidates failed; download of {} paused at {} bytes",
                        filename, resume_from
                    ),
                );
                return Err(Error::ExhaustedFailover {
                    filename: filename.to_string(),
                    attempted: candidates.len(),
                    bytes_preserved: resume_from,
                });
            };
            let endpoint = candidates[idx].clone();

            self.events.status(
                NodeRole::Client,
                None,
                StatusKind::Info,
                format!("Trying {} from {} (resume at {})", filename, endpoint, resume_from),
            );

            match self
                .transfer
                .fetch_file(&endpoint, filename, &dest, resume_from)
                .await
            {
                Ok(outcome) => {
                    let bytes_received = match outcome {
                        FetchOutcome::Completed { bytes_received } => bytes_received,
                        // RangeNotSatisfiable on resume: the file was
                        // already complete on disk.
                        FetchOutcome::AlreadyComplete => 0,
                    };
                    self.events.status(
                        NodeRole::Client,
                        None,
                        StatusKind::Success,
                        format!("Download of {} complete from {}", filename, endpoint),
                    );
                    return Ok(DownloadReport {
                        filename: filename.to_string(),
                        endpoint,
                        bytes_received,
                        dest,
                    });
                }
                Err(e) => {
                    tracing::warn!("Candidate {} failed for {}: {}", endpoint, filename, e);
                    self.events.status(
                        NodeRole::Client,
                        None,
                        StatusKind::Warning,
                        format!("{} failed: {}", endpoint, e),
                    );
                    failed[idx] = true;
                }
            }
        }
    }
}
