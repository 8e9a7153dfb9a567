//! Resumable Download
//!
//! Streams one named file from a node into a local destination path,
//! appending when resuming and truncating when starting fresh. Detects
//! stalled peers with a per-chunk inactivity timeout and peers that close
//! mid-stream by comparing received bytes against the expected total.

use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use reqwest::header;
use reqwest::StatusCode;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use super::ProgressSampler;
use crate::client::{classify_request_error, node_url};
use crate::error::{Error, Result};
use crate::events::{Event, EventBus};

/// Result of one fetch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The transfer ran to completion; `bytes_received` counts only the
    /// bytes moved by this attempt, not a resumed prefix
    Completed { bytes_received: u64 },
    /// The server answered RangeNotSatisfiable for a resume request:
    /// the local copy is already complete
    AlreadyComplete,
}

/// Client for the resumable byte-transfer protocol
#[derive(Debug, Clone)]
pub struct TransferClient {
    http: reqwest::Client,
    idle_timeout: Duration,
    progress_interval: Duration,
    events: EventBus,
}

impl TransferClient {
    /// Create a transfer client. `connect_timeout` bounds connection
    /// establishment only; streaming is bounded by `idle_timeout` per
    /// received chunk, not by an overall deadline.
    pub fn new(
        connect_timeout: Duration,
        idle_timeout: Duration,
        progress_interval: Duration,
        events: EventBus,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            idle_timeout,
            progress_interval,
            events,
        })
    }

    /// Fetch `name` from the node at `address` into `dest`, resuming from
    /// byte `resume_from`.
    ///
    /// Contract: offset 0 requires a Full (200) answer; offset > 0
    /// requires Partial (206) or RangeNotSatisfiable (416, reported as
    /// [`FetchOutcome::AlreadyComplete`]). On any failure the bytes
    /// already written stay on disk for a later resume.
    pub async fn fetch_file(
        &self,
        address: &str,
        name: &str,
        dest: &Path,
        resume_from: u64,
    ) -> Result<FetchOutcome> {
        let url = node_url(address, "files", Some(name))?;

        let mut request = self.http.get(url);
        if resume_from > 0 {
            request = request.header(header::RANGE, format!("bytes={}-", resume_from));
        }

        let response = request
            .send()
            .await
            .map_err(|e| classify_request_error(address, e))?;

        match response.status() {
            StatusCode::OK if resume_from == 0 => {}
            StatusCode::PARTIAL_CONTENT if resume_from > 0 => {}
            StatusCode::RANGE_NOT_SATISFIABLE if resume_from > 0 => {
                tracing::debug!("{} already complete on disk ({} bytes)", name, resume_from);
                return Ok(FetchOutcome::AlreadyComplete);
            }
            status => {
                return Err(Error::UnexpectedStatus {
                    address: address.to_string(),
                    status: status.as_u16(),
                });
            }
        }

        let content_length = response.content_length().ok_or_else(|| {
            Error::Protocol(format!("{} sent no content length for {}", address, name))
        })?;
        let expected_total = resume_from + content_length;

        let mut file = if resume_from > 0 {
            OpenOptions::new().create(true).append(true).open(dest).await?
        } else {
            OpenOptions::new().create(true).write(true).truncate(true).open(dest).await?
        };

        tracing::debug!(
            "Fetching {} from {} (resume at {}, {} bytes to go)",
            name,
            address,
            resume_from,
            content_length
        );

        let mut received = resume_from;
        let mut sampler = ProgressSampler::new(resume_from, expected_total, self.progress_interval);
        let mut stream = response.bytes_stream();

        loop {
            // The timeout is re-armed for every chunk: a true inactivity
            // timeout, not an overall deadline.
            let chunk = match tokio::time::timeout(self.idle_timeout, stream.next()).await {
                Err(_) => {
                    file.flush().await?;
                    return Err(Error::IdleTimeout(address.to_string()));
                }
                Ok(None) => break,
                Ok(Some(Ok(chunk))) => chunk,
                Ok(Some(Err(e))) => {
                    file.flush().await?;
                    return Err(classify_request_error(address, e));
                }
            };

            file.write_all(&chunk).await?;
            received += chunk.len() as u64;

            if let Some((percent, bytes_per_sec)) = sampler.sample(received) {
                self.events.emit(Event::TransferProgress {
                    filename: name.to_string(),
                    percent,
                    bytes_per_sec,
                });
            }
        }

        file.flush().await?;

        // The peer closed the stream before delivering everything it
        // promised: a mid-transfer disconnect, not a clean EOF.
        if received < expected_total {
            return Err(Error::Truncated {
                received,
                expected: expected_total,
            });
        }

        self.events.emit(Event::TransferProgress {
            filename: name.to_string(),
            percent: 100,
            bytes_per_sec: 0,
        });

        Ok(FetchOutcome::Completed {
            bytes_received: received - resume_from,
        })
    }
}
