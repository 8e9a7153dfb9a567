//! Pull-Sync Engine
//!
//! Run by (or on behalf of) a replica: fetch the primary's manifest, diff
//! it against the local store, and execute the resulting plan as an
//! ordered pipeline - deletions first, then sequential resumable
//! downloads with a per-file result. Convergent and idempotent: a crashed
//! run leaves the store as a valid input to the next run, and re-running
//! against an unchanged primary is a no-op.

use serde::{Deserialize, Serialize};

use super::{PlannedDownload, SyncPlan};
use crate::client::ControlClient;
use crate::error::Result;
use crate::events::{Event, EventBus, StatusKind};
use crate::node::NodeRole;
use crate::store::LocalStore;
use crate::transfer::{FetchOutcome, TransferClient};

/// Per-file result of an executed plan step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileOutcome {
    Downloaded { bytes: u64 },
    AlreadyComplete,
    Failed { reason: String },
}

/// Outcome of one pull-sync run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    /// The plan this run executed
    pub plan: SyncPlan,
    /// Names actually removed locally
    pub deleted: Vec<String>,
    /// Result per scheduled download, in plan order; shorter than the
    /// plan when a failure aborted the run
    pub results: Vec<(String, FileOutcome)>,
    /// Whether a download failure aborted the remainder of the plan
    pub aborted: bool,
}

impl SyncReport {
    /// Whether every scheduled step ran successfully
    pub fn is_success(&self) -> bool {
        !self.aborted
    }
}

/// Pull-sync engine for one replica identity
pub struct PullSync {
    replica_id: u32,
    store: LocalStore,
    primary_address: String,
    control: ControlClient,
    transfer: TransferClient,
    events: EventBus,
}

impl PullSync {
    pub fn new(
        replica_id: u32,
        store: LocalStore,
        primary_address: impl Into<String>,
        control: ControlClient,
        transfer: TransferClient,
        events: EventBus,
    ) -> Self {
        Self {
            replica_id,
            store,
            primary_address: primary_address.into(),
            control,
            transfer,
            events,
        }
    }

    /// Run one sync pass. Fails only if the manifests cannot be obtained;
    /// plan-execution failures are recorded in the report and surfaced as
    /// status notifications instead.
    pub async fn run(&self) -> Result<SyncReport> {
        let remote = self.control.manifest(&self.primary_address).await?;
        let local = self.store.manifest().await?;

        let plan = SyncPlan::compute(&remote, &local);
        tracing::info!(
            "Replica {}: sync plan has {} downloads, {} deletes",
            self.replica_id,
            plan.downloads.len(),
            plan.deletes.len()
        );

        self.events.emit(Event::SyncPlanReady {
            replica_id: self.replica_id,
            downloads: plan.download_names(),
            deletes: plan.deletes.clone(),
        });

        let report = self.execute(plan).await;

        // The manifest may have changed even on an aborted run.
        self.events
            .file_list_changed(NodeRole::Replica, Some(self.replica_id));

        let summary = format!(
            "Sync {}: {} deleted, {} of {} downloads done",
            if report.is_success() { "complete" } else { "aborted" },
            report.deleted.len(),
            report
                .results
                .iter()
                .filter(|(_, o)| !matches!(o, FileOutcome::Failed { .. }))
                .count(),
            report.plan.downloads.len(),
        );
        self.events.status(
            NodeRole::Replica,
            Some(self.replica_id),
            if report.is_success() { StatusKind::Success } else { StatusKind::Warning },
            summary,
        );

        Ok(report)
    }

    /// Execute a computed plan: deletions, then sequential downloads
    /// against the primary. The first download failure aborts the rest;
    /// whatever partial bytes it wrote stay on disk for the next run.
    async fn execute(&self, plan: SyncPlan) -> SyncReport {
        let mut deleted = Vec::new();
        for name in &plan.deletes {
            match self.store.delete(name).await {
                Ok(true) => deleted.push(name.clone()),
                Ok(false) => {}
                Err(e) => {
                    // A corrupt copy that cannot be removed is still
                    // repaired by the truncating full download below.
                    self.events.status(
                        NodeRole::Replica,
                        Some(self.replica_id),
                        StatusKind::Warning,
                        format!("could not delete {}: {}", name, e),
                    );
                }
            }
        }

        let mut results = Vec::new();
        let mut aborted = false;

        for PlannedDownload { name, resume_from } in &plan.downloads {
            let dest = match self.store.path_for(name) {
                Ok(path) => path,
                Err(e) => {
                    results.push((name.clone(), FileOutcome::Failed { reason: e.to_string() }));
                    aborted = true;
                    break;
                }
            };

            match self
                .transfer
                .fetch_file(&self.primary_address, name, &dest, *resume_from)
                .await
            {
                Ok(FetchOutcome::Completed { bytes_received }) => {
                    tracing::debug!(
                        "Replica {}: fetched {} ({} bytes from offset {})",
                        self.replica_id,
                        name,
                        bytes_received,
                        resume_from
                    );
                    results.push((name.clone(), FileOutcome::Downloaded { bytes: bytes_received }));
                }
                Ok(FetchOutcome::AlreadyComplete) => {
                    results.push((name.clone(), FileOutcome::AlreadyComplete));
                }
                Err(e) => {
                    self.events.status(
                        NodeRole::Replica,
                        Some(self.replica_id),
                        StatusKind::Error,
                        format!("download of {} failed: {}", name, e),
                    );
                    results.push((name.clone(), FileOutcome::Failed { reason: e.to_string() }));
                    aborted = true;
                    break;
                }
            }
        }

        SyncReport {
            plan,
            deleted,
            results,
            aborted,
        }
    }
}
