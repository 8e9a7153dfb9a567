//! Push-Sync Engine
//!
//! Legacy operator-triggered path: the primary diffs plain name lists
//! against one replica, uploads what the replica lacks, and pulls back
//! what it alone holds. No sizes are compared, so partial files go
//! undetected - the pull engine is the correct reconciler.

use serde::{Deserialize, Serialize};

use crate::client::ControlClient;
use crate::error::Result;
use crate::events::{EventBus, StatusKind};
use crate::node::NodeRole;
use crate::store::LocalStore;
use crate::transfer::TransferClient;

/// Outcome of one push-sync run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushReport {
    /// Names uploaded to the replica
    pub uploaded: Vec<String>,
    /// Names fetched back from the replica
    pub fetched: Vec<String>,
}

/// Push-sync engine, run from the primary's store
pub struct PushSync {
    store: LocalStore,
    control: ControlClient,
    transfer: TransferClient,
    events: EventBus,
}

impl PushSync {
    pub fn new(
        store: LocalStore,
        control: ControlClient,
        transfer: TransferClient,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            control,
            transfer,
            events,
        }
    }

    /// Run a name-only reconciliation against one replica address.
    /// Best-effort: the first failed transfer aborts the run.
    pub async fn run(&self, replica_address: &str) -> Result<PushReport> {
        let local_names = self.store.list_names().await?;
        let remote_names = self.control.list_files(replica_address).await?;

        let missing_on_replica: Vec<&String> = local_names
            .iter()
            .filter(|n| !remote_names.contains(n))
            .collect();
        let missing_on_primary: Vec<&String> = remote_names
            .iter()
            .filter(|n| !local_names.contains(n))
            .collect();

        tracing::info!(
            "Push sync with {}: {} to upload, {} to fetch back",
            replica_address,
            missing_on_replica.len(),
            missing_on_primary.len()
        );

        let mut uploaded = Vec::new();
        for name in missing_on_replica {
            let path = self.store.path_for(name)?;
            self.control.upload_file(replica_address, name, &path).await?;
            tracing::debug!("Uploaded {} to {}", name, replica_address);
            uploaded.push(name.clone());
        }

        let mut fetched = Vec::new();
        for name in missing_on_primary {
            let dest = self.store.path_for(name)?;
            self.transfer
                .fetch_file(replica_address, name, &dest, 0)
                .await?;
            tracing::debug!("Fetched {} back from {}", name, replica_address);
            fetched.push(name.clone());
        }

        if !fetched.is_empty() {
            self.events.file_list_changed(NodeRole::Primary, None);
        }
        self.events.status(
            NodeRole::Primary,
            None,
            StatusKind::Success,
            format!(
                "Push sync: {} uploaded, {} fetched back",
                uploaded.len(),
                fetched.len()
            ),
        );

        Ok(PushReport { uploaded, fetched })
    }
}
