//! Node Module
//!
//! One node identity (Primary or Replica) serving file-level operations,
//! plus the registry of replicas (Primary only) and the supervisor that
//! owns all running identities in a process.

mod registry;
mod runtime;
mod supervisor;

pub use registry::ReplicaRegistry;
pub use runtime::{NodeHandle, NodeRuntime};
pub use supervisor::{NodeKey, NodeSupervisor};

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Role of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeRole {
    /// The single authoritative node holding the canonical file set
    Primary,
    /// A mirror node reconciling its file set against the Primary
    Replica,
    /// A pure downloader; never serves files (used only in notifications)
    Client,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Primary => write!(f, "PRIMARY"),
            NodeRole::Replica => write!(f, "REPLICA"),
            NodeRole::Client => write!(f, "CLIENT"),
        }
    }
}

/// Identity of one running node
#[derive(Debug, Clone)]
pub struct NodeIdentity {
    /// Role served by this identity
    pub role: NodeRole,
    /// Replica id (`None` for the Primary)
    pub replica_id: Option<u32>,
    /// Address the listener binds
    pub bind_address: String,
    /// Directory holding this node's files
    pub storage_root: PathBuf,
}

impl NodeIdentity {
    /// Identity for the primary node
    pub fn primary(bind_address: impl Into<String>, storage_root: impl Into<PathBuf>) -> Self {
        Self {
            role: NodeRole::Primary,
            replica_id: None,
            bind_address: bind_address.into(),
            storage_root: storage_root.into(),
        }
    }

    /// Identity for one replica node
    pub fn replica(
        id: u32,
        bind_address: impl Into<String>,
        storage_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            role: NodeRole::Replica,
            replica_id: Some(id),
            bind_address: bind_address.into(),
            storage_root: storage_root.into(),
        }
    }

    /// Human-readable label, e.g. `PRIMARY` or `REPLICA 2`
    pub fn label(&self) -> String {
        match self.replica_id {
            Some(id) => format!("{} {}", self.role, id),
            None => self.role.to_string(),
        }
    }
}
