//! MirrorSync - Primary/Replica File Mirroring
//!
//! A single authoritative Primary node holds a set of named files; any
//! number of Replica nodes keep local mirrors reconciled against it, and
//! clients download files from whichever node is reachable, failing over
//! between candidates and resuming partial transfers.
//!
//! # Architecture
//!
//! Reconciliation is manifest-based: a node's manifest (name + size
//! pairs) is always recomputed live from its store, and size-on-disk is
//! the only state used for diffing - there is no transaction log, no
//! sidecar metadata, and deliberately no content checksum. Transfers are
//! resumable byte-range reads; an interrupted transfer leaves a partial
//! file that the next attempt continues from. Convergence is eventual:
//! any replica state (empty, partial, stale superset) is a valid input to
//! the next pull-sync run.
//!
//! # Features
//!
//! - Manifest diffing with resume offsets and corruption repair
//! - Resumable range transfer with inactivity timeout and truncation
//!   detection
//! - Replica registration and discovery on the Primary
//! - Client downloads with ordered failover across Primary and replicas
//! - Multiple node identities per process, each hard-stoppable

pub mod client;
pub mod config;
pub mod download;
pub mod error;
pub mod events;
pub mod node;
pub mod store;
pub mod sync;
pub mod transfer;

pub use config::MirrorConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::MirrorConfig;
    pub use crate::download::FailoverDownloader;
    pub use crate::error::{Error, Result};
    pub use crate::events::{Event, EventBus, StatusKind};
    pub use crate::node::{NodeKey, NodeRole, NodeSupervisor};
    pub use crate::store::{LocalStore, ManifestEntry};
    pub use crate::sync::{PullSync, PushSync, SyncPlan};
    pub use crate::transfer::TransferClient;
}
