//! Node Supervisor
//!
//! Owns the table of running node identities in this process: at most one
//! Primary plus any number of Replicas, each with its own port and
//! storage root. Operations address nodes through this table; there is no
//! ambient global state.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::Mutex;

use super::{NodeHandle, NodeIdentity, NodeRole, NodeRuntime, ReplicaRegistry};
use crate::config::{PrimaryConfig, ReplicaConfig, TransferConfig};
use crate::client::ControlClient;
use crate::error::{Error, Result};
use crate::events::{EventBus, StatusKind};
use crate::store::LocalStore;
use crate::sync::{PullSync, SyncReport};
use crate::transfer::TransferClient;

/// Key of one node identity in the supervisor's table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKey {
    Primary,
    Replica(u32),
}

impl std::fmt::Display for NodeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKey::Primary => write!(f, "PRIMARY"),
            NodeKey::Replica(id) => write!(f, "REPLICA {}", id),
        }
    }
}

struct SupervisedNode {
    handle: NodeHandle,
    store: LocalStore,
    /// Replica only: where this node registers and syncs from
    primary_address: Option<String>,
    /// Replica only: the address it registered under
    advertise_address: Option<String>,
}

/// Supervisor for every node identity hosted by this process
pub struct NodeSupervisor {
    nodes: Mutex<HashMap<NodeKey, SupervisedNode>>,
    control: ControlClient,
    transfer: TransferClient,
    events: EventBus,
}

impl NodeSupervisor {
    /// Create a supervisor with the given transfer tuning
    pub fn new(transfer_config: &TransferConfig, events: EventBus) -> Result<Self> {
        let connect = std::time::Duration::from_millis(transfer_config.connect_timeout_ms);
        let idle = std::time::Duration::from_millis(transfer_config.idle_timeout_ms);
        let progress = std::time::Duration::from_millis(transfer_config.progress_interval_ms);

        Ok(Self {
            nodes: Mutex::new(HashMap::new()),
            control: ControlClient::new(connect)?,
            transfer: TransferClient::new(connect, idle, progress, events.clone())?,
            events,
        })
    }

    /// Start the Primary identity
    pub async fn start_primary(&self, config: &PrimaryConfig) -> Result<SocketAddr> {
        let mut nodes = self.nodes.lock().await;
        if nodes.contains_key(&NodeKey::Primary) {
            return Err(Error::StateConflict("primary is already running".into()));
        }

        let identity = NodeIdentity::primary(&config.bind_address, &config.storage_root);
        let runtime = NodeRuntime::new(identity, self.events.clone()).await?;
        let store = runtime.store().clone();
        let handle = runtime.start().await?;
        let addr = handle.local_addr();

        self.events.status(
            NodeRole::Primary,
            None,
            StatusKind::Success,
            format!("Primary running on {}", addr),
        );

        nodes.insert(
            NodeKey::Primary,
            SupervisedNode {
                handle,
                store,
                primary_address: None,
                advertise_address: None,
            },
        );
        Ok(addr)
    }

    /// Start one Replica identity, register it with the Primary, and
    /// trigger an initial pull-sync. Registration and sync run as an
    /// ordered background pipeline; each step downgrades failure to a
    /// status notification.
    pub async fn start_replica(&self, config: &ReplicaConfig) -> Result<SocketAddr> {
        let key = NodeKey::Replica(config.id);
        let mut nodes = self.nodes.lock().await;
        if nodes.contains_key(&key) {
            return Err(Error::StateConflict(format!(
                "replica {} is already running",
                config.id
            )));
        }

        let identity = NodeIdentity::replica(config.id, &config.bind_address, &config.storage_root);
        let runtime = NodeRuntime::new(identity, self.events.clone()).await?;
        let store = runtime.store().clone();
        let handle = runtime.start().await?;
        let addr = handle.local_addr();

        let advertise = advertise_address(config, addr);
        self.events.status(
            NodeRole::Replica,
            Some(config.id),
            StatusKind::Success,
            format!("Replica {} running on {}", config.id, addr),
        );

        nodes.insert(
            key,
            SupervisedNode {
                handle,
                store: store.clone(),
                primary_address: Some(config.primary_address.clone()),
                advertise_address: Some(advertise.clone()),
            },
        );
        drop(nodes);

        // register -> sync, in order, off the caller's path
        let control = self.control.clone();
        let transfer = self.transfer.clone();
        let events = self.events.clone();
        let primary_address = config.primary_address.clone();
        let replica_id = config.id;
        tokio::spawn(async move {
            match control.register(&primary_address, &advertise).await {
                Ok(()) => {
                    tracing::info!("Replica {} registered with {}", replica_id, primary_address);
                }
                Err(e) => {
                    events.status(
                        NodeRole::Replica,
                        Some(replica_id),
                        StatusKind::Warning,
                        format!("registration with {} failed: {}", primary_address, e),
                    );
                }
            }

            let engine = PullSync::new(
                replica_id,
                store,
                primary_address,
                control,
                transfer,
                events.clone(),
            );
            if let Err(e) = engine.run().await {
                events.status(
                    NodeRole::Replica,
                    Some(replica_id),
                    StatusKind::Error,
                    format!("initial sync failed: {}", e),
                );
            }
        });

        Ok(addr)
    }

    /// Run a pull-sync pass for one running replica, returning its report
    pub async fn trigger_pull_sync(&self, replica_id: u32) -> Result<SyncReport> {
        let (store, primary_address) = {
            let nodes = self.nodes.lock().await;
            let node = nodes
                .get(&NodeKey::Replica(replica_id))
                .ok_or_else(|| Error::NodeNotRunning(format!("replica {}", replica_id)))?;
            let primary = node.primary_address.clone().ok_or_else(|| {
                Error::Internal(format!("replica {} has no primary address", replica_id))
            })?;
            (node.store.clone(), primary)
        };

        PullSync::new(
            replica_id,
            store,
            primary_address,
            self.control.clone(),
            self.transfer.clone(),
            self.events.clone(),
        )
        .run()
        .await
    }

    /// Hard-stop one node. A Replica is best-effort unregistered from the
    /// Primary first; the Primary's registry vanishes with it.
    pub async fn stop(&self, key: NodeKey) -> Result<()> {
        let node = {
            let mut nodes = self.nodes.lock().await;
            nodes
                .remove(&key)
                .ok_or_else(|| Error::NodeNotRunning(key.to_string()))?
        };

        if let (Some(primary), Some(advertise)) =
            (&node.primary_address, &node.advertise_address)
        {
            if let Err(e) = self.control.unregister(primary, advertise).await {
                tracing::warn!("Unregister of {} failed: {}", advertise, e);
            }
        }

        let (role, replica_id) = match key {
            NodeKey::Primary => (NodeRole::Primary, None),
            NodeKey::Replica(id) => (NodeRole::Replica, Some(id)),
        };
        node.handle.hard_stop().await;
        self.events
            .status(role, replica_id, StatusKind::Info, format!("{} stopped", key));
        Ok(())
    }

    /// Hard-stop every running node
    pub async fn stop_all(&self) {
        let keys: Vec<NodeKey> = {
            let nodes = self.nodes.lock().await;
            nodes.keys().copied().collect()
        };
        // Replicas first so their unregister calls still reach the primary
        for key in keys
            .iter()
            .filter(|k| matches!(k, NodeKey::Replica(_)))
            .chain(keys.iter().filter(|k| matches!(k, NodeKey::Primary)))
        {
            let _ = self.stop(*key).await;
        }
    }

    /// Bound address of a running node
    pub async fn address_of(&self, key: NodeKey) -> Option<SocketAddr> {
        let nodes = self.nodes.lock().await;
        nodes.get(&key).map(|n| n.handle.local_addr())
    }

    /// The Primary's registry, if the Primary is running here
    pub async fn primary_registry(&self) -> Option<Arc<ReplicaRegistry>> {
        let nodes = self.nodes.lock().await;
        nodes.get(&NodeKey::Primary).and_then(|n| n.handle.registry())
    }
}

/// The address a replica advertises: explicit config wins; otherwise the
/// bind host with the actually-bound port (the config may say port 0)
fn advertise_address(config: &ReplicaConfig, bound: SocketAddr) -> String {
    if let Some(explicit) = &config.advertise_address {
        return explicit.clone();
    }
    let host = config
        .bind_address
        .rsplit_once(':')
        .map(|(host, _)| host)
        .unwrap_or("127.0.0.1");
    let host = if host == "0.0.0.0" || host.is_empty() {
        "127.0.0.1"
    } else {
        host
    };
    format!("{}:{}", host, bound.port())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_double_start_is_state_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor =
            NodeSupervisor::new(&TransferConfig::default(), EventBus::new()).unwrap();
        let config = PrimaryConfig {
            bind_address: "127.0.0.1:0".to_string(),
            storage_root: dir.path().to_path_buf(),
        };

        supervisor.start_primary(&config).await.unwrap();
        assert!(matches!(
            supervisor.start_primary(&config).await,
            Err(Error::StateConflict(_))
        ));

        supervisor.stop(NodeKey::Primary).await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_missing_node() {
        let supervisor =
            NodeSupervisor::new(&TransferConfig::default(), EventBus::new()).unwrap();
        assert!(matches!(
            supervisor.stop(NodeKey::Replica(7)).await,
            Err(Error::NodeNotRunning(_))
        ));
    }

    #[test]
    fn test_advertise_address_fills_bound_port() {
        let config = ReplicaConfig {
            id: 1,
            bind_address: "0.0.0.0:0".to_string(),
            storage_root: "r".into(),
            primary_address: "127.0.0.1:8000".to_string(),
            advertise_address: None,
        };
        let bound: SocketAddr = "0.0.0.0:43210".parse().unwrap();
        assert_eq!(advertise_address(&config, bound), "127.0.0.1:43210");
    }
}
