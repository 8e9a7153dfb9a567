//! Sync Plan
//!
//! Pure manifest diff: given the primary's manifest and a replica's local
//! manifest, compute the downloads (with resume offsets) and deletions
//! that converge the replica. Ephemeral; recomputed on every sync run.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::store::ManifestEntry;

/// One download the plan schedules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedDownload {
    pub name: String,
    /// Byte offset the transfer resumes from (0 for a full download)
    pub resume_from: u64,
}

/// The downloads and deletions needed to reconcile a replica with the
/// primary's manifest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPlan {
    pub downloads: Vec<PlannedDownload>,
    pub deletes: Vec<String>,
}

impl SyncPlan {
    /// Diff `remote` (the primary's manifest, authoritative) against
    /// `local` (the replica's).
    ///
    /// Size equality is the only change detector - there is no checksum,
    /// so two different files of identical size count as converged.
    ///
    /// Per remote entry:
    /// - absent locally: full download from 0;
    /// - local smaller: resume from the local size (partial prior transfer);
    /// - local larger: local copy is corrupt - delete, then full download;
    /// - equal: converged, no action;
    /// - either size unreadable: the resume arithmetic cannot be trusted,
    ///   so delete any local copy and download from 0.
    ///
    /// Local names absent from `remote` are deleted: a replica never
    /// retains files the primary does not have.
    pub fn compute(remote: &[ManifestEntry], local: &[ManifestEntry]) -> Self {
        let local_sizes: HashMap<&str, Option<u64>> = local
            .iter()
            .map(|e| (e.name.as_str(), e.size))
            .collect();

        let mut plan = SyncPlan::default();

        for entry in remote {
            match (local_sizes.get(entry.name.as_str()), entry.size) {
                // Absent locally
                (None, _) => plan.downloads.push(PlannedDownload {
                    name: entry.name.clone(),
                    resume_from: 0,
                }),
                // Both sizes known
                (Some(Some(local_size)), Some(remote_size)) => {
                    if *local_size < remote_size {
                        plan.downloads.push(PlannedDownload {
                            name: entry.name.clone(),
                            resume_from: *local_size,
                        });
                    } else if *local_size > remote_size {
                        plan.deletes.push(entry.name.clone());
                        plan.downloads.push(PlannedDownload {
                            name: entry.name.clone(),
                            resume_from: 0,
                        });
                    }
                    // equal: converged
                }
                // A size is unreadable on either side
                (Some(_), _) => {
                    plan.deletes.push(entry.name.clone());
                    plan.downloads.push(PlannedDownload {
                        name: entry.name.clone(),
                        resume_from: 0,
                    });
                }
            }
        }

        // Extraneous local files
        let remote_names: HashMap<&str, ()> =
            remote.iter().map(|e| (e.name.as_str(), ())).collect();
        for entry in local {
            if !remote_names.contains_key(entry.name.as_str()) {
                plan.deletes.push(entry.name.clone());
            }
        }

        plan
    }

    /// Whether the plan schedules no work (the replica is converged)
    pub fn is_empty(&self) -> bool {
        self.downloads.is_empty() && self.deletes.is_empty()
    }

    /// Names scheduled for download
    pub fn download_names(&self) -> Vec<String> {
        self.downloads.iter().map(|d| d.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, size: u64) -> ManifestEntry {
        ManifestEntry {
            name: name.to_string(),
            size: Some(size),
        }
    }

    fn unreadable(name: &str) -> ManifestEntry {
        ManifestEntry {
            name: name.to_string(),
            size: None,
        }
    }

    #[test]
    fn test_convergence_case() {
        // Primary {a:100, b:200} vs replica {a:40 partial, c:10 extraneous}
        let remote = vec![entry("a", 100), entry("b", 200)];
        let local = vec![entry("a", 40), entry("c", 10)];

        let plan = SyncPlan::compute(&remote, &local);
        assert_eq!(
            plan.downloads,
            vec![
                PlannedDownload { name: "a".into(), resume_from: 40 },
                PlannedDownload { name: "b".into(), resume_from: 0 },
            ]
        );
        assert_eq!(plan.deletes, vec!["c".to_string()]);
    }

    #[test]
    fn test_corruption_repair() {
        // Local larger than authoritative: delete and refetch from 0
        let remote = vec![entry("a", 100)];
        let local = vec![entry("a", 150)];

        let plan = SyncPlan::compute(&remote, &local);
        assert_eq!(plan.deletes, vec!["a".to_string()]);
        assert_eq!(
            plan.downloads,
            vec![PlannedDownload { name: "a".into(), resume_from: 0 }]
        );
    }

    #[test]
    fn test_converged_is_empty() {
        let remote = vec![entry("a", 100), entry("b", 200)];
        let local = vec![entry("b", 200), entry("a", 100)];

        assert!(SyncPlan::compute(&remote, &local).is_empty());
    }

    #[test]
    fn test_empty_replica_downloads_everything() {
        let remote = vec![entry("a", 1), entry("b", 2)];
        let plan = SyncPlan::compute(&remote, &[]);

        assert_eq!(plan.downloads.len(), 2);
        assert!(plan.downloads.iter().all(|d| d.resume_from == 0));
        assert!(plan.deletes.is_empty());
    }

    #[test]
    fn test_same_size_different_content_counts_as_synced() {
        // Known fidelity gap: size-only detection, no checksums
        let remote = vec![entry("a", 100)];
        let local = vec![entry("a", 100)];
        assert!(SyncPlan::compute(&remote, &local).is_empty());
    }

    #[test]
    fn test_unreadable_remote_size_forces_full_download() {
        let remote = vec![unreadable("a")];
        let local = vec![entry("a", 40)];

        let plan = SyncPlan::compute(&remote, &local);
        assert_eq!(plan.deletes, vec!["a".to_string()]);
        assert_eq!(
            plan.downloads,
            vec![PlannedDownload { name: "a".into(), resume_from: 0 }]
        );
    }

    #[test]
    fn test_unreadable_local_size_treated_as_corrupt() {
        let remote = vec![entry("a", 100)];
        let local = vec![unreadable("a")];

        let plan = SyncPlan::compute(&remote, &local);
        assert_eq!(plan.deletes, vec!["a".to_string()]);
        assert_eq!(
            plan.downloads,
            vec![PlannedDownload { name: "a".into(), resume_from: 0 }]
        );
    }
}
