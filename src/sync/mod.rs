//! Sync Engines
//!
//! Two deliberately distinct reconciliation strategies:
//!
//! - [`PullSync`]: a replica converges on the primary's manifest via a
//!   size-aware diff with resume and corruption repair. This is the
//!   correct path, triggered by the replica itself.
//! - [`PushSync`]: the primary pushes against one replica using a coarse
//!   name-only diff. Legacy, operator-triggered, best-effort; it cannot
//!   detect partial files and is not a substitute for pull.

mod plan;
mod pull;
mod push;

pub use plan::{PlannedDownload, SyncPlan};
pub use pull::{FileOutcome, PullSync, SyncReport};
pub use push::{PushReport, PushSync};
