//! Boot-time journal recovery and the doomsday fuse.
//!
//! Recovery runs before any write API is served. Stale prepared
//! transactions are rolled back automatically; active ones are left for
//! inspection. If recovery itself fails the process flips into read-only
//! mode until an operator intervenes — there is no automatic reset.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{error, info};

use crate::error::{CoreError, Result};
use crate::txfs::journal::RecoveryReport;
use crate::txfs::transaction::TxEngine;

/// Process-wide read-only switch.
///
/// One of the two pieces of global state the engine allows itself. Cheap to
/// clone; all clones observe the same bit.
#[derive(Debug, Clone, Default)]
pub struct ReadOnlyFuse {
    engaged: Arc<AtomicBool>,
}

impl ReadOnlyFuse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip into read-only mode. Idempotent.
    pub fn engage(&self, reason: &str) {
        if !self.engaged.swap(true, Ordering::SeqCst) {
            error!(
                reason,
                "DOOMSDAY FUSE ENGAGED: all write commands are now rejected"
            );
        }
    }

    pub fn is_engaged(&self) -> bool {
        self.engaged.load(Ordering::SeqCst)
    }

    /// Gate every write command through this single check.
    pub fn ensure_writable(&self) -> Result<()> {
        if self.is_engaged() {
            Err(CoreError::ReadOnly)
        } else {
            Ok(())
        }
    }
}

/// Run journal recovery, engaging the fuse when recovery cannot complete.
///
/// Per-transaction rollback failures are reported but tolerated; only an
/// unreadable or corrupt journal is irrecoverable.
pub fn run_recovery(engine: &TxEngine, fuse: &ReadOnlyFuse) -> Result<RecoveryReport> {
    match engine.recover_stale() {
        Ok(report) => {
            info!(
                stale = report.stale.len(),
                active = report.active.len(),
                rolled_back = report.rolled_back,
                "journal recovery complete"
            );
            Ok(report)
        }
        Err(err) => {
            fuse.engage(&err.to_string());
            Err(CoreError::RecoveryFailed(err.to_string()))
        }
    }
}
