//! Convenience re-exports for downstream crates.

pub use crate::candidate::{
    CandidateStatus, IdentityHypothesis, IdentityMatchCandidate, MatchStatus,
    ScanCandidate,
};
pub use crate::canonical::{
    CanonicalGame, CanonicalPatch, CanonicalSourceLink, IdentityLink,
};
pub use crate::cluster::{ClusterStatus, MatchCluster, MatchClusterMember};
pub use crate::error::ModelError;
pub use crate::ids::{CanonicalGameId, ClusterId, ScanId, TxId};
pub use crate::instance::LocalInstance;
pub use crate::journal::{JournalEntry, TxOperation, TxState};
pub use crate::library::{LibraryEntry, LibraryEntryKind};
pub use crate::scan::{FileEventKind, ScanProgress, ScanStatus, ScannerMode};
pub use crate::trash::{TrashConfig, TrashStatus};
