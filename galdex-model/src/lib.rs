//! Core data model definitions shared across galdex crates.
#![allow(missing_docs)]

pub mod candidate;
pub mod canonical;
pub mod cluster;
pub mod error;
pub mod ids;
pub mod instance;
pub mod journal;
pub mod library;
pub mod prelude;
pub mod scan;
pub mod trash;

// Intentionally curated re-exports for downstream consumers.
pub use candidate::{
    CandidateStatus, IdentityHypothesis, IdentityMatchCandidate, MatchStatus,
    ScanCandidate,
};
pub use canonical::{
    CanonicalGame, CanonicalPatch, CanonicalSourceLink, IdentityLink,
};
pub use cluster::{ClusterStatus, MatchCluster, MatchClusterMember};
pub use error::{ModelError, Result as ModelResult};
pub use ids::{CanonicalGameId, ClusterId, ScanId, TxId};
pub use instance::LocalInstance;
pub use journal::{JournalEntry, TxOperation, TxState};
pub use library::{LibraryEntry, LibraryEntryKind};
pub use scan::{FileEventKind, ScanProgress, ScanStatus, ScannerMode};
pub use trash::{TrashConfig, TrashStatus};
