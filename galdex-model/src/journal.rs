use chrono::{DateTime, Utc};

use crate::error::ModelError;
use crate::ids::TxId;

/// Filesystem operation recorded in the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum TxOperation {
    Rename,
    Mkdir,
    Copy,
    Delete,
    /// High-level audit record ("trash emptied", "backup created"). Never
    /// participates in the transaction state machine.
    Event,
}

impl TxOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxOperation::Rename => "rename",
            TxOperation::Mkdir => "mkdir",
            TxOperation::Copy => "copy",
            TxOperation::Delete => "delete",
            TxOperation::Event => "event",
        }
    }
}

impl std::str::FromStr for TxOperation {
    type Err = ModelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "rename" => Ok(TxOperation::Rename),
            "mkdir" => Ok(TxOperation::Mkdir),
            "copy" => Ok(TxOperation::Copy),
            "delete" => Ok(TxOperation::Delete),
            "event" => Ok(TxOperation::Event),
            other => Err(ModelError::UnknownVariant {
                kind: "operation",
                value: other.to_string(),
            }),
        }
    }
}

/// Transaction state.
///
/// Valid transitions: `Prepared -> {Committed | Failed} -> RolledBack`.
/// State only ever advances; the journal appends a new line per transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum TxState {
    Prepared,
    Committed,
    Failed,
    RolledBack,
}

impl TxState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxState::Prepared => "prepared",
            TxState::Committed => "committed",
            TxState::Failed => "failed",
            TxState::RolledBack => "rolled_back",
        }
    }
}

impl std::str::FromStr for TxState {
    type Err = ModelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "prepared" => Ok(TxState::Prepared),
            "committed" => Ok(TxState::Committed),
            "failed" => Ok(TxState::Failed),
            "rolled_back" => Ok(TxState::RolledBack),
            other => Err(ModelError::UnknownVariant {
                kind: "transaction state",
                value: other.to_string(),
            }),
        }
    }
}

/// Immutable record appended to the operation journal.
///
/// One JSON object per line in `journal.jsonl`. Readers must tolerate
/// unknown fields for forward compatibility.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct JournalEntry {
    pub tx_id: TxId,
    pub op: TxOperation,
    /// Absolute canonical source path.
    pub src: String,
    /// Destination for rename/copy. Repurposed by delete to record the
    /// trash location once the move has happened.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub dest: Option<String>,
    pub state: TxState,
    pub timestamp: DateTime<Utc>,
    pub timeout_at: DateTime<Utc>,
    /// Set only on `op = event` audit lines.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub action: Option<String>,
}

impl JournalEntry {
    /// Build a freshly prepared entry for a filesystem operation.
    pub fn prepared(
        op: TxOperation,
        src: String,
        dest: Option<String>,
        timeout: chrono::Duration,
    ) -> Self {
        let now = Utc::now();
        JournalEntry {
            tx_id: TxId::new(),
            op,
            src,
            dest,
            state: TxState::Prepared,
            timestamp: now,
            timeout_at: now + timeout,
            action: None,
        }
    }

    /// Build a committed audit line outside the transaction machinery.
    pub fn event(action: &str, target: &str) -> Self {
        let now = Utc::now();
        JournalEntry {
            tx_id: TxId::new(),
            op: TxOperation::Event,
            src: target.to_string(),
            dest: None,
            state: TxState::Committed,
            timestamp: now,
            timeout_at: now,
            action: Some(action.to_string()),
        }
    }

    /// A prepared entry whose timeout has elapsed is stale and eligible
    /// for automatic rollback during recovery.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.state == TxState::Prepared && self.timeout_at < now
    }
}
