use chrono::{DateTime, Utc};

/// Persisted trash policy, stored as `trash_config.json` beside the journal.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrashConfig {
    #[cfg_attr(feature = "serde", serde(default = "TrashConfig::version"))]
    pub version: u32,
    /// Maximum trash size in GB; 0 disables the quota.
    pub max_size_gb: f64,
    /// Transaction directories older than this are swept.
    pub retention_days: i64,
    /// Free-space floor for the volume hosting the trash.
    pub min_disk_free_gb: f64,
}

impl TrashConfig {
    pub const VERSION: u32 = 1;

    fn version() -> u32 {
        Self::VERSION
    }
}

impl Default for TrashConfig {
    fn default() -> Self {
        TrashConfig {
            version: Self::VERSION,
            max_size_gb: 50.0,
            retention_days: 30,
            min_disk_free_gb: 5.0,
        }
    }
}

/// Point-in-time trash statistics surfaced through the command API.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrashStatus {
    pub items: usize,
    pub trash_size_gb: f64,
    pub disk_free_gb: f64,
    pub max_size_gb: f64,
    pub min_disk_free_gb: f64,
    pub retention_days: i64,
    pub oldest_item: Option<DateTime<Utc>>,
}
