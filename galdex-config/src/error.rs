use thiserror::Error;

/// Failures while resolving or persisting configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("GALGAME_LIBRARY_ROOTS is not a JSON array of paths: {0}")]
    InvalidRootsJson(String),

    #[error("config file is not valid JSON: {0}")]
    InvalidConfigFile(#[from] serde_json::Error),

    #[error("cannot prepare directory {path}: {source}")]
    DirectoryUnavailable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
