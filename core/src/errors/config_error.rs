// core/src/errors/config_error.rs
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file unreadable: {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("config parse error: {path}")]
    Parse {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("config validation error: {0}")]
    Validation(String),
}
