// core/src/errors/manifest_error.rs
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest unreadable: {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("manifest is not valid json")]
    Parse(#[source] serde_json::Error),

    #[error("manifest invalid: {0}")]
    Invalid(String),
}
