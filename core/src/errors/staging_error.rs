// core/src/errors/staging_error.rs
use thiserror::Error;

use super::NetError;

#[derive(Debug, Error)]
pub enum StagingError {
    #[error("failed to fetch {url}")]
    Fetch {
        url: String,
        #[source]
        source: NetError,
    },

    #[error("invalid archive {name}")]
    Archive {
        name: String,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("archive {name} member escapes the work directory: {member}")]
    UnsafePath { name: String, member: String },

    #[error("io error while extracting {name}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
}
