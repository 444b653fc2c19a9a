mod config_error;
mod manifest_error;
mod net_error;
mod runner_error;
mod staging_error;

pub use config_error::ConfigError;
pub use manifest_error::ManifestError;
pub use net_error::NetError;
pub use runner_error::SpawnError;
pub use staging_error::StagingError;
