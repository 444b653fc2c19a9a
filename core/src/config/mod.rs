mod load;
mod types;

pub use load::{load, parse, validate, DEFAULT_CONFIG_FILE};
pub use types::{
    AppConfig, HttpConfig, LoggingConfig, RunnerConfig, ServerConfig, SupervisorConfig,
};
