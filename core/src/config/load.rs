use std::path::Path;

use crate::errors::ConfigError;

use super::types::AppConfig;

pub const DEFAULT_CONFIG_FILE: &str = "taskbot.toml";

/// Loads `path` (or `taskbot.toml` in the current directory, when present),
/// then applies `TASKBOT_*` environment overrides.
pub fn load(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let env_path = std::env::var("TASKBOT_CONFIG")
        .ok()
        .filter(|v| !v.trim().is_empty());
    let path = path
        .map(Path::to_path_buf)
        .or_else(|| env_path.map(Into::into))
        .unwrap_or_else(|| DEFAULT_CONFIG_FILE.into());

    let mut cfg: AppConfig = if path.exists() {
        let s = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        parse(&s).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                source,
            },
            other => other,
        })?
    } else {
        AppConfig::default()
    };

    apply_env_overrides(&mut cfg);
    validate(&cfg)?;
    Ok(cfg)
}

pub fn parse(s: &str) -> Result<AppConfig, ConfigError> {
    toml::from_str::<AppConfig>(s).map_err(|e| ConfigError::Parse {
        path: "<inline>".to_string(),
        source: e.into(),
    })
}

fn apply_env_overrides(cfg: &mut AppConfig) {
    if let Ok(v) = std::env::var("TASKBOT_SERVER_URL") {
        if !v.trim().is_empty() {
            cfg.server.url = v;
        }
    }
    if let Ok(v) = std::env::var("TASKBOT_LOG_LEVEL") {
        if !v.trim().is_empty() {
            cfg.logging.level = v;
        }
    }
    if let Ok(v) = std::env::var("TASKBOT_COOKIE_FILE") {
        if !v.trim().is_empty() {
            cfg.server.cookie_file = Some(v.into());
        }
    }
    if let Ok(v) = std::env::var("TASKBOT_WORK_DIR") {
        if !v.trim().is_empty() {
            cfg.runner.work_dir = v.into();
        }
    }
}

pub fn validate(cfg: &AppConfig) -> Result<(), ConfigError> {
    if cfg.supervisor.poll_interval_ms == 0 {
        return Err(ConfigError::Validation(
            "supervisor.poll_interval_ms must be > 0".into(),
        ));
    }
    if cfg.supervisor.output_chunk_size == 0 {
        return Err(ConfigError::Validation(
            "supervisor.output_chunk_size must be > 0".into(),
        ));
    }
    if !cfg.supervisor.report_interval_secs.is_finite() {
        return Err(ConfigError::Validation(
            "supervisor.report_interval_secs must be finite".into(),
        ));
    }
    if cfg.runner.command_attempts == 0 {
        return Err(ConfigError::Validation(
            "runner.command_attempts must be > 0".into(),
        ));
    }
    Ok(())
}
