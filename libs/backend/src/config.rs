use std::{path::PathBuf, str::FromStr, time::Duration};

use anyhow::{Context, Result};
use inlet_bus::WorkQueueConfig;
use inlet_fingerprint::FingerprintConfig;

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub db_path: PathBuf,
    pub spool_dir: PathBuf,
    pub blob_dir: PathBuf,
    pub blob_base_url: String,
    pub store_timeout: Duration,
    pub flush_interval: Duration,
    /// `None` retries spooled writes forever.
    pub spool_max_attempts: Option<u32>,
    pub fingerprint: FingerprintConfig,
    pub work_queue: WorkQueueConfig,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("inlet.db"),
            spool_dir: PathBuf::from("./spool"),
            blob_dir: PathBuf::from("./media"),
            blob_base_url: "/media".to_string(),
            store_timeout: Duration::from_millis(5000),
            flush_interval: Duration::from_secs(30),
            spool_max_attempts: None,
            fingerprint: FingerprintConfig::default(),
            work_queue: WorkQueueConfig::default(),
        }
    }
}

impl BackendConfig {
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self {
            fingerprint: FingerprintConfig::from_env(),
            work_queue: WorkQueueConfig::from_env(),
            ..Self::default()
        };
        if let Some(path) = env_string("INLET_DB_PATH") {
            cfg.db_path = path.into();
        }
        if let Some(dir) = env_string("INLET_SPOOL_DIR") {
            cfg.spool_dir = dir.into();
        }
        if let Some(dir) = env_string("INLET_BLOB_DIR") {
            cfg.blob_dir = dir.into();
        }
        if let Some(url) = env_string("INLET_BLOB_BASE_URL") {
            cfg.blob_base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(ms) = env_parse::<u64>("INLET_STORE_TIMEOUT_MS")? {
            cfg.store_timeout = Duration::from_millis(ms.max(1));
        }
        if let Some(secs) = env_parse::<u64>("INLET_FLUSH_INTERVAL_SECS")? {
            cfg.flush_interval = Duration::from_secs(secs.max(1));
        }
        cfg.spool_max_attempts = env_parse::<u32>("INLET_SPOOL_MAX_ATTEMPTS")?.filter(|n| *n > 0);
        Ok(cfg)
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env_string(name)
        .map(|raw| raw.parse::<T>().with_context(|| format!("invalid {name}: {raw}")))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = BackendConfig::default();
        assert_eq!(cfg.spool_dir, PathBuf::from("./spool"));
        assert_eq!(cfg.store_timeout, Duration::from_secs(5));
        assert_eq!(cfg.fingerprint.window, Duration::from_secs(30));
        assert_eq!(cfg.work_queue.subject_prefix, "inlet.handle");
        assert!(cfg.spool_max_attempts.is_none());
    }
}
