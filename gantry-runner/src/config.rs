//! Runner configuration
//!
//! Paths of the persisted identity files and the timing knobs of the job
//! machinery. Everything defaults to the values the protocol expects; the
//! knobs exist so tests can shrink the windows.

use std::path::PathBuf;
use std::time::Duration;

/// Settings for one runner process.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// Self-hosted runners always live in pool 1.
    pub pool_id: u32,

    /// RSA private key, PKCS#1 DER.
    pub key_path: PathBuf,

    /// Agent record as returned by the server, pretty-printed JSON.
    pub agent_path: PathBuf,

    /// Registration handoff (tenant URL, token schema, tenant token).
    pub auth_path: PathBuf,

    /// How often the job lease is renewed.
    pub renew_interval: Duration,

    /// How long the log streamer coalesces lines into one batch.
    pub batch_window: Duration,

    /// Bound of the log feed channel; overflow back-pressures the engine.
    pub feed_capacity: usize,
}

impl RunnerSettings {
    /// Settings rooted in the given state directory.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            pool_id: 1,
            key_path: dir.join("cred.pkcs1"),
            agent_path: dir.join("agent.json"),
            auth_path: dir.join("auth.json"),
            renew_interval: Duration::from_secs(60),
            batch_window: Duration::from_secs(1),
            feed_capacity: 64,
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.pool_id == 0 {
            anyhow::bail!("pool_id must be greater than 0");
        }
        if self.renew_interval.is_zero() {
            anyhow::bail!("renew_interval must be greater than 0");
        }
        if self.batch_window.is_zero() {
            anyhow::bail!("batch_window must be greater than 0");
        }
        if self.feed_capacity == 0 {
            anyhow::bail!("feed_capacity must be greater than 0");
        }
        Ok(())
    }
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self::in_dir(".")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = RunnerSettings::default();
        assert_eq!(settings.pool_id, 1);
        assert_eq!(settings.renew_interval, Duration::from_secs(60));
        assert_eq!(settings.batch_window, Duration::from_secs(1));
        assert_eq!(settings.feed_capacity, 64);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_zero_windows() {
        let mut settings = RunnerSettings::default();
        settings.batch_window = Duration::ZERO;
        assert!(settings.validate().is_err());

        let mut settings = RunnerSettings::default();
        settings.feed_capacity = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_paths_root_in_state_dir() {
        let settings = RunnerSettings::in_dir("/var/lib/gantry");
        assert_eq!(settings.key_path, PathBuf::from("/var/lib/gantry/cred.pkcs1"));
        assert_eq!(settings.agent_path, PathBuf::from("/var/lib/gantry/agent.json"));
        assert_eq!(settings.auth_path, PathBuf::from("/var/lib/gantry/auth.json"));
    }
}
