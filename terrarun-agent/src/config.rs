//! Agent configuration
//!
//! Connection settings, credentials and the timing of heartbeats and polls.
//! Loaded from environment variables with defaults.

use std::path::PathBuf;
use std::time::Duration;

/// Command run for each claimed entry when `TERRARUN_EXEC` is unset
pub const DEFAULT_EXEC: &str = "terraform \"$TERRARUN_OPERATION\" -input=false";

/// Upper bound for every interval setting
const MAX_INTERVAL: Duration = Duration::from_secs(3600);

/// Agent configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server base URL (e.g., "http://localhost:8080")
    pub server_url: String,

    /// Pool token used to register
    pub agent_token: String,

    /// Display name reported at registration
    pub agent_name: String,

    /// Pause between claims when the queue is empty
    pub poll_interval: Duration,

    /// How often a heartbeat is sent. Must stay well below the server's
    /// staleness timeout.
    pub heartbeat_interval: Duration,

    /// How long the server may hold a claim request open
    pub claim_wait: Duration,

    /// Shell command executed for each run
    pub exec: String,

    /// Base directory; each workspace runs in its own subdirectory
    pub work_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8080".to_string(),
            agent_token: String::new(),
            agent_name: format!("agent-{}", uuid::Uuid::new_v4().simple()),
            poll_interval: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
            claim_wait: Duration::from_secs(20),
            exec: DEFAULT_EXEC.to_string(),
            work_dir: std::env::temp_dir().join("terrarun-agent"),
        }
    }
}

impl Config {
    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - TERRARUN_AGENT_TOKEN (required)
    /// - TERRARUN_URL (optional, default: http://localhost:8080)
    /// - TERRARUN_AGENT_NAME (optional, default: random)
    /// - POLL_INTERVAL (optional, seconds, default: 5)
    /// - HEARTBEAT_INTERVAL (optional, seconds, default: 30)
    /// - CLAIM_WAIT (optional, seconds, default: 20)
    /// - TERRARUN_EXEC (optional, shell command, default: terraform <operation>)
    /// - WORK_DIR (optional, default: <tmp>/terrarun-agent)
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();

        let agent_token = lookup("TERRARUN_AGENT_TOKEN")
            .ok_or_else(|| anyhow::anyhow!("TERRARUN_AGENT_TOKEN environment variable not set"))?;

        let seconds = |key: &str, default: Duration| -> anyhow::Result<Duration> {
            match lookup(key) {
                Some(value) => value
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|_| anyhow::anyhow!("{} must be a whole number of seconds", key)),
                None => Ok(default),
            }
        };

        Ok(Self {
            server_url: lookup("TERRARUN_URL").unwrap_or(defaults.server_url),
            agent_token,
            agent_name: lookup("TERRARUN_AGENT_NAME").unwrap_or(defaults.agent_name),
            poll_interval: seconds("POLL_INTERVAL", defaults.poll_interval)?,
            heartbeat_interval: seconds("HEARTBEAT_INTERVAL", defaults.heartbeat_interval)?,
            claim_wait: seconds("CLAIM_WAIT", defaults.claim_wait)?,
            exec: lookup("TERRARUN_EXEC").unwrap_or(defaults.exec),
            work_dir: lookup("WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.agent_token.trim().is_empty() {
            anyhow::bail!("agent_token cannot be empty");
        }

        if self.agent_name.trim().is_empty() {
            anyhow::bail!("agent_name cannot be empty");
        }

        if !self.server_url.starts_with("http://") && !self.server_url.starts_with("https://") {
            anyhow::bail!("server_url must start with http:// or https://");
        }

        if self.poll_interval.is_zero() {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.heartbeat_interval.is_zero() {
            anyhow::bail!("heartbeat_interval must be greater than 0");
        }

        for (name, value) in [
            ("poll_interval", self.poll_interval),
            ("heartbeat_interval", self.heartbeat_interval),
            ("claim_wait", self.claim_wait),
        ] {
            if value > MAX_INTERVAL {
                anyhow::bail!("{} must not exceed {:?}", name, MAX_INTERVAL);
            }
        }

        if self.exec.trim().is_empty() {
            anyhow::bail!("exec cannot be empty");
        }

        Ok(())
    }

    /// Per-request timeout for the HTTP client; claims are held open for up
    /// to `claim_wait`
    pub fn request_timeout(&self) -> Duration {
        self.claim_wait + Duration::from_secs(30)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_token_is_required() {
        assert!(from_pairs(&[]).is_err());

        let config = from_pairs(&[("TERRARUN_AGENT_TOKEN", "trp_x")]).unwrap();
        assert_eq!(config.agent_token, "trp_x");
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.exec, DEFAULT_EXEC);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("TERRARUN_AGENT_TOKEN", "trp_x"),
            ("TERRARUN_URL", "https://terrarun.example.com"),
            ("TERRARUN_AGENT_NAME", "builder-01"),
            ("CLAIM_WAIT", "0"),
            ("WORK_DIR", "/var/lib/terrarun"),
        ])
        .unwrap();

        assert_eq!(config.server_url, "https://terrarun.example.com");
        assert_eq!(config.agent_name, "builder-01");
        assert_eq!(config.claim_wait, Duration::ZERO);
        assert_eq!(config.work_dir, PathBuf::from("/var/lib/terrarun"));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_config_validation() {
        let mut config = from_pairs(&[("TERRARUN_AGENT_TOKEN", "trp_x")]).unwrap();
        assert!(config.validate().is_ok());

        config.server_url = "not-a-url".to_string();
        assert!(config.validate().is_err());

        config.server_url = "http://localhost:8080".to_string();
        config.heartbeat_interval = Duration::ZERO;
        assert!(config.validate().is_err());

        config.heartbeat_interval = Duration::from_secs(30);
        config.poll_interval = Duration::from_secs(u64::MAX);
        assert!(config.validate().is_err());

        assert!(from_pairs(&[("TERRARUN_AGENT_TOKEN", "x"), ("POLL_INTERVAL", "fast")]).is_err());
    }
}
