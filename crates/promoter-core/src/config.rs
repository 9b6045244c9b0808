//! Engine configuration.
//!
//! Defaults come from the environment:
//!
//! | variable | default |
//! |---|---|
//! | `PROMOTER_GIT_BIN` | `git` |
//! | `PROMOTER_HELM_BIN` | `helm` |
//! | `PROMOTER_COMMAND_TIMEOUT_SECS` | `300` (`0` disables) |
//! | `PROMOTER_LOG_FORMAT` | `text` (`json` for JSON lines) |
//! | `PROMOTER_LOG_LEVEL` | `info` |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::Level;

const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 300;

/// Engine configuration
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// `git` executable
    pub git_bin: PathBuf,
    /// `helm` executable
    pub helm_bin: PathBuf,
    /// Upper bound on a single external command; `None` waits forever
    pub command_timeout: Option<Duration>,
    pub log_json: bool,
    pub log_level: Level,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            git_bin: std::env::var("PROMOTER_GIT_BIN")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("git")),
            helm_bin: std::env::var("PROMOTER_HELM_BIN")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("helm")),
            command_timeout: parse_timeout(std::env::var("PROMOTER_COMMAND_TIMEOUT_SECS").ok()),
            log_json: std::env::var("PROMOTER_LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
            log_level: std::env::var("PROMOTER_LOG_LEVEL")
                .ok()
                .and_then(|v| Level::from_str(&v).ok())
                .unwrap_or(Level::INFO),
        }
    }
}

fn parse_timeout(raw: Option<String>) -> Option<Duration> {
    let secs = raw
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS);
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl EngineConfig {
    /// Create a new config from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn with_git_bin(mut self, bin: impl Into<PathBuf>) -> Self {
        self.git_bin = bin.into();
        self
    }

    pub fn with_helm_bin(mut self, bin: impl Into<PathBuf>) -> Self {
        self.helm_bin = bin.into();
        self
    }

    pub fn with_command_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_json_logs(mut self, json: bool) -> Self {
        self.log_json = json;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timeout() {
        assert_eq!(parse_timeout(None), Some(Duration::from_secs(300)));
        assert_eq!(parse_timeout(Some("15".to_string())), Some(Duration::from_secs(15)));
        assert_eq!(parse_timeout(Some("0".to_string())), None);
        assert_eq!(
            parse_timeout(Some("soon".to_string())),
            Some(Duration::from_secs(300))
        );
    }

    #[test]
    fn test_builders_override() {
        let config = EngineConfig::from_env()
            .with_git_bin("/opt/git")
            .with_helm_bin("/opt/helm")
            .with_command_timeout(None)
            .with_json_logs(true);
        assert_eq!(config.git_bin, PathBuf::from("/opt/git"));
        assert_eq!(config.helm_bin, PathBuf::from("/opt/helm"));
        assert_eq!(config.command_timeout, None);
        assert!(config.log_json);
    }
}
