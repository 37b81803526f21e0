//! Engine configuration stored as YAML.
//!
//! # Storage layout
//!
//! ```text
//! ~/.spamsub/                 (mode 0700)
//!   config.yaml               (mode 0600, written atomically)
//!   spamsub.db                (default record store)
//!   git_dir/                  (default checkout of the tracked repository)
//! ```
//!
//! # API pattern
//!
//! Every file-touching function has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Environment variable that overrides [`Config::github_token`].
pub const TOKEN_ENV: &str = "SPAMSUB_GITHUB_TOKEN";

/// Upper bound for network and publication timeouts (one day).
pub const MAX_TIMEOUT_SECS: u64 = 86_400;

/// Read-only settings for the sync engine and its outer surfaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Working copy of the tracked repository.
    pub repo_path: PathBuf,
    /// SQLite record store.
    pub database_path: PathBuf,
    /// Artifact path, relative to `repo_path`.
    #[serde(default = "default_artifact_path")]
    pub artifact_path: PathBuf,

    #[serde(default = "default_trunk")]
    pub trunk: String,
    /// Remote the trunk is fetched from.
    #[serde(default = "default_upstream_remote")]
    pub upstream_remote: String,
    /// Remote integration branches are pushed to.
    #[serde(default = "default_fork_remote")]
    pub fork_remote: String,
    /// Owner of the fork; forms the `owner:branch` pull-request head.
    pub fork_owner: String,
    pub upstream_owner: String,
    pub upstream_repo: String,

    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_token: Option<String>,

    #[serde(default = "default_author_name")]
    pub commit_author_name: String,
    #[serde(default = "default_author_email")]
    pub commit_author_email: String,

    /// Pending changes that open the publication gate.
    #[serde(default = "default_volume_threshold")]
    pub volume_threshold: u32,
    /// Seconds since the last publication that open the gate on their own.
    #[serde(default = "default_staleness_threshold_secs")]
    pub staleness_threshold_secs: u64,
    /// Minimum seconds between scheduled reconciliations.
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
    /// Bound on each git transport call and each API request.
    #[serde(default = "default_network_timeout_secs")]
    pub network_timeout_secs: u64,
    /// Bound on a whole publication cycle when run by the daemon.
    #[serde(default = "default_publish_timeout_secs")]
    pub publish_timeout_secs: u64,

    /// Directory of `.tera` files overriding the embedded artifact templates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_dir: Option<PathBuf>,
}

fn default_artifact_path() -> PathBuf {
    PathBuf::from("spammers.txt")
}
fn default_trunk() -> String {
    "master".to_string()
}
fn default_upstream_remote() -> String {
    "origin".to_string()
}
fn default_fork_remote() -> String {
    "ours".to_string()
}
fn default_api_base_url() -> String {
    "https://api.github.com".to_string()
}
fn default_author_name() -> String {
    "spamsub".to_string()
}
fn default_author_email() -> String {
    "spamsub@localhost".to_string()
}
fn default_volume_threshold() -> u32 {
    2
}
fn default_staleness_threshold_secs() -> u64 {
    86_400
}
fn default_sync_interval_secs() -> u64 {
    3_600
}
fn default_network_timeout_secs() -> u64 {
    60
}
fn default_publish_timeout_secs() -> u64 {
    600
}

impl Config {
    /// Defaults rooted at `<home>/.spamsub/`, pointing at the public spammer list.
    pub fn default_for_home(home: &Path) -> Self {
        let root = spamsub_dir_path(home);
        Self {
            repo_path: root.join("git_dir"),
            database_path: root.join("spamsub.db"),
            artifact_path: default_artifact_path(),
            trunk: default_trunk(),
            upstream_remote: default_upstream_remote(),
            fork_remote: default_fork_remote(),
            fork_owner: "urschrei".to_string(),
            upstream_owner: "drcongo".to_string(),
            upstream_repo: "spammy-recruiters".to_string(),
            api_base_url: default_api_base_url(),
            github_token: None,
            commit_author_name: default_author_name(),
            commit_author_email: default_author_email(),
            volume_threshold: default_volume_threshold(),
            staleness_threshold_secs: default_staleness_threshold_secs(),
            sync_interval_secs: default_sync_interval_secs(),
            network_timeout_secs: default_network_timeout_secs(),
            publish_timeout_secs: default_publish_timeout_secs(),
            template_dir: None,
        }
    }

    /// Token for the hosting API; `SPAMSUB_GITHUB_TOKEN` wins over the file.
    pub fn github_token(&self) -> Option<String> {
        std::env::var(TOKEN_ENV)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| self.github_token.clone())
    }

    pub fn staleness_threshold(&self) -> Duration {
        Duration::from_secs(self.staleness_threshold_secs)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.network_timeout_secs)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.publish_timeout_secs)
    }

    /// Absolute path of the artifact inside the working copy.
    pub fn artifact_file(&self) -> PathBuf {
        self.repo_path.join(&self.artifact_path)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("trunk", &self.trunk),
            ("upstream_remote", &self.upstream_remote),
            ("fork_remote", &self.fork_remote),
            ("fork_owner", &self.fork_owner),
            ("upstream_owner", &self.upstream_owner),
            ("upstream_repo", &self.upstream_repo),
            ("api_base_url", &self.api_base_url),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must not be empty".to_string(),
                });
            }
        }
        if self.artifact_path.as_os_str().is_empty() || self.artifact_path.is_absolute() {
            return Err(ConfigError::Invalid {
                field: "artifact_path",
                reason: "must be a path relative to repo_path".to_string(),
            });
        }
        let positive = [
            ("volume_threshold", u64::from(self.volume_threshold)),
            ("staleness_threshold_secs", self.staleness_threshold_secs),
            ("sync_interval_secs", self.sync_interval_secs),
            ("network_timeout_secs", self.network_timeout_secs),
            ("publish_timeout_secs", self.publish_timeout_secs),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        let timeouts = [
            ("network_timeout_secs", self.network_timeout_secs),
            ("publish_timeout_secs", self.publish_timeout_secs),
        ];
        for (field, value) in timeouts {
            if value > MAX_TIMEOUT_SECS {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("must be at most {MAX_TIMEOUT_SECS} seconds"),
                });
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.spamsub`: pure, no I/O.
pub fn spamsub_dir_path(home: &Path) -> PathBuf {
    home.join(".spamsub")
}

/// `<home>/.spamsub/`, created with mode `0700` if it does not yet exist.
pub fn spamsub_dir_at(home: &Path) -> Result<PathBuf, ConfigError> {
    let dir = spamsub_dir_path(home);
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
        set_dir_permissions(&dir)?;
    }
    Ok(dir)
}

/// `<home>/.spamsub/config.yaml`: pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    spamsub_dir_path(home).join("config.yaml")
}

// ---------------------------------------------------------------------------
// 2. Load
// ---------------------------------------------------------------------------

/// Load and validate `<home>/.spamsub/config.yaml`.
///
/// Returns `ConfigError::ConfigNotFound` if absent,
/// `ConfigError::Parse` (with path + line context) if malformed YAML.
pub fn load_at(home: &Path) -> Result<Config, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Err(ConfigError::ConfigNotFound { path });
    }
    let contents = std::fs::read_to_string(&path)?;
    let config: Config =
        serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })?;
    config.validate()?;
    Ok(config)
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<Config, ConfigError> {
    load_at(&home()?)
}

// ---------------------------------------------------------------------------
// 3. Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically save `config` to `<home>/.spamsub/config.yaml`.
///
/// Write flow: serialize → `config.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(home: &Path, config: &Config) -> Result<(), ConfigError> {
    spamsub_dir_at(home)?;
    let path = config_path_at(home);
    let tmp_path = path.with_file_name("config.yaml.tmp");

    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(&tmp_path, yaml)?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}

/// `save_at` convenience wrapper.
pub fn save(config: &Config) -> Result<(), ConfigError> {
    save_at(&home()?, config)
}

// ---------------------------------------------------------------------------
// 4. Init
// ---------------------------------------------------------------------------

/// Write the default config unless one exists.
///
/// Idempotent: an existing file is loaded and returned unchanged unless
/// `force` is set. The boolean is `true` when a file was written.
pub fn init_at(home: &Path, force: bool) -> Result<(Config, bool), ConfigError> {
    let path = config_path_at(home);
    if path.exists() && !force {
        return Ok((load_at(home)?, false));
    }
    let config = Config::default_for_home(home);
    save_at(home, &config)?;
    Ok((config, true))
}

/// `init_at` convenience wrapper.
pub fn init(force: bool) -> Result<(Config, bool), ConfigError> {
    init_at(&home()?, force)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn config_path_is_correct() {
        let home = TempDir::new().expect("tempdir");
        assert!(config_path_at(home.path()).ends_with(".spamsub/config.yaml"));
    }

    #[test]
    fn defaults_are_valid() {
        let home = TempDir::new().expect("tempdir");
        let config = Config::default_for_home(home.path());
        config.validate().expect("defaults validate");
        assert_eq!(config.volume_threshold, 2);
        assert_eq!(config.staleness_threshold_secs, 86_400);
        assert_eq!(config.sync_interval_secs, 3_600);
        assert_eq!(config.artifact_file(), config.repo_path.join("spammers.txt"));
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let home = TempDir::new().expect("tempdir");
        let mut config = Config::default_for_home(home.path());
        config.volume_threshold = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "volume_threshold", .. }));
    }

    #[test]
    fn absolute_artifact_path_is_rejected() {
        let home = TempDir::new().expect("tempdir");
        let mut config = Config::default_for_home(home.path());
        config.artifact_path = PathBuf::from("/etc/spammers.txt");
        assert!(config.validate().is_err());
    }

    #[test]
    fn spamsub_dir_created_with_perms() {
        let home = TempDir::new().expect("tempdir");
        let dir = spamsub_dir_at(home.path()).expect("spamsub_dir_at");
        assert!(dir.exists());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&dir).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o700);
        }
    }

    #[test]
    fn home_not_found_error_message() {
        assert!(ConfigError::HomeNotFound.to_string().contains("home directory"));
    }
}
