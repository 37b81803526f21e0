//! Shared engine construction used by CLI and daemon.

use std::path::Path;

use spamsub_core::{config, Config};
use spamsub_renderer::Renderer;

use crate::{
    EngineSettings, GitHubGateway, GitMirror, RecordStore, SyncEngine, SyncError, SystemClock,
};

/// The engine wired to git, GitHub and the wall clock.
pub type LiveEngine = SyncEngine<GitMirror, GitHubGateway, SystemClock>;

/// Build a [`LiveEngine`] from `config`, opening (and creating) its database.
pub fn open_engine(config: &Config) -> Result<LiveEngine, SyncError> {
    config.validate()?;
    let store = RecordStore::open(&config.database_path)?;
    let renderer = Renderer::with_template_dir(config.template_dir.as_deref())?;
    tracing::debug!(
        "engine: repo={} db={}",
        config.repo_path.display(),
        config.database_path.display()
    );
    Ok(SyncEngine::new(
        GitMirror::from_config(config),
        GitHubGateway::from_config(config),
        SystemClock,
        store,
        renderer,
        EngineSettings::from_config(config),
    ))
}

/// Load `<home>/.spamsub/config.yaml` and build the engine it describes.
pub fn open_engine_at(home: &Path) -> Result<(Config, LiveEngine), SyncError> {
    let config = config::load_at(home)?;
    let engine = open_engine(&config)?;
    Ok((config, engine))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_config_is_config_error() {
        let home = TempDir::new().expect("home");
        let err = open_engine_at(home.path()).err().expect("should fail");
        assert!(matches!(err, SyncError::Config(_)), "got: {err}");
    }

    #[test]
    fn initialised_home_opens_engine_and_creates_database() {
        let home = TempDir::new().expect("home");
        let (cfg, _) = config::init_at(home.path(), false).expect("init");
        let (_, engine) = open_engine_at(home.path()).expect("open");
        assert!(cfg.database_path.exists());
        assert_eq!(engine.store().address_count().expect("count"), 0);
        assert_eq!(engine.settings().trunk, "master");
    }
}
