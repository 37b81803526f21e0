//! Drives a served engine through the real unix socket with the blocking
//! client helpers.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tempfile::TempDir;

use spamsub_core::IntegrationBranch;
use spamsub_daemon::{
    paths::socket_path, request_publish, request_status, request_stop, request_submit,
    request_sync, serve, DaemonError, DaemonSettings,
};
use spamsub_renderer::Renderer;
use spamsub_sync::{
    parse_artifact_lines, EngineSettings, Mirror, PublicationGate, PullRequest,
    PullRequestGateway, PullRequestReceipt, RecordStore, SyncEngine, SyncError, SystemClock,
};

#[derive(Debug, Default)]
struct MemoryRepo {
    upstream: String,
    working: String,
    branches: BTreeSet<String>,
    pushes: usize,
}

#[derive(Debug, Default)]
struct MemoryMirror(Mutex<MemoryRepo>);

impl Mirror for MemoryMirror {
    fn reset_to_upstream(&self) -> Result<(), SyncError> {
        let mut repo = self.0.lock().unwrap();
        repo.working = repo.upstream.clone();
        Ok(())
    }

    fn create_integration_branch(&self, branch: &IntegrationBranch) -> Result<(), SyncError> {
        self.0.lock().unwrap().branches.insert(branch.name().to_string());
        Ok(())
    }

    fn checkout_trunk(&self) -> Result<(), SyncError> {
        self.reset_to_upstream()
    }

    fn write_artifact(&self, _path: &Path, content: &str) -> Result<(), SyncError> {
        self.0.lock().unwrap().working = content.to_string();
        Ok(())
    }

    fn commit_and_push(
        &self,
        _branch: &IntegrationBranch,
        _paths: &[PathBuf],
        _message: &str,
    ) -> Result<(), SyncError> {
        self.0.lock().unwrap().pushes += 1;
        Ok(())
    }

    fn delete_branch(&self, name: &str, _force: bool) -> Result<(), SyncError> {
        self.0.lock().unwrap().branches.remove(name);
        Ok(())
    }

    fn delete_remote_branch(&self, _name: &str) -> Result<(), SyncError> {
        Ok(())
    }

    fn read_artifact_lines(&self, _path: &Path) -> Result<Vec<String>, SyncError> {
        Ok(parse_artifact_lines(&self.0.lock().unwrap().working))
    }

    fn list_branches(&self) -> Result<Vec<String>, SyncError> {
        let repo = self.0.lock().unwrap();
        Ok(std::iter::once("master".to_string())
            .chain(repo.branches.iter().cloned())
            .collect())
    }
}

#[derive(Debug, Default)]
struct AcceptingGateway(Mutex<Vec<PullRequest>>);

impl PullRequestGateway for AcceptingGateway {
    fn open_pull_request(
        &self,
        request: &PullRequest,
        _token: Option<&str>,
    ) -> Result<PullRequestReceipt, SyncError> {
        let mut opened = self.0.lock().unwrap();
        opened.push(request.clone());
        Ok(PullRequestReceipt {
            number: Some(opened.len() as u64),
            html_url: None,
        })
    }
}

type MemoryEngine = SyncEngine<Arc<MemoryMirror>, Arc<AcceptingGateway>, SystemClock>;

fn engine(mirror: Arc<MemoryMirror>, gateway: Arc<AcceptingGateway>) -> MemoryEngine {
    SyncEngine::new(
        mirror,
        gateway,
        SystemClock,
        RecordStore::open_in_memory().expect("store"),
        Renderer::new().expect("renderer"),
        EngineSettings {
            artifact_path: PathBuf::from("spammers.txt"),
            trunk: "master".to_string(),
            fork_owner: "fork-owner".to_string(),
            github_token: None,
            gate: PublicationGate::default(),
            sync_interval: Duration::from_secs(3_600),
        },
    )
}

async fn blocking<T, F>(f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.expect("client join")
}

async fn wait_for_socket(home: &Path) {
    let socket = socket_path(home);
    for _ in 0..200 {
        if socket.exists() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("daemon socket never appeared at {}", socket.display());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn submissions_publish_and_stop_over_the_socket() {
    let home = TempDir::new().expect("home");
    let home_path = home.path().to_path_buf();
    let mirror = Arc::new(MemoryMirror::default());
    mirror.0.lock().unwrap().upstream = "@known.example OR\n".to_string();
    let gateway = Arc::new(AcceptingGateway::default());

    let served = tokio::spawn(serve(
        home_path.clone(),
        Arc::new(engine(Arc::clone(&mirror), Arc::clone(&gateway))),
        DaemonSettings {
            sync_interval: Duration::from_secs(3_600),
            publish_timeout: Duration::from_secs(30),
        },
    ));
    wait_for_socket(&home_path).await;

    let h = home_path.clone();
    let first = blocking(move || request_submit(&h, "Spam.Example")).await.expect("submit");
    assert_eq!(first["job"], "submit");
    assert_eq!(first["result"]["address"], "@spam.example");
    assert_eq!(first["result"]["already_known"], false);
    assert_eq!(first["result"]["publication"], Value::Null);

    let h = home_path.clone();
    let known = blocking(move || request_submit(&h, "@known.example")).await.expect("known");
    assert_eq!(known["result"]["already_known"], true);

    let h = home_path.clone();
    let second = blocking(move || request_submit(&h, "other.example")).await.expect("second");
    assert_eq!(second["result"]["publication"]["status"], "published");
    assert!(second.get("notice").is_none());
    assert_eq!(gateway.0.lock().unwrap().len(), 1);
    assert_eq!(mirror.0.lock().unwrap().pushes, 1);

    let h = home_path.clone();
    let status = blocking(move || request_status(&h)).await.expect("status");
    assert_eq!(status["running"], true);
    assert_eq!(status["engine"]["address_count"], 3);
    assert_eq!(status["engine"]["pending"]["count"], 0);

    let h = home_path.clone();
    let sync = blocking(move || request_sync(&h, false)).await.expect("sync");
    assert_eq!(sync["job"], "sync");

    let h = home_path.clone();
    let publish = blocking(move || request_publish(&h)).await.expect("publish");
    assert_eq!(publish["result"]["status"], "published");

    let h = home_path.clone();
    let rejected = blocking(move || request_submit(&h, "not an address")).await;
    assert!(matches!(rejected, Err(DaemonError::Protocol(_))), "got: {rejected:?}");

    let h = home_path.clone();
    blocking(move || request_stop(&h)).await.expect("stop");
    tokio::time::timeout(Duration::from_secs(5), served)
        .await
        .expect("daemon exits after stop")
        .expect("join")
        .expect("serve result");
    assert!(!socket_path(&home_path).exists());
}
