use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;

use spamsub_core::{config, validate_submission, Config};
use spamsub_sync::{
    pipeline, Clock, Mirror, PublishOutcome, PublishStage, PullRequestGateway, SyncEngine,
    SyncError, RETRY_NOTICE,
};

use crate::error::{io_err, DaemonError};
use crate::paths::{socket_path, spamsub_root};
use crate::protocol::{DaemonRequest, DaemonResponse};

/// Scheduling knobs taken from the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaemonSettings {
    pub sync_interval: Duration,
    pub publish_timeout: Duration,
}

impl DaemonSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            sync_interval: config.sync_interval(),
            publish_timeout: config.publish_timeout(),
        }
    }
}

#[derive(Debug, Clone)]
enum JobKind {
    Submit(String),
    Sync { if_stale: bool },
    Publish,
}

impl JobKind {
    fn label(&self) -> &'static str {
        match self {
            JobKind::Submit(_) => "submit",
            JobKind::Sync { if_stale: true } => "sync-if-stale",
            JobKind::Sync { if_stale: false } => "sync",
            JobKind::Publish => "publish",
        }
    }
}

struct Job {
    kind: JobKind,
    source: &'static str,
    respond_to: oneshot::Sender<Result<JobSummary, String>>,
}

/// Result of one processed job as sent back over the socket.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub job: String,
    pub source: String,
    pub duration_ms: u64,
    pub result: Value,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Load the config under `home`, open the live engine and serve until stopped.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    let config = config::load_at(&home)?;
    let settings = DaemonSettings::from_config(&config);
    let engine = tokio::task::spawn_blocking(move || pipeline::open_engine(&config))
        .await
        .map_err(|err| DaemonError::Protocol(format!("engine open join error: {err}")))??;
    serve(home, Arc::new(engine), settings).await
}

/// Serve `engine` on `<home>/.spamsub/daemon.sock` until a `stop` request or
/// ctrl-c arrives.
pub async fn serve<M, G, C>(
    home: PathBuf,
    engine: Arc<SyncEngine<M, G, C>>,
    settings: DaemonSettings,
) -> Result<(), DaemonError>
where
    M: Mirror + 'static,
    G: PullRequestGateway + 'static,
    C: Clock + 'static,
{
    ensure_runtime_dirs(&home)?;
    let started_at_unix = unix_seconds_now();

    let (job_tx, job_rx) = mpsc::channel::<Job>(64);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let processor_handle = {
        let shutdown = shutdown_tx.clone();
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            let result = processor_task(engine, settings, job_rx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let scheduler_handle = {
        let shutdown = shutdown_tx.clone();
        let job_tx = job_tx.clone();
        tokio::spawn(async move {
            let result = scheduler_task(job_tx, settings.sync_interval, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            let result = socket_server_task(
                home,
                engine,
                job_tx,
                shutdown.clone(),
                shutdown.subscribe(),
                started_at_unix,
            )
            .await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (processor_result, scheduler_result, socket_result, signal_result) = tokio::join!(
        processor_handle,
        scheduler_handle,
        socket_handle,
        signal_handle
    );

    handle_join("processor", processor_result)?;
    handle_join("scheduler", scheduler_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Processor: the only task that calls mutating engine operations.
// ---------------------------------------------------------------------------

async fn processor_task<M, G, C>(
    engine: Arc<SyncEngine<M, G, C>>,
    settings: DaemonSettings,
    mut job_rx: mpsc::Receiver<Job>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError>
where
    M: Mirror + 'static,
    G: PullRequestGateway + 'static,
    C: Clock + 'static,
{
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_job = job_rx.recv() => {
                let Some(job) = maybe_job else { break };
                let started = Instant::now();
                let label = job.kind.label();

                let outcome = run_job(Arc::clone(&engine), job.kind, settings.publish_timeout)
                    .await
                    .map(|result| JobSummary {
                        job: label.to_string(),
                        source: job.source.to_string(),
                        duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                        result,
                    });
                if let Err(err) = &outcome {
                    tracing::warn!(job = label, source = job.source, error = %err, "job failed");
                }
                let _ = job.respond_to.send(outcome);
            }
        }
    }
    Ok(())
}

async fn run_job<M, G, C>(
    engine: Arc<SyncEngine<M, G, C>>,
    kind: JobKind,
    publish_timeout: Duration,
) -> Result<Value, String>
where
    M: Mirror + 'static,
    G: PullRequestGateway + 'static,
    C: Clock + 'static,
{
    let is_publish = matches!(kind, JobKind::Publish);
    let handle = tokio::task::spawn_blocking(move || -> Result<Value, String> {
        match kind {
            JobKind::Submit(raw) => to_job_value(engine.submit(&raw)),
            JobKind::Sync { if_stale: true } => to_job_value(engine.check_sync_staleness()),
            JobKind::Sync { if_stale: false } => to_job_value(engine.sync()),
            JobKind::Publish => to_job_value(engine.publish()),
        }
    });

    if !is_publish {
        return handle
            .await
            .map_err(|err| format!("job join error: {err}"))?;
    }

    match tokio::time::timeout(publish_timeout, handle).await {
        Ok(joined) => joined.map_err(|err| format!("job join error: {err}"))?,
        Err(_) => {
            tracing::warn!(
                timeout_secs = publish_timeout.as_secs(),
                "publication timed out; branch and pending counter retained"
            );
            to_job_value(Ok::<_, SyncError>(timed_out(publish_timeout)))
        }
    }
}

fn to_job_value<T: Serialize>(result: Result<T, SyncError>) -> Result<Value, String> {
    let value = result.map_err(|err| err.to_string())?;
    serde_json::to_value(value).map_err(|err| err.to_string())
}

fn timed_out(after: Duration) -> PublishOutcome {
    PublishOutcome::Failed {
        stage: PublishStage::Timeout,
        branch: None,
        branch_retained: true,
        reason: format!("publication did not finish within {}s", after.as_secs()),
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

async fn scheduler_task(
    job_tx: mpsc::Sender<Job>,
    every: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                match enqueue(&job_tx, JobKind::Sync { if_stale: true }, "scheduler").await {
                    Ok(summary) => tracing::debug!(duration_ms = summary.duration_ms, "scheduled staleness check done"),
                    Err(DaemonError::ChannelClosed(_)) => break,
                    Err(err) => tracing::error!(error = %err, "scheduled staleness check failed"),
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Socket server
// ---------------------------------------------------------------------------

async fn socket_server_task<M, G, C>(
    home: PathBuf,
    engine: Arc<SyncEngine<M, G, C>>,
    job_tx: mpsc::Sender<Job>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
    started_at_unix: u64,
) -> Result<(), DaemonError>
where
    M: Mirror + 'static,
    G: PullRequestGateway + 'static,
    C: Clock + 'static,
{
    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "daemon listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let home = home.clone();
                let engine = Arc::clone(&engine);
                let job_tx = job_tx.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(
                        stream,
                        home,
                        engine,
                        job_tx,
                        shutdown_tx,
                        started_at_unix,
                    ).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client<M, G, C>(
    stream: UnixStream,
    home: PathBuf,
    engine: Arc<SyncEngine<M, G, C>>,
    job_tx: mpsc::Sender<Job>,
    shutdown_tx: broadcast::Sender<()>,
    started_at_unix: u64,
) -> Result<(), DaemonError>
where
    M: Mirror + 'static,
    G: PullRequestGateway + 'static,
    C: Clock + 'static,
{
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let response = match request.cmd.as_str() {
            "status" => match build_status_payload(&home, Arc::clone(&engine), started_at_unix).await {
                Ok(payload) => DaemonResponse::ok(payload),
                Err(err) => DaemonResponse::error(err.to_string()),
            },
            "submit" => match request.address.as_deref().map(validate_submission) {
                None => DaemonResponse::error("submit requires an address"),
                Some(Err(err)) => DaemonResponse::error(err.to_string()),
                Some(Ok(())) => {
                    let raw = request.address.clone().unwrap_or_default();
                    job_response(enqueue(&job_tx, JobKind::Submit(raw), "socket").await)
                }
            },
            "sync" => job_response(
                enqueue(&job_tx, JobKind::Sync { if_stale: request.if_stale }, "socket").await,
            ),
            "publish" => job_response(enqueue(&job_tx, JobKind::Publish, "socket").await),
            "stop" => {
                let _ = shutdown_tx.send(());
                DaemonResponse::ok(json!({ "stopping": true }))
            }
            other => DaemonResponse::error(format!("unknown command '{other}'")),
        };

        write_response(&mut writer, &response).await?;
        if request.cmd == "stop" {
            break;
        }
    }

    Ok(())
}

fn job_response(outcome: Result<JobSummary, DaemonError>) -> DaemonResponse {
    match outcome {
        Ok(summary) => {
            let failed = summary
                .result
                .pointer("/publication/status")
                .or_else(|| summary.result.get("status"))
                .and_then(Value::as_str)
                == Some("failed");
            let mut data = match serde_json::to_value(&summary) {
                Ok(data) => data,
                Err(err) => return DaemonResponse::error(err.to_string()),
            };
            if failed {
                data["notice"] = json!(RETRY_NOTICE);
            }
            DaemonResponse::ok(data)
        }
        Err(err) => DaemonResponse::error(err.to_string()),
    }
}

async fn build_status_payload<M, G, C>(
    home: &Path,
    engine: Arc<SyncEngine<M, G, C>>,
    started_at_unix: u64,
) -> Result<Value, DaemonError>
where
    M: Mirror + 'static,
    G: PullRequestGateway + 'static,
    C: Clock + 'static,
{
    let report = tokio::task::spawn_blocking(move || engine.status())
        .await
        .map_err(|err| DaemonError::Protocol(format!("status join error: {err}")))??;
    Ok(json!({
        "running": true,
        "started_at_unix": started_at_unix,
        "socket": socket_path(home).display().to_string(),
        "engine": report,
    }))
}

async fn enqueue(
    job_tx: &mpsc::Sender<Job>,
    kind: JobKind,
    source: &'static str,
) -> Result<JobSummary, DaemonError> {
    let (tx, rx) = oneshot::channel();
    job_tx
        .send(Job {
            kind,
            source,
            respond_to: tx,
        })
        .await
        .map_err(|_| DaemonError::ChannelClosed("job queue"))?;

    let outcome = rx
        .await
        .map_err(|_| DaemonError::ChannelClosed("job response"))?;
    outcome.map_err(DaemonError::Protocol)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    let root = spamsub_root(home);
    if !root.exists() {
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn job_labels() {
        assert_eq!(JobKind::Submit("x".into()).label(), "submit");
        assert_eq!(JobKind::Sync { if_stale: true }.label(), "sync-if-stale");
        assert_eq!(JobKind::Publish.label(), "publish");
    }

    #[test]
    fn stale_socket_file_is_removed() {
        let home = TempDir::new().expect("home");
        ensure_runtime_dirs(home.path()).expect("dirs");
        let socket = socket_path(home.path());
        fs::write(&socket, b"").expect("stale socket");
        prepare_socket_for_bind(&socket).expect("prepare");
        assert!(!socket.exists());
    }

    #[test]
    fn failed_publication_gets_retry_notice() {
        let summary = JobSummary {
            job: "publish".into(),
            source: "socket".into(),
            duration_ms: 1,
            result: json!(timed_out(Duration::from_secs(600))),
        };
        let response = job_response(Ok(summary));
        assert!(response.ok);
        let data = response.data.expect("data");
        assert_eq!(data["result"]["stage"], json!("timeout"));
        assert_eq!(data["notice"], json!(RETRY_NOTICE));
    }

    #[test]
    fn submit_without_publication_has_no_notice() {
        let summary = JobSummary {
            job: "submit".into(),
            source: "socket".into(),
            duration_ms: 1,
            result: json!({"address": "@x.com", "already_known": false, "publication": null}),
        };
        let data = job_response(Ok(summary)).data.expect("data");
        assert!(data.get("notice").is_none());
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn scheduler_enqueues_staleness_checks_each_interval() {
        let (job_tx, mut job_rx) = mpsc::channel::<Job>(4);
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let shutdown_rx = shutdown_tx.subscribe();
        let scheduler = tokio::spawn(scheduler_task(job_tx, Duration::from_secs(3_600), shutdown_rx));

        for _ in 0..2 {
            let job = job_rx.recv().await.expect("scheduled job");
            assert!(matches!(job.kind, JobKind::Sync { if_stale: true }));
            assert_eq!(job.source, "scheduler");
            let _ = job.respond_to.send(Err("no engine in this test".to_string()));
        }

        let _ = shutdown_tx.send(());
        scheduler.await.expect("join").expect("scheduler result");
    }
}
