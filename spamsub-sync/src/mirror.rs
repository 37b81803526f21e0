//! Repository mirror: the local checkout of the tracked repository.
//!
//! [`GitMirror`] drives the `git` binary. Every invocation is bounded by a
//! timeout; the child is killed when it expires and the call fails like any
//! other git error. Callers must hold the engine's repository lock: two
//! interleaved checkout sequences would corrupt each other's view of HEAD.
//!
//! ## Artifact format
//!
//! The artifact is written one normalized address per line. Older copies of
//! the list carry a trailing keyword after each address (`@foo.com OR`) so
//! the file can be pasted into a mail filter as a disjunction. The reader
//! keeps only the first whitespace-delimited token of each line and ignores
//! the rest. This is fragile: any line whose first token is not an address
//! will be imported as one. See [`parse_artifact_lines`].

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use spamsub_core::{Config, IntegrationBranch};

use crate::error::SyncError;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Working-copy primitives the engine composes into reconciliation and
/// publication. All paths are relative to the repository root.
pub trait Mirror: Send + Sync {
    /// Fetch every remote, force-checkout the trunk at its upstream tip and
    /// restore the tracked artifact to the trunk's version.
    fn reset_to_upstream(&self) -> Result<(), SyncError>;

    /// Create `branch` from the current HEAD and switch to it.
    fn create_integration_branch(&self, branch: &IntegrationBranch) -> Result<(), SyncError>;

    /// Force-switch back to the trunk.
    fn checkout_trunk(&self) -> Result<(), SyncError>;

    /// Overwrite the tracked file at `path`.
    fn write_artifact(&self, path: &Path, content: &str) -> Result<(), SyncError>;

    /// Stage `paths`, commit them with `message` and push `branch` to the fork.
    fn commit_and_push(
        &self,
        branch: &IntegrationBranch,
        paths: &[PathBuf],
        message: &str,
    ) -> Result<(), SyncError>;

    fn delete_branch(&self, name: &str, force: bool) -> Result<(), SyncError>;

    /// Remove `name` from the fork remote.
    fn delete_remote_branch(&self, name: &str) -> Result<(), SyncError>;

    /// First token of every non-blank line of the file at `path`.
    fn read_artifact_lines(&self, path: &Path) -> Result<Vec<String>, SyncError>;

    /// Short names of all local branches.
    fn list_branches(&self) -> Result<Vec<String>, SyncError>;
}

impl<T: Mirror + ?Sized> Mirror for std::sync::Arc<T> {
    fn reset_to_upstream(&self) -> Result<(), SyncError> {
        (**self).reset_to_upstream()
    }

    fn create_integration_branch(&self, branch: &IntegrationBranch) -> Result<(), SyncError> {
        (**self).create_integration_branch(branch)
    }

    fn checkout_trunk(&self) -> Result<(), SyncError> {
        (**self).checkout_trunk()
    }

    fn write_artifact(&self, path: &Path, content: &str) -> Result<(), SyncError> {
        (**self).write_artifact(path, content)
    }

    fn commit_and_push(
        &self,
        branch: &IntegrationBranch,
        paths: &[PathBuf],
        message: &str,
    ) -> Result<(), SyncError> {
        (**self).commit_and_push(branch, paths, message)
    }

    fn delete_branch(&self, name: &str, force: bool) -> Result<(), SyncError> {
        (**self).delete_branch(name, force)
    }

    fn delete_remote_branch(&self, name: &str) -> Result<(), SyncError> {
        (**self).delete_remote_branch(name)
    }

    fn read_artifact_lines(&self, path: &Path) -> Result<Vec<String>, SyncError> {
        (**self).read_artifact_lines(path)
    }

    fn list_branches(&self) -> Result<Vec<String>, SyncError> {
        (**self).list_branches()
    }
}

/// Extract the address token from each artifact line.
///
/// Blank lines are skipped; anything after the first whitespace run is
/// discarded (`"@foo.com OR"` → `"@foo.com"`).
pub fn parse_artifact_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_owned)
        .collect()
}

// ---------------------------------------------------------------------------
// GitMirror
// ---------------------------------------------------------------------------

/// [`Mirror`] backed by a git working copy on disk.
#[derive(Debug, Clone)]
pub struct GitMirror {
    repo: PathBuf,
    artifact_path: PathBuf,
    trunk: String,
    upstream_remote: String,
    fork_remote: String,
    author_name: String,
    author_email: String,
    timeout: Duration,
}

/// A failed git invocation, before the caller decides which error it is.
#[derive(Debug)]
struct GitFailure {
    command: String,
    detail: String,
}

impl GitFailure {
    fn mirror(self) -> SyncError {
        SyncError::MirrorUnavailable {
            command: self.command,
            detail: self.detail,
        }
    }

    fn push(self, branch: &IntegrationBranch) -> SyncError {
        SyncError::Push {
            branch: branch.name().to_owned(),
            detail: format!("`git {}`: {}", self.command, self.detail),
        }
    }
}

impl GitMirror {
    pub fn new(repo: impl Into<PathBuf>, artifact_path: impl Into<PathBuf>) -> Self {
        Self {
            repo: repo.into(),
            artifact_path: artifact_path.into(),
            trunk: "master".to_string(),
            upstream_remote: "origin".to_string(),
            fork_remote: "ours".to_string(),
            author_name: "spamsub".to_string(),
            author_email: "spamsub@localhost".to_string(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            repo: config.repo_path.clone(),
            artifact_path: config.artifact_path.clone(),
            trunk: config.trunk.clone(),
            upstream_remote: config.upstream_remote.clone(),
            fork_remote: config.fork_remote.clone(),
            author_name: config.commit_author_name.clone(),
            author_email: config.commit_author_email.clone(),
            timeout: config.network_timeout(),
        }
    }

    pub fn with_trunk(mut self, trunk: impl Into<String>) -> Self {
        self.trunk = trunk.into();
        self
    }

    pub fn with_remotes(mut self, upstream: impl Into<String>, fork: impl Into<String>) -> Self {
        self.upstream_remote = upstream.into();
        self.fork_remote = fork.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn repo(&self) -> &Path {
        &self.repo
    }

    /// Run `git -C <repo> <args>` and return its stdout.
    fn git(&self, args: &[&str]) -> Result<String, GitFailure> {
        let command = args.join(" ");
        tracing::debug!("git {command}");

        let mut child = Command::new("git")
            .arg("-C")
            .arg(&self.repo)
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| GitFailure {
                command: command.clone(),
                detail: format!("failed to spawn git: {e}"),
            })?;

        // Pipes are drained on helper threads so a chatty child cannot block
        // on a full pipe while this thread polls for exit.
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let out_reader = thread::spawn(move || drain(stdout));
        let err_reader = thread::spawn(move || drain(stderr));

        // No deadline when the timeout does not fit in an `Instant`.
        let deadline = Instant::now().checked_add(self.timeout);
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if deadline.is_some_and(|d| Instant::now() >= d) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(GitFailure {
                        command,
                        detail: format!("timed out after {}s", self.timeout.as_secs()),
                    });
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    let _ = child.kill();
                    return Err(GitFailure {
                        command,
                        detail: format!("failed to wait for git: {e}"),
                    });
                }
            }
        };

        let stdout = out_reader.join().unwrap_or_default();
        let stderr = err_reader.join().unwrap_or_default();
        if !status.success() {
            let detail = match stderr.trim() {
                "" => status.to_string(),
                msg => msg.to_string(),
            };
            return Err(GitFailure { command, detail });
        }
        Ok(stdout)
    }
}

fn drain<R: Read>(pipe: Option<R>) -> String {
    let mut buf = String::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_string(&mut buf);
    }
    buf
}

impl Mirror for GitMirror {
    fn reset_to_upstream(&self) -> Result<(), SyncError> {
        let upstream_trunk = format!("{}/{}", self.upstream_remote, self.trunk);
        let artifact = self.artifact_path.to_string_lossy();
        self.git(&["fetch", "--all", "--prune"]).map_err(GitFailure::mirror)?;
        self.git(&["checkout", "-f", &self.trunk]).map_err(GitFailure::mirror)?;
        self.git(&["reset", "--hard", &upstream_trunk]).map_err(GitFailure::mirror)?;
        self.git(&["checkout", "-f", &self.trunk, "--", &artifact])
            .map_err(GitFailure::mirror)?;
        Ok(())
    }

    fn create_integration_branch(&self, branch: &IntegrationBranch) -> Result<(), SyncError> {
        self.git(&["checkout", "-b", branch.name()])
            .map_err(GitFailure::mirror)?;
        Ok(())
    }

    fn checkout_trunk(&self) -> Result<(), SyncError> {
        self.git(&["checkout", "-f", &self.trunk]).map_err(GitFailure::mirror)?;
        Ok(())
    }

    fn write_artifact(&self, path: &Path, content: &str) -> Result<(), SyncError> {
        let target = self.repo.join(path);
        let tmp = PathBuf::from(format!("{}.spamsub.tmp", target.display()));
        let write_err = |source| SyncError::ArtifactWrite {
            path: target.clone(),
            source,
        };
        std::fs::write(&tmp, content).map_err(write_err)?;
        if let Err(e) = std::fs::rename(&tmp, &target) {
            let _ = std::fs::remove_file(&tmp);
            return Err(write_err(e));
        }
        tracing::info!("wrote: {}", target.display());
        Ok(())
    }

    fn commit_and_push(
        &self,
        branch: &IntegrationBranch,
        paths: &[PathBuf],
        message: &str,
    ) -> Result<(), SyncError> {
        let paths: Vec<String> = paths.iter().map(|p| p.to_string_lossy().into_owned()).collect();
        let mut add = vec!["add", "--"];
        add.extend(paths.iter().map(String::as_str));
        self.git(&add).map_err(|f| f.push(branch))?;

        let name = format!("user.name={}", self.author_name);
        let email = format!("user.email={}", self.author_email);
        self.git(&["-c", &name, "-c", &email, "commit", "-m", message])
            .map_err(|f| f.push(branch))?;

        self.git(&["push", &self.fork_remote, branch.name()])
            .map_err(|f| f.push(branch))?;
        tracing::info!("pushed {} to {}", branch, self.fork_remote);
        Ok(())
    }

    fn delete_branch(&self, name: &str, force: bool) -> Result<(), SyncError> {
        let flag = if force { "-D" } else { "-d" };
        self.git(&["branch", flag, name]).map_err(GitFailure::mirror)?;
        Ok(())
    }

    fn delete_remote_branch(&self, name: &str) -> Result<(), SyncError> {
        self.git(&["push", &self.fork_remote, "--delete", name])
            .map_err(GitFailure::mirror)?;
        Ok(())
    }

    fn read_artifact_lines(&self, path: &Path) -> Result<Vec<String>, SyncError> {
        let target = self.repo.join(path);
        let content = std::fs::read_to_string(&target).map_err(|e| SyncError::MirrorUnavailable {
            command: format!("show {}", path.display()),
            detail: e.to_string(),
        })?;
        Ok(parse_artifact_lines(&content))
    }

    fn list_branches(&self) -> Result<Vec<String>, SyncError> {
        let out = self
            .git(&["for-each-ref", "--format=%(refname:short)", "refs/heads/"])
            .map_err(GitFailure::mirror)?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_owned)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_token_is_kept_and_suffix_discarded() {
        let lines = parse_artifact_lines("@foo.com OR\n@bar.org\n\n  @baz.net   OR  \n");
        assert_eq!(lines, vec!["@foo.com", "@bar.org", "@baz.net"]);
    }

    #[test]
    fn empty_artifact_has_no_lines() {
        assert!(parse_artifact_lines("").is_empty());
        assert!(parse_artifact_lines("\n\n").is_empty());
    }

    #[test]
    fn crlf_lines_are_tolerated() {
        assert_eq!(parse_artifact_lines("@a.com OR\r\n@b.com\r\n"), vec!["@a.com", "@b.com"]);
    }

    #[test]
    fn missing_repository_is_mirror_unavailable() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mirror = GitMirror::new(tmp.path().join("absent"), "spammers.txt")
            .with_timeout(Duration::from_secs(5));
        let err = mirror.reset_to_upstream().unwrap_err();
        assert!(matches!(err, SyncError::MirrorUnavailable { .. }), "got: {err}");
    }

    #[test]
    fn unbounded_timeout_does_not_overflow() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mirror = GitMirror::new(tmp.path().join("absent"), "spammers.txt")
            .with_timeout(Duration::from_secs(u64::MAX));
        let err = mirror.list_branches().unwrap_err();
        assert!(matches!(err, SyncError::MirrorUnavailable { .. }), "got: {err}");
    }
}
