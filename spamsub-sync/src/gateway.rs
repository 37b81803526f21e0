//! Remote request gateway: opens pull requests against the upstream host.
//!
//! The gateway never retries. A non-2xx answer is logged and handed back as
//! [`SyncError::Gateway`]; the engine leaves the work queued for the next
//! natural cycle.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

use spamsub_core::Config;

use crate::error::SyncError;

const MAX_LOG_BODY_CHARS: usize = 512;

/// Everything needed to ask upstream to merge one integration branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    /// `<owner>:<branch>` on the fork.
    pub head: String,
    /// Upstream trunk.
    pub base: String,
    pub title: String,
    pub body: String,
}

/// What the host told us about the request it accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestReceipt {
    #[serde(default)]
    pub number: Option<u64>,
    #[serde(default)]
    pub html_url: Option<String>,
}

pub trait PullRequestGateway: Send + Sync {
    fn open_pull_request(
        &self,
        request: &PullRequest,
        token: Option<&str>,
    ) -> Result<PullRequestReceipt, SyncError>;
}

impl<T: PullRequestGateway + ?Sized> PullRequestGateway for std::sync::Arc<T> {
    fn open_pull_request(
        &self,
        request: &PullRequest,
        token: Option<&str>,
    ) -> Result<PullRequestReceipt, SyncError> {
        (**self).open_pull_request(request, token)
    }
}

// ---------------------------------------------------------------------------
// GitHubGateway
// ---------------------------------------------------------------------------

/// GitHub REST implementation of [`PullRequestGateway`].
#[derive(Debug, Clone)]
pub struct GitHubGateway {
    agent: ureq::Agent,
    base_url: String,
    owner: String,
    repo: String,
}

impl GitHubGateway {
    pub fn new(
        base_url: impl Into<String>,
        owner: impl Into<String>,
        repo: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(concat!("spamsub/", env!("CARGO_PKG_VERSION")))
            .build();
        Self {
            agent,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            owner: owner.into(),
            repo: repo.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.api_base_url.clone(),
            config.upstream_owner.clone(),
            config.upstream_repo.clone(),
            config.network_timeout(),
        )
    }

    /// The pull-request collection of the upstream repository.
    pub fn pulls_url(&self) -> String {
        format!("{}/repos/{}/{}/pulls", self.base_url, self.owner, self.repo)
    }
}

impl PullRequestGateway for GitHubGateway {
    fn open_pull_request(
        &self,
        request: &PullRequest,
        token: Option<&str>,
    ) -> Result<PullRequestReceipt, SyncError> {
        let url = self.pulls_url();
        tracing::debug!("POST {url} head={} base={}", request.head, request.base);

        let mut call = self
            .agent
            .post(&url)
            .set("Accept", "application/vnd.github+json");
        if let Some(token) = token {
            call = call.set("Authorization", &format!("token {token}"));
        }

        let payload = json!({
            "title": request.title,
            "body": request.body,
            "head": request.head,
            "base": request.base,
        });

        match call.send_json(payload) {
            Ok(response) => {
                let status = response.status();
                // A 2xx with an unreadable body still means the request exists.
                let receipt = response
                    .into_json::<PullRequestReceipt>()
                    .unwrap_or_default();
                tracing::info!(
                    "pull request opened ({status}): {}",
                    receipt.html_url.as_deref().unwrap_or("<no url>")
                );
                Ok(receipt)
            }
            Err(ureq::Error::Status(code, response)) => {
                let body = response.into_string().unwrap_or_default();
                let preview: String = body.chars().take(MAX_LOG_BODY_CHARS).collect();
                tracing::error!("pull request rejected by {url}: HTTP {code}: {preview}");
                Err(SyncError::Gateway {
                    status: Some(code),
                    message: format!("HTTP {code}: {}", github_message(&body).unwrap_or(preview)),
                })
            }
            Err(ureq::Error::Transport(transport)) => {
                tracing::error!("pull request call to {url} failed: {transport}");
                Err(SyncError::Gateway {
                    status: None,
                    message: transport.to_string(),
                })
            }
        }
    }
}

/// The `message` field GitHub puts in error bodies, if present.
fn github_message(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        message: String,
    }
    serde_json::from_str::<ErrorBody>(body).ok().map(|b| b.message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread::{self, JoinHandle};

    /// Answer one connection on loopback with a canned response. The handle
    /// yields the raw request and the listener for further inspection.
    fn serve_once(
        status_line: &'static str,
        body: &'static str,
    ) -> (String, JoinHandle<(String, TcpListener)>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut raw = String::new();
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if let Some(value) = line.to_ascii_lowercase().strip_prefix("content-length:") {
                    content_length = value.trim().parse().unwrap();
                }
                raw.push_str(&line);
                if line == "\r\n" || line.is_empty() {
                    break;
                }
            }
            let mut payload = vec![0u8; content_length];
            reader.read_exact(&mut payload).unwrap();
            raw.push_str(&String::from_utf8(payload).unwrap());

            write!(
                stream,
                "{status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            )
            .unwrap();
            stream.flush().unwrap();
            (raw, listener)
        });
        (base, handle)
    }

    fn request() -> PullRequest {
        PullRequest {
            head: "urschrei:integration_2024_Mar_09_14_05_12".into(),
            base: "master".into(),
            title: "Updated Spammers on Sat, 09 Mar 2024 14:05:12".into(),
            body: "Updates from the webapp".into(),
        }
    }

    #[test]
    fn created_pull_request_posts_json_with_token() {
        let (base, server) = serve_once(
            "HTTP/1.1 201 Created",
            r#"{"number":42,"html_url":"https://github.test/pull/42"}"#,
        );
        let gw = GitHubGateway::new(base, "drcongo", "spammy-recruiters", Duration::from_secs(5));

        let receipt = gw.open_pull_request(&request(), Some("s3cret")).unwrap();
        assert_eq!(receipt.number, Some(42));
        assert_eq!(receipt.html_url.as_deref(), Some("https://github.test/pull/42"));

        let (raw, _) = server.join().unwrap();
        let (head, body) = raw.split_once("\r\n\r\n").unwrap();
        assert_eq!(
            head.lines().next(),
            Some("POST /repos/drcongo/spammy-recruiters/pulls HTTP/1.1")
        );
        let head = head.to_ascii_lowercase();
        assert!(head.contains("authorization: token s3cret"), "{head}");
        assert!(head.contains("accept: application/vnd.github+json"), "{head}");
        assert!(head.contains("content-type: application/json"), "{head}");

        let sent: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(
            sent,
            json!({
                "title": "Updated Spammers on Sat, 09 Mar 2024 14:05:12",
                "body": "Updates from the webapp",
                "head": "urschrei:integration_2024_Mar_09_14_05_12",
                "base": "master",
            })
        );
    }

    #[test]
    fn rejected_pull_request_is_gateway_error_with_status_and_no_retry() {
        let (base, server) = serve_once(
            "HTTP/1.1 422 Unprocessable Entity",
            r#"{"message":"Validation Failed","errors":[]}"#,
        );
        let gw = GitHubGateway::new(base, "drcongo", "spammy-recruiters", Duration::from_secs(5));

        let err = gw.open_pull_request(&request(), None).unwrap_err();
        match &err {
            SyncError::Gateway { status, message } => {
                assert_eq!(*status, Some(422));
                assert!(message.contains("Validation Failed"), "{message}");
            }
            other => panic!("expected gateway error, got {other}"),
        }

        let (raw, listener) = server.join().unwrap();
        assert!(!raw.to_ascii_lowercase().contains("authorization:"));
        listener.set_nonblocking(true).unwrap();
        let second = listener.accept();
        assert!(
            matches!(&second, Err(e) if e.kind() == std::io::ErrorKind::WouldBlock),
            "gateway must not retry: {second:?}"
        );
    }

    #[test]
    fn pulls_url_strips_trailing_slash() {
        let gw = GitHubGateway::new(
            "https://api.github.com/",
            "drcongo",
            "spammy-recruiters",
            Duration::from_secs(5),
        );
        assert_eq!(
            gw.pulls_url(),
            "https://api.github.com/repos/drcongo/spammy-recruiters/pulls"
        );
    }

    #[test]
    fn error_body_message_is_extracted() {
        let body = r#"{"message":"Validation Failed","errors":[]}"#;
        assert_eq!(github_message(body).as_deref(), Some("Validation Failed"));
        assert_eq!(github_message("not json"), None);
    }

    #[test]
    fn unreachable_host_is_gateway_error_without_status() {
        // Port 9 on loopback is closed on any sane test host.
        let gw = GitHubGateway::new("http://127.0.0.1:9", "o", "r", Duration::from_secs(2));
        let req = PullRequest {
            head: "me:integration_x".into(),
            base: "master".into(),
            title: "t".into(),
            body: "b".into(),
        };
        let err = gw.open_pull_request(&req, Some("tok")).unwrap_err();
        assert!(matches!(err, SyncError::Gateway { status: None, .. }), "got: {err}");
    }

    #[test]
    fn receipt_tolerates_missing_fields() {
        let r: PullRequestReceipt = serde_json::from_str("{}").unwrap();
        assert_eq!(r, PullRequestReceipt::default());
        let r: PullRequestReceipt =
            serde_json::from_str(r#"{"number":7,"html_url":"https://x/7","state":"open"}"#).unwrap();
        assert_eq!(r.number, Some(7));
    }
}
