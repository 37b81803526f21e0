//! Client side of the daemon socket: one JSON object per line each way.
//!
//! ```text
//! → {"cmd":"submit","address":"enterprise-weasels.co.uk"}
//! ← {"ok":true,"data":{"address":"@enterprise-weasels.co.uk","already_known":false,...}}
//! ```

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;

/// JSON newline-delimited request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonRequest {
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// `sync` only: skip reconciliation while the last pull is recent.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub if_stale: bool,
}

impl DaemonRequest {
    pub fn new(cmd: &str) -> Self {
        Self {
            cmd: cmd.to_string(),
            ..Self::default()
        }
    }
}

/// JSON newline-delimited response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Send one JSON request to the daemon socket and return one response.
pub fn send_request(home: &Path, request: &DaemonRequest) -> Result<DaemonResponse, DaemonError> {
    let socket = socket_path(home);
    if !socket.exists() {
        return Err(DaemonError::DaemonNotRunning { socket });
    }

    let mut stream = UnixStream::connect(&socket).map_err(|err| {
        if matches!(
            err.kind(),
            std::io::ErrorKind::NotFound
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
        ) {
            DaemonError::DaemonNotRunning {
                socket: socket.clone(),
            }
        } else {
            io_err(&socket, err)
        }
    })?;

    let payload = serde_json::to_string(request)?;
    stream
        .write_all(payload.as_bytes())
        .map_err(|e| io_err(&socket, e))?;
    stream.write_all(b"\n").map_err(|e| io_err(&socket, e))?;
    stream.flush().map_err(|e| io_err(&socket, e))?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .map_err(|e| io_err(&socket, e))?;
    if read == 0 {
        return Err(DaemonError::Protocol(
            "daemon closed connection before responding".to_string(),
        ));
    }

    Ok(serde_json::from_str(line.trim_end())?)
}

/// Status, retried briefly so it can follow a fresh `daemon start`.
pub fn request_status(home: &Path) -> Result<Value, DaemonError> {
    let request = DaemonRequest::new("status");
    let mut last_not_running = None;
    for attempt in 0..5 {
        match send_request(home, &request) {
            Ok(response) => return response_into_data(response),
            Err(err @ DaemonError::DaemonNotRunning { .. }) => {
                last_not_running = Some(err);
                if attempt < 4 {
                    sleep(Duration::from_millis(100));
                }
            }
            Err(err) => return Err(err),
        }
    }
    Err(last_not_running.unwrap_or_else(|| {
        DaemonError::Protocol("daemon status retry loop exited unexpectedly".to_string())
    }))
}

pub fn request_stop(home: &Path) -> Result<(), DaemonError> {
    response_into_data(send_request(home, &DaemonRequest::new("stop"))?).map(|_| ())
}

pub fn request_submit(home: &Path, address: &str) -> Result<Value, DaemonError> {
    let request = DaemonRequest {
        address: Some(address.to_string()),
        ..DaemonRequest::new("submit")
    };
    response_into_data(send_request(home, &request)?)
}

pub fn request_sync(home: &Path, if_stale: bool) -> Result<Value, DaemonError> {
    let request = DaemonRequest {
        if_stale,
        ..DaemonRequest::new("sync")
    };
    response_into_data(send_request(home, &request)?)
}

pub fn request_publish(home: &Path) -> Result<Value, DaemonError> {
    response_into_data(send_request(home, &DaemonRequest::new("publish"))?)
}

fn response_into_data(response: DaemonResponse) -> Result<Value, DaemonError> {
    if response.ok {
        Ok(response.data.unwrap_or(Value::Null))
    } else {
        Err(DaemonError::Protocol(
            response
                .error
                .unwrap_or_else(|| "unknown daemon error".to_string()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn request_omits_unset_fields() {
        let json = serde_json::to_string(&DaemonRequest::new("status")).unwrap();
        assert_eq!(json, r#"{"cmd":"status"}"#);
    }

    #[test]
    fn request_accepts_minimal_and_full_forms() {
        let minimal: DaemonRequest = serde_json::from_str(r#"{"cmd":"publish"}"#).unwrap();
        assert_eq!(minimal, DaemonRequest::new("publish"));

        let full: DaemonRequest =
            serde_json::from_str(r#"{"cmd":"submit","address":"x.com","if_stale":false}"#).unwrap();
        assert_eq!(full.address.as_deref(), Some("x.com"));
    }

    #[test]
    fn missing_socket_is_not_running() {
        let home = TempDir::new().unwrap();
        let err = send_request(home.path(), &DaemonRequest::new("status")).unwrap_err();
        assert!(matches!(err, DaemonError::DaemonNotRunning { .. }));
    }

    #[test]
    fn error_response_becomes_protocol_error() {
        let err = response_into_data(DaemonResponse::error("boom")).unwrap_err();
        assert_eq!(err.to_string(), "daemon protocol error: boom");
        let data = response_into_data(DaemonResponse {
            ok: true,
            data: None,
            error: None,
        })
        .unwrap();
        assert_eq!(data, Value::Null);
    }
}
