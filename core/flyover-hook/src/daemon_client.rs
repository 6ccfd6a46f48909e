//! Client helper for talking to the flyover daemon.
//!
//! The daemon is the only writer. Transport failures get one retry after a
//! short delay; error responses from the daemon are returned as-is.

use flyover_core::ConfigError;
use flyover_protocol::{Method, Request, Response, MAX_REQUEST_BYTES, PROTOCOL_VERSION};
use serde_json::Value;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use thiserror::Error;

pub const SOCKET_ENV: &str = "FLYOVER_DAEMON_SOCKET";
const READ_TIMEOUT_MS: u64 = 5000;
const WRITE_TIMEOUT_MS: u64 = 600;
const RETRY_DELAY_MS: u64 = 50;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The request never produced a readable response.
    #[error("{0}")]
    Transport(String),
    /// The daemon answered with `ok: false`.
    #[error("{code}: {message}")]
    Daemon { code: String, message: String },
}

pub struct DaemonClient {
    socket: PathBuf,
}

impl DaemonClient {
    pub fn new(socket: PathBuf) -> Self {
        Self { socket }
    }

    /// Uses `FLYOVER_DAEMON_SOCKET` when set, otherwise `~/.flyover/daemon.sock`.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(path) = env::var(SOCKET_ENV) {
            return Ok(Self::new(PathBuf::from(path)));
        }
        flyover_core::config::default_socket_path().map(Self::new)
    }

    pub fn call(&self, method: Method, params: Option<Value>) -> Result<Value, ClientError> {
        let build = || Request {
            protocol_version: PROTOCOL_VERSION,
            method,
            id: Some(format!("hook-{}", std::process::id())),
            params: params.clone(),
        };

        let response = match self.send_request(build()) {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(error = %err, "Failed to reach daemon; retrying");
                thread::sleep(Duration::from_millis(RETRY_DELAY_MS));
                self.send_request(build()).map_err(|retry_err| {
                    tracing::warn!(error = %retry_err, "Retry failed reaching daemon");
                    ClientError::Transport(retry_err)
                })?
            }
        };

        if response.ok {
            return Ok(response.data.unwrap_or(Value::Null));
        }
        Err(match response.error {
            Some(info) => ClientError::Daemon {
                code: info.code,
                message: info.message,
            },
            None => ClientError::Daemon {
                code: "unknown".to_string(),
                message: "Unknown daemon error".to_string(),
            },
        })
    }

    fn send_request(&self, request: Request) -> Result<Response, String> {
        let mut stream = UnixStream::connect(&self.socket)
            .map_err(|err| format!("Failed to connect to daemon socket: {}", err))?;
        let _ = stream.set_read_timeout(Some(Duration::from_millis(READ_TIMEOUT_MS)));
        let _ = stream.set_write_timeout(Some(Duration::from_millis(WRITE_TIMEOUT_MS)));

        serde_json::to_writer(&mut stream, &request)
            .map_err(|err| format!("Failed to write request: {}", err))?;
        stream
            .write_all(b"\n")
            .map_err(|err| format!("Failed to flush request: {}", err))?;
        stream.flush().ok();

        read_response(&mut stream)
    }
}

fn read_response(stream: &mut UnixStream) -> Result<Response, String> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err("Response exceeded maximum size".to_string());
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                return Err("Timed out waiting for daemon response".to_string());
            }
            Err(err) => return Err(format!("Failed to read response: {}", err)),
        }
    }

    let newline_index = buffer.iter().position(|b| *b == b'\n');
    let response_bytes = match newline_index {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    if response_bytes.is_empty() {
        return Err("Daemon response was empty".to_string());
    }

    serde_json::from_slice(response_bytes)
        .map_err(|err| format!("Failed to parse response JSON: {}", err))
}
