//! Niri IPC client implementation
//!
//! This module provides the `NiriClient` for communicating with the niri compositor.
//! The client handles socket discovery, connection management, and the JSON protocol.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::time::sleep;
use tracing::warn;

use super::NiriError;

/// Initial delay between retry attempts (100ms)
const INITIAL_RETRY_DELAY_MS: u64 = 100;

/// Maximum delay between retry attempts (1 second)
const MAX_RETRY_DELAY_MS: u64 = 1000;

/// Environment variable name for the niri socket path
const NIRI_SOCKET_ENV: &str = "NIRI_SOCKET";

/// Discover the niri IPC socket path from the environment
///
/// # Errors
///
/// Returns `NiriError::SocketNotSet` if `$NIRI_SOCKET` is not set.
/// Returns `NiriError::SocketNotFound` if the path doesn't exist.
pub fn get_socket_path() -> Result<PathBuf, NiriError> {
    let socket_path_str = std::env::var(NIRI_SOCKET_ENV).map_err(|_| NiriError::SocketNotSet)?;

    let socket_path = PathBuf::from(&socket_path_str);

    if !socket_path.exists() {
        return Err(NiriError::SocketNotFound { path: socket_path });
    }

    Ok(socket_path)
}

/// Client for communicating with the niri compositor via IPC
///
/// Niri keeps the connection open after each reply, so one client serves
/// any number of requests.
#[derive(Debug)]
pub struct NiriClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl NiriClient {
    /// Connect to the socket named by `$NIRI_SOCKET`
    pub async fn connect() -> Result<Self, NiriError> {
        let socket_path = get_socket_path()?;
        Self::connect_to(&socket_path).await
    }

    /// Connect to an explicit socket path
    pub async fn connect_to(socket_path: &Path) -> Result<Self, NiriError> {
        let socket = UnixStream::connect(socket_path)
            .await
            .map_err(|e| NiriError::ConnectionFailed {
                path: socket_path.to_path_buf(),
                source: e,
            })?;

        let (read_half, writer) = socket.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer,
        })
    }

    /// Attempt to connect with retry logic and exponential backoff
    ///
    /// # Backoff Strategy
    ///
    /// - Initial delay: 100ms
    /// - Each retry: delay *= 2
    /// - Maximum delay: 1 second (capped)
    ///
    /// `max_retries` of 0 means a single attempt. A missing `$NIRI_SOCKET`
    /// fails immediately since retrying cannot help.
    pub async fn connect_with_retry(max_retries: u32) -> Result<Self, NiriError> {
        let mut attempt = 0;
        let mut delay_ms = INITIAL_RETRY_DELAY_MS;
        let mut last_error: Option<NiriError> = None;

        loop {
            attempt += 1;

            match Self::connect().await {
                Ok(client) => return Ok(client),
                Err(e) => {
                    if matches!(e, NiriError::SocketNotSet) {
                        return Err(e);
                    }

                    last_error = Some(e);

                    if attempt > max_retries {
                        break;
                    }

                    warn!(
                        attempt = attempt,
                        max_retries = max_retries,
                        delay_ms = delay_ms,
                        "Niri IPC connection failed, retrying..."
                    );

                    sleep(Duration::from_millis(delay_ms)).await;
                    delay_ms = (delay_ms * 2).min(MAX_RETRY_DELAY_MS);
                }
            }
        }

        warn!(
            attempts = attempt,
            last_error = ?last_error,
            "Failed to connect to niri after all retry attempts"
        );

        Err(NiriError::MaxRetriesExceeded { attempts: attempt })
    }

    /// Send a request to niri and receive a response
    ///
    /// Niri uses a JSON-over-newline protocol: the client writes the request
    /// followed by a newline, the server answers with `{"Ok":...}` or
    /// `{"Err":"..."}` on one line.
    pub async fn send_request(
        &mut self,
        request: niri_ipc::Request,
    ) -> Result<niri_ipc::Response, NiriError> {
        let request_json =
            serde_json::to_string(&request).map_err(NiriError::SerializeFailed)?;

        self.writer
            .write_all(request_json.as_bytes())
            .await
            .map_err(NiriError::SendFailed)?;
        self.writer
            .write_all(b"\n")
            .await
            .map_err(NiriError::SendFailed)?;
        self.writer.flush().await.map_err(NiriError::SendFailed)?;

        let mut response_line = String::new();
        let bytes_read = self
            .reader
            .read_line(&mut response_line)
            .await
            .map_err(NiriError::ReceiveFailed)?;

        if bytes_read == 0 {
            return Err(NiriError::ConnectionClosed);
        }

        let reply: niri_ipc::Reply =
            serde_json::from_str(&response_line).map_err(NiriError::DeserializeFailed)?;

        reply.map_err(|message| NiriError::NiriError { message })
    }

    /// All windows across all workspaces
    pub async fn get_windows(&mut self) -> Result<Vec<niri_ipc::Window>, NiriError> {
        match self.send_request(niri_ipc::Request::Windows).await? {
            niri_ipc::Response::Windows(windows) => Ok(windows),
            _ => Err(NiriError::UnexpectedResponse { request: "Windows" }),
        }
    }

    pub async fn get_workspaces(&mut self) -> Result<Vec<niri_ipc::Workspace>, NiriError> {
        match self.send_request(niri_ipc::Request::Workspaces).await? {
            niri_ipc::Response::Workspaces(workspaces) => Ok(workspaces),
            _ => Err(NiriError::UnexpectedResponse {
                request: "Workspaces",
            }),
        }
    }

    /// Connected outputs keyed by connector name
    pub async fn get_outputs(&mut self) -> Result<HashMap<String, niri_ipc::Output>, NiriError> {
        match self.send_request(niri_ipc::Request::Outputs).await? {
            niri_ipc::Response::Outputs(outputs) => Ok(outputs),
            _ => Err(NiriError::UnexpectedResponse { request: "Outputs" }),
        }
    }
}
