//! Niri IPC event stream implementation
//!
//! Unlike `NiriClient`, the event stream is a one-way connection:
//!
//! 1. Connect to the niri socket (separate connection from NiriClient)
//! 2. Send `Request::EventStream` as JSON + newline
//! 3. Receive initial `Ok(Handled)` response
//! 4. Continuously receive `Event` messages (one JSON per line)

use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedReadHalf;
use tokio::net::UnixStream;
use tokio::time::sleep;
use tracing::warn;

use super::client::get_socket_path;
use super::error::NiriError;

/// Initial delay between retry attempts (500ms)
const INITIAL_RETRY_DELAY_MS: u64 = 500;

/// Maximum delay between retry attempts (10 seconds)
const MAX_RETRY_DELAY_MS: u64 = 10_000;

/// Event stream for receiving real-time compositor events from niri
#[derive(Debug)]
pub struct NiriEventStream {
    reader: BufReader<OwnedReadHalf>,
}

impl NiriEventStream {
    /// Connect to `$NIRI_SOCKET` and subscribe to events
    pub async fn connect() -> Result<Self, NiriError> {
        let socket_path = get_socket_path()?;
        Self::connect_to(&socket_path).await
    }

    pub async fn connect_to(socket_path: &Path) -> Result<Self, NiriError> {
        let socket = UnixStream::connect(socket_path)
            .await
            .map_err(|e| NiriError::ConnectionFailed {
                path: socket_path.to_path_buf(),
                source: e,
            })?;

        // Only the read half is kept; niri ignores further requests on this socket
        let (read_half, mut write_half) = socket.into_split();

        let request_json = serde_json::to_string(&niri_ipc::Request::EventStream)
            .map_err(NiriError::SerializeFailed)?;

        write_half
            .write_all(request_json.as_bytes())
            .await
            .map_err(NiriError::SendFailed)?;
        write_half
            .write_all(b"\n")
            .await
            .map_err(NiriError::SendFailed)?;
        write_half.flush().await.map_err(NiriError::SendFailed)?;

        let mut reader = BufReader::new(read_half);

        let mut response_line = String::new();
        let bytes_read = reader
            .read_line(&mut response_line)
            .await
            .map_err(NiriError::ReceiveFailed)?;

        if bytes_read == 0 {
            return Err(NiriError::ConnectionClosed);
        }

        let reply: niri_ipc::Reply =
            serde_json::from_str(&response_line).map_err(NiriError::DeserializeFailed)?;

        match reply {
            Ok(niri_ipc::Response::Handled) => Ok(Self { reader }),
            Ok(_) => Err(NiriError::UnexpectedResponse {
                request: "EventStream",
            }),
            Err(message) => Err(NiriError::NiriError { message }),
        }
    }

    /// Connect with exponential backoff: 500ms doubling up to 10s
    pub async fn connect_with_retry(max_retries: u32) -> Result<Self, NiriError> {
        let mut attempt = 0;
        let mut delay_ms = INITIAL_RETRY_DELAY_MS;

        loop {
            attempt += 1;

            match Self::connect().await {
                Ok(stream) => return Ok(stream),
                Err(NiriError::SocketNotSet) => return Err(NiriError::SocketNotSet),
                Err(e) => {
                    if attempt > max_retries {
                        warn!(attempts = attempt, error = %e, "Giving up on niri event stream");
                        return Err(NiriError::MaxRetriesExceeded { attempts: attempt });
                    }

                    warn!(
                        attempt = attempt,
                        max_retries = max_retries,
                        delay_ms = delay_ms,
                        error = %e,
                        "Niri event stream connection failed, retrying..."
                    );

                    sleep(Duration::from_millis(delay_ms)).await;
                    delay_ms = (delay_ms * 2).min(MAX_RETRY_DELAY_MS);
                }
            }
        }
    }

    /// Read the next event; `ConnectionClosed` on EOF
    pub async fn next_event(&mut self) -> Result<niri_ipc::Event, NiriError> {
        let mut line = String::new();

        let bytes_read = self
            .reader
            .read_line(&mut line)
            .await
            .map_err(NiriError::ReceiveFailed)?;

        if bytes_read == 0 {
            return Err(NiriError::ConnectionClosed);
        }

        serde_json::from_str(&line).map_err(NiriError::DeserializeFailed)
    }
}

/// Whether the event can change which windows are shown where
pub fn affects_layout(event: &niri_ipc::Event) -> bool {
    use niri_ipc::Event;

    matches!(
        event,
        Event::WindowsChanged { .. }
            | Event::WindowOpenedOrChanged { .. }
            | Event::WindowClosed { .. }
            | Event::WindowFocusChanged { .. }
            | Event::WindowLayoutsChanged { .. }
            | Event::WorkspacesChanged { .. }
            | Event::WorkspaceActivated { .. }
            | Event::WorkspaceActiveWindowChanged { .. }
    )
}
