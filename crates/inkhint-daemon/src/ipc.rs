//! Control socket server
//!
//! Clients talk to the daemon over a Unix domain socket using the
//! line-delimited JSON messages of [`crate::protocol`]. A connection may
//! carry any number of requests; `watch` turns it into a notification feed.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::hint::{parse_optional_hint, HintSpec};
use crate::protocol::{ErrorKind, Notification, Request, Response};
use crate::registry::{Applied, Mutation, WindowField, WindowId};
use crate::service::{ServiceError, ServiceHandle};

/// Where the control socket lives
///
/// An explicitly configured path wins. Otherwise `$XDG_RUNTIME_DIR/inkhint.sock`,
/// falling back to `/tmp/inkhint-$UID.sock`.
pub fn determine_socket_path(configured: Option<&Path>) -> PathBuf {
    if let Some(path) = configured {
        return path.to_path_buf();
    }

    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir).join("inkhint.sock")
    } else {
        tracing::warn!("XDG_RUNTIME_DIR not set, using fallback socket path in /tmp");
        let uid = nix::unistd::getuid();
        PathBuf::from(format!("/tmp/inkhint-{}.sock", uid))
    }
}

/// Listening control socket; the socket file is removed on drop
pub struct IpcServer {
    listener: UnixListener,
    socket_path: PathBuf,
}

impl IpcServer {
    /// Bind at `socket_path`, replacing a stale socket file from an earlier run
    pub fn bind(socket_path: PathBuf) -> Result<Self> {
        if socket_path.exists() {
            tracing::debug!("Removing stale socket file: {}", socket_path.display());
            std::fs::remove_file(&socket_path).with_context(|| {
                format!("Failed to remove stale socket file: {}", socket_path.display())
            })?;
        }

        let listener = UnixListener::bind(&socket_path)
            .with_context(|| format!("Failed to create IPC socket at {}", socket_path.display()))?;

        tracing::info!("IPC server listening on {}", socket_path.display());

        Ok(Self {
            listener,
            socket_path,
        })
    }

    pub async fn accept(&self) -> Result<UnixStream> {
        let (stream, _addr) = self
            .listener
            .accept()
            .await
            .context("Failed to accept IPC connection")?;

        tracing::debug!("Accepted IPC connection");
        Ok(stream)
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept connections forever, one task per client
    pub async fn serve(&self, service: ServiceHandle) -> Result<()> {
        loop {
            let stream = self.accept().await?;
            let service = service.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, service).await {
                    tracing::warn!("IPC connection failed: {:#}", e);
                }
            });
        }
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                tracing::warn!("Failed to remove IPC socket file on shutdown: {}", e);
            } else {
                tracing::debug!("Removed IPC socket file: {}", self.socket_path.display());
            }
        }
    }
}

async fn write_line<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut json = serde_json::to_string(message).context("Failed to serialize IPC message")?;
    json.push('\n');
    writer
        .write_all(json.as_bytes())
        .await
        .context("Failed to write IPC message")?;
    writer.flush().await.context("Failed to flush IPC message")?;
    Ok(())
}

/// Serve one client until it hangs up
pub async fn handle_connection(stream: UnixStream, service: ServiceHandle) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .context("Failed to read IPC request")?
    {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        tracing::debug!("Received IPC request: {}", line);

        let response = match serde_json::from_str::<Request>(line) {
            Ok(Request::Watch) => {
                let notifications = service.subscribe();
                write_line(&mut writer, &Response::Success).await?;
                return watch(&mut writer, notifications).await;
            }
            Ok(request) => dispatch(&service, request).await,
            Err(e) => {
                tracing::warn!("Failed to parse IPC request: {}", e);
                Response::error(ErrorKind::InvalidRequest, format!("Invalid request: {}", e))
            }
        };

        write_line(&mut writer, &response).await?;
    }

    tracing::debug!("IPC connection closed");
    Ok(())
}

async fn watch<W: AsyncWrite + Unpin>(
    writer: &mut W,
    notifications: broadcast::Receiver<Notification>,
) -> Result<()> {
    let mut notifications = BroadcastStream::new(notifications);
    while let Some(item) = notifications.next().await {
        match item {
            Ok(notification) => {
                if write_line(writer, &notification).await.is_err() {
                    tracing::debug!("Watcher went away");
                    return Ok(());
                }
            }
            Err(BroadcastStreamRecvError::Lagged(missed)) => {
                tracing::warn!(missed, "Watcher fell behind, notifications dropped");
            }
        }
    }
    Ok(())
}

async fn mutate(service: &ServiceHandle, mutation: Mutation) -> Result<Response, ServiceError> {
    Ok(match service.apply(mutation).await? {
        Applied::App(app) => Response::App { app },
        Applied::Window(window) => Response::Window { window },
        Applied::Done => Response::Success,
    })
}

async fn update(
    service: &ServiceHandle,
    window: WindowId,
    field: WindowField,
) -> Result<Response, ServiceError> {
    mutate(service, Mutation::UpdateField { window, field }).await
}

/// Execute one request against the service
pub async fn dispatch(service: &ServiceHandle, request: Request) -> Response {
    execute(service, request).await.unwrap_or_else(|e| {
        tracing::debug!("IPC request failed: {}", e);
        Response::from(e)
    })
}

async fn execute(service: &ServiceHandle, request: Request) -> Result<Response, ServiceError> {
    match request {
        Request::AppRegister { pid } => mutate(service, Mutation::RegisterApp { pid }).await,
        Request::AppRemove { app } => mutate(service, Mutation::RemoveApp(app)).await,
        Request::WindowAdd { app, window } => {
            let spec = window.to_spec()?;
            mutate(service, Mutation::AddWindow { app, spec }).await
        }
        Request::WindowUpdate { id, window } => {
            let spec = window.to_spec()?;
            mutate(service, Mutation::UpdateWindow { window: id, spec }).await
        }
        Request::WindowUpdateTitle { id, title } => update(service, id, WindowField::Title(title)).await,
        Request::WindowUpdateArea { id, area } => update(service, id, WindowField::Area(area)).await,
        Request::WindowUpdateHint { id, hint } => {
            let hint = parse_optional_hint(&hint)?;
            update(service, id, WindowField::Hint(hint)).await
        }
        Request::WindowUpdateVisible { id, visible } => {
            update(service, id, WindowField::Visible(visible)).await
        }
        Request::WindowUpdateFullscreen { id, fullscreen } => {
            update(service, id, WindowField::Fullscreen(fullscreen)).await
        }
        Request::WindowUpdateZindex { id, z_index } => update(service, id, WindowField::ZIndex(z_index)).await,
        Request::WindowRemove { id } => mutate(service, Mutation::RemoveWindow(id)).await,
        Request::ResolveHint { x, y } => Ok(Response::Hint {
            hint: service.resolve_hint_at(x, y).await?,
        }),
        Request::ResolveAll => Ok(Response::Hints {
            rects: service.resolve_all().await?,
        }),
        Request::DefaultHint => Ok(Response::Hint {
            hint: service.default_hint().await?,
        }),
        Request::SetDefaultHint { hint } => {
            service.set_default_hint(hint.parse::<HintSpec>()?).await?;
            Ok(Response::Success)
        }
        Request::DriverState => {
            let (state, transition) = service.driver_state();
            Ok(Response::DriverState {
                mode: state.mode,
                dither: state.dither,
                redraw_delay: state.redraw_delay,
                transition,
            })
        }
        Request::SetDriverMode { mode } => Ok(Response::DriverMode {
            mode: service.set_driver_mode(mode).await?,
        }),
        Request::CycleDriverMode => Ok(Response::DriverMode {
            mode: service.cycle_driver_mode().await?,
        }),
        Request::SetDitherMode { dither } => Ok(Response::DitherMode {
            dither: service.set_dither_mode(dither)?,
        }),
        Request::CycleDitherMode => Ok(Response::DitherMode {
            dither: service.cycle_dither_mode()?,
        }),
        Request::RedrawDelay => Ok(Response::RedrawDelay {
            redraw_delay: service.driver_state().0.redraw_delay,
        }),
        Request::SetRedrawDelay { redraw_delay } => Ok(Response::RedrawDelay {
            redraw_delay: service.set_redraw_delay(redraw_delay)?,
        }),
        Request::DriverHints => {
            let hints = service.driver_hints().await?;
            Ok(Response::DriverHints {
                default_hint: hints.default_hint,
                rects: hints.rects,
            })
        }
        Request::GlobalRefresh => {
            service.global_refresh()?;
            Ok(Response::Success)
        }
        Request::Status => {
            let status = service.status().await?;
            let (state, transition) = service.driver_state();
            Ok(Response::Status {
                apps: status.apps,
                windows: status.windows,
                default_hint: status.default_hint,
                mode: state.mode,
                dither: state.dither,
                redraw_delay: state.redraw_delay,
                transition,
            })
        }
        Request::Watch => Ok(Response::error(
            ErrorKind::InvalidRequest,
            "watch is only valid as a connection request",
        )),
    }
}
