//! Bridge feeding niri's window layout into the registry
//!
//! Only windows on the active workspace of the configured output are
//! registered. Every layout-relevant event triggers a full re-query; the
//! session turns that into a minimal set of registry mutations.

use std::time::Duration;

use inkhint_config::{HintRule, NiriBridgeConfig};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::session::{BridgeSession, WindowSnapshot};
use super::MutationSink;
use crate::hint::{HintParseError, HintSpec};
use crate::niri_ipc::{affects_layout, NiriClient, NiriError, NiriEventStream};
use crate::rect::Rect;
use crate::registry::WindowSpec;
use crate::service::ServiceError;

/// Events arriving within this window after the first are folded into one refresh
const DEBOUNCE: Duration = Duration::from_millis(100);

const RECONNECT_DELAY: Duration = Duration::from_secs(2);

const CONNECT_RETRIES: u32 = 10;

#[derive(Debug, Error)]
enum BridgeError {
    #[error(transparent)]
    Niri(#[from] NiriError),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

#[derive(Debug, Clone)]
struct CompiledRule {
    rule: HintRule,
    hint: HintSpec,
}

fn compile_rules(rules: &[HintRule]) -> Result<Vec<CompiledRule>, HintParseError> {
    rules
        .iter()
        .map(|rule| {
            Ok(CompiledRule {
                rule: rule.clone(),
                hint: rule.hint.parse()?,
            })
        })
        .collect()
}

fn hint_for(rules: &[CompiledRule], app_id: &str, title: &str) -> Option<HintSpec> {
    rules
        .iter()
        .find(|r| r.rule.matches(app_id, title))
        .map(|r| r.hint)
}

/// Windows of `output`'s active workspace, in panel pixels
///
/// Tiled windows sit at z-index 0. Floating windows stack above them, the
/// focused one topmost. Windows niri has not placed yet are skipped.
fn window_snapshots(
    windows: &[niri_ipc::Window],
    workspaces: &[niri_ipc::Workspace],
    output: &str,
    scale: f64,
    rules: &[CompiledRule],
) -> Vec<WindowSnapshot> {
    let Some(workspace) = workspaces
        .iter()
        .find(|ws| ws.is_active && ws.output.as_deref() == Some(output))
    else {
        return Vec::new();
    };

    let mut visible: Vec<&niri_ipc::Window> = windows
        .iter()
        .filter(|w| w.workspace_id == Some(workspace.id))
        .filter(|w| w.layout.tile_pos_in_workspace_view.is_some())
        .collect();
    visible.sort_by_key(|w| (w.is_floating, w.is_focused, w.id));

    let mut floating_z = 0;
    visible
        .into_iter()
        .filter_map(|w| {
            let (tile_x, tile_y) = w.layout.tile_pos_in_workspace_view?;
            let (offset_x, offset_y) = w.layout.window_offset_in_tile;
            let (width, height) = w.layout.window_size;

            let x = (tile_x + offset_x) * scale;
            let y = (tile_y + offset_y) * scale;
            let area = Rect::new(
                x.round() as i32,
                y.round() as i32,
                (x + f64::from(width) * scale).round() as i32,
                (y + f64::from(height) * scale).round() as i32,
            );

            let z_index = if w.is_floating {
                floating_z += 1;
                floating_z
            } else {
                0
            };

            let title = w.title.clone().unwrap_or_default();
            let hint = hint_for(rules, w.app_id.as_deref().unwrap_or(""), &title);

            Some(WindowSnapshot {
                key: w.id,
                pid: w.pid.unwrap_or(0),
                spec: WindowSpec::new(title, area)
                    .with_hint(hint)
                    .with_z_index(z_index),
            })
        })
        .collect()
}

/// Keeps the registry in step with niri
pub struct NiriBridge<S> {
    output: String,
    rules: Vec<CompiledRule>,
    session: BridgeSession<S>,
}

impl<S: MutationSink> NiriBridge<S> {
    pub fn new(config: &NiriBridgeConfig, sink: S) -> Result<Self, HintParseError> {
        Ok(Self {
            output: config.output.clone(),
            rules: compile_rules(&config.rules)?,
            session: BridgeSession::new("niri", sink),
        })
    }

    /// Run until the service goes away
    ///
    /// Losing niri removes everything the bridge registered, then the bridge
    /// reconnects. Without `$NIRI_SOCKET` there is nothing to connect to and
    /// the bridge returns.
    pub async fn run(mut self) -> Result<(), ServiceError> {
        loop {
            let result = self.run_connected().await;
            self.session.reset().await?;

            match result {
                Ok(()) => return Ok(()),
                Err(BridgeError::Service(e)) => return Err(e),
                Err(BridgeError::Niri(NiriError::SocketNotSet)) => {
                    error!("NIRI_SOCKET is not set, niri bridge disabled");
                    return Ok(());
                }
                Err(BridgeError::Niri(e)) => {
                    warn!(error = %e, "Lost niri, reconnecting");
                    sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }

    async fn run_connected(&mut self) -> Result<(), BridgeError> {
        let mut client = NiriClient::connect_with_retry(CONNECT_RETRIES).await?;
        let mut stream = NiriEventStream::connect_with_retry(CONNECT_RETRIES).await?;
        info!(output = %self.output, "Connected to niri");

        // read_line is not cancel-safe, so the stream gets its own task
        let (tx, mut rx) = mpsc::channel(64);
        let reader = tokio::spawn(async move {
            loop {
                let event = stream.next_event().await;
                let failed = event.is_err();
                if event.as_ref().map_or(true, affects_layout) && tx.send(event).await.is_err() {
                    break;
                }
                if failed {
                    break;
                }
            }
        });

        let result = self.follow(&mut client, &mut rx).await;
        reader.abort();
        result
    }

    async fn follow(
        &mut self,
        client: &mut NiriClient,
        events: &mut mpsc::Receiver<Result<niri_ipc::Event, NiriError>>,
    ) -> Result<(), BridgeError> {
        self.refresh(client).await?;
        loop {
            match events.recv().await {
                Some(event) => {
                    event?;
                }
                None => return Err(NiriError::ConnectionClosed.into()),
            }

            sleep(DEBOUNCE).await;
            while let Ok(event) = events.try_recv() {
                event?;
            }
            self.refresh(client).await?;
        }
    }

    async fn refresh(&mut self, client: &mut NiriClient) -> Result<(), BridgeError> {
        let windows = client.get_windows().await?;
        let workspaces = client.get_workspaces().await?;
        let outputs = client.get_outputs().await?;

        let scale = outputs
            .get(&self.output)
            .and_then(|o| o.logical.as_ref())
            .map_or(1.0, |logical| logical.scale);

        let snapshot = window_snapshots(&windows, &workspaces, &self.output, scale, &self.rules);
        debug!(windows = snapshot.len(), "niri layout refreshed");
        self.session.sync(snapshot).await?;
        Ok(())
    }
}
