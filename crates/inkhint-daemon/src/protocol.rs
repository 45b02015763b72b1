//! Wire format of the control socket
//!
//! Messages are JSON objects with a `type` field, one per line:
//!
//! - `{"type": "app_register", "pid": 1234}`
//! - `{"type": "window_add", "app": "...", "window": {"title": "...", "area": [0, 0, 100, 100], "hint": "Y2|D"}}`
//! - `{"type": "resolve_hint", "x": 10, "y": 20}`
//! - `{"type": "set_driver_mode", "mode": "fast"}`
//!
//! Hints travel as strings and are parsed by the daemon, so a bad hint comes
//! back as a `malformed_hint` error rather than a generic parse failure. An
//! empty hint string means "no hint".
//!
//! After `watch` the connection carries [`Notification`] lines only.

use serde::{Deserialize, Serialize};

use crate::driver::{DitherMode, DriverMode, ModeError, TransitionState};
use crate::hint::{parse_optional_hint, HintParseError, HintSpec};
use crate::rect::Rect;
use crate::registry::{AppId, RectHint, WindowId, WindowSpec};
use crate::service::ServiceError;

pub use crate::service::Notification;

/// Window properties as sent by clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WireWindow {
    #[serde(default)]
    pub title: String,
    pub area: Rect,
    #[serde(default)]
    pub hint: String,
    #[serde(default = "default_visible")]
    pub visible: bool,
    #[serde(default)]
    pub fullscreen: bool,
    #[serde(default)]
    pub z_index: i32,
}

fn default_visible() -> bool {
    true
}

impl WireWindow {
    pub fn new(title: impl Into<String>, area: Rect) -> Self {
        Self {
            title: title.into(),
            area,
            hint: String::new(),
            visible: true,
            fullscreen: false,
            z_index: 0,
        }
    }

    pub fn to_spec(&self) -> Result<WindowSpec, HintParseError> {
        let mut spec = WindowSpec::new(self.title.clone(), self.area)
            .with_hint(parse_optional_hint(&self.hint)?)
            .with_visible(self.visible)
            .with_z_index(self.z_index);
        spec.fullscreen = self.fullscreen;
        Ok(spec)
    }
}

/// Requests sent from clients to the daemon
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    AppRegister { pid: i32 },
    AppRemove { app: AppId },
    WindowAdd { app: AppId, window: WireWindow },
    /// Replace every property of a window at once
    WindowUpdate { id: WindowId, window: WireWindow },
    WindowUpdateTitle { id: WindowId, title: String },
    WindowUpdateArea { id: WindowId, area: Rect },
    WindowUpdateHint { id: WindowId, hint: String },
    WindowUpdateVisible { id: WindowId, visible: bool },
    WindowUpdateFullscreen { id: WindowId, fullscreen: bool },
    WindowUpdateZindex { id: WindowId, z_index: i32 },
    WindowRemove { id: WindowId },
    ResolveHint { x: i32, y: i32 },
    ResolveAll,
    DefaultHint,
    SetDefaultHint { hint: String },
    DriverState,
    SetDriverMode { mode: DriverMode },
    CycleDriverMode,
    SetDitherMode { dither: DitherMode },
    CycleDitherMode,
    RedrawDelay,
    SetRedrawDelay { redraw_delay: u16 },
    /// The rectangles and default hint as uploaded to the driver
    DriverHints,
    GlobalRefresh,
    Status,
    /// Switch the connection to a notification stream
    Watch,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MalformedHint,
    NotFound,
    InvalidMode,
    DriverBusy,
    ModeApplyTimeout,
    Driver,
    Internal,
    InvalidRequest,
}

impl From<&ServiceError> for ErrorKind {
    fn from(e: &ServiceError) -> Self {
        match e {
            ServiceError::Registry(_) => Self::NotFound,
            ServiceError::Hint(_) => Self::MalformedHint,
            ServiceError::Mode(ModeError::InvalidMode(_)) => Self::InvalidMode,
            ServiceError::Mode(ModeError::DriverBusy(_)) => Self::DriverBusy,
            ServiceError::Mode(ModeError::ModeApplyTimeout { .. }) => Self::ModeApplyTimeout,
            ServiceError::Mode(ModeError::Driver(_)) | ServiceError::Driver(_) => Self::Driver,
            ServiceError::Closed => Self::Internal,
        }
    }
}

/// Responses sent from the daemon back to clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Success,
    App {
        app: AppId,
    },
    Window {
        window: WindowId,
    },
    Hint {
        hint: HintSpec,
    },
    /// Visible windows, topmost first
    Hints {
        rects: Vec<RectHint>,
    },
    DriverState {
        mode: DriverMode,
        dither: DitherMode,
        redraw_delay: u16,
        transition: TransitionState,
    },
    DriverMode {
        mode: DriverMode,
    },
    DitherMode {
        dither: DitherMode,
    },
    RedrawDelay {
        redraw_delay: u16,
    },
    /// Bottom-most first
    DriverHints {
        default_hint: HintSpec,
        rects: Vec<RectHint>,
    },
    Status {
        apps: usize,
        windows: usize,
        default_hint: HintSpec,
        mode: DriverMode,
        dither: DitherMode,
        redraw_delay: u16,
        transition: TransitionState,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
}

impl Response {
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Error {
            kind,
            message: message.into(),
        }
    }
}

impl From<ServiceError> for Response {
    fn from(e: ServiceError) -> Self {
        Self::error(ErrorKind::from(&e), e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DriverError;
    use crate::registry::RegistryError;
    use std::time::Duration;

    #[test]
    fn test_request_shapes() {
        let request: Request = serde_json::from_str(r#"{"type": "app_register", "pid": 42}"#).unwrap();
        assert_eq!(request, Request::AppRegister { pid: 42 });

        let request: Request = serde_json::from_str(
            r#"{"type": "window_add", "app": "a1", "window": {"title": "t", "area": [0, 0, 10, 20], "hint": "Y2|D"}}"#,
        )
        .unwrap();
        let Request::WindowAdd { app, window } = request else {
            panic!("expected window_add");
        };
        assert_eq!(app.as_str(), "a1");
        assert_eq!(window.area, Rect::new(0, 0, 10, 20));
        assert!(window.visible);
        assert_eq!(window.z_index, 0);

        let request: Request =
            serde_json::from_str(r#"{"type": "window_update_zindex", "id": "w1", "z_index": 3}"#).unwrap();
        assert!(matches!(request, Request::WindowUpdateZindex { z_index: 3, .. }));

        let request: Request = serde_json::from_str(r#"{"type": "set_driver_mode", "mode": "zero_waveform"}"#).unwrap();
        assert_eq!(
            request,
            Request::SetDriverMode {
                mode: DriverMode::ZeroWaveform
            }
        );

        let request: Request =
            serde_json::from_str(r#"{"type": "set_redraw_delay", "redraw_delay": 120}"#).unwrap();
        assert_eq!(request, Request::SetRedrawDelay { redraw_delay: 120 });
        assert!(serde_json::from_str::<Request>(r#"{"type": "set_redraw_delay", "redraw_delay": -1}"#).is_err());

        assert_eq!(serde_json::to_string(&Request::DriverHints).unwrap(), r#"{"type":"driver_hints"}"#);
        assert_eq!(serde_json::to_string(&Request::Watch).unwrap(), r#"{"type":"watch"}"#);
    }

    #[test]
    fn test_unknown_request_rejected() {
        assert!(serde_json::from_str::<Request>(r#"{"type": "reboot"}"#).is_err());
        assert!(serde_json::from_str::<Request>(r#"{"type": "set_driver_mode", "mode": "turbo"}"#).is_err());
    }

    #[test]
    fn test_wire_window_hint_parsing() {
        let mut window = WireWindow::new("t", Rect::new(0, 0, 1, 1));
        assert_eq!(window.to_spec().unwrap().hint, None);

        window.hint = "Y1|T|R".to_string();
        window.fullscreen = true;
        let spec = window.to_spec().unwrap();
        assert_eq!(spec.hint, Some("Y1|T|R".parse::<HintSpec>().unwrap()));
        assert!(spec.fullscreen);

        window.hint = "Y3".to_string();
        assert!(window.to_spec().is_err());
    }

    #[test]
    fn test_response_shapes() {
        assert_eq!(serde_json::to_string(&Response::Success).unwrap(), r#"{"type":"success"}"#);

        let json = serde_json::to_string(&Response::Hints {
            rects: vec![RectHint {
                area: Rect::new(0, 0, 5, 5),
                hint: "Y4|D".parse().unwrap(),
            }],
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"hints","rects":[{"area":[0,0,5,5],"hint":"Y4|D"}]}"#);

        let json = serde_json::to_string(&Response::error(ErrorKind::DriverBusy, "busy")).unwrap();
        assert_eq!(json, r#"{"type":"error","kind":"driver_busy","message":"busy"}"#);
    }

    #[test]
    fn test_error_kinds() {
        let cases = vec![
            (
                ServiceError::Registry(RegistryError::AppNotFound(AppId::from("x"))),
                ErrorKind::NotFound,
            ),
            (
                ServiceError::Hint("Y9".parse::<HintSpec>().unwrap_err()),
                ErrorKind::MalformedHint,
            ),
            (
                ServiceError::Mode(ModeError::InvalidMode(DriverMode::ZeroWaveform)),
                ErrorKind::InvalidMode,
            ),
            (
                ServiceError::Mode(ModeError::DriverBusy("x".into())),
                ErrorKind::DriverBusy,
            ),
            (
                ServiceError::Mode(ModeError::ModeApplyTimeout {
                    requested: DriverMode::Fast,
                    timeout: Duration::from_secs(1),
                }),
                ErrorKind::ModeApplyTimeout,
            ),
            (
                ServiceError::Driver(DriverError::Rejected("x".into())),
                ErrorKind::Driver,
            ),
            (ServiceError::Closed, ErrorKind::Internal),
        ];

        for (error, kind) in cases {
            assert_eq!(ErrorKind::from(&error), kind, "{}", error);
        }
    }
}
