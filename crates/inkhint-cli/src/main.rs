//! inkhint CLI
//!
//! Control and configuration tool for the inkhint daemon.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use inkhint_daemon::driver::{DitherMode, DriverMode};
use inkhint_daemon::hint::HintSpec;
use inkhint_daemon::ipc::determine_socket_path;
use inkhint_daemon::protocol::{Notification, Request, Response, WireWindow};
use inkhint_daemon::rect::Rect;
use inkhint_daemon::registry::RectHint;
use miette::{miette, IntoDiagnostic};
use serde::de::DeserializeOwned;

#[derive(Parser, Debug)]
#[command(name = "inkhint")]
#[command(about = "Control the inkhint e-paper hint daemon")]
#[command(version)]
struct Cli {
    /// Path to configuration file [default: ~/.config/inkhint/config.kdl]
    #[arg(short, long)]
    config: Option<String>,

    /// Daemon socket (overrides config and environment)
    #[arg(short, long)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate the configuration file
    Validate,

    /// Show daemon status
    Status,

    /// Manage applications
    #[command(subcommand)]
    App(AppCommand),

    /// Manage windows
    #[command(subcommand)]
    Window(WindowCommand),

    /// Show the hint in effect at a pixel
    #[command(allow_negative_numbers = true)]
    Resolve { x: i32, y: i32 },

    /// List visible windows with their hints, topmost first
    Hints,

    /// Show or set the default hint
    DefaultHint { hint: Option<String> },

    /// Show, set or cycle the driver mode
    Mode {
        #[command(subcommand)]
        action: Option<ModeAction>,
    },

    /// Show, set or cycle the dither mode
    Dither {
        #[command(subcommand)]
        action: Option<DitherAction>,
    },

    /// Show or set the redraw delay for `R` hints
    RedrawDelay { delay: Option<u16> },

    /// Show the rectangles as uploaded to the driver, bottom-most first
    DriverHints,

    /// Trigger a full-screen refresh
    Refresh,

    /// Print daemon notifications as they happen
    Watch,
}

#[derive(Subcommand, Debug)]
enum AppCommand {
    /// Register an application and print its id
    Register {
        #[arg(long, default_value_t = 0)]
        pid: i32,
    },
    /// Remove an application and all its windows
    Remove { app: String },
}

#[derive(Args, Debug)]
struct WindowArgs {
    #[arg(long, default_value = "")]
    title: String,

    #[arg(long, num_args = 4, value_names = ["X1", "Y1", "X2", "Y2"], allow_negative_numbers = true, required = true)]
    area: Vec<i32>,

    /// Hint such as `Y2|D`; omit for the default hint
    #[arg(long, default_value = "")]
    hint: String,

    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    z_index: i32,

    #[arg(long)]
    hidden: bool,

    #[arg(long)]
    fullscreen: bool,
}

impl WindowArgs {
    fn to_wire(&self) -> miette::Result<WireWindow> {
        Ok(WireWindow {
            title: self.title.clone(),
            area: rect(&self.area)?,
            hint: self.hint.clone(),
            visible: !self.hidden,
            fullscreen: self.fullscreen,
            z_index: self.z_index,
        })
    }
}

#[derive(Subcommand, Debug)]
enum WindowCommand {
    /// Add a window to an application and print its id
    Add {
        app: String,
        #[command(flatten)]
        window: WindowArgs,
    },
    /// Replace every property of a window
    Update {
        id: String,
        #[command(flatten)]
        window: WindowArgs,
    },
    Remove { id: String },
    Title { id: String, title: String },
    #[command(allow_negative_numbers = true)]
    Area { id: String, x1: i32, y1: i32, x2: i32, y2: i32 },
    /// Set a window's hint; omit it to fall back to the default
    Hint { id: String, hint: Option<String> },
    Visible {
        id: String,
        #[arg(action = clap::ArgAction::Set)]
        visible: bool,
    },
    Fullscreen {
        id: String,
        #[arg(action = clap::ArgAction::Set)]
        fullscreen: bool,
    },
    #[command(allow_negative_numbers = true)]
    Zindex { id: String, z_index: i32 },
}

#[derive(Subcommand, Debug)]
enum ModeAction {
    Get,
    /// normal or fast
    Set { mode: DriverMode },
    /// Toggle between normal and fast
    Cycle,
}

#[derive(Subcommand, Debug)]
enum DitherAction {
    Get,
    /// bayer, blue_noise16 or blue_noise32
    Set { dither: DitherMode },
    Cycle,
}

fn rect(values: &[i32]) -> miette::Result<Rect> {
    match values {
        [x1, y1, x2, y2] => Ok(Rect::new(*x1, *y1, *x2, *y2)),
        _ => Err(miette!("an area needs exactly four numbers: X1 Y1 X2 Y2")),
    }
}

/// One daemon connection, used for any number of requests
struct Connection {
    reader: BufReader<UnixStream>,
    writer: UnixStream,
}

impl Connection {
    fn open(socket_path: &Path) -> miette::Result<Self> {
        let stream = UnixStream::connect(socket_path).map_err(|e| {
            miette!(
                help = "is inkhintd running?",
                "Failed to connect to {}: {}",
                socket_path.display(),
                e
            )
        })?;
        let writer = stream.try_clone().into_diagnostic()?;
        Ok(Self {
            reader: BufReader::new(stream),
            writer,
        })
    }

    fn read<T: DeserializeOwned>(&mut self) -> miette::Result<Option<T>> {
        let mut line = String::new();
        if self.reader.read_line(&mut line).into_diagnostic()? == 0 {
            return Ok(None);
        }
        serde_json::from_str(&line).into_diagnostic().map(Some)
    }

    fn call(&mut self, request: &Request) -> miette::Result<Response> {
        let mut json = serde_json::to_string(request).into_diagnostic()?;
        json.push('\n');
        self.writer.write_all(json.as_bytes()).into_diagnostic()?;

        match self.read()? {
            Some(Response::Error { kind, message }) => Err(miette!("{} ({:?})", message, kind)),
            Some(response) => Ok(response),
            None => Err(miette!("Daemon closed the connection")),
        }
    }
}

fn main() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let config_path: PathBuf = match &cli.config {
        Some(path) => shellexpand::tilde(path).into_owned().into(),
        None => inkhint_config::default_config_path(),
    };

    if let Commands::Validate = cli.command {
        return cmd_validate(&config_path);
    }

    let socket_path = match cli.socket {
        Some(path) => path,
        None => {
            let config = inkhint_config::load_config(&config_path)?;
            determine_socket_path(config.global.socket_path.as_deref())
        }
    };
    let mut conn = Connection::open(&socket_path)?;

    match cli.command {
        Commands::Validate => Ok(()),
        Commands::Status => cmd_status(&mut conn),
        Commands::App(command) => cmd_app(&mut conn, command),
        Commands::Window(command) => cmd_window(&mut conn, command),
        Commands::Resolve { x, y } => print_response(conn.call(&Request::ResolveHint { x, y })?),
        Commands::Hints => print_response(conn.call(&Request::ResolveAll)?),
        Commands::DefaultHint { hint: None } => print_response(conn.call(&Request::DefaultHint)?),
        Commands::DefaultHint { hint: Some(hint) } => {
            print_response(conn.call(&Request::SetDefaultHint { hint })?)
        }
        Commands::Mode { action } => {
            let request = match action.unwrap_or(ModeAction::Get) {
                ModeAction::Get => Request::DriverState,
                ModeAction::Set { mode } => Request::SetDriverMode { mode },
                ModeAction::Cycle => Request::CycleDriverMode,
            };
            print_response(conn.call(&request)?)
        }
        Commands::Dither { action } => {
            let request = match action.unwrap_or(DitherAction::Get) {
                DitherAction::Get => Request::DriverState,
                DitherAction::Set { dither } => Request::SetDitherMode { dither },
                DitherAction::Cycle => Request::CycleDitherMode,
            };
            print_response(conn.call(&request)?)
        }
        Commands::RedrawDelay { delay: None } => print_response(conn.call(&Request::RedrawDelay)?),
        Commands::RedrawDelay { delay: Some(redraw_delay) } => {
            print_response(conn.call(&Request::SetRedrawDelay { redraw_delay })?)
        }
        Commands::DriverHints => print_response(conn.call(&Request::DriverHints)?),
        Commands::Refresh => print_response(conn.call(&Request::GlobalRefresh)?),
        Commands::Watch => cmd_watch(&mut conn),
    }
}

fn cmd_validate(config_path: &Path) -> miette::Result<()> {
    println!("Validating configuration: {}", config_path.display());

    let config = inkhint_config::parse_config(config_path)?;

    if let Some(hint) = &config.default_hint {
        hint.parse::<HintSpec>()
            .map_err(|e| miette!("default-hint: {}", e))?;
    }

    for bridge in &config.bridges {
        let inkhint_config::BridgeConfig::Niri(niri) = bridge;
        for rule in &niri.rules {
            rule.hint
                .parse::<HintSpec>()
                .map_err(|e| miette!("bridge \"{}\" rule: {}", bridge.name(), e))?;
        }
    }

    println!("Configuration is valid!");
    println!("  Driver: {:?} at {}", config.driver.backend, config.driver.device.display());
    println!("  Screen: {}x{}", config.driver.screen.0, config.driver.screen.1);
    println!("  Bridges: {}", config.bridges.len());
    for bridge in &config.bridges {
        let inkhint_config::BridgeConfig::Niri(niri) = bridge;
        println!("    - {} on {} ({} rule(s))", bridge.name(), niri.output, niri.rules.len());
    }
    Ok(())
}

fn cmd_status(conn: &mut Connection) -> miette::Result<()> {
    match conn.call(&Request::Status)? {
        Response::Status {
            apps,
            windows,
            default_hint,
            mode,
            dither,
            redraw_delay,
            transition,
        } => {
            println!("Applications: {}", apps);
            println!("Windows:      {}", windows);
            println!("Default hint: {}", default_hint);
            println!("Driver mode:  {} ({:?})", mode, transition);
            println!("Dither mode:  {}", dither);
            println!("Redraw delay: {}", redraw_delay);
            Ok(())
        }
        other => print_response(other),
    }
}

fn cmd_app(conn: &mut Connection, command: AppCommand) -> miette::Result<()> {
    let request = match command {
        AppCommand::Register { pid } => Request::AppRegister { pid },
        AppCommand::Remove { app } => Request::AppRemove { app: app.into() },
    };
    print_response(conn.call(&request)?)
}

fn cmd_window(conn: &mut Connection, command: WindowCommand) -> miette::Result<()> {
    let request = match command {
        WindowCommand::Add { app, window } => Request::WindowAdd {
            app: app.into(),
            window: window.to_wire()?,
        },
        WindowCommand::Update { id, window } => Request::WindowUpdate {
            id: id.into(),
            window: window.to_wire()?,
        },
        WindowCommand::Remove { id } => Request::WindowRemove { id: id.into() },
        WindowCommand::Title { id, title } => Request::WindowUpdateTitle { id: id.into(), title },
        WindowCommand::Area { id, x1, y1, x2, y2 } => Request::WindowUpdateArea {
            id: id.into(),
            area: Rect::new(x1, y1, x2, y2),
        },
        WindowCommand::Hint { id, hint } => Request::WindowUpdateHint {
            id: id.into(),
            hint: hint.unwrap_or_default(),
        },
        WindowCommand::Visible { id, visible } => Request::WindowUpdateVisible { id: id.into(), visible },
        WindowCommand::Fullscreen { id, fullscreen } => Request::WindowUpdateFullscreen {
            id: id.into(),
            fullscreen,
        },
        WindowCommand::Zindex { id, z_index } => Request::WindowUpdateZindex { id: id.into(), z_index },
    };
    print_response(conn.call(&request)?)
}

fn cmd_watch(conn: &mut Connection) -> miette::Result<()> {
    conn.call(&Request::Watch)?;
    while let Some(notification) = conn.read::<Notification>()? {
        println!("{}", serde_json::to_string(&notification).into_diagnostic()?);
    }
    Ok(())
}

fn print_response(response: Response) -> miette::Result<()> {
    match response {
        Response::Success => println!("ok"),
        Response::App { app } => println!("{}", app),
        Response::Window { window } => println!("{}", window),
        Response::Hint { hint } => println!("{}", hint),
        Response::Hints { rects } => print_rects(&rects),
        Response::DriverHints { default_hint, rects } => {
            println!("default {}", default_hint);
            print_rects(&rects);
        }
        Response::DriverState {
            mode,
            dither,
            redraw_delay,
            transition,
        } => println!(
            "mode {} dither {} redraw-delay {} ({:?})",
            mode, dither, redraw_delay, transition
        ),
        Response::DriverMode { mode } => println!("{}", mode),
        Response::DitherMode { dither } => println!("{}", dither),
        Response::RedrawDelay { redraw_delay } => println!("{}", redraw_delay),
        other => println!("{}", serde_json::to_string_pretty(&other).into_diagnostic()?),
    }
    Ok(())
}

fn print_rects(rects: &[RectHint]) {
    for rect in rects {
        let a = rect.area;
        println!("{:>5} {:>5} {:>5} {:>5}  {}", a.x1, a.y1, a.x2, a.y2, rect.hint);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_needs_four_numbers() {
        assert_eq!(rect(&[0, -5, 10, 20]).unwrap(), Rect::new(0, -5, 10, 20));
        assert!(rect(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_window_add_arguments() {
        let cli = Cli::try_parse_from([
            "inkhint", "window", "add", "app-1", "--area", "0", "0", "100", "50", "--hint", "Y2|D",
            "--z-index", "-1", "--hidden",
        ])
        .unwrap();

        let Commands::Window(WindowCommand::Add { app, window }) = cli.command else {
            panic!("expected window add");
        };
        assert_eq!(app, "app-1");
        let wire = window.to_wire().unwrap();
        assert_eq!(wire.area, Rect::new(0, 0, 100, 50));
        assert_eq!(wire.hint, "Y2|D");
        assert_eq!(wire.z_index, -1);
        assert!(!wire.visible);
    }

    #[test]
    fn test_mode_defaults_to_get() {
        let cli = Cli::try_parse_from(["inkhint", "mode"]).unwrap();
        assert!(matches!(cli.command, Commands::Mode { action: None }));

        let cli = Cli::try_parse_from(["inkhint", "mode", "set", "fast"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Mode {
                action: Some(ModeAction::Set {
                    mode: DriverMode::Fast
                })
            }
        ));

        assert!(Cli::try_parse_from(["inkhint", "dither", "set", "sparkle"]).is_err());
    }

    #[test]
    fn test_redraw_delay_arguments() {
        let cli = Cli::try_parse_from(["inkhint", "redraw-delay"]).unwrap();
        assert!(matches!(cli.command, Commands::RedrawDelay { delay: None }));

        let cli = Cli::try_parse_from(["inkhint", "redraw-delay", "250"]).unwrap();
        assert!(matches!(cli.command, Commands::RedrawDelay { delay: Some(250) }));

        assert!(Cli::try_parse_from(["inkhint", "redraw-delay", "70000"]).is_err());
        assert!(Cli::try_parse_from(["inkhint", "redraw-delay", "-1"]).is_err());

        let cli = Cli::try_parse_from(["inkhint", "driver-hints"]).unwrap();
        assert!(matches!(cli.command, Commands::DriverHints));
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_area_requires_window_id_and_four_numbers() {
        assert!(Cli::try_parse_from(["inkhint", "window", "area", "w1", "0", "0", "10"]).is_err());
        assert!(Cli::try_parse_from(["inkhint", "window", "area", "w1", "0", "0", "10", "10"]).is_ok());
    }
}
