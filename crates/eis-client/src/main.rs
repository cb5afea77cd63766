//! eis-client command line entry point.
//!
//! Connects to an EIS socket, performs one gesture and disconnects.
//!
//! # Usage
//!
//! ```text
//! eis-client --socket $XDG_RUNTIME_DIR/eis-0 click 100 200 --count 2
//! eis-client type "Hello, world!"
//! eis-client key ctrl+shift+t
//! eis-client pinch 500 500 200 40 --duration-ms 500
//! ```
//!
//! # Logging (for beginners)
//!
//! Log output is controlled by the `RUST_LOG` environment variable, e.g.
//! `RUST_LOG=debug` prints every request and event on the wire.  Without
//! it only lifecycle messages (`info` and above) are shown.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use eis_client::{perform_all, ClientConfig, Gesture, InputSession, Waypoint};
use eis_core::{Modifier, MouseButton, Point, ScrollAxis};

#[derive(Debug, Parser)]
#[command(name = "eis-client", version, about = "Emulate input over the EI protocol")]
struct Cli {
    /// Path of the EIS Unix socket.
    #[arg(long, env = "LIBEI_SOCKET")]
    socket: PathBuf,

    /// Optional TOML configuration file.
    #[arg(long, env = "EIS_CLIENT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Move the pointer to absolute coordinates.
    Move { x: f64, y: f64 },
    /// Click a mouse button.
    Click {
        x: f64,
        y: f64,
        #[arg(long, default_value = "left", value_parser = parse_button)]
        button: MouseButton,
        #[arg(long, default_value_t = 1)]
        count: u32,
        /// Comma separated modifiers held during the click, e.g. `ctrl,shift`.
        #[arg(long, value_delimiter = ',', value_parser = parse_modifier)]
        modifiers: Vec<Modifier>,
        /// Hold the last press this long.
        #[arg(long, default_value_t = 0)]
        hold_ms: u64,
    },
    /// Press a button at `from`, move to `to`, release.
    Drag {
        from_x: f64,
        from_y: f64,
        to_x: f64,
        to_y: f64,
        #[arg(long, default_value = "left", value_parser = parse_button)]
        button: MouseButton,
        /// Intermediate point `x,y` or `x,y,dwell_ms`; repeatable.
        #[arg(long = "via", value_parser = parse_waypoint)]
        waypoints: Vec<Waypoint>,
        #[arg(long, value_delimiter = ',', value_parser = parse_modifier)]
        modifiers: Vec<Modifier>,
    },
    /// Scroll at a position.  Positive deltas scroll down (or right).
    Scroll {
        x: f64,
        y: f64,
        #[arg(allow_negative_numbers = true)]
        delta: i32,
        #[arg(long)]
        horizontal: bool,
        /// Send wheel notches instead of smooth pixel deltas.
        #[arg(long)]
        discrete: bool,
        #[arg(long, default_value_t = 1)]
        steps: u32,
    },
    /// Type text on the US layout.
    Type { text: String },
    /// Press a key or combo such as `ctrl+shift+t`.
    Key {
        combo: String,
        /// Only press (and keep held).
        #[arg(long, conflicts_with = "up")]
        down: bool,
        /// Only release.
        #[arg(long)]
        up: bool,
    },
    /// Tap the touchscreen.
    Tap {
        x: f64,
        y: f64,
        #[arg(long, default_value_t = 0)]
        hold_ms: u64,
    },
    /// One-finger swipe.
    Swipe {
        from_x: f64,
        from_y: f64,
        to_x: f64,
        to_y: f64,
        #[arg(long, default_value_t = 300)]
        duration_ms: u64,
    },
    /// Two-finger pinch about a centre point.
    Pinch {
        center_x: f64,
        center_y: f64,
        start_distance: f64,
        end_distance: f64,
        #[arg(long, default_value_t = 500)]
        duration_ms: u64,
    },
    /// Several fingers swiping together.
    MultiSwipe {
        from_x: f64,
        from_y: f64,
        to_x: f64,
        to_y: f64,
        #[arg(long, default_value_t = 3)]
        fingers: u32,
        #[arg(long, default_value_t = 300)]
        duration_ms: u64,
    },
}

fn parse_button(s: &str) -> Result<MouseButton, String> {
    MouseButton::from_name(s).ok_or_else(|| format!("unknown mouse button `{s}`"))
}

fn parse_modifier(s: &str) -> Result<Modifier, String> {
    Modifier::from_name(s).ok_or_else(|| format!("unknown modifier `{s}`"))
}

fn parse_waypoint(s: &str) -> Result<Waypoint, String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    let number = |p: &str| p.parse::<f64>().map_err(|e| format!("bad waypoint `{s}`: {e}"));
    match parts.as_slice() {
        [x, y] => Ok(Waypoint {
            point: Point::new(number(*x)?, number(*y)?),
            dwell_ms: 0,
        }),
        [x, y, dwell] => Ok(Waypoint {
            point: Point::new(number(*x)?, number(*y)?),
            dwell_ms: dwell
                .parse()
                .map_err(|e| format!("bad waypoint dwell `{dwell}`: {e}"))?,
        }),
        _ => Err(format!("waypoint `{s}` must be `x,y` or `x,y,dwell_ms`")),
    }
}

impl Command {
    fn into_gesture(self) -> anyhow::Result<Gesture> {
        let gesture = match self {
            Command::Move { x, y } => Gesture::Move { x, y },
            Command::Click {
                x,
                y,
                button,
                count,
                modifiers,
                hold_ms,
            } => Gesture::Click {
                x,
                y,
                button,
                count,
                modifiers,
                hold_ms,
            },
            Command::Drag {
                from_x,
                from_y,
                to_x,
                to_y,
                button,
                waypoints,
                modifiers,
            } => Gesture::Drag {
                from: Point::new(from_x, from_y),
                to: Point::new(to_x, to_y),
                waypoints,
                button,
                modifiers,
            },
            Command::Scroll {
                x,
                y,
                delta,
                horizontal,
                discrete,
                steps,
            } => Gesture::Scroll {
                x,
                y,
                delta,
                axis: if horizontal {
                    ScrollAxis::Horizontal
                } else {
                    ScrollAxis::Vertical
                },
                discrete,
                steps,
            },
            Command::Type { text } => Gesture::Type { text },
            Command::Key { combo, down, up } => match (down, up) {
                (true, false) => Gesture::KeyDown { combo },
                (false, true) => Gesture::KeyUp { combo },
                (false, false) => Gesture::KeyCombo { combo },
                (true, true) => bail!("--down and --up are mutually exclusive"),
            },
            Command::Tap { x, y, hold_ms } => Gesture::TouchTap { x, y, hold_ms },
            Command::Swipe {
                from_x,
                from_y,
                to_x,
                to_y,
                duration_ms,
            } => Gesture::TouchSwipe {
                from: Point::new(from_x, from_y),
                to: Point::new(to_x, to_y),
                duration_ms,
            },
            Command::Pinch {
                center_x,
                center_y,
                start_distance,
                end_distance,
                duration_ms,
            } => Gesture::TouchPinch {
                center: Point::new(center_x, center_y),
                start_distance,
                end_distance,
                duration_ms,
            },
            Command::MultiSwipe {
                from_x,
                from_y,
                to_x,
                to_y,
                fingers,
                duration_ms,
            } => Gesture::TouchMultiSwipe {
                from: Point::new(from_x, from_y),
                to: Point::new(to_x, to_y),
                fingers,
                duration_ms,
            },
        };
        Ok(gesture)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ClientConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ClientConfig::default(),
    };
    let gesture = cli.command.into_gesture()?;
    info!("eis-client starting: {} via {}", gesture.name(), cli.socket.display());

    let session = InputSession::connect_unix(&cli.socket, &config)
        .await
        .with_context(|| format!("opening EI session on {}", cli.socket.display()))?;

    perform_all(&session, vec![gesture])
        .await
        .context("performing gesture")?;

    info!("eis-client finished");
    Ok(())
}
