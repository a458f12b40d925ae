//! camcast command line front end
//!
//! Flags set up the initial configuration; stdin commands stand in for the
//! connect/camera/stream buttons and the rate and quality sliders.

use anyhow::{bail, Context, Result};
use camcast::{
    logging, platform_backend, CaptureBackend, CaptureConfig, ConnectionConfig, ConnectionState,
    Event, FacingMode, FailurePolicy, PayloadFormat, Severity, StreamSettings, Streamer,
    StreamerConfig, SyntheticBackend, VideoResolution, WebSocketDialer,
};
use clap::{Parser, ValueEnum};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Parser)]
#[command(
    name = "camcast",
    about = "Stream webcam frames as JPEG over a WebSocket connection",
    author,
    version
)]
struct Cli {
    /// WebSocket endpoint (ws:// or wss://)
    #[arg(short, long, default_value = "ws://localhost:9000")]
    endpoint: String,

    /// Frames per second (1-30)
    #[arg(long, default_value_t = 15)]
    fps: u32,

    /// JPEG quality (0.10-1.00, snapped to 0.05)
    #[arg(short, long, default_value_t = 0.8)]
    quality: f32,

    /// Requested capture width
    #[arg(long, default_value_t = 1280)]
    width: u32,

    /// Requested capture height
    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Preferred camera
    #[arg(long, value_enum, default_value_t = Facing::User)]
    facing: Facing,

    /// Camera index; overrides --facing
    #[arg(long)]
    device: Option<u32>,

    /// How frames are sent
    #[arg(long, value_enum, default_value_t = Format::DataUrl)]
    format: Format,

    /// Where frames come from
    #[arg(long, value_enum, default_value_t = Source::default())]
    source: Source,

    /// Connection timeouts and queue sizes
    #[arg(long, value_enum, default_value_t = Network::Default)]
    network: Network,

    /// Stop streaming after this many failed sends in a row (0 never stops)
    #[arg(long, default_value_t = 30)]
    max_send_failures: u32,

    /// Connect, start the camera and start streaming right away
    #[arg(long)]
    auto: bool,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Debug, Copy, Clone, ValueEnum)]
enum Facing {
    User,
    Environment,
}

#[derive(Debug, Copy, Clone, ValueEnum)]
enum Format {
    DataUrl,
    Binary,
}

#[derive(Debug, Copy, Clone, ValueEnum)]
enum Source {
    Webcam,
    TestPattern,
}

impl Default for Source {
    fn default() -> Self {
        if cfg!(feature = "webcam") {
            Source::Webcam
        } else {
            Source::TestPattern
        }
    }
}

#[derive(Debug, Copy, Clone, ValueEnum)]
enum Network {
    Default,
    Lan,
    Remote,
}

impl Cli {
    fn config(&self) -> Result<StreamerConfig> {
        let settings = StreamSettings::new(self.fps, self.quality)
            .context("invalid --fps or --quality")?;

        let connection = match self.network {
            Network::Default => ConnectionConfig::default(),
            Network::Lan => ConnectionConfig::lan(),
            Network::Remote => ConnectionConfig::remote(),
        };

        let capture = CaptureConfig {
            resolution: VideoResolution::new(self.width, self.height),
            facing: match self.facing {
                Facing::User => FacingMode::User,
                Facing::Environment => FacingMode::Environment,
            },
            device_index: self.device,
            ..CaptureConfig::default()
        };

        let failure_policy = match self.max_send_failures {
            0 => FailurePolicy::unlimited(),
            limit => FailurePolicy {
                max_consecutive_send_failures: Some(limit),
            },
        };

        Ok(StreamerConfig {
            endpoint: Some(self.endpoint.clone()),
            connection,
            capture,
            settings,
            payload_format: match self.format {
                Format::DataUrl => PayloadFormat::DataUrl,
                Format::Binary => PayloadFormat::Binary,
            },
            failure_policy,
        })
    }

    fn backend(&self) -> Result<Arc<dyn CaptureBackend>> {
        match self.source {
            Source::TestPattern => Ok(Arc::new(SyntheticBackend::new())),
            Source::Webcam if cfg!(feature = "webcam") => Ok(platform_backend()),
            Source::Webcam => bail!("webcam capture not compiled in; rebuild with --features webcam or use --source test-pattern"),
        }
    }
}

#[derive(Debug, PartialEq)]
enum Command {
    Connect(Option<String>),
    Disconnect,
    Camera,
    Stream,
    Fps(u32),
    Quality(f32),
    Status { json: bool },
    Help,
    Quit,
}

fn parse_command(line: &str) -> Result<Command> {
    let mut words = line.split_whitespace();
    let Some(name) = words.next() else {
        bail!("empty command");
    };
    let arg = words.next();

    let command = match (name, arg) {
        ("connect", address) => Command::Connect(address.map(str::to_string)),
        ("disconnect", None) => Command::Disconnect,
        ("camera", None) => Command::Camera,
        ("stream", None) => Command::Stream,
        ("fps", Some(value)) => Command::Fps(value.parse().context("fps expects a number")?),
        ("quality", Some(value)) => {
            Command::Quality(value.parse().context("quality expects a number")?)
        }
        ("status", None) => Command::Status { json: false },
        ("status", Some("--json")) => Command::Status { json: true },
        ("help", None) => Command::Help,
        ("quit" | "exit", None) => Command::Quit,
        _ => bail!("unknown command: {} (try `help`)", line.trim()),
    };
    Ok(command)
}

const HELP: &str = "\
commands:
  connect [url]     connect to url (default: --endpoint)
  disconnect        close the connection
  camera            start or stop the camera
  stream            start or stop streaming
  fps <1-30>        set the frame rate
  quality <0.1-1>   set the JPEG quality
  status [--json]   show the current state
  help              show this help
  quit              exit";

fn print_event(event: &Event) {
    let tag = match event.severity() {
        Severity::Success => "ok",
        Severity::Info => "info",
        Severity::Error => "error",
    };
    println!("[{}] {}", tag, event.message());
}

fn print_status(streamer: &Streamer, json: bool) -> Result<()> {
    let status = streamer.status();
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("session:    {}", status.session);
    println!(
        "connection: {} {}",
        status.connection,
        status.address.as_deref().unwrap_or("")
    );
    match (&status.camera.device, status.camera.resolution) {
        (Some(device), Some(resolution)) => println!("camera:     {} ({})", device, resolution),
        _ if status.camera.loading => println!("camera:     starting"),
        _ => println!(
            "camera:     off{}",
            status
                .camera
                .error
                .as_deref()
                .map(|e| format!(" - {}", e))
                .unwrap_or_default()
        ),
    }
    println!(
        "settings:   {} fps, quality {:.2}, {:?}",
        status.settings.frame_rate(),
        status.settings.quality(),
        status.payload_format
    );
    println!(
        "sent:       {} frames, {} bytes, {} failed",
        status.streaming.frames_sent, status.channel.bytes_queued, status.streaming.send_failures
    );
    Ok(())
}

/// Stop the camera, or start it without holding up the command loop
///
/// A second call while the start is pending cancels it.
fn toggle_camera_in_background(streamer: &Arc<Streamer>) -> Option<JoinHandle<()>> {
    let capture = streamer.capture();
    if capture.is_active() || capture.is_loading() {
        streamer.stop_camera();
        return None;
    }

    let streamer = Arc::clone(streamer);
    Some(tokio::spawn(async move {
        // Failures are reported through the camera error event.
        if let Err(e) = streamer.start_camera().await {
            debug!("Camera start ended: {}", e);
        }
    }))
}

/// Run one command; returns false on quit
async fn run_command(streamer: &Arc<Streamer>, command: Command) -> Result<bool> {
    match command {
        Command::Connect(address) => {
            match address {
                Some(address) => streamer.connect(&address)?,
                None => streamer.connect_default()?,
            };
        }
        Command::Disconnect => streamer.disconnect(),
        Command::Camera => {
            toggle_camera_in_background(streamer);
        }
        Command::Stream => {
            streamer.toggle_streaming()?;
        }
        Command::Fps(fps) => streamer.set_frame_rate(fps)?,
        Command::Quality(quality) => streamer.set_quality(quality)?,
        Command::Status { json } => print_status(streamer, json)?,
        Command::Help => println!("{}", HELP),
        Command::Quit => return Ok(false),
    }
    Ok(true)
}

async fn auto_start(streamer: &Streamer) -> Result<()> {
    streamer.connect_default()?;
    streamer.start_camera().await?;
    let timeout = streamer.config().connection.timeout + Duration::from_secs(1);
    streamer
        .transport()
        .wait_for_state(ConnectionState::Connected, timeout)
        .await?;
    streamer.toggle_streaming()?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level)?;

    let config = cli.config()?;
    let streamer = Arc::new(Streamer::with_components(
        config,
        Arc::new(WebSocketDialer),
        cli.backend()?,
    )?);
    let mut events = streamer.events();

    info!("camcast ready; type `help` for commands");
    if cli.auto {
        if let Err(e) = auto_start(&streamer).await {
            warn!("Auto start incomplete: {}", e);
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                let keep_going = match parse_command(&line) {
                    Ok(command) => run_command(&streamer, command).await,
                    Err(e) => Err(e),
                };
                match keep_going {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => println!("[error] {:#}", e),
                }
            }
            Some(event) = events.next() => print_event(&event),
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    streamer.shutdown();
    Ok(())
}
