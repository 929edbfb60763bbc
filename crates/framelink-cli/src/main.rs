//! FRAMELINK CLI
//!
//! Stream video frames between two hosts over TCP or UDP.

mod config;
mod progress;
mod sink;
mod source;

use clap::{Args, Parser, Subcommand};
use framelink_core::handshake::{initiate, respond};
use framelink_core::{
    DatagramReceivePump, DatagramSendPump, FrameSink, FrameSource, HandshakeConfig,
    HandshakeToken, PumpExit, PumpReport, ReceivePump, SendPump, Session, Shutdown,
    ShutdownHandle,
};
use framelink_transport::{DatagramSocket, StreamListener};
use std::io::IsTerminal;
use std::net::SocketAddr;
use std::path::PathBuf;

use config::{ChunkFormatKind, CodecKind, Config, LayoutKind, Role, TransportKind};
use progress::{StreamProgress, format_bytes, format_duration};
use sink::StatsSink;
use source::{ProgressSource, RawFileSource, TestPatternSource};

/// FRAMELINK - raw and JPEG video frames over TCP or UDP
#[derive(Parser)]
#[command(name = "framelink")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream frames to a peer
    Send {
        #[command(flatten)]
        link: LinkArgs,

        /// Frame file to loop (raw RGB frames, or one JPEG); a test pattern
        /// is sent when omitted
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Target frame rate (0 sends as fast as possible)
        #[arg(long)]
        fps: Option<f64>,

        /// Start token sent to the peer when connecting
        #[arg(long)]
        token: Option<String>,
    },

    /// Receive frames from a peer
    Receive {
        #[command(flatten)]
        link: LinkArgs,

        /// Stop after this many frames
        #[arg(short = 'n', long)]
        frames: Option<u64>,
    },
}

/// Link settings shared by both directions; each overrides the config file
#[derive(Args)]
struct LinkArgs {
    /// Connect to host:port
    #[arg(long, value_name = "ADDR", conflicts_with = "listen")]
    connect: Option<String>,

    /// Listen on (TCP) or bind (UDP) host:port
    #[arg(long, value_name = "ADDR")]
    listen: Option<String>,

    /// Transport protocol
    #[arg(short, long, value_enum)]
    transport: Option<TransportKind>,

    /// Stream wire format (TCP)
    #[arg(long, value_enum)]
    codec: Option<CodecKind>,

    /// Frame payload layout
    #[arg(long, value_enum)]
    layout: Option<LayoutKind>,

    /// Datagram chunk header format (UDP)
    #[arg(long, value_enum)]
    chunk_format: Option<ChunkFormatKind>,

    /// Frame width in pixels
    #[arg(long)]
    width: Option<u16>,

    /// Frame height in pixels
    #[arg(long)]
    height: Option<u16>,
}

impl LinkArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(addr) = &self.connect {
            config.network.address.clone_from(addr);
            config.network.role = Some(Role::Connect);
        }
        if let Some(addr) = &self.listen {
            config.network.address.clone_from(addr);
            config.network.role = Some(Role::Listen);
        }
        if let Some(transport) = self.transport {
            config.network.transport = transport;
        }
        if let Some(codec) = self.codec {
            config.stream.codec = codec;
        }
        if let Some(layout) = self.layout {
            config.stream.pixel_layout = layout;
        }
        if let Some(chunk_format) = self.chunk_format {
            config.datagram.chunk_format = chunk_format;
        }
        if let Some(width) = self.width {
            config.stream.width = width;
        }
        if let Some(height) = self.height {
            config.stream.height = height;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Send,
    Receive,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };

    let direction = match &cli.command {
        Commands::Send {
            link, fps, token, ..
        } => {
            link.apply(&mut config);
            if let Some(fps) = fps {
                config.stream.fps = *fps;
            }
            if token.is_some() {
                config.handshake.token.clone_from(token);
            }
            Direction::Send
        }
        Commands::Receive { link, .. } => {
            link.apply(&mut config);
            Direction::Receive
        }
    };

    // Initialize logging
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.to_lowercase()
    };
    tracing_subscriber::fmt().with_env_filter(level).init();

    // Validate configuration
    config.validate()?;

    let (handle, shutdown) = Shutdown::channel();
    spawn_ctrl_c(handle);

    let report = match cli.command {
        Commands::Send { file, .. } => {
            let progress = StreamProgress::new("sent");
            let report = match file {
                Some(path) => {
                    let layout = config.stream.pixel_layout.pixel_layout();
                    let source = RawFileSource::open(
                        &path,
                        config.stream.width,
                        config.stream.height,
                        layout,
                    )
                    .await?;
                    println!("Source: {} ({:?})", path.display(), layout);
                    send(&config, ProgressSource::new(source, progress.clone()), shutdown).await
                }
                None => {
                    if config.stream.pixel_layout == LayoutKind::Jpeg {
                        anyhow::bail!("The test pattern is raw RGB; pass --file for JPEG");
                    }
                    let source = TestPatternSource::new(config.stream.width, config.stream.height);
                    println!(
                        "Source: test pattern {}x{}",
                        config.stream.width, config.stream.height
                    );
                    send(&config, ProgressSource::new(source, progress.clone()), shutdown).await
                }
            };
            finish(&progress, report)
        }
        Commands::Receive { frames, .. } => {
            let progress = StreamProgress::new("received");
            let sink = StatsSink::new(progress.clone(), frames);
            let report = receive(&config, sink, shutdown).await;
            finish(&progress, report)
        }
    }?;

    print_summary(direction, &report);

    if !report.exit.is_clean() {
        anyhow::bail!("Stream ended abnormally: {:?}", report.exit);
    }

    Ok(())
}

/// Trigger shutdown on Ctrl+C
fn spawn_ctrl_c(handle: ShutdownHandle) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\nShutting down...");
            handle.trigger();
        }
    });
}

fn finish(
    progress: &StreamProgress,
    report: anyhow::Result<PumpReport>,
) -> anyhow::Result<PumpReport> {
    match &report {
        Ok(report) => progress.finish_with_message(format!("({:?})", report.exit)),
        Err(_) => progress.abandon(),
    }
    report
}

/// Connection role, defaulting to: TCP senders listen and receivers
/// connect; UDP senders target the address and receivers bind it.
fn effective_role(config: &Config, direction: Direction) -> anyhow::Result<Role> {
    let transport = config.network.transport;
    let default = match (transport, direction) {
        (TransportKind::Tcp, Direction::Send) | (TransportKind::Udp, Direction::Receive) => {
            Role::Listen
        }
        (TransportKind::Tcp, Direction::Receive) | (TransportKind::Udp, Direction::Send) => {
            Role::Connect
        }
    };
    let role = config.network.role.unwrap_or(default);

    if transport == TransportKind::Udp && role != default {
        match direction {
            Direction::Send => anyhow::bail!("A UDP sender cannot listen; use --connect"),
            Direction::Receive => anyhow::bail!("A UDP receiver cannot connect; use --listen"),
        }
    }

    Ok(role)
}

async fn send<Src>(
    config: &Config,
    source: Src,
    mut shutdown: Shutdown,
) -> anyhow::Result<PumpReport>
where
    Src: FrameSource + 'static,
{
    let role = effective_role(config, Direction::Send)?;
    let addr = config.resolve_address()?;

    match config.network.transport {
        TransportKind::Tcp => {
            let Some(session) = open_session(config, role, addr, &mut shutdown).await? else {
                return Ok(stopped_report());
            };
            let pump = SendPump::new(session, source, config.pump_config(), shutdown)?;
            Ok(pump.run().await)
        }
        TransportKind::Udp => {
            let bind: SocketAddr = if addr.is_ipv4() {
                "0.0.0.0:0".parse()?
            } else {
                "[::]:0".parse()?
            };
            let socket = DatagramSocket::bind(bind, &config.transport_config()).await?;
            println!("Sending datagrams to {addr}");
            let pump = DatagramSendPump::new(
                socket,
                addr,
                source,
                config.pump_config(),
                config.datagram_config(),
                shutdown,
            );
            Ok(pump.run().await)
        }
    }
}

async fn receive<Snk>(
    config: &Config,
    sink: Snk,
    mut shutdown: Shutdown,
) -> anyhow::Result<PumpReport>
where
    Snk: FrameSink + 'static,
{
    let role = effective_role(config, Direction::Receive)?;
    let addr = config.resolve_address()?;

    match config.network.transport {
        TransportKind::Tcp => {
            let Some(session) = open_session(config, role, addr, &mut shutdown).await? else {
                return Ok(stopped_report());
            };
            let pump = ReceivePump::new(session, sink, config.pump_config(), shutdown)?;
            Ok(pump.run().await)
        }
        TransportKind::Udp => {
            let socket = DatagramSocket::bind(addr, &config.transport_config()).await?;
            println!("Receiving datagrams on {addr}");
            let pump = DatagramReceivePump::new(
                socket,
                sink,
                config.pump_config(),
                config.datagram_config(),
                shutdown,
            );
            Ok(pump.run().await)
        }
    }
}

/// Establish a TCP session and run the handshake; `None` if shutdown came
/// first. The connecting side sends the start token.
async fn open_session(
    config: &Config,
    role: Role,
    addr: SocketAddr,
    shutdown: &mut Shutdown,
) -> anyhow::Result<Option<Session>> {
    let transport = config.transport_config();
    let handshake = config.handshake_config();

    match role {
        Role::Connect => {
            let token = start_token(config).await?;
            println!("Connecting to {addr}");
            let mut session = tokio::select! {
                biased;
                () = shutdown.wait() => return Ok(None),
                session = Session::connect(addr, &transport) => session?,
            };
            let shaken = handshake_or_shutdown(&mut session, &handshake, Some(&token), shutdown);
            Ok(shaken.await?.then_some(session))
        }
        Role::Listen => {
            let listener = StreamListener::bind(addr, transport).await?;
            println!("Listening on {}", listener.local_addr()?);

            let mut session = tokio::select! {
                biased;
                () = shutdown.wait() => return Ok(None),
                session = Session::accept(listener) => session?,
            };
            if let Some(peer) = session.peer_addr() {
                println!("Peer connected from {peer}");
            }

            let shaken = handshake_or_shutdown(&mut session, &handshake, None, shutdown);
            Ok(shaken.await?.then_some(session))
        }
    }
}

/// Run the handshake, initiating when a token is given and responding
/// otherwise. Returns false, with the session closed, if shutdown came first.
async fn handshake_or_shutdown(
    session: &mut Session,
    handshake: &HandshakeConfig,
    token: Option<&HandshakeToken>,
    shutdown: &mut Shutdown,
) -> anyhow::Result<bool> {
    let exchange = {
        let session = &mut *session;
        async move {
            match token {
                Some(token) => initiate(session, handshake, token).await,
                None => respond(session, handshake).await,
            }
        }
    };
    let outcome = tokio::select! {
        biased;
        () = shutdown.wait() => None,
        outcome = exchange => Some(outcome),
    };

    match outcome {
        Some(outcome) => {
            tracing::debug!("Handshake complete: {:?}", outcome?);
            Ok(true)
        }
        None => {
            tracing::info!("Shutdown during handshake");
            session.close().await;
            Ok(false)
        }
    }
}

/// Token from config, or prompted for on an interactive terminal
async fn start_token(config: &Config) -> anyhow::Result<HandshakeToken> {
    if let Some(token) = &config.handshake.token {
        return Ok(HandshakeToken::new(token.clone())?);
    }
    if !config.handshake.enabled || !std::io::stdin().is_terminal() {
        return Ok(HandshakeToken::default());
    }

    let input = tokio::task::spawn_blocking(|| -> std::io::Result<String> {
        use std::io::Write;
        print!("Start token [START]: ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        Ok(line)
    })
    .await??;

    Ok(HandshakeToken::new(input.trim_end_matches(['\r', '\n']))?)
}

fn stopped_report() -> PumpReport {
    PumpReport {
        exit: PumpExit::Stopped,
        frames: 0,
        bytes: 0,
        dropped: 0,
        elapsed: std::time::Duration::ZERO,
    }
}

fn print_summary(direction: Direction, report: &PumpReport) {
    let verb = match direction {
        Direction::Send => "Sent",
        Direction::Receive => "Received",
    };
    println!();
    println!("{verb} {} frames ({})", report.frames, format_bytes(report.bytes));
    println!("Duration: {}", format_duration(report.elapsed));
    println!("Average: {:.1} fps", report.fps());
    if report.dropped > 0 {
        println!("Dropped: {} frames", report.dropped);
    }
    println!("Exit: {:?}", report.exit);
}
