//! Configuration system for FRAMELINK CLI.

use clap::ValueEnum;
use framelink_core::{
    ChunkFormat, DatagramConfig, DesyncPolicy, FrameCodec, HandshakeConfig, MAX_CHUNK_PAYLOAD,
    PayloadFormat, PixelLayout, PumpConfig, ReassemblyConfig,
};
use framelink_transport::TransportConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// FRAMELINK configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Network configuration
    #[serde(default)]
    pub network: NetworkConfig,
    /// Stream configuration
    #[serde(default)]
    pub stream: StreamConfig,
    /// Handshake configuration
    #[serde(default)]
    pub handshake: HandshakeSection,
    /// Datagram configuration
    #[serde(default)]
    pub datagram: DatagramSection,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Transport protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Reliable byte stream
    Tcp,
    /// Chunked datagrams
    Udp,
}

/// Which side opens the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Connect to the peer's address
    Connect,
    /// Bind the address and wait for the peer
    Listen,
}

/// Stream wire format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    /// Header-prefixed frames
    Framed,
    /// Headerless fixed-size raw frames
    Fixed,
}

/// Frame payload layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LayoutKind {
    /// Packed 24-bit RGB
    Rgb24,
    /// JPEG images
    Jpeg,
}

/// Reaction to a fixed-size framing desync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DesyncKind {
    /// Drop the frame and keep reading
    Drop,
    /// End the session
    Fatal,
}

/// Datagram chunk header format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ChunkFormatKind {
    /// Sequence-numbered header
    V1,
    /// Index/total header of older senders
    Legacy,
}

/// Reassembled datagram payload format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    /// Payload is a framed packet
    Framed,
    /// Payload is the frame bytes
    Bare,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Peer address (connect) or local address (listen), as host:port
    #[serde(default = "default_address")]
    pub address: String,
    /// Transport protocol
    #[serde(default = "default_transport")]
    pub transport: TransportKind,
    /// Connection role; unset means senders listen and receivers connect
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

/// Stream configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Frame width in pixels
    #[serde(default = "default_width")]
    pub width: u16,
    /// Frame height in pixels
    #[serde(default = "default_height")]
    pub height: u16,
    /// Sender frame rate; zero sends as fast as possible
    #[serde(default = "default_fps")]
    pub fps: f64,
    /// Stream wire format
    #[serde(default = "default_codec")]
    pub codec: CodecKind,
    /// Frame payload layout
    #[serde(default = "default_pixel_layout")]
    pub pixel_layout: LayoutKind,
    /// Reaction to a fixed-size framing desync
    #[serde(default = "default_desync_policy")]
    pub desync_policy: DesyncKind,
    /// Largest frame a framed header may announce
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    /// Frames between progress log lines
    #[serde(default = "default_report_every")]
    pub report_every: u64,
}

/// Handshake configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeSection {
    /// Exchange the start token before streaming
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Start token; prompted for when unset and stdin is a terminal
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Greeting line sent by the listening side
    #[serde(skip_serializing_if = "Option::is_none")]
    pub greeting: Option<String>,
    /// Acknowledgment line sent by the listening side
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack: Option<String>,
    /// Wait for the greeting, in milliseconds
    #[serde(default = "default_greeting_timeout_ms")]
    pub greeting_timeout_ms: u64,
    /// Wait for the acknowledgment, in milliseconds
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
}

/// Datagram configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatagramSection {
    /// Payload bytes per datagram
    #[serde(default = "default_max_payload")]
    pub max_payload: usize,
    /// Idle time before a partial frame is discarded, in milliseconds
    #[serde(default = "default_reassembly_timeout_ms")]
    pub reassembly_timeout_ms: u64,
    /// Chunk header format
    #[serde(default = "default_chunk_format")]
    pub chunk_format: ChunkFormatKind,
    /// Reassembled payload format
    #[serde(default = "default_payload_format")]
    pub payload_format: PayloadKind,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_address() -> String {
    "127.0.0.1:9999".to_string()
}

fn default_transport() -> TransportKind {
    TransportKind::Tcp
}

fn default_width() -> u16 {
    320
}

fn default_height() -> u16 {
    240
}

fn default_fps() -> f64 {
    30.0
}

fn default_codec() -> CodecKind {
    CodecKind::Framed
}

fn default_pixel_layout() -> LayoutKind {
    LayoutKind::Rgb24
}

fn default_desync_policy() -> DesyncKind {
    DesyncKind::Drop
}

fn default_max_frame_bytes() -> usize {
    framelink_core::DEFAULT_MAX_FRAME_BYTES
}

fn default_report_every() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_greeting_timeout_ms() -> u64 {
    2000
}

fn default_ack_timeout_ms() -> u64 {
    5000
}

fn default_max_payload() -> usize {
    MAX_CHUNK_PAYLOAD
}

fn default_reassembly_timeout_ms() -> u64 {
    2000
}

fn default_chunk_format() -> ChunkFormatKind {
    ChunkFormatKind::V1
}

fn default_payload_format() -> PayloadKind {
    PayloadKind::Framed
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            transport: default_transport(),
            role: None,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
            codec: default_codec(),
            pixel_layout: default_pixel_layout(),
            desync_policy: default_desync_policy(),
            max_frame_bytes: default_max_frame_bytes(),
            report_every: default_report_every(),
        }
    }
}

impl Default for HandshakeSection {
    fn default() -> Self {
        Self {
            enabled: true,
            token: None,
            greeting: None,
            ack: None,
            greeting_timeout_ms: default_greeting_timeout_ms(),
            ack_timeout_ms: default_ack_timeout_ms(),
        }
    }
}

impl Default for DatagramSection {
    fn default() -> Self {
        Self {
            max_payload: default_max_payload(),
            reassembly_timeout_ms: default_reassembly_timeout_ms(),
            chunk_format: default_chunk_format(),
            payload_format: default_payload_format(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl LayoutKind {
    /// Core pixel layout
    #[must_use]
    pub fn pixel_layout(self) -> PixelLayout {
        match self {
            Self::Rgb24 => PixelLayout::RawRgb24,
            Self::Jpeg => PixelLayout::EncodedJpeg,
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("framelink/config.toml")
    }

    /// Load config from the default path, or defaults if there is none
    ///
    /// # Errors
    ///
    /// Returns an error if an existing default config cannot be read.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Resolve the configured address
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be parsed or resolved.
    pub fn resolve_address(&self) -> anyhow::Result<SocketAddr> {
        if let Ok(addr) = self.network.address.parse() {
            return Ok(addr);
        }
        self.network
            .address
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| anyhow::anyhow!("Address '{}' did not resolve", self.network.address))
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        validate_host_port(&self.network.address, "Address")?;

        // Raw frames need real dimensions
        let raw = self.stream.pixel_layout == LayoutKind::Rgb24;
        if raw && (self.stream.width == 0 || self.stream.height == 0) {
            anyhow::bail!(
                "Frame dimensions must be non-zero for raw frames (got {}x{})",
                self.stream.width,
                self.stream.height
            );
        }

        if self.stream.codec == CodecKind::Fixed {
            if !raw {
                anyhow::bail!("Fixed-size codec requires the rgb24 pixel layout");
            }
            if self.network.transport == TransportKind::Udp {
                anyhow::bail!("Fixed-size codec is only available over TCP");
            }
        }

        if !self.stream.fps.is_finite() || self.stream.fps < 0.0 || self.stream.fps > 1000.0 {
            anyhow::bail!("FPS must be between 0 and 1000 (got {})", self.stream.fps);
        }

        if self.stream.max_frame_bytes == 0 || self.stream.max_frame_bytes > u32::MAX as usize {
            anyhow::bail!("Max frame bytes must be between 1 and 4GB");
        }

        if self.datagram.max_payload == 0 || self.datagram.max_payload > MAX_CHUNK_PAYLOAD {
            anyhow::bail!("Datagram payload must be between 1 and {MAX_CHUNK_PAYLOAD} bytes");
        }

        if self.datagram.reassembly_timeout_ms == 0 {
            anyhow::bail!("Reassembly timeout must be positive");
        }

        if let Some(token) = &self.handshake.token {
            if token.contains('\0') {
                anyhow::bail!("Handshake token must not contain NUL");
            }
        }

        for (name, line) in [
            ("greeting", &self.handshake.greeting),
            ("ack", &self.handshake.ack),
        ] {
            if line.as_deref().is_some_and(|l| l.contains('\n')) {
                anyhow::bail!("Handshake {name} must be a single line");
            }
        }

        // Validate log level
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }

    /// Transport settings
    #[must_use]
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig::default()
    }

    /// Handshake settings
    #[must_use]
    pub fn handshake_config(&self) -> HandshakeConfig {
        HandshakeConfig {
            enabled: self.handshake.enabled,
            greeting: self.handshake.greeting.clone(),
            ack: self.handshake.ack.clone(),
            greeting_timeout: Duration::from_millis(self.handshake.greeting_timeout_ms),
            ack_timeout: Duration::from_millis(self.handshake.ack_timeout_ms),
            ..HandshakeConfig::default()
        }
    }

    /// Pump settings
    #[must_use]
    pub fn pump_config(&self) -> PumpConfig {
        let codec = match self.stream.codec {
            CodecKind::Framed => FrameCodec::Framed {
                max_frame_bytes: self.stream.max_frame_bytes,
            },
            CodecKind::Fixed => FrameCodec::fixed(self.stream.width, self.stream.height),
        };
        let desync_policy = match self.stream.desync_policy {
            DesyncKind::Drop => DesyncPolicy::DropAndContinue,
            DesyncKind::Fatal => DesyncPolicy::Fatal,
        };

        PumpConfig {
            fps: self.stream.fps,
            codec,
            report_every: self.stream.report_every,
            desync_policy,
            ..PumpConfig::default()
        }
    }

    /// Datagram settings
    #[must_use]
    pub fn datagram_config(&self) -> DatagramConfig {
        let chunk_format = match self.datagram.chunk_format {
            ChunkFormatKind::V1 => ChunkFormat::V1,
            ChunkFormatKind::Legacy => ChunkFormat::Legacy,
        };
        let payload_format = match self.datagram.payload_format {
            PayloadKind::Framed => PayloadFormat::Framed,
            PayloadKind::Bare => PayloadFormat::Bare(self.stream.pixel_layout.pixel_layout()),
        };

        DatagramConfig {
            chunk_format,
            max_payload: self.datagram.max_payload,
            reassembly: ReassemblyConfig {
                timeout: Duration::from_millis(self.datagram.reassembly_timeout_ms),
                payload_format,
                max_frame_bytes: self.stream.max_frame_bytes,
                width: self.stream.width,
                height: self.stream.height,
            },
            ..DatagramConfig::default()
        }
    }
}

/// Validate host:port format
fn validate_host_port(addr: &str, name: &str) -> anyhow::Result<()> {
    let Some((host, port_str)) = addr.rsplit_once(':') else {
        anyhow::bail!(
            "{} '{}' missing port (expected format: host:port)",
            name,
            addr
        );
    };

    port_str
        .parse::<u16>()
        .map_err(|_| anyhow::anyhow!("{} '{}' has invalid port: {}", name, addr, port_str))?;

    if host.is_empty() {
        anyhow::bail!("{} '{}' has empty hostname", name, addr);
    }

    Ok(())
}
