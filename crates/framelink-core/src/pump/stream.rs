//! Stream (TCP) send and receive pumps.

use super::{
    DesyncPolicy, FrameSink, FrameSource, PumpConfig, PumpExit, PumpReport, Shutdown, SourceKind,
    StreamStats,
};
use crate::error::{CodecError, SessionError, SinkError, SourceError};
use crate::frame::Frame;
use crate::pacing::Pacer;
use crate::session::Session;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Paced frame sender over a streaming session
pub struct SendPump<Src, S = TcpStream> {
    session: Session<S>,
    source: Src,
    config: PumpConfig,
    shutdown: Shutdown,
    stats: StreamStats,
}

impl<Src, S> SendPump<Src, S>
where
    Src: FrameSource,
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Create a send pump for a session that has completed its handshake.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotStreaming` if the session is not streaming.
    pub fn new(
        session: Session<S>,
        source: Src,
        config: PumpConfig,
        shutdown: Shutdown,
    ) -> Result<Self, SessionError> {
        if !session.is_streaming() {
            return Err(SessionError::NotStreaming(session.state()));
        }
        let stats = StreamStats::new("Send", config.report_every);
        Ok(Self {
            session,
            source,
            config,
            shutdown,
            stats,
        })
    }

    /// Run until shutdown, peer loss or source failure, then clean up
    pub async fn run(mut self) -> PumpReport {
        tracing::info!(
            "Streaming to {:?} at {} fps ({:?})",
            self.session.peer_addr(),
            self.config.fps,
            self.config.codec
        );

        let exit = self.pump().await;

        self.source.close().await;
        self.session.close().await;
        self.stats.report(exit)
    }

    async fn pump(&mut self) -> PumpExit {
        let mut pacer = Pacer::new(self.config.fps);
        let mut rewound_empty = false;

        loop {
            if self.shutdown.is_triggered() {
                return PumpExit::Stopped;
            }
            pacer.begin();

            let next = tokio::select! {
                biased;
                () = self.shutdown.wait() => return PumpExit::Stopped,
                next = self.source.next_frame() => next,
            };

            let frame = match next {
                Ok(frame) => {
                    rewound_empty = false;
                    frame
                }
                Err(SourceError::Exhausted) => {
                    match self.on_exhausted(&mut rewound_empty).await {
                        Some(exit) => return exit,
                        None => continue,
                    }
                }
                Err(SourceError::Failed(e)) => {
                    tracing::error!("Frame source failed: {}", e);
                    return PumpExit::SourceFailed;
                }
            };

            if let Some(exit) = self.send_frame(&frame).await {
                return exit;
            }

            tokio::select! {
                biased;
                () = self.shutdown.wait() => return PumpExit::Stopped,
                _ = pacer.wait() => {}
            }
        }
    }

    /// Handle an exhausted source; `Some` ends the pump
    async fn on_exhausted(&mut self, rewound_empty: &mut bool) -> Option<PumpExit> {
        match self.source.kind() {
            SourceKind::File => {
                if *rewound_empty {
                    tracing::error!("Frame source is empty after rewinding");
                    return Some(PumpExit::SourceFailed);
                }
                if let Err(e) = self.source.rewind().await {
                    tracing::error!("Rewinding frame source failed: {}", e);
                    return Some(PumpExit::SourceFailed);
                }
                tracing::debug!("End of source, rewinding");
                *rewound_empty = true;
                None
            }
            SourceKind::Live => {
                tokio::select! {
                    biased;
                    () = self.shutdown.wait() => Some(PumpExit::Stopped),
                    () = tokio::time::sleep(self.config.idle_retry) => None,
                }
            }
        }
    }

    /// Encode and send one frame; `Some` ends the pump
    async fn send_frame(&mut self, frame: &Frame) -> Option<PumpExit> {
        let encoded = match self.config.codec.encode(frame) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::warn!("Dropping frame: {}", e);
                self.stats.record_drop();
                return None;
            }
        };

        let conn = match self.session.stream() {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!("Cannot send: {}", e);
                return Some(PumpExit::TransportLost);
            }
        };

        let sent = tokio::select! {
            biased;
            () = self.shutdown.wait() => return Some(PumpExit::Stopped),
            sent = conn.send_all(&encoded) => sent,
        };

        match sent {
            Ok(()) => {
                self.stats.record_frame(frame.payload().len());
                None
            }
            Err(e) if e.is_peer_gone() => {
                tracing::info!("Peer disconnected: {}", e);
                Some(PumpExit::PeerClosed)
            }
            Err(e) => {
                tracing::error!("Send failed: {}", e);
                Some(PumpExit::TransportLost)
            }
        }
    }
}

/// Frame receiver over a streaming session
pub struct ReceivePump<Snk, S = TcpStream> {
    session: Session<S>,
    sink: Snk,
    config: PumpConfig,
    shutdown: Shutdown,
    stats: StreamStats,
}

impl<Snk, S> ReceivePump<Snk, S>
where
    Snk: FrameSink,
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Create a receive pump for a session that has completed its handshake.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotStreaming` if the session is not streaming.
    pub fn new(
        session: Session<S>,
        sink: Snk,
        config: PumpConfig,
        shutdown: Shutdown,
    ) -> Result<Self, SessionError> {
        if !session.is_streaming() {
            return Err(SessionError::NotStreaming(session.state()));
        }
        let stats = StreamStats::new("Receive", config.report_every);
        Ok(Self {
            session,
            sink,
            config,
            shutdown,
            stats,
        })
    }

    /// Run until shutdown, peer close or sink close, then clean up
    pub async fn run(mut self) -> PumpReport {
        tracing::info!(
            "Receiving from {:?} ({:?})",
            self.session.peer_addr(),
            self.config.codec
        );

        let exit = self.pump().await;

        self.sink.close().await;
        self.session.close().await;
        self.stats.report(exit)
    }

    async fn pump(&mut self) -> PumpExit {
        loop {
            if self.shutdown.is_triggered() {
                return PumpExit::Stopped;
            }

            let conn = match self.session.stream() {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::error!("Cannot receive: {}", e);
                    return PumpExit::TransportLost;
                }
            };

            let decoded = tokio::select! {
                biased;
                () = self.shutdown.wait() => return PumpExit::Stopped,
                decoded = self.config.codec.decode(conn) => decoded,
            };

            let frame = match decoded {
                Ok(frame) => frame,
                Err(e) => match self.on_decode_error(e) {
                    Some(exit) => return exit,
                    None => continue,
                },
            };

            let len = frame.payload().len();
            let delivered = tokio::select! {
                biased;
                () = self.shutdown.wait() => return PumpExit::Stopped,
                delivered = self.sink.deliver(frame) => delivered,
            };

            match delivered {
                Ok(()) => self.stats.record_frame(len),
                Err(SinkError::Closed) => {
                    // The frame was consumed before the sink asked to stop
                    self.stats.record_frame(len);
                    tracing::info!("Frame sink closed");
                    return PumpExit::SinkClosed;
                }
                Err(SinkError::Failed(e)) => {
                    tracing::error!("Frame sink failed: {}", e);
                    return PumpExit::SinkClosed;
                }
            }
        }
    }

    /// Classify a decode failure; `Some` ends the pump
    fn on_decode_error(&mut self, err: CodecError) -> Option<PumpExit> {
        match err {
            e if e.is_clean_close() => {
                tracing::info!("Peer closed the stream");
                Some(PumpExit::PeerClosed)
            }
            CodecError::TruncatedStream { expected, received } => {
                tracing::warn!(
                    "Stream ended mid-frame ({} of {} bytes)",
                    received,
                    expected
                );
                Some(PumpExit::PeerClosed)
            }
            CodecError::FrameSizeMismatch { expected, actual } => match self.config.desync_policy
            {
                DesyncPolicy::DropAndContinue => {
                    tracing::warn!(
                        "Framing desync: expected {} bytes, got {}; dropping frame",
                        expected,
                        actual
                    );
                    self.stats.record_drop();
                    None
                }
                DesyncPolicy::Fatal => {
                    tracing::error!(
                        "Framing desync: expected {} bytes, got {}",
                        expected,
                        actual
                    );
                    Some(PumpExit::TransportLost)
                }
            },
            e if e.is_peer_gone() => {
                tracing::info!("Peer disconnected: {}", e);
                Some(PumpExit::PeerClosed)
            }
            e => {
                tracing::error!("Receive failed: {}", e);
                Some(PumpExit::TransportLost)
            }
        }
    }
}
