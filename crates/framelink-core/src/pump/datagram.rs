//! Datagram (UDP) send and receive pumps.

use super::{
    FrameSink, FrameSource, PumpConfig, PumpExit, PumpReport, Shutdown, SourceKind, StreamStats,
};
use crate::chunk::{ChunkDecoder, ChunkFormat, Chunker};
use crate::codec::encode_framed;
use crate::error::{SinkError, SourceError};
use crate::frame::Frame;
use crate::pacing::Pacer;
use crate::reassembly::{PayloadFormat, ReassemblyConfig, Reassembler};
use crate::MAX_CHUNK_PAYLOAD;
use bytes::Bytes;
use framelink_transport::{DatagramTransport, MAX_DATAGRAM_SIZE, TransportError, TransportResult};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;

/// Datagram protocol configuration
#[derive(Debug, Clone)]
pub struct DatagramConfig {
    /// Chunk header format
    pub chunk_format: ChunkFormat,
    /// Payload bytes per chunk
    pub max_payload: usize,
    /// Reassembly settings; its payload format also selects what the sender
    /// transmits
    pub reassembly: ReassemblyConfig,
    /// How often the receiver checks for stalled frames
    pub expiry_tick: Duration,
}

impl Default for DatagramConfig {
    fn default() -> Self {
        Self {
            chunk_format: ChunkFormat::default(),
            max_payload: MAX_CHUNK_PAYLOAD,
            reassembly: ReassemblyConfig::default(),
            expiry_tick: Duration::from_millis(250),
        }
    }
}

/// Paced frame sender over a datagram socket
pub struct DatagramSendPump<T, Src> {
    transport: T,
    peer: SocketAddr,
    source: Src,
    config: PumpConfig,
    datagram: DatagramConfig,
    chunker: Chunker,
    shutdown: Shutdown,
    stats: StreamStats,
    next_sequence: u32,
}

impl<T, Src> DatagramSendPump<T, Src>
where
    T: DatagramTransport,
    Src: FrameSource,
{
    /// Create a sender that transmits to `peer`
    #[must_use]
    pub fn new(
        transport: T,
        peer: SocketAddr,
        source: Src,
        config: PumpConfig,
        datagram: DatagramConfig,
        shutdown: Shutdown,
    ) -> Self {
        let stats = StreamStats::new("Send", config.report_every);
        let chunker = Chunker::new(datagram.max_payload);
        Self {
            transport,
            peer,
            source,
            config,
            datagram,
            chunker,
            shutdown,
            stats,
            next_sequence: 0,
        }
    }

    /// Run until shutdown or source failure, then clean up
    pub async fn run(mut self) -> PumpReport {
        tracing::info!(
            "Streaming datagrams to {} at {} fps ({:?}, {} byte chunks)",
            self.peer,
            self.config.fps,
            self.datagram.chunk_format,
            self.chunker.max_payload()
        );

        let exit = self.pump().await;

        self.source.close().await;
        if let Err(e) = self.transport.close().await {
            tracing::debug!("Closing datagram socket failed: {}", e);
        }
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
                Err(SourceError::Exhausted) => match self.source.kind() {
                    SourceKind::File => {
                        if rewound_empty {
                            tracing::error!("Frame source is empty after rewinding");
                            return PumpExit::SourceFailed;
                        }
                        if let Err(e) = self.source.rewind().await {
                            tracing::error!("Rewinding frame source failed: {}", e);
                            return PumpExit::SourceFailed;
                        }
                        rewound_empty = true;
                        continue;
                    }
                    SourceKind::Live => {
                        tokio::select! {
                            biased;
                            () = self.shutdown.wait() => return PumpExit::Stopped,
                            () = tokio::time::sleep(self.config.idle_retry) => continue,
                        }
                    }
                },
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

    /// Chunk and send one frame; `Some` ends the pump
    async fn send_frame(&mut self, frame: &Frame) -> Option<PumpExit> {
        let payload = match self.datagram.reassembly.payload_format {
            PayloadFormat::Framed => encode_framed(frame),
            PayloadFormat::Bare(_) => frame.payload().clone(),
        };

        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);

        let chunks = match self.chunker.split(sequence, &payload) {
            Ok(chunks) => chunks,
            Err(e) => {
                tracing::warn!("Dropping frame {}: {}", sequence, e);
                self.stats.record_drop();
                return None;
            }
        };

        for chunk in &chunks {
            let datagram = chunk.encode(self.datagram.chunk_format);
            let sent = tokio::select! {
                biased;
                () = self.shutdown.wait() => return Some(PumpExit::Stopped),
                sent = self.transport.send_to(&datagram, self.peer) => sent,
            };

            match sent {
                Ok(_) => {}
                Err(TransportError::Closed) => return Some(PumpExit::TransportLost),
                Err(e) => {
                    // Unreliable transport: give up on this frame only
                    tracing::warn!(
                        "Sending chunk {}/{} of frame {} failed: {}",
                        chunk.chunk_index + 1,
                        chunk.total_chunks,
                        sequence,
                        e
                    );
                    self.stats.record_drop();
                    return None;
                }
            }
        }

        tracing::trace!("Sent frame {} in {} chunks", sequence, chunks.len());
        self.stats.record_frame(frame.payload().len());
        None
    }
}

enum Event {
    Stop,
    Tick,
    Datagram(TransportResult<(usize, SocketAddr)>),
}

/// Frame receiver over a datagram socket
pub struct DatagramReceivePump<T, Snk> {
    transport: T,
    sink: Snk,
    decoder: ChunkDecoder,
    reassembler: Reassembler,
    datagram: DatagramConfig,
    shutdown: Shutdown,
    stats: StreamStats,
    malformed: u64,
}

impl<T, Snk> DatagramReceivePump<T, Snk>
where
    T: DatagramTransport,
    Snk: FrameSink,
{
    /// Create a receiver on a bound socket
    #[must_use]
    pub fn new(
        transport: T,
        sink: Snk,
        config: PumpConfig,
        datagram: DatagramConfig,
        shutdown: Shutdown,
    ) -> Self {
        let stats = StreamStats::new("Receive", config.report_every);
        Self {
            transport,
            sink,
            decoder: ChunkDecoder::new(datagram.chunk_format),
            reassembler: Reassembler::new(datagram.reassembly.clone()),
            datagram,
            shutdown,
            stats,
            malformed: 0,
        }
    }

    /// Run until shutdown or sink close, then clean up
    pub async fn run(mut self) -> PumpReport {
        match self.transport.local_addr() {
            Ok(addr) => tracing::info!(
                "Receiving datagrams on {} ({:?})",
                addr,
                self.datagram.chunk_format
            ),
            Err(e) => tracing::debug!("Local address unavailable: {}", e),
        }

        let exit = self.pump().await;

        self.sink.close().await;
        if let Err(e) = self.transport.close().await {
            tracing::debug!("Closing datagram socket failed: {}", e);
        }

        let reassembly = self.reassembler.stats();
        tracing::info!(
            "Reassembly: {} completed, {} superseded, {} expired, {} stale, {} duplicate, \
             {} inconsistent, {} oversized, {} undecodable, {} malformed datagrams",
            reassembly.completed,
            reassembly.superseded,
            reassembly.expired,
            reassembly.stale,
            reassembly.duplicate,
            reassembly.inconsistent,
            reassembly.oversized,
            reassembly.undecodable,
            self.malformed
        );
        self.stats.record_drops(reassembly.frames_lost());
        self.stats.report(exit)
    }

    async fn pump(&mut self) -> PumpExit {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let mut tick = tokio::time::interval(self.datagram.expiry_tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if self.shutdown.is_triggered() {
                return PumpExit::Stopped;
            }

            let event = tokio::select! {
                biased;
                () = self.shutdown.wait() => Event::Stop,
                _ = tick.tick() => Event::Tick,
                received = self.transport.recv_from(&mut buf) => Event::Datagram(received),
            };

            let (len, from) = match event {
                Event::Stop => return PumpExit::Stopped,
                Event::Tick => {
                    self.reassembler.expire_idle(Instant::now());
                    continue;
                }
                Event::Datagram(Ok(received)) => received,
                Event::Datagram(Err(TransportError::Closed)) => return PumpExit::TransportLost,
                Event::Datagram(Err(e)) => {
                    // ICMP errors from an earlier send surface here on some platforms
                    tracing::warn!("Datagram receive failed: {}", e);
                    continue;
                }
            };

            let chunk = match self.decoder.decode(Bytes::copy_from_slice(&buf[..len])) {
                Ok(chunk) => chunk,
                Err(e) => {
                    tracing::debug!("Dropping malformed datagram from {}: {}", from, e);
                    self.malformed += 1;
                    continue;
                }
            };

            let Some(frame) = self.reassembler.ingest(chunk) else {
                continue;
            };

            let frame_len = frame.payload().len();
            let delivered = tokio::select! {
                biased;
                () = self.shutdown.wait() => return PumpExit::Stopped,
                delivered = self.sink.deliver(frame) => delivered,
            };

            match delivered {
                Ok(()) => self.stats.record_frame(frame_len),
                Err(SinkError::Closed) => {
                    self.stats.record_frame(frame_len);
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelLayout;
    use crate::pump::testing::{CollectSink, VecSource, frames};
    use framelink_transport::{DatagramSocket, TransportConfig};
    use tokio::time::timeout;

    async fn socket() -> DatagramSocket {
        DatagramSocket::bind("127.0.0.1:0".parse().unwrap(), &TransportConfig::default())
            .await
            .unwrap()
    }

    fn unpaced() -> PumpConfig {
        PumpConfig {
            fps: 0.0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_framed_datagram_roundtrip() {
        let rx_socket = socket().await;
        let rx_addr = rx_socket.local_addr().unwrap();
        let sink = CollectSink::with_limit(3);

        // Paced so a small loopback buffer never overflows
        let send_config = PumpConfig {
            fps: 50.0,
            ..Default::default()
        };
        let datagram = DatagramConfig {
            max_payload: 10,
            ..Default::default()
        };

        let receiver = DatagramReceivePump::new(
            rx_socket,
            sink.clone(),
            unpaced(),
            datagram.clone(),
            Shutdown::never(),
        );
        let receiver = tokio::spawn(receiver.run());

        let (handle, shutdown) = Shutdown::channel();
        let source = VecSource::new(frames(3), SourceKind::Live);
        let sender =
            DatagramSendPump::new(socket().await, rx_addr, source, send_config, datagram, shutdown);
        let sender = tokio::spawn(sender.run());

        let recv_report = timeout(Duration::from_secs(5), receiver)
            .await
            .expect("receiver did not finish")
            .unwrap();
        handle.trigger();
        let send_report = sender.await.unwrap();

        assert_eq!(recv_report.exit, PumpExit::SinkClosed);
        assert_eq!(sink.received(), frames(3));
        assert_eq!(send_report.exit, PumpExit::Stopped);
        assert_eq!(send_report.frames, 3);
    }

    #[tokio::test]
    async fn test_legacy_bare_jpeg() {
        let rx_socket = socket().await;
        let rx_addr = rx_socket.local_addr().unwrap();
        let sink = CollectSink::with_limit(1);

        let datagram = DatagramConfig {
            chunk_format: ChunkFormat::Legacy,
            max_payload: 100,
            reassembly: ReassemblyConfig {
                payload_format: PayloadFormat::Bare(PixelLayout::EncodedJpeg),
                ..Default::default()
            },
            ..Default::default()
        };

        let receiver = tokio::spawn(
            DatagramReceivePump::new(
                rx_socket,
                sink.clone(),
                unpaced(),
                datagram.clone(),
                Shutdown::never(),
            )
            .run(),
        );

        let jpeg = Frame::encoded(0, 0, vec![0xD8u8; 350]).unwrap();
        let source = VecSource::new(vec![jpeg.clone()], SourceKind::Live).failing_when_empty();
        let send_report = DatagramSendPump::new(
            socket().await,
            rx_addr,
            source,
            unpaced(),
            datagram,
            Shutdown::never(),
        )
        .run()
        .await;
        assert_eq!(send_report.exit, PumpExit::SourceFailed);

        let recv_report = timeout(Duration::from_secs(5), receiver)
            .await
            .expect("receiver did not finish")
            .unwrap();
        assert_eq!(recv_report.exit, PumpExit::SinkClosed);
        assert_eq!(sink.received(), vec![jpeg]);
    }

    #[tokio::test]
    async fn test_malformed_datagrams_ignored() {
        let rx_socket = socket().await;
        let rx_addr = rx_socket.local_addr().unwrap();
        let sink = CollectSink::with_limit(1);

        let receiver = tokio::spawn(
            DatagramReceivePump::new(
                rx_socket,
                sink.clone(),
                unpaced(),
                DatagramConfig::default(),
                Shutdown::never(),
            )
            .run(),
        );

        let tx = socket().await;
        tx.send_to(&[1, 2, 3], rx_addr).await.unwrap();
        tx.send_to(&[0, 0, 0, 1, 0, 0, 0, 0], rx_addr).await.unwrap();

        let frame = frames(1).remove(0);
        let chunk = Chunker::default()
            .split(1, &encode_framed(&frame))
            .unwrap()
            .remove(0);
        tx.send_to(&chunk.encode(ChunkFormat::V1), rx_addr)
            .await
            .unwrap();

        let report = timeout(Duration::from_secs(5), receiver)
            .await
            .expect("receiver did not finish")
            .unwrap();
        assert_eq!(report.exit, PumpExit::SinkClosed);
        assert_eq!(sink.received(), vec![frame]);
    }

    #[tokio::test]
    async fn test_shutdown_stops_idle_receiver() {
        let (handle, shutdown) = Shutdown::channel();
        let sink = CollectSink::default();
        let pump = DatagramReceivePump::new(
            socket().await,
            sink.clone(),
            unpaced(),
            DatagramConfig::default(),
            shutdown,
        );
        let task = tokio::spawn(pump.run());

        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.trigger();

        let report = timeout(Duration::from_secs(1), task)
            .await
            .expect("pump ignored shutdown")
            .unwrap();
        assert_eq!(report.exit, PumpExit::Stopped);
        assert!(*sink.closed.lock().unwrap());
    }
}
