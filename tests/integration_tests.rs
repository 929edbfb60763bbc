//! End-to-end tests over real loopback sockets.
//!
//! Each test wires a sending and a receiving side together the way the CLI
//! does: a TCP session with its start-token handshake feeding the stream
//! pumps, or a pair of UDP sockets feeding the datagram pumps.

use bytes::Bytes;
use framelink_core::handshake::{initiate, respond};
use framelink_core::{
    DatagramConfig, DatagramReceivePump, DatagramSendPump, Frame, FrameCodec, HandshakeConfig,
    HandshakeToken, PumpConfig, PumpExit, ReceivePump, SendPump, Session, SessionState, Shutdown,
    encode_framed,
};
use framelink_integration_tests::test_helpers::{
    ListSource, RecordingSink, TimingValidator, ci_timeout, rgb_frames,
};
use framelink_transport::{DatagramSocket, DatagramTransport, StreamListener, TransportConfig};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

fn unpaced() -> PumpConfig {
    PumpConfig {
        fps: 0.0,
        ..Default::default()
    }
}

async fn listen() -> (StreamListener, SocketAddr) {
    let listener = StreamListener::bind(loopback(), TransportConfig::default())
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

// ============================================================================
// TCP Stream Tests
// ============================================================================

/// Sender listens, receiver connects with a token, frames arrive intact.
#[tokio::test]
async fn test_tcp_framed_stream_with_handshake() {
    let (listener, addr) = listen().await;
    let handshake = HandshakeConfig {
        greeting: Some("FRAMELINK ready".to_string()),
        ack: Some("OK".to_string()),
        ..Default::default()
    };
    let frames = rgb_frames(16, 8, 10);

    let (stop, shutdown) = Shutdown::channel();
    let sender_handshake = handshake.clone();
    let sender_frames = frames.clone();
    let sender = tokio::spawn(async move {
        let mut session = Session::accept(listener).await.unwrap();
        let outcome = respond(&mut session, &sender_handshake).await.unwrap();
        assert_eq!(outcome.token.as_str(), "GO");

        SendPump::new(session, ListSource::live(sender_frames), unpaced(), shutdown)
            .unwrap()
            .run()
            .await
    });

    let mut session = Session::connect(addr, &TransportConfig::default())
        .await
        .unwrap();
    let token = HandshakeToken::new("GO").unwrap();
    let outcome = initiate(&mut session, &handshake, &token).await.unwrap();
    assert_eq!(outcome.greeting.as_deref(), Some("FRAMELINK ready"));
    assert_eq!(outcome.ack.as_deref(), Some("OK"));
    assert_eq!(session.state(), SessionState::Streaming);

    let sink = RecordingSink::with_limit(frames.len());
    let report = ReceivePump::new(session, sink.clone(), unpaced(), Shutdown::never())
        .unwrap()
        .run()
        .await;

    assert_eq!(report.exit, PumpExit::SinkClosed);
    assert_eq!(report.frames, 10);
    assert_eq!(report.dropped, 0);
    assert_eq!(sink.frames(), frames);

    stop.trigger();
    let sent = timeout(ci_timeout(Duration::from_secs(5)), sender)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sent.exit, PumpExit::Stopped);
    assert_eq!(sent.frames, 10);
}

/// Fixed-size raw frames loop from a file source without any header.
#[tokio::test]
async fn test_tcp_fixed_stream_loops_file_source() {
    let (listener, addr) = listen().await;
    let handshake = HandshakeConfig {
        enabled: false,
        ..Default::default()
    };
    let frames = rgb_frames(8, 6, 3);
    let config = PumpConfig {
        codec: FrameCodec::fixed(8, 6),
        ..unpaced()
    };

    let (stop, shutdown) = Shutdown::channel();
    let sender_config = config.clone();
    let sender_handshake = handshake.clone();
    let sender_frames = frames.clone();
    let sender = tokio::spawn(async move {
        let mut session = Session::accept(listener).await.unwrap();
        respond(&mut session, &sender_handshake).await.unwrap();
        SendPump::new(session, ListSource::looping(sender_frames), sender_config, shutdown)
            .unwrap()
            .run()
            .await
    });

    let mut session = Session::connect(addr, &TransportConfig::default())
        .await
        .unwrap();
    initiate(&mut session, &handshake, &HandshakeToken::default())
        .await
        .unwrap();

    let sink = RecordingSink::with_limit(9);
    let report = ReceivePump::new(session, sink.clone(), config, Shutdown::never())
        .unwrap()
        .run()
        .await;

    assert_eq!(report.exit, PumpExit::SinkClosed);
    let received = sink.frames();
    assert_eq!(received.len(), 9);
    for (i, frame) in received.iter().enumerate() {
        assert_eq!(frame, &frames[i % 3]);
    }

    stop.trigger();
    let sent = timeout(ci_timeout(Duration::from_secs(5)), sender)
        .await
        .unwrap()
        .unwrap();
    assert!(sent.exit.is_clean(), "unexpected exit {:?}", sent.exit);
    assert!(sent.frames >= 9);
}

/// A sender that stops closes its connection; the receiver sees a clean end.
#[tokio::test]
async fn test_sender_stop_ends_receiver_cleanly() {
    let (listener, addr) = listen().await;
    let handshake = HandshakeConfig::default();
    let frames = rgb_frames(4, 4, 5);

    let (stop, shutdown) = Shutdown::channel();
    let sender_frames = frames.clone();
    let sender = tokio::spawn(async move {
        let mut session = Session::connect(addr, &TransportConfig::default())
            .await
            .unwrap();
        initiate(&mut session, &HandshakeConfig::default(), &HandshakeToken::default())
            .await
            .unwrap();
        SendPump::new(session, ListSource::live(sender_frames), unpaced(), shutdown)
            .unwrap()
            .run()
            .await
    });

    // Roles are independent of direction: here the receiver listens
    let mut session = Session::accept(listener).await.unwrap();
    let outcome = respond(&mut session, &handshake).await.unwrap();
    assert_eq!(outcome.token.as_str(), "START");

    let sink = RecordingSink::default();
    let receiver = tokio::spawn({
        let sink = sink.clone();
        async move {
            ReceivePump::new(session, sink, unpaced(), Shutdown::never())
                .unwrap()
                .run()
                .await
        }
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    stop.trigger();

    let sent = sender.await.unwrap();
    let received = timeout(ci_timeout(Duration::from_secs(5)), receiver)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(sent.exit, PumpExit::Stopped);
    assert_eq!(received.exit, PumpExit::PeerClosed);
    assert_eq!(received.frames, 5);
    assert_eq!(sink.frames(), frames);
}

/// A frame sent in the same write as the token is the first one delivered.
#[tokio::test]
async fn test_frame_coalesced_with_token_is_delivered_first() {
    let (listener, addr) = listen().await;
    let frames = rgb_frames(6, 6, 2);

    let peer = tokio::spawn({
        let frames = frames.clone();
        async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            let mut burst = b"START\0".to_vec();
            burst.extend_from_slice(&encode_framed(&frames[0]));
            burst.extend_from_slice(&encode_framed(&frames[1]));
            stream.write_all(&burst).await.unwrap();
            stream.shutdown().await.unwrap();
        }
    });

    let mut session = Session::accept(listener).await.unwrap();
    let outcome = respond(&mut session, &HandshakeConfig::default())
        .await
        .unwrap();
    assert_eq!(outcome.token.as_str(), "START");

    let sink = RecordingSink::default();
    let report = ReceivePump::new(session, sink.clone(), unpaced(), Shutdown::never())
        .unwrap()
        .run()
        .await;
    peer.await.unwrap();

    assert_eq!(report.exit, PumpExit::PeerClosed);
    assert_eq!(sink.frames(), frames);
}

/// A peer that dies mid-frame ends the stream after the last whole frame.
#[tokio::test]
async fn test_truncated_stream_ends_receiver() {
    let (listener, addr) = listen().await;
    let frames = rgb_frames(10, 10, 2);

    let peer = tokio::spawn({
        let frames = frames.clone();
        async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(b"START\0").await.unwrap();
            stream.write_all(&encode_framed(&frames[0])).await.unwrap();
            let partial = encode_framed(&frames[1]);
            stream.write_all(&partial[..20]).await.unwrap();
            stream.shutdown().await.unwrap();
        }
    });

    let mut session = Session::accept(listener).await.unwrap();
    respond(&mut session, &HandshakeConfig::default())
        .await
        .unwrap();

    let sink = RecordingSink::default();
    let report = ReceivePump::new(session, sink.clone(), unpaced(), Shutdown::never())
        .unwrap()
        .run()
        .await;
    peer.await.unwrap();

    assert_eq!(report.exit, PumpExit::PeerClosed);
    assert_eq!(report.frames, 1);
    assert_eq!(sink.frames(), vec![frames[0].clone()]);
}

/// Shutdown interrupts a receiver blocked on a silent peer.
#[tokio::test]
async fn test_shutdown_stops_idle_receiver() {
    let (listener, addr) = listen().await;
    let silent = tokio::spawn(async move {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"START\0").await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        drop(stream);
    });

    let mut session = Session::accept(listener).await.unwrap();
    respond(&mut session, &HandshakeConfig::default())
        .await
        .unwrap();

    let (stop, shutdown) = Shutdown::channel();
    let receiver = tokio::spawn(async move {
        ReceivePump::new(session, RecordingSink::default(), unpaced(), shutdown)
            .unwrap()
            .run()
            .await
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    let start = Instant::now();
    stop.trigger();

    let report = timeout(ci_timeout(Duration::from_secs(2)), receiver)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.exit, PumpExit::Stopped);
    assert_eq!(report.frames, 0);
    assert!(start.elapsed() < ci_timeout(Duration::from_secs(1)));

    silent.abort();
}

// ============================================================================
// Handshake Timing Tests
// ============================================================================

/// A missing greeting delays the initiator by the greeting timeout only.
#[tokio::test]
async fn test_missing_greeting_is_bounded() {
    let (listener, addr) = listen().await;
    let responder = tokio::spawn(async move {
        let mut session = Session::accept(listener).await.unwrap();
        respond(&mut session, &HandshakeConfig::default())
            .await
            .unwrap()
    });

    let config = HandshakeConfig {
        greeting: Some("expected".to_string()),
        greeting_timeout: Duration::from_millis(200),
        ..Default::default()
    };
    let mut session = Session::connect(addr, &TransportConfig::default())
        .await
        .unwrap();

    let start = Instant::now();
    let outcome = initiate(&mut session, &config, &HandshakeToken::new("GO").unwrap())
        .await
        .unwrap();
    let elapsed = start.elapsed();

    assert_eq!(outcome.greeting, None);
    assert!(elapsed >= Duration::from_millis(190), "waited {elapsed:?}");
    assert!(elapsed < ci_timeout(Duration::from_secs(2)));
    assert!(session.is_streaming());

    let received = responder.await.unwrap();
    assert_eq!(received.token.as_str(), "GO");
}

/// The responder's token read is unbounded in time but bounded in length.
#[tokio::test]
async fn test_oversized_token_closes_session() {
    let (listener, addr) = listen().await;
    let peer = tokio::spawn(async move {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(&[b'A'; 1024]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
    });

    let mut session = Session::accept(listener).await.unwrap();
    let result = respond(&mut session, &HandshakeConfig::default()).await;

    assert!(result.is_err());
    assert!(session.is_closed());
    peer.await.unwrap();
}

// ============================================================================
// Pacing Tests
// ============================================================================

/// At 10 fps frames arrive about 100ms apart.
#[tokio::test]
async fn test_pacing_at_ten_fps() {
    let (listener, addr) = listen().await;
    let handshake = HandshakeConfig {
        enabled: false,
        ..Default::default()
    };
    let config = PumpConfig {
        fps: 10.0,
        ..Default::default()
    };

    let (stop, shutdown) = Shutdown::channel();
    let sender_handshake = handshake.clone();
    let sender = tokio::spawn(async move {
        let mut session = Session::accept(listener).await.unwrap();
        respond(&mut session, &sender_handshake).await.unwrap();
        SendPump::new(session, ListSource::looping(rgb_frames(4, 4, 1)), config, shutdown)
            .unwrap()
            .run()
            .await
    });

    let mut session = Session::connect(addr, &TransportConfig::default())
        .await
        .unwrap();
    initiate(&mut session, &handshake, &HandshakeToken::default())
        .await
        .unwrap();

    let sink = RecordingSink::with_limit(8);
    let report = ReceivePump::new(session, sink.clone(), unpaced(), Shutdown::never())
        .unwrap()
        .run()
        .await;
    assert_eq!(report.exit, PumpExit::SinkClosed);
    stop.trigger();
    sender.await.unwrap();

    let mut validator = TimingValidator::new(7);
    validator.extend(sink.arrival_gaps());
    validator.assert_within_tolerance(Duration::from_millis(100), 0.3);
}

// ============================================================================
// UDP Datagram Tests
// ============================================================================

/// Large encoded frames are chunked, sent and reassembled.
#[tokio::test]
async fn test_udp_chunked_frames_reassemble() {
    let receiver_socket = DatagramSocket::bind(loopback(), &TransportConfig::default())
        .await
        .unwrap();
    let receiver_addr = receiver_socket.local_addr().unwrap();
    let sender_socket = DatagramSocket::bind(loopback(), &TransportConfig::default())
        .await
        .unwrap();

    let frames: Vec<Frame> = (0..3u8)
        .map(|i| Frame::encoded(640, 480, Bytes::from(vec![i; 40_000])).unwrap())
        .collect();
    let datagram = DatagramConfig {
        max_payload: 8_000,
        ..Default::default()
    };
    let config = PumpConfig {
        fps: 50.0,
        ..Default::default()
    };

    let (stop, shutdown) = Shutdown::channel();
    let sender = tokio::spawn({
        let frames = frames.clone();
        let datagram = datagram.clone();
        let config = config.clone();
        async move {
            DatagramSendPump::new(
                sender_socket,
                receiver_addr,
                ListSource::looping(frames),
                config,
                datagram,
                shutdown,
            )
            .run()
            .await
        }
    });

    let sink = RecordingSink::with_limit(6);
    let report = timeout(
        ci_timeout(Duration::from_secs(10)),
        DatagramReceivePump::new(
            receiver_socket,
            sink.clone(),
            config,
            datagram,
            Shutdown::never(),
        )
        .run(),
    )
    .await
    .unwrap();

    assert_eq!(report.exit, PumpExit::SinkClosed);
    for frame in sink.frames() {
        assert!(frames.contains(&frame), "unexpected frame {frame:?}");
    }

    stop.trigger();
    let sent = sender.await.unwrap();
    assert_eq!(sent.exit, PumpExit::Stopped);
    assert!(sent.frames >= 6);
}

/// Garbage datagrams between real ones do not disturb reassembly.
#[tokio::test]
async fn test_udp_ignores_garbage_datagrams() {
    let receiver_socket = DatagramSocket::bind(loopback(), &TransportConfig::default())
        .await
        .unwrap();
    let receiver_addr = receiver_socket.local_addr().unwrap();
    let noise = DatagramSocket::bind(loopback(), &TransportConfig::default())
        .await
        .unwrap();

    let sink = RecordingSink::with_limit(1);
    let receiver = tokio::spawn({
        let sink = sink.clone();
        async move {
            DatagramReceivePump::new(
                receiver_socket,
                sink,
                unpaced(),
                DatagramConfig::default(),
                Shutdown::never(),
            )
            .run()
            .await
        }
    });

    let frame = rgb_frames(4, 4, 1).remove(0);
    let chunks = framelink_core::Chunker::new(20)
        .split(9, &encode_framed(&frame))
        .unwrap();

    noise.send_to(&[0xFF; 3], receiver_addr).await.unwrap();
    for chunk in &chunks {
        let datagram = chunk.encode(framelink_core::ChunkFormat::V1);
        noise.send_to(&datagram, receiver_addr).await.unwrap();
        noise.send_to(&[0, 0, 0, 1, 0, 0, 0, 0], receiver_addr).await.unwrap();
    }

    let report = timeout(ci_timeout(Duration::from_secs(5)), receiver)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.exit, PumpExit::SinkClosed);
    assert_eq!(sink.frames(), vec![frame]);
}
