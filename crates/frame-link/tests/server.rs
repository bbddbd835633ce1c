use std::{
    io::{Cursor, Write},
    net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream},
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, unbounded};
use frame_link::{
    DisconnectReason, Frame, FrameLinkServer, LinkError, LinkStatus, ReadLimits, ServerConfig,
    StopSignal, write_record,
};
use image::{ImageFormat, Rgb, RgbImage};

fn jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb([30, 120, 220]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Jpeg).unwrap();
    out.into_inner()
}

fn loopback_config() -> ServerConfig {
    ServerConfig {
        bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
        read_poll: Duration::from_millis(20),
        accept_poll: Duration::from_millis(20),
        ..ServerConfig::default()
    }
}

struct Harness {
    server: FrameLinkServer,
    frames: Receiver<Frame>,
    status: Receiver<LinkStatus>,
}

fn start(config: ServerConfig) -> Harness {
    let (frame_tx, frames) = unbounded();
    let (status_tx, status) = unbounded();
    let server = FrameLinkServer::start(config, frame_tx, status_tx, StopSignal::new()).unwrap();
    Harness {
        server,
        frames,
        status,
    }
}

fn wait_for(status: &Receiver<LinkStatus>, pred: impl Fn(&LinkStatus) -> bool) -> LinkStatus {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match status.recv_timeout(remaining) {
            Ok(s) if pred(&s) => return s,
            Ok(_) => continue,
            Err(err) => panic!("status never arrived: {err}"),
        }
    }
}

#[test]
fn frames_arrive_in_order_and_undecodable_records_are_skipped() {
    let h = start(loopback_config());
    let mut camera = TcpStream::connect(h.server.local_addr()).unwrap();

    let mut wire = Vec::new();
    write_record(&mut wire, &jpeg(4, 4)).unwrap();
    write_record(&mut wire, b"corrupted jpeg bytes").unwrap();
    write_record(&mut wire, &jpeg(8, 6)).unwrap();
    for chunk in wire.chunks(7) {
        camera.write_all(chunk).unwrap();
    }
    camera.flush().unwrap();

    let first = h.frames.recv_timeout(Duration::from_secs(5)).unwrap();
    let second = h.frames.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!((first.width, first.height, first.sequence), (4, 4, 1));
    assert_eq!((second.width, second.height, second.sequence), (8, 6, 3));

    wait_for(&h.status, LinkStatus::is_connected);
    assert!(
        h.status
            .try_iter()
            .all(|s| !matches!(s, LinkStatus::Disconnected { .. })),
        "a bad frame must not end the session"
    );
    h.server.shutdown();
}

#[test]
fn truncated_payload_ends_session_without_emitting() {
    let h = start(loopback_config());
    let mut camera = TcpStream::connect(h.server.local_addr()).unwrap();
    camera.write_all(&[0x00, 0x00, 0x00, 0x05, 1, 2, 3]).unwrap();
    drop(camera);

    let status = wait_for(&h.status, |s| matches!(s, LinkStatus::Disconnected { .. }));
    match status {
        LinkStatus::Disconnected { reason, .. } => assert_eq!(
            reason,
            DisconnectReason::Truncated {
                expected: 5,
                received: 3
            }
        ),
        other => panic!("unexpected {other:?}"),
    }
    assert!(h.frames.try_recv().is_err());
    h.server.shutdown();
}

#[test]
fn short_header_is_a_clean_disconnect() {
    let h = start(loopback_config());
    let mut camera = TcpStream::connect(h.server.local_addr()).unwrap();
    camera.write_all(&[0x00, 0x00]).unwrap();
    drop(camera);

    match wait_for(&h.status, |s| matches!(s, LinkStatus::Disconnected { .. })) {
        LinkStatus::Disconnected { reason, .. } => assert_eq!(reason, DisconnectReason::Closed),
        other => panic!("unexpected {other:?}"),
    }
    assert!(h.frames.try_recv().is_err());
    h.server.shutdown();
}

#[test]
fn stalled_payload_times_out_and_server_keeps_listening() {
    let mut config = loopback_config();
    config.limits = ReadLimits {
        stall_timeout: Duration::from_millis(200),
        ..ReadLimits::default()
    };
    let h = start(config);

    let mut camera = TcpStream::connect(h.server.local_addr()).unwrap();
    camera.write_all(&[0, 0, 0, 10, 1, 2]).unwrap();

    match wait_for(&h.status, |s| matches!(s, LinkStatus::Disconnected { .. })) {
        LinkStatus::Disconnected { reason, .. } => assert_eq!(
            reason,
            DisconnectReason::Stalled {
                expected: 10,
                received: 2
            }
        ),
        other => panic!("unexpected {other:?}"),
    }
    wait_for(&h.status, |s| matches!(s, LinkStatus::Listening { .. }));

    let mut again = TcpStream::connect(h.server.local_addr()).unwrap();
    write_record(&mut again, &jpeg(2, 2)).unwrap();
    assert!(h.frames.recv_timeout(Duration::from_secs(5)).is_ok());
    h.server.shutdown();
}

#[test]
fn camera_can_reconnect_after_disconnect() {
    let h = start(loopback_config());

    for _ in 0..2 {
        let mut camera = TcpStream::connect(h.server.local_addr()).unwrap();
        write_record(&mut camera, &jpeg(3, 3)).unwrap();
        h.frames.recv_timeout(Duration::from_secs(5)).unwrap();
        drop(camera);
        wait_for(&h.status, |s| matches!(s, LinkStatus::Disconnected { .. }));
    }
    h.server.shutdown();
}

#[test]
fn stop_unblocks_idle_accept_promptly() {
    let mut config = loopback_config();
    config.accept_poll = Duration::from_secs(30);
    let h = start(config);
    wait_for(&h.status, |s| matches!(s, LinkStatus::Listening { .. }));
    thread::sleep(Duration::from_millis(50));

    let started = Instant::now();
    h.server.shutdown();
    assert!(started.elapsed() < Duration::from_secs(2));
    wait_for(&h.status, |s| *s == LinkStatus::Stopped);
}

#[test]
fn stop_from_another_thread_ends_an_idle_session() {
    let h = start(loopback_config());
    let _camera = TcpStream::connect(h.server.local_addr()).unwrap();
    wait_for(&h.status, LinkStatus::is_connected);

    let signal = h.server.stop_signal();
    let stopper = thread::spawn(move || signal.stop());
    stopper.join().unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    while !h.server.is_finished() {
        assert!(Instant::now() < deadline, "server did not stop");
        thread::sleep(Duration::from_millis(10));
    }
    match wait_for(&h.status, |s| matches!(s, LinkStatus::Disconnected { .. })) {
        LinkStatus::Disconnected { reason, .. } => assert_eq!(reason, DisconnectReason::Stopped),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn bind_conflict_is_a_startup_error() {
    let taken = TcpListener::bind("127.0.0.1:0").unwrap();
    let config = ServerConfig {
        bind_addr: taken.local_addr().unwrap(),
        ..ServerConfig::default()
    };
    let (frame_tx, _frames) = unbounded::<Frame>();
    let (status_tx, _status) = unbounded();
    let result = FrameLinkServer::start(config, frame_tx, status_tx, StopSignal::new());
    assert!(matches!(result, Err(LinkError::Bind { .. })));
}
