//! End-to-end tests against a scripted daemon on a Unix socket.

#![cfg(unix)]

use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use engine_client::archive::{PathStat, encode_path_stat};
use engine_client::models::{AttachParameters, LogsParameters};
use engine_client::mux::encode_frames;
use engine_client::{ClientConfig, EngineClient, Frame, StreamKind};

struct Daemon {
    _dir: tempfile::TempDir,
    socket: PathBuf,
}

impl Daemon {
    fn new() -> (Self, UnixListener) {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("engine.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        (Self { _dir: dir, socket }, listener)
    }

    fn client(&self) -> EngineClient {
        client_for(&self.socket)
    }
}

fn client_for(socket: &Path) -> EngineClient {
    let config = ClientConfig {
        host: format!("unix://{}", socket.display()),
        ..Default::default()
    };
    EngineClient::new(config).unwrap()
}

/// Read one request head. Nothing else is sent before the reply.
async fn read_head(sock: &mut UnixStream) -> String {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = sock.read(&mut buf).await.unwrap();
        assert!(n > 0, "client closed before sending a request");
        head.extend_from_slice(&buf[..n]);
    }
    String::from_utf8(head).unwrap()
}

fn json_reply(status: &str, body: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    )
    .into_bytes()
}

/// Answer a single request with a canned reply and hand back its head.
fn serve_once(listener: UnixListener, reply: Vec<u8>) -> JoinHandle<String> {
    tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let head = read_head(&mut sock).await;
        sock.write_all(&reply).await.unwrap();
        sock.flush().await.unwrap();
        // Keep the socket open until the client is done with it.
        let mut rest = Vec::new();
        let _ = sock.read_to_end(&mut rest).await;
        head
    })
}

#[tokio::test]
async fn attach_round_trip_over_unix_socket() {
    let (daemon, listener) = Daemon::new();

    let server = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let head = read_head(&mut sock).await;

        // Switch protocols and send output in the same write, so part of
        // the session arrives while the client is still parsing the head.
        let mut reply =
            b"HTTP/1.1 101 UPGRADED\r\nConnection: Upgrade\r\nUpgrade: tcp\r\n\r\n".to_vec();
        reply.extend_from_slice(&encode_frames(&[
            Frame::new(StreamKind::Stdout, "hello\n"),
            Frame::new(StreamKind::Stderr, "oops\n"),
        ]));
        sock.write_all(&reply).await.unwrap();

        let mut stdin = Vec::new();
        sock.read_to_end(&mut stdin).await.unwrap();

        let tail = encode_frames(&[Frame::new(StreamKind::Stdout, "bye")]);
        sock.write_all(&tail).await.unwrap();
        sock.shutdown().await.unwrap();
        (head, stdin)
    });

    let client = daemon.client();
    let cancel = CancellationToken::new();
    let stream = client
        .containers()
        .attach("web-1", false, &AttachParameters::interactive(), &cancel)
        .await
        .unwrap();
    assert!(stream.is_multiplexed());
    assert!(stream.can_close_write());

    stream.write_all(b"input").await.unwrap();
    stream.close_write().await.unwrap();
    let (stdout, stderr) = stream.read_output_to_end().await.unwrap();
    assert_eq!(stdout, "hello\nbye");
    assert_eq!(stderr, "oops\n");

    let (head, stdin) = server.await.unwrap();
    assert!(head.starts_with(
        "POST /containers/web-1/attach?stderr=true&stdin=true&stdout=true&stream=true HTTP/1.1"
    ));
    let lower = head.to_ascii_lowercase();
    assert!(lower.contains("upgrade: tcp"));
    assert!(lower.contains("host: localhost"));
    assert_eq!(stdin, b"input");
}

fn raw_stream_reply(body: &[u8]) -> Vec<u8> {
    let mut reply = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/vnd.docker.raw-stream\r\nContent-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    reply.extend_from_slice(body);
    reply
}

#[tokio::test]
async fn attach_without_upgrade_streams_output_only() {
    let (daemon, listener) = Daemon::new();
    let body = encode_frames(&[
        Frame::new(StreamKind::Stdout, "hello\n"),
        Frame::new(StreamKind::Stderr, "oops\n"),
    ]);
    let server = serve_once(listener, raw_stream_reply(&body));

    let params = AttachParameters {
        stream: Some(true),
        stdout: Some(true),
        stderr: Some(true),
        ..Default::default()
    };
    let stream = daemon
        .client()
        .containers()
        .attach("web-1", false, &params, &CancellationToken::new())
        .await
        .unwrap();
    assert!(!stream.can_close_write());
    assert!(stream.write_all(b"ignored").await.is_err());

    let (stdout, stderr) = stream.read_output_to_end().await.unwrap();
    assert_eq!(stdout, "hello\n");
    assert_eq!(stderr, "oops\n");
    stream.dispose();
    server.abort();
}

#[tokio::test]
async fn interactive_attach_without_upgrade_is_unsupported() {
    let (daemon, listener) = Daemon::new();
    let server = serve_once(listener, raw_stream_reply(b""));

    let err = daemon
        .client()
        .containers()
        .attach("web-1", false, &AttachParameters::interactive(), &CancellationToken::new())
        .await
        .err()
        .unwrap();
    assert_eq!(err.error_code(), "unsupported_transport");
    server.abort();
}

#[tokio::test]
async fn missing_container_maps_to_not_found() {
    let (daemon, listener) = Daemon::new();
    let server = serve_once(
        listener,
        json_reply("404 Not Found", r#"{"message":"No such container: ghost"}"#),
    );

    let err = daemon
        .client()
        .containers()
        .attach("ghost", false, &AttachParameters::interactive(), &CancellationToken::new())
        .await
        .err()
        .unwrap();
    assert!(err.is_not_found());
    assert!(err.to_string().contains("No such container: ghost"));
    server.abort();
}

#[tokio::test]
async fn other_errors_keep_status_and_message() {
    let (daemon, listener) = Daemon::new();
    let server = serve_once(
        listener,
        json_reply("409 Conflict", r#"{"message":"container is paused"}"#),
    );

    let err = daemon
        .client()
        .containers()
        .inspect("web-1", &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "api_error");
    assert!(err.to_string().contains("container is paused"));
    server.abort();
}

#[tokio::test]
async fn start_reports_already_running() {
    let (daemon, listener) = Daemon::new();
    let server = serve_once(
        listener,
        b"HTTP/1.1 304 Not Modified\r\n\r\n".to_vec(),
    );

    let started = daemon
        .client()
        .containers()
        .start("web-1", &CancellationToken::new())
        .await
        .unwrap();
    assert!(!started);
    server.abort();
}

#[tokio::test]
async fn logs_stream_splits_lines_per_channel() {
    let (daemon, listener) = Daemon::new();
    let body = encode_frames(&[
        Frame::new(StreamKind::Stdout, "2024-03-01T10:00:00Z first\n2024-03-01T10:00:01Z sec"),
        Frame::new(StreamKind::Stderr, "2024-03-01T10:00:02Z warn\n"),
        Frame::new(StreamKind::Stdout, "ond\n"),
    ]);
    let mut reply = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/vnd.docker.multiplexed-stream\r\nContent-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    reply.extend_from_slice(&body);
    let server = serve_once(listener, reply);

    let params = LogsParameters {
        stdout: Some(true),
        stderr: Some(true),
        timestamps: Some(true),
        ..Default::default()
    };
    let lines: Vec<_> = daemon
        .client()
        .containers()
        .logs_stream("web-1", &params, false, &CancellationToken::new())
        .await
        .unwrap()
        .map(|line| line.unwrap())
        .collect()
        .await;

    let texts: Vec<_> = lines.iter().map(|l| (l.stream, l.text.as_str())).collect();
    assert_eq!(
        texts,
        vec![
            (StreamKind::Stdout, "first"),
            (StreamKind::Stderr, "warn"),
            (StreamKind::Stdout, "second"),
        ]
    );
    assert_eq!(
        lines[0].timestamp,
        Some(DateTime::parse_from_rfc3339("2024-03-01T10:00:00Z").unwrap().with_timezone(&Utc))
    );

    let head = server.await.unwrap();
    assert!(head.starts_with(
        "GET /containers/web-1/logs?stderr=true&stdout=true&timestamps=true HTTP/1.1"
    ));
}

#[tokio::test]
async fn archive_stat_uses_head() {
    let (daemon, listener) = Daemon::new();
    let stat = PathStat {
        name: "hosts".into(),
        size: 174,
        mode: 0o644,
        mtime: DateTime::parse_from_rfc3339("2024-03-01T10:00:00+01:00").unwrap(),
        link_target: String::new(),
    };
    let reply = format!(
        "HTTP/1.1 200 OK\r\nX-Docker-Container-Path-Stat: {}\r\nContent-Length: 0\r\n\r\n",
        encode_path_stat(&stat).unwrap()
    );
    let server = serve_once(listener, reply.into_bytes());

    let archive = daemon
        .client()
        .containers()
        .get_archive("web-1", "/etc/hosts", true, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(archive.stat, stat);
    assert!(archive.body.is_none());

    let head = server.await.unwrap();
    assert!(head.starts_with("HEAD /containers/web-1/archive?path=%2Fetc%2Fhosts HTTP/1.1"));
}

#[tokio::test]
async fn archive_without_stat_header_is_protocol_violation() {
    let (daemon, listener) = Daemon::new();
    let server = serve_once(
        listener,
        b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\ntar".to_vec(),
    );

    let err = daemon
        .client()
        .containers()
        .get_archive("web-1", "/etc/hosts", false, &CancellationToken::new())
        .await
        .err()
        .unwrap();
    assert_eq!(err.error_code(), "protocol_violation");
    server.abort();
}

#[tokio::test]
async fn cancel_while_waiting_for_upgrade() {
    let (daemon, listener) = Daemon::new();
    // Accepts and reads the request but never answers.
    let server = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        read_head(&mut sock).await;
        let mut rest = Vec::new();
        let _ = sock.read_to_end(&mut rest).await;
        rest
    });

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = daemon
        .client()
        .containers()
        .attach("web-1", false, &AttachParameters::interactive(), &cancel)
        .await
        .err()
        .unwrap();
    assert!(err.is_cancelled());

    // The abandoned connection is closed, so the daemon sees EOF.
    let leftover = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap();
    assert!(leftover.is_empty());
}

#[tokio::test]
async fn missing_socket_is_transport_error() {
    let dir = tempfile::tempdir().unwrap();
    let client = client_for(&dir.path().join("absent.sock"));
    let err = client
        .containers()
        .inspect("web-1", &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "transport_failure");
}
