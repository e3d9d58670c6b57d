//! Probe integration tests against real loopback listeners.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use warpgrid_health::*;

const LOOPBACK: Ipv4Addr = Ipv4Addr::LOCALHOST;

fn tcp_config(port: u16) -> ProbeConfig {
    ProbeConfig::new(Network::Tcp, "", port.to_string(), Duration::from_millis(100))
}

fn http_config(port: u16) -> ProbeConfig {
    ProbeConfig::new(
        Network::Tcp,
        "/api/_ping",
        port.to_string(),
        Duration::from_millis(100),
    )
}

/// A port nothing listens on.
async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Serve `status_line` to every request; returns the port and the raw
/// request heads received so far (lowercased).
async fn responder(status_line: &'static str) -> (u16, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let requests = seen.clone();

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => head.extend_from_slice(&buf[..n]),
                }
            }
            requests
                .lock()
                .unwrap()
                .push(String::from_utf8_lossy(&head).to_lowercase());

            let body = "probe body";
            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
        }
    });

    (port, seen)
}

/// Accepts connections but never answers.
async fn silent_server() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    port
}

/// A listener whose accept queue is full, so further connects stall.
///
/// Linux drops SYNs once the queue of a never-accepting listener is full.
/// Returns the port plus the connections (and listener) that must stay open.
#[cfg(target_os = "linux")]
async fn stalled_listener() -> (u16, TcpListener, Vec<TcpStream>) {
    let socket = TcpSocket::new_v4().unwrap();
    socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let listener = socket.listen(1).unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut queued = Vec::new();
    for _ in 0..16 {
        let connect = TcpStream::connect(("127.0.0.1", port));
        match tokio::time::timeout(Duration::from_millis(200), connect).await {
            Ok(Ok(stream)) => queued.push(stream),
            Ok(Err(e)) => panic!("filling accept queue failed: {e}"),
            Err(_) => return (port, listener, queued),
        }
    }
    panic!("accept queue never filled");
}

/// Serve a 200 with a body far larger than the socket buffers and record
/// whether the whole body was written.
async fn bulk_responder(body_len: usize) -> (u16, Arc<AtomicBool>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let sent = Arc::new(AtomicBool::new(false));
    let done = sent.clone();

    tokio::spawn(async move {
        let Ok((mut stream, _)) = listener.accept().await else {
            return;
        };
        let mut head = Vec::new();
        let mut buf = [0u8; 1024];
        while !head.windows(4).any(|w| w == b"\r\n\r\n") {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => head.extend_from_slice(&buf[..n]),
            }
        }

        // Keep-alive: the server never closes, so only a reader that consumes
        // the full content-length lets the writes finish.
        let head = format!("HTTP/1.1 200 OK\r\ncontent-length: {body_len}\r\n\r\n");
        if stream.write_all(head.as_bytes()).await.is_err() {
            return;
        }
        let chunk = vec![b'x'; 64 * 1024];
        let mut remaining = body_len;
        while remaining > 0 {
            let n = remaining.min(chunk.len());
            if stream.write_all(&chunk[..n]).await.is_err() {
                return;
            }
            remaining -= n;
        }
        done.store(true, Ordering::SeqCst);

        // Hold the connection open until the client goes away.
        let _ = stream.read(&mut buf).await;
    });

    (port, sent)
}

#[tokio::test]
async fn tcp_probe_passes_when_listening() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let outcome = probe(LOOPBACK, &tcp_config(port)).await;
    assert_eq!(outcome, Ok(()));
    assert!(TerminalResult::from(outcome).message.contains("healthcheck passed"));
}

#[tokio::test]
async fn tcp_probe_fails_when_stopped() {
    let port = closed_port().await;

    let err = probe(LOOPBACK, &tcp_config(port)).await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::DialFailure);
    assert_eq!(err.exit_code(), 4);

    let result = TerminalResult::failed(&err);
    assert!(result.message.contains("failure to make TCP connection"));
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn tcp_probe_times_out_when_connect_stalls() {
    let (port, _listener, _queued) = stalled_listener().await;

    let err = probe(LOOPBACK, &tcp_config(port)).await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::DialTimeout);
    assert_eq!(err.exit_code(), 64);
    assert!(err.to_string().contains("timed out after 0.10 seconds"));
}

#[tokio::test]
async fn tcp_probe_is_repeatable() {
    let port = closed_port().await;
    let first = probe(LOOPBACK, &tcp_config(port)).await.unwrap_err();
    let second = probe(LOOPBACK, &tcp_config(port)).await.unwrap_err();
    assert_eq!(first.kind(), second.kind());
    assert_eq!(first.exit_code(), second.exit_code());
}

#[tokio::test]
async fn http_probe_passes_on_200() {
    let (port, seen) = responder("200 OK").await;

    let outcome = probe(LOOPBACK, &http_config(port)).await;
    assert_eq!(outcome, Ok(()));

    let requests = seen.lock().unwrap();
    assert_eq!(requests.len(), 1);
    let head = &requests[0];
    assert!(head.starts_with("get /api/_ping http/1.1\r\n"));
    assert!(head.contains("x-forwarded-proto: https"));
    assert!(head.contains("user-agent: warpgrid-healthcheck"));
    assert!(head.contains(&format!("host: 127.0.0.1:{port}")));
}

#[tokio::test]
async fn http_probe_reads_whole_body() {
    const BODY_LEN: usize = 32 * 1024 * 1024;
    let (port, sent) = bulk_responder(BODY_LEN).await;

    let config = ProbeConfig::new(
        Network::Tcp,
        "/api/_ping",
        port.to_string(),
        Duration::from_secs(10),
    );
    let outcome = probe(LOOPBACK, &config).await;
    assert_eq!(outcome, Ok(()));

    // Every byte was consumed, so the server's final write has returned.
    tokio::time::timeout(Duration::from_secs(2), async {
        while !sent.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("server never finished writing the body");
}

#[tokio::test]
async fn http_probe_reports_error_status() {
    let (port, _) = responder("500 Internal Server Error").await;

    let err = probe(LOOPBACK, &http_config(port)).await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::HttpStatus);
    assert_eq!(err.exit_code(), 6);

    let result = TerminalResult::failed(&err);
    assert!(result
        .message
        .contains("failure to get valid HTTP status code: 500"));
}

#[tokio::test]
async fn http_probe_treats_other_2xx_as_failure() {
    let (port, _) = responder("204 No Content").await;

    let err = probe(LOOPBACK, &http_config(port)).await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::HttpStatus);
    assert!(err.to_string().contains("204"));
}

#[tokio::test]
async fn http_probe_reports_refused_connection() {
    let port = closed_port().await;

    let err = probe(LOOPBACK, &http_config(port)).await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::RequestFailure);
    assert_eq!(err.exit_code(), 5);
    assert!(err.to_string().contains("failure to make HTTP request"));
}

#[tokio::test]
async fn http_probe_times_out_on_silent_server() {
    let port = silent_server().await;

    let err = probe(LOOPBACK, &http_config(port)).await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::RequestTimeout);
    assert_eq!(err.exit_code(), 65);
    assert!(err.to_string().contains("timed out after 0.10 seconds"));
}

#[tokio::test]
async fn monitor_startup_against_real_listener() {
    let (port, seen) = responder("200 OK").await;

    // Drives the real probe through the monitor; the address is fixed to
    // loopback so the test does not depend on host interfaces.
    struct Loopback(ProbeConfig);

    impl Check for Loopback {
        fn attempt(&self) -> BoxFuture<ProbeOutcome> {
            let config = self.0.clone();
            Box::pin(async move { probe(LOOPBACK, &config).await })
        }

        fn deadline_error(&self, waited: Duration) -> ProbeError {
            ProbeError::Unknown(format!("no result after {waited:?}"))
        }
    }

    let (_tx, rx) = tokio::sync::watch::channel(false);
    let mode = Mode::Startup {
        interval: Duration::from_millis(50),
        timeout: Some(Duration::from_secs(5)),
    };
    let result = Monitor::new(Loopback(http_config(port)), mode).run(rx).await;

    assert_eq!(result, TerminalResult::passed());
    assert_eq!(seen.lock().unwrap().len(), 1);
}
