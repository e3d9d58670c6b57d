//! Single-shot probes.
//!
//! A probe performs exactly one TCP connect or one HTTP GET against a
//! resolved IPv4 address and classifies the result. Retrying is the
//! monitor's job, never the probe's.

use std::io;
use std::net::Ipv4Addr;
use std::time::Duration;

use bytes::Bytes;
use http::header::{HOST, USER_AGENT};
use http::{Method, Request, StatusCode, Uri};
use http_body_util::{BodyExt, Empty};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{ProbeError, ProbeOutcome};

const USER_AGENT_VALUE: &str = "warpgrid-healthcheck";

/// Network kind used to dial the target.
///
/// The target is always an IPv4 interface address, so `tcp` and `tcp4`
/// dial identically and both map to [`Network::Tcp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Network {
    #[default]
    Tcp,
}

impl Network {
    pub fn as_str(self) -> &'static str {
        match self {
            Network::Tcp => "tcp",
        }
    }
}

/// What to probe and how long a single probe may take.
///
/// An empty `uri` selects a plain TCP connect; anything else selects an
/// HTTP GET of that path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeConfig {
    network: Network,
    uri: String,
    port: String,
    timeout: Duration,
}

impl ProbeConfig {
    pub fn new(
        network: Network,
        uri: impl Into<String>,
        port: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            network,
            uri: uri.into(),
            port: port.into(),
            timeout,
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether this config selects the HTTP probe.
    pub fn is_http(&self) -> bool {
        !self.uri.is_empty()
    }
}

/// Probe `ip` once, using TCP or HTTP depending on the config.
pub async fn probe(ip: Ipv4Addr, config: &ProbeConfig) -> ProbeOutcome {
    if config.is_http() {
        http_probe(ip, config).await
    } else {
        tcp_probe(ip, config).await
    }
}

/// Open a TCP connection to `ip:port` and close it immediately.
pub async fn tcp_probe(ip: Ipv4Addr, config: &ProbeConfig) -> ProbeOutcome {
    let addr = format!("{ip}:{}", config.port);

    match tokio::time::timeout(config.timeout, TcpStream::connect(addr.as_str())).await {
        Ok(Ok(stream)) => {
            drop(stream);
            debug!(%addr, network = config.network.as_str(), "tcp probe connected");
            Ok(())
        }
        Ok(Err(e)) if e.kind() == io::ErrorKind::TimedOut => Err(ProbeError::DialTimeout {
            addr,
            timeout: config.timeout,
        }),
        Ok(Err(e)) => {
            debug!(%addr, error = %e, "tcp probe failed");
            Err(ProbeError::DialFailure {
                addr,
                cause: e.to_string(),
            })
        }
        Err(_) => {
            debug!(%addr, "tcp probe timed out");
            Err(ProbeError::DialTimeout {
                addr,
                timeout: config.timeout,
            })
        }
    }
}

/// Issue one `GET http://ip:port/uri` and require a 200.
///
/// The timeout covers the whole exchange, including draining the body.
pub async fn http_probe(ip: Ipv4Addr, config: &ProbeConfig) -> ProbeOutcome {
    let authority = format!("{ip}:{}", config.port);
    let path = if config.uri.starts_with('/') {
        config.uri.clone()
    } else {
        format!("/{}", config.uri)
    };
    let target = format!("http://{authority}{path}");

    let request = build_request(&target, &authority).map_err(|e| {
        ProbeError::RequestConstruction {
            uri: config.uri.clone(),
            port: config.port.clone(),
            cause: e.to_string(),
        }
    })?;

    let started = Instant::now();
    let result = tokio::time::timeout(config.timeout, round_trip(&authority, request)).await;
    let elapsed = started.elapsed();

    match result {
        Ok(Ok(status)) if status == StatusCode::OK => {
            debug!(%target, elapsed_ms = elapsed.as_millis(), "http probe passed");
            Ok(())
        }
        Ok(Ok(status)) => {
            debug!(%target, %status, "http probe got non-200");
            Err(ProbeError::HttpStatus {
                status: status.as_u16(),
                uri: config.uri.clone(),
                port: config.port.clone(),
                elapsed_ms: elapsed.as_millis(),
            })
        }
        Ok(Err(e)) if e.is_timeout() => Err(ProbeError::RequestTimeout {
            uri: config.uri.clone(),
            port: config.port.clone(),
            timeout: config.timeout,
        }),
        Ok(Err(e)) => {
            debug!(%target, error = %e, "http probe request failed");
            Err(ProbeError::RequestFailure {
                uri: config.uri.clone(),
                port: config.port.clone(),
                cause: e.to_string(),
            })
        }
        Err(_) => {
            debug!(%target, "http probe timed out");
            Err(ProbeError::RequestTimeout {
                uri: config.uri.clone(),
                port: config.port.clone(),
                timeout: config.timeout,
            })
        }
    }
}

/// Transport-level failures of an HTTP exchange.
#[derive(Debug, Error)]
enum RoundTripError {
    #[error("{0}")]
    Connect(#[from] io::Error),

    #[error("{0}")]
    Http(#[from] hyper::Error),
}

impl RoundTripError {
    fn is_timeout(&self) -> bool {
        match self {
            RoundTripError::Connect(e) => e.kind() == io::ErrorKind::TimedOut,
            RoundTripError::Http(e) => e.is_timeout(),
        }
    }
}

fn build_request(target: &str, authority: &str) -> Result<Request<Empty<Bytes>>, http::Error> {
    let uri: Uri = target.parse()?;
    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    Request::builder()
        .method(Method::GET)
        .uri(path)
        .header(HOST, authority)
        .header(USER_AGENT, USER_AGENT_VALUE)
        .header("x-forwarded-proto", "https")
        .body(Empty::<Bytes>::new())
}

async fn round_trip(
    authority: &str,
    request: Request<Empty<Bytes>>,
) -> Result<StatusCode, RoundTripError> {
    let stream = TcpStream::connect(authority).await?;
    let io = hyper_util::rt::TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!(error = %e, "probe connection closed with error");
        }
    });

    let response = sender.send_request(request).await?;
    let status = response.status();

    // Read the body to completion so the server sees a finished exchange
    // rather than an aborted one.
    response.into_body().collect().await?;

    Ok(status)
}
