//! Command-line configuration.
//!
//! Flags are parsed once into a [`Cli`] and validated into an immutable
//! [`Settings`] value that is handed to the monitor.

use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use serde::Deserialize;

use warpgrid_health::{Mode, Network, ProbeConfig};

/// Environment variable mapping container-internal ports to the ports
/// reachable on the instance interface.
pub const PORT_MAPPINGS_ENV: &str = "CF_INSTANCE_PORTS";

#[derive(Debug, Parser)]
#[command(
    name = "healthcheck",
    about = "WarpGrid instance health probe",
    version
)]
pub struct Cli {
    /// Network type to dial with (tcp, tcp4)
    #[arg(long, default_value = "tcp", value_parser = parse_network)]
    pub network: Network,

    /// HTTP path to check. When empty, only a TCP connection is made.
    #[arg(long)]
    pub uri: Option<String>,

    /// Port to check
    #[arg(long, default_value = "8080")]
    pub port: String,

    /// Timeout for a single probe
    #[arg(long, default_value = "1s", value_parser = parse_duration)]
    pub timeout: Duration,

    /// Retry until the check passes, waiting this long between attempts (0 disables)
    #[arg(long, default_value = "0", value_parser = parse_duration)]
    pub startup_interval: Duration,

    /// Give up on startup checks after this long (0 retries forever)
    #[arg(long, default_value = "60s", value_parser = parse_duration)]
    pub startup_timeout: Duration,

    /// Check continuously until a check fails (0 disables)
    #[arg(long, default_value = "0", value_parser = parse_duration)]
    pub liveness_interval: Duration,

    /// Check continuously until a check fails, signalling readiness (0 disables)
    #[arg(long, default_value = "0", value_parser = parse_duration)]
    pub readiness_interval: Duration,
}

/// Validated configuration for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub probe: ProbeConfig,
    pub mode: Mode,
}

impl Cli {
    /// Validate flags, applying any port mapping from `port_mappings`.
    pub fn into_settings(self, port_mappings: Option<&str>) -> anyhow::Result<Settings> {
        if self.timeout.is_zero() {
            bail!("--timeout must be greater than zero");
        }

        let port = resolve_port(&self.port, port_mappings)?;
        let probe = ProbeConfig::new(
            self.network,
            self.uri.unwrap_or_default(),
            port,
            self.timeout,
        );
        let mode = Mode::from_intervals(
            self.startup_interval,
            self.startup_timeout,
            self.liveness_interval,
            self.readiness_interval,
        );

        Ok(Settings { probe, mode })
    }
}

#[derive(Debug, Deserialize)]
struct PortMapping {
    external: u16,
    internal: u16,
}

/// Map `port` through a JSON list of `{"external", "internal"}` pairs.
///
/// Ports with no matching `internal` entry are returned unchanged.
pub fn resolve_port(port: &str, mappings: Option<&str>) -> anyhow::Result<String> {
    let raw = match mappings.map(str::trim) {
        Some(raw) if !raw.is_empty() => raw,
        _ => return Ok(port.to_string()),
    };

    let mappings: Vec<PortMapping> = serde_json::from_str(raw)
        .with_context(|| format!("invalid {PORT_MAPPINGS_ENV} value"))?;

    let external = port
        .parse::<u16>()
        .ok()
        .and_then(|p| mappings.iter().find(|m| m.internal == p))
        .map(|m| m.external.to_string());

    Ok(external.unwrap_or_else(|| port.to_string()))
}

fn parse_network(s: &str) -> Result<Network, String> {
    match s {
        "tcp" | "tcp4" => Ok(Network::Tcp),
        other => Err(format!("unsupported network {other:?} (expected tcp or tcp4)")),
    }
}

/// Parse a duration string like "0", "500ms", "1s", "1m30s", "1.5h".
///
/// A bare number is taken as seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let is_number = |c: char| c.is_ascii_digit() || c == '.';
    let mut nanos = 0f64;
    let mut rest = s;

    while !rest.is_empty() {
        let num_end = rest
            .find(|c: char| !is_number(c))
            .ok_or_else(|| format!("missing unit in duration {s:?}"))?;
        if num_end == 0 {
            return Err(format!("invalid duration {s:?}"));
        }
        let value: f64 = rest[..num_end]
            .parse()
            .map_err(|_| format!("invalid duration {s:?}"))?;

        let unit_end = rest[num_end..]
            .find(is_number)
            .map_or(rest.len(), |i| num_end + i);
        let scale = match &rest[num_end..unit_end] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            unit => return Err(format!("unknown unit {unit:?} in duration {s:?}")),
        };

        nanos += value * scale;
        rest = &rest[unit_end..];
    }

    Ok(Duration::from_nanos(nanos.round() as u64))
}
