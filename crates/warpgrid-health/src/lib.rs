//! warpgrid-health — the health probe that runs beside every WarpGrid instance.
//!
//! Answers three questions for the orchestrator: did the instance come up
//! (startup), is it still alive (liveness), and can it still serve traffic
//! (readiness). Each attempt targets the first non-loopback IPv4 interface
//! and performs exactly one TCP connect or HTTP GET.
//!
//! # Architecture
//!
//! ```text
//! Monitor (per Mode)
//!   ├── spawns one attempt at a time → oneshot result
//!   │   └── HealthCheck
//!   │       ├── select_address() → Ipv4Addr
//!   │       └── probe() → tcp_probe | http_probe
//!   ├── race(attempt, startup deadline)
//!   └── TerminalResult { exit_code, message }
//! ```
//!
//! # Exit codes
//!
//! | Code | Failure |
//! |------|---------|
//! | 0    | passed |
//! | 1    | interfaces could not be enumerated |
//! | 3    | no non-loopback IPv4 interface |
//! | 4    | TCP connect failed |
//! | 5    | HTTP request failed |
//! | 6    | non-200 status, or request could not be built |
//! | 64   | TCP connect timed out |
//! | 65   | HTTP request timed out |
//! | 127  | internal error |

pub mod checker;
pub mod error;
pub mod interface;
pub mod monitor;
pub mod probe;

pub use checker::{BoxFuture, Check, HealthCheck};
pub use error::{FailureKind, ProbeError, ProbeOutcome};
pub use interface::{first_suitable, select_address};
pub use monitor::{race, Mode, Monitor, Raced, TerminalResult};
pub use probe::{http_probe, probe, tcp_probe, Network, ProbeConfig};
