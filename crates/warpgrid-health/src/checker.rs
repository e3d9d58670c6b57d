//! Health check attempts.
//!
//! An attempt is one full "select interface, then probe" sequence. The
//! address is resolved on every attempt because interfaces can change
//! while a monitor is running.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ProbeError, ProbeOutcome};
use crate::interface::select_address;
use crate::probe::{probe, ProbeConfig};

/// Boxed future returned by a [`Check`].
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Something the monitor can attempt repeatedly.
pub trait Check: Send + Sync + 'static {
    /// Start one attempt. The future is spawned, so it must own its data.
    fn attempt(&self) -> BoxFuture<ProbeOutcome>;

    /// Failure to report when a deadline elapses before any attempt has
    /// produced a result.
    fn deadline_error(&self, waited: Duration) -> ProbeError;
}

/// Probes the first non-loopback IPv4 interface of this host.
#[derive(Debug, Clone)]
pub struct HealthCheck {
    config: Arc<ProbeConfig>,
}

impl HealthCheck {
    pub fn new(config: ProbeConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Select an address and probe it once.
    pub async fn check(&self) -> ProbeOutcome {
        let ip = select_address()?;
        probe(ip, &self.config).await
    }
}

impl Check for HealthCheck {
    fn attempt(&self) -> BoxFuture<ProbeOutcome> {
        let this = self.clone();
        Box::pin(async move { this.check().await })
    }

    fn deadline_error(&self, waited: Duration) -> ProbeError {
        if self.config.is_http() {
            ProbeError::RequestTimeout {
                uri: self.config.uri().to_string(),
                port: self.config.port().to_string(),
                timeout: waited,
            }
        } else {
            ProbeError::DialTimeout {
                addr: format!("port {}", self.config.port()),
                timeout: waited,
            }
        }
    }
}
