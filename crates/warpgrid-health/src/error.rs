//! Probe failure taxonomy.
//!
//! Every failure the selector or prober can produce is one of these
//! variants. Each maps to a fixed process exit code that orchestrators
//! depend on, so the codes must never change.

use std::time::Duration;

use thiserror::Error;

/// Outcome of one probe or one attempt.
pub type ProbeOutcome = Result<(), ProbeError>;

/// Classification of a failed probe, independent of its detail message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    NoInterfaces,
    NoSuitableInterface,
    DialFailure,
    RequestFailure,
    HttpStatus,
    RequestConstruction,
    DialTimeout,
    RequestTimeout,
    Unknown,
}

impl FailureKind {
    /// Process exit code for this kind of failure.
    pub fn exit_code(self) -> u8 {
        match self {
            FailureKind::NoInterfaces => 1,
            FailureKind::NoSuitableInterface => 3,
            FailureKind::DialFailure => 4,
            FailureKind::RequestFailure => 5,
            FailureKind::HttpStatus | FailureKind::RequestConstruction => 6,
            FailureKind::DialTimeout => 64,
            FailureKind::RequestTimeout => 65,
            FailureKind::Unknown => 127,
        }
    }
}

/// A classified probe failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("failure to get interfaces: {0}")]
    NoInterfaces(String),

    #[error("failure to find suitable interface")]
    NoSuitableInterface,

    #[error("failure to make TCP connection: {addr}: {cause}")]
    DialFailure { addr: String, cause: String },

    #[error(
        "timeout when making TCP connection: {}: timed out after {:.2} seconds",
        .addr,
        .timeout.as_secs_f64()
    )]
    DialTimeout { addr: String, timeout: Duration },

    #[error("failure to make HTTP request to '{uri}' on port {port}: {cause}")]
    RequestFailure {
        uri: String,
        port: String,
        cause: String,
    },

    #[error(
        "timeout when making HTTP request to '{}' on port {}: timed out after {:.2} seconds",
        .uri,
        .port,
        .timeout.as_secs_f64()
    )]
    RequestTimeout {
        uri: String,
        port: String,
        timeout: Duration,
    },

    #[error("failure to get valid HTTP status code: {status} from '{uri}' on port {port} in {elapsed_ms}ms")]
    HttpStatus {
        status: u16,
        uri: String,
        port: String,
        elapsed_ms: u128,
    },

    #[error("failure to create an HTTP request to '{uri}' on port {port}: {cause}")]
    RequestConstruction {
        uri: String,
        port: String,
        cause: String,
    },

    #[error("internal error: {0}")]
    Unknown(String),
}

impl ProbeError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ProbeError::NoInterfaces(_) => FailureKind::NoInterfaces,
            ProbeError::NoSuitableInterface => FailureKind::NoSuitableInterface,
            ProbeError::DialFailure { .. } => FailureKind::DialFailure,
            ProbeError::DialTimeout { .. } => FailureKind::DialTimeout,
            ProbeError::RequestFailure { .. } => FailureKind::RequestFailure,
            ProbeError::RequestTimeout { .. } => FailureKind::RequestTimeout,
            ProbeError::HttpStatus { .. } => FailureKind::HttpStatus,
            ProbeError::RequestConstruction { .. } => FailureKind::RequestConstruction,
            ProbeError::Unknown(_) => FailureKind::Unknown,
        }
    }

    /// Shorthand for `self.kind().exit_code()`.
    pub fn exit_code(&self) -> u8 {
        self.kind().exit_code()
    }
}
