//! Error types for node-dns.

use thiserror::Error;

/// Errors that can occur in the DNS server.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error (network, file, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Kubernetes client error
    #[error("Kubernetes client error: {0}")]
    Kube(#[from] kube::Error),

    /// DNS protocol error
    #[error("DNS protocol error: {0}")]
    Proto(#[from] hickory_proto::ProtoError),

    /// Upstream lookup for a name-kind node address failed
    #[error("upstream lookup failed: {0}")]
    Upstream(#[from] hickory_resolver::ResolveError),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The sync loop was started while already running
    #[error("sync controller already running")]
    AlreadyRunning,

    /// Shutdown was requested while a shutdown is already in progress
    #[error("shutdown already in progress")]
    ShutdownInProgress,
}
