//! Crate-level error type.
//!
//! Per-packet failures inside the pipeline (spec §7) are handled locally and
//! never surface as a `Result` — this type only covers the small set of
//! startup-time operations that can fail: binding the UDP socket, creating
//! the TUN device, and loading configuration.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to bind UDP socket on {addr}: {source}")]
    SocketBind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create TUN device: {0}")]
    TunCreate(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
