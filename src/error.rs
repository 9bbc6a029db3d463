use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TunserveError {
    #[error("Invalid port '{0}': expected an integer between 1 and 65535")]
    InvalidPort(String),

    #[error("Path not found: {}", .0.display())]
    PathNotFound(PathBuf),

    #[error("Unknown tunnel provider '{id}'. Supported: {known}")]
    UnknownProvider { id: String, known: String },

    #[error(
        "Tunnel provider '{provider}' does not support custom subdomains. \
         Providers that do: {supported}"
    )]
    SubdomainUnsupported { provider: String, supported: String },

    #[error(
        "Invalid subdomain '{0}': use 4-63 characters of a-z, 0-9 and '-', \
         not starting or ending with '-'"
    )]
    InvalidSubdomain(String),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to start '{program}' (is it installed?): {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Tunnel server rejected the request: {0}")]
    TunnelRejected(String),

    #[error("Tunnel API request failed: {0}")]
    TunnelApi(#[from] reqwest::Error),

    #[error("Lost connection to tunnel server {host}:{port}: {source}")]
    TunnelConnection {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TunserveError>;
