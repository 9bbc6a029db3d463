//! Client for the localtunnel service.
//!
//! A tunnel is opened in two steps:
//! 1. `GET {host}/?new` (or `GET {host}/{subdomain}`) assigns a public URL
//!    and a remote TCP port.
//! 2. The client keeps `max_conn_count` sockets open to that port. The
//!    server hands each public request to one of them, and the client
//!    splices it onto the local server.
//!
//! The pool runs until a socket to the tunnel server can no longer be
//! opened, which is how a dead tunnel shows up.

use serde::Deserialize;
use std::time::Duration;
use tokio::io::copy_bidirectional;
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Result, TunserveError};

/// Delay before retrying a local connection that was refused.
const LOCAL_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Tunnel assignment returned by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub id: String,
    pub url: String,
    pub remote_host: String,
    pub remote_port: u16,
    pub max_conn_count: usize,
    pub cached_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AssignResponse {
    id: Option<String>,
    url: Option<String>,
    port: Option<u16>,
    max_conn_count: Option<usize>,
    cached_url: Option<String>,
    message: Option<String>,
}

/// Build the assignment endpoint for an optional subdomain.
pub fn assignment_url(host: &Url, subdomain: Option<&str>) -> Url {
    let mut url = host.clone();
    match subdomain {
        Some(name) => {
            url.set_path(name);
            url.set_query(None);
        }
        None => {
            url.set_path("/");
            url.set_query(Some("new"));
        }
    }
    url
}

fn parse_assignment(host: &Url, body: &str) -> Result<Assignment> {
    let resp: AssignResponse = serde_json::from_str(body)
        .map_err(|e| TunserveError::TunnelRejected(format!("unreadable response: {}", e)))?;

    if let Some(message) = resp.message {
        return Err(TunserveError::TunnelRejected(message));
    }

    let (Some(id), Some(url), Some(remote_port)) = (resp.id, resp.url, resp.port) else {
        return Err(TunserveError::TunnelRejected(
            "response is missing id, url or port".to_string(),
        ));
    };

    let remote_host = host
        .host_str()
        .ok_or_else(|| TunserveError::Config(format!("localtunnel host has no hostname: {}", host)))?
        .to_string();

    Ok(Assignment {
        id,
        url,
        remote_host,
        remote_port,
        max_conn_count: resp.max_conn_count.unwrap_or(1).max(1),
        cached_url: resp.cached_url,
    })
}

/// Ask the localtunnel server for a new tunnel.
pub async fn request_assignment(host: &Url, subdomain: Option<&str>) -> Result<Assignment> {
    let endpoint = assignment_url(host, subdomain);
    info!("Requesting tunnel from {}", endpoint);

    let resp = reqwest::Client::new().get(endpoint).send().await?;
    let status = resp.status();
    let body = resp.text().await?;

    match parse_assignment(host, &body) {
        Ok(assignment) if status.is_success() => Ok(assignment),
        Ok(_) => Err(TunserveError::TunnelRejected(format!("HTTP {}", status))),
        Err(TunserveError::TunnelRejected(msg)) if !status.is_success() => {
            Err(TunserveError::TunnelRejected(format!("HTTP {} - {}", status, msg)))
        }
        Err(e) => Err(e),
    }
}

/// Keep the tunnel's socket pool alive until cancelled or until the
/// tunnel server stops accepting connections.
pub async fn run_pool(
    assignment: Assignment,
    local_port: u16,
    cancel: CancellationToken,
) -> Result<()> {
    let mut workers = JoinSet::new();
    for slot in 0..assignment.max_conn_count {
        let host = assignment.remote_host.clone();
        let port = assignment.remote_port;
        workers.spawn(async move { bridge_loop(slot, host, port, local_port).await });
    }

    let result = tokio::select! {
        _ = cancel.cancelled() => {
            debug!("Tunnel pool cancelled");
            Ok(())
        }
        joined = workers.join_next() => match joined {
            Some(Ok(result)) => result,
            Some(Err(e)) => {
                warn!("Tunnel worker ended unexpectedly: {}", e);
                Ok(())
            }
            None => Ok(()),
        },
    };

    workers.abort_all();
    result
}

/// One pool slot: open a socket to the tunnel server, splice it onto the
/// local server, repeat.
async fn bridge_loop(slot: usize, host: String, port: u16, local_port: u16) -> Result<()> {
    loop {
        let mut remote = TcpStream::connect((host.as_str(), port))
            .await
            .map_err(|source| TunserveError::TunnelConnection {
                host: host.clone(),
                port,
                source,
            })?;
        debug!("Slot {} connected to {}:{}", slot, host, port);

        match TcpStream::connect(("127.0.0.1", local_port)).await {
            Ok(mut local) => match copy_bidirectional(&mut remote, &mut local).await {
                Ok((up, down)) => debug!("Slot {} closed ({} bytes up, {} down)", slot, up, down),
                Err(e) => debug!("Slot {} closed with error: {}", slot, e),
            },
            Err(e) => {
                warn!("Local server unreachable on port {}: {}", local_port, e);
                tokio::time::sleep(LOCAL_RETRY_DELAY).await;
            }
        }
    }
}
