//! Resolution of command-line arguments and config into validated options.
//!
//! Everything here runs before the server binds, so a bad flag never
//! leaves a half-started server or tunnel behind.

use std::path::{Path, PathBuf};
use tokio::time::Duration;
use url::Url;

use crate::config::Config;
use crate::error::{Result, TunserveError};
use crate::shutdown::{ConfirmKey, DEFAULT_WINDOW};
use crate::tunnel::{provider, TunnelRequest};

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Raw, unvalidated inputs as they come from the command line.
#[derive(Debug, Default, Clone)]
pub struct RawArgs {
    pub port: Option<String>,
    pub tunnel: Option<String>,
    pub subdomain: Option<String>,
    pub path: Option<PathBuf>,
    pub open: bool,
}

/// What gets served: a directory tree or one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServeRoot {
    Dir(PathBuf),
    File(PathBuf),
}

impl ServeRoot {
    pub fn path(&self) -> &Path {
        match self {
            ServeRoot::Dir(p) | ServeRoot::File(p) => p,
        }
    }
}

#[derive(Debug)]
pub struct ServeOptions {
    pub host: String,
    pub port: u16,
    pub root: ServeRoot,
    pub tunnel: Option<TunnelRequest>,
    pub open: bool,
    pub confirm_key: ConfirmKey,
    pub confirm_window: Duration,
}

impl ServeOptions {
    pub fn resolve(args: RawArgs, config: &Config) -> Result<Self> {
        let port = match args.port.as_deref() {
            Some(raw) => parse_port(raw)?,
            None => match config.server.port {
                Some(0) => return Err(TunserveError::InvalidPort("0".to_string())),
                Some(port) => port,
                None => DEFAULT_PORT,
            },
        };

        let root = resolve_root(args.path.unwrap_or_else(|| PathBuf::from(".")))?;
        let tunnel = resolve_tunnel(args.tunnel.as_deref(), args.subdomain, port, config)?;

        let confirm_key = match config.shutdown.key.as_deref() {
            Some(key) => key.parse()?,
            None => ConfirmKey::default(),
        };
        let confirm_window = config
            .shutdown
            .window_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_WINDOW);

        Ok(Self {
            host: config
                .server
                .host
                .clone()
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
            root,
            tunnel,
            open: args.open,
            confirm_key,
            confirm_window,
        })
    }
}

pub fn parse_port(raw: &str) -> Result<u16> {
    match raw.trim().parse::<u16>() {
        Ok(port) if port >= 1 => Ok(port),
        _ => Err(TunserveError::InvalidPort(raw.to_string())),
    }
}

fn resolve_root(path: PathBuf) -> Result<ServeRoot> {
    if path.is_dir() {
        Ok(ServeRoot::Dir(path))
    } else if path.is_file() {
        Ok(ServeRoot::File(path))
    } else {
        Err(TunserveError::PathNotFound(path))
    }
}

fn resolve_tunnel(
    tunnel: Option<&str>,
    subdomain: Option<String>,
    port: u16,
    config: &Config,
) -> Result<Option<TunnelRequest>> {
    let provider = match (tunnel, &subdomain) {
        (Some(id), _) => provider::lookup(id).ok_or_else(|| TunserveError::UnknownProvider {
            id: id.to_string(),
            known: provider::describe(provider::all()),
        })?,
        (None, Some(_)) => provider::default_subdomain_provider().ok_or_else(|| {
            TunserveError::Config("no provider supports custom subdomains".to_string())
        })?,
        (None, None) => return Ok(None),
    };

    if let Some(name) = &subdomain {
        validate_subdomain(name)?;
    }

    let api_host = config
        .tunnel
        .localtunnel_host
        .as_deref()
        .map(|h| {
            Url::parse(h)
                .map_err(|e| TunserveError::Config(format!("Invalid localtunnel_host '{}': {}", h, e)))
        })
        .transpose()?;

    Ok(Some(
        TunnelRequest::new(provider, port, subdomain)?.with_api_host(api_host),
    ))
}

/// Subdomains are 4-63 characters of `a-z`, `0-9` and `-`, with no
/// leading or trailing hyphen.
pub fn validate_subdomain(name: &str) -> Result<()> {
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if valid_chars && (4..=63).contains(&name.len()) && !name.starts_with('-') && !name.ends_with('-')
    {
        Ok(())
    } else {
        Err(TunserveError::InvalidSubdomain(name.to_string()))
    }
}
