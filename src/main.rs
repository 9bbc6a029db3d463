//! tunserve
//!
//! Serve a local file or directory over HTTP and, optionally, expose it on
//! the public internet through a tunnel provider:
//! - `pinggy` - SSH reverse forward to a.pinggy.io (needs `ssh` on PATH)
//! - `localtunnel` - localtunnel.me, with optional custom subdomains
//!
//! The process stays up until the shutdown key is pressed twice or the
//! tunnel goes away.

#![deny(clippy::correctness)]
#![warn(clippy::suspicious)]
#![warn(clippy::style)]
#![warn(clippy::complexity)]
#![warn(clippy::perf)]

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use std::io;
use std::path::PathBuf;
use tracing::{debug, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod error;
mod options;
mod server;
mod shutdown;
mod tunnel;

use config::Config;
use options::{RawArgs, ServeOptions};
use server::StaticServer;
use shutdown::terminal::{say, CrlfWriter};
use shutdown::ExitCoordinator;
use tunnel::TunnelSession;

#[derive(Parser, Debug)]
#[command(name = "tunserve")]
#[command(author, version, about = "Serve files locally and share them through a public tunnel")]
#[command(disable_version_flag = true)]
struct Cli {
    /// File or directory to serve
    path: Option<PathBuf>,

    /// Local HTTP port (1-65535) [default: 3000]
    #[arg(short, long, env = "TUNSERVE_PORT")]
    port: Option<String>,

    /// Tunnel provider: pinggy (pg) or localtunnel (lt)
    #[arg(short, long)]
    tunnel: Option<String>,

    /// Custom subdomain (localtunnel only; selects it when --tunnel is omitted)
    #[arg(short = 's', long)]
    tunnel_subdomain: Option<String>,

    /// Open the public URL (or the local one) in a browser
    #[arg(short, long)]
    open: bool,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    /// Print version
    #[allow(dead_code)]
    #[arg(short = 'v', long, action = ArgAction::Version)]
    version: Option<bool>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Help and version go to stdout and succeed; every usage error is status 1
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    init_logging(cli.verbose);

    let config = Config::load().unwrap_or_else(|e| {
        warn!("Ignoring config file: {:#}", e);
        Config::default()
    });

    let options = ServeOptions::resolve(
        RawArgs {
            port: cli.port,
            tunnel: cli.tunnel,
            subdomain: cli.tunnel_subdomain,
            path: cli.path,
            open: cli.open,
        },
        &config,
    )?;

    let code = run(options).await?;
    std::process::exit(code);
}

async fn run(options: ServeOptions) -> Result<i32> {
    let server = StaticServer::bind(&options.host, options.port, &options.root)
        .await
        .context("Failed to start the static server")?;

    debug!("Static server listening on {}", server.local_addr());
    let local_url = format!("http://localhost:{}", server.port());
    say(format!(
        "Serving {} at {}",
        options.root.path().display(),
        local_url
    ));

    // The listener is bound, so the tunnel never points at a dead port
    let session = match options.tunnel {
        Some(request) => {
            say(format!(
                "Starting {} tunnel to port {}...",
                request.provider().id,
                request.local_port()
            ));
            let session = TunnelSession::start(request)
                .await
                .context("Failed to create tunnel")?;
            Some(session)
        }
        None => {
            if options.open && open::that(&local_url).is_err() {
                say("(Could not open browser automatically)");
            }
            None
        }
    };

    let coordinator =
        ExitCoordinator::new(options.confirm_key, options.confirm_window).open_on_ready(options.open);
    if session.is_none() {
        say(format!("Press {} twice to stop.", coordinator.key()));
    }

    let reason = coordinator.run(session).await;
    drop(server);
    Ok(reason.exit_code())
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("warn")
        }
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(|| CrlfWriter::new(io::stderr())))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_flags() {
        let cli = Cli::try_parse_from([
            "tunserve",
            "-p",
            "8080",
            "-t",
            "lt",
            "-s",
            "mysite",
            "/tmp/site",
        ])
        .unwrap();
        assert_eq!(cli.port.as_deref(), Some("8080"));
        assert_eq!(cli.tunnel.as_deref(), Some("lt"));
        assert_eq!(cli.tunnel_subdomain.as_deref(), Some("mysite"));
        assert_eq!(cli.path, Some(PathBuf::from("/tmp/site")));
    }

    #[test]
    fn test_cli_long_flags() {
        let cli = Cli::try_parse_from([
            "tunserve",
            "--port",
            "3001",
            "--tunnel",
            "pinggy",
            "--tunnel-subdomain",
            "abcd",
        ])
        .unwrap();
        assert_eq!(cli.port.as_deref(), Some("3001"));
        assert_eq!(cli.tunnel.as_deref(), Some("pinggy"));
        assert_eq!(cli.tunnel_subdomain.as_deref(), Some("abcd"));
        assert!(cli.path.is_none());
    }

    #[test]
    fn test_single_positional_path() {
        assert!(Cli::try_parse_from(["tunserve", "a", "b"]).is_err());
    }

    #[test]
    fn test_help_and_version_are_not_errors() {
        for flag in ["-h", "--help", "-v", "--version"] {
            let err = Cli::try_parse_from(["tunserve", flag]).unwrap_err();
            assert!(!err.use_stderr(), "{} should print to stdout", flag);
        }
    }

    #[test]
    fn test_unknown_flag_is_an_error() {
        let err = Cli::try_parse_from(["tunserve", "--bogus"]).unwrap_err();
        assert!(err.use_stderr());
    }
}
