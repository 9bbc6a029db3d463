use futures_util::StreamExt;
use std::fmt;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use super::lines::{output_lines, OutputLine, OutputLines, Source};
use super::localtunnel;
use super::provider::{self, Backend, ProcessSpec, TunnelProvider};
use crate::error::{Result, TunserveError};

/// A validated request for one tunnel.
#[derive(Debug, Clone)]
pub struct TunnelRequest {
    provider: &'static TunnelProvider,
    local_port: u16,
    subdomain: Option<String>,
    /// Overrides the provider's default API host (localtunnel only)
    api_host: Option<Url>,
}

impl TunnelRequest {
    /// Build a request, refusing a subdomain the provider cannot honour.
    pub fn new(
        provider: &'static TunnelProvider,
        local_port: u16,
        subdomain: Option<String>,
    ) -> Result<Self> {
        if subdomain.is_some() && !provider.supports_custom_subdomain {
            return Err(TunserveError::SubdomainUnsupported {
                provider: provider.id.to_string(),
                supported: provider::describe(provider::providers_supporting_custom_subdomain()),
            });
        }
        Ok(Self {
            provider,
            local_port,
            subdomain,
            api_host: None,
        })
    }

    pub fn with_api_host(mut self, host: Option<Url>) -> Self {
        self.api_host = host;
        self
    }

    pub fn provider(&self) -> &'static TunnelProvider {
        self.provider
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn subdomain(&self) -> Option<&str> {
        self.subdomain.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Pending,
    Active(String),
    Failed(String),
    Closed(Option<i32>),
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Pending => write!(f, "Pending"),
            SessionStatus::Active(url) => write!(f, "Active ({})", url),
            SessionStatus::Failed(reason) => write!(f, "Failed ({})", reason),
            SessionStatus::Closed(Some(code)) => write!(f, "Closed (exit code {})", code),
            SessionStatus::Closed(None) => write!(f, "Closed"),
        }
    }
}

/// Events surfaced by a running session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Public HTTPS URL is available; the tunnel is usable
    Ready(String),
    /// Plain HTTP URL reported by the provider (informational)
    PlainUrl(String),
    /// Unexpected provider error output; the session keeps running
    Warning(String),
    /// Underlying process or connection ended. Carries the raw exit code
    /// for processes and `None` for API-backed tunnels.
    Terminated(Option<i32>),
}

/// Map a terminated tunnel's raw exit code to the tool's exit status.
///
/// `0` and `255` are clean (ssh exits 255 when the remote end closes the
/// connection); anything else, including death by signal, is abnormal.
pub fn exit_status_for(code: Option<i32>) -> i32 {
    match code {
        Some(0) | Some(255) => 0,
        _ => 1,
    }
}

/// How long output may keep arriving once the process has exited.
/// Descendants that inherited the pipes can hold them open indefinitely.
const EXIT_DRAIN_GRACE: Duration = Duration::from_millis(200);

enum SessionBackend {
    Process(ProcessTunnel),
    Api(ApiTunnel),
}

struct ProcessTunnel {
    spec: ProcessSpec,
    child: Child,
    lines: OutputLines,
    output_closed: bool,
    /// Exit code once the process has been reaped
    exit: Option<Option<i32>>,
}

struct ApiTunnel {
    pool: JoinHandle<Result<()>>,
    cancel: CancellationToken,
}

enum RawEvent {
    Line(OutputLine),
    Exited(Option<i32>),
}

/// One attempt at exposing the local server through a provider.
pub struct TunnelSession {
    request: TunnelRequest,
    status: SessionStatus,
    backend: SessionBackend,
    /// Event to hand out before reading the backend
    queued: Option<SessionEvent>,
    terminated: bool,
    stopped: bool,
}

impl TunnelSession {
    /// Start a tunnel for `request`.
    ///
    /// API-backed providers are awaited until the public URL is assigned.
    /// Process-backed providers return as soon as the program is spawned;
    /// readiness arrives later as [`SessionEvent::Ready`].
    pub async fn start(request: TunnelRequest) -> Result<Self> {
        match request.provider.backend {
            Backend::Process(spec) => Self::spawn(request, spec),
            Backend::LocalTunnel { default_host } => Self::connect(request, default_host).await,
        }
    }

    fn spawn(request: TunnelRequest, spec: ProcessSpec) -> Result<Self> {
        let args = spec.render_args(request.local_port);
        info!(
            "Starting {} tunnel: {} {}",
            request.provider.id,
            spec.program,
            args.join(" ")
        );

        let mut command = Command::new(spec.program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group: a terminal Ctrl+C must reach only tunserve
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .map_err(|source| TunserveError::Spawn {
                program: spec.program.to_string(),
                source,
            })?;

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            let _ = child.start_kill();
            return Err(TunserveError::Spawn {
                program: spec.program.to_string(),
                source: std::io::Error::other("output pipes were not captured"),
            });
        };

        Ok(Self {
            request,
            status: SessionStatus::Pending,
            backend: SessionBackend::Process(ProcessTunnel {
                spec,
                child,
                lines: output_lines(stdout, stderr),
                output_closed: false,
                exit: None,
            }),
            queued: None,
            terminated: false,
            stopped: false,
        })
    }

    async fn connect(request: TunnelRequest, default_host: &str) -> Result<Self> {
        let host = match &request.api_host {
            Some(host) => host.clone(),
            None => Url::parse(default_host)
                .map_err(|e| TunserveError::Config(format!("Invalid tunnel host: {}", e)))?,
        };

        let assignment = localtunnel::request_assignment(&host, request.subdomain()).await?;
        info!(
            "localtunnel assigned {} (id {}, {} connections)",
            assignment.url, assignment.id, assignment.max_conn_count
        );
        if let Some(cached) = &assignment.cached_url {
            debug!("localtunnel cached URL: {}", cached);
        }

        let url = assignment.url.clone();
        let cancel = CancellationToken::new();
        let pool = tokio::spawn(localtunnel::run_pool(
            assignment,
            request.local_port,
            cancel.clone(),
        ));

        Ok(Self {
            request,
            status: SessionStatus::Active(url.clone()),
            backend: SessionBackend::Api(ApiTunnel { pool, cancel }),
            queued: Some(SessionEvent::Ready(url)),
            terminated: false,
            stopped: false,
        })
    }

    pub fn status(&self) -> &SessionStatus {
        &self.status
    }

    /// Whether termination carries a process exit code. API-backed
    /// sessions only ever report a disconnect.
    pub fn is_subprocess(&self) -> bool {
        matches!(self.backend, SessionBackend::Process(_))
    }

    /// Wait for the next session event.
    ///
    /// Returns `Some(Terminated(_))` exactly once and `None` afterwards, or
    /// after [`stop`](Self::stop). Cancel-safe: dropping the future loses
    /// no output.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        loop {
            if self.terminated || self.stopped {
                return None;
            }
            if let Some(event) = self.queued.take() {
                return Some(event);
            }

            let raw = match &mut self.backend {
                SessionBackend::Process(tunnel) => tunnel.next_raw().await,
                SessionBackend::Api(tunnel) => {
                    let reason = match (&mut tunnel.pool).await {
                        Ok(Ok(())) => "tunnel connection closed".to_string(),
                        Ok(Err(e)) => e.to_string(),
                        Err(e) => format!("tunnel task failed: {}", e),
                    };
                    warn!("{}", reason);
                    RawEvent::Exited(None)
                }
            };

            match raw {
                RawEvent::Line(line) => {
                    if let Some(event) = self.classify(line) {
                        return Some(event);
                    }
                }
                RawEvent::Exited(code) => {
                    self.terminated = true;
                    self.status = match &self.status {
                        SessionStatus::Active(_) => SessionStatus::Closed(code),
                        _ => {
                            error!(
                                "{} exited before reporting a public URL",
                                self.request.provider.id
                            );
                            SessionStatus::Failed(match code {
                                Some(code) => format!("exited with code {} before a URL was obtained", code),
                                None => "terminated before a URL was obtained".to_string(),
                            })
                        }
                    };
                    debug!("Tunnel session is now {}", self.status);
                    return Some(SessionEvent::Terminated(code));
                }
            }
        }
    }

    fn classify(&mut self, line: OutputLine) -> Option<SessionEvent> {
        let SessionBackend::Process(tunnel) = &self.backend else {
            return None;
        };
        let spec = tunnel.spec;

        if let Some(url) = spec.https_url.find(&line.text) {
            if matches!(self.status, SessionStatus::Pending) {
                info!("Tunnel active: {}", url);
                self.status = SessionStatus::Active(url.clone());
                return Some(SessionEvent::Ready(url));
            }
            debug!("Ignoring repeated HTTPS URL: {}", url);
            return None;
        }

        if let Some(url) = spec.http_url.find(&line.text) {
            return Some(SessionEvent::PlainUrl(url));
        }

        match line.source {
            Source::Stderr if line.text.contains(spec.benign_stderr) => {
                debug!("Suppressed: {}", line.text);
                None
            }
            Source::Stderr if line.text.trim().is_empty() => None,
            Source::Stderr => Some(SessionEvent::Warning(line.text)),
            Source::Stdout => {
                debug!("{}: {}", self.request.provider.id, line.text);
                None
            }
        }
    }

    /// Tear the tunnel down. Safe to call repeatedly and after the tunnel
    /// has already terminated.
    pub async fn stop(&mut self) {
        if self.stopped || self.terminated {
            self.stopped = true;
            return;
        }
        self.stopped = true;

        let code = match &mut self.backend {
            SessionBackend::Process(tunnel) => {
                info!("Stopping {} tunnel", self.request.provider.id);
                if let Err(e) = tunnel.child.start_kill() {
                    debug!("Kill failed (process already gone?): {}", e);
                }
                match tunnel.child.wait().await {
                    Ok(status) => status.code(),
                    Err(e) => {
                        debug!("Failed to reap tunnel process: {}", e);
                        None
                    }
                }
            }
            SessionBackend::Api(tunnel) => {
                info!("Closing {} tunnel", self.request.provider.id);
                tunnel.cancel.cancel();
                let _ = (&mut tunnel.pool).await;
                None
            }
        };
        self.status = SessionStatus::Closed(code);
    }
}

impl ProcessTunnel {
    /// Next line or the process exit, whichever comes first. Output already
    /// written before the exit is still handed out, for at most
    /// `EXIT_DRAIN_GRACE` per line.
    async fn next_raw(&mut self) -> RawEvent {
        loop {
            if let Some(code) = self.exit {
                if !self.output_closed {
                    match tokio::time::timeout(EXIT_DRAIN_GRACE, self.lines.next()).await {
                        Ok(Some(line)) => return RawEvent::Line(line),
                        Ok(None) => {}
                        Err(_) => debug!("Output still held open after exit, not waiting for it"),
                    }
                    self.output_closed = true;
                }
                return RawEvent::Exited(code);
            }

            tokio::select! {
                biased;
                line = self.lines.next(), if !self.output_closed => match line {
                    Some(line) => return RawEvent::Line(line),
                    None => self.output_closed = true,
                },
                status = self.child.wait() => {
                    self.exit = Some(match status {
                        Ok(status) => status.code(),
                        Err(e) => {
                            warn!("Failed to wait for tunnel process: {}", e);
                            None
                        }
                    });
                }
            }
        }
    }
}

impl Drop for TunnelSession {
    fn drop(&mut self) {
        if let SessionBackend::Api(tunnel) = &self.backend {
            tunnel.cancel.cancel();
            tunnel.pool.abort();
        }
    }
}
