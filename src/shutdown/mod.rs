//! Exit coordination.
//!
//! [`ExitCoordinator`] is the only place that decides when tunserve stops
//! and with which exit status. It watches two independent sources:
//! - keyboard input, where the confirmation key must be pressed twice
//!   within a short window;
//! - the tunnel session, whose termination always ends the tool.

mod state;
pub mod terminal;

use state::{Confirmation, Transition};

use crossterm::event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use futures_util::stream::{self, LocalBoxStream, Stream, StreamExt};
use std::fmt;
use std::str::FromStr;
use tokio::time::{sleep_until, Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::TunserveError;
use crate::tunnel::{exit_status_for, SessionEvent, TunnelSession};
use terminal::{say, RawModeGuard};

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(1);

/// Key that has to be pressed twice to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfirmKey {
    #[default]
    CtrlC,
    Char(char),
}

impl FromStr for ConfirmKey {
    type Err = TunserveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ctrl-c" | "ctrl+c" | "^c" => Ok(ConfirmKey::CtrlC),
            _ => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) if !c.is_control() => Ok(ConfirmKey::Char(c)),
                    _ => Err(TunserveError::Config(format!(
                        "Invalid shutdown key '{}': use \"ctrl-c\" or a single character",
                        s
                    ))),
                }
            }
        }
    }
}

impl fmt::Display for ConfirmKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfirmKey::CtrlC => write!(f, "Ctrl+C"),
            ConfirmKey::Char(c) => write!(f, "'{}'", c),
        }
    }
}

impl ConfirmKey {
    pub fn matches(&self, key: &KeyEvent) -> bool {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match self {
            ConfirmKey::CtrlC => ctrl && matches!(key.code, KeyCode::Char('c') | KeyCode::Char('C')),
            ConfirmKey::Char(c) => !ctrl && key.code == KeyCode::Char(*c),
        }
    }
}

/// A keyboard input, reduced to what the state machine cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    Confirm,
    Other,
}

/// Why the coordinator stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Confirmation key pressed twice
    Confirmed,
    /// Tunnel process exited on its own
    TunnelClosed { code: Option<i32> },
    /// API-backed tunnel lost its connection to the server
    TunnelDisconnected,
    /// Input source ended with nothing left to wait for
    InputClosed,
}

impl ShutdownReason {
    pub fn exit_code(&self) -> i32 {
        match self {
            ShutdownReason::Confirmed
            | ShutdownReason::InputClosed
            | ShutdownReason::TunnelDisconnected => 0,
            ShutdownReason::TunnelClosed { code } => exit_status_for(*code),
        }
    }
}

pub struct ExitCoordinator {
    confirmation: Confirmation,
    key: ConfirmKey,
    open_on_ready: bool,
}

impl ExitCoordinator {
    pub fn new(key: ConfirmKey, window: Duration) -> Self {
        Self {
            confirmation: Confirmation::new(window),
            key,
            open_on_ready: false,
        }
    }

    /// Open the public URL in a browser once the tunnel is ready.
    pub fn open_on_ready(mut self, open: bool) -> Self {
        self.open_on_ready = open;
        self
    }

    pub fn key(&self) -> ConfirmKey {
        self.key
    }

    /// Take over the keyboard until shutdown. Raw mode is restored before
    /// this returns.
    pub async fn run(mut self, session: Option<TunnelSession>) -> ShutdownReason {
        let guard = RawModeGuard::enter();
        let inputs = match guard {
            Some(_) => keyboard_inputs(self.key),
            None => interrupt_inputs(),
        };
        let reason = self.drive(inputs, session).await;
        drop(guard);
        reason
    }

    /// Event loop over an input stream and the optional tunnel session.
    pub async fn drive<S>(&mut self, mut inputs: S, mut session: Option<TunnelSession>) -> ShutdownReason
    where
        S: Stream<Item = Input> + Unpin,
    {
        let mut inputs_open = true;

        loop {
            if !inputs_open && session.is_none() {
                return ShutdownReason::InputClosed;
            }

            let deadline = self.confirmation.deadline();

            tokio::select! {
                input = inputs.next(), if inputs_open => match input {
                    Some(Input::Confirm) => match self.confirmation.on_confirm(Instant::now()) {
                        Transition::Terminate => {
                            info!("Shutdown confirmed");
                            if let Some(session) = session.as_mut() {
                                session.stop().await;
                            }
                            return ShutdownReason::Confirmed;
                        }
                        Transition::Armed => say(format!("Press {} again to stop.", self.key)),
                        _ => {}
                    },
                    Some(Input::Other) => {
                        if self.confirmation.on_other() == Transition::Disarmed {
                            debug!("Shutdown disarmed by another key");
                        }
                    }
                    None => {
                        debug!("Input stream closed");
                        inputs_open = false;
                    }
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.confirmation.on_timeout(Instant::now());
                    debug!("Confirmation window elapsed: {:?}", self.confirmation.state());
                }
                event = next_session_event(&mut session) => match event {
                    Some(SessionEvent::Ready(url)) => self.announce(&url),
                    Some(SessionEvent::PlainUrl(url)) => say(format!("  (plain HTTP: {})", url)),
                    Some(SessionEvent::Warning(line)) => warn!("tunnel: {}", line),
                    Some(SessionEvent::Terminated(code)) => {
                        let reason = match &session {
                            Some(session) if !session.is_subprocess() => {
                                ShutdownReason::TunnelDisconnected
                            }
                            _ => ShutdownReason::TunnelClosed { code },
                        };
                        if let Some(session) = &session {
                            info!("Tunnel session {}", session.status());
                        }
                        match (&reason, reason.exit_code()) {
                            (ShutdownReason::TunnelDisconnected, _) => say("Tunnel connection closed."),
                            (_, 0) => info!("Tunnel closed"),
                            (_, _) => match code {
                                Some(code) => say(format!(
                                    "Tunnel terminated abnormally (exit code {}).",
                                    code
                                )),
                                None => say("Tunnel terminated abnormally (killed by signal)."),
                            },
                        }
                        return reason;
                    }
                    None => session = None,
                },
            }
        }
    }

    fn announce(&self, url: &str) {
        say("");
        say(format!("Public URL: {}", url));
        say(format!("Press {} twice to stop.", self.key));
        say("");

        if self.open_on_ready && open::that(url).is_err() {
            say("(Could not open browser automatically)");
        }
    }
}

async fn next_session_event(session: &mut Option<TunnelSession>) -> Option<SessionEvent> {
    match session {
        Some(session) => session.next_event().await,
        None => std::future::pending().await,
    }
}

/// Key presses from the raw-mode terminal.
fn keyboard_inputs(key: ConfirmKey) -> LocalBoxStream<'static, Input> {
    EventStream::new()
        .filter_map(move |event| async move {
            match event {
                Ok(Event::Key(k)) if k.kind == KeyEventKind::Press => Some(if key.matches(&k) {
                    Input::Confirm
                } else {
                    Input::Other
                }),
                Ok(_) => None,
                Err(e) => {
                    debug!("Keyboard read error: {}", e);
                    None
                }
            }
        })
        .boxed_local()
}

/// Without a terminal, every SIGINT counts as a confirmation press.
fn interrupt_inputs() -> LocalBoxStream<'static, Input> {
    stream::unfold((), |()| async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => Some((Input::Confirm, ())),
            Err(e) => {
                warn!("Could not listen for Ctrl+C: {}", e);
                None
            }
        }
    })
    .boxed_local()
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::state::ExitState;
    use crate::tunnel::provider::{Backend, ProcessSpec, TunnelProvider, UrlMatcher};
    use crate::tunnel::testing::disconnecting_localtunnel;
    use crate::tunnel::TunnelRequest;
    use crossterm::event::KeyEventState;

    fn key_event(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
        KeyEvent {
            code,
            modifiers,
            kind: KeyEventKind::Press,
            state: KeyEventState::NONE,
        }
    }

    fn coordinator() -> ExitCoordinator {
        ExitCoordinator::new(ConfirmKey::CtrlC, DEFAULT_WINDOW)
    }

    #[cfg(unix)]
    async fn fake_session(script: &'static str) -> TunnelSession {
        let args: &'static [&'static str] = Box::leak(Box::new(["-c", script]));
        let provider: &'static TunnelProvider = Box::leak(Box::new(TunnelProvider {
            id: "fake",
            short_alias: "f",
            supports_custom_subdomain: false,
            backend: Backend::Process(ProcessSpec {
                program: "sh",
                args,
                https_url: UrlMatcher {
                    scheme: "https://",
                    host_suffixes: &[".pinggy.link"],
                },
                http_url: UrlMatcher {
                    scheme: "http://",
                    host_suffixes: &[".pinggy.link"],
                },
                benign_stderr: "Allocated port",
            }),
        }));
        let request = TunnelRequest::new(provider, 3000, None).unwrap();
        TunnelSession::start(request).await.unwrap()
    }

    #[test]
    fn test_confirm_key_parsing() {
        assert_eq!("ctrl-c".parse::<ConfirmKey>().unwrap(), ConfirmKey::CtrlC);
        assert_eq!("Ctrl+C".parse::<ConfirmKey>().unwrap(), ConfirmKey::CtrlC);
        assert_eq!("q".parse::<ConfirmKey>().unwrap(), ConfirmKey::Char('q'));
        assert!("".parse::<ConfirmKey>().is_err());
        assert!("qq".parse::<ConfirmKey>().is_err());
    }

    #[test]
    fn test_confirm_key_matching() {
        let ctrl_c = key_event(KeyCode::Char('c'), KeyModifiers::CONTROL);
        let plain_c = key_event(KeyCode::Char('c'), KeyModifiers::NONE);
        let q = key_event(KeyCode::Char('q'), KeyModifiers::NONE);

        assert!(ConfirmKey::CtrlC.matches(&ctrl_c));
        assert!(!ConfirmKey::CtrlC.matches(&plain_c));
        assert!(ConfirmKey::Char('q').matches(&q));
        assert!(!ConfirmKey::Char('q').matches(&plain_c));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(ShutdownReason::Confirmed.exit_code(), 0);
        assert_eq!(ShutdownReason::InputClosed.exit_code(), 0);
        assert_eq!(ShutdownReason::TunnelClosed { code: Some(255) }.exit_code(), 0);
        assert_eq!(ShutdownReason::TunnelClosed { code: Some(0) }.exit_code(), 0);
        assert_eq!(ShutdownReason::TunnelClosed { code: Some(7) }.exit_code(), 1);
        assert_eq!(ShutdownReason::TunnelClosed { code: None }.exit_code(), 1);
        assert_eq!(ShutdownReason::TunnelDisconnected.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_double_confirmation_terminates() {
        let inputs = stream::iter(vec![Input::Confirm, Input::Confirm]);
        let reason = coordinator().drive(inputs, None).await;
        assert_eq!(reason, ShutdownReason::Confirmed);
        assert_eq!(reason.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_other_key_between_presses_resets() {
        let inputs = stream::iter(vec![Input::Confirm, Input::Other, Input::Confirm]);
        let mut coordinator = coordinator();
        let reason = coordinator.drive(inputs, None).await;
        assert_eq!(reason, ShutdownReason::InputClosed);
        assert!(matches!(
            coordinator.confirmation.state(),
            ExitState::ArmedOnce { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_elapsing_resets() {
        let inputs = stream::iter(vec![Input::Confirm]).chain(stream::once(async {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Input::Confirm
        }));
        let mut coordinator = coordinator();
        let reason = coordinator.drive(Box::pin(inputs), None).await;
        assert_eq!(reason, ShutdownReason::InputClosed);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_tunnel_exit_ends_tool_regardless_of_keyboard() {
        let session = fake_session("echo https://abc.a.free.pinggy.link; exit 7").await;
        // Armed but never confirmed
        let inputs = stream::iter(vec![Input::Confirm]);
        let reason = coordinator().drive(inputs, Some(session)).await;
        assert_eq!(reason, ShutdownReason::TunnelClosed { code: Some(7) });
        assert_eq!(reason.exit_code(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_benign_tunnel_exit() {
        let session = fake_session("echo https://abc.a.free.pinggy.link; exit 255").await;
        let reason = coordinator().drive(stream::empty(), Some(session)).await;
        assert_eq!(reason.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_localtunnel_disconnect_is_clean() {
        let session = disconnecting_localtunnel("https://abc.loca.lt").await;
        let reason = coordinator().drive(stream::pending(), Some(session)).await;
        assert_eq!(reason, ShutdownReason::TunnelDisconnected);
        assert_eq!(reason.exit_code(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_confirmed_shutdown_stops_tunnel() {
        let session = fake_session("echo https://abc.a.free.pinggy.link; sleep 30").await;
        let inputs = stream::iter(vec![Input::Confirm, Input::Confirm]);
        let reason = coordinator().drive(inputs, Some(session)).await;
        assert_eq!(reason, ShutdownReason::Confirmed);
    }
}
