//! Registry of supported tunnel providers.
//!
//! Everything provider-specific lives here as data: how to launch the
//! backend, which output lines carry the public URLs, and which error
//! output is harmless noise. Adding a provider means adding an entry to
//! [`PROVIDERS`]; the session logic stays untouched.

use std::fmt;

/// How a provider establishes the tunnel.
#[derive(Debug, Clone, Copy)]
pub enum Backend {
    /// External program whose output is scanned for the public URL
    Process(ProcessSpec),
    /// localtunnel HTTP API plus a pool of raw TCP connections
    LocalTunnel { default_host: &'static str },
}

/// Launch recipe and output matchers for a subprocess-backed provider.
#[derive(Debug, Clone, Copy)]
pub struct ProcessSpec {
    pub program: &'static str,
    /// Arguments; `{port}` is replaced with the local port
    pub args: &'static [&'static str],
    pub https_url: UrlMatcher,
    pub http_url: UrlMatcher,
    /// Stderr lines containing this are dropped
    pub benign_stderr: &'static str,
}

impl ProcessSpec {
    pub fn render_args(&self, local_port: u16) -> Vec<String> {
        let port = local_port.to_string();
        self.args.iter().map(|a| a.replace("{port}", &port)).collect()
    }
}

/// Matches a URL with a given scheme whose host ends in one of the
/// listed suffixes.
#[derive(Debug, Clone, Copy)]
pub struct UrlMatcher {
    /// Scheme including separator, e.g. `https://`
    pub scheme: &'static str,
    pub host_suffixes: &'static [&'static str],
}

impl UrlMatcher {
    /// Extract the first matching URL from a line of output.
    pub fn find(&self, line: &str) -> Option<String> {
        let mut rest = line;
        while let Some(start) = rest.find(self.scheme) {
            let candidate = &rest[start..];
            let end = candidate
                .find(|c: char| c.is_whitespace() || matches!(c, '"' | '\'' | '<' | '>' | '\x1b'))
                .unwrap_or(candidate.len());
            let url = candidate[..end].trim_end_matches(['/', ',', '.', ')', '|']);

            let host = url
                .get(self.scheme.len()..)
                .and_then(|r| r.split(['/', ':', '?']).next())
                .unwrap_or_default();
            if !host.is_empty() && self.host_suffixes.iter().any(|s| host.ends_with(s)) {
                return Some(url.to_string());
            }
            rest = &candidate[self.scheme.len()..];
        }
        None
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TunnelProvider {
    pub id: &'static str,
    pub short_alias: &'static str,
    pub supports_custom_subdomain: bool,
    pub backend: Backend,
}

impl fmt::Display for TunnelProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.short_alias)
    }
}

const PINGGY_HOSTS: &[&str] = &[".pinggy.link", ".pinggy.online"];

pub static PROVIDERS: [TunnelProvider; 2] = [
    TunnelProvider {
        id: "pinggy",
        short_alias: "pg",
        supports_custom_subdomain: false,
        backend: Backend::Process(ProcessSpec {
            program: "ssh",
            args: &[
                "-p",
                "443",
                "-o",
                "StrictHostKeyChecking=no",
                "-o",
                "ServerAliveInterval=30",
                "-R0:localhost:{port}",
                "a.pinggy.io",
            ],
            https_url: UrlMatcher {
                scheme: "https://",
                host_suffixes: PINGGY_HOSTS,
            },
            http_url: UrlMatcher {
                scheme: "http://",
                host_suffixes: PINGGY_HOSTS,
            },
            benign_stderr: "Allocated port",
        }),
    },
    TunnelProvider {
        id: "localtunnel",
        short_alias: "lt",
        supports_custom_subdomain: true,
        backend: Backend::LocalTunnel {
            default_host: "https://localtunnel.me",
        },
    },
];

pub fn all() -> &'static [TunnelProvider] {
    &PROVIDERS
}

/// Find a provider by exact id or short alias (case-sensitive).
pub fn lookup(identifier: &str) -> Option<&'static TunnelProvider> {
    PROVIDERS
        .iter()
        .find(|p| p.id == identifier || p.short_alias == identifier)
}

pub fn providers_supporting_custom_subdomain() -> Vec<&'static TunnelProvider> {
    PROVIDERS
        .iter()
        .filter(|p| p.supports_custom_subdomain)
        .collect()
}

/// Provider used when a subdomain is requested without `--tunnel`.
pub fn default_subdomain_provider() -> Option<&'static TunnelProvider> {
    PROVIDERS.iter().find(|p| p.supports_custom_subdomain)
}

/// Comma-separated `id (alias)` list for diagnostics.
pub fn describe<'a>(providers: impl IntoIterator<Item = &'a TunnelProvider>) -> String {
    providers
        .into_iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pinggy_spec() -> ProcessSpec {
        match lookup("pinggy").unwrap().backend {
            Backend::Process(spec) => spec,
            Backend::LocalTunnel { .. } => panic!("pinggy should be process-backed"),
        }
    }

    #[test]
    fn test_lookup_by_id_and_alias() {
        assert_eq!(lookup("pinggy").unwrap().id, "pinggy");
        assert_eq!(lookup("pg").unwrap().id, "pinggy");
        assert_eq!(lookup("localtunnel").unwrap().id, "localtunnel");
        assert_eq!(lookup("lt").unwrap().id, "localtunnel");
    }

    #[test]
    fn test_lookup_is_exact_and_case_sensitive() {
        assert!(lookup("Pinggy").is_none());
        assert!(lookup("LT").is_none());
        assert!(lookup("ping").is_none());
        assert!(lookup("").is_none());
    }

    #[test]
    fn test_custom_subdomain_providers() {
        let ids: Vec<_> = providers_supporting_custom_subdomain()
            .iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec!["localtunnel"]);
        assert_eq!(default_subdomain_provider().unwrap().id, "localtunnel");
    }

    #[test]
    fn test_describe() {
        assert_eq!(describe(all()), "pinggy (pg), localtunnel (lt)");
    }

    #[test]
    fn test_render_args_substitutes_port() {
        let args = pinggy_spec().render_args(8080);
        assert!(args.contains(&"-R0:localhost:8080".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("a.pinggy.io"));
    }

    #[test]
    fn test_https_matcher() {
        let spec = pinggy_spec();
        assert_eq!(
            spec.https_url
                .find("https://rnxyz-1-2-3-4.a.free.pinggy.link")
                .as_deref(),
            Some("https://rnxyz-1-2-3-4.a.free.pinggy.link")
        );
        assert_eq!(
            spec.https_url
                .find("  \x1b[32mhttps://abc.a.pinggy.online\x1b[0m  ")
                .as_deref(),
            Some("https://abc.a.pinggy.online")
        );
        // The plain HTTP line must not satisfy the HTTPS matcher
        assert!(spec.https_url.find("http://abc.a.free.pinggy.link").is_none());
    }

    #[test]
    fn test_http_matcher() {
        let spec = pinggy_spec();
        assert_eq!(
            spec.http_url.find("http://abc.a.free.pinggy.link").as_deref(),
            Some("http://abc.a.free.pinggy.link")
        );
        assert!(spec.http_url.find("https://abc.a.free.pinggy.link").is_none());
    }

    #[test]
    fn test_matcher_rejects_other_hosts() {
        let spec = pinggy_spec();
        assert!(spec.https_url.find("https://pinggy.io/docs").is_none());
        assert!(spec.https_url.find("see https://example.com").is_none());
        assert!(spec.https_url.find("").is_none());
        // Skips a non-matching URL and finds a later one
        assert_eq!(
            spec.https_url
                .find("docs https://pinggy.io url https://x.a.free.pinggy.link")
                .as_deref(),
            Some("https://x.a.free.pinggy.link")
        );
    }
}
