//! Static file server.
//!
//! The listener is bound before [`StaticServer::bind`] returns, so callers
//! can start a tunnel knowing the port is already accepting connections.

use axum::Router;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::error::{Result, TunserveError};
use crate::options::ServeRoot;

pub struct StaticServer {
    local_addr: SocketAddr,
    handle: JoinHandle<()>,
}

pub fn router(root: &ServeRoot) -> Router {
    let router = match root {
        ServeRoot::Dir(dir) => {
            Router::new().fallback_service(ServeDir::new(dir).append_index_html_on_directories(true))
        }
        // Every path answers with the one file
        ServeRoot::File(file) => Router::new().fallback_service(ServeFile::new(file)),
    };
    router.layer(TraceLayer::new_for_http())
}

impl StaticServer {
    /// Bind `host:port` and start serving `root` in the background.
    pub async fn bind(host: &str, port: u16, root: &ServeRoot) -> Result<Self> {
        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|source| TunserveError::Bind {
                addr: format!("{}:{}", host, port),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        info!("Serving {} on {}", root.path().display(), local_addr);

        let app = router(root);
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("Static server stopped: {}", e);
            }
        });

        Ok(Self { local_addr, handle })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }
}

impl Drop for StaticServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
