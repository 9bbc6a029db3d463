//! Local stand-in for a localtunnel server.

use axum::{routing::get, Json, Router};
use tokio::net::TcpListener;
use url::Url;

use super::{provider, TunnelRequest, TunnelSession};

/// Start a localtunnel session that is assigned `public_url` and then
/// loses its server: the tunnel endpoint accepts one socket and goes away.
pub async fn disconnecting_localtunnel(public_url: &'static str) -> TunnelSession {
    let remote = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let remote_port = remote.local_addr().unwrap().port();
    tokio::spawn(async move {
        let _ = remote.accept().await;
    });

    let api = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let api_addr = api.local_addr().unwrap();
    let app = Router::new().route(
        "/",
        get(move || async move {
            Json(serde_json::json!({
                "id": "abc",
                "port": remote_port,
                "max_conn_count": 1,
                "url": public_url,
            }))
        }),
    );
    tokio::spawn(async move {
        axum::serve(api, app).await.unwrap();
    });

    // Nothing listens locally; the pool only needs the remote side
    let local_port = {
        let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
        l.local_addr().unwrap().port()
    };

    let lt = provider::lookup("localtunnel").unwrap();
    let host = Url::parse(&format!("http://{}", api_addr)).unwrap();
    let request = TunnelRequest::new(lt, local_port, None)
        .unwrap()
        .with_api_host(Some(host));
    TunnelSession::start(request).await.unwrap()
}
