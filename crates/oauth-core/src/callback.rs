//! Loopback callback receiver: a one-shot HTTP listener on `redirect_uri` that captures the
//! authorization code/state (or, in `capture_fragment` mode, an implicit-flow token fragment).
//!
//! An `axum::serve` instance on an ephemeral `TcpListener`, torn down with
//! `with_graceful_shutdown` driven by a `tokio::sync::oneshot` channel, with routing/timeout/
//! cancellation semantics layered around a single-request handler.

use crate::error::{Error, Result};
use axum::extract::{Query, State};
use axum::http::{StatusCode, Uri};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// What the browser/provider delivered to the loopback listener.
#[derive(Debug, Clone, Default)]
pub struct CallbackPayload {
    pub params: HashMap<String, String>,
}

impl CallbackPayload {
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Surfaces `error`/`error_description`, if the provider reported one, as an [`Error`].
    pub fn protocol_error(&self) -> Option<Error> {
        self.get("error")
            .map(|e| Error::from_protocol_error(e, self.get("error_description")))
    }
}

struct Shared {
    path: String,
    capture_fragment: bool,
    completion: Mutex<Option<oneshot::Sender<CallbackPayload>>>,
}

/// Waits for exactly one Authorization Code / Implicit flow callback on `redirect_uri`.
///
/// `capture_fragment` runs the Implicit-flow variant: the first request serves a page that
/// re-posts `window.location.hash` as a `?fragment=` query to the same path, and the *second*
/// request (carrying that fragment) is the one that completes the flow.
pub async fn wait_for_callback(
    redirect_uri: &str,
    timeout: Duration,
    capture_fragment: bool,
    cancel: CancellationToken,
) -> Result<CallbackPayload> {
    let url = url::Url::parse(redirect_uri)
        .map_err(|e| Error::BadUrl(redirect_uri.to_string(), e.to_string()))?;
    let host = url.host_str().unwrap_or("localhost").to_string();
    let port = url.port_or_known_default().unwrap_or(8080);
    let path = url.path().to_string();

    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|e| Error::PortBindFailed(format!("{e}")))?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::PortBindFailed(e.to_string()))?;

    let (tx, rx) = oneshot::channel();
    let shared = Arc::new(Shared {
        path: path.clone(),
        capture_fragment,
        completion: Mutex::new(Some(tx)),
    });

    let app = Router::new()
        .route(&path, get(handle_callback))
        .fallback(not_found)
        .with_state(shared);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = shutdown_rx.await;
    });
    let server_handle = tokio::spawn(server);

    let result = tokio::select! {
        payload = rx => payload.map_err(|_| Error::CallbackTimeout),
        () = tokio::time::sleep(timeout) => Err(Error::CallbackTimeout),
        () = cancel.cancelled() => Err(Error::CallbackTimeout),
    };

    let _ = shutdown_tx.send(());
    let _ = server_handle.await;
    result
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "not found").into_response()
}

async fn handle_callback(
    State(shared): State<Arc<Shared>>,
    Query(query): Query<HashMap<String, String>>,
    uri: Uri,
) -> Response {
    if uri.path() != shared.path {
        return not_found().await;
    }

    if shared.capture_fragment && !query.contains_key("fragment") {
        return Html(FRAGMENT_REPOST_PAGE).into_response();
    }

    let payload = if shared.capture_fragment {
        let fragment = query.get("fragment").cloned().unwrap_or_default();
        CallbackPayload {
            params: parse_query_like_string(&fragment),
        }
    } else {
        CallbackPayload { params: query }
    };

    let sender = shared.completion.lock().take();
    match sender {
        Some(tx) => {
            let ok = tx.send(payload).is_ok();
            if ok {
                Html(SUCCESS_PAGE).into_response()
            } else {
                Html(FAILURE_PAGE).into_response()
            }
        }
        None => (StatusCode::GONE, "callback already used").into_response(),
    }
}

fn parse_query_like_string(s: &str) -> HashMap<String, String> {
    url::form_urlencoded::parse(s.as_bytes())
        .into_owned()
        .collect()
}

const SUCCESS_PAGE: &str = r"<!doctype html><html><body>
<p>Authentication complete. You can close this window.</p>
<script>window.close();</script>
</body></html>";

const FAILURE_PAGE: &str = r"<!doctype html><html><body>
<p>Authentication failed. You can close this window.</p>
<script>window.close();</script>
</body></html>";

const FRAGMENT_REPOST_PAGE: &str = r#"<!doctype html><html><body>
<script>
  var hash = window.location.hash.slice(1);
  var url = window.location.pathname + "?fragment=" + encodeURIComponent(hash);
  window.location.replace(url);
</script>
</body></html>"#;

#[cfg(test)]
mod tests {
    use super::*;
    use oauth_test_support::pick_unused_port;

    #[tokio::test]
    async fn captures_code_and_state_from_query() {
        let port = pick_unused_port().unwrap();
        let redirect_uri = format!("http://127.0.0.1:{port}/callback");

        let handle = tokio::spawn(wait_for_callback(
            &redirect_uri,
            Duration::from_secs(5),
            false,
            CancellationToken::new(),
        ));

        let client = reqwest::Client::new();
        let resp = client
            .get(format!("{redirect_uri}?code=abc123&state=xyz"))
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_success());

        let payload = handle.await.unwrap().unwrap();
        assert_eq!(payload.get("code"), Some("abc123"));
        assert_eq!(payload.get("state"), Some("xyz"));
    }

    #[tokio::test]
    async fn unconfigured_path_returns_404() {
        let port = pick_unused_port().unwrap();
        let redirect_uri = format!("http://127.0.0.1:{port}/callback");

        let handle = tokio::spawn(wait_for_callback(
            &redirect_uri,
            Duration::from_secs(5),
            false,
            CancellationToken::new(),
        ));

        let client = reqwest::Client::new();
        let wrong_path = client
            .get(format!("http://127.0.0.1:{port}/wrong"))
            .send()
            .await
            .unwrap();
        assert_eq!(wrong_path.status(), reqwest::StatusCode::NOT_FOUND);

        let right_path = client.get(format!("{redirect_uri}?code=abc")).send().await.unwrap();
        assert!(right_path.status().is_success());
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn times_out_when_no_callback_arrives() {
        let port = pick_unused_port().unwrap();
        let redirect_uri = format!("http://127.0.0.1:{port}/callback");
        let result = wait_for_callback(
            &redirect_uri,
            Duration::from_millis(100),
            false,
            CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(Error::CallbackTimeout)));
    }

    #[tokio::test]
    async fn implicit_flow_fragment_repost_round_trip() {
        let port = pick_unused_port().unwrap();
        let redirect_uri = format!("http://127.0.0.1:{port}/callback");

        let handle = tokio::spawn(wait_for_callback(
            &redirect_uri,
            Duration::from_secs(5),
            true,
            CancellationToken::new(),
        ));

        let client = reqwest::Client::new();
        let landing = client.get(&redirect_uri).send().await.unwrap();
        assert!(landing.status().is_success());
        let body = landing.text().await.unwrap();
        assert!(body.contains("location.hash"));

        let fragment = "access_token=tok123&token_type=Bearer&state=xyz";
        let encoded = url::form_urlencoded::byte_serialize(fragment.as_bytes()).collect::<String>();
        let follow_up = client
            .get(format!("{redirect_uri}?fragment={encoded}"))
            .send()
            .await
            .unwrap();
        assert!(follow_up.status().is_success());

        let payload = handle.await.unwrap().unwrap();
        assert_eq!(payload.get("access_token"), Some("tok123"));
    }
}
