//! Assembles the HTTP router shared by the plain-HTTP and HTTPS listeners:
//! `POST /rpc` for request/reply RPC, `GET /rpc` upgrading to WebSocket,
//! and an optional static/SSR fallback wired through the injectable
//! [`nprpc_transport::StaticContentProvider`]/[`nprpc_transport::SsrForwarder`]
//! seams — grounded on `services/server::build_router`'s shape (routes
//! plus a dashboard static dir), generalized to take the providers as
//! trait objects instead of a hardcoded `ServeDir`.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::FromRef;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use nprpc_core::RpcCore;
use nprpc_transport::{rpc_post_handler, ws_upgrade_handler, SsrForwarder, StaticContentProvider};

#[derive(Clone)]
struct AppState {
    rpc_core: Arc<RpcCore>,
    static_provider: Arc<dyn StaticContentProvider>,
    ssr_forwarder: Arc<dyn SsrForwarder>,
}

impl FromRef<AppState> for Arc<RpcCore> {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.rpc_core)
    }
}

pub fn build_router(
    rpc_core: Arc<RpcCore>,
    static_provider: Arc<dyn StaticContentProvider>,
    ssr_forwarder: Arc<dyn SsrForwarder>,
) -> Router {
    let state = AppState { rpc_core, static_provider, ssr_forwarder };

    Router::new()
        .route("/rpc", post(rpc_post_handler).get(ws_upgrade_handler))
        .fallback(fallback_handler)
        .with_state(state)
}

async fn fallback_handler(axum::extract::State(state): axum::extract::State<AppState>, uri: axum::http::Uri) -> Response {
    let path = uri.path();
    if let Some(bytes) = state.ssr_forwarder.forward(path) {
        return (StatusCode::OK, Bytes::from(bytes)).into_response();
    }
    if let Some((bytes, content_type)) = state.static_provider.serve(path) {
        return (StatusCode::OK, [(axum::http::header::CONTENT_TYPE, content_type)], Bytes::from(bytes)).into_response();
    }
    StatusCode::NOT_FOUND.into_response()
}
