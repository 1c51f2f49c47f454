//! HTTP surface: login, logout, and the WebSocket upgrade.
//!
//! Authentication state is a server-side session referenced by an opaque
//! cookie token; the cookie carries no claims. TLS is terminated in front
//! of this server.

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use protocol::AuthMode;
use protocol::AuthRequest;

use crate::authc;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::relay;
use crate::session::{Session, SessionMap};

/// Cookie carrying the opaque session token.
pub const SESSION_COOKIE: &str = "linuxio_session";

/// Shared state behind the router.
pub struct AppState {
    /// Server configuration.
    pub config: ServerConfig,
    /// Live sessions.
    pub sessions: SessionMap,
}

/// Builds the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/ws", get(ws_upgrade))
        .with_state(state)
}

#[derive(Deserialize)]
struct LoginRequest {
    user: String,
    password: String,
}

#[derive(Serialize)]
struct LoginResponse {
    user_id: String,
    privileged: bool,
    indexer_available: bool,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: String,
}

fn error_response(err: &ServerError) -> Response {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = ErrorResponse {
        error: err.to_string(),
        code: err.code().as_str().to_owned(),
    };
    (status, Json(body)).into_response()
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> Response {
    let password = Zeroizing::new(request.password);
    match establish_session(&state, &request.user, &password).await {
        Ok((token, session)) => {
            let privileged = session.privileged;
            crate::supervisor::watch_session(Arc::clone(&state), session);
            info!(user = %request.user, privileged, "login succeeded");
            let cookie = format!(
                "{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Strict"
            );
            let body = LoginResponse {
                user_id: request.user,
                privileged,
                indexer_available: state.config.indexer_available(),
            };
            let mut response = (StatusCode::OK, Json(body)).into_response();
            if let Ok(value) = HeaderValue::from_str(&cookie) {
                response.headers_mut().insert(header::SET_COOKIE, value);
            }
            response
        }
        Err(err) => {
            warn!(user = %request.user, %err, "login failed");
            error_response(&err)
        }
    }
}

async fn establish_session(
    state: &Arc<AppState>,
    user: &str,
    password: &str,
) -> Result<(String, Arc<Session>), ServerError> {
    let session_id = Uuid::new_v4().to_string();
    let leaf = format!("linuxio-bridge-{session_id}.sock");

    let outcome = authc::authenticate(
        &state.config.auth_socket,
        AuthRequest::authenticate(user, password, session_id.clone(), leaf),
    )
    .await?;

    let socket_path = PathBuf::from(&outcome.socket_path);
    let mut stream = tokio::net::UnixStream::connect(&socket_path)
        .await
        .map_err(|err| {
            ServerError::AuthDaemon(format!("connect bridge {}: {err}", socket_path.display()))
        })?;
    transport::handshake::initiate(&mut stream, &session_id, &state.config.secret).await?;

    let (mux, incoming) = transport::Multiplex::client(stream);
    let privileged = outcome.mode == AuthMode::Privileged;
    let session = Arc::new(Session::new(
        session_id,
        user.to_owned(),
        privileged,
        socket_path,
        mux,
        incoming,
    ));

    let token = Uuid::new_v4().to_string();
    state.sessions.insert(Arc::clone(&session), token.clone());
    Ok((token, session))
}

async fn logout(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let Some(token) = cookie_token(&headers) else {
        return error_response(&ServerError::SessionGone);
    };
    let Some(session) = state.sessions.session_for_token(&token) else {
        return error_response(&ServerError::SessionGone);
    };

    state.sessions.teardown(&session.id).await;
    let clear = format!("{SESSION_COOKIE}=; Path=/; HttpOnly; Max-Age=0");
    let mut response = StatusCode::NO_CONTENT.into_response();
    if let Ok(value) = HeaderValue::from_str(&clear) {
        response.headers_mut().insert(header::SET_COOKIE, value);
    }
    response
}

async fn ws_upgrade(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(session) = cookie_token(&headers)
        .and_then(|token| state.sessions.session_for_token(&token))
    else {
        return error_response(&ServerError::SessionGone);
    };

    ws.on_upgrade(move |socket| relay::run(socket, session))
}

/// Extracts the session token from the Cookie header.
fn cookie_token(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    for pair in cookies.split(';') {
        let pair = pair.trim();
        if let Some(value) = pair.strip_prefix(SESSION_COOKIE) {
            if let Some(token) = value.strip_prefix('=') {
                if !token.is_empty() {
                    return Some(token.to_owned());
                }
            }
        }
    }
    None
}
