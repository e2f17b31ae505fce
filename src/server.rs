//! HTTP surface of the gateway.
//!
//! * `GET /add/{hostname}/{key}` registers a node on the review line.
//! * `GET /rename/{hostname}/{key}/{proof}` moves a key to a new hostname.
//! * `GET /challenge/{hostname}` returns the text a rename proof signs.
//! * `GET /lookup/{key}` lists the hostnames holding a key.
//! * `POST /deploy` is the CI webhook that promotes review to production.
//!
//! Handlers only translate between HTTP and the registry/deploy
//! components; all status codes come from [`GatewayError`].

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use log::{info, warn};
use tokio::net::TcpListener;

use crate::auth::AuthStrategy;
use crate::deploy::DeploymentOrchestrator;
use crate::error::{GatewayError, Result};
use crate::registry::PeerRegistry;
use crate::types::{DeployPayload, PromoteOutcome, Registration};

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<PeerRegistry>,
    pub auth: Arc<AuthStrategy>,
    pub deploy: Arc<DeploymentOrchestrator>,
    pub site: String,
    pub production_branch: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/add/:hostname/:key", get(add_handler))
        .route("/rename/:hostname/:key/:proof", get(rename_handler))
        .route("/challenge/:hostname", get(challenge_handler))
        .route("/lookup/:key", get(lookup_handler))
        .route("/deploy", post(deploy_handler))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn run_http_server(
    bind_addr: SocketAddr,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;
    info!("HTTP server listening on {}", bind_addr);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

fn confirmation(registration: &Registration) -> String {
    match &registration.renamed_from {
        Some(old) => format!("Info: Changed {} to {}", old, registration.hostname),
        None => format!(
            "Info: Added {} for {}",
            registration.key, registration.hostname
        ),
    }
}

async fn add_handler(
    State(state): State<AppState>,
    Path((hostname, key)): Path<(String, String)>,
) -> Result<String> {
    let registration = state.registry.add_or_rename(&hostname, &key, None).await?;
    Ok(confirmation(&registration))
}

async fn rename_handler(
    State(state): State<AppState>,
    Path((hostname, key, proof)): Path<(String, String, String)>,
) -> Result<String> {
    let registration = state
        .registry
        .add_or_rename(&hostname, &key, Some(&proof))
        .await?;
    Ok(confirmation(&registration))
}

async fn challenge_handler(
    State(state): State<AppState>,
    Path(hostname): Path<String>,
) -> Result<axum::response::Response> {
    match state.registry.challenge_for(&hostname).await? {
        Some(challenge) => Ok(challenge.into_response()),
        None => Ok((
            StatusCode::NOT_FOUND,
            format!("Error: no challenge for {hostname}"),
        )
            .into_response()),
    }
}

async fn lookup_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<axum::response::Response> {
    let hostnames = state.registry.find_hostnames_for_key(&key).await?;
    if hostnames.is_empty() {
        return Ok((StatusCode::NOT_FOUND, "Error: key not registered").into_response());
    }
    let mut body = hostnames.into_iter().collect::<Vec<_>>().join("\n");
    body.push('\n');
    Ok(body.into_response())
}

async fn deploy_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<String> {
    let payload = extract_payload(&headers, &body);

    if let Err(e) = state.auth.authenticate(&headers, &payload).await {
        warn!("deploy request rejected: {}", e);
        return Err(e.into());
    }

    let payload: DeployPayload = serde_json::from_slice(&payload)
        .map_err(|e| GatewayError::BadPayload(e.to_string()))?;

    match state.deploy.promote(&payload).await? {
        PromoteOutcome::Skipped { state: build_state } => Ok(format!(
            "Info: build state {build_state:?}, nothing deployed"
        )),
        PromoteOutcome::Deployed => Ok(format!(
            "Info: deployed {} for site {}",
            state.production_branch, state.site
        )),
    }
}

/// The bytes the CI provider signed: the `payload` field of a form post,
/// or the raw body otherwise.
fn extract_payload(headers: &HeaderMap, body: &[u8]) -> Vec<u8> {
    let is_form = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/x-www-form-urlencoded"))
        .unwrap_or(false);
    if !is_form {
        return body.to_vec();
    }
    url::form_urlencoded::parse(body)
        .find(|(name, _)| name == "payload")
        .map(|(_, value)| value.into_owned().into_bytes())
        .unwrap_or_default()
}
