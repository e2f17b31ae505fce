//! Error types for the gateway.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Failures of the versioned store collaborator.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` failed ({status}): {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("failed to remove {path}: {source}")]
    Remove {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("merging {from} into {into} did not complete cleanly: {detail}")]
    MergeConflict {
        from: String,
        into: String,
        detail: String,
    },
}

/// Failures of the daemon reload collaborator.
#[derive(Error, Debug)]
pub enum ReloadError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` failed ({status}): {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },
}

/// Reasons a deploy webhook is not accepted.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("missing {0} header")]
    MissingHeader(&'static str),

    #[error("credential mismatch")]
    Mismatch,

    #[error("malformed signature: {0}")]
    MalformedSignature(String),

    #[error("signature verification failed")]
    BadSignature,

    #[error("could not obtain trust anchor key: {0}")]
    TrustAnchor(String),
}

/// Service-level error taxonomy; every variant maps to one status class.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Error: {0}")]
    InvalidInput(String),

    #[error("Warning: The same key does already exist for {hostname}")]
    DuplicateRegistration { hostname: String },

    #[error("Error: Key is linked to another hostname ({hostname}). Sign the challenge.")]
    KeyOwnershipConflict { hostname: String },

    #[error("Error: Key is linked to more than one hostname: {}", .hostnames.join(", "))]
    RegistryInconsistent { hostnames: Vec<String> },

    #[error("Error: registry write failed: {0}")]
    RegistryWriteFailed(#[source] StoreError),

    #[error("Error: {0}")]
    MergeConflict(#[source] StoreError),

    #[error("Error: daemon reload failed: {0}")]
    ReloadFailed(#[from] ReloadError),

    #[error("Error: unauthorized: {0}")]
    Unauthorized(#[from] AuthError),

    #[error("Error: bad payload: {0}")]
    BadPayload(String),

    #[error("Error: peer storage: {0}")]
    Storage(#[from] std::io::Error),
}

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::MergeConflict { .. } => GatewayError::MergeConflict(err),
            other => GatewayError::RegistryWriteFailed(other),
        }
    }
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::InvalidInput(_) | GatewayError::BadPayload(_) => StatusCode::BAD_REQUEST,
            GatewayError::DuplicateRegistration { .. }
            | GatewayError::KeyOwnershipConflict { .. }
            | GatewayError::RegistryInconsistent { .. } => StatusCode::CONFLICT,
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::RegistryWriteFailed(_)
            | GatewayError::MergeConflict(_)
            | GatewayError::ReloadFailed(_)
            | GatewayError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        (self.status_code(), self.to_string()).into_response()
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
