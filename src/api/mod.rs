//! HTTP API server
//!
//! A thin web transport over the device: status for dashboards and a command
//! endpoint that runs text commands as the bearer token's user.

mod auth;
pub mod health;
pub mod voice;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::device::Device;
use crate::error::Outcome;
use crate::Result;

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub device: Arc<Device>,
}

/// Error body returned by every endpoint
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
}

/// An error response with its status code
#[derive(Debug)]
pub struct ApiFailure {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiFailure {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub(crate) fn unauthorized() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "Authentication required",
        )
    }
}

impl From<crate::Error> for ApiFailure {
    fn from(err: crate::Error) -> Self {
        let outcome = err.outcome();
        let status = match outcome {
            Outcome::Busy | Outcome::NotArmed | Outcome::InvalidState => StatusCode::CONFLICT,
            Outcome::HardwareError => StatusCode::INTERNAL_SERVER_ERROR,
            Outcome::Unauthorized => StatusCode::FORBIDDEN,
            Outcome::LoadFailed => StatusCode::UNPROCESSABLE_ENTITY,
            Outcome::Rejected | Outcome::Success => StatusCode::BAD_REQUEST,
        };
        Self::new(status, outcome.as_str(), err.to_string())
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let body = ApiError {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

/// API server
pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
}

impl ApiServer {
    #[must_use]
    pub fn new(device: Arc<Device>, port: u16) -> Self {
        Self {
            state: Arc::new(ApiState { device }),
            port,
        }
    }

    /// Build the router with all routes
    #[must_use]
    pub fn router(&self) -> Router {
        router(Arc::clone(&self.state))
    }

    /// Serve until the listener fails
    ///
    /// # Errors
    ///
    /// Returns error if the port cannot be bound or the server fails
    pub async fn run(self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr).await?;
        tracing::info!(addr = %addr, "API server listening");
        axum::serve(listener, self.router()).await?;
        Ok(())
    }

    /// Spawn the server on the current runtime
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.run().await {
                tracing::error!(error = %e, "API server failed");
            }
        })
    }
}

/// Router over `state`, with request tracing
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .merge(health::router())
        .nest("/api", voice::router(state))
        .layer(TraceLayer::new_for_http())
}
