// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP server assembly.
//!
//! Owns the router, the shared state handed to handlers, and the mapping
//! from platform errors to the wire error taxonomy.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tracing::info;

use crate::cluster::ClusterError;
use crate::config::Config;
use crate::error::Error;
use crate::handlers;
use crate::processor::Processor;
use crate::store::DeliveryStore;

/// Shared state for HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Agent lifecycle and command processing.
    pub processor: Arc<Processor>,
    /// Delivery store, used directly by the readiness probe.
    pub store: DeliveryStore,
}

/// An error as it appears on the wire.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    display_message: Option<String>,
}

/// Structured API error mapped to a status code and JSON body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    display_message: Option<String>,
}

impl ApiError {
    /// 400 with code `bad_request`.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "bad_request",
            message: message.into(),
            display_message: None,
        }
    }

    /// 401 with code `unauthorized`.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            code: "unauthorized",
            message: message.into(),
            display_message: None,
        }
    }

    /// 404 with code `not_found`.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "not_found",
            message: message.into(),
            display_message: None,
        }
    }

    /// 503 with code `service_unavailable`.
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            code: "service_unavailable",
            message: message.into(),
            display_message: None,
        }
    }

    /// 500 with code `internal_server_error`.
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal_server_error",
            message: message.into(),
            display_message: None,
        }
    }

    /// Attach a user-facing display message.
    pub fn with_display_message(mut self, display_message: impl Into<String>) -> Self {
        self.display_message = Some(display_message.into());
        self
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        match &error {
            Error::Cluster(ClusterError::NotFound(_)) => Self::not_found(error.to_string()),
            Error::Cluster(ClusterError::AlreadyExists(_)) => Self::bad_request(error.to_string()),
            Error::Cluster(_) => Self::service_unavailable(error.to_string()),
            Error::AgentClient(_) => Self::service_unavailable(error.to_string()),
            _ => Self::internal(error.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.code,
            message: self.message,
            display_message: self.display_message,
        };
        (self.status, Json(body)).into_response()
    }
}

/// Build the API router.
pub fn router(state: AppState, config: &Config) -> Router {
    let mut app = Router::new()
        .route(
            "/api/v1/agents",
            post(handlers::create_agent).get(handlers::list_agents),
        )
        .route(
            "/api/v1/agents/:id",
            get(handlers::get_agent).delete(handlers::delete_agent),
        )
        .route("/api/v1/agents/:id/messages", post(handlers::send_message))
        .route("/api/v1/agents/:id/interrupt", post(handlers::interrupt))
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        .layer(TimeoutLayer::new(config.write_timeout))
        .with_state(state);

    if !config.cors_origins.is_empty() {
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        app = app.layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    app
}

/// Serve the API until `shutdown` resolves, then drain gracefully.
pub async fn serve(
    config: Config,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let app = router(state, &config);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}
