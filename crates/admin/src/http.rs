//! HTTP control surface
//!
//! JSON over axum, mirroring the textual channel:
//!
//! - `GET /routes` - snapshot of the table
//! - `POST /routes` - add a route
//! - `POST /routes/{key}` - update address and/or pattern
//! - `DELETE /routes/{key}` - remove a route

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use metro_routing::{RelayError, RoutingTable, TableError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors surfaced by the HTTP control API
#[derive(Debug, Error)]
pub enum HttpError {
    /// Failed to bind the HTTP address
    #[error("failed to bind to {address}: {source}")]
    Bind {
        /// The configured HTTP address
        address: String,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Server error while serving
    #[error("HTTP server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// One route in API responses
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouteEntry {
    pub key: String,
    pub pattern: String,
    pub addr: String,
    pub spool: bool,
}

/// Body for `POST /routes`
#[derive(Debug, Deserialize)]
struct AddRouteBody {
    key: String,
    #[serde(default)]
    pattern: String,
    addr: String,
    #[serde(default)]
    spool: bool,
}

/// Body for `POST /routes/{key}`
#[derive(Debug, Deserialize)]
struct UpdateRouteBody {
    addr: Option<String>,
    pattern: Option<String>,
}

/// JSON error payload
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Table errors mapped onto HTTP statuses
struct ApiError(TableError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            TableError::DuplicateKey { .. } => StatusCode::CONFLICT,
            TableError::UnknownKey { .. } => StatusCode::NOT_FOUND,
            TableError::Relay(RelayError::Pattern { .. }) => StatusCode::BAD_REQUEST,
            TableError::Relay(RelayError::Resolve { .. })
            | TableError::Relay(RelayError::Dial { .. }) => StatusCode::BAD_GATEWAY,
            TableError::Relay(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(ErrorBody {
            error: self.0.to_string(),
        });
        (status, body).into_response()
    }
}

#[derive(Clone)]
struct HttpState {
    table: Arc<RoutingTable>,
}

/// Build the control API router
pub fn router(table: Arc<RoutingTable>) -> Router {
    Router::new()
        .route("/routes", get(list_routes).post(add_route))
        .route("/routes/{key}", axum::routing::post(update_route).delete(delete_route))
        .with_state(HttpState { table })
}

/// Bind `addr` and serve the control API until cancellation
pub async fn serve_http(
    addr: &str,
    table: Arc<RoutingTable>,
    cancel: CancellationToken,
) -> Result<(), HttpError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| HttpError::Bind {
            address: addr.to_string(),
            source: e,
        })?;

    tracing::info!(address = %addr, "HTTP admin listening");

    axum::serve(listener, router(table))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .map_err(HttpError::Serve)?;

    tracing::info!("HTTP admin stopped");
    Ok(())
}

async fn list_routes(State(state): State<HttpState>) -> Json<Vec<RouteEntry>> {
    let routes = state
        .table
        .snapshot()
        .await
        .into_iter()
        .map(|r| RouteEntry {
            key: r.key,
            pattern: r.pattern,
            addr: r.addr,
            spool: r.spool,
        })
        .collect();
    Json(routes)
}

async fn add_route(
    State(state): State<HttpState>,
    Json(body): Json<AddRouteBody>,
) -> Result<StatusCode, ApiError> {
    state
        .table
        .add(&body.key, &body.pattern, &body.addr, body.spool)
        .await
        .map_err(ApiError)?;
    Ok(StatusCode::CREATED)
}

async fn update_route(
    State(state): State<HttpState>,
    Path(key): Path<String>,
    Json(body): Json<UpdateRouteBody>,
) -> Result<StatusCode, ApiError> {
    state
        .table
        .update(&key, body.addr.as_deref(), body.pattern.as_deref())
        .await
        .map_err(ApiError)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_route(
    State(state): State<HttpState>,
    Path(key): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.table.remove(&key).await.map_err(ApiError)?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
#[path = "http_test.rs"]
mod http_test;
