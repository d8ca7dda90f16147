//! HTTP request handlers.

use super::types::{
    bearer_token, ClientInfo, DeliveriesResponse, FormOrJson, HealthResponse, RegisterRequest,
    RegisterResponse, RegistrationsResponse,
};
use super::validate::validate_registration;
use super::AppState;
use crate::error::ApiError;
use crate::service::RegistrationSummary;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::Response,
    Json,
};
use chrono::{SecondsFormat, Utc};
use std::any::Any;
use tracing::{error, info};

/// Health check endpoint.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK".to_string(),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        uptime: state.started_at.elapsed().as_secs_f64(),
    })
}

/// Submit a registration.
pub async fn register(
    State(state): State<AppState>,
    client: ClientInfo,
    FormOrJson(request): FormOrJson<RegisterRequest>,
) -> Result<Json<RegisterResponse>, ApiError> {
    let registration = validate_registration(request, client)?;
    info!(
        role = %registration.details.role(),
        client_ip = registration.ip_address.as_deref().unwrap_or("unknown"),
        "Registration request received"
    );

    let outcome = state.service.submit(registration).await?;

    Ok(Json(RegisterResponse {
        success: true,
        message: "Registration completed successfully".to_string(),
        id: outcome.id,
        webhook_status: outcome.webhook_status,
    }))
}

/// Public status of one registration.
pub async fn get_registration(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RegistrationSummary>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(state.service.get(id).await?))
}

/// List every registration, newest first. Admin only.
pub async fn list_registrations(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<RegistrationsResponse>, ApiError> {
    let registrations = state.service.list_all(bearer_token(&headers)).await?;

    Ok(Json(RegistrationsResponse {
        total: registrations.len(),
        registrations,
    }))
}

/// Webhook attempts recorded for one registration. Admin only.
pub async fn list_deliveries(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<DeliveriesResponse>, ApiError> {
    let credential = bearer_token(&headers);
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(not_found) => {
            // Unauthenticated callers learn nothing about ids
            state.service.authorize(credential)?;
            return Err(not_found);
        }
    };
    let deliveries = state.service.delivery_log(id, credential).await?;

    Ok(Json(DeliveriesResponse {
        registration_id: id,
        deliveries,
    }))
}

/// Fallback for unknown API routes.
pub async fn api_not_found() -> ApiError {
    ApiError::EndpointNotFound
}

/// Ids that are not integers cannot exist.
fn parse_id(raw: &str) -> Result<i64, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::NotFound(raw.to_string()))
}

/// Response for a handler that panicked.
pub fn panic_response(expose_details: bool, panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "Unknown panic".to_string()
    };
    error!(panic = %detail, "Handler panicked");

    let body = serde_json::json!({
        "error": "Internal server error",
        "message": if expose_details { detail.as_str() } else { "Something went wrong" },
    });

    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}
