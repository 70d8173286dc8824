use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;

use crate::config::Settings;

pub const INFO_HEALTH_STATUS: u32 = 201_001;
pub const INFO_HEALTH_PING: u32 = 201_002;

#[derive(Debug, Serialize)]
pub struct InstallResponse {
    pub version: String,
    pub mode: u8,
    /// JSON-encoded address array, as the audit API reports it
    pub addrs: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub code: u32,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: u32,
    pub message: String,
    pub trace: String,
}

pub fn message_response(code: u32, message: &str) -> Response {
    Json(MessageResponse {
        code,
        message: message.to_string(),
    })
    .into_response()
}

/// Error envelope with the configured HTTP status (200 or 500).
pub fn error_response(settings: &Settings, code: u32, message: String, trace: String) -> Response {
    let status = StatusCode::from_u16(settings.server.router.http_error_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    (status, Json(ErrorResponse { code, message, trace })).into_response()
}
