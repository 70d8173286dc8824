mod response;
mod token;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use sqlx::mysql::MySqlPool;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::Settings;
use crate::errors::InstallError;
use crate::mysql::engine::SshShellProvider;
use crate::mysql::mode::Mode;
use crate::mysql::parameter::{MySQLServer, PmmClient};
use crate::mysql::repository::{MySqlRepository, OperationStore};
use crate::mysql::service::InstallService;
use response::{error_response, message_response, InstallResponse, INFO_HEALTH_PING, INFO_HEALTH_STATUS};

const INSTALL_SUCCESS_MESSAGE: &str = "install mysql server completed";

const ERR_GET_OPERATION: u32 = 404_001;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub pool: MySqlPool,
}

pub fn router(state: AppState) -> Router {
    let write_timeout = Duration::from_secs(state.settings.server.write_timeout);

    Router::new()
        .route("/api/v1/mysql/install", post(install))
        .route("/api/v1/mysql/operation/:id", get(get_operation))
        .route("/status", get(status))
        .route("/api/v1/health/ping", get(ping))
        .layer(axum::middleware::from_fn_with_state(state.clone(), token::token_auth))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(write_timeout))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct InstallRequest {
    #[serde(default)]
    pub token: String,
    pub mode: Mode,
    pub addrs: Vec<String>,
    #[serde(default)]
    pub mysql_server_param: MySQLServer,
    #[serde(default)]
    pub pmm_client_param: PmmClient,
}

async fn install(State(state): State<AppState>, Json(request): Json<InstallRequest>) -> Response {
    let repository = MySqlRepository::new(state.pool.clone());
    let service = InstallService::new(&repository, Arc::new(SshShellProvider), &state.settings);

    match service
        .install(request.mode, &request.addrs, request.mysql_server_param, request.pmm_client_param)
        .await
    {
        Ok(report) => Json(InstallResponse {
            version: report.version,
            mode: report.mode.into(),
            addrs: serde_json::to_string(&report.addrs).unwrap_or_default(),
            message: INSTALL_SUCCESS_MESSAGE.to_string(),
        })
        .into_response(),
        Err(err) => {
            error!("install mysql server failed: {err}");
            install_error_response(&state.settings, &err)
        }
    }
}

fn install_error_response(settings: &Settings, err: &InstallError) -> Response {
    error_response(settings, err.code(), err.to_string(), format!("{err:?}"))
}

/// Audit read-through: one operation row plus its per-host detail rows.
async fn get_operation(State(state): State<AppState>, Path(id): Path<u64>) -> Response {
    let repository = MySqlRepository::new(state.pool.clone());

    let operation = match repository.get_operation(id).await {
        Ok(Some(operation)) => operation,
        Ok(None) => {
            return error_response(&state.settings, ERR_GET_OPERATION, format!("operation {id} does not exist"), String::new());
        }
        Err(err) => {
            return error_response(&state.settings, ERR_GET_OPERATION, format!("get operation {id} failed: {err}"), String::new());
        }
    };
    let details = match repository.get_details(id).await {
        Ok(details) => details,
        Err(err) => {
            return error_response(&state.settings, ERR_GET_OPERATION, format!("get operation {id} details failed: {err}"), String::new());
        }
    };

    Json(serde_json::json!({
        "operation": operation,
        "details": details,
    }))
    .into_response()
}

async fn status() -> Response {
    message_response(INFO_HEALTH_STATUS, "health: check status completed")
}

async fn ping() -> Response {
    message_response(INFO_HEALTH_PING, "health: ping completed")
}
