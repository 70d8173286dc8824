use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use serde_json::Value;

use super::response::error_response;
use super::AppState;
use crate::config::Settings;

const TOKEN_FIELD: &str = "token";

const SAFE_PATH_PREFIXES: [&str; 4] = ["/status", "/api/v1/health/", "/swagger", "/debug/pprof/"];

const ERR_GET_RAW_DATA: u32 = 400_002;
const ERR_TOKEN_FIELD_MISSING: u32 = 400_003;
const ERR_VALIDATE_TOKEN: u32 = 401_001;

const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Body-token authentication. The request body is buffered, optionally
/// unwrapped from the configured alternative body path, checked against the
/// token table, and handed to the handler in its unwrapped form.
pub async fn token_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    if is_safe_path(&state.settings, &path) {
        return next.run(request).await;
    }

    let (parts, body) = request.into_parts();
    let raw = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(raw) => raw,
        Err(err) => {
            return error_response(&state.settings, ERR_GET_RAW_DATA, format!("cannot read request body: {err}"), String::new());
        }
    };

    let raw = unwrap_alternative_body(&state.settings.server.router.alternative_body_path, raw);

    let token = match extract_token(&raw) {
        Some(token) => token,
        None => {
            return error_response(
                &state.settings,
                ERR_TOKEN_FIELD_MISSING,
                format!("field {TOKEN_FIELD} does not exist or is not a string"),
                String::new(),
            );
        }
    };

    let tokens = match fetch_tokens(&state).await {
        Ok(tokens) => tokens,
        Err(err) => {
            return error_response(&state.settings, ERR_VALIDATE_TOKEN, format!("cannot load tokens: {err}"), String::new());
        }
    };
    if !tokens.contains(&token) {
        return error_response(&state.settings, ERR_VALIDATE_TOKEN, format!("token {token} is not valid"), String::new());
    }

    let request = Request::from_parts(parts, Body::from(raw));
    next.run(request).await
}

pub fn is_safe_path(settings: &Settings, path: &str) -> bool {
    if SAFE_PATH_PREFIXES.iter().any(|prefix| path.starts_with(prefix)) {
        return true;
    }

    let base = &settings.server.router.alternative_base_path;
    if !base.is_empty() {
        return SAFE_PATH_PREFIXES
            .iter()
            .any(|prefix| path.starts_with(&format!("{base}{prefix}")));
    }

    false
}

/// When `alternative_body_path` points at a nested value, that value becomes
/// the effective request body: verbatim for JSON strings, re-serialised for
/// objects. Anything else leaves the body untouched.
pub fn unwrap_alternative_body(body_path: &str, raw: Bytes) -> Bytes {
    if body_path.is_empty() {
        return raw;
    }

    let Ok(value) = serde_json::from_slice::<Value>(&raw) else {
        return raw;
    };

    let pointer = format!("/{}", body_path.split('.').collect::<Vec<_>>().join("/"));
    match value.pointer(&pointer) {
        Some(Value::String(inner)) => Bytes::from(inner.clone()),
        Some(inner @ Value::Object(_)) => Bytes::from(inner.to_string()),
        _ => raw,
    }
}

pub fn extract_token(raw: &[u8]) -> Option<String> {
    let value = serde_json::from_slice::<Value>(raw).ok()?;

    value.get(TOKEN_FIELD)?.as_str().map(|token| token.to_string())
}

async fn fetch_tokens(state: &AppState) -> Result<Vec<String>, sqlx::Error> {
    let rows: Vec<(String,)> = sqlx::query_as("SELECT token FROM t_sys_token_info WHERE del_flag = 0")
        .fetch_all(&state.pool)
        .await?;

    Ok(rows.into_iter().map(|(token,)| token).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_paths_bypass_token_check() {
        let settings = Settings::default();

        assert!(is_safe_path(&settings, "/status"));
        assert!(is_safe_path(&settings, "/api/v1/health/ping"));
        assert!(is_safe_path(&settings, "/swagger/index.html"));
        assert!(is_safe_path(&settings, "/debug/pprof/heap"));
        assert!(!is_safe_path(&settings, "/api/v1/mysql/install"));
    }

    #[test]
    fn test_safe_paths_under_alternative_base_path() {
        let mut settings = Settings::default();
        settings.server.router.alternative_base_path = "/dbforge".to_string();

        assert!(is_safe_path(&settings, "/dbforge/status"));
        assert!(is_safe_path(&settings, "/dbforge/api/v1/health/ping"));
        assert!(!is_safe_path(&settings, "/dbforge/api/v1/mysql/install"));
    }

    #[test]
    fn test_unwrap_alternative_body_object() {
        let raw = Bytes::from(r#"{"wrapper":{"token":"T","mode":1,"addrs":["h:3306"]}}"#);

        let unwrapped = unwrap_alternative_body("wrapper", raw);
        let value: Value = serde_json::from_slice(&unwrapped).unwrap();
        assert_eq!(value["token"], "T");
        assert_eq!(value["mode"], 1);
    }

    #[test]
    fn test_unwrap_alternative_body_nested_string() {
        let raw = Bytes::from(r#"{"outer":{"inner":"{\"token\":\"T\"}"}}"#);

        let unwrapped = unwrap_alternative_body("outer.inner", raw);
        assert_eq!(extract_token(&unwrapped), Some("T".to_string()));
    }

    #[test]
    fn test_unwrap_alternative_body_missing_path_keeps_body() {
        let raw = Bytes::from(r#"{"token":"T"}"#);

        let unwrapped = unwrap_alternative_body("wrapper", raw.clone());
        assert_eq!(unwrapped, raw);
    }

    #[test]
    fn test_extract_token() {
        assert_eq!(extract_token(br#"{"token":"abc","mode":1}"#), Some("abc".to_string()));
        assert_eq!(extract_token(br#"{"mode":1}"#), None);
        assert_eq!(extract_token(br#"{"token":42}"#), None);
        assert_eq!(extract_token(b"not json"), None);
    }
}
