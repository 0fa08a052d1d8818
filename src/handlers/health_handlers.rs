//! Health handler.
//!
//! `GET /healthz/` is wired to orchestration liveness probes: it passes only
//! when storage answers and at least one snippet exists. An empty content
//! table means a broken deployment, so it fails the probe.

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;

pub async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    let (db_ok, count, db_error) = match state.snippets.count_snippets().await {
        Ok(count) => (true, count, None),
        Err(err) => (false, 0, Some(err.to_string())),
    };
    let content_ok = count > 0;

    let mut checks = HashMap::new();
    checks.insert(
        "database",
        CheckStatus {
            ok: db_ok,
            error: db_error,
        },
    );
    checks.insert(
        "content",
        CheckStatus {
            ok: content_ok,
            error: (!content_ok && db_ok).then(|| "no snippets exist".to_string()),
        },
    );

    let overall_ok = db_ok && content_ok;
    let body = HealthResponse {
        status: if overall_ok { "ok".into() } else { "error".into() },
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}
