//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that probes the object store

use crate::{services::StorageService, store::ListParams};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;

/// `GET /healthz`
///
/// Very small liveness probe — always returns 200 OK with a plain JSON body.
/// This endpoint should be cheap and never perform I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Readiness probe: a one-key listing of the configured bucket. This touches
/// the metadata database of the local store and fails when the bucket is
/// gone.
///
/// HTTP 200 when the check passes, HTTP 503 otherwise.
pub async fn readyz(State(service): State<StorageService>) -> impl IntoResponse {
    let store_check = match service
        .store()
        .list(service.bucket(), ListParams::probe(""))
        .await
    {
        Ok(_) => (true, None::<String>),
        Err(e) => (false, Some(format!("error: {}", e))),
    };

    let overall_ok = store_check.0;

    let mut checks = HashMap::new();
    checks.insert(
        "store",
        CheckStatus {
            ok: store_check.0,
            error: store_check.1,
        },
    );

    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
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
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}
