//! HTTP handlers: service descriptor, health probe, login, and the guarded dataset routes.

use axum::{extract::Path, extract::Query, extract::State, Json};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::auth;
use crate::data_store::resolve_table;
use crate::error::AppError;
use crate::state::AppState;

pub async fn root() -> Json<Value> {
    Json(json!({
        "message": "Suprema Gateway - Logistics API",
        "status": "online",
        "version": "3.0.0",
        "authentication": {
            "required": true,
            "login_endpoint": "/login",
            "token_type": "Bearer",
        },
        "rate_limits": {
            "backing_store": "redis",
            "policies": "policy database",
            "logs": "policy database",
        },
        "endpoints": [
            "/carteira-logistica",
            "/mov-estoque-logistica",
            "/docas-logistica",
            "/pedidos-romaneio-logistica",
            "/carregamento-logistica",
            "/faturamento-logistica",
        ],
    }))
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    match state.data_store.health_check().await {
        Ok(()) => Json(json!({"status": "healthy"})),
        Err(e) => Json(json!({"status": "unhealthy", "error": e.to_string()})),
    }
}

#[derive(Deserialize)]
pub struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    access_token: String,
    token_type: String,
    role: String,
    expires_at: String,
}

pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let user = state
        .policy_store
        .find_admin_user(&body.username)
        .await?
        .ok_or(AppError::BadCredentials)?;

    let role = auth::authorize_role(&user)?;
    auth::verify_password(&body.password, &user.password_hash)?;

    let (token, expires_at) = state.sessions.issue(&user.username, role);

    Ok(Json(LoginResponse {
        access_token: token,
        token_type: "bearer".to_string(),
        role: role.to_string(),
        expires_at: expires_at.to_rfc3339(),
    }))
}

#[derive(Deserialize)]
pub struct TableQuery {
    limit: Option<i64>,
    #[serde(default)]
    offset: i64,
    status_filter: Option<String>,
}

/// Shared by all six `/<dataset>` routes; the gate middleware has already admitted the
/// request by the time a handler runs.
pub async fn dataset(
    Path(route_segment): Path<String>,
    Query(query): Query<TableQuery>,
    State(state): State<AppState>,
) -> Result<Json<Value>, AppError> {
    let table = resolve_table(&route_segment)
        .ok_or_else(|| AppError::Internal(format!("unrecognized dataset: {route_segment}")))?;

    let started = std::time::Instant::now();
    let result = state
        .data_store
        .fetch_table(table, query.limit, query.offset, query.status_filter.as_deref())
        .await?;
    let execution_time = started.elapsed().as_secs_f64();
    let count = result.rows.len();

    Ok(Json(json!({
        "success": true,
        "table": table,
        "data": result.rows,
        "count": count,
        "execution_time": execution_time,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "strategy_used": "robust_cleaning",
        "data_info": {
            "columns_count": result.columns_count,
            "problematic_columns": Vec::<String>::new(),
            "original_row_count": result.original_row_count,
        },
    })))
}
