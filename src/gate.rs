//! Gate Middleware (C7): request entry point. Validates the bearer token, extracts the
//! endpoint path, invokes the Decision Engine, and maps verdicts to HTTP status.

use axum::{body::Body, extract::State, http::Request, middleware::Next, response::Response};

use crate::decision::Verdict;
use crate::error::AppError;
use crate::state::AppState;

const UNGUARDED_PATHS: &[&str] = &["/", "/health", "/login", "/docs", "/openapi.json"];

pub async fn gate(State(state): State<AppState>, request: Request<Body>, next: Next) -> Result<Response, AppError> {
    let path = request.uri().path().to_string();

    if UNGUARDED_PATHS.contains(&path.as_str()) {
        return Ok(next.run(request).await);
    }

    let token = extract_bearer(&request).ok_or(AppError::InvalidToken)?;
    let session = state.sessions.resolve(&token)?;

    match state
        .decision_engine
        .check(&session.username, &session.role, &path)
        .await?
    {
        Verdict::Allow => {
            let mut request = request;
            request.extensions_mut().insert(session);
            Ok(next.run(request).await)
        }
        Verdict::Blocked { retry_after_secs } => Err(AppError::RateLimited(retry_after_secs)),
        Verdict::ManuallyBlocked { retry_after_secs } => Err(AppError::ManuallyBlocked(retry_after_secs)),
    }
}

fn extract_bearer(request: &Request<Body>) -> Option<String> {
    let header = request.headers().get(axum::http::header::AUTHORIZATION)?;
    let value = header.to_str().ok()?;
    value.strip_prefix("Bearer ").map(str::to_string)
}
