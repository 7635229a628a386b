//! Catch-all auth route
//!
//! Every request under the auth base path (GET or POST) lands in
//! `handle_auth_request`, which dispatches on method and sub-path.

use axum::{
    Json, Router,
    extract::{Path, Query, Request, State},
    http::{Method, StatusCode, Uri, header},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use axum_extra::extract::CookieJar;
use serde::{Deserialize, Serialize};

use super::service::{CallbackOutcome, CallbackQuery, SignInRequest};
use super::session::{Session, SessionUser};
use crate::AppState;
use crate::error::AppError;

/// Largest accepted auth request body
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Create authentication router
///
/// Binds `GET` and `POST` on `{base_path}`, `{base_path}/` and
/// `{base_path}/*path`; a wildcard alone never matches an empty rest.
pub fn auth_router(base_path: &str) -> Router<AppState> {
    let handler = get(handle_auth_request).post(handle_auth_request);
    Router::new()
        .route(base_path, handler.clone())
        .route(&format!("{base_path}/"), handler.clone())
        .route(&format!("{base_path}/*path"), handler)
}

/// Session payload returned by `get-session`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    session: SessionSummary,
    user: SessionUser,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionSummary {
    id: String,
    user_id: String,
    provider_id: String,
    created_at: chrono::DateTime<chrono::Utc>,
    expires_at: chrono::DateTime<chrono::Utc>,
}

impl From<Session> for SessionResponse {
    fn from(session: Session) -> Self {
        Self {
            session: SessionSummary {
                id: session.id,
                user_id: session.user.id.clone(),
                provider_id: session.provider_id,
                created_at: session.created_at,
                expires_at: session.expires_at,
            },
            user: session.user,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorQuery {
    error: Option<String>,
}

/// Generic auth handler
///
/// Routes:
/// - GET  ok                                  - liveness of the auth handler
/// - GET/POST get-session                     - current session or null
/// - POST sign-in/social, sign-in/oauth2      - start provider sign-in
/// - GET  callback/{id}, oauth2/callback/{id} - provider callback
/// - POST sign-out                            - clear session
/// - GET  error                               - error page
pub async fn handle_auth_request(
    State(state): State<AppState>,
    path: Option<Path<String>>,
    jar: CookieJar,
    request: Request,
) -> Result<Response, AppError> {
    let method = request.method().clone();
    let path = path.map(|Path(path)| path).unwrap_or_default();
    let path = path.trim_matches('/');
    tracing::debug!(%method, path, "Auth request");

    if method == Method::GET {
        if let Some(provider_id) = callback_provider(path) {
            return Ok(handle_callback(&state, provider_id, &jar, request.uri()).await);
        }
    }

    match (method, path) {
        (Method::GET, "ok") => Ok(Json(serde_json::json!({ "ok": true })).into_response()),

        (Method::GET | Method::POST, "get-session") => {
            let session = state.auth.get_session(request.headers());
            Ok(Json(session.map(SessionResponse::from)).into_response())
        }

        (Method::POST, "sign-in/social" | "sign-in/oauth2") => {
            let body = axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES)
                .await
                .map_err(|e| AppError::Validation(format!("Unreadable request body: {e}")))?;
            let sign_in_request: SignInRequest = serde_json::from_slice(&body)
                .map_err(|e| AppError::Validation(format!("Invalid sign-in request: {e}")))?;

            let sign_in = state.auth.sign_in_social(sign_in_request).await?;
            Ok((
                sign_in.jar,
                Json(serde_json::json!({
                    "url": sign_in.url.as_str(),
                    "redirect": true,
                })),
            )
                .into_response())
        }

        (Method::POST, "sign-out") => {
            if let Some(session) = state.auth.get_session(request.headers()) {
                tracing::info!(session_id = %session.id, user_id = %session.user.id, "User signed out");
            }
            Ok((
                state.auth.sign_out(),
                Json(serde_json::json!({ "success": true })),
            )
                .into_response())
        }

        (Method::GET, "error") => {
            let query = Query::<ErrorQuery>::try_from_uri(request.uri())
                .map(|Query(query)| query.error)
                .ok()
                .flatten()
                .unwrap_or_else(|| "unknown_error".to_string());
            Ok((StatusCode::UNAUTHORIZED, error_page(&query)).into_response())
        }

        _ => Err(AppError::NotFound),
    }
}

/// Provider callback
///
/// Any failure clears the state cookie so a stale round-trip cannot be
/// replayed.
async fn handle_callback(
    state: &AppState,
    provider_id: &str,
    jar: &CookieJar,
    uri: &Uri,
) -> Response {
    let outcome = match Query::<CallbackQuery>::try_from_uri(uri) {
        Ok(Query(query)) => state.auth.handle_callback(provider_id, query, jar).await,
        Err(e) => Err(AppError::Validation(format!("Invalid callback query: {e}"))),
    };

    match outcome {
        Ok(CallbackOutcome::SignedIn { jar, redirect_to }) => {
            (jar, found(&redirect_to)).into_response()
        }
        Ok(CallbackOutcome::ProviderError { jar, error }) => {
            let location = format!(
                "{}/error?error={}",
                state.auth.base_path(),
                urlencoding::encode(&error)
            );
            (jar, found(&location)).into_response()
        }
        Err(error) => {
            let cleared = CookieJar::new().add(state.auth.cookies().clear_state_cookie());
            (cleared, error).into_response()
        }
    }
}

/// Provider id of a callback sub-path
fn callback_provider(path: &str) -> Option<&str> {
    path.strip_prefix("callback/")
        .or_else(|| path.strip_prefix("oauth2/callback/"))
        .filter(|id| !id.is_empty() && !id.contains('/'))
}

fn found(location: &str) -> impl IntoResponse + '_ {
    (StatusCode::FOUND, [(header::LOCATION, location)])
}

fn error_page(error: &str) -> Html<String> {
    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Sign-in failed</title></head>
<body>
    <h1>Sign-in failed</h1>
    <p>{}</p>
    <a href="/">Try again</a>
</body>
</html>
"#,
        html_escape::encode_text(error)
    ))
}
