//! Authentication middleware
//!
//! Two hooks run in order on every request:
//! 1. `attach_session` parses (and refreshes) the session cookie
//! 2. `require_session` redirects anonymous users to the identity
//!    provider and exposes the current user to handlers

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{StatusCode, header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use serde::Serialize;

use super::service::SignInRequest;
use super::session::Session;
use crate::AppState;
use crate::error::AppError;

/// Request-local projection of the signed-in user
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: String,
    pub name: String,
    pub email: String,
}

impl From<&Session> for CurrentUser {
    fn from(session: &Session) -> Self {
        Self {
            id: session.user.id.clone(),
            name: session.user.name.clone(),
            email: session.user.email.clone(),
        }
    }
}

/// Session attachment hook
///
/// Verifies the session cookie and adds the `Session` to request
/// extensions. Stale sessions are re-issued; invalid cookies are
/// cleared on the way out.
///
/// # Usage
/// ```ignore
/// let app = Router::new()
///     .route("/", ...)
///     .layer(middleware::from_fn_with_state(state, attach_session));
/// ```
pub async fn attach_session(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let auth = &state.auth;

    let Some(session) = auth.get_session(request.headers()) else {
        let stale_cookie = auth.has_session_cookie(request.headers());
        let response = next.run(request).await;
        if stale_cookie {
            let jar = CookieJar::new().add(auth.cookies().clear_session_cookie());
            return Ok(with_session_cookie(response, jar, &auth.cookies().session_name));
        }
        return Ok(response);
    };

    match auth.refresh_session(&session)? {
        Some((refreshed, jar)) => {
            request.extensions_mut().insert(refreshed);
            let response = next.run(request).await;
            Ok(with_session_cookie(response, jar, &auth.cookies().session_name))
        }
        None => {
            request.extensions_mut().insert(session);
            Ok(next.run(request).await)
        }
    }
}

/// Apply the hook's session cookie unless the handler already set one
/// (sign-in callback, sign-out).
fn with_session_cookie(response: Response, jar: CookieJar, cookie_name: &str) -> Response {
    let prefix = format!("{cookie_name}=");
    let handler_set_cookie = response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| value.starts_with(&prefix));

    if handler_set_cookie {
        response
    } else {
        (jar, response).into_response()
    }
}

/// Authorization hook
///
/// Without a session, starts a sign-in with the guard provider using
/// the current request URL as callback and answers 302. With one,
/// inserts `CurrentUser` into request extensions and continues.
pub async fn require_session(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let auth = &state.auth;

    let session = match request.extensions().get::<Session>() {
        Some(session) => Some(session.clone()),
        None => auth.get_session(request.headers()),
    };

    let Some(session) = session else {
        let path_and_query = request
            .uri()
            .path_and_query()
            .map(|p| p.as_str())
            .unwrap_or("/");
        let callback_url = auth.request_url(path_and_query);

        let sign_in = auth
            .sign_in_social(SignInRequest {
                provider: auth.guard_provider().to_string(),
                callback_url: Some(callback_url),
            })
            .await?;

        return Ok((
            StatusCode::FOUND,
            sign_in.jar,
            [(header::LOCATION, sign_in.url.to_string())],
        )
            .into_response());
    };

    request
        .extensions_mut()
        .insert(CurrentUser::from(&session));

    Ok(next.run(request).await)
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    /// Extract the user inserted by `require_session`
    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or(AppError::Unauthorized)
    }
}
