//! Protected application routes
//!
//! Everything here sits behind `require_session`; handlers read the
//! signed-in user through the `CurrentUser` extractor.

use axum::{
    Json, Router,
    extract::State,
    response::{Html, IntoResponse},
    routing::get,
};

use crate::AppState;
use crate::auth::CurrentUser;
use crate::error::AppError;

/// Create application router
///
/// Routes:
/// - GET /        - Greeting page
/// - GET /api/me  - Current user as JSON
///
/// Unmatched paths fall back to a 404, still behind the guard.
pub fn app_router() -> Router<AppState> {
    Router::new()
        .route("/", get(home))
        .route("/api/me", get(me))
        .fallback(not_found)
}

/// GET /
async fn home(State(state): State<AppState>, user: CurrentUser) -> impl IntoResponse {
    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Sessiongate</title></head>
<body>
    <h1>Hello, {}</h1>
    <p>Signed in as {}</p>
    <form method="post" action="{}/sign-out"><button>Sign out</button></form>
</body>
</html>
"#,
        html_escape::encode_text(&user.name),
        html_escape::encode_text(&user.email),
        state.auth.base_path(),
    ))
}

/// GET /api/me
async fn me(user: CurrentUser) -> Json<CurrentUser> {
    Json(user)
}

async fn not_found() -> AppError {
    AppError::NotFound
}
