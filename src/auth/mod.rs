//! OpenID Connect session authentication
//!
//! Handles:
//! - Generic OIDC providers (discovery, PKCE, code exchange)
//! - Signed cookie sessions
//! - Session attachment and authorization middleware
//! - The catch-all auth route

pub mod cookies;
mod handler;
mod middleware;
pub mod provider;
pub mod service;
pub mod session;
pub mod signing;

pub use handler::{auth_router, handle_auth_request};
pub use middleware::{CurrentUser, attach_session, require_session};
pub use service::{Auth, SignIn, SignInRequest};
pub use session::{Session, SessionUser, create_session_token, verify_session_token};
