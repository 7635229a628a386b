//! Auth facade
//!
//! The single entry point hooks and the auth route handler talk to:
//! session lookup, provider sign-in, OAuth callback, sign-out.

use std::collections::HashMap;

use axum::http::HeaderMap;
use axum_extra::extract::CookieJar;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use super::cookies::{CookieSettings, STATE_MAX_AGE_SECS};
use super::provider::{OidcProvider, build_http_client};
use super::session::{Session, create_session_token, verify_session_token};
use super::signing;
use crate::config::AppConfig;
use crate::error::AppError;

/// Request to start a provider sign-in
#[derive(Debug, Clone, Deserialize)]
pub struct SignInRequest {
    #[serde(alias = "providerId")]
    pub provider: String,
    /// Where to send the user after the callback; defaults to "/"
    #[serde(rename = "callbackURL", default)]
    pub callback_url: Option<String>,
}

/// Result of a sign-in request
#[derive(Debug, Clone)]
pub struct SignIn {
    /// Provider authorization URL to redirect the user to
    pub url: Url,
    /// Round-trip state to set on the response
    pub jar: CookieJar,
}

/// OAuth round-trip state, kept in a signed cookie
#[derive(Debug, Clone, Serialize, Deserialize)]
struct OAuthState {
    csrf: String,
    nonce: String,
    pkce_verifier: Option<String>,
    callback_url: String,
    provider_id: String,
    expires_at: DateTime<Utc>,
}

/// Query parameters of the provider callback
#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Outcome of a provider callback
#[derive(Debug)]
pub enum CallbackOutcome {
    /// Session established; redirect to the stored callback URL
    SignedIn { jar: CookieJar, redirect_to: String },
    /// Provider reported an error
    ProviderError { jar: CookieJar, error: String },
}

/// Authentication service shared by all requests
pub struct Auth {
    providers: HashMap<String, OidcProvider>,
    cookies: CookieSettings,
    secret: String,
    session_max_age: i64,
    session_update_age: i64,
    base_url: Url,
    base_path: String,
    guard_provider: String,
}

impl Auth {
    /// Build the service from validated configuration
    ///
    /// Providers are not contacted here; discovery happens on first use.
    pub fn new(config: &AppConfig) -> Result<Self, AppError> {
        let http_client = build_http_client()?;

        let mut providers = HashMap::new();
        for provider in &config.auth.providers {
            let redirect_uri = config.redirect_uri(provider);
            tracing::debug!(
                provider = %provider.provider_id,
                redirect_uri = %redirect_uri,
                "Registering OIDC provider"
            );
            providers.insert(
                provider.provider_id.clone(),
                OidcProvider::new(provider.clone(), redirect_uri, http_client.clone())?,
            );
        }

        let base_url = Url::parse(&config.server.base_url())
            .map_err(|e| AppError::Config(format!("Invalid server base URL: {e}")))?;

        Ok(Self {
            providers,
            cookies: CookieSettings::from_config(config),
            secret: config.auth.session_secret.clone(),
            session_max_age: config.auth.session_max_age,
            session_update_age: config.auth.session_update_age,
            base_url,
            base_path: config.auth.base_path.clone(),
            guard_provider: config.auth.guard_provider.clone(),
        })
    }

    pub fn cookies(&self) -> &CookieSettings {
        &self.cookies
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Provider the authorization hook signs anonymous users in with
    pub fn guard_provider(&self) -> &str {
        &self.guard_provider
    }

    /// Absolute URL of a request target on this application
    pub fn request_url(&self, path_and_query: &str) -> String {
        match self.base_url.join(path_and_query) {
            Ok(url) => url.to_string(),
            Err(_) => self.base_url.to_string(),
        }
    }

    /// Current session from request headers, if any
    pub fn get_session(&self, headers: &HeaderMap) -> Option<Session> {
        let jar = CookieJar::from_headers(headers);
        let token = jar.get(&self.cookies.session_name)?.value();
        match verify_session_token(token, &self.secret) {
            Ok(session) => Some(session),
            Err(error) => {
                tracing::debug!(%error, "Ignoring invalid session cookie");
                None
            }
        }
    }

    /// Whether the request carries a session cookie at all
    pub fn has_session_cookie(&self, headers: &HeaderMap) -> bool {
        CookieJar::from_headers(headers)
            .get(&self.cookies.session_name)
            .is_some()
    }

    /// Re-issue a session whose cookie is older than the update age
    ///
    /// Returns the refreshed session and its cookie, or `None` when the
    /// session is still fresh.
    pub fn refresh_session(
        &self,
        session: &Session,
    ) -> Result<Option<(Session, CookieJar)>, AppError> {
        if !session.needs_refresh(self.session_update_age) {
            return Ok(None);
        }

        let refreshed = session.clone().refreshed(self.session_max_age);
        let jar = self.issue_session(&refreshed)?;
        tracing::debug!(session_id = %refreshed.id, "Session refreshed");
        Ok(Some((refreshed, jar)))
    }

    fn issue_session(&self, session: &Session) -> Result<CookieJar, AppError> {
        let token = create_session_token(session, &self.secret)?;
        Ok(CookieJar::new().add(self.cookies.session_cookie(token, self.session_max_age)))
    }

    /// Start a sign-in with the given provider
    ///
    /// # Errors
    /// `ProviderNotFound` for unknown providers, `Validation` for
    /// untrusted callback URLs, `Discovery` when the provider is
    /// unreachable.
    pub async fn sign_in_social(&self, request: SignInRequest) -> Result<SignIn, AppError> {
        let provider = self.provider(&request.provider)?;

        let requested = request.callback_url.as_deref().unwrap_or("/");
        let callback_url = self
            .resolve_callback(requested)
            .ok_or_else(|| {
                AppError::Validation(format!("Untrusted callback URL: {requested:?}"))
            })?
            .to_string();

        let authorization = provider.authorization_request().await?;

        let state = OAuthState {
            csrf: authorization.csrf,
            nonce: authorization.nonce,
            pkce_verifier: authorization.pkce_verifier,
            callback_url,
            provider_id: provider.id().to_string(),
            expires_at: Utc::now() + Duration::seconds(STATE_MAX_AGE_SECS),
        };
        let token = signing::sign(&state, &self.secret)?;

        tracing::info!(
            provider = %state.provider_id,
            callback_url = %state.callback_url,
            "Starting provider sign-in"
        );

        Ok(SignIn {
            url: authorization.url,
            jar: CookieJar::new().add(self.cookies.state_cookie(token)),
        })
    }

    /// Complete a sign-in from the provider callback
    ///
    /// # Steps
    /// 1. Surface provider errors
    /// 2. Verify the state cookie and CSRF token
    /// 3. Exchange the code (with PKCE verifier) and verify the ID token
    /// 4. Create the session cookie and clear the state cookie
    pub async fn handle_callback(
        &self,
        provider_id: &str,
        query: CallbackQuery,
        jar: &CookieJar,
    ) -> Result<CallbackOutcome, AppError> {
        let provider = self.provider(provider_id)?;
        let cleared = CookieJar::new().add(self.cookies.clear_state_cookie());

        if let Some(error) = query.error {
            tracing::warn!(
                provider = %provider_id,
                error = %error,
                description = ?query.error_description,
                "Provider returned an error"
            );
            return Ok(CallbackOutcome::ProviderError {
                jar: cleared,
                error,
            });
        }

        let state = self.verify_state(jar, provider_id, query.state.as_deref())?;
        let code = query
            .code
            .ok_or_else(|| AppError::Validation("Missing authorization code".to_string()))?;

        let user = provider
            .exchange_code(code, state.pkce_verifier, &state.nonce)
            .await?;

        let session = Session::new(user, provider_id, self.session_max_age);
        tracing::info!(
            provider = %provider_id,
            user_id = %session.user.id,
            session_id = %session.id,
            "User signed in"
        );

        let token = create_session_token(&session, &self.secret)?;
        let jar = cleared.add(self.cookies.session_cookie(token, self.session_max_age));

        Ok(CallbackOutcome::SignedIn {
            jar,
            redirect_to: state.callback_url,
        })
    }

    /// Clear the session cookie
    pub fn sign_out(&self) -> CookieJar {
        CookieJar::new().add(self.cookies.clear_session_cookie())
    }

    fn provider(&self, provider_id: &str) -> Result<&OidcProvider, AppError> {
        self.providers
            .get(provider_id)
            .ok_or_else(|| AppError::ProviderNotFound(provider_id.to_string()))
    }

    fn verify_state(
        &self,
        jar: &CookieJar,
        provider_id: &str,
        csrf: Option<&str>,
    ) -> Result<OAuthState, AppError> {
        let token = jar
            .get(&self.cookies.state_name)
            .ok_or(AppError::InvalidState)?
            .value();
        let state: OAuthState =
            signing::verify(token, &self.secret).map_err(|_| AppError::InvalidState)?;

        if state.expires_at < Utc::now()
            || state.provider_id != provider_id
            || csrf != Some(state.csrf.as_str())
        {
            return Err(AppError::InvalidState);
        }

        Ok(state)
    }

    /// Absolute callback URL on our own origin
    ///
    /// Accepts `/`-relative paths and absolute URLs. Both are resolved
    /// the way a browser would before the origin is compared, so the
    /// returned URL is safe to send back as `Location`.
    pub fn resolve_callback(&self, callback_url: &str) -> Option<Url> {
        if callback_url.chars().any(char::is_control) {
            return None;
        }

        let resolved = if callback_url.starts_with('/') {
            self.base_url.join(callback_url).ok()?
        } else {
            Url::parse(callback_url).ok()?
        };

        (resolved.origin() == self.base_url.origin()).then_some(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::session::SessionUser;

    const SECRET: &str = "test-secret-key-32-bytes-long!!!";

    fn config() -> AppConfig {
        let mut config = AppConfig::sample();
        config.auth.session_secret = SECRET.to_string();
        config.auth.providers[0].discovery_url =
            "http://127.0.0.1:1/realms/customers/.well-known/openid-configuration".to_string();
        config
    }

    fn headers_with_cookie(cookie: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::COOKIE, cookie.parse().unwrap());
        headers
    }

    fn user() -> SessionUser {
        SessionUser {
            id: "user-1".to_string(),
            name: "Alice".to_string(),
            email: "alice@example.com".to_string(),
            email_verified: true,
        }
    }

    fn resolved(auth: &Auth, callback_url: &str) -> Option<String> {
        auth.resolve_callback(callback_url).map(String::from)
    }

    #[test]
    fn resolves_relative_and_same_origin_callbacks() {
        let auth = Auth::new(&config()).unwrap();
        assert_eq!(resolved(&auth, "/").as_deref(), Some("http://localhost:5173/"));
        assert_eq!(
            resolved(&auth, "/dashboard?tab=1").as_deref(),
            Some("http://localhost:5173/dashboard?tab=1")
        );
        assert_eq!(
            resolved(&auth, "http://localhost:5173/orders").as_deref(),
            Some("http://localhost:5173/orders")
        );
    }

    #[test]
    fn rejects_foreign_callbacks() {
        let auth = Auth::new(&config()).unwrap();
        for callback_url in [
            "https://evil.example.com/",
            "//evil.example.com/path",
            "/\\evil.example.com/path",
            "http://localhost:8080/",
            "dashboard",
        ] {
            assert_eq!(resolved(&auth, callback_url), None, "{callback_url:?}");
        }
    }

    #[test]
    fn rejects_callbacks_browsers_would_rewrite_off_origin() {
        let auth = Auth::new(&config()).unwrap();
        for callback_url in [
            "/\t/evil.example.com",
            "/\n/evil.example.com",
            "/\r\n/evil.example.com/path",
            "/orders\u{0}",
        ] {
            assert_eq!(resolved(&auth, callback_url), None, "{callback_url:?}");
        }
    }

    #[tokio::test]
    async fn sign_in_rejects_control_characters_before_discovery() {
        let auth = Auth::new(&config()).unwrap();
        let result = auth
            .sign_in_social(SignInRequest {
                provider: "keycloak".to_string(),
                callback_url: Some("/\t/evil.example.com".to_string()),
            })
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[test]
    fn request_url_joins_base_url() {
        let auth = Auth::new(&config()).unwrap();
        assert_eq!(
            auth.request_url("/orders?page=2"),
            "http://localhost:5173/orders?page=2"
        );
    }

    #[test]
    fn get_session_reads_signed_cookie() {
        let auth = Auth::new(&config()).unwrap();
        let session = Session::new(user(), "keycloak", 3600);
        let token = create_session_token(&session, SECRET).unwrap();

        let headers = headers_with_cookie(&format!("sessiongate.session_token={token}"));
        let found = auth.get_session(&headers).expect("session");
        assert_eq!(found.user, user());
    }

    #[test]
    fn get_session_ignores_forged_cookie() {
        let auth = Auth::new(&config()).unwrap();
        let session = Session::new(user(), "keycloak", 3600);
        let token = create_session_token(&session, "another-secret-key-32-bytes-long").unwrap();

        let headers = headers_with_cookie(&format!("sessiongate.session_token={token}"));
        assert!(auth.get_session(&headers).is_none());
        assert!(auth.has_session_cookie(&headers));
    }

    #[test]
    fn refresh_session_only_when_stale() {
        let auth = Auth::new(&config()).unwrap();
        let mut session = Session::new(user(), "keycloak", 604_800);
        assert!(auth.refresh_session(&session).unwrap().is_none());

        session.updated_at = Utc::now() - Duration::days(2);
        let (refreshed, jar) = auth.refresh_session(&session).unwrap().expect("refreshed");
        assert!(refreshed.expires_at > session.expires_at);
        assert!(jar.get("sessiongate.session_token").is_some());
    }

    #[tokio::test]
    async fn sign_in_rejects_unknown_provider() {
        let auth = Auth::new(&config()).unwrap();
        let result = auth
            .sign_in_social(SignInRequest {
                provider: "github".to_string(),
                callback_url: None,
            })
            .await;
        assert!(matches!(result, Err(AppError::ProviderNotFound(_))));
    }

    #[tokio::test]
    async fn sign_in_rejects_untrusted_callback_before_discovery() {
        let auth = Auth::new(&config()).unwrap();
        let result = auth
            .sign_in_social(SignInRequest {
                provider: "keycloak".to_string(),
                callback_url: Some("https://evil.example.com/".to_string()),
            })
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn callback_requires_matching_state() {
        let auth = Auth::new(&config()).unwrap();
        let state = OAuthState {
            csrf: "expected".to_string(),
            nonce: "nonce".to_string(),
            pkce_verifier: None,
            callback_url: "/".to_string(),
            provider_id: "keycloak".to_string(),
            expires_at: Utc::now() + Duration::seconds(60),
        };
        let token = signing::sign(&state, SECRET).unwrap();
        let jar = CookieJar::from_headers(&headers_with_cookie(&format!(
            "sessiongate.state={token}"
        )));

        let query = CallbackQuery {
            code: Some("code".to_string()),
            state: Some("other".to_string()),
            ..Default::default()
        };
        let result = auth.handle_callback("keycloak", query, &jar).await;
        assert!(matches!(result, Err(AppError::InvalidState)));

        let result = auth
            .handle_callback("keycloak", CallbackQuery::default(), &CookieJar::new())
            .await;
        assert!(matches!(result, Err(AppError::InvalidState)));
    }

    #[tokio::test]
    async fn callback_surfaces_provider_error() {
        let auth = Auth::new(&config()).unwrap();
        let query = CallbackQuery {
            error: Some("access_denied".to_string()),
            ..Default::default()
        };

        let outcome = auth
            .handle_callback("keycloak", query, &CookieJar::new())
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            CallbackOutcome::ProviderError { error, .. } if error == "access_denied"
        ));
    }
}
