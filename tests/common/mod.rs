//! Common test utilities for E2E tests

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Form, Json, Router,
    extract::State,
    routing::{get, post},
};
use chrono::{Duration, Utc};
use openidconnect::{
    AccessToken, Audience, EmptyAdditionalClaims, EmptyExtraTokenFields, EndUserEmail,
    EndUserUsername, IssuerUrl, JsonWebKeyId, Nonce, PrivateSigningKey, StandardClaims,
    SubjectIdentifier,
    core::{
        CoreIdToken, CoreIdTokenClaims, CoreIdTokenFields, CoreJsonWebKeySet,
        CoreJwsSigningAlgorithm, CoreRsaPrivateSigningKey, CoreTokenResponse, CoreTokenType,
    },
};
use sessiongate::{AppState, auth, config};
use tokio::net::TcpListener;

pub const SESSION_SECRET: &str = "test-secret-key-32-bytes-long!!!";
pub const SESSION_COOKIE: &str = "sessiongate.session_token";
pub const STATE_COOKIE: &str = "sessiongate.state";

pub const CLIENT_ID: &str = "svelte-app";

/// Identity the mock provider signs into every ID token; no `name`
/// claim, so the display name falls back to the username
pub const PROVIDER_SUBJECT: &str = "7f2c9a10-5d3e";
pub const PROVIDER_USERNAME: &str = "carol";
pub const PROVIDER_EMAIL: &str = "carol@example.com";

const SIGNING_KEY_PEM: &str = include_str!("../fixtures/provider_key.pem");
const SIGNING_KEY_ID: &str = "sessiongate-test";

struct ProviderState {
    issuer: String,
    signing_key: CoreRsaPrivateSigningKey,
}

/// Minimal OpenID provider: discovery metadata, JWKS, and a token
/// endpoint issuing RS256-signed ID tokens
pub struct MockProvider {
    pub issuer: String,
}

impl MockProvider {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let issuer = format!("http://{}/realms/customers", addr);

        let metadata = serde_json::json!({
            "issuer": issuer,
            "authorization_endpoint": format!("{issuer}/protocol/openid-connect/auth"),
            "token_endpoint": format!("{issuer}/protocol/openid-connect/token"),
            "jwks_uri": format!("{issuer}/protocol/openid-connect/certs"),
            "response_types_supported": ["code"],
            "subject_types_supported": ["public"],
            "id_token_signing_alg_values_supported": ["RS256"],
            "code_challenge_methods_supported": ["S256"],
        });

        let signing_key = CoreRsaPrivateSigningKey::from_pem(
            SIGNING_KEY_PEM,
            Some(JsonWebKeyId::new(SIGNING_KEY_ID.to_string())),
        )
        .unwrap();
        let jwks = serde_json::to_value(CoreJsonWebKeySet::new(vec![
            signing_key.as_verification_key(),
        ]))
        .unwrap();

        let state = Arc::new(ProviderState {
            issuer: issuer.clone(),
            signing_key,
        });

        let app = Router::new()
            .route(
                "/realms/customers/.well-known/openid-configuration",
                get(move || {
                    let metadata = metadata.clone();
                    async move { Json(metadata) }
                }),
            )
            .route(
                "/realms/customers/protocol/openid-connect/certs",
                get(move || {
                    let jwks = jwks.clone();
                    async move { Json(jwks) }
                }),
            )
            .route(
                "/realms/customers/protocol/openid-connect/token",
                post(token_endpoint),
            )
            .with_state(state);

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { issuer }
    }

    pub fn authorization_endpoint(&self) -> String {
        format!("{}/protocol/openid-connect/auth", self.issuer)
    }
}

/// Token endpoint
///
/// The authorization code is taken as the nonce to sign into the ID
/// token, so tests pass the nonce from the authorization URL as `code`.
async fn token_endpoint(
    State(state): State<Arc<ProviderState>>,
    Form(form): Form<HashMap<String, String>>,
) -> Json<CoreTokenResponse> {
    let nonce = form.get("code").cloned().unwrap_or_default();

    let claims = CoreIdTokenClaims::new(
        IssuerUrl::new(state.issuer.clone()).unwrap(),
        vec![Audience::new(CLIENT_ID.to_string())],
        Utc::now() + Duration::seconds(300),
        Utc::now(),
        StandardClaims::new(SubjectIdentifier::new(PROVIDER_SUBJECT.to_string()))
            .set_preferred_username(Some(EndUserUsername::new(PROVIDER_USERNAME.to_string())))
            .set_email(Some(EndUserEmail::new(PROVIDER_EMAIL.to_string())))
            .set_email_verified(Some(true)),
        EmptyAdditionalClaims {},
    )
    .set_nonce(Some(Nonce::new(nonce)));

    let id_token = CoreIdToken::new(
        claims,
        &state.signing_key,
        CoreJwsSigningAlgorithm::RsaSsaPkcs1V15Sha256,
        None,
        None,
    )
    .unwrap();

    Json(CoreTokenResponse::new(
        AccessToken::new("mock-access-token".to_string()),
        CoreTokenType::Bearer,
        CoreIdTokenFields::new(Some(id_token), EmptyExtraTokenFields {}),
    ))
}

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub provider: MockProvider,
    pub client: reqwest::Client,
}

impl TestServer {
    /// Create a new test server instance backed by a mock provider
    pub async fn new() -> Self {
        let provider = MockProvider::start().await;

        let config = config::AppConfig {
            server: config::ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                domain: "localhost:5173".to_string(),
                protocol: "http".to_string(),
            },
            auth: config::AuthConfig {
                base_path: "/api/auth".to_string(),
                session_secret: SESSION_SECRET.to_string(),
                session_max_age: 604_800,
                session_update_age: 86_400,
                cookie_prefix: "sessiongate".to_string(),
                guard_provider: "keycloak".to_string(),
                cookies: config::CookiesConfig {
                    state: config::CookieAttributes {
                        same_site: config::SameSitePolicy::Lax,
                        secure: Some(false),
                    },
                },
                providers: vec![config::OAuthProviderConfig {
                    provider_id: "keycloak".to_string(),
                    client_id: CLIENT_ID.to_string(),
                    client_secret: None,
                    discovery_url: format!(
                        "{}{}",
                        provider.issuer,
                        config::DISCOVERY_SUFFIX
                    ),
                    scopes: vec![
                        "openid".to_string(),
                        "profile".to_string(),
                        "email".to_string(),
                    ],
                    pkce: true,
                    redirect_uri: Some(
                        "http://localhost:5173/api/auth/callback/keycloak".to_string(),
                    ),
                }],
            },
            logging: config::LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        };
        config.validate().unwrap();

        let state = AppState::new(config).unwrap();

        // Redirects stay visible to the tests
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let addr_str = format!("http://{}", addr);

        let app = sessiongate::build_router(state.clone());

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr: addr_str,
            state,
            provider,
            client,
        }
    }

    /// Get base URL for requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// Signed session cookie for the given user
    pub fn session_cookie(&self, user: auth::SessionUser) -> String {
        let session = auth::Session::new(user, "keycloak", 604_800);
        let token = auth::create_session_token(&session, SESSION_SECRET).unwrap();
        format!("{SESSION_COOKIE}={token}")
    }
}

/// All Set-Cookie header values of a response
pub fn set_cookies(response: &reqwest::Response) -> Vec<String> {
    response
        .headers()
        .get_all("set-cookie")
        .iter()
        .filter_map(|v| v.to_str().ok().map(ToString::to_string))
        .collect()
}

/// `name=value` of the first Set-Cookie for `name`
pub fn cookie_pair(response: &reqwest::Response, name: &str) -> Option<String> {
    let prefix = format!("{name}=");
    set_cookies(response)
        .into_iter()
        .find(|cookie| cookie.starts_with(&prefix))
        .and_then(|cookie| cookie.split(';').next().map(ToString::to_string))
}

pub fn location(response: &reqwest::Response) -> String {
    response
        .headers()
        .get("location")
        .and_then(|v| v.to_str().ok())
        .expect("location header")
        .to_string()
}

/// Value of a query parameter of an absolute URL
pub fn query_param(url: &str, key: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()?
        .query_pairs()
        .find(|(name, _)| name == key)
        .map(|(_, value)| value.into_owned())
}

/// Whether the response removes the named cookie
pub fn clears_cookie(response: &reqwest::Response, name: &str) -> bool {
    let prefix = format!("{name}=");
    set_cookies(response)
        .iter()
        .any(|cookie| cookie.starts_with(&prefix) && cookie.contains("Max-Age=0"))
}
