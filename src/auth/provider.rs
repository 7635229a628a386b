//! Generic OpenID Connect provider
//!
//! Wraps the `openidconnect` client for one configured provider:
//! - lazy discovery of provider metadata (cached after first use)
//! - authorization URL with CSRF token, nonce and PKCE challenge
//! - authorization code exchange and ID token verification

use std::sync::Arc;

use openidconnect::{
    AuthenticationFlow, AuthorizationCode, ClientId, ClientSecret, CsrfToken, IssuerUrl, Nonce,
    PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, Scope, TokenResponse,
    core::{CoreClient, CoreProviderMetadata, CoreResponseType},
};
use tokio::sync::OnceCell;
use url::Url;

use super::session::SessionUser;
use crate::config::OAuthProviderConfig;
use crate::error::AppError;

/// OIDC client with endpoints set from provider metadata
type ConfiguredCoreClient = openidconnect::Client<
    openidconnect::EmptyAdditionalClaims,
    openidconnect::core::CoreAuthDisplay,
    openidconnect::core::CoreGenderClaim,
    openidconnect::core::CoreJweContentEncryptionAlgorithm,
    openidconnect::core::CoreJsonWebKey,
    openidconnect::core::CoreAuthPrompt,
    openidconnect::StandardErrorResponse<openidconnect::core::CoreErrorResponseType>,
    openidconnect::core::CoreTokenResponse,
    openidconnect::core::CoreTokenIntrospectionResponse,
    openidconnect::core::CoreRevocableToken,
    openidconnect::core::CoreRevocationErrorResponse,
    openidconnect::EndpointSet,
    openidconnect::EndpointNotSet,
    openidconnect::EndpointNotSet,
    openidconnect::EndpointNotSet,
    openidconnect::EndpointMaybeSet,
    openidconnect::EndpointMaybeSet,
>;

/// Everything needed to redirect a user to the provider and
/// validate the callback afterwards
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: Url,
    pub csrf: String,
    pub nonce: String,
    pub pkce_verifier: Option<String>,
}

/// A configured identity provider
pub struct OidcProvider {
    config: OAuthProviderConfig,
    issuer: IssuerUrl,
    redirect_uri: RedirectUrl,
    metadata: OnceCell<Arc<CoreProviderMetadata>>,
    http_client: reqwest::Client,
}

impl OidcProvider {
    pub fn new(
        config: OAuthProviderConfig,
        redirect_uri: String,
        http_client: reqwest::Client,
    ) -> Result<Self, AppError> {
        let issuer = config
            .issuer()
            .ok_or_else(|| {
                AppError::Config(format!(
                    "discovery_url of provider '{}' has no issuer",
                    config.provider_id
                ))
            })
            .and_then(|issuer| {
                IssuerUrl::new(issuer.to_string())
                    .map_err(|e| AppError::Config(format!("Invalid issuer URL: {e}")))
            })?;

        let redirect_uri = RedirectUrl::new(redirect_uri)
            .map_err(|e| AppError::Config(format!("Invalid redirect URI: {e}")))?;

        Ok(Self {
            config,
            issuer,
            redirect_uri,
            metadata: OnceCell::new(),
            http_client,
        })
    }

    pub fn id(&self) -> &str {
        &self.config.provider_id
    }

    /// Provider metadata, discovered on first use
    async fn metadata(&self) -> Result<Arc<CoreProviderMetadata>, AppError> {
        self.metadata
            .get_or_try_init(|| async {
                tracing::info!(
                    provider = %self.config.provider_id,
                    issuer = %self.issuer.as_str(),
                    "Discovering OIDC provider"
                );

                let metadata =
                    CoreProviderMetadata::discover_async(self.issuer.clone(), &self.http_client)
                        .await
                        .map_err(|e| {
                            AppError::Discovery(format!(
                                "{}: {e:?}",
                                self.config.provider_id
                            ))
                        })?;

                Ok::<_, AppError>(Arc::new(metadata))
            })
            .await
            .cloned()
    }

    async fn client(&self) -> Result<ConfiguredCoreClient, AppError> {
        let metadata = self.metadata().await?;

        Ok(CoreClient::from_provider_metadata(
            (*metadata).clone(),
            ClientId::new(self.config.client_id.clone()),
            self.config.client_secret.clone().map(ClientSecret::new),
        )
        .set_redirect_uri(self.redirect_uri.clone()))
    }

    /// Build the provider authorization URL
    pub async fn authorization_request(&self) -> Result<AuthorizationRequest, AppError> {
        let client = self.client().await?;

        let mut request = client.authorize_url(
            AuthenticationFlow::<CoreResponseType>::AuthorizationCode,
            CsrfToken::new_random,
            Nonce::new_random,
        );

        // openidconnect always requests `openid` itself
        for scope in self.config.scopes.iter().filter(|scope| *scope != "openid") {
            request = request.add_scope(Scope::new(scope.clone()));
        }

        let pkce_verifier = if self.config.pkce {
            let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
            request = request.set_pkce_challenge(challenge);
            Some(verifier.secret().to_string())
        } else {
            None
        };

        let (url, csrf, nonce) = request.url();

        Ok(AuthorizationRequest {
            url,
            csrf: csrf.secret().to_string(),
            nonce: nonce.secret().to_string(),
            pkce_verifier,
        })
    }

    /// Exchange an authorization code and verify the returned ID token
    pub async fn exchange_code(
        &self,
        code: String,
        pkce_verifier: Option<String>,
        nonce: &str,
    ) -> Result<SessionUser, AppError> {
        let client = self.client().await?;

        let mut exchange = client
            .exchange_code(AuthorizationCode::new(code))
            .map_err(|e| AppError::Discovery(format!("token endpoint missing: {e:?}")))?;
        if let Some(verifier) = pkce_verifier {
            exchange = exchange.set_pkce_verifier(PkceCodeVerifier::new(verifier));
        }

        let token_response = exchange
            .request_async(&self.http_client)
            .await
            .map_err(|e| {
                tracing::warn!(provider = %self.config.provider_id, "Token exchange failed: {e:?}");
                AppError::TokenExchange(format!("{e:?}"))
            })?;

        let id_token = token_response
            .id_token()
            .ok_or_else(|| AppError::TokenExchange("provider returned no ID token".to_string()))?;

        let nonce = Nonce::new(nonce.to_string());
        let claims = id_token
            .claims(&client.id_token_verifier(), &nonce)
            .map_err(|e| AppError::TokenExchange(format!("ID token rejected: {e}")))?;

        let email = claims
            .email()
            .map(|email| email.as_str().to_string())
            .unwrap_or_default();
        let name = claims
            .name()
            .and_then(|name| name.get(None))
            .map(|name| name.as_str().to_string())
            .or_else(|| {
                claims
                    .preferred_username()
                    .map(|username| username.as_str().to_string())
            })
            .unwrap_or_else(|| email.clone());

        Ok(SessionUser {
            id: claims.subject().as_str().to_string(),
            name,
            email,
            email_verified: claims.email_verified().unwrap_or(false),
        })
    }
}

/// HTTP client for provider traffic
///
/// Redirects are disabled so discovery and token requests cannot be
/// bounced to another host.
pub fn build_http_client() -> Result<reqwest::Client, AppError> {
    reqwest::Client::builder()
        .user_agent(concat!("Sessiongate/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::none())
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .map_err(|e| AppError::Internal(e.into()))
}
