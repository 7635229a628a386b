//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration files (config/default.toml, config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::{collections::HashSet, net::IpAddr};

/// Suffix every OIDC discovery URL must carry; the issuer is what precedes it.
pub const DISCOVERY_SUFFIX: &str = "/.well-known/openid-configuration";

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 5173)
    pub port: u16,
    /// Public domain, optionally with port (e.g., "localhost:5173")
    pub domain: String,
    /// Protocol ("http" or "https")
    pub protocol: String,
}

impl ServerConfig {
    /// Get the public base URL of the application
    ///
    /// # Returns
    /// Full URL like "http://localhost:5173"
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.domain)
    }
}

/// Authentication configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Mount point of the auth handler (e.g., "/api/auth")
    pub base_path: String,
    /// Session secret key (32+ bytes)
    pub session_secret: String,
    /// Session max age in seconds (default: 604800 = 7 days)
    pub session_max_age: i64,
    /// Re-issue the session cookie once this many seconds passed since
    /// the last refresh (default: 86400 = 1 day)
    pub session_update_age: i64,
    /// Cookie name prefix (e.g., "sessiongate" gives "sessiongate.session_token")
    pub cookie_prefix: String,
    /// Provider the authorization hook signs anonymous users in with
    pub guard_provider: String,
    #[serde(default)]
    pub cookies: CookiesConfig,
    /// Generic OIDC providers
    #[serde(default)]
    pub providers: Vec<OAuthProviderConfig>,
}

/// Per-cookie attribute overrides
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CookiesConfig {
    #[serde(default)]
    pub state: CookieAttributes,
}

/// Cookie attributes
#[derive(Debug, Clone, Deserialize)]
pub struct CookieAttributes {
    #[serde(default)]
    pub same_site: SameSitePolicy,
    /// Explicit Secure flag; derived from the server URL when unset
    pub secure: Option<bool>,
}

impl Default for CookieAttributes {
    fn default() -> Self {
        Self {
            same_site: SameSitePolicy::Lax,
            secure: None,
        }
    }
}

/// SameSite cookie policy
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SameSitePolicy {
    Strict,
    #[default]
    Lax,
    None,
}

/// Generic OpenID Connect provider
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthProviderConfig {
    /// Provider id used in routes and sign-in requests (e.g., "keycloak")
    pub provider_id: String,
    pub client_id: String,
    /// Absent for public clients
    pub client_secret: Option<String>,
    /// e.g. "http://localhost:8080/realms/customers/.well-known/openid-configuration"
    pub discovery_url: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    #[serde(default = "default_pkce")]
    pub pkce: bool,
    /// Defaults to `{base_url}{base_path}/callback/{provider_id}`
    pub redirect_uri: Option<String>,
}

impl OAuthProviderConfig {
    /// Issuer URL derived from the discovery URL
    pub fn issuer(&self) -> Option<&str> {
        self.discovery_url
            .strip_suffix(DISCOVERY_SUFFIX)
            .filter(|issuer| !issuer.is_empty())
    }
}

fn default_scopes() -> Vec<String> {
    vec!["openid".to_string()]
}

fn default_pkce() -> bool {
    true
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl LoggingConfig {
    /// Default `EnvFilter` directives when `RUST_LOG` is unset
    pub fn filter(&self) -> String {
        format!(
            "sessiongate={},tower_http=debug",
            self.level.to_ascii_lowercase()
        )
    }

    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (SESSIONGATE__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 5173)?
            .set_default("server.domain", "localhost:5173")?
            .set_default("server.protocol", "http")?
            .set_default("auth.base_path", "/api/auth")?
            .set_default("auth.session_max_age", 604800)?
            .set_default("auth.session_update_age", 86400)?
            .set_default("auth.cookie_prefix", "sessiongate")?
            .set_default("auth.guard_provider", "keycloak")?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            // Load from config/default.toml if it exists
            .add_source(File::with_name("config/default").required(false))
            // Load from config/local.toml if it exists (overrides default)
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables (SESSIONGATE__*)
            .add_source(
                Environment::with_prefix("SESSIONGATE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    pub fn should_use_secure_cookies(&self) -> bool {
        self.server.protocol.eq_ignore_ascii_case("https")
            || !is_local_server_domain(&self.server.domain)
    }

    /// Redirect URI registered with the provider
    pub fn redirect_uri(&self, provider: &OAuthProviderConfig) -> String {
        provider.redirect_uri.clone().unwrap_or_else(|| {
            format!(
                "{}{}/callback/{}",
                self.server.base_url(),
                self.auth.base_path,
                provider.provider_id
            )
        })
    }

    /// Check invariants the rest of the service relies on
    pub fn validate(&self) -> Result<(), crate::error::AppError> {
        use crate::error::AppError;

        const MIN_SESSION_SECRET_BYTES: usize = 32;

        if self.auth.session_secret.len() < MIN_SESSION_SECRET_BYTES {
            return Err(AppError::Config(format!(
                "auth.session_secret must be at least {} bytes",
                MIN_SESSION_SECRET_BYTES
            )));
        }

        if self.auth.session_max_age <= 0 {
            return Err(AppError::Config(
                "auth.session_max_age must be greater than 0".to_string(),
            ));
        }

        if self.auth.session_update_age < 0 {
            return Err(AppError::Config(
                "auth.session_update_age must not be negative".to_string(),
            ));
        }

        let base_path = &self.auth.base_path;
        if !base_path.starts_with('/') || base_path.ends_with('/') {
            return Err(AppError::Config(
                "auth.base_path must start with '/' and must not end with '/'".to_string(),
            ));
        }

        if self.auth.providers.is_empty() {
            return Err(AppError::Config(
                "auth.providers must define at least one provider".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for provider in &self.auth.providers {
            if !seen.insert(provider.provider_id.as_str()) {
                return Err(AppError::Config(format!(
                    "auth.providers contains duplicate provider_id '{}'",
                    provider.provider_id
                )));
            }

            let issuer = provider.issuer().ok_or_else(|| {
                AppError::Config(format!(
                    "discovery_url of provider '{}' must end with {}",
                    provider.provider_id, DISCOVERY_SUFFIX
                ))
            })?;
            url::Url::parse(issuer).map_err(|e| {
                AppError::Config(format!(
                    "discovery_url of provider '{}' is invalid: {}",
                    provider.provider_id, e
                ))
            })?;
        }

        if !seen.contains(self.auth.guard_provider.as_str()) {
            return Err(AppError::Config(format!(
                "auth.guard_provider '{}' is not a configured provider",
                self.auth.guard_provider
            )));
        }

        const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
        if !LOG_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(AppError::Config(format!(
                "logging.level must be one of {}",
                LOG_LEVELS.join(", ")
            )));
        }

        if !matches!(self.logging.format.to_ascii_lowercase().as_str(), "pretty" | "json") {
            return Err(AppError::Config(
                "logging.format must be \"pretty\" or \"json\"".to_string(),
            ));
        }

        if !self.should_use_secure_cookies() {
            let host = normalized_server_host(&self.server.domain);
            tracing::warn!(
                host = %host,
                protocol = %self.server.protocol,
                "Using insecure session cookies for local development"
            );
        } else if !self.server.protocol.eq_ignore_ascii_case("https") {
            return Err(AppError::Config(
                "server.protocol must be https for non-local server domains".to_string(),
            ));
        }

        Ok(())
    }
}

fn normalized_server_host(domain: &str) -> String {
    let trimmed = domain.trim();
    let parsed_host = url::Url::parse(&format!("http://{trimmed}"))
        .ok()
        .and_then(|url| url.host_str().map(|host| host.to_string()));
    let host = parsed_host.unwrap_or_else(|| trimmed.to_string());
    host.trim_end_matches('.').to_ascii_lowercase()
}

fn is_local_server_domain(domain: &str) -> bool {
    let host = normalized_server_host(domain);
    if host == "localhost" || host.ends_with(".localhost") {
        return true;
    }

    // IPv6 hosts come back bracketed from the URL parser
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = bare.parse::<IpAddr>() {
        return ip.is_loopback() || ip.is_unspecified();
    }

    false
}

#[cfg(test)]
impl AppConfig {
    /// Valid local-development configuration for tests
    pub(crate) fn sample() -> Self {
        AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 5173,
                domain: "localhost:5173".to_string(),
                protocol: "http".to_string(),
            },
            auth: AuthConfig {
                base_path: "/api/auth".to_string(),
                session_secret: "x".repeat(32),
                session_max_age: 604_800,
                session_update_age: 86_400,
                cookie_prefix: "sessiongate".to_string(),
                guard_provider: "keycloak".to_string(),
                cookies: CookiesConfig {
                    state: CookieAttributes {
                        same_site: SameSitePolicy::Lax,
                        secure: Some(false),
                    },
                },
                providers: vec![OAuthProviderConfig {
                    provider_id: "keycloak".to_string(),
                    client_id: "svelte-app".to_string(),
                    client_secret: None,
                    discovery_url:
                        "http://localhost:8080/realms/customers/.well-known/openid-configuration"
                            .to_string(),
                    scopes: vec![
                        "openid".to_string(),
                        "profile".to_string(),
                        "email".to_string(),
                    ],
                    pkce: true,
                    redirect_uri: None,
                }],
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}
