//! Auth cookie names and attributes

use axum_extra::extract::cookie::{Cookie, SameSite};

use crate::config::{AppConfig, SameSitePolicy};

/// Lifetime of the OAuth state cookie (10 minutes)
pub const STATE_MAX_AGE_SECS: i64 = 600;

impl From<SameSitePolicy> for SameSite {
    fn from(policy: SameSitePolicy) -> Self {
        match policy {
            SameSitePolicy::Strict => SameSite::Strict,
            SameSitePolicy::Lax => SameSite::Lax,
            SameSitePolicy::None => SameSite::None,
        }
    }
}

/// Builds the session and state cookies with consistent attributes
#[derive(Debug, Clone)]
pub struct CookieSettings {
    pub session_name: String,
    pub state_name: String,
    session_secure: bool,
    state_same_site: SameSite,
    state_secure: bool,
}

impl CookieSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let secure = config.should_use_secure_cookies();
        let state = &config.auth.cookies.state;

        Self {
            session_name: format!("{}.session_token", config.auth.cookie_prefix),
            state_name: format!("{}.state", config.auth.cookie_prefix),
            session_secure: secure,
            state_same_site: state.same_site.into(),
            state_secure: state.secure.unwrap_or(secure),
        }
    }

    /// Session cookie carrying a signed session token
    pub fn session_cookie(&self, token: String, max_age_secs: i64) -> Cookie<'static> {
        build(
            self.session_name.clone(),
            token,
            max_age_secs,
            SameSite::Lax,
            self.session_secure,
        )
    }

    /// State cookie carrying the signed OAuth round-trip state
    pub fn state_cookie(&self, token: String) -> Cookie<'static> {
        build(
            self.state_name.clone(),
            token,
            STATE_MAX_AGE_SECS,
            self.state_same_site,
            self.state_secure,
        )
    }

    pub fn clear_session_cookie(&self) -> Cookie<'static> {
        build(
            self.session_name.clone(),
            String::new(),
            0,
            SameSite::Lax,
            self.session_secure,
        )
    }

    pub fn clear_state_cookie(&self) -> Cookie<'static> {
        build(
            self.state_name.clone(),
            String::new(),
            0,
            self.state_same_site,
            self.state_secure,
        )
    }
}

fn build(
    name: String,
    value: String,
    max_age_secs: i64,
    same_site: SameSite,
    secure: bool,
) -> Cookie<'static> {
    Cookie::build((name, value))
        .http_only(true)
        .secure(secure)
        .same_site(same_site)
        .path("/")
        .max_age(time::Duration::seconds(max_age_secs))
        .build()
}
