//! VRChat API authentication.
//!
//! Logging in yields the `auth` cookie that the notification pipeline accepts
//! as its access token. Accounts with two-factor authentication need a second
//! round trip; [`AuthOutcome::SecondFactorRequired`] tells the caller which
//! code to ask for.
//!
//! [`HttpAuthProvider`] talks to the REST API:
//!
//! 1. `GET {api}/auth/user` with HTTP basic auth.
//! 2. If the body lists `requiresTwoFactorAuth`, `POST
//!    {api}/auth/twofactorauth/{emailotp|totp}/verify` with the code, then
//!    repeat step 1 using the cookies collected so far.
//!
//! Cookies set by the API (`auth`, `twoFactorAuth`) are kept by the provider
//! and replayed on later requests.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{COOKIE, SET_COOKIE};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::credentials::{Credentials, Session};

/// Cookie carrying the session token.
pub const AUTH_COOKIE: &str = "auth";

/// Cookie remembering a verified second factor.
pub const TWO_FACTOR_COOKIE: &str = "twoFactorAuth";

/// HTTP request timeout.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Errors from the authentication provider.
#[derive(Error, Debug)]
pub enum AuthError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with an unexpected status.
    #[error("unexpected response: {status} - {message}")]
    UnexpectedStatus { status: u16, message: String },

    /// The response body could not be understood.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The user was authenticated but no `auth` cookie was issued.
    #[error("authenticated but no auth cookie was returned")]
    MissingToken,
}

/// Which second factor the account uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecondFactorKind {
    /// A code sent by email.
    Email,
    /// A time-based code from an authenticator app.
    Totp,
}

impl SecondFactorKind {
    /// Path segment of the verify endpoint.
    #[must_use]
    pub fn path_segment(self) -> &'static str {
        match self {
            Self::Email => "emailotp",
            Self::Totp => "totp",
        }
    }
}

impl fmt::Display for SecondFactorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Email => f.write_str("email"),
            Self::Totp => f.write_str("authenticator"),
        }
    }
}

/// Result of an authentication step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Logged in; `token` is the pipeline access token.
    Authenticated { display_name: String, token: String },

    /// A second factor must be verified before the session is usable.
    SecondFactorRequired(SecondFactorKind),

    /// The credentials, token or code were rejected.
    Unauthorized(String),
}

/// Source of pipeline access tokens.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Logs in with a username and password.
    async fn authenticate(&self, credentials: &Credentials) -> Result<AuthOutcome, AuthError>;

    /// Submits a second-factor code after [`AuthOutcome::SecondFactorRequired`].
    async fn verify_second_factor(
        &self,
        kind: SecondFactorKind,
        code: &str,
    ) -> Result<AuthOutcome, AuthError>;
}

/// Body of `GET /auth/user`. Only the fields the provider inspects.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurrentUserResponse {
    #[serde(default)]
    requires_two_factor_auth: Option<Vec<String>>,

    #[serde(default)]
    display_name: Option<String>,
}

/// Body of the verify endpoints.
#[derive(Debug, Deserialize)]
struct VerifyResponse {
    #[serde(default)]
    verified: bool,
}

/// Error envelope used by the API.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Authentication against the VRChat REST API.
pub struct HttpAuthProvider {
    client: Client,
    api_url: String,
    cookies: Mutex<BTreeMap<String, String>>,
}

impl HttpAuthProvider {
    /// Creates a provider for `api_url` (e.g. `https://api.vrchat.cloud/api/1`).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(api_url: &str, user_agent: &str) -> Result<Self, AuthError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            cookies: Mutex::new(BTreeMap::new()),
        })
    }

    /// Seeds the provider with a previously issued session token.
    #[must_use]
    pub fn with_token(self, token: &str) -> Self {
        self.set_cookie(AUTH_COOKIE, token);
        self
    }

    /// Seeds the provider with a stored session, including the
    /// `twoFactorAuth` cookie when present.
    #[must_use]
    pub fn with_session(self, session: &Session) -> Self {
        self.with_token(&session.token)
            .with_two_factor(session.two_factor.as_deref())
    }

    /// Seeds only the `twoFactorAuth` cookie, for a password login from a
    /// device that already passed verification.
    #[must_use]
    pub fn with_two_factor(self, value: Option<&str>) -> Self {
        if let Some(value) = value {
            self.set_cookie(TWO_FACTOR_COOKIE, value);
        }
        self
    }

    /// Returns the session token, if one has been issued.
    #[must_use]
    pub fn token(&self) -> Option<String> {
        self.cookie(AUTH_COOKIE)
    }

    /// Returns the current session cookies, if a token has been issued.
    #[must_use]
    pub fn session(&self) -> Option<Session> {
        Some(Session {
            token: self.token()?,
            two_factor: self.cookie(TWO_FACTOR_COOKIE),
        })
    }

    /// Checks the current session using stored cookies only.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response is not understood.
    pub async fn resume(&self) -> Result<AuthOutcome, AuthError> {
        let request = self.client.get(self.url("/auth/user"));
        self.current_user(request).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    async fn current_user(&self, request: RequestBuilder) -> Result<AuthOutcome, AuthError> {
        let response = self.send(request).await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            return Ok(AuthOutcome::Unauthorized(error_message(response).await));
        }
        if !status.is_success() {
            return Err(AuthError::UnexpectedStatus {
                status: status.as_u16(),
                message: error_message(response).await,
            });
        }

        let body: CurrentUserResponse = response
            .json()
            .await
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;

        if let Some(methods) = body.requires_two_factor_auth {
            let kind = second_factor_kind(&methods).ok_or_else(|| {
                AuthError::InvalidResponse(format!("unsupported second factor: {methods:?}"))
            })?;
            info!(method = %kind, "Two-factor authentication required");
            return Ok(AuthOutcome::SecondFactorRequired(kind));
        }

        let display_name = body
            .display_name
            .ok_or_else(|| AuthError::InvalidResponse("missing displayName".to_string()))?;
        let token = self.token().ok_or(AuthError::MissingToken)?;

        info!(user = %display_name, "Authenticated");
        Ok(AuthOutcome::Authenticated {
            display_name,
            token,
        })
    }

    /// Attaches stored cookies, sends, and records cookies from the response.
    async fn send(&self, request: RequestBuilder) -> Result<Response, AuthError> {
        let request = match self.cookie_header() {
            Some(header) => request.header(COOKIE, header),
            None => request,
        };

        let response = request.send().await?;
        debug!(status = response.status().as_u16(), url = %response.url(), "API response");

        for value in response.headers().get_all(SET_COOKIE) {
            match value.to_str().ok().and_then(parse_set_cookie) {
                Some((name, value)) => self.set_cookie(&name, &value),
                None => warn!("Ignoring malformed Set-Cookie header"),
            }
        }

        Ok(response)
    }

    fn cookie(&self, name: &str) -> Option<String> {
        self.cookies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn set_cookie(&self, name: &str, value: &str) {
        let mut cookies = self.cookies.lock().unwrap_or_else(PoisonError::into_inner);
        if value.is_empty() {
            cookies.remove(name);
        } else {
            cookies.insert(name.to_string(), value.to_string());
        }
    }

    fn cookie_header(&self) -> Option<String> {
        let cookies = self.cookies.lock().unwrap_or_else(PoisonError::into_inner);
        if cookies.is_empty() {
            return None;
        }
        Some(
            cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

#[async_trait]
impl AuthProvider for HttpAuthProvider {
    async fn authenticate(&self, credentials: &Credentials) -> Result<AuthOutcome, AuthError> {
        debug!(user = %credentials.username, "Logging in");
        let request = self
            .client
            .get(self.url("/auth/user"))
            .basic_auth(&credentials.username, Some(credentials.password.as_str()));
        self.current_user(request).await
    }

    async fn verify_second_factor(
        &self,
        kind: SecondFactorKind,
        code: &str,
    ) -> Result<AuthOutcome, AuthError> {
        let url = self.url(&format!("/auth/twofactorauth/{}/verify", kind.path_segment()));
        let response = self
            .send(self.client.post(url).json(&json!({ "code": code.trim() })))
            .await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::BAD_REQUEST {
            return Ok(AuthOutcome::Unauthorized(error_message(response).await));
        }
        if !status.is_success() {
            return Err(AuthError::UnexpectedStatus {
                status: status.as_u16(),
                message: error_message(response).await,
            });
        }

        let body: VerifyResponse = response
            .json()
            .await
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
        if !body.verified {
            return Ok(AuthOutcome::Unauthorized(
                "two-factor code was not accepted".to_string(),
            ));
        }

        debug!(method = %kind, "Second factor verified");
        self.resume().await
    }
}

/// Picks the second factor from the `requiresTwoFactorAuth` list.
fn second_factor_kind(methods: &[String]) -> Option<SecondFactorKind> {
    if methods.iter().any(|m| m == "emailOtp") {
        Some(SecondFactorKind::Email)
    } else if methods.iter().any(|m| m == "totp" || m == "otp") {
        Some(SecondFactorKind::Totp)
    } else {
        None
    }
}

/// Parses the name and value of a `Set-Cookie` header.
fn parse_set_cookie(header: &str) -> Option<(String, String)> {
    let pair = header.split(';').next()?;
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().trim_matches('"').to_string()))
}

/// Extracts the API's error message, falling back to the raw body.
async fn error_message(response: Response) -> String {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorResponse>(&text) {
        Ok(err) => err.error.message,
        Err(_) if text.is_empty() => status.to_string(),
        Err(_) => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_set_cookie() {
        assert_eq!(
            parse_set_cookie("auth=authcookie_123; Path=/; HttpOnly"),
            Some(("auth".to_string(), "authcookie_123".to_string()))
        );
        assert_eq!(
            parse_set_cookie("twoFactorAuth=\"abc\""),
            Some(("twoFactorAuth".to_string(), "abc".to_string()))
        );
        assert_eq!(parse_set_cookie("garbage"), None);
        assert_eq!(parse_set_cookie("=value"), None);
    }

    #[test]
    fn test_second_factor_kind() {
        let methods = |m: &[&str]| m.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        assert_eq!(
            second_factor_kind(&methods(&["emailOtp"])),
            Some(SecondFactorKind::Email)
        );
        assert_eq!(
            second_factor_kind(&methods(&["totp", "otp"])),
            Some(SecondFactorKind::Totp)
        );
        assert_eq!(
            second_factor_kind(&methods(&["otp"])),
            Some(SecondFactorKind::Totp)
        );
        assert_eq!(second_factor_kind(&methods(&["sms"])), None);
    }

    #[test]
    fn test_path_segments() {
        assert_eq!(SecondFactorKind::Email.path_segment(), "emailotp");
        assert_eq!(SecondFactorKind::Totp.path_segment(), "totp");
    }

    #[test]
    fn test_with_token_sets_auth_cookie() {
        let provider = HttpAuthProvider::new("https://api.example.com/api/1/", "test")
            .unwrap()
            .with_token("authcookie_1");

        assert_eq!(provider.token().as_deref(), Some("authcookie_1"));
        assert_eq!(provider.cookie_header().as_deref(), Some("auth=authcookie_1"));
        assert_eq!(provider.url("/auth/user"), "https://api.example.com/api/1/auth/user");
    }

    #[test]
    fn test_with_session_seeds_both_cookies() {
        let session = Session::new("a").with_two_factor("tf");
        let provider = HttpAuthProvider::new("https://api.example.com", "test")
            .unwrap()
            .with_session(&session);

        assert_eq!(
            provider.cookie_header().as_deref(),
            Some("auth=a; twoFactorAuth=tf")
        );
        assert_eq!(provider.session(), Some(session));
    }

    #[test]
    fn test_two_factor_alone_is_not_a_session() {
        let provider = HttpAuthProvider::new("https://api.example.com", "test")
            .unwrap()
            .with_two_factor(Some("tf"));

        assert_eq!(provider.cookie_header().as_deref(), Some("twoFactorAuth=tf"));
        assert_eq!(provider.session(), None);
    }

    #[test]
    fn test_cookie_header_is_sorted() {
        let provider = HttpAuthProvider::new("https://api.example.com", "test").unwrap();
        provider.set_cookie(TWO_FACTOR_COOKIE, "tf");
        provider.set_cookie(AUTH_COOKIE, "a");
        assert_eq!(
            provider.cookie_header().as_deref(),
            Some("auth=a; twoFactorAuth=tf")
        );

        provider.set_cookie(AUTH_COOKIE, "");
        assert_eq!(provider.token(), None);
    }
}
