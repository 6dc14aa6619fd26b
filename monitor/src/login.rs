//! Session restoration and login against the VRChat API.
//!
//! The notification pipeline needs the `auth` cookie of a logged-in session.
//! [`SessionManager::restore`] tries the cached session first and falls back to
//! a password login with the stored credentials. The stored `twoFactorAuth`
//! cookie is replayed on that login, so a device that already passed
//! verification is not asked for a code again.
//!
//! Second-factor codes come from a caller-supplied closure; the binary prompts
//! on the terminal, tests answer directly.

use std::future::Future;
use std::io;

use tracing::{debug, error, info, warn};

use crate::auth::{AuthError, AuthOutcome, AuthProvider, HttpAuthProvider, SecondFactorKind};
use crate::credentials::{CredentialStore, Credentials, Session};
use crate::error::Result;

/// Logs in against one API endpoint and keeps the session in a store.
#[derive(Debug)]
pub struct SessionManager<S> {
    api_url: String,
    user_agent: String,
    store: S,
}

impl<S: CredentialStore> SessionManager<S> {
    /// Creates a manager for `api_url` that persists into `store`.
    #[must_use]
    pub fn new(api_url: impl Into<String>, user_agent: impl Into<String>, store: S) -> Self {
        Self {
            api_url: api_url.into(),
            user_agent: user_agent.into(),
            store,
        }
    }

    /// Returns the backing store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns a usable session, or `None` when not logged in or the stored
    /// credentials were rejected.
    ///
    /// A cached session that cannot be checked because the API is unreachable
    /// is returned unchecked.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written, a login
    /// request fails, or `ask_code` fails.
    pub async fn restore<F, Fut>(&self, ask_code: F) -> Result<Option<Session>>
    where
        F: FnMut(SecondFactorKind) -> Fut,
        Fut: Future<Output = io::Result<String>>,
    {
        let cached = self.store.load_session()?;

        if let Some(session) = &cached {
            let provider = self.provider()?.with_session(session);
            match provider.resume().await {
                Ok(AuthOutcome::Authenticated { display_name, .. }) => {
                    info!(user = %display_name, "Session restored");
                    return self.keep(&provider).map(Some);
                }
                Ok(outcome) => debug!(outcome = ?outcome, "Cached session rejected"),
                Err(e) => {
                    warn!(error = %e, "Could not verify cached session, using it anyway");
                    return Ok(Some(session.clone()));
                }
            }
        }

        let Some(credentials) = self.store.load()? else {
            warn!("Not logged in, run `vrcnotif login` to enable notification chimes");
            return Ok(None);
        };

        let two_factor = cached.and_then(|session| session.two_factor);
        self.authenticate(&credentials, two_factor.as_deref(), ask_code)
            .await
    }

    /// Logs in with new credentials and stores them with the session.
    ///
    /// Returns `None` if the API rejected the login; nothing is stored then.
    ///
    /// # Errors
    ///
    /// Same as [`restore`](Self::restore).
    pub async fn login<F, Fut>(&self, credentials: &Credentials, ask_code: F) -> Result<Option<Session>>
    where
        F: FnMut(SecondFactorKind) -> Fut,
        Fut: Future<Output = io::Result<String>>,
    {
        let two_factor = self
            .store
            .load_session()?
            .and_then(|session| session.two_factor);

        let session = self
            .authenticate(credentials, two_factor.as_deref(), ask_code)
            .await?;
        if session.is_some() {
            self.store.save(credentials)?;
        }
        Ok(session)
    }

    async fn authenticate<F, Fut>(
        &self,
        credentials: &Credentials,
        two_factor: Option<&str>,
        mut ask_code: F,
    ) -> Result<Option<Session>>
    where
        F: FnMut(SecondFactorKind) -> Fut,
        Fut: Future<Output = io::Result<String>>,
    {
        let provider = self.provider()?.with_two_factor(two_factor);
        let mut outcome = provider.authenticate(credentials).await?;

        loop {
            match outcome {
                AuthOutcome::Authenticated { display_name, .. } => {
                    info!(user = %display_name, "Logged in");
                    return self.keep(&provider).map(Some);
                }
                AuthOutcome::SecondFactorRequired(kind) => {
                    let code = ask_code(kind).await?;
                    outcome = provider.verify_second_factor(kind, &code).await?;
                }
                AuthOutcome::Unauthorized(reason) => {
                    error!(reason = %reason, "Login rejected");
                    return Ok(None);
                }
            }
        }
    }

    fn provider(&self) -> Result<HttpAuthProvider> {
        Ok(HttpAuthProvider::new(&self.api_url, &self.user_agent)?)
    }

    /// Saves the provider's current cookies as the session.
    fn keep(&self, provider: &HttpAuthProvider) -> Result<Session> {
        let session = provider.session().ok_or(AuthError::MissingToken)?;
        self.store.save_session(&session)?;
        Ok(session)
    }
}
