use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::Mutex;

use crate::oauth::{OAuthClient, OAuthError};

const DEFAULT_REFRESH_SKEW: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("no access token and no refresh credentials configured")]
    MissingCredentials,
    #[error("access token refresh failed: {0}")]
    Refresh(#[from] OAuthError),
}

struct TokenState {
    access_token: Option<String>,
    /// `None` when the lifetime is unknown; such a token is used until the
    /// API rejects it.
    expires_at: Option<Instant>,
    refresh_token: Option<String>,
}

/// Hands out a bearer token for each Drive request, refreshing it through
/// the OAuth refresh-token grant shortly before it expires.
pub struct TokenProvider {
    oauth: Option<OAuthClient>,
    state: Mutex<TokenState>,
    refresh_skew: Duration,
}

impl TokenProvider {
    /// A token that is never refreshed.
    pub fn fixed(access_token: impl Into<String>) -> Self {
        Self {
            oauth: None,
            state: Mutex::new(TokenState {
                access_token: Some(access_token.into()),
                expires_at: None,
                refresh_token: None,
            }),
            refresh_skew: DEFAULT_REFRESH_SKEW,
        }
    }

    /// Refreshes through `oauth`. `access_token` is used first if given.
    pub fn refreshing(
        oauth: OAuthClient,
        refresh_token: impl Into<String>,
        access_token: Option<String>,
    ) -> Self {
        Self {
            oauth: Some(oauth),
            state: Mutex::new(TokenState {
                access_token,
                expires_at: None,
                refresh_token: Some(refresh_token.into()),
            }),
            refresh_skew: DEFAULT_REFRESH_SKEW,
        }
    }

    pub fn with_refresh_skew(mut self, skew: Duration) -> Self {
        self.refresh_skew = skew;
        self
    }

    pub fn can_refresh(&self) -> bool {
        self.oauth.is_some()
    }

    pub async fn access_token(&self) -> Result<String, TokenError> {
        let mut state = self.state.lock().await;
        let expiring = state
            .expires_at
            .is_some_and(|at| at <= Instant::now() + self.refresh_skew);
        if !expiring || self.oauth.is_none() {
            if let Some(token) = &state.access_token {
                return Ok(token.clone());
            }
        }
        self.refresh_locked(&mut state).await
    }

    /// Discards the current token and fetches a new one.
    pub async fn refresh_now(&self) -> Result<String, TokenError> {
        let mut state = self.state.lock().await;
        self.refresh_locked(&mut state).await
    }

    async fn refresh_locked(&self, state: &mut TokenState) -> Result<String, TokenError> {
        let (Some(oauth), Some(refresh_token)) = (&self.oauth, state.refresh_token.as_deref())
        else {
            return Err(TokenError::MissingCredentials);
        };
        let token = oauth.refresh_token(refresh_token).await?;
        tracing::debug!(expires_in = ?token.expires_in, "drive access token refreshed");

        state.expires_at = token
            .expires_in
            .map(|secs| Instant::now() + Duration::from_secs(secs));
        if let Some(rotated) = token.refresh_token {
            state.refresh_token = Some(rotated);
        }
        state.access_token = Some(token.access_token.clone());
        Ok(token.access_token)
    }
}
