//! Shared access token
//!
//! The pump and the per-job lock renewers all authenticate with the same
//! runner token and may each hit a 401 as it expires. Whoever notices
//! first re-authorizes and swaps the token in place; a racing refresh just
//! overwrites with an equally fresh token, so no coordination is needed
//! beyond the lock.

use std::future::Future;
use std::sync::{Arc, RwLock};

use tracing::info;

use gantry_client::auth::Authorizer;
use gantry_client::Result as ClientResult;
use gantry_core::agent::AccessToken;

/// An access token shared across tasks, replaced wholesale on refresh.
#[derive(Clone)]
pub struct SharedToken {
    inner: Arc<RwLock<AccessToken>>,
}

impl SharedToken {
    pub fn new(token: AccessToken) -> Self {
        Self {
            inner: Arc::new(RwLock::new(token)),
        }
    }

    /// The current bearer value.
    pub fn bearer(&self) -> String {
        self.inner.read().unwrap().access_token.clone()
    }

    pub fn replace(&self, token: AccessToken) {
        *self.inner.write().unwrap() = token;
    }
}

/// Runs one authenticated call; on a 401 re-authorizes once and retries.
///
/// Any other failure, and a 401 surviving the retry, surface to the
/// caller unchanged.
pub async fn with_auth_retry<T, F, Fut>(
    token: &SharedToken,
    authorizer: &Authorizer,
    http: &reqwest::Client,
    op: F,
) -> ClientResult<T>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = ClientResult<T>>,
{
    match op(token.bearer()).await {
        Err(e) if e.is_unauthorized() => {
            info!("access token rejected, re-authorizing");
            let fresh = authorizer.authorize(http).await?;
            token.replace(fresh);
            op(token.bearer()).await
        }
        other => other,
    }
}
