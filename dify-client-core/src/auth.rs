//! Console token lifecycle.
//!
//! The console API authenticates with an access token, a refresh token and a
//! CSRF token. They arrive either in the JSON body of the login/refresh
//! response or, depending on the server version, only as `Set-Cookie`
//! headers. [`process_login_result`] prefers the body and falls back to the
//! cookies.
//!
//! [`TokenManager`] owns the current [`TokenState`] and runs calls through
//! [`TokenManager::execute_with_retry`]: a call rejected with 401 triggers
//! one refresh (or a fresh login if the refresh fails) and one retry.
//!
//! # Examples
//!
//! ```
//! use dify_client_core::auth::{extract_token, process_login_result};
//!
//! let line = "__Host-access_token=tok1; Path=/; Secure; HttpOnly";
//! assert_eq!(extract_token(line, "access_token").as_deref(), Some("tok1"));
//!
//! let cookies = vec!["access_token=tok1; refresh_token=tok2; csrf_token=tok3".to_string()];
//! let tokens = process_login_result(None, &cookies);
//! assert_eq!(tokens.access_token(), Some("tok1"));
//! assert_eq!(tokens.refresh_token(), Some("tok2"));
//! assert_eq!(tokens.csrf_token(), Some("tok3"));
//! ```

use crate::{
    error::{Error, Result},
    headers,
    request::RequestSpecBuilder,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DefaultOnNull, NoneAsEmptyString};
use std::{
    fmt,
    future::Future,
    sync::{Arc, PoisonError, RwLock},
};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Cookie carrying the access token.
pub const ACCESS_TOKEN: &str = "access_token";
/// Cookie carrying the refresh token.
pub const REFRESH_TOKEN: &str = "refresh_token";
/// Cookie carrying the CSRF token.
pub const CSRF_TOKEN: &str = "csrf_token";
/// Prefix of cookies restricted to the exact host and to secure transports.
pub const HOST_PREFIX: &str = "__Host-";

/// The three console tokens. Empty values are stored as `None`.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct TokenState {
    access_token: Option<String>,
    refresh_token: Option<String>,
    csrf_token: Option<String>,
}

impl fmt::Debug for TokenState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = |v: &Option<String>| v.as_ref().map(|_| "***");
        f.debug_struct("TokenState")
            .field("access_token", &shown(&self.access_token))
            .field("refresh_token", &shown(&self.refresh_token))
            .field("csrf_token", &shown(&self.csrf_token))
            .finish()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl TokenState {
    pub fn new(
        access_token: Option<String>,
        refresh_token: Option<String>,
        csrf_token: Option<String>,
    ) -> Self {
        Self {
            access_token: non_empty(access_token),
            refresh_token: non_empty(refresh_token),
            csrf_token: non_empty(csrf_token),
        }
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    pub fn csrf_token(&self) -> Option<&str> {
        self.csrf_token.as_deref()
    }

    /// Whether no token at all is present.
    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none() && self.csrf_token.is_none()
    }

    /// Adds the bearer header, the CSRF header and the token cookies
    /// (plain and `__Host-` prefixed) to a request.
    pub fn apply(&self, builder: RequestSpecBuilder) -> RequestSpecBuilder {
        let access = self.access_token.clone();
        let csrf = self.csrf_token.clone();
        builder
            .headers(|h| {
                if let Some(token) = &access {
                    h.set_bearer_auth(token);
                }
                if let Some(token) = &csrf {
                    h.set(headers::CSRF_TOKEN, token.as_str());
                }
            })
            .cookies(|c| {
                for (name, value) in [(ACCESS_TOKEN, &access), (CSRF_TOKEN, &csrf)] {
                    if let Some(value) = value {
                        c.set(name, value.as_str());
                        c.set(format!("{HOST_PREFIX}{name}"), value.as_str());
                    }
                }
            })
    }
}

/// Body of the login and refresh-token responses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoginResult {
    /// `"success"` when the call succeeded.
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub data: Option<LoginData>,
}

impl LoginResult {
    pub fn is_success(&self) -> bool {
        self.result.as_deref() == Some("success")
    }
}

/// Tokens carried in a login or refresh body.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginData {
    #[serde(default, alias = "accessToken")]
    #[serde_as(as = "DefaultOnNull<NoneAsEmptyString>")]
    pub access_token: Option<String>,
    #[serde(default, alias = "refreshToken")]
    #[serde_as(as = "DefaultOnNull<NoneAsEmptyString>")]
    pub refresh_token: Option<String>,
    #[serde(default, alias = "csrfToken")]
    #[serde_as(as = "DefaultOnNull<NoneAsEmptyString>")]
    pub csrf_token: Option<String>,
}

impl From<LoginData> for TokenState {
    fn from(data: LoginData) -> Self {
        TokenState::new(data.access_token, data.refresh_token, data.csrf_token)
    }
}

fn is_cookie_boundary(prefix: &str) -> bool {
    prefix.is_empty() || prefix.ends_with(|c: char| c == ';' || c == ',' || c.is_whitespace())
}

/// Reads the value of cookie `key` (or `__Host-key`) from a cookie header line.
///
/// The value runs up to the next `;` or the end of the line. An empty value
/// counts as absent.
pub fn extract_token(cookie_line: &str, key: &str) -> Option<String> {
    if key.is_empty() {
        return None;
    }
    let needle = format!("{key}=");
    let mut from = 0;
    while let Some(pos) = cookie_line[from..].find(&needle) {
        let start = from + pos;
        let before = &cookie_line[..start];
        let at_boundary = is_cookie_boundary(before)
            || before
                .strip_suffix(HOST_PREFIX)
                .is_some_and(is_cookie_boundary);
        if at_boundary {
            let rest = &cookie_line[start + needle.len()..];
            let value = rest.split(';').next().unwrap_or_default().trim();
            return (!value.is_empty()).then(|| value.to_string());
        }
        from = start + needle.len();
    }
    None
}

/// Builds token state from `Set-Cookie` lines; the first line carrying a
/// token wins.
pub fn tokens_from_set_cookie<S: AsRef<str>>(lines: &[S]) -> TokenState {
    let find = |key: &str| {
        lines
            .iter()
            .find_map(|line| extract_token(line.as_ref(), key))
    };
    TokenState::new(find(ACCESS_TOKEN), find(REFRESH_TOKEN), find(CSRF_TOKEN))
}

/// Token state from a login or refresh response.
///
/// A body reporting success with token data wins; otherwise the tokens are
/// recovered from the `Set-Cookie` lines. A successful body without any token
/// also falls back to the cookies, since newer servers send tokens only there.
/// When neither has tokens the result is an empty [`TokenState`].
pub fn process_login_result<S: AsRef<str>>(
    result: Option<LoginResult>,
    set_cookie: &[S],
) -> TokenState {
    if let Some(result) = result {
        if result.is_success() {
            if let Some(data) = result.data {
                let tokens = TokenState::from(data);
                if !tokens.is_empty() {
                    return tokens;
                }
            }
        }
    }
    tokens_from_set_cookie(set_cookie)
}

/// Where the manager is in the token lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthPhase {
    Unauthenticated,
    Authenticated,
    Refreshing,
}

/// Something that can obtain console tokens.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Logs in with the configured credentials.
    async fn login(&self) -> Result<TokenState>;

    /// Exchanges a refresh token for new tokens.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenState>;
}

#[derive(Debug)]
struct Snapshot {
    tokens: Arc<TokenState>,
    generation: u64,
    phase: AuthPhase,
}

/// Holds the current tokens and serializes login and refresh.
///
/// Readers always see a complete [`TokenState`]; a new state replaces the
/// old one whole.
#[derive(Debug)]
pub struct TokenManager {
    state: RwLock<Snapshot>,
    refresh_lock: Mutex<()>,
}

impl Default for TokenManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenManager {
    pub fn new() -> Self {
        Self::with_tokens(TokenState::default())
    }

    /// Starts from known tokens.
    pub fn with_tokens(tokens: TokenState) -> Self {
        let phase = if tokens.access_token().is_some() {
            AuthPhase::Authenticated
        } else {
            AuthPhase::Unauthenticated
        };
        Self {
            state: RwLock::new(Snapshot {
                tokens: Arc::new(tokens),
                generation: 0,
                phase,
            }),
            refresh_lock: Mutex::new(()),
        }
    }

    fn read<R>(&self, f: impl FnOnce(&Snapshot) -> R) -> R {
        let guard = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    fn write<R>(&self, f: impl FnOnce(&mut Snapshot) -> R) -> R {
        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// The current tokens.
    pub fn tokens(&self) -> Arc<TokenState> {
        self.read(|s| s.tokens.clone())
    }

    pub fn phase(&self) -> AuthPhase {
        self.read(|s| s.phase)
    }

    fn snapshot(&self) -> (Arc<TokenState>, u64) {
        self.read(|s| (s.tokens.clone(), s.generation))
    }

    fn store(&self, tokens: TokenState) -> Arc<TokenState> {
        let tokens = Arc::new(tokens);
        self.write(|s| {
            s.tokens = tokens.clone();
            s.generation += 1;
            s.phase = AuthPhase::Authenticated;
        });
        tokens
    }

    fn settle_phase(&self) {
        self.write(|s| {
            s.phase = if s.tokens.access_token().is_some() {
                AuthPhase::Authenticated
            } else {
                AuthPhase::Unauthenticated
            };
        });
    }

    /// Replaces the tokens, e.g. after an out-of-band login.
    pub fn set_tokens(&self, tokens: TokenState) {
        if tokens.access_token().is_some() {
            self.store(tokens);
        } else {
            self.write(|s| {
                s.tokens = Arc::new(tokens);
                s.generation += 1;
                s.phase = AuthPhase::Unauthenticated;
            });
        }
    }

    /// Adds the current tokens to a request.
    pub fn apply(&self, builder: RequestSpecBuilder) -> RequestSpecBuilder {
        self.tokens().apply(builder)
    }

    /// Logs in and stores the resulting tokens.
    pub async fn login<S>(&self, source: &S) -> Result<Arc<TokenState>>
    where
        S: TokenSource + ?Sized,
    {
        let (_, generation) = self.snapshot();
        self.login_after(source, generation).await
    }

    async fn login_after<S>(&self, source: &S, seen: u64) -> Result<Arc<TokenState>>
    where
        S: TokenSource + ?Sized,
    {
        let _guard = self.refresh_lock.lock().await;
        let (current, generation) = self.snapshot();
        if generation != seen && current.access_token().is_some() {
            debug!("tokens were obtained concurrently, skipping login");
            return Ok(current);
        }
        match source.login().await.and_then(require_access_token) {
            Ok(tokens) => Ok(self.store(tokens)),
            Err(err) => {
                self.settle_phase();
                Err(err)
            }
        }
    }

    /// Refreshes the tokens, logging in again when the refresh fails.
    pub async fn refresh<S>(&self, source: &S) -> Result<Arc<TokenState>>
    where
        S: TokenSource + ?Sized,
    {
        let (_, generation) = self.snapshot();
        self.refresh_after(source, generation).await
    }

    async fn refresh_after<S>(&self, source: &S, seen: u64) -> Result<Arc<TokenState>>
    where
        S: TokenSource + ?Sized,
    {
        let _guard = self.refresh_lock.lock().await;
        let (current, generation) = self.snapshot();
        if generation != seen && current.access_token().is_some() {
            debug!("tokens were renewed concurrently, skipping refresh");
            return Ok(current);
        }

        self.write(|s| s.phase = AuthPhase::Refreshing);
        let renewed = match current.refresh_token() {
            Some(refresh_token) => match source.refresh(refresh_token).await.and_then(require_access_token) {
                Ok(tokens) => Ok(tokens),
                Err(err) => {
                    warn!(error = %err, "token refresh failed, logging in again");
                    source.login().await.and_then(require_access_token)
                }
            },
            None => {
                debug!("no refresh token available, logging in");
                source.login().await.and_then(require_access_token)
            }
        };

        match renewed {
            Ok(tokens) => Ok(self.store(tokens)),
            Err(err) => {
                self.settle_phase();
                Err(err)
            }
        }
    }

    /// Runs `call` with the current tokens, logging in first if there are none.
    ///
    /// When `call` fails with an authentication rejection the tokens are
    /// refreshed once and `call` is retried once; the retry's outcome is
    /// returned as is. Other failures are returned immediately.
    pub async fn execute_with_retry<S, F, Fut, T>(&self, source: &S, mut call: F) -> Result<T>
    where
        S: TokenSource + ?Sized,
        F: FnMut(Arc<TokenState>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let (mut tokens, mut generation) = self.snapshot();
        if tokens.access_token().is_none() {
            self.login_after(source, generation).await?;
            (tokens, generation) = self.snapshot();
        }

        match call(tokens).await {
            Err(err) if err.is_authentication_rejected() => {
                debug!(error = %err, "authentication rejected, refreshing tokens");
                let tokens = self.refresh_after(source, generation).await?;
                call(tokens).await
            }
            other => other,
        }
    }
}

fn require_access_token(tokens: TokenState) -> Result<TokenState> {
    if tokens.access_token().is_some() {
        Ok(tokens)
    } else {
        Err(Error::MissingToken(ACCESS_TOKEN))
    }
}
