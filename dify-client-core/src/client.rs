//! This module contains the implementation of the Dify client.
//!
//! The `client` module provides a `Client` struct that runs [`RequestSpec`]s
//! through an ordered middleware chain and a [`Transport`], and a
//! `ServerClient` that adds the console login, token refresh and
//! retry-on-401 cycle on top of it. A `Config` struct holds the
//! configuration for the client.
//!
//! # Examples
//!
//! Creating a new client with default configuration:
//!
//! ```rust
//! use dify_client_core::client::Client;
//!
//! let client = Client::new("https://api.dify.ai", "API_KEY").unwrap();
//! ```
//!
//! Creating a new client with custom configuration:
//!
//! ```rust
//! use dify_client_core::client::{Client, Config};
//! use secrecy::SecretString;
//! use std::time::Duration;
//!
//! let config = Config {
//!     base_url: "https://api.dify.ai".into(),
//!     api_key: Some(SecretString::new("API_KEY".into())),
//!     timeout: Duration::from_secs(30),
//!     ..Config::default()
//! };
//!
//! let client = Client::new_with_config(config).unwrap();
//! ```
//!
//! Calling the console API with automatic token refresh:
//!
//! ```no_run
//! use dify_client_core::{client::{Config, ServerClient, ServerConfig}, request::RequestSpec};
//! use secrecy::SecretString;
//!
//! #[tokio::main]
//! async fn main() -> dify_client_core::Result<()> {
//!     let config = Config {
//!         base_url: "http://localhost:5001".into(),
//!         ..Config::default()
//!     };
//!     let server = ServerConfig::new("admin@example.com", SecretString::new("password".into()));
//!     let client = ServerClient::new(config, server)?;
//!
//!     let request = RequestSpec::get("/console/api/apps")
//!         .uri_builder(|b| b.query_param("page", 1).query_param("limit", 20).build())
//!         .build()?;
//!     let apps: serde_json::Value = client.send_authenticated(request).await?;
//!     println!("{apps}");
//!     Ok(())
//! }
//! ```
use crate::{
    auth::{process_login_result, LoginResult, TokenManager, TokenSource, TokenState, HOST_PREFIX, REFRESH_TOKEN},
    error::{Error, Result},
    handler::{StatusHandler, StatusHandlers},
    headers::SET_COOKIE,
    http::{Bytes, StatusCode},
    logging::{LoggingConfig, LoggingMiddleware},
    middleware::{Middleware, MiddlewareChain},
    request::RequestSpec,
    response::ResponseEnvelope,
    transport::{ReqwestTransport, Transport},
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::{fmt, sync::Arc, time::Duration};

/// Console login endpoint.
pub const LOGIN_PATH: &str = "/console/api/login";
/// Console token refresh endpoint.
pub const REFRESH_TOKEN_PATH: &str = "/console/api/refresh-token";

#[derive(Clone, Debug)]
/// The configuration for the Dify client.
pub struct Config {
    /// The base URL of the Dify API.
    pub base_url: String,
    /// The API key sent as bearer token, if any.
    pub api_key: Option<SecretString>,
    /// The timeout for the client requests; zero disables it.
    pub timeout: Duration,
    /// Request/response logging.
    pub logging: LoggingConfig,
}

/// Implements the default configuration for the client.
impl Default for Config {
    /// Returns a new instance of `Config` with default values.
    fn default() -> Self {
        Self {
            base_url: "https://api.dify.ai".into(),
            api_key: None,
            timeout: Duration::from_secs(30),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Reads `DIFY_BASE_URL`, `DIFY_API_KEY` and `DIFY_TIMEOUT_SECS`,
    /// keeping defaults for unset variables.
    ///
    /// # Returns
    /// The configuration, or [`Error::InvalidArgument`] if the timeout is not a number.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(base_url) = std::env::var("DIFY_BASE_URL") {
            config.base_url = base_url;
        }
        if let Ok(api_key) = std::env::var("DIFY_API_KEY") {
            if !api_key.is_empty() {
                config.api_key = Some(SecretString::new(api_key.into()));
            }
        }
        if let Ok(secs) = std::env::var("DIFY_TIMEOUT_SECS") {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                Error::InvalidArgument(format!("DIFY_TIMEOUT_SECS is not a number: {secs}"))
            })?;
            config.timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }
}

/// The `Client` struct executes requests against the Dify API.
pub struct Client<T = ReqwestTransport> {
    /// The configuration for the client.
    pub config: Arc<Config>,
    transport: Arc<T>,
    middlewares: MiddlewareChain,
    handlers: StatusHandlers,
}

impl<T> Clone for Client<T> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            transport: self.transport.clone(),
            middlewares: self.middlewares.clone(),
            handlers: self.handlers.clone(),
        }
    }
}

impl<T> fmt::Debug for Client<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("middlewares", &self.middlewares)
            .field("handlers", &self.handlers.len())
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Creates a new `Client` instance with the specified base URL and API key.
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the Dify API.
    /// * `api_key` - The API key for authentication.
    ///
    /// # Returns
    /// A new `Client` instance.
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        Self::new_with_config(Config {
            base_url: base_url.into(),
            api_key: Some(SecretString::new(api_key.into())),
            ..Config::default()
        })
    }

    /// Creates a new `Client` instance with the specified configuration.
    ///
    /// # Arguments
    /// * `c` - The configuration for the client.
    ///
    /// # Returns
    /// A new `Client` instance, or an error if the http client cannot be built.
    pub fn new_with_config(mut c: Config) -> Result<Self> {
        // format the base URL
        c.base_url = c.base_url.trim_end_matches('/').into();
        let transport = ReqwestTransport::new(&c)?;
        Ok(Self::with_transport(c, transport))
    }
}

impl<T: Transport> Client<T> {
    /// Creates a client on top of any transport.
    ///
    /// The logging middleware is installed first when `c.logging.enabled`.
    pub fn with_transport(c: Config, transport: T) -> Self {
        let mut middlewares = MiddlewareChain::new();
        if c.logging.enabled {
            middlewares.push_unique(Arc::new(LoggingMiddleware::new(&c.logging)));
        }
        Self {
            config: Arc::new(c),
            transport: Arc::new(transport),
            middlewares,
            handlers: StatusHandlers::new(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn middlewares(&self) -> &MiddlewareChain {
        &self.middlewares
    }

    /// Appends a middleware unless one with the same name is installed.
    ///
    /// # Returns
    /// Whether the middleware was added.
    pub fn with_middleware(&mut self, middleware: Arc<dyn Middleware>) -> bool {
        self.middlewares.push_unique(middleware)
    }

    /// Registers a status handler; handlers run in registration order.
    pub fn on_status(&mut self, handler: StatusHandler) -> &mut Self {
        self.handlers.push(handler);
        self
    }

    /// Executes the request through the middleware chain.
    ///
    /// Non-2xx responses are returned as envelopes unless a status handler
    /// matches and fails. Responses seen by a handler are buffered first.
    ///
    /// # Arguments
    /// * `request` - The request to execute.
    ///
    /// # Returns
    /// A `Result` containing the response or an error.
    pub async fn execute(&self, request: RequestSpec) -> Result<ResponseEnvelope> {
        let response = self
            .middlewares
            .execute(self.transport.as_ref(), request)
            .await?;
        if self.handlers.matches(response.status()) {
            let response = response.into_buffered().await?;
            self.handlers.check(&response)?;
            return Ok(response);
        }
        Ok(response)
    }

    /// Executes the request and decodes a JSON body into `R`.
    pub async fn execute_json<R>(&self, request: RequestSpec) -> Result<R>
    where
        R: serde::de::DeserializeOwned,
    {
        self.execute(request).await?.json().await
    }

    /// Executes the request and returns the body as text, failing on non-2xx.
    pub async fn execute_text(&self, request: RequestSpec) -> Result<String> {
        self.execute(request)
            .await?
            .error_for_status()
            .await?
            .text()
            .await
    }

    /// Executes the request and returns the raw body, failing on non-2xx.
    pub async fn execute_bytes(&self, request: RequestSpec) -> Result<Bytes> {
        self.execute(request)
            .await?
            .error_for_status()
            .await?
            .bytes()
            .await
    }
}

/// Console account used to obtain tokens.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub email: String,
    pub password: SecretString,
    /// Send the password base64 encoded, as newer servers expect.
    pub password_encryption: bool,
    pub language: String,
    pub remember_me: bool,
}

impl ServerConfig {
    pub fn new(email: impl Into<String>, password: SecretString) -> Self {
        Self {
            email: email.into(),
            password,
            password_encryption: false,
            language: "en-US".into(),
            remember_me: true,
        }
    }

    fn password_for_login(&self) -> String {
        let password = self.password.expose_secret();
        if self.password_encryption {
            STANDARD.encode(password)
        } else {
            password.to_string()
        }
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: String,
    language: &'a str,
    remember_me: bool,
}

#[derive(Serialize)]
struct RefreshTokenRequest<'a> {
    refresh_token: &'a str,
}

/// Authenticated client for the console API.
///
/// Every call made through [`execute_with_retry`](Self::execute_with_retry)
/// carries the current tokens; a 401 answer refreshes them once and retries
/// once.
pub struct ServerClient<T = ReqwestTransport> {
    client: Client<T>,
    server: Arc<ServerConfig>,
    tokens: Arc<TokenManager>,
}

impl<T> Clone for ServerClient<T> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            server: self.server.clone(),
            tokens: self.tokens.clone(),
        }
    }
}

impl<T> fmt::Debug for ServerClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerClient")
            .field("client", &self.client)
            .field("server", &self.server)
            .field("tokens", &self.tokens)
            .finish()
    }
}

impl ServerClient {
    /// Creates a console client over reqwest.
    pub fn new(config: Config, server: ServerConfig) -> Result<Self> {
        Ok(Self::with_client(Client::new_with_config(config)?, server))
    }
}

impl<T: Transport> ServerClient<T> {
    pub fn with_client(client: Client<T>, server: ServerConfig) -> Self {
        Self {
            client,
            server: Arc::new(server),
            tokens: Arc::new(TokenManager::new()),
        }
    }

    /// Shares an existing token manager, e.g. between clients of the same account.
    pub fn with_token_manager(mut self, tokens: Arc<TokenManager>) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn client(&self) -> &Client<T> {
        &self.client
    }

    pub fn token_manager(&self) -> &TokenManager {
        &self.tokens
    }

    /// Logs in and stores the tokens.
    pub async fn login(&self) -> Result<Arc<TokenState>> {
        self.tokens.login(self).await
    }

    /// Refreshes the stored tokens, logging in again if that fails.
    pub async fn refresh(&self) -> Result<Arc<TokenState>> {
        self.tokens.refresh(self).await
    }

    /// Calls the login endpoint without touching the stored tokens.
    pub async fn request_login(&self) -> Result<TokenState> {
        let body = LoginRequest {
            email: &self.server.email,
            password: self.server.password_for_login(),
            language: &self.server.language,
            remember_me: self.server.remember_me,
        };
        let request = RequestSpec::post(LOGIN_PATH).json(&body)?.build()?;
        self.request_tokens(request).await
    }

    /// Calls the refresh endpoint without touching the stored tokens.
    ///
    /// The refresh token is sent in the body and as both the plain and the
    /// `__Host-` cookie.
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenState> {
        let request = RequestSpec::post(REFRESH_TOKEN_PATH)
            .json(&RefreshTokenRequest { refresh_token })?
            .cookie(REFRESH_TOKEN, refresh_token)
            .cookie(format!("{HOST_PREFIX}{REFRESH_TOKEN}"), refresh_token)
            .build()?;
        self.request_tokens(request).await
    }

    async fn request_tokens(&self, request: RequestSpec) -> Result<TokenState> {
        let response = self.client.execute(request).await?.into_buffered().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::from_status(status, response.body_text().unwrap_or_default()));
        }
        let body = response.body_text().unwrap_or_default();
        let result = serde_json::from_str::<LoginResult>(&body).ok();
        Ok(process_login_result(
            result,
            response.headers().get_or_empty(SET_COOKIE),
        ))
    }

    /// Executes `request` with the current tokens, refreshing and retrying
    /// once on 401.
    ///
    /// Logs in first when no token is held. Other statuses are returned as
    /// envelopes.
    pub async fn execute_with_retry(&self, request: RequestSpec) -> Result<ResponseEnvelope> {
        self.tokens
            .execute_with_retry(self, |tokens| {
                let request = request.clone();
                async move {
                    let request = tokens.apply(request.to_builder()).build()?;
                    let response = self.client.execute(request).await?;
                    if response.status() == StatusCode::UNAUTHORIZED {
                        let status = response.status();
                        let body = response.text().await.unwrap_or_default();
                        return Err(Error::from_status(status, body));
                    }
                    Ok(response)
                }
            })
            .await
    }

    /// Executes `request` with retry and decodes a JSON body into `R`.
    pub async fn send_authenticated<R>(&self, request: RequestSpec) -> Result<R>
    where
        R: serde::de::DeserializeOwned,
    {
        self.execute_with_retry(request).await?.json().await
    }
}

#[async_trait]
impl<T: Transport> TokenSource for ServerClient<T> {
    async fn login(&self) -> Result<TokenState> {
        self.request_login().await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenState> {
        self.refresh_token(refresh_token).await
    }
}
