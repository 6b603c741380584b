//! Dify client core library.
//!
//! Request specs, a case-insensitive header store, token lifecycle with
//! refresh-and-retry, response buffering and masked request/response logging
//! for the Dify API.
//!
//! # Examples
//!
//! ## Client with single api key
//!
//! ```no_run
//! use dify_client_core::{request::RequestSpec, Client, Config};
//! use secrecy::SecretString;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> dify_client_core::Result<()> {
//!     let config = Config {
//!         base_url: "https://api.dify.ai".into(),
//!         api_key: Some(SecretString::new("API_KEY".into())),
//!         timeout: Duration::from_secs(60),
//!         ..Config::default()
//!     };
//!     let client = Client::new_with_config(config)?;
//!
//!     let request = RequestSpec::post("/v1/chat-messages")
//!         .json(&serde_json::json!({
//!             "query": "What are the specs of the iPhone 13 Pro Max?",
//!             "user": "afa",
//!             "inputs": {},
//!             "response_mode": "blocking",
//!         }))?
//!         .build()?;
//!     let result: serde_json::Value = client.execute_json(request).await?;
//!     println!("{:?}", result);
//!     Ok(())
//! }
//! ```
//!
//! ## Streaming responses
//!
//! ```no_run
//! use dify_client_core::{request::{RequestSpec, ResponseType}, Client};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> dify_client_core::Result<()> {
//!     let client = Client::new("https://api.dify.ai", "API_KEY")?;
//!     let request = RequestSpec::post("/v1/chat-messages")
//!         .json(&serde_json::json!({
//!             "query": "hello",
//!             "user": "afa",
//!             "inputs": {},
//!             "response_mode": "streaming",
//!         }))?
//!         .response_type(ResponseType::Stream)
//!         .build()?;
//!     // event streams are never buffered, not even by the logging middleware
//!     let mut events = client.execute(request).await?.error_for_status().await?.into_events();
//!     while let Some(event) = events.next().await {
//!         println!("{}", event?.data);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Console API with login
//!
//! ```no_run
//! use dify_client_core::{request::RequestSpec, Config, ServerClient, ServerConfig};
//! use secrecy::SecretString;
//!
//! #[tokio::main]
//! async fn main() -> dify_client_core::Result<()> {
//!     let config = Config::from_env()?;
//!     let server = ServerConfig::new("admin@example.com", SecretString::new("password".into()));
//!     let client = ServerClient::new(config, server)?;
//!
//!     // logs in on first use, refreshes and retries once on 401
//!     let request = RequestSpec::get("/console/api/apps/{app_id}").uri_vars(["app-id"]).build()?;
//!     let app: serde_json::Value = client.send_authenticated(request).await?;
//!     println!("{:?}", app);
//!     Ok(())
//! }
//! ```
//!
//! For the request builder, refer to the [`RequestSpec`](request/struct.RequestSpec.html) struct.

pub mod auth;
pub mod buffer;
pub mod client;
pub mod error;
pub mod handler;
pub mod headers;
pub mod http;
pub mod logging;
pub mod masking;
pub mod middleware;
pub mod request;
pub mod response;
pub mod transport;
pub mod uri;

pub use client::*;
pub use error::{Error, Result};
