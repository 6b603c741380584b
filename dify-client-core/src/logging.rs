//! Request/response logging middleware.
//!
//! [`LoggingMiddleware`] emits one `debug!` event per request and one per
//! response on the `dify_client_core::logging` target. Each pair shares a
//! request id. URLs, headers, cookies and bodies are masked before they are
//! rendered. Response bodies are only logged when the buffering policy allows
//! reading them; event streams and oversized bodies are logged as metadata.
//!
//! Nothing is buffered when `DEBUG` is disabled for this target.
//!
//! ```no_run
//! use dify_client_core::{client::Config, logging::LoggingConfig, Client};
//!
//! let config = Config {
//!     base_url: "http://localhost:5001".into(),
//!     logging: LoggingConfig {
//!         log_body_max_bytes: 4096,
//!         ..LoggingConfig::default()
//!     },
//!     ..Config::default()
//! };
//! let client = Client::new_with_config(config).unwrap();
//! ```

use crate::{
    buffer::{buffer_response, sniff_binary, BufferPolicy, BufferState, DEFAULT_MAX_BYTES},
    error::Result,
    headers::HttpHeaders,
    masking::{MaskingConfig, MaskingEngine, MASK_VALUE},
    middleware::{Middleware, Next},
    request::RequestSpec,
    response::ResponseEnvelope,
};
use async_trait::async_trait;
use std::{collections::BTreeMap, sync::Arc, time::Instant};
use tracing::{debug, warn, Level};
use uuid::Uuid;

/// Name under which the middleware registers in a chain.
pub const LOGGING_MIDDLEWARE: &str = "dify-logging";

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Install the logging middleware.
    pub enabled: bool,
    /// Mask sensitive values before logging.
    pub masking_enabled: bool,
    /// Responses longer than this are logged without body; `0` means no cap.
    pub log_body_max_bytes: u64,
    /// Render binary bodies.
    pub log_binary_body: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            masking_enabled: true,
            log_body_max_bytes: DEFAULT_MAX_BYTES,
            log_binary_body: false,
        }
    }
}

impl LoggingConfig {
    pub fn buffer_policy(&self) -> BufferPolicy {
        BufferPolicy {
            max_bytes: self.log_body_max_bytes,
            log_binary_body: self.log_binary_body,
        }
    }

    /// Masking engine matching these settings; rendered bodies are truncated at the cap.
    pub fn masking_engine(&self) -> MaskingEngine {
        MaskingEngine::new(MaskingConfig {
            enabled: self.masking_enabled,
            max_body_length: usize::try_from(self.log_body_max_bytes).unwrap_or(usize::MAX),
            ..MaskingConfig::default()
        })
    }
}

/// Logs masked requests and responses.
#[derive(Debug, Clone)]
pub struct LoggingMiddleware {
    policy: BufferPolicy,
    engine: Arc<MaskingEngine>,
}

impl LoggingMiddleware {
    pub fn new(config: &LoggingConfig) -> Self {
        Self::with_engine(config.buffer_policy(), Arc::new(config.masking_engine()))
    }

    /// Uses a custom masking engine.
    pub fn with_engine(policy: BufferPolicy, engine: Arc<MaskingEngine>) -> Self {
        Self { policy, engine }
    }

    pub fn engine(&self) -> &MaskingEngine {
        &self.engine
    }

    fn render_headers(&self, headers: &HttpHeaders) -> String {
        render(&self.engine.mask_headers(headers))
    }

    fn render_cookies(&self, cookies: &HttpHeaders) -> String {
        if !self.engine.config().enabled {
            return render(cookies);
        }
        let masked: HttpHeaders = cookies
            .iter()
            .flat_map(|(name, values)| values.iter().map(move |_| (name, MASK_VALUE)))
            .collect();
        render(&masked)
    }

    fn log_request(&self, request_id: &Uuid, url: &str, request: &RequestSpec) {
        let body = request
            .body()
            .loggable_text()
            .map(|text| self.engine.mask_body(&text))
            .unwrap_or_default();
        debug!(
            request_id = %request_id,
            method = %request.method(),
            url = %url,
            headers = %self.render_headers(request.headers()),
            cookies = %self.render_cookies(request.cookies()),
            body = %body,
            "dify request"
        );
    }

    fn response_body(&self, response: &ResponseEnvelope) -> String {
        let Some(bytes) = response.body_bytes() else {
            return String::new();
        };
        if bytes.is_empty() {
            return String::new();
        }
        let content_type = response.headers().content_type();
        let binary = match content_type {
            Some(ct) => !self.policy.is_loggable(ct),
            None => !self.policy.log_binary_body && sniff_binary(&bytes),
        };
        if binary {
            return format!("[binary body, {} bytes]", bytes.len());
        }
        self.engine.mask_body(&String::from_utf8_lossy(&bytes))
    }
}

fn render(headers: &HttpHeaders) -> String {
    let map: BTreeMap<&str, String> = headers
        .iter()
        .map(|(name, values)| (name, values.join(", ")))
        .collect();
    format!("{map:?}")
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[async_trait]
impl Middleware for LoggingMiddleware {
    fn name(&self) -> &str {
        LOGGING_MIDDLEWARE
    }

    async fn handle(&self, request: RequestSpec, next: Next<'_>) -> Result<ResponseEnvelope> {
        if !tracing::enabled!(Level::DEBUG) {
            return next.run(request).await;
        }

        let request_id = Uuid::new_v4();
        let method = request.method().clone();
        let url = self.engine.mask_url(request.uri());
        self.log_request(&request_id, &url, &request);

        let started = Instant::now();
        let response = match next.run(request).await {
            Ok(response) => response,
            Err(err) => {
                debug!(
                    request_id = %request_id,
                    method = %method,
                    url = %url,
                    elapsed_ms = elapsed_ms(started),
                    state = ?BufferState::Failed,
                    error = %err,
                    "dify request failed"
                );
                return Err(err);
            }
        };

        let status = response.status();
        let (response, state) = match buffer_response(response, &self.policy).await {
            Ok(buffered) => buffered,
            Err(err) => {
                warn!(
                    request_id = %request_id,
                    status = %status,
                    state = ?BufferState::Failed,
                    error = %err,
                    "failed to read response body for logging"
                );
                return Err(err);
            }
        };

        debug!(
            request_id = %request_id,
            method = %method,
            url = %url,
            status = %status,
            elapsed_ms = elapsed_ms(started),
            state = ?state,
            headers = %self.render_headers(response.headers()),
            body = %self.response_body(&response),
            "dify response"
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        http::{Bytes, StatusCode},
        response::Body,
    };

    #[test]
    fn cookies_are_always_masked_when_masking_is_on() {
        let mw = LoggingMiddleware::new(&LoggingConfig::default());
        let cookies: HttpHeaders = [("locale", "en"), ("access_token", "a")].into_iter().collect();
        let rendered = mw.render_cookies(&cookies);
        assert!(!rendered.contains("en\""));
        assert!(rendered.contains(MASK_VALUE));

        let plain = LoggingMiddleware::new(&LoggingConfig {
            masking_enabled: false,
            ..LoggingConfig::default()
        });
        assert!(plain.render_cookies(&cookies).contains("\"a\""));
    }

    #[test]
    fn response_bodies_are_masked_or_summarized() {
        let mw = LoggingMiddleware::new(&LoggingConfig::default());
        let mut headers = HttpHeaders::new();
        headers.set("Content-Type", "application/json");
        let resp = ResponseEnvelope::new(
            StatusCode::OK,
            headers,
            Body::Bytes(Bytes::from_static(br#"{"access_token":"abc","result":"success"}"#)),
        );
        assert_eq!(
            mw.response_body(&resp),
            r#"{"access_token":"***MASKED***","result":"success"}"#
        );

        let mut headers = HttpHeaders::new();
        headers.set("Content-Type", "audio/mpeg");
        let resp = ResponseEnvelope::new(
            StatusCode::OK,
            headers,
            Body::Bytes(Bytes::from_static(&[0xFF, 0xFB, 0x90, 0x00])),
        );
        assert_eq!(mw.response_body(&resp), "[binary body, 4 bytes]");
    }

    #[test]
    fn headers_render_masked() {
        let mw = LoggingMiddleware::new(&LoggingConfig::default());
        let headers: HttpHeaders = [("Authorization", "Bearer x"), ("X-Trace", "1")]
            .into_iter()
            .collect();
        let rendered = mw.render_headers(&headers);
        assert!(rendered.contains("\"Authorization\": \"***MASKED***\""));
        assert!(rendered.contains("\"X-Trace\": \"1\""));
    }
}
