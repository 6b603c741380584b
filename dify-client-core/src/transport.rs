//! The network boundary.
//!
//! [`Transport`] turns a [`RequestSpec`] into a [`ResponseEnvelope`]. The
//! rest of the crate only sees this trait, so tests can plug in a fake and
//! nothing above this module knows about reqwest. [`ReqwestTransport`] is the
//! implementation used by [`Client`](crate::client::Client).
use crate::{
    client::Config,
    error::{Error, Result},
    headers::{self, HttpHeaders},
    request::{RequestBody, RequestSpec},
    response::{Body, ResponseEnvelope},
};
use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::header::{self as rheader, HeaderMap, HeaderValue};
use secrecy::ExposeSecret;

/// Executes requests.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `request` and returns the response without reading its body.
    async fn execute(&self, request: &RequestSpec) -> Result<ResponseEnvelope>;
}

/// [`Transport`] backed by a shared `reqwest::Client`.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    base_url: String,
    http_client: reqwest::Client,
}

impl ReqwestTransport {
    /// Builds the transport from the client configuration.
    ///
    /// # Arguments
    /// * `c` - The configuration for the client.
    ///
    /// # Returns
    /// A new `ReqwestTransport`, or an error if the API key is not a valid
    /// header value or the http client cannot be created.
    pub fn new(c: &Config) -> Result<Self> {
        let mut builder = reqwest::ClientBuilder::new();
        if !c.timeout.is_zero() {
            builder = builder.timeout(c.timeout);
        }
        let http_client = builder
            .default_headers(Self::default_headers(c)?)
            .build()
            .map_err(Error::from_transport)?;
        Ok(Self::with_client(&c.base_url, http_client))
    }

    /// Wraps an existing `reqwest::Client`.
    pub fn with_client(base_url: &str, http_client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').into(),
            http_client,
        }
    }

    /// The base URL requests are resolved against.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn default_headers(c: &Config) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(rheader::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        if let Some(api_key) = &c.api_key {
            let auth = format!("Bearer {}", api_key.expose_secret());
            let mut bearer_auth = HeaderValue::from_str(&auth)
                .map_err(|_| Error::InvalidArgument("API key is not a valid header value".into()))?;
            bearer_auth.set_sensitive(true);
            headers.insert(rheader::AUTHORIZATION, bearer_auth);
        }
        Ok(headers)
    }

    /// Absolute URL for a resolved URI.
    pub fn url_for(&self, uri: &str) -> String {
        if uri.starts_with("http://") || uri.starts_with("https://") {
            return uri.to_string();
        }
        if uri.starts_with('/') {
            format!("{}{uri}", self.base_url)
        } else {
            format!("{}/{uri}", self.base_url)
        }
    }

    fn create_request(&self, spec: &RequestSpec) -> Result<reqwest::Request> {
        let mut builder = self
            .http_client
            .request(spec.method().clone(), self.url_for(spec.uri()));

        for (name, values) in spec.headers().iter() {
            for value in values {
                builder = builder.header(name, value);
            }
        }
        if let Some(cookie) = spec.cookies().to_cookie_header() {
            builder = builder.header(headers::COOKIE, cookie);
        }
        if let Some(response_type) = spec.response_type() {
            if !spec.headers().contains("Accept") {
                builder = builder.header(rheader::ACCEPT, response_type.accept());
            }
        }

        builder = match spec.body() {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Form(pairs) => builder.form(pairs),
            RequestBody::Text(text) => {
                with_default_content_type(builder, spec.headers(), "text/plain; charset=utf-8")
                    .body(text.clone())
            }
            RequestBody::Bytes(bytes) => {
                with_default_content_type(builder, spec.headers(), "application/octet-stream")
                    .body(bytes.clone())
            }
            RequestBody::Multipart(parts) => {
                let mut form = reqwest::multipart::Form::new();
                for part in parts {
                    let mut p = reqwest::multipart::Part::bytes(part.data.to_vec());
                    if let Some(filename) = &part.filename {
                        p = p.file_name(filename.clone());
                    }
                    if let Some(content_type) = &part.content_type {
                        p = p.mime_str(content_type).map_err(Error::from_transport)?;
                    }
                    form = form.part(part.name.clone(), p);
                }
                builder.multipart(form)
            }
        };

        builder.build().map_err(Error::from_transport)
    }
}

fn with_default_content_type(
    builder: reqwest::RequestBuilder,
    headers: &HttpHeaders,
    content_type: &'static str,
) -> reqwest::RequestBuilder {
    if headers.content_type().is_some() {
        builder
    } else {
        builder.header(rheader::CONTENT_TYPE, content_type)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: &RequestSpec) -> Result<ResponseEnvelope> {
        let req = self.create_request(request)?;
        let resp = self
            .http_client
            .execute(req)
            .await
            .map_err(Error::from_transport)?;
        let status = resp.status();
        let headers = HttpHeaders::from(resp.headers());
        let stream = resp.bytes_stream().map_err(Error::from_transport);
        Ok(ResponseEnvelope::new(
            status,
            headers,
            Body::Stream(Box::pin(stream)),
        ))
    }
}
