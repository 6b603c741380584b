//! Immutable request descriptions.
//!
//! A [`RequestSpec`] describes one pending HTTP call without performing it.
//! It is produced by a consuming [`RequestSpecBuilder`]: every builder step
//! takes the builder by value and returns the next one, and
//! [`RequestSpecBuilder::build`] resolves the URI template, so a malformed
//! template or missing variable is reported before anything is sent.
//!
//! ```
//! use dify_client_core::request::RequestSpec;
//! use serde_json::json;
//!
//! let spec = RequestSpec::post("/console/api/apps/{app_id}/api-keys")
//!     .uri_vars(["app-1"])
//!     .header("X-Trace", "abc")
//!     .cookie("locale", "en-US")
//!     .json(&json!({ "name": "demo" }))
//!     .unwrap()
//!     .build()
//!     .unwrap();
//! assert_eq!(spec.uri(), "/console/api/apps/app-1/api-keys");
//! ```

use crate::{
    error::{Error, Result},
    headers::HttpHeaders,
    http::{Bytes, ContentDisposition, Method},
    uri::{self, UriBuilder},
};
use std::{collections::HashMap, fmt::Display};

/// How the caller intends to consume the response body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseType {
    /// Decode a JSON document.
    #[default]
    Json,
    /// Read UTF-8 text.
    Text,
    /// Read raw bytes (audio, files, ...).
    Bytes,
    /// Consume the body incrementally (server-sent events).
    Stream,
}

impl ResponseType {
    /// The `Accept` header value sent for this response type.
    pub fn accept(&self) -> &'static str {
        match self {
            ResponseType::Json => "application/json",
            ResponseType::Text => "text/plain, */*",
            ResponseType::Bytes => "*/*",
            ResponseType::Stream => "text/event-stream",
        }
    }
}

/// One part of a multipart form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    /// Form field name.
    pub name: String,
    /// File name, for file parts.
    pub filename: Option<String>,
    /// MIME type; sniffed from the data when not provided.
    pub content_type: Option<String>,
    /// Part payload.
    pub data: Bytes,
}

impl Part {
    /// A plain text field.
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filename: None,
            content_type: None,
            data: Bytes::from(value.into()),
        }
    }

    /// A file field; the MIME type is detected from the leading bytes.
    pub fn file(name: impl Into<String>, filename: impl Into<String>, data: Bytes) -> Self {
        let content_type = infer::get(&data).map(|kind| kind.mime_type().to_string());
        Self {
            name: name.into(),
            filename: Some(filename.into()),
            content_type,
            data,
        }
    }

    /// Overrides the MIME type.
    pub fn mime(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// The `Content-Disposition` of this part.
    pub fn content_disposition(&self) -> ContentDisposition {
        let cd = ContentDisposition::form_data().name(self.name.clone());
        match &self.filename {
            Some(filename) => cd.filename(filename.clone()),
            None => cd,
        }
    }
}

/// Request payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestBody {
    /// No body.
    #[default]
    Empty,
    /// A JSON document.
    Json(serde_json::Value),
    /// `application/x-www-form-urlencoded` pairs.
    Form(Vec<(String, String)>),
    /// Plain text.
    Text(String),
    /// Opaque bytes.
    Bytes(Bytes),
    /// `multipart/form-data`.
    Multipart(Vec<Part>),
}

impl RequestBody {
    /// Whether there is no payload.
    pub fn is_empty(&self) -> bool {
        matches!(self, RequestBody::Empty)
    }

    /// The payload rendered as text for logging; `None` for binary payloads.
    pub fn loggable_text(&self) -> Option<String> {
        match self {
            RequestBody::Empty => None,
            RequestBody::Json(value) => Some(value.to_string()),
            RequestBody::Form(pairs) => Some(
                url::form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(pairs.iter())
                    .finish(),
            ),
            RequestBody::Text(text) => Some(text.clone()),
            RequestBody::Bytes(bytes) => std::str::from_utf8(bytes).ok().map(str::to_owned),
            RequestBody::Multipart(parts) => Some(
                parts
                    .iter()
                    .map(|part| match &part.content_type {
                        Some(ct) => format!(
                            "[{}; {ct}; {} bytes]",
                            part.content_disposition(),
                            part.data.len()
                        ),
                        None => format!(
                            "[{}] {}",
                            part.content_disposition(),
                            String::from_utf8_lossy(&part.data)
                        ),
                    })
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum UriVariables {
    None,
    Positional(Vec<String>),
    Named(HashMap<String, String>),
}

/// A fully resolved, immutable request description.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSpec {
    method: Method,
    template: String,
    uri: String,
    headers: HttpHeaders,
    cookies: HttpHeaders,
    body: RequestBody,
    response_type: Option<ResponseType>,
}

impl RequestSpec {
    /// Starts a builder for `method` and a URI template.
    pub fn builder(method: Method, template: impl Into<String>) -> RequestSpecBuilder {
        RequestSpecBuilder::new(method, template)
    }

    /// `GET` builder.
    pub fn get(template: impl Into<String>) -> RequestSpecBuilder {
        Self::builder(Method::GET, template)
    }

    /// `POST` builder.
    pub fn post(template: impl Into<String>) -> RequestSpecBuilder {
        Self::builder(Method::POST, template)
    }

    /// `PUT` builder.
    pub fn put(template: impl Into<String>) -> RequestSpecBuilder {
        Self::builder(Method::PUT, template)
    }

    /// `PATCH` builder.
    pub fn patch(template: impl Into<String>) -> RequestSpecBuilder {
        Self::builder(Method::PATCH, template)
    }

    /// `DELETE` builder.
    pub fn delete(template: impl Into<String>) -> RequestSpecBuilder {
        Self::builder(Method::DELETE, template)
    }

    /// HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The template as given to the builder.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// The resolved URI (path and query, relative to the client's base URL).
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Request headers.
    pub fn headers(&self) -> &HttpHeaders {
        &self.headers
    }

    /// Request cookies.
    pub fn cookies(&self) -> &HttpHeaders {
        &self.cookies
    }

    /// Request body.
    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    /// Declared response type, if any.
    pub fn response_type(&self) -> Option<ResponseType> {
        self.response_type
    }

    /// Reopens the spec as a builder, e.g. to inject credentials.
    ///
    /// The URI is carried over already resolved.
    pub fn to_builder(&self) -> RequestSpecBuilder {
        RequestSpecBuilder {
            method: self.method.clone(),
            template: self.uri.clone(),
            variables: UriVariables::None,
            headers: self.headers.clone(),
            cookies: self.cookies.clone(),
            body: self.body.clone(),
            response_type: self.response_type,
            error: None,
        }
    }
}

/// Consuming builder for [`RequestSpec`].
#[derive(Debug, Clone)]
#[must_use]
pub struct RequestSpecBuilder {
    method: Method,
    template: String,
    variables: UriVariables,
    headers: HttpHeaders,
    cookies: HttpHeaders,
    body: RequestBody,
    response_type: Option<ResponseType>,
    error: Option<String>,
}

impl RequestSpecBuilder {
    fn new(method: Method, template: impl Into<String>) -> Self {
        Self {
            method,
            template: template.into(),
            variables: UriVariables::None,
            headers: HttpHeaders::new(),
            cookies: HttpHeaders::new(),
            body: RequestBody::Empty,
            response_type: None,
            error: None,
        }
    }

    /// Replaces the URI template.
    pub fn uri(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    /// Positional values for the template placeholders.
    pub fn uri_vars<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Display,
    {
        self.variables =
            UriVariables::Positional(values.into_iter().map(|v| v.to_string()).collect());
        self
    }

    /// Named values for the template placeholders.
    pub fn uri_named<K, V>(mut self, values: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Display,
    {
        self.variables = UriVariables::Named(
            values
                .into_iter()
                .map(|(k, v)| (k.into(), v.to_string()))
                .collect(),
        );
        self
    }

    /// Builds the URI incrementally from the current template.
    ///
    /// A failure inside the closure is reported by [`build`](Self::build).
    pub fn uri_builder<F>(mut self, f: F) -> Self
    where
        F: FnOnce(UriBuilder) -> Result<String>,
    {
        match f(UriBuilder::new(self.template.clone())) {
            Ok(uri) => {
                self.template = uri;
                self.variables = UriVariables::None;
            }
            Err(err) => self.error = Some(err.to_string()),
        }
        self
    }

    /// Appends a header value.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.add(name, value);
        self
    }

    /// Replaces a header value.
    pub fn set_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    /// Mutates the headers in place.
    pub fn headers<F: FnOnce(&mut HttpHeaders)>(mut self, f: F) -> Self {
        f(&mut self.headers);
        self
    }

    /// Appends a cookie.
    pub fn cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.add(name, value);
        self
    }

    /// Mutates the cookies in place.
    pub fn cookies<F: FnOnce(&mut HttpHeaders)>(mut self, f: F) -> Self {
        f(&mut self.cookies);
        self
    }

    /// Sets any body.
    pub fn body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    /// Serializes `value` as the JSON body.
    pub fn json<T: serde::Serialize + ?Sized>(self, value: &T) -> Result<Self> {
        let value = serde_json::to_value(value)?;
        Ok(self.body(RequestBody::Json(value)))
    }

    /// Sets a form-encoded body.
    pub fn form<K, V>(self, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.body(RequestBody::Form(
            pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        ))
    }

    /// Sets a multipart body.
    pub fn multipart(self, parts: Vec<Part>) -> Self {
        self.body(RequestBody::Multipart(parts))
    }

    /// Declares how the response will be consumed.
    pub fn response_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = Some(response_type);
        self
    }

    /// Resolves the URI and freezes the request.
    pub fn build(self) -> Result<RequestSpec> {
        if let Some(err) = self.error {
            return Err(Error::InvalidArgument(err));
        }
        if self.template.is_empty() {
            return Err(Error::InvalidArgument("URI template must not be empty".into()));
        }
        let uri = match &self.variables {
            UriVariables::None => uri::expand::<&str>(&self.template, &[])?,
            UriVariables::Positional(values) => uri::expand(&self.template, values.as_slice())?,
            UriVariables::Named(values) => uri::expand_named(&self.template, values)?,
        };
        Ok(RequestSpec {
            method: self.method,
            template: self.template,
            uri,
            headers: self.headers,
            cookies: self.cookies,
            body: self.body,
            response_type: self.response_type,
        })
    }
}
