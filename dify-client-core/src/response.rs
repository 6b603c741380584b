//! This module contains the response envelope returned by every call and the helpers used to decode it.
//!
//! A [`ResponseEnvelope`] carries the status, the headers and a [`Body`]. The
//! body is either still a one-shot network stream or already materialized
//! bytes; once materialized, every read returns the same bytes.
//!
//! # Examples
//!
//! Deserialize an error response:
//!
//! ```
//! use dify_client_core::response::ErrorResponse;
//!
//! let json = r#"
//!     {
//!         "code": "unauthorized",
//!         "message": "Invalid token",
//!         "status": 401
//!     }
//! "#;
//!
//! let error_response: ErrorResponse = serde_json::from_str(json).unwrap();
//!
//! assert_eq!(error_response.code, "unauthorized");
//! assert_eq!(error_response.status, 401);
//! ```
//!
//! Read a buffered body more than once:
//!
//! ```
//! use dify_client_core::{headers::HttpHeaders, http::{Bytes, StatusCode}, response::{Body, ResponseEnvelope}};
//! use std::io::Read;
//!
//! let resp = ResponseEnvelope::new(StatusCode::OK, HttpHeaders::new(), Body::Bytes(Bytes::from_static(b"hi")));
//! let mut first = String::new();
//! resp.body_reader().unwrap().read_to_string(&mut first).unwrap();
//! assert_eq!(first, "hi");
//! assert_eq!(resp.body_bytes().unwrap(), Bytes::from_static(b"hi"));
//! ```
use super::{
    error::{Error, Result},
    headers::HttpHeaders,
    http::{Bytes, StatusClass, StatusCode},
};
use bytes::BytesMut;
use eventsource_stream::{Event, EventStream, Eventsource};
use futures::{Stream, TryStreamExt};
use pin_project_lite::pin_project;
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Debug, Display, Formatter, Result as FmtResult},
    io::Cursor,
    pin::Pin,
    task::{Context, Poll},
};

/// 错误响应
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub status: u32,
}

impl Display for ErrorResponse {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "{} ({}): {}", self.code, self.status, self.message)
    }
}

/// A one-shot stream of body chunks.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Response body.
pub enum Body {
    /// No body at all.
    Empty,
    /// Materialized bytes; readable any number of times.
    Bytes(Bytes),
    /// Live network stream; readable exactly once.
    Stream(BodyStream),
}

impl Debug for Body {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        match self {
            Body::Empty => f.write_str("Body::Empty"),
            Body::Bytes(bytes) => write!(f, "Body::Bytes({} bytes)", bytes.len()),
            Body::Stream(_) => f.write_str("Body::Stream(..)"),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body::Bytes(bytes)
    }
}

/// Status, headers and body of a completed call.
#[derive(Debug)]
pub struct ResponseEnvelope {
    status: StatusCode,
    headers: HttpHeaders,
    body: Body,
}

impl ResponseEnvelope {
    /// Assembles an envelope.
    pub fn new(status: StatusCode, headers: HttpHeaders, body: Body) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Status class.
    pub fn status_class(&self) -> StatusClass {
        StatusClass::of(self.status)
    }

    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Response headers.
    pub fn headers(&self) -> &HttpHeaders {
        &self.headers
    }

    /// The body as it currently is.
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Whether the body can be read without consuming the envelope.
    pub fn is_buffered(&self) -> bool {
        !matches!(self.body, Body::Stream(_))
    }

    /// A view of the materialized body; `None` while it is still a stream.
    pub fn body_bytes(&self) -> Option<Bytes> {
        match &self.body {
            Body::Empty => Some(Bytes::new()),
            Body::Bytes(bytes) => Some(bytes.clone()),
            Body::Stream(_) => None,
        }
    }

    /// A fresh reader over the materialized body on every call.
    pub fn body_reader(&self) -> Option<Cursor<Bytes>> {
        self.body_bytes().map(Cursor::new)
    }

    /// The materialized body decoded lossily as UTF-8.
    pub fn body_text(&self) -> Option<String> {
        self.body_bytes()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Splits the envelope.
    pub fn into_parts(self) -> (StatusCode, HttpHeaders, Body) {
        (self.status, self.headers, self.body)
    }

    /// Reads the whole body, consuming a stream if necessary.
    pub async fn bytes(self) -> Result<Bytes> {
        match self.body {
            Body::Empty => Ok(Bytes::new()),
            Body::Bytes(bytes) => Ok(bytes),
            Body::Stream(stream) => collect(stream).await,
        }
    }

    /// Reads the whole body as UTF-8 text.
    pub async fn text(self) -> Result<String> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Returns an envelope whose body is materialized bytes.
    pub async fn into_buffered(self) -> Result<Self> {
        match self.body {
            Body::Stream(stream) => {
                let bytes = collect(stream).await?;
                Ok(Self::new(self.status, self.headers, Body::Bytes(bytes)))
            }
            body => Ok(Self::new(self.status, self.headers, body)),
        }
    }

    /// Decodes a JSON body, mapping error statuses onto [`Error`].
    pub async fn json<T>(self) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let status = self.status;
        let text = self.text().await?;
        if !status.is_success() {
            return Err(status_error(status, text));
        }
        parse_response(&text)
    }

    /// Fails with the matching [`Error`] unless the status is 2xx.
    pub async fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }
        let status = self.status;
        let text = self.text().await?;
        Err(status_error(status, text))
    }

    /// The body as a chunk stream.
    pub fn into_stream(self) -> BodyStream {
        match self.body {
            Body::Empty => Box::pin(futures::stream::empty::<Result<Bytes>>()),
            Body::Bytes(bytes) => Box::pin(futures::stream::once(async move { Ok::<_, Error>(bytes) })),
            Body::Stream(stream) => stream,
        }
    }

    /// The body parsed as server-sent events.
    pub fn into_events(self) -> ServerSentEvents<BodyStream> {
        ServerSentEvents::new(self.into_stream().eventsource())
    }
}

async fn collect(stream: BodyStream) -> Result<Bytes> {
    let buf = stream
        .try_fold(BytesMut::new(), |mut buf, chunk| async move {
            buf.extend_from_slice(&chunk);
            Ok(buf)
        })
        .await?;
    Ok(buf.freeze())
}

fn status_error(status: StatusCode, text: String) -> Error {
    if status == StatusCode::UNAUTHORIZED {
        return Error::from_status(status, text);
    }
    match serde_json::from_str::<ErrorResponse>(&text) {
        Ok(err) => Error::Api(err),
        Err(_) => Error::from_status(status, text),
    }
}

pin_project! {
    /// Server-sent events read from a response body.
    pub struct ServerSentEvents<S> {
        #[pin]
        stream: EventStream<S>,
        terminated: bool,
    }
}

impl<S> ServerSentEvents<S> {
    /// Initialize the events stream with a parsed event source
    pub fn new(stream: EventStream<S>) -> Self {
        Self {
            stream,
            terminated: false,
        }
    }
}

impl<S, B, E> Stream for ServerSentEvents<S>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    type Item = Result<Event>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        if *this.terminated {
            return Poll::Ready(None);
        }

        match this.stream.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(event))) => Poll::Ready(Some(Ok(event))),
            Poll::Ready(Some(Err(e))) => {
                *this.terminated = true;
                Poll::Ready(Some(Err(Error::TransportMessage(e.to_string()))))
            }
            Poll::Ready(None) => {
                *this.terminated = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// 解析响应
pub(crate) fn parse_response<T>(text: &str) -> Result<T>
where
    T: serde::de::DeserializeOwned,
{
    match serde_json::from_str::<T>(text) {
        Ok(data) => Ok(data),
        Err(e) => match serde_json::from_str::<ErrorResponse>(text) {
            Ok(err) => Err(Error::Api(err)),
            Err(_) => Err(e.into()),
        },
    }
}
