//! This module re-exports the transport vocabulary shared by every layer of the crate.
//!
//! The re-exported items include:
//! - `Method`: An enum representing HTTP methods.
//! - `StatusCode`: An HTTP status code.
//! - `Bytes`: The cheaply clonable byte buffer used for bodies.
//!
//! It also defines [`StatusClass`], the status taxonomy surfaced to callers, and
//! [`ContentDisposition`], used when rendering multipart parts.
pub use bytes::Bytes;
pub use reqwest::{Method, StatusCode};

use std::fmt::{Display, Formatter, Result as FmtResult};

/// Coarse classification of an HTTP status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusClass {
    /// 1xx
    Informational,
    /// 2xx
    Success,
    /// 3xx
    Redirection,
    /// 4xx
    ClientError,
    /// 5xx
    ServerError,
}

impl StatusClass {
    /// Classifies a status code.
    ///
    /// # Example
    /// ```
    /// use dify_client_core::http::{StatusClass, StatusCode};
    /// assert_eq!(StatusClass::of(StatusCode::UNAUTHORIZED), StatusClass::ClientError);
    /// ```
    pub fn of(status: StatusCode) -> Self {
        match status.as_u16() {
            100..=199 => StatusClass::Informational,
            200..=299 => StatusClass::Success,
            300..=399 => StatusClass::Redirection,
            400..=499 => StatusClass::ClientError,
            _ => StatusClass::ServerError,
        }
    }
}

/// A `Content-Disposition` header value.
///
/// Rendered as `type; name="..."; filename="..."` with backslashes doubled and
/// embedded quotes escaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDisposition {
    kind: &'static str,
    name: Option<String>,
    filename: Option<String>,
}

impl ContentDisposition {
    /// `attachment` disposition.
    pub fn attachment() -> Self {
        Self::new("attachment")
    }

    /// `inline` disposition.
    pub fn inline() -> Self {
        Self::new("inline")
    }

    /// `form-data` disposition, used for multipart parts.
    pub fn form_data() -> Self {
        Self::new("form-data")
    }

    fn new(kind: &'static str) -> Self {
        Self {
            kind,
            name: None,
            filename: None,
        }
    }

    /// Sets the `name` parameter.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the `filename` parameter.
    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// The disposition type.
    pub fn kind(&self) -> &str {
        self.kind
    }
}

fn escape_quoted(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

impl Display for ContentDisposition {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        f.write_str(self.kind)?;
        if let Some(name) = &self.name {
            write!(f, "; name=\"{}\"", escape_quoted(name))?;
        }
        if let Some(filename) = &self.filename {
            write!(f, "; filename=\"{}\"", escape_quoted(filename))?;
        }
        Ok(())
    }
}
