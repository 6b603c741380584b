//! URI template expansion and incremental URI construction.
//!
//! Templates use `{name}` placeholders. They can be filled positionally (in
//! order of appearance) or by name. Resolution never substitutes an empty
//! string for a missing variable: it fails with [`Error::InvalidArgument`]
//! before any request is sent.
//!
//! ```
//! use dify_client_core::uri::{expand, UriBuilder};
//!
//! let path = expand("/console/api/apps/{app_id}/api-keys/{key_id}", &["a1", "k9"]).unwrap();
//! assert_eq!(path, "/console/api/apps/a1/api-keys/k9");
//!
//! let uri = UriBuilder::new("/console/api/apps")
//!     .query_param("page", 1)
//!     .query_param_opt("name", None::<&str>)
//!     .query_param_opt("mode", Some("chat"))
//!     .build()
//!     .unwrap();
//! assert_eq!(uri, "/console/api/apps?page=1&mode=chat");
//! ```

use crate::error::{Error, Result};
use std::{collections::HashMap, fmt::Display};
use url::form_urlencoded;

#[derive(Debug, PartialEq, Eq)]
enum Segment<'a> {
    Literal(&'a str),
    Variable(&'a str),
}

fn parse(template: &str) -> Result<Vec<Segment<'_>>> {
    let mut segments = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        if open > 0 {
            segments.push(Segment::Literal(&rest[..open]));
        }
        let after = &rest[open + 1..];
        let close = after.find('}').ok_or_else(|| {
            Error::InvalidArgument(format!("Unterminated URI variable in '{template}'"))
        })?;
        let name = after[..close].trim();
        if name.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "Empty URI variable in '{template}'"
            )));
        }
        segments.push(Segment::Variable(name));
        rest = &after[close + 1..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Literal(rest));
    }
    Ok(segments)
}

/// Whether the template still contains `{...}` placeholders.
pub fn has_placeholders(template: &str) -> bool {
    parse(template)
        .map(|segments| segments.iter().any(|s| matches!(s, Segment::Variable(_))))
        .unwrap_or(true)
}

/// Expands placeholders in order of appearance.
///
/// Extra values are ignored; too few values is an error naming the first
/// placeholder left unexpanded.
pub fn expand<V: Display>(template: &str, values: &[V]) -> Result<String> {
    let mut values = values.iter();
    let mut out = String::with_capacity(template.len());
    for segment in parse(template)? {
        match segment {
            Segment::Literal(text) => out.push_str(text),
            Segment::Variable(name) => {
                let value = values.next().ok_or_else(|| {
                    Error::InvalidArgument(format!(
                        "Not enough variable values available to expand '{name}'"
                    ))
                })?;
                out.push_str(&value.to_string());
            }
        }
    }
    Ok(out)
}

/// Expands placeholders by name.
pub fn expand_named<V: Display>(template: &str, values: &HashMap<String, V>) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    for segment in parse(template)? {
        match segment {
            Segment::Literal(text) => out.push_str(text),
            Segment::Variable(name) => {
                let value = values.get(name).ok_or_else(|| {
                    Error::InvalidArgument(format!("Map has no value for '{name}'"))
                })?;
                out.push_str(&value.to_string());
            }
        }
    }
    Ok(out)
}

/// Builds a path plus query string, skipping absent optional parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UriBuilder {
    path: String,
    query: Vec<(String, String)>,
}

impl UriBuilder {
    /// Starts from a path, which may itself be a template.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query: Vec::new(),
        }
    }

    /// Replaces the path.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Appends `key=value`.
    pub fn query_param(mut self, key: impl Into<String>, value: impl Display) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// Appends `key=value` only when the value is present and not empty.
    pub fn query_param_opt<V: Display>(self, key: impl Into<String>, value: Option<V>) -> Self {
        match value.map(|v| v.to_string()) {
            Some(v) if !v.is_empty() => self.query_param(key, v),
            _ => self,
        }
    }

    /// Appends one `key=value` pair per item.
    pub fn query_params<I, V>(mut self, key: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Display,
    {
        for value in values {
            self = self.query_param(key, value);
        }
        self
    }

    fn finish(&self, path: String) -> String {
        if self.query.is_empty() {
            return path;
        }
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.query.iter())
            .finish();
        format!("{path}?{query}")
    }

    /// Renders the URI; the path must not contain placeholders.
    pub fn build(&self) -> Result<String> {
        let path = expand::<&str>(&self.path, &[])?;
        Ok(self.finish(path))
    }

    /// Renders the URI, expanding path placeholders positionally.
    pub fn build_with<V: Display>(&self, values: &[V]) -> Result<String> {
        let path = expand(&self.path, values)?;
        Ok(self.finish(path))
    }
}
