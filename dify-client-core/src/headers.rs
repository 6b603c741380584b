//! Case-insensitive, multi-value header and cookie store.
//!
//! [`HttpHeaders`] keeps entries in insertion order. Lookups compare names
//! ASCII-case-insensitively and the stored name is whichever casing was
//! inserted first, so at most one entry exists per logical name.

use std::collections::BTreeMap;

/// `Authorization`
pub const AUTHORIZATION: &str = "Authorization";
/// `Content-Type`
pub const CONTENT_TYPE: &str = "Content-Type";
/// `Content-Length`
pub const CONTENT_LENGTH: &str = "Content-Length";
/// `Content-Disposition`
pub const CONTENT_DISPOSITION: &str = "Content-Disposition";
/// `Cookie`
pub const COOKIE: &str = "Cookie";
/// `Set-Cookie`
pub const SET_COOKIE: &str = "Set-Cookie";
/// `X-CSRF-Token`
pub const CSRF_TOKEN: &str = "X-CSRF-Token";

const BEARER_PREFIX: &str = "Bearer ";

/// Ordered multimap keyed case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct HttpHeaders {
    entries: Vec<(String, Vec<String>)>,
}

impl HttpHeaders {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(key, _)| key.eq_ignore_ascii_case(name))
    }

    /// Appends `value` under `name`, keeping existing values.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(idx) => self.entries[idx].1.push(value),
            None => self.entries.push((name, vec![value])),
        }
    }

    /// Appends every value under `name`.
    pub fn add_all<I, V>(&mut self, name: impl Into<String>, values: I)
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let name = name.into();
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        match self.position(&name) {
            Some(idx) => self.entries[idx].1.extend(values),
            None => self.entries.push((name, values)),
        }
    }

    /// Replaces all values under `name` with `value`.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(idx) => self.entries[idx].1 = vec![value],
            None => self.entries.push((name, vec![value])),
        }
    }

    /// Calls [`set`](Self::set) for every pair.
    pub fn set_all<'a, I>(&mut self, pairs: I)
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        for (name, value) in pairs {
            self.set(name, value);
        }
    }

    /// Writes `Authorization: Bearer <token>`.
    pub fn set_bearer_auth(&mut self, token: &str) {
        self.set(AUTHORIZATION, format!("{BEARER_PREFIX}{token}"));
    }

    /// All values under `name`, or `None` when absent.
    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.position(name).map(|idx| self.entries[idx].1.as_slice())
    }

    /// All values under `name`, or an empty slice when absent.
    pub fn get_or_empty(&self, name: &str) -> &[String] {
        self.get(name).unwrap_or(&[])
    }

    /// The first value under `name`.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Whether an entry exists for `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Removes the entry for `name`, returning its values.
    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        self.position(name).map(|idx| self.entries.remove(idx).1)
    }

    /// Number of distinct names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over `(name, values)` in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    /// First value of every entry.
    pub fn to_single_value_map(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .filter_map(|(name, values)| values.first().map(|v| (name.clone(), v.clone())))
            .collect()
    }

    /// The `Content-Type` value, if present.
    pub fn content_type(&self) -> Option<&str> {
        self.first(CONTENT_TYPE)
    }

    /// The parsed `Content-Length`; `None` stands for unknown.
    pub fn content_length(&self) -> Option<u64> {
        self.first(CONTENT_LENGTH)
            .and_then(|v| v.trim().parse::<u64>().ok())
    }

    /// Renders cookies as a single `Cookie` header value (`a=1; b=2`).
    pub fn to_cookie_header(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        let pairs: Vec<String> = self
            .iter()
            .flat_map(|(name, values)| values.iter().map(move |v| format!("{name}={v}")))
            .collect();
        Some(pairs.join("; "))
    }
}

impl<K, V> FromIterator<(K, V)> for HttpHeaders
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut headers = HttpHeaders::new();
        for (name, value) in iter {
            headers.add(name, value);
        }
        headers
    }
}

impl From<&reqwest::header::HeaderMap> for HttpHeaders {
    fn from(map: &reqwest::header::HeaderMap) -> Self {
        let mut headers = HttpHeaders::new();
        for (name, value) in map {
            headers.add(
                name.as_str(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            );
        }
        headers
    }
}
