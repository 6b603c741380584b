//! Redaction of sensitive values before they reach the logs.
//!
//! Three independent operations are provided, each pure and idempotent:
//!
//! - [`MaskingEngine::mask_headers`]: header values whose name contains a
//!   sensitive token are replaced by [`MASK_VALUE`].
//! - [`MaskingEngine::mask_body`]: `"field": "value"` and `field=value` pairs
//!   are masked by the [`MaskingRule`] registered for the field, at any depth
//!   and without parsing the payload.
//! - [`mask_url`]: query values of well-known credential keys become
//!   [`URL_MASK`].
//!
//! # Examples
//!
//! ```
//! use dify_client_core::masking::{mask_url, MaskingEngine};
//!
//! let engine = MaskingEngine::default();
//! assert_eq!(
//!     engine.mask_body(r#"{"Password":"secret123","username":"john"}"#),
//!     r#"{"Password":"***MASKED***","username":"john"}"#
//! );
//! assert_eq!(
//!     engine.mask_body(r#"{"phone":"13812345678"}"#),
//!     r#"{"phone":"138****5678"}"#
//! );
//! assert_eq!(
//!     mask_url("/v1/files?api_key=abc&page=2#top"),
//!     "/v1/files?api_key=***&page=2#top"
//! );
//! ```

use crate::headers::HttpHeaders;
use regex::{Captures, Regex};
use std::{collections::BTreeSet, sync::OnceLock};
use url::form_urlencoded;

/// Replacement for masked header and body values.
pub const MASK_VALUE: &str = "***MASKED***";

/// Replacement for masked URL query values.
pub const URL_MASK: &str = "***";

/// Appended to bodies cut at the configured maximum length.
pub const TRUNCATED_SUFFIX: &str = "... (truncated)";

/// Header name tokens masked by default, matched as case-insensitive substrings.
pub const DEFAULT_SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "api-key",
    "apikey",
    "token",
    "cookie",
    "secret",
    "password",
    "credential",
    "session",
];

/// Query keys whose values are masked by [`mask_url`].
pub const SENSITIVE_QUERY_KEYS: &[&str] = &[
    "api_key",
    "apiKey",
    "api-key",
    "access_token",
    "accessToken",
    "refresh_token",
    "refreshToken",
    "bearer_token",
    "bearerToken",
    "session_token",
    "sessionToken",
    "password",
    "secret",
    "authorization",
    "auth",
    "token",
];

/// Whether a rule hides the whole value or keeps its edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaskingKind {
    /// Replace with [`MASK_VALUE`].
    Full,
    /// Keep a prefix and suffix, fill the middle with the mask char.
    Partial,
}

/// Shape of the value a rule masks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Generic,
    Phone,
    IdCard,
    Email,
    Token,
}

/// How values of a set of fields are masked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskingRule {
    name: String,
    fields: BTreeSet<String>,
    kind: MaskingKind,
    value_kind: ValueKind,
    keep_prefix: usize,
    keep_suffix: usize,
    mask_char: char,
    min_length: usize,
}

impl MaskingRule {
    /// A rule replacing the whole value of `fields`.
    pub fn full<I, S>(name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            name: name.into(),
            fields: lower_set(fields),
            kind: MaskingKind::Full,
            value_kind: ValueKind::Generic,
            keep_prefix: 0,
            keep_suffix: 0,
            mask_char: '*',
            min_length: 0,
        }
    }

    /// A rule keeping `keep_prefix` and `keep_suffix` characters.
    ///
    /// Values shorter than `min_length` are fully masked.
    pub fn partial<I, S>(
        name: impl Into<String>,
        value_kind: ValueKind,
        fields: I,
        keep_prefix: usize,
        keep_suffix: usize,
        min_length: usize,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            name: name.into(),
            fields: lower_set(fields),
            kind: MaskingKind::Partial,
            value_kind,
            keep_prefix,
            keep_suffix,
            mask_char: '*',
            min_length,
        }
    }

    /// Phone numbers: `138****5678`.
    pub fn phone() -> Self {
        Self::partial(
            "phone",
            ValueKind::Phone,
            ["phone", "mobile", "tel", "telephone"],
            3,
            4,
            7,
        )
    }

    /// Identity card numbers: `110101********1234`.
    pub fn id_card() -> Self {
        Self::partial(
            "idcard",
            ValueKind::IdCard,
            ["idcard", "id_card", "identity", "identity_no", "idnumber"],
            6,
            4,
            10,
        )
    }

    /// E-mail addresses; only the local part is masked: `jo***n@example.com`.
    pub fn email() -> Self {
        Self::partial("email", ValueKind::Email, ["email", "mail"], 2, 1, 3)
    }

    /// Credentials and secrets, always fully masked.
    pub fn token() -> Self {
        let mut rule = Self::full(
            "token",
            [
                "password",
                "token",
                "secret",
                "apikey",
                "api_key",
                "authorization",
                "credential",
                "x-api-key",
                "api-key",
                "x-auth-token",
                "cookie",
                "set-cookie",
                "access_token",
                "accessToken",
                "refresh_token",
                "refreshToken",
                "bearer_token",
                "bearerToken",
                "session_token",
                "sessionToken",
            ],
        );
        rule.value_kind = ValueKind::Token;
        rule
    }

    /// Character used to fill the masked middle of partial rules.
    pub fn mask_char(mut self, mask_char: char) -> Self {
        self.mask_char = mask_char;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> MaskingKind {
        self.kind
    }

    pub fn value_kind(&self) -> ValueKind {
        self.value_kind
    }

    /// Lower-cased field names covered by this rule.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(String::as_str)
    }

    /// Case-insensitive exact match on the field name.
    pub fn matches(&self, field: &str) -> bool {
        self.fields.contains(&field.to_lowercase())
    }

    /// Masks `value` according to this rule.
    pub fn apply(&self, value: &str) -> String {
        if value.is_empty() || value == MASK_VALUE {
            return value.to_string();
        }
        if self.kind == MaskingKind::Full {
            return MASK_VALUE.to_string();
        }
        if value.chars().count() < self.min_length {
            return MASK_VALUE.to_string();
        }
        match self.value_kind {
            ValueKind::Email => self.mask_email(value),
            _ => self
                .keep_edges(value)
                .unwrap_or_else(|| MASK_VALUE.to_string()),
        }
    }

    fn keep_edges(&self, value: &str) -> Option<String> {
        let chars: Vec<char> = value.chars().collect();
        if chars.len() < self.keep_prefix + self.keep_suffix {
            return None;
        }
        let middle = chars.len() - self.keep_prefix - self.keep_suffix;
        let mut out = String::with_capacity(value.len());
        out.extend(&chars[..self.keep_prefix]);
        out.extend(std::iter::repeat(self.mask_char).take(middle));
        out.extend(&chars[chars.len() - self.keep_suffix..]);
        Some(out)
    }

    fn mask_email(&self, value: &str) -> String {
        let at = match value.find('@') {
            Some(at) if at > 0 => at,
            _ => return MASK_VALUE.to_string(),
        };
        let (local, domain) = value.split_at(at);
        match self.keep_edges(local) {
            Some(masked) => masked + domain,
            None => {
                let hidden: String = std::iter::repeat(self.mask_char)
                    .take(local.chars().count())
                    .collect();
                hidden + domain
            }
        }
    }
}

fn lower_set<I, S>(fields: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    fields
        .into_iter()
        .map(|f| f.as_ref().to_lowercase())
        .collect()
}

/// Ordered rule registry; the first rule matching a field wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskingRules {
    rules: Vec<MaskingRule>,
}

impl Default for MaskingRules {
    fn default() -> Self {
        Self {
            rules: vec![
                MaskingRule::phone(),
                MaskingRule::id_card(),
                MaskingRule::email(),
                MaskingRule::token(),
            ],
        }
    }
}

impl MaskingRules {
    /// A registry without any rule.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Starts a registry; call [`MaskingRulesBuilder::with_defaults`] to
    /// include the built-in rules.
    pub fn builder() -> MaskingRulesBuilder {
        MaskingRulesBuilder::default()
    }

    /// The rule for `field`, if any.
    pub fn find(&self, field: &str) -> Option<&MaskingRule> {
        let lower = field.to_lowercase();
        self.rules.iter().find(|rule| rule.fields.contains(&lower))
    }

    /// Whether `field` is covered by a rule.
    pub fn is_sensitive(&self, field: &str) -> bool {
        self.find(field).is_some()
    }

    pub fn rules(&self) -> &[MaskingRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Builder for [`MaskingRules`].
#[derive(Debug, Clone, Default)]
#[must_use]
pub struct MaskingRulesBuilder {
    rules: Vec<MaskingRule>,
    extra_fields: Vec<String>,
}

impl MaskingRulesBuilder {
    /// Adds the built-in phone, id card, email and token rules.
    pub fn with_defaults(mut self) -> Self {
        self.rules.extend(MaskingRules::default().rules);
        self
    }

    /// Adds a rule; earlier rules take precedence.
    pub fn rule(mut self, rule: MaskingRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Marks `field` as fully masked.
    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.extra_fields.push(field.into());
        self
    }

    pub fn build(self) -> MaskingRules {
        let mut rules = self.rules;
        if !self.extra_fields.is_empty() {
            rules.push(MaskingRule::full("custom", self.extra_fields));
        }
        MaskingRules { rules }
    }
}

/// Settings of a [`MaskingEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskingConfig {
    /// When `false` every operation returns its input unchanged.
    pub enabled: bool,
    /// Maximum body length in characters after masking; `0` disables truncation.
    pub max_body_length: usize,
    /// Body field rules.
    pub rules: MaskingRules,
    /// Header name tokens, matched as case-insensitive substrings.
    pub sensitive_headers: Vec<String>,
}

impl Default for MaskingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_body_length: 0,
            rules: MaskingRules::default(),
            sensitive_headers: DEFAULT_SENSITIVE_HEADERS
                .iter()
                .map(|h| h.to_string())
                .collect(),
        }
    }
}

/// Applies a [`MaskingConfig`] to headers, bodies, URLs and single values.
///
/// Immutable once built; share it behind an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct MaskingEngine {
    config: MaskingConfig,
}

impl MaskingEngine {
    pub fn new(config: MaskingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MaskingConfig {
        &self.config
    }

    /// Replaces every value of sensitive headers with [`MASK_VALUE`].
    pub fn mask_headers(&self, headers: &HttpHeaders) -> HttpHeaders {
        if !self.config.enabled {
            return headers.clone();
        }
        mask_headers_with(headers, &self.config.sensitive_headers)
    }

    /// Masks sensitive fields of a JSON or form payload, then truncates.
    pub fn mask_body(&self, body: &str) -> String {
        if !self.config.enabled {
            return body.to_string();
        }
        mask_body_by(body, &self.config.rules, self.config.max_body_length)
    }

    /// Masks a single value with the rule registered for `field`.
    pub fn mask_value(&self, field: &str, value: &str) -> String {
        if !self.config.enabled {
            return value.to_string();
        }
        match self.config.rules.find(field) {
            Some(rule) => rule.apply(value),
            None => value.to_string(),
        }
    }

    /// Masks credential query values; see [`mask_url`].
    pub fn mask_url(&self, url: &str) -> String {
        if !self.config.enabled {
            return url.to_string();
        }
        mask_url(url)
    }
}

/// Masks headers whose lower-cased name contains any of `sensitive`.
pub fn mask_headers_with<S: AsRef<str>>(headers: &HttpHeaders, sensitive: &[S]) -> HttpHeaders {
    let tokens: Vec<String> = sensitive
        .iter()
        .map(|s| s.as_ref().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect();
    let mut masked = HttpHeaders::new();
    for (name, values) in headers.iter() {
        let lower = name.to_lowercase();
        if tokens.iter().any(|token| lower.contains(token.as_str())) {
            masked.add_all(name, values.iter().map(|_| MASK_VALUE));
        } else {
            masked.add_all(name, values.iter().cloned());
        }
    }
    masked
}

/// Fully masks `fields` in `body` and truncates to `max_length` characters.
pub fn mask_body_with<S: AsRef<str>>(body: &str, fields: &[S], max_length: usize) -> String {
    let rules = MaskingRules {
        rules: vec![MaskingRule::full("custom", fields)],
    };
    mask_body_by(body, &rules, max_length)
}

fn json_pair() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#""((?:[^"\\]|\\.)*)"(\s*:\s*)"((?:[^"\\]|\\.)*)""#)
            .unwrap_or_else(|e| unreachable!("invalid JSON pair pattern: {e}"))
    })
}

fn form_pair() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(^|[&?;\s])([^=&?;\s]+)=([^&\s]*)")
            .unwrap_or_else(|e| unreachable!("invalid form pair pattern: {e}"))
    })
}

fn looks_like_json(body: &str) -> bool {
    let trimmed = body.trim();
    (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'))
}

fn decode_key(key: &str) -> String {
    form_urlencoded::parse(key.as_bytes())
        .next()
        .map(|(k, _)| k.into_owned())
        .unwrap_or_else(|| key.to_string())
}

fn mask_body_by(body: &str, rules: &MaskingRules, max_length: usize) -> String {
    if body.is_empty() {
        return String::new();
    }
    if max_length > 0
        && body.ends_with(TRUNCATED_SUFFIX)
        && body.chars().count() <= max_length + TRUNCATED_SUFFIX.chars().count()
    {
        return body.to_string();
    }

    let masked = if rules.is_empty() {
        body.to_string()
    } else if looks_like_json(body) {
        mask_json_pairs(body, rules)
    } else {
        // free text may mix quoted pairs with key=value pairs
        let masked = mask_json_pairs(body, rules);
        if masked.contains('=') {
            mask_form_pairs(&masked, rules)
        } else {
            masked
        }
    };

    truncate(masked, max_length)
}

fn mask_json_pairs(body: &str, rules: &MaskingRules) -> String {
    json_pair()
        .replace_all(body, |caps: &Captures| match rules.find(&caps[1]) {
            Some(rule) => format!("\"{}\"{}\"{}\"", &caps[1], &caps[2], rule.apply(&caps[3])),
            None => caps[0].to_string(),
        })
        .into_owned()
}

fn mask_form_pairs(body: &str, rules: &MaskingRules) -> String {
    form_pair()
        .replace_all(body, |caps: &Captures| match rules.find(&decode_key(&caps[2])) {
            Some(rule) => format!("{}{}={}", &caps[1], &caps[2], rule.apply(&caps[3])),
            None => caps[0].to_string(),
        })
        .into_owned()
}

fn truncate(text: String, max_length: usize) -> String {
    if max_length == 0 {
        return text;
    }
    match text.char_indices().nth(max_length) {
        Some((cut, _)) => format!("{}{TRUNCATED_SUFFIX}", &text[..cut]),
        None => text,
    }
}

/// Replaces the values of [`SENSITIVE_QUERY_KEYS`] in the query string with [`URL_MASK`].
///
/// Keys are compared case-insensitively after percent-decoding. The path,
/// the fragment, separators and every other pair are kept byte for byte.
pub fn mask_url(url: &str) -> String {
    let (before_fragment, fragment) = match url.find('#') {
        Some(idx) => url.split_at(idx),
        None => (url, ""),
    };
    let Some(q) = before_fragment.find('?') else {
        return url.to_string();
    };
    let (path, query) = (&before_fragment[..q], &before_fragment[q + 1..]);
    if query.is_empty() {
        return url.to_string();
    }

    let pairs: Vec<String> = query
        .split('&')
        .map(|pair| match pair.split_once('=') {
            Some((key, _)) if is_sensitive_query_key(key) => format!("{key}={URL_MASK}"),
            _ => pair.to_string(),
        })
        .collect();
    format!("{path}?{}{fragment}", pairs.join("&"))
}

fn is_sensitive_query_key(key: &str) -> bool {
    let decoded = decode_key(key);
    SENSITIVE_QUERY_KEYS
        .iter()
        .any(|k| k.eq_ignore_ascii_case(&decoded))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_masks_password_case_insensitively() {
        let engine = MaskingEngine::default();
        for key in ["password", "Password", "PASSWORD"] {
            let body = format!(r#"{{"{key}":"secret123","username":"john"}}"#);
            let expected = format!(r#"{{"{key}":"***MASKED***","username":"john"}}"#);
            assert_eq!(engine.mask_body(&body), expected);
        }
    }

    #[test]
    fn body_masks_nested_fields_and_keeps_formatting() {
        let body = "{\n  \"user\": {\n    \"name\": \"x\",\n    \"access_token\" :  \"abc\\\"def\"\n  },\n  \"list\": [{\"secret\": \"s\"}]\n}";
        let masked = MaskingEngine::default().mask_body(body);
        assert!(masked.contains("\"access_token\" :  \"***MASKED***\""));
        assert!(masked.contains("\"secret\": \"***MASKED***\""));
        assert!(masked.contains("\"name\": \"x\""));
        assert!(masked.starts_with("{\n  \"user\": {"));
    }

    #[test]
    fn body_masking_does_not_require_valid_json() {
        let masked = MaskingEngine::default().mask_body(r#"prefix "token":"abc", "n":1 ..."#);
        assert_eq!(masked, r#"prefix "token":"***MASKED***", "n":1 ..."#);
    }

    #[test]
    fn form_bodies_with_quoted_pairs_are_masked() {
        let engine = MaskingEngine::default();
        assert_eq!(
            engine.mask_body(r#"password=hunter2&note="a":"b""#),
            r#"password=***MASKED***&note="a":"b""#
        );
        assert_eq!(
            engine.mask_body(r#"log "token":"abc" then secret=s1"#),
            r#"log "token":"***MASKED***" then secret=***MASKED***"#
        );
        let once = engine.mask_body(r#"password=hunter2&note="a":"b""#);
        assert_eq!(engine.mask_body(&once), once);
    }

    #[test]
    fn form_bodies_are_masked() {
        let engine = MaskingEngine::default();
        assert_eq!(
            engine.mask_body("username=john&password=p%40ss&api_key=k"),
            "username=john&password=***MASKED***&api_key=***MASKED***"
        );
        assert_eq!(engine.mask_body("password=&x=1"), "password=&x=1");
    }

    #[test]
    fn partial_rules() {
        let engine = MaskingEngine::default();
        assert_eq!(engine.mask_value("mobile", "13812345678"), "138****5678");
        assert_eq!(engine.mask_value("phone", "12345"), MASK_VALUE);
        assert_eq!(
            engine.mask_value("IdCard", "110101199001011234"),
            "110101********1234"
        );
        assert_eq!(engine.mask_value("email", "john@example.com"), "jo*n@example.com");
        assert_eq!(engine.mask_value("email", "invalid"), MASK_VALUE);
        assert_eq!(engine.mask_value("nickname", "bob"), "bob");
    }

    #[test]
    fn body_masking_is_idempotent() {
        let engine = MaskingEngine::new(MaskingConfig {
            max_body_length: 40,
            ..MaskingConfig::default()
        });
        let inputs = [
            r#"{"password":"secret123","username":"john"}"#,
            r#"{"phone":"123","email":"ab@c.d","mobile":"13812345678"}"#,
            "password=abcdefghijklmnopqrstuvwxyz0123456789&user=someone",
            "plain text without pairs",
            "",
        ];
        for input in inputs {
            let once = engine.mask_body(input);
            assert_eq!(engine.mask_body(&once), once, "input: {input}");
        }
    }

    #[test]
    fn truncation() {
        let masked = mask_body_with::<&str>("abcdefghij", &[], 4);
        assert_eq!(masked, format!("abcd{TRUNCATED_SUFFIX}"));
        assert_eq!(mask_body_with::<&str>("abcd", &[], 4), "abcd");
        assert_eq!(mask_body_with::<&str>("abcdefghij", &[], 0), "abcdefghij");
    }

    #[test]
    fn custom_fields() {
        let body = r#"{"my_field":"v","password":"p"}"#;
        assert_eq!(
            mask_body_with(body, &["MY_FIELD"], 0),
            r#"{"my_field":"***MASKED***","password":"p"}"#
        );
        let rules = MaskingRules::builder().with_defaults().field("pin").build();
        assert!(rules.is_sensitive("PIN"));
        assert!(rules.is_sensitive("refreshToken"));
        assert!(!MaskingRules::empty().is_sensitive("password"));
    }

    #[test]
    fn headers_are_masked_by_substring() {
        let headers: HttpHeaders = [
            ("Authorization", "Bearer abc"),
            ("X-Api-Key", "k"),
            ("Set-Cookie", "a=1"),
            ("set-cookie", "b=2"),
            ("Content-Type", "application/json"),
        ]
        .into_iter()
        .collect();
        let masked = MaskingEngine::default().mask_headers(&headers);
        assert_eq!(masked.get_or_empty("authorization"), [MASK_VALUE]);
        assert_eq!(masked.get_or_empty("x-api-key"), [MASK_VALUE]);
        assert_eq!(masked.get_or_empty("SET-COOKIE"), [MASK_VALUE, MASK_VALUE]);
        assert_eq!(masked.first("content-type"), Some("application/json"));
        assert_eq!(MaskingEngine::default().mask_headers(&masked), masked);

        let only_trace = mask_headers_with(&headers, &["x-api"]);
        assert_eq!(only_trace.first("authorization"), Some("Bearer abc"));
    }

    #[test]
    fn disabled_engine_is_identity() {
        let engine = MaskingEngine::new(MaskingConfig {
            enabled: false,
            ..MaskingConfig::default()
        });
        assert_eq!(engine.mask_body(r#"{"password":"x"}"#), r#"{"password":"x"}"#);
        assert_eq!(engine.mask_url("/a?token=x"), "/a?token=x");
    }

    #[test]
    fn url_masks_only_sensitive_values() {
        assert_eq!(
            mask_url("https://h/p/a?x=1&Token=abc&page=2#frag?token=z"),
            "https://h/p/a?x=1&Token=***&page=2#frag?token=z"
        );
        assert_eq!(mask_url("/a?api%5Fkey=s&q"), "/a?api%5Fkey=***&q");
        assert_eq!(mask_url("/a?ACCESSTOKEN=s"), "/a?ACCESSTOKEN=***");
        assert_eq!(mask_url("/a?my_token=s"), "/a?my_token=s");
    }

    #[test]
    fn url_edge_cases() {
        assert_eq!(mask_url("/plain/path"), "/plain/path");
        assert_eq!(mask_url("/trailing?"), "/trailing?");
        assert_eq!(mask_url("/frag#x"), "/frag#x");
        let once = mask_url("/a?password=p&auth=q&ok=1");
        assert_eq!(once, "/a?password=***&auth=***&ok=1");
        assert_eq!(mask_url(&once), once);
    }
}
