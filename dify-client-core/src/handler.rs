//! Status-driven error handlers.
//!
//! A [`StatusHandler`] pairs a status predicate with a callback. The client
//! runs every matching handler, in registration order, before handing the
//! response back; the first handler returning an error aborts the call with
//! [`Error::Handler`](crate::Error::Handler).
//!
//! ```
//! use dify_client_core::handler::{StatusHandler, StatusHandlers};
//!
//! let mut handlers = StatusHandlers::new();
//! handlers.push(StatusHandler::on_5xx(|resp| {
//!     anyhow::bail!("server error {}", resp.status())
//! }));
//! assert_eq!(handlers.len(), 1);
//! ```

use crate::{
    error::{Error, Result},
    http::{StatusClass, StatusCode},
    response::ResponseEnvelope,
};
use std::{fmt, sync::Arc};

type Predicate = Arc<dyn Fn(StatusCode) -> bool + Send + Sync>;
type Callback = Arc<dyn Fn(&ResponseEnvelope) -> anyhow::Result<()> + Send + Sync>;

/// A status predicate and what to do when it matches.
#[derive(Clone)]
pub struct StatusHandler {
    predicate: Predicate,
    callback: Callback,
}

impl fmt::Debug for StatusHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusHandler").finish_non_exhaustive()
    }
}

impl StatusHandler {
    /// Runs `callback` for statuses accepted by `predicate`.
    pub fn on_status<P, F>(predicate: P, callback: F) -> Self
    where
        P: Fn(StatusCode) -> bool + Send + Sync + 'static,
        F: Fn(&ResponseEnvelope) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
            callback: Arc::new(callback),
        }
    }

    /// Runs `callback` for 4xx statuses.
    pub fn on_4xx<F>(callback: F) -> Self
    where
        F: Fn(&ResponseEnvelope) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::on_status(
            |status| StatusClass::of(status) == StatusClass::ClientError,
            callback,
        )
    }

    /// Runs `callback` for 5xx statuses.
    pub fn on_5xx<F>(callback: F) -> Self
    where
        F: Fn(&ResponseEnvelope) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::on_status(
            |status| StatusClass::of(status) == StatusClass::ServerError,
            callback,
        )
    }

    /// Runs `callback` for exactly `code`.
    pub fn on_code<F>(code: StatusCode, callback: F) -> Self
    where
        F: Fn(&ResponseEnvelope) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::on_status(move |status| status == code, callback)
    }

    pub fn matches(&self, status: StatusCode) -> bool {
        (self.predicate)(status)
    }

    fn handle(&self, response: &ResponseEnvelope) -> Result<()> {
        (self.callback)(response).map_err(Error::Handler)
    }
}

/// Handlers in registration order.
#[derive(Clone, Debug, Default)]
pub struct StatusHandlers {
    handlers: Vec<StatusHandler>,
}

impl StatusHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, handler: StatusHandler) {
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Whether any handler applies to `status`.
    pub fn matches(&self, status: StatusCode) -> bool {
        self.handlers.iter().any(|h| h.matches(status))
    }

    /// Runs the handlers matching the response status; stops at the first error.
    pub fn check(&self, response: &ResponseEnvelope) -> Result<()> {
        let status = response.status();
        self.handlers
            .iter()
            .filter(|h| h.matches(status))
            .try_for_each(|h| h.handle(response))
    }
}
