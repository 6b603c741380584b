//! Ordered middleware around the transport.
//!
//! A [`MiddlewareChain`] is an explicit list: middleware run in insertion
//! order, each one deciding whether and how to call the rest of the chain via
//! [`Next::run`]. The transport sits at the end.
//!
//! ```
//! use async_trait::async_trait;
//! use dify_client_core::{
//!     middleware::{Middleware, MiddlewareChain, Next},
//!     request::RequestSpec,
//!     response::ResponseEnvelope,
//!     Result,
//! };
//! use std::sync::Arc;
//!
//! struct TraceHeader;
//!
//! #[async_trait]
//! impl Middleware for TraceHeader {
//!     fn name(&self) -> &str {
//!         "trace-header"
//!     }
//!
//!     async fn handle(&self, request: RequestSpec, next: Next<'_>) -> Result<ResponseEnvelope> {
//!         let request = request.to_builder().set_header("X-Trace", "1").build()?;
//!         next.run(request).await
//!     }
//! }
//!
//! let mut chain = MiddlewareChain::new();
//! assert!(chain.push_unique(Arc::new(TraceHeader)));
//! assert!(!chain.push_unique(Arc::new(TraceHeader)));
//! assert_eq!(chain.len(), 1);
//! ```

use crate::{
    error::Result, request::RequestSpec, response::ResponseEnvelope, transport::Transport,
};
use async_trait::async_trait;
use std::{fmt, sync::Arc};

/// One step of the chain.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Identifies the middleware for [`MiddlewareChain::push_unique`].
    fn name(&self) -> &str;

    /// Handles `request`, usually by awaiting `next.run(..)`.
    async fn handle(&self, request: RequestSpec, next: Next<'_>) -> Result<ResponseEnvelope>;
}

/// The remainder of the chain.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    middlewares: &'a [Arc<dyn Middleware>],
    transport: &'a dyn Transport,
}

impl<'a> Next<'a> {
    pub(crate) fn new(middlewares: &'a [Arc<dyn Middleware>], transport: &'a dyn Transport) -> Self {
        Self {
            middlewares,
            transport,
        }
    }

    /// Passes `request` to the next middleware, or to the transport at the end.
    pub async fn run(self, request: RequestSpec) -> Result<ResponseEnvelope> {
        match self.middlewares.split_first() {
            Some((current, rest)) => {
                current
                    .handle(request, Next::new(rest, self.transport))
                    .await
            }
            None => self.transport.execute(&request).await,
        }
    }
}

/// Middleware in execution order.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a middleware, even if one with the same name is present.
    pub fn push(&mut self, middleware: Arc<dyn Middleware>) {
        self.middlewares.push(middleware);
    }

    /// Appends a middleware unless one with the same name is present.
    ///
    /// Returns whether it was added.
    pub fn push_unique(&mut self, middleware: Arc<dyn Middleware>) -> bool {
        if self.contains(middleware.name()) {
            return false;
        }
        self.middlewares.push(middleware);
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.middlewares.iter().any(|m| m.name() == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.middlewares.iter().map(|m| m.name())
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Runs `request` through every middleware and then `transport`.
    pub async fn execute(
        &self,
        transport: &dyn Transport,
        request: RequestSpec,
    ) -> Result<ResponseEnvelope> {
        Next::new(&self.middlewares, transport).run(request).await
    }
}
