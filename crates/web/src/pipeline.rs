//! The mutable middleware registry and the entry point of a request.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use http::StatusCode;
use parking_lot::Mutex;
use tracing::{debug, error};

use crate::middleware::{Chain, Middleware, MiddlewareHandle, Next, NotFound};
use crate::{ChainError, Context};

/// An ordered set of middleware compiled into a [`Chain`].
///
/// Insertion order is execution order. Every mutation recompiles the chain before it returns
/// and publishes it atomically; an invocation runs the chain that was current when it
/// started, so mutating the pipeline never affects requests already in flight.
///
/// A pipeline is itself a [`Middleware`]: when its chain is exhausted, its fallback continues
/// with the continuation it was invoked with, which lets pipelines nest.
pub struct Pipeline {
    registry: Mutex<Registry>,
    chain: ArcSwap<Chain>,
    fallback: Arc<dyn Middleware>,
}

struct Registry {
    middlewares: Vec<MiddlewareHandle>,
    version: u64,
}

impl Registry {
    fn position(&self, handle: &MiddlewareHandle) -> Option<usize> {
        self.middlewares.iter().position(|registered| registered == handle)
    }
}

impl Pipeline {
    /// An empty pipeline answering every request with `404 Not Found`.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Appends `handle`, unless the same registration is already present.
    pub fn add(&self, handle: &MiddlewareHandle) -> bool {
        let mut registry = self.registry.lock();
        if registry.position(handle).is_some() {
            return false;
        }
        registry.middlewares.push(handle.clone());
        self.recompile(&mut registry);
        true
    }

    pub fn delete(&self, handle: &MiddlewareHandle) -> bool {
        let mut registry = self.registry.lock();
        let Some(index) = registry.position(handle) else {
            return false;
        };
        registry.middlewares.remove(index);
        self.recompile(&mut registry);
        true
    }

    pub fn clear(&self) {
        let mut registry = self.registry.lock();
        registry.middlewares.clear();
        self.recompile(&mut registry);
    }

    pub fn has(&self, handle: &MiddlewareHandle) -> bool {
        self.registry.lock().position(handle).is_some()
    }

    pub fn len(&self) -> usize {
        self.registry.lock().middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.lock().middlewares.is_empty()
    }

    /// A snapshot of the registered middleware, in execution order.
    pub fn middlewares(&self) -> Vec<MiddlewareHandle> {
        self.registry.lock().middlewares.clone()
    }

    pub fn iter(&self) -> impl Iterator<Item = MiddlewareHandle> {
        self.middlewares().into_iter()
    }

    /// Incremented by every mutation.
    pub fn version(&self) -> u64 {
        self.registry.lock().version
    }

    /// The chain that the next invocation will run.
    pub fn chain(&self) -> Arc<Chain> {
        self.chain.load_full()
    }

    /// Runs a request through the pipeline.
    ///
    /// The response body is closed afterwards whatever the outcome. When the chain fails the
    /// error is returned, and the response is marked `500 Internal Server Error` if nothing
    /// has been written to it yet.
    pub async fn dispatch(&self, ctx: &mut Context) -> Result<(), ChainError> {
        let result = self.handle(ctx, Next::end()).await;

        if let Err(e) = &result {
            error!(method = %ctx.method(), uri = %ctx.uri(), cause = %e, "request pipeline failed");
            if ctx.response_body().bytes_written() == 0 {
                ctx.set_status(StatusCode::INTERNAL_SERVER_ERROR);
            }
        }

        ctx.response_body().close().await;
        result
    }

    fn recompile(&self, registry: &mut Registry) {
        registry.version += 1;
        let chain = Chain::compile(&registry.middlewares, Arc::clone(&self.fallback), registry.version);
        self.chain.store(Arc::new(chain));
        debug!(version = registry.version, len = registry.middlewares.len(), "middleware chain recompiled");
    }
}

#[async_trait]
impl Middleware for Pipeline {
    async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), ChainError> {
        let chain = self.chain.load_full();
        chain.run(ctx, next).await
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline").field("chain", &self.chain.load_full()).finish_non_exhaustive()
    }
}

pub struct PipelineBuilder {
    middlewares: Vec<MiddlewareHandle>,
    fallback: Arc<dyn Middleware>,
}

impl PipelineBuilder {
    fn new() -> Self {
        Self { middlewares: Vec::new(), fallback: Arc::new(NotFound) }
    }

    /// Appends `handle`; a registration already present is ignored.
    pub fn with(mut self, handle: MiddlewareHandle) -> Self {
        if !self.middlewares.contains(&handle) {
            self.middlewares.push(handle);
        }
        self
    }

    /// Replaces the default [`NotFound`] fallback.
    pub fn fallback<M: Middleware + 'static>(mut self, fallback: M) -> Self {
        self.fallback = Arc::new(fallback);
        self
    }

    pub fn build(self) -> Pipeline {
        let chain = Chain::compile(&self.middlewares, Arc::clone(&self.fallback), 0);
        Pipeline {
            registry: Mutex::new(Registry { middlewares: self.middlewares, version: 0 }),
            chain: ArcSwap::from_pointee(chain),
            fallback: self.fallback,
        }
    }
}

impl fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineBuilder").field("middlewares", &self.middlewares).finish_non_exhaustive()
    }
}
