use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::trace;

use crate::middleware::{Middleware, MiddlewareHandle, Next};
use crate::{ChainError, Context};

/// An immutable, compiled composition of middleware ending in a fallback.
///
/// A chain is built by folding the middleware list from the right, starting with the
/// fallback, so the first registered middleware is the outermost stage. Pre-`next` code thus
/// runs in registration order and post-`next` code in reverse order, after the fallback.
pub struct Chain {
    head: Stage,
    len: usize,
    version: u64,
}

pub(crate) enum Stage {
    Middleware { handle: MiddlewareHandle, next: Box<Stage> },
    Fallback(Arc<dyn Middleware>),
}

impl Chain {
    /// Compiles `middlewares` in order; with no middleware the chain is the fallback itself.
    pub fn compile(middlewares: &[MiddlewareHandle], fallback: Arc<dyn Middleware>, version: u64) -> Self {
        let head = middlewares
            .iter()
            .rev()
            .fold(Stage::Fallback(fallback), |next, handle| Stage::Middleware { handle: handle.clone(), next: Box::new(next) });

        Self { head, len: middlewares.len(), version }
    }

    /// Runs the chain from its head. The fallback continues with `outer`.
    pub fn run<'a>(&'a self, ctx: &'a mut Context, outer: Next<'a>) -> BoxFuture<'a, Result<(), ChainError>> {
        self.head.run(ctx, outer)
    }

    /// Number of middleware stages, the fallback excluded.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The registry version this chain was compiled from.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Stage names from head to tail, the fallback excluded.
    pub fn names(&self) -> Vec<&str> {
        let mut names = Vec::with_capacity(self.len);
        let mut stage = &self.head;
        while let Stage::Middleware { handle, next } = stage {
            names.push(handle.name());
            stage = next;
        }
        names
    }
}

impl Stage {
    pub(crate) fn run<'a>(&'a self, ctx: &'a mut Context, outer: Next<'a>) -> BoxFuture<'a, Result<(), ChainError>> {
        match self {
            Stage::Middleware { handle, next } => {
                trace!(middleware = handle.name(), "entering middleware");
                handle.middleware().as_ref().handle(ctx, Next::stage(next, outer))
            }
            Stage::Fallback(fallback) => {
                trace!("entering fallback");
                fallback.as_ref().handle(ctx, outer)
            }
        }
    }

    pub(crate) fn name(&self) -> &str {
        match self {
            Stage::Middleware { handle, .. } => handle.name(),
            Stage::Fallback(_) => "fallback",
        }
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain").field("version", &self.version).field("stages", &self.names()).finish()
    }
}
