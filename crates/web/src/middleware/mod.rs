//! Middleware and the compiled chain that runs them.
//!
//! A [`Middleware`] receives the request [`Context`] and a [`Next`] continuation. Calling
//! [`Next::run`] hands control to the rest of the chain and resolves once everything
//! downstream has finished; not calling it short-circuits the chain. Because `run` takes the
//! continuation by value, a middleware can continue at most once.
//!
//! Middleware are registered through a [`MiddlewareHandle`], whose identity (not the value of
//! the middleware) decides deduplication and removal in a [`Pipeline`](crate::Pipeline).

mod chain;
mod fallback;
mod next;

pub use chain::Chain;
pub use fallback::NotFound;
pub use next::Next;

use std::any::type_name;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::{ChainError, Context};

#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), ChainError>;
}

#[async_trait]
impl<M: Middleware + ?Sized> Middleware for Arc<M> {
    async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), ChainError> {
        (**self).handle(ctx, next).await
    }
}

#[async_trait]
impl<M: Middleware + ?Sized> Middleware for Box<M> {
    async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), ChainError> {
        (**self).handle(ctx, next).await
    }
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// The registration token of a middleware.
///
/// Every handle gets a process-unique id when created; clones share it. Two handles wrapping
/// the same middleware value are still two different registrations.
#[derive(Clone)]
pub struct MiddlewareHandle {
    id: u64,
    name: Arc<str>,
    middleware: Arc<dyn Middleware>,
}

impl MiddlewareHandle {
    pub fn new<M: Middleware + 'static>(middleware: M) -> Self {
        Self::named(type_name::<M>(), middleware)
    }

    pub fn named<S: AsRef<str>, M: Middleware + 'static>(name: S, middleware: M) -> Self {
        Self { id: NEXT_ID.fetch_add(1, Ordering::Relaxed), name: Arc::from(name.as_ref()), middleware: Arc::new(middleware) }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn middleware(&self) -> &Arc<dyn Middleware> {
        &self.middleware
    }
}

impl PartialEq for MiddlewareHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MiddlewareHandle {}

impl Hash for MiddlewareHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for MiddlewareHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareHandle").field("id", &self.id).field("name", &self.name).finish_non_exhaustive()
    }
}

/// A middleware backed by a closure, see [`middleware_fn`].
pub struct FnMiddleware<F> {
    f: F,
}

#[async_trait]
impl<F> Middleware for FnMiddleware<F>
where
    F: for<'a> Fn(&'a mut Context, Next<'a>) -> BoxFuture<'a, Result<(), ChainError>> + Send + Sync,
{
    async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), ChainError> {
        (self.f)(ctx, next).await
    }
}

impl<F> fmt::Debug for FnMiddleware<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnMiddleware").finish_non_exhaustive()
    }
}

/// Turns a closure into a middleware.
///
/// ```
/// use brook_web::{middleware_fn, MiddlewareHandle};
/// use futures::FutureExt;
/// use http::StatusCode;
///
/// let teapot = middleware_fn(|ctx, next| {
///     async move {
///         ctx.set_status(StatusCode::IM_A_TEAPOT);
///         next.run(ctx).await
///     }
///     .boxed()
/// });
/// let handle = MiddlewareHandle::named("teapot", teapot);
/// assert_eq!(handle.name(), "teapot");
/// ```
pub fn middleware_fn<F>(f: F) -> FnMiddleware<F>
where
    F: for<'a> Fn(&'a mut Context, Next<'a>) -> BoxFuture<'a, Result<(), ChainError>> + Send + Sync,
{
    FnMiddleware { f }
}

/// Turns a closure into a fallback. The closure receives the continuation of whoever invoked
/// the chain, which is [`Next::end`] for a dispatched request.
pub fn fallback_fn<F>(f: F) -> FnMiddleware<F>
where
    F: for<'a> Fn(&'a mut Context, Next<'a>) -> BoxFuture<'a, Result<(), ChainError>> + Send + Sync,
{
    FnMiddleware { f }
}
