//! Request-processing core: a mutable middleware pipeline and a value normalizer.
//!
//! - **Pipeline** ([`Pipeline`]): an ordered set of [`Middleware`] compiled into a [`Chain`]
//!   - every middleware gets the [`Context`] and a [`Next`] continuation
//!   - the fallback ([`NotFound`] by default) runs when the chain is exhausted
//!
//! - **Normalization** ([`normalize`]): turns a [`Value`], possibly holding futures, streams
//!   and typed Rust values, into a JSON-safe [`Normalized`] tree
//!
//! - **Responding** ([`Responder`]): writes a value to the response body and closes it
//!
//! # Example
//!
//! ```
//! use brook_http::protocol::StreamChannel;
//! use brook_web::{Context, MiddlewareHandle, Pipeline, Value, middleware_fn};
//! use futures::FutureExt;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let pipeline = Pipeline::new();
//! pipeline.add(&MiddlewareHandle::named(
//!     "hello",
//!     middleware_fn(|ctx, _next| {
//!         async move { ctx.respond(Value::record([("hello", Value::ready("world"))])).await }.boxed()
//!     }),
//! ));
//!
//! let (response, collected) = StreamChannel::collector();
//! let mut ctx = Context::builder().uri("/hello").response_body(response).build().unwrap();
//! pipeline.dispatch(&mut ctx).await.unwrap();
//!
//! assert_eq!(collected.to_string_lossy(), r#"{"hello":"world"}"#);
//! # }
//! ```

mod context;
mod error;
mod pipeline;
mod responder;

pub mod middleware;
pub mod normalize;

pub use context::Context;
pub use context::ContextBuilder;
pub use error::ChainError;
pub use error::NormalizeError;
pub use middleware::Chain;
pub use middleware::FnMiddleware;
pub use middleware::Middleware;
pub use middleware::MiddlewareHandle;
pub use middleware::Next;
pub use middleware::NotFound;
pub use middleware::fallback_fn;
pub use middleware::middleware_fn;
pub use normalize::Normalized;
pub use normalize::Normalizer;
pub use normalize::NormalizerBuilder;
pub use normalize::NormalizerConfig;
pub use normalize::Value;
pub use pipeline::Pipeline;
pub use pipeline::PipelineBuilder;
pub use responder::Responder;
