use async_trait::async_trait;
use http::StatusCode;
use tracing::debug;

use crate::middleware::{Middleware, Next};
use crate::{ChainError, Context};

/// The default fallback: answers `404 Not Found` with an empty body, then continues with the
/// caller's continuation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotFound;

#[async_trait]
impl Middleware for NotFound {
    async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), ChainError> {
        debug!(method = %ctx.method(), uri = %ctx.uri(), "no middleware answered the request");
        ctx.set_status(StatusCode::NOT_FOUND);
        ctx.response_body().close().await;
        next.run(ctx).await
    }
}
