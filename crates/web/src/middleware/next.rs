use std::fmt;

use futures::future::{BoxFuture, FutureExt};

use crate::middleware::chain::Stage;
use crate::{ChainError, Context};

/// The rest of a chain, as seen from inside a middleware.
///
/// [`run`](Next::run) consumes the continuation; dropping it instead short-circuits
/// everything downstream.
pub struct Next<'a> {
    kind: Kind<'a>,
}

enum Kind<'a> {
    Stage { stage: &'a Stage, outer: Box<Next<'a>> },
    End,
}

impl<'a> Next<'a> {
    /// The terminal continuation: running it completes immediately.
    pub fn end() -> Self {
        Self { kind: Kind::End }
    }

    pub(crate) fn stage(stage: &'a Stage, outer: Next<'a>) -> Self {
        Self { kind: Kind::Stage { stage, outer: Box::new(outer) } }
    }

    pub fn is_end(&self) -> bool {
        matches!(self.kind, Kind::End)
    }

    /// Runs the remaining stages, resolving once all of them, the fallback included, have
    /// completed.
    pub fn run<'c>(self, ctx: &'c mut Context) -> BoxFuture<'c, Result<(), ChainError>>
    where
        'a: 'c,
    {
        match self.kind {
            Kind::Stage { stage, outer } => stage.run(ctx, *outer),
            Kind::End => futures::future::ready(Ok(())).boxed(),
        }
    }
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            Kind::Stage { stage, .. } => f.debug_struct("Next").field("stage", &stage.name()).finish_non_exhaustive(),
            Kind::End => f.write_str("Next::End"),
        }
    }
}
