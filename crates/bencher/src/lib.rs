use async_trait::async_trait;
use brook_http::protocol::StreamChannel;
use brook_web::{ChainError, Context, Middleware, MiddlewareHandle, Next, Pipeline, Value};

#[derive(Debug, Copy, Clone)]
pub struct TestCase {
    name: &'static str,
    group: TestGroup,
    size: usize,
}

impl TestCase {
    pub fn new(name: &'static str, group: TestGroup, size: usize) -> Self {
        Self { name, group, size }
    }

    pub fn small(name: &'static str, size: usize) -> Self {
        Self::new(name, TestGroup::Small, size)
    }

    pub fn normal(name: &'static str, size: usize) -> Self {
        Self::new(name, TestGroup::Normal, size)
    }

    pub fn large(name: &'static str, size: usize) -> Self {
        Self::new(name, TestGroup::Large, size)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn group(&self) -> TestGroup {
        self.group
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

#[derive(Clone, Copy, Debug)]
pub enum TestGroup {
    Small,
    Normal,
    Large,
}

/// Continues without touching the context.
#[derive(Debug)]
pub struct Passthrough;

#[async_trait]
impl Middleware for Passthrough {
    async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), ChainError> {
        next.run(ctx).await
    }
}

/// A pipeline of `len` pass-through middleware in front of the default fallback.
pub fn passthrough_pipeline(len: usize) -> Pipeline {
    (0..len).fold(Pipeline::builder(), |builder, _| builder.with(MiddlewareHandle::new(Passthrough))).build()
}

/// A context writing its response to memory.
pub fn in_memory_context() -> Result<Context, ChainError> {
    let (response, _collected) = StreamChannel::collector();
    Ok(Context::builder().uri("/bench").response_body(response).build()?)
}

/// A record of `width` keys, each holding an array of resolved futures, nested `depth` times.
pub fn nested_value(width: usize, depth: usize) -> Value {
    if depth == 0 {
        return Value::Array((0..width).map(Value::ready).collect());
    }
    Value::record((0..width).map(|key| (format!("key_{key}"), nested_value(width, depth - 1))))
}
