use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use brook_http::protocol::StreamChannel;
use brook_web::{ChainError, Context, Middleware, MiddlewareHandle, Next, Normalizer, Pipeline, Value, middleware_fn};
use futures::FutureExt;
use http::{Method, StatusCode};
use serde::Serialize;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

#[derive(Serialize)]
struct Todo {
    id: u32,
    title: String,
    done: bool,
}

struct Timing;

#[async_trait]
impl Middleware for Timing {
    async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), ChainError> {
        let start = Instant::now();
        let result = next.run(ctx).await;
        info!(method = %ctx.method(), uri = %ctx.uri(), status = %ctx.status(), elapsed = ?start.elapsed(), "request finished");
        result
    }
}

struct RequireToken;

#[async_trait]
impl Middleware for RequireToken {
    async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), ChainError> {
        if ctx.headers().contains_key(http::header::AUTHORIZATION) {
            return next.run(ctx).await;
        }
        warn!(uri = %ctx.uri(), "missing token");
        ctx.respond((StatusCode::UNAUTHORIZED, "missing token\n")).await
    }
}

async fn load_todos() -> Result<Vec<Todo>, std::io::Error> {
    tokio::time::sleep(Duration::from_millis(5)).await;
    Ok(vec![
        Todo { id: 1, title: "write the pipeline".into(), done: true },
        Todo { id: 2, title: "ship it".into(), done: false },
    ])
}

fn todos() -> MiddlewareHandle {
    MiddlewareHandle::named(
        "todos",
        middleware_fn(|ctx, next| {
            async move {
                if ctx.uri().path() != "/todos" {
                    return next.run(ctx).await;
                }
                match *ctx.method() {
                    Method::GET => {
                        let todos = Value::future(async {
                            let todos = load_todos().await?;
                            Ok::<_, std::io::Error>(todos.into_iter().map(Value::opaque).collect::<Vec<_>>())
                        });
                        ctx.respond(Value::record([("todos", todos), ("count", Value::ready(2))])).await
                    }
                    Method::POST => {
                        let body = ctx.body_bytes().await?;
                        ctx.respond((StatusCode::CREATED, body)).await
                    }
                    _ => ctx.respond((StatusCode::METHOD_NOT_ALLOWED, ())).await,
                }
            }
            .boxed()
        }),
    )
}

async fn send(pipeline: &Pipeline, normalizer: &Arc<Normalizer>, method: Method, uri: &str, token: Option<&str>, body: &'static str) {
    let (response, collected) = StreamChannel::collector();
    let mut builder = Context::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(http::header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let mut ctx = match builder
        .request_body(StreamChannel::from_bytes(body))
        .response_body(response)
        .normalizer(Arc::clone(normalizer))
        .build()
    {
        Ok(ctx) => ctx,
        Err(e) => {
            warn!(cause = %e, "invalid request");
            return;
        }
    };

    if let Err(e) = pipeline.dispatch(&mut ctx).await {
        warn!(cause = %e, "request failed");
    }
    println!("{} {}", ctx.status(), collected.to_string_lossy());
}

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let normalizer = Arc::new(Normalizer::builder().stream_window(4).build());
    let todos = todos();
    let pipeline = Pipeline::builder().with(MiddlewareHandle::new(Timing)).with(todos.clone()).build();

    send(&pipeline, &normalizer, Method::GET, "/todos", None, "").await;
    send(&pipeline, &normalizer, Method::POST, "/todos", None, "{\"title\":\"new\"}").await;
    send(&pipeline, &normalizer, Method::GET, "/missing", None, "").await;

    // move the todos behind a token check; requests already running keep their chain
    let auth = MiddlewareHandle::new(RequireToken);
    pipeline.delete(&todos);
    pipeline.add(&auth);
    pipeline.add(&todos);
    info!(version = pipeline.version(), middlewares = ?pipeline.chain().names(), "pipeline updated");

    send(&pipeline, &normalizer, Method::GET, "/todos", None, "").await;
    send(&pipeline, &normalizer, Method::GET, "/todos", Some("demo"), "").await;
    send(&pipeline, &normalizer, Method::DELETE, "/todos", Some("demo"), "").await;
}
