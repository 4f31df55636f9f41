//! Writing handler results to the response.
//!
//! The [`Responder`] trait defines how a value is written to the response of a [`Context`].
//! Every implementation writes the body, if any, and then closes the response channel, so a
//! responded request is always finished.

use async_trait::async_trait;
use brook_http::protocol::StreamChannel;
use bytes::Bytes;
use http::StatusCode;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderValue};
use mime::Mime;

use crate::normalize::{Normalized, Value};
use crate::{ChainError, Context, NormalizeError};

#[async_trait]
pub trait Responder: Send {
    async fn respond_to(self, ctx: &mut Context) -> Result<(), ChainError>;
}

/// Writes a complete body with its content type and length, then closes the response.
async fn respond_with(ctx: &mut Context, content_type: &Mime, body: Bytes) -> Result<(), ChainError> {
    let headers = ctx.response_headers_mut();
    if !headers.contains_key(CONTENT_TYPE) {
        headers.insert(CONTENT_TYPE, HeaderValue::from_str(content_type.as_ref()).map_err(http::Error::from)?);
    }
    headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));

    if !body.is_empty() {
        ctx.response_body().write(body).await?;
    }
    ctx.response_body().close().await;
    Ok(())
}

/// Normalizes the value with the context's normalizer and answers it as JSON.
#[async_trait]
impl Responder for Value {
    async fn respond_to(self, ctx: &mut Context) -> Result<(), ChainError> {
        let normalized = ctx.normalize(self).await?;
        normalized.respond_to(ctx).await
    }
}

#[async_trait]
impl Responder for Normalized {
    async fn respond_to(self, ctx: &mut Context) -> Result<(), ChainError> {
        let body = self.to_vec().map_err(NormalizeError::from)?;
        respond_with(ctx, &mime::APPLICATION_JSON, body.into()).await
    }
}

#[async_trait]
impl Responder for serde_json::Value {
    async fn respond_to(self, ctx: &mut Context) -> Result<(), ChainError> {
        Value::from(self).respond_to(ctx).await
    }
}

#[async_trait]
impl Responder for String {
    async fn respond_to(self, ctx: &mut Context) -> Result<(), ChainError> {
        respond_with(ctx, &mime::TEXT_PLAIN_UTF_8, self.into()).await
    }
}

#[async_trait]
impl Responder for &'static str {
    async fn respond_to(self, ctx: &mut Context) -> Result<(), ChainError> {
        respond_with(ctx, &mime::TEXT_PLAIN_UTF_8, Bytes::from_static(self.as_bytes())).await
    }
}

#[async_trait]
impl Responder for Bytes {
    async fn respond_to(self, ctx: &mut Context) -> Result<(), ChainError> {
        respond_with(ctx, &mime::APPLICATION_OCTET_STREAM, self).await
    }
}

/// An empty body.
#[async_trait]
impl Responder for () {
    async fn respond_to(self, ctx: &mut Context) -> Result<(), ChainError> {
        ctx.response_body().close().await;
        Ok(())
    }
}

/// Pipes every chunk of the channel to the response, then closes both.
#[async_trait]
impl Responder for StreamChannel {
    async fn respond_to(self, ctx: &mut Context) -> Result<(), ChainError> {
        while let Some(chunk) = self.read().await? {
            if ctx.response_body().is_closed() {
                break;
            }
            ctx.response_body().write(chunk).await?;
        }
        self.close().await;
        ctx.response_body().close().await;
        Ok(())
    }
}

#[async_trait]
impl<T: Responder> Responder for (StatusCode, T) {
    async fn respond_to(self, ctx: &mut Context) -> Result<(), ChainError> {
        let (status, responder) = self;
        ctx.set_status(status);
        responder.respond_to(ctx).await
    }
}

/// `None` answers `204 No Content`.
#[async_trait]
impl<T: Responder> Responder for Option<T> {
    async fn respond_to(self, ctx: &mut Context) -> Result<(), ChainError> {
        match self {
            Some(responder) => responder.respond_to(ctx).await,
            None => (StatusCode::NO_CONTENT, ()).respond_to(ctx).await,
        }
    }
}

#[async_trait]
impl<T: Responder, E: Responder> Responder for Result<T, E> {
    async fn respond_to(self, ctx: &mut Context) -> Result<(), ChainError> {
        match self {
            Ok(responder) => responder.respond_to(ctx).await,
            Err(responder) => responder.respond_to(ctx).await,
        }
    }
}

#[async_trait]
impl<T: Responder> Responder for Box<T> {
    async fn respond_to(self, ctx: &mut Context) -> Result<(), ChainError> {
        (*self).respond_to(ctx).await
    }
}
