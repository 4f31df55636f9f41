//! The per-request state handed through a middleware chain.

use std::fmt;
use std::sync::Arc;

use brook_http::protocol::{ChannelError, StreamChannel};
use bytes::{Bytes, BytesMut};
use http::header::{HeaderName, HeaderValue};
use http::{Extensions, HeaderMap, Method, Request, Response, StatusCode, Uri, Version, request, response};

use crate::normalize::{Normalized, Normalizer, Value};
use crate::responder::Responder;
use crate::{ChainError, NormalizeError};

/// One request/response exchange.
///
/// A context owns the request head and body channel, the response head and body channel, and
/// a handle to the [`Normalizer`] used to turn returned values into JSON. Closing the response
/// body aborts the request body, so a middleware still waiting on a request read is released
/// once the response is finished.
pub struct Context {
    request: request::Parts,
    request_body: StreamChannel,
    response: response::Parts,
    response_body: StreamChannel,
    normalizer: Arc<Normalizer>,
}

impl Context {
    pub fn new(request: Request<StreamChannel>, response_body: StreamChannel, normalizer: Arc<Normalizer>) -> Self {
        let (request, request_body) = request.into_parts();
        let (response, ()) = Response::new(()).into_parts();

        let abandoned = request_body.clone();
        response_body.on_close(move || abandoned.abort());

        Self { request, request_body, response, response_body, normalizer }
    }

    pub fn builder() -> ContextBuilder {
        ContextBuilder::new()
    }

    pub fn method(&self) -> &Method {
        &self.request.method
    }

    pub fn uri(&self) -> &Uri {
        &self.request.uri
    }

    pub fn version(&self) -> Version {
        self.request.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.request.headers
    }

    pub fn request(&self) -> &request::Parts {
        &self.request
    }

    pub fn request_body(&self) -> &StreamChannel {
        &self.request_body
    }

    /// Reads the request body to its end.
    pub async fn body_bytes(&self) -> Result<Bytes, ChannelError> {
        let mut body = BytesMut::new();
        while let Some(chunk) = self.request_body.read().await? {
            body.extend_from_slice(&chunk);
        }
        Ok(body.freeze())
    }

    pub fn status(&self) -> StatusCode {
        self.response.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.response.status = status;
    }

    pub fn response(&self) -> &response::Parts {
        &self.response
    }

    pub fn response_headers(&self) -> &HeaderMap {
        &self.response.headers
    }

    pub fn response_headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.response.headers
    }

    pub fn response_body(&self) -> &StreamChannel {
        &self.response_body
    }

    /// Typed values attached by collaborators (route parameters, resolved services, ...).
    pub fn extensions(&self) -> &Extensions {
        &self.request.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.request.extensions
    }

    pub fn normalizer(&self) -> &Arc<Normalizer> {
        &self.normalizer
    }

    pub async fn normalize(&self, value: Value) -> Result<Normalized, NormalizeError> {
        self.normalizer.normalize(value).await
    }

    /// Writes `responder` to the response and closes it.
    pub async fn respond<R: Responder>(&mut self, responder: R) -> Result<(), ChainError> {
        responder.respond_to(self).await
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("method", &self.request.method)
            .field("uri", &self.request.uri)
            .field("status", &self.response.status)
            .field("request_body", &self.request_body)
            .field("response_body", &self.response_body)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct ContextBuilder {
    request: request::Builder,
    request_body: Option<StreamChannel>,
    response_body: Option<StreamChannel>,
    normalizer: Option<Arc<Normalizer>>,
}

impl ContextBuilder {
    fn new() -> Self {
        Self { request: Request::builder(), request_body: None, response_body: None, normalizer: None }
    }

    pub fn method<T>(mut self, method: T) -> Self
    where
        Method: TryFrom<T>,
        <Method as TryFrom<T>>::Error: Into<http::Error>,
    {
        self.request = self.request.method(method);
        self
    }

    pub fn uri<T>(mut self, uri: T) -> Self
    where
        Uri: TryFrom<T>,
        <Uri as TryFrom<T>>::Error: Into<http::Error>,
    {
        self.request = self.request.uri(uri);
        self
    }

    pub fn version(mut self, version: Version) -> Self {
        self.request = self.request.version(version);
        self
    }

    pub fn header<K, V>(mut self, key: K, value: V) -> Self
    where
        HeaderName: TryFrom<K>,
        <HeaderName as TryFrom<K>>::Error: Into<http::Error>,
        HeaderValue: TryFrom<V>,
        <HeaderValue as TryFrom<V>>::Error: Into<http::Error>,
    {
        self.request = self.request.header(key, value);
        self
    }

    pub fn extension<T: Clone + Send + Sync + 'static>(mut self, extension: T) -> Self {
        self.request = self.request.extension(extension);
        self
    }

    /// Defaults to an empty channel.
    pub fn request_body(mut self, body: StreamChannel) -> Self {
        self.request_body = Some(body);
        self
    }

    /// Defaults to a channel without writer, so writes to the response fail.
    pub fn response_body(mut self, body: StreamChannel) -> Self {
        self.response_body = Some(body);
        self
    }

    pub fn normalizer(mut self, normalizer: Arc<Normalizer>) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    pub fn build(self) -> Result<Context, http::Error> {
        let request = self.request.body(self.request_body.unwrap_or_else(StreamChannel::empty))?;
        let response_body = self.response_body.unwrap_or_else(StreamChannel::empty);
        Ok(Context::new(request, response_body, self.normalizer.unwrap_or_default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Clone, Debug, PartialEq)]
    struct UserId(u64);

    #[test]
    fn builder_fills_the_request_head() {
        let ctx = Context::builder()
            .method(Method::POST)
            .uri("/users?limit=1")
            .header("x-request-id", "abc")
            .extension(UserId(7))
            .build()
            .unwrap();

        assert_eq!(*ctx.method(), Method::POST);
        assert_eq!(ctx.uri().path(), "/users");
        assert_eq!(ctx.headers()["x-request-id"], "abc");
        assert_eq!(ctx.extensions().get::<UserId>(), Some(&UserId(7)));
        assert_eq!(ctx.status(), StatusCode::OK);
        assert!(!ctx.response_body().is_writable());
    }

    #[test]
    fn invalid_head_is_rejected() {
        assert!(Context::builder().header("bad header", "x").build().is_err());
    }

    #[tokio::test]
    async fn body_bytes_concatenates_chunks() {
        let (mut sender, body) = StreamChannel::pipe(4);
        sender.send("hello ").await.unwrap();
        sender.send("world").await.unwrap();
        sender.finish();

        let ctx = Context::builder().request_body(body).build().unwrap();
        assert_eq!(ctx.body_bytes().await.unwrap(), Bytes::from_static(b"hello world"));
    }

    #[tokio::test]
    async fn closing_the_response_releases_a_pending_request_read() {
        let (_sender, request) = StreamChannel::pipe(1);
        let (response, _collected) = StreamChannel::collector();
        let ctx = Context::builder().request_body(request).response_body(response).build().unwrap();

        let (read, ()) = futures::join!(ctx.request_body().read(), async {
            tokio::task::yield_now().await;
            ctx.response_body().close().await;
        });

        assert_eq!(read.unwrap(), None);
        assert!(ctx.request_body().is_closed());
    }

    #[tokio::test]
    async fn normalizes_with_the_shared_normalizer() {
        let normalizer = Arc::new(Normalizer::builder().max_depth(1).build());
        let ctx = Context::builder().normalizer(Arc::clone(&normalizer)).build().unwrap();

        let flat = ctx.normalize(Value::Array(vec![1.into()])).await.unwrap();
        assert_eq!(flat.to_json(), json!([1]));

        let nested = Value::Array(vec![Value::Array(vec![1.into()])]);
        assert!(matches!(ctx.normalize(nested).await, Err(NormalizeError::TooDeep { max_depth: 1 })));
        assert!(Arc::ptr_eq(ctx.normalizer(), &normalizer));
    }
}
