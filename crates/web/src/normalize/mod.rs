//! Recursive conversion of application values into JSON-safe trees.
//!
//! The [`Normalizer`] walks a [`Value`] and produces a [`Normalized`] tree. It resolves every
//! suspending sub-value on the way, so the tree handed to a consumer never contains a pending
//! future or a function. For a value `v` the rules apply in this order:
//!
//! 1. an [`Opaque`] value whose type has a registered [`Transformer`] is rewritten by it and
//!    the output is normalized again, which allows layered transformations
//! 2. primitives are already normalized
//! 3. a function fails with [`NormalizeError::Function`]
//! 4. a future is awaited and its output normalized
//! 5. an array is normalized one element at a time, in index order
//! 6. a stream is pulled while earlier elements are still normalizing; results keep pull order
//! 7. a record has all its keys normalized concurrently; the map keeps key order
//!
//! An [`Opaque`] value without transformer falls back to its serde representation.

mod normalized;
mod transform;
mod value;

pub use normalized::Normalized;
pub use transform::{Transformer, Transformers};
pub use value::{Callable, Opaque, Value};

use brook_http::protocol::BoxError;
use futures::future::{BoxFuture, try_join_all};
use futures::{FutureExt, StreamExt, TryStreamExt};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::NormalizeError;

/// Tunables of a [`Normalizer`]; deserializable so it can live in a config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Maximum nesting, counting containers as well as transformer and future unwrapping.
    pub max_depth: usize,
    /// How many pulled stream elements may be normalizing at the same time.
    pub stream_window: usize,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self { max_depth: 128, stream_window: 16 }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    config: NormalizerConfig,
    transformers: Transformers,
}

impl Normalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> NormalizerBuilder {
        NormalizerBuilder::new()
    }

    pub fn config(&self) -> &NormalizerConfig {
        &self.config
    }

    pub fn transformers(&self) -> &Transformers {
        &self.transformers
    }

    pub async fn normalize(&self, value: Value) -> Result<Normalized, NormalizeError> {
        self.normalize_at(value, 0).await
    }

    fn normalize_at(&self, value: Value, depth: usize) -> BoxFuture<'_, Result<Normalized, NormalizeError>> {
        async move {
            if depth > self.config.max_depth {
                return Err(NormalizeError::TooDeep { max_depth: self.config.max_depth });
            }

            match value {
                Value::Opaque(opaque) => {
                    if let Some(transformer) = self.transformers.find(&opaque) {
                        trace!(type_name = transformer.type_name(), depth, "applying transformer");
                        let transformed = transformer.apply(opaque)?;
                        return self.normalize_at(transformed, depth + 1).await;
                    }
                    match opaque.to_json() {
                        Some(json) => self.normalize_at(Value::from(json?), depth + 1).await,
                        None => Err(NormalizeError::Unsupported { type_name: opaque.type_name() }),
                    }
                }

                Value::Undefined => Ok(Normalized::Undefined),
                Value::Null => Ok(Normalized::Null),
                Value::Bool(b) => Ok(Normalized::Bool(b)),
                Value::Number(n) => Ok(Normalized::Number(n)),
                Value::String(s) => Ok(Normalized::String(s)),

                Value::Function(callable) => Err(NormalizeError::function(callable.name())),

                Value::Future(future) => {
                    let resolved = future.await.map_err(NormalizeError::rejected)?;
                    self.normalize_at(resolved, depth + 1).await
                }

                Value::Array(items) => {
                    let mut normalized = Vec::with_capacity(items.len());
                    for item in items {
                        normalized.push(self.normalize_at(item, depth + 1).await?);
                    }
                    Ok(Normalized::Array(normalized))
                }

                Value::Stream(stream) => {
                    let window = self.config.stream_window.max(1);
                    let items = stream
                        .map(|item| self.normalize_item(item, depth + 1))
                        .buffered(window)
                        .boxed()
                        .try_collect::<Vec<_>>()
                        .await?;
                    trace!(len = items.len(), depth, "stream drained");
                    Ok(Normalized::Array(items))
                }

                Value::Record(fields) => {
                    let entries = try_join_all(fields.into_iter().map(|(key, value)| async move {
                        let value = self.normalize_at(value, depth + 1).await?;
                        Ok::<_, NormalizeError>((key, value))
                    }))
                    .await?;
                    Ok(Normalized::Map(entries.into_iter().collect::<IndexMap<_, _>>()))
                }
            }
        }
        .boxed()
    }

    fn normalize_item(&self, item: Result<Value, BoxError>, depth: usize) -> BoxFuture<'_, Result<Normalized, NormalizeError>> {
        match item {
            Ok(value) => self.normalize_at(value, depth),
            Err(e) => futures::future::ready(Err(NormalizeError::rejected(e))).boxed(),
        }
    }
}

#[derive(Debug, Default)]
pub struct NormalizerBuilder {
    config: NormalizerConfig,
    transformers: Transformers,
}

impl NormalizerBuilder {
    fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: NormalizerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.config.max_depth = max_depth;
        self
    }

    pub fn stream_window(mut self, stream_window: usize) -> Self {
        self.config.stream_window = stream_window;
        self
    }

    /// Registers a transformer for values of type `T`. Transformers are checked in
    /// registration order.
    ///
    /// Only [`Value::Opaque`] values are matched: a transformer for `String` or `bool` fires on
    /// `Value::opaque(String::from(..))`, never on the primitive variants such as
    /// [`Value::String`], which are already normalized.
    pub fn transformer<T, F, V, E>(mut self, f: F) -> Self
    where
        T: Send + 'static,
        F: Fn(T) -> Result<V, E> + Send + Sync + 'static,
        V: Into<Value>,
        E: Into<BoxError>,
    {
        self.transformers.push(Transformer::new(f));
        self
    }

    pub fn build(self) -> Normalizer {
        Normalizer { config: self.config, transformers: self.transformers }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[derive(Serialize)]
    struct User {
        name: String,
        tags: Vec<String>,
    }

    struct Celsius(f64);
    struct Reading(Celsius);

    fn log() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[tokio::test]
    async fn primitives_pass_through() {
        let normalizer = Normalizer::new();

        assert_eq!(normalizer.normalize(Value::Undefined).await.unwrap(), Normalized::Undefined);
        assert_eq!(normalizer.normalize(Value::Null).await.unwrap(), Normalized::Null);
        assert_eq!(normalizer.normalize(true.into()).await.unwrap(), Normalized::Bool(true));
        assert_eq!(normalizer.normalize("text".into()).await.unwrap(), Normalized::String("text".into()));
        assert_eq!(normalizer.normalize(7.into()).await.unwrap().to_json(), json!(7));
    }

    #[tokio::test]
    async fn nested_future_resolves_in_place() {
        let normalizer = Normalizer::new();

        let value = Value::record([("a", 1.into()), ("b", Value::Array(vec![2.into(), Value::ready(3)]))]);
        assert_eq!(normalizer.normalize(value).await.unwrap().to_json(), json!({"a": 1, "b": [2, 3]}));

        let delayed = Value::future(async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok::<_, BoxError>(3)
        });
        let value = Value::record([("a", 1.into()), ("b", Value::Array(vec![2.into(), delayed]))]);
        let normalized = normalizer.normalize(value).await.unwrap();

        assert_eq!(normalized.to_json(), json!({"a": 1, "b": [2, 3]}));
        let Normalized::Map(map) = normalized else { panic!("expected a map") };
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn function_value_fails() {
        let normalizer = Normalizer::new();

        let err = normalizer.normalize(Value::function("handler", || {})).await.unwrap_err();
        assert!(matches!(err, NormalizeError::Function { ref name } if name == "handler"));

        let nested = Value::record([("ok", 1.into()), ("callback", Value::function("callback", || {}))]);
        assert!(matches!(normalizer.normalize(nested).await, Err(NormalizeError::Function { .. })));
    }

    #[test]
    fn empty_containers_complete_without_suspending() {
        let normalizer = Normalizer::new();

        let array = normalizer.normalize(Value::Array(vec![])).now_or_never().unwrap().unwrap();
        assert_eq!(array, Normalized::Array(vec![]));

        let record = normalizer.normalize(Value::Record(vec![])).now_or_never().unwrap().unwrap();
        assert_eq!(record, Normalized::Map(IndexMap::new()));
    }

    #[tokio::test]
    async fn array_elements_are_normalized_one_at_a_time() {
        let normalizer = Normalizer::new();
        let events = log();

        let element = |index: usize, delay: u64| {
            let events = events.clone();
            Value::future(async move {
                events.lock().push(format!("start {index}"));
                tokio::time::sleep(Duration::from_millis(delay)).await;
                events.lock().push(format!("end {index}"));
                Ok::<_, BoxError>(index)
            })
        };

        let value = Value::Array(vec![element(0, 20), element(1, 0), element(2, 5)]);
        let normalized = normalizer.normalize(value).await.unwrap();

        assert_eq!(normalized.to_json(), json!([0, 1, 2]));
        assert_eq!(*events.lock(), vec!["start 0", "end 0", "start 1", "end 1", "start 2", "end 2"]);
    }

    #[tokio::test]
    async fn record_keys_are_normalized_concurrently() {
        let normalizer = Normalizer::new();
        let (sender, receiver) = oneshot::channel::<i32>();

        // `first` can only finish once `second` has started
        let first = Value::future(receiver);
        let second = Value::future(async move {
            sender.send(1).map_err(|_| "receiver dropped")?;
            Ok::<_, BoxError>(2)
        });

        let value = Value::record([("first", first), ("second", second)]);
        let normalized = normalizer.normalize(value).await.unwrap();
        assert_eq!(normalized.to_json(), json!({"first": 1, "second": 2}));
    }

    #[tokio::test]
    async fn stream_keeps_pull_order_when_later_elements_finish_first() {
        let normalizer = Normalizer::new();
        let events = log();
        let (sender, receiver) = oneshot::channel::<&'static str>();

        let slow_events = events.clone();
        let slow = Value::future(async move {
            let value = receiver.await?;
            slow_events.lock().push("slow done".to_string());
            Ok::<_, BoxError>(value)
        });
        let fast_events = events.clone();
        let fast = Value::future(async move {
            fast_events.lock().push("fast done".to_string());
            sender.send("slow").map_err(|_| "receiver dropped")?;
            Ok::<_, BoxError>("fast")
        });

        let stream = futures::stream::iter(vec![Ok::<_, BoxError>(slow), Ok(fast), Ok(Value::from("last"))]);
        let normalized = normalizer.normalize(Value::stream(stream)).await.unwrap();

        assert_eq!(normalized.to_json(), json!(["slow", "fast", "last"]));
        assert_eq!(*events.lock(), vec!["fast done", "slow done"]);
    }

    fn delayed<T: Into<Value> + Send + 'static>(value: T) -> Value {
        Value::future(async move {
            tokio::task::yield_now().await;
            Ok::<_, BoxError>(value)
        })
    }

    #[tokio::test]
    async fn stream_normalizes_on_a_spawned_task() {
        let normalizer = Arc::new(Normalizer::builder().stream_window(2).build());
        let stream = futures::stream::iter(vec![Ok::<_, BoxError>(delayed(1)), Ok(delayed("two")), Ok(delayed(true))]);

        let task = tokio::spawn({
            let normalizer = Arc::clone(&normalizer);
            async move { normalizer.normalize(Value::stream(stream)).await }
        });

        assert_eq!(task.await.unwrap().unwrap().to_json(), json!([1, "two", true]));
    }

    #[tokio::test]
    async fn stream_error_is_rejected() {
        let normalizer = Normalizer::new();
        let stream = futures::stream::iter(vec![Ok::<Value, BoxError>(1.into()), Err("source went away".into())]);

        let err = normalizer.normalize(Value::stream(stream)).await.unwrap_err();
        assert!(matches!(err, NormalizeError::Rejected { .. }));
    }

    #[tokio::test]
    async fn rejected_future_propagates_from_deep_inside() {
        let normalizer = Normalizer::new();
        let failing = Value::future(async { Err::<Value, _>("lookup failed") });
        let value = Value::record([("outer", Value::Array(vec![Value::record([("inner", failing)])]))]);

        let err = normalizer.normalize(value).await.unwrap_err();
        assert_eq!(err.to_string(), "pending value was rejected: lookup failed");
    }

    #[tokio::test]
    async fn transformers_layer() {
        let normalizer = Normalizer::builder()
            .transformer(|Reading(celsius): Reading| Ok::<_, BoxError>(Value::any(celsius)))
            .transformer(|Celsius(c): Celsius| Ok::<_, BoxError>(Value::record([("celsius", c.into())])))
            .build();

        let normalized = normalizer.normalize(Value::any(Reading(Celsius(21.5)))).await.unwrap();
        assert_eq!(normalized.to_json(), json!({"celsius": 21.5}));
    }

    #[tokio::test]
    async fn transformer_takes_precedence_over_serde() {
        let normalizer =
            Normalizer::builder().transformer(|user: User| Ok::<_, BoxError>(format!("user:{}", user.name))).build();

        let user = User { name: "ada".into(), tags: vec![] };
        assert_eq!(normalizer.normalize(Value::opaque(user)).await.unwrap().to_json(), json!("user:ada"));
    }

    #[tokio::test]
    async fn primitive_transformers_only_match_opaque_values() {
        let normalizer = Normalizer::builder().transformer(|s: String| Ok::<_, BoxError>(s.to_uppercase())).build();

        assert_eq!(normalizer.normalize(Value::from("plain")).await.unwrap().to_json(), json!("plain"));
        assert_eq!(normalizer.normalize(Value::opaque(String::from("typed"))).await.unwrap().to_json(), json!("TYPED"));
    }

    #[tokio::test]
    async fn opaque_without_transformer_uses_serde() {
        let normalizer = Normalizer::new();
        let user = User { name: "ada".into(), tags: vec!["admin".into()] };

        let normalized = normalizer.normalize(Value::opaque(user)).await.unwrap();
        assert_eq!(normalized.to_json(), json!({"name": "ada", "tags": ["admin"]}));
    }

    #[tokio::test]
    async fn unserializable_opaque_without_transformer_fails() {
        let normalizer = Normalizer::new();

        let err = normalizer.normalize(Value::any(Celsius(0.0))).await.unwrap_err();
        assert!(matches!(err, NormalizeError::Unsupported { type_name } if type_name.ends_with("Celsius")));
    }

    #[tokio::test]
    async fn transformer_failure_propagates() {
        let normalizer = Normalizer::builder().transformer(|_: Celsius| Err::<Value, _>("sensor offline")).build();

        let value = Value::Array(vec![1.into(), Value::any(Celsius(3.0))]);
        assert!(matches!(normalizer.normalize(value).await, Err(NormalizeError::Transform { .. })));
    }

    #[tokio::test]
    async fn nesting_beyond_limit_fails() {
        let normalizer = Normalizer::builder().max_depth(3).build();

        let shallow = Value::Array(vec![Value::Array(vec![1.into()])]);
        assert!(normalizer.normalize(shallow).await.is_ok());

        let deep = Value::Array(vec![Value::Array(vec![Value::Array(vec![Value::Array(vec![1.into()])])])]);
        assert!(matches!(normalizer.normalize(deep).await, Err(NormalizeError::TooDeep { max_depth: 3 })));
    }

    #[tokio::test]
    async fn self_producing_transformer_is_stopped() {
        let normalizer = Normalizer::builder().max_depth(16).transformer(|c: Celsius| Ok::<_, BoxError>(Value::any(c))).build();

        let err = normalizer.normalize(Value::any(Celsius(1.0))).await.unwrap_err();
        assert!(matches!(err, NormalizeError::TooDeep { max_depth: 16 }));
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: NormalizerConfig = serde_json::from_str(r#"{"stream_window": 2}"#).unwrap();
        assert_eq!(config, NormalizerConfig { max_depth: 128, stream_window: 2 });

        let normalizer = Normalizer::builder().config(config).build();
        assert_eq!(normalizer.config().stream_window, 2);
        assert!(normalizer.transformers().is_empty());
    }
}
