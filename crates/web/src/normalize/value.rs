use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use brook_http::protocol::BoxError;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, Stream, StreamExt, TryFutureExt};
use serde::Serialize;
use serde_json::Number;

use crate::normalize::Normalized;

/// An application value waiting to be normalized.
///
/// Besides plain data, a value may still be pending ([`Value::Future`]), be produced lazily
/// ([`Value::Stream`]), or be a typed Rust value ([`Value::Opaque`]) that a registered
/// transformer or its serde representation turns into data.
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    /// A finite sequence, normalized element by element.
    Array(Vec<Value>),
    /// Own keys in declaration order.
    Record(Vec<(String, Value)>),
    Future(BoxFuture<'static, Result<Value, BoxError>>),
    Stream(BoxStream<'static, Result<Value, BoxError>>),
    Function(Callable),
    Opaque(Opaque),
}

impl Value {
    pub fn record<K, I>(fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Record(fields.into_iter().map(|(key, value)| (key.into(), value)).collect())
    }

    pub fn future<F, T, E>(future: F) -> Self
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Into<Value> + 'static,
        E: Into<BoxError> + 'static,
    {
        Value::Future(future.map_ok(Into::<Value>::into).map_err(Into::<BoxError>::into).boxed())
    }

    /// A future that is already resolved.
    pub fn ready(value: impl Into<Value>) -> Self {
        Value::Future(futures::future::ready(Ok(value.into())).boxed())
    }

    pub fn stream<S, T, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<T, E>> + Send + 'static,
        T: Into<Value> + 'static,
        E: Into<BoxError> + 'static,
    {
        Value::Stream(stream.map(|item| item.map(Into::<Value>::into).map_err(Into::<BoxError>::into)).boxed())
    }

    pub fn function<S, F>(name: S, f: F) -> Self
    where
        S: Into<String>,
        F: Fn() + Send + Sync + 'static,
    {
        Value::Function(Callable::new(name, f))
    }

    /// Wraps a serializable Rust value; it is normalized by a matching transformer or, when
    /// none is registered for its type, through its serde representation.
    pub fn opaque<T: Serialize + Send + 'static>(value: T) -> Self {
        Value::Opaque(Opaque::new(value))
    }

    /// Wraps a Rust value that can only be normalized by a transformer.
    pub fn any<T: Send + 'static>(value: T) -> Self {
        Value::Opaque(Opaque::unserializable(value))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Record(_) => "record",
            Value::Future(_) => "future",
            Value::Stream(_) => "stream",
            Value::Function(_) => "function",
            Value::Opaque(_) => "opaque",
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("Undefined"),
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Value::Number(n) => f.debug_tuple("Number").field(n).finish(),
            Value::String(s) => f.debug_tuple("String").field(s).finish(),
            Value::Array(items) => f.debug_tuple("Array").field(items).finish(),
            Value::Record(fields) => f.debug_tuple("Record").field(fields).finish(),
            Value::Future(_) => f.write_str("Future(..)"),
            Value::Stream(_) => f.write_str("Stream(..)"),
            Value::Function(callable) => f.debug_tuple("Function").field(&callable.name()).finish(),
            Value::Opaque(opaque) => f.debug_tuple("Opaque").field(&opaque.type_name()).finish(),
        }
    }
}

/// A function value. It can be called, but never serialized.
#[derive(Clone)]
pub struct Callable {
    name: String,
    f: Arc<dyn Fn() + Send + Sync>,
}

impl Callable {
    pub fn new<S: Into<String>, F: Fn() + Send + Sync + 'static>(name: S, f: F) -> Self {
        Self { name: name.into(), f: Arc::new(f) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self) {
        (self.f)();
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callable").field("name", &self.name).finish_non_exhaustive()
    }
}

type ToJson = fn(&(dyn Any + Send)) -> Result<serde_json::Value, serde_json::Error>;

/// A typed Rust value carried through normalization, matched against transformers by type.
pub struct Opaque {
    type_id: TypeId,
    type_name: &'static str,
    value: Box<dyn Any + Send>,
    to_json: Option<ToJson>,
}

impl Opaque {
    pub fn new<T: Serialize + Send + 'static>(value: T) -> Self {
        Self { to_json: Some(serialize_as::<T>), ..Self::unserializable(value) }
    }

    pub fn unserializable<T: Send + 'static>(value: T) -> Self {
        Self { type_id: TypeId::of::<T>(), type_name: std::any::type_name::<T>(), value: Box::new(value), to_json: None }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is<T: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    pub fn downcast<T: 'static>(self) -> Result<T, Self> {
        if !self.is::<T>() {
            return Err(self);
        }
        let Self { type_id, type_name, value, to_json } = self;
        value.downcast::<T>().map(|boxed| *boxed).map_err(|value| Self { type_id, type_name, value, to_json })
    }

    /// The serde representation of the value, `None` when the type is not serializable.
    pub(crate) fn to_json(&self) -> Option<Result<serde_json::Value, serde_json::Error>> {
        self.to_json.map(|to_json| to_json(self.value.as_ref()))
    }
}

impl fmt::Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Opaque").field("type_name", &self.type_name).finish_non_exhaustive()
    }
}

fn serialize_as<T: Serialize + 'static>(value: &(dyn Any + Send)) -> Result<serde_json::Value, serde_json::Error> {
    match value.downcast_ref::<T>() {
        Some(value) => serde_json::to_value(value),
        None => Err(serde::ser::Error::custom(format!("expected a value of type `{}`", std::any::type_name::<T>()))),
    }
}

macro_rules! value_from_integer {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(n: $ty) -> Self {
                    Value::Number(n.into())
                }
            }
        )*
    };
}

value_from_integer!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl From<f64> for Value {
    /// Non-finite numbers have no JSON representation and become `Null`.
    fn from(n: f64) -> Self {
        Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

impl From<f32> for Value {
    fn from(n: f32) -> Self {
        f64::from(n).into()
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Value::Undefined
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(option: Option<T>) -> Self {
        option.map_or(Value::Null, Into::into)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => items.into(),
            serde_json::Value::Object(map) => Value::Record(map.into_iter().map(|(key, value)| (key, value.into())).collect()),
        }
    }
}

impl From<Normalized> for Value {
    fn from(normalized: Normalized) -> Self {
        match normalized {
            Normalized::Undefined => Value::Undefined,
            Normalized::Null => Value::Null,
            Normalized::Bool(b) => Value::Bool(b),
            Normalized::Number(n) => Value::Number(n),
            Normalized::String(s) => Value::String(s),
            Normalized::Array(items) => items.into(),
            Normalized::Map(map) => Value::Record(map.into_iter().map(|(key, value)| (key, value.into())).collect()),
        }
    }
}

impl From<Callable> for Value {
    fn from(callable: Callable) -> Self {
        Value::Function(callable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Serialize)]
    struct Point {
        x: i32,
        y: i32,
    }

    #[test]
    fn json_converts_structurally() {
        let value = Value::from(json!({"a": [1, null], "b": "text"}));
        let Value::Record(fields) = value else { panic!("expected record") };

        assert_eq!(fields.len(), 2);
        assert!(matches!(&fields[0], (key, Value::Array(items)) if key == "a" && items.len() == 2));
        assert!(matches!(&fields[1], (key, Value::String(s)) if key == "b" && s == "text"));
    }

    #[test]
    fn non_finite_floats_become_null() {
        assert!(matches!(Value::from(f64::NAN), Value::Null));
        assert!(matches!(Value::from(f64::INFINITY), Value::Null));
        assert!(matches!(Value::from(1.5), Value::Number(_)));
    }

    #[test]
    fn option_maps_none_to_null() {
        assert!(matches!(Value::from(None::<i32>), Value::Null));
        assert!(matches!(Value::from(Some("x")), Value::String(_)));
    }

    #[test]
    fn opaque_downcasts_to_its_own_type_only() {
        let opaque = Opaque::new(Point { x: 1, y: 2 });
        assert!(opaque.is::<Point>());
        assert!(opaque.type_name().ends_with("Point"));

        let opaque = opaque.downcast::<String>().unwrap_err();
        let point = opaque.downcast::<Point>().unwrap();
        assert_eq!((point.x, point.y), (1, 2));
    }

    #[test]
    fn opaque_exposes_serde_representation() {
        let opaque = Opaque::new(Point { x: 3, y: 4 });
        assert_eq!(opaque.to_json().unwrap().unwrap(), json!({"x": 3, "y": 4}));

        let opaque = Opaque::unserializable(std::time::Instant::now());
        assert!(opaque.to_json().is_none());
    }

    #[test]
    fn callable_can_be_called() {
        let called = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = called.clone();
        let callable = Callable::new("notify", move || flag.store(true, std::sync::atomic::Ordering::SeqCst));

        callable.call();
        assert!(called.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(format!("{:?}", Value::from(callable)), "Function(\"notify\")");
    }
}
