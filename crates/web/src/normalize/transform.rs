use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

use brook_http::protocol::BoxError;

use crate::NormalizeError;
use crate::normalize::{Opaque, Value};

type TransformFn = dyn Fn(Opaque) -> Result<Value, BoxError> + Send + Sync;

/// A type-specific rewrite rule applied to [`Opaque`] values before normalization continues.
#[derive(Clone)]
pub struct Transformer {
    type_id: TypeId,
    type_name: &'static str,
    apply: Arc<TransformFn>,
}

impl Transformer {
    pub fn new<T, F, V, E>(f: F) -> Self
    where
        T: Send + 'static,
        F: Fn(T) -> Result<V, E> + Send + Sync + 'static,
        V: Into<Value>,
        E: Into<BoxError>,
    {
        let apply = move |opaque: Opaque| -> Result<Value, BoxError> {
            let value = opaque
                .downcast::<T>()
                .map_err(|opaque| format!("expected `{}`, found `{}`", std::any::type_name::<T>(), opaque.type_name()))?;
            f(value).map(Into::into).map_err(Into::into)
        };

        Self { type_id: TypeId::of::<T>(), type_name: std::any::type_name::<T>(), apply: Arc::new(apply) }
    }

    pub fn matches(&self, opaque: &Opaque) -> bool {
        self.type_id == opaque.type_id()
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub(crate) fn apply(&self, opaque: Opaque) -> Result<Value, NormalizeError> {
        (self.apply)(opaque).map_err(|e| NormalizeError::transform(self.type_name, e))
    }
}

impl fmt::Debug for Transformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transformer").field("type_name", &self.type_name).finish_non_exhaustive()
    }
}

/// Transformers in registration order; the first one matching a value wins.
#[derive(Debug, Clone, Default)]
pub struct Transformers {
    inner: Vec<Transformer>,
}

impl Transformers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, transformer: Transformer) -> &mut Self {
        self.inner.push(transformer);
        self
    }

    pub fn find(&self, opaque: &Opaque) -> Option<&Transformer> {
        self.inner.iter().find(|transformer| transformer.matches(opaque))
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
