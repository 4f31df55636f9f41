use brook_http::protocol::{BoxError, ChannelError};
use thiserror::Error;

/// Failure raised while normalizing a [`Value`](crate::normalize::Value).
#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("function value `{name}` cannot be normalized")]
    Function { name: String },

    #[error("value of type `{type_name}` has no transformer and is not serializable")]
    Unsupported { type_name: &'static str },

    #[error("transformer for `{type_name}` failed: {source}")]
    Transform { type_name: &'static str, source: BoxError },

    #[error("pending value was rejected: {source}")]
    Rejected { source: BoxError },

    #[error("value nesting exceeds the limit {max_depth}")]
    TooDeep { max_depth: usize },

    #[error("serialize error: {source}")]
    Serialize {
        #[from]
        source: serde_json::Error,
    },
}

impl NormalizeError {
    pub fn function<S: ToString>(name: S) -> Self {
        Self::Function { name: name.to_string() }
    }

    pub fn transform<E: Into<BoxError>>(type_name: &'static str, e: E) -> Self {
        Self::Transform { type_name, source: e.into() }
    }

    pub fn rejected<E: Into<BoxError>>(e: E) -> Self {
        Self::Rejected { source: e.into() }
    }
}

/// Failure propagated out of a middleware chain.
///
/// Chain errors are never swallowed by the chain itself: they travel back through every
/// enclosing middleware to the caller of [`Pipeline::dispatch`](crate::Pipeline::dispatch).
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("middleware `{name}` failed: {source}")]
    Middleware { name: String, source: BoxError },

    #[error("normalize error: {source}")]
    Normalize {
        #[from]
        source: NormalizeError,
    },

    #[error("channel error: {source}")]
    Channel {
        #[from]
        source: ChannelError,
    },

    #[error("invalid response: {source}")]
    Response {
        #[from]
        source: http::Error,
    },
}

impl ChainError {
    pub fn middleware<S: ToString, E: Into<BoxError>>(name: S, e: E) -> Self {
        Self::Middleware { name: name.to_string(), source: e.into() }
    }
}
