use std::error::Error;
use std::io;
use thiserror::Error;

pub type BoxError = Box<dyn Error + Send + Sync>;

/// Errors reported by a [`StreamChannel`](crate::protocol::StreamChannel).
///
/// The first three variants are usage errors: they signal a bug in the caller and are
/// returned immediately instead of being swallowed. The remaining variants carry a failure
/// of the underlying transport.
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("a read is already outstanding on this channel")]
    OverlappingRead,

    #[error("channel is closed, write of {len} bytes rejected")]
    WriteAfterClose { len: usize },

    #[error("channel has no writer")]
    NotWritable,

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    #[error("transport error: {source}")]
    Transport { source: BoxError },
}

impl ChannelError {
    pub fn write_after_close(len: usize) -> Self {
        Self::WriteAfterClose { len }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }

    pub fn transport<E: Into<BoxError>>(e: E) -> Self {
        Self::Transport { source: e.into() }
    }

    /// Returns true when the error is caused by misusing the channel rather than by the transport.
    pub fn is_misuse(&self) -> bool {
        matches!(self, Self::OverlappingRead | Self::WriteAfterClose { .. } | Self::NotWritable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn misuse_kinds() {
        assert!(ChannelError::OverlappingRead.is_misuse());
        assert!(ChannelError::write_after_close(3).is_misuse());
        assert!(ChannelError::NotWritable.is_misuse());
        assert!(!ChannelError::io(io::Error::from(io::ErrorKind::BrokenPipe)).is_misuse());
        assert!(!ChannelError::transport("peer gone").is_misuse());
    }

    #[test]
    fn write_after_close_message() {
        assert_eq!(ChannelError::write_after_close(5).to_string(), "channel is closed, write of 5 bytes rejected");
    }
}
