//! Body transport abstractions shared by request and response processing.
//!
//! - **Channels** ([`channel`]): the chunked byte channel used for bodies
//!   - [`StreamChannel`]: pull reads, push writes, explicit close
//!   - [`ChunkReader`] / [`ChunkWriter`]: the seams a transport plugs into
//!
//! - **Error Handling** ([`error`]):
//!   - [`ChannelError`]: misuse of a channel, or a failure of its transport

mod error;
pub use error::BoxError;
pub use error::ChannelError;

pub mod channel;
pub use channel::ChannelParts;
pub use channel::ChannelState;
pub use channel::ChunkReader;
pub use channel::ChunkWriter;
pub use channel::Collected;
pub use channel::PipeSender;
pub use channel::StreamChannel;
pub use channel::StreamChannelBuilder;
