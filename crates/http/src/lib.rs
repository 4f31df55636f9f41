//! Chunked byte channels for request and response bodies.
//!
//! This crate provides the body substrate of the brook request-processing core: a
//! [`StreamChannel`](protocol::StreamChannel) is a single-producer, single-consumer channel
//! of byte chunks with explicit, idempotent close semantics. Request bodies are read from
//! one, responses are written to another.
//!
//! # Example
//!
//! ```no_run
//! use brook_http::protocol::StreamChannel;
//! use tokio::net::TcpListener;
//! use tracing::{error, info, warn, Level};
//! use tracing_subscriber::FmtSubscriber;
//!
//! #[tokio::main]
//! async fn main() {
//!     let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
//!     tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
//!
//!     let tcp_listener = match TcpListener::bind("127.0.0.1:8080").await {
//!         Ok(tcp_listener) => tcp_listener,
//!         Err(e) => {
//!             error!(cause = %e, "bind server error");
//!             return;
//!         }
//!     };
//!
//!     loop {
//!         let (tcp_stream, _remote_addr) = match tcp_listener.accept().await {
//!             Ok(stream_and_addr) => stream_and_addr,
//!             Err(e) => {
//!                 warn!(cause = %e, "failed to accept");
//!                 continue;
//!             }
//!         };
//!
//!         tokio::spawn(async move {
//!             // echo every chunk back until the peer stops sending
//!             let (request, response) = StreamChannel::from_io(tcp_stream);
//!             while let Ok(Some(chunk)) = request.read().await {
//!                 if let Err(e) = response.write(chunk).await {
//!                     error!(cause = %e, "failed to echo chunk");
//!                     break;
//!                 }
//!             }
//!             response.close().await;
//!             request.close().await;
//!             info!("finished echo, connection shutdown");
//!         });
//!     }
//! }
//! ```
//!
//! # Architecture
//!
//! - [`protocol`]: the channel, its transport seams and its error type
//!
//! Transports plug into a channel through [`ChunkReader`](protocol::ChunkReader) and
//! [`ChunkWriter`](protocol::ChunkWriter); adapters exist for `futures` streams,
//! `http_body` bodies and tokio `AsyncRead` / `AsyncWrite` halves.

pub mod protocol;
