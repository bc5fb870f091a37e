//! Local inference backends for Kiln.
//!
//! [`HttpBackend`] implements `kiln_core::ChatBackend` on top of four layers:
//! the wire adapters (pure JSON translation), the transport (one HTTP call
//! under a deadline and a cancellation token), the retry coordinator and
//! the stream decoder.

pub mod client;
pub mod retry;
pub mod stream;
pub mod transport;
pub mod wire;

pub use client::HttpBackend;
pub use retry::RetryCoordinator;
pub use stream::StreamDecoder;
pub use transport::{HttpTransport, TransportRequest, TransportResponse};
pub use wire::{JsonToolCallScanner, ToolCallScanner, WireAdapter};
