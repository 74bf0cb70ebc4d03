//! Duplex bridge between the broker and the worker process.
//!
//! - **protocol**: Message types per direction (OfferMessage / WorkerMessage)
//! - **codec**: JSON framing codec for AsyncRead/AsyncWrite
//! - **channel**: The persistent worker connection and its drain loop

pub mod channel;
pub mod codec;
pub mod protocol;
