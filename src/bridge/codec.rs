//! Length-prefixed JSON framing for the worker connection.
//!
//! Each frame on the wire is a big-endian length header followed by one JSON
//! document. [`FrameCodec`] pairs the framing with serde so each direction of
//! the bridge speaks its own message enum, over any AsyncRead/AsyncWrite.

use std::io;
use std::marker::PhantomData;

use serde::{Serialize, de::DeserializeOwned};
use tokio_util::bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

/// Width of the frame length header. Four bytes is far beyond any submission
/// or reply this broker carries.
const LENGTH_HEADER_BYTES: usize = 4;

/// Frames and (de)serializes one message type.
///
/// The type parameter fixes which enum a given read or write half speaks, so
/// a worker reply can never decode as a broker offer.
pub struct FrameCodec<T> {
    framing: LengthDelimitedCodec,
    _marker: PhantomData<fn() -> T>,
}

impl<T> FrameCodec<T> {
    pub fn new() -> Self {
        Self {
            framing: LengthDelimitedCodec::builder()
                .length_field_length(LENGTH_HEADER_BYTES)
                .new_codec(),
            _marker: PhantomData,
        }
    }
}

impl<T> Default for FrameCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> Decoder for FrameCodec<T> {
    type Item = T;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<T>, Self::Error> {
        let Some(frame) = self.framing.decode(src)? else {
            return Ok(None);
        };
        serde_json::from_slice(&frame)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

impl<T: Serialize> Encoder<T> for FrameCodec<T> {
    type Error = io::Error;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = serde_json::to_vec(&item)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.framing.encode(Bytes::from(body), dst)
    }
}
