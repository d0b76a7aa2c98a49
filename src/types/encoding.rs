//! Structured encode/decode seam for blocks and transactions.
//!
//! Wire and data-hash byte streams go through these traits so the codec
//! can be swapped without touching consensus code. The bincode
//! implementations are the only ones in the tree; canonical *hash*
//! domains never depend on them (see `canonical_bytes` on each type).

use std::io::{Read, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("encode failed: {0}")]
    Encode(#[source] bincode::Error),
    #[error("decode failed: {0}")]
    Decode(#[source] bincode::Error),
}

pub trait Encoder<T> {
    fn encode(&mut self, value: &T) -> Result<(), CodecError>;
}

pub trait Decoder<T> {
    fn decode(&mut self) -> Result<T, CodecError>;
}

/// Length-prefixed struct encoding via bincode.
pub struct BincodeEncoder<W: Write> {
    writer: W,
}

impl<W: Write> BincodeEncoder<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W: Write, T: Serialize> Encoder<T> for BincodeEncoder<W> {
    fn encode(&mut self, value: &T) -> Result<(), CodecError> {
        bincode::serialize_into(&mut self.writer, value).map_err(CodecError::Encode)
    }
}

pub struct BincodeDecoder<R: Read> {
    reader: R,
}

impl<R: Read> BincodeDecoder<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: Read, T: DeserializeOwned> Decoder<T> for BincodeDecoder<R> {
    fn decode(&mut self) -> Result<T, CodecError> {
        bincode::deserialize_from(&mut self.reader).map_err(CodecError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Address;
    use crate::types::Transaction;

    #[test]
    fn transaction_round_trip() {
        let tx = Transaction::new(b"hello".to_vec(), Address([3u8; 32]), 42);

        let mut buf = Vec::new();
        BincodeEncoder::new(&mut buf).encode(&tx).unwrap();
        let decoded: Transaction = BincodeDecoder::new(buf.as_slice()).decode().unwrap();

        assert_eq!(decoded, tx);
    }
}
