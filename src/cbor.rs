//! Thin CBOR encode/decode wrappers over [ciborium].

use std::io::Cursor;

use serde::{de, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CborError {
    /// CBOR decoding failure.
    #[error("CBOR decoding failure: {0}")]
    DecodeFailed(String),
    /// CBOR encoding failure.
    #[error("CBOR encoding failure: {0}")]
    EncodeFailed(String),
}

pub fn to_vec<T>(value: &T) -> Result<Vec<u8>, CborError>
where
    T: Serialize,
{
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| CborError::EncodeFailed(e.to_string()))?;
    Ok(buf)
}

pub fn from_slice<T>(slice: &[u8]) -> Result<T, CborError>
where
    T: de::DeserializeOwned,
{
    ciborium::from_reader(Cursor::new(slice)).map_err(|e| CborError::DecodeFailed(e.to_string()))
}
