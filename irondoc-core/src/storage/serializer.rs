// src/storage/serializer.rs
//! Document byte encodings.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Turns documents into heap records and back
pub trait DocumentSerializer<T>: Send + Sync {
    fn serialize(&self, doc: &T) -> Result<Vec<u8>>;

    fn deserialize(&self, bytes: &[u8]) -> Result<T>;
}

/// JSON via serde_json (default)
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl<T: Serialize + DeserializeOwned> DocumentSerializer<T> for JsonSerializer {
    fn serialize(&self, doc: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(doc)?)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Compact binary encoding via bincode
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeSerializer;

impl<T: Serialize + DeserializeOwned> DocumentSerializer<T> for BincodeSerializer {
    fn serialize(&self, doc: &T) -> Result<Vec<u8>> {
        Ok(bincode::serialize(doc)?)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<T> {
        Ok(bincode::deserialize(bytes)?)
    }
}
