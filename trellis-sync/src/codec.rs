//! Body encoding for stored documents (bincode, standard config).

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::SyncError;

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, SyncError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| SyncError::Codec(e.to_string()))
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, SyncError> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| SyncError::Codec(e.to_string()))?;
    Ok(value)
}
