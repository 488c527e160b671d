use crate::ports::Serializer;
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use shared::Result;

/// Default payload format: JSON via serde_json.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize<V: Serialize + ?Sized>(&self, value: &V) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(value)?))
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
