use crate::engine::content_map::error::{ContentMapError, ContentMapResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;

// ==========================================
// ValueCodec - 溢出值编解码
// ==========================================
// 约束: 编码结果为单行（不含换行符），溢出文件按行追加
pub trait ValueCodec<V> {
    fn encode(&self, value: &V) -> ContentMapResult<Vec<u8>>;

    fn decode(&self, bytes: &[u8]) -> ContentMapResult<V>;
}

// ==========================================
// JsonCodec - 基于 serde_json 的通用编解码
// ==========================================
pub struct JsonCodec<V> {
    _marker: PhantomData<fn() -> V>,
}

impl<V> JsonCodec<V> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<V> Default for JsonCodec<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Clone for JsonCodec<V> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<V> ValueCodec<V> for JsonCodec<V>
where
    V: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &V) -> ContentMapResult<Vec<u8>> {
        // serde_json 紧凑输出会转义字符串内的换行，结果必然是单行
        serde_json::to_vec(value).map_err(|e| ContentMapError::Codec(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> ContentMapResult<V> {
        serde_json::from_slice(bytes).map_err(|e| ContentMapError::Codec(e.to_string()))
    }
}
