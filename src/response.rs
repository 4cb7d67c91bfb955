use image::DynamicImage;
use serde_json::Value;

/// Untyped tree returned by the detection API.
///
/// Mappings keep their pairs in document order so the fallback scan in
/// [`crate::extract`] is deterministic.
#[derive(Debug, Clone)]
pub enum ResponseValue {
    Map(Vec<(String, ResponseValue)>),
    Seq(Vec<ResponseValue>),
    Text(String),
    Bytes(Vec<u8>),
    Bitmap(DynamicImage),
    Number(f64),
    Bool(bool),
    Null,
}

impl ResponseValue {
    pub fn map<K: Into<String>>(pairs: impl IntoIterator<Item = (K, ResponseValue)>) -> Self {
        ResponseValue::Map(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn text(s: impl Into<String>) -> Self {
        ResponseValue::Text(s.into())
    }
}

impl From<Value> for ResponseValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => ResponseValue::Null,
            Value::Bool(b) => ResponseValue::Bool(b),
            Value::Number(n) => ResponseValue::Number(n.as_f64().unwrap_or_default()),
            Value::String(s) => ResponseValue::Text(s),
            Value::Array(items) => {
                ResponseValue::Seq(items.into_iter().map(ResponseValue::from).collect())
            }
            // Requires serde_json's `preserve_order` to iterate in document order.
            Value::Object(map) => ResponseValue::Map(
                map.into_iter()
                    .map(|(k, v)| (k, ResponseValue::from(v)))
                    .collect(),
            ),
        }
    }
}
