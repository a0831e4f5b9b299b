use base64::Engine;
use indexmap::IndexMap;

/// Object payload. Keeps insertion order for display; equality ignores it.
pub type PackMap = IndexMap<String, PackValue>;

const BINARY_DATA_URI: &str = "data:application/octet-stream;base64,";

/// A JSON-like value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum PackValue {
    Null,
    /// Absent value: an empty document, a tuple hole or a missing node.
    #[default]
    Undefined,
    Bool(bool),
    /// Any integer that fits in `i64`.
    Integer(i64),
    /// Unsigned integer above `i64::MAX`.
    UInteger(u64),
    Float(f64),
    Bytes(Vec<u8>),
    Str(String),
    Array(Vec<PackValue>),
    Object(PackMap),
}

impl PackValue {
    pub fn is_undefined(&self) -> bool {
        matches!(self, PackValue::Undefined)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PackValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[PackValue]> {
        match self {
            PackValue::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&PackMap> {
        match self {
            PackValue::Object(map) => Some(map),
            _ => None,
        }
    }
}

impl From<serde_json::Value> for PackValue {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => PackValue::Null,
            serde_json::Value::Bool(b) => PackValue::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    PackValue::Integer(i)
                } else if let Some(u) = n.as_u64() {
                    PackValue::UInteger(u)
                } else {
                    PackValue::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => PackValue::Str(s),
            serde_json::Value::Array(arr) => {
                PackValue::Array(arr.into_iter().map(PackValue::from).collect())
            }
            serde_json::Value::Object(obj) => PackValue::Object(
                obj.into_iter()
                    .map(|(k, v)| (k, PackValue::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Lossy: `undefined` becomes `null`, binary becomes a base64 data URI and
/// non-finite floats become `null`.
impl From<PackValue> for serde_json::Value {
    fn from(v: PackValue) -> Self {
        match v {
            PackValue::Null | PackValue::Undefined => serde_json::Value::Null,
            PackValue::Bool(b) => serde_json::Value::Bool(b),
            PackValue::Integer(i) => serde_json::Value::from(i),
            PackValue::UInteger(u) => serde_json::Value::from(u),
            PackValue::Float(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            PackValue::Bytes(b) => serde_json::Value::String(format!(
                "{}{}",
                BINARY_DATA_URI,
                base64::engine::general_purpose::STANDARD.encode(b)
            )),
            PackValue::Str(s) => serde_json::Value::String(s),
            PackValue::Array(arr) => {
                serde_json::Value::Array(arr.into_iter().map(serde_json::Value::from).collect())
            }
            PackValue::Object(obj) => serde_json::Value::Object(
                obj.into_iter()
                    .map(|(k, v)| (k, serde_json::Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl PartialEq<serde_json::Value> for PackValue {
    fn eq(&self, other: &serde_json::Value) -> bool {
        match (self, other) {
            (PackValue::Null, serde_json::Value::Null) => true,
            (PackValue::Bool(a), serde_json::Value::Bool(b)) => a == b,
            (PackValue::Integer(a), serde_json::Value::Number(n)) => n.as_i64() == Some(*a),
            (PackValue::UInteger(a), serde_json::Value::Number(n)) => n.as_u64() == Some(*a),
            (PackValue::Float(a), serde_json::Value::Number(n)) => n.as_f64() == Some(*a),
            (PackValue::Str(a), serde_json::Value::String(b)) => a == b,
            (PackValue::Array(a), serde_json::Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x == y)
            }
            (PackValue::Object(a), serde_json::Value::Object(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).is_some_and(|other| v == other))
            }
            _ => false,
        }
    }
}

impl From<bool> for PackValue {
    fn from(v: bool) -> Self {
        PackValue::Bool(v)
    }
}

impl From<i64> for PackValue {
    fn from(v: i64) -> Self {
        PackValue::Integer(v)
    }
}

impl From<i32> for PackValue {
    fn from(v: i32) -> Self {
        PackValue::Integer(v as i64)
    }
}

impl From<u64> for PackValue {
    fn from(v: u64) -> Self {
        match i64::try_from(v) {
            Ok(i) => PackValue::Integer(i),
            Err(_) => PackValue::UInteger(v),
        }
    }
}

impl From<f64> for PackValue {
    fn from(v: f64) -> Self {
        PackValue::Float(v)
    }
}

impl From<&str> for PackValue {
    fn from(v: &str) -> Self {
        PackValue::Str(v.to_owned())
    }
}

impl From<String> for PackValue {
    fn from(v: String) -> Self {
        PackValue::Str(v)
    }
}

impl From<Vec<u8>> for PackValue {
    fn from(v: Vec<u8>) -> Self {
        PackValue::Bytes(v)
    }
}
