use indexmap::IndexMap;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use serde_json::Number;

/// A fully resolved, JSON-safe value tree.
///
/// `Undefined` mirrors an absent value: it is dropped from maps when serialized and written
/// as `null` anywhere else.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Normalized {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<Normalized>),
    Map(IndexMap<String, Normalized>),
}

impl Normalized {
    pub fn is_undefined(&self) -> bool {
        matches!(self, Normalized::Undefined)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Normalized::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Normalized]> {
        match self {
            Normalized::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Normalized> {
        match self {
            Normalized::Map(map) => map.get(key),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        self.clone().into()
    }

    /// Serializes the tree as JSON bytes.
    pub fn to_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

impl Serialize for Normalized {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Normalized::Undefined | Normalized::Null => serializer.serialize_unit(),
            Normalized::Bool(b) => serializer.serialize_bool(*b),
            Normalized::Number(n) => n.serialize(serializer),
            Normalized::String(s) => serializer.serialize_str(s),
            Normalized::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Normalized::Map(map) => {
                let defined = map.values().filter(|value| !value.is_undefined()).count();
                let mut entries = serializer.serialize_map(Some(defined))?;
                for (key, value) in map.iter().filter(|(_, value)| !value.is_undefined()) {
                    entries.serialize_entry(key, value)?;
                }
                entries.end()
            }
        }
    }
}

impl From<Normalized> for serde_json::Value {
    fn from(normalized: Normalized) -> Self {
        match normalized {
            Normalized::Undefined | Normalized::Null => serde_json::Value::Null,
            Normalized::Bool(b) => serde_json::Value::Bool(b),
            Normalized::Number(n) => serde_json::Value::Number(n),
            Normalized::String(s) => serde_json::Value::String(s),
            Normalized::Array(items) => serde_json::Value::Array(items.into_iter().map(Into::into).collect()),
            Normalized::Map(map) => serde_json::Value::Object(
                map.into_iter().filter(|(_, value)| !value.is_undefined()).map(|(key, value)| (key, value.into())).collect(),
            ),
        }
    }
}
