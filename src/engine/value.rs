use crate::storage::SortedSet;
use bytes::Bytes;

/// A value stored under a key.
///
/// Writing a value of another type replaces the slot wholesale.
#[derive(Debug, Clone)]
pub enum Value {
    String(Bytes),
    SortedSet(Box<SortedSet>),
}

impl Value {
    /// Name reported by `TYPE`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::SortedSet(_) => "zset",
        }
    }

    pub fn as_string(&self) -> Option<&Bytes> {
        match self {
            Value::String(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_sorted_set(&self) -> Option<&SortedSet> {
        match self {
            Value::SortedSet(set) => Some(set),
            _ => None,
        }
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::String(b)
    }
}

impl From<SortedSet> for Value {
    fn from(set: SortedSet) -> Self {
        Value::SortedSet(Box::new(set))
    }
}
