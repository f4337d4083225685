use crate::error::{Error, Result};
use json::JsonValue;
use std::fmt;

/// An opaque, type-erased value payload.
///
/// Indexes never inspect payload contents; entries are located and ordered
/// by their owning key alone.
#[derive(Clone, PartialEq, Eq)]
pub struct Payload {
    data: Vec<u8>,
}

impl Payload {
    pub fn new() -> Self {
        Self { data: vec![] }
    }

    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self { data: bytes }
    }

    pub fn from_slice(bytes: &[u8]) -> Self {
        Self { data: Vec::from(bytes) }
    }

    pub fn as_ref(&self) -> &[u8] {
        self.data.as_ref()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Serialized form: a plain array of byte values.
    pub fn to_json(&self) -> JsonValue {
        JsonValue::Array(self.data.iter().map(|byte| JsonValue::from(*byte)).collect())
    }

    pub fn from_json(doc: &JsonValue) -> Result<Self> {
        if !doc.is_array() {
            return Err(Error::corrupt("payload must be an array of bytes"));
        }
        let mut data = Vec::with_capacity(doc.len());
        for item in doc.members() {
            match item.as_u8() {
                Some(byte) => data.push(byte),
                None => return Err(Error::corrupt("payload byte out of range")),
            }
        }
        Ok(Self { data })
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::from_slice(text.as_bytes())
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Payload({:?})", String::from_utf8_lossy(&self.data))
    }
}

#[cfg(test)]
mod tests {
    use super::Payload;

    #[test]
    fn construction_and_equality() {
        let a = Payload::from("hello");
        let b = Payload::from_slice(b"hello");
        let c = Payload::from_vec(vec![0x68, 0x65, 0x6c, 0x6c, 0x6f]);
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(a.len(), 5);
        assert!(!a.is_empty());
        assert!(Payload::new().is_empty());
    }

    #[test]
    fn json_round_trip() {
        for bytes in [vec![], vec![0u8], vec![0, 127, 128, 255], b"payload".to_vec()] {
            let payload = Payload::from_vec(bytes);
            let restored = Payload::from_json(&payload.to_json()).unwrap();
            assert_eq!(payload, restored);
        }
    }

    #[test]
    fn json_rejects_garbage() {
        assert!(Payload::from_json(&json::parse("\"text\"").unwrap()).is_err());
        assert!(Payload::from_json(&json::parse("[1, 2, 300]").unwrap()).is_err());
        assert!(Payload::from_json(&json::parse("[1, -2]").unwrap()).is_err());
    }
}
