//! Encoding of the shared remote value.
//!
//! In set mode the value is a JSON object mapping element ids to `true`;
//! in counter mode it is a decimal integer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Set of element ids stored under the shared key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteSet {
    members: BTreeMap<String, bool>,
}

impl RemoteSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode stored bytes. Absent or empty bytes decode to an empty set.
    pub fn decode(bytes: Option<&[u8]>) -> StoreResult<Self> {
        match bytes {
            Some(bytes) if !bytes.iter().all(u8::is_ascii_whitespace) => {
                Ok(serde_json::from_slice(bytes)?)
            }
            _ => Ok(Self::new()),
        }
    }

    /// Decode into `self`, replacing its contents.
    pub fn refresh(&mut self, bytes: Option<&[u8]>) -> StoreResult<()> {
        *self = Self::decode(bytes)?;
        Ok(())
    }

    /// Encode for storage.
    pub fn encode(&self) -> StoreResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Mark `element` present.
    pub fn insert(&mut self, element: impl Into<String>) {
        self.members.insert(element.into(), true);
    }

    /// Whether `element` is present.
    pub fn contains(&self, element: &str) -> bool {
        self.members.get(element).copied().unwrap_or(false)
    }

    /// Number of present elements.
    pub fn len(&self) -> usize {
        self.members.values().filter(|present| **present).count()
    }

    /// Present elements in lexicographic order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.members
            .iter()
            .filter(|(_, present)| **present)
            .map(|(element, _)| element.as_str())
    }

    /// Check if no element is present.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<S: Into<String>> FromIterator<S> for RemoteSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = RemoteSet::new();
        for element in iter {
            set.insert(element);
        }
        set
    }
}

/// Final state of the shared value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteValue {
    /// Set mode.
    Set(RemoteSet),
    /// Counter mode.
    Counter(u64),
}

/// Parse a decimal counter value.
pub(crate) fn parse_counter(bytes: &[u8]) -> StoreResult<u64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|text| text.trim().parse::<u64>().ok())
        .ok_or_else(|| StoreError::Server("cannot increment non-numeric value".to_string()))
}

/// Decode a counter. Absent bytes decode to zero.
pub fn decode_counter(bytes: Option<&[u8]>) -> StoreResult<u64> {
    match bytes {
        Some(bytes) => parse_counter(bytes),
        None => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_is_compatible_with_json_object() {
        let set = RemoteSet::decode(Some(br#"{"0":true,"7":true,"9":false}"#)).unwrap();
        assert!(set.contains("0"));
        assert!(set.contains("7"));
        assert!(!set.contains("9"));
        assert!(!set.contains("1"));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_absent_or_blank_is_empty() {
        assert!(RemoteSet::decode(None).unwrap().is_empty());
        assert!(RemoteSet::decode(Some(b"")).unwrap().is_empty());
        assert!(RemoteSet::decode(Some(b"  \n")).unwrap().is_empty());
        assert!(RemoteSet::decode(Some(b"not json")).is_err());
    }

    #[test]
    fn test_encode_is_a_json_object() {
        let set: RemoteSet = ["3", "1"].into_iter().collect();
        assert_eq!(set.encode().unwrap(), br#"{"1":true,"3":true}"#.to_vec());
    }

    #[test]
    fn test_refresh_replaces_contents() {
        let mut set: RemoteSet = ["stale"].into_iter().collect();
        set.refresh(Some(br#"{"fresh":true}"#)).unwrap();
        assert!(!set.contains("stale"));
        assert!(set.contains("fresh"));
    }

    #[test]
    fn test_decode_counter() {
        assert_eq!(decode_counter(None).unwrap(), 0);
        assert_eq!(decode_counter(Some(b"42")).unwrap(), 42);
        assert_eq!(parse_counter(b" 7\r\n").unwrap(), 7);
        assert!(matches!(
            parse_counter(b"{}"),
            Err(StoreError::Server(_))
        ));
        assert!(decode_counter(Some(b"x")).is_err());
    }
}
