//! Byte codecs for cache entries.
//!
//! The store only ever sees opaque bytes; everything crossing it goes
//! through a [`Codec`]. Bincode is the default for compactness, JSON is
//! available when stored entries need to be inspectable. Implementations
//! must be deterministic for equal inputs so watched compare-and-set
//! writes behave.

use crate::error::CodecError;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encode/decode boundary between typed values and stored bytes.
pub trait Codec: Send + Sync {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// Compact binary codec, the default.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl Codec for BincodeCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        bincode::serialize(value).map_err(|e| CodecError::Encode {
            reason: e.to_string(),
        })
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        bincode::deserialize(bytes).map_err(|e| CodecError::Decode {
            reason: e.to_string(),
        })
    }
}

/// JSON codec for debuggable stores.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::Encode {
            reason: e.to_string(),
        })
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode {
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        id: u32,
        name: String,
    }

    fn make_sample() -> Sample {
        Sample {
            id: 7,
            name: "seven".to_string(),
        }
    }

    #[test]
    fn test_bincode_roundtrip() {
        let codec = BincodeCodec;
        let bytes = codec.encode(&make_sample()).unwrap();
        let back: Sample = codec.decode(&bytes).unwrap();
        assert_eq!(back, make_sample());
    }

    #[test]
    fn test_json_roundtrip() {
        let codec = JsonCodec;
        let bytes = codec.encode(&make_sample()).unwrap();
        let back: Sample = codec.decode(&bytes).unwrap();
        assert_eq!(back, make_sample());
    }

    #[test]
    fn test_decode_garbage_fails() {
        let codec = BincodeCodec;
        let result: Result<Sample, _> = codec.decode(&[0xff, 0x01]);
        assert!(matches!(result, Err(CodecError::Decode { .. })));
    }

    #[test]
    fn test_json_is_inspectable() {
        let codec = JsonCodec;
        let bytes = codec.encode(&make_sample()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("seven"));
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use crate::entry::{CacheEntry, Version, VersionedEntry};
    use proptest::prelude::*;

    fn version_strategy() -> impl Strategy<Value = Version> {
        prop_oneof![
            any::<i64>().prop_map(Version::Int),
            "[a-zA-Z0-9_.-]{0,16}".prop_map(Version::Text),
        ]
    }

    fn entry_strategy() -> impl Strategy<Value = CacheEntry> {
        prop_oneof![
            proptest::collection::vec(any::<u8>(), 0..64).prop_map(CacheEntry::Plain),
            (
                proptest::collection::vec(any::<u8>(), 0..64),
                proptest::option::of(version_strategy()),
                any::<u32>(),
            )
                .prop_map(|(payload, version, lock_count)| {
                    CacheEntry::Versioned(VersionedEntry {
                        payload,
                        version,
                        lock_count,
                    })
                }),
        ]
    }

    proptest! {
        #[test]
        fn prop_bincode_entry_roundtrip(entry in entry_strategy()) {
            let codec = BincodeCodec;
            let bytes = codec.encode(&entry).unwrap();
            let back: CacheEntry = codec.decode(&bytes).unwrap();
            prop_assert_eq!(back, entry);
        }

        #[test]
        fn prop_json_entry_roundtrip(entry in entry_strategy()) {
            let codec = JsonCodec;
            let bytes = codec.encode(&entry).unwrap();
            let back: CacheEntry = codec.decode(&bytes).unwrap();
            prop_assert_eq!(back, entry);
        }
    }
}
