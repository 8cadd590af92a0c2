//! Payload codecs.
//!
//! The delivery engine is agnostic to the wire format: every publish and
//! subscribe call is handed a [`Codec`]. Two are provided:
//!
//! - [`JsonCodec`]: human-readable, `application/json`
//! - [`BitcodeCodec`]: compact binary, `application/x-bitcode`

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const BITCODE_CONTENT_TYPE: &str = "application/x-bitcode";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("{format} encode failed: {message}")]
    Encode {
        format: &'static str,
        message: String,
    },

    #[error("{format} decode failed: {message}")]
    Decode {
        format: &'static str,
        message: String,
    },
}

/// Encodes/decodes one payload type to and from message bodies.
pub trait Codec<T>: Send + Sync + 'static {
    /// MIME type stamped on published envelopes.
    fn content_type(&self) -> &'static str;

    fn encode(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonCodec;

impl<T> Codec<T> for JsonCodec
where
    T: Serialize + DeserializeOwned,
{
    fn content_type(&self) -> &'static str {
        JSON_CONTENT_TYPE
    }

    fn encode(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::Encode {
            format: "json",
            message: e.to_string(),
        })
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode {
            format: "json",
            message: e.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BitcodeCodec;

impl<T> Codec<T> for BitcodeCodec
where
    T: Serialize + DeserializeOwned,
{
    fn content_type(&self) -> &'static str {
        BITCODE_CONTENT_TYPE
    }

    fn encode(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        bitcode::serialize(value).map_err(|e| CodecError::Encode {
            format: "bitcode",
            message: e.to_string(),
        })
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError> {
        bitcode::deserialize(bytes).map_err(|e| CodecError::Decode {
            format: "bitcode",
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peril_core::{GameLog, PlayingState};

    #[test]
    fn json_is_human_readable() {
        let bytes = JsonCodec.encode(&PlayingState { is_paused: true }).unwrap();
        assert_eq!(std::str::from_utf8(&bytes).unwrap(), r#"{"is_paused":true}"#);
    }

    #[test]
    fn bitcode_is_smaller_than_json_for_logs() {
        let log = GameLog::now("alice", "sneaky attack on europe");

        let json = Codec::<GameLog>::encode(&JsonCodec, &log).unwrap();
        let binary = Codec::<GameLog>::encode(&BitcodeCodec, &log).unwrap();

        assert!(binary.len() < json.len());
        let decoded: GameLog = BitcodeCodec.decode(&binary).unwrap();
        assert_eq!(decoded, log);
    }

    #[test]
    fn malformed_bodies_are_decode_errors() {
        let json: Result<PlayingState, _> = JsonCodec.decode(b"{not json");
        assert!(matches!(json, Err(CodecError::Decode { format: "json", .. })));

        let binary: Result<GameLog, _> = BitcodeCodec.decode(&[0xff]);
        assert!(matches!(binary, Err(CodecError::Decode { format: "bitcode", .. })));
    }

    #[test]
    fn content_types_identify_the_format() {
        assert_eq!(Codec::<PlayingState>::content_type(&JsonCodec), JSON_CONTENT_TYPE);
        assert_eq!(Codec::<PlayingState>::content_type(&BitcodeCodec), BITCODE_CONTENT_TYPE);
    }
}
