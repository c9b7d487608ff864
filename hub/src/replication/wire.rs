//! Replication frames.
//!
//! Each frame is a JSON document inside one length-delimited frame. JSON has
//! no byte strings, so payloads travel base64 encoded.
//!
//! ```text
//! {"type":"record","roomId":"42","seq":0,"payload":"aGVsbG8="}
//! {"type":"ping","nonce":3}
//! {"type":"pong","nonce":3}
//! ```

use bytes::Bytes;
use roomcast_rt::tasks::codec::LengthDelimitedCodec;
use serde::{Deserialize, Serialize};

use crate::error::WireError;

/// First line a standby sends after connecting.
pub const REPLICATE_COMMAND: &str = "REPLICATE";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WireFrame {
    #[serde(rename_all = "camelCase")]
    Record {
        room_id: String,
        seq: u64,
        #[serde(with = "base64_payload")]
        payload: Bytes,
    },
    Ping {
        nonce: u64,
    },
    Pong {
        nonce: u64,
    },
}

impl WireFrame {
    pub fn record(room_id: impl Into<String>, seq: usize, payload: Bytes) -> Self {
        Self::Record {
            room_id: room_id.into(),
            seq: seq as u64,
            payload,
        }
    }
}

pub fn encode(frame: &WireFrame) -> Result<Bytes, WireError> {
    serde_json::to_vec(frame)
        .map(Bytes::from)
        .map_err(WireError::Encode)
}

pub fn decode(frame: &[u8]) -> Result<WireFrame, WireError> {
    serde_json::from_slice(frame).map_err(WireError::Decode)
}

pub fn codec(max_frame_len: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(max_frame_len)
        .new_codec()
}

mod base64_payload {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(payload: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(payload))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_layout_matches_the_protocol() {
        let frame = WireFrame::record("42", 1, Bytes::from_static(b"hello"));
        let encoded = encode(&frame).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "record",
                "roomId": "42",
                "seq": 1,
                "payload": "aGVsbG8=",
            })
        );
        assert_eq!(decode(&encoded).unwrap(), frame);
    }

    #[test]
    fn binary_payloads_survive() {
        let payload = Bytes::from(vec![0u8, 159, 146, 150, 255]);
        let frame = WireFrame::record("bin", 0, payload.clone());
        match decode(&encode(&frame).unwrap()).unwrap() {
            WireFrame::Record { payload: decoded, .. } => assert_eq!(decoded, payload),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn heartbeat_frames_decode() {
        assert_eq!(
            decode(br#"{"type":"ping","nonce":9}"#).unwrap(),
            WireFrame::Ping { nonce: 9 }
        );
        assert_eq!(
            decode(br#"{"type":"pong","nonce":9}"#).unwrap(),
            WireFrame::Pong { nonce: 9 }
        );
    }

    #[test]
    fn malformed_frames_are_errors() {
        assert!(matches!(decode(b"not json"), Err(WireError::Decode(_))));
        assert!(matches!(
            decode(br#"{"type":"record","roomId":"r","seq":0,"payload":"***"}"#),
            Err(WireError::Decode(_))
        ));
        assert!(matches!(
            decode(br#"{"type":"unknown"}"#),
            Err(WireError::Decode(_))
        ));
    }
}
