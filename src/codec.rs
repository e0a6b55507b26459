//! Tagged, versioned byte encoding for queue payloads.
//!
//! Every payload is a JSON envelope carrying a schema version and a kind
//! discriminator, so a reader can reject records it does not understand
//! instead of silently misinterpreting them:
//!
//! ```json
//! {"schema":1,"body":{"kind":"node","record":{...}}}
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::records::{ClusterData, NodeData, Snapshot};

/// Schema version written by this build.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unsupported schema version {found} (this build reads up to {})", SCHEMA_VERSION)]
    UnsupportedVersion { found: u32 },
    #[error("expected a {expected} record, found {found}")]
    KindMismatch {
        expected: &'static str,
        found: &'static str,
    },
}

#[doc(hidden)]
#[derive(Serialize)]
#[serde(tag = "kind", content = "record", rename_all = "snake_case")]
pub enum BodyRef<'a> {
    Node(&'a NodeData),
    Cluster(&'a ClusterData),
    Snapshot(&'a Snapshot),
}

#[doc(hidden)]
#[derive(Deserialize)]
#[serde(tag = "kind", content = "record", rename_all = "snake_case")]
pub enum Body {
    Node(NodeData),
    Cluster(ClusterData),
    Snapshot(Snapshot),
}

impl Body {
    fn kind(&self) -> &'static str {
        match self {
            Body::Node(_) => NodeData::KIND,
            Body::Cluster(_) => ClusterData::KIND,
            Body::Snapshot(_) => Snapshot::KIND,
        }
    }
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    schema: u32,
    body: BodyRef<'a>,
}

#[derive(Deserialize)]
struct Envelope {
    schema: u32,
    body: serde_json::Value,
}

/// Record types that can travel through a queue.
pub trait QueueRecord: Sized {
    const KIND: &'static str;

    #[doc(hidden)]
    fn body(&self) -> BodyRef<'_>;

    #[doc(hidden)]
    fn from_body(body: Body) -> Result<Self, CodecError>;
}

impl QueueRecord for NodeData {
    const KIND: &'static str = "node";

    fn body(&self) -> BodyRef<'_> {
        BodyRef::Node(self)
    }

    fn from_body(body: Body) -> Result<Self, CodecError> {
        match body {
            Body::Node(n) => Ok(n),
            other => Err(CodecError::KindMismatch {
                expected: Self::KIND,
                found: other.kind(),
            }),
        }
    }
}

impl QueueRecord for ClusterData {
    const KIND: &'static str = "cluster";

    fn body(&self) -> BodyRef<'_> {
        BodyRef::Cluster(self)
    }

    fn from_body(body: Body) -> Result<Self, CodecError> {
        match body {
            Body::Cluster(c) => Ok(c),
            other => Err(CodecError::KindMismatch {
                expected: Self::KIND,
                found: other.kind(),
            }),
        }
    }
}

impl QueueRecord for Snapshot {
    const KIND: &'static str = "snapshot";

    fn body(&self) -> BodyRef<'_> {
        BodyRef::Snapshot(self)
    }

    fn from_body(body: Body) -> Result<Self, CodecError> {
        match body {
            Body::Snapshot(s) => Ok(s),
            other => Err(CodecError::KindMismatch {
                expected: Self::KIND,
                found: other.kind(),
            }),
        }
    }
}

/// Encodes a record into a queue payload.
pub fn encode<T: QueueRecord>(record: &T) -> Result<Vec<u8>, CodecError> {
    let envelope = EnvelopeRef {
        schema: SCHEMA_VERSION,
        body: record.body(),
    };
    Ok(serde_json::to_vec(&envelope)?)
}

/// Decodes a queue payload, checking schema version and record kind.
pub fn decode<T: QueueRecord>(bytes: &[u8]) -> Result<T, CodecError> {
    let envelope: Envelope = serde_json::from_slice(bytes)?;
    if envelope.schema == 0 || envelope.schema > SCHEMA_VERSION {
        return Err(CodecError::UnsupportedVersion {
            found: envelope.schema,
        });
    }
    let body: Body = serde_json::from_value(envelope.body)?;
    T::from_body(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::fixtures::{cluster, node};

    #[test]
    fn test_round_trip_every_kind() {
        let n = node("node-3", 1234.5);
        assert_eq!(decode::<NodeData>(&encode(&n).unwrap()).unwrap(), n);

        let c = cluster(99.0);
        assert_eq!(decode::<ClusterData>(&encode(&c).unwrap()).unwrap(), c);

        let s = Snapshot::new(7.0, cluster(7.0), vec![node("a", 7.0), node("b", 8.0)]);
        assert_eq!(decode::<Snapshot>(&encode(&s).unwrap()).unwrap(), s);
    }

    #[test]
    fn test_envelope_shape() {
        let bytes = encode(&cluster(1.0)).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["schema"], 1);
        assert_eq!(value["body"]["kind"], "cluster");
        assert_eq!(value["body"]["record"]["timestamp_ms"], 1.0);
    }

    #[test]
    fn test_kind_mismatch_is_rejected() {
        let bytes = encode(&cluster(1.0)).unwrap();
        match decode::<NodeData>(&bytes) {
            Err(CodecError::KindMismatch { expected, found }) => {
                assert_eq!(expected, "node");
                assert_eq!(found, "cluster");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_future_schema_is_rejected() {
        let bytes = br#"{"schema":2,"body":{"kind":"cluster","record":{}}}"#;
        assert!(matches!(
            decode::<ClusterData>(bytes),
            Err(CodecError::UnsupportedVersion { found: 2 })
        ));
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert!(matches!(
            decode::<Snapshot>(b"not json"),
            Err(CodecError::Malformed(_))
        ));
    }
}
