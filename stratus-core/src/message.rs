//! Protocol-agnostic message envelope.
//!
//! Every listener decodes its inbound bytes into an [`Envelope`], and every
//! outbound call is carried by one. The envelope itself is rkyv-archivable;
//! invocation parameters and return values travel as JSON in the payload.

use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CodecError, StratusError};

/// Parameter map of an invocation, keyed by parameter name.
pub type Params = serde_json::Map<String, Value>;

/// Envelope carrying route key, parameters or result, and a correlation id.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[rkyv(derive(Debug))]
pub struct Envelope {
    /// Correlates a response with its request on a shared connection.
    pub correlation_id: u64,

    /// What this envelope carries.
    pub kind: EnvelopeKind,

    /// Route key (service id for RPC calls).
    pub route: String,

    /// Optional service key for multi-tenant bindings.
    pub service_key: Option<String>,

    /// Out-of-band key/value pairs (trace ids, auth tokens, ...).
    pub attachments: Vec<Attachment>,

    /// Kind-specific payload.
    pub payload: Vec<u8>,
}

/// Kind of envelope.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[rkyv(derive(Debug))]
#[repr(u8)]
pub enum EnvelopeKind {
    /// Invocation request; payload is the JSON parameter map.
    Invoke = 1,

    /// Successful result; payload is the JSON return value.
    Result = 2,

    /// Failed result; payload is an archived [`RemoteFault`].
    Fault = 3,

    /// Keepalive probe.
    Ping = 4,

    /// Keepalive answer.
    Pong = 5,
}

/// One attachment entry.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[rkyv(derive(Debug))]
pub struct Attachment {
    /// Attachment key.
    pub key: String,
    /// Attachment value.
    pub value: String,
}

/// Failure information sent in [`EnvelopeKind::Fault`] envelopes.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[rkyv(derive(Debug))]
pub struct RemoteFault {
    /// Error code for programmatic handling.
    pub code: u32,

    /// Human-readable error message.
    pub message: String,
}

impl Envelope {
    /// Create an invocation envelope with a JSON-encoded parameter map.
    pub fn invoke(
        correlation_id: u64,
        route: impl Into<String>,
        service_key: Option<String>,
        params: &Params,
    ) -> Result<Self, CodecError> {
        let payload = serde_json::to_vec(params).map_err(|e| CodecError::Serialization(e.to_string()))?;
        Ok(Self {
            correlation_id,
            kind: EnvelopeKind::Invoke,
            route: route.into(),
            service_key,
            attachments: Vec::new(),
            payload,
        })
    }

    /// Create a successful result envelope.
    pub fn result(
        correlation_id: u64,
        route: impl Into<String>,
        value: &Value,
    ) -> Result<Self, CodecError> {
        let payload = serde_json::to_vec(value).map_err(|e| CodecError::Serialization(e.to_string()))?;
        Ok(Self {
            correlation_id,
            kind: EnvelopeKind::Result,
            route: route.into(),
            service_key: None,
            attachments: Vec::new(),
            payload,
        })
    }

    /// Create a failure result envelope.
    #[must_use]
    pub fn fault(correlation_id: u64, route: impl Into<String>, fault: RemoteFault) -> Self {
        let payload = rkyv::to_bytes::<rkyv::rancor::Error>(&fault)
            .map(|v| v.to_vec())
            .unwrap_or_default();

        Self {
            correlation_id,
            kind: EnvelopeKind::Fault,
            route: route.into(),
            service_key: None,
            attachments: Vec::new(),
            payload,
        }
    }

    /// Create a ping message.
    #[must_use]
    pub fn ping(correlation_id: u64) -> Self {
        Self::bare(correlation_id, EnvelopeKind::Ping)
    }

    /// Create a pong response.
    #[must_use]
    pub fn pong(correlation_id: u64) -> Self {
        Self::bare(correlation_id, EnvelopeKind::Pong)
    }

    fn bare(correlation_id: u64, kind: EnvelopeKind) -> Self {
        Self {
            correlation_id,
            kind,
            route: String::new(),
            service_key: None,
            attachments: Vec::new(),
            payload: Vec::new(),
        }
    }

    /// Add attachments.
    #[must_use]
    pub fn with_attachments<K, V>(mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.attachments.extend(pairs.into_iter().map(|(k, v)| Attachment {
            key: k.into(),
            value: v.into(),
        }));
        self
    }

    /// Look up an attachment value.
    #[must_use]
    pub fn attachment(&self, key: &str) -> Option<&str> {
        self.attachments
            .iter()
            .find(|a| a.key == key)
            .map(|a| a.value.as_str())
    }

    /// Decode the parameter map of an invocation. An empty payload is an empty map.
    pub fn params(&self) -> Result<Params, CodecError> {
        if self.payload.is_empty() {
            return Ok(Params::new());
        }
        serde_json::from_slice(&self.payload).map_err(|e| CodecError::Deserialization(e.to_string()))
    }

    /// Check if this is an invocation request.
    #[must_use]
    pub fn is_invoke(&self) -> bool {
        matches!(self.kind, EnvelopeKind::Invoke)
    }

    /// Check if this is a response (result or fault).
    #[must_use]
    pub fn is_response(&self) -> bool {
        matches!(self.kind, EnvelopeKind::Result | EnvelopeKind::Fault)
    }

    /// Turn a response envelope into the caller-facing outcome.
    pub fn into_outcome(self) -> Result<Value, StratusError> {
        match self.kind {
            EnvelopeKind::Result => {
                if self.payload.is_empty() {
                    return Ok(Value::Null);
                }
                serde_json::from_slice(&self.payload)
                    .map_err(|e| CodecError::Deserialization(e.to_string()).into())
            }
            EnvelopeKind::Fault => {
                let fault = RemoteFault::decode(&self.payload)?;
                Err(StratusError::Remote {
                    code: fault.code,
                    message: fault.message,
                })
            }
            other => Err(CodecError::InvalidFrame(format!("expected a response, got {other:?}")).into()),
        }
    }
}

impl RemoteFault {
    /// Create a new fault.
    #[must_use]
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Decode an archived fault payload.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut aligned: AlignedVec = AlignedVec::with_capacity(bytes.len());
        aligned.extend_from_slice(bytes);
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(&aligned)
            .map_err(|e| CodecError::Deserialization(e.to_string()))
    }

    // Common fault codes
    /// Error code for cancelled requests.
    pub const CANCELLED: u32 = 1;
    /// Error code for unknown errors.
    pub const UNKNOWN: u32 = 2;
    /// Error code for invalid arguments.
    pub const INVALID_ARGUMENT: u32 = 3;
    /// Error code for deadline exceeded.
    pub const DEADLINE_EXCEEDED: u32 = 4;
    /// Error code for not found.
    pub const NOT_FOUND: u32 = 5;
    /// Error code for permission denied.
    pub const PERMISSION_DENIED: u32 = 7;
    /// Error code for internal errors.
    pub const INTERNAL: u32 = 13;
    /// Error code for unavailable service.
    pub const UNAVAILABLE: u32 = 14;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rkyv::access;
    use serde_json::json;

    fn params(value: Value) -> Params {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_envelope_archive_access() {
        let envelope = Envelope::invoke(42, "calculator.add", None, &params(json!({"a": 1})))
            .unwrap()
            .with_attachments([("x-trace-id", "abc")]);

        let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(&envelope).unwrap();
        let archived = access::<ArchivedEnvelope, rkyv::rancor::Error>(&bytes).unwrap();

        assert_eq!(archived.correlation_id, 42);
        assert_eq!(archived.route.as_str(), "calculator.add");
        assert_eq!(archived.attachments.len(), 1);
    }

    #[test]
    fn test_params_decoding() {
        let env = Envelope::invoke(1, "svc", None, &params(json!({"name": "ada", "n": 3}))).unwrap();
        let decoded = env.params().unwrap();
        assert_eq!(decoded.get("name"), Some(&json!("ada")));
        assert_eq!(decoded.get("n"), Some(&json!(3)));

        let empty = Envelope::ping(1);
        assert!(empty.params().unwrap().is_empty());
    }

    #[test]
    fn test_result_outcome() {
        let ok = Envelope::result(7, "svc", &json!({"sum": 3})).unwrap();
        assert!(ok.is_response());
        assert_eq!(ok.into_outcome().unwrap(), json!({"sum": 3}));
    }

    #[test]
    fn test_fault_outcome() {
        let env = Envelope::fault(7, "svc", RemoteFault::new(RemoteFault::NOT_FOUND, "no such user"));
        match env.into_outcome() {
            Err(StratusError::Remote { code, message }) => {
                assert_eq!(code, RemoteFault::NOT_FOUND);
                assert_eq!(message, "no such user");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_non_response_outcome_is_codec_error() {
        let err = Envelope::ping(3).into_outcome().unwrap_err();
        assert!(matches!(err, StratusError::Codec(_)));
    }

    #[test]
    fn test_attachment_lookup() {
        let env = Envelope::pong(1).with_attachments([("a", "1"), ("b", "2")]);
        assert_eq!(env.attachment("b"), Some("2"));
        assert_eq!(env.attachment("c"), None);
    }
}
