use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::wampproxy::error::ProxyError;

/// What the downstream frame asked for: an RPC call or a pub/sub topic.
#[derive(Debug, Clone)]
pub enum RequestKind {
    Rpc { method: String },
    PubSub { event: String },
}

/// Parsed form of an inbound downstream frame.
#[derive(Debug, Clone)]
pub struct DownstreamRequest {
    pub realm: String,
    pub kind: RequestKind,
    pub args: Vec<Value>,
    pub kwargs: serde_json::Map<String, Value>,
}

/// Raw wire shape; unknown members are ignored by serde's default behavior.
#[derive(Debug, Deserialize)]
struct WireRequest {
    realm: Option<String>,
    method: Option<String>,
    event: Option<String>,
    #[serde(default)]
    args: Vec<Value>,
    #[serde(default)]
    kwargs: serde_json::Map<String, Value>,
}

impl DownstreamRequest {
    /// Parses and validates a downstream text frame per the dispatch
    /// algorithm's steps 1-3.
    pub fn parse(frame: &str) -> Result<Self, ProxyError> {
        let wire: WireRequest = serde_json::from_str(frame)
            .map_err(|_| ProxyError::Parse("parsing request failed".to_string()))?;

        let realm = match wire.realm {
            Some(r) if !r.is_empty() => r,
            _ => return Err(ProxyError::Parse("realm not specified".to_string())),
        };

        let kind = match (wire.method, wire.event) {
            (Some(method), None) => RequestKind::Rpc { method },
            (None, Some(event)) => RequestKind::PubSub { event },
            _ => return Err(ProxyError::Parse("no request type given".to_string())),
        };

        Ok(DownstreamRequest {
            realm,
            kind,
            args: wire.args,
            kwargs: wire.kwargs,
        })
    }
}

/// Status code + payload, serialized as a two-element JSON array.
#[derive(Debug, Clone, Serialize)]
#[serde(into = "(u16, Value)")]
pub struct DownstreamReply {
    pub status: u16,
    pub payload: Value,
}

impl From<DownstreamReply> for (u16, Value) {
    fn from(reply: DownstreamReply) -> Self {
        (reply.status, reply.payload)
    }
}

impl DownstreamReply {
    pub fn ok(payload: Value) -> Self {
        DownstreamReply { status: 200, payload }
    }

    pub fn error(status: u16, text: impl Into<String>) -> Self {
        DownstreamReply { status, payload: Value::String(text.into()) }
    }

    pub fn from_error(err: &ProxyError) -> Self {
        DownstreamReply::error(err.status_code(), err.reply_text())
    }

    pub fn to_frame(&self) -> String {
        serde_json::to_string(self).expect("DownstreamReply always serializes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_json() {
        let err = DownstreamRequest::parse("{not json").unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn rejects_missing_realm() {
        let err = DownstreamRequest::parse(r#"{"method":"com.x.add","args":[1,2]}"#).unwrap_err();
        assert_eq!(err.reply_text(), "realm not specified");
    }

    #[test]
    fn rejects_empty_realm() {
        let err = DownstreamRequest::parse(r#"{"realm":"","method":"com.x.add"}"#).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn rejects_both_method_and_event() {
        let err =
            DownstreamRequest::parse(r#"{"realm":"r1","method":"m","event":"e"}"#).unwrap_err();
        assert_eq!(err.reply_text(), "no request type given");
    }

    #[test]
    fn rejects_neither_method_nor_event() {
        let err = DownstreamRequest::parse(r#"{"realm":"r1"}"#).unwrap_err();
        assert_eq!(err.reply_text(), "no request type given");
    }

    #[test]
    fn omitted_args_and_kwargs_default_to_empty() {
        let req = DownstreamRequest::parse(r#"{"realm":"r1","method":"com.x.add"}"#).unwrap();
        assert!(req.args.is_empty());
        assert!(req.kwargs.is_empty());
    }

    #[test]
    fn unknown_members_are_ignored() {
        let req =
            DownstreamRequest::parse(r#"{"realm":"r1","method":"com.x.add","bogus":42}"#).unwrap();
        assert_eq!(req.realm, "r1");
    }

    #[test]
    fn reply_serializes_as_two_element_array() {
        let reply = DownstreamReply::ok(Value::from(5));
        assert_eq!(reply.to_frame(), "[200,5]");
    }

    #[test]
    fn error_reply_serializes_status_and_text() {
        let reply = DownstreamReply::error(400, "realm not specified");
        assert_eq!(reply.to_frame(), r#"[400,"realm not specified"]"#);
    }
}
