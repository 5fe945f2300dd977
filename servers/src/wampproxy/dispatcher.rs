//! Request Dispatcher (C4): turns one downstream text frame into one
//! downstream reply. Owns no state of its own beyond a handle to the
//! registry and the per-call deadline; everything else lives in C1/C2.

use std::time::Duration;

use crate::wampproxy::error::ProxyError;
use crate::wampproxy::protocol::{DownstreamReply, DownstreamRequest, RequestKind};
use crate::wampproxy::registry::SessionRegistry;

#[derive(Clone)]
pub struct Dispatcher {
    registry: SessionRegistry,
    call_timeout: Duration,
}

impl Dispatcher {
    pub fn new(registry: SessionRegistry, call_timeout: Duration) -> Self {
        Dispatcher { registry, call_timeout }
    }

    /// Runs the dispatch algorithm end to end: parse, validate,
    /// acquire the realm's session, branch on RPC/PubSub, and format a
    /// reply. Never returns an `Err`: every failure mode already has a
    /// reply shape, so the caller only needs to write the frame.
    pub async fn dispatch(&self, frame: &str) -> DownstreamReply {
        let request = match DownstreamRequest::parse(frame) {
            Ok(request) => request,
            Err(err) => return DownstreamReply::from_error(&err),
        };

        match self.registry.acquire(&request.realm).await {
            Ok(session) => match &request.kind {
                RequestKind::Rpc { method } => {
                    match tokio::time::timeout(
                        self.call_timeout,
                        session.call(method, &request.args, &request.kwargs),
                    )
                    .await
                    {
                        Ok(Ok(result)) => DownstreamReply::ok(result),
                        Ok(Err(err)) => {
                            log::warn!("rpc '{method}' on realm '{}' failed: {err}", request.realm);
                            DownstreamReply::from_error(&err)
                        }
                        Err(_) => DownstreamReply::from_error(&ProxyError::Timeout),
                    }
                }
                RequestKind::PubSub { event } => {
                    if session.sub_uris.contains(event) {
                        // Relay is reserved but deliberately unimplemented:
                        // fixed not-supported reply, not a generic error.
                        DownstreamReply::error(501, "pubsub not yet supported")
                    } else {
                        DownstreamReply::from_error(&ProxyError::UnknownOperation(event.clone()))
                    }
                }
            },
            Err(err) => {
                log::warn!("acquire('{}') failed: {err}", request.realm);
                DownstreamReply::from_error(&err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_failure_short_circuits_before_acquiring() {
        // A malformed frame never touches the registry: the error reply
        // comes straight back from `DownstreamRequest::parse`.
        let err = DownstreamRequest::parse("not json").unwrap_err();
        assert_eq!(DownstreamReply::from_error(&err).status, 400);
    }
}
