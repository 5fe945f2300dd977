//! Upstream Session (C1): one joined WAMP session bound to one realm, with
//! the router's advertised RPC/subscription surface cached at join time.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use wamp_async::{try_into_any_value, Arg, WampKwArgs};

use crate::wampproxy::error::ProxyError;
use crate::wampproxy::transport;

/// Mirrors the lifecycle in the data model: `Dialing -> Joining ->
/// Introspecting -> Ready`, terminating at `Closed`. `Dialing` through
/// `Introspecting` are transient and only ever logged, since no
/// `UpstreamSession` value exists yet to carry them; `Ready` and `Closed`
/// are held in the session's `state` field for the rest of its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Dialing,
    Joining,
    Introspecting,
    Ready,
    Closed,
}

pub struct UpstreamSession {
    pub realm: String,
    client: Arc<wamp_async::Client<'static>>,
    pub rpc_uris: HashSet<String>,
    pub sub_uris: HashSet<String>,
    state: Mutex<SessionState>,
}

impl UpstreamSession {
    /// Dials the router, joins `realm`, and runs the introspection
    /// algorithm. Returns the session together with a handle that resolves
    /// when the underlying connection ends (used by the registry to trigger
    /// eviction and a future reconnect).
    pub async fn connect(
        router_uri: &str,
        realm: &str,
    ) -> Result<(UpstreamSession, tokio::task::JoinHandle<()>), ProxyError> {
        let state = SessionState::Dialing;
        log::debug!("realm '{realm}': state -> {state:?}");

        let (client, watch_handle) = transport::dial_and_join(router_uri, realm).await;
        let state = SessionState::Joining;
        log::debug!("realm '{realm}': state -> {state:?}");

        let state = SessionState::Introspecting;
        log::debug!("realm '{realm}': state -> {state:?}");
        let (rpc_uris, sub_uris) = introspect(&client)
            .await
            .map_err(|e| ProxyError::Introspection(e.to_string()))?;

        let state = SessionState::Ready;
        log::debug!(
            "realm '{realm}': state -> {state:?} ({} rpc, {} sub)",
            rpc_uris.len(),
            sub_uris.len()
        );

        Ok((
            UpstreamSession {
                realm: realm.to_string(),
                client,
                rpc_uris,
                sub_uris,
                state: Mutex::new(state),
            },
            watch_handle,
        ))
    }

    /// Current lifecycle state. Only ever `Ready` or `Closed` for a
    /// constructed session: the registry never hands one out before it
    /// reaches `Ready`, and it never leaves `Ready` except straight to
    /// `Closed` (spec invariant).
    pub fn state(&self) -> SessionState {
        *self.state.lock().expect("session state lock poisoned")
    }

    /// Marks this session `Closed`. Called by the registry once the
    /// underlying transport's event loop has ended, before the entry is
    /// evicted, so a call racing the disconnect observes the transition
    /// instead of silently succeeding against a dead client.
    pub fn mark_closed(&self) {
        *self.state.lock().expect("session state lock poisoned") = SessionState::Closed;
    }

    /// Invokes an upstream RPC. Fails with `PreconditionError` unless the
    /// session is still `Ready` - the registry never hands out a session
    /// before it reaches `Ready`, but it may be marked `Closed` concurrently
    /// by a disconnect while a call is in flight.
    pub async fn call(
        &self,
        uri: &str,
        args: &[Value],
        kwargs: &serde_json::Map<String, Value>,
    ) -> Result<Value, ProxyError> {
        if self.state() != SessionState::Ready {
            return Err(ProxyError::Precondition(format!(
                "call to '{uri}' on realm '{}' while state is {:?}",
                self.realm,
                self.state()
            )));
        }

        let wamp_args = if args.is_empty() {
            None
        } else {
            Some(
                args.iter()
                    .map(|v| try_into_any_value(v).map_err(|e| ProxyError::Parse(e.to_string())))
                    .collect::<Result<Vec<Arg>, ProxyError>>()?,
            )
        };

        let wamp_kwargs = if kwargs.is_empty() {
            None
        } else {
            let mut map = WampKwArgs::new();
            for (k, v) in kwargs.iter() {
                let arg = try_into_any_value(v).map_err(|e| ProxyError::Parse(e.to_string()))?;
                map.insert(k.clone(), arg);
            }
            Some(map)
        };

        let (res_args, res_kwargs) = self
            .client
            .call(uri, wamp_args, wamp_kwargs)
            .await
            .map_err(|e| ProxyError::Application(e.to_string()))?;

        Ok(result_to_json(res_args, res_kwargs))
    }
}

/// Converts a WAMP call's return args/kwargs into a single JSON payload for
/// the downstream reply: kwargs if present, else the first positional
/// argument, else `null`.
fn result_to_json(args: Option<Vec<Arg>>, kwargs: Option<WampKwArgs>) -> Value {
    if let Some(kwargs) = kwargs {
        if !kwargs.is_empty() {
            return serde_json::to_value(kwargs).unwrap_or(Value::Null);
        }
    }
    if let Some(args) = args {
        if let Some(first) = args.into_iter().next() {
            return serde_json::to_value(first).unwrap_or(Value::Null);
        }
    }
    Value::Null
}

/// Runs the two parallel introspection lookups at join time: resolve
/// every registered RPC URI via `wamp.registration.{list,get}` and every
/// subscribed topic URI via `wamp.subscription.{list,get}`.
async fn introspect(
    client: &Arc<wamp_async::Client<'static>>,
) -> Result<(HashSet<String>, HashSet<String>), wamp_async::WampError> {
    let (rpc_uris, sub_uris) = tokio::try_join!(
        list_and_get_uris(client, "wamp.registration.list", "wamp.registration.get"),
        list_and_get_uris(client, "wamp.subscription.list", "wamp.subscription.get"),
    )?;
    Ok((rpc_uris, sub_uris))
}

async fn list_and_get_uris(
    client: &Arc<wamp_async::Client<'static>>,
    list_uri: &str,
    get_uri: &str,
) -> Result<HashSet<String>, wamp_async::WampError> {
    // wamp.*.list / wamp.*.get return their payload as the first
    // positional result, not as kwargs (the Python original reads
    // `regsdata = yield self.call(...)` and indexes the bare result).
    let (list_args, _list_kwargs) = client.call(list_uri, None, None).await?;
    let ids = extract_exact_ids(&first_arg_as_json(list_args));

    let mut uris = HashSet::new();
    for id in ids {
        let id_arg = try_into_any_value(&Value::from(id))
            .map_err(|e| wamp_async::WampError::from(e.to_string()))?;
        let (get_args, _get_kwargs) = client.call(get_uri, Some(vec![id_arg]), None).await?;
        if let Some(uri) = extract_uri(&first_arg_as_json(get_args)) {
            uris.insert(uri);
        }
    }
    Ok(uris)
}

/// Converts a meta-call's first positional return value into JSON,
/// tolerating a missing or unconvertible value by falling back to null.
fn first_arg_as_json(args: Option<Vec<Arg>>) -> Value {
    args.and_then(|a| a.into_iter().next())
        .map(|arg| serde_json::to_value(arg).unwrap_or(Value::Null))
        .unwrap_or(Value::Null)
}

/// Pulls the `exact` registration/subscription ID list out of a
/// `wamp.*.list` reply, tolerating any missing/malformed shape by
/// returning an empty set: an empty advertised surface is legal.
fn extract_exact_ids(result: &Value) -> Vec<u64> {
    result
        .get("exact")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(Value::as_u64).collect())
        .unwrap_or_default()
}

/// Pulls the `uri` field out of a `wamp.*.get` reply.
fn extract_uri(result: &Value) -> Option<String> {
    result.get("uri").and_then(Value::as_str).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn first_arg_as_json_reads_the_first_positional_value() {
        let value = json!({"exact": [1, 2]});
        let args = vec![try_into_any_value(&value).unwrap()];
        assert_eq!(first_arg_as_json(Some(args)), value);
    }

    #[test]
    fn first_arg_as_json_is_null_when_absent() {
        assert_eq!(first_arg_as_json(None), Value::Null);
        assert_eq!(first_arg_as_json(Some(vec![])), Value::Null);
    }

    #[test]
    fn extract_exact_ids_reads_the_exact_field() {
        let kwargs = json!({"exact": [1, 2, 3], "prefix": [], "wildcard": []});
        assert_eq!(extract_exact_ids(&kwargs), vec![1, 2, 3]);
    }

    #[test]
    fn extract_exact_ids_tolerates_missing_field() {
        assert_eq!(extract_exact_ids(&Value::Null), Vec::<u64>::new());
    }

    #[test]
    fn extract_uri_reads_the_uri_field() {
        let kwargs = json!({"uri": "com.x.add", "id": 1});
        assert_eq!(extract_uri(&kwargs), Some("com.x.add".to_string()));
    }

    #[test]
    fn extract_uri_tolerates_missing_field() {
        assert_eq!(extract_uri(&json!({"id": 1})), None);
    }

    #[test]
    fn result_to_json_prefers_kwargs_over_args() {
        let mut kwargs = WampKwArgs::new();
        kwargs.insert("sum".to_string(), 5i64.into());
        let json = result_to_json(Some(vec![1i64.into()]), Some(kwargs));
        assert_eq!(json, json!({"sum": 5}));
    }

    #[test]
    fn result_to_json_falls_back_to_first_arg() {
        let json = result_to_json(Some(vec![5i64.into(), 6i64.into()]), None);
        assert_eq!(json, json!(5));
    }

    #[test]
    fn result_to_json_is_null_when_empty() {
        assert_eq!(result_to_json(None, None), Value::Null);
    }
}
