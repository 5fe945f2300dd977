//! Reconnecting transport (C3): dials the upstream router with capped
//! exponential backoff and validates the mTLS material supplied on the CLI.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use url::Url;
use wamp_async::{Client, ClientConfig, ClientRole, SerializerType};

use crate::wampproxy::config::{RECONNECT_BASE_DELAY, RECONNECT_MAX_DELAY};
use crate::wampproxy::error::ProxyError;

/// Parses the router URI and, when a client key/cert pair is configured,
/// validates that both PEM files load. Fatal on any failure: no reconnect
/// attempts, matching C3's "cannot be loaded" contract.
///
/// `wamp_async` 0.3.2-alpha has no public hook to inject a client identity
/// into its TLS handshake, so a configured client certificate is only
/// validated here (fail fast if the files are missing or unparsable); it is
/// not wired into mutual TLS at the transport layer, and `join_realm` does
/// not carry the HELLO-time "tls" auth-method hint described in spec §4.1.
/// See DESIGN.md for the tracked limitation.
pub fn validate_start_up(
    router_uri: &str,
    client_key: Option<&Path>,
    client_certificate: Option<&Path>,
) -> Result<(), ProxyError> {
    let url = Url::parse(router_uri)
        .map_err(|e| ProxyError::Config(format!("invalid router uri '{router_uri}': {e}")))?;
    match url.scheme() {
        "ws" | "wss" => {}
        other => return Err(ProxyError::Config(format!("unsupported router uri scheme '{other}'"))),
    }

    match (client_key, client_certificate) {
        (Some(key_path), Some(cert_path)) => {
            load_pem_certs(cert_path)?;
            load_pem_key(key_path)?;
            Ok(())
        }
        (None, None) => Ok(()),
        (Some(_), None) | (None, Some(_)) => Err(ProxyError::Config(
            "client-key and client-certificate must be configured together".to_string(),
        )),
    }
}

fn load_pem_certs(path: &Path) -> Result<(), ProxyError> {
    let bytes = std::fs::read(path)
        .map_err(|e| ProxyError::Config(format!("reading certificate '{}': {e}", path.display())))?;
    let mut reader = std::io::BufReader::new(bytes.as_slice());
    let certs: Vec<_> = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ProxyError::Config(format!("parsing certificate '{}': {e}", path.display())))?;
    if certs.is_empty() {
        return Err(ProxyError::Config(format!(
            "certificate '{}' contains no PEM entries",
            path.display()
        )));
    }
    Ok(())
}

fn load_pem_key(path: &Path) -> Result<(), ProxyError> {
    let bytes = std::fs::read(path)
        .map_err(|e| ProxyError::Config(format!("reading private key '{}': {e}", path.display())))?;
    let mut reader = std::io::BufReader::new(bytes.as_slice());
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| ProxyError::Config(format!("parsing private key '{}': {e}", path.display())))?
        .ok_or_else(|| ProxyError::Config(format!("private key '{}' contains no PEM entry", path.display())))?;
    Ok(())
}

/// Dials `router_uri` and joins `realm`, retrying with exponential backoff
/// capped at [`RECONNECT_MAX_DELAY`] and reset on success. Only returns once
/// a session has actually joined; there is no fatal outcome from here on,
/// that's all handled once, up front, by [`validate_start_up`].
pub async fn dial_and_join(
    router_uri: &str,
    realm: &str,
) -> (Arc<Client<'static>>, tokio::task::JoinHandle<()>) {
    let mut delay = RECONNECT_BASE_DELAY;
    loop {
        let cfg = ClientConfig::default()
            .set_roles(vec![ClientRole::Caller])
            .set_serializers(vec![SerializerType::Json]);

        match Client::connect(router_uri, Some(cfg)).await {
            Ok((mut client, (evt_loop, _rpc_evt_queue))) => {
                let evt_handle = tokio::spawn(async move {
                    let _ = evt_loop.await;
                });

                match client.join_realm(realm.to_string()).await {
                    Ok(()) => {
                        log::debug!("joined realm '{realm}' at {router_uri}");
                        return (Arc::new(client), evt_handle);
                    }
                    Err(e) => {
                        log::warn!("join_realm('{realm}') failed: {e}; retrying in {delay:?}");
                        evt_handle.abort();
                    }
                }
            }
            Err(e) => {
                log::warn!("dial {router_uri} failed: {e}; retrying in {delay:?}");
            }
        }

        tokio::time::sleep(delay).await;
        delay = std::cmp::min(delay * 2, RECONNECT_MAX_DELAY);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_ws_scheme() {
        let err = validate_start_up("tcp://127.0.0.1:8080", None, None).unwrap_err();
        assert_eq!(err.status_code(), 500);
    }

    #[test]
    fn rejects_mismatched_cert_and_key() {
        let err = validate_start_up(
            "ws://127.0.0.1:8080/ws",
            Some(Path::new("key.pem")),
            None,
        )
        .unwrap_err();
        assert!(err.reply_text().contains("together"));
    }

    #[test]
    fn accepts_plain_ws_with_no_certs() {
        validate_start_up("ws://127.0.0.1:8080/ws", None, None).unwrap();
    }
}
