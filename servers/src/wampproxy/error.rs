use thiserror::Error;

/// Structured error taxonomy for the proxy. One variant per kind; the
/// dispatcher's kind-to-status mapping is exhaustive and checked by the
/// compiler.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("parsing request failed: {0}")]
    Parse(String),

    #[error("operation '{0}' not advertised by realm")]
    UnknownOperation(String),

    #[error("wamp request failed: {0}")]
    Application(String),

    #[error("introspection failed: {0}")]
    Introspection(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("precondition violated: {0}")]
    Precondition(String),

    #[error("upstream call timed out")]
    Timeout,
}

impl ProxyError {
    /// Maps an error kind to the downstream status code from the wire protocol.
    pub fn status_code(&self) -> u16 {
        match self {
            ProxyError::Parse(_) => 400,
            ProxyError::UnknownOperation(_) => 400,
            ProxyError::Application(_) => 501,
            ProxyError::Introspection(_) => 503,
            ProxyError::Transport(_) => 503,
            ProxyError::Config(_) => 500,
            ProxyError::Precondition(_) => 500,
            ProxyError::Timeout => 504,
        }
    }

    /// Text placed in the reply payload. Application error detail is
    /// deliberately generic; the WAMP error URI itself is logged, not echoed.
    pub fn reply_text(&self) -> String {
        match self {
            ProxyError::Parse(msg) => msg.clone(),
            ProxyError::UnknownOperation(uri) => format!("event '{uri}' not subscribed by anyone"),
            ProxyError::Application(_) => "wamp request failed".to_string(),
            ProxyError::Introspection(_) | ProxyError::Transport(_) => "upstream unavailable".to_string(),
            ProxyError::Config(msg) => msg.clone(),
            ProxyError::Precondition(msg) => msg.clone(),
            ProxyError::Timeout => "upstream timeout".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_wire_protocol_table() {
        assert_eq!(ProxyError::Parse("x".into()).status_code(), 400);
        assert_eq!(ProxyError::UnknownOperation("t1".into()).status_code(), 400);
        assert_eq!(ProxyError::Application("com.x.fail".into()).status_code(), 501);
        assert_eq!(ProxyError::Introspection("boom".into()).status_code(), 503);
        assert_eq!(ProxyError::Transport("reset".into()).status_code(), 503);
        assert_eq!(ProxyError::Timeout.status_code(), 504);
    }

    #[test]
    fn application_errors_do_not_leak_the_wamp_error_uri() {
        let err = ProxyError::Application("com.example.secret_internal_uri".to_string());
        assert_eq!(err.reply_text(), "wamp request failed");
    }
}
