//! WAMP protocol-bridge proxy: realm-multiplexed WAMP session manager and
//! request dispatcher. See `server_wampproxy.rs` for the binary entry point
//! that wires these components into a downstream listener.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod listener;
pub mod logging;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod transport;
