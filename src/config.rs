//! Configuration surface.
//!
//! `SessionBuilder` is a consuming fluent builder, generalized from
//! `boltlabs-inc-zeekoe`'s `transport::client::Client<Protocol>` builder: that one returns
//! `&mut Self` because one `Client` is reused across many connections, whereas a `Session` owns
//! exactly one connection's lifecycle, so a consuming `self -> Self` builder (ending in `.build()`)
//! avoids a spurious `&mut` on what is otherwise a short-lived value.
//!
//! ```no_run
//! # use signalr_client::SessionBuilder;
//! # use std::time::Duration;
//! let session = SessionBuilder::new("wss://example.test/hub")?
//!     .keep_alive_interval(Duration::from_secs(15))
//!     .server_timeout(Duration::from_secs(30))
//!     .automatic_reconnect(Duration::from_secs(5), false)
//!     .header("X-App", "demo")
//!     .build();
//! # Ok::<(), signalr_client::SessionError>(())
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::codec::{Codec, JsonCodec};
use crate::error::{Result, SessionError};
use crate::session::Session;
use crate::transport::{Transport, WebSocketTransport};

/// Producer of a bearer token, called once per connect attempt.
pub type AccessTokenFactory = Arc<dyn Fn() -> String + Send + Sync>;

pub(crate) struct Configuration {
    pub(crate) url: Url,
    pub(crate) access_token_factory: Option<AccessTokenFactory>,
    pub(crate) verify_ssl: bool,
    pub(crate) skip_negotiation: bool,
    pub(crate) headers: HashMap<String, String>,
    pub(crate) keep_alive_interval: Duration,
    pub(crate) server_timeout: Option<Duration>,
    pub(crate) reconnect_interval: Option<Duration>,
    pub(crate) surrender: bool,
    pub(crate) codec: Arc<dyn Codec>,
    pub(crate) transport: Arc<dyn Transport>,
}

/// Builds a [`Session`]. Validation that doesn't require I/O happens eagerly in each setter,
/// mirroring `HubConnectionBuilder.withUrl`'s upfront `TypeError`/`ValueError` checks in the
/// source (the difference being most of those checks are subsumed here by Rust's type system).
pub struct SessionBuilder {
    config: Configuration,
}

impl SessionBuilder {
    /// Start building a session connecting to `url`. Fails immediately if `url` doesn't parse.
    pub fn new(url: impl AsRef<str>) -> Result<Self> {
        let url = Url::parse(url.as_ref())?;
        Ok(SessionBuilder {
            config: Configuration {
                url,
                access_token_factory: None,
                verify_ssl: true,
                skip_negotiation: false,
                headers: HashMap::new(),
                keep_alive_interval: Duration::from_secs(15),
                server_timeout: None,
                reconnect_interval: None,
                surrender: true,
                codec: Arc::new(JsonCodec::new(1)),
                transport: Arc::new(WebSocketTransport::new()),
            },
        })
    }

    /// Called once per connect attempt; its return value is attached as
    /// `Authorization: Bearer <token>`.
    pub fn access_token_factory(mut self, factory: impl Fn() -> String + Send + Sync + 'static) -> Self {
        self.config.access_token_factory = Some(Arc::new(factory));
        self
    }

    /// Default `true`. Set `false` to disable certificate verification (e.g. for self-signed
    /// certificates in development).
    pub fn verify_ssl(mut self, verify_ssl: bool) -> Self {
        self.config.verify_ssl = verify_ssl;
        self
    }

    /// Default `false`. Set `true` to skip the HTTP negotiate preflight and connect the socket
    /// directly.
    pub fn skip_negotiation(mut self, skip_negotiation: bool) -> Self {
        self.config.skip_negotiation = skip_negotiation;
        self
    }

    /// Add one header sent with both the negotiate request and the websocket opening handshake.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.headers.insert(name.into(), value.into());
        self
    }

    /// Replace the whole header map at once.
    pub fn headers(mut self, headers: HashMap<String, String>) -> Self {
        self.config.headers = headers;
        self
    }

    /// Default 15 seconds. Maximum idle outbound period before a `Ping` is sent.
    pub fn keep_alive_interval(mut self, interval: Duration) -> Self {
        self.config.keep_alive_interval = interval;
        self
    }

    /// Default disabled. Maximum idle inbound period before the server is considered dead.
    pub fn server_timeout(mut self, timeout: Duration) -> Self {
        self.config.server_timeout = Some(timeout);
        self
    }

    /// Enable reconnect with the given sleep interval between attempts, and whether a first
    /// connect failure should surrender instead of retrying (source default: `true`).
    pub fn automatic_reconnect(mut self, interval: Duration, surrender: bool) -> Self {
        self.config.reconnect_interval = Some(interval);
        self.config.surrender = surrender;
        self
    }

    /// Swap in a different [`Codec`]. Defaults to [`JsonCodec`].
    pub fn codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.config.codec = codec;
        self
    }

    /// Swap in a different [`Transport`]. Defaults to [`WebSocketTransport`]. Exposed mainly so
    /// tests can inject a deterministic fake.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.config.transport = transport;
        self
    }

    pub fn build(self) -> Session {
        Session::new(self.config)
    }
}

/// Validates a handler/target the way the source's `onOpen`/`on`/etc. validate their callable
/// argument. In Rust, non-callable is a compile error, so the only runtime check left is that a
/// target name isn't empty.
pub(crate) fn validate_target(target: &str) -> Result<()> {
    if target.is_empty() {
        return Err(SessionError::InvalidTarget);
    }
    Ok(())
}
