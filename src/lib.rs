//! A client for server-push RPC over a bidirectional framed transport (websocket by default),
//! generalized from a `HubConnection`/`Transport`/`Protocol` split in the source into typed traits
//! `Session` drives: [`Codec`] for wire encoding and [`Transport`] for the socket itself.

#[macro_use]
extern crate tracing;

pub mod checker;
pub mod codec;
pub mod config;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod message;
pub mod negotiate;
pub mod pending;
pub mod session;
pub mod state;
pub mod transport;

pub use codec::{Codec, CodecError, JsonCodec, MessagePackCodec};
pub use config::{AccessTokenFactory, SessionBuilder};
pub use error::{Result, SessionError};
pub use handlers::Handler;
pub use message::{HandshakeRequest, HandshakeResponse, Message, MessageType};
pub use session::{Session, DEFAULT_INVOKE_TIMEOUT};
pub use state::ConnectionState;
pub use transport::{Transport, TransportError, TransportHandler, WebSocketTransport};
