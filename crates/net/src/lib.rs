//! Tagwire Network Library
//!
//! Framed, tagged messages over TCP with a single inbound queue for the
//! application.
//!
//! # Architecture
//!
//! - **Server**: Accepts connections on a background I/O thread and queues
//!   everything they receive
//! - **Client**: Connects to a server from its own I/O thread
//! - **Connection**: One socket with independent read and write cycles
//! - **Frame**: `[tag][body length][body]`, native byte order
//!
//! # Usage
//!
//! ```ignore
//! struct Echo;
//!
//! impl ServerHandler<u32> for Echo {
//!     fn on_client_connect(&self, _client: &Arc<Connection<u32>>) -> bool {
//!         true
//!     }
//!
//!     fn on_message(
//!         &self,
//!         server: &ServerContext<'_, u32>,
//!         client: &Arc<Connection<u32>>,
//!         msg: Message<u32>,
//!     ) {
//!         server.message_client(client, &msg);
//!     }
//! }
//!
//! let mut server = Server::new(ServerConfig::with_port(60000), Echo);
//! server.start()?;
//! loop {
//!     server.update(None, true);
//! }
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod server;

pub use client::Client;
pub use config::{ClientConfig, ServerConfig};
pub use connection::{Connection, ConnectionState, InboundQueue, OwnedMessage, Role};
pub use error::{Error, Result};
pub use handshake::{Handshake, Scramble};
pub use server::{Server, ServerContext, ServerHandler, FIRST_CONNECTION_ID};
pub use tagwire_core::{BodyValue, Message, MessageHeader, MessageTag, ThreadSafeQueue};

/// Default port for Tagwire servers
pub const DEFAULT_PORT: u16 = 60000;
