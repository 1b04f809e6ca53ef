//! Relay message kinds and server policy
//!
//! Every client is accepted. Pings are bounced back to their sender, and
//! `MessageAll` requests are forwarded to everyone else as a
//! `ServerMessage` carrying the sender's id.

use std::sync::Arc;
use std::time::Duration;

use tagwire_net::{Connection, Message, MessageTag, Server, ServerContext, ServerHandler};
use tracing::{debug, info};

/// Longest wait for traffic before dead clients are swept
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Message kinds understood by the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayTag {
    /// Sent to a client once it is validated
    ServerAccept,
    /// Echoed back unchanged
    ServerPing,
    /// Client asks for its message to be forwarded to everyone else
    MessageAll,
    /// Forwarded message; the sender's id is the last value in the body
    ServerMessage,
}

impl MessageTag for RelayTag {
    fn to_raw(self) -> u32 {
        match self {
            RelayTag::ServerAccept => 0,
            RelayTag::ServerPing => 1,
            RelayTag::MessageAll => 2,
            RelayTag::ServerMessage => 3,
        }
    }

    fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(RelayTag::ServerAccept),
            1 => Some(RelayTag::ServerPing),
            2 => Some(RelayTag::MessageAll),
            3 => Some(RelayTag::ServerMessage),
            _ => None,
        }
    }
}

/// Server policy for the relay
#[derive(Debug, Default)]
pub struct RelayHandler;

impl ServerHandler<RelayTag> for RelayHandler {
    fn on_client_connect(&self, client: &Arc<Connection<RelayTag>>) -> bool {
        debug!(addr = ?client.peer_addr(), "Accepting client");
        true
    }

    fn on_client_disconnect(&self, client: &Arc<Connection<RelayTag>>) {
        info!(id = client.id(), "Client left");
    }

    fn on_message(
        &self,
        server: &ServerContext<'_, RelayTag>,
        client: &Arc<Connection<RelayTag>>,
        msg: Message<RelayTag>,
    ) {
        match msg.id() {
            RelayTag::ServerPing => {
                debug!(id = client.id(), "Ping");
                server.message_client(client, &msg);
            }
            RelayTag::MessageAll => {
                let mut forward = Message::new(RelayTag::ServerMessage);
                forward.extend_from_slice(msg.body()).push(client.id());
                server.message_all_clients(&forward, Some(client));
            }
            other => {
                debug!(id = client.id(), tag = ?other, "Ignoring client message");
            }
        }
    }

    fn on_client_validated(&self, client: &Arc<Connection<RelayTag>>) {
        client.send(Message::new(RelayTag::ServerAccept));
    }
}

/// Handle whatever arrives within `timeout`, then drop clients that
/// went away without any traffic reaching them
pub fn tick(server: &Server<RelayTag, RelayHandler>, timeout: Duration) -> usize {
    let handled = server.update_timeout(None, timeout);
    server.prune();
    handled
}
