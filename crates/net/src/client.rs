//! TCP client for connecting to a message server

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::sync::broadcast;
use tracing::{error, info};

use tagwire_core::{Message, MessageTag, ThreadSafeQueue};

use crate::config::ClientConfig;
use crate::connection::{Connection, InboundQueue, OwnedMessage};
use crate::error::{Error, Result};
use crate::handshake::{Handshake, Scramble};

/// Client handle for network operations.
///
/// Owns one connection and the I/O thread that drives it. Everything the
/// server sends lands in [`incoming`](Self::incoming).
///
/// The API is blocking; do not call [`Client::connect`] from inside a
/// tokio runtime.
pub struct Client<T: MessageTag> {
    connection: Arc<Connection<T>>,
    incoming: Arc<InboundQueue<T>>,
    shutdown_tx: broadcast::Sender<()>,
    io_thread: Option<JoinHandle<()>>,
}

impl<T: MessageTag> Client<T> {
    /// Connect to a server, answering its challenge with the default
    /// [`Scramble`] when `config.handshake` is set
    pub fn connect(addr: impl ToSocketAddrs, config: &ClientConfig) -> Result<Self> {
        let handshake = config
            .handshake
            .then(|| Arc::new(Scramble::default()) as Arc<dyn Handshake>);
        Self::connect_with_handshake(addr, config, handshake)
    }

    /// Connect using a custom validation scheme
    pub fn connect_with_handshake(
        addr: impl ToSocketAddrs,
        config: &ClientConfig,
        handshake: Option<Arc<dyn Handshake>>,
    ) -> Result<Self> {
        let addr: SocketAddr = addr.to_socket_addrs()?.next().ok_or_else(|| {
            Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "address resolved to nothing",
            ))
        })?;

        info!(addr = %addr, "Connecting to server");

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let incoming = Arc::new(ThreadSafeQueue::new());
        let connection = Arc::new(Connection::client(
            runtime.handle().clone(),
            incoming.clone(),
            config.max_body_size,
        ));

        runtime.block_on(connection.connect_to_server(
            addr,
            handshake,
            config.handshake_timeout(),
        ))?;

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let spawned = std::thread::Builder::new()
            .name("tagwire-client-io".into())
            .spawn(move || {
                runtime.block_on(async move {
                    let _ = shutdown_rx.recv().await;
                });
            });
        let io_thread = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                error!(error = %e, "Failed to spawn I/O thread");
                connection.disconnect();
                return Err(e.into());
            }
        };

        Ok(Self {
            connection,
            incoming,
            shutdown_tx,
            io_thread: Some(io_thread),
        })
    }

    /// Queue a message for the server
    pub fn send(&self, msg: Message<T>) -> Result<()> {
        if !self.connection.is_connected() {
            return Err(Error::NotConnected);
        }
        self.connection.send(msg);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Messages received from the server, oldest first
    pub fn incoming(&self) -> &ThreadSafeQueue<OwnedMessage<T>> {
        &self.incoming
    }

    pub fn connection(&self) -> &Arc<Connection<T>> {
        &self.connection
    }

    /// Close the connection and stop the I/O thread. Idempotent.
    pub fn disconnect(&mut self) {
        self.connection.disconnect();

        if let Some(io_thread) = self.io_thread.take() {
            let _ = self.shutdown_tx.send(());
            if io_thread.join().is_err() {
                error!("Client I/O thread panicked");
            }
            info!("Disconnected from server");
        }
    }
}

impl<T: MessageTag> Drop for Client<T> {
    fn drop(&mut self) {
        self.disconnect();
    }
}
