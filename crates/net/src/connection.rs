//! A single framed TCP connection
//!
//! Each armed connection runs one task on the I/O runtime. The task first
//! performs the optional validation handshake, then drives two
//! independent cycles until either side fails or [`Connection::disconnect`]
//! is called:
//!
//! - **read**: header, body, deliver to the inbound queue, repeat
//! - **write**: drain the outgoing queue one frame at a time, then sleep
//!   until [`Connection::send`] wakes it
//!
//! Any transport error moves the connection to `Disconnected` for good.
//! Nothing is retried here; the owner prunes dead connections.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, info, warn};

use tagwire_core::{Message, MessageTag, ThreadSafeQueue};

use crate::error::{Error, Result};
use crate::frame::{read_frame, write_frame};
use crate::handshake::Handshake;

/// Which side created the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Initiated locally by a [`Client`](crate::Client)
    Client,
    /// Accepted by a [`Server`](crate::Server)
    Server,
}

/// Connection lifecycle. `Disconnected` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

/// A received message together with the connection it arrived on.
///
/// `remote` is `None` for messages received by a client, which only has
/// one connection.
#[derive(Debug)]
pub struct OwnedMessage<T: MessageTag> {
    pub remote: Option<Arc<Connection<T>>>,
    pub msg: Message<T>,
}

/// Queue that received messages are delivered into
pub type InboundQueue<T> = ThreadSafeQueue<OwnedMessage<T>>;

type ValidatedHook<T> = Box<dyn FnOnce(&Arc<Connection<T>>) + Send>;

/// Framed connection over one TCP socket
pub struct Connection<T: MessageTag> {
    id: AtomicU32,
    role: Role,
    state: Mutex<ConnectionState>,
    validated: AtomicBool,
    peer_addr: Mutex<Option<SocketAddr>>,
    /// Socket waiting to be armed
    stream: Mutex<Option<TcpStream>>,
    runtime: Handle,
    outgoing: ThreadSafeQueue<Message<T>>,
    write_ready: Notify,
    shutdown_tx: broadcast::Sender<()>,
    inbound: Arc<InboundQueue<T>>,
    max_body_size: u32,
}

impl<T: MessageTag> Connection<T> {
    /// Wrap an accepted socket. The connection stays idle until
    /// [`connect_to_client`](Self::connect_to_client) arms it.
    pub fn server(
        stream: TcpStream,
        peer_addr: SocketAddr,
        runtime: Handle,
        inbound: Arc<InboundQueue<T>>,
        max_body_size: u32,
    ) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(addr = %peer_addr, error = %e, "Failed to set TCP_NODELAY");
        }
        Self::new(
            Role::Server,
            Some(stream),
            Some(peer_addr),
            runtime,
            inbound,
            max_body_size,
        )
    }

    /// Create an unconnected client-side connection. Received messages
    /// are pushed to `inbound` without an owner.
    pub fn client(runtime: Handle, inbound: Arc<InboundQueue<T>>, max_body_size: u32) -> Self {
        Self::new(Role::Client, None, None, runtime, inbound, max_body_size)
    }

    fn new(
        role: Role,
        stream: Option<TcpStream>,
        peer_addr: Option<SocketAddr>,
        runtime: Handle,
        inbound: Arc<InboundQueue<T>>,
        max_body_size: u32,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            id: AtomicU32::new(0),
            role,
            state: Mutex::new(ConnectionState::Connecting),
            validated: AtomicBool::new(false),
            peer_addr: Mutex::new(peer_addr),
            stream: Mutex::new(stream),
            runtime,
            outgoing: ThreadSafeQueue::new(),
            write_ready: Notify::new(),
            shutdown_tx,
            inbound,
            max_body_size,
        }
    }

    /// Server-assigned id (0 for client-side connections)
    pub fn id(&self) -> u32 {
        self.id.load(Ordering::Acquire)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Whether the validation handshake has completed
    pub fn is_validated(&self) -> bool {
        self.validated.load(Ordering::Acquire)
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        *self.peer_addr.lock()
    }

    /// Messages queued but not yet written
    pub fn outgoing_len(&self) -> usize {
        self.outgoing.len()
    }

    /// Arm an accepted connection: assign its id and start the
    /// handshake and read/write cycles on the I/O runtime.
    ///
    /// `on_validated` runs on the I/O thread once the handshake succeeds,
    /// or straight away when `handshake` is `None`.
    pub fn connect_to_client<F>(
        self: &Arc<Self>,
        id: u32,
        handshake: Option<Arc<dyn Handshake>>,
        handshake_timeout: Duration,
        on_validated: F,
    ) -> Result<()>
    where
        F: FnOnce(&Arc<Self>) + Send + 'static,
    {
        if self.role != Role::Server {
            return Err(Error::WrongRole(self.role));
        }
        let stream = self.stream.lock().take().ok_or(Error::NotConnected)?;

        self.id.store(id, Ordering::Release);
        self.arm(stream, handshake, handshake_timeout, Some(Box::new(on_validated)))
    }

    /// Connect to a server and start the cycles on the I/O runtime.
    ///
    /// A failed connect leaves the connection `Disconnected`.
    pub async fn connect_to_server(
        self: &Arc<Self>,
        addr: SocketAddr,
        handshake: Option<Arc<dyn Handshake>>,
        handshake_timeout: Duration,
    ) -> Result<()> {
        if self.role != Role::Client {
            return Err(Error::WrongRole(self.role));
        }

        let stream = match TcpStream::connect(addr).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(addr = %addr, error = %e, "Connect failed");
                self.disconnect();
                return Err(e.into());
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!(addr = %addr, error = %e, "Failed to set TCP_NODELAY");
        }
        *self.peer_addr.lock() = Some(addr);

        self.arm(stream, handshake, handshake_timeout, None)
    }

    fn arm(
        self: &Arc<Self>,
        stream: TcpStream,
        handshake: Option<Arc<dyn Handshake>>,
        handshake_timeout: Duration,
        on_validated: Option<ValidatedHook<T>>,
    ) -> Result<()> {
        // Subscribe before the state flips so a concurrent disconnect is
        // always observed by the cycles.
        let read_shutdown = self.shutdown_tx.subscribe();
        let write_shutdown = self.shutdown_tx.subscribe();

        {
            let mut state = self.state.lock();
            if *state != ConnectionState::Connecting {
                return Err(Error::NotConnected);
            }
            *state = ConnectionState::Connected;
        }

        let conn = Arc::clone(self);
        self.runtime.spawn(async move {
            conn.run(
                stream,
                handshake,
                handshake_timeout,
                on_validated,
                read_shutdown,
                write_shutdown,
            )
            .await;
        });
        Ok(())
    }

    /// Queue a message for sending. Ignored once disconnected.
    pub fn send(&self, msg: Message<T>) {
        {
            // Held across the push so a concurrent disconnect clears it
            let state = self.state.lock();
            if *state == ConnectionState::Disconnected {
                debug!(id = self.id(), "Dropping message for disconnected peer");
                return;
            }
            self.outgoing.push_back(msg);
        }
        self.write_ready.notify_one();
    }

    /// Close the connection. Safe to call repeatedly and from any thread.
    pub fn disconnect(&self) {
        {
            let mut state = self.state.lock();
            if *state == ConnectionState::Disconnected {
                return;
            }
            *state = ConnectionState::Disconnected;
        }

        // An unarmed socket is closed right here; armed ones close when
        // their task observes the shutdown signal.
        self.stream.lock().take();
        self.outgoing.clear();
        let _ = self.shutdown_tx.send(());
        debug!(id = self.id(), role = ?self.role, "Connection closed");
    }

    async fn run(
        self: Arc<Self>,
        stream: TcpStream,
        handshake: Option<Arc<dyn Handshake>>,
        handshake_timeout: Duration,
        on_validated: Option<ValidatedHook<T>>,
        mut read_shutdown: broadcast::Receiver<()>,
        write_shutdown: broadcast::Receiver<()>,
    ) {
        let (mut reader, mut writer) = stream.into_split();

        let validation = async {
            match handshake.as_deref() {
                Some(scheme) => tokio::time::timeout(
                    handshake_timeout,
                    self.handshake(scheme, &mut reader, &mut writer),
                )
                .await
                .unwrap_or_else(|_| Err(Error::HandshakeFailed("timed out".into()))),
                None => Ok(()),
            }
        };

        let result = tokio::select! {
            result = validation => result,
            _ = read_shutdown.recv() => return,
        };
        if let Err(e) = result {
            warn!(id = self.id(), error = %e, "Validation failed");
            self.disconnect();
            return;
        }
        if !self.is_connected() {
            return;
        }

        self.validated.store(true, Ordering::Release);
        if self.role == Role::Server {
            info!(id = self.id(), "Client validated");
        }
        if let Some(hook) = on_validated {
            hook(&self);
        }

        tokio::join!(
            self.read_cycle(reader, read_shutdown),
            self.write_cycle(writer, write_shutdown),
        );
    }

    async fn handshake(
        &self,
        scheme: &dyn Handshake,
        reader: &mut OwnedReadHalf,
        writer: &mut OwnedWriteHalf,
    ) -> Result<()> {
        match self.role {
            Role::Server => {
                let challenge = scheme.challenge();
                writer.write_all(&challenge.to_ne_bytes()).await?;
                writer.flush().await?;

                let response = read_u64(reader).await?;
                if response != scheme.respond(challenge) {
                    return Err(Error::HandshakeFailed("response mismatch".into()));
                }
            }
            Role::Client => {
                let challenge = read_u64(reader).await?;
                writer
                    .write_all(&scheme.respond(challenge).to_ne_bytes())
                    .await?;
                writer.flush().await?;
            }
        }
        Ok(())
    }

    async fn read_cycle(
        self: &Arc<Self>,
        mut reader: OwnedReadHalf,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            let result = tokio::select! {
                result = read_frame::<T, _>(&mut reader, self.max_body_size) => result,
                _ = shutdown.recv() => break,
            };

            match result {
                Ok(msg) => {
                    if !self.is_connected() {
                        break;
                    }
                    self.deliver(msg);
                }
                Err(Error::ConnectionClosed) => {
                    debug!(id = self.id(), "Peer closed connection");
                    self.disconnect();
                    break;
                }
                Err(e) => {
                    warn!(id = self.id(), error = %e, "Read error");
                    self.disconnect();
                    break;
                }
            }
        }
    }

    fn deliver(self: &Arc<Self>, msg: Message<T>) {
        let remote = match self.role {
            Role::Server => Some(Arc::clone(self)),
            Role::Client => None,
        };
        self.inbound.push_back(OwnedMessage { remote, msg });
    }

    async fn write_cycle(&self, mut writer: OwnedWriteHalf, mut shutdown: broadcast::Receiver<()>) {
        loop {
            while let Some(msg) = self.outgoing.front() {
                let result = tokio::select! {
                    result = write_frame(&mut writer, &msg) => result,
                    _ = shutdown.recv() => return,
                };

                if let Err(e) = result {
                    warn!(id = self.id(), error = %e, "Write error");
                    self.disconnect();
                    return;
                }
                let _ = self.outgoing.pop_front();
            }

            tokio::select! {
                _ = self.write_ready.notified() => {}
                _ = shutdown.recv() => return,
            }
        }
    }
}

async fn read_u64(reader: &mut OwnedReadHalf) -> Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf).await?;
    Ok(u64::from_ne_bytes(buf))
}

impl<T: MessageTag> fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("role", &self.role)
            .field("state", &self.state())
            .field("peer_addr", &self.peer_addr())
            .finish()
    }
}
