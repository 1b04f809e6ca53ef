//! TCP server with a connection registry and a single inbound queue
//!
//! The server owns one background I/O thread running a current-thread
//! tokio runtime. Accepting, reading and writing all happen there.
//! Received messages are queued and handed to the application only when
//! it calls [`Server::update`], on the application's own thread.

use std::cell::RefCell;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use tagwire_core::{Message, MessageTag, ThreadSafeQueue};

use crate::config::ServerConfig;
use crate::connection::{Connection, InboundQueue};
use crate::error::{Error, Result};
use crate::handshake::{Handshake, Scramble};

/// Id given to the first approved connection
pub const FIRST_CONNECTION_ID: u32 = 10000;

/// Application policy plugged into a [`Server`].
///
/// `on_client_connect` and `on_client_validated` run on the I/O thread.
/// `on_message` and `on_client_disconnect` run on whichever thread calls
/// [`Server::update`] or the send methods.
pub trait ServerHandler<T: MessageTag>: Send + Sync + 'static {
    /// Decide whether to keep a freshly accepted connection
    fn on_client_connect(&self, _client: &Arc<Connection<T>>) -> bool {
        false
    }

    /// A registered connection was found dead and is being removed
    fn on_client_disconnect(&self, _client: &Arc<Connection<T>>) {}

    /// A message arrived. `server` can reply or broadcast; clients it finds
    /// dead are reported to `on_client_disconnect` once this returns.
    fn on_message(
        &self,
        _server: &ServerContext<'_, T>,
        _client: &Arc<Connection<T>>,
        _msg: Message<T>,
    ) {
    }

    /// A connection completed the validation handshake
    fn on_client_validated(&self, _client: &Arc<Connection<T>>) {}
}

struct Registry<T: MessageTag> {
    connections: Vec<Arc<Connection<T>>>,
    next_id: u32,
}

impl<T: MessageTag> Registry<T> {
    fn remove(&mut self, client: &Arc<Connection<T>>) {
        self.connections.retain(|c| !Arc::ptr_eq(c, client));
    }

    /// Send to every live connection except `ignore` and unregister the
    /// dead ones, returning them
    fn broadcast(
        &mut self,
        msg: &Message<T>,
        ignore: Option<&Arc<Connection<T>>>,
    ) -> Vec<Arc<Connection<T>>> {
        let mut departed = Vec::new();
        self.connections.retain(|client| {
            if !client.is_connected() {
                departed.push(Arc::clone(client));
                return false;
            }
            if !ignore.is_some_and(|ignore| Arc::ptr_eq(ignore, client)) {
                client.send(msg.clone());
            }
            true
        });
        departed
    }

    fn prune(&mut self) -> Vec<Arc<Connection<T>>> {
        let mut departed = Vec::new();
        self.connections.retain(|client| {
            let alive = client.is_connected();
            if !alive {
                departed.push(Arc::clone(client));
            }
            alive
        });
        departed
    }
}

/// Send to one client if it is connected, otherwise unregister it.
/// Returns false when the client turned out to be dead.
fn send_or_unregister<T: MessageTag>(
    registry: &Mutex<Registry<T>>,
    client: &Arc<Connection<T>>,
    msg: &Message<T>,
) -> bool {
    if client.is_connected() {
        client.send(msg.clone());
        return true;
    }
    registry.lock().remove(client);
    false
}

/// Server operations available from inside [`ServerHandler::on_message`]
pub struct ServerContext<'a, T: MessageTag> {
    registry: &'a Mutex<Registry<T>>,
    departed: RefCell<Vec<Arc<Connection<T>>>>,
}

impl<'a, T: MessageTag> ServerContext<'a, T> {
    fn new(registry: &'a Mutex<Registry<T>>) -> Self {
        Self {
            registry,
            departed: RefCell::new(Vec::new()),
        }
    }

    /// Same as [`Server::message_client`]
    pub fn message_client(&self, client: &Arc<Connection<T>>, msg: &Message<T>) {
        if !send_or_unregister(self.registry, client, msg) {
            self.departed.borrow_mut().push(Arc::clone(client));
        }
    }

    /// Same as [`Server::message_all_clients`]
    pub fn message_all_clients(&self, msg: &Message<T>, ignore: Option<&Arc<Connection<T>>>) {
        let departed = self.registry.lock().broadcast(msg, ignore);
        self.departed.borrow_mut().extend(departed);
    }

    pub fn connection_count(&self) -> usize {
        self.registry.lock().connections.len()
    }

    fn take_departed(&self) -> Vec<Arc<Connection<T>>> {
        self.departed.take()
    }
}

/// State shared between the server handle and the accept loop
struct Shared<T: MessageTag, H> {
    handler: H,
    registry: Mutex<Registry<T>>,
    inbound: Arc<InboundQueue<T>>,
}

impl<T: MessageTag, H: ServerHandler<T>> Shared<T, H> {
    /// Run the connect policy on an accepted socket and register it
    fn admit(
        self: &Arc<Self>,
        stream: TcpStream,
        addr: SocketAddr,
        runtime: &Handle,
        handshake: Option<Arc<dyn Handshake>>,
        config: &ServerConfig,
    ) {
        let conn = Arc::new(Connection::server(
            stream,
            addr,
            runtime.clone(),
            self.inbound.clone(),
            config.max_body_size,
        ));

        if !self.handler.on_client_connect(&conn) {
            info!(addr = %addr, "Connection denied");
            conn.disconnect();
            return;
        }

        let mut registry = self.registry.lock();
        let id = registry.next_id;
        let shared = Arc::clone(self);
        let armed = conn.connect_to_client(id, handshake, config.handshake_timeout(), move |client| {
            shared.handler.on_client_validated(client);
        });

        match armed {
            Ok(()) => {
                registry.next_id += 1;
                registry.connections.push(conn);
                info!(id = id, addr = %addr, "Connection approved");
            }
            Err(e) => {
                warn!(addr = %addr, error = %e, "Approved connection could not be started");
            }
        }
    }

    fn report_departed(&self, departed: Vec<Arc<Connection<T>>>) {
        for client in &departed {
            debug!(id = client.id(), "Pruning disconnected client");
            self.handler.on_client_disconnect(client);
        }
    }
}

/// Message server handle
pub struct Server<T: MessageTag, H: ServerHandler<T>> {
    config: ServerConfig,
    shared: Arc<Shared<T, H>>,
    handshake: Option<Arc<dyn Handshake>>,
    local_addr: Option<SocketAddr>,
    shutdown_tx: Option<broadcast::Sender<()>>,
    io_thread: Option<JoinHandle<()>>,
}

impl<T: MessageTag, H: ServerHandler<T>> Server<T, H> {
    /// Create a stopped server. The default [`Scramble`] handshake is
    /// used when `config.handshake` is set.
    pub fn new(config: ServerConfig, handler: H) -> Self {
        let handshake = config
            .handshake
            .then(|| Arc::new(Scramble::default()) as Arc<dyn Handshake>);

        Self {
            config,
            shared: Arc::new(Shared {
                handler,
                registry: Mutex::new(Registry {
                    connections: Vec::new(),
                    next_id: FIRST_CONNECTION_ID,
                }),
                inbound: Arc::new(ThreadSafeQueue::new()),
            }),
            handshake,
            local_addr: None,
            shutdown_tx: None,
            io_thread: None,
        }
    }

    /// Replace the validation scheme. `None` disables validation.
    pub fn with_handshake(mut self, handshake: Option<Arc<dyn Handshake>>) -> Self {
        self.handshake = handshake;
        self
    }

    /// Bind the listener and launch the I/O thread.
    ///
    /// Binding happens on the calling thread, so a bind failure is
    /// reported here and leaves the server stopped. Safe to call from
    /// inside another tokio runtime.
    pub fn start(&mut self) -> Result<SocketAddr> {
        if self.io_thread.is_some() {
            return Err(Error::AlreadyRunning);
        }

        let addr = self.config.socket_addr();
        let std_listener = std::net::TcpListener::bind(addr)
            .and_then(|listener| {
                listener.set_nonblocking(true)?;
                Ok(listener)
            })
            .inspect_err(|e| error!(addr = %addr, error = %e, "Bind failed"))?;
        let bound_addr = std_listener.local_addr()?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .inspect_err(|e| error!(error = %e, "Failed to create I/O runtime"))?;

        // Register with this server's runtime, not whichever one the caller runs in
        let registered = {
            let _guard = runtime.enter();
            TcpListener::from_std(std_listener)
        };
        let listener = match registered {
            Ok(listener) => listener,
            Err(e) => {
                error!(addr = %bound_addr, error = %e, "Failed to register listener");
                runtime.shutdown_background();
                return Err(e.into());
            }
        };

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let shared = self.shared.clone();
        let handshake = self.handshake.clone();
        let config = self.config.clone();

        let io_thread = std::thread::Builder::new()
            .name("tagwire-io".into())
            .spawn(move || {
                runtime.block_on(accept_loop(listener, shared, handshake, config, shutdown_rx));
                // Dropping the runtime here cancels every connection task
            })
            .inspect_err(|e| error!(error = %e, "Failed to spawn I/O thread"))?;

        info!(addr = %bound_addr, "Server started");

        self.local_addr = Some(bound_addr);
        self.shutdown_tx = Some(shutdown_tx);
        self.io_thread = Some(io_thread);
        Ok(bound_addr)
    }

    /// Stop the I/O thread and close every connection. Idempotent.
    pub fn stop(&mut self) {
        let Some(io_thread) = self.io_thread.take() else {
            return;
        };

        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if io_thread.join().is_err() {
            error!("I/O thread panicked");
        }

        for conn in self.shared.registry.lock().connections.iter() {
            conn.disconnect();
        }

        self.local_addr = None;
        info!("Server stopped");
    }

    pub fn is_running(&self) -> bool {
        self.io_thread.is_some()
    }

    /// Address the listener is bound to while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn handler(&self) -> &H {
        &self.shared.handler
    }

    /// Number of registered connections, live or awaiting pruning
    pub fn connection_count(&self) -> usize {
        self.shared.registry.lock().connections.len()
    }

    /// Snapshot of the registry
    pub fn connections(&self) -> Vec<Arc<Connection<T>>> {
        self.shared.registry.lock().connections.clone()
    }

    /// Id the next approved connection will receive
    pub fn next_id(&self) -> u32 {
        self.shared.registry.lock().next_id
    }

    /// Send to one client, or prune it if it has gone away
    pub fn message_client(&self, client: &Arc<Connection<T>>, msg: &Message<T>) {
        if !send_or_unregister(&self.shared.registry, client, msg) {
            self.shared.report_departed(vec![Arc::clone(client)]);
        }
    }

    /// Send to every connected client except `ignore`, pruning any that
    /// have gone away
    pub fn message_all_clients(&self, msg: &Message<T>, ignore: Option<&Arc<Connection<T>>>) {
        let departed = self.shared.registry.lock().broadcast(msg, ignore);
        self.shared.report_departed(departed);
    }

    /// Unregister every dead connection without sending anything.
    /// Returns how many were removed.
    pub fn prune(&self) -> usize {
        let departed = self.shared.registry.lock().prune();
        let count = departed.len();
        self.shared.report_departed(departed);
        count
    }

    /// Hand queued messages to [`ServerHandler::on_message`].
    ///
    /// With `wait` set, blocks until at least one message is queued.
    /// Processes at most `max_messages` (all queued when `None`) and
    /// returns how many were handled.
    pub fn update(&self, max_messages: Option<usize>, wait: bool) -> usize {
        if wait {
            self.shared.inbound.wait();
        }
        self.dispatch(max_messages)
    }

    /// Like [`update`](Self::update) with `wait`, but gives up waiting
    /// after `timeout`
    pub fn update_timeout(&self, max_messages: Option<usize>, timeout: Duration) -> usize {
        self.shared.inbound.wait_timeout(timeout);
        self.dispatch(max_messages)
    }

    fn dispatch(&self, max_messages: Option<usize>) -> usize {
        let context = ServerContext::new(&self.shared.registry);
        let limit = max_messages.unwrap_or(usize::MAX);
        let mut processed = 0;
        while processed < limit {
            let Ok(owned) = self.shared.inbound.pop_front() else {
                break;
            };
            match owned.remote {
                Some(client) => {
                    self.shared.handler.on_message(&context, &client, owned.msg);
                    self.shared.report_departed(context.take_departed());
                }
                None => debug!("Dropping message without an owning connection"),
            }
            processed += 1;
        }
        processed
    }
}

impl<T: MessageTag, H: ServerHandler<T>> Drop for Server<T, H> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Accept incoming connections
async fn accept_loop<T: MessageTag, H: ServerHandler<T>>(
    listener: TcpListener,
    shared: Arc<Shared<T, H>>,
    handshake: Option<Arc<dyn Handshake>>,
    config: ServerConfig,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let runtime = Handle::current();

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        debug!(addr = %addr, "New connection");
                        shared.admit(stream, addr, &runtime, handshake.clone(), &config);
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Accept loop shutting down");
                break;
            }
        }
    }
}
