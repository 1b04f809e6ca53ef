//! Shared fixtures for server integration tests

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tagwire_net::{
    Connection, Message, MessageHeader, MessageTag, ServerConfig, ServerContext, ServerHandler,
};

pub const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Ping,
    Chat,
    Notice,
}

impl MessageTag for Tag {
    fn to_raw(self) -> u32 {
        match self {
            Tag::Ping => 1,
            Tag::Chat => 2,
            Tag::Notice => 3,
        }
    }

    fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Tag::Ping),
            2 => Some(Tag::Chat),
            3 => Some(Tag::Notice),
            _ => None,
        }
    }
}

/// Handler that records every hook invocation
#[derive(Default)]
pub struct Recorder {
    pub approve: AtomicBool,
    pub connect_attempts: AtomicUsize,
    pub validated: Mutex<Vec<u32>>,
    pub disconnected: Mutex<Vec<Arc<Connection<Tag>>>>,
    pub messages: Mutex<Vec<(Arc<Connection<Tag>>, Message<Tag>)>>,
}

impl Recorder {
    pub fn approving() -> Self {
        let recorder = Self::default();
        recorder.approve.store(true, Ordering::SeqCst);
        recorder
    }
}

impl ServerHandler<Tag> for Recorder {
    fn on_client_connect(&self, _client: &Arc<Connection<Tag>>) -> bool {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        self.approve.load(Ordering::SeqCst)
    }

    fn on_client_disconnect(&self, client: &Arc<Connection<Tag>>) {
        self.disconnected.lock().push(client.clone());
    }

    fn on_message(
        &self,
        _server: &ServerContext<'_, Tag>,
        client: &Arc<Connection<Tag>>,
        msg: Message<Tag>,
    ) {
        self.messages.lock().push((client.clone(), msg));
    }

    fn on_client_validated(&self, client: &Arc<Connection<Tag>>) {
        self.validated.lock().push(client.id());
    }
}

/// Loopback server on a free port
pub fn local_config(handshake: bool) -> ServerConfig {
    ServerConfig {
        bind_addr: "127.0.0.1".parse().unwrap(),
        handshake,
        ..ServerConfig::with_port(0)
    }
}

/// Poll `cond` until it holds or the timeout expires
pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}

/// Plain blocking socket speaking the frame format by hand
pub fn raw_connect(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(TIMEOUT)).unwrap();
    stream
}

pub fn write_raw(stream: &mut TcpStream, msg: &Message<Tag>) {
    stream.write_all(&msg.header().to_bytes()).unwrap();
    stream.write_all(msg.body()).unwrap();
}

pub fn read_raw(stream: &mut TcpStream) -> std::io::Result<Message<Tag>> {
    let mut header = [0u8; 8];
    stream.read_exact(&mut header)?;
    let header = MessageHeader::<Tag>::from_bytes(&header)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    let mut body = vec![0u8; header.size as usize];
    stream.read_exact(&mut body)?;
    Ok(Message::with_body(header.id, body))
}

/// Server-side connection whose peer is `stream`
pub fn conn_for(
    connections: &[Arc<Connection<Tag>>],
    stream: &TcpStream,
) -> Arc<Connection<Tag>> {
    let local = stream.local_addr().unwrap();
    connections
        .iter()
        .find(|c| c.peer_addr() == Some(local))
        .cloned()
        .unwrap()
}
