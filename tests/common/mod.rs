#![allow(dead_code, clippy::unwrap_used, clippy::panic)]

use std::{
    collections::VecDeque,
    io::{self, Read, Write},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    task::Poll,
};

use assh_transport::{Config, Context, Result, Session};

/// Upper bound on the rounds a well-behaved exchange needs to settle.
pub const ROUNDS: usize = 64;

pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();
}

/// One end of an in-memory non-blocking duplex, reporting
/// [`io::ErrorKind::WouldBlock`] when no bytes are available.
#[derive(Debug)]
pub struct Pipe {
    incoming: Arc<Mutex<VecDeque<u8>>>,
    outgoing: Arc<Mutex<VecDeque<u8>>>,
    closed: Arc<AtomicBool>,
}

impl Pipe {
    /// Two connected ends.
    pub fn pair() -> (Self, Self) {
        let (a, b) = (Arc::default(), Arc::default());
        let closed = Arc::new(AtomicBool::new(false));

        (
            Self {
                incoming: Arc::clone(&a),
                outgoing: Arc::clone(&b),
                closed: Arc::clone(&closed),
            },
            Self {
                incoming: b,
                outgoing: a,
                closed,
            },
        )
    }

    /// An end with no peer, fed through [`Pipe::inject`].
    pub fn lone() -> Self {
        Self::pair().0
    }

    /// Queue raw bytes as if the peer sent them.
    pub fn inject(&self, bytes: &[u8]) {
        self.incoming.lock().unwrap().extend(bytes);
    }

    /// Snapshot of the bytes written and not yet read by the peer.
    pub fn outgoing(&self) -> Vec<u8> {
        self.outgoing.lock().unwrap().iter().copied().collect()
    }

    /// Close the duplex, reads then hit the end of the stream once drained.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl Read for Pipe {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut incoming = self.incoming.lock().unwrap();

        if incoming.is_empty() {
            return if self.closed.load(Ordering::SeqCst) {
                Ok(0)
            } else {
                Err(io::ErrorKind::WouldBlock.into())
            };
        }

        let count = buf.len().min(incoming.len());
        for (dst, src) in buf.iter_mut().zip(incoming.drain(..count)) {
            *dst = src;
        }

        Ok(count)
    }
}

impl Write for Pipe {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.outgoing.lock().unwrap().extend(buf);

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub fn host_key() -> ssh_key::PrivateKey {
    ssh_key::PrivateKey::random(&mut rand::thread_rng(), ssh_key::Algorithm::Ed25519).unwrap()
}

pub fn server_context() -> Context<Pipe> {
    Context::new(Config {
        keys: vec![host_key()],
        ..Default::default()
    })
}

pub fn client_context() -> Context<Pipe> {
    Context::new(Default::default())
}

/// Create a pair of connected sessions over a fresh duplex.
pub fn sessions<'c>(
    client: &'c Context<Pipe>,
    server: &'c Context<Pipe>,
) -> (Session<'c, Pipe>, Session<'c, Pipe>) {
    let (a, b) = Pipe::pair();

    let mut client = Session::new(client);
    client.attach(a).unwrap();

    let mut server = Session::new(server);
    server.attach(b).unwrap();

    (client, server)
}

/// Alternate both handshakes until they complete.
pub fn handshake(client: &mut Session<'_, Pipe>, server: &mut Session<'_, Pipe>) -> Result<()> {
    for _ in 0..ROUNDS {
        let client = client.connect()?;
        let server = server.accept()?;

        if client.is_ready() && server.is_ready() {
            return Ok(());
        }
    }

    panic!("handshake did not settle in {ROUNDS} rounds");
}

/// Receive on `to` until a payload arrives, while letting `from` progress.
pub fn deliver(from: &mut Session<'_, Pipe>, to: &mut Session<'_, Pipe>) -> Result<Vec<u8>> {
    for _ in 0..ROUNDS {
        if let Poll::Ready(payload) = to.recv()? {
            return Ok(payload);
        }

        if let Poll::Ready(payload) = from.recv()? {
            panic!("unexpected payload on the sending side: {payload:?}");
        }
    }

    panic!("no payload delivered in {ROUNDS} rounds");
}

/// Frame `payload` into an unencrypted packet, as sent before the first `SSH_MSG_NEWKEYS`.
pub fn plaintext(payload: &[u8]) -> Vec<u8> {
    let mut padding = 8 - (5 + payload.len()) % 8;
    if padding < 4 {
        padding += 8;
    }

    let mut packet = ((1 + payload.len() + padding) as u32).to_be_bytes().to_vec();
    packet.push(padding as u8);
    packet.extend_from_slice(payload);
    packet.resize(packet.len() + padding, 0);

    packet
}

/// A `SSH_MSG_KEXINIT` payload proposing the `kexs`, both directions
/// sharing the `key`, `cipher` and `mac` choices.
pub fn kexinit(kexs: &[&str], key: &str, cipher: &str, mac: &str, follows: bool) -> Vec<u8> {
    let mut payload = vec![20];
    payload.extend_from_slice(&[0x2a; 16]);

    let kexs = kexs.join(",");
    let lists = [
        kexs.as_str(),
        key,
        cipher,
        cipher,
        mac,
        mac,
        "none",
        "none",
        "",
        "",
    ];
    for list in lists {
        payload.extend_from_slice(&(list.len() as u32).to_be_bytes());
        payload.extend_from_slice(list.as_bytes());
    }

    payload.push(follows as u8);
    payload.extend_from_slice(&[0; 4]);

    payload
}
