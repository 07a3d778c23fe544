//! The shared [`Context`], holding the I/O callbacks and [`Config`] of many sessions.

use std::{
    fmt,
    io::{self, Read, Write},
    sync::Arc,
    time::Duration,
};

use ssh_key::{PrivateKey, PublicKey};

use crate::{
    algorithm::{Cipher, Hmac, Kex, Key},
    Id,
};

#[doc(no_inline)]
pub use ssh_key;

/// Receive callback, reading at most `buf.len()` bytes from the handle.
pub type RecvFn<H> = fn(&mut H, &mut [u8]) -> io::Result<usize>;

/// Send callback, writing at most `buf.len()` bytes to the handle.
pub type SendFn<H> = fn(&mut H, &[u8]) -> io::Result<usize>;

/// The I/O callback pair invoked by sessions on their attached handle.
///
/// Callbacks report that no progress can be made right now with
/// [`io::ErrorKind::WouldBlock`], and a closed stream with `Ok(0)` on receive.
pub struct Callbacks<H> {
    /// Receive bytes from the peer.
    pub recv: RecvFn<H>,

    /// Send bytes to the peer.
    pub send: SendFn<H>,
}

impl<H> Clone for Callbacks<H> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<H> Copy for Callbacks<H> {}

impl<H: Read + Write> Default for Callbacks<H> {
    fn default() -> Self {
        fn recv<H: Read>(handle: &mut H, buf: &mut [u8]) -> io::Result<usize> {
            handle.read(buf)
        }

        fn send<H: Write>(handle: &mut H, buf: &[u8]) -> io::Result<usize> {
            let written = handle.write(buf)?;

            // The bytes were accepted, a flush that would block completes later on.
            match handle.flush() {
                Err(err) if err.kind() != io::ErrorKind::WouldBlock => Err(err),
                _ => Ok(written),
            }
        }

        Self {
            recv: recv::<H>,
            send: send::<H>,
        }
    }
}

impl<H> fmt::Debug for Callbacks<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks").finish_non_exhaustive()
    }
}

/// Verification of the server's host key by a _client_ session.
pub trait HostVerifier: Send + Sync {
    /// Whether the `key` presented by the server identified as `peer` is trusted.
    fn verify(&self, peer: &Id, key: &PublicKey) -> bool;
}

impl<F> HostVerifier for F
where
    F: Fn(&Id, &PublicKey) -> bool + Send + Sync,
{
    fn verify(&self, peer: &Id, key: &PublicKey) -> bool {
        self(peer, key)
    }
}

/// Thresholds after which an established session renews its keys.
#[derive(Debug, Clone)]
pub struct Rekey {
    /// Count of bytes exchanged in both directions, the _highwater_ mark.
    pub bytes: u64,

    /// Time elapsed since the last key-exchange.
    pub interval: Duration,
}

impl Default for Rekey {
    fn default() -> Self {
        Self {
            // Re-key after 1GiB of exchanged data as recommended per the RFC.
            bytes: 0x40000000,
            interval: Duration::from_secs(60 * 60),
        }
    }
}

/// Algorithms enabled for the sessions, by order of preference.
#[derive(Debug, Clone)]
pub struct Algorithms {
    /// Enabled algorithms for _key-exchange_.
    pub kexs: Vec<Kex>,

    /// Accepted algorithms for the _server key signature_, as a client.
    pub keys: Vec<Key>,

    /// Enabled algorithms for _encryption & decryption_.
    pub ciphers: Vec<Cipher>,

    /// Enabled algorithms for _hmac_.
    pub macs: Vec<Hmac>,
}

impl Default for Algorithms {
    fn default() -> Self {
        Self {
            kexs: vec![Kex::Curve25519Sha256, Kex::Curve25519Sha256Libssh],
            keys: vec![
                Key::Ed25519,
                Key::Ecdsa {
                    curve: ssh_key::EcdsaCurve::NistP384,
                },
                Key::Ecdsa {
                    curve: ssh_key::EcdsaCurve::NistP256,
                },
                Key::Rsa {
                    hash: Some(ssh_key::HashAlg::Sha512),
                },
                Key::Rsa {
                    hash: Some(ssh_key::HashAlg::Sha256),
                },
                Key::Dsa,
            ],
            ciphers: vec![
                Cipher::Aes256Ctr,
                Cipher::Aes192Ctr,
                Cipher::Aes128Ctr,
                Cipher::Aes256Cbc,
                Cipher::Aes192Cbc,
                Cipher::Aes128Cbc,
                Cipher::TDesCbc,
            ],
            macs: vec![
                Hmac::HmacSha512ETM,
                Hmac::HmacSha256ETM,
                Hmac::HmacSha512,
                Hmac::HmacSha256,
                Hmac::HmacSha1ETM,
                Hmac::HmacSha1,
                Hmac::HmacMd5ETM,
                Hmac::HmacMd5,
            ],
        }
    }
}

/// The configuration shared by sessions.
#[derive(Clone)]
pub struct Config {
    /// [`Id`] sent to the peers.
    pub id: Id,

    /// The algorithms enabled for the sessions.
    pub algorithms: Algorithms,

    /// Host keys for key-exchange signature, as a server.
    pub keys: Vec<PrivateKey>,

    /// Host key verification, as a client.
    ///
    /// When unset, any host key with a valid signature is accepted.
    pub verifier: Option<Arc<dyn HostVerifier>>,

    /// When to renew the keys of established sessions.
    pub rekey: Rekey,

    /// Advertise and honor OpenSSH's _strict key-exchange_ extension,
    /// resetting the sequence numbers at each `SSH_MSG_NEWKEYS`.
    pub strict_kex: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            id: Id::v2(
                concat!(env!("CARGO_PKG_NAME"), "@", env!("CARGO_PKG_VERSION")),
                None::<&str>,
            ),
            algorithms: Default::default(),
            keys: Default::default(),
            verifier: None,
            rekey: Default::default(),
            strict_kex: true,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("id", &self.id)
            .field("algorithms", &self.algorithms)
            .field(
                "keys",
                &self
                    .keys
                    .iter()
                    .map(PrivateKey::algorithm)
                    .collect::<Vec<_>>(),
            )
            .field("verifier", &self.verifier.is_some())
            .field("rekey", &self.rekey)
            .field("strict_kex", &self.strict_kex)
            .finish()
    }
}

/// The context shared by reference among sessions, holding
/// the I/O callbacks and configuration.
///
/// Sessions borrow the context, which makes it immutable for as long as
/// any of them is alive, and shareable among threads as long as `H` is.
pub struct Context<H> {
    callbacks: Callbacks<H>,
    config: Config,
}

impl<H: Read + Write> Context<H> {
    /// Create a context reading and writing the handles through [`Read`] and [`Write`].
    pub fn new(config: Config) -> Self {
        Self::with_callbacks(Default::default(), config)
    }
}

impl<H> Context<H> {
    /// Create a context with custom I/O callbacks.
    pub fn with_callbacks(callbacks: Callbacks<H>, config: Config) -> Self {
        Self { callbacks, config }
    }

    /// Access the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Reconfigure the context, only possible while no session is attached to it.
    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Access the I/O callbacks.
    pub fn callbacks(&self) -> &Callbacks<H> {
        &self.callbacks
    }

    /// Replace the I/O callbacks, only possible while no session is attached to it.
    pub fn set_callbacks(&mut self, callbacks: Callbacks<H>) {
        self.callbacks = callbacks;
    }
}

impl<H> fmt::Debug for Context<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("callbacks", &self.callbacks)
            .field("config", &self.config)
            .finish()
    }
}
