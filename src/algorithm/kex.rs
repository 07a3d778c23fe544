use std::io::Cursor;

use digest::Digest;
use sha2::Sha256;
use ssh_packet::{arch::MpInt, binrw::BinWrite};
use strum::{AsRefStr, EnumString};
use zeroize::Zeroizing;

use crate::{message::KexInit, transport::Keys, Error, Result};

use super::{select, Category, Cipher, Directional, Hmac, Negociate};

// TODO: (feature) Implement the following legacy key-exchange methods (`diffie-hellman-group14-sha256`, `diffie-hellman-group14-sha1`).

impl Negociate for Kex {
    fn negociate(client: &KexInit, server: &KexInit) -> Result<Self> {
        select(Category::Kex, &client.kex_algorithms, &server.kex_algorithms)
    }
}

/// Pseudo-algorithm advertised by a client supporting _strict key-exchange_.
pub(crate) const STRICT_KEX_CLIENT: &str = "kex-strict-c-v00@openssh.com";

/// Pseudo-algorithm advertised by a server supporting _strict key-exchange_.
pub(crate) const STRICT_KEX_SERVER: &str = "kex-strict-s-v00@openssh.com";

/// The shared secret `K`, encoded as an `mpint`.
pub(crate) type Secret = Zeroizing<Vec<u8>>;

/// SSH key-exchange algorithms.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, EnumString, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Kex {
    /// Curve25519 ECDH with sha-2-256 digest.
    Curve25519Sha256,

    /// Curve25519 ECDH with sha-2-256 digest (pre-RFC 8731).
    #[strum(serialize = "curve25519-sha256@libssh.org")]
    Curve25519Sha256Libssh,
}

impl Kex {
    /// Generate the ephemeral key pair for this method.
    pub(crate) fn generate_ephemeral(&self) -> Box<dyn Ephemeral> {
        match self {
            Self::Curve25519Sha256 | Self::Curve25519Sha256Libssh => {
                let secret = x25519_dalek::EphemeralSecret::random_from_rng(rand::thread_rng());
                let public = x25519_dalek::PublicKey::from(&secret);

                Box::new(X25519 { secret, public })
            }
        }
    }

    /// Compute the exchange hash `H` with this method's digest.
    pub(crate) fn hash(&self, exchange: &Exchange<'_>) -> Vec<u8> {
        match self {
            Self::Curve25519Sha256 | Self::Curve25519Sha256Libssh => exchange.hash::<Sha256>(),
        }
    }

    /// Derive the per-direction keys from the shared secret and exchange hash.
    pub(crate) fn keys(
        &self,
        secret: &[u8],
        hash: &[u8],
        session_id: &[u8],
        cipher: &Directional<Cipher>,
        hmac: &Directional<Hmac>,
    ) -> Directional<Keys> {
        match self {
            Self::Curve25519Sha256 | Self::Curve25519Sha256Libssh => Directional {
                client_to_server: Keys::as_client::<Sha256>(
                    secret,
                    hash,
                    session_id,
                    &cipher.client_to_server,
                    &hmac.client_to_server,
                ),
                server_to_client: Keys::as_server::<Sha256>(
                    secret,
                    hash,
                    session_id,
                    &cipher.server_to_client,
                    &hmac.server_to_client,
                ),
            },
        }
    }
}

/// The local ephemeral half of a key agreement.
pub(crate) trait Ephemeral: Send + Sync {
    /// The public value sent to the peer.
    fn public(&self) -> &[u8];

    /// Combine the local secret with the peer's public value,
    /// rejecting malformed or non-contributory values.
    fn compute_shared_secret(self: Box<Self>, peer: &[u8]) -> Result<Secret>;
}

struct X25519 {
    secret: x25519_dalek::EphemeralSecret,
    public: x25519_dalek::PublicKey,
}

impl Ephemeral for X25519 {
    fn public(&self) -> &[u8] {
        self.public.as_bytes()
    }

    fn compute_shared_secret(self: Box<Self>, peer: &[u8]) -> Result<Secret> {
        let peer = <[u8; 32]>::try_from(peer).map_err(|_| Error::KeyExchangeFailed)?;

        let Self { secret, .. } = *self;
        let shared = secret.diffie_hellman(&x25519_dalek::PublicKey::from(peer));

        // An all-zero output means the peer sent a low-order point.
        if !shared.was_contributory() {
            return Err(Error::KeyExchangeFailed);
        }

        mpint(shared.as_bytes())
    }
}

/// Encode an unsigned big-endian integer as a positive `mpint`.
fn mpint(value: &[u8]) -> Result<Secret> {
    let start = value.iter().position(|&byte| byte != 0).unwrap_or(value.len());

    let mut secret = Zeroizing::new(Vec::with_capacity(value.len() + 5));
    MpInt::positive(&value[start..]).write_be(&mut Cursor::new(&mut *secret))?;

    Ok(secret)
}

/// The inputs of the exchange hash `H` for ECDH methods (RFC 5656 §4).
pub(crate) struct Exchange<'e> {
    pub v_c: &'e [u8],
    pub v_s: &'e [u8],
    pub i_c: &'e [u8],
    pub i_s: &'e [u8],
    pub k_s: &'e [u8],
    pub q_c: &'e [u8],
    pub q_s: &'e [u8],
    pub k: &'e [u8],
}

impl Exchange<'_> {
    fn hash<D: Digest>(&self) -> Vec<u8> {
        let mut hasher = D::new();
        for field in [self.v_c, self.v_s, self.i_c, self.i_s, self.k_s, self.q_c, self.q_s] {
            hasher.update((field.len() as u32).to_be_bytes());
            hasher.update(field);
        }
        hasher.update(self.k);

        hasher.finalize().to_vec()
    }
}
