//! Supported algorithms for **encryption**, **integrity**, **host keys** and **key-exchange**,
//! and the negotiated [`AlgorithmSet`] of a session.

use std::str::FromStr;

use strum::Display;

use crate::{
    message::{KexInit, NameList},
    Error, Result,
};

mod cipher;
pub use cipher::Cipher;
pub(crate) use cipher::CipherState;

mod compress;
pub use compress::Compress;

mod hmac;
pub use hmac::Hmac;

pub(crate) mod kex;
pub use kex::Kex;

pub(crate) mod key;
pub use key::Key;

/// Marker for algorithms applying to the _client-to-server_ direction.
pub(crate) struct ClientToServer;

/// Marker for algorithms applying to the _server-to-client_ direction.
pub(crate) struct ServerToClient;

pub(crate) trait Negociate<D = ()>: Sized + FromStr {
    fn negociate(client: &KexInit, server: &KexInit) -> Result<Self>;
}

/// Select the first algorithm of the `client`'s list that the `server` also supports.
fn select<T: FromStr>(category: Category, client: &NameList, server: &NameList) -> Result<T> {
    client
        .preferred_in(server)
        .ok_or(Error::NoMatchingAlgorithm(category))?
        .parse()
        .map_err(|_| Error::NoMatchingAlgorithm(category))
}

/// The categories of negotiated algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Category {
    /// Key-exchange method.
    #[strum(serialize = "kex")]
    Kex,

    /// Host key and signature algorithm.
    #[strum(serialize = "host key")]
    HostKey,

    /// Packet encryption.
    #[strum(serialize = "encryption")]
    Encryption,

    /// Packet integrity.
    #[strum(serialize = "HMAC")]
    Integrity,

    /// Payload compression.
    #[strum(serialize = "compression")]
    Compression,
}

/// A pair of algorithms, one per traffic direction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Directional<T> {
    /// Algorithm protecting the _client-to-server_ traffic.
    pub client_to_server: T,

    /// Algorithm protecting the _server-to-client_ traffic.
    pub server_to_client: T,
}

/// A full set of negotiated algorithms, one per category.
///
/// The default suite is the identity, in effect before the first key-exchange.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Suite {
    /// Key-exchange method, if any ran.
    pub kex: Option<Kex>,

    /// Host key algorithm, if any was negotiated.
    pub key: Option<Key>,

    /// Encryption algorithms.
    pub cipher: Directional<Cipher>,

    /// Integrity algorithms.
    pub hmac: Directional<Hmac>,
}

impl Suite {
    /// Negotiate a suite from both sides' proposals.
    ///
    /// The outcome only depends on which proposal is the client's,
    /// never on which side sent its proposal first.
    pub(crate) fn negociate(client: &KexInit, server: &KexInit) -> Result<Self> {
        let suite = Self {
            kex: Some(Kex::negociate(client, server)?),
            key: Some(Key::negociate(client, server)?),
            cipher: Directional {
                client_to_server: <Cipher as Negociate<ClientToServer>>::negociate(
                    client, server,
                )?,
                server_to_client: <Cipher as Negociate<ServerToClient>>::negociate(
                    client, server,
                )?,
            },
            hmac: Directional {
                client_to_server: <Hmac as Negociate<ClientToServer>>::negociate(client, server)?,
                server_to_client: <Hmac as Negociate<ServerToClient>>::negociate(client, server)?,
            },
        };

        // Compression is only ever `none`, ensure both peers agree on it.
        <Compress as Negociate<ClientToServer>>::negociate(client, server)?;
        <Compress as Negociate<ServerToClient>>::negociate(client, server)?;

        Ok(suite)
    }
}

/// The negotiated algorithms of a session.
///
/// While a key-exchange is in flight, the _pending_ suite is held aside
/// from the _active_ one, and all its categories are promoted at once
/// when the exchange completes.
#[derive(Debug, Clone, PartialEq)]
pub enum AlgorithmSet {
    /// No negotiation in progress.
    Established(Suite),

    /// A suite has been negotiated, and awaits the key-exchange completion.
    Negotiating {
        /// The algorithms currently protecting the traffic.
        active: Suite,

        /// The algorithms to be promoted.
        pending: Suite,
    },
}

impl Default for AlgorithmSet {
    fn default() -> Self {
        Self::Established(Suite::default())
    }
}

impl AlgorithmSet {
    /// The algorithms in effect.
    pub fn active(&self) -> &Suite {
        match self {
            Self::Established(active) | Self::Negotiating { active, .. } => active,
        }
    }

    /// The negotiated algorithms awaiting promotion, if any.
    pub fn pending(&self) -> Option<&Suite> {
        match self {
            Self::Established(_) => None,
            Self::Negotiating { pending, .. } => Some(pending),
        }
    }

    /// Whether a negotiated suite awaits promotion.
    pub fn is_negotiating(&self) -> bool {
        matches!(self, Self::Negotiating { .. })
    }

    /// Hold a freshly negotiated suite aside, leaving the active one untouched.
    pub(crate) fn propose(&mut self, suite: Suite) -> Result<()> {
        match self {
            Self::Established(active) => {
                *self = Self::Negotiating {
                    active: std::mem::take(active),
                    pending: suite,
                };

                Ok(())
            }
            Self::Negotiating { .. } => Err(Error::Protocol("algorithms already being negotiated")),
        }
    }

    /// Promote the pending suite as the active one, for every category at once.
    pub(crate) fn promote(&mut self) -> Result<&Suite> {
        match self {
            Self::Negotiating { pending, .. } => {
                *self = Self::Established(std::mem::take(pending));

                Ok(self.active())
            }
            Self::Established(_) => Err(Error::Protocol("no negotiated algorithms to promote")),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use rstest::rstest;

    use super::*;
    use crate::message;

    fn kexinit(
        kexs: &[&str],
        keys: &[&str],
        ciphers: &[&str],
        macs: &[&str],
        compressions: &[&str],
    ) -> Vec<u8> {
        message::encode(&KexInit {
            cookie: [0; 16],
            kex_algorithms: NameList::from_iter(kexs),
            server_host_key_algorithms: NameList::from_iter(keys),
            encryption_algorithms_client_to_server: NameList::from_iter(ciphers),
            encryption_algorithms_server_to_client: NameList::from_iter(ciphers),
            mac_algorithms_client_to_server: NameList::from_iter(macs),
            mac_algorithms_server_to_client: NameList::from_iter(macs),
            compression_algorithms_client_to_server: NameList::from_iter(compressions),
            compression_algorithms_server_to_client: NameList::from_iter(compressions),
            languages_client_to_server: Default::default(),
            languages_server_to_client: Default::default(),
            first_kex_packet_follows: false.into(),
        })
        .unwrap()
    }

    fn negociate(client: &[u8], server: &[u8]) -> Result<Suite> {
        let client: KexInit = message::decode(client).unwrap();
        let server: KexInit = message::decode(server).unwrap();

        Suite::negociate(&client, &server)
    }

    #[test]
    fn client_preference_wins() {
        let client = kexinit(
            &["curve25519-sha256@libssh.org", "curve25519-sha256"],
            &["ssh-ed25519", "ecdsa-sha2-nistp256"],
            &["aes128-ctr", "aes256-ctr"],
            &["hmac-sha1", "hmac-sha2-256"],
            &["none"],
        );
        let server = kexinit(
            &["curve25519-sha256", "curve25519-sha256@libssh.org"],
            &["ecdsa-sha2-nistp256", "ssh-ed25519"],
            &["aes256-ctr", "aes128-ctr"],
            &["hmac-sha2-256", "hmac-sha1"],
            &["zlib", "none"],
        );

        let suite = negociate(&client, &server).unwrap();

        assert_eq!(suite.kex, Some(Kex::Curve25519Sha256Libssh));
        assert_eq!(suite.key, Some(Key::Ed25519));
        assert_eq!(suite.cipher.client_to_server, Cipher::Aes128Ctr);
        assert_eq!(suite.hmac.server_to_client, Hmac::HmacSha1);
    }

    #[rstest]
    #[case(Category::Kex, kexinit(&["diffie-hellman-group1-sha1"], &["ssh-ed25519"], &["aes128-ctr"], &["hmac-sha1"], &["none"]))]
    #[case(Category::HostKey, kexinit(&["curve25519-sha256"], &["ssh-dss"], &["aes128-ctr"], &["hmac-sha1"], &["none"]))]
    #[case(Category::Encryption, kexinit(&["curve25519-sha256"], &["ssh-ed25519"], &["aes128-cbc"], &["hmac-sha1"], &["none"]))]
    #[case(Category::Integrity, kexinit(&["curve25519-sha256"], &["ssh-ed25519"], &["aes128-ctr"], &["hmac-md5"], &["none"]))]
    #[case(Category::Compression, kexinit(&["curve25519-sha256"], &["ssh-ed25519"], &["aes128-ctr"], &["hmac-sha1"], &["zlib"]))]
    fn disjoint_proposals_fail(#[case] category: Category, #[case] server: Vec<u8>) {
        let client = kexinit(
            &["curve25519-sha256"],
            &["ssh-ed25519"],
            &["aes128-ctr"],
            &["hmac-sha1"],
            &["none"],
        );

        assert!(matches!(
            negociate(&client, &server),
            Err(Error::NoMatchingAlgorithm(c)) if c == category
        ));
    }

    #[test]
    fn promotion_is_all_or_nothing() {
        let suite = Suite {
            kex: Some(Kex::Curve25519Sha256),
            key: Some(Key::Ed25519),
            cipher: Directional {
                client_to_server: Cipher::Aes256Ctr,
                server_to_client: Cipher::Aes128Cbc,
            },
            hmac: Directional {
                client_to_server: Hmac::HmacSha256,
                server_to_client: Hmac::HmacSha512ETM,
            },
        };

        let mut set = AlgorithmSet::default();
        assert!(set.promote().is_err());

        set.propose(suite.clone()).unwrap();
        assert_eq!(set.active(), &Suite::default());
        assert_eq!(set.pending(), Some(&suite));
        assert!(set.propose(suite.clone()).is_err());

        assert_eq!(set.promote().unwrap(), &suite);
        assert_eq!(set, AlgorithmSet::Established(suite));
        assert_eq!(set.pending(), None);
    }
}
