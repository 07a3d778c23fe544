//! The key-exchange engine, running the initial exchange and every re-exchange.

use rand::RngCore;

use crate::{
    algorithm::{
        kex::{Ephemeral, Exchange, Secret, STRICT_KEX_CLIENT, STRICT_KEX_SERVER},
        key, Category, Cipher, Directional, Hmac, Kex, Suite,
    },
    message::{self, KexEcdhInit, KexEcdhReply, KexInit, NameList, NewKeys},
    transport::{Keys, Transport},
    Error, Result,
};

use super::{PeerState, Session, Side};

/// Progress of the key-exchange in flight.
pub(super) enum Phase {
    /// No key-exchange in progress.
    Idle,

    /// The local proposal was sent, awaiting the peer's.
    Init { payload: Vec<u8> },

    /// A suite was negotiated, the key agreement is running.
    Agreement(Box<Agreement>),

    /// The local transition marker was sent, awaiting the peer's.
    Switch(Box<Switch>),
}

pub(super) struct Agreement {
    local: Vec<u8>,
    peer: Vec<u8>,

    kex: Kex,

    /// The client's ephemeral half, sent along its key-exchange init.
    ephemeral: Option<Box<dyn Ephemeral>>,

    /// Discard the next key-exchange packet, as the peer guessed wrong.
    discard_guess: bool,
}

pub(super) struct Switch {
    cipher: Cipher,
    hmac: Hmac,
    keys: Keys,
}

impl Phase {
    pub(super) fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Whether application payloads must be held back until the new keys are in use.
    pub(super) fn holds_output(&self) -> bool {
        matches!(self, Self::Init { .. } | Self::Agreement(_))
    }

    pub(super) fn negotiated(&self) -> bool {
        matches!(self, Self::Agreement(_) | Self::Switch(_))
    }

    pub(super) fn switching(&self) -> bool {
        matches!(self, Self::Switch(_))
    }
}

impl<H> Session<'_, H> {
    fn kexinit(&self, side: Side) -> Result<Vec<u8>> {
        let config = self.context.config();

        let mut kexs = config
            .algorithms
            .kexs
            .iter()
            .map(|kex| kex.as_ref().to_string())
            .collect::<Vec<_>>();
        if self.exchanges == 0 && config.strict_kex {
            kexs.push(
                match side {
                    Side::Client => STRICT_KEX_CLIENT,
                    Side::Server => STRICT_KEX_SERVER,
                }
                .into(),
            );
        }

        let keys = match side {
            Side::Client => config
                .algorithms
                .keys
                .iter()
                .map(|key| key.as_str().to_string())
                .collect(),
            Side::Server => {
                let mut keys = Vec::<String>::new();
                for key in config.keys.iter().map(key::advertised) {
                    if !keys.iter().any(|name| name == key.as_str()) {
                        keys.push(key.as_str().into());
                    }
                }

                keys
            }
        };

        let mut cookie = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut cookie);

        message::encode(&KexInit {
            cookie,
            kex_algorithms: NameList::from_iter(&kexs),
            server_host_key_algorithms: NameList::from_iter(&keys),
            encryption_algorithms_client_to_server: NameList::from_iter(&config.algorithms.ciphers),
            encryption_algorithms_server_to_client: NameList::from_iter(&config.algorithms.ciphers),
            mac_algorithms_client_to_server: NameList::from_iter(&config.algorithms.macs),
            mac_algorithms_server_to_client: NameList::from_iter(&config.algorithms.macs),
            compression_algorithms_client_to_server: NameList::from_iter(&["none"]),
            compression_algorithms_server_to_client: NameList::from_iter(&["none"]),
            languages_client_to_server: Default::default(),
            languages_server_to_client: Default::default(),
            first_kex_packet_follows: false.into(),
        })
    }

    /// Send the local proposal, starting a key-exchange.
    pub(super) fn initiate(&mut self) -> Result<()> {
        if !self.kex.is_idle() {
            return Ok(());
        }

        let payload = self.kexinit(self.role()?)?;

        tracing::debug!("Initiating key-exchange #{}", self.exchanges + 1);
        self.write_packet(&payload)?;

        self.kex = Phase::Init { payload };

        Ok(())
    }

    /// Handle a message of the key-exchange, in any of its phases.
    pub(super) fn on_kex_message(&mut self, payload: Vec<u8>) -> Result<()> {
        match payload.first().copied() {
            Some(message::KEXINIT) => {
                if self.kex.is_idle() {
                    self.initiate()?;
                }

                match std::mem::replace(&mut self.kex, Phase::Idle) {
                    Phase::Init { payload: local } => self.on_kexinit(local, payload),
                    _ => Err(Error::Protocol("unexpected key-exchange init")),
                }
            }
            Some(message::NEWKEYS) => match std::mem::replace(&mut self.kex, Phase::Idle) {
                Phase::Switch(switch) => self.on_newkeys(*switch, &payload),
                _ => Err(Error::Protocol("unexpected new keys")),
            },
            _ => match std::mem::replace(&mut self.kex, Phase::Idle) {
                Phase::Agreement(mut agreement) if agreement.discard_guess => {
                    tracing::debug!("Discarding the peer's wrongly guessed key-exchange packet");

                    agreement.discard_guess = false;
                    self.kex = Phase::Agreement(agreement);

                    Ok(())
                }
                Phase::Agreement(agreement) => match self.role()? {
                    Side::Client => self.on_reply(*agreement, &payload),
                    Side::Server => self.on_init(*agreement, &payload),
                },
                _ => Err(Error::Protocol("unexpected key-exchange message")),
            },
        }
    }

    fn on_kexinit(&mut self, local: Vec<u8>, peer: Vec<u8>) -> Result<()> {
        let side = self.role()?;
        let kexinit = message::decode::<KexInit>(&local)?;
        let peerkexinit = message::decode::<KexInit>(&peer)?;
        self.peer_state = PeerState::ProposalReceived;

        let (client, server) = match side {
            Side::Client => (&kexinit, &peerkexinit),
            Side::Server => (&peerkexinit, &kexinit),
        };
        let suite = Suite::negociate(client, server)?;
        let kex = suite.kex.clone().ok_or(Error::NoMatchingAlgorithm(Category::Kex))?;

        let peer_kexs = message::names(&peerkexinit.kex_algorithms)?;
        let peer_keys = message::names(&peerkexinit.server_host_key_algorithms)?;

        if self.exchanges == 0 && self.context.config().strict_kex {
            self.strict = peer_kexs.iter().any(|name| {
                name == match side {
                    Side::Client => STRICT_KEX_SERVER,
                    Side::Server => STRICT_KEX_CLIENT,
                }
            });

            if self.strict {
                tracing::debug!("Peer supports strict key-exchange");
            }
        }

        // The guess is right when the peer's first choices got negotiated.
        let discard_guess = message::first_kex_packet_follows(&peer)
            && (peer_kexs.first().map(String::as_str) != Some(kex.as_ref())
                || peer_keys.first().map(String::as_str)
                    != suite.key.as_ref().map(|key| key.as_str()));

        if discard_guess {
            tracing::debug!("Peer guessed the wrong key-exchange, expecting a packet to discard");
        }

        self.algorithms.propose(suite)?;

        let ephemeral = match side {
            Side::Client => {
                let ephemeral = kex.generate_ephemeral();
                self.send_message(&KexEcdhInit {
                    q_c: ephemeral.public().to_vec().into(),
                })?;

                Some(ephemeral)
            }
            Side::Server => None,
        };

        self.kex = Phase::Agreement(Box::new(Agreement {
            local,
            peer,
            kex,
            ephemeral,
            discard_guess,
        }));

        Ok(())
    }

    fn on_init(&mut self, agreement: Agreement, payload: &[u8]) -> Result<()> {
        let init = message::decode::<KexEcdhInit>(payload)?;
        self.peer_state = PeerState::KeyExchangeReceived;

        let negotiated = self
            .pending()?
            .key
            .clone()
            .ok_or(Error::NoMatchingAlgorithm(Category::HostKey))?;
        let context = self.context;
        let host = context
            .config()
            .keys
            .iter()
            .find(|key| key::compatible(&key.algorithm(), &negotiated))
            .ok_or(Error::NoMatchingAlgorithm(Category::HostKey))?;

        let ephemeral = agreement.kex.generate_ephemeral();
        let q_s = ephemeral.public().to_vec();
        let secret = ephemeral.compute_shared_secret(init.q_c.as_ref())?;

        let k_s = host
            .public_key()
            .to_bytes()
            .map_err(|_| Error::KeyExchangeFailed)?;

        let hash = agreement.kex.hash(&Exchange {
            v_c: self.peer()?.to_string().as_bytes(),
            v_s: self.local_id.to_string().as_bytes(),
            i_c: &agreement.peer,
            i_s: &agreement.local,
            k_s: &k_s,
            q_c: init.q_c.as_ref(),
            q_s: &q_s,
            k: &secret,
        });

        let signature = key::sign(host, &hash)?;

        self.send_message(&KexEcdhReply {
            k_s: k_s.into(),
            q_s: q_s.into(),
            signature: signature.into(),
        })?;
        self.switch(&agreement.kex, &secret, &hash)
    }

    fn on_reply(&mut self, mut agreement: Agreement, payload: &[u8]) -> Result<()> {
        let reply = message::decode::<KexEcdhReply>(payload)?;
        self.peer_state = PeerState::KeyExchangeReceived;

        let ephemeral = agreement
            .ephemeral
            .take()
            .ok_or(Error::Protocol("missing ephemeral key"))?;
        let q_c = ephemeral.public().to_vec();
        let secret = ephemeral.compute_shared_secret(reply.q_s.as_ref())?;

        let hash = agreement.kex.hash(&Exchange {
            v_c: self.local_id.to_string().as_bytes(),
            v_s: self.peer()?.to_string().as_bytes(),
            i_c: &agreement.local,
            i_s: &agreement.peer,
            k_s: reply.k_s.as_ref(),
            q_c: &q_c,
            q_s: reply.q_s.as_ref(),
            k: &secret,
        });

        let negotiated = self
            .pending()?
            .key
            .clone()
            .ok_or(Error::NoMatchingAlgorithm(Category::HostKey))?;
        let host = key::verify(
            &negotiated,
            reply.k_s.as_ref(),
            &hash,
            reply.signature.as_ref(),
        )?;

        match &self.context.config().verifier {
            Some(verifier) => {
                if !verifier.verify(self.peer()?, &host) {
                    tracing::warn!(
                        "Rejected host key `{}` of the peer",
                        host.fingerprint(Default::default())
                    );

                    return Err(Error::UntrustedHost);
                }
            }
            None => tracing::warn!(
                "Accepting unverified host key `{}` of the peer",
                host.fingerprint(Default::default())
            ),
        }

        self.switch(&agreement.kex, &secret, &hash)
    }

    /// Derive the keys, send the transition marker and move the
    /// outgoing traffic onto the new keys.
    fn switch(&mut self, kex: &Kex, secret: &Secret, hash: &[u8]) -> Result<()> {
        let side = self.role()?;
        let session_id = self.session_id.get_or_insert_with(|| hash.to_vec()).clone();

        let Suite { cipher, hmac, .. } = self.pending()?.clone();
        let Directional {
            client_to_server,
            server_to_client,
        } = kex.keys(secret, hash, &session_id, &cipher, &hmac);

        let (tx, rx) = match side {
            Side::Client => (
                (cipher.client_to_server, hmac.client_to_server, client_to_server),
                (cipher.server_to_client, hmac.server_to_client, server_to_client),
            ),
            Side::Server => (
                (cipher.server_to_client, hmac.server_to_client, server_to_client),
                (cipher.client_to_server, hmac.client_to_server, client_to_server),
            ),
        };

        self.send_message(&NewKeys)?;

        let seq = if self.strict {
            0
        } else {
            self.transport.tx.seq()
        };
        self.transport.tx = Transport::new(tx.0, tx.1, tx.2, seq);

        while let Some(payload) = self.outbox.pop_front() {
            self.write_packet(&payload)?;
        }

        self.kex = Phase::Switch(Box::new(Switch {
            cipher: rx.0,
            hmac: rx.1,
            keys: rx.2,
        }));

        Ok(())
    }

    fn on_newkeys(&mut self, switch: Switch, payload: &[u8]) -> Result<()> {
        message::decode::<NewKeys>(payload)?;
        self.peer_state = PeerState::NewKeysReceived;

        let seq = if self.strict {
            0
        } else {
            self.transport.rx.seq()
        };
        self.transport.rx = Transport::new(switch.cipher, switch.hmac, switch.keys, seq);

        let suite = self.algorithms.promote()?;
        tracing::debug!("Key exchange success, negociated algorithms: {suite:?}");

        self.exchanges += 1;
        self.traffic = 0;
        self.last_kex = std::time::Instant::now();

        Ok(())
    }
}
