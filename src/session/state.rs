use super::Side;

/// Progress of the local handshake of a [`Session`](super::Session).
///
/// The states are walked in order, along the table of [`State::successor`],
/// and only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Nothing happened yet.
    Begin,

    /// The peer's identification line has been received, as a server.
    PeerVersionReceived,

    /// The local identification line has been sent, as a client.
    VersionSent,

    /// Both identification lines have been exchanged.
    VersionExchangeDone,

    /// Both algorithm proposals have been exchanged, and a suite was negotiated.
    AlgoProposalExchanged,

    /// The shared secret has been agreed upon and the local transition marker was sent.
    KeyExchangeDone,

    /// The peer's transition marker was received, the transport is fully protected.
    Established,

    /// The session was closed, either voluntarily or after a fatal error.
    Failed,
}

impl State {
    /// The next state in the handshake of `side`, if any.
    pub fn successor(&self, side: Side) -> Option<Self> {
        match (self, side) {
            (Self::Begin, Side::Server) => Some(Self::PeerVersionReceived),
            (Self::Begin, Side::Client) => Some(Self::VersionSent),
            (Self::PeerVersionReceived, _) | (Self::VersionSent, _) => {
                Some(Self::VersionExchangeDone)
            }
            (Self::VersionExchangeDone, _) => Some(Self::AlgoProposalExchanged),
            (Self::AlgoProposalExchanged, _) => Some(Self::KeyExchangeDone),
            (Self::KeyExchangeDone, _) => Some(Self::Established),
            (Self::Established, _) | (Self::Failed, _) => None,
        }
    }

    /// Whether the local identification line was queued for the peer,
    /// after which binary packets may be sent.
    pub(crate) fn has_sent_version(&self) -> bool {
        matches!(
            self,
            Self::VersionSent
                | Self::VersionExchangeDone
                | Self::AlgoProposalExchanged
                | Self::KeyExchangeDone
                | Self::Established
        )
    }
}

/// What has been received from the peer so far.
///
/// After the first key-exchange, the state cycles from
/// [`PeerState::NewKeysReceived`] back to [`PeerState::ProposalReceived`]
/// for every re-exchange the peer takes part in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Nothing received yet.
    Begin,

    /// The peer's identification line.
    VersionReceived,

    /// The peer's algorithm proposal.
    ProposalReceived,

    /// The peer's half of the key agreement.
    KeyExchangeReceived,

    /// The peer's transition marker, its traffic is protected by the new keys.
    NewKeysReceived,
}
