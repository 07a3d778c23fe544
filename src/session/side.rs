use strum::{AsRefStr, Display};

/// A side of the SSH protocol, fixed by the first handshake call on a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Side {
    /// The side initiating the connection, through [`Session::connect`](super::Session::connect).
    Client,

    /// The side accepting the connection, through [`Session::accept`](super::Session::accept).
    Server,
}

impl Side {
    /// Whether `Pre-identification` lines may be received from the peer.
    pub(crate) fn accepts_banner(&self) -> bool {
        matches!(self, Self::Client)
    }
}
