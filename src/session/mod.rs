//! Session and transport handling mechanics.

use std::{collections::VecDeque, fmt, task::Poll, time::Instant};

use ssh_packet::binrw::{meta::WriteEndian, BinWrite};

use crate::{
    algorithm::{AlgorithmSet, Suite},
    buffer::ByteBuffer,
    message::{self, Disconnect, DisconnectReason, Ignore, Unimplemented, KEX_METHOD_RANGE},
    transport::{TransportPair, PAYLOAD_MAX_SIZE},
    version, Context, Error, Id, Result,
};

mod kex;
use kex::Phase;

mod side;
pub use side::Side;

mod state;
pub use state::{PeerState, State};

/// Count of bytes requested from the receive callback at once.
const RECV_CHUNK: usize = 0x2000;

/// A [`Session`] driving the transport layer of one connection over an I/O handle `H`,
/// handling the **version exchange**, **key exchanges** and the **binary packet protocol**.
///
/// Sessions never block: resumable operations return [`Poll::Pending`] when the I/O
/// callbacks of the [`Context`] would block, and must be called again with the same
/// arguments once the handle is ready. Any fatal error closes the session for good,
/// after which every operation but the accessors fails with [`Error::BadArgument`].
pub struct Session<'c, H> {
    context: &'c Context<H>,
    handle: Option<H>,
    span: tracing::Span,

    side: Option<Side>,
    state: State,
    peer_state: PeerState,

    input: ByteBuffer,
    output: ByteBuffer,

    local_id: Id,
    peer_id: Option<Id>,

    algorithms: AlgorithmSet,
    transport: TransportPair,
    kex: Phase,
    strict: bool,
    exchanges: u32,
    session_id: Option<Vec<u8>>,

    traffic: u64,
    last_kex: Instant,

    inbox: VecDeque<Vec<u8>>,
    outbox: VecDeque<Vec<u8>>,
    closing: bool,
}

impl<'c, H> Session<'c, H> {
    /// Create a new [`Session`] bound to the `context`, without any I/O handle.
    pub fn new(context: &'c Context<H>) -> Self {
        Self {
            context,
            handle: None,
            span: tracing::debug_span!("ssh.session", side = tracing::field::Empty),

            side: None,
            state: State::Begin,
            peer_state: PeerState::Begin,

            input: ByteBuffer::new(),
            output: ByteBuffer::new(),

            local_id: context.config().id.clone(),
            peer_id: None,

            algorithms: Default::default(),
            transport: Default::default(),
            kex: Phase::Idle,
            strict: false,
            exchanges: 0,
            session_id: None,

            traffic: 0,
            last_kex: Instant::now(),

            inbox: Default::default(),
            outbox: Default::default(),
            closing: false,
        }
    }

    /// Attach the I/O `handle` passed to the callbacks, returning the previous one.
    ///
    /// The handle can only be replaced before the handshake makes any progress.
    pub fn attach(&mut self, handle: H) -> Result<Option<H>> {
        if self.state != State::Begin {
            return Err(Error::BadArgument("cannot replace the handle of a running session"));
        }

        Ok(self.handle.replace(handle))
    }

    /// Access the attached I/O handle.
    pub fn handle(&self) -> Result<&H> {
        self.handle
            .as_ref()
            .ok_or(Error::BadArgument("no I/O handle attached"))
    }

    /// Access the attached I/O handle mutably.
    pub fn handle_mut(&mut self) -> Result<&mut H> {
        self.handle
            .as_mut()
            .ok_or(Error::BadArgument("no I/O handle attached"))
    }

    /// Detach the I/O handle from the session.
    pub fn detach(&mut self) -> Option<H> {
        self.handle.take()
    }

    /// Drive the handshake as a _server_, until the session is [`State::Established`].
    ///
    /// The peer's identification is awaited before sending ours.
    pub fn accept(&mut self) -> Result<Poll<()>> {
        self.handshake(Side::Server)
    }

    /// Drive the handshake as a _client_, until the session is [`State::Established`].
    pub fn connect(&mut self) -> Result<Poll<()>> {
        self.handshake(Side::Client)
    }

    /// Send a `payload` over the established session.
    ///
    /// `Ready` means the payload has been accepted, and will reach the peer in order,
    /// possibly after an ongoing key-exchange; [`Session::flush`] pushes it further.
    /// `Pending` means earlier output could not be written, and the payload was _not_ accepted.
    pub fn send(&mut self, payload: &[u8]) -> Result<Poll<()>> {
        self.established()?;

        if payload.is_empty() || payload.len() > PAYLOAD_MAX_SIZE {
            return Err(Error::BadArgument("payload size is out of bounds"));
        }

        let _entered = self.span.clone().entered();
        let res = self.transmit(payload);
        self.guard(res)
    }

    /// Receive the next payload of the established session,
    /// handling transport messages and key re-exchanges in the way.
    pub fn recv(&mut self) -> Result<Poll<Vec<u8>>> {
        self.established()?;

        let _entered = self.span.clone().entered();
        let res = self.receive();
        self.guard(res)
    }

    /// Write the buffered output to the I/O handle.
    pub fn flush(&mut self) -> Result<Poll<()>> {
        self.usable()?;

        let _entered = self.span.clone().entered();
        let res = self.flush_output();
        self.guard(res)
    }

    /// Initiate a key re-exchange, unless one is already in flight.
    ///
    /// The exchange then progresses through [`Session::recv`].
    pub fn rekey(&mut self) -> Result<()> {
        self.established()?;

        let _entered = self.span.clone().entered();
        let res = self.initiate();
        self.guard(res)
    }

    /// Notify the peer of the disconnection, and close the session.
    ///
    /// On `Pending`, the notification is kept buffered until this is called again.
    pub fn disconnect(
        &mut self,
        reason: DisconnectReason,
        description: &str,
    ) -> Result<Poll<()>> {
        self.usable()?;

        let _entered = self.span.clone().entered();
        let label = format!("{reason:?}");

        if !self.closing {
            if self.state.has_sent_version() {
                let res = self.send_message(&Disconnect {
                    reason,
                    description: description.into(),
                    language: Default::default(),
                });
                self.guard(res)?;
            }

            self.closing = true;
        }

        let res = self.flush_output();
        ready!(self.guard(res)?);

        tracing::info!("Disconnected from the peer with `{label}`: {description}");
        self.terminate();

        Ok(Poll::Ready(()))
    }

    /// Access the [`Context`] of the session.
    pub fn context(&self) -> &'c Context<H> {
        self.context
    }

    /// The progress of the local handshake.
    pub fn state(&self) -> State {
        self.state
    }

    /// What has been received from the peer so far.
    pub fn peer_state(&self) -> PeerState {
        self.peer_state
    }

    /// The side of the session, once the handshake started.
    pub fn side(&self) -> Option<Side> {
        self.side
    }

    /// The [`Id`] sent to the peer.
    pub fn local_id(&self) -> &Id {
        &self.local_id
    }

    /// The [`Id`] received from the peer, if any.
    pub fn peer_id(&self) -> Option<&Id> {
        self.peer_id.as_ref()
    }

    /// The _session identifier_, the exchange hash of the first key-exchange.
    pub fn session_id(&self) -> Option<&[u8]> {
        self.session_id.as_deref()
    }

    /// The negotiated algorithms.
    pub fn algorithms(&self) -> &AlgorithmSet {
        &self.algorithms
    }

    /// Count of completed key-exchanges.
    pub fn exchanges(&self) -> u32 {
        self.exchanges
    }

    /// Whether _strict key-exchange_ is in effect with the peer.
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    fn usable(&self) -> Result<()> {
        if self.state == State::Failed {
            return Err(Error::BadArgument("session is closed"));
        }
        if self.handle.is_none() {
            return Err(Error::BadArgument("no I/O handle attached"));
        }

        Ok(())
    }

    fn established(&self) -> Result<()> {
        self.usable()?;

        if self.state != State::Established || self.closing {
            return Err(Error::BadArgument("session is not established"));
        }

        Ok(())
    }

    fn role(&self) -> Result<Side> {
        self.side
            .ok_or(Error::BadArgument("session has not started its handshake"))
    }

    fn peer(&self) -> Result<&Id> {
        self.peer_id
            .as_ref()
            .ok_or(Error::Protocol("peer has not identified itself"))
    }

    fn pending(&self) -> Result<&Suite> {
        self.algorithms
            .pending()
            .ok_or(Error::Protocol("no negotiated algorithms"))
    }

    fn handshake(&mut self, side: Side) -> Result<Poll<()>> {
        self.usable()?;

        match self.side {
            Some(current) if current != side => {
                return Err(Error::BadArgument("session is already driven from the other side"))
            }
            Some(_) => (),
            None => {
                self.side = Some(side);
                self.span.record("side", side.as_ref());
            }
        }

        let _entered = self.span.clone().entered();
        let res = self.drive(side);
        self.guard(res)
    }

    fn drive(&mut self, side: Side) -> Result<Poll<()>> {
        while let Some(next) = self.state.successor(side) {
            ready!(self.step(side, next)?);

            tracing::debug!("Handshake reached {next:?}");
            self.state = next;
        }

        self.flush_output()
    }

    fn step(&mut self, side: Side, next: State) -> Result<Poll<()>> {
        match (next, side) {
            (State::VersionSent, _) | (State::VersionExchangeDone, Side::Server) => {
                self.send_version()
            }
            (State::PeerVersionReceived, _) | (State::VersionExchangeDone, Side::Client) => {
                self.recv_version(side)
            }
            (State::AlgoProposalExchanged, _) => {
                if self.exchanges == 0 {
                    self.initiate()?;
                }

                while !(self.exchanges > 0 || self.kex.negotiated()) {
                    ready!(self.pump()?);
                }

                Ok(Poll::Ready(()))
            }
            (State::KeyExchangeDone, _) => {
                while !(self.exchanges > 0 || self.kex.switching()) {
                    ready!(self.pump()?);
                }

                Ok(Poll::Ready(()))
            }
            _ => {
                while self.exchanges == 0 {
                    ready!(self.pump()?);
                }

                Ok(Poll::Ready(()))
            }
        }
    }

    fn send_version(&mut self) -> Result<Poll<()>> {
        let line = format!("{}\r\n", self.local_id);
        if line.len() > version::MAX_SIZE {
            return Err(Error::BadArgument("identification line is too long"));
        }

        self.output.append(line.as_bytes())?;
        tracing::debug!("Sending identification `{}`", self.local_id);

        Ok(Poll::Ready(()))
    }

    fn recv_version(&mut self, side: Side) -> Result<Poll<()>> {
        loop {
            // Our own identification may still be on its way, and the peer could be awaiting it.
            let _ = self.flush_output()?;

            if let Poll::Ready(id) = version::scan(&mut self.input, side.accepts_banner())? {
                tracing::debug!("Peer identified as `{id}`");

                self.peer_id = Some(id);
                self.peer_state = PeerState::VersionReceived;

                break Ok(Poll::Ready(()));
            }

            ready!(self.fill()?);
        }
    }

    fn transmit(&mut self, payload: &[u8]) -> Result<Poll<()>> {
        ready!(self.flush_output()?);

        if self.should_rekey() {
            self.initiate()?;
        }

        if self.kex.holds_output() {
            tracing::trace!("Holding a payload of {} bytes until the key-exchange ends", payload.len());

            self.outbox.push_back(payload.to_vec());
        } else {
            self.write_packet(payload)?;
        }

        let _ = self.flush_output()?;

        Ok(Poll::Ready(()))
    }

    fn receive(&mut self) -> Result<Poll<Vec<u8>>> {
        loop {
            if let Some(payload) = self.inbox.pop_front() {
                break Ok(Poll::Ready(payload));
            }

            if self.should_rekey() {
                self.initiate()?;
            }

            ready!(self.pump()?);
        }
    }

    fn should_rekey(&self) -> bool {
        let rekey = &self.context.config().rekey;

        self.kex.is_idle()
            && (self.traffic >= rekey.bytes || self.last_kex.elapsed() >= rekey.interval)
    }

    /// Flush pending output, then receive and handle a single packet.
    fn pump(&mut self) -> Result<Poll<()>> {
        let _ = self.flush_output()?;

        let payload = ready!(self.read_packet()?);
        if let Some(payload) = self.dispatch(payload)? {
            self.inbox.push_back(payload);
        }

        let _ = self.flush_output()?;

        Ok(Poll::Ready(()))
    }

    /// Handle the transport messages, and hand back the others.
    fn dispatch(&mut self, payload: Vec<u8>) -> Result<Option<Vec<u8>>> {
        let number = *payload.first().ok_or(Error::Protocol("empty payload"))?;
        let is_kex = number == message::KEXINIT
            || number == message::NEWKEYS
            || KEX_METHOD_RANGE.contains(&number);

        if self.strict && self.exchanges == 0 && !is_kex && number != message::DISCONNECT {
            return Err(Error::Protocol(
                "unexpected message during the strict key-exchange",
            ));
        }

        match number {
            message::DISCONNECT => {
                // The peer is gone whether or not its notification makes sense.
                match message::decode::<Disconnect>(&payload) {
                    Ok(Disconnect {
                        reason,
                        description,
                        ..
                    }) => {
                        tracing::warn!("Peer disconnected with `{reason:?}`: {}", &*description)
                    }
                    Err(_) => tracing::warn!("Peer disconnected with an unreadable notification"),
                }

                Err(Error::Disconnected)
            }
            message::IGNORE => {
                let Ignore { data } = message::decode(&payload)?;
                tracing::debug!("Received an 'ignore' message with length {}", data.len());

                Ok(None)
            }
            message::DEBUG => {
                let message::Debug { message, .. } = message::decode(&payload)?;
                tracing::debug!("Received a 'debug' message: {}", &*message);

                Ok(None)
            }
            message::UNIMPLEMENTED => {
                let Unimplemented { seq } = message::decode(&payload)?;
                tracing::debug!("Received an 'unimplemented' message about packet #{seq}");

                Ok(None)
            }
            _ if is_kex => {
                self.on_kex_message(payload)?;

                Ok(None)
            }
            _ if self.state == State::Established => Ok(Some(payload)),
            _ => Err(Error::Protocol(
                "unexpected message before the end of the handshake",
            )),
        }
    }

    fn send_message<M>(&mut self, message: &M) -> Result<()>
    where
        for<'w> M: BinWrite<Args<'w> = ()> + WriteEndian + fmt::Debug,
    {
        tracing::trace!("-> {message:?}");

        self.write_packet(&message::encode(message)?)
    }

    fn write_packet(&mut self, payload: &[u8]) -> Result<()> {
        let before = self.output.len();
        self.transport.tx.seal(payload, &mut self.output)?;
        self.traffic += (self.output.len() - before) as u64;

        Ok(())
    }

    fn read_packet(&mut self) -> Result<Poll<Vec<u8>>> {
        loop {
            if let Some(payload) = self.transport.rx.open(&mut self.input)? {
                break Ok(Poll::Ready(payload));
            }

            ready!(self.fill()?);
        }
    }

    fn fill(&mut self) -> Result<Poll<()>> {
        let recv = self.context.callbacks().recv;
        let handle = self
            .handle
            .as_mut()
            .ok_or(Error::BadArgument("no I/O handle attached"))?;

        let count = ready!(self.input.fill(RECV_CHUNK, |buf| recv(handle, buf))?);
        self.traffic += count as u64;

        Ok(Poll::Ready(()))
    }

    fn flush_output(&mut self) -> Result<Poll<()>> {
        let send = self.context.callbacks().send;
        let handle = self
            .handle
            .as_mut()
            .ok_or(Error::BadArgument("no I/O handle attached"))?;

        self.output.drain(|buf| send(handle, buf))
    }

    /// Close the session after a fatal error, notifying the peer when still possible.
    fn guard<T>(&mut self, res: Result<T>) -> Result<T> {
        if let Err(err) = &res {
            if err.is_fatal() && self.state != State::Failed {
                tracing::error!("Session failed: {err}");

                if self.state.has_sent_version()
                    && !self.closing
                    && !matches!(err, Error::Io(_) | Error::Disconnected)
                {
                    let description = err.to_string();
                    let message = Disconnect {
                        reason: message::reason(err),
                        description: description.as_str().into(),
                        language: Default::default(),
                    };

                    if self.send_message(&message).is_ok() {
                        let _ = self.flush_output();
                    }
                }

                self.terminate();
            }
        }

        res
    }

    fn terminate(&mut self) {
        self.state = State::Failed;
        self.kex = Phase::Idle;
        self.transport.wipe();

        self.input.wipe();
        self.output.wipe();
        self.inbox.clear();
        self.outbox.clear();
    }
}

impl<H> Drop for Session<'_, H> {
    fn drop(&mut self) {
        self.input.wipe();
        self.output.wipe();
    }
}

impl<H> fmt::Debug for Session<'_, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("side", &self.side)
            .field("state", &self.state)
            .field("peer_state", &self.peer_state)
            .field("local_id", &self.local_id)
            .field("peer_id", &self.peer_id)
            .field("algorithms", &self.algorithms)
            .field("exchanges", &self.exchanges)
            .finish_non_exhaustive()
    }
}
