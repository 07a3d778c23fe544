//! The binary packet protocol (RFC 4253 §6), framing payloads into
//! padded, encrypted and authenticated packets, and back.

use rand::RngCore;

use crate::{
    algorithm::{Cipher, CipherState, Hmac},
    buffer::ByteBuffer,
    Error, Result,
};

mod keys;
pub use keys::Keys;

/// Smallest packet on the wire, MAC excluded.
pub const PACKET_MIN_SIZE: usize = 16;

/// Largest packet accepted from the peer, length field included and MAC excluded.
pub const PACKET_MAX_SIZE: usize = 35000;

/// Largest payload accepted for sending.
pub const PAYLOAD_MAX_SIZE: usize = 32768;

const PADDING_MIN_SIZE: usize = 4;
const MIN_ALIGN: usize = 8;

/// The pair of transports, one per traffic direction.
#[derive(Debug, Default)]
pub struct TransportPair {
    pub rx: Transport,
    pub tx: Transport,
}

impl TransportPair {
    /// Replace the keys and algorithms with identity ones, dropping the
    /// current key material.
    pub fn wipe(&mut self) {
        *self = Default::default();
    }
}

/// Algorithms, keys and state for one direction of the traffic.
#[derive(Debug, Default)]
pub struct Transport {
    pub keys: Keys,
    pub state: Option<CipherState>,
    pub cipher: Cipher,
    pub hmac: Hmac,

    /// Sequence number of the next packet.
    seq: u32,

    /// Length of the packet being opened, once its first block got decrypted.
    opening: Option<usize>,
}

impl Transport {
    pub fn new(cipher: Cipher, hmac: Hmac, keys: Keys, seq: u32) -> Self {
        Self {
            keys,
            state: None,
            cipher,
            hmac,
            seq,
            opening: None,
        }
    }

    /// Sequence number of the next packet.
    pub fn seq(&self) -> u32 {
        self.seq
    }

    fn align(&self) -> usize {
        self.cipher.block_size().max(MIN_ALIGN)
    }

    /// Count of random padding bytes for a `payload`-sized packet.
    fn padding(&self, payload: usize) -> usize {
        let align = self.align();

        // With encrypt-then-mac, the length field is left out of the encryption.
        let size = if self.hmac.etm() {
            std::mem::size_of::<u8>() + payload
        } else {
            std::mem::size_of::<u32>() + std::mem::size_of::<u8>() + payload
        };

        let mut padding = align - size % align;
        if padding < PADDING_MIN_SIZE {
            padding += align;
        }
        while std::mem::size_of::<u32>() + std::mem::size_of::<u8>() + payload + padding
            < PACKET_MIN_SIZE
        {
            padding += align;
        }

        padding
    }

    /// Frame `payload` into a packet, appended to `output`.
    pub fn seal(&mut self, payload: &[u8], output: &mut ByteBuffer) -> Result<()> {
        if payload.len() > PAYLOAD_MAX_SIZE {
            return Err(Error::BadArgument("payload exceeds the maximum size"));
        }

        let padding = self.padding(payload.len());
        let length = std::mem::size_of::<u8>() + payload.len() + padding;

        let mut packet = Vec::with_capacity(4 + length + self.hmac.size());
        packet.extend_from_slice(&(length as u32).to_be_bytes());
        packet.push(padding as u8);
        packet.extend_from_slice(payload);

        let start = packet.len();
        packet.resize(start + padding, 0);
        rand::thread_rng().fill_bytes(&mut packet[start..]);

        let mac = if self.hmac.etm() {
            self.cipher.encrypt(
                &mut self.state,
                &self.keys.key,
                &self.keys.iv,
                &mut packet[4..],
            )?;

            self.hmac.sign(self.seq, &packet, &self.keys.hmac)?
        } else {
            let mac = self.hmac.sign(self.seq, &packet, &self.keys.hmac)?;

            self.cipher
                .encrypt(&mut self.state, &self.keys.key, &self.keys.iv, &mut packet)?;

            mac
        };
        packet.extend_from_slice(&mac);

        output.append(&packet)?;

        tracing::trace!(
            "({})-> packet of {} bytes, payload of {}",
            self.seq,
            packet.len(),
            payload.len()
        );
        self.seq = self.seq.wrapping_add(1);

        Ok(())
    }

    /// Extract the next payload out of `input`, if a complete packet is buffered.
    ///
    /// Bytes are only consumed once the packet has been fully authenticated.
    pub fn open(&mut self, input: &mut ByteBuffer) -> Result<Option<Vec<u8>>> {
        let align = self.align();
        let etm = self.hmac.etm();

        let length = match self.opening {
            Some(length) => length,
            None => {
                let head = if etm { 4 } else { align };
                if input.len() < head {
                    return Ok(None);
                }

                // The length is sent in clear with encrypt-then-mac.
                if !etm {
                    self.cipher.decrypt(
                        &mut self.state,
                        &self.keys.key,
                        &self.keys.iv,
                        &mut input.as_mut_slice()[..head],
                    )?;
                }

                let mut length = [0u8; 4];
                length.copy_from_slice(&input.as_slice()[..4]);
                let length = u32::from_be_bytes(length) as usize;

                if 4 + length > PACKET_MAX_SIZE {
                    return Err(Error::Protocol("packet length exceeds the maximum size"));
                }
                if 4 + length < PACKET_MIN_SIZE {
                    return Err(Error::Protocol("packet length below the minimum size"));
                }
                if (if etm { length } else { 4 + length }) % align != 0 {
                    return Err(Error::Protocol("packet length is not aligned to the block size"));
                }

                self.opening = Some(length);

                length
            }
        };

        let size = 4 + length + self.hmac.size();
        if input.len() < size {
            return Ok(None);
        }

        let (packet, mac) = input.as_mut_slice()[..size].split_at_mut(4 + length);
        if etm {
            self.hmac.verify(self.seq, packet, &self.keys.hmac, mac)?;
            self.cipher.decrypt(
                &mut self.state,
                &self.keys.key,
                &self.keys.iv,
                &mut packet[4..],
            )?;
        } else {
            self.cipher.decrypt(
                &mut self.state,
                &self.keys.key,
                &self.keys.iv,
                &mut packet[align..],
            )?;
            self.hmac.verify(self.seq, packet, &self.keys.hmac, mac)?;
        }

        let padding = packet[4] as usize;
        if padding < PADDING_MIN_SIZE || padding + 1 > length {
            return Err(Error::Protocol("invalid padding length"));
        }
        let payload = packet[5..4 + length - padding].to_vec();

        self.opening = None;
        input.consume(size)?;

        tracing::trace!(
            "<-({}) packet of {size} bytes, payload of {}",
            self.seq,
            payload.len()
        );
        self.seq = self.seq.wrapping_add(1);

        Ok(Some(payload))
    }
}
