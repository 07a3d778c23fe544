//! Growable byte queue absorbing partial reads and writes over non-blocking I/O.

use std::{io, task::Poll};

use zeroize::Zeroize;

use crate::{Error, Result};

/// Smallest allocation performed when a buffer first grows.
const MIN_CAPACITY: usize = 256;

/// An owned, contiguous and growable byte region with read and write cursors.
///
/// The bytes in `[read, write)` are the unread data, the bytes below `read`
/// are consumed and reclaimed on [`ByteBuffer::compact`] or on growth.
/// The spare storage past `write` is never handed out to callers, and is
/// zeroed whenever bytes leave the buffer so no plaintext lingers in it.
///
/// Growing the buffer invalidates any previously obtained view, which the
/// borrow checker enforces by tying views to a shared borrow.
#[derive(Default, Clone)]
pub struct ByteBuffer {
    data: Vec<u8>,
    read: usize,
    write: usize,
}

impl ByteBuffer {
    /// Create an empty buffer without allocating.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count of unread bytes in the buffer.
    pub fn len(&self) -> usize {
        self.write - self.read
    }

    /// Whether the buffer holds no unread bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Allocated storage, consumed and unread bytes included.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// View the unread bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.read..self.write]
    }

    /// Mutably view the unread bytes, to decrypt them in place.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data[self.read..self.write]
    }

    /// Grow the storage to hold at least `n` more bytes past the write cursor.
    ///
    /// Consumed bytes are discarded first, and the allocation at least doubles
    /// when it has to grow, bounding the count of reallocations.
    pub fn ensure_capacity(&mut self, n: usize) -> Result<()> {
        if self.spare() >= n {
            return Ok(());
        }

        self.compact();
        if self.spare() >= n {
            return Ok(());
        }

        let wanted = (self.write + n)
            .max(self.data.len().saturating_mul(2))
            .max(MIN_CAPACITY);

        // Move to a fresh allocation, the former one is zeroed before release.
        let mut grown = Vec::new();
        grown.try_reserve_exact(wanted)?;
        grown.extend_from_slice(&self.data[..self.write]);
        grown.resize(wanted, 0);

        self.data.zeroize();
        self.data = grown;

        Ok(())
    }

    /// Write `bytes` at the write cursor.
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        self.ensure_capacity(bytes.len())?;

        self.data[self.write..self.write + bytes.len()].copy_from_slice(bytes);
        self.write += bytes.len();

        Ok(())
    }

    /// Advance the read cursor by `n` bytes.
    pub fn consume(&mut self, n: usize) -> Result<()> {
        if n > self.len() {
            return Err(Error::BufferUnderrun {
                requested: n,
                available: self.len(),
            });
        }

        self.read += n;
        if self.read == self.write {
            self.clear();
        }

        Ok(())
    }

    /// Copy out the first `n` unread bytes and consume them.
    pub fn split_to(&mut self, n: usize) -> Result<Vec<u8>> {
        let bytes = self
            .as_slice()
            .get(..n)
            .ok_or(Error::BufferUnderrun {
                requested: n,
                available: self.len(),
            })?
            .to_vec();
        self.consume(n)?;

        Ok(bytes)
    }

    /// Discard the consumed bytes, moving the unread ones to the front.
    pub fn compact(&mut self) {
        if self.read > 0 {
            let len = self.len();

            self.data.copy_within(self.read..self.write, 0);
            self.data[len..self.write].zeroize();

            self.read = 0;
            self.write = len;
        }
    }

    /// Drop every byte, keeping the allocation.
    pub fn clear(&mut self) {
        self.data[..self.write].zeroize();
        self.read = 0;
        self.write = 0;
    }

    /// Overwrite the storage with zeroes and release it, used to discard
    /// plaintext remnants once a session is torn down.
    pub(crate) fn wipe(&mut self) {
        self.data.zeroize();
        self.data = Vec::new();
        self.read = 0;
        self.write = 0;
    }

    fn spare(&self) -> usize {
        self.data.len() - self.write
    }

    /// Receive at most `max` bytes from `recv` at the write cursor.
    ///
    /// The region lent to `recv` is zeroed past the count of bytes it
    /// reported, so nothing but received bytes is ever exposed.
    pub(crate) fn fill(
        &mut self,
        max: usize,
        mut recv: impl FnMut(&mut [u8]) -> io::Result<usize>,
    ) -> Result<Poll<usize>> {
        self.ensure_capacity(max)?;

        let start = self.write;
        let region = &mut self.data[start..start + max];

        let res = loop {
            match recv(&mut *region) {
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                res => break res,
            }
        };

        let received = match &res {
            Ok(n) => (*n).min(max),
            Err(_) => 0,
        };
        region[received..].zeroize();
        self.write += received;

        match res {
            Ok(0) if max > 0 => Err(Error::Disconnected),
            Ok(_) => Ok(Poll::Ready(received)),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(Poll::Pending),
            Err(err) => Err(err.into()),
        }
    }

    /// Hand the unread bytes to `send` until the buffer is empty.
    pub(crate) fn drain(
        &mut self,
        mut send: impl FnMut(&[u8]) -> io::Result<usize>,
    ) -> Result<Poll<()>> {
        while !self.is_empty() {
            match send(self.as_slice()) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => self.consume(n.min(self.len()))?,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(Poll::Pending),
                Err(err) => return Err(err.into()),
            }
        }

        Ok(Poll::Ready(()))
    }
}

impl PartialEq for ByteBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for ByteBuffer {}

impl std::fmt::Debug for ByteBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteBuffer")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use rstest::rstest;

    use super::*;

    #[test]
    fn consume_past_the_end_underruns() {
        let mut buffer = ByteBuffer::new();
        buffer.append(b"abc").unwrap();

        assert!(matches!(
            buffer.consume(4),
            Err(Error::BufferUnderrun {
                requested: 4,
                available: 3
            })
        ));
        assert_eq!(buffer.as_slice(), b"abc");
    }

    #[rstest]
    #[case(&[1, 1, 1, 1])]
    #[case(&[300, 7, 4096, 1])]
    #[case(&[0, 65536, 2])]
    fn growth_keeps_unread_bytes_in_order(#[case] chunks: &[usize]) {
        let mut buffer = ByteBuffer::new();
        let mut expected = Vec::new();
        let mut counter = 0u8;

        for &size in chunks {
            let chunk = (0..size)
                .map(|_| {
                    counter = counter.wrapping_add(1);
                    counter
                })
                .collect::<Vec<_>>();

            buffer.append(&chunk).unwrap();
            expected.extend_from_slice(&chunk);

            // Consume half of what's there to move the read cursor around.
            let half = buffer.len() / 2;
            buffer.consume(half).unwrap();
            expected.drain(..half);

            assert_eq!(buffer.as_slice(), expected.as_slice());
        }

        let rest = buffer.len();
        buffer.consume(rest).unwrap();
        assert!(buffer.is_empty());
    }

    #[test]
    fn ensure_capacity_discards_consumed_bytes() {
        let mut buffer = ByteBuffer::new();
        buffer.append(&[0xAA; 200]).unwrap();
        buffer.consume(150).unwrap();

        buffer.ensure_capacity(buffer.capacity()).unwrap();

        assert_eq!(buffer.as_slice(), &[0xAA; 50]);
        assert!(buffer.capacity() - buffer.len() >= 50);
    }

    #[test]
    fn compact_moves_bytes_front() {
        let mut buffer = ByteBuffer::new();
        buffer.append(b"hello world").unwrap();
        buffer.consume(6).unwrap();
        buffer.compact();

        assert_eq!(buffer.as_slice(), b"world");
        assert_eq!(buffer.split_to(3).unwrap(), b"wor");
        assert_eq!(buffer.as_slice(), b"ld");
    }

    #[test]
    fn fill_only_exposes_received_bytes() {
        let mut buffer = ByteBuffer::new();

        let res = buffer
            .fill(64, |buf| {
                buf[..3].copy_from_slice(b"SSH");
                Ok(3)
            })
            .unwrap();

        assert_eq!(res, Poll::Ready(3));
        assert_eq!(buffer.as_slice(), b"SSH");
    }

    #[test]
    fn fill_maps_would_block_to_pending() {
        let mut buffer = ByteBuffer::new();
        buffer.append(b"x").unwrap();

        let res = buffer
            .fill(64, |_| Err(io::ErrorKind::WouldBlock.into()))
            .unwrap();

        assert!(res.is_pending());
        assert_eq!(buffer.as_slice(), b"x");
    }

    #[test]
    fn fill_reports_closed_peer() {
        let mut buffer = ByteBuffer::new();

        assert!(matches!(buffer.fill(64, |_| Ok(0)), Err(Error::Disconnected)));
    }

    #[test]
    fn drain_resumes_after_partial_writes() {
        let mut buffer = ByteBuffer::new();
        buffer.append(b"0123456789").unwrap();

        let mut sink = Vec::new();
        let mut budget = 4;

        let res = buffer
            .drain(|buf| {
                if budget == 0 {
                    return Err(io::ErrorKind::WouldBlock.into());
                }

                let n = buf.len().min(budget);
                budget -= n;
                sink.extend_from_slice(&buf[..n]);
                Ok(n)
            })
            .unwrap();

        assert!(res.is_pending());
        assert_eq!(buffer.as_slice(), b"456789");

        let res = buffer
            .drain(|buf| {
                sink.extend_from_slice(buf);
                Ok(buf.len())
            })
            .unwrap();

        assert!(res.is_ready());
        assert_eq!(sink, b"0123456789");
    }

    #[rstest]
    #[case(16)]
    #[case(6)]
    fn consumed_plaintext_is_zeroed(#[case] consumed: usize) {
        let mut buffer = ByteBuffer::new();
        buffer.append(b"secret plaintext").unwrap();
        buffer.consume(consumed).unwrap();
        buffer.compact();

        assert_eq!(buffer.as_slice(), &b"secret plaintext"[consumed..]);
        assert!(buffer.data[buffer.write..].iter().all(|&byte| byte == 0));
        assert!(!buffer.data.windows(6).any(|window| window == b"secret"));
    }

    #[test]
    fn cleared_plaintext_is_zeroed() {
        let mut buffer = ByteBuffer::new();
        buffer.append(b"secret plaintext").unwrap();
        buffer.clear();

        assert!(buffer.is_empty());
        assert!(buffer.capacity() > 0);
        assert!(buffer.data.iter().all(|&byte| byte == 0));
    }

    #[test]
    fn overfilled_region_is_zeroed() {
        let mut buffer = ByteBuffer::new();

        let res = buffer
            .fill(64, |buf| {
                buf.copy_from_slice(&[0xAA; 64]);
                Ok(2)
            })
            .unwrap();

        assert_eq!(res, Poll::Ready(2));
        assert_eq!(buffer.as_slice(), &[0xAA; 2]);
        assert!(buffer.data[buffer.write..].iter().all(|&byte| byte == 0));
    }
}
