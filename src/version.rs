//! The protocol version exchange, the identification line of RFC 4253 §4.2.

use std::task::Poll;

use ssh_packet::Id;

use crate::{buffer::ByteBuffer, Error, Result};

/// Maximum size of the identification line, `\r\n` included.
pub const MAX_SIZE: usize = 255;

const PREFIX: &[u8] = b"SSH-";

/// Protocol versions spoken, `1.99` being announced by servers
/// that are backward-compatible with SSH 1.
const COMPATIBLE: [&[u8]; 2] = [b"SSH-2.0-", b"SSH-1.99-"];

/// Extract the peer's identification line from the buffered input.
///
/// Lines not starting with `SSH-` are skipped when `banner` is set,
/// as servers may send them before their identification. On the other
/// hand they are a protocol violation from a client.
pub(crate) fn scan(input: &mut ByteBuffer, banner: bool) -> Result<Poll<Id>> {
    loop {
        let window = &input.as_slice()[..input.len().min(MAX_SIZE)];

        let Some(end) = window.windows(2).position(|w| w == b"\r\n") else {
            if window.len() >= MAX_SIZE {
                return Err(Error::Protocol("identification line too long"));
            }

            return Ok(Poll::Pending);
        };
        let line = &window[..end];

        if line.starts_with(PREFIX) {
            if !COMPATIBLE.iter().any(|proto| line.starts_with(proto)) {
                return Err(Error::Protocol("unsupported protocol version"));
            }

            let id = std::str::from_utf8(line)
                .map_err(|_| Error::Protocol("identification line is not UTF-8"))?
                .parse::<Id>()?;
            input.consume(end + 2)?;

            break Ok(Poll::Ready(id));
        } else if banner {
            tracing::trace!(
                "Skipping pre-identification line `{}`",
                String::from_utf8_lossy(line)
            );

            input.consume(end + 2)?;
        } else {
            break Err(Error::Protocol("missing identification prefix"));
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]

    use rstest::rstest;

    use super::*;

    fn scanned(bytes: &[u8], banner: bool) -> Result<Poll<Id>> {
        let mut input = ByteBuffer::new();
        input.append(bytes).unwrap();

        scan(&mut input, banner)
    }

    #[rstest]
    #[case("SSH-2.0-Test")]
    #[case("SSH-2.0-OpenSSH_9.3p1 Debian-1")]
    #[case("SSH-1.99-legacy_server")]
    fn parses_complete_lines(#[case] line: &str) {
        let Poll::Ready(id) = scanned(format!("{line}\r\n").as_bytes(), false).unwrap() else {
            panic!("a complete line should be parsed");
        };

        assert_eq!(id.to_string(), line);
    }

    #[test]
    fn incomplete_line_is_pending() {
        let mut input = ByteBuffer::new();
        input.append(b"SSH-2.0-Tes").unwrap();

        assert!(scan(&mut input, false).unwrap().is_pending());
        assert_eq!(input.len(), 11);
    }

    #[test]
    fn keeps_data_following_the_line() {
        let mut input = ByteBuffer::new();
        input.append(b"SSH-2.0-Test\r\n\x00\x00\x01\x0c").unwrap();

        assert!(scan(&mut input, false).unwrap().is_ready());
        assert_eq!(input.as_slice(), b"\x00\x00\x01\x0c");
    }

    #[test]
    fn client_skips_banner_lines() {
        let Poll::Ready(id) =
            scanned(b"Welcome!\r\nPlease behave.\r\nSSH-2.0-Server\r\n", true).unwrap()
        else {
            panic!("the identification should follow the banner");
        };

        assert_eq!(id.to_string(), "SSH-2.0-Server");
    }

    #[rstest]
    #[case(b"Welcome!\r\nSSH-2.0-Client\r\n")]
    #[case(b"ssh-2.0-lowercase\r\n")]
    #[case(b"HTTP/1.1 200 OK\r\n")]
    fn server_rejects_foreign_lines(#[case] bytes: &[u8]) {
        assert!(matches!(scanned(bytes, false), Err(Error::Protocol(_))));
    }

    #[rstest]
    #[case(false)]
    #[case(true)]
    fn unbounded_line_is_fatal(#[case] banner: bool) {
        assert!(matches!(
            scanned(&[b'A'; MAX_SIZE], banner),
            Err(Error::Protocol("identification line too long"))
        ));
    }

    #[rstest]
    #[case(b"SSH-1.5-ancient\r\n")]
    #[case(b"SSH-3.0-future\r\n")]
    fn incompatible_version_is_fatal(#[case] bytes: &[u8]) {
        assert!(matches!(
            scanned(bytes, true),
            Err(Error::Protocol("unsupported protocol version"))
        ));
    }
}
