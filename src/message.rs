//! Messages of the transport layer protocol (RFC 4253 §7, §11 and RFC 5656 §4),
//! and their (de)serialization from packet payloads.

use std::io::Cursor;

use ssh_packet::binrw::{
    meta::{ReadEndian, WriteEndian},
    BinRead, BinWrite,
};

#[doc(no_inline)]
pub use ssh_packet::{
    arch::NameList,
    trans::{
        Debug, Disconnect, DisconnectReason, Ignore, KexEcdhInit, KexEcdhReply, KexInit, NewKeys,
        Unimplemented,
    },
};

use crate::{Error, Result};

pub(crate) const DISCONNECT: u8 = 1;
pub(crate) const IGNORE: u8 = 2;
pub(crate) const UNIMPLEMENTED: u8 = 3;
pub(crate) const DEBUG: u8 = 4;
pub(crate) const KEXINIT: u8 = 20;
pub(crate) const NEWKEYS: u8 = 21;

/// Message numbers reserved to the key-exchange method in use.
pub(crate) const KEX_METHOD_RANGE: std::ops::RangeInclusive<u8> = 30..=49;

/// Serialize the `message` as a packet payload, its message number included.
pub(crate) fn encode<T>(message: &T) -> Result<Vec<u8>>
where
    for<'w> T: BinWrite<Args<'w> = ()> + WriteEndian,
{
    let mut payload = Vec::new();
    message.write(&mut Cursor::new(&mut payload))?;

    Ok(payload)
}

/// Deserialize a message of type `T` from a packet payload.
pub(crate) fn decode<T>(payload: &[u8]) -> Result<T>
where
    for<'r> T: BinRead<Args<'r> = ()> + ReadEndian,
{
    Ok(T::read(&mut Cursor::new(payload))?)
}

/// The names of a `name-list`, in order of preference.
pub(crate) fn names(list: &NameList) -> Result<Vec<String>> {
    let mut buf = Vec::new();
    list.write_be(&mut Cursor::new(&mut buf))?;

    let list = buf
        .get(4..)
        .and_then(|list| std::str::from_utf8(list).ok())
        .ok_or(Error::Protocol("malformed name-list"))?;

    Ok(list
        .split(',')
        .filter(|name| !name.is_empty())
        .map(Into::into)
        .collect())
}

/// The value of `first_kex_packet_follows` in a `SSH_MSG_KEXINIT` payload,
/// the boolean ahead of the trailing reserved `uint32`.
pub(crate) fn first_kex_packet_follows(payload: &[u8]) -> bool {
    payload
        .len()
        .checked_sub(5)
        .and_then(|offset| payload.get(offset))
        .is_some_and(|&flag| flag != 0)
}

/// The reason reported to the peer when a session fails with `error`.
pub(crate) fn reason(error: &Error) -> DisconnectReason {
    match error {
        Error::NoMatchingAlgorithm(_) | Error::KeyExchangeFailed => {
            DisconnectReason::KeyExchangeFailed
        }
        Error::UntrustedHost => DisconnectReason::HostKeyNotVerifiable,
        Error::IntegrityFailure => DisconnectReason::MacError,
        Error::Io(_) | Error::Disconnected => DisconnectReason::ConnectionLost,
        _ => DisconnectReason::ProtocolError,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn kexinit(follows: bool) -> Vec<u8> {
        encode(&KexInit {
            cookie: [7; 16],
            kex_algorithms: NameList::from_iter(&["curve25519-sha256", "ext-info-c"]),
            server_host_key_algorithms: NameList::from_iter(&["ssh-ed25519"]),
            encryption_algorithms_client_to_server: NameList::from_iter(&["aes128-ctr"]),
            encryption_algorithms_server_to_client: NameList::from_iter(&["aes128-ctr"]),
            mac_algorithms_client_to_server: NameList::from_iter(&["hmac-sha2-256"]),
            mac_algorithms_server_to_client: NameList::from_iter(&["hmac-sha2-256"]),
            compression_algorithms_client_to_server: NameList::from_iter(&["none"]),
            compression_algorithms_server_to_client: NameList::from_iter(&["none"]),
            languages_client_to_server: Default::default(),
            languages_server_to_client: Default::default(),
            first_kex_packet_follows: follows.into(),
        })
        .unwrap()
    }

    #[test]
    fn kexinit_layout() {
        let payload = kexinit(true);

        assert_eq!(payload[0], KEXINIT);
        assert_eq!(&payload[1..17], &[7; 16]);
        assert_eq!(&payload[17..21], &28u32.to_be_bytes());
        assert_eq!(&payload[21..49], b"curve25519-sha256,ext-info-c");
        assert_eq!(&payload[payload.len() - 5..], &[1, 0, 0, 0, 0]);

        let decoded: KexInit = decode(&payload).unwrap();
        assert_eq!(
            names(&decoded.kex_algorithms).unwrap(),
            ["curve25519-sha256", "ext-info-c"]
        );
        assert!(names(&decoded.languages_client_to_server).unwrap().is_empty());
    }

    #[test]
    fn guessed_packet_flag_is_read_from_the_payload() {
        assert!(first_kex_packet_follows(&kexinit(true)));
        assert!(!first_kex_packet_follows(&kexinit(false)));
        assert!(!first_kex_packet_follows(&[KEXINIT]));
    }

    #[test]
    fn wrong_number_is_rejected() {
        let payload = encode(&Ignore {
            data: vec![1, 2].into(),
        })
        .unwrap();

        assert!(matches!(
            decode::<Debug>(&payload),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn failures_map_to_disconnect_reasons() {
        assert!(matches!(
            reason(&Error::IntegrityFailure),
            DisconnectReason::MacError
        ));
        assert!(matches!(
            reason(&Error::UntrustedHost),
            DisconnectReason::HostKeyNotVerifiable
        ));
        assert!(matches!(
            reason(&Error::Protocol("test")),
            DisconnectReason::ProtocolError
        ));
    }
}
