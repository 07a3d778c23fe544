use digest::{Mac, OutputSizeUser};
use md5::Md5;
use sha1::Sha1;
use sha2::{Sha256, Sha512};
use strum::{AsRefStr, EnumString};

use crate::{message::KexInit, Error, Result};

use super::{select, Category, ClientToServer, Negociate, ServerToClient};

impl Negociate<ClientToServer> for Hmac {
    fn negociate(client: &KexInit, server: &KexInit) -> Result<Self> {
        select(
            Category::Integrity,
            &client.mac_algorithms_client_to_server,
            &server.mac_algorithms_client_to_server,
        )
    }
}

impl Negociate<ServerToClient> for Hmac {
    fn negociate(client: &KexInit, server: &KexInit) -> Result<Self> {
        select(
            Category::Integrity,
            &client.mac_algorithms_server_to_client,
            &server.mac_algorithms_server_to_client,
        )
    }
}

/// SSH hmac algorithms.
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Eq, EnumString, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Hmac {
    /// HMAC with sha-2-512 digest on encrypted message.
    #[strum(serialize = "hmac-sha2-512-etm@openssh.com")]
    HmacSha512ETM,

    /// HMAC with sha-2-256 digest on encrypted message.
    #[strum(serialize = "hmac-sha2-256-etm@openssh.com")]
    HmacSha256ETM,

    /// HMAC with sha-2-512 digest.
    #[strum(serialize = "hmac-sha2-512")]
    HmacSha512,

    /// HMAC with sha-2-256 digest.
    #[strum(serialize = "hmac-sha2-256")]
    HmacSha256,

    /// HMAC with sha-1 digest on encrypted message.
    #[strum(serialize = "hmac-sha1-etm@openssh.com")]
    HmacSha1ETM,

    /// HMAC with sha-1 digest.
    HmacSha1,

    /// HMAC with md5 digest on encrypted message.
    #[strum(serialize = "hmac-md5-etm@openssh.com")]
    HmacMd5ETM,

    /// HMAC with md5 digest.
    HmacMd5,

    /// No HMAC algorithm.
    #[default]
    None,
}

impl Hmac {
    /// Check `mac` against the packet `buf` with sequence number `seq`,
    /// the comparison running in constant time.
    pub(crate) fn verify(&self, seq: u32, buf: &[u8], key: &[u8], mac: &[u8]) -> Result<()> {
        fn verify<D: Mac + digest::KeyInit>(
            seq: u32,
            buf: &[u8],
            key: &[u8],
            mac: &[u8],
        ) -> Result<()> {
            <D as Mac>::new_from_slice(key)
                .map_err(|_| Error::Cipher)?
                .chain_update(seq.to_be_bytes())
                .chain_update(buf)
                .verify_slice(mac)
                .map_err(|_| Error::IntegrityFailure)
        }

        match self {
            Self::HmacSha512ETM | Self::HmacSha512 => {
                verify::<hmac::Hmac<Sha512>>(seq, buf, key, mac)
            }
            Self::HmacSha256ETM | Self::HmacSha256 => {
                verify::<hmac::Hmac<Sha256>>(seq, buf, key, mac)
            }
            Self::HmacSha1ETM | Self::HmacSha1 => verify::<hmac::Hmac<Sha1>>(seq, buf, key, mac),
            Self::HmacMd5ETM | Self::HmacMd5 => verify::<hmac::Hmac<Md5>>(seq, buf, key, mac),
            Self::None => Ok(()),
        }
    }

    pub(crate) fn sign(&self, seq: u32, buf: &[u8], key: &[u8]) -> Result<Vec<u8>> {
        fn sign<D: Mac + digest::KeyInit>(seq: u32, buf: &[u8], key: &[u8]) -> Result<Vec<u8>> {
            Ok(<D as Mac>::new_from_slice(key)
                .map_err(|_| Error::Cipher)?
                .chain_update(seq.to_be_bytes())
                .chain_update(buf)
                .finalize()
                .into_bytes()
                .to_vec())
        }

        match self {
            Self::HmacSha512ETM | Self::HmacSha512 => sign::<hmac::Hmac<Sha512>>(seq, buf, key),
            Self::HmacSha256ETM | Self::HmacSha256 => sign::<hmac::Hmac<Sha256>>(seq, buf, key),
            Self::HmacSha1ETM | Self::HmacSha1 => sign::<hmac::Hmac<Sha1>>(seq, buf, key),
            Self::HmacMd5ETM | Self::HmacMd5 => sign::<hmac::Hmac<Md5>>(seq, buf, key),
            Self::None => Ok(Default::default()),
        }
    }

    pub(crate) fn size(&self) -> usize {
        match self {
            Self::HmacSha512ETM | Self::HmacSha512 => Sha512::output_size(),
            Self::HmacSha256ETM | Self::HmacSha256 => Sha256::output_size(),
            Self::HmacSha1ETM | Self::HmacSha1 => Sha1::output_size(),
            Self::HmacMd5ETM | Self::HmacMd5 => Md5::output_size(),
            Self::None => 0,
        }
    }

    /// Whether the MAC is computed over the encrypted packet.
    pub(crate) fn etm(&self) -> bool {
        matches!(
            self,
            Self::HmacSha512ETM | Self::HmacSha256ETM | Self::HmacSha1ETM | Self::HmacMd5ETM
        )
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(Hmac::HmacSha512ETM, 64)]
    #[case(Hmac::HmacSha256, 32)]
    #[case(Hmac::HmacSha1, 20)]
    #[case(Hmac::HmacMd5ETM, 16)]
    #[case(Hmac::None, 0)]
    fn signs_and_verifies(#[case] hmac: Hmac, #[case] size: usize) {
        let key = vec![0x0b; hmac.size()];
        let mac = hmac.sign(7, b"payload", &key).unwrap();

        assert_eq!(mac.len(), size);
        hmac.verify(7, b"payload", &key, &mac).unwrap();

        if size > 0 {
            assert!(matches!(
                hmac.verify(8, b"payload", &key, &mac),
                Err(Error::IntegrityFailure)
            ));

            let mut tampered = mac.clone();
            tampered[0] ^= 1;
            assert!(matches!(
                hmac.verify(7, b"payload", &key, &tampered),
                Err(Error::IntegrityFailure)
            ));
        }
    }

    #[test]
    fn names_follow_the_registry() {
        assert_eq!(Hmac::HmacSha1.as_ref(), "hmac-sha1");
        assert_eq!(Hmac::HmacMd5.as_ref(), "hmac-md5");
        assert!(Hmac::HmacSha256ETM.etm());
        assert!(!Hmac::HmacSha256.etm());
    }
}
