use digest::{Digest, FixedOutputReset};
use securefmt::Debug;
use zeroize::Zeroizing;

use crate::algorithm::{Cipher, Hmac};

/// Key material for one direction of the traffic.
#[derive(Debug, Default, Clone)]
pub struct Keys {
    /// Cipher _initialization vector_.
    #[sensitive]
    pub iv: Zeroizing<Vec<u8>>,

    /// Cipher _key_.
    #[sensitive]
    pub key: Zeroizing<Vec<u8>>,

    /// Hmac _key_.
    #[sensitive]
    pub hmac: Zeroizing<Vec<u8>>,
}

impl Keys {
    pub fn as_client<D: Digest + FixedOutputReset>(
        secret: &[u8],
        hash: &[u8],
        session_id: &[u8],
        cipher: &Cipher,
        hmac: &Hmac,
    ) -> Self {
        Self {
            iv: Self::derive::<D>(secret, hash, b'A', session_id, cipher.iv_size()),
            key: Self::derive::<D>(secret, hash, b'C', session_id, cipher.key_size()),
            hmac: Self::derive::<D>(secret, hash, b'E', session_id, hmac.size()),
        }
    }

    pub fn as_server<D: Digest + FixedOutputReset>(
        secret: &[u8],
        hash: &[u8],
        session_id: &[u8],
        cipher: &Cipher,
        hmac: &Hmac,
    ) -> Self {
        Self {
            iv: Self::derive::<D>(secret, hash, b'B', session_id, cipher.iv_size()),
            key: Self::derive::<D>(secret, hash, b'D', session_id, cipher.key_size()),
            hmac: Self::derive::<D>(secret, hash, b'F', session_id, hmac.size()),
        }
    }

    /// Derive `size` bytes of key material (RFC 4253 §7.2),
    /// `secret` being the already `mpint`-encoded shared secret.
    fn derive<D: Digest + FixedOutputReset>(
        secret: &[u8],
        hash: &[u8],
        kind: u8,
        session_id: &[u8],
        size: usize,
    ) -> Zeroizing<Vec<u8>> {
        let mut hasher = D::new()
            .chain_update(secret)
            .chain_update(hash)
            .chain_update([kind])
            .chain_update(session_id);

        let mut key = Zeroizing::new(hasher.finalize_reset().to_vec());

        while key.len() < size {
            hasher = hasher
                .chain_update(secret)
                .chain_update(hash)
                .chain_update(key.as_slice());

            key.extend_from_slice(&hasher.finalize_reset());
        }

        key.truncate(size);

        key
    }
}
