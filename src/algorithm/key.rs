use signature::{SignatureEncoding, Signer, Verifier};
use ssh_key::{PrivateKey, PublicKey, Signature};

pub use ssh_key::Algorithm as Key;

use crate::{message::KexInit, Error, Result};

use super::{select, Category, Negociate};

impl Negociate for Key {
    fn negociate(client: &KexInit, server: &KexInit) -> Result<Self> {
        select(
            Category::HostKey,
            &client.server_host_key_algorithms,
            &server.server_host_key_algorithms,
        )
    }
}

/// The host key algorithm a server advertises for `key`.
///
/// RSA keys are advertised with their `rsa-sha2-512` signature scheme.
pub(crate) fn advertised(key: &PrivateKey) -> Key {
    match key.algorithm() {
        Key::Rsa { .. } => Key::Rsa {
            hash: Some(ssh_key::HashAlg::Sha512),
        },
        algorithm => algorithm,
    }
}

/// Whether keys of algorithm `a` can serve a negotiated algorithm `b`,
/// the signature scheme of RSA keys being picked at signing time.
pub(crate) fn compatible(a: &Key, b: &Key) -> bool {
    match (a, b) {
        (Key::Rsa { .. }, Key::Rsa { .. }) => true,
        _ => a == b,
    }
}

/// Sign the exchange hash with the host key.
pub(crate) fn sign(key: &PrivateKey, hash: &[u8]) -> Result<Vec<u8>> {
    let signature: Signature =
        Signer::try_sign(key, hash).map_err(|_| Error::KeyExchangeFailed)?;

    Ok(signature.to_vec())
}

/// Verify the server's signature of the exchange hash,
/// returning the server's host key on success.
///
/// The signature must be made with the negotiated scheme exactly, as
/// RSA keys have several of them (RFC 8332).
pub(crate) fn verify(expected: &Key, k_s: &[u8], hash: &[u8], signature: &[u8]) -> Result<PublicKey> {
    let key = PublicKey::from_bytes(k_s).map_err(|_| Error::Protocol("malformed host key"))?;
    let signature = Signature::try_from(signature)
        .map_err(|_| Error::Protocol("malformed host key signature"))?;

    if !compatible(&key.algorithm(), expected) || signature.algorithm() != *expected {
        tracing::debug!(
            "Host key `{}` signed with `{}` does not match the negociated `{expected}`",
            key.algorithm(),
            signature.algorithm()
        );

        return Err(Error::UntrustedHost);
    }

    Verifier::verify(&key, hash, &signature).map_err(|_| Error::UntrustedHost)?;

    Ok(key)
}
