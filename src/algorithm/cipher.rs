use cipher::{
    generic_array::GenericArray, BlockDecryptMut, BlockEncryptMut, BlockSizeUser, KeyIvInit,
    StreamCipher,
};
use strum::{AsRefStr, EnumString};

use crate::{message::KexInit, Error, Result};

use super::{select, Category, ClientToServer, Negociate, ServerToClient};

// TODO: (optimization) Get rid of this Box<dyn> altogether.
pub type CipherState = Box<dyn std::any::Any + Send + Sync>;

impl Negociate<ClientToServer> for Cipher {
    fn negociate(client: &KexInit, server: &KexInit) -> Result<Self> {
        select(
            Category::Encryption,
            &client.encryption_algorithms_client_to_server,
            &server.encryption_algorithms_client_to_server,
        )
    }
}

impl Negociate<ServerToClient> for Cipher {
    fn negociate(client: &KexInit, server: &KexInit) -> Result<Self> {
        select(
            Category::Encryption,
            &client.encryption_algorithms_server_to_client,
            &server.encryption_algorithms_server_to_client,
        )
    }
}

/// SSH cipher algorithms.
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Eq, EnumString, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Cipher {
    /// AES-256 in counter (CTR) mode.
    Aes256Ctr,

    /// AES-192 in counter (CTR) mode.
    Aes192Ctr,

    /// AES-128 in counter (CTR) mode.
    Aes128Ctr,

    /// AES-256 in cipher block chaining (CBC) mode.
    Aes256Cbc,

    /// AES-192 in cipher block chaining (CBC) mode.
    Aes192Cbc,

    /// AES-128 in cipher block chaining (CBC) mode.
    Aes128Cbc,

    /// TripleDES in cipher block chaining (CBC) mode.
    #[strum(serialize = "3des-cbc")]
    TDesCbc,

    /// No cipher algorithm, the identity.
    #[default]
    None,
}

impl Cipher {
    /// Store the cipher instance in the type-erased `state`,
    /// creating it from the `key` and `iv` on first use.
    fn state<'s, T: KeyIvInit + Send + Sync + 'static>(
        state: &'s mut Option<CipherState>,
        key: &[u8],
        iv: &[u8],
    ) -> Result<&'s mut T> {
        if state.is_none() {
            let cipher = T::new_from_slices(key, iv).map_err(|_| Error::Cipher)?;
            *state = Some(Box::new(cipher));
        }

        state
            .as_mut()
            .and_then(|state| state.downcast_mut())
            .ok_or(Error::Cipher)
    }

    fn ctr<C: StreamCipher>(cipher: &mut C, buffer: &mut [u8]) -> Result<()> {
        cipher
            .try_apply_keystream(buffer)
            .map_err(|_| Error::Cipher)
    }

    pub(crate) fn encrypt(
        &self,
        state: &mut Option<CipherState>,
        key: &[u8],
        iv: &[u8],
        buffer: &mut [u8],
    ) -> Result<()> {
        fn cbc<C: BlockEncryptMut>(cipher: &mut C, buffer: &mut [u8]) -> Result<()> {
            let size = C::block_size();
            if buffer.len() % size != 0 {
                return Err(Error::Cipher);
            }

            for block in buffer.chunks_exact_mut(size) {
                cipher.encrypt_block_mut(GenericArray::from_mut_slice(block));
            }

            Ok(())
        }

        match self {
            Self::Aes256Ctr => Self::ctr(
                Self::state::<ctr::Ctr128BE<aes::Aes256>>(state, key, iv)?,
                buffer,
            ),
            Self::Aes192Ctr => Self::ctr(
                Self::state::<ctr::Ctr128BE<aes::Aes192>>(state, key, iv)?,
                buffer,
            ),
            Self::Aes128Ctr => Self::ctr(
                Self::state::<ctr::Ctr128BE<aes::Aes128>>(state, key, iv)?,
                buffer,
            ),
            Self::Aes256Cbc => cbc(
                Self::state::<cbc::Encryptor<aes::Aes256>>(state, key, iv)?,
                buffer,
            ),
            Self::Aes192Cbc => cbc(
                Self::state::<cbc::Encryptor<aes::Aes192>>(state, key, iv)?,
                buffer,
            ),
            Self::Aes128Cbc => cbc(
                Self::state::<cbc::Encryptor<aes::Aes128>>(state, key, iv)?,
                buffer,
            ),
            Self::TDesCbc => cbc(
                Self::state::<cbc::Encryptor<des::TdesEde3>>(state, key, iv)?,
                buffer,
            ),
            Self::None => Ok(()),
        }
    }

    pub(crate) fn decrypt(
        &self,
        state: &mut Option<CipherState>,
        key: &[u8],
        iv: &[u8],
        buffer: &mut [u8],
    ) -> Result<()> {
        fn cbc<C: BlockDecryptMut>(cipher: &mut C, buffer: &mut [u8]) -> Result<()> {
            let size = C::block_size();
            if buffer.len() % size != 0 {
                return Err(Error::Cipher);
            }

            for block in buffer.chunks_exact_mut(size) {
                cipher.decrypt_block_mut(GenericArray::from_mut_slice(block));
            }

            Ok(())
        }

        match self {
            // In CTR mode, encryption and decrytion are the same
            Self::Aes256Ctr | Self::Aes192Ctr | Self::Aes128Ctr => {
                self.encrypt(state, key, iv, buffer)
            }
            Self::Aes256Cbc => cbc(
                Self::state::<cbc::Decryptor<aes::Aes256>>(state, key, iv)?,
                buffer,
            ),
            Self::Aes192Cbc => cbc(
                Self::state::<cbc::Decryptor<aes::Aes192>>(state, key, iv)?,
                buffer,
            ),
            Self::Aes128Cbc => cbc(
                Self::state::<cbc::Decryptor<aes::Aes128>>(state, key, iv)?,
                buffer,
            ),
            Self::TDesCbc => cbc(
                Self::state::<cbc::Decryptor<des::TdesEde3>>(state, key, iv)?,
                buffer,
            ),
            Self::None => Ok(()),
        }
    }

    pub(crate) fn block_size(&self) -> usize {
        match self {
            Self::None | Self::TDesCbc => 8,
            Self::Aes128Cbc
            | Self::Aes192Cbc
            | Self::Aes256Cbc
            | Self::Aes128Ctr
            | Self::Aes192Ctr
            | Self::Aes256Ctr => 16,
        }
    }

    pub(crate) fn key_size(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Aes128Cbc | Self::Aes128Ctr => 16,
            Self::TDesCbc | Self::Aes192Cbc | Self::Aes192Ctr => 24,
            Self::Aes256Cbc | Self::Aes256Ctr => 32,
        }
    }

    pub(crate) fn iv_size(&self) -> usize {
        match self {
            Self::None => 0,
            Self::TDesCbc => 8,
            Self::Aes128Cbc
            | Self::Aes192Cbc
            | Self::Aes256Cbc
            | Self::Aes128Ctr
            | Self::Aes192Ctr
            | Self::Aes256Ctr => 16,
        }
    }
}
