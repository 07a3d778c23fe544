use strum::{AsRefStr, EnumString};

use crate::{message::KexInit, Result};

use super::{select, Category, ClientToServer, Negociate, ServerToClient};

impl Negociate<ClientToServer> for Compress {
    fn negociate(client: &KexInit, server: &KexInit) -> Result<Self> {
        select(
            Category::Compression,
            &client.compression_algorithms_client_to_server,
            &server.compression_algorithms_client_to_server,
        )
    }
}

impl Negociate<ServerToClient> for Compress {
    fn negociate(client: &KexInit, server: &KexInit) -> Result<Self> {
        select(
            Category::Compression,
            &client.compression_algorithms_server_to_client,
            &server.compression_algorithms_server_to_client,
        )
    }
}

/// SSH compression algorithms, payloads always travel uncompressed.
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Eq, EnumString, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Compress {
    /// No compression algorithm.
    #[default]
    None,
}
