#![doc = concat!(
    "[![crates.io](https://img.shields.io/crates/v/", env!("CARGO_PKG_NAME"), ")](https://crates.io/crates/", env!("CARGO_PKG_NAME"), ")",
    " ",
    "[![docs.rs](https://img.shields.io/docsrs/", env!("CARGO_PKG_NAME"), ")](https://docs.rs/", env!("CARGO_PKG_NAME"), ")",
    " ",
    "![license](https://img.shields.io/crates/l/", env!("CARGO_PKG_NAME"), ")"
)]
#![doc = ""]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! The engine never blocks: every resumable operation returns a
//! [`Result`] of [`std::task::Poll`], where [`Poll::Pending`](std::task::Poll::Pending)
//! means the I/O callbacks of the [`Context`] reported
//! [`WouldBlock`](std::io::ErrorKind::WouldBlock) and the same call must be
//! retried once the underlying handle is ready again.
//!
//! ### Supported algorithms
//!
//! #### Key-exchange:
//! see [`algorithm::Kex`].
//!
//! #### Host keys:
//! see [`algorithm::Key`].
//!
//! #### Encryption:
//!
//! see [`algorithm::Cipher`].
//!
//! #### MACs
//!
//! see [`algorithm::Hmac`].

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    clippy::unwrap_used,
    clippy::panic,
    clippy::unimplemented,
    clippy::todo,
    clippy::undocumented_unsafe_blocks
)]
#![forbid(unsafe_code)]

/// Extract the value out of a `Poll::Ready`,
/// or return `Ok(Poll::Pending)` from the enclosing function.
macro_rules! ready {
    ($e:expr $(,)?) => {
        match $e {
            ::std::task::Poll::Ready(value) => value,
            ::std::task::Poll::Pending => return Ok(::std::task::Poll::Pending),
        }
    };
}

mod error;
pub use error::{Error, Result};

mod transport;
mod version;

pub mod algorithm;
pub mod buffer;
pub mod context;
pub mod message;
pub mod session;

pub use buffer::ByteBuffer;
pub use context::{Callbacks, Config, Context};
pub use session::{PeerState, Session, Side, State};
#[doc(no_inline)]
pub use ssh_packet::Id;
