//! The crypto engine seam.
//!
//! The orchestrators only see these traits: an [`Engine`] seals a plaintext stream for an
//! [`EncryptionPolicy`] and opens ciphertext streams, yielding an [`Unseal`] that exposes the
//! hidden policies before any key is known.

use std::collections::BTreeMap;

use futures::io::{AsyncRead, AsyncWrite};

use crate::error::Error;
use crate::identity::{EncryptionPolicy, HiddenPolicy};

pub mod postguard;

pub use postguard::PostGuard;

/// Seals and opens bytestreams.
#[allow(async_fn_in_trait)]
pub trait Engine {
    /// The key a recipient needs to unseal.
    type Key;

    /// An opened ciphertext stream.
    type Unsealer<R: AsyncRead + Unpin>: Unseal<Key = Self::Key>;

    /// Seal everything read from `r` into `w`, for all recipients in `policies`.
    ///
    /// `w` is closed once the last segment has been written.
    async fn seal<R, W>(&self, policies: &EncryptionPolicy, r: R, w: W) -> Result<(), Error>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin;

    /// Read the metadata of a ciphertext stream.
    async fn unsealer<R>(&self, r: R) -> Result<Self::Unsealer<R>, Error>
    where
        R: AsyncRead + Unpin;
}

/// A ciphertext stream of which the metadata has been read.
#[allow(async_fn_in_trait)]
pub trait Unseal {
    /// The key a recipient needs to unseal.
    type Key;

    /// The hidden policy of every recipient.
    fn hidden_policies(&self) -> BTreeMap<String, HiddenPolicy>;

    /// Unseal the payload for recipient `ident` into `w`, closing it at the end.
    async fn unseal<W>(self, ident: &str, key: &Self::Key, w: W) -> Result<(), Error>
    where
        W: AsyncWrite + Unpin;
}
