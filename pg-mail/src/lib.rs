//! # PostGuard mail
#![doc(
    html_favicon_url = "https://postguard.eu/favicon.ico",
    html_logo_url = "https://postguard.eu/pg_logo_no_text.svg"
)]
#![deny(
    missing_debug_implementations,
    rust_2018_idioms,
    missing_docs,
    rustdoc::broken_intra_doc_links
)]
#![cfg_attr(docsrs, feature(doc_cfg))]
//! Sealing and unsealing e-mail with PostGuard, the way a mail client add-on does it.
//!
//! A mail body is sealed for a set of recipients, each identified by a [policy][`identity::Policy`]:
//! a conjunction of attributes the recipient has to prove to a Private Key Generator (PKG)
//! before it releases their key.
//!
//! * Sealing: a compose surface streams the plaintext over a [relay][`relay::ChunkRelay`] into
//! the [engine][`engine::Engine`], whose ciphertext is wrapped into a `multipart/mixed`
//! envelope by the [MIME transform][`mime::MimeEncoder`], see [`seal`].
//!
//! * Unsealing: the engine exposes the hidden policies of a sealed message. The policy of the
//! local identity is [resolved][`identity::HiddenPolicy::resolve`], a key is
//! [acquired][`session::KeyAcquisition`] (from a cached authorization artifact, or through an
//! interactive session) and the payload is unsealed, see [`unseal`].
//!
//! ## Example
//!
//! Building the policies of an outgoing mail and the envelope around a (tiny) ciphertext:
//!
//! ```
//! use pg_mail::mime::{extract_encrypted, EnvelopeOptions, MimeEncoder};
//! use pg_mail::policy::PolicyBuilder;
//!
//! let policies = PolicyBuilder::new(1566722350)
//!     .recipients(["Bob <bob@example.com>"])
//!     .sender_copy("alice@example.com")
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(policies.len(), 2);
//!
//! let mut encoder = MimeEncoder::new(EnvelopeOptions::default());
//! let mut envelope = encoder.start();
//! envelope += &encoder.transform(b"ciphertext");
//! envelope += &encoder.flush();
//!
//! assert_eq!(extract_encrypted(&envelope).unwrap(), b"ciphertext");
//! ```

pub mod api;
pub mod artifacts;
pub mod cache;
pub mod consts;
pub mod engine;
pub mod error;
pub mod host;
pub mod identity;
pub mod mime;
pub mod options;
pub mod policy;
pub mod popup;
pub mod relay;
pub mod seal;
pub mod selection;
pub mod session;
pub mod unseal;

#[doc(hidden)]
pub use ibe::{kem, Compress};

#[doc(hidden)]
pub use consts::*;

#[doc(hidden)]
#[cfg(any(test, feature = "test"))]
pub mod test;

mod util;
