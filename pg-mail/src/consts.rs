//! Constants used by PostGuard mail sealing.

/// The number of base64 characters on one line of the encrypted part, see [RFC 1421].
///
/// [RFC 1421]: https://datatracker.ietf.org/doc/html/rfc1421
pub const LINE_CHARS: usize = 76;

/// The number of raw bytes that encode to exactly one line of [`LINE_CHARS`] characters.
pub const LINE_BYTES: usize = (LINE_CHARS / 4) * 3;

/// The number of lines the MIME transform buffers before emitting.
pub const BUF_LINES: usize = 16;

/// The size of the MIME transform buffer (912 bytes).
///
/// This is a multiple of three, so base64 groups never straddle two buffers.
pub const BUF_BYTES: usize = BUF_LINES * LINE_BYTES;

/// The attribute type of an e-mail address.
pub const EMAIL_ATTRIBUTE_TYPE: &str = "pbdf.sidn-pbdf.email.email";

/// Default Private Key Generator (PKG) URL.
pub const PKG_URL: &str = "https://stable.irmaseal-pkg.ihub.ru.nl";

/// Folder used to keep plaintext copies of sent mail.
pub const SENT_COPY_FOLDER: &str = "PostGuard Sent";

/// Folder used to keep plaintext copies of received mail.
pub const RECEIVED_COPY_FOLDER: &str = "PostGuard Received";

/// Subject of sealed mail when the original subject is encrypted.
pub const POSTGUARD_SUBJECT: &str = "PostGuard Encrypted Email";

/// File name of the encrypted attachment.
pub const ATTACHMENT_NAME: &str = "postguard.encrypted";

/// MIME subtype of the encrypted part.
pub const CONTENT_TYPE: &str = "application/postguard";

/// Header that marks a message which was sealed before it was stored in plaintext.
pub const POSTGUARD_HEADER: &str = "X-PostGuard";

/// Text of the human-readable fallback part.
pub const FALLBACK_TEXT: &str = "This mail has been encrypted using PostGuard. \
    For more information, see postguard.eu.";

/// Default validity of an authorization artifact (JWT) in seconds, one day.
pub const DEFAULT_VALIDITY: u64 = 60 * 60 * 24;

/// The number of times a pending key request is polled.
pub const KEY_POLL_ATTEMPTS: usize = 120;

/// Delay between two key request polls in milliseconds.
pub const KEY_POLL_INTERVAL_MS: u64 = 500;

/// An interactive session that takes longer than this (in seconds) is abandoned.
pub const POPUP_TIMEOUT_SECS: u64 = 5 * 60;

/// Creating a folder can stall indefinitely, give up after this many milliseconds.
pub const FOLDER_CREATE_TIMEOUT_MS: u64 = 1000;

/// Interval of the background sweep of the authorization cache, in seconds.
pub const CACHE_SWEEP_INTERVAL_SECS: u64 = 10 * 60;

/// A selection within this many milliseconds after a folder change or window focus is
/// considered a side effect of navigation, not a deliberate selection.
pub const SELECTION_GRACE_MS: u64 = 500;

/// Capacity (in chunks) of the pipes between the engine and the downstream sink.
pub const PIPE_CAPACITY: usize = 16;

// Engine wire format.

/// The size of the tag with which all sealed bytestreams begin.
pub const PRELUDE_SIZE: usize = 4;

/// The tag bytes with which all sealed bytestreams begin.
pub const PRELUDE: [u8; PRELUDE_SIZE] = [0x14, 0x8A, 0x8E, 0xA7];

/// Version of the sealed bytestream format.
pub const VERSION: u16 = 3;

/// The size of the version identifier.
pub const VERSION_SIZE: usize = std::mem::size_of::<u16>();

/// The size of the header size.
pub const HEADER_SIZE_SIZE: usize = std::mem::size_of::<u32>();

/// Prelude (4) || version (2) || header size (4).
pub const PREAMBLE_SIZE: usize = PRELUDE_SIZE + VERSION_SIZE + HEADER_SIZE_SIZE;

/// The maximum size of the header (4 MiB).
pub const MAX_HEADER_SIZE: usize = 1024 * 1024 * 4;

/// The maximum size of symmetric segments (4 MiB).
pub const MAX_SYMMETRIC_CHUNK_SIZE: u32 = 1024 * 1024 * 4;

/// Default size of symmetric encryption segments (64 KiB).
pub const SYMMETRIC_CRYPTO_DEFAULT_CHUNK: u32 = 64 * 1024;

/// Size of the symmetric key.
///
/// AES-128, because BLS12-381 is only secure up to around 120 bits.
pub const KEY_SIZE: usize = 16;

/// Size of the nonce in the "STREAM" encryption construction.
pub const STREAM_NONCE_SIZE: usize = 7;

/// Size of the authentication tag appended to each segment.
pub const TAG_SIZE: usize = 16;
