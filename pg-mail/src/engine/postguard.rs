//! The PostGuard engine: multi-recipient IBE key encapsulation with a streaming AEAD payload.
//!
//! Wire format, with sizes in bytes:
//!
//! ```text
//! PRELUDE (4) || VERSION (2) || HEADER LEN (4) || HEADER (*) || PAYLOAD (*)
//! ```
//!
//! The header is bincode. For every recipient it holds the hidden policy and a ciphertext of
//! the shared secret under the identity derived from the full policy. The payload is
//! AES-128-GCM in the STREAM construction, in segments of `segment_size` bytes plus a tag,
//! always ending in a (possibly empty) last segment.

use std::collections::BTreeMap;

use aead::stream::{DecryptorBE32, EncryptorBE32};
use aead::KeyInit;
use aes_gcm::Aes128Gcm;
use futures::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use ibe::kem::cgw_kv::CGWKV;
use ibe::kem::mkem::MultiRecipient;
use ibe::kem::{SharedSecret, IBKEM};
use log::debug;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::artifacts::{deserialize_bin_or_b64, serialize_bin_or_b64};
use crate::artifacts::{MultiRecipientCiphertext, PublicKey, UserSecretKey};
use crate::consts::*;
use crate::engine::{Engine, Unseal};
use crate::error::Error;
use crate::identity::{EncryptionPolicy, HiddenPolicy, Policy};

/// An initialization vector.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub struct Iv<const N: usize>(pub [u8; N]);

impl<const N: usize> Iv<N> {
    fn random<R: RngCore + CryptoRng>(r: &mut R) -> Self {
        let mut buf = [0u8; N];
        r.fill_bytes(&mut buf);
        Self(buf)
    }
}

impl<const N: usize> Serialize for Iv<N> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serialize_bin_or_b64(&self.0, serializer)
    }
}

impl<'de, const N: usize> Deserialize<'de> for Iv<N> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let mut buf = [0u8; N];
        deserialize_bin_or_b64(&mut buf, deserializer)?;

        Ok(Self(buf))
    }
}

/// The symmetric algorithm of the payload.
#[derive(Serialize, Deserialize, Debug, Eq, PartialEq, Clone, Copy)]
pub enum Algorithm {
    /// AES-128-GCM in the STREAM construction, with a 7-byte nonce prefix.
    Aes128GcmStream(Iv<STREAM_NONCE_SIZE>),
}

/// The per-recipient part of the header.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RecipientHeader {
    /// The hidden policy of the recipient.
    #[serde(rename = "p")]
    pub policy: HiddenPolicy,

    /// The encapsulated shared secret.
    pub ct: MultiRecipientCiphertext<CGWKV>,
}

impl RecipientHeader {
    fn decaps(&self, usk: &UserSecretKey<CGWKV>) -> Result<SharedSecret, Error> {
        CGWKV::multi_decaps(None, &usk.0, &self.ct.0).map_err(|_e| Error::KEM)
    }
}

/// The header of a sealed bytestream.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Header {
    /// Recipient identifier to recipient header.
    #[serde(rename = "rs")]
    pub recipients: BTreeMap<String, RecipientHeader>,

    /// The payload algorithm.
    pub algo: Algorithm,

    /// Size of the payload segments, excluding the tag.
    pub segment_size: u32,
}

impl Header {
    fn new<R: RngCore + CryptoRng>(
        pk: &PublicKey<CGWKV>,
        policies: &EncryptionPolicy,
        segment_size: u32,
        rng: &mut R,
    ) -> Result<(Self, SharedSecret), Error> {
        if policies.is_empty() {
            return Err(Error::ConstraintViolation);
        }

        let ids = policies
            .values()
            .map(Policy::derive_kem::<CGWKV>)
            .collect::<Result<Vec<<CGWKV as IBKEM>::Id>, _>>()?;

        let (cts, ss) = CGWKV::multi_encaps(&pk.0, &ids[..], rng);

        let recipients = policies
            .iter()
            .zip(cts)
            .map(|((rid, policy), ct)| {
                (
                    rid.clone(),
                    RecipientHeader {
                        policy: policy.to_hidden(),
                        ct: MultiRecipientCiphertext(ct),
                    },
                )
            })
            .collect();

        Ok((
            Header {
                recipients,
                algo: Algorithm::Aes128GcmStream(Iv::random(rng)),
                segment_size,
            },
            ss,
        ))
    }

    fn into_bytes(self) -> Result<Vec<u8>, Error> {
        Ok(bincode::serialize(&self)?)
    }

    fn from_bytes(b: &[u8]) -> Result<Self, Error> {
        let header: Header = bincode::deserialize(b)?;

        if header.segment_size == 0 || header.segment_size > MAX_SYMMETRIC_CHUNK_SIZE {
            return Err(Error::ConstraintViolation);
        }

        Ok(header)
    }
}

fn preamble_checked(preamble: &[u8; PREAMBLE_SIZE]) -> Result<(u16, usize), Error> {
    if preamble[..PRELUDE_SIZE] != PRELUDE {
        return Err(Error::NotPostGuard);
    }

    let version = u16::from_be_bytes(
        preamble[PRELUDE_SIZE..PRELUDE_SIZE + VERSION_SIZE].try_into()?,
    );

    if version != VERSION {
        return Err(Error::IncorrectVersion {
            expected: VERSION,
            found: version,
        });
    }

    let header_len =
        u32::from_be_bytes(preamble[PRELUDE_SIZE + VERSION_SIZE..PREAMBLE_SIZE].try_into()?)
            as usize;

    if header_len > MAX_HEADER_SIZE {
        return Err(Error::ConstraintViolation);
    }

    Ok((version, header_len))
}

/// The PostGuard engine, sealing under the master public key of a PKG.
#[derive(Debug, Clone)]
pub struct PostGuard {
    pk: PublicKey<CGWKV>,
    segment_size: u32,
}

impl PostGuard {
    /// Create an engine for the master public key `pk`.
    pub fn new(pk: PublicKey<CGWKV>) -> Self {
        PostGuard {
            pk,
            segment_size: SYMMETRIC_CRYPTO_DEFAULT_CHUNK,
        }
    }

    /// Use a different payload segment size.
    pub fn with_segment_size(mut self, segment_size: u32) -> Self {
        self.segment_size = segment_size.clamp(1, MAX_SYMMETRIC_CHUNK_SIZE);
        self
    }
}

impl Engine for PostGuard {
    type Key = UserSecretKey<CGWKV>;
    type Unsealer<R: AsyncRead + Unpin> = Unsealer<R>;

    async fn seal<R, W>(&self, policies: &EncryptionPolicy, mut r: R, mut w: W) -> Result<(), Error>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let (header, ss) = {
            let mut rng = rand::thread_rng();
            Header::new(&self.pk, policies, self.segment_size, &mut rng)?
        };

        let Algorithm::Aes128GcmStream(iv) = header.algo;
        let segment_size = header.segment_size as usize;

        debug!(
            "sealing for {} recipient(s), segments of {segment_size} bytes",
            header.recipients.len()
        );

        let header_vec = header.into_bytes()?;

        w.write_all(&PRELUDE).await?;
        w.write_all(&VERSION.to_be_bytes()).await?;
        w.write_all(&u32::try_from(header_vec.len())?.to_be_bytes())
            .await?;
        w.write_all(&header_vec[..]).await?;

        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&ss.0[..KEY_SIZE]);

        let aead = Aes128Gcm::new(&key.into());
        let mut enc = EncryptorBE32::from_aead(aead, &iv.0.into());

        let mut buf = vec![0u8; segment_size];
        let mut buf_tail: usize = 0;

        buf.reserve(TAG_SIZE);

        loop {
            let read = r.read(&mut buf[buf_tail..segment_size]).await?;
            buf_tail += read;

            if buf_tail == segment_size {
                buf.truncate(buf_tail);
                enc.encrypt_next_in_place(b"", &mut buf)?;
                w.write_all(&buf[..]).await?;

                buf_tail = 0;
                buf.resize(segment_size, 0);
            } else if read == 0 {
                buf.truncate(buf_tail);
                enc.encrypt_last_in_place(b"", &mut buf)?;
                w.write_all(&buf[..]).await?;
                break;
            }
        }

        w.close().await?;

        Ok(())
    }

    async fn unsealer<R>(&self, r: R) -> Result<Unsealer<R>, Error>
    where
        R: AsyncRead + Unpin,
    {
        Unsealer::new(r).await
    }
}

/// An opened PostGuard bytestream, positioned at the payload.
#[derive(Debug)]
pub struct Unsealer<R> {
    /// The format version.
    pub version: u16,

    /// The header.
    pub header: Header,

    r: R,
}

impl<R> Unsealer<R>
where
    R: AsyncRead + Unpin,
{
    /// Read the preamble and the header of `r`.
    ///
    /// Errors if the bytestream is not a PostGuard bytestream of the supported version.
    pub async fn new(mut r: R) -> Result<Self, Error> {
        let mut preamble = [0u8; PREAMBLE_SIZE];
        r.read_exact(&mut preamble)
            .await
            .map_err(|e| match Error::from(e) {
                Error::RelayCancelled => Error::RelayCancelled,
                _ => Error::NotPostGuard,
            })?;

        let (version, header_len) = preamble_checked(&preamble)?;

        let mut header_raw = vec![0u8; header_len];
        r.read_exact(&mut header_raw)
            .await
            .map_err(|e| match Error::from(e) {
                Error::RelayCancelled => Error::RelayCancelled,
                _ => Error::FormatViolation("header".to_string()),
            })?;

        let header = Header::from_bytes(&header_raw)?;

        Ok(Unsealer { version, header, r })
    }
}

impl<R> Unseal for Unsealer<R>
where
    R: AsyncRead + Unpin,
{
    type Key = UserSecretKey<CGWKV>;

    fn hidden_policies(&self) -> BTreeMap<String, HiddenPolicy> {
        self.header
            .recipients
            .iter()
            .map(|(id, rh)| (id.clone(), rh.policy.clone()))
            .collect()
    }

    async fn unseal<W>(mut self, ident: &str, usk: &Self::Key, mut w: W) -> Result<(), Error>
    where
        W: AsyncWrite + Unpin,
    {
        let rec_info = self
            .header
            .recipients
            .get(ident)
            .ok_or_else(|| Error::UnknownIdentifier(ident.to_string()))?;

        let ss = rec_info.decaps(usk)?;

        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&ss.0[..KEY_SIZE]);

        let aead = Aes128Gcm::new(&key.into());
        let Algorithm::Aes128GcmStream(iv) = self.header.algo;
        let mut dec = DecryptorBE32::from_aead(aead, &iv.0.into());

        let bufsize: usize = self.header.segment_size as usize + TAG_SIZE;
        let mut buf = vec![0u8; bufsize];
        let mut buf_tail = 0;

        loop {
            let read = self.r.read(&mut buf[buf_tail..bufsize]).await?;
            buf_tail += read;

            if buf_tail == bufsize {
                dec.decrypt_next_in_place(b"", &mut buf)?;
                w.write_all(&buf[..]).await?;

                buf_tail = 0;
                buf.resize(bufsize, 0);
            } else if read == 0 {
                buf.truncate(buf_tail);
                dec.decrypt_last_in_place(b"", &mut buf)?;
                w.write_all(&buf[..]).await?;
                break;
            }
        }

        w.close().await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::TestSetup;
    use futures::executor::block_on;
    use futures::io::Cursor;

    const SEGMENT: u32 = 1024;

    const LENGTHS: &[u32] = &[
        0,
        1,
        512,
        SEGMENT - 3,
        SEGMENT,
        SEGMENT + 3,
        3 * SEGMENT,
        3 * SEGMENT + 16,
        3 * SEGMENT - 17,
    ];

    fn engine(setup: &TestSetup) -> PostGuard {
        PostGuard::new(setup.ibe_pk.clone()).with_segment_size(SEGMENT)
    }

    fn seal_helper(setup: &TestSetup, plain: &[u8]) -> Vec<u8> {
        let mut sealed = Vec::new();
        block_on(engine(setup).seal(&setup.policy, Cursor::new(plain), &mut sealed)).unwrap();
        sealed
    }

    fn unseal_helper(setup: &TestSetup, ct: &[u8], id: &str) -> Result<Vec<u8>, Error> {
        let usk = &setup.usks[id];
        let mut original = Vec::new();

        block_on(async {
            engine(setup)
                .unsealer(Cursor::new(ct))
                .await?
                .unseal(id, usk, &mut original)
                .await
        })?;

        Ok(original)
    }

    fn rand_vec(length: usize) -> Vec<u8> {
        let mut vec = vec![0u8; length];
        rand::thread_rng().fill_bytes(&mut vec);
        vec
    }

    #[test]
    fn test_reflection_seal_unseal() {
        let setup = TestSetup::default();

        for l in LENGTHS {
            let plain = rand_vec(*l as usize);
            let ct = seal_helper(&setup, &plain);

            for id in ["bob@example.com", "charlie@example.com"] {
                assert_eq!(unseal_helper(&setup, &ct, id).unwrap(), plain);
            }
        }
    }

    #[tokio::test]
    async fn test_hidden_policies() {
        let setup = TestSetup::default();
        let ct = seal_helper(&setup, b"SECRET DATA");

        let unsealer = engine(&setup).unsealer(Cursor::new(ct)).await.unwrap();
        assert_eq!(unsealer.version, VERSION);

        let hidden = unsealer.hidden_policies();
        assert_eq!(hidden.len(), 2);
        assert_eq!(
            hidden["bob@example.com"],
            setup.policy["bob@example.com"].to_hidden()
        );
    }

    #[test]
    fn test_corrupt_body() {
        let setup = TestSetup::default();

        let plain = rand_vec(100);
        let mut ct = seal_helper(&setup, &plain);

        let ct_len = ct.len();
        ct[ct_len - TAG_SIZE - 5] = !ct[ct_len - TAG_SIZE - 5];

        assert!(matches!(
            unseal_helper(&setup, &ct, "bob@example.com"),
            Err(Error::Symmetric)
        ));
    }

    #[test]
    fn test_truncated_stream() {
        let setup = TestSetup::default();

        let plain = rand_vec(3 * SEGMENT as usize);
        let ct = seal_helper(&setup, &plain);

        // Drop the last segment, the stream must not look complete.
        let cut = &ct[..ct.len() - TAG_SIZE];
        assert!(unseal_helper(&setup, cut, "bob@example.com").is_err());
    }

    #[test]
    fn test_unknown_recipient() {
        let setup = TestSetup::default();
        let ct = seal_helper(&setup, b"SECRET DATA");

        let usk = &setup.usks["bob@example.com"];
        let res = block_on(async {
            engine(&setup)
                .unsealer(Cursor::new(ct))
                .await?
                .unseal("mallory@example.com", usk, Vec::<u8>::new())
                .await
        });

        assert!(matches!(res, Err(Error::UnknownIdentifier(_))));
    }

    #[test]
    fn test_wrong_key() {
        let setup = TestSetup::default();
        let ct = seal_helper(&setup, b"SECRET DATA");

        // Charlie's key does not open Bob's ciphertext.
        let usk = &setup.usks["charlie@example.com"];
        let res = block_on(async {
            engine(&setup)
                .unsealer(Cursor::new(ct))
                .await?
                .unseal("bob@example.com", usk, Vec::<u8>::new())
                .await
        });

        assert!(res.is_err());
    }

    #[test]
    fn test_not_postguard() {
        let setup = TestSetup::default();

        let res = block_on(engine(&setup).unsealer(Cursor::new(b"Hello, this is plain text")));
        assert!(matches!(res, Err(Error::NotPostGuard)));

        let res = block_on(engine(&setup).unsealer(Cursor::new(&PRELUDE[..])));
        assert!(matches!(res, Err(Error::NotPostGuard)));

        let mut wrong_version = seal_helper(&setup, b"x");
        wrong_version[PRELUDE_SIZE + 1] ^= 0xFF;
        let res = block_on(engine(&setup).unsealer(Cursor::new(wrong_version)));
        assert!(matches!(res, Err(Error::IncorrectVersion { .. })));
    }

    #[test]
    fn test_no_recipients() {
        let setup = TestSetup::default();
        let res = block_on(engine(&setup).seal(
            &EncryptionPolicy::new(),
            Cursor::new(b"x"),
            Vec::<u8>::new(),
        ));

        assert!(matches!(res, Err(Error::ConstraintViolation)));
    }
}
