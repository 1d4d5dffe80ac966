//! Artifacts of the PostGuard protocol.
//!
//! This module implements constant-time serde serialization and deserialization for the KEM
//! artifacts: binary for the header, base64 for the JSON exchanged with the PKG.

use base64ct::{Base64, Encoding};
use core::fmt;
use ibe::{
    kem::{cgw_kv::CGWKV, mkem::MultiRecipientCiphertext as MkemCt, IBKEM},
    Compress,
};
use serde::de::{Error, SeqAccess, Visitor};
use serde::{ser::SerializeTuple, Deserialize, Deserializer, Serialize, Serializer};

// Computes the byte length of raw bytes encoded in (padded) b64.
const fn b64len(raw_len: usize) -> usize {
    (((raw_len - 1) / 3) + 1) * 4
}

pub(crate) fn serialize_bin_or_b64<S, T>(val: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    T: AsRef<[u8]>,
{
    if serializer.is_human_readable() {
        let mut enc_buf = vec![0u8; b64len(val.as_ref().len())];
        let encoded = Base64::encode(val.as_ref(), &mut enc_buf)
            .map_err(|e| serde::ser::Error::custom(format!("base64ct serialization error: {e}")))?;
        serializer.serialize_str(encoded)
    } else {
        let mut seq = serializer.serialize_tuple(val.as_ref().len())?;
        for b in val.as_ref() {
            seq.serialize_element(b)?;
        }
        seq.end()
    }
}

pub(crate) fn deserialize_bin_or_b64<'de, D: Deserializer<'de>>(
    buf: &mut [u8],
    deserializer: D,
) -> Result<(), D::Error> {
    if deserializer.is_human_readable() {
        struct StrVisitor<'b>(&'b mut [u8]);

        impl<'de> Visitor<'de> for StrVisitor<'_> {
            type Value = ();

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(formatter, "a string of length {}", b64len(self.0.len()))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: Error,
            {
                if v.len() != b64len(self.0.len()) {
                    return Err(Error::invalid_length(v.len(), &self));
                }

                Base64::decode(v, self.0).map_err(|e| {
                    serde::de::Error::custom(format!("base64ct decoding error: {e}"))
                })?;

                Ok(())
            }
        }

        deserializer.deserialize_str(StrVisitor(buf))
    } else {
        struct ArrayVisitor<'b>(&'b mut [u8]);

        impl<'de> Visitor<'de> for ArrayVisitor<'_> {
            type Value = ();

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(formatter, "an array of length {}", self.0.len())
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: SeqAccess<'de>,
            {
                for (index, byte) in self.0.iter_mut().enumerate() {
                    *byte = match seq.next_element()? {
                        Some(byte) => byte,
                        None => return Err(Error::invalid_length(index, &self)),
                    };
                }

                Ok(())
            }
        }

        deserializer.deserialize_tuple(buf.len(), ArrayVisitor(buf))
    }
}

/// Master public keys.
#[derive(Debug)]
pub struct PublicKey<K: IBKEM>(pub K::Pk);

/// Master secret keys, only held by a PKG.
#[derive(Debug)]
pub struct SecretKey<K: IBKEM>(pub K::Sk);

/// User secret keys.
#[derive(Debug)]
pub struct UserSecretKey<K: IBKEM>(pub K::Usk);

/// Multi-recipient ciphertexts.
#[derive(Debug)]
pub struct MultiRecipientCiphertext<K: IBKEM>(pub MkemCt<K>);

// Derived impls would require the scheme marker itself to be `Clone`.
macro_rules! impl_clone {
    ($type: ident, $inner: ty) => {
        impl<K: IBKEM> Clone for $type<K>
        where
            $inner: Clone,
        {
            fn clone(&self) -> Self {
                Self(self.0.clone())
            }
        }
    };
}

impl_clone!(PublicKey, K::Pk);
impl_clone!(SecretKey, K::Sk);
impl_clone!(UserSecretKey, K::Usk);
impl_clone!(MultiRecipientCiphertext, MkemCt<K>);

// The impls cannot be generic over the scheme: the buffer size is a constant expression that
// depends on a generic parameter (rust-lang/rust#68436).
macro_rules! impl_serialize {
    ($type: ty, $inner: ty) => {
        impl Serialize for $type {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serialize_bin_or_b64(&self.0.to_bytes(), serializer)
            }
        }

        impl<'de> Deserialize<'de> for $type {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let mut buf = [0u8; <$inner as Compress>::OUTPUT_SIZE];
                deserialize_bin_or_b64(&mut buf, deserializer)?;

                let artifact: Option<$inner> = <$inner as Compress>::from_bytes(&buf).into();
                let artifact = artifact.ok_or_else(|| {
                    serde::de::Error::custom(format!("not a valid {}", stringify!($type)))
                })?;

                Ok(Self(artifact))
            }
        }
    };
}

impl_serialize!(PublicKey<CGWKV>, <CGWKV as IBKEM>::Pk);
impl_serialize!(SecretKey<CGWKV>, <CGWKV as IBKEM>::Sk);
impl_serialize!(UserSecretKey<CGWKV>, <CGWKV as IBKEM>::Usk);
impl_serialize!(MultiRecipientCiphertext<CGWKV>, MkemCt<CGWKV>);
