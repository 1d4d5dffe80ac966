//! Identity definitions and utilities.

use std::collections::BTreeMap;

use crate::consts::EMAIL_ATTRIBUTE_TYPE;
use crate::error::Error;
use ibe::kem::IBKEM;
use ibe::Derive;
use serde::{Deserialize, Serialize};
use tiny_keccak::{Hasher, Sha3};

const IDENTITY_UNSET: u64 = u64::MAX;
const MAX_CON: usize = (IDENTITY_UNSET as usize - 1) >> 1;
const AMOUNT_CHARS_TO_HIDE: usize = 4;
const HINT_TYPES: &[&str] = &[
    "pbdf.sidn-pbdf.mobilenumber.mobilenumber",
    "pbdf.pbdf.surfnet-2.id",
    "pbdf.nuts.agb.agbcode",
    "irma-demo.sidn-pbdf.mobilenumber.mobilenumber",
    "irma-demo.nuts.agb.agbcode",
];

/// The complete encryption policy for all recipients, keyed by canonical e-mail address.
pub type EncryptionPolicy = BTreeMap<String, Policy>;

/// An attribute request, the building block of a conjunction.
///
/// The attributes derive [`Ord`] by type, then value. This ordering is the canonical order of a
/// conjunction, both for identity derivation and for cache keys.
#[derive(Serialize, Deserialize, Debug, Ord, PartialOrd, PartialEq, Eq, Clone, Default, Hash)]
pub struct Attribute {
    /// Attribute type.
    #[serde(rename = "t")]
    pub atype: String,

    /// Attribute value. `None` means any value of this type.
    #[serde(rename = "v")]
    pub value: Option<String>,
}

/// A policy used to encapsulate a shared secret for one recipient.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Default)]
pub struct Policy {
    /// Timestamp (UNIX time).
    #[serde(rename = "ts")]
    pub timestamp: u64,

    /// A conjunction of attributes.
    pub con: Vec<Attribute>,
}

/// A hidden policy.
///
/// A policy where (part of) the value of the attributes is hidden.
/// This type is safe to store in a public header alongside the ciphertext.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Default)]
pub struct HiddenPolicy {
    /// Timestamp (UNIX time).
    #[serde(rename = "ts")]
    pub timestamp: u64,

    /// A conjunction of attributes, with redacted values.
    pub con: Vec<Attribute>,
}

impl Attribute {
    /// Construct a new attribute request.
    pub fn new(atype: &str, value: Option<&str>) -> Self {
        let atype = atype.to_string();
        let value = value.map(|s| s.to_string());

        Attribute { atype, value }
    }

    /// Whether this attribute asserts an e-mail address.
    pub fn is_email(&self) -> bool {
        self.atype == EMAIL_ATTRIBUTE_TYPE
    }

    fn hintify_value(&self) -> Attribute {
        let hidden_value = self.value.as_ref().map(|v| {
            if HINT_TYPES.contains(&&self.atype[..]) {
                let split = v
                    .char_indices()
                    .rev()
                    .nth(AMOUNT_CHARS_TO_HIDE - 1)
                    .map_or(0, |(i, _)| i);
                let (begin, end) = v.split_at(split);
                format!("{begin}{}", "*".repeat(end.chars().count()))
            } else {
                "".to_string()
            }
        });

        Attribute {
            atype: self.atype.clone(),
            value: hidden_value,
        }
    }
}

impl Policy {
    /// Completely hides the attribute value, or provides a hint for certain attribute types
    pub fn to_hidden(&self) -> HiddenPolicy {
        HiddenPolicy {
            timestamp: self.timestamp,
            con: self.con.iter().map(Attribute::hintify_value).collect(),
        }
    }

    /// Derives an 64-byte identity from a [`Policy`].
    pub fn derive(&self) -> Result<[u8; 64], Error> {
        // Domain separation, for a sorted conjunction con[0..n - 1] and a timestamp:
        // = H(0 || f_0 || f'_0 ||  .. || f_{n-1} || f'_{n-1} || timestamp),
        // where f_i  = H(2i + 1 || a.typ.len() || a.typ),
        // and   f'_i = H(2i + 2 || a.val.len() || a.val).
        //
        // Lengths are encoded as u64, usize is not platform-agnostic.

        if self.con.len() > MAX_CON {
            return Err(Error::ConstraintViolation);
        }

        let mut tmp = [0u8; 64];
        let mut pre_h = Sha3::v512();

        // 0 indicates the IRMA authentication method.
        pre_h.update(&[0x00]);

        let mut copy = self.con.clone();
        copy.sort();

        for (i, ar) in copy.iter().enumerate() {
            let mut f = Sha3::v512();

            f.update(&((2 * i + 1) as u64).to_be_bytes());
            let at_bytes = ar.atype.as_bytes();
            f.update(&(at_bytes.len() as u64).to_be_bytes());
            f.update(at_bytes);
            f.finalize(&mut tmp);

            pre_h.update(&tmp);

            f = Sha3::v512();
            f.update(&((2 * i + 2) as u64).to_be_bytes());

            match &ar.value {
                None => f.update(&IDENTITY_UNSET.to_be_bytes()),
                Some(val) => {
                    let val_bytes = val.as_bytes();
                    f.update(&(val_bytes.len() as u64).to_be_bytes());
                    f.update(val_bytes);
                }
            }

            f.finalize(&mut tmp);
            pre_h.update(&tmp);
        }

        pre_h.update(&self.timestamp.to_be_bytes());
        let mut res = [0u8; 64];
        pre_h.finalize(&mut res);

        Ok(res)
    }

    /// Derive a KEM identity from a [`Policy`].
    pub fn derive_kem<K: IBKEM>(&self) -> Result<<K as IBKEM>::Id, Error> {
        Ok(<K as IBKEM>::Id::derive(&self.derive()?))
    }
}

impl HiddenPolicy {
    /// Turns the hidden policy found in a header into the policy the local identity has to
    /// prove.
    ///
    /// E-mail attributes are bound to `local`, so the session asks for that specific address
    /// instead of any address. All other attributes become wildcards: their hidden values are
    /// hints for display, not values that can be proven.
    pub fn resolve(&self, local: &str) -> Policy {
        let con = self
            .con
            .iter()
            .map(|a| {
                if a.is_email() {
                    Attribute::new(&a.atype, Some(&local.to_lowercase()))
                } else {
                    Attribute::new(&a.atype, None)
                }
            })
            .collect();

        Policy {
            timestamp: self.timestamp,
            con,
        }
    }

    /// The attributes with a non-empty hint, for display.
    pub fn hints(&self) -> Vec<Attribute> {
        self.con
            .iter()
            .filter(|a| a.value.as_deref().map_or(false, |v| !v.is_empty()))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::identity::{Attribute, HiddenPolicy, Policy};
    use crate::test::TestSetup;
    use ibe::kem::cgw_kv::CGWKV;

    #[test]
    fn test_ordering() {
        let mut rng = rand::thread_rng();
        // Semantically equivalent policies map to the same IBE identity.
        let setup = TestSetup::new(&mut rng);

        let policies: Vec<Policy> = setup.policy.into_values().collect();
        let p1_derived = policies[1].derive_kem::<CGWKV>().unwrap();

        let mut reversed = policies[1].clone();
        reversed.con.reverse();
        assert_eq!(&p1_derived, &reversed.derive_kem::<CGWKV>().unwrap());

        // The timestamp matters.
        reversed.timestamp += 1;
        assert_ne!(&p1_derived, &reversed.derive_kem::<CGWKV>().unwrap());
    }

    #[test]
    fn test_hints() {
        let attr = Attribute::new(
            "pbdf.sidn-pbdf.mobilenumber.mobilenumber",
            Some("123456789"),
        );
        assert_eq!(attr.hintify_value().value, Some("12345****".to_string()));

        let attr_short = Attribute::new("pbdf.sidn-pbdf.mobilenumber.mobilenumber", Some("123"));
        assert_eq!(attr_short.hintify_value().value, Some("***".to_string()));

        // Characters, not bytes, are hidden.
        let attr_utf8 = Attribute::new("pbdf.pbdf.surfnet-2.id", Some("s1234ĳĳéé"));
        assert_eq!(attr_utf8.hintify_value().value, Some("s1234****".to_string()));

        let attr_not_whitelisted =
            Attribute::new("pbdf.sidn-pbdf.mobilenumber.test", Some("123456789"));
        assert_eq!(attr_not_whitelisted.hintify_value().value, Some("".to_string()));
    }

    #[test]
    fn test_resolve_wildcard_email() {
        let hidden = HiddenPolicy {
            timestamp: 1566722350,
            con: vec![Attribute::new("pbdf.sidn-pbdf.email.email", None)],
        };

        let resolved = hidden.resolve("Bob@Example.com");
        assert_eq!(
            resolved.con,
            vec![Attribute::new(
                "pbdf.sidn-pbdf.email.email",
                Some("bob@example.com")
            )]
        );
        assert_eq!(resolved.timestamp, 1566722350);
    }

    #[test]
    fn test_resolve_matches_sealed_policy() {
        let mut rng = rand::thread_rng();
        let setup = TestSetup::new(&mut rng);

        // Bob's policy is name + email. After hiding, only the email can be restored, the name
        // becomes a wildcard that the session lets Bob disclose.
        let bob = &setup.policy["bob@example.com"];
        let hidden = bob.to_hidden();
        let resolved = hidden.resolve("bob@example.com");

        let email = resolved.con.iter().find(|a| a.is_email()).unwrap();
        assert_eq!(email.value.as_deref(), Some("bob@example.com"));
        assert!(resolved.con.iter().filter(|a| !a.is_email()).all(|a| a.value.is_none()));
        assert!(hidden.hints().is_empty());
    }

    #[test]
    fn test_regression() {
        let mut rng = rand::thread_rng();
        let setup = TestSetup::new(&mut rng);

        // The policies in the TestSetup map to fixed KEM identities.
        let kem_ids: [[u8; 64]; 5] = [
            [
                243, 215, 91, 185, 176, 144, 186, 190, 101, 135, 237, 186, 47, 183, 76, 243, 182,
                195, 213, 35, 18, 38, 203, 7, 53, 157, 78, 193, 99, 141, 169, 0, 13, 112, 111, 32,
                172, 75, 5, 106, 165, 47, 53, 111, 177, 2, 8, 107, 242, 252, 49, 241, 67, 229, 5,
                191, 13, 17, 246, 216, 119, 186, 227, 119,
            ],
            [
                245, 162, 197, 104, 15, 166, 248, 109, 79, 173, 252, 30, 92, 165, 193, 237, 255,
                228, 162, 5, 42, 227, 151, 207, 97, 134, 20, 41, 20, 142, 220, 5, 234, 222, 45,
                199, 163, 191, 112, 167, 52, 193, 120, 143, 245, 8, 24, 46, 8, 77, 183, 255, 32,
                196, 251, 247, 233, 114, 16, 114, 69, 19, 88, 105,
            ],
            [
                55, 240, 138, 50, 172, 20, 36, 194, 154, 137, 247, 125, 112, 215, 118, 219, 172,
                226, 21, 87, 116, 226, 44, 228, 62, 148, 86, 82, 119, 154, 209, 89, 219, 49, 115,
                130, 187, 57, 252, 108, 239, 118, 210, 165, 13, 53, 96, 200, 55, 211, 229, 32, 59,
                140, 234, 87, 124, 64, 128, 223, 6, 248, 172, 238,
            ],
            [
                224, 26, 15, 201, 109, 47, 252, 119, 219, 216, 15, 186, 65, 123, 47, 131, 130, 196,
                248, 145, 241, 235, 13, 216, 182, 74, 236, 81, 198, 67, 28, 7, 114, 158, 252, 90,
                123, 131, 138, 155, 56, 93, 46, 93, 160, 8, 72, 122, 193, 229, 123, 36, 69, 50,
                189, 38, 183, 208, 7, 102, 249, 33, 219, 46,
            ],
            [
                199, 241, 225, 34, 158, 92, 56, 128, 249, 122, 93, 192, 132, 106, 3, 247, 209, 109,
                66, 92, 203, 108, 184, 198, 208, 254, 255, 150, 116, 17, 225, 112, 114, 121, 189,
                231, 19, 215, 46, 246, 250, 211, 61, 254, 172, 44, 242, 18, 170, 49, 37, 56, 140,
                217, 127, 97, 247, 210, 224, 181, 220, 246, 126, 140,
            ],
        ];

        for (p, kem) in setup.policies.iter().zip(kem_ids.iter()) {
            let kem2 = p.derive_kem::<CGWKV>().unwrap();
            assert_eq!(&kem[..], &kem2.0);
        }
    }
}
