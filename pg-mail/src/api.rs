//! Definitions of the PostGuard protocol REST API, as far as mail sealing needs it.

use crate::error::Error;
use crate::identity::Attribute;
use irma::{ProofStatus, SessionStatus};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

/// The public parameters of the Private Key Generator (PKG).
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameters<T> {
    /// The formatting version of the Master Public Key.
    pub format_version: u8,

    /// The Master Public Key.
    pub public_key: T,
}

/// An authentication request for a IRMA identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IrmaAuthRequest {
    /// The conjunction of [`Attribute`].
    pub con: Vec<Attribute>,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// The validity (in seconds) of the JWT response.
    pub validity: Option<u64>,
}

/// The key response from the Private Key Generator (PKG).
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyResponse<T> {
    /// The status of the session.
    pub status: SessionStatus,

    /// The status of the IRMA proof.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof_status: Option<ProofStatus>,

    /// The key will remain `None` until the status is `Done` and the proof is `Valid`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<T>,
}

/// The claims of an authorization artifact (a JWT signed by the IRMA server) that a client
/// looks at.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactClaims {
    /// Expiry (UNIX time).
    pub exp: u64,

    /// The status of the session that produced the artifact.
    pub status: SessionStatus,

    /// Only present when the session is a finished disclosure session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof_status: Option<ProofStatus>,
}

impl ArtifactClaims {
    /// Reads the claims of an artifact.
    ///
    /// The signature is not checked: the artifact is only ever forwarded to the PKG, which
    /// verifies it. Expiry is not validated either, callers compare `exp` themselves.
    pub fn decode(jwt: &str) -> Result<Self, Error> {
        let mut validation = Validation::default();
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        let data = decode::<ArtifactClaims>(jwt, &DecodingKey::from_secret(&[]), &validation)
            .map_err(|e| Error::FormatViolation(format!("artifact ({e})")))?;

        Ok(data.claims)
    }

    /// Whether the session finished with a valid proof.
    pub fn is_valid(&self) -> bool {
        matches!(
            (&self.status, &self.proof_status),
            (SessionStatus::Done, Some(ProofStatus::Valid))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    #[test]
    fn test_decode_claims_unverified() {
        let claims = ArtifactClaims {
            exp: 1_700_000_000,
            status: SessionStatus::Done,
            proof_status: Some(ProofStatus::Valid),
        };

        let jwt = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"some server secret"),
        )
        .unwrap();

        let decoded = ArtifactClaims::decode(&jwt).unwrap();
        assert_eq!(decoded.exp, 1_700_000_000);
        assert!(decoded.is_valid());
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(
            ArtifactClaims::decode("not.a.jwt"),
            Err(Error::FormatViolation(_))
        ));
    }

    #[test]
    fn test_auth_request_json() {
        let req = IrmaAuthRequest {
            con: vec![Attribute::new(
                "pbdf.sidn-pbdf.email.email",
                Some("bob@example.com"),
            )],
            validity: None,
        };

        assert_eq!(
            serde_json::to_string(&req).unwrap(),
            r#"{"con":[{"t":"pbdf.sidn-pbdf.email.email","v":"bob@example.com"}]}"#
        );
    }
}
