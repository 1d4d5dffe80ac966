//! Test helpers.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use ibe::kem::cgw_kv::CGWKV;
use ibe::kem::IBKEM;
use irma::{ProofStatus, SessionStatus};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::{CryptoRng, Rng};
use serde::{Deserialize, Serialize};

use crate::api::KeyResponse;
use crate::artifacts::{PublicKey, SecretKey, UserSecretKey};
use crate::consts::DEFAULT_VALIDITY;
use crate::error::Error;
use crate::identity::{Attribute, EncryptionPolicy, Policy};
use crate::popup::PopupPort;
use crate::session::{KeyService, Surface};
use crate::util::now;

/// A test setup.
#[derive(Debug)]
pub struct TestSetup {
    /// The encryption public key.
    pub ibe_pk: PublicKey<CGWKV>,

    /// The master secret key, for issuing more keys.
    pub ibe_sk: SecretKey<CGWKV>,

    /// All policies.
    pub policies: Vec<Policy>,

    /// USKs for the recipients of `policy`.
    pub usks: BTreeMap<String, UserSecretKey<CGWKV>>,

    /// An example encryption policy.
    pub policy: EncryptionPolicy,
}

impl Default for TestSetup {
    fn default() -> Self {
        Self::new(&mut rand::thread_rng())
    }
}

impl TestSetup {
    /// Create a new test setup.
    pub fn new<R: Rng + CryptoRng>(rng: &mut R) -> Self {
        let (pk, sk) = CGWKV::setup(rng);

        // Some example policies.
        let policies = vec![
            // Alice just email
            Policy {
                timestamp: 1566722350,
                con: vec![Attribute::new(
                    "pbdf.sidn-pbdf.email.email",
                    Some("alice@example.com"),
                )],
            }, // Alice just BSN
            Policy {
                timestamp: 1566722350,
                con: vec![Attribute::new(
                    "pbdf.gemeente.personalData.bsn",
                    Some("<Alice's social security number>"),
                )],
            }, // Bob name + email
            Policy {
                timestamp: 1566722350,
                con: vec![
                    Attribute::new("pbdf.gemeente.personalData.name", Some("Bob")),
                    Attribute::new("pbdf.sidn-pbdf.email.email", Some("bob@example.com")),
                ],
            }, // Charlie name + email
            Policy {
                timestamp: 1566722350,
                con: vec![
                    Attribute::new("pbdf.gemeente.personalData.name", Some("Charlie")),
                    Attribute::new("pbdf.sidn-pbdf.email.email", Some("charlie@example.com")),
                ],
            }, // Charlie just name
            Policy {
                timestamp: 1566722350,
                con: vec![Attribute::new(
                    "pbdf.gemeente.personalData.name",
                    Some("Charlie"),
                )],
            },
        ];

        // Seals for Bob (email + name) and Charlie (email + name).
        let policy = EncryptionPolicy::from([
            ("bob@example.com".to_string(), policies[2].clone()),
            ("charlie@example.com".to_string(), policies[3].clone()),
        ]);

        let usks = policy
            .iter()
            .map(|(id, pol)| {
                let derived = pol.derive_kem::<CGWKV>().unwrap();
                let usk = CGWKV::extract_usk(Some(&pk), &sk, &derived, rng);
                (id.clone(), UserSecretKey::<CGWKV>(usk))
            })
            .collect();

        TestSetup {
            ibe_pk: PublicKey(pk),
            ibe_sk: SecretKey(sk),
            policies,
            usks,
            policy,
        }
    }
}

const PKG_SECRET: &[u8] = b"pg-mail test irma server";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TestClaims {
    exp: u64,
    status: SessionStatus,
    proof_status: Option<ProofStatus>,
    con: Vec<Attribute>,
}

/// An in-memory PKG with an attached IRMA server.
///
/// Artifacts are HS256 JWTs over the disclosed conjunction. The wallet of every recipient of
/// the [`TestSetup`] policy holds the attributes of its policy.
#[derive(Debug, Clone)]
pub struct FakePkg {
    pk: PublicKey<CGWKV>,
    sk: SecretKey<CGWKV>,
    wallets: Arc<BTreeMap<String, Vec<Attribute>>>,
    pending: usize,
    invalid: bool,
    requests: Arc<AtomicUsize>,
}

impl FakePkg {
    /// Create a PKG holding the master key pair of `setup`.
    pub fn new(setup: &TestSetup) -> Self {
        let wallets = setup
            .policy
            .iter()
            .map(|(id, pol)| (id.clone(), pol.con.clone()))
            .collect();

        FakePkg {
            pk: setup.ibe_pk.clone(),
            sk: setup.ibe_sk.clone(),
            wallets: Arc::new(wallets),
            pending: 0,
            invalid: false,
            requests: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Answer the first `n` key requests with a pending session.
    pub fn with_pending(mut self, n: usize) -> Self {
        self.pending = n;
        self
    }

    /// Reject every proof.
    pub fn with_invalid_proofs(mut self) -> Self {
        self.invalid = true;
        self
    }

    /// The number of key requests so far.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Fill in the wildcards of `con` from the wallet of `recipient`.
    pub fn disclose(&self, recipient: &str, con: &[Attribute]) -> Vec<Attribute> {
        let wallet = self.wallets.get(recipient);

        con.iter()
            .map(|a| match (&a.value, wallet) {
                (None, Some(wallet)) => wallet
                    .iter()
                    .find(|w| w.atype == a.atype)
                    .cloned()
                    .unwrap_or_else(|| a.clone()),
                _ => a.clone(),
            })
            .collect()
    }

    /// Issue an artifact for a session that disclosed `con`, expiring at `exp`.
    pub fn artifact(&self, con: &[Attribute], exp: u64) -> String {
        let claims = TestClaims {
            exp,
            status: SessionStatus::Done,
            proof_status: Some(ProofStatus::Valid),
            con: con.to_vec(),
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(PKG_SECRET),
        )
        .unwrap()
    }

    fn rejected() -> KeyResponse<UserSecretKey<CGWKV>> {
        KeyResponse {
            status: SessionStatus::Done,
            proof_status: Some(ProofStatus::Invalid),
            key: None,
        }
    }
}

impl KeyService for FakePkg {
    type Key = UserSecretKey<CGWKV>;

    async fn key(
        &self,
        timestamp: u64,
        artifact: &str,
    ) -> Result<KeyResponse<Self::Key>, Error> {
        let n = self.requests.fetch_add(1, Ordering::SeqCst);

        if n < self.pending {
            return Ok(KeyResponse {
                status: SessionStatus::Connected,
                proof_status: None,
                key: None,
            });
        }

        let mut validation = Validation::default();
        validation.validate_exp = false;

        let claims = match decode::<TestClaims>(
            artifact,
            &DecodingKey::from_secret(PKG_SECRET),
            &validation,
        ) {
            Ok(data) => data.claims,
            Err(_) => return Ok(Self::rejected()),
        };

        if self.invalid || claims.exp <= now() {
            return Ok(Self::rejected());
        }

        let policy = Policy {
            timestamp,
            con: claims.con,
        };

        let derived = policy.derive_kem::<CGWKV>()?;
        let usk = CGWKV::extract_usk(
            Some(&self.pk.0),
            &self.sk.0,
            &derived,
            &mut rand::thread_rng(),
        );

        Ok(KeyResponse {
            status: SessionStatus::Done,
            proof_status: Some(ProofStatus::Valid),
            key: Some(UserSecretKey(usk)),
        })
    }
}

#[derive(Debug, Clone)]
enum Script {
    Respond(FakePkg),
    Dismiss,
    Hang,
}

struct Release(Arc<AtomicBool>);

impl Drop for Release {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// A surface that behaves the same way every time it is presented.
#[derive(Debug, Clone)]
pub struct Scripted {
    script: Script,
    presented: Arc<AtomicUsize>,
    released: Arc<AtomicBool>,
}

impl Scripted {
    fn new(script: Script) -> Self {
        Scripted {
            script,
            presented: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The user discloses their attributes to `pkg` right away.
    pub fn respond(pkg: &FakePkg) -> Self {
        Self::new(Script::Respond(pkg.clone()))
    }

    /// The user closes the popup.
    pub fn dismiss() -> Self {
        Self::new(Script::Dismiss)
    }

    /// The user never finishes.
    pub fn hang() -> Self {
        Self::new(Script::Hang)
    }

    /// How many sessions were presented.
    pub fn presented(&self) -> usize {
        self.presented.load(Ordering::SeqCst)
    }

    /// Whether a hanging session was torn down.
    pub fn released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl Surface for Scripted {
    async fn present(&self, port: PopupPort) {
        self.presented.fetch_add(1, Ordering::SeqCst);

        match &self.script {
            Script::Respond(pkg) => {
                let init = port.init();
                let con = pkg.disclose(&init.recipient, &init.request.con);
                let exp = now() + init.request.validity.unwrap_or(DEFAULT_VALIDITY);
                let artifact = pkg.artifact(&con, exp);

                port.done(artifact);
            }
            Script::Dismiss => port.cancel(),
            Script::Hang => {
                let _port = port;
                let _release = Release(self.released.clone());
                std::future::pending::<()>().await;
            }
        }
    }
}
