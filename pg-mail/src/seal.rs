//! Sealing outgoing mail.
//!
//! [`seal_message`] drives one encryption: the engine writes ciphertext into a pipe, the
//! [`MimeEncoder`] drains that pipe into the sink. Sealing is only complete when both the
//! engine has finished and the sink has been closed.
//!
//! [`ComposeRegistry`] keeps one [`ComposeSession`] per open compose tab.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use log::{debug, warn};

use crate::consts::*;
use crate::engine::Engine;
use crate::error::{Error, Precondition};
use crate::identity::EncryptionPolicy;
use crate::mime::MimeEncoder;
use crate::options::Options;
use crate::policy::PolicyBuilder;
use crate::relay::{pipe, ChunkRelay, MessageBus, PipeReader, RelayReader, RelaySender};

async fn drain<S>(mut reader: PipeReader, mut encoder: MimeEncoder, mut sink: S) -> Result<(), Error>
where
    S: AsyncWrite + Unpin,
{
    sink.write_all(encoder.start().as_bytes()).await?;

    while let Some(chunk) = reader.next_chunk().await? {
        sink.write_all(encoder.transform(&chunk).as_bytes()).await?;
    }

    sink.write_all(encoder.flush().as_bytes()).await?;
    sink.close().await?;

    Ok(())
}

/// Seal `plaintext` for `policies` and write the MIME envelope to `sink`.
///
/// Resolves once the engine is done and the envelope has been written and closed.
pub async fn seal_message<E, R, S>(
    engine: &E,
    policies: &EncryptionPolicy,
    plaintext: R,
    encoder: MimeEncoder,
    sink: S,
) -> Result<(), Error>
where
    E: Engine,
    R: AsyncRead + Unpin,
    S: AsyncWrite + Unpin,
{
    let (writer, reader) = pipe(PIPE_CAPACITY);

    futures::try_join!(
        engine.seal(policies, plaintext, writer),
        drain(reader, encoder, sink)
    )?;

    Ok(())
}

/// Identifies a compose tab.
pub type TabId = u64;

/// How the last send of a compose session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SealOutcome {
    /// The mail was sealed.
    Sealed,
    /// Sealing failed, the send was aborted.
    Failed(String),
}

/// The state of one compose tab.
#[derive(Debug, Default)]
pub struct ComposeSession {
    encrypt: bool,
    custom: Option<EncryptionPolicy>,
    relay: Option<RelaySender>,
    outcome: Option<SealOutcome>,
}

impl ComposeSession {
    /// Whether mail from this tab is sealed.
    pub fn encrypt(&self) -> bool {
        self.encrypt
    }

    /// How the last send ended.
    pub fn outcome(&self) -> Option<&SealOutcome> {
        self.outcome.as_ref()
    }
}

/// An outgoing mail, as seen by the send hook.
#[derive(Debug, Clone, Default)]
pub struct Outgoing {
    /// The sender address.
    pub from: String,
    /// All recipients: to, cc and bcc.
    pub recipients: Vec<String>,
    /// The subject.
    pub subject: String,
    /// Also seal for the sender.
    pub sender_copy: bool,
}

/// A prepared encryption of one outgoing mail.
#[derive(Debug)]
pub struct SealJob {
    policies: EncryptionPolicy,
    reader: RelayReader,
}

impl SealJob {
    /// The policies the mail is sealed for.
    pub fn policies(&self) -> &EncryptionPolicy {
        &self.policies
    }

    /// Seal the plaintext that arrives over the relay.
    pub async fn run<E, S>(self, engine: &E, encoder: MimeEncoder, sink: S) -> Result<(), Error>
    where
        E: Engine,
        S: AsyncWrite + Unpin,
    {
        seal_message(engine, &self.policies, self.reader, encoder, sink).await
    }
}

/// What the send hook needs to seal one mail.
#[derive(Debug)]
pub struct OutgoingSeal {
    /// Where the compose surface sends the plaintext.
    pub relay: RelaySender,
    /// The encryption to run.
    pub job: SealJob,
    /// The subject the sealed mail is sent with.
    pub subject: String,
}

/// All compose sessions, keyed by tab.
#[derive(Debug, Clone, Default)]
pub struct ComposeRegistry {
    bus: MessageBus,
    sessions: Arc<Mutex<HashMap<TabId, ComposeSession>>>,
}

impl ComposeRegistry {
    /// Create a registry whose relays live on `bus`.
    pub fn new(bus: MessageBus) -> Self {
        ComposeRegistry {
            bus,
            sessions: Arc::default(),
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<TabId, ComposeSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_session<T>(
        &self,
        tab: TabId,
        f: impl FnOnce(&mut ComposeSession) -> T,
    ) -> Result<T, Error> {
        self.sessions()
            .get_mut(&tab)
            .map(f)
            .ok_or_else(|| Precondition::UnknownTab.into())
    }

    /// A compose tab was opened.
    pub fn open(&self, tab: TabId, options: &Options) {
        debug!("compose {tab}: opened, encrypt: {}", options.encrypt_default);

        self.sessions().insert(
            tab,
            ComposeSession {
                encrypt: options.encrypt_default,
                ..Default::default()
            },
        );
    }

    /// Toggle encryption, returning the new setting.
    pub fn toggle(&self, tab: TabId) -> Result<bool, Error> {
        self.with_session(tab, |s| {
            s.encrypt = !s.encrypt;
            debug!("compose {tab}: encrypt: {}", s.encrypt);
            s.encrypt
        })
    }

    /// Use attribute selections instead of plain e-mail policies.
    pub fn set_policies(&self, tab: TabId, policies: EncryptionPolicy) -> Result<(), Error> {
        self.with_session(tab, |s| s.custom = Some(policies))
    }

    /// Whether mail from `tab` is sealed.
    pub fn encrypt(&self, tab: TabId) -> Result<bool, Error> {
        self.with_session(tab, |s| s.encrypt)
    }

    /// How the last send from `tab` ended.
    pub fn outcome(&self, tab: TabId) -> Result<Option<SealOutcome>, Error> {
        self.with_session(tab, |s| s.outcome.clone())
    }

    /// The send hook: prepare sealing `mail`.
    ///
    /// Fails with [`Precondition::EncryptionDisabled`] when the tab does not seal, in which case
    /// the mail is sent as is.
    pub fn before_send(
        &self,
        tab: TabId,
        mail: &Outgoing,
        options: &Options,
        timestamp: u64,
    ) -> Result<OutgoingSeal, Error> {
        let mut sessions = self.sessions();
        let session = sessions.get_mut(&tab).ok_or(Precondition::UnknownTab)?;

        if !session.encrypt {
            return Err(Precondition::EncryptionDisabled.into());
        }

        let mut builder = PolicyBuilder::new(timestamp).recipients(&mail.recipients);

        if mail.sender_copy {
            builder = builder.sender_copy(&mail.from);
        }

        if let Some(custom) = &session.custom {
            builder = builder.custom(custom.clone());
        }

        let policies = builder.build()?;

        let (relay, reader) = ChunkRelay::open(&self.bus);
        debug!(
            "compose {tab}: sealing for {} recipient(s) over relay {}",
            policies.len(),
            relay.id()
        );

        if let Some(stale) = session.relay.replace(relay.clone()) {
            stale.cancel();
        }

        let subject = if options.encrypt_subject {
            POSTGUARD_SUBJECT.to_string()
        } else {
            mail.subject.clone()
        };

        Ok(OutgoingSeal {
            relay,
            job: SealJob { policies, reader },
            subject,
        })
    }

    /// Record how sealing for `tab` ended.
    pub fn finish(&self, tab: TabId, result: &Result<(), Error>) -> Result<(), Error> {
        self.with_session(tab, |s| {
            s.relay = None;
            s.outcome = Some(match result {
                Ok(()) => SealOutcome::Sealed,
                Err(e) => {
                    warn!("compose {tab}: sealing failed: {e}");
                    SealOutcome::Failed(e.to_string())
                }
            });
        })
    }

    /// A compose tab was closed. A seal still in progress is cancelled.
    pub fn close(&self, tab: TabId) {
        if let Some(session) = self.sessions().remove(&tab) {
            if let Some(relay) = session.relay {
                debug!("compose {tab}: closed while sealing, cancelling relay");
                relay.cancel();
            }
        }
    }

    /// The number of open compose sessions.
    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    /// Whether no compose session is open.
    pub fn is_empty(&self) -> bool {
        self.sessions().is_empty()
    }
}
