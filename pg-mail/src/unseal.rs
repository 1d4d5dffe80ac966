//! Unsealing incoming mail.
//!
//! Every decryption is a [`DecryptSession`] moving through
//!
//! ```text
//! INIT -> METADATA -> AUTHORIZING -> UNSEALING -> DONE
//! ```
//!
//! where every state but `DONE` can end in `FAILED`. Only one session is active at a time:
//! a new one is rejected while another has not finished.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use log::{debug, warn};
use tokio_util::sync::CancellationToken;

use crate::cache::KeyCache;
use crate::consts::PIPE_CAPACITY;
use crate::engine::{Engine, Unseal};
use crate::error::{Error, Precondition, Trigger};
use crate::policy::to_email;
use crate::relay::{pipe, PipeReader};
use crate::selection::SelectionTracker;
use crate::session::{KeyAcquisition, KeyConfig, KeyRequest, KeyService, Surface};

/// Identifies a message of the host.
pub type MessageId = u64;

/// The kind of folder a message is displayed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderKind {
    /// The inbox.
    Inbox,
    /// An archive folder.
    Archives,
    /// A folder created by the user.
    Custom,
    /// Sent mail.
    Sent,
    /// Drafts.
    Drafts,
    /// Templates.
    Templates,
    /// Mail waiting to be sent.
    Outbox,
    /// Spam.
    Junk,
    /// Deleted mail.
    Trash,
}

impl FolderKind {
    /// Whether received mail is read from this kind of folder.
    pub fn is_inbox_like(&self) -> bool {
        matches!(self, Self::Inbox | Self::Archives | Self::Custom)
    }
}

/// States of a decryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecryptState {
    /// Checking preconditions.
    Init,
    /// Reading the hidden policies.
    Metadata,
    /// Acquiring the key.
    Authorizing,
    /// Unsealing the payload.
    Unsealing,
    /// The plaintext has been written.
    Done,
    /// Decryption failed.
    Failed,
}

/// The active decryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecryptSession {
    /// The message being decrypted.
    pub message: MessageId,
    /// Where it is.
    pub state: DecryptState,
}

/// Holds the (at most one) active decryption.
#[derive(Debug, Clone, Default)]
pub struct DecryptRegistry {
    active: Arc<Mutex<Option<DecryptSession>>>,
}

impl DecryptRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<DecryptSession>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start decrypting `message`. The session ends when the guard is dropped.
    pub fn begin(&self, message: MessageId) -> Result<DecryptGuard, Error> {
        let mut active = self.lock();

        if let Some(other) = *active {
            debug!(
                "decrypt {message}: rejected, {} is {:?}",
                other.message, other.state
            );
            return Err(Precondition::ConcurrentDecryption.into());
        }

        *active = Some(DecryptSession {
            message,
            state: DecryptState::Init,
        });

        Ok(DecryptGuard {
            message,
            registry: self.clone(),
        })
    }

    /// The active decryption, if any.
    pub fn active(&self) -> Option<DecryptSession> {
        *self.lock()
    }
}

/// Keeps a decryption registered. Dropping it releases the registry.
#[derive(Debug)]
pub struct DecryptGuard {
    message: MessageId,
    registry: DecryptRegistry,
}

impl DecryptGuard {
    /// Move the session to `state`.
    pub fn advance(&self, state: DecryptState) {
        if let Some(session) = self.registry.lock().as_mut() {
            debug!("decrypt {}: {:?} -> {:?}", self.message, session.state, state);
            session.state = state;
        }
    }
}

impl Drop for DecryptGuard {
    fn drop(&mut self) {
        let mut active = self.registry.lock();

        if active.map_or(false, |s| s.message == self.message) {
            *active = None;
        }
    }
}

/// A request to decrypt one message.
#[derive(Debug, Clone)]
pub struct DecryptRequest {
    /// The message.
    pub message: MessageId,
    /// The folder it is displayed from.
    pub folder: FolderKind,
    /// The local identity, i.e. the address of the account that received it.
    pub recipient: String,
    /// The sender, shown in the authorization session.
    pub sender: Option<String>,
    /// What started the decryption.
    pub trigger: Trigger,
}

/// The result of a decryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsealReport {
    /// The recipient identifier the message was unsealed for.
    pub recipient: String,
    /// The number of plaintext bytes written.
    pub bytes: usize,
}

async fn drain<S>(mut reader: PipeReader, mut sink: S) -> Result<usize, Error>
where
    S: AsyncWrite + Unpin,
{
    let mut bytes = 0;

    while let Some(chunk) = reader.next_chunk().await? {
        sink.write_all(&chunk).await?;
        bytes += chunk.len();
    }

    sink.close().await?;

    Ok(bytes)
}

/// Drives decryptions.
#[derive(Debug)]
pub struct UnsealOrchestrator<'a, E, S, U> {
    engine: &'a E,
    service: &'a S,
    surface: &'a U,
    cache: &'a KeyCache,
    registry: DecryptRegistry,
    selection: SelectionTracker,
    config: KeyConfig,
    cancel: CancellationToken,
}

impl<'a, E, S, U> UnsealOrchestrator<'a, E, S, U>
where
    E: Engine,
    S: KeyService<Key = E::Key>,
    U: Surface,
{
    /// Create an orchestrator.
    pub fn new(
        engine: &'a E,
        service: &'a S,
        surface: &'a U,
        cache: &'a KeyCache,
        registry: DecryptRegistry,
        selection: SelectionTracker,
    ) -> Self {
        UnsealOrchestrator {
            engine,
            service,
            surface,
            cache,
            registry,
            selection,
            config: KeyConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Use a different key acquisition timing.
    pub fn with_config(mut self, config: KeyConfig) -> Self {
        self.config = config;
        self
    }

    /// Abort running decryptions when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Decrypt the message read from `ciphertext`, writing the plaintext into `sink`.
    ///
    /// The sink is closed once all plaintext has been written.
    pub async fn unseal_message<R, W>(
        &self,
        req: &DecryptRequest,
        ciphertext: R,
        sink: W,
    ) -> Result<UnsealReport, Error>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let guard = self.registry.begin(req.message)?;

        match self.run(&guard, req, ciphertext, sink).await {
            Ok(report) => {
                guard.advance(DecryptState::Done);
                Ok(report)
            }
            Err(e) => {
                warn!("decrypt {}: failed: {e}", req.message);
                guard.advance(DecryptState::Failed);
                Err(e)
            }
        }
    }

    fn check(&self, req: &DecryptRequest) -> Result<(), Error> {
        if !req.folder.is_inbox_like() {
            return Err(Precondition::WrongFolder.into());
        }

        // An explicit request by the user is deliberate by definition.
        if req.trigger == Trigger::Automatic {
            self.selection.check(req.message)?;
        }

        Ok(())
    }

    async fn run<R, W>(
        &self,
        guard: &DecryptGuard,
        req: &DecryptRequest,
        ciphertext: R,
        sink: W,
    ) -> Result<UnsealReport, Error>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        self.check(req)?;

        guard.advance(DecryptState::Metadata);
        let unsealer = self.engine.unsealer(ciphertext).await?;

        let local = to_email(&req.recipient);
        let hidden = unsealer
            .hidden_policies()
            .remove(&local)
            .ok_or_else(|| Error::UnknownIdentifier(local.clone()))?;

        let key_request = KeyRequest {
            policy: hidden.resolve(&local),
            hints: hidden.hints(),
            sender: req.sender.clone(),
            recipient: local.clone(),
        };

        guard.advance(DecryptState::Authorizing);
        let key = KeyAcquisition::new(self.service, self.surface, self.cache)
            .with_config(self.config.clone())
            .with_cancellation(self.cancel.child_token())
            .acquire(&key_request)
            .await?;

        guard.advance(DecryptState::Unsealing);
        let (writer, reader) = pipe(PIPE_CAPACITY);

        let ((), bytes) = futures::try_join!(
            unsealer.unseal(&local, &key, writer),
            drain(reader, sink)
        )?;

        Ok(UnsealReport {
            recipient: local,
            bytes,
        })
    }
}
