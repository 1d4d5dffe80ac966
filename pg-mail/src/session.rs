//! Acquiring user secret keys.
//!
//! [`KeyAcquisition`] runs the key state machine for one policy:
//!
//! ```text
//! CHECK_CACHE --hit--> KEY_REQUEST --> DONE
//!      |                    |
//!     miss              rejected
//!      v                    v
//! INTERACTIVE -------> KEY_REQUEST --> DONE
//! ```
//!
//! Every state can end in FAILED. A cached artifact that the PKG rejects is dropped and the
//! machine falls back to an interactive session once.

use std::time::Duration;

use irma::{ProofStatus, SessionStatus};
use log::{debug, warn};
use tokio_util::sync::CancellationToken;

use crate::api::{ArtifactClaims, IrmaAuthRequest, KeyResponse};
use crate::cache::{KeyCache, Lookup};
use crate::consts::*;
use crate::error::Error;
use crate::identity::{Attribute, Policy};
use crate::popup::{self, PopupInit, PopupPort};
use crate::util::now;

/// Exchanges authorization artifacts for keys, i.e. the key endpoint of a PKG.
#[allow(async_fn_in_trait)]
pub trait KeyService {
    /// The key type.
    type Key;

    /// Request the key for `timestamp`, authorized by `artifact`.
    ///
    /// Transport failures are reported as [`Error::Network`].
    async fn key(&self, timestamp: u64, artifact: &str)
        -> Result<KeyResponse<Self::Key>, Error>;
}

/// A user-facing authorization surface.
#[allow(async_fn_in_trait)]
pub trait Surface {
    /// Run the session described by the port and answer it.
    ///
    /// Returning without answering counts as the user closing the surface.
    async fn present(&self, port: PopupPort);
}

/// Timing of key acquisition.
#[derive(Debug, Clone)]
pub struct KeyConfig {
    /// Validity of a fresh artifact, in seconds.
    pub validity: u64,
    /// How many times a pending key request is polled.
    pub poll_attempts: usize,
    /// Delay between polls.
    pub poll_interval: Duration,
    /// Maximum duration of an interactive session.
    pub popup_timeout: Duration,
    /// Whether a cache miss opens an interactive session. If not, it fails with
    /// [`Error::CacheMiss`].
    pub interactive: bool,
}

impl Default for KeyConfig {
    fn default() -> Self {
        KeyConfig {
            validity: DEFAULT_VALIDITY,
            poll_attempts: KEY_POLL_ATTEMPTS,
            poll_interval: Duration::from_millis(KEY_POLL_INTERVAL_MS),
            popup_timeout: Duration::from_secs(POPUP_TIMEOUT_SECS),
            interactive: true,
        }
    }
}

/// A request for the key of one recipient.
#[derive(Debug, Clone)]
pub struct KeyRequest {
    /// The policy to prove, with concrete values for the local identity.
    pub policy: Policy,
    /// Hints to show next to the request.
    pub hints: Vec<Attribute>,
    /// The sender of the message, if known.
    pub sender: Option<String>,
    /// The local identity.
    pub recipient: String,
}

/// States of the key state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Looking for a cached artifact.
    CheckCache,
    /// Waiting for the user to finish an authorization session.
    Interactive,
    /// Exchanging an artifact for a key.
    KeyRequest,
    /// The key was obtained.
    Done,
    /// Acquisition failed.
    Failed,
}

/// Runs the key state machine.
#[derive(Debug)]
pub struct KeyAcquisition<'a, S, U> {
    service: &'a S,
    surface: &'a U,
    cache: &'a KeyCache,
    config: KeyConfig,
    cancel: CancellationToken,
    state: SessionState,
}

impl<'a, S, U> KeyAcquisition<'a, S, U>
where
    S: KeyService,
    U: Surface,
{
    /// Create a new acquisition.
    pub fn new(service: &'a S, surface: &'a U, cache: &'a KeyCache) -> Self {
        KeyAcquisition {
            service,
            surface,
            cache,
            config: KeyConfig::default(),
            cancel: CancellationToken::new(),
            state: SessionState::CheckCache,
        }
    }

    /// Use a different timing.
    pub fn with_config(mut self, config: KeyConfig) -> Self {
        self.config = config;
        self
    }

    /// Abort when `cancel` fires, e.g. because the parent surface closed.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        debug!("key session: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Obtain the key for `req`.
    pub async fn acquire(&mut self, req: &KeyRequest) -> Result<S::Key, Error> {
        match self.run(req).await {
            Ok(key) => {
                self.transition(SessionState::Done);
                Ok(key)
            }
            Err(e) => {
                warn!("key session failed in state {:?}: {e}", self.state);
                self.transition(SessionState::Failed);
                Err(e)
            }
        }
    }

    async fn run(&mut self, req: &KeyRequest) -> Result<S::Key, Error> {
        let con = &req.policy.con;
        let timestamp = req.policy.timestamp;

        self.transition(SessionState::CheckCache);

        match self.cache.lookup(con, now())? {
            Lookup::Hit(artifact) => {
                self.transition(SessionState::KeyRequest);

                match self.request_key(timestamp, &artifact).await {
                    Ok(key) => return Ok(key),
                    Err(Error::AuthorizationRejected | Error::SessionExpired) => {
                        debug!("key session: cached artifact rejected, dropping it");
                        if let Err(e) = self.cache.remove(con) {
                            warn!("key session: could not drop cached artifact: {e}");
                        }
                    }
                    Err(e) => return Err(e),
                }
            }
            lookup => debug!("key session: cache {lookup:?}"),
        }

        if !self.config.interactive {
            return Err(Error::CacheMiss);
        }

        self.transition(SessionState::Interactive);
        let artifact = self.interactive(req).await?;

        self.transition(SessionState::KeyRequest);
        let key = self.request_key(timestamp, &artifact).await?;

        // A failed write-back never fails the session.
        match ArtifactClaims::decode(&artifact) {
            Ok(claims) => {
                if let Err(e) = self.cache.insert(con, &artifact, claims.exp) {
                    warn!("key session: could not cache artifact: {e}");
                }
            }
            Err(e) => warn!("key session: not caching artifact: {e}"),
        }

        Ok(key)
    }

    async fn interactive(&self, req: &KeyRequest) -> Result<String, Error> {
        let init = PopupInit {
            request: IrmaAuthRequest {
                con: req.policy.con.clone(),
                validity: Some(self.config.validity),
            },
            hints: req.hints.clone(),
            timestamp: req.policy.timestamp,
            sender: req.sender.clone(),
            recipient: req.recipient.clone(),
        };

        let (port, mut response) = popup::channel(init);

        // The surface is dropped on every way out of this select, releasing whatever it holds.
        let present = self.surface.present(port);
        tokio::pin!(present);

        let answered = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Error::SessionCancelled),
            res = &mut response => Some(res),
            _ = &mut present => None,
            _ = tokio::time::sleep(self.config.popup_timeout) => {
                return Err(Error::Timeout("authorization session"));
            }
        };

        match answered {
            Some(res) => popup::outcome(res),
            // The surface returned, so its port is gone: answered or dropped.
            None => popup::outcome(response.await),
        }
    }

    async fn request_key(&self, timestamp: u64, artifact: &str) -> Result<S::Key, Error> {
        for _ in 0..self.config.poll_attempts {
            let kr = self.service.key(timestamp, artifact).await?;

            match kr {
                KeyResponse {
                    status: SessionStatus::Done,
                    proof_status: Some(ProofStatus::Valid),
                    key: Some(key),
                } => return Ok(key),
                KeyResponse {
                    status: SessionStatus::Done,
                    ..
                } => return Err(Error::AuthorizationRejected),
                KeyResponse {
                    status:
                        SessionStatus::Initialized | SessionStatus::Pairing | SessionStatus::Connected,
                    ..
                } => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(Error::SessionCancelled),
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
                // Cancelled or timed out on the server side.
                _ => return Err(Error::SessionExpired),
            }
        }

        Err(Error::Timeout("key request"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureReason;
    use crate::test::{FakePkg, Scripted, TestSetup};

    fn request(setup: &TestSetup, id: &str) -> KeyRequest {
        KeyRequest {
            policy: setup.policy[id].clone(),
            hints: vec![],
            sender: Some("alice@example.com".to_string()),
            recipient: id.to_string(),
        }
    }

    fn fast() -> KeyConfig {
        KeyConfig {
            poll_interval: Duration::from_millis(1),
            popup_timeout: Duration::from_secs(1),
            ..KeyConfig::default()
        }
    }

    #[tokio::test]
    async fn test_interactive_then_cached() {
        let setup = TestSetup::default();
        let pkg = FakePkg::new(&setup);
        let surface = Scripted::respond(&pkg);
        let cache = KeyCache::new();
        let req = request(&setup, "bob@example.com");

        let mut acq = KeyAcquisition::new(&pkg, &surface, &cache).with_config(fast());
        acq.acquire(&req).await.unwrap();
        assert_eq!(acq.state(), SessionState::Done);
        assert_eq!(surface.presented(), 1);

        // Immediately afterwards the artifact comes from the cache.
        let mut acq = KeyAcquisition::new(&pkg, &surface, &cache).with_config(fast());
        acq.acquire(&req).await.unwrap();
        assert_eq!(surface.presented(), 1);
        assert!(matches!(
            cache.lookup(&req.policy.con, now()).unwrap(),
            Lookup::Hit(_)
        ));
    }

    #[tokio::test]
    async fn test_expired_artifact_misses() {
        let setup = TestSetup::default();
        let pkg = FakePkg::new(&setup);
        let surface = Scripted::respond(&pkg);
        let cache = KeyCache::new();
        let req = request(&setup, "bob@example.com");

        cache
            .insert(&req.policy.con, &pkg.artifact(&req.policy.con, 1), 1)
            .unwrap();

        let mut acq = KeyAcquisition::new(&pkg, &surface, &cache).with_config(fast());
        acq.acquire(&req).await.unwrap();

        assert_eq!(surface.presented(), 1);
    }

    #[tokio::test]
    async fn test_rejected_cached_artifact_falls_back() {
        let setup = TestSetup::default();
        let pkg = FakePkg::new(&setup);
        let surface = Scripted::respond(&pkg);
        let cache = KeyCache::new();
        let req = request(&setup, "bob@example.com");

        // The cache still trusts the artifact, the PKG no longer does.
        cache
            .insert(&req.policy.con, &pkg.artifact(&req.policy.con, 1), now() + 3600)
            .unwrap();

        let mut acq = KeyAcquisition::new(&pkg, &surface, &cache).with_config(fast());
        acq.acquire(&req).await.unwrap();

        assert_eq!(surface.presented(), 1);
    }

    #[tokio::test]
    async fn test_unwritable_cache_keeps_key() {
        let setup = TestSetup::default();
        let pkg = FakePkg::new(&setup);
        let surface = Scripted::respond(&pkg);
        let dir = tempfile::tempdir().unwrap();
        let cache = KeyCache::open(dir.path().join("missing").join("cache.json")).unwrap();
        let req = request(&setup, "bob@example.com");

        let mut acq = KeyAcquisition::new(&pkg, &surface, &cache).with_config(fast());
        acq.acquire(&req).await.unwrap();

        assert_eq!(acq.state(), SessionState::Done);
        assert_eq!(surface.presented(), 1);
        assert!(!dir.path().join("missing").exists());
        assert!(matches!(
            cache.lookup(&req.policy.con, now()).unwrap(),
            Lookup::Hit(_)
        ));
    }

    #[tokio::test]
    async fn test_cache_only() {
        let setup = TestSetup::default();
        let pkg = FakePkg::new(&setup);
        let surface = Scripted::respond(&pkg);
        let cache = KeyCache::new();
        let req = request(&setup, "bob@example.com");
        let cached_only = KeyConfig {
            interactive: false,
            ..fast()
        };

        let mut acq =
            KeyAcquisition::new(&pkg, &surface, &cache).with_config(cached_only.clone());
        let err = acq.acquire(&req).await.unwrap_err();

        assert_eq!(err.reason(), Some(FailureReason::CacheMiss));
        assert_eq!(acq.state(), SessionState::Failed);
        assert_eq!(surface.presented(), 0);

        let exp = now() + 3600;
        cache
            .insert(&req.policy.con, &pkg.artifact(&req.policy.con, exp), exp)
            .unwrap();

        let mut acq = KeyAcquisition::new(&pkg, &surface, &cache).with_config(cached_only);
        acq.acquire(&req).await.unwrap();
        assert_eq!(surface.presented(), 0);
    }

    #[tokio::test]
    async fn test_dismissed() {
        let setup = TestSetup::default();
        let pkg = FakePkg::new(&setup);
        let surface = Scripted::dismiss();
        let cache = KeyCache::new();

        let mut acq = KeyAcquisition::new(&pkg, &surface, &cache).with_config(fast());
        let err = acq
            .acquire(&request(&setup, "bob@example.com"))
            .await
            .unwrap_err();

        assert_eq!(err.reason(), Some(FailureReason::SessionCancelled));
        assert_eq!(acq.state(), SessionState::Failed);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_parent_cancellation() {
        let setup = TestSetup::default();
        let pkg = FakePkg::new(&setup);
        let surface = Scripted::hang();
        let cache = KeyCache::new();
        let cancel = CancellationToken::new();

        let mut acq = KeyAcquisition::new(&pkg, &surface, &cache)
            .with_config(KeyConfig {
                popup_timeout: Duration::from_secs(60),
                ..fast()
            })
            .with_cancellation(cancel.clone());

        let req = request(&setup, "bob@example.com");
        let (res, _) = tokio::join!(acq.acquire(&req), async { cancel.cancel() });

        assert!(matches!(res, Err(Error::SessionCancelled)));
        // The surface was dropped, so it saw its port go away.
        assert!(surface.released());
    }

    #[tokio::test(start_paused = true)]
    async fn test_popup_timeout() {
        let setup = TestSetup::default();
        let pkg = FakePkg::new(&setup);
        let surface = Scripted::hang();
        let cache = KeyCache::new();

        let mut acq = KeyAcquisition::new(&pkg, &surface, &cache);
        let err = acq
            .acquire(&request(&setup, "bob@example.com"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Timeout(_)));
        assert_eq!(err.reason(), Some(FailureReason::Expired));
    }

    #[tokio::test]
    async fn test_pending_then_valid() {
        let setup = TestSetup::default();
        let pkg = FakePkg::new(&setup).with_pending(3);
        let surface = Scripted::respond(&pkg);
        let cache = KeyCache::new();

        let mut acq = KeyAcquisition::new(&pkg, &surface, &cache).with_config(fast());
        acq.acquire(&request(&setup, "bob@example.com"))
            .await
            .unwrap();

        assert_eq!(pkg.requests(), 4);
    }

    #[tokio::test]
    async fn test_poll_exhausted() {
        let setup = TestSetup::default();
        let pkg = FakePkg::new(&setup).with_pending(usize::MAX);
        let surface = Scripted::respond(&pkg);
        let cache = KeyCache::new();

        let mut acq = KeyAcquisition::new(&pkg, &surface, &cache).with_config(KeyConfig {
            poll_attempts: 5,
            ..fast()
        });

        let err = acq
            .acquire(&request(&setup, "bob@example.com"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Timeout("key request")));
        assert_eq!(pkg.requests(), 5);
    }

    #[tokio::test]
    async fn test_server_rejects() {
        let setup = TestSetup::default();
        let pkg = FakePkg::new(&setup).with_invalid_proofs();
        let surface = Scripted::respond(&pkg);
        let cache = KeyCache::new();

        let mut acq = KeyAcquisition::new(&pkg, &surface, &cache).with_config(fast());
        let err = acq
            .acquire(&request(&setup, "bob@example.com"))
            .await
            .unwrap_err();

        assert_eq!(err.reason(), Some(FailureReason::ServerRejected));
        assert!(cache.is_empty());
    }
}
