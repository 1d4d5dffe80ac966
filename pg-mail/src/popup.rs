//! The exchange with an authorization surface (popup).
//!
//! A surface receives a [`PopupPort`]: the session it has to show, and a one-shot way to
//! answer. Dropping the port without answering counts as the user closing the popup.

use tokio::sync::oneshot;

use crate::api::IrmaAuthRequest;
use crate::error::Error;
use crate::identity::Attribute;

/// Everything a surface needs to run an authorization session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopupInit {
    /// The request to start the session with.
    pub request: IrmaAuthRequest,
    /// Attribute hints from the sealed message, for display.
    pub hints: Vec<Attribute>,
    /// The timestamp the key will be requested for.
    pub timestamp: u64,
    /// The sender of the message, if known.
    pub sender: Option<String>,
    /// The local identity the key is for.
    pub recipient: String,
}

/// The answer of a surface.
#[derive(Debug)]
pub enum PopupResponse {
    /// The session finished, carrying the authorization artifact.
    Done(String),
    /// The session failed.
    Failed(Error),
    /// The user dismissed the session.
    Cancelled,
}

/// The end of the exchange handed to the surface.
#[derive(Debug)]
pub struct PopupPort {
    init: PopupInit,
    tx: oneshot::Sender<PopupResponse>,
}

/// The end of the exchange kept by the session.
pub type PopupHandle = oneshot::Receiver<PopupResponse>;

/// Create a new exchange.
pub fn channel(init: PopupInit) -> (PopupPort, PopupHandle) {
    let (tx, rx) = oneshot::channel();

    (PopupPort { init, tx }, rx)
}

impl PopupPort {
    /// The session to show.
    pub fn init(&self) -> &PopupInit {
        &self.init
    }

    /// Answer with an authorization artifact.
    pub fn done(self, artifact: String) {
        let _ = self.tx.send(PopupResponse::Done(artifact));
    }

    /// Answer with a failure.
    pub fn fail(self, e: Error) {
        let _ = self.tx.send(PopupResponse::Failed(e));
    }

    /// The user dismissed the session.
    pub fn cancel(self) {
        let _ = self.tx.send(PopupResponse::Cancelled);
    }

    /// Whether the session stopped waiting for an answer.
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves when the session stops waiting for an answer, e.g. after a timeout.
    pub async fn abandoned(&mut self) {
        self.tx.closed().await
    }
}

/// Interprets the answer of a surface. A surface that went away without answering was closed
/// by the user.
pub(crate) fn outcome(
    response: Result<PopupResponse, oneshot::error::RecvError>,
) -> Result<String, Error> {
    match response {
        Ok(PopupResponse::Done(artifact)) => Ok(artifact),
        Ok(PopupResponse::Failed(e)) => Err(e),
        Ok(PopupResponse::Cancelled) | Err(_) => Err(Error::SessionCancelled),
    }
}
