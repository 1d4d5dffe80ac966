//! The host mail client, as far as plaintext copies need it.

use std::time::Duration;

use log::{debug, warn};

use crate::consts::*;
use crate::error::Error;
use crate::options::Options;

/// A mail folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folder {
    /// The account the folder belongs to, `None` for local folders.
    pub account: Option<String>,
    /// The name of the folder.
    pub name: String,
}

/// Folder operations of a host mail client.
#[allow(async_fn_in_trait)]
pub trait MailHost {
    /// The folders of `account`.
    async fn folders(&self, account: &str) -> Result<Vec<Folder>, Error>;

    /// Create a folder in `account`. This may stall indefinitely on some hosts.
    async fn create_folder(&self, account: &str, name: &str) -> Result<Folder, Error>;

    /// Get or create a folder in the local folders, which are always available.
    async fn local_folder(&self, name: &str) -> Result<Folder, Error>;
}

/// Which plaintext copy to store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyKind {
    /// A copy of a sealed mail that was sent.
    Sent,
    /// A copy of an unsealed mail that was received.
    Received,
}

impl CopyKind {
    /// The folder name for this kind of copy.
    pub fn folder_name(&self) -> &'static str {
        match self {
            Self::Sent => SENT_COPY_FOLDER,
            Self::Received => RECEIVED_COPY_FOLDER,
        }
    }
}

/// Look up the folder `name` in `account`, creating it if needed.
///
/// Falls back to the local folders when creation fails or takes longer than
/// [`FOLDER_CREATE_TIMEOUT_MS`].
pub async fn copy_folder<H: MailHost>(host: &H, account: &str, name: &str) -> Result<Folder, Error> {
    if let Some(folder) = host
        .folders(account)
        .await?
        .into_iter()
        .find(|f| f.name == name)
    {
        return Ok(folder);
    }

    let timeout = Duration::from_millis(FOLDER_CREATE_TIMEOUT_MS);

    match tokio::time::timeout(timeout, host.create_folder(account, name)).await {
        Ok(Ok(folder)) => {
            debug!("created folder {name} in {account}");
            Ok(folder)
        }
        Ok(Err(e)) => {
            warn!("could not create folder {name} in {account}: {e}, using local folders");
            host.local_folder(name).await
        }
        Err(_) => {
            warn!(
                "{}, using local folders",
                Error::Timeout("folder creation")
            );
            host.local_folder(name).await
        }
    }
}

/// The folder for a plaintext copy, or `None` when plaintext copies are disabled.
pub async fn plaintext_copy_folder<H: MailHost>(
    host: &H,
    options: &Options,
    account: &str,
    kind: CopyKind,
) -> Result<Option<Folder>, Error> {
    if !options.plaintext_copies {
        return Ok(None);
    }

    copy_folder(host, account, kind.folder_name()).await.map(Some)
}
