//! User options of the add-on.

use std::io::ErrorKind;
use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// User options, stored as camelCase JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Options {
    /// New compose sessions start with encryption enabled.
    pub encrypt_default: bool,
    /// Remove the sealed original after a plaintext copy has been stored.
    pub remove_ciphertexts: bool,
    /// Keep plaintext copies of sealed mail in the PostGuard folders.
    pub plaintext_copies: bool,
    /// Replace the subject of sealed mail, the original travels inside the ciphertext.
    pub encrypt_subject: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            encrypt_default: false,
            remove_ciphertexts: true,
            plaintext_copies: true,
            encrypt_subject: true,
        }
    }
}

impl Options {
    /// Load the options stored at `path`. A missing file yields the defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        match std::fs::read(path.as_ref()) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("no options at {}, using defaults", path.as_ref().display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Store the options at `path`.
    pub fn store<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }
}
