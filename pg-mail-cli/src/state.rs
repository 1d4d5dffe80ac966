use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::info;
use pg_mail::api::Parameters;
use pg_mail::artifacts::PublicKey;
use pg_mail::cache::KeyCache;
use pg_mail::error::Error;
use pg_mail::host::{Folder, MailHost};
use pg_mail::kem::cgw_kv::CGWKV;
use pg_mail::options::Options;

use crate::client::Client;
use crate::opts::OptionsOpts;

const LOCAL_FOLDERS: &str = "Local Folders";

/// Everything the CLI keeps between runs.
#[derive(Debug, Clone)]
pub struct State {
    dir: PathBuf,
}

impl State {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, Error> {
        std::fs::create_dir_all(dir.as_ref())?;

        Ok(State {
            dir: dir.as_ref().to_path_buf(),
        })
    }

    fn options_path(&self) -> PathBuf {
        self.dir.join("options.json")
    }

    pub fn options(&self) -> Result<Options, Error> {
        Options::load(self.options_path())
    }

    pub fn cache(&self) -> Result<KeyCache, Error> {
        KeyCache::open(self.dir.join("cache.json"))
    }

    /// The master public key of the PKG, fetched once per PKG.
    pub async fn public_key(&self, client: &Client) -> Result<PublicKey<CGWKV>, Error> {
        let name: String = client
            .baseurl()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        let path = self.dir.join(format!("pk-{name}.json"));

        match std::fs::read(&path) {
            Ok(bytes) => {
                let parameters: Parameters<PublicKey<CGWKV>> = serde_json::from_slice(&bytes)?;
                Ok(parameters.public_key)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let parameters = client.parameters().await?;
                info!("fetched parameters from {}", client.baseurl());

                std::fs::write(&path, serde_json::to_vec(&parameters)?)?;
                Ok(parameters.public_key)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn host(&self) -> DirHost {
        DirHost {
            root: self.dir.join("mail"),
        }
    }
}

/// Mail folders as directories: `mail/<account>/<folder>`.
#[derive(Debug, Clone)]
pub struct DirHost {
    root: PathBuf,
}

impl DirHost {
    pub fn path(&self, folder: &Folder) -> PathBuf {
        self.root
            .join(folder.account.as_deref().unwrap_or(LOCAL_FOLDERS))
            .join(&folder.name)
    }
}

impl MailHost for DirHost {
    async fn folders(&self, account: &str) -> Result<Vec<Folder>, Error> {
        let mut entries = match tokio::fs::read_dir(self.root.join(account)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };

        let mut folders = vec![];
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                folders.push(Folder {
                    account: Some(account.to_string()),
                    name: entry.file_name().to_string_lossy().into_owned(),
                });
            }
        }

        Ok(folders)
    }

    async fn create_folder(&self, account: &str, name: &str) -> Result<Folder, Error> {
        let folder = Folder {
            account: Some(account.to_string()),
            name: name.to_string(),
        };
        tokio::fs::create_dir_all(self.path(&folder)).await?;

        Ok(folder)
    }

    async fn local_folder(&self, name: &str) -> Result<Folder, Error> {
        let folder = Folder {
            account: None,
            name: name.to_string(),
        };
        tokio::fs::create_dir_all(self.path(&folder)).await?;

        Ok(folder)
    }
}

pub fn exec(opts: OptionsOpts) -> Result<(), Error> {
    let OptionsOpts {
        state_dir,
        encrypt_default,
        remove_ciphertexts,
        plaintext_copies,
        encrypt_subject,
    } = opts;

    let state = State::open(state_dir)?;
    let mut options = state.options()?;

    let updates = [
        (&mut options.encrypt_default, encrypt_default),
        (&mut options.remove_ciphertexts, remove_ciphertexts),
        (&mut options.plaintext_copies, plaintext_copies),
        (&mut options.encrypt_subject, encrypt_subject),
    ];

    let mut changed = false;
    for (field, update) in updates {
        if let Some(value) = update {
            *field = value;
            changed = true;
        }
    }

    if changed {
        options.store(state.options_path())?;
    }

    println!("{}", serde_json::to_string_pretty(&options)?);

    Ok(())
}
