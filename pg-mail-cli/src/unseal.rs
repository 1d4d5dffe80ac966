use std::ffi::OsString;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::io::{AllowStdIo, Cursor};
use inquire::Select;
use log::{info, warn};
use pg_mail::consts::CACHE_SWEEP_INTERVAL_SECS;
use pg_mail::engine::{Engine, PostGuard, Unseal};
use pg_mail::error::{Error, Trigger};
use pg_mail::host::{plaintext_copy_folder, CopyKind};
use pg_mail::mime::{extract_encrypted, is_sealed};
use pg_mail::relay::{ChunkRelay, MessageBus};
use pg_mail::selection::SelectionTracker;
use pg_mail::session::KeyConfig;
use pg_mail::unseal::{DecryptRegistry, DecryptRequest, FolderKind, UnsealOrchestrator};

use crate::client::Client;
use crate::opts::UnsealOpts;
use crate::state::State;
use crate::surface::TerminalSurface;
use crate::util::progress_bar;

const RELAY_CHUNK: usize = 4096;

fn attachment_names(envelope: &str) -> Vec<String> {
    envelope
        .lines()
        .filter(|l| l.to_ascii_lowercase().starts_with("content-disposition: attachment"))
        .filter_map(|l| l.split("filename=\"").nth(1))
        .filter_map(|rest| rest.split('"').next())
        .map(str::to_string)
        .collect()
}

fn partial_path(output: &Path) -> PathBuf {
    let mut name = output.file_name().map(OsString::from).unwrap_or_default();
    name.push(".part");
    output.with_file_name(name)
}

// Moves the unsealed plaintext into place, or removes what was written of it.
fn commit<T>(partial: &Path, output: &Path, res: Result<T, Error>) -> Result<T, Error> {
    match res {
        Ok(v) => {
            std::fs::rename(partial, output)?;
            Ok(v)
        }
        Err(e) => {
            if let Err(rm) = std::fs::remove_file(partial) {
                warn!("could not remove {}: {rm}", partial.display());
            }
            Err(e)
        }
    }
}

pub async fn exec(unseal_opts: UnsealOpts) -> Result<(), Error> {
    let UnsealOpts {
        input,
        output,
        recipient,
        sender,
        cached_only,
        account,
        state_dir,
        pkg,
    } = unseal_opts;

    let state = State::open(&state_dir)?;
    let options = state.options()?;

    let envelope = std::fs::read_to_string(&input)?;
    if !is_sealed(&attachment_names(&envelope)) {
        return Err(Error::NotPostGuard);
    }
    let ct = extract_encrypted(&envelope)?;

    let client = Client::new(&pkg)?;
    let engine = PostGuard::new(state.public_key(&client).await?);

    let recipient = match recipient {
        Some(recipient) => recipient,
        None => {
            let hidden = engine.unsealer(Cursor::new(&ct[..])).await?.hidden_policies();
            let ids: Vec<String> = hidden.keys().cloned().collect();

            Select::new("What's your recipient identifier?", ids)
                .prompt()
                .map_err(|_| Error::SessionCancelled)?
        }
    };

    let cache = state.cache()?;
    let sweeper = cache.spawn_sweeper(Duration::from_secs(CACHE_SWEEP_INTERVAL_SECS));

    let surface = TerminalSurface::new(&client);
    let orchestrator = UnsealOrchestrator::new(
        &engine,
        &client,
        &surface,
        &cache,
        DecryptRegistry::new(),
        SelectionTracker::default(),
    )
    .with_config(KeyConfig {
        interactive: !cached_only,
        ..KeyConfig::default()
    });

    // The ciphertext arrives over a relay, as it would from the message display.
    let bus = MessageBus::new();
    let (relay, reader) = ChunkRelay::open(&bus);
    for chunk in ct.chunks(RELAY_CHUNK) {
        relay.send(chunk)?;
    }
    relay.finalize()?;

    let output = output.unwrap_or_else(|| {
        Path::new(&input)
            .with_extension("txt")
            .to_string_lossy()
            .into_owned()
    });

    let partial = partial_path(Path::new(&output));
    let pb = progress_bar(ct.len() as u64);
    let destination = AllowStdIo::new(pb.wrap_write(File::create(&partial)?));

    let req = DecryptRequest {
        message: 1,
        folder: FolderKind::Inbox,
        recipient,
        sender,
        trigger: Trigger::User,
    };

    eprintln!("Unsealing {input}...");

    let res = orchestrator.unseal_message(&req, reader, destination).await;
    sweeper.abort();

    let report = commit(&partial, Path::new(&output), res)?;
    pb.finish();

    eprintln!(
        "Unsealed {} bytes for {} into {output}",
        report.bytes, report.recipient
    );

    let host = state.host();
    if let Some(folder) =
        plaintext_copy_folder(&host, &options, &account, CopyKind::Received).await?
    {
        let name = Path::new(&output)
            .file_name()
            .ok_or_else(|| Error::FormatViolation("output file name".to_string()))?;
        let copy = host.path(&folder).join(name);
        std::fs::copy(&output, &copy)?;
        info!("plaintext copy stored at {}", copy.display());

        if options.remove_ciphertexts {
            std::fs::remove_file(&input)?;
            eprintln!("Removed {input}, a plaintext copy is kept in {}", copy.display());
        }
    }

    Ok(())
}
