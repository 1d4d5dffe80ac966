use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use futures::io::AllowStdIo;
use log::{info, warn};
use pg_mail::consts::SYMMETRIC_CRYPTO_DEFAULT_CHUNK;
use pg_mail::engine::PostGuard;
use pg_mail::error::Error;
use pg_mail::host::{plaintext_copy_folder, CopyKind};
use pg_mail::identity::{Attribute, EncryptionPolicy, Policy};
use pg_mail::mime::{EnvelopeOptions, MimeEncoder};
use pg_mail::relay::{MessageBus, RelaySender};
use pg_mail::seal::{ComposeRegistry, Outgoing, TabId};

use crate::client::Client;
use crate::opts::SealOpts;
use crate::state::State;
use crate::util::progress_bar;

const TAB: TabId = 1;

fn now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

// Plays the compose surface: streams the inner message over the relay.
fn compose(relay: RelaySender, subject: String, input: File) -> Result<(), Error> {
    let pb = progress_bar(input.metadata()?.len());
    let mut input = pb.wrap_read(input);

    relay.send(format!("Subject: {subject}\r\n\r\n").as_bytes())?;

    let mut buf = vec![0u8; SYMMETRIC_CRYPTO_DEFAULT_CHUNK as usize];
    loop {
        let n = input.read(&mut buf)?;
        if n == 0 {
            break;
        }
        relay.send(&buf[..n])?;
    }

    pb.finish();
    relay.finalize()
}

fn custom_policies(identity: &str, timestamp: u64) -> Result<EncryptionPolicy, Error> {
    let x: BTreeMap<String, Vec<Attribute>> = serde_json::from_str(identity)?;

    for (id, con) in &x {
        if con.is_empty() {
            warn!("recipient '{id}' has no attribute constraints, sealing for the e-mail address");
        }
    }

    Ok(x.into_iter()
        .map(|(id, con)| (id, Policy { timestamp, con }))
        .collect())
}

pub async fn exec(seal_opts: SealOpts) -> Result<(), Error> {
    let SealOpts {
        input,
        from,
        to,
        subject,
        sender_copy,
        identity,
        fallback,
        account,
        state_dir,
        pkg,
    } = seal_opts;

    let timestamp = now();
    let state = State::open(&state_dir)?;
    let options = state.options()?;

    let client = Client::new(&pkg)?;
    let engine = PostGuard::new(state.public_key(&client).await?);

    let registry = ComposeRegistry::new(MessageBus::new());
    registry.open(TAB, &options);
    if !registry.encrypt(TAB)? {
        registry.toggle(TAB)?;
    }

    if let Some(identity) = identity {
        registry.set_policies(TAB, custom_policies(&identity, timestamp)?)?;
    }

    let mail = Outgoing {
        from: from.clone(),
        recipients: to.clone(),
        subject: subject.clone(),
        sender_copy,
    };

    let seal = registry.before_send(TAB, &mail, &options, timestamp)?;

    eprintln!(
        "Sealing for the following policies:\n{}",
        serde_json::to_string_pretty(seal.job.policies())?
    );

    let input_path = Path::new(&input);
    let output = format!("{input}.eml");

    let encoder = MimeEncoder::new(EnvelopeOptions {
        fallback,
        ..Default::default()
    });

    let mut destination = File::create(&output)?;
    write!(
        destination,
        "From: {from}\r\nTo: {}\r\nSubject: {}\r\n",
        to.join(", "),
        seal.subject
    )?;

    let source = File::open(input_path)?;
    let relay = seal.relay;
    let producer = tokio::task::spawn_blocking(move || compose(relay, subject, source));

    eprintln!("Sealing {input}...");

    let res = seal.job.run(&engine, encoder, AllowStdIo::new(destination)).await;
    registry.finish(TAB, &res)?;
    registry.close(TAB);

    let composed = producer
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

    res?;
    composed?;

    eprintln!("Sealed mail written to {output}");

    let host = state.host();
    if let Some(folder) =
        plaintext_copy_folder(&host, &options, &account, CopyKind::Sent).await?
    {
        let name = input_path
            .file_name()
            .ok_or_else(|| Error::FormatViolation("input file name".to_string()))?;
        let copy = host.path(&folder).join(name);
        std::fs::copy(input_path, &copy)?;
        info!("plaintext copy stored at {}", copy.display());
    }

    Ok(())
}
