use clap::{Parser, ValueHint};
use pg_mail::consts::PKG_URL;

/// Command line interface for PostGuard mail: seal and unseal e-mail bodies.
#[derive(Parser, Debug)]
#[clap(
    name = "pg-mail-cli",
    version = "0.1",
    author = "Wouter Geraedts <w.geraedts@sarif.nl>, Leon Botros <l.botros@cs.ru.nl>"
)]
pub struct Opts {
    #[clap(subcommand)]
    pub subcmd: Subcommand,
}

#[derive(Parser, Debug)]
pub enum Subcommand {
    Seal(SealOpts),
    Unseal(UnsealOpts),
    Options(OptionsOpts),
}

/// Seal a mail body into a PostGuard envelope.
#[derive(Parser, Debug)]
#[clap(name = "Seal")]
pub struct SealOpts {
    /// Input file, the plaintext body.
    #[clap(index = 1, value_hint = ValueHint::FilePath)]
    pub input: String,

    /// Sender address.
    #[clap(short, long)]
    pub from: String,

    /// Recipient addresses.
    #[clap(short, long, required = true)]
    pub to: Vec<String>,

    /// Subject of the mail.
    #[clap(short, long, default_value = "")]
    pub subject: String,

    /// Also seal for the sender.
    #[clap(long)]
    pub sender_copy: bool,

    /// JSON map of recipient to attribute conjunction, overriding the e-mail policies.
    #[clap(short, long)]
    pub identity: Option<String>,

    /// Add a human-readable part for mail clients without PostGuard.
    #[clap(long)]
    pub fallback: bool,

    /// Account used for the plaintext copy.
    #[clap(short, long, default_value = "local")]
    pub account: String,

    /// Directory holding options, cached artifacts and the public key.
    #[clap(long, default_value = ".postguard", value_hint = ValueHint::DirPath)]
    pub state_dir: String,

    /// Private key generator (PKG) server URL.
    #[clap(short, long, default_value = PKG_URL, value_hint = ValueHint::Url)]
    pub pkg: String,
}

/// Unseal a PostGuard envelope.
#[derive(Parser, Debug)]
#[clap(name = "Unseal")]
pub struct UnsealOpts {
    /// Input file, the sealed mail.
    #[clap(index = 1, value_hint = ValueHint::FilePath)]
    pub input: String,

    /// Output file, defaults to the input with a `.txt` extension.
    #[clap(short, long, value_hint = ValueHint::FilePath)]
    pub output: Option<String>,

    /// Your address. You are asked to pick one when not given.
    #[clap(short, long)]
    pub recipient: Option<String>,

    /// The sender of the mail, shown while authorizing.
    #[clap(short, long)]
    pub sender: Option<String>,

    /// Only use a cached authorization, never start a session.
    #[clap(long)]
    pub cached_only: bool,

    /// Account used for the plaintext copy.
    #[clap(short, long, default_value = "local")]
    pub account: String,

    /// Directory holding options, cached artifacts and the public key.
    #[clap(long, default_value = ".postguard", value_hint = ValueHint::DirPath)]
    pub state_dir: String,

    /// Private key generator (PKG) server URL.
    #[clap(short, long, default_value = PKG_URL, value_hint = ValueHint::Url)]
    pub pkg: String,
}

/// Show or change the options.
#[derive(Parser, Debug)]
#[clap(name = "Options")]
pub struct OptionsOpts {
    /// Directory holding options, cached artifacts and the public key.
    #[clap(long, default_value = ".postguard", value_hint = ValueHint::DirPath)]
    pub state_dir: String,

    /// Start compose sessions with encryption enabled.
    #[clap(long)]
    pub encrypt_default: Option<bool>,

    /// Remove the sealed mail once a plaintext copy is stored.
    #[clap(long)]
    pub remove_ciphertexts: Option<bool>,

    /// Keep plaintext copies in the PostGuard folders.
    #[clap(long)]
    pub plaintext_copies: Option<bool>,

    /// Hide the subject of sealed mail.
    #[clap(long)]
    pub encrypt_subject: Option<bool>,
}
