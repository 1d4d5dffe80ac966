mod client;
mod opts;
mod seal;
mod state;
mod surface;
mod unseal;
mod util;

use crate::opts::{Opts, Subcommand};
use clap::Parser;
use pg_mail::error::{Error, Trigger};

#[tokio::main]
async fn main() {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let opts = Opts::parse();

    let res = match opts.subcmd {
        Subcommand::Seal(o) => crate::seal::exec(o).await,
        Subcommand::Unseal(o) => crate::unseal::exec(o).await,
        Subcommand::Options(o) => crate::state::exec(o),
    };

    if let Err(e) = res {
        match e.notice(Trigger::User) {
            Some(notice) => eprintln!("Error: {}", notice.message),
            None if matches!(e, Error::SessionCancelled) => eprintln!("Cancelled."),
            None => {}
        }

        std::process::exit(1);
    }
}
