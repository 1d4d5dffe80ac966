use std::time::Duration;

use irma::SessionStatus;
use log::debug;
use pg_mail::api::ArtifactClaims;
use pg_mail::consts::KEY_POLL_INTERVAL_MS;
use pg_mail::error::Error;
use pg_mail::popup::PopupPort;
use pg_mail::session::Surface;

use crate::client::Client;
use crate::util::print_qr;

/// Runs authorization sessions in the terminal: shows a QR code for the Yivi app.
#[derive(Debug)]
pub struct TerminalSurface<'a> {
    client: &'a Client,
}

enum Step {
    Abandoned,
    Interrupted,
    Polled(Result<Option<String>, Error>),
}

impl<'a> TerminalSurface<'a> {
    pub fn new(client: &'a Client) -> Self {
        TerminalSurface { client }
    }

    async fn start(&self, port: &PopupPort) -> Result<irma::SessionData, Error> {
        let init = port.init();

        match &init.sender {
            Some(sender) => eprintln!("Unsealing a message from {sender} for {}.", init.recipient),
            None => eprintln!("Unsealing a message for {}.", init.recipient),
        }

        for hint in &init.hints {
            eprintln!(
                "  {}: {}",
                hint.atype,
                hint.value.as_deref().unwrap_or_default()
            );
        }

        let mut sd = self.client.request_start(&init.request).await?;

        if self.client.baseurl().contains("ihub.ru.nl") {
            sd.session_ptr.u = format!("https://ihub.ru.nl/irma/1/{}", sd.session_ptr.u);
        }

        eprintln!("Please scan the following QR-code with IRMA/Yivi:");
        print_qr(&sd.session_ptr)?;

        Ok(sd)
    }

    // The artifact once the session is done, `None` while it is pending.
    async fn poll(&self, token: &irma::SessionToken) -> Result<Option<String>, Error> {
        let jwt = self.client.request_jwt(token).await?;
        let claims = ArtifactClaims::decode(&jwt)?;

        match claims.status {
            SessionStatus::Done => Ok(Some(jwt)),
            SessionStatus::Initialized | SessionStatus::Pairing | SessionStatus::Connected => {
                tokio::time::sleep(Duration::from_millis(KEY_POLL_INTERVAL_MS)).await;
                Ok(None)
            }
            status => {
                debug!("authorization session ended with {status:?}");
                Err(Error::SessionExpired)
            }
        }
    }
}

impl Surface for TerminalSurface<'_> {
    async fn present(&self, mut port: PopupPort) {
        let sd = match self.start(&port).await {
            Ok(sd) => sd,
            Err(e) => return port.fail(e),
        };

        loop {
            let step = tokio::select! {
                _ = port.abandoned() => Step::Abandoned,
                _ = tokio::signal::ctrl_c() => Step::Interrupted,
                res = self.poll(&sd.token) => Step::Polled(res),
            };

            match step {
                Step::Abandoned => return,
                Step::Interrupted => return port.cancel(),
                Step::Polled(Ok(Some(jwt))) => return port.done(jwt),
                Step::Polled(Ok(None)) => {}
                Step::Polled(Err(e)) => return port.fail(e),
            }
        }
    }
}
