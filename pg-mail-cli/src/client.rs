use pg_mail::api::*;
use pg_mail::artifacts::{PublicKey, UserSecretKey};
use pg_mail::error::Error;
use pg_mail::kem::cgw_kv::CGWKV;
use pg_mail::session::KeyService;

use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{ClientBuilder, Url};

use lazy_static::lazy_static;

const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

lazy_static! {
    static ref HEADER_VAL: String = format!("unknown,unknown,pg-mail-cli,{PKG_VERSION}");
    static ref HEADERS: HeaderMap = {
        let mut headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&HEADER_VAL) {
            headers.insert("X-PostGuard-Client-Version", val);
        }
        headers
    };
}

#[derive(Debug)]
pub struct Client {
    baseurl: Url,
    client: reqwest::Client,
}

#[derive(Debug)]
pub enum ClientError {
    Url(String),
    Reqwest(reqwest::Error),
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        ClientError::Reqwest(e)
    }
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Url(e) => write!(f, "invalid URL: {e}"),
            ClientError::Reqwest(e) => write!(f, "{e}"),
        }
    }
}

impl From<ClientError> for Error {
    fn from(e: ClientError) -> Self {
        Error::Network(e.to_string())
    }
}

impl Client {
    pub fn new(baseurl: &str) -> Result<Client, ClientError> {
        let baseurl = Url::parse(baseurl).map_err(|e| ClientError::Url(e.to_string()))?;
        let client = ClientBuilder::new().build()?;

        Ok(Client { baseurl, client })
    }

    pub fn baseurl(&self) -> &str {
        self.baseurl.as_str()
    }

    fn create_url(&self, u: &str) -> Result<Url, ClientError> {
        self.baseurl
            .join(u)
            .map_err(|e| ClientError::Url(e.to_string()))
    }

    pub async fn parameters(&self) -> Result<Parameters<PublicKey<CGWKV>>, ClientError> {
        let res = self
            .client
            .get(self.create_url("v2/parameters")?)
            .headers(HEADERS.clone())
            .send()
            .await?
            .error_for_status()?
            .json::<Parameters<PublicKey<CGWKV>>>()
            .await?;

        Ok(res)
    }

    pub async fn request_start(
        &self,
        kr: &IrmaAuthRequest,
    ) -> Result<irma::SessionData, ClientError> {
        let res = self
            .client
            .post(self.create_url("v2/irma/start")?)
            .headers(HEADERS.clone())
            .json(kr)
            .send()
            .await?
            .error_for_status()?
            .json::<irma::SessionData>()
            .await?;

        Ok(res)
    }

    pub async fn request_jwt(&self, token: &irma::SessionToken) -> Result<String, ClientError> {
        let res = self
            .client
            .get(self.create_url(&format!("v2/irma/jwt/{}", token.0))?)
            .headers(HEADERS.clone())
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        Ok(res)
    }

    pub async fn request_decryption_key(
        &self,
        timestamp: u64,
        auth: &str,
    ) -> Result<KeyResponse<UserSecretKey<CGWKV>>, ClientError> {
        let res = self
            .client
            .get(self.create_url(&format!("v2/irma/key/{timestamp}"))?)
            .bearer_auth(auth)
            .headers(HEADERS.clone())
            .send()
            .await?
            .error_for_status()?
            .json::<KeyResponse<UserSecretKey<CGWKV>>>()
            .await?;

        Ok(res)
    }
}

impl KeyService for Client {
    type Key = UserSecretKey<CGWKV>;

    async fn key(
        &self,
        timestamp: u64,
        artifact: &str,
    ) -> Result<KeyResponse<Self::Key>, Error> {
        Ok(self.request_decryption_key(timestamp, artifact).await?)
    }
}
