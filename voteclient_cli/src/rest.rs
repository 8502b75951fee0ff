use crate::config::Config;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use reqwest::header::{COOKIE, SET_COOKIE};
use reqwest::{RequestBuilder, Response};
use std::io;
use std::net::{IpAddr, Ipv4Addr};
use tokio_util::io::StreamReader;
use voteclient::{
    BallotBody, Credentials, Error, Session, Subscription, Transport, TransportError, VoteStatus,
};

const AUTH_HEADER: &str = "authentication";
const AUTH_COOKIE: &str = "refreshId";

/// Talks to the voting server over HTTP(S)
pub struct HttpTransport {
    client: reqwest::Client,
    base: String,
}

impl HttpTransport {
    pub fn new(config: &Config) -> Result<Self, reqwest::Error> {
        let mut builder = reqwest::Client::builder().danger_accept_invalid_certs(config.insecure);
        if config.ipv4 {
            builder = builder.local_address(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        }

        Ok(HttpTransport {
            client: builder.build()?,
            base: config.addr(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn authenticated(&self, builder: RequestBuilder, session: &Session) -> RequestBuilder {
        builder
            .header(AUTH_HEADER, &session.token)
            .header(COOKIE, &session.cookie)
    }
}

fn request_error(err: reqwest::Error) -> Error {
    TransportError::Request(err.to_string()).into()
}

/// Turn any non-2xx response into `TransportError::Status`
async fn check_status(response: Response) -> Result<Response, Error> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "[can not read body]".to_owned());
    Err(TransportError::Status {
        status: status.as_u16(),
        body,
    }
    .into())
}

/// The `name=value` pair of the auth cookie, if the response set one
fn auth_cookie(response: &Response) -> String {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.split(';').next())
        .map(str::trim)
        .find(|pair| {
            pair.split_once('=')
                .map_or(false, |(name, _)| name == AUTH_COOKIE)
        })
        .unwrap_or_default()
        .to_owned()
}

#[async_trait]
impl Transport for HttpTransport {
    type Stream = StreamReader<BoxStream<'static, io::Result<Bytes>>, Bytes>;

    async fn login(&self, credentials: &Credentials) -> Result<Session, Error> {
        let response = self
            .client
            .post(self.url("/system/auth/login"))
            .json(credentials)
            .send()
            .await
            .map_err(request_error)?;
        let response = check_status(response).await?;

        let token = response
            .headers()
            .get(AUTH_HEADER)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_owned();
        let cookie = auth_cookie(&response);

        Ok(Session::from_token(token, cookie)?)
    }

    async fn open_stream(
        &self,
        session: &Session,
        subscriptions: &[Subscription],
    ) -> Result<Self::Stream, Error> {
        let request = self
            .client
            .get(self.url("/system/autoupdate"))
            .json(subscriptions);
        let response = self
            .authenticated(request, session)
            .send()
            .await
            .map_err(request_error)?;
        let response = check_status(response).await?;

        let body = response
            .bytes_stream()
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))
            .boxed();
        Ok(StreamReader::new(body))
    }

    async fn vote_status(&self, session: &Session, poll_id: u64) -> Result<VoteStatus, Error> {
        let request = self
            .client
            .get(self.url(&format!("/system/vote/voted?ids={}", poll_id)));
        let response = self
            .authenticated(request, session)
            .send()
            .await
            .map_err(request_error)?;
        let body = check_status(response)
            .await?
            .bytes()
            .await
            .map_err(request_error)?;

        Ok(VoteStatus::from_slice(&body)?)
    }

    async fn submit_ballot(
        &self,
        session: &Session,
        poll_id: u64,
        body: &BallotBody,
    ) -> Result<(), Error> {
        let request = self
            .client
            .post(self.url(&format!("/system/vote?id={}", poll_id)))
            .json(body);
        let response = self
            .authenticated(request, session)
            .send()
            .await
            .map_err(request_error)?;
        check_status(response).await?;
        Ok(())
    }
}
