//! HTTP client of the transfer runner endpoint.

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::error::{Result, TransferError};

use super::protocol::{InitReply, InitRequest, Message, Reply, TransferKind};
use super::PROVIDER_NAME;

const RUNNER_PATH: &str = "admin/transfer/runner/";

/// Base delay between retry attempts in milliseconds.
const RETRY_DELAY_MS: u64 = 50;

/// What to do after a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    Fail,
}

impl RetryDecision {
    pub fn for_error(error: &TransferError) -> Self {
        if error.is_retryable() {
            RetryDecision::Retry
        } else {
            RetryDecision::Fail
        }
    }
}

/// Session with a remote instance: one transfer id, one direction.
#[derive(Clone)]
pub struct RemoteClient {
    http: reqwest::Client,
    runner: Url,
    token: String,
    kind: TransferKind,
    transfer_id: Option<String>,
    max_retries: u32,
}

impl fmt::Debug for RemoteClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteClient")
            .field("runner", &self.runner.as_str())
            .field("token", &"[REDACTED]")
            .field("kind", &self.kind)
            .field("transfer_id", &self.transfer_id)
            .finish()
    }
}

impl RemoteClient {
    pub fn new(
        url: &Url,
        token: impl Into<String>,
        kind: TransferKind,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self> {
        let mut base = url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let runner = base
            .join(RUNNER_PATH)
            .map_err(|e| TransferError::Validation(format!("invalid url {}: {}", url, e)))?;
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            runner,
            token: token.into(),
            kind,
            transfer_id: None,
            max_retries,
        })
    }

    pub fn kind(&self) -> TransferKind {
        self.kind
    }

    pub fn transfer_id(&self) -> Option<&str> {
        self.transfer_id.as_deref()
    }

    /// Open the transfer. Every failure here is an initialization failure.
    pub async fn init(&mut self, request: &InitRequest) -> Result<()> {
        let url = self.endpoint(&[self.kind.as_str()])?;
        let response = self
            .http
            .post(url.clone())
            .bearer_auth(&self.token)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                let message = if e.is_connect() || e.is_timeout() {
                    format!("could not reach {}: {}", url, e)
                } else {
                    e.to_string()
                };
                TransferError::provider_init(PROVIDER_NAME, message)
            })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(TransferError::provider_init(
                PROVIDER_NAME,
                "the transfer token was rejected by the remote instance",
            ));
        }
        let reply: InitReply = decode(response)
            .await
            .map_err(|e| TransferError::provider_init(PROVIDER_NAME, e.to_string()))?
            .ok_or_else(|| {
                TransferError::provider_init(PROVIDER_NAME, "init reply carries no transfer id")
            })?;

        debug!("Opened {} transfer {}", self.kind.as_str(), reply.transfer_id);
        self.transfer_id = Some(reply.transfer_id);
        Ok(())
    }

    /// Send one message, retrying transient failures with a linear backoff.
    pub async fn send<T: DeserializeOwned>(&self, message: &Message) -> Result<Option<T>> {
        let mut retries = 0;
        loop {
            match self.send_once(message).await {
                Ok(reply) => return Ok(reply),
                Err(e) => match RetryDecision::for_error(&e) {
                    RetryDecision::Retry if retries < self.max_retries => {
                        retries += 1;
                        warn!(
                            "Remote request {} failed: {}, retry {}/{}",
                            message.uuid, e, retries, self.max_retries
                        );
                        tokio::time::sleep(Duration::from_millis(RETRY_DELAY_MS * retries as u64))
                            .await;
                    }
                    _ => return Err(e),
                },
            }
        }
    }

    async fn send_once<T: DeserializeOwned>(&self, message: &Message) -> Result<Option<T>> {
        let transfer_id = self.transfer_id.as_deref().ok_or_else(|| {
            TransferError::provider_init(PROVIDER_NAME, "transfer is not initialized")
        })?;
        let url = self.endpoint(&[self.kind.as_str(), transfer_id])?;
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .json(message)
            .send()
            .await?;
        decode(response).await
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.runner.clone();
        url.path_segments_mut()
            .map_err(|_| TransferError::Validation(format!("{} cannot be a base url", self.runner)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

/// Read a reply envelope, turning error statuses and error bodies into
/// [`TransferError::Remote`].
async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<Option<T>> {
    let status = response.status();
    let body = response.bytes().await?;
    let reply = serde_json::from_slice::<Reply<T>>(&body);

    if !status.is_success() {
        let message = match reply {
            Ok(Reply {
                error: Some(error), ..
            }) => error.message,
            _ => String::from_utf8_lossy(&body).trim().to_string(),
        };
        return Err(TransferError::Remote {
            status: status.as_u16(),
            message,
        });
    }

    let reply = reply?;
    if let Some(error) = reply.error {
        return Err(TransferError::Remote {
            status: status.as_u16(),
            message: error.message,
        });
    }
    Ok(reply.data)
}
