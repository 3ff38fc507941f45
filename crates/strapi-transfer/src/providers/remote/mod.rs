//! Remote instance provider over the HTTP transfer runner.
//!
//! A transfer is opened with `POST <url>/admin/transfer/runner/{push|pull}`,
//! which returns a transfer id. Every later message goes to
//! `<url>/admin/transfer/runner/{push|pull}/<id>` as a JSON body; see
//! [`protocol`] for the message shapes.

pub mod client;
pub mod destination;
pub mod protocol;
pub mod source;

use std::fmt;
use std::time::Duration;
use url::Url;

use crate::error::{Result, TransferError};

pub use client::{RemoteClient, RetryDecision};
pub use destination::RemoteDestination;
pub use protocol::TransferKind;
pub use source::RemoteSource;

/// Provider name used in diagnostics.
pub const PROVIDER_NAME: &str = "remote-strapi";

/// Connection settings of a remote instance.
#[derive(Clone)]
pub struct RemoteOptions {
    pub url: Url,

    /// Transfer token of the remote instance.
    pub token: String,

    pub max_retries: u32,

    pub timeout: Duration,

    /// Push batches are sent once they reach this size.
    pub batch_bytes: usize,
}

impl fmt::Debug for RemoteOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteOptions")
            .field("url", &self.url.as_str())
            .field("token", &"[REDACTED]")
            .field("max_retries", &self.max_retries)
            .field("timeout", &self.timeout)
            .field("batch_bytes", &self.batch_bytes)
            .finish()
    }
}

impl RemoteOptions {
    pub fn new(url: Url, token: impl Into<String>) -> Self {
        Self {
            url,
            token: token.into(),
            max_retries: 3,
            timeout: Duration::from_secs(300),
            batch_bytes: 1024 * 1024,
        }
    }

    fn client(&self, kind: TransferKind) -> Result<RemoteClient> {
        if self.token.is_empty() {
            return Err(TransferError::provider_init(
                PROVIDER_NAME,
                "a transfer token is required",
            ));
        }
        RemoteClient::new(
            &self.url,
            self.token.clone(),
            kind,
            self.timeout,
            self.max_retries,
        )
        .map_err(|e| TransferError::provider_init(PROVIDER_NAME, e.to_string()))
    }
}
