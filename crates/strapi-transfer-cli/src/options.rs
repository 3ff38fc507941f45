//! Command arguments shared by export, import and transfer.

use clap::Args;
use std::path::PathBuf;
use std::time::Duration;
use strapi_transfer::engine::validate_filters;
use strapi_transfer::{Result, TransferError, TransferGroupFilter};
use url::Url;

/// `--exclude`, `--only` and `--throttle`.
#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Exclude data using comma-separated types (content, files, config, schemas, links)
    #[arg(long, value_name = "TYPES")]
    pub exclude: Option<String>,

    /// Include only these data types, comma-separated (content, files, config, schemas, links)
    #[arg(long, value_name = "TYPES")]
    pub only: Option<String>,

    /// Delay in milliseconds between two records
    #[arg(long, value_name = "MS")]
    pub throttle: Option<u64>,
}

/// Parsed and validated filters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filters {
    pub exclude: Vec<TransferGroupFilter>,
    pub only: Vec<TransferGroupFilter>,
    pub throttle: Option<Duration>,
}

impl FilterArgs {
    pub fn resolve(&self) -> Result<Filters> {
        let parse = |value: &Option<String>| match value {
            Some(list) => TransferGroupFilter::parse_list(list),
            None => Ok(Vec::new()),
        };
        let exclude = parse(&self.exclude)?;
        let only = parse(&self.only)?;
        validate_filters(&exclude, &only)?;
        Ok(Filters {
            exclude,
            only,
            throttle: self
                .throttle
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
        })
    }
}

#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
    /// Name of the archive, without extension [default: export_<timestamp>]
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Encrypt the archive
    #[arg(long)]
    pub encrypt: bool,

    /// Encryption key, prompted for when missing
    #[arg(short, long)]
    pub key: Option<String>,

    /// Compress the archive with gzip
    #[arg(long)]
    pub compress: bool,

    #[command(flatten)]
    pub filters: FilterArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ImportArgs {
    /// Archive to import (.tar, .tar.gz, .tar.enc or .tar.gz.enc)
    #[arg(short, long)]
    pub file: PathBuf,

    /// Decryption key, prompted for when missing
    #[arg(short, long)]
    pub key: Option<String>,

    /// Skip confirmation prompts
    #[arg(long)]
    pub force: bool,

    #[command(flatten)]
    pub filters: FilterArgs,
}

#[derive(Args, Debug, Clone)]
pub struct TransferArgs {
    /// URL of the remote instance to pull from
    #[arg(long)]
    pub from: Option<Url>,

    /// Transfer token of the remote source
    #[arg(long)]
    pub from_token: Option<String>,

    /// URL of the remote instance to push to
    #[arg(long)]
    pub to: Option<Url>,

    /// Transfer token of the remote destination
    #[arg(long)]
    pub to_token: Option<String>,

    /// Skip confirmation prompts
    #[arg(long)]
    pub force: bool,

    #[command(flatten)]
    pub filters: FilterArgs,
}

/// Remote side of a `transfer` command.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteEndpoint {
    /// Pull from the remote instance into the local one.
    Source { url: Url, token: String },
    /// Push the local instance to the remote one.
    Destination { url: Url, token: String },
}

impl TransferArgs {
    /// Exactly one of `--from` / `--to`, with its token.
    pub fn endpoint(&self) -> Result<RemoteEndpoint> {
        match (&self.from, &self.to) {
            (Some(url), None) => {
                let token = self.from_token.clone().filter(|t| !t.is_empty()).ok_or_else(|| {
                    TransferError::Validation(
                        "Missing token for remote source, use --from-token".into(),
                    )
                })?;
                Ok(RemoteEndpoint::Source {
                    url: url.clone(),
                    token,
                })
            }
            (None, Some(url)) => {
                let token = self.to_token.clone().filter(|t| !t.is_empty()).ok_or_else(|| {
                    TransferError::Validation(
                        "Missing token for remote destination, use --to-token".into(),
                    )
                })?;
                Ok(RemoteEndpoint::Destination {
                    url: url.clone(),
                    token,
                })
            }
            _ => Err(TransferError::Validation(
                "Exactly one source (from) or destination (to) option must be provided"
                    .into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer_args() -> TransferArgs {
        TransferArgs {
            from: None,
            from_token: None,
            to: None,
            to_token: None,
            force: false,
            filters: FilterArgs::default(),
        }
    }

    #[test]
    fn test_filters_overlap_rejected() {
        let args = FilterArgs {
            exclude: Some("content,files".into()),
            only: Some("files".into()),
            throttle: None,
        };
        let err = args.resolve().unwrap_err();
        assert!(err.to_string().contains("files"));
    }

    #[test]
    fn test_filters_throttle() {
        let args = FilterArgs {
            throttle: Some(25),
            ..Default::default()
        };
        assert_eq!(args.resolve().unwrap().throttle, Some(Duration::from_millis(25)));

        let zero = FilterArgs {
            throttle: Some(0),
            ..Default::default()
        };
        assert_eq!(zero.resolve().unwrap().throttle, None);
    }

    #[test]
    fn test_endpoint_requires_exactly_one_side() {
        let err = transfer_args().endpoint().unwrap_err();
        assert!(err.to_string().to_lowercase().contains("one source"));

        let mut both = transfer_args();
        both.from = Some(Url::parse("https://a.example.com").unwrap());
        both.to = Some(Url::parse("https://b.example.com").unwrap());
        assert!(both.endpoint().is_err());
    }

    #[test]
    fn test_endpoint_requires_token() {
        let mut args = transfer_args();
        args.to = Some(Url::parse("https://b.example.com").unwrap());
        assert!(args.endpoint().unwrap_err().to_string().contains("--to-token"));

        args.to_token = Some("t".into());
        assert!(matches!(
            args.endpoint().unwrap(),
            RemoteEndpoint::Destination { .. }
        ));
    }
}
