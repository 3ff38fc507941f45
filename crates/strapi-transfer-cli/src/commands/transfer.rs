//! `transfer`: local instance to or from a remote instance.

use std::sync::Arc;
use strapi_transfer::core::{DestinationProvider, SourceProvider};
use strapi_transfer::providers::{
    DirectoryStore, LocalDestination, LocalDestinationOptions, LocalSource, RemoteDestination,
    RemoteOptions, RemoteSource,
};
use strapi_transfer::schema::ConfirmingDiffHandler;
use strapi_transfer::{
    ConflictStrategy, ErrorCode, RestoreConfiguration, Result, SchemaStrategy, TransferEngine,
    TransferError, VersionStrategy,
};
use tracing::info;
use url::Url;

use super::{engine_options, run_engine, CommandContext, Operation};
use crate::options::{RemoteEndpoint, TransferArgs};
use crate::prompts::{self, AssetsDirectoryHandler, TerminalConfirmation};

fn remote_options(ctx: &CommandContext, url: Url, token: String) -> RemoteOptions {
    let mut options = RemoteOptions::new(url, token);
    options.max_retries = ctx.config.transfer.max_retries;
    options.timeout = ctx.config.transfer.remote_timeout();
    options.batch_bytes = ctx.config.transfer.remote_batch_bytes;
    options
}

/// Message of the destructive-operation prompt.
pub fn confirmation_message(endpoint: &RemoteEndpoint) -> String {
    match endpoint {
        RemoteEndpoint::Source { .. } => {
            "The transfer will delete existing data from the local instance!".to_string()
        }
        RemoteEndpoint::Destination { url, .. } => format!(
            "The transfer will delete existing data from the remote instance {}!",
            url
        ),
    }
}

pub async fn run(ctx: &CommandContext, args: TransferArgs) -> Result<()> {
    let filters = args.filters.resolve()?;
    let endpoint = args.endpoint()?;

    if !prompts::confirm_destructive(&ctx.signals, &confirmation_message(&endpoint), args.force)
        .await?
    {
        return Err(TransferError::Aborted);
    }

    let restore = RestoreConfiguration::from_filters(&filters.exclude, &filters.only);
    let store = Arc::new(DirectoryStore::new(&ctx.config.instance.data_dir));
    let (source, destination): (Box<dyn SourceProvider>, Box<dyn DestinationProvider>) =
        match endpoint {
            RemoteEndpoint::Source { url, token } => {
                info!("Pulling from {}", url);
                let source = RemoteSource::new(remote_options(ctx, url, token));
                let destination = LocalDestination::new(
                    store,
                    LocalDestinationOptions {
                        strategy: ConflictStrategy::Restore,
                        restore,
                    },
                );
                (Box::new(source), Box::new(destination))
            }
            RemoteEndpoint::Destination { url, token } => {
                info!("Pushing to {}", url);
                let source = LocalSource::new(store);
                let destination = RemoteDestination::new(
                    remote_options(ctx, url, token),
                    ConflictStrategy::Restore,
                    restore,
                );
                (Box::new(source), Box::new(destination))
            }
        };

    let options = engine_options(ctx, &filters, VersionStrategy::Exact, SchemaStrategy::Strict);
    let mut engine = TransferEngine::new(source, destination, options)?;
    engine.add_schema_diff_handler(ConfirmingDiffHandler::new(
        TerminalConfirmation::new(ctx.signals.clone(), engine.abort_handle()),
        args.force,
    ));
    engine.add_error_handler(
        ErrorCode::AssetsDirectory,
        AssetsDirectoryHandler::new(ctx.signals.clone(), args.force),
    );

    run_engine(ctx, Operation::Transfer, engine).await?;
    if !ctx.output_json {
        println!("Transfer process has been completed successfully!");
    }
    Ok(())
}
