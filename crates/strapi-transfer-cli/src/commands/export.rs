//! `export`: local instance to an archive file.

use std::path::PathBuf;
use std::sync::Arc;
use strapi_transfer::providers::{
    DirectoryStore, FileDestination, FileDestinationOptions, LocalSource,
};
use strapi_transfer::{Result, SchemaStrategy, TransferEngine, VersionStrategy};
use tracing::info;

use super::{engine_options, run_engine, CommandContext, Operation};
use crate::options::ExportArgs;
use crate::prompts;

/// `export_<YYYYMMDDHHMMSS>` in the working directory.
pub fn default_file_name() -> PathBuf {
    PathBuf::from(format!(
        "export_{}",
        chrono::Local::now().format("%Y%m%d%H%M%S")
    ))
}

pub async fn run(ctx: &CommandContext, args: ExportArgs) -> Result<()> {
    let filters = args.filters.resolve()?;

    let encryption_key = match (args.encrypt, args.key) {
        (true, Some(key)) if !key.is_empty() => Some(key),
        (true, _) => Some(prompts::prompt_key(&ctx.signals, "Please enter an encryption key").await?),
        (false, _) => None,
    };

    let store = Arc::new(DirectoryStore::new(&ctx.config.instance.data_dir));
    let source = LocalSource::new(store);
    let destination = FileDestination::new(FileDestinationOptions {
        path: args.file.unwrap_or_else(default_file_name),
        compress: args.compress,
        encrypt: args.encrypt,
        encryption_key,
        jsonl_chunk_bytes: ctx.config.transfer.jsonl_chunk_bytes,
    });
    let archive = destination.file_path().clone();

    // The archive is written from scratch: nothing to compare against.
    let options = engine_options(ctx, &filters, VersionStrategy::Ignore, SchemaStrategy::Ignore);
    let engine = TransferEngine::new(Box::new(source), Box::new(destination), options)?;

    info!("Starting export from {}", ctx.config.instance.data_dir.display());
    let results = run_engine(ctx, Operation::Export, engine).await?;

    let path = results
        .destination
        .file
        .map(|file| file.path)
        .unwrap_or(archive);
    if !ctx.output_json {
        println!("Export archive is in {}", path.display());
    }
    Ok(())
}
