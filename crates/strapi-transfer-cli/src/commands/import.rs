//! `import`: archive file into the local instance.

use regex::Regex;
use std::path::Path;
use std::sync::Arc;
use strapi_transfer::providers::{
    DirectoryStore, FileSource, FileSourceOptions, LocalDestination, LocalDestinationOptions,
};
use strapi_transfer::schema::ConfirmingDiffHandler;
use strapi_transfer::{
    ConflictStrategy, ErrorCode, RestoreConfiguration, Result, SchemaStrategy, TransferEngine,
    TransferError, VersionStrategy,
};
use tracing::info;

use super::{engine_options, run_engine, CommandContext, Operation};
use crate::options::ImportArgs;
use crate::prompts::{self, AssetsDirectoryHandler, TerminalConfirmation};

pub const IMPORT_WARNING: &str = "The import will delete your existing data!";

const ARCHIVE_PATTERN: &str = r"\.tar(\.gz)?(\.enc)?$";

/// `.tar`, optionally followed by `.gz`, then optionally by `.enc`.
pub fn is_archive_name(name: &str) -> Result<bool> {
    let pattern = Regex::new(ARCHIVE_PATTERN)
        .map_err(|e| TransferError::Validation(format!("invalid archive pattern: {}", e)))?;
    Ok(pattern.is_match(name))
}

/// Check the archive name and existence before any provider is built.
pub fn validate_archive_path(path: &Path) -> Result<()> {
    let name = path.to_string_lossy();
    if !is_archive_name(&name)? {
        return Err(TransferError::Validation(format!(
            "Invalid file extension for {}: expected .tar, .tar.gz, .tar.enc or .tar.gz.enc",
            name
        )));
    }
    if !path.is_file() {
        return Err(TransferError::Validation(format!(
            "File {} does not exist",
            name
        )));
    }
    Ok(())
}

pub async fn run(ctx: &CommandContext, args: ImportArgs) -> Result<()> {
    let filters = args.filters.resolve()?;
    validate_archive_path(&args.file)?;

    let mut source_options = FileSourceOptions::from_path(&args.file, args.key);
    if source_options.encrypted
        && source_options
            .encryption_key
            .as_deref()
            .map_or(true, str::is_empty)
    {
        source_options.encryption_key =
            Some(prompts::prompt_key(&ctx.signals, "Please enter the decryption key").await?);
    }

    if !prompts::confirm_destructive(&ctx.signals, IMPORT_WARNING, args.force).await? {
        return Err(TransferError::Aborted);
    }

    let store = Arc::new(DirectoryStore::new(&ctx.config.instance.data_dir));
    let destination = LocalDestination::new(
        store,
        LocalDestinationOptions {
            strategy: ConflictStrategy::Restore,
            restore: RestoreConfiguration::from_filters(&filters.exclude, &filters.only),
        },
    );
    let source = FileSource::new(source_options);

    let options = engine_options(ctx, &filters, VersionStrategy::Ignore, SchemaStrategy::Strict);
    let mut engine = TransferEngine::new(Box::new(source), Box::new(destination), options)?;
    engine.add_schema_diff_handler(ConfirmingDiffHandler::new(
        TerminalConfirmation::new(ctx.signals.clone(), engine.abort_handle()),
        args.force,
    ));
    engine.add_error_handler(
        ErrorCode::AssetsDirectory,
        AssetsDirectoryHandler::new(ctx.signals.clone(), args.force),
    );

    info!("Starting import from {}", args.file.display());
    run_engine(ctx, Operation::Import, engine).await?;
    if !ctx.output_json {
        println!("Import process has been completed successfully!");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_archive_pattern() {
        for name in ["a.tar", "a.tar.gz", "a.tar.enc", "dir/a.tar.gz.enc"] {
            assert!(is_archive_name(name).unwrap(), "{}", name);
        }
        for name in ["a.zip", "a.gz", "a.tar.enc.gz", "a.tar.bak"] {
            assert!(!is_archive_name(name).unwrap(), "{}", name);
        }
    }

    #[test]
    fn test_validate_archive_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.tar");
        assert!(validate_archive_path(&missing)
            .unwrap_err()
            .to_string()
            .contains("does not exist"));

        let wrong = PathBuf::from("backup.zip");
        assert!(validate_archive_path(&wrong)
            .unwrap_err()
            .to_string()
            .contains("Invalid file extension"));

        let present = dir.path().join("export.tar.gz");
        std::fs::write(&present, b"").unwrap();
        assert!(validate_archive_path(&present).is_ok());
    }
}
