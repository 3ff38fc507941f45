//! Local file destination: writes a tar archive.

use async_trait::async_trait;
use std::fmt;
use std::io;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::core::{
    DestinationProvider, DestinationResults, FileResult, Provider, ProviderMetadata,
    ProviderType, SchemaMap, StageRecord, TransferStage,
};
use crate::diagnostics::WarningReporter;
use crate::error::{Result, TransferError};

use super::archive::{
    append_entry, archive_file_name, create_archive, finish_archive, jsonl_entry, ArchiveBuilder,
    ASSET_METADATA_DIR, ASSET_UPLOADS_DIR, METADATA_ENTRY,
};
use super::PROVIDER_NAME;

/// Options of a [`FileDestination`].
#[derive(Clone)]
pub struct FileDestinationOptions {
    /// Output path without the `.tar[.gz][.enc]` suffix.
    pub path: PathBuf,

    pub compress: bool,

    pub encrypt: bool,

    /// Passphrase, required when `encrypt` is set.
    pub encryption_key: Option<String>,

    /// Maximum size of one JSONL entry.
    pub jsonl_chunk_bytes: u64,
}

impl fmt::Debug for FileDestinationOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileDestinationOptions")
            .field("path", &self.path)
            .field("compress", &self.compress)
            .field("encrypt", &self.encrypt)
            .field(
                "encryption_key",
                &self.encryption_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("jsonl_chunk_bytes", &self.jsonl_chunk_bytes)
            .finish()
    }
}

/// Pending JSONL entry of the open stage.
struct JsonlChunk {
    stage: TransferStage,
    index: u32,
    buffer: Vec<u8>,
}

pub struct FileDestination {
    options: FileDestinationOptions,
    file_path: PathBuf,
    archive: Option<ArchiveBuilder>,
    source_metadata: Option<ProviderMetadata>,
    chunk: Option<JsonlChunk>,
    reporter: Option<WarningReporter>,
    /// Set once every stage was written; metadata.json is only added then.
    completed: bool,
}

impl FileDestination {
    pub fn new(options: FileDestinationOptions) -> Self {
        let file_path = archive_file_name(&options.path, options.compress, options.encrypt);
        Self {
            options,
            file_path,
            archive: None,
            source_metadata: None,
            chunk: None,
            reporter: None,
            completed: false,
        }
    }

    /// Final archive path.
    pub fn file_path(&self) -> &PathBuf {
        &self.file_path
    }

    /// Run a blocking archive operation off the async runtime.
    async fn with_archive<F>(&mut self, op: F) -> io::Result<()>
    where
        F: FnOnce(&mut ArchiveBuilder) -> io::Result<()> + Send + 'static,
    {
        let mut builder = self
            .archive
            .take()
            .ok_or_else(|| io::Error::other("archive is not open"))?;
        let (builder, result) = tokio::task::spawn_blocking(move || {
            let result = op(&mut builder);
            (builder, result)
        })
        .await
        .map_err(|e| io::Error::other(e.to_string()))?;
        self.archive = Some(builder);
        result
    }

    async fn flush_chunk(&mut self) -> io::Result<()> {
        let Some(chunk) = self.chunk.as_mut() else {
            return Ok(());
        };
        if chunk.buffer.is_empty() {
            return Ok(());
        }

        let name = jsonl_entry(chunk.stage, chunk.index);
        let data = std::mem::take(&mut chunk.buffer);
        chunk.index += 1;
        debug!("Writing {} ({} bytes)", name, data.len());
        self.with_archive(move |builder| append_entry(builder, &name, &data))
            .await
    }

    async fn write_asset(&mut self, record: StageRecord) -> io::Result<()> {
        let StageRecord::Asset(asset) = record else {
            return Ok(());
        };
        let name = asset.filename.as_str();
        if name.is_empty() || name.contains('/') || name.contains('\\') || name == ".." {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid asset file name '{}'", name),
            ));
        }

        let metadata_path = format!("{}/{}.json", ASSET_METADATA_DIR, name);
        let upload_path = format!("{}/{}", ASSET_UPLOADS_DIR, name);
        let metadata = serde_json::to_vec(&asset)?;
        let data = asset.data;
        self.with_archive(move |builder| {
            append_entry(builder, &metadata_path, &metadata)?;
            append_entry(builder, &upload_path, &data)
        })
        .await
    }

    async fn write_line(&mut self, record: StageRecord) -> Result<()> {
        let stage = record.stage();
        let mut line = serde_json::to_vec(&record.to_json()?)?;
        line.push(b'\n');

        let limit = self.options.jsonl_chunk_bytes;
        let full = match self.chunk.as_ref() {
            Some(chunk) if chunk.stage == stage => {
                !chunk.buffer.is_empty() && (chunk.buffer.len() + line.len()) as u64 > limit
            }
            _ => {
                return Err(TransferError::transfer(
                    stage,
                    "record received outside of its stage",
                ))
            }
        };
        if full {
            self.flush_chunk()
                .await
                .map_err(|e| TransferError::transfer(stage, e.to_string()))?;
        }
        if let Some(chunk) = self.chunk.as_mut() {
            chunk.buffer.extend_from_slice(&line);
        }
        Ok(())
    }
}

#[async_trait]
impl Provider for FileDestination {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Destination
    }

    async fn bootstrap(&mut self) -> Result<()> {
        if self.archive.is_some() {
            return Ok(());
        }
        let key = match (self.options.encrypt, self.options.encryption_key.as_deref()) {
            (true, None) | (true, Some("")) => {
                return Err(TransferError::provider_init(
                    PROVIDER_NAME,
                    "an encryption key is required to encrypt the archive",
                ))
            }
            (true, Some(key)) => Some(key.to_string()),
            (false, _) => None,
        };
        if self.file_path.exists() {
            return Err(TransferError::provider_init(
                PROVIDER_NAME,
                format!("file {} already exists", self.file_path.display()),
            ));
        }

        let path = self.file_path.clone();
        let compress = self.options.compress;
        let builder =
            tokio::task::spawn_blocking(move || create_archive(&path, compress, key.as_deref()))
                .await
                .map_err(|e| TransferError::provider_init(PROVIDER_NAME, e.to_string()))?
                .map_err(|e| {
                    TransferError::provider_init(
                        PROVIDER_NAME,
                        format!("cannot create {}: {}", self.file_path.display(), e),
                    )
                })?;

        info!("Writing archive {}", self.file_path.display());
        self.archive = Some(builder);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.archive.is_none() {
            return Ok(());
        }
        self.flush_chunk().await?;
        self.chunk = None;

        if self.completed {
            let mut metadata = self.source_metadata.clone().unwrap_or_default();
            if metadata.created_at.is_none() {
                metadata.created_at = Some(chrono::Utc::now());
            }
            let data = serde_json::to_vec_pretty(&metadata)?;
            self.with_archive(move |builder| append_entry(builder, METADATA_ENTRY, &data))
                .await?;
        } else {
            let message = format!(
                "Transfer did not complete, archive {} is incomplete",
                self.file_path.display()
            );
            warn!("{}", message);
            if let Some(reporter) = &self.reporter {
                reporter.warn(message);
            }
        }

        if let Some(builder) = self.archive.take() {
            tokio::task::spawn_blocking(move || finish_archive(builder))
                .await
                .map_err(|e| io::Error::other(e.to_string()))??;
        }
        if self.completed {
            info!("Archive {} completed", self.file_path.display());
        }
        Ok(())
    }

    async fn get_metadata(&mut self) -> Result<Option<ProviderMetadata>> {
        Ok(None)
    }

    async fn get_schemas(&mut self) -> Result<Option<SchemaMap>> {
        Ok(None)
    }

    fn set_warning_reporter(&mut self, reporter: WarningReporter) {
        self.reporter = Some(reporter);
    }
}

#[async_trait]
impl DestinationProvider for FileDestination {
    fn set_source_metadata(&mut self, metadata: Option<ProviderMetadata>) {
        self.source_metadata = metadata;
    }

    async fn start_stage(&mut self, stage: TransferStage) -> Result<bool> {
        self.flush_chunk().await?;
        self.chunk = Some(JsonlChunk {
            stage,
            index: 1,
            buffer: Vec::new(),
        });
        Ok(true)
    }

    async fn after_transfer(&mut self) -> Result<()> {
        self.completed = true;
        Ok(())
    }

    async fn write(&mut self, record: StageRecord) -> Result<()> {
        let stage = record.stage();
        if stage == TransferStage::Media {
            return self
                .write_asset(record)
                .await
                .map_err(|e| TransferError::transfer(stage, e.to_string()));
        }
        self.write_line(record).await
    }

    async fn finish_stage(&mut self, stage: TransferStage) -> Result<()> {
        self.flush_chunk()
            .await
            .map_err(|e| TransferError::transfer(stage, e.to_string()))?;
        self.chunk = None;
        if let Some(reporter) = &self.reporter {
            reporter.info(format!("{} written to archive", stage));
        }
        Ok(())
    }

    fn results(&self) -> DestinationResults {
        DestinationResults {
            file: Some(FileResult {
                path: self.file_path.clone(),
            }),
        }
    }
}
