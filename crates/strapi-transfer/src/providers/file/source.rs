//! Local file source: reads a tar archive written by [`super::FileDestination`].

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::core::{
    record_channel, Asset, AssetStats, Provider, ProviderMetadata, ProviderType, RecordStream,
    Schema, SchemaMap, SourceProvider, StageRecord, TransferStage,
};
use crate::diagnostics::WarningReporter;
use crate::error::{Result, TransferError};

use super::archive::{
    detect_format, entry_path, open_archive, stage_dir, ASSET_METADATA_DIR, ASSET_UPLOADS_DIR,
    METADATA_ENTRY,
};
use super::PROVIDER_NAME;

/// Options of a [`FileSource`].
#[derive(Clone)]
pub struct FileSourceOptions {
    /// Full archive path.
    pub path: PathBuf,

    pub compressed: bool,

    pub encrypted: bool,

    pub encryption_key: Option<String>,
}

impl FileSourceOptions {
    /// Derive compression and encryption from the file name.
    pub fn from_path(path: impl Into<PathBuf>, encryption_key: Option<String>) -> Self {
        let path = path.into();
        let (compressed, encrypted) = detect_format(&path);
        Self {
            path,
            compressed,
            encrypted,
            encryption_key,
        }
    }
}

impl fmt::Debug for FileSourceOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSourceOptions")
            .field("path", &self.path)
            .field("compressed", &self.compressed)
            .field("encrypted", &self.encrypted)
            .field(
                "encryption_key",
                &self.encryption_key.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// What bootstrap learns from one scan of the archive.
struct ArchiveIndex {
    metadata: ProviderMetadata,
    schemas: SchemaMap,
}

pub struct FileSource {
    options: FileSourceOptions,
    metadata: Option<ProviderMetadata>,
    schemas: Option<SchemaMap>,
    reporter: Option<WarningReporter>,
}

impl FileSource {
    pub fn new(options: FileSourceOptions) -> Self {
        Self {
            options,
            metadata: None,
            schemas: None,
            reporter: None,
        }
    }

    fn key(&self) -> Option<String> {
        if self.options.encrypted {
            self.options.encryption_key.clone()
        } else {
            None
        }
    }
}

fn scan(path: &Path, compressed: bool, key: Option<&str>) -> Result<ArchiveIndex> {
    let mut archive = open_archive(path, compressed, key)?;
    let mut metadata = None;
    let mut schemas = SchemaMap::new();
    let schema_prefix = format!("{}/", stage_dir(TransferStage::Schemas));

    for entry in archive.entries()? {
        let mut entry = entry?;
        let name = entry_path(&entry)?;
        if name == METADATA_ENTRY {
            let mut raw = Vec::new();
            entry.read_to_end(&mut raw)?;
            metadata = Some(serde_json::from_slice::<ProviderMetadata>(&raw)?);
        } else if name.starts_with(&schema_prefix) && name.ends_with(".jsonl") {
            for line in BufReader::new(&mut entry).lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let schema: Schema = serde_json::from_str(&line)?;
                schemas.insert(schema.uid.clone(), schema);
            }
        }
    }

    let metadata = metadata.ok_or_else(|| {
        TransferError::provider_init(PROVIDER_NAME, "archive has no metadata.json")
    })?;
    Ok(ArchiveIndex { metadata, schemas })
}

/// Send `record`; `false` once the receiver is gone.
fn send(tx: &mpsc::Sender<Result<StageRecord>>, record: StageRecord) -> bool {
    tx.blocking_send(Ok(record)).is_ok()
}

fn read_stage(
    path: &Path,
    compressed: bool,
    key: Option<&str>,
    stage: TransferStage,
    tx: &mpsc::Sender<Result<StageRecord>>,
    reporter: Option<&WarningReporter>,
) -> Result<()> {
    let mut archive = open_archive(path, compressed, key)?;

    if stage == TransferStage::Media {
        let metadata_prefix = format!("{}/", ASSET_METADATA_DIR);
        let uploads_prefix = format!("{}/", ASSET_UPLOADS_DIR);
        let mut pending: HashMap<String, Asset> = HashMap::new();

        for entry in archive.entries()? {
            let mut entry = entry?;
            let name = entry_path(&entry)?;
            if let Some(file) = name.strip_prefix(&metadata_prefix) {
                let mut raw = Vec::new();
                entry.read_to_end(&mut raw)?;
                let asset: Asset = serde_json::from_slice(&raw)?;
                pending.insert(file.trim_end_matches(".json").to_string(), asset);
            } else if let Some(file) = name.strip_prefix(&uploads_prefix) {
                let mut data = Vec::new();
                entry.read_to_end(&mut data)?;
                let mut asset = pending.remove(file).unwrap_or_else(|| {
                    if let Some(reporter) = reporter {
                        reporter.warn(format!("No metadata found for asset {}", file));
                    }
                    Asset {
                        filename: file.to_string(),
                        filepath: file.to_string(),
                        stats: AssetStats::default(),
                        metadata: None,
                        data: Bytes::new(),
                    }
                });
                asset.stats.size = data.len() as u64;
                asset.data = Bytes::from(data);
                if !send(tx, StageRecord::Asset(asset)) {
                    return Ok(());
                }
            }
        }
        return Ok(());
    }

    let prefix = format!("{}/", stage_dir(stage));
    for entry in archive.entries()? {
        let mut entry = entry?;
        let name = entry_path(&entry)?;
        if !name.starts_with(&prefix) || !name.ends_with(".jsonl") {
            continue;
        }
        debug!("Reading {}", name);
        for line in BufReader::new(&mut entry).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record = StageRecord::from_json(stage, serde_json::from_str(&line)?)?;
            if !send(tx, record) {
                return Ok(());
            }
        }
    }
    Ok(())
}

#[async_trait]
impl Provider for FileSource {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Source
    }

    async fn bootstrap(&mut self) -> Result<()> {
        if self.metadata.is_some() {
            return Ok(());
        }
        let path = self.options.path.clone();
        if !path.is_file() {
            return Err(TransferError::provider_init(
                PROVIDER_NAME,
                format!("file {} does not exist", path.display()),
            ));
        }
        let key = self.key();
        if self.options.encrypted && key.as_deref().map_or(true, str::is_empty) {
            return Err(TransferError::provider_init(
                PROVIDER_NAME,
                "an encryption key is required to read an encrypted archive",
            ));
        }

        let compressed = self.options.compressed;
        let index = tokio::task::spawn_blocking(move || scan(&path, compressed, key.as_deref()))
            .await
            .map_err(|e| TransferError::provider_init(PROVIDER_NAME, e.to_string()))?
            .map_err(|e| match e {
                TransferError::ProviderInitialization { .. } => e,
                other => TransferError::provider_init(
                    PROVIDER_NAME,
                    format!(
                        "could not read the archive metadata (wrong key or corrupted file?): {}",
                        other
                    ),
                ),
            })?;

        info!(
            "Opened archive {} ({} schemas)",
            self.options.path.display(),
            index.schemas.len()
        );
        self.metadata = Some(index.metadata);
        self.schemas = Some(index.schemas);
        Ok(())
    }

    async fn get_metadata(&mut self) -> Result<Option<ProviderMetadata>> {
        Ok(self.metadata.clone())
    }

    async fn get_schemas(&mut self) -> Result<Option<SchemaMap>> {
        Ok(self.schemas.clone())
    }

    fn set_warning_reporter(&mut self, reporter: WarningReporter) {
        self.reporter = Some(reporter);
    }
}

#[async_trait]
impl SourceProvider for FileSource {
    async fn stream(&mut self, stage: TransferStage) -> Result<Option<RecordStream>> {
        let (tx, rx) = record_channel();
        let path = self.options.path.clone();
        let compressed = self.options.compressed;
        let key = self.key();
        let reporter = self.reporter.clone();

        tokio::task::spawn_blocking(move || {
            if let Err(e) = read_stage(&path, compressed, key.as_deref(), stage, &tx, reporter.as_ref())
            {
                let _ = tx.blocking_send(Err(TransferError::stage_integrity(stage, e.to_string())));
            }
        });
        Ok(Some(rx))
    }
}
