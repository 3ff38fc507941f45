//! Content store of a local instance.

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info};

use crate::core::{
    record_channel, Asset, ConfigurationItem, ConfigurationKind, Entity, Link, ProviderMetadata,
    RecordStream, Schema, SchemaMap, StageRecord, TransferStage,
};
use crate::error::{ErrorCode, Result, TransferError};
use crate::strategy::{ConfigurationRestore, EntityRestore};

const METADATA_FILE: &str = "metadata.json";
const SCHEMAS_FILE: &str = "schemas.json";
const ENTITIES_FILE: &str = "entities.jsonl";
const LINKS_FILE: &str = "links.jsonl";
const CONFIGURATION_FILE: &str = "configuration.jsonl";
const ASSETS_FILE: &str = "assets.jsonl";
const UPLOADS_DIR: &str = "uploads";

/// `(content type, id)` of an entity.
pub type EntityKey = (String, i64);

/// Persistence of one CMS instance, as seen by the transfer providers.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Make sure the store can be read and written.
    async fn open(&self, create: bool) -> Result<()>;

    async fn metadata(&self) -> Result<Option<ProviderMetadata>>;

    async fn schemas(&self) -> Result<Option<SchemaMap>>;

    /// Stream every record of a stage, in storage order.
    async fn stream(&self, stage: TransferStage) -> Result<RecordStream>;

    /// Append records of one non-media stage.
    async fn append(&self, stage: TransferStage, records: &[StageRecord]) -> Result<()>;

    /// Store one asset with its bytes.
    async fn put_asset(&self, asset: &Asset) -> Result<()>;

    async fn entity_keys(&self) -> Result<HashSet<EntityKey>>;

    /// Delete entities in scope, and the links pointing at them.
    /// Returns the number of deleted entities.
    async fn delete_entities(&self, restore: &EntityRestore) -> Result<usize>;

    /// Delete configuration items selected by `restore`.
    async fn delete_configuration(&self, restore: &ConfigurationRestore) -> Result<usize>;

    /// Move the current assets aside and start an empty assets directory.
    async fn backup_assets(&self) -> Result<PathBuf>;

    async fn remove_backup(&self, backup: &Path) -> Result<()>;
}

/// [`ContentStore`] over a plain directory.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn stage_file(stage: TransferStage) -> &'static str {
        match stage {
            TransferStage::Schemas => SCHEMAS_FILE,
            TransferStage::Entities => ENTITIES_FILE,
            TransferStage::Links => LINKS_FILE,
            TransferStage::Configuration => CONFIGURATION_FILE,
            TransferStage::Media => ASSETS_FILE,
        }
    }

    fn upload_path(&self, filename: &str) -> Result<PathBuf> {
        if filename.is_empty()
            || filename.contains('/')
            || filename.contains('\\')
            || filename == ".."
            || filename == "."
        {
            return Err(TransferError::stage_integrity(
                TransferStage::Media,
                format!("invalid asset file name '{}'", filename),
            ));
        }
        Ok(self.path(UPLOADS_DIR).join(filename))
    }

    /// Write a JSON file, pretty-printed.
    pub async fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        fs::write(self.path(name), serde_json::to_vec_pretty(value)?).await?;
        Ok(())
    }

    /// Store instance metadata.
    pub async fn set_metadata(&self, metadata: &ProviderMetadata) -> Result<()> {
        self.write_json(METADATA_FILE, metadata).await
    }

    /// Store the schema snapshot.
    pub async fn set_schemas(&self, schemas: &SchemaMap) -> Result<()> {
        let list: Vec<&Schema> = schemas.values().collect();
        self.write_json(SCHEMAS_FILE, &list).await
    }

    async fn read_lines<T: DeserializeOwned>(&self, name: &str) -> Result<Vec<T>> {
        let content = match fs::read_to_string(self.path(name)).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(TransferError::from))
            .collect()
    }

    async fn rewrite_lines<T: Serialize>(&self, name: &str, items: &[T]) -> Result<()> {
        let mut out = Vec::new();
        for item in items {
            serde_json::to_writer(&mut out, item)?;
            out.push(b'\n');
        }
        let tmp = self.path(&format!("{}.tmp", name));
        fs::write(&tmp, out).await?;
        fs::rename(&tmp, self.path(name)).await?;
        Ok(())
    }

    async fn read_optional(&self, name: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path(name)).await {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ContentStore for DirectoryStore {
    async fn open(&self, create: bool) -> Result<()> {
        if create {
            fs::create_dir_all(self.path(UPLOADS_DIR)).await?;
            return Ok(());
        }
        if !fs::metadata(&self.root).await?.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} is not a directory", self.root.display()),
            )
            .into());
        }
        Ok(())
    }

    async fn metadata(&self) -> Result<Option<ProviderMetadata>> {
        self.read_optional(METADATA_FILE)
            .await?
            .map(|raw| serde_json::from_slice(&raw).map_err(TransferError::from))
            .transpose()
    }

    async fn schemas(&self) -> Result<Option<SchemaMap>> {
        let Some(raw) = self.read_optional(SCHEMAS_FILE).await? else {
            return Ok(None);
        };
        let list: Vec<Schema> = serde_json::from_slice(&raw)?;
        Ok(Some(list.into_iter().map(|s| (s.uid.clone(), s)).collect()))
    }

    async fn stream(&self, stage: TransferStage) -> Result<RecordStream> {
        let (tx, rx) = record_channel();

        if stage == TransferStage::Schemas {
            let schemas = self.schemas().await?.unwrap_or_default();
            tokio::spawn(async move {
                for schema in schemas.into_values() {
                    if tx.send(Ok(StageRecord::Schema(schema))).await.is_err() {
                        break;
                    }
                }
            });
            return Ok(rx);
        }

        let path = self.path(Self::stage_file(stage));
        let uploads = self.path(UPLOADS_DIR);
        let file = match fs::File::open(&path).await {
            Ok(file) => Some(file),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        tokio::spawn(async move {
            let Some(file) = file else {
                return;
            };
            let mut lines = BufReader::new(file).lines();
            loop {
                let item = match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => read_record(stage, &line, &uploads).await,
                    Ok(None) => break,
                    Err(e) => Err(TransferError::stage_integrity(stage, e.to_string())),
                };
                let failed = item.is_err();
                if tx.send(item).await.is_err() || failed {
                    break;
                }
            }
        });
        Ok(rx)
    }

    async fn append(&self, stage: TransferStage, records: &[StageRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut out = Vec::new();
        for record in records {
            serde_json::to_writer(&mut out, &record.to_json()?)?;
            out.push(b'\n');
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(Self::stage_file(stage)))
            .await?;
        file.write_all(&out).await?;
        file.flush().await?;
        debug!("Appended {} {} records", records.len(), stage);
        Ok(())
    }

    async fn put_asset(&self, asset: &Asset) -> Result<()> {
        let upload = self.upload_path(&asset.filename)?;
        fs::write(&upload, &asset.data).await?;
        self.append(TransferStage::Media, &[StageRecord::Asset(asset.clone())])
            .await
    }

    async fn entity_keys(&self) -> Result<HashSet<EntityKey>> {
        let entities: Vec<Entity> = self.read_lines(ENTITIES_FILE).await?;
        Ok(entities
            .into_iter()
            .map(|e| (e.content_type, e.id))
            .collect())
    }

    async fn delete_entities(&self, restore: &EntityRestore) -> Result<usize> {
        let entities: Vec<Entity> = self.read_lines(ENTITIES_FILE).await?;
        let (deleted, kept): (Vec<Entity>, Vec<Entity>) = entities
            .into_iter()
            .partition(|e| restore.should_delete(&e.content_type));
        if deleted.is_empty() {
            return Ok(0);
        }
        self.rewrite_lines(ENTITIES_FILE, &kept).await?;

        let removed: HashSet<EntityKey> = deleted
            .iter()
            .map(|e| (e.content_type.clone(), e.id))
            .collect();
        let links: Vec<Link> = self.read_lines(LINKS_FILE).await?;
        let before = links.len();
        let links: Vec<Link> = links
            .into_iter()
            .filter(|l| {
                !removed.contains(&(l.left.content_type.clone(), l.left.reference))
                    && !removed.contains(&(l.right.content_type.clone(), l.right.reference))
            })
            .collect();
        if links.len() != before {
            self.rewrite_lines(LINKS_FILE, &links).await?;
        }
        info!(
            "Deleted {} entities and {} links",
            deleted.len(),
            before - links.len()
        );
        Ok(deleted.len())
    }

    async fn delete_configuration(&self, restore: &ConfigurationRestore) -> Result<usize> {
        let items: Vec<ConfigurationItem> = self.read_lines(CONFIGURATION_FILE).await?;
        let before = items.len();
        let kept: Vec<ConfigurationItem> = items
            .into_iter()
            .filter(|item| match item.kind {
                ConfigurationKind::Webhook => !restore.webhook,
                ConfigurationKind::CoreStore => !restore.core_store,
            })
            .collect();
        let deleted = before - kept.len();
        if deleted > 0 {
            self.rewrite_lines(CONFIGURATION_FILE, &kept).await?;
        }
        Ok(deleted)
    }

    async fn backup_assets(&self) -> Result<PathBuf> {
        let assets_error = |e: io::Error| {
            TransferError::recoverable(
                ErrorCode::AssetsDirectory,
                format!("could not back up the assets directory: {}", e),
            )
        };
        let uploads = self.path(UPLOADS_DIR);
        let backup = self.path(&format!(
            "{}_backup_{}",
            UPLOADS_DIR,
            chrono::Utc::now().timestamp_millis()
        ));

        match fs::metadata(&uploads).await {
            Ok(meta) if !meta.is_dir() => {
                return Err(assets_error(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("{} is not a directory", uploads.display()),
                )))
            }
            Ok(_) => fs::rename(&uploads, &backup).await.map_err(assets_error)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                fs::create_dir_all(&backup).await.map_err(assets_error)?
            }
            Err(e) => return Err(assets_error(e)),
        }

        let index = self.path(ASSETS_FILE);
        if fs::try_exists(&index).await.map_err(assets_error)? {
            fs::rename(&index, backup.join(ASSETS_FILE))
                .await
                .map_err(assets_error)?;
        }
        fs::create_dir_all(&uploads).await.map_err(assets_error)?;
        info!("Assets backed up to {}", backup.display());
        Ok(backup)
    }

    async fn remove_backup(&self, backup: &Path) -> Result<()> {
        fs::remove_dir_all(backup).await?;
        Ok(())
    }
}

async fn read_record(stage: TransferStage, line: &str, uploads: &Path) -> Result<StageRecord> {
    let value = serde_json::from_str(line)
        .map_err(|e| TransferError::stage_integrity(stage, e.to_string()))?;
    let mut record = StageRecord::from_json(stage, value)
        .map_err(|e| TransferError::stage_integrity(stage, e.to_string()))?;
    if let StageRecord::Asset(asset) = &mut record {
        let data = fs::read(uploads.join(&asset.filename))
            .await
            .map_err(|e| {
                TransferError::stage_integrity(stage, format!("{}: {}", asset.filename, e))
            })?;
        asset.stats.size = data.len() as u64;
        asset.data = Bytes::from(data);
    }
    Ok(record)
}
