//! Local file provider: tar archives, optionally gzip-compressed and encrypted.
//!
//! Layout inside the archive:
//!
//! ```text
//! metadata.json
//! schemas/schemas_00001.jsonl
//! entities/entities_00001.jsonl
//! links/links_00001.jsonl
//! configuration/configuration_00001.jsonl
//! assets/metadata/<filename>.json
//! assets/uploads/<filename>
//! ```

pub mod archive;
pub mod crypto;
pub mod destination;
pub mod source;

pub use archive::{archive_file_name, detect_format};
pub use destination::{FileDestination, FileDestinationOptions};
pub use source::{FileSource, FileSourceOptions};

/// Provider name used in diagnostics.
pub const PROVIDER_NAME: &str = "local-file";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        Asset, AssetStats, ConfigurationItem, ConfigurationKind, DestinationProvider, Entity,
        Provider, ProviderMetadata, Schema, SourceProvider, StageRecord, TransferStage,
    };
    use crate::diagnostics::{DiagnosticKind, DiagnosticsBus};
    use crate::error::TransferError;
    use bytes::Bytes;
    use serde_json::json;
    use std::path::Path;

    fn dest_options(base: &Path, compress: bool, key: Option<&str>) -> FileDestinationOptions {
        FileDestinationOptions {
            path: base.to_path_buf(),
            compress,
            encrypt: key.is_some(),
            encryption_key: key.map(str::to_string),
            jsonl_chunk_bytes: 256 * 1024 * 1024,
        }
    }

    fn entity(id: i64) -> StageRecord {
        StageRecord::Entity(Entity {
            content_type: "api::article.article".into(),
            id,
            data: json!({"title": format!("article {}", id)}),
        })
    }

    fn schema() -> StageRecord {
        StageRecord::Schema(
            serde_json::from_value::<Schema>(json!({
                "uid": "api::article.article",
                "attributes": {"title": {"type": "string"}}
            }))
            .unwrap(),
        )
    }

    fn asset(name: &str, data: &'static [u8]) -> StageRecord {
        StageRecord::Asset(Asset {
            filename: name.into(),
            filepath: format!("/uploads/{}", name),
            stats: AssetStats {
                size: data.len() as u64,
            },
            metadata: Some(json!({"mime": "image/png"})),
            data: Bytes::from_static(data),
        })
    }

    async fn write_stage(dest: &mut FileDestination, stage: TransferStage, records: Vec<StageRecord>) {
        assert!(dest.start_stage(stage).await.unwrap());
        for record in records {
            dest.write(record).await.unwrap();
        }
        dest.finish_stage(stage).await.unwrap();
    }

    async fn read_stage(source: &mut FileSource, stage: TransferStage) -> Vec<StageRecord> {
        let mut rx = source.stream(stage).await.unwrap().unwrap();
        let mut out = Vec::new();
        while let Some(record) = rx.recv().await {
            out.push(record.unwrap());
        }
        out
    }

    async fn write_archive(base: &Path, compress: bool, key: Option<&str>) -> std::path::PathBuf {
        let mut dest = FileDestination::new(dest_options(base, compress, key));
        dest.bootstrap().await.unwrap();
        dest.set_source_metadata(Some(ProviderMetadata::with_version("4.15.0")));
        write_stage(&mut dest, TransferStage::Schemas, vec![schema()]).await;
        write_stage(&mut dest, TransferStage::Entities, vec![entity(1), entity(2)]).await;
        write_stage(
            &mut dest,
            TransferStage::Configuration,
            vec![StageRecord::Configuration(ConfigurationItem {
                kind: ConfigurationKind::Webhook,
                value: json!({"name": "hook"}),
            })],
        )
        .await;
        write_stage(
            &mut dest,
            TransferStage::Media,
            vec![asset("cat.png", b"meow"), asset("dog.png", b"woof woof")],
        )
        .await;
        dest.after_transfer().await.unwrap();
        dest.close().await.unwrap();
        dest.file_path().clone()
    }

    // ===== Round trips =====

    #[tokio::test]
    async fn test_round_trip_plain() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_archive(&dir.path().join("export"), false, None).await;
        assert_eq!(path, dir.path().join("export.tar"));

        let mut source = FileSource::new(FileSourceOptions::from_path(&path, None));
        source.bootstrap().await.unwrap();

        let metadata = source.get_metadata().await.unwrap().unwrap();
        assert_eq!(metadata.version(), Some("4.15.0"));
        let schemas = source.get_schemas().await.unwrap().unwrap();
        assert!(schemas.contains_key("api::article.article"));

        let entities = read_stage(&mut source, TransferStage::Entities).await;
        assert_eq!(entities, vec![entity(1), entity(2)]);
        assert!(read_stage(&mut source, TransferStage::Links).await.is_empty());
        assert_eq!(read_stage(&mut source, TransferStage::Configuration).await.len(), 1);
    }

    #[tokio::test]
    async fn test_round_trip_compressed_encrypted_assets() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_archive(&dir.path().join("backup"), true, Some("s3cret")).await;
        assert_eq!(path, dir.path().join("backup.tar.gz.enc"));

        let options = FileSourceOptions::from_path(&path, Some("s3cret".into()));
        assert!(options.compressed && options.encrypted);
        let mut source = FileSource::new(options);
        source.bootstrap().await.unwrap();

        let assets = read_stage(&mut source, TransferStage::Media).await;
        assert_eq!(assets.len(), 2);
        let StageRecord::Asset(cat) = &assets[0] else {
            panic!("expected an asset");
        };
        assert_eq!(cat.filename, "cat.png");
        assert_eq!(cat.data, Bytes::from_static(b"meow"));
        assert_eq!(cat.stats.size, 4);
        assert_eq!(cat.metadata, Some(json!({"mime": "image/png"})));
    }

    #[tokio::test]
    async fn test_jsonl_chunk_rollover() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = dest_options(&dir.path().join("small"), false, None);
        options.jsonl_chunk_bytes = 64;
        let mut dest = FileDestination::new(options);
        dest.bootstrap().await.unwrap();
        write_stage(
            &mut dest,
            TransferStage::Entities,
            (1..=5).map(entity).collect(),
        )
        .await;
        dest.after_transfer().await.unwrap();
        dest.close().await.unwrap();

        let path = dest.file_path().clone();
        let names = tokio::task::spawn_blocking(move || {
            let mut archive = archive::open_archive(&path, false, None).unwrap();
            archive
                .entries()
                .unwrap()
                .map(|e| archive::entry_path(&e.unwrap()).unwrap())
                .collect::<Vec<_>>()
        })
        .await
        .unwrap();

        let chunks: Vec<_> = names.iter().filter(|n| n.starts_with("entities/")).collect();
        assert_eq!(chunks.len(), 5);
        assert_eq!(chunks[0], "entities/entities_00001.jsonl");

        let mut source = FileSource::new(FileSourceOptions::from_path(dest.file_path(), None));
        source.bootstrap().await.unwrap();
        assert_eq!(read_stage(&mut source, TransferStage::Entities).await.len(), 5);
    }

    #[tokio::test]
    async fn test_interrupted_export_is_not_importable() {
        let dir = tempfile::tempdir().unwrap();
        let bus = DiagnosticsBus::new();
        let mut diagnostics = bus.subscribe();
        let mut dest = FileDestination::new(dest_options(&dir.path().join("partial"), false, None));
        dest.set_warning_reporter(bus.reporter(PROVIDER_NAME));
        dest.bootstrap().await.unwrap();
        dest.set_source_metadata(Some(ProviderMetadata::with_version("4.15.0")));
        write_stage(&mut dest, TransferStage::Entities, vec![entity(1)]).await;
        dest.close().await.unwrap();

        let path = dest.file_path().clone();
        assert!(path.exists());
        let mut warned = false;
        while let Ok(d) = diagnostics.try_recv() {
            warned |= d.kind == DiagnosticKind::Warning && d.message().contains("incomplete");
        }
        assert!(warned);

        let mut source = FileSource::new(FileSourceOptions::from_path(&path, None));
        let err = source.bootstrap().await.unwrap_err();
        assert!(matches!(err, TransferError::ProviderInitialization { .. }));
        assert!(err.to_string().contains("metadata.json"));
    }

    // ===== Bootstrap failures =====

    #[tokio::test]
    async fn test_missing_file_fails_bootstrap() {
        let dir = tempfile::tempdir().unwrap();
        let mut source =
            FileSource::new(FileSourceOptions::from_path(dir.path().join("missing.tar"), None));
        let err = source.bootstrap().await.unwrap_err();
        assert!(matches!(err, TransferError::ProviderInitialization { .. }));
    }

    #[tokio::test]
    async fn test_encrypted_archive_requires_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_archive(&dir.path().join("enc"), false, Some("key")).await;

        let mut source = FileSource::new(FileSourceOptions::from_path(&path, None));
        let err = source.bootstrap().await.unwrap_err();
        assert!(err.to_string().contains("encryption key is required"));
    }

    #[tokio::test]
    async fn test_wrong_key_fails_bootstrap() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_archive(&dir.path().join("enc"), true, Some("right")).await;

        let mut source = FileSource::new(FileSourceOptions::from_path(&path, Some("wrong".into())));
        let err = source.bootstrap().await.unwrap_err();
        assert!(matches!(err, TransferError::ProviderInitialization { .. }));
    }

    #[tokio::test]
    async fn test_existing_target_fails_bootstrap() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("taken.tar"), b"").unwrap();

        let mut dest = FileDestination::new(dest_options(&dir.path().join("taken"), false, None));
        let err = dest.bootstrap().await.unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[tokio::test]
    async fn test_encrypt_without_key_fails_bootstrap() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = dest_options(&dir.path().join("x"), false, None);
        options.encrypt = true;
        let err = FileDestination::new(options).bootstrap().await.unwrap_err();
        assert!(matches!(err, TransferError::ProviderInitialization { .. }));
    }

    #[test]
    fn test_options_debug_redacts_key() {
        let options = FileSourceOptions::from_path("a.tar.enc", Some("hunter2".into()));
        let text = format!("{:?}", options);
        assert!(text.contains("[REDACTED]"));
        assert!(!text.contains("hunter2"));
    }
}
